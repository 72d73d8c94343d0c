use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::auth::RequestAuth;
use crate::config::Config;
use crate::error::AppError;
use crate::http::HttpClient;
use crate::providers::types::{
    CostContext, ParsedFrame, ProxySpec, Transformed, TransformContext, Usage,
};
use crate::providers::{filter_request_headers, ProviderAdapter};

/// OpenRouter-shape adapter.
///
/// Bodies pass through as raw bytes; pricing comes from the live model
/// directory rather than a static table, so there is no model gate.
pub struct OpenRouterAdapter {
    base_url: String,
    api_key: Option<String>,
    directory: ModelDirectory,
}

impl OpenRouterAdapter {
    pub fn new(config: &Config, http: &HttpClient) -> Self {
        Self {
            base_url: config.openrouter_base.clone(),
            api_key: config.openrouter_api_key.clone(),
            directory: ModelDirectory::new(http.clone(), &config.openrouter_base),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn id(&self) -> &str {
        "openrouter"
    }

    async fn transform(&self, ctx: &TransformContext) -> Result<Transformed, AppError> {
        let mut headers = filter_request_headers(&ctx.headers);

        let key = match &ctx.auth {
            RequestAuth::Native { key } => key.clone(),
            RequestAuth::Identity { .. } => self.api_key.clone().ok_or_else(|| {
                AppError::Internal("OPENROUTER_API_KEY is not configured".to_string())
            })?,
        };
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {key}")
                .parse()
                .map_err(|_| AppError::BadRequest("Invalid credential characters".to_string()))?,
        );

        // Attribution headers identify gateway traffic; native-key requests
        // are the caller's own account and stay unattributed.
        if !ctx.auth.is_native() {
            headers.insert("http-referer", HeaderValue::from_static("https://aipipe.org/"));
            headers.insert("x-title", HeaderValue::from_static("AIPipe"));
        }

        Ok(Transformed::Proxy(ProxySpec {
            url: format!("{}/{}", self.base_url, ctx.path),
            headers,
            body: (!ctx.body.is_empty()).then(|| ctx.body.clone()),
        }))
    }

    async fn cost(&self, ctx: &CostContext) -> Result<f64, AppError> {
        let (Some(model), Some(usage)) = (&ctx.model, &ctx.usage) else {
            return Ok(0.0);
        };
        let Some(rate) = self.directory.rate_for(model).await else {
            tracing::warn!(model = %model, "Model absent from OpenRouter directory, charging zero");
            return Ok(0.0);
        };
        Ok(rate.dollars(usage))
    }

    fn parse(&self, event: &Value) -> ParsedFrame {
        ParsedFrame {
            model: event.get("model").and_then(Value::as_str).map(String::from),
            usage: event
                .get("usage")
                .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok()),
        }
    }
}

// ---------------------------------------------------------------------------
// Model directory
// ---------------------------------------------------------------------------

/// Per-token dollar rates for one OpenRouter model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryRate {
    pub prompt: f64,
    pub completion: f64,
    pub internal_reasoning: f64,
    pub image: f64,
    pub request: f64,
}

impl DirectoryRate {
    fn dollars(&self, usage: &Usage) -> f64 {
        usage.prompt_tokens as f64 * self.prompt
            + usage.completion_tokens as f64 * self.completion
            + usage.reasoning_tokens() as f64 * self.internal_reasoning
            + usage.image_tokens() as f64 * self.image
            + self.request
    }
}

/// Lazy per-process cache of the OpenRouter `/api/v1/models` list.
///
/// A lookup miss refetches the whole list and swaps the cache; a stale price
/// for a known model persists until some miss forces a refresh.
pub struct ModelDirectory {
    http: HttpClient,
    models_url: String,
    cache: RwLock<HashMap<String, DirectoryRate>>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    pricing: Option<WirePricing>,
}

/// Directory prices arrive as decimal strings.
#[derive(Debug, Deserialize)]
struct WirePricing {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    completion: Option<String>,
    #[serde(default)]
    internal_reasoning: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    request: Option<String>,
}

impl ModelDirectory {
    pub fn new(http: HttpClient, base_url: &str) -> Self {
        Self {
            http,
            models_url: format!("{base_url}/api/v1/models"),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Rates for a model id; a miss triggers a full refetch-and-swap.
    pub async fn rate_for(&self, model: &str) -> Option<DirectoryRate> {
        if let Some(rate) = self.cache.read().await.get(model) {
            return Some(rate.clone());
        }

        match self.fetch().await {
            Ok(fresh) => {
                let mut cache = self.cache.write().await;
                *cache = fresh;
                cache.get(model).cloned()
            }
            Err(e) => {
                tracing::warn!(error = %e, "OpenRouter model directory fetch failed");
                None
            }
        }
    }

    async fn fetch(&self) -> Result<HashMap<String, DirectoryRate>, AppError> {
        let response: ModelsResponse = self
            .http
            .inner()
            .get(&self.models_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("model directory parse failed: {e}")))?;

        let mut rates = HashMap::new();
        for entry in response.data {
            let Some(pricing) = entry.pricing else {
                continue;
            };
            rates.insert(
                entry.id,
                DirectoryRate {
                    prompt: parse_price(pricing.prompt.as_deref()),
                    completion: parse_price(pricing.completion.as_deref()),
                    internal_reasoning: parse_price(pricing.internal_reasoning.as_deref()),
                    image: parse_price(pricing.image.as_deref()),
                    request: parse_price(pricing.request.as_deref()),
                },
            );
        }
        tracing::debug!(models = rates.len(), "Refreshed OpenRouter model directory");
        Ok(rates)
    }
}

fn parse_price(s: Option<&str>) -> f64 {
    s.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::CompletionTokensDetails;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;

    fn adapter() -> OpenRouterAdapter {
        let mut config = Config::with_secret("s");
        config.openrouter_api_key = Some("sk-or-server".to_string());
        OpenRouterAdapter::new(&config, &HttpClient::new())
    }

    fn ctx(auth: RequestAuth) -> TransformContext {
        TransformContext {
            path: "api/v1/chat/completions".to_string(),
            method: Method::POST,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{\"model\":\"x\"}"),
            auth,
        }
    }

    #[tokio::test]
    async fn test_identity_requests_get_attribution_headers() {
        let ctx = ctx(RequestAuth::Identity {
            email: "a@b.com".to_string(),
        });
        let Transformed::Proxy(spec) = adapter().transform(&ctx).await.unwrap() else {
            panic!("expected proxy spec");
        };
        assert_eq!(spec.headers[AUTHORIZATION], "Bearer sk-or-server");
        assert_eq!(spec.headers["http-referer"], "https://aipipe.org/");
        assert_eq!(spec.headers["x-title"], "AIPipe");
    }

    #[tokio::test]
    async fn test_native_requests_stay_unattributed() {
        let ctx = ctx(RequestAuth::Native {
            key: "sk-or-v1-client".to_string(),
        });
        let Transformed::Proxy(spec) = adapter().transform(&ctx).await.unwrap() else {
            panic!("expected proxy spec");
        };
        assert_eq!(spec.headers[AUTHORIZATION], "Bearer sk-or-v1-client");
        assert!(!spec.headers.contains_key("http-referer"));
        assert!(!spec.headers.contains_key("x-title"));
    }

    #[tokio::test]
    async fn test_body_passes_through_untouched() {
        let ctx = ctx(RequestAuth::Native {
            key: "sk-or-v1-client".to_string(),
        });
        let Transformed::Proxy(spec) = adapter().transform(&ctx).await.unwrap() else {
            panic!("expected proxy spec");
        };
        assert_eq!(spec.body.unwrap(), Bytes::from_static(b"{\"model\":\"x\"}"));
    }

    #[test]
    fn test_parse_price_strings() {
        assert_eq!(parse_price(Some("0.000001")), 0.000001);
        assert_eq!(parse_price(Some("-1")), 0.0);
        assert_eq!(parse_price(Some("abc")), 0.0);
        assert_eq!(parse_price(None), 0.0);
    }

    #[test]
    fn test_directory_rate_arithmetic() {
        let rate = DirectoryRate {
            prompt: 0.000001,
            completion: 0.000002,
            internal_reasoning: 0.000003,
            image: 0.0,
            request: 0.0001,
        };
        let usage = Usage {
            prompt_tokens: 500,
            completion_tokens: 200,
            completion_tokens_details: Some(CompletionTokensDetails {
                reasoning_tokens: Some(100),
                audio_tokens: None,
                image_tokens: None,
            }),
            ..Default::default()
        };
        let dollars = rate.dollars(&usage);
        let expected = 500.0 * 0.000001 + 200.0 * 0.000002 + 100.0 * 0.000003 + 0.0001;
        assert!((dollars - expected).abs() < 1e-12);
    }

    #[test]
    fn test_models_response_wire_parse() {
        let json = r#"{"data": [
            {"id": "openrouter/test-model",
             "pricing": {"prompt": "0.000001", "completion": "0.000002"}},
            {"id": "no-pricing-model"}
        ]}"#;
        let response: ModelsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.len(), 2);
        assert!(response.data[1].pricing.is_none());
    }
}
