use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::Method;
use serde_json::Value;

use crate::auth::RequestAuth;
use crate::config::Config;
use crate::error::AppError;
use crate::http::HttpClient;
use crate::providers::pricing::{modality_cost, PricingTable};
use crate::providers::types::{
    CostContext, ParsedFrame, ProxySpec, Transformed, TransformContext, Usage,
};
use crate::providers::{filter_request_headers, ProviderAdapter};

/// Gemini-shape adapter.
///
/// The gateway bearer header becomes `x-goog-api-key`. Usage arrives as
/// `usageMetadata` with Google field names; `:embedContent` responses carry
/// no usage at all, so cost falls back to a `:countTokens` side-call.
pub struct GeminiAdapter {
    base_url: String,
    api_key: Option<String>,
    pricing: PricingTable,
    http: HttpClient,
}

impl GeminiAdapter {
    pub fn new(config: &Config, http: &HttpClient) -> Self {
        Self {
            base_url: config.gemini_base.clone(),
            api_key: config.gemini_api_key.clone(),
            pricing: PricingTable::gemini(),
            http: http.clone(),
        }
    }

    fn resolve_key(&self, auth: &RequestAuth) -> Result<String, AppError> {
        match auth {
            RequestAuth::Native { key } => Ok(key.clone()),
            RequestAuth::Identity { .. } => self
                .api_key
                .clone()
                .ok_or_else(|| AppError::Internal("GEMINI_API_KEY is not configured".to_string())),
        }
    }

    /// `:countTokens` side-call with the request's content, used when an
    /// `:embedContent` response reported no usage.
    async fn count_tokens(&self, path: &str, request_body: &Value) -> Result<u64, AppError> {
        let count_path = base_path(path).replace(":embedContent", ":countTokens");
        let url = format!("{}/{}", self.base_url, count_path);

        let contents = match (request_body.get("content"), request_body.get("contents")) {
            (Some(content), _) => Value::Array(vec![content.clone()]),
            (None, Some(contents)) => contents.clone(),
            (None, None) => {
                return Err(AppError::Upstream(
                    "embedContent request had no content to count".to_string(),
                ))
            }
        };

        let key = self
            .api_key
            .clone()
            .ok_or_else(|| AppError::Internal("GEMINI_API_KEY is not configured".to_string()))?;

        let response: Value = self
            .http
            .inner()
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&serde_json::json!({ "contents": contents }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::Upstream(format!("countTokens call failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("countTokens parse failed: {e}")))?;

        Ok(response
            .get("totalTokens")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> &str {
        "gemini"
    }

    async fn transform(&self, ctx: &TransformContext) -> Result<Transformed, AppError> {
        let mut headers = filter_request_headers(&ctx.headers);
        headers.remove(AUTHORIZATION);

        let key = self.resolve_key(&ctx.auth)?;
        headers.insert(
            "x-goog-api-key",
            key.parse()
                .map_err(|_| AppError::BadRequest("Invalid credential characters".to_string()))?,
        );

        if !ctx.auth.is_native() && ctx.method == Method::POST {
            let body_json: Option<Value> = serde_json::from_slice(&ctx.body).ok();
            let model = body_json
                .as_ref()
                .and_then(|b| b.get("model"))
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| model_from_path(&ctx.path));
            if let Some(model) = model {
                let id = model.trim_start_matches("models/");
                if !self.pricing.has_model(id) {
                    return Err(AppError::BadRequest(format!("Model {id} pricing unknown")));
                }
            }
        }

        Ok(Transformed::Proxy(ProxySpec {
            url: format!("{}/{}", self.base_url, ctx.path),
            headers,
            body: (!ctx.body.is_empty()).then(|| ctx.body.clone()),
        }))
    }

    async fn cost(&self, ctx: &CostContext) -> Result<f64, AppError> {
        let model = ctx
            .model
            .clone()
            .or_else(|| model_from_path(&ctx.path))
            .map(|m| m.trim_start_matches("models/").to_string());
        let Some(model) = model else {
            return Ok(0.0);
        };
        let Some(rate) = self.pricing.get(&model) else {
            tracing::warn!(model = %model, "No pricing for model, charging zero");
            return Ok(0.0);
        };

        if let Some(usage) = &ctx.usage {
            return Ok(modality_cost(rate, usage));
        }

        if base_path(&ctx.path).ends_with(":embedContent") {
            if let Some(body) = &ctx.request_body {
                let tokens = self.count_tokens(&ctx.path, body).await?;
                return Ok(tokens as f64 * rate.input_per_million / 1_000_000.0);
            }
        }

        Ok(0.0)
    }

    fn parse(&self, event: &Value) -> ParsedFrame {
        let model = event
            .get("modelVersion")
            .or_else(|| event.get("model"))
            .and_then(Value::as_str)
            .map(String::from);

        let usage = event.get("usageMetadata").map(|meta| Usage {
            prompt_tokens: meta
                .get("promptTokenCount")
                .or_else(|| meta.get("tokenCount"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            completion_tokens: meta
                .get("candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            ..Default::default()
        });

        ParsedFrame { model, usage }
    }
}

/// Extract `<model>` from `…/models/<model>:<op>` shaped paths.
fn model_from_path(path: &str) -> Option<String> {
    let rest = path.split("models/").nth(1)?;
    let model = rest.split([':', '/', '?']).next()?;
    if model.is_empty() {
        None
    } else {
        Some(model.to_string())
    }
}

fn base_path(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
