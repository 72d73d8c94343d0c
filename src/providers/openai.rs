use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use bytes::Bytes;
use serde_json::Value;

use crate::auth::RequestAuth;
use crate::config::Config;
use crate::error::AppError;
use crate::providers::pricing::{modality_cost, PricingTable};
use crate::providers::types::{
    CostContext, ParsedFrame, ProxySpec, Transformed, TransformContext, Usage,
};
use crate::providers::{filter_request_headers, ProviderAdapter};

/// OpenAI-shape adapter.
///
/// POST bodies must be JSON and, for identity tokens, name a model from the
/// pricing table. Streaming chat completions get
/// `stream_options.include_usage` so the final frame carries usage.
pub struct OpenAiAdapter {
    base_url: String,
    api_key: Option<String>,
    pricing: Arc<PricingTable>,
}

impl OpenAiAdapter {
    pub fn new(config: &Config, pricing: Arc<PricingTable>) -> Self {
        Self {
            base_url: config.openai_base.clone(),
            api_key: config.openai_api_key.clone(),
            pricing,
        }
    }

    fn resolve_key(&self, auth: &RequestAuth) -> Result<String, AppError> {
        match auth {
            RequestAuth::Native { key } => Ok(key.clone()),
            RequestAuth::Identity { .. } => self
                .api_key
                .clone()
                .ok_or_else(|| AppError::Internal("OPENAI_API_KEY is not configured".to_string())),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        "openai"
    }

    async fn transform(&self, ctx: &TransformContext) -> Result<Transformed, AppError> {
        let mut headers = filter_request_headers(&ctx.headers);
        let mut body = (!ctx.body.is_empty()).then(|| ctx.body.clone());

        if ctx.method == Method::POST {
            require_json_content_type(&ctx.headers)?;
            let mut json: Value = serde_json::from_slice(&ctx.body)
                .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))?;

            let model = json.get("model").and_then(Value::as_str).map(String::from);
            if !ctx.auth.is_native() {
                let model = model.as_deref().ok_or_else(|| {
                    AppError::BadRequest("Model missing from request body".to_string())
                })?;
                if !self.pricing.has_model(model) {
                    return Err(AppError::BadRequest(format!(
                        "Model {model} pricing unknown"
                    )));
                }
            }

            let streaming = json.get("stream").and_then(Value::as_bool).unwrap_or(false);
            if streaming && base_path(&ctx.path).ends_with("/chat/completions") {
                set_include_usage(&mut json);
                body = Some(Bytes::from(serde_json::to_vec(&json).map_err(|e| {
                    AppError::Internal(format!("failed to re-serialize body: {e}"))
                })?));
            }
        }

        let key = self.resolve_key(&ctx.auth)?;
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {key}")
                .parse()
                .map_err(|_| AppError::BadRequest("Invalid credential characters".to_string()))?,
        );

        Ok(Transformed::Proxy(ProxySpec {
            url: format!("{}/{}", self.base_url, ctx.path),
            headers,
            body,
        }))
    }

    async fn cost(&self, ctx: &CostContext) -> Result<f64, AppError> {
        let (Some(model), Some(usage)) = (&ctx.model, &ctx.usage) else {
            return Ok(0.0);
        };
        let Some(rate) = self.pricing.get(model) else {
            tracing::warn!(model = %model, "No pricing for model, charging zero");
            return Ok(0.0);
        };
        Ok(modality_cost(rate, usage))
    }

    fn parse(&self, event: &Value) -> ParsedFrame {
        // Some wrappers nest the payload under an outer {response: …}.
        let event = event.get("response").unwrap_or(event);
        ParsedFrame {
            model: event.get("model").and_then(Value::as_str).map(String::from),
            usage: event
                .get("usage")
                .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok()),
        }
    }
}

/// Path suffix without the query string.
fn base_path(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

fn require_json_content_type(headers: &axum::http::HeaderMap) -> Result<(), AppError> {
    let ok = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "POST body must be application/json".to_string(),
        ))
    }
}

fn set_include_usage(json: &mut Value) {
    if let Some(obj) = json.as_object_mut() {
        let options = obj
            .entry("stream_options")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(map) = options.as_object_mut() {
            map.insert("include_usage".to_string(), Value::Bool(true));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
