use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::RequestAuth;
use crate::config::Config;
use crate::error::AppError;
use crate::http::HttpClient;
use crate::providers::pricing::{modality_cost, PricingTable};
use crate::providers::types::{CostContext, ParsedFrame, Transformed, TransformContext, Usage};
use crate::providers::ProviderAdapter;

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_PRECISION: u32 = 5;

/// Direct-result adapter: embeds the given documents once and answers with a
/// cosine-similarity matrix instead of forwarding a single upstream request.
pub struct SimilarityAdapter {
    openai_base: String,
    api_key: Option<String>,
    http: HttpClient,
    pricing: Arc<PricingTable>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f64>,
}

impl SimilarityAdapter {
    pub fn new(config: &Config, http: &HttpClient, pricing: Arc<PricingTable>) -> Self {
        Self {
            openai_base: config.openai_base.clone(),
            api_key: config.openai_api_key.clone(),
            http: http.clone(),
            pricing,
        }
    }

    async fn embed(
        &self,
        auth: &RequestAuth,
        model: &str,
        input: &[String],
    ) -> Result<EmbeddingResponse, AppError> {
        let key = match auth {
            RequestAuth::Native { key } => key.clone(),
            RequestAuth::Identity { .. } => self
                .api_key
                .clone()
                .ok_or_else(|| AppError::Internal("OPENAI_API_KEY is not configured".to_string()))?,
        };

        let response = self
            .http
            .inner()
            .post(format!("{}/v1/embeddings", self.openai_base))
            .bearer_auth(key)
            .json(&serde_json::json!({ "model": model, "input": input }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "embeddings call failed ({status}): {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("embeddings parse failed: {e}")))?;

        if parsed.data.len() != input.len() {
            return Err(AppError::Upstream(format!(
                "embeddings call returned {} vectors for {} inputs",
                parsed.data.len(),
                input.len()
            )));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ProviderAdapter for SimilarityAdapter {
    fn id(&self) -> &str {
        "similarity"
    }

    async fn transform(&self, ctx: &TransformContext) -> Result<Transformed, AppError> {
        let input: Value = serde_json::from_slice(&ctx.body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))?;

        let docs = normalize_items(input.get("docs"), "docs")?;
        if docs.is_empty() {
            return Err(AppError::BadRequest(
                "docs must be a non-empty array".to_string(),
            ));
        }
        let topics = match input.get("topics") {
            Some(Value::Null) | None => None,
            Some(value) => Some(normalize_items(Some(value), "topics")?),
        };
        let model = input
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        let precision = input
            .get("precision")
            .and_then(Value::as_u64)
            .map(|p| p as u32)
            .unwrap_or(DEFAULT_PRECISION);

        // One embeddings call covers docs and topics; with topics omitted the
        // docs double as targets and are embedded once, not twice.
        let mut combined = docs.clone();
        if let Some(topics) = &topics {
            combined.extend(topics.iter().cloned());
        }
        let response = self.embed(&ctx.auth, &model, &combined).await?;

        let vectors: Vec<Vec<f64>> = response.data.into_iter().map(|d| d.embedding).collect();
        let doc_vecs = &vectors[..docs.len()];
        let target_vecs = if topics.is_some() {
            &vectors[docs.len()..]
        } else {
            doc_vecs
        };

        let similarity: Vec<Vec<f64>> = doc_vecs
            .iter()
            .map(|doc| {
                target_vecs
                    .iter()
                    .map(|target| round_to(cosine(doc, target), precision))
                    .collect()
            })
            .collect();

        let model = response.model.unwrap_or(model);
        let usage = response.usage.unwrap_or_default();
        let body = serde_json::json!({
            "model": &model,
            "similarity": similarity,
            "usage": { "prompt_tokens": usage.prompt_tokens },
        });

        Ok(Transformed::Direct {
            body,
            model: Some(model),
            usage: Some(usage),
        })
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

    fn parse(&self, _event: &Value) -> ParsedFrame {
        // Direct-result adapter: nothing passes through to parse.
        ParsedFrame::default()
    }
}

/// Each item must be a string or an object with a `value` field.
fn normalize_items(value: Option<&Value>, field: &str) -> Result<Vec<String>, AppError> {
    let items = value
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::BadRequest(format!("{field} must be an array")))?;

    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            Value::Object(obj) => obj
                .get("value")
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| {
                    AppError::BadRequest(format!("{field} items must have a string value field"))
                }),
            _ => Err(AppError::BadRequest(format!(
                "{field} items must be strings or objects with a value field"
            ))),
        })
        .collect()
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(12) as i32);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_orthogonal_and_parallel() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!((cosine(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456789, 5), 0.12346);
        assert_eq!(round_to(1.0, 5), 1.0);
        assert_eq!(round_to(-0.000004, 5), -0.0);
    }

    #[test]
    fn test_normalize_strings_and_objects() {
        let value = serde_json::json!(["plain", {"type": "text", "value": "wrapped"}]);
        let items = normalize_items(Some(&value), "docs").unwrap();
        assert_eq!(items, vec!["plain".to_string(), "wrapped".to_string()]);
    }

    #[test]
    fn test_normalize_rejects_numbers() {
        let value = serde_json::json!(["ok", 42]);
        let err = normalize_items(Some(&value), "docs").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_normalize_rejects_object_without_value() {
        let value = serde_json::json!([{"type": "text"}]);
        assert!(normalize_items(Some(&value), "docs").is_err());
    }

    #[test]
    fn test_normalize_rejects_non_array() {
        let value = serde_json::json!("not-an-array");
        assert!(normalize_items(Some(&value), "docs").is_err());
        assert!(normalize_items(None, "docs").is_err());
    }
}
