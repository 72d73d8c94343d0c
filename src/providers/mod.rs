//! Provider adapters.
//!
//! Each upstream is a [`ProviderAdapter`]: it rewrites an incoming request
//! into an upstream request (or produces a direct result), prices a finished
//! request, and extracts `{model, usage}` from response bodies and SSE
//! frames.

pub mod gemini;
pub mod openai;
pub mod openrouter;
pub mod pricing;
pub mod similarity;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::{
    ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH, CONTENT_SECURITY_POLICY, HOST, TRANSFER_ENCODING,
};
use axum::http::HeaderMap;

use crate::config::Config;
use crate::error::AppError;
use crate::http::HttpClient;

pub use self::types::{CostContext, ParsedFrame, ProxySpec, Transformed, TransformContext, Usage};

/// The uniform upstream contract.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Route segment this adapter answers for (e.g. "openai").
    fn id(&self) -> &str;

    /// Rewrite an incoming request into an upstream request, or produce a
    /// direct result. Errors short-circuit the pipeline and surface as the
    /// JSON error body.
    async fn transform(&self, ctx: &TransformContext) -> Result<Transformed, AppError>;

    /// Dollar cost of a finished request. Unknown models cost zero here;
    /// the transform step already rejected them for identity tokens.
    async fn cost(&self, ctx: &CostContext) -> Result<f64, AppError>;

    /// Extract `{model, usage}` from one parsed JSON object: either a unary
    /// response body or a single SSE `data:` frame.
    fn parse(&self, event: &serde_json::Value) -> ParsedFrame;
}

/// Registry of adapters keyed by route segment.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// The deployed adapter set: OpenAI, OpenRouter, Gemini, similarity.
    pub fn standard(config: &Config, http: &HttpClient) -> Self {
        let openai_pricing = Arc::new(pricing::PricingTable::openai());

        let mut registry = Self::new();
        registry.register(Arc::new(openai::OpenAiAdapter::new(
            config,
            Arc::clone(&openai_pricing),
        )));
        registry.register(Arc::new(openrouter::OpenRouterAdapter::new(config, http)));
        registry.register(Arc::new(gemini::GeminiAdapter::new(config, http)));
        registry.register(Arc::new(similarity::SimilarityAdapter::new(
            config,
            http,
            openai_pricing,
        )));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop hop-by-hop and platform-injected request headers before forwarding.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if name == CONTENT_LENGTH
            || name == HOST
            || name == CONNECTION
            || name == ACCEPT_ENCODING
            || name.as_str().starts_with("cf-")
        {
            continue;
        }
        out.append(name, value.clone());
    }
    out
}

/// Drop headers that no longer describe the response we emit.
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if name == TRANSFER_ENCODING || name == CONNECTION || name == CONTENT_SECURITY_POLICY {
            continue;
        }
        out.append(name, value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_filter_request_headers_drops_platform_fields() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("42"));
        headers.insert("host", HeaderValue::from_static("aipipe.local"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.2.3.4"));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("Bearer x"));

        let out = filter_request_headers(&headers);
        assert_eq!(out.len(), 2);
        assert!(out.contains_key("content-type"));
        assert!(out.contains_key("authorization"));
    }

    #[test]
    fn test_filter_response_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("connection", HeaderValue::from_static("close"));
        headers.insert(
            "content-security-policy",
            HeaderValue::from_static("default-src 'none'"),
        );
        headers.insert(
            "content-type",
            HeaderValue::from_static("text/event-stream"),
        );

        let out = filter_response_headers(&headers);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("content-type"));
    }
}
