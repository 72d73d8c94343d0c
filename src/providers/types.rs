use axum::http::HeaderMap;
use axum::http::Method;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::auth::RequestAuth;

/// Canonical token usage, OpenAI field names.
///
/// Adapters translate provider-specific counters into this shape; unknown
/// fields are ignored on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tokens: Option<u64>,
}

impl Usage {
    /// Prompt tokens that are not audio.
    pub fn text_prompt_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_sub(self.audio_prompt_tokens())
    }

    /// Completion tokens that are not audio.
    pub fn text_completion_tokens(&self) -> u64 {
        self.completion_tokens
            .saturating_sub(self.audio_completion_tokens())
    }

    pub fn audio_prompt_tokens(&self) -> u64 {
        self.prompt_tokens_details
            .as_ref()
            .and_then(|d| d.audio_tokens)
            .unwrap_or(0)
    }

    pub fn audio_completion_tokens(&self) -> u64 {
        self.completion_tokens_details
            .as_ref()
            .and_then(|d| d.audio_tokens)
            .unwrap_or(0)
    }

    pub fn reasoning_tokens(&self) -> u64 {
        self.completion_tokens_details
            .as_ref()
            .and_then(|d| d.reasoning_tokens)
            .unwrap_or(0)
    }

    pub fn image_tokens(&self) -> u64 {
        self.completion_tokens_details
            .as_ref()
            .and_then(|d| d.image_tokens)
            .unwrap_or(0)
    }
}

/// The `{model, usage}` pair extracted from one response body or one SSE
/// `data:` frame. Either side may be absent.
#[derive(Debug, Clone, Default)]
pub struct ParsedFrame {
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

/// Input to `ProviderAdapter::transform`.
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Path suffix after the provider segment, query string included
    /// (e.g. `v1/chat/completions`).
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub auth: RequestAuth,
}

/// A rewritten upstream request.
#[derive(Debug)]
pub struct ProxySpec {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Outcome of `ProviderAdapter::transform`: either a request to forward, or
/// a locally produced result (the similarity adapter).
#[derive(Debug)]
pub enum Transformed {
    Proxy(ProxySpec),
    Direct {
        body: serde_json::Value,
        model: Option<String>,
        usage: Option<Usage>,
    },
}

/// Input to `ProviderAdapter::cost`.
#[derive(Debug, Clone, Default)]
pub struct CostContext {
    pub model: Option<String>,
    pub usage: Option<Usage>,
    /// Path suffix of the originating request (query included).
    pub path: String,
    /// Parsed JSON request body, when the request had one. Used by the
    /// Gemini adapter's countTokens fallback.
    pub request_body: Option<serde_json::Value>,
}
