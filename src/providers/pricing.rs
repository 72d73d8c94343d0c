//! Model pricing tables.
//!
//! Prices are USD per 1M tokens. The tables are built once at startup and
//! read-only afterwards. Not every upstream model appears: absence is a
//! client error for identity-token requests and a silently-zero cost for
//! native-key requests.

use std::collections::HashMap;

use serde::Serialize;

/// Per-million-token rates for one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
    /// Audio token rates, present on transcribe and audio-preview models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_per_million: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_output_per_million: Option<f64>,
}

impl ModelRate {
    fn text(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            audio_input_per_million: None,
            audio_output_per_million: None,
        }
    }

    fn audio(input: f64, output: f64, audio_in: f64, audio_out: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            audio_input_per_million: Some(audio_in),
            audio_output_per_million: Some(audio_out),
        }
    }
}

/// Read-only model-id -> rate mapping.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, ModelRate>,
}

impl PricingTable {
    /// OpenAI-shape pricing.
    /// Source: https://platform.openai.com/docs/pricing
    pub fn openai() -> Self {
        let mut rates = HashMap::new();
        rates.insert("gpt-4.1".to_string(), ModelRate::text(2.00, 8.00));
        rates.insert("gpt-4.1-mini".to_string(), ModelRate::text(0.40, 1.60));
        rates.insert("gpt-4.1-nano".to_string(), ModelRate::text(0.10, 0.40));
        rates.insert("gpt-4o".to_string(), ModelRate::text(2.50, 10.00));
        rates.insert("gpt-4o-mini".to_string(), ModelRate::text(0.15, 0.60));
        rates.insert("o3-mini".to_string(), ModelRate::text(1.10, 4.40));
        rates.insert(
            "gpt-4o-audio-preview".to_string(),
            ModelRate::audio(2.50, 10.00, 40.00, 80.00),
        );
        rates.insert(
            "gpt-4o-mini-audio-preview".to_string(),
            ModelRate::audio(0.15, 0.60, 10.00, 20.00),
        );
        rates.insert(
            "gpt-4o-transcribe".to_string(),
            ModelRate::audio(2.50, 10.00, 6.00, 10.00),
        );
        rates.insert(
            "gpt-4o-mini-transcribe".to_string(),
            ModelRate::audio(1.25, 5.00, 3.00, 5.00),
        );
        rates.insert(
            "text-embedding-3-small".to_string(),
            ModelRate::text(0.02, 0.0),
        );
        rates.insert(
            "text-embedding-3-large".to_string(),
            ModelRate::text(0.13, 0.0),
        );
        Self { rates }
    }

    /// Gemini-shape pricing.
    /// Source: https://ai.google.dev/pricing
    pub fn gemini() -> Self {
        let mut rates = HashMap::new();
        rates.insert("gemini-2.5-pro".to_string(), ModelRate::text(1.25, 10.00));
        rates.insert("gemini-2.5-flash".to_string(), ModelRate::text(0.30, 2.50));
        rates.insert(
            "gemini-2.5-flash-lite".to_string(),
            ModelRate::text(0.10, 0.40),
        );
        rates.insert("gemini-2.0-flash".to_string(), ModelRate::text(0.10, 0.40));
        rates.insert(
            "gemini-2.0-flash-lite".to_string(),
            ModelRate::text(0.075, 0.30),
        );
        rates.insert(
            "gemini-embedding-001".to_string(),
            ModelRate::text(0.15, 0.0),
        );
        rates.insert(
            "text-embedding-004".to_string(),
            ModelRate::text(0.025, 0.0),
        );
        Self { rates }
    }

    pub fn get(&self, model: &str) -> Option<&ModelRate> {
        self.rates.get(model)
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.rates.contains_key(model)
    }
}

/// Usage-weighted cost in dollars for the modality sub-counters of one
/// request. Missing usage is zero cost; audio tokens fall back to the text
/// rate when the model carries no audio rate.
pub fn modality_cost(rate: &ModelRate, usage: &crate::providers::types::Usage) -> f64 {
    let text_in = usage.text_prompt_tokens() as f64 * rate.input_per_million;
    let text_out = usage.text_completion_tokens() as f64 * rate.output_per_million;
    let audio_in = usage.audio_prompt_tokens() as f64
        * rate.audio_input_per_million.unwrap_or(rate.input_per_million);
    let audio_out = usage.audio_completion_tokens() as f64
        * rate
            .audio_output_per_million
            .unwrap_or(rate.output_per_million);
    (text_in + text_out + audio_in + audio_out) / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::{CompletionTokensDetails, PromptTokensDetails, Usage};

    #[test]
    fn test_openai_table_lookup() {
        let table = PricingTable::openai();
        let rate = table.get("gpt-4.1-nano").unwrap();
        assert_eq!(rate.input_per_million, 0.10);
        assert_eq!(rate.output_per_million, 0.40);
        assert!(table.has_model("text-embedding-3-small"));
        assert!(!table.has_model("unknown-model"));
    }

    #[test]
    fn test_text_only_cost() {
        let table = PricingTable::openai();
        let rate = table.get("gpt-4.1-nano").unwrap();
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            ..Default::default()
        };
        let cost = modality_cost(rate, &usage);
        let expected = (10.0 * 0.10 + 5.0 * 0.40) / 1e6;
        assert!((cost - expected).abs() < 1e-15);
    }

    #[test]
    fn test_audio_cost_split() {
        let table = PricingTable::openai();
        let rate = table.get("gpt-4o-mini-audio-preview").unwrap();
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 400,
            prompt_tokens_details: Some(PromptTokensDetails {
                cached_tokens: None,
                audio_tokens: Some(600),
            }),
            completion_tokens_details: Some(CompletionTokensDetails {
                reasoning_tokens: None,
                audio_tokens: Some(100),
                image_tokens: None,
            }),
        };
        let cost = modality_cost(rate, &usage);
        let expected =
            (400.0 * 0.15 + 300.0 * 0.60 + 600.0 * 10.00 + 100.0 * 20.00) / 1e6;
        assert!((cost - expected).abs() < 1e-15);
    }

    #[test]
    fn test_zero_usage_zero_cost() {
        let table = PricingTable::gemini();
        let rate = table.get("gemini-2.0-flash").unwrap();
        assert_eq!(modality_cost(rate, &Usage::default()), 0.0);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::providers::types::Usage;
    use proptest::prelude::*;

    fn usage_strategy() -> impl Strategy<Value = Usage> {
        (0u64..1_000_000, 0u64..1_000_000).prop_map(|(prompt, completion)| Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            ..Default::default()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Cost is non-negative, finite, and doubles with the token counts.
        #[test]
        fn prop_cost_non_negative_and_linear(usage in usage_strategy()) {
            let table = PricingTable::openai();
            let rate = table.get("gpt-4.1-nano").unwrap();

            let cost = modality_cost(rate, &usage);
            prop_assert!(cost >= 0.0);
            prop_assert!(cost.is_finite());

            let doubled = Usage {
                prompt_tokens: usage.prompt_tokens * 2,
                completion_tokens: usage.completion_tokens * 2,
                ..Default::default()
            };
            let double_cost = modality_cost(rate, &doubled);
            prop_assert!((double_cost - 2.0 * cost).abs() < 1e-9);
        }

        /// Identical inputs always produce identical cost.
        #[test]
        fn prop_cost_deterministic(usage in usage_strategy()) {
            let table = PricingTable::gemini();
            let rate = table.get("gemini-2.5-flash").unwrap();
            prop_assert_eq!(modality_cost(rate, &usage), modality_cost(rate, &usage));
        }
    }
}
