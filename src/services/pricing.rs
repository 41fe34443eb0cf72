//! Per-model token pricing, used to turn an `AgentRunResult`'s token
//! usage into a `cost.json` session entry. Deliberately small: this
//! crate doesn't need a general-purpose billing engine, just enough to
//! keep the cost ledger's numbers meaningful.

use crate::domain::models::cost::Session;
use crate::domain::ports::agent_runner::TokenUsage;

/// USD cost per million tokens for one pricing tier.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

/// Looks up known model pricing, falling back to the Sonnet tier for
/// anything unrecognized rather than refusing to record a cost.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    if model.contains("opus") {
        ModelPricing { input_per_million: 15.0, output_per_million: 75.0, cache_read_per_million: 1.5, cache_write_per_million: 18.75 }
    } else if model.contains("haiku") {
        ModelPricing { input_per_million: 0.8, output_per_million: 4.0, cache_read_per_million: 0.08, cache_write_per_million: 1.0 }
    } else {
        ModelPricing { input_per_million: 3.0, output_per_million: 15.0, cache_read_per_million: 0.3, cache_write_per_million: 3.75 }
    }
}

pub fn cost_usd(model: &str, usage: &TokenUsage) -> f64 {
    let pricing = pricing_for_model(model);
    let million = 1_000_000.0;
    (usage.input_tokens as f64 / million) * pricing.input_per_million
        + (usage.output_tokens as f64 / million) * pricing.output_per_million
        + (usage.cache_read_tokens as f64 / million) * pricing.cache_read_per_million
        + (usage.cache_write_tokens as f64 / million) * pricing.cache_write_per_million
}

pub fn session_for(role: &str, task_id: Option<u64>, model: &str, usage: TokenUsage) -> Session {
    let cost = cost_usd(model, &usage);
    Session {
        id: uuid::Uuid::new_v4(),
        role: role.to_string(),
        task_id,
        model: model.to_string(),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_read_tokens: usage.cache_read_tokens,
        cache_write_tokens: usage.cache_write_tokens,
        cost_usd: cost,
        recorded_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_sonnet_tier() {
        let usage = TokenUsage { input_tokens: 1_000_000, output_tokens: 0, cache_read_tokens: 0, cache_write_tokens: 0 };
        assert!((cost_usd("some-future-model", &usage) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn opus_costs_more_than_haiku() {
        let usage = TokenUsage { input_tokens: 1_000_000, output_tokens: 1_000_000, cache_read_tokens: 0, cache_write_tokens: 0 };
        assert!(cost_usd("claude-opus-4", &usage) > cost_usd("claude-haiku-4", &usage));
    }
}
