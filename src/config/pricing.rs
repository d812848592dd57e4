//! Token pricing for the usage meter.
//!
//! Single source of truth for per-token rates so the cost readout can be
//! updated without touching the metering code. The estimate is a convenience
//! figure for operators, not billing-accurate.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Model the backend runs when a session does not specify one.
pub const DEFAULT_MODEL: &str = "nova-sonic";

/// Per-token USD rates for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenRates {
    /// USD per input token
    pub input_per_token: f64,
    /// USD per output token
    pub output_per_token: f64,
}

impl TokenRates {
    pub const fn new(input_per_token: f64, output_per_token: f64) -> Self {
        Self {
            input_per_token,
            output_per_token,
        }
    }
}

/// Token pricing database, keyed by lowercase model id.
static TOKEN_PRICING: LazyLock<HashMap<&'static str, TokenRates>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert("nova-sonic", TokenRates::new(0.000_03, 0.000_06));
    m
});

/// Rates for a model, falling back to the default model's rates when the
/// model id is unknown.
pub fn rates_for_model(model: &str) -> TokenRates {
    let key = model.to_lowercase();
    TOKEN_PRICING
        .get(key.as_str())
        .copied()
        .unwrap_or_else(default_rates)
}

/// Rates for [`DEFAULT_MODEL`].
pub fn default_rates() -> TokenRates {
    TOKEN_PRICING[DEFAULT_MODEL]
}

/// Estimated cost in USD for the given token counts.
pub fn estimate_cost(rates: &TokenRates, input_tokens: u64, output_tokens: u64) -> f64 {
    input_tokens as f64 * rates.input_per_token + output_tokens as f64 * rates.output_per_token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_rates() {
        let rates = default_rates();
        assert_eq!(rates.input_per_token, 0.000_03);
        assert_eq!(rates.output_per_token, 0.000_06);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(rates_for_model("no-such-model"), default_rates());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(rates_for_model("Nova-Sonic"), default_rates());
    }

    #[test]
    fn cost_estimate_scales_linearly() {
        let rates = default_rates();
        assert_eq!(estimate_cost(&rates, 0, 0), 0.0);
        let cost = estimate_cost(&rates, 1000, 500);
        assert!((cost - (1000.0 * 0.000_03 + 500.0 * 0.000_06)).abs() < 1e-12);
    }
}
