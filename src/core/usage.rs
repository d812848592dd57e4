//! Running token-usage totals with a derived cost estimate.

use crate::config::pricing::{TokenRates, estimate_cost};
use crate::core::events::UsageEvent;

/// Accumulated usage counters. Cost is a fixed-rate estimate, not a bill.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_estimate: f64,
}

/// Folds inbound `usageEvent` reports into running totals.
#[derive(Debug)]
pub struct UsageMeter {
    totals: UsageTotals,
    rates: TokenRates,
}

impl UsageMeter {
    pub fn new(rates: TokenRates) -> Self {
        Self {
            totals: UsageTotals::default(),
            rates,
        }
    }

    /// Add one usage report to the totals.
    pub fn on_usage_event(&mut self, event: &UsageEvent) {
        self.totals.input_tokens += event.input_tokens;
        self.totals.output_tokens += event.output_tokens;
        self.totals.total_tokens = self.totals.input_tokens + self.totals.output_tokens;
        self.totals.cost_estimate = estimate_cost(
            &self.rates,
            self.totals.input_tokens,
            self.totals.output_tokens,
        );
    }

    /// Zero every counter. Used at exchange start and on manual meter reset.
    pub fn reset(&mut self) {
        self.totals = UsageTotals::default();
    }

    pub fn totals(&self) -> UsageTotals {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::pricing::default_rates;

    fn event(input: u64, output: u64) -> UsageEvent {
        UsageEvent {
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn totals_accumulate_and_derive_cost() {
        let mut meter = UsageMeter::new(default_rates());
        meter.on_usage_event(&event(100, 50));
        meter.on_usage_event(&event(10, 5));
        let totals = meter.totals();
        assert_eq!(totals.input_tokens, 110);
        assert_eq!(totals.output_tokens, 55);
        assert_eq!(totals.total_tokens, 165);
        let expected = 110.0 * 0.00003 + 55.0 * 0.00006;
        assert!((totals.cost_estimate - expected).abs() < 1e-12);
    }

    #[test]
    fn accumulation_is_order_independent() {
        let events = [event(3, 1), event(7, 2), event(11, 9)];

        let mut forward = UsageMeter::new(default_rates());
        for e in &events {
            forward.on_usage_event(e);
        }
        let mut reverse = UsageMeter::new(default_rates());
        for e in events.iter().rev() {
            reverse.on_usage_event(e);
        }
        assert_eq!(forward.totals(), reverse.totals());
    }

    #[test]
    fn reset_zeroes_all_counters() {
        let mut meter = UsageMeter::new(default_rates());
        meter.on_usage_event(&event(42, 42));
        meter.reset();
        assert_eq!(meter.totals(), UsageTotals::default());
    }
}
