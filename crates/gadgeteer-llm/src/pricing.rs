//! Cost computation from token usage and per-model pricing

use crate::provider::Pricing;
use gadgeteer_core::Usage;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// USD cost of one call. Cached input tokens are billed at the cached rate
/// when one is listed, and cache writes at the cache-write rate; both fall
/// back to the plain input rate.
pub fn compute_cost(usage: &Usage, pricing: &Pricing) -> f64 {
    let cached = usage.cached_input_tokens.unwrap_or(0);
    let cache_write = usage.cache_creation_input_tokens.unwrap_or(0);
    let fresh = usage.input_tokens.saturating_sub(cached + cache_write);

    let input_cost = fresh as f64 * pricing.input
        + cached as f64 * pricing.cached_input.unwrap_or(pricing.input)
        + cache_write as f64 * pricing.cache_write_input.unwrap_or(pricing.input);
    let output_cost = usage.output_tokens as f64 * pricing.output;

    (input_cost + output_cost) / TOKENS_PER_UNIT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
            ..Default::default()
        }
    }

    #[test]
    fn plain_input_output() {
        let pricing = Pricing {
            input: 3.0,
            output: 15.0,
            ..Default::default()
        };
        let cost = compute_cost(&usage(1_000_000, 100_000), &pricing);
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn cached_tokens_use_cached_rate() {
        let pricing = Pricing {
            input: 3.0,
            output: 15.0,
            cached_input: Some(0.3),
            ..Default::default()
        };
        let mut u = usage(1_000_000, 0);
        u.cached_input_tokens = Some(500_000);
        let cost = compute_cost(&u, &pricing);
        // 500k fresh at 3.0 + 500k cached at 0.3
        assert!((cost - 1.65).abs() < 1e-9);
    }

    #[test]
    fn zero_usage_is_free() {
        let pricing = Pricing {
            input: 3.0,
            output: 15.0,
            ..Default::default()
        };
        assert_eq!(compute_cost(&Usage::default(), &pricing), 0.0);
    }
}
