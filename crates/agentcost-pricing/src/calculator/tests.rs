//! Tests for the cost calculator

use super::*;
use crate::table::PricingTable;

#[test]
fn test_gpt4_cost() {
    let calc = CostCalculator::default();

    // 150 * 0.03/1K + 80 * 0.06/1K
    let cost = calc.compute("gpt-4", 150, 80);
    assert!((cost.total - 0.0093).abs() < 1e-12);
    assert!(!cost.is_estimate());
}

#[test]
fn test_compute_is_deterministic() {
    let calc = CostCalculator::default();
    let first = calc.compute("claude-3-5-sonnet", 12_345, 678);
    for _ in 0..100 {
        assert_eq!(calc.compute("claude-3-5-sonnet", 12_345, 678), first);
    }
}

#[test]
fn test_unknown_model_is_zero_estimate() {
    let calc = CostCalculator::default();
    let cost = calc.compute("unknown-model-x", 100, 100);

    assert_eq!(cost.total, 0.0);
    assert!(cost.is_estimate());
    assert!(cost.total.is_finite());
}

#[test]
fn test_unknown_model_with_default_rates() {
    let store = PricingStore::builder()
        .default_rates(ModelRates::new(0.001, 0.002))
        .build();
    let calc = CostCalculator::new(Arc::new(store));

    let cost = calc.compute("unknown-model-x", 1000, 1000);
    assert!((cost.total - 0.003).abs() < 1e-12);
    assert!(cost.is_estimate());
}

#[test]
fn test_fuzzy_model_priced() {
    let calc = CostCalculator::default();
    let cost = calc.compute("gpt-4o-mini-2024-07-18", 1_000_000, 0);

    assert!((cost.total - 0.15).abs() < 1e-9);
    assert!(!cost.is_estimate());
}

#[test]
fn test_rounding_to_eight_places() {
    let store = PricingStore::builder()
        .seed(PricingTable::new().with("tiny", ModelRates::new(0.000_000_1, 0.0)))
        .build();
    let calc = CostCalculator::new(Arc::new(store));

    // 1 token at 1e-10 rounds to zero
    assert_eq!(calc.compute("tiny", 1, 0).total, 0.0);
}

#[test]
fn test_breakdown() {
    let calc = CostCalculator::default();
    let b = calc.breakdown("gpt-4", 150, 80);

    assert!((b.input_cost - 0.0045).abs() < 1e-12);
    assert!((b.output_cost - 0.0048).abs() < 1e-12);
    assert!((b.total_cost - 0.0093).abs() < 1e-12);
    assert_eq!(b.input_price_per_1k, 0.03);
    assert_eq!(b.output_price_per_1k, 0.06);
}

#[test]
fn test_estimate_conversation() {
    let calc = CostCalculator::default();
    let total = calc.estimate_conversation("gpt-4", 150, 80, 10);
    assert!((total - 0.093).abs() < 1e-9);

    assert_eq!(calc.estimate_conversation("gpt-4", 150, 80, 0), 0.0);
}

#[test]
fn test_calculator_sees_store_updates() {
    let store = Arc::new(PricingStore::default());
    let calc = CostCalculator::new(store.clone());

    store.update(&PricingTable::new().with("gpt-4", ModelRates::new(0.06, 0.12)));

    let cost = calc.compute("gpt-4", 150, 80);
    assert!((cost.total - 0.0186).abs() < 1e-12);
}
