use rfa_core::seed::{self, SUPPLIER_REBATE_TIERS};
use rfa_core::tier::{evaluate, TierTable};
use rfa_core::types::round2;

#[test]
fn just_below_first_threshold_pays_nothing() {
    let t = seed::table(SUPPLIER_REBATE_TIERS).unwrap();
    let r = evaluate(19_999.0, &t);
    assert!(!r.triggered);
    assert_eq!(r.rate, 0.0);
    assert_eq!(r.value, 0.0);
    assert_eq!(r.selected_min, None);
    // The first threshold is still reported for display.
    assert_eq!(r.min_threshold, Some(20_000.0));
}

#[test]
fn exact_threshold_prices_whole_volume_at_step_rate() {
    let t = seed::table(SUPPLIER_REBATE_TIERS).unwrap();
    let r = evaluate(20_000.0, &t);
    assert!(r.triggered);
    assert_eq!(r.selected_min, Some(20_000.0));
    assert_eq!(r.rate, 0.01);
    assert_eq!(r.value, 200.0);
}

#[test]
fn highest_met_step_applies_to_the_whole_volume() {
    let t = seed::table(SUPPLIER_REBATE_TIERS).unwrap();
    let r = evaluate(60_000.0, &t);
    assert_eq!(r.selected_min, Some(50_000.0));
    assert_eq!(r.rate, 0.015);
    // Not marginal: the 1.5% applies to all 60 000, not the slice above 50 000.
    assert_eq!(r.value, 900.0);
}

#[test]
fn empty_table_never_triggers() {
    let r = evaluate(1_000_000.0, &TierTable::default());
    assert!(!r.triggered);
    assert_eq!(r.value, 0.0);
    assert_eq!(r.min_threshold, None);
}

#[test]
fn zero_threshold_step_triggers_at_any_positive_volume() {
    // Unconditional remuneration lines use a single (0, rate) step.
    let t = seed::table(&[(0.0, 0.02)]).unwrap();
    let r = evaluate(123.0, &t);
    assert!(r.triggered);
    assert_eq!(r.value, round2(123.0 * 0.02));
}

#[test]
fn value_is_volume_times_rate_rounded_to_cents() {
    let t = seed::table(SUPPLIER_REBATE_TIERS).unwrap();
    for volume in [20_000.33, 57_777.77, 149_999.99] {
        let r = evaluate(volume, &t);
        assert_eq!(r.value, round2(volume * r.rate));
    }
}

#[test]
fn payout_is_monotone_in_volume_on_the_default_schedule() {
    let t = seed::table(SUPPLIER_REBATE_TIERS).unwrap();
    let mut last = 0.0;
    let mut volume = 0.0;
    while volume <= 250_000.0 {
        let r = evaluate(volume, &t);
        assert!(
            r.value >= last,
            "payout dropped at volume {volume}: {last} -> {}",
            r.value
        );
        last = r.value;
        volume += 2_500.0;
    }
}
