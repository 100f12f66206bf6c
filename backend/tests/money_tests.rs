//! Tests for money rounding and gross/net/VAT decomposition

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::money::{
    default_vat_rate, full_payment_tolerance, gross_from_net, net_from_gross, round_money,
    vat_from_gross,
};

/// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

mod rounding {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_money(dec("1.005")), dec("1.01"));
        assert_eq!(round_money(dec("1.004")), dec("1.00"));
        assert_eq!(round_money(dec("-1.005")), dec("-1.01"));
    }

    #[test]
    fn leaves_two_decimal_values_alone() {
        assert_eq!(round_money(dec("123.45")), dec("123.45"));
        assert_eq!(round_money(dec("0.00")), dec("0.00"));
    }
}

mod vat_decomposition {
    use super::*;

    #[test]
    fn twelve_thousand_gross_splits_ten_and_two() {
        let rate = default_vat_rate();
        assert_eq!(net_from_gross(dec("12000"), rate), dec("10000.00"));
        assert_eq!(vat_from_gross(dec("12000"), rate), dec("2000.00"));
    }

    #[test]
    fn awkward_gross_still_sums_back() {
        // £99.99 at 20%: net 83.33, VAT takes the remainder 16.66
        let rate = default_vat_rate();
        let gross = dec("99.99");
        let net = net_from_gross(gross, rate);
        let vat = vat_from_gross(gross, rate);
        assert_eq!(net, dec("83.33"));
        assert_eq!(net + vat, gross);
    }

    #[test]
    fn gross_from_net_round_trip() {
        let rate = default_vat_rate();
        assert_eq!(gross_from_net(dec("10000"), rate), dec("12000.00"));
    }
}

#[test]
fn tolerance_is_one_penny() {
    assert_eq!(full_payment_tolerance(), dec("0.01"));
}

proptest! {
    /// net + VAT always reassembles the gross exactly, whatever the pennies
    #[test]
    fn prop_net_plus_vat_equals_gross(pence in 0i64..1_000_000_000) {
        let gross = Decimal::new(pence, 2);
        let rate = default_vat_rate();
        let net = net_from_gross(gross, rate);
        let vat = vat_from_gross(gross, rate);
        prop_assert_eq!(net + vat, gross);
    }

    /// Rounding is idempotent
    #[test]
    fn prop_round_money_idempotent(units in -1_000_000_000i64..1_000_000_000, scale in 0u32..8) {
        let value = Decimal::new(units, scale);
        prop_assert_eq!(round_money(round_money(value)), round_money(value));
    }
}
