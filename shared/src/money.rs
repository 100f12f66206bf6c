//! Money and VAT arithmetic for deal pricing
//!
//! All money fields are rounded to 2 decimal places at the point of
//! derivation. Accumulating unrounded fractions across steps intended for
//! display or storage is not allowed anywhere in the platform.

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounding tolerance when deciding whether an invoice is settled in full.
/// A fixed absolute allowance for 2 dp currency, not a relative threshold.
pub const FULL_PAYMENT_TOLERANCE_PENCE: i64 = 1;

/// UK standard VAT rate (20%), used when an add-on or delivery line does
/// not carry an explicit rate.
pub fn default_vat_rate() -> Decimal {
    Decimal::new(20, 2)
}

/// The full-payment tolerance as a money value (0.01).
pub fn full_payment_tolerance() -> Decimal {
    Decimal::new(FULL_PAYMENT_TOLERANCE_PENCE, 2)
}

/// Round a money amount to 2 decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Derive the net amount from a manually entered gross price.
///
/// net = gross / (1 + rate) for VAT-bearing prices; callers pass the
/// effective rate, zero-rated prices should not go through this function.
pub fn net_from_gross(gross: Decimal, vat_rate: Decimal) -> Decimal {
    round_money(gross / (Decimal::ONE + vat_rate))
}

/// VAT portion of a gross price, derived as gross minus rounded net so
/// that net + vat always reassembles the gross exactly.
pub fn vat_from_gross(gross: Decimal, vat_rate: Decimal) -> Decimal {
    round_money(gross - net_from_gross(gross, vat_rate))
}

/// Gross price from a net amount and VAT rate.
pub fn gross_from_net(net: Decimal, vat_rate: Decimal) -> Decimal {
    round_money(net * (Decimal::ONE + vat_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(dec("10.005")), dec("10.01"));
        assert_eq!(round_money(dec("10.004")), dec("10.00"));
        assert_eq!(round_money(dec("-10.005")), dec("-10.01"));
    }

    #[test]
    fn test_net_from_gross_standard_rate() {
        // £12,000 gross at 20% -> £10,000 net, £2,000 VAT
        assert_eq!(net_from_gross(dec("12000"), dec("0.20")), dec("10000.00"));
        assert_eq!(vat_from_gross(dec("12000"), dec("0.20")), dec("2000.00"));
    }

    #[test]
    fn test_net_plus_vat_reassembles_gross() {
        let gross = dec("299.99");
        let rate = dec("0.20");
        let net = net_from_gross(gross, rate);
        let vat = vat_from_gross(gross, rate);
        assert_eq!(net + vat, gross);
    }

    #[test]
    fn test_gross_from_net() {
        assert_eq!(gross_from_net(dec("300"), dec("0.20")), dec("360.00"));
    }

    #[test]
    fn test_full_payment_tolerance() {
        assert_eq!(full_payment_tolerance(), dec("0.01"));
    }
}
