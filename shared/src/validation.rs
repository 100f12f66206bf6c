//! Validation utilities for the Forecourt platform
//!
//! Includes UK-specific validations for registration marks and VAT numbers.

use rust_decimal::Decimal;

// ============================================================================
// Vehicle Registration Marks
// ============================================================================

/// Normalize a VRM for comparison: uppercase with all spaces stripped.
/// Duplicate detection across part-exchanges and stock uses this form.
pub fn normalize_vrm(vrm: &str) -> String {
    vrm.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Validate a VRM is plausible (2-8 alphanumeric characters once
/// normalized). Full DVLA format decoding is out of scope.
pub fn validate_vrm(vrm: &str) -> Result<(), &'static str> {
    let normalized = normalize_vrm(vrm);
    if normalized.len() < 2 || normalized.len() > 8 {
        return Err("VRM must be 2-8 characters");
    }
    if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("VRM must be alphanumeric");
    }
    Ok(())
}

// ============================================================================
// Money Validations
// ============================================================================

/// Validate a money amount is strictly positive
pub fn validate_positive_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount <= Decimal::ZERO {
        return Err("Amount must be greater than zero");
    }
    Ok(())
}

/// Validate a money amount is not negative (allowances, settlements)
pub fn validate_non_negative_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount < Decimal::ZERO {
        return Err("Amount cannot be negative");
    }
    Ok(())
}

// ============================================================================
// General Validations
// ============================================================================

/// Validate dealer code format (2-8 uppercase alphanumeric)
pub fn validate_dealer_code(code: &str) -> Result<(), &'static str> {
    if code.len() < 2 {
        return Err("Dealer code must be at least 2 characters");
    }
    if code.len() > 8 {
        return Err("Dealer code must be at most 8 characters");
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err("Dealer code must be uppercase alphanumeric only");
    }
    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters");
    }
    Ok(())
}

/// Validate a UK VAT registration number (GB prefix optional, 9 or 12
/// digits)
pub fn validate_vat_number(vat_number: &str) -> Result<(), &'static str> {
    let digits: String = vat_number
        .trim_start_matches("GB")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.len() == 9 || digits.len() == 12 {
        Ok(())
    } else {
        Err("VAT number must be 9 or 12 digits")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_normalize_vrm() {
        assert_eq!(normalize_vrm("ab12 cde"), "AB12CDE");
        assert_eq!(normalize_vrm(" AB 12 CDE "), "AB12CDE");
        assert_eq!(normalize_vrm("AB12CDE"), "AB12CDE");
    }

    #[test]
    fn test_validate_vrm() {
        assert!(validate_vrm("AB12 CDE").is_ok());
        assert!(validate_vrm("K1").is_ok());
        assert!(validate_vrm("").is_err());
        assert!(validate_vrm("TOO-LONG-VRM").is_err());
        assert!(validate_vrm("AB12*DE").is_err());
    }

    #[test]
    fn test_validate_amounts() {
        assert!(validate_positive_amount(Decimal::from_str("0.01").unwrap()).is_ok());
        assert!(validate_positive_amount(Decimal::ZERO).is_err());
        assert!(validate_non_negative_amount(Decimal::ZERO).is_ok());
        assert!(validate_non_negative_amount(Decimal::from_str("-1").unwrap()).is_err());
    }

    #[test]
    fn test_validate_dealer_code() {
        assert!(validate_dealer_code("ACM").is_ok());
        assert!(validate_dealer_code("A1").is_ok());
        assert!(validate_dealer_code("a").is_err());
        assert!(validate_dealer_code("TOOLONGCODE").is_err());
        assert!(validate_dealer_code("ab").is_err());
    }

    #[test]
    fn test_validate_vat_number() {
        assert!(validate_vat_number("GB123456789").is_ok());
        assert!(validate_vat_number("123456789").is_ok());
        assert!(validate_vat_number("GB123").is_err());
    }
}
