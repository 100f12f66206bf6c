//! Pricing and totals calculation
//!
//! Pure functions of a deal snapshot. The UI-facing read path and the
//! document snapshot writer both call [`calculate_totals`], so the two can
//! never disagree about a figure. Optional-field fallbacks live in the
//! `effective_*` resolvers and nowhere else.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{AddOn, Deal, Delivery, PaymentType, VatTreatment, Warranty};
use crate::money::{default_vat_rate, round_money};

/// Computed totals for a deal at a point in time
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DealTotals {
    pub add_ons_net_total: Decimal,
    pub add_ons_vat_total: Decimal,
    pub subtotal: Decimal,
    pub total_vat: Decimal,
    pub delivery_amount: Decimal,
    pub warranty_amount: Decimal,
    pub grand_total: Decimal,
    pub deposit_paid: Decimal,
    pub other_payments: Decimal,
    pub total_paid: Decimal,
    pub px_net_value: Decimal,
    pub balance_due: Decimal,
}

/// Effective VAT rate for an add-on line: explicit rate, else the 20%
/// standard rate. Exempt lines bear no VAT regardless of rate.
pub fn effective_add_on_vat_rate(add_on: &AddOn) -> Decimal {
    match add_on.vat_treatment {
        VatTreatment::Standard => add_on.vat_rate.unwrap_or_else(default_vat_rate),
        VatTreatment::Exempt => Decimal::ZERO,
    }
}

/// Effective delivery charge: zero when the customer collects or delivery
/// is free. Legacy `amount` fields are already normalized onto
/// `amount_gross` at the storage boundary.
pub fn effective_delivery_amount(delivery: &Option<Delivery>) -> Decimal {
    match delivery {
        Some(d) if !d.is_free => d.amount_gross,
        _ => Decimal::ZERO,
    }
}

/// Effective warranty charge: the gross price when a paid warranty is
/// included, zero otherwise.
pub fn effective_warranty_amount(warranty: &Option<Warranty>) -> Decimal {
    match warranty {
        Some(w) if w.included && w.price_gross > Decimal::ZERO => w.price_gross,
        _ => Decimal::ZERO,
    }
}

/// Compute subtotal, VAT, grand total, paid-to-date and balance due for a
/// deal snapshot. No side effects.
pub fn calculate_totals(deal: &Deal) -> DealTotals {
    let add_ons_net_total: Decimal = deal
        .add_ons
        .iter()
        .map(|a| a.unit_price_net * Decimal::from(a.qty))
        .sum();
    let add_ons_net_total = round_money(add_ons_net_total);

    let add_ons_vat_total: Decimal = deal
        .add_ons
        .iter()
        .map(|a| a.unit_price_net * Decimal::from(a.qty) * effective_add_on_vat_rate(a))
        .sum();
    let add_ons_vat_total = round_money(add_ons_vat_total);

    let delivery_amount = effective_delivery_amount(&deal.delivery);
    let warranty_amount = effective_warranty_amount(&deal.warranty);

    let vat_qualifying = deal
        .vat_scheme
        .map(|s| s.is_vat_qualifying())
        .unwrap_or(false);

    let (subtotal, total_vat) = if vat_qualifying {
        // Net and VAT are itemized: vehicle net + add-on nets, VAT on top
        let subtotal = deal.vehicle_price_net.unwrap_or(deal.vehicle_price_gross)
            + add_ons_net_total;
        let total_vat = deal.vehicle_vat_amount.unwrap_or(Decimal::ZERO) + add_ons_vat_total;
        (round_money(subtotal), round_money(total_vat))
    } else {
        // Margin and other schemes: VAT is embedded, never itemized
        let subtotal = deal.vehicle_price_gross + add_ons_net_total + add_ons_vat_total;
        (round_money(subtotal), Decimal::ZERO)
    };

    let grand_total = round_money(subtotal + total_vat + delivery_amount + warranty_amount);

    let deposit_paid: Decimal = deal
        .payments
        .iter()
        .filter(|p| !p.is_refunded && p.payment_type == PaymentType::Deposit)
        .map(|p| p.amount)
        .sum();
    let deposit_paid = round_money(deposit_paid);

    let total_paid = round_money(deal.total_paid());
    let other_payments = round_money(total_paid - deposit_paid);

    let px_net_value: Decimal = deal.part_exchanges.iter().map(|px| px.net_value()).sum();
    let px_net_value = round_money(px_net_value);

    let balance_due = round_money(grand_total - total_paid - px_net_value);

    DealTotals {
        add_ons_net_total,
        add_ons_vat_total,
        subtotal,
        total_vat,
        delivery_amount,
        warranty_amount,
        grand_total,
        deposit_paid,
        other_payments,
        total_paid,
        px_net_value,
        balance_due,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{
        DealStatus, PartExchange, Payment, PaymentMethod, SaleType, VatScheme, WarrantyType,
    };
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn base_deal() -> Deal {
        Deal {
            id: Uuid::new_v4(),
            dealer_id: Uuid::new_v4(),
            deal_number: "D-00001".to_string(),
            status: DealStatus::Draft,
            sale_type: Some(SaleType::Retail),
            buyer_use: None,
            sale_channel: None,
            vat_scheme: Some(VatScheme::Margin),
            vehicle_id: Uuid::new_v4(),
            customer_id: Some(Uuid::new_v4()),
            invoice_recipient_id: None,
            vehicle_price_gross: dec("12000"),
            vehicle_price_net: None,
            vehicle_vat_amount: None,
            payment_method: None,
            finance_company_id: None,
            add_ons: vec![],
            part_exchanges: vec![],
            payments: vec![],
            delivery: None,
            warranty: None,
            deposit_taken_at: None,
            invoiced_at: None,
            delivered_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payment(payment_type: PaymentType, amount: &str) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            payment_type,
            amount: dec(amount),
            method: PaymentMethod::BankTransfer,
            paid_at: Utc::now(),
            reference: None,
            notes: None,
            is_refunded: false,
            idempotency_key: None,
        }
    }

    #[test]
    fn test_margin_scheme_worked_example() {
        // £12,000 margin vehicle, one £300 add-on with standard VAT
        let mut deal = base_deal();
        deal.add_ons.push(AddOn {
            name: "Paint protection".to_string(),
            qty: 1,
            unit_price_net: dec("300"),
            vat_treatment: VatTreatment::Standard,
            vat_rate: None,
        });

        let totals = calculate_totals(&deal);
        assert_eq!(totals.add_ons_net_total, dec("300.00"));
        assert_eq!(totals.add_ons_vat_total, dec("60.00"));
        assert_eq!(totals.total_vat, Decimal::ZERO);
        assert_eq!(totals.grand_total, dec("12360.00"));

        deal.payments.push(payment(PaymentType::Deposit, "500"));
        deal.payments.push(payment(PaymentType::Balance, "11860"));
        let totals = calculate_totals(&deal);
        assert_eq!(totals.balance_due, dec("0.00"));
        assert_eq!(totals.deposit_paid, dec("500.00"));
        assert_eq!(totals.other_payments, dec("11860.00"));
    }

    #[test]
    fn test_vat_qualifying_worked_example() {
        // Net £10,000 + £2,000 VAT, one trade-in netting £1,800
        let mut deal = base_deal();
        deal.vat_scheme = Some(VatScheme::VatQualifying);
        deal.vehicle_price_gross = dec("12000");
        deal.vehicle_price_net = Some(dec("10000"));
        deal.vehicle_vat_amount = Some(dec("2000"));
        deal.part_exchanges.push(PartExchange {
            vrm: "AB12CDE".to_string(),
            make: None,
            model: None,
            year: None,
            mileage: None,
            allowance: dec("3000"),
            settlement: dec("1200"),
            vat_qualifying: false,
            has_finance: true,
            finance_company_id: None,
            has_settlement_in_writing: false,
            converted_vehicle_id: None,
        });

        let totals = calculate_totals(&deal);
        assert_eq!(totals.subtotal, dec("10000.00"));
        assert_eq!(totals.total_vat, dec("2000.00"));
        assert_eq!(totals.grand_total, dec("12000.00"));
        assert_eq!(totals.px_net_value, dec("1800.00"));
        assert_eq!(totals.balance_due, dec("10200.00"));
    }

    #[test]
    fn test_refunded_payments_excluded() {
        let mut deal = base_deal();
        let mut refunded = payment(PaymentType::Deposit, "500");
        refunded.is_refunded = true;
        deal.payments.push(refunded);
        deal.payments.push(payment(PaymentType::Balance, "1000"));

        let totals = calculate_totals(&deal);
        assert_eq!(totals.total_paid, dec("1000.00"));
        assert_eq!(totals.deposit_paid, dec("0.00"));
        assert_eq!(totals.other_payments, dec("1000.00"));
    }

    #[test]
    fn test_free_delivery_and_missing_delivery() {
        let mut deal = base_deal();
        assert_eq!(effective_delivery_amount(&deal.delivery), Decimal::ZERO);

        deal.delivery = Some(Delivery {
            is_free: true,
            amount_gross: dec("150"),
            amount_net: None,
            vat_amount: None,
        });
        assert_eq!(effective_delivery_amount(&deal.delivery), Decimal::ZERO);

        deal.delivery = Some(Delivery {
            is_free: false,
            amount_gross: dec("150"),
            amount_net: None,
            vat_amount: None,
        });
        let totals = calculate_totals(&deal);
        assert_eq!(totals.delivery_amount, dec("150"));
        assert_eq!(totals.grand_total, dec("12150.00"));
    }

    #[test]
    fn test_warranty_only_charged_when_included_and_priced() {
        let mut deal = base_deal();
        deal.warranty = Some(Warranty {
            included: true,
            warranty_type: WarrantyType::Default,
            name: "3 month dealer warranty".to_string(),
            duration_months: 3,
            claim_limit: None,
            price_gross: Decimal::ZERO,
            is_default: true,
        });
        assert_eq!(effective_warranty_amount(&deal.warranty), Decimal::ZERO);

        deal.warranty = Some(Warranty {
            included: true,
            warranty_type: WarrantyType::ThirdParty,
            name: "12 month extended".to_string(),
            duration_months: 12,
            claim_limit: Some(dec("2000")),
            price_gross: dec("399"),
            is_default: false,
        });
        let totals = calculate_totals(&deal);
        assert_eq!(totals.warranty_amount, dec("399"));
    }

    #[test]
    fn test_exempt_add_on_bears_no_vat() {
        let mut deal = base_deal();
        deal.add_ons.push(AddOn {
            name: "Road fund licence".to_string(),
            qty: 1,
            unit_price_net: dec("180"),
            vat_treatment: VatTreatment::Exempt,
            vat_rate: Some(dec("0.20")),
        });
        let totals = calculate_totals(&deal);
        assert_eq!(totals.add_ons_vat_total, dec("0.00"));
        assert_eq!(totals.grand_total, dec("12180.00"));
    }

    #[test]
    fn test_balance_identity() {
        let mut deal = base_deal();
        deal.payments.push(payment(PaymentType::Deposit, "500"));
        let totals = calculate_totals(&deal);
        assert_eq!(
            totals.balance_due,
            totals.grand_total - totals.total_paid - totals.px_net_value
        );
    }
}
