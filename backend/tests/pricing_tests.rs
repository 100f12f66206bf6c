//! Tests for deal pricing and totals calculation
//!
//! Covers the margin and VAT-qualifying branches, the effective-value
//! resolvers, and the balance identity that reconciliation relies on.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::models::{
    AddOn, Deal, DealStatus, Delivery, PartExchange, Payment, PaymentMethod, PaymentType,
    SaleType, VatScheme, VatTreatment, Warranty, WarrantyType,
};
use shared::pricing::{
    calculate_totals, effective_add_on_vat_rate, effective_delivery_amount,
    effective_warranty_amount,
};
use uuid::Uuid;

/// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn base_deal(vat_scheme: VatScheme, price_gross: &str) -> Deal {
    Deal {
        id: Uuid::new_v4(),
        dealer_id: Uuid::new_v4(),
        deal_number: "D-00042".to_string(),
        status: DealStatus::Draft,
        sale_type: Some(SaleType::Retail),
        buyer_use: None,
        sale_channel: None,
        vat_scheme: Some(vat_scheme),
        vehicle_id: Uuid::new_v4(),
        customer_id: Some(Uuid::new_v4()),
        invoice_recipient_id: None,
        vehicle_price_gross: dec(price_gross),
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

fn part_exchange(allowance: &str, settlement: &str) -> PartExchange {
    PartExchange {
        vrm: "AB12CDE".to_string(),
        make: Some("Ford".to_string()),
        model: Some("Focus".to_string()),
        year: Some(2018),
        mileage: Some(45000),
        allowance: dec(allowance),
        settlement: dec(settlement),
        vat_qualifying: false,
        has_finance: false,
        finance_company_id: None,
        has_settlement_in_writing: false,
        converted_vehicle_id: None,
    }
}

mod margin_scheme {
    use super::*;

    #[test]
    fn worked_example_with_add_on() {
        // £12,000 margin car plus a £300 net add-on at standard rate:
        // the add-on VAT folds into the subtotal, no itemized VAT line
        let mut deal = base_deal(VatScheme::Margin, "12000");
        deal.add_ons.push(AddOn {
            name: "Paint protection".to_string(),
            qty: 1,
            unit_price_net: dec("300"),
            vat_treatment: VatTreatment::Standard,
            vat_rate: None,
        });

        let totals = calculate_totals(&deal);
        assert_eq!(totals.subtotal, dec("12360.00"));
        assert_eq!(totals.total_vat, dec("0"));
        assert_eq!(totals.grand_total, dec("12360.00"));
    }

    #[test]
    fn deposit_and_balance_settle_to_zero() {
        let mut deal = base_deal(VatScheme::Margin, "12000");
        deal.add_ons.push(AddOn {
            name: "Paint protection".to_string(),
            qty: 1,
            unit_price_net: dec("300"),
            vat_treatment: VatTreatment::Standard,
            vat_rate: None,
        });
        deal.payments.push(payment(PaymentType::Deposit, "500"));
        deal.payments.push(payment(PaymentType::Balance, "11860"));

        let totals = calculate_totals(&deal);
        assert_eq!(totals.deposit_paid, dec("500.00"));
        assert_eq!(totals.other_payments, dec("11860.00"));
        assert_eq!(totals.total_paid, dec("12360.00"));
        assert_eq!(totals.balance_due, dec("0.00"));
    }

    #[test]
    fn multi_quantity_add_on() {
        let mut deal = base_deal(VatScheme::Margin, "8000");
        deal.add_ons.push(AddOn {
            name: "Mats".to_string(),
            qty: 4,
            unit_price_net: dec("12.50"),
            vat_treatment: VatTreatment::Standard,
            vat_rate: None,
        });

        let totals = calculate_totals(&deal);
        assert_eq!(totals.add_ons_net_total, dec("50.00"));
        assert_eq!(totals.add_ons_vat_total, dec("10.00"));
        assert_eq!(totals.grand_total, dec("8060.00"));
    }
}

mod vat_qualifying_scheme {
    use super::*;

    #[test]
    fn worked_example_with_part_exchange() {
        // Net £10,000 + £2,000 VAT; trade-in £3,000 less £1,200 settlement
        let mut deal = base_deal(VatScheme::VatQualifying, "12000");
        deal.vehicle_price_net = Some(dec("10000"));
        deal.vehicle_vat_amount = Some(dec("2000"));
        deal.part_exchanges.push(part_exchange("3000", "1200"));

        let totals = calculate_totals(&deal);
        assert_eq!(totals.subtotal, dec("10000.00"));
        assert_eq!(totals.total_vat, dec("2000.00"));
        assert_eq!(totals.grand_total, dec("12000.00"));
        assert_eq!(totals.px_net_value, dec("1800.00"));
        assert_eq!(totals.balance_due, dec("10200.00"));
    }

    #[test]
    fn missing_net_falls_back_to_gross() {
        // A VAT-qualifying deal whose breakdown was never derived still
        // produces a stable grand total
        let deal = base_deal(VatScheme::VatQualifying, "12000");
        let totals = calculate_totals(&deal);
        assert_eq!(totals.subtotal, dec("12000.00"));
        assert_eq!(totals.total_vat, dec("0.00"));
        assert_eq!(totals.grand_total, dec("12000.00"));
    }

    #[test]
    fn add_on_vat_is_itemized() {
        let mut deal = base_deal(VatScheme::VatQualifying, "12000");
        deal.vehicle_price_net = Some(dec("10000"));
        deal.vehicle_vat_amount = Some(dec("2000"));
        deal.add_ons.push(AddOn {
            name: "Alloy upgrade".to_string(),
            qty: 1,
            unit_price_net: dec("500"),
            vat_treatment: VatTreatment::Standard,
            vat_rate: None,
        });

        let totals = calculate_totals(&deal);
        assert_eq!(totals.subtotal, dec("10500.00"));
        assert_eq!(totals.total_vat, dec("2100.00"));
        assert_eq!(totals.grand_total, dec("12600.00"));
    }
}

mod effective_values {
    use super::*;

    #[test]
    fn add_on_rate_falls_back_to_standard() {
        let standard = AddOn {
            name: "Mats".to_string(),
            qty: 1,
            unit_price_net: dec("50"),
            vat_treatment: VatTreatment::Standard,
            vat_rate: None,
        };
        assert_eq!(effective_add_on_vat_rate(&standard), dec("0.20"));

        let explicit = AddOn {
            vat_rate: Some(dec("0.05")),
            ..standard.clone()
        };
        assert_eq!(effective_add_on_vat_rate(&explicit), dec("0.05"));

        let exempt = AddOn {
            vat_treatment: VatTreatment::Exempt,
            vat_rate: Some(dec("0.20")),
            ..standard
        };
        assert_eq!(effective_add_on_vat_rate(&exempt), Decimal::ZERO);
    }

    #[test]
    fn free_delivery_charges_nothing() {
        let free = Some(Delivery {
            is_free: true,
            amount_gross: dec("150"),
            amount_net: None,
            vat_amount: None,
        });
        assert_eq!(effective_delivery_amount(&free), Decimal::ZERO);
        assert_eq!(effective_delivery_amount(&None), Decimal::ZERO);
    }

    #[test]
    fn default_warranty_is_free() {
        let default_warranty = Some(Warranty {
            included: true,
            warranty_type: WarrantyType::Default,
            name: "3 month dealer warranty".to_string(),
            duration_months: 3,
            claim_limit: None,
            price_gross: Decimal::ZERO,
            is_default: true,
        });
        assert_eq!(effective_warranty_amount(&default_warranty), Decimal::ZERO);

        let excluded = Some(Warranty {
            included: false,
            warranty_type: WarrantyType::ThirdParty,
            name: "12 month extended".to_string(),
            duration_months: 12,
            claim_limit: Some(dec("2000")),
            price_gross: dec("399"),
            is_default: false,
        });
        assert_eq!(effective_warranty_amount(&excluded), Decimal::ZERO);
    }
}

mod payment_ledger {
    use super::*;

    #[test]
    fn refunded_payments_do_not_count() {
        let mut deal = base_deal(VatScheme::Margin, "9000");
        let mut refunded = payment(PaymentType::Deposit, "500");
        refunded.is_refunded = true;
        deal.payments.push(refunded);
        deal.payments.push(payment(PaymentType::Deposit, "250"));

        let totals = calculate_totals(&deal);
        assert_eq!(totals.total_paid, dec("250.00"));
        assert_eq!(totals.deposit_paid, dec("250.00"));
        assert_eq!(totals.balance_due, dec("8750.00"));
    }

    #[test]
    fn finance_advance_counts_as_other_payment() {
        let mut deal = base_deal(VatScheme::Margin, "15000");
        deal.payments.push(payment(PaymentType::Deposit, "1000"));
        deal.payments
            .push(payment(PaymentType::FinanceAdvance, "14000"));

        let totals = calculate_totals(&deal);
        assert_eq!(totals.deposit_paid, dec("1000.00"));
        assert_eq!(totals.other_payments, dec("14000.00"));
        assert_eq!(totals.balance_due, dec("0.00"));
    }

    #[test]
    fn overpayment_goes_negative() {
        let mut deal = base_deal(VatScheme::Margin, "5000");
        deal.payments.push(payment(PaymentType::Balance, "5100"));

        let totals = calculate_totals(&deal);
        assert_eq!(totals.balance_due, dec("-100.00"));
    }
}

proptest! {
    /// balance_due always equals grand_total - total_paid - px_net_value
    #[test]
    fn prop_balance_identity(
        price in 0i64..10_000_000,
        deposit in 0i64..1_000_000,
        balance in 0i64..10_000_000,
        allowance in 0i64..2_000_000,
        settlement in 0i64..2_000_000,
    ) {
        let mut deal = base_deal(VatScheme::Margin, "0");
        deal.vehicle_price_gross = Decimal::new(price, 2);
        deal.payments.push(payment(PaymentType::Deposit, "0"));
        deal.payments[0].amount = Decimal::new(deposit, 2);
        deal.payments.push(payment(PaymentType::Balance, "0"));
        deal.payments[1].amount = Decimal::new(balance, 2);
        deal.part_exchanges.push(part_exchange("0", "0"));
        deal.part_exchanges[0].allowance = Decimal::new(allowance, 2);
        deal.part_exchanges[0].settlement = Decimal::new(settlement, 2);

        let totals = calculate_totals(&deal);
        prop_assert_eq!(
            totals.balance_due,
            totals.grand_total - totals.total_paid - totals.px_net_value
        );
    }

    /// Deposit and other payments always partition total_paid
    #[test]
    fn prop_payments_partition(
        deposit in 0i64..1_000_000,
        balance in 0i64..1_000_000,
        advance in 0i64..1_000_000,
    ) {
        let mut deal = base_deal(VatScheme::Margin, "20000");
        deal.payments.push(payment(PaymentType::Deposit, "0"));
        deal.payments[0].amount = Decimal::new(deposit, 2);
        deal.payments.push(payment(PaymentType::Balance, "0"));
        deal.payments[1].amount = Decimal::new(balance, 2);
        deal.payments.push(payment(PaymentType::FinanceAdvance, "0"));
        deal.payments[2].amount = Decimal::new(advance, 2);

        let totals = calculate_totals(&deal);
        prop_assert_eq!(totals.deposit_paid + totals.other_payments, totals.total_paid);
    }

    /// Margin scheme never itemizes VAT
    #[test]
    fn prop_margin_vat_always_zero(price in 0i64..100_000_000, net in 0i64..1_000_000) {
        let mut deal = base_deal(VatScheme::Margin, "0");
        deal.vehicle_price_gross = Decimal::new(price, 2);
        deal.add_ons.push(AddOn {
            name: "Extra".to_string(),
            qty: 1,
            unit_price_net: Decimal::new(net, 2),
            vat_treatment: VatTreatment::Standard,
            vat_rate: None,
        });

        let totals = calculate_totals(&deal);
        prop_assert_eq!(totals.total_vat, Decimal::ZERO);
    }

    /// Every figure comes out rounded to two decimal places
    #[test]
    fn prop_totals_two_decimal_places(price in 0i64..100_000_000, net in 0i64..1_000_000) {
        let mut deal = base_deal(VatScheme::Margin, "0");
        deal.vehicle_price_gross = Decimal::new(price, 2);
        deal.add_ons.push(AddOn {
            name: "Extra".to_string(),
            qty: 3,
            unit_price_net: Decimal::new(net, 4),
            vat_treatment: VatTreatment::Standard,
            vat_rate: Some(Decimal::new(175, 3)),
        });

        let totals = calculate_totals(&deal);
        prop_assert!(totals.subtotal.scale() <= 2);
        prop_assert!(totals.grand_total.scale() <= 2);
        prop_assert!(totals.balance_due.scale() <= 2);
    }
}
