//! Part-exchange valuation on a deal
//!
//! A deal takes at most two trade-in vehicles. Each is valued as an
//! allowance against the balance payable, less any outstanding finance
//! settlement, and must not collide with a vehicle already in stock or
//! another trade-in on the same deal.

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::deal::{fetch_deal, persist_deal};
use crate::services::stock::StockService;
use shared::models::{Deal, DealStatus, PartExchange};
use shared::validation::{normalize_vrm, validate_non_negative_amount, validate_vrm};

const MAX_PART_EXCHANGES: usize = 2;

#[derive(Clone)]
pub struct PartExchangeService {
    db: PgPool,
}

#[derive(Debug, Deserialize)]
pub struct PartExchangeInput {
    pub vrm: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub mileage: Option<i32>,
    pub allowance: Decimal,
    #[serde(default)]
    pub settlement: Decimal,
    #[serde(default)]
    pub vat_qualifying: bool,
    #[serde(default)]
    pub has_finance: bool,
    pub finance_company_id: Option<Uuid>,
    #[serde(default)]
    pub has_settlement_in_writing: bool,
}

impl PartExchangeInput {
    fn validate(&self) -> AppResult<String> {
        let vrm = normalize_vrm(&self.vrm);
        validate_vrm(&vrm).map_err(|msg| AppError::Validation {
            field: "vrm".to_string(),
            message: msg.to_string(),
        })?;
        validate_non_negative_amount(self.allowance).map_err(|msg| AppError::Validation {
            field: "allowance".to_string(),
            message: msg.to_string(),
        })?;
        validate_non_negative_amount(self.settlement).map_err(|msg| AppError::Validation {
            field: "settlement".to_string(),
            message: msg.to_string(),
        })?;
        if self.has_finance && self.finance_company_id.is_none() {
            return Err(AppError::Validation {
                field: "finance_company_id".to_string(),
                message: "A financed trade-in needs its finance company".to_string(),
            });
        }
        Ok(vrm)
    }

    fn into_part_exchange(self, vrm: String) -> PartExchange {
        PartExchange {
            vrm,
            make: self.make,
            model: self.model,
            year: self.year,
            mileage: self.mileage,
            allowance: self.allowance,
            settlement: self.settlement,
            vat_qualifying: self.vat_qualifying,
            has_finance: self.has_finance,
            finance_company_id: self.finance_company_id,
            has_settlement_in_writing: self.has_settlement_in_writing,
            converted_vehicle_id: None,
        }
    }
}

impl PartExchangeService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Add a trade-in to the deal.
    pub async fn add(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        input: PartExchangeInput,
    ) -> AppResult<Deal> {
        let vrm = input.validate()?;

        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;
        require_editable(&deal)?;

        if deal.part_exchanges.len() >= MAX_PART_EXCHANGES {
            return Err(AppError::Validation {
                field: "part_exchanges".to_string(),
                message: format!("A deal takes at most {} part-exchanges", MAX_PART_EXCHANGES),
            });
        }
        if deal.part_exchanges.iter().any(|px| px.vrm == vrm) {
            return Err(AppError::DuplicateEntry(format!(
                "{} is already a part-exchange on this deal",
                vrm
            )));
        }
        if let Some(existing) = StockService::find_unsold_by_vrm(&mut tx, dealer_id, &vrm).await? {
            return Err(AppError::DuplicateEntry(format!(
                "{} is already in stock ({})",
                vrm,
                existing.status.as_str()
            )));
        }

        deal.part_exchanges.push(input.into_part_exchange(vrm));
        persist_deal(&mut tx, &deal).await?;
        tx.commit().await?;
        deal.version += 1;

        Ok(deal)
    }

    /// Replace a trade-in's details, addressed by its position in the
    /// deal's part-exchange array.
    pub async fn update(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        index: usize,
        input: PartExchangeInput,
    ) -> AppResult<Deal> {
        let new_vrm = input.validate()?;

        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;
        require_editable(&deal)?;

        if index >= deal.part_exchanges.len() {
            return Err(AppError::NotFound("Part-exchange".to_string()));
        }

        if new_vrm != deal.part_exchanges[index].vrm {
            if deal.part_exchanges.iter().any(|px| px.vrm == new_vrm) {
                return Err(AppError::DuplicateEntry(format!(
                    "{} is already a part-exchange on this deal",
                    new_vrm
                )));
            }
            if let Some(existing) =
                StockService::find_unsold_by_vrm(&mut tx, dealer_id, &new_vrm).await?
            {
                return Err(AppError::DuplicateEntry(format!(
                    "{} is already in stock ({})",
                    new_vrm,
                    existing.status.as_str()
                )));
            }
        }

        let converted = deal.part_exchanges[index].converted_vehicle_id;
        let mut replacement = input.into_part_exchange(new_vrm);
        replacement.converted_vehicle_id = converted;
        deal.part_exchanges[index] = replacement;

        persist_deal(&mut tx, &deal).await?;
        tx.commit().await?;
        deal.version += 1;

        Ok(deal)
    }

    /// Remove a trade-in from the deal by position.
    pub async fn remove(&self, dealer_id: Uuid, deal_id: Uuid, index: usize) -> AppResult<Deal> {
        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;
        require_editable(&deal)?;

        if index >= deal.part_exchanges.len() {
            return Err(AppError::NotFound("Part-exchange".to_string()));
        }
        deal.part_exchanges.remove(index);

        persist_deal(&mut tx, &deal).await?;
        tx.commit().await?;
        deal.version += 1;

        Ok(deal)
    }

    /// Record that the finance settlement figure has been confirmed in
    /// writing. Unlike valuation edits this is allowed after invoicing,
    /// because it unblocks completion without changing any money.
    pub async fn set_settlement_in_writing(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        index: usize,
        confirmed: bool,
    ) -> AppResult<Deal> {
        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if !matches!(
            deal.status,
            DealStatus::Draft
                | DealStatus::DepositTaken
                | DealStatus::Invoiced
                | DealStatus::Delivered
        ) {
            return Err(AppError::InvalidStateTransition(format!(
                "Settlement confirmation cannot be changed once the deal is {}",
                deal.status
            )));
        }

        let px = deal
            .part_exchanges
            .get_mut(index)
            .ok_or_else(|| AppError::NotFound("Part-exchange".to_string()))?;
        px.has_settlement_in_writing = confirmed;

        persist_deal(&mut tx, &deal).await?;
        tx.commit().await?;
        deal.version += 1;

        Ok(deal)
    }
}

fn require_editable(deal: &Deal) -> AppResult<()> {
    if !matches!(deal.status, DealStatus::Draft | DealStatus::DepositTaken) {
        return Err(AppError::InvalidStateTransition(format!(
            "Part-exchanges cannot be changed while the deal is {}",
            deal.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(vrm: &str) -> PartExchangeInput {
        PartExchangeInput {
            vrm: vrm.to_string(),
            make: None,
            model: None,
            year: None,
            mileage: None,
            allowance: Decimal::new(300000, 2),
            settlement: Decimal::ZERO,
            vat_qualifying: false,
            has_finance: false,
            finance_company_id: None,
            has_settlement_in_writing: false,
        }
    }

    #[test]
    fn test_validate_normalizes_vrm() {
        assert_eq!(input("ab12 cde").validate().unwrap(), "AB12CDE");
    }

    #[test]
    fn test_validate_rejects_negative_allowance() {
        let mut px = input("AB12CDE");
        px.allowance = Decimal::new(-1, 0);
        assert!(px.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_settlement() {
        let mut px = input("AB12CDE");
        px.settlement = Decimal::new(-50, 0);
        assert!(px.validate().is_err());
    }

    #[test]
    fn test_financed_trade_in_needs_finance_company() {
        let mut px = input("AB12CDE");
        px.has_finance = true;
        assert!(px.validate().is_err());
        px.finance_company_id = Some(Uuid::new_v4());
        assert!(px.validate().is_ok());
    }
}
