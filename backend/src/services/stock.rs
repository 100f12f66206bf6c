//! Vehicle stock collaborator
//!
//! Minimal view of the dealer's stock book needed by the deal engine:
//! VRM collision checks for part-exchanges, marking the sold vehicle, and
//! the compensating actions run when a completed deal is cancelled.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::models::{PartExchange, StockVehicle, VehicleStatus};
use shared::validation::normalize_vrm;

/// Stock service scoped to the dealer's own vehicles
#[derive(Clone)]
pub struct StockService {
    db: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct VehicleRow {
    id: Uuid,
    dealer_id: Uuid,
    vrm: String,
    make: Option<String>,
    model: Option<String>,
    year: Option<i32>,
    mileage: Option<i32>,
    asking_price: Option<Decimal>,
    status: String,
    source_deal_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VehicleRow {
    fn into_vehicle(self) -> AppResult<StockVehicle> {
        let status = VehicleStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown vehicle status: {}", self.status)))?;
        Ok(StockVehicle {
            id: self.id,
            dealer_id: self.dealer_id,
            vrm: self.vrm,
            make: self.make,
            model: self.model,
            year: self.year,
            mileage: self.mileage,
            asking_price: self.asking_price,
            status,
            source_deal_id: self.source_deal_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const VEHICLE_COLUMNS: &str = "id, dealer_id, vrm, make, model, year, mileage, asking_price, \
                               status, source_deal_id, created_at, updated_at";

impl StockService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Get a stock vehicle by id, dealer-scoped.
    pub async fn get_vehicle(&self, dealer_id: Uuid, vehicle_id: Uuid) -> AppResult<StockVehicle> {
        let row = sqlx::query_as::<_, VehicleRow>(&format!(
            "SELECT {} FROM vehicles WHERE id = $1 AND dealer_id = $2",
            VEHICLE_COLUMNS
        ))
        .bind(vehicle_id)
        .bind(dealer_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Vehicle".to_string()))?;

        row.into_vehicle()
    }

    /// Find an unsold stock unit whose normalized VRM matches. A trade-in
    /// vehicle cannot also be a current stock unit.
    pub async fn find_unsold_by_vrm(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        vrm: &str,
    ) -> AppResult<Option<StockVehicle>> {
        let row = sqlx::query_as::<_, VehicleRow>(&format!(
            "SELECT {} FROM vehicles WHERE dealer_id = $1 AND vrm = $2 AND status != 'sold'",
            VEHICLE_COLUMNS
        ))
        .bind(dealer_id)
        .bind(normalize_vrm(vrm))
        .fetch_optional(conn)
        .await?;

        row.map(VehicleRow::into_vehicle).transpose()
    }

    /// Update a vehicle's availability. Used both inside transition
    /// transactions and by the cancellation compensation path.
    pub async fn set_status(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        vehicle_id: Uuid,
        status: VehicleStatus,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE vehicles SET status = $1, updated_at = NOW() WHERE id = $2 AND dealer_id = $3",
        )
        .bind(status.as_str())
        .bind(vehicle_id)
        .bind(dealer_id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Vehicle".to_string()));
        }
        Ok(())
    }

    /// Convert a completed deal's part-exchange into a stock unit.
    pub async fn create_from_part_exchange(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        deal_id: Uuid,
        px: &PartExchange,
    ) -> AppResult<Uuid> {
        let vehicle_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO vehicles (dealer_id, vrm, make, model, year, mileage, status, source_deal_id)
            VALUES ($1, $2, $3, $4, $5, $6, 'available', $7)
            RETURNING id
            "#,
        )
        .bind(dealer_id)
        .bind(normalize_vrm(&px.vrm))
        .bind(&px.make)
        .bind(&px.model)
        .bind(px.year)
        .bind(px.mileage)
        .bind(deal_id)
        .fetch_one(conn)
        .await?;

        Ok(vehicle_id)
    }

    /// Remove a converted trade-in that has not been resold. Returns false
    /// when the unit was already sold on (it then stays in the book).
    pub async fn delete_if_unsold(&self, dealer_id: Uuid, vehicle_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM vehicles WHERE id = $1 AND dealer_id = $2 AND status != 'sold'",
        )
        .bind(vehicle_id)
        .bind(dealer_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Restore a vehicle to available stock (cancellation compensation).
    pub async fn restore_to_stock(&self, dealer_id: Uuid, vehicle_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE vehicles SET status = 'available', updated_at = NOW() \
             WHERE id = $1 AND dealer_id = $2",
        )
        .bind(vehicle_id)
        .bind(dealer_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Vehicle".to_string()));
        }
        Ok(())
    }
}
