//! Document numbering gateway
//!
//! The engine consumes numbers through this one contract and never
//! implements counter arithmetic elsewhere. Allocation is a single atomic
//! upsert on a per (dealer, counter type) row, so concurrent callers on
//! different deals can never be handed the same number, and a number once
//! returned is never returned again even if the document it went on is
//! later voided.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppResult;
use shared::models::DocumentType;

/// Atomic dealer-scoped sequence allocator
pub struct NumberingGateway;

impl NumberingGateway {
    /// Allocate the next number for a dealer-scoped counter and format it
    /// as `PREFIX-NNNNN`. Runs on the caller's connection so it can take
    /// part in a larger transaction.
    pub async fn allocate(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        counter_type: &str,
        prefix: &str,
    ) -> AppResult<String> {
        let number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO document_counters (dealer_id, counter_type, last_number)
            VALUES ($1, $2, 1)
            ON CONFLICT (dealer_id, counter_type)
            DO UPDATE SET last_number = document_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(dealer_id)
        .bind(counter_type)
        .fetch_one(conn)
        .await?;

        Ok(Self::format_number(prefix, number))
    }

    /// Allocate a document number for the given document type.
    pub async fn allocate_document_number(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        document_type: DocumentType,
    ) -> AppResult<String> {
        Self::allocate(
            conn,
            dealer_id,
            document_type.as_str(),
            document_type.number_prefix(),
        )
        .await
    }

    /// Allocate a human-readable deal number.
    pub async fn allocate_deal_number(
        conn: &mut PgConnection,
        dealer_id: Uuid,
    ) -> AppResult<String> {
        Self::allocate(conn, dealer_id, "deal", "D").await
    }

    fn format_number(prefix: &str, number: i64) -> String {
        format!("{}-{:05}", prefix, number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(NumberingGateway::format_number("INV", 1), "INV-00001");
        assert_eq!(NumberingGateway::format_number("PR", 42), "PR-00042");
        assert_eq!(NumberingGateway::format_number("DR", 123456), "DR-123456");
    }
}
