//! Common types used across the platform

use serde::{Deserialize, Serialize};

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Pagination {
    /// Page size as a SQL LIMIT, capped at 100 rows.
    pub fn limit(&self) -> i64 {
        i64::from(self.per_page.clamp(1, 100))
    }

    /// SQL OFFSET for the requested page. Computed in i64 so an absurd
    /// caller-supplied page number cannot overflow.
    pub fn offset(&self) -> i64 {
        (i64::from(self.page.max(1)) - 1) * self.limit()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn new(pagination: &Pagination, total_items: u64) -> Self {
        let per_page = pagination.limit() as u32;
        let total_pages = ((total_items + per_page as u64 - 1) / per_page as u64) as u32;
        Self {
            page: pagination.page,
            per_page,
            total_items,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_clamped() {
        let p = Pagination { page: 1, per_page: 5000 };
        assert_eq!(p.limit(), 100);
        let p = Pagination { page: 1, per_page: 0 };
        assert_eq!(p.limit(), 1);
    }

    #[test]
    fn test_offset_handles_extreme_pages() {
        let p = Pagination { page: u32::MAX, per_page: 100 };
        assert_eq!(p.offset(), (i64::from(u32::MAX) - 1) * 100);
        let p = Pagination { page: 0, per_page: 20 };
        assert_eq!(p.offset(), 0);
        let p = Pagination { page: 3, per_page: 20 };
        assert_eq!(p.offset(), 40);
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let p = Pagination { page: 1, per_page: 20 };
        assert_eq!(PaginationMeta::new(&p, 41).total_pages, 3);
        assert_eq!(PaginationMeta::new(&p, 0).total_pages, 0);
    }
}
