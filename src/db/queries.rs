//! Read-side and delete queries over the `countries` table. All name matching
//! goes through the column's NOCASE collation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{CountryRow, StatusRow};
use crate::error::{AppError, Result};

const COUNTRY_COLUMNS: &str = "id, name, capital, region, population, currency_code, \
     exchange_rate, estimated_gdp, flag_url, last_refreshed_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatus {
    pub total_countries: i64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GdpSort {
    Asc,
    Desc,
}

impl std::str::FromStr for GdpSort {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gdp_asc" => Ok(GdpSort::Asc),
            "gdp_desc" => Ok(GdpSort::Desc),
            other => Err(AppError::Validation(format!(
                "sort must be one of gdp_asc, gdp_desc (got {other:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CountryFilter {
    pub region: Option<String>,
    pub currency: Option<String>,
    pub sort: Option<GdpSort>,
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM countries")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Row count plus the most recent refresh timestamp (None when empty).
pub async fn status(pool: &SqlitePool) -> Result<StoreStatus> {
    let row: StatusRow = sqlx::query_as(
        r#"
        SELECT COUNT(*) AS total_countries, MAX(last_refreshed_at) AS last_refreshed_at
        FROM countries
        "#,
    )
    .fetch_one(pool)
    .await?;

    let last_refreshed_at = if row.total_countries == 0 {
        None
    } else {
        row.last_refreshed_at.and_then(DateTime::from_timestamp_millis)
    };

    Ok(StoreStatus {
        total_countries: row.total_countries,
        last_refreshed_at,
    })
}

pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<CountryRow>> {
    let row = sqlx::query_as::<_, CountryRow>(&format!(
        "SELECT {COUNTRY_COLUMNS} FROM countries WHERE name = ?"
    ))
    .bind(name.trim())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Returns true when a row was removed.
pub async fn delete_by_name(pool: &SqlitePool, name: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM countries WHERE name = ?")
        .bind(name.trim())
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Filtered listing. NULL estimated GDP always sorts last.
pub async fn list(pool: &SqlitePool, filter: &CountryFilter) -> Result<Vec<CountryRow>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {COUNTRY_COLUMNS} FROM countries WHERE 1 = 1"));

    if let Some(region) = filter.region.as_deref().filter(|r| !r.trim().is_empty()) {
        qb.push(" AND region = ")
            .push_bind(region.trim().to_string())
            .push(" COLLATE NOCASE");
    }
    if let Some(currency) = filter.currency.as_deref().filter(|c| !c.trim().is_empty()) {
        qb.push(" AND currency_code = ")
            .push_bind(currency.trim().to_string())
            .push(" COLLATE NOCASE");
    }

    match filter.sort {
        Some(GdpSort::Asc) => qb.push(" ORDER BY estimated_gdp ASC NULLS LAST, id"),
        Some(GdpSort::Desc) => qb.push(" ORDER BY estimated_gdp DESC NULLS LAST, id"),
        None => qb.push(" ORDER BY id"),
    };

    let rows = qb.build_query_as::<CountryRow>().fetch_all(pool).await?;
    Ok(rows)
}
