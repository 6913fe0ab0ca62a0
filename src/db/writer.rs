use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::types::ReconciledCountry;

/// Applies a reconciled country set to SQLite as one transaction.
/// Either every row is inserted/updated or none are.
pub struct CountryWriter {
    pool: sqlx::SqlitePool,
}

impl CountryWriter {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert every record keyed by case-insensitive name. Rows for countries
    /// not in `countries` are left untouched. Returns the number of rows written.
    pub async fn upsert_all(&self, countries: &[ReconciledCountry]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(AppError::PersistenceFailure)?;

        for (idx, country) in countries.iter().enumerate() {
            if let Err(e) = upsert_country(&mut tx, country).await {
                warn!(
                    name = %country.name,
                    index = idx,
                    total = countries.len(),
                    "Upsert failed, rolling back batch: {e}"
                );
                if let Err(rb) = tx.rollback().await {
                    warn!("Rollback failed: {rb}");
                }
                return Err(AppError::PersistenceFailure(e));
            }
        }

        tx.commit().await.map_err(AppError::PersistenceFailure)?;
        debug!(rows = countries.len(), "Country batch committed");
        Ok(countries.len())
    }
}

async fn upsert_country(
    conn: &mut SqliteConnection,
    c: &ReconciledCountry,
) -> std::result::Result<(), sqlx::Error> {
    // INTEGER is signed 64-bit; refuse rather than store a clamped value.
    let population =
        i64::try_from(c.population).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let refreshed_at = c.last_refreshed_at.timestamp_millis();

    // `name` is UNIQUE COLLATE NOCASE, so the conflict target matches
    // case-insensitively and the stored casing follows the latest fetch.
    sqlx::query(
        r#"
        INSERT INTO countries (
            name, capital, region, population,
            currency_code, exchange_rate, estimated_gdp, flag_url,
            last_refreshed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            name = excluded.name,
            capital = excluded.capital,
            region = excluded.region,
            population = excluded.population,
            currency_code = excluded.currency_code,
            exchange_rate = excluded.exchange_rate,
            estimated_gdp = excluded.estimated_gdp,
            flag_url = excluded.flag_url,
            last_refreshed_at = excluded.last_refreshed_at
        "#,
    )
    .bind(&c.name)
    .bind(&c.capital)
    .bind(&c.region)
    .bind(population)
    .bind(&c.currency_code)
    .bind(c.exchange_rate)
    .bind(c.estimated_gdp)
    .bind(&c.flag_url)
    .bind(refreshed_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{queries, test_pool};
    use chrono::{DateTime, Duration, SubsecRound, Utc};

    fn country(name: &str, gdp: Option<f64>, at: DateTime<Utc>) -> ReconciledCountry {
        ReconciledCountry {
            name: name.to_string(),
            capital: Some("Capital".to_string()),
            region: Some("Region".to_string()),
            population: 1000,
            currency_code: Some("USD".to_string()),
            exchange_rate: Some(2.0),
            estimated_gdp: gdp,
            flag_url: Some("f".to_string()),
            last_refreshed_at: at,
        }
    }

    #[tokio::test]
    async fn inserts_into_empty_store() {
        let pool = test_pool().await;
        let writer = CountryWriter::new(pool.clone());
        let now = Utc::now().trunc_subsecs(3);

        let n = writer
            .upsert_all(&[country("Ecuador", Some(1.0), now), country("Peru", None, now)])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(queries::count(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn refetch_with_different_case_updates_existing_row() {
        let pool = test_pool().await;
        let writer = CountryWriter::new(pool.clone());
        let first = Utc::now().trunc_subsecs(3);
        let second = first + Duration::seconds(5);

        writer.upsert_all(&[country("Ecuador", Some(1.0), first)]).await.unwrap();
        let before = queries::find_by_name(&pool, "ECUADOR").await.unwrap().unwrap();

        writer.upsert_all(&[country("ecuador", Some(2.0), second)]).await.unwrap();
        let after = queries::find_by_name(&pool, "Ecuador").await.unwrap().unwrap();

        assert_eq!(queries::count(&pool).await.unwrap(), 1);
        assert_eq!(after.id, before.id);
        assert_eq!(after.name, "ecuador");
        assert_eq!(after.estimated_gdp, Some(2.0));
        assert_eq!(after.last_refreshed_at, second.timestamp_millis());
    }

    #[tokio::test]
    async fn applying_same_batch_twice_converges() {
        let pool = test_pool().await;
        let writer = CountryWriter::new(pool.clone());
        let first = Utc::now().trunc_subsecs(3);
        let second = first + Duration::minutes(1);

        let batch = |at| vec![country("A", Some(3.0), at), country("B", None, at)];
        writer.upsert_all(&batch(first)).await.unwrap();
        writer.upsert_all(&batch(second)).await.unwrap();

        let status = queries::status(&pool).await.unwrap();
        assert_eq!(status.total_countries, 2);
        assert_eq!(status.last_refreshed_at, Some(second));
        let b = queries::find_by_name(&pool, "b").await.unwrap().unwrap();
        assert!(b.estimated_gdp.is_none());
    }

    #[tokio::test]
    async fn failure_midway_leaves_store_untouched() {
        let pool = test_pool().await;
        let writer = CountryWriter::new(pool.clone());
        let first = Utc::now().trunc_subsecs(3);
        writer.upsert_all(&[country("Kept", Some(1.0), first)]).await.unwrap();

        // Blank name violates the CHECK constraint on the third row.
        let later = first + Duration::minutes(1);
        let batch = vec![
            country("Kept", Some(99.0), later),
            country("New", Some(5.0), later),
            country("   ", Some(5.0), later),
            country("Never", Some(5.0), later),
        ];
        let res = writer.upsert_all(&batch).await;
        assert!(matches!(res, Err(AppError::PersistenceFailure(_))));

        assert_eq!(queries::count(&pool).await.unwrap(), 1);
        assert!(queries::find_by_name(&pool, "New").await.unwrap().is_none());
        let kept = queries::find_by_name(&pool, "kept").await.unwrap().unwrap();
        assert_eq!(kept.estimated_gdp, Some(1.0));
        assert_eq!(kept.last_refreshed_at, first.timestamp_millis());
    }

    #[tokio::test]
    async fn unrepresentable_population_fails_the_batch() {
        let pool = test_pool().await;
        let writer = CountryWriter::new(pool.clone());
        let now = Utc::now().trunc_subsecs(3);

        let mut huge = country("Huge", Some(1.0), now);
        huge.population = u64::MAX;
        let res = writer.upsert_all(&[country("Small", Some(1.0), now), huge]).await;

        assert!(matches!(res, Err(AppError::PersistenceFailure(sqlx::Error::Encode(_)))));
        assert_eq!(queries::count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn absent_countries_are_not_purged() {
        let pool = test_pool().await;
        let writer = CountryWriter::new(pool.clone());
        let now = Utc::now().trunc_subsecs(3);

        writer
            .upsert_all(&[country("A", Some(1.0), now), country("B", Some(1.0), now)])
            .await
            .unwrap();
        writer.upsert_all(&[country("A", Some(2.0), now)]).await.unwrap();

        assert_eq!(queries::count(&pool).await.unwrap(), 2);
    }
}
