use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::health::{RefreshHealth, RefreshPhase};
use crate::config::SUMMARY_TOP_N;
use crate::db::{queries, writer::CountryWriter};
use crate::error::Result;
use crate::fetcher::{fetch_sources, SourceFetcher};
use crate::reconcile::{reconcile, MultiplierSource};
use crate::summary::{self, build_summary, SummaryRenderer};
use crate::types::ReconciledCountry;

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub total_processed: usize,
    pub refreshed_at: DateTime<Utc>,
}

/// Runs one full refresh: fetch both sources concurrently, reconcile, commit
/// atomically, then attempt the summary image.
///
/// Source and commit failures abort the refresh and are returned unchanged.
/// Summary failures are logged and swallowed. Refreshes are serialized
/// in-process; concurrent callers queue on `in_flight`.
pub struct RefreshOrchestrator {
    pool: SqlitePool,
    writer: CountryWriter,
    fetcher: Arc<dyn SourceFetcher>,
    multiplier: Arc<dyn MultiplierSource>,
    renderer: Arc<dyn SummaryRenderer>,
    summary_path: PathBuf,
    health: Arc<RefreshHealth>,
    in_flight: Mutex<()>,
}

impl RefreshOrchestrator {
    pub fn new(
        pool: SqlitePool,
        fetcher: Arc<dyn SourceFetcher>,
        multiplier: Arc<dyn MultiplierSource>,
        renderer: Arc<dyn SummaryRenderer>,
        summary_path: PathBuf,
        health: Arc<RefreshHealth>,
    ) -> Self {
        Self {
            writer: CountryWriter::new(pool.clone()),
            pool,
            fetcher,
            multiplier,
            renderer,
            summary_path,
            health,
            in_flight: Mutex::new(()),
        }
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    pub async fn refresh(&self) -> Result<RefreshReport> {
        let _guard = self.in_flight.lock().await;

        // One timestamp for every row this refresh touches. Millisecond
        // precision matches what the store keeps.
        let refreshed_at = Utc::now().trunc_subsecs(3);
        let started = Instant::now();

        match self.run_pipeline(refreshed_at).await {
            Ok(report) => {
                self.health.record_success(now_ms());
                info!(
                    countries = report.total_processed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    refreshed_at = %report.refreshed_at,
                    "Country refresh complete: {} countries",
                    report.total_processed,
                );
                Ok(report)
            }
            Err(e) => {
                let phase = self.health.phase();
                self.health.record_failure(now_ms());
                error!(
                    phase = %phase,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Country refresh failed: {e}"
                );
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, refreshed_at: DateTime<Utc>) -> Result<RefreshReport> {
        self.enter(RefreshPhase::FetchingSources);
        let (facts, rates) = fetch_sources(&self.fetcher).await?;

        self.enter(RefreshPhase::Reconciling);
        let reconciled = reconcile(&facts, &rates, refreshed_at, self.multiplier.as_ref());

        self.enter(RefreshPhase::Committing);
        let written = self.writer.upsert_all(&reconciled).await?;

        self.enter(RefreshPhase::GeneratingSummary);
        if let Err(e) = self.generate_summary(&reconciled, refreshed_at).await {
            warn!(path = %self.summary_path.display(), "Failed to generate summary image: {e}");
        }

        Ok(RefreshReport {
            total_processed: written,
            refreshed_at,
        })
    }

    async fn generate_summary(
        &self,
        reconciled: &[ReconciledCountry],
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        let total = queries::count(&self.pool).await?;
        let summary = build_summary(total, reconciled, refreshed_at, SUMMARY_TOP_N);
        summary::generate(Arc::clone(&self.renderer), summary, self.summary_path.clone()).await
    }

    fn enter(&self, phase: RefreshPhase) {
        debug!(phase = %phase, "Refresh phase");
        self.health.set_phase(phase);
    }
}

// ---------------------------------------------------------------------------
// RefreshScheduler
// ---------------------------------------------------------------------------

/// Background task: optional refresh at startup, then one every `interval_secs`.
/// A failed refresh is not retried until the next tick.
pub struct RefreshScheduler {
    orchestrator: Arc<RefreshOrchestrator>,
    interval_secs: u64,
    run_on_startup: bool,
}

impl RefreshScheduler {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>, interval_secs: u64, run_on_startup: bool) -> Self {
        Self {
            orchestrator,
            interval_secs,
            run_on_startup,
        }
    }

    pub async fn run(self) {
        if self.run_on_startup {
            // Outcome already logged by the orchestrator.
            let _ = self.orchestrator.refresh().await;
        }

        if self.interval_secs == 0 {
            info!("Periodic refresh disabled (REFRESH_INTERVAL_SECS=0)");
            return;
        }

        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.tick().await; // skip immediate first tick

        loop {
            ticker.tick().await;
            if self.orchestrator.refresh().await.is_err() {
                debug!("Next refresh attempt in {}s", self.interval_secs);
            }
        }
    }
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::db::test_pool;
    use crate::error::AppError;
    use crate::fetcher::tests::StubFetcher;
    use crate::reconcile::{FixedMultiplier, RandomMultiplier};
    use crate::summary::{PngRenderer, RefreshSummary};
    use crate::types::Source;

    const ECUADOR: &str =
        r#"[{"name":"Ecuador","population":1000,"currencies":[{"code":"USD"}],"flag":"f"}]"#;
    const RATES: &str = r#"{"rates":{"USD":2}}"#;

    #[derive(Default)]
    struct CountingRenderer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl SummaryRenderer for CountingRenderer {
        fn render(&self, _summary: &RefreshSummary, _path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::SummaryGeneration("disk full".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn orchestrator(
        pool: &SqlitePool,
        fetcher: StubFetcher,
        renderer: Arc<dyn SummaryRenderer>,
        summary_path: PathBuf,
    ) -> (RefreshOrchestrator, Arc<RefreshHealth>) {
        let health = Arc::new(RefreshHealth::new());
        let orch = RefreshOrchestrator::new(
            pool.clone(),
            Arc::new(fetcher),
            Arc::new(RandomMultiplier),
            renderer,
            summary_path,
            Arc::clone(&health),
        );
        (orch, health)
    }

    #[tokio::test]
    async fn ecuador_scenario_end_to_end() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("summary.png");
        let (orch, health) = orchestrator(
            &pool,
            StubFetcher::new(ECUADOR, RATES),
            Arc::new(PngRenderer::new()),
            path.clone(),
        );

        let report = orch.refresh().await.unwrap();
        assert_eq!(report.total_processed, 1);

        let row = queries::find_by_name(&pool, "ecuador").await.unwrap().unwrap();
        assert_eq!(row.currency_code.as_deref(), Some("USD"));
        assert_eq!(row.exchange_rate, Some(2.0));
        let gdp = row.estimated_gdp.unwrap();
        assert!((500_000.0..=1_000_000.0).contains(&gdp), "gdp={gdp}");
        assert_eq!(row.flag_url.as_deref(), Some("f"));
        assert_eq!(row.last_refreshed_at, report.refreshed_at.timestamp_millis());

        assert!(path.exists());
        let snap = health.snapshot();
        assert_eq!(snap.phase, RefreshPhase::Idle);
        assert_eq!(snap.consecutive_failures, 0);
        assert!(snap.last_success_at_ms.is_some());
    }

    #[tokio::test]
    async fn source_failure_leaves_store_untouched() {
        let pool = test_pool().await;
        let renderer = Arc::new(CountingRenderer::default());
        let (ok, _) = orchestrator(&pool, StubFetcher::new(ECUADOR, RATES), renderer.clone(), "s.png".into());
        let first = ok.refresh().await.unwrap();

        let (failing, health) = orchestrator(
            &pool,
            StubFetcher::failing(Source::Countries, RATES),
            renderer.clone(),
            "s.png".into(),
        );
        match failing.refresh().await {
            Err(AppError::SourceUnavailable { which, .. }) => assert_eq!(which, Source::Countries),
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }

        let status = queries::status(&pool).await.unwrap();
        assert_eq!(status.total_countries, 1);
        assert_eq!(status.last_refreshed_at, Some(first.refreshed_at));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(health.snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn commit_failure_skips_summary_and_rolls_back() {
        let pool = test_pool().await;
        let renderer = Arc::new(CountingRenderer::default());
        let countries = r#"[
            {"name":"Ecuador","population":1000,"currencies":[{"code":"USD"}]},
            {"name":"Atlantis","population":18446744073709551615}
        ]"#;
        let (orch, _) = orchestrator(&pool, StubFetcher::new(countries, RATES), renderer.clone(), "s.png".into());

        let res = orch.refresh().await;
        assert!(matches!(res, Err(AppError::PersistenceFailure(_))));
        assert_eq!(queries::count(&pool).await.unwrap(), 0);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn summary_failure_does_not_fail_refresh() {
        let pool = test_pool().await;
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let (orch, health) = orchestrator(&pool, StubFetcher::new(ECUADOR, RATES), renderer.clone(), "s.png".into());

        let report = orch.refresh().await.unwrap();
        assert_eq!(report.total_processed, 1);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queries::count(&pool).await.unwrap(), 1);
        assert_eq!(health.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn repeated_refresh_only_moves_timestamp() {
        let pool = test_pool().await;
        let countries = r#"[
            {"name":"Ecuador","population":1000,"currencies":[{"code":"USD"}]},
            {"name":"Antarctica","population":0},
            {"name":"Atlantis","population":7,"currencies":[{"code":"ATL"}]}
        ]"#;
        let health = Arc::new(RefreshHealth::new());
        let orch = RefreshOrchestrator::new(
            pool.clone(),
            Arc::new(StubFetcher::new(countries, RATES)),
            Arc::new(FixedMultiplier(1000.0)),
            Arc::new(CountingRenderer::default()),
            "s.png".into(),
            health,
        );

        let first = orch.refresh().await.unwrap();
        let before = queries::list(&pool, &Default::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = orch.refresh().await.unwrap();
        let after = queries::list(&pool, &Default::default()).await.unwrap();

        assert!(second.refreshed_at > first.refreshed_at);
        assert_eq!(before.len(), 3);
        assert_eq!(after.len(), 3);
        for (b, a) in before.iter().zip(&after) {
            assert_eq!((b.id, &b.name, b.estimated_gdp), (a.id, &a.name, a.estimated_gdp));
            assert_eq!(a.last_refreshed_at, second.refreshed_at.timestamp_millis());
        }
        assert_eq!(after[0].estimated_gdp, Some(500_000.0));
        assert_eq!(after[1].estimated_gdp, Some(0.0));
        assert!(after[2].estimated_gdp.is_none());
        let status = queries::status(&pool).await.unwrap();
        assert_eq!(status.last_refreshed_at, Some(second.refreshed_at));
    }

    #[tokio::test]
    async fn lowercase_refetch_updates_existing_row() {
        let pool = test_pool().await;
        let renderer: Arc<dyn SummaryRenderer> = Arc::new(CountingRenderer::default());
        let (first, _) = orchestrator(&pool, StubFetcher::new(ECUADOR, RATES), renderer.clone(), "s.png".into());
        first.refresh().await.unwrap();

        let lower = ECUADOR.replace("Ecuador", "ecuador");
        let (second, _) = orchestrator(&pool, StubFetcher::new(&lower, RATES), renderer, "s.png".into());
        second.refresh().await.unwrap();

        assert_eq!(queries::count(&pool).await.unwrap(), 1);
        let row = queries::find_by_name(&pool, "ECUADOR").await.unwrap().unwrap();
        assert_eq!(row.name, "ecuador");
    }
}
