use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::try_join;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::{CountryFact, ExchangeRateTable, Source};

/// Raw byte access to an external source. The refresh pipeline only ever talks
/// to sources through this trait, so tests can substitute canned payloads.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: Source) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher. The client-level timeout bounds the whole request
/// including the body; an elapsed timeout drops the in-flight request.
pub struct HttpFetcher {
    client: reqwest::Client,
    countries_url: String,
    exchange_url: String,
}

impl HttpFetcher {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
            .build()?;
        Ok(Self::with_client(
            client,
            cfg.countries_api_url.clone(),
            cfg.exchange_api_url.clone(),
        ))
    }

    /// Use a preconfigured client. The client's timeout is the fetch bound.
    pub fn with_client(client: reqwest::Client, countries_url: String, exchange_url: String) -> Self {
        Self {
            client,
            countries_url,
            exchange_url,
        }
    }

    fn url_for(&self, source: Source) -> &str {
        match source {
            Source::Countries => &self.countries_url,
            Source::ExchangeRates => &self.exchange_url,
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, source: Source) -> Result<Vec<u8>> {
        let url = self.url_for(source);
        debug!(source = %source, url, "GET");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| unavailable(source, e))?;
        let body = resp.bytes().await.map_err(|e| unavailable(source, e))?;

        Ok(body.to_vec())
    }
}

/// Timeouts and other transport/status failures collapse into the same
/// outcome; they are only told apart in the log.
fn unavailable(source: Source, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        warn!(source = %source, "Source request timed out: {e}");
        AppError::SourceUnavailable {
            which: source,
            reason: "request timed out".to_string(),
        }
    } else {
        warn!(source = %source, status = ?e.status(), "Source request failed: {e}");
        AppError::SourceUnavailable {
            which: source,
            reason: e.to_string(),
        }
    }
}

/// Decode the country source payload. The payload must be a JSON array;
/// individual entries that cannot be decoded or carry no name are skipped so
/// one bad record never costs the whole refresh.
pub fn parse_countries(body: &[u8]) -> Result<Vec<CountryFact>> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| AppError::SourceUnavailable {
            which: Source::Countries,
            reason: format!("undecodable payload: {e}"),
        })?;

    let total = entries.len();
    let mut facts = Vec::with_capacity(total);
    for (idx, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<CountryFact>(entry) {
            Ok(mut fact) => {
                let trimmed = fact.name.trim();
                if trimmed.is_empty() {
                    warn!(source = %Source::Countries, index = idx, "Skipping country entry without a name");
                    continue;
                }
                if trimmed.len() != fact.name.len() {
                    fact.name = trimmed.to_string();
                }
                facts.push(fact);
            }
            Err(e) => {
                warn!(source = %Source::Countries, index = idx, "Skipping undecodable country entry: {e}");
            }
        }
    }

    if facts.len() < total {
        warn!(
            source = %Source::Countries,
            kept = facts.len(),
            skipped = total - facts.len(),
            "Country payload had unusable entries"
        );
    }
    Ok(facts)
}

/// Decode the exchange rate payload (`{"rates": {...}}`; other keys ignored).
pub fn parse_rates(body: &[u8]) -> Result<ExchangeRateTable> {
    serde_json::from_slice(body).map_err(|e| AppError::SourceUnavailable {
        which: Source::ExchangeRates,
        reason: format!("undecodable payload: {e}"),
    })
}

async fn fetch_countries(fetcher: &dyn SourceFetcher) -> Result<Vec<CountryFact>> {
    let started = Instant::now();
    let body = fetcher.fetch(Source::Countries).await?;
    let facts = parse_countries(&body)?;
    info!(
        source = %Source::Countries,
        count = facts.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Fetched {} country facts",
        facts.len(),
    );
    Ok(facts)
}

async fn fetch_rates(fetcher: &dyn SourceFetcher) -> Result<ExchangeRateTable> {
    let started = Instant::now();
    let body = fetcher.fetch(Source::ExchangeRates).await?;
    let table = parse_rates(&body)?;
    if table.is_empty() {
        warn!(source = %Source::ExchangeRates, "Rate table is empty; every priced currency will get a null GDP");
    }
    info!(
        source = %Source::ExchangeRates,
        count = table.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Fetched {} exchange rates",
        table.len(),
    );
    Ok(table)
}

/// Fetch both sources concurrently. The first failure wins: the other future
/// is dropped (cancelling its request) and its result, if any, is discarded.
pub async fn fetch_sources(
    fetcher: &Arc<dyn SourceFetcher>,
) -> Result<(Vec<CountryFact>, ExchangeRateTable)> {
    try_join(fetch_countries(fetcher.as_ref()), fetch_rates(fetcher.as_ref())).await
}
