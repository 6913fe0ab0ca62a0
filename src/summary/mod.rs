//! Best-effort refresh summary: a top-N leaderboard by estimated GDP rendered
//! to a cached image. Nothing in here may fail a refresh.

pub mod render;

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{AppError, Result};
use crate::types::ReconciledCountry;

pub use render::PngRenderer;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub name: String,
    pub estimated_gdp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub total_countries: i64,
    pub top: Vec<LeaderboardEntry>,
    pub refreshed_at: DateTime<Utc>,
}

/// Renders a summary into an artifact at `path`, replacing any previous one.
pub trait SummaryRenderer: Send + Sync {
    fn render(&self, summary: &RefreshSummary, path: &Path) -> Result<()>;
}

/// Top `n` by estimated GDP descending, NULLs last. The sort is stable, so
/// equal values keep their input order.
pub fn leaderboard(countries: &[ReconciledCountry], n: usize) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<&ReconciledCountry> = countries.iter().collect();
    ranked.sort_by(|a, b| compare_gdp_desc(a.estimated_gdp, b.estimated_gdp));
    ranked
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, c)| LeaderboardEntry {
            rank: i + 1,
            name: c.name.clone(),
            estimated_gdp: c.estimated_gdp,
        })
        .collect()
}

fn compare_gdp_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn build_summary(
    total_countries: i64,
    countries: &[ReconciledCountry],
    refreshed_at: DateTime<Utc>,
    n: usize,
) -> RefreshSummary {
    RefreshSummary {
        total_countries,
        top: leaderboard(countries, n),
        refreshed_at,
    }
}

/// Render on the blocking pool. A panicking renderer is reported like any
/// other render error.
pub async fn generate(
    renderer: Arc<dyn SummaryRenderer>,
    summary: RefreshSummary,
    path: PathBuf,
) -> Result<()> {
    for entry in &summary.top {
        info!(
            rank = entry.rank,
            name = %entry.name,
            estimated_gdp = ?entry.estimated_gdp,
            "Leaderboard #{} {} ({})",
            entry.rank,
            entry.name,
            format_gdp(entry.estimated_gdp),
        );
    }

    tokio::task::spawn_blocking(move || renderer.render(&summary, &path))
        .await
        .map_err(|e| AppError::SummaryGeneration(format!("render task aborted: {e}")))?
}

/// `1234567.891` → `1,234,567.89`; `None` → `N/A`.
pub fn format_gdp(gdp: Option<f64>) -> String {
    let Some(v) = gdp else {
        return "N/A".to_string();
    };
    let fixed = format!("{:.2}", v.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if v < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac}")
}
