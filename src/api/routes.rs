use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthSnapshot, RefreshHealth};
use crate::country_refresh::RefreshOrchestrator;
use crate::db::models::CountryRow;
use crate::db::queries::{self, CountryFilter, GdpSort, StoreStatus};
use crate::error::AppError;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub orchestrator: Arc<RefreshOrchestrator>,
    pub health: Arc<RefreshHealth>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/countries", get(get_countries))
        .route("/countries/refresh", post(refresh_countries))
        .route("/countries/image", get(get_summary_image))
        .route("/countries/:name", get(get_country).delete(delete_country))
        .route("/status", get(get_status))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CountriesQuery {
    pub region: Option<String>,
    pub currency: Option<String>,
    pub sort: Option<String>,
}

impl CountriesQuery {
    fn into_filter(self) -> Result<CountryFilter, AppError> {
        let sort = match self.sort.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(s.parse::<GdpSort>()?),
        };
        Ok(CountryFilter {
            region: self.region,
            currency: self.currency,
            sort,
        })
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct CountryResponse {
    pub id: i64,
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: i64,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>,
    pub estimated_gdp: Option<f64>,
    pub flag_url: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl From<CountryRow> for CountryResponse {
    fn from(r: CountryRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            capital: r.capital,
            region: r.region,
            population: r.population,
            currency_code: r.currency_code,
            exchange_rate: r.exchange_rate,
            estimated_gdp: r.estimated_gdp,
            flag_url: r.flag_url,
            last_refreshed_at: DateTime::from_timestamp_millis(r.last_refreshed_at),
        }
    }
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub message: &'static str,
    pub total_processed: usize,
    pub last_refreshed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_countries(
    State(state): State<ApiState>,
    Query(params): Query<CountriesQuery>,
) -> Result<Json<Vec<CountryResponse>>, AppError> {
    let filter = params.into_filter()?;
    let rows = queries::list(&state.pool, &filter).await?;
    Ok(Json(rows.into_iter().map(CountryResponse::from).collect()))
}

async fn get_country(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<CountryResponse>, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("country name is required".to_string()));
    }
    queries::find_by_name(&state.pool, &name)
        .await?
        .map(|row| Json(row.into()))
        .ok_or(AppError::NotFound("Country"))
}

async fn delete_country(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("country name is required".to_string()));
    }
    if queries::delete_by_name(&state.pool, &name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Country"))
    }
}

async fn refresh_countries(
    State(state): State<ApiState>,
) -> Result<Json<RefreshResponse>, AppError> {
    let report = state.orchestrator.refresh().await?;
    Ok(Json(RefreshResponse {
        message: "Countries refreshed",
        total_processed: report.total_processed,
        last_refreshed_at: report.refreshed_at,
    }))
}

async fn get_summary_image(State(state): State<ApiState>) -> Result<impl IntoResponse, AppError> {
    let bytes = match tokio::fs::read(state.orchestrator.summary_path()).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("Summary image"))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

async fn get_status(State(state): State<ApiState>) -> Result<Json<StoreStatus>, AppError> {
    Ok(Json(queries::status(&state.pool).await?))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}
