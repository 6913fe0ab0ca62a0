use crate::error::{AppError, Result};

pub const COUNTRIES_API_URL: &str =
    "https://restcountries.com/v2/all?fields=name,capital,region,population,flag,currencies";
pub const EXCHANGE_API_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// Per-request timeout for each external source (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 8;

/// Periodic refresh interval (seconds). 0 disables the scheduler loop.
pub const REFRESH_INTERVAL_SECS: u64 = 3600;

/// Number of countries shown on the summary leaderboard.
pub const SUMMARY_TOP_N: usize = 5;

pub const SUMMARY_IMAGE_PATH: &str = "cache/summary.png";

/// Inclusive bounds of the per-country estimated GDP multiplier.
pub mod gdp_multiplier {
    pub const MIN: u32 = 1000;
    pub const MAX: u32 = 2000;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub countries_api_url: String,
    pub exchange_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Timeout applied to each source fetch (FETCH_TIMEOUT_SECS)
    pub fetch_timeout_secs: u64,
    /// Seconds between scheduled refreshes (REFRESH_INTERVAL_SECS, 0 = off)
    pub refresh_interval_secs: u64,
    /// Run one refresh before serving (REFRESH_ON_STARTUP)
    pub refresh_on_startup: bool,
    pub summary_image_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            countries_api_url: std::env::var("COUNTRIES_API_URL")
                .unwrap_or_else(|_| COUNTRIES_API_URL.to_string()),
            exchange_api_url: std::env::var("EXCHANGE_API_URL")
                .unwrap_or_else(|_| EXCHANGE_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "countries.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            fetch_timeout_secs: parse_u64("FETCH_TIMEOUT_SECS", FETCH_TIMEOUT_SECS)?,
            refresh_interval_secs: parse_u64("REFRESH_INTERVAL_SECS", REFRESH_INTERVAL_SECS)?,
            refresh_on_startup: parse_bool("REFRESH_ON_STARTUP", true)?,
            summary_image_path: std::env::var("SUMMARY_IMAGE_PATH")
                .unwrap_or_else(|_| SUMMARY_IMAGE_PATH.to_string()),
        })
    }
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(raw) => parse_bool_str(&raw)
            .ok_or_else(|| AppError::Config(format!("{key} must be true/false"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool_str(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
