/// Database row types for the `countries` table (see migrations/).
/// Used by sqlx for typed queries.

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CountryRow {
    pub id: i64,
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: i64,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>,
    pub estimated_gdp: Option<f64>,
    pub flag_url: Option<String>,
    /// Unix milliseconds.
    pub last_refreshed_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct StatusRow {
    pub total_countries: i64,
    pub last_refreshed_at: Option<i64>,
}
