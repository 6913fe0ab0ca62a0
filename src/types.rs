use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// The two external providers a refresh pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Countries,
    ExchangeRates,
}

impl Source {
    /// Human-facing provider name used in API error details.
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Countries => "RestCountries API",
            Source::ExchangeRates => "Exchange Rate API",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Source::Countries => "countries",
            Source::ExchangeRates => "exchange_rates",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Country source payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrencyInfo {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// One entry of the country source list. Missing optional fields are tolerated;
/// a missing or null `currencies` array means "no currency". A missing name
/// decodes as empty and is filtered out by the fetcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountryFact {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default)]
    pub capital: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "lenient_population")]
    pub population: u64,
    #[serde(default)]
    pub currencies: Option<Vec<CurrencyInfo>>,
    #[serde(default)]
    pub flag: Option<String>,
}

impl CountryFact {
    /// First listed currency entry, if the country reports any.
    pub fn first_currency(&self) -> Option<&CurrencyInfo> {
        self.currencies.as_deref().and_then(|c| c.first())
    }
}

fn null_as_empty<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

/// `null`, negative and non-finite populations become 0; fractional ones are
/// truncated.
fn lenient_population<'de, D>(de: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(n) = Option::<serde_json::Number>::deserialize(de)? else {
        return Ok(0);
    };
    if let Some(v) = n.as_u64() {
        return Ok(v);
    }
    Ok(match n.as_f64() {
        Some(v) if v.is_finite() && v > 0.0 => v as u64,
        _ => 0,
    })
}

// ---------------------------------------------------------------------------
// Exchange rate source payload
// ---------------------------------------------------------------------------

/// Currency code → rate against the fixed base currency (USD).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeRateTable {
    pub rates: HashMap<String, f64>,
}

impl ExchangeRateTable {
    /// Usable rate for `code`. Zero, negative and non-finite entries count as missing.
    pub fn rate_for(&self, code: &str) -> Option<f64> {
        self.rates
            .get(code)
            .copied()
            .filter(|r| r.is_finite() && *r > 0.0)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl FromIterator<(String, f64)> for ExchangeRateTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            rates: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciled record (unit of persistence)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledCountry {
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: u64,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>,
    pub estimated_gdp: Option<f64>,
    pub flag_url: Option<String>,
    pub last_refreshed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_lookup_ignores_unusable_values() {
        let table: ExchangeRateTable = [
            ("USD".to_string(), 1.0),
            ("ZZZ".to_string(), 0.0),
            ("NEG".to_string(), -3.0),
            ("NAN".to_string(), f64::NAN),
        ]
        .into_iter()
        .collect();
        assert_eq!(table.rate_for("USD"), Some(1.0));
        assert_eq!(table.rate_for("ZZZ"), None);
        assert_eq!(table.rate_for("NEG"), None);
        assert_eq!(table.rate_for("NAN"), None);
        assert_eq!(table.rate_for("EUR"), None);
    }

    #[test]
    fn population_is_normalized_instead_of_rejected() {
        let cases = [
            (r#"{"name":"A","population":null}"#, 0),
            (r#"{"name":"A"}"#, 0),
            (r#"{"name":"A","population":-5}"#, 0),
            (r#"{"name":"A","population":12.9}"#, 12),
            (r#"{"name":"A","population":1402112000}"#, 1_402_112_000),
        ];
        for (raw, expected) in cases {
            let fact: CountryFact = serde_json::from_str(raw).unwrap();
            assert_eq!(fact.population, expected, "{raw}");
        }
    }

    #[test]
    fn missing_or_null_name_decodes_as_empty() {
        let fact: CountryFact = serde_json::from_str(r#"{"population":3}"#).unwrap();
        assert_eq!(fact.name, "");
        let fact: CountryFact = serde_json::from_str(r#"{"name":null}"#).unwrap();
        assert_eq!(fact.name, "");
    }

    #[test]
    fn null_currencies_means_no_currency() {
        let raw = r#"{"name":"Antarctica","region":"Polar","population":1000,"currencies":null}"#;
        let fact: CountryFact = serde_json::from_str(raw).unwrap();
        assert!(fact.first_currency().is_none());
        assert!(fact.capital.is_none());
    }
}
