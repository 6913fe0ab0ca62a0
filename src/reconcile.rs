//! Merges country facts with exchange rates into persistable records.
//! Pure: no I/O and no lookups against stored state. Name-conflict handling
//! belongs to the upsert.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::gdp_multiplier;
use crate::types::{CountryFact, ExchangeRateTable, ReconciledCountry};

/// Source of the per-country estimated GDP multiplier.
pub trait MultiplierSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Uniform integer multiplier in `[gdp_multiplier::MIN, gdp_multiplier::MAX]`,
/// drawn independently for every country on every refresh.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomMultiplier;

impl MultiplierSource for RandomMultiplier {
    fn sample(&self) -> f64 {
        f64::from(rand::thread_rng().gen_range(gdp_multiplier::MIN..=gdp_multiplier::MAX))
    }
}

/// Always returns the same multiplier.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedMultiplier(pub f64);

#[cfg(test)]
impl MultiplierSource for FixedMultiplier {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// One output record per input fact, in input order.
pub fn reconcile(
    facts: &[CountryFact],
    rates: &ExchangeRateTable,
    refreshed_at: DateTime<Utc>,
    multiplier: &dyn MultiplierSource,
) -> Vec<ReconciledCountry> {
    facts
        .iter()
        .map(|fact| reconcile_one(fact, rates, refreshed_at, multiplier))
        .collect()
}

fn reconcile_one(
    fact: &CountryFact,
    rates: &ExchangeRateTable,
    refreshed_at: DateTime<Utc>,
    multiplier: &dyn MultiplierSource,
) -> ReconciledCountry {
    let (currency_code, exchange_rate, estimated_gdp) = match fact.first_currency() {
        // No currency at all: a known zero, not an unknown.
        None => (None, None, Some(0.0)),
        Some(currency) => {
            let code = currency.code.clone().filter(|c| !c.trim().is_empty());
            let rate = code.as_deref().and_then(|c| rates.rate_for(c));
            let gdp = rate.map(|r| fact.population as f64 * multiplier.sample() / r);
            (code, rate, gdp)
        }
    };

    ReconciledCountry {
        name: fact.name.clone(),
        capital: fact.capital.clone(),
        region: fact.region.clone(),
        population: fact.population,
        currency_code,
        exchange_rate,
        estimated_gdp,
        flag_url: fact.flag.clone(),
        last_refreshed_at: refreshed_at,
    }
}
