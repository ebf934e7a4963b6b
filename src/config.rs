use crate::domain::commission::CommissionSettings;
use crate::domain::ports::CompanyConfig;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;

/// Top-level configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub log_level: String,
    /// Maximum execution time for list/aggregation reads.
    pub read_timeout: Duration,
    /// Company configuration used when the directory has nothing more specific.
    pub company_defaults: CompanyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            company_defaults: CompanyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the environment (and a `.env` file when present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CommissionSettings::default();
        let log_level = lookup("LEDGER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let read_timeout_ms: u64 =
            parse_var(&lookup, "LEDGER_READ_TIMEOUT_MS")?.unwrap_or(DEFAULT_READ_TIMEOUT_MS);

        let prea = parse_var(&lookup, "LEDGER_PREA_PERCENT_OF_TOTAL")?
            .unwrap_or(defaults.prea_percent_of_total);
        let agent = parse_var(&lookup, "LEDGER_AGENT_PERCENT_OF_REMAINING")?
            .unwrap_or(defaults.agent_percent_of_remaining);
        let agency = parse_var(&lookup, "LEDGER_AGENCY_PERCENT_OF_REMAINING")?
            .unwrap_or(Decimal::ONE - agent);
        let vat = parse_var(&lookup, "LEDGER_VAT_ON_COMMISSION_RATE")?
            .unwrap_or(defaults.vat_on_commission_rate);
        for (name, value) in [
            ("LEDGER_PREA_PERCENT_OF_TOTAL", prea),
            ("LEDGER_AGENT_PERCENT_OF_REMAINING", agent),
            ("LEDGER_AGENCY_PERCENT_OF_REMAINING", agency),
            ("LEDGER_VAT_ON_COMMISSION_RATE", vat),
        ] {
            if !(Decimal::ZERO..=Decimal::ONE).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }

        let commission = CommissionSettings {
            prea_percent_of_total: prea,
            agent_percent_of_remaining: agent,
            agency_percent_of_remaining: agency,
            vat_on_commission_rate: vat,
            default_rental_commission_percent: parse_var(
                &lookup,
                "LEDGER_DEFAULT_RENTAL_COMMISSION_PERCENT",
            )?
            .unwrap_or(defaults.default_rental_commission_percent),
            default_sale_commission_percent: parse_var(
                &lookup,
                "LEDGER_DEFAULT_SALE_COMMISSION_PERCENT",
            )?
            .unwrap_or(defaults.default_sale_commission_percent),
        };

        let accounting_lock_date = lookup("LEDGER_LOCK_DATE")
            .filter(|v| !v.trim().is_empty())
            .map(|v| {
                NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").map_err(|_| ConfigError::Invalid {
                    name: "LEDGER_LOCK_DATE",
                    value: v.clone(),
                })
            })
            .transpose()?;

        Ok(Self {
            log_level,
            read_timeout: Duration::from_millis(read_timeout_ms),
            company_defaults: CompanyConfig {
                commission,
                accounting_lock_date,
            },
        })
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(None),
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("{name} must be between 0 and 1, got {value}")]
    OutOfRange { name: &'static str, value: Decimal },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.read_timeout, Duration::from_millis(5_000));
        assert_eq!(
            config.company_defaults.commission,
            CommissionSettings::default()
        );
        assert!(config.company_defaults.accounting_lock_date.is_none());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("LEDGER_AGENT_PERCENT_OF_REMAINING", "0.7"),
            ("LEDGER_LOCK_DATE", "2025-01-31"),
            ("LEDGER_READ_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        let commission = &config.company_defaults.commission;
        assert_eq!(commission.agent_percent_of_remaining, dec!(0.7));
        assert_eq!(commission.agency_percent_of_remaining, dec!(0.3));
        assert_eq!(
            config.company_defaults.accounting_lock_date,
            NaiveDate::from_ymd_opt(2025, 1, 31)
        );
        assert_eq!(config.read_timeout, Duration::from_millis(250));

        let config = EngineConfig::from_lookup(lookup(&[
            ("LEDGER_AGENT_PERCENT_OF_REMAINING", "0.5"),
            ("LEDGER_AGENCY_PERCENT_OF_REMAINING", "0.3"),
        ]))
        .unwrap();
        assert_eq!(
            config.company_defaults.commission.agency_percent_of_remaining,
            dec!(0.3)
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("LEDGER_READ_TIMEOUT_MS", "soon")])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("LEDGER_PREA_PERCENT_OF_TOTAL", "3")])),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
