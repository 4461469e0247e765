// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, default values and the [`LedgerConfig`]
//! loaded from them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the ledger database | `/data` |
//! | `LEDGER_DB_FILE` | Database file name inside `DATA_DIR` | `ledger.redb` |
//! | `OTP_TTL_SECS` | Lifetime of transfer OTPs | `300` |
//! | `RECONCILIATION_INTERVAL_SECS` | Delay between reconciliation sweeps | `30` |
//! | `FEE_SCHEDULE_PATH` | JSON fee table overriding the built-in one | unset |
//! | `EXCHANGE_RATES_PATH` | JSON exchange-rate table | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable name for the database file name.
pub const LEDGER_DB_FILE_ENV: &str = "LEDGER_DB_FILE";

pub const OTP_TTL_SECS_ENV: &str = "OTP_TTL_SECS";

pub const RECONCILIATION_INTERVAL_SECS_ENV: &str = "RECONCILIATION_INTERVAL_SECS";

pub const FEE_SCHEDULE_PATH_ENV: &str = "FEE_SCHEDULE_PATH";

pub const EXCHANGE_RATES_PATH_ENV: &str = "EXCHANGE_RATES_PATH";

/// `json` for structured logs, anything else for human-readable output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = "/data";

pub const DEFAULT_LEDGER_DB_FILE: &str = "ledger.redb";

pub const DEFAULT_OTP_TTL: Duration = Duration::from_secs(300);

pub const DEFAULT_RECONCILIATION_INTERVAL: Duration = Duration::from_secs(30);

/// Errors raised while loading configuration or config files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Settings the ledger process needs at startup.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
    pub db_file: String,
    pub otp_ttl: Duration,
    pub reconciliation_interval: Duration,
    pub fee_schedule_path: Option<PathBuf>,
    pub exchange_rates_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            db_file: DEFAULT_LEDGER_DB_FILE.to_string(),
            otp_ttl: DEFAULT_OTP_TTL,
            reconciliation_interval: DEFAULT_RECONCILIATION_INTERVAL,
            fee_schedule_path: None,
            exchange_rates_path: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl LedgerConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            data_dir: non_empty(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            db_file: non_empty(LEDGER_DB_FILE_ENV).unwrap_or(defaults.db_file),
            otp_ttl: parse_secs(OTP_TTL_SECS_ENV, non_empty(OTP_TTL_SECS_ENV))?
                .unwrap_or(defaults.otp_ttl),
            reconciliation_interval: parse_secs(
                RECONCILIATION_INTERVAL_SECS_ENV,
                non_empty(RECONCILIATION_INTERVAL_SECS_ENV),
            )?
            .unwrap_or(defaults.reconciliation_interval),
            fee_schedule_path: non_empty(FEE_SCHEDULE_PATH_ENV).map(PathBuf::from),
            exchange_rates_path: non_empty(EXCHANGE_RATES_PATH_ENV).map(PathBuf::from),
            log_format: match non_empty(LOG_FORMAT_ENV).as_deref() {
                Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        })
    }

    /// Full path of the ledger database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }
}

fn parse_secs(name: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<LedgerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LedgerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/data/ledger.redb"));
        assert_eq!(config.otp_ttl, Duration::from_secs(300));
        assert_eq!(config.reconciliation_interval, Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.fee_schedule_path.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("DATA_DIR", "/tmp/ledger"),
            ("LEDGER_DB_FILE", "test.redb"),
            ("OTP_TTL_SECS", "60"),
            ("LOG_FORMAT", "JSON"),
            ("FEE_SCHEDULE_PATH", "/etc/fees.json"),
        ])
        .unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/ledger/test.redb"));
        assert_eq!(config.otp_ttl, Duration::from_secs(60));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.fee_schedule_path, Some(PathBuf::from("/etc/fees.json")));
    }

    #[test]
    fn invalid_durations_are_rejected() {
        assert!(matches!(
            load(&[("OTP_TTL_SECS", "soon")]),
            Err(ConfigError::Invalid { name: "OTP_TTL_SECS", .. })
        ));
        assert!(load(&[("RECONCILIATION_INTERVAL_SECS", "0")]).is_err());
    }
}
