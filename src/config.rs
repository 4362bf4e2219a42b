// 7.0 config.rs: all settings in one place. fee and coverage rates, loop cadence, stop-out schedule.
// 7.1 TradingParams is the only section the ledger math reads; the rest drives the background tasks.

use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{Amount, Bps};

pub const CONFIG_ENV: &str = "PAPERTRADE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Complete configuration for the engine and its background tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub trading: TradingParams,
    #[serde(default)]
    pub valuation: ValuationConfig,
    #[serde(default)]
    pub stop_out: StopOutConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `$PAPERTRADE_CONFIG` or the default path, falling back to
    /// built-in defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&path).exists() {
            Self::from_file(&path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading.fee_bps >= 10_000 {
            return Err(ConfigError::Invalid {
                field: "trading.fee_bps",
                reason: format!("{} bps is 100% or more", self.trading.fee_bps),
            });
        }
        if self.trading.coverage_bps == 0 || self.trading.coverage_bps > 10_000 {
            return Err(ConfigError::Invalid {
                field: "trading.coverage_bps",
                reason: format!("{} bps is outside (0, 10000]", self.trading.coverage_bps),
            });
        }
        if self.trading.starting_balance < Decimal::ZERO || self.trading.daily_reward < Decimal::ZERO {
            return Err(ConfigError::Invalid {
                field: "trading",
                reason: "balances and rewards must not be negative".to_string(),
            });
        }
        if self.valuation.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "valuation.interval_secs",
                reason: "interval must be positive".to_string(),
            });
        }
        if self.stop_out.max_liquidations_per_account == 0 {
            return Err(ConfigError::Invalid {
                field: "stop_out.max_liquidations_per_account",
                reason: "at least one liquidation per account is required".to_string(),
            });
        }
        self.stop_out.run_time()?;
        Ok(())
    }
}

/** 7.2: fee and coverage settings. 30 bps = 0.3% fee, 5000 bps = 50% coverage on shorts */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingParams {
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u32,
    #[serde(default = "default_coverage_bps")]
    pub coverage_bps: u32,
    // cash a new account starts with
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    #[serde(default = "default_daily_reward")]
    pub daily_reward: Decimal,
}

fn default_fee_bps() -> u32 {
    30
}

fn default_coverage_bps() -> u32 {
    5000
}

fn default_starting_balance() -> Decimal {
    dec!(10000)
}

fn default_daily_reward() -> Decimal {
    dec!(100)
}

impl Default for TradingParams {
    fn default() -> Self {
        Self {
            fee_bps: default_fee_bps(),
            coverage_bps: default_coverage_bps(),
            starting_balance: default_starting_balance(),
            daily_reward: default_daily_reward(),
        }
    }
}

impl TradingParams {
    pub fn fee_rate(&self) -> Decimal {
        Bps::new(self.fee_bps).as_fraction()
    }

    pub fn coverage_rate(&self) -> Decimal {
        Bps::new(self.coverage_bps).as_fraction()
    }

    pub fn starting_balance(&self) -> Amount {
        Amount::new(self.starting_balance)
    }

    pub fn daily_reward(&self) -> Amount {
        Amount::new(self.daily_reward)
    }
}

/// Valuation and ranking loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Per-ticker quote fetch timeout.
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_quote_timeout_ms() -> u64 {
    5_000
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            quote_timeout_ms: default_quote_timeout_ms(),
        }
    }
}

impl ValuationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }
}

/// Daily stop-out schedule. `at` is a local wall-clock time in `time_zone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopOutConfig {
    #[serde(default = "default_stop_out_at")]
    pub at: String,
    #[serde(default = "default_time_zone")]
    pub time_zone: Tz,
    // bound on forced buy-backs per account per run
    #[serde(default = "default_max_liquidations")]
    pub max_liquidations_per_account: u32,
}

fn default_stop_out_at() -> String {
    "10:00".to_string()
}

fn default_time_zone() -> Tz {
    chrono_tz::Europe::Moscow
}

fn default_max_liquidations() -> u32 {
    16
}

impl Default for StopOutConfig {
    fn default() -> Self {
        Self {
            at: default_stop_out_at(),
            time_zone: default_time_zone(),
            max_liquidations_per_account: default_max_liquidations(),
        }
    }
}

impl StopOutConfig {
    pub fn run_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.at, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&self.at, "%H:%M:%S"))
            .map_err(|e| ConfigError::Invalid {
                field: "stop_out.at",
                reason: format!("{:?} is not HH:MM ({e})", self.at),
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a trade waits for a position row lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_rates() {
        let config = AppConfig::default();
        assert_eq!(config.trading.fee_rate(), dec!(0.003));
        assert_eq!(config.trading.coverage_rate(), dec!(0.5));
        assert_eq!(config.valuation.interval(), Duration::from_secs(60));
        assert_eq!(config.stop_out.time_zone, chrono_tz::Europe::Moscow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [trading]
            fee_bps = 10
            starting_balance = 500

            [stop_out]
            at = "18:45"
            time_zone = "America/New_York"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.trading.fee_rate(), dec!(0.001));
        assert_eq!(config.trading.coverage_rate(), dec!(0.5));
        assert_eq!(config.trading.starting_balance, dec!(500));
        assert_eq!(config.stop_out.run_time().unwrap(), NaiveTime::from_hms_opt(18, 45, 0).unwrap());
        assert_eq!(config.stop_out.time_zone, chrono_tz::America::New_York);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn shipped_default_file_matches_builtin_defaults() {
        let config = AppConfig::from_toml(include_str!("../config/default.toml")).unwrap();
        let builtin = AppConfig::default();

        assert_eq!(config.trading.fee_bps, builtin.trading.fee_bps);
        assert_eq!(config.trading.starting_balance, builtin.trading.starting_balance);
        assert_eq!(config.stop_out.at, builtin.stop_out.at);
        assert_eq!(config.stop_out.time_zone, builtin.stop_out.time_zone);
        assert_eq!(config.store.lock_timeout_ms, builtin.store.lock_timeout_ms);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn rejects_bad_stop_out_time() {
        let result = AppConfig::from_toml("[stop_out]\nat = \"25:99\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "stop_out.at", .. })));
    }

    #[test]
    fn rejects_zero_coverage() {
        let result = AppConfig::from_toml("[trading]\ncoverage_bps = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "trading.coverage_bps", .. })));
    }

    #[test]
    fn rejects_zero_interval() {
        let result = AppConfig::from_toml("[valuation]\ninterval_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "valuation.interval_secs", .. })));
    }

    #[test]
    fn unknown_time_zone_is_a_parse_error() {
        let result = AppConfig::from_toml("[stop_out]\ntime_zone = \"Mars/Olympus\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
