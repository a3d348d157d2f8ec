use std::time::Duration;

use url::Url;

use crate::{Error, Result, TradingMode};

pub const PRODUCTION_API_URL: &str = "https://api.pro.coinbase.com";
pub const SANDBOX_API_URL: &str = "https://api-public.sandbox.pro.coinbase.com";

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    pub api_url: Url,

    pub trading_mode: TradingMode,

    // Settlement polling
    pub settle_initial_wait: Duration,
    pub settle_retry_wait: Duration,
    pub settle_max_refetches: u32,

    // Logging
    pub log_file: String,

    // Paper exchange
    pub paper_balance: f64,
    pub paper_price: f64,
    pub paper_slippage_bps: f64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Credentials are only required in live mode.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match optional_env("TRADING_MODE")
            .unwrap_or_else(|| "live".to_string())
            .to_lowercase()
            .as_str()
        {
            "live" => TradingMode::Live,
            "paper" => TradingMode::Paper,
            other => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'live' or 'paper', got: '{other}'"
                )))
            }
        };

        let credential = |key: &str| -> Result<String> {
            match trading_mode {
                TradingMode::Live => required_env(key),
                TradingMode::Paper => Ok(optional_env(key).unwrap_or_default()),
            }
        };

        let sandbox = parse_env::<bool>("CBPRO_SANDBOX")?.unwrap_or(false);
        let api_url = optional_env("CBPRO_API_URL").unwrap_or_else(|| {
            if sandbox {
                SANDBOX_API_URL.to_string()
            } else {
                PRODUCTION_API_URL.to_string()
            }
        });
        let api_url = Url::parse(&api_url)
            .map_err(|e| Error::Config(format!("CBPRO_API_URL '{api_url}' is not a URL: {e}")))?;

        Ok(Config {
            api_key: credential("API_KEY")?,
            api_secret: credential("API_SECRET")?,
            api_passphrase: credential("API_PASSPHRASE")?,
            api_url,
            trading_mode,
            settle_initial_wait: Duration::from_secs(
                parse_env("SETTLE_INITIAL_WAIT_SECS")?.unwrap_or(5),
            ),
            settle_retry_wait: Duration::from_secs(
                parse_env("SETTLE_RETRY_WAIT_SECS")?.unwrap_or(30),
            ),
            settle_max_refetches: parse_env("SETTLE_MAX_REFETCHES")?.unwrap_or(1),
            log_file: optional_env("LOG_FILE")
                .unwrap_or_else(|| "cbpro_recurring_buy.log".to_string()),
            paper_balance: parse_env("PAPER_BALANCE")?.unwrap_or(10_000.0),
            paper_price: parse_env("PAPER_PRICE")?.unwrap_or(30_000.0),
            paper_slippage_bps: parse_env("PAPER_SLIPPAGE_BPS")?.unwrap_or(10.0),
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{key}='{raw}' is invalid: {e}")))
        })
        .transpose()
}
