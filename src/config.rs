use std::{env, net::IpAddr, path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("expected {0} as an environment variable")]
    Missing(&'static str),
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongodb_url: String,
    pub database_name: String,
    pub port: u16,
    pub admin_password: String,
    pub admin_email: String,
    pub public_dir: PathBuf,
    pub access_log_path: PathBuf,
    pub redis_url: Option<String>,
    pub rate_limit_max: u64,
    pub rate_limit_window: Duration,
    pub blocked_ips: Vec<IpAddr>,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let blocked_ips = lookup("BLOCKED_IPS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(|ip| {
                ip.parse::<IpAddr>().map_err(|_| ConfigError::Invalid {
                    key: "BLOCKED_IPS",
                    value: ip.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            mongodb_url: required("MONGO_URI")?,
            database_name: or_default("MONGODB_DATABASE", "api-database"),
            port: parse("APP_PORT", &required("APP_PORT")?)?,
            admin_password: required("ADMIN_API_PASSWORD")?,
            admin_email: or_default("ADMIN_EMAIL", "admin@localhost"),
            public_dir: or_default("PUBLIC_DIR", "public").into(),
            access_log_path: or_default("ACCESS_LOG_PATH", "access.log").into(),
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            rate_limit_max: parse("RATE_LIMIT_MAX", &or_default("RATE_LIMIT_MAX", "100"))?,
            rate_limit_window: Duration::from_secs(parse(
                "RATE_LIMIT_WINDOW_SECS",
                &or_default("RATE_LIMIT_WINDOW_SECS", "30"),
            )?),
            blocked_ips,
        })
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_owned(),
    })
}
