use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub frontend_origin: String,
    pub webhook_secret: String,
    pub worker_poll_interval: Duration,
    pub schedule_check_interval: Duration,
    pub run_retention_days: i32,
    pub rate_limit_ms: u64,
    pub rate_limit_burst: u32,
    pub http_action_timeout: Duration,
    pub is_production: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file

        Self::from_vars(|name| env::var(name).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        fn parsed<T: FromStr>(
            name: &'static str,
            raw: Option<String>,
            default: T,
        ) -> Result<T, ConfigError> {
            match raw {
                Some(value) => value
                    .parse::<T>()
                    .map_err(|_| ConfigError::Invalid { name, value }),
                None => Ok(default),
            }
        }

        let is_production = var("ENV").is_some_and(|v| v.eq_ignore_ascii_case("production"));

        let webhook_secret = match var("WEBHOOK_SECRET") {
            Some(secret) => secret,
            None if is_production => {
                return Err(ConfigError::Missing {
                    name: "WEBHOOK_SECRET",
                })
            }
            None => "dev-secret".to_string(),
        };

        let bind_addr = parsed(
            "BIND_ADDR",
            var("BIND_ADDR"),
            SocketAddr::from(([127, 0, 0, 1], 3000)),
        )?;

        let worker_poll_ms: u64 = parsed(
            "WORKER_POLL_INTERVAL_MS",
            var("WORKER_POLL_INTERVAL_MS"),
            750,
        )?;
        let schedule_secs: u64 = parsed(
            "SCHEDULE_CHECK_INTERVAL_SECS",
            var("SCHEDULE_CHECK_INTERVAL_SECS"),
            5,
        )?;
        let http_timeout_secs: u64 = parsed(
            "HTTP_ACTION_TIMEOUT_SECS",
            var("HTTP_ACTION_TIMEOUT_SECS"),
            30,
        )?;

        let run_retention_days: i32 =
            parsed("RUN_RETENTION_DAYS", var("RUN_RETENTION_DAYS"), 30)?;
        if run_retention_days < 1 {
            return Err(ConfigError::Invalid {
                name: "RUN_RETENTION_DAYS",
                value: run_retention_days.to_string(),
            });
        }

        let rate_limit_burst: u32 =
            parsed("RATE_LIMITER_BURST", var("RATE_LIMITER_BURST"), 20)?;
        if rate_limit_burst == 0 {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMITER_BURST",
                value: "0".into(),
            });
        }

        Ok(Config {
            database_url: var("DATABASE_URL"),
            bind_addr,
            frontend_origin: var("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            webhook_secret,
            worker_poll_interval: Duration::from_millis(worker_poll_ms.max(10)),
            schedule_check_interval: Duration::from_secs(schedule_secs.max(1)),
            run_retention_days,
            rate_limit_ms: parsed(
                "RATE_LIMITER_MILLISECONDS",
                var("RATE_LIMITER_MILLISECONDS"),
                200,
            )?,
            rate_limit_burst,
            http_action_timeout: Duration::from_secs(http_timeout_secs.max(1)),
            is_production,
        })
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            frontend_origin: "http://localhost:5173".into(),
            webhook_secret: "test-secret".into(),
            worker_poll_interval: Duration::from_millis(10),
            schedule_check_interval: Duration::from_secs(1),
            run_retention_days: 30,
            rate_limit_ms: 200,
            rate_limit_burst: 20,
            http_action_timeout: Duration::from_secs(5),
            is_production: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.webhook_secret, "dev-secret");
        assert_eq!(config.worker_poll_interval, Duration::from_millis(750));
        assert_eq!(config.schedule_check_interval, Duration::from_secs(5));
        assert_eq!(config.run_retention_days, 30);
        assert_eq!(config.rate_limit_burst, 20);
        assert!(!config.is_production);
    }

    #[test]
    fn production_requires_webhook_secret() {
        let err = config_from(&[("ENV", "production")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                name: "WEBHOOK_SECRET"
            }
        ));

        let config = config_from(&[("ENV", "production"), ("WEBHOOK_SECRET", "s3cr3t")]).unwrap();
        assert!(config.is_production);
        assert_eq!(config.webhook_secret, "s3cr3t");
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = config_from(&[("WORKER_POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "WORKER_POLL_INTERVAL_MS",
                ..
            }
        ));
        assert!(config_from(&[("RUN_RETENTION_DAYS", "0")]).is_err());
        assert!(config_from(&[("BIND_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = config_from(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(config.database_url.is_none());
    }
}
