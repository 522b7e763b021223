use crate::infrastructure::backoff_connector::ConnectionConfig;
use crate::infrastructure::connection_pool::PoolLimits;
use std::str::FromStr;
use std::time::Duration;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must not be empty")]
    Empty { key: &'static str },
    #[error("{key}={value:?} is not a valid {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // Service identity
    pub service_name: String,
    pub environment: String,
    pub log_level: String,
    pub debug: bool,

    // HTTP server
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,

    // Database
    pub db_path: String,
    pub db_max_retries: u32,
    pub db_retry_delay: Duration,
    pub db_max_idle_conns: usize,
    pub db_max_open_conns: usize,
    pub db_conn_max_lifetime: Duration,

    // Health
    pub health_check_timeout: Duration,
    pub memory_limit_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "boiler-api".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            debug: false,
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            db_path: "boiler.db".to_string(),
            db_max_retries: 5,
            db_retry_delay: Duration::from_millis(5000),
            db_max_idle_conns: 10,
            db_max_open_conns: 100,
            db_conn_max_lifetime: Duration::from_secs(3600),
            health_check_timeout: Duration::from_secs(30),
            memory_limit_mb: 512,
        }
    }
}

impl Config {
    /// Build a config from any key lookup (the process environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let service_name = lookup("SERVICE_NAME")
            .or_else(|| lookup("SERVER_NAME"))
            .unwrap_or(defaults.service_name);
        let environment = lookup("ENVIRONMENT").unwrap_or(defaults.environment);
        let log_level = lookup("LOG_LEVEL")
            .map(|v| v.to_lowercase())
            .unwrap_or(defaults.log_level);
        let debug = lookup("DEBUG").is_some();

        let host = lookup("SERVER_HOST").unwrap_or(defaults.host);
        let port = parse_var(&lookup, "SERVER_PORT", defaults.port, "port number")?;
        let request_timeout = secs_var(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout)?;
        let shutdown_timeout =
            secs_var(&lookup, "SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout)?;

        let db_path = lookup("DB_PATH").unwrap_or(defaults.db_path);
        let db_max_retries = parse_var(&lookup, "DB_MAX_RETRIES", defaults.db_max_retries, "count")?;
        let db_retry_delay = Duration::from_millis(parse_var(
            &lookup,
            "DB_RETRY_DELAY_MS",
            defaults.db_retry_delay.as_millis() as u64,
            "number of milliseconds",
        )?);
        let db_max_idle_conns =
            parse_var(&lookup, "DB_MAX_IDLE_CONNS", defaults.db_max_idle_conns, "count")?;
        let db_max_open_conns =
            parse_var(&lookup, "DB_MAX_OPEN_CONNS", defaults.db_max_open_conns, "count")?;
        let db_conn_max_lifetime = secs_var(
            &lookup,
            "DB_CONN_MAX_LIFETIME_SECS",
            defaults.db_conn_max_lifetime,
        )?;

        let health_check_timeout = secs_var(
            &lookup,
            "HEALTH_CHECK_TIMEOUT_SECS",
            defaults.health_check_timeout,
        )?;
        let memory_limit_mb =
            parse_var(&lookup, "MEMORY_LIMIT_MB", defaults.memory_limit_mb, "size in MiB")?;

        let config = Config {
            service_name,
            environment,
            log_level,
            debug,
            host,
            port,
            request_timeout,
            shutdown_timeout,
            db_path,
            db_max_retries,
            db_retry_delay,
            db_max_idle_conns,
            db_max_open_conns,
            db_conn_max_lifetime,
            health_check_timeout,
            memory_limit_mb,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Empty { key: "SERVICE_NAME" });
        }
        if self.db_path.trim().is_empty() {
            return Err(ConfigError::Empty { key: "DB_PATH" });
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid {
                key: "LOG_LEVEL",
                value: self.log_level.clone(),
                expected: "log level",
            });
        }
        if self.db_max_retries == 0 {
            return Err(ConfigError::Zero { key: "DB_MAX_RETRIES" });
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::Zero {
                key: "SHUTDOWN_TIMEOUT_SECS",
            });
        }
        if self.health_check_timeout.is_zero() {
            return Err(ConfigError::Zero {
                key: "HEALTH_CHECK_TIMEOUT_SECS",
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero {
                key: "REQUEST_TIMEOUT_SECS",
            });
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Effective log level; `DEBUG` overrides `LOG_LEVEL`.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_retries: self.db_max_retries,
            retry_delay: self.db_retry_delay,
            limits: PoolLimits {
                max_idle: self.db_max_idle_conns,
                max_open: self.db_max_open_conns,
                max_lifetime: self.db_conn_max_lifetime,
            },
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected,
        }),
    }
}

fn secs_var<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, key, default.as_secs(), "number of seconds").map(Duration::from_secs)
}

pub fn load_config() -> Result<Config, ConfigError> {
    Config::from_lookup(|key| std::env::var(key).ok())
}
