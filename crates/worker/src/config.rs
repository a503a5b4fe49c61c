use std::time::Duration;

/// Invalid or missing worker configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Worker daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Logical queue paths, each resolved with `Queue::new`.
    pub queue_paths: Vec<String>,
    /// Period of the sweep trigger. `None` disables sweeping.
    pub sweep_interval: Option<Duration>,
    pub db_max_connections: u32,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default     |
    /// |-----------------------|-------------|
    /// | `DATABASE_URL`        | (required)  |
    /// | `QUEUE_PATHS`         | (required)  |
    /// | `SWEEP_INTERVAL_SECS` | `300`       |
    /// | `DB_MAX_CONNECTIONS`  | `10`        |
    ///
    /// `SWEEP_INTERVAL_SECS=0` disables the sweep trigger.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let queue_paths: Vec<String> = lookup("QUEUE_PATHS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if queue_paths.is_empty() {
            return Err(ConfigError::Missing("QUEUE_PATHS"));
        }

        let sweep_secs: u64 = parse_or(&lookup, "SWEEP_INTERVAL_SECS", 300)?;
        let sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        let db_max_connections: u32 = parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?;

        Ok(Self {
            database_url,
            queue_paths,
            sweep_interval,
            db_max_connections,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
