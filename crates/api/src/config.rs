/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Connection pool size (default: `10`).
    pub db_max_connections: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default   |
    /// |------------------------|-----------|
    /// | `HOST`                 | `0.0.0.0` |
    /// | `PORT`                 | `3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`      |
    /// | `DB_MAX_CONNECTIONS`   | `10`      |
    ///
    /// `DATABASE_URL` is read separately by the binary.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let db_max_connections: u32 = std::env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("DB_MAX_CONNECTIONS must be a valid u32");

        Self {
            host,
            port,
            request_timeout_secs,
            db_max_connections,
        }
    }
}
