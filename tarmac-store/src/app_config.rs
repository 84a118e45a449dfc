use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Exposes the table-reset endpoint. Test deployments only.
    #[serde(default)]
    pub enable_admin: bool,
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub isolation_level: IsolationLevel,
}

fn default_session_idle() -> u64 { 1800 }

fn default_max_connections() -> u32 { 5 }

fn default_acquire_timeout() -> u64 { 3 }

/// Isolation level every unit runs at. Anything weaker than `Serializable`
/// gives up the no-oversell and same-day guarantees under concurrency.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    Serializable,
    RepeatableRead,
    ReadCommitted,
}

impl IsolationLevel {
    pub fn set_transaction_sql(self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Untracked local overrides
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `TARMAC__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("TARMAC").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_database_defaults() {
        let cfg = from_toml(
            r#"
            [server]
            port = 3000
            [database]
            url = "postgres://localhost/tarmac"
            "#,
        );
        assert_eq!(cfg.server.port, 3000);
        assert!(!cfg.server.enable_admin);
        assert_eq!(cfg.server.session_idle_secs, 1800);
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.database.acquire_timeout_secs, 3);
        assert_eq!(cfg.database.isolation_level, IsolationLevel::Serializable);
    }

    #[test]
    fn test_isolation_level_parses_snake_case() {
        let cfg = from_toml(
            r#"
            [server]
            port = 3000
            [database]
            url = "postgres://localhost/tarmac"
            isolation_level = "repeatable_read"
            "#,
        );
        assert_eq!(cfg.database.isolation_level, IsolationLevel::RepeatableRead);
        assert_eq!(
            cfg.database.isolation_level.set_transaction_sql(),
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"
        );
    }

    #[test]
    fn test_admin_endpoint_opt_in() {
        let cfg = from_toml(
            r#"
            [server]
            port = 3000
            enable_admin = true
            session_idle_secs = 60
            [database]
            url = "postgres://localhost/tarmac"
            "#,
        );
        assert!(cfg.server.enable_admin);
        assert_eq!(cfg.server.session_idle_secs, 60);
    }
}
