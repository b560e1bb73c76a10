use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_catalog_ttl")]
    pub catalog_ttl_seconds: u64,
    /// Prepended to every cache key; empty leaves keys bare.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl CacheConfig {
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            catalog_ttl_seconds: default_catalog_ttl(),
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }
fn default_catalog_ttl() -> u64 { 86_400 }
fn default_namespace() -> String { "marquee".into() }
fn default_filter() -> String { "marquee_store=info,marquee_core=info".into() }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `MARQUEE__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_toml(raw: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let config = from_toml(
            r#"
            [database]
            url = "postgres://localhost/marquee"

            [redis]
            url = "redis://127.0.0.1/"
            "#,
        );

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.acquire_timeout_seconds, 3);
        assert_eq!(config.cache.catalog_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.cache.namespace, "marquee");
        assert!(config.logging.filter.contains("marquee_core"));
    }

    #[test]
    fn test_explicit_values_win() {
        let config = from_toml(
            r#"
            [database]
            url = "postgres://db/marquee"
            max_connections = 20

            [redis]
            url = "redis://cache/"

            [cache]
            catalog_ttl_seconds = 60
            namespace = ""
            "#,
        );

        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.cache.catalog_ttl_seconds, 60);
        assert!(config.cache.namespace.is_empty());
    }

    #[test]
    fn test_missing_database_url_is_rejected() {
        let result = config::Config::builder()
            .add_source(File::from_str("[redis]\nurl = \"redis://x/\"", FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize::<Config>();
        assert!(result.is_err());
    }
}
