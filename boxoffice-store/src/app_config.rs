use boxoffice_shared::Masked;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub reservations: ReservationConfig,
    pub tickets: TicketConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    pub ttl_seconds: u64,
    /// Longest hold a client may ask for with `ttl_seconds` on a reservation.
    #[serde(default = "default_max_ttl_seconds")]
    pub max_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

fn default_max_ttl_seconds() -> u64 {
    3600
}

/// Hard ceiling on any configured hold duration.
const TTL_CEILING_SECONDS: u64 = 30 * 24 * 3600;

#[derive(Debug, Deserialize, Clone)]
pub struct TicketConfig {
    /// HMAC key for ticket codes. Rotating it invalidates every issued code.
    pub code_secret: Masked<String>,
    #[serde(default = "default_number_prefix")]
    pub number_prefix: String,
}

fn default_number_prefix() -> String {
    "BX".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, e.g. config/production.toml
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false));

        Self::build(builder)
    }

    /// Environment variables win over files: `BOXOFFICE__TICKETS__CODE_SECRET=...`
    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, config::ConfigError> {
        let config: Self = builder
            .add_source(config::Environment::with_prefix("BOXOFFICE").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        let r = &self.reservations;
        if r.max_ttl_seconds == 0 || r.max_ttl_seconds > TTL_CEILING_SECONDS {
            return Err(config::ConfigError::Message(format!(
                "reservations.max_ttl_seconds must be between 1 and {TTL_CEILING_SECONDS}, got {}",
                r.max_ttl_seconds
            )));
        }
        if r.ttl_seconds == 0 || r.ttl_seconds > r.max_ttl_seconds {
            return Err(config::ConfigError::Message(format!(
                "reservations.ttl_seconds must be between 1 and max_ttl_seconds ({}), got {}",
                r.max_ttl_seconds, r.ttl_seconds
            )));
        }
        Ok(())
    }

    // Both durations are bounded by `validate`, so the conversions cannot overflow.
    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservations.ttl_seconds as i64)
    }

    pub fn reservation_max_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservations.max_ttl_seconds as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.reservations.sweep_interval_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    #[test]
    fn test_shipped_defaults_parse() {
        let builder = config::Config::builder().add_source(File::from_str(
            include_str!("../../config/default.toml"),
            FileFormat::Toml,
        ));
        let config = Config::build(builder).unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.reservations.ttl_seconds > 0);
        assert_eq!(config.reservation_ttl().num_seconds() as u64, config.reservations.ttl_seconds);
        assert!(config.reservation_max_ttl() >= config.reservation_ttl());
        assert_eq!(format!("{:?}", config.tickets.code_secret), "********");
    }

    #[test]
    fn test_sweep_interval_is_never_zero() {
        let builder = config::Config::builder().add_source(File::from_str(
            r#"
            [server]
            port = 8080
            [storage]
            backend = "postgres"
            [database]
            url = "postgres://localhost/boxoffice"
            [reservations]
            ttl_seconds = 600
            sweep_interval_seconds = 0
            [tickets]
            code_secret = "s3cret"
            "#,
            FileFormat::Toml,
        ));
        let config = Config::build(builder).unwrap();

        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.tickets.number_prefix, "BX");
        assert_eq!(config.reservation_max_ttl(), chrono::Duration::hours(1));
    }

    fn with_reservations(section: &str) -> Result<Config, config::ConfigError> {
        let toml = format!(
            r#"
            [server]
            port = 8080
            [storage]
            backend = "memory"
            [database]
            url = "postgres://localhost/boxoffice"
            [reservations]
            {section}
            [tickets]
            code_secret = "s3cret"
            "#
        );
        Config::build(config::Config::builder().add_source(File::from_str(&toml, FileFormat::Toml)))
    }

    #[test]
    fn test_out_of_range_ttls_are_refused_at_load() {
        assert!(with_reservations("ttl_seconds = 0
sweep_interval_seconds = 5").is_err());
        assert!(with_reservations("ttl_seconds = 7200
sweep_interval_seconds = 5").is_err());
        assert!(with_reservations(
            "ttl_seconds = 600
max_ttl_seconds = 10000000000000
sweep_interval_seconds = 5"
        )
        .is_err());

        let config = with_reservations("ttl_seconds = 7200
max_ttl_seconds = 7200
sweep_interval_seconds = 5")
            .unwrap();
        assert_eq!(config.reservation_ttl(), chrono::Duration::hours(2));
    }
}
