//! Environment-driven configuration, in the style of a `clap::Parser` with
//! `env` attributes rather than hand-rolled `std::env::var` plumbing.
//!
//! Every field maps to one of the environment variables listed in this
//! service's external-interfaces documentation; defaults match those
//! documented there.

use clap::Parser;
use factorial_types::{clamp_max_factorial, DEFAULT_CACHE_THRESHOLD, DEFAULT_MAX_FACTORIAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lower")]
pub enum StorageType {
    Local,
    S3,
}

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Incremental factorial calculation service")]
pub struct AppConfig {
    #[arg(long, env = "SERVER_PORT", default_value = ":8080")]
    pub server_port: String,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,
    #[arg(long, env = "DB_PORT", default_value = "5432")]
    pub db_port: u16,
    #[arg(long, env = "DB_USER", default_value = "postgres")]
    pub db_user: String,
    #[arg(long, env = "DB_PASSWORD", default_value = "")]
    pub db_password: String,
    #[arg(long, env = "DB_NAME", default_value = "factorial")]
    pub db_name: String,
    #[arg(long, env = "DB_SSLMODE", default_value = "disable")]
    pub db_sslmode: String,

    #[arg(long, env = "RABBITMQ_HOST", default_value = "localhost")]
    pub rabbitmq_host: String,
    #[arg(long, env = "RABBITMQ_PORT", default_value = "5672")]
    pub rabbitmq_port: u16,
    #[arg(long, env = "RABBITMQ_USER", default_value = "guest")]
    pub rabbitmq_user: String,
    #[arg(long, env = "RABBITMQ_PASSWORD", default_value = "guest")]
    pub rabbitmq_password: String,
    #[arg(long, env = "RABBITMQ_CA")]
    pub rabbitmq_ca: Option<String>,
    #[arg(
        long,
        env = "FACTORIAL_CAL_SERVICES_QUEUE_NAME",
        default_value = "factorial-calculations"
    )]
    pub queue_name: String,

    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: String,
    #[arg(long, env = "REDIS_PORT", default_value = "6379")]
    pub redis_port: u16,
    #[arg(long, env = "REDIS_PASSWORD", default_value = "")]
    pub redis_password: String,
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub redis_db: i64,
    #[arg(long, env = "REDIS_THRESHOLD", default_value_t = DEFAULT_CACHE_THRESHOLD)]
    pub redis_threshold: u64,

    #[arg(long, env = "STORAGE_TYPE", value_enum, default_value = "local")]
    pub storage_type: StorageType,
    #[arg(long, env = "S3_BUCKET_NAME", default_value = "")]
    pub s3_bucket_name: String,
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub aws_region: String,
    #[arg(long, env = "LOCAL_STORAGE_PATH", default_value = "/tmp/factorial-storage")]
    pub local_storage_path: String,

    #[arg(long, env = "MAX_FACTORIAL", default_value_t = DEFAULT_MAX_FACTORIAL)]
    pub max_factorial: u64,
    #[arg(long, env = "WORKER_BATCH_SIZE", default_value_t = 100)]
    pub worker_batch_size: usize,
    #[arg(long, env = "WORKER_MAX_BATCHES", default_value_t = 16)]
    pub worker_max_batches: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("S3_BUCKET_NAME must be set when STORAGE_TYPE=s3")]
    MissingS3Bucket,
    #[error("WORKER_BATCH_SIZE must be greater than zero")]
    ZeroBatchSize,
    #[error("WORKER_MAX_BATCHES must be greater than zero")]
    ZeroMaxBatches,
}

impl AppConfig {
    /// Loads configuration from CLI args / environment variables, clamping
    /// `max_factorial` to the hard cap but otherwise taking values as given.
    pub fn load() -> Self {
        let mut cfg = AppConfig::parse();
        cfg.max_factorial = clamp_max_factorial(cfg.max_factorial);
        cfg
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.storage_type, StorageType::S3) && self.s3_bucket_name.is_empty() {
            return Err(ConfigError::MissingS3Bucket);
        }
        if self.worker_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.worker_max_batches == 0 {
            return Err(ConfigError::ZeroMaxBatches);
        }
        Ok(())
    }

    pub fn db_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode={}",
            self.db_host, self.db_port, self.db_user, self.db_password, self.db_name, self.db_sslmode
        )
    }

    pub fn rabbitmq_url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}",
            self.rabbitmq_user, self.rabbitmq_password, self.rabbitmq_host, self.rabbitmq_port
        )
    }

    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.redis_password, self.redis_host, self.redis_port, self.redis_db
            )
        }
    }

    /// The port actix-web should bind, parsed out of `SERVER_PORT` (which may
    /// carry the Go-style leading colon, e.g. `:8080`).
    pub fn bind_port(&self) -> u16 {
        self.server_port
            .trim_start_matches(':')
            .parse()
            .unwrap_or(8080)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::parse_from(["factorial-service"])
    }

    #[test]
    fn defaults_are_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn s3_storage_requires_bucket() {
        let mut cfg = base_config();
        cfg.storage_type = StorageType::S3;
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingS3Bucket)));
        cfg.s3_bucket_name = "bucket".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bind_port_strips_leading_colon() {
        let mut cfg = base_config();
        cfg.server_port = ":9090".to_string();
        assert_eq!(cfg.bind_port(), 9090);
    }

    #[test]
    fn max_factorial_is_clamped_on_load() {
        assert_eq!(clamp_max_factorial(999_999), factorial_types::HARD_MAX_FACTORIAL);
    }
}
