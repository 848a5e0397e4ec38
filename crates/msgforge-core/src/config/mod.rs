//! `PipelineConfig`: one sub-struct per concern, each with its own `from_env()`/
//! `validate()` pair, covering every key enumerated in spec §6's configuration surface.

pub mod env_utils;
pub mod error;

pub use error::{ConfigError, ConfigResult};

use crate::error::CircuitBreakerConfig as BreakerConfig;
use env_utils::EnvLoader;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub object_store: ObjectStoreConfig,
    pub budget: BudgetConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub bus: EventBusConfig,
    pub monitoring: MonitoringConfig,
}

impl PipelineConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            redis: RedisConfig::from_env()?,
            object_store: ObjectStoreConfig::from_env()?,
            budget: BudgetConfig::from_env()?,
            circuit_breaker: CircuitBreakerSettings::from_env()?,
            bus: EventBusConfig::from_env()?,
            monitoring: MonitoringConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.database.validate()?;
        self.redis.validate()?;
        self.object_store.validate()?;
        self.budget.validate()?;
        self.circuit_breaker.validate()?;
        self.bus.validate()?;
        self.monitoring.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// Shared-resource policy caps this at 25 per worker instance (§5).
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
}

impl DatabaseConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            url: EnvLoader::load_required("DATABASE_URL")?,
            max_connections: EnvLoader::load_with_default("DB_MAX_CONNECTIONS", 25)?,
            min_connections: EnvLoader::load_with_default("DB_MIN_CONNECTIONS", 2)?,
            connection_timeout: Duration::from_secs(EnvLoader::load_with_default("DB_CONNECT_TIMEOUT_SECS", 30)?),
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_connections == 0 || self.max_connections > 25 {
            return Err(ConfigError::ValidationFailed(
                "DB_MAX_CONNECTIONS must be in 1..=25 per the shared-resource policy".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationFailed("DB_MIN_CONNECTIONS must not exceed DB_MAX_CONNECTIONS".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Default 60s (§4.1) — entries pending longer than this are eligible for reclaim.
    pub claim_min_idle_seconds: u64,
    /// Default 5 (§4.1, §6).
    pub max_deliveries: u32,
    /// Bounded internal channel between a consumer's reader and processor (§5).
    pub consumer_channel_capacity: usize,
}

impl RedisConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            url: EnvLoader::load_required("REDIS_URL")?,
            claim_min_idle_seconds: EnvLoader::load_with_default("CLAIM_MIN_IDLE_SECONDS", 60)?,
            max_deliveries: EnvLoader::load_with_default("MAX_DELIVERIES", 5)?,
            consumer_channel_capacity: EnvLoader::load_with_default("CONSUMER_CHANNEL_CAPACITY", 64)?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_deliveries == 0 {
            return Err(ConfigError::ValidationFailed("MAX_DELIVERIES must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    /// Default per-tenant quota (§4.4, §6 `storage_quota_gb_per_tenant`).
    pub storage_quota_gb_per_tenant: f64,
}

impl ObjectStoreConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            bucket: EnvLoader::load_required("S3_BUCKET")?,
            region: EnvLoader::load_with_default("S3_REGION", "us-east-1".to_string())?,
            endpoint: EnvLoader::load_optional("S3_ENDPOINT")?,
            storage_quota_gb_per_tenant: EnvLoader::load_with_default("STORAGE_QUOTA_GB_PER_TENANT", 15.0)?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.storage_quota_gb_per_tenant <= 0.0 {
            return Err(ConfigError::ValidationFailed("STORAGE_QUOTA_GB_PER_TENANT must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub vision_enabled: bool,
    pub crawl_enabled: bool,
    pub max_daily_tokens_per_tenant: u64,
    pub rate_limit_domain_per_hour: u32,
    pub rate_limit_tenant_per_day: u32,
    pub retention_days: u32,
    pub assembly_ttl_seconds: i64,
}

impl BudgetConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            vision_enabled: EnvLoader::load_bool("VISION_ENABLED", true),
            crawl_enabled: EnvLoader::load_bool("CRAWL_ENABLED", true),
            max_daily_tokens_per_tenant: EnvLoader::load_with_default("MAX_DAILY_TOKENS_PER_TENANT", 1_000_000)?,
            rate_limit_domain_per_hour: EnvLoader::load_with_default("RATE_LIMIT_DOMAIN_PER_HOUR", 30)?,
            rate_limit_tenant_per_day: EnvLoader::load_with_default("RATE_LIMIT_TENANT_PER_DAY", 2000)?,
            retention_days: EnvLoader::load_with_default("RETENTION_DAYS", 90)?,
            assembly_ttl_seconds: EnvLoader::load_with_default("ASSEMBLY_TTL_SECONDS", 86_400)?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.assembly_ttl_seconds <= 0 {
            return Err(ConfigError::ValidationFailed("ASSEMBLY_TTL_SECONDS must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_seconds: u64,
}

impl CircuitBreakerSettings {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            failure_threshold: EnvLoader::load_with_default("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
            recovery_seconds: EnvLoader::load_with_default("CIRCUIT_BREAKER_RECOVERY_SECONDS", 60)?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationFailed("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be at least 1".into()));
        }
        Ok(())
    }

    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: 2,
            recovery: Duration::from_secs(self.recovery_seconds),
            window: Duration::from_secs(self.recovery_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    pub consumer_group_prefix: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl EventBusConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            consumer_group_prefix: EnvLoader::load_with_default("CONSUMER_GROUP_PREFIX", "msgforge".to_string())?,
            base_delay_ms: EnvLoader::load_with_default("PUBLISH_BASE_DELAY_MS", 100)?,
            max_delay_ms: EnvLoader::load_with_default("PUBLISH_MAX_DELAY_MS", 5_000)?,
            jitter_ratio: EnvLoader::load_with_default("PUBLISH_JITTER_RATIO", 0.2)?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.jitter_ratio < 0.0 || self.jitter_ratio > 1.0 {
            return Err(ConfigError::ValidationFailed("PUBLISH_JITTER_RATIO must be in 0.0..=1.0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub prometheus_enabled: bool,
    pub prometheus_port: u16,
}

impl MonitoringConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            log_level: EnvLoader::load_with_default("LOG_LEVEL", "info".to_string())?,
            prometheus_enabled: EnvLoader::load_bool("PROMETHEUS_ENABLED", true),
            prometheus_port: EnvLoader::load_with_default("PROMETHEUS_PORT", 9090)?,
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        const VALID: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !VALID.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "LOG_LEVEL must be one of {VALID:?}, got {}",
                self.log_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_config_rejects_pool_over_the_shared_resource_cap() {
        let cfg = DatabaseConfig { url: "postgres://x".into(), max_connections: 26, min_connections: 1, connection_timeout: Duration::from_secs(1) };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn monitoring_config_rejects_unknown_log_level() {
        let cfg = MonitoringConfig { log_level: "verbose".into(), prometheus_enabled: true, prometheus_port: 9090 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn circuit_breaker_settings_convert_to_breaker_config() {
        let settings = CircuitBreakerSettings { failure_threshold: 5, recovery_seconds: 60 };
        let breaker_cfg = settings.to_breaker_config();
        assert_eq!(breaker_cfg.failure_threshold, 5);
        assert_eq!(breaker_cfg.recovery, Duration::from_secs(60));
    }
}
