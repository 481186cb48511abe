use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub billing: BillingConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// 等待空闲连接的上限 (秒)
    pub acquire_timeout_secs: u64,
    /// 慢查询日志阈值 (秒)
    pub slow_statement_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

/// 计费核心参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// 批量操作同时在途的单条请求数
    pub bulk_concurrency: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            bulk_concurrency: 8,
            default_page_size: 20,
            max_page_size: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/hostel_mess".to_string(),
                max_connections: 10,
                acquire_timeout_secs: 10,
                slow_statement_secs: 2,
            },
            storage: StorageConfig {
                backend: StorageBackend::Postgres,
            },
            billing: BillingConfig::default(),
            log: LogConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 加载配置: 默认值 -> mess-billing.toml (可选) -> MESS__* 环境变量
    ///
    /// `DATABASE_URL` 仍然可用, 优先级最高。
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();
        let mut builder = Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", i64::from(defaults.server.port))?
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", i64::from(defaults.database.max_connections))?
            .set_default("database.acquire_timeout_secs", defaults.database.acquire_timeout_secs as i64)?
            .set_default("database.slow_statement_secs", defaults.database.slow_statement_secs as i64)?
            .set_default("storage.backend", "postgres")?
            .set_default("billing.bulk_concurrency", defaults.billing.bulk_concurrency as i64)?
            .set_default("billing.default_page_size", defaults.billing.default_page_size as i64)?
            .set_default("billing.max_page_size", defaults.billing.max_page_size as i64)?
            .set_default("log.level", defaults.log.level)?
            .add_source(File::with_name("mess-billing").required(false))
            .add_source(Environment::with_prefix("MESS").separator("__").try_parsing(true));

        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", url)?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("database.max_connections must be positive".to_string()));
        }
        let b = &self.billing;
        if b.bulk_concurrency == 0 {
            return Err(ConfigError::Message("billing.bulk_concurrency must be positive".to_string()));
        }
        if b.default_page_size == 0 || b.default_page_size > b.max_page_size {
            return Err(ConfigError::Message(
                "billing.default_page_size must be in 1..=billing.max_page_size".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = AppConfig::default();
        config.billing.bulk_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_pool_is_rejected() {
        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn storage_backend_reads_lowercase() {
        let backend: StorageBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, StorageBackend::Memory);
    }
}
