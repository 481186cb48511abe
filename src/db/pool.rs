use crate::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;
use std::time::Duration;

/// 按配置解析连接参数, 超过阈值的语句以 WARN 记录
fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, sqlx::Error> {
    let options = PgConnectOptions::from_str(&config.url)?
        .application_name("hostel-mess-billing")
        .log_slow_statements(
            tracing::log::LevelFilter::Warn,
            Duration::from_secs(config.slow_statement_secs),
        );
    Ok(options)
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
}

/// 创建账单库连接池
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let options = connect_options(config)?;
    let pool = pool_options(config).connect_with(options).await?;
    tracing::info!(
        "[MessBill] pool ready: max {} connections, acquire timeout {}s",
        config.max_connections,
        config.acquire_timeout_secs
    );
    Ok(pool)
}
