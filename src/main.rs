use hostel_mess_billing::config::StorageBackend;
use hostel_mess_billing::{api, create_pool, AppConfig, MemoryStore, MessBillingService, MessStore, PgMessStore};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载配置
    let config = AppConfig::load()?;

    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();

    info!("Starting server with config: {:?}", config);

    // 创建存储
    let store: Arc<dyn MessStore> = match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database).await?;
            Arc::new(PgMessStore::new(pool))
        }
        StorageBackend::Memory => {
            info!("Using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let service = Arc::new(MessBillingService::new(store, config.billing.clone()));

    let app = api::router(service).layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/mess/monthly          - confirm monthly cost calculation");
    info!("  POST /api/mess/bills/generate   - generate bills for a slice");
    info!("  POST /api/mess/bills/bulk       - bulk verify / show-hide / send");
    info!("  POST /api/mess/publish          - publish fully verified slices");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
