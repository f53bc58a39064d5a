use quote_normalizer::api::{build_router, AppState};
use quote_normalizer::service::{HttpExtractionClient, LocalObjectStorage, Pipeline};
use quote_normalizer::{create_pool, AppConfig, MemoryStore, PgStore, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config.redacted());

    // 存储: 配置了数据库时使用 Postgres, 否则使用内存存储
    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => {
            let pool = create_pool(url, &config.database).await?;
            info!("Database pool created");
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("No database configured, using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    let storage = Arc::new(LocalObjectStorage::new(&config.storage.root));
    let extraction = Arc::new(HttpExtractionClient::new(
        &config.extraction,
        Duration::from_secs(config.pipeline.extraction_timeout_secs),
    )?);

    // 组装流水线, 启动后台 Worker 与周期清扫
    let (pipeline, rx) = Pipeline::new(store, storage, extraction, &config.pipeline);
    tokio::spawn(pipeline.worker().run(rx));

    // 上次运行留下的 pending 文档与未匹配报价重新入队
    let requeued = pipeline.requeue_unfinished(chrono::Utc::now()).await?;
    info!("Requeued {} unfinished tasks from previous runs", requeued);
    pipeline.spawn_sweeper();

    let app = build_router(AppState::new(pipeline));

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/documents            - upload a supplier quote");
    info!("  GET  /api/documents/:id        - poll document status");
    info!("  GET  /api/quotes/:id           - review draft");
    info!("  POST /api/quotes/:id/approve   - approve quote");
    info!("  GET  /api/prices               - verified price search");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
