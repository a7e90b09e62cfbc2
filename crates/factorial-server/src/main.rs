//! HTTP front end binary: runs migrations, then serves the factorial API.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use factorial_api::{configure, AppState};
use factorial_cache::RedisCache;
use factorial_config::{AppConfig, StorageType};
use factorial_db::Persistence;
use factorial_queue::{declare_topology, Producer, RabbitMqProducer};
use factorial_storage::{ArtifactStore, LocalArtifactStore, S3ArtifactStore};
use lapin::{Connection, ConnectionProperties};
use std::sync::Arc;
use utoipa::OpenApi;

async fn build_artifact_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ArtifactStore>> {
    match cfg.storage_type {
        StorageType::Local => Ok(Arc::new(LocalArtifactStore::new(&cfg.local_storage_path))),
        StorageType::S3 => {
            let aws_cfg = aws_config::from_env()
                .region(aws_config::Region::new(cfg.aws_region.clone()))
                .load()
                .await;
            let client = aws_sdk_s3::Client::new(&aws_cfg);
            Ok(Arc::new(S3ArtifactStore::new(client, cfg.s3_bucket_name.clone())))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AppConfig::load();
    cfg.validate()?;

    let db_settings = factorial_db::DbSettings {
        host: cfg.db_host.clone(),
        port: cfg.db_port,
        user: cfg.db_user.clone(),
        password: cfg.db_password.clone(),
        dbname: cfg.db_name.clone(),
    };
    let pool = factorial_db::connect(&db_settings).await?;
    let db = Arc::new(Persistence::new(pool));

    let store = build_artifact_store(&cfg).await?;

    let cache = Arc::new(
        RedisCache::connect(&cfg.redis_url(), factorial_cache::DEFAULT_TTL, cfg.redis_threshold)
            .await?,
    );

    let connection = Connection::connect(
        &cfg.rabbitmq_url(),
        ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio),
    )
    .await?;
    let channel = connection.create_channel().await?;
    declare_topology(&channel, &cfg.queue_name).await?;
    let producer: Arc<dyn Producer> = Arc::new(RabbitMqProducer::new(channel, cfg.queue_name.clone()));

    let state = web::Data::new(AppState {
        db,
        store,
        cache,
        producer,
        max_factorial: cfg.max_factorial,
    });

    let bind_port = cfg.bind_port();
    log::info!("listening on 0.0.0.0:{bind_port}");

    HttpServer::new(move || {
        let openapi = factorial_api::ApiDoc::openapi();
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(configure)
            .route(
                "/api-docs/openapi.json",
                web::get().to(move || {
                    let openapi = openapi.clone();
                    async move { web::Json(openapi) }
                }),
            )
    })
    .bind(("0.0.0.0", bind_port))?
    .run()
    .await?;

    Ok(())
}
