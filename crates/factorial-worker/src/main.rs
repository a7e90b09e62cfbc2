//! Batch consumer worker: declares the queue topology, then runs
//! `worker_max_batches` independent consumer tasks against the pipeline.

use factorial_cache::RedisCache;
use factorial_config::{AppConfig, StorageType};
use factorial_db::{Persistence, PipelineStore};
use factorial_pipeline::FactorialPipeline;
use factorial_queue::{declare_topology, BatchConsumer, Delivery};
use factorial_storage::{ArtifactStore, LocalArtifactStore, S3ArtifactStore};
use lapin::{Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

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

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Runs one failed delivery through the retry/DLQ discipline (§4.5.4).
async fn nack_with_retry_discipline(consumer: &BatchConsumer, delivery: &Delivery, reason: &str) {
    if delivery.has_exceeded_retry_limit() {
        if let Err(e) = consumer.park_in_dlq(delivery, unix_now(), reason).await {
            log::error!("failed to park delivery in DLQ: {e}");
        }
    } else if let Err(e) = consumer.retry(delivery).await {
        log::error!("failed to nack delivery for retry: {e}");
    }
}

/// One consumer task's receive loop: pulls batches, dispatches them to the
/// pipeline, and applies ack/retry/DLQ per delivery.
async fn run_consumer(
    tag: String,
    consumer_builder: BatchConsumer,
    pipeline: Arc<FactorialPipeline>,
) -> anyhow::Result<()> {
    let mut stream = consumer_builder.consume(&tag).await?;
    loop {
        let batch = match consumer_builder.recv_batch(&mut stream).await {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("[{tag}] error receiving batch: {e}");
                continue;
            }
        };
        if batch.is_empty() {
            log::info!("[{tag}] consumer stream closed, draining and exiting");
            return Ok(());
        }

        let mut valid = Vec::with_capacity(batch.len());
        let mut actionable = Vec::with_capacity(batch.len());
        for delivery in batch {
            match &delivery.number {
                Ok(n) => {
                    valid.push(*n);
                    actionable.push(delivery);
                }
                Err(reason) => {
                    log::warn!("[{tag}] dropping malformed payload: {reason}");
                    if let Err(e) = consumer_builder.ack(&delivery).await {
                        log::error!("[{tag}] failed to ack malformed delivery: {e}");
                    }
                }
            }
        }
        if valid.is_empty() {
            continue;
        }

        let pipeline = Arc::clone(&pipeline);
        let result = tokio::spawn(async move { pipeline.process_batch(&valid).await }).await;

        match result {
            Ok(Ok(())) => {
                for delivery in &actionable {
                    if let Err(e) = consumer_builder.ack(delivery).await {
                        log::error!("[{tag}] failed to ack delivery: {e}");
                    }
                }
                metrics::counter!("factorial_batches_processed_total").increment(1);
            }
            Ok(Err(e)) => {
                log::error!("[{tag}] batch handler failed: {e}");
                for delivery in &actionable {
                    nack_with_retry_discipline(&consumer_builder, delivery, &e.to_string()).await;
                }
                metrics::counter!("factorial_batches_failed_total").increment(1);
            }
            Err(join_err) => {
                let reason = format!("panic: {join_err}");
                log::error!("[{tag}] {reason}");
                for delivery in &actionable {
                    nack_with_retry_discipline(&consumer_builder, delivery, &reason).await;
                }
                metrics::counter!("factorial_batches_panicked_total").increment(1);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AppConfig::load();
    cfg.validate()?;

    let _metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .ok();

    let db_settings = factorial_db::DbSettings {
        host: cfg.db_host.clone(),
        port: cfg.db_port,
        user: cfg.db_user.clone(),
        password: cfg.db_password.clone(),
        dbname: cfg.db_name.clone(),
    };
    let pool = factorial_db::connect(&db_settings).await?;
    let db: Arc<dyn PipelineStore> = Arc::new(Persistence::new(pool));

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
    let setup_channel = connection.create_channel().await?;
    declare_topology(&setup_channel, &cfg.queue_name).await?;
    log::info!("declared queue topology for {}", cfg.queue_name);

    let pipeline = Arc::new(FactorialPipeline::new(db, store, cache, cfg.max_factorial));

    log::info!(
        "starting {} consumer task(s), batch size {}",
        cfg.worker_max_batches,
        cfg.worker_batch_size
    );

    let mut tasks = Vec::with_capacity(cfg.worker_max_batches);
    for i in 0..cfg.worker_max_batches {
        let channel = connection.create_channel().await?;
        let consumer = BatchConsumer::new(channel, cfg.queue_name.clone(), cfg.worker_batch_size);
        let tag = format!("factorial-worker-{i}");
        let pipeline = Arc::clone(&pipeline);
        tasks.push(tokio::spawn(run_consumer(tag, consumer, pipeline)));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal, stopping consumer dispatch");
        }
        _ = futures_util::future::join_all(tasks) => {
            log::warn!("all consumer tasks exited");
        }
    }

    Ok(())
}
