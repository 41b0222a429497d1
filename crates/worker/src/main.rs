use std::sync::Arc;

use herald_common::config::AppConfig;
use herald_common::{db, redis_pool};
use herald_engine::jobs::{CleanupJob, PeriodicJob, Retention, RetryJob, SchedulerJob};
use herald_engine::{Dispatcher, Stores};
use herald_providers::build_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herald_worker=info,herald_engine=info,herald_providers=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Herald worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    // Redis backs the in-app channel only
    let redis = if config.providers.in_app.enabled {
        Some(redis_pool::create_redis_pool(&config.redis_url).await?)
    } else {
        None
    };

    let http = reqwest::Client::builder()
        .timeout(config.delivery.provider_timeout())
        .build()?;
    let registry = Arc::new(build_registry(&config.providers, http, redis)?);

    let stores = Stores::postgres(pool);
    let dispatcher = Arc::new(Dispatcher::from_config(
        registry,
        stores.clone(),
        &config.delivery,
    ));

    let mut scheduler = PeriodicJob::new(
        SchedulerJob::from_config(dispatcher.clone(), &config.jobs),
        config.jobs.scheduler_interval(),
    );
    let mut retry = PeriodicJob::new(
        RetryJob::from_config(dispatcher, &config.jobs),
        config.jobs.retry_interval(),
    );
    let mut cleanup = PeriodicJob::new(
        CleanupJob::new(stores, Retention::from_config(&config.jobs)),
        config.jobs.cleanup_interval(),
    );

    scheduler.start();
    retry.start();
    cleanup.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");

    scheduler.stop().await;
    retry.stop().await;
    cleanup.stop().await;

    tracing::info!("Herald worker stopped.");
    Ok(())
}
