//! txvault worker - routes feed events into tenant databases.
//!
//! This is the main entry point for the txvault worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use txvault_client::{ClientOptions, WebhookClient};
use txvault_store::{MetadataStore, PgMetadataStore, RedisCache, RoutingCache};
use txvault_worker::{
    create_router, AppState, Backfill, BackfillJobs, CredentialCipher, Pipeline, PgTenantStore,
    QueueConsumer, RedisListSource, SubscriptionSync, TenantSink, WebhookJobs, WorkerConfig,
    WorkerError,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,txvault=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting txvault worker");

    let config = WorkerConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        webhook_queue = %config.webhook_queue,
        feeding_queue = %config.feeding_queue,
        concurrency = config.concurrency,
        mainnet_webhook = config.mainnet_webhook_id.is_some(),
        devnet_webhook = config.devnet_webhook_id.is_some(),
        "Worker configuration loaded"
    );

    // Metadata store
    let pg = Arc::new(
        PgMetadataStore::connect(&config.database_url, config.database_max_connections).await?,
    );
    pg.migrate().await?;
    let store: Arc<dyn MetadataStore> = pg.clone();

    // Routing cache
    let shared = RedisCache::new(&config.redis_url)?;
    shared.ping().await?;
    let cache = Arc::new(RoutingCache::new(Arc::new(shared)));
    match cache.warm(store.as_ref()).await {
        Ok(count) => tracing::info!(count, "Routing cache warmed"),
        Err(e) => tracing::warn!(error = %e, "Routing cache warm-up failed, continuing cold"),
    }

    // Tenant databases
    let key = config
        .encryption_key
        .as_deref()
        .ok_or_else(|| WorkerError::Config("ENCRYPTION_KEY is not set".into()))?;
    let mut cipher = CredentialCipher::from_hex(key)?;
    match config.encryption_iv.as_deref() {
        Some(iv) => cipher = cipher.with_legacy_iv_hex(iv)?,
        None => tracing::warn!("ENCRYPTION_IV is not set - CBC tenant credentials cannot be opened"),
    }
    let tenants = Arc::new(PgTenantStore::new(
        cipher,
        config.readiness(),
        config.pool_limits(),
        config.tenant_require_tls,
    ));
    let sink: Arc<dyn TenantSink> = tenants.clone();

    // Subscription API
    let client = WebhookClient::with_options(
        config.endpoints(),
        ClientOptions {
            timeout_seconds: config.request_timeout_seconds,
        },
    )?;
    for cluster in [txvault_core::Cluster::Mainnet, txvault_core::Cluster::Devnet] {
        if !client.supports(cluster) {
            tracing::warn!(%cluster, "No webhook configured - deactivations on this cluster will fail");
        }
    }

    let sync = SubscriptionSync::new(store.clone(), client, cache.clone());
    let pipeline = Arc::new(Pipeline::new(store.clone(), cache.clone(), sync, sink.clone()));
    let backfill = Arc::new(Backfill::new(store.clone(), sink));

    // Queue consumers
    let poll = Duration::from_secs(config.queue_poll_seconds.max(1));
    let consumers = [
        QueueConsumer::new(
            Arc::new(RedisListSource::new(&config.redis_url, &config.webhook_queue)?),
            Arc::new(WebhookJobs::new(pipeline)),
            config.concurrency,
            poll,
        ),
        QueueConsumer::new(
            Arc::new(RedisListSource::new(&config.redis_url, &config.feeding_queue)?),
            Arc::new(BackfillJobs::new(backfill)),
            config.concurrency,
            poll,
        ),
    ];
    let metrics = consumers.iter().map(QueueConsumer::metrics).collect();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running: Vec<_> = consumers
        .into_iter()
        .map(|consumer| tokio::spawn(consumer.run(shutdown_rx.clone())))
        .collect();

    // HTTP surface
    let app = create_router(AppState::new(cache.clone(), metrics));
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain
    tracing::info!("Shutting down, waiting for in-flight jobs");
    if let Err(e) = shutdown_tx.send(true) {
        tracing::error!(error = %e, "Queue consumers stopped before shutdown was signalled");
    }
    for handle in running {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Queue consumer panicked");
        }
    }

    cache.clear_local().await;
    tenants.close_all().await;
    pg.close().await;
    tracing::info!("Worker stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
