//! AVBOT - Main entry point.

use anyhow::Context;
use avbot::api::{create_router, AppState};
use avbot::bot::Bot;
use avbot::config::{Config, StoreKind};
use avbot::error::AppResult;
use avbot::lifecycle::ConfigureRequest;
use avbot::services::{http_client, register_all};
use avbot::{ClientSet, CommandRouter, LifecycleManager, ServiceCatalog, ServiceRegistry, WebhookDispatcher};
use matrix_client::{ChatClient, MatrixClient, SyncReceiver};
use secrecy::ExposeSecret;
use service_store::{FileStore, MemoryStore, ServiceStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.bot.log_level, config.bot.log_json);

    info!("Starting AVBOT...");

    let http = http_client(config.bot.http_timeout).context("Failed to create HTTP client")?;

    let mut builder = ServiceRegistry::builder();
    register_all(&mut builder, http)?;
    let registry = Arc::new(builder.build());
    info!("Registered service types: {}", registry.service_types().join(", "));

    let store: Arc<dyn ServiceStore> = match config.store.kind {
        StoreKind::Memory => {
            warn!("Using in-memory service store - configuration is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreKind::File => {
            info!("Using file service store at {}", config.store.path.display());
            Arc::new(FileStore::open(&config.store.path).await?)
        }
    };

    let matrix = MatrixClient::new(
        &config.matrix.homeserver_url,
        &config.matrix.user_id,
        config.matrix.access_token.expose_secret().as_str(),
    )?;

    if !matrix.health_check().await {
        error!(
            "Matrix homeserver rejected credentials for {} at {}",
            config.matrix.user_id,
            matrix.homeserver_url()
        );
        return Err(anyhow::anyhow!("Matrix credentials invalid").into());
    }
    info!("Matrix homeserver healthy - User: {}", config.matrix.user_id);

    let client: Arc<dyn ChatClient> = Arc::new(matrix.clone());
    let clients = ClientSet::new();
    clients.insert(client.clone());

    let catalog = ServiceCatalog::new(store, registry);
    let lifecycle = Arc::new(LifecycleManager::new(
        catalog.clone(),
        clients.clone(),
        &config.server.base_url,
    ));

    lifecycle.start_persisted().await?;

    for entry in &config.services {
        let outcome = lifecycle
            .configure(ConfigureRequest {
                service_type: entry.service_type.clone(),
                service_id: entry.id.clone(),
                service_user_id: entry
                    .user_id
                    .clone()
                    .unwrap_or_else(|| config.matrix.user_id.clone()),
                config: entry.config.clone(),
            })
            .await?;
        info!(
            service_id = %outcome.service_id,
            service_type = %outcome.service_type,
            "Configured service from config file"
        );
    }

    let router = Arc::new(CommandRouter::new(
        catalog.clone(),
        clients.clone(),
        &config.bot.trigger,
    ));
    let webhooks = WebhookDispatcher::new(catalog, clients);
    let app = create_router(AppState::new(lifecycle.clone(), webhooks));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("Server error: {}", e);
            }
        }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    let receiver = SyncReceiver::new(matrix, config.matrix.sync_timeout);
    let bot = Arc::new(Bot::new(client, router, config.bot.auto_join));
    bot.run(receiver.stream(), shutdown.clone()).await;

    info!("Shutting down...");
    shutdown.cancel();
    lifecycle.shutdown().await;
    if let Err(e) = server.await {
        error!("Server task failed: {}", e);
    }
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
