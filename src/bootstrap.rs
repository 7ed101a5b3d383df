//! # Service Bootstrap
//!
//! Wires configuration, logging, components and the HTTP server together for
//! the service binaries.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::broker::BrokerProvider;
use crate::config::{ConfigLoader, ServiceConfig, ServiceKind};
use crate::error::Result;
use crate::logging;
use crate::messaging::{ConsumerStats, DeliveryHandler, LoggingHandler, QueueConsumer};
use crate::web::{self, AppState};

/// Load `.env` and initialise logging, before anything else runs
pub fn init_process() {
    dotenvy::dotenv().ok();
    logging::init_tracing();
}

/// Run an HTTP service until Ctrl+C or SIGTERM
pub async fn run_http_service(kind: ServiceKind) -> Result<()> {
    let config = ConfigLoader::load(kind)?;
    let state = Arc::new(AppState::from_config(config)?);
    serve_until(state, web::shutdown_signal()).await
}

/// Serve prepared state until `shutdown` resolves
pub async fn serve_until<F>(state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = web::server::bind(&state.config.web).await?;
    let app = web::create_app(state.clone());

    info!(
        service = %state.config.service.name,
        kind = %state.config.service.kind,
        "Starting service"
    );

    web::serve(listener, app, shutdown).await?;

    if let Err(e) = state.publisher.shutdown().await {
        warn!(error = %e, "Failed to close pooled broker connection");
    }

    info!(service = %state.config.service.name, "Service shutdown complete");
    Ok(())
}

/// Run the queue consumer with the logging handler until Ctrl+C or SIGTERM
pub async fn run_consumer_service() -> Result<ConsumerStats> {
    let config = ConfigLoader::load(ServiceKind::Consumer)?;
    let provider = BrokerProvider::from_config(&config.broker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        web::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    run_consumer(&config, provider, Arc::new(LoggingHandler), shutdown_rx).await
}

/// Run a consumer for the configured queue until `shutdown` turns true
pub async fn run_consumer(
    config: &ServiceConfig,
    provider: BrokerProvider,
    handler: Arc<dyn DeliveryHandler>,
    shutdown: watch::Receiver<bool>,
) -> Result<ConsumerStats> {
    let consumer = QueueConsumer::from_config(provider, config)?;

    info!(
        queue_name = %consumer.queue().name,
        durable = consumer.queue().durable,
        "Waiting for messages"
    );

    Ok(consumer.run(handler, shutdown).await?)
}
