//! Web Application State
//!
//! Shared, read-only state handed to every handler.

use std::sync::Arc;
use std::time::Instant;

use crate::broker::{BrokerProvider, QueueSpec};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::hybrid::HybridOrchestrator;
use crate::messaging::QueuePublisher;
use crate::sync_caller::SyncCaller;

/// State shared by the trigger handlers of one service
#[derive(Debug)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub caller: SyncCaller,
    pub publisher: Arc<QueuePublisher>,
    pub hybrid: HybridOrchestrator,
    pub queue: QueueSpec,
    pub started_at: Instant,
}

impl AppState {
    /// Build every component from configuration
    ///
    /// Nothing connects here: the peer and the broker are only reached when a
    /// request needs them.
    pub fn new(config: ServiceConfig, provider: BrokerProvider) -> Result<Self> {
        let caller = SyncCaller::from_config(&config.peer)?;
        let publisher = Arc::new(QueuePublisher::new(provider, &config.broker));
        let hybrid = HybridOrchestrator::new(caller.clone(), publisher.clone(), &config)?;
        let queue = QueueSpec::new(config.queue.name.clone(), config.queue.durable)?;

        Ok(Self {
            config: Arc::new(config),
            caller,
            publisher,
            hybrid,
            queue,
            started_at: Instant::now(),
        })
    }

    /// State over the provider selected by configuration
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let provider = BrokerProvider::from_config(&config.broker);
        Self::new(config, provider)
    }
}
