//! # Broker Connection Reuse
//!
//! Publishers either open a connection per call or borrow the single
//! long-lived connection kept here. The pooled connection is created lazily,
//! replaced when it is found dead, and dropped after a connection-level
//! failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::errors::BrokerResult;
use super::provider::{BrokerProvider, ProviderConnection};
use super::redact_url;
use super::traits::{BrokerLink, LinkConnection};

/// How publishers obtain broker connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStrategy {
    /// Open and close a connection around every publish
    #[default]
    PerCall,
    /// Reuse one connection for the life of the process
    Pooled,
}

/// Counters describing pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub connections_opened: u64,
    pub acquisitions: u64,
    pub invalidations: u64,
}

/// Process-wide holder of one long-lived broker connection
#[derive(Debug)]
pub struct ConnectionPool {
    provider: BrokerProvider,
    url: String,
    slot: Mutex<Option<Arc<ProviderConnection>>>,
    connections_opened: AtomicU64,
    acquisitions: AtomicU64,
    invalidations: AtomicU64,
}

impl ConnectionPool {
    pub fn new(provider: BrokerProvider, url: impl Into<String>) -> Self {
        Self {
            provider,
            url: url.into(),
            slot: Mutex::new(None),
            connections_opened: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Borrow the pooled connection, connecting if there is none or it died
    pub async fn acquire(&self) -> BrokerResult<Arc<ProviderConnection>> {
        let mut slot = self.slot.lock().await;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        if let Some(connection) = slot.as_ref() {
            if connection.is_connected() {
                trace!("Reusing pooled broker connection");
                return Ok(connection.clone());
            }
            warn!(
                broker_url = %redact_url(&self.url),
                "Pooled broker connection is dead, reconnecting"
            );
        }

        let connection = Arc::new(self.provider.open(&self.url).await?);
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        debug!(
            broker_url = %redact_url(&self.url),
            provider = self.provider.provider_name(),
            "Opened pooled broker connection"
        );

        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Hand a borrowed connection back
    ///
    /// The connection stays open for the next caller.
    pub fn release(&self, connection: Arc<ProviderConnection>) {
        drop(connection);
    }

    /// Discard `failed` after a connection-level failure
    ///
    /// Only the connection the caller actually used is taken out of the slot;
    /// a replacement opened by another caller in the meantime stays in place.
    pub async fn invalidate(&self, failed: &Arc<ProviderConnection>) {
        let previous = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, failed) => slot.take(),
                _ => None,
            }
        };

        match previous {
            Some(connection) => {
                self.invalidations.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "Ignoring close failure of invalidated connection");
                }
            }
            None => trace!("Pooled connection already replaced, nothing to invalidate"),
        }
    }

    /// Close the pooled connection at shutdown
    pub async fn close(&self) -> BrokerResult<()> {
        let previous = self.slot.lock().await.take();
        match previous {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
