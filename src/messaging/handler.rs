//! Delivery handlers invoked by the queue consumer

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

/// Processes the payload of one delivery
///
/// Returning `Ok` acknowledges the delivery; returning `Err` hands it back to
/// the broker for redelivery.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl<H> DeliveryHandler for Arc<H>
where
    H: DeliveryHandler + ?Sized,
{
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()> {
        self.as_ref().handle(payload).await
    }
}

/// Logs every payload and accepts it
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl DeliveryHandler for LoggingHandler {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()> {
        info!("Received message: {}", String::from_utf8_lossy(payload));
        Ok(())
    }
}

/// Adapts an async closure into a [`DeliveryHandler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Build a handler from an async closure over the owned payload
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> DeliveryHandler for FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()> {
        (self.f)(payload.to_vec()).await
    }
}
