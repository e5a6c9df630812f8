//! Inbound Ports (Driving Ports)
//!
//! The API business services use to emit and react to events.

use async_trait::async_trait;
use std::future::Future;

use crate::domain::{Event, Headers};
use crate::error::BusError;

/// Publishing side of the bus.
///
/// Services depend on this trait rather than on [`EventBus`](crate::EventBus)
/// so they can be exercised against a test double.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event and wait for the broker's verdict.
    ///
    /// Returns `Ok(true)` once acknowledged, `Ok(false)` if delivery failed.
    async fn publish_event(
        &self,
        topic: &str,
        key: &str,
        event: Event,
        headers: Option<Headers>,
    ) -> Result<bool, BusError>;
}

/// Handles one consumed event.
///
/// An `Err` marks the message as failed: it is retried per the topic's
/// retry policy and then dead-lettered. Handlers may see the same event more
/// than once after a rebalance and must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self)(event).await
    }
}
