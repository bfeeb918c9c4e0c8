//! Delivery bridge
//!
//! Fans live events out to every gateway instance. Publishing is
//! fire-and-forget: nothing is acknowledged or replayed, and a recipient with
//! no open connection simply misses the event. The message ledger is the
//! durable path; clients recover anything missed through sync.
//!
//! Whether a recipient is connected is decided when the gateway dispatches
//! the event, not when it is published. A connection receives exactly the
//! events its gateway dispatches after it joined the registry, in publish
//! order; events dispatched before that are never pushed to it.

use crate::models::DeliveryEvent;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub mod local_bus;
pub mod redis_bus;

pub use local_bus::LocalDeliveryBus;
pub use redis_bus::RedisDeliveryBus;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DeliveryStream = BoxStream<'static, DeliveryEvent>;

/// Transport shared by all gateway instances.
#[async_trait]
pub trait DeliveryBus: Send + Sync {
    /// Returns how many subscribers the transport handed the event to.
    async fn publish(&self, event: &DeliveryEvent) -> Result<usize, DeliveryError>;

    async fn subscribe(&self) -> Result<DeliveryStream, DeliveryError>;
}

#[derive(Clone)]
pub struct DeliveryBridge {
    bus: Arc<dyn DeliveryBus>,
}

impl DeliveryBridge {
    pub fn new(bus: Arc<dyn DeliveryBus>) -> Self {
        Self { bus }
    }

    /// Bridge over an in-process bus, for a single instance or tests.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalDeliveryBus::default()))
    }

    /// Best effort. Failures are logged and never reach the caller.
    pub async fn publish(&self, event: DeliveryEvent) {
        let kind = event.frame.event_name();
        match self.bus.publish(&event).await {
            Ok(receivers) => debug!(
                recipient_id = %event.recipient_id,
                event = kind,
                receivers,
                "delivery event published"
            ),
            Err(e) => warn!(
                recipient_id = %event.recipient_id,
                event = kind,
                error = %e,
                "delivery publish failed; recipient will catch up via sync"
            ),
        }
    }

    /// Runs `handler` for every event seen on the bus until the subscription ends.
    pub async fn subscribe<F, Fut>(&self, handler: F) -> Result<JoinHandle<()>, DeliveryError>
    where
        F: Fn(DeliveryEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stream = self.bus.subscribe().await?;
        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                handler(event).await;
            }
            error!("delivery subscription ended");
        });
        Ok(handle)
    }
}
