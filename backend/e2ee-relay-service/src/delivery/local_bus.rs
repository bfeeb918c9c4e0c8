use super::{DeliveryBus, DeliveryError, DeliveryStream};
use crate::models::DeliveryEvent;
use async_trait::async_trait;
use futures_util::{future, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

const DEFAULT_CAPACITY: usize = 1024;

/// In-process bus on a tokio broadcast channel. Only reaches gateways in this process.
#[derive(Clone)]
pub struct LocalDeliveryBus {
    tx: broadcast::Sender<DeliveryEvent>,
}

impl LocalDeliveryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalDeliveryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl DeliveryBus for LocalDeliveryBus {
    async fn publish(&self, event: &DeliveryEvent) -> Result<usize, DeliveryError> {
        // No subscribers is not an error for a fire-and-forget bus.
        Ok(self.tx.send(event.clone()).unwrap_or(0))
    }

    async fn subscribe(&self) -> Result<DeliveryStream, DeliveryError> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|item| {
            future::ready(match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "local delivery subscriber lagged");
                    None
                }
            })
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = LocalDeliveryBus::default();
        let event = DeliveryEvent::typing(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(bus.publish(&event).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subscriber_sees_published_events() {
        let bus = LocalDeliveryBus::default();
        let mut stream = bus.subscribe().await.unwrap();
        let event = DeliveryEvent::typing(Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(bus.publish(&event).await.unwrap(), 1);
        assert_eq!(stream.next().await, Some(event));
    }
}
