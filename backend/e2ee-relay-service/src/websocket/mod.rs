use crate::delivery::{DeliveryBridge, DeliveryError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub mod message_types;

/// Unique identifier for a WebSocket subscriber
///
/// Each WebSocket connection gets a unique subscriber ID when it joins its
/// user channel, so closing one of several devices removes only that device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<String>,
}

/// Per-user channels of this gateway instance.
///
/// A user may hold several connections; every one of them receives each
/// frame addressed to the user. Join and leave are synchronous so a closed
/// socket is out of the registry before the session finishes stopping.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    // user_id -> live connections
    inner: Arc<DashMap<Uuid, Vec<Subscriber>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, user_id: Uuid) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let mut entry = self.inner.entry(user_id).or_default();
        entry.push(Subscriber {
            id: subscriber_id,
            sender: tx,
        });
        tracing::debug!(
            user_id = %user_id,
            subscriber = ?subscriber_id,
            connections = entry.len(),
            "joined user channel"
        );

        (subscriber_id, rx)
    }

    pub fn leave(&self, user_id: Uuid, subscriber_id: SubscriberId) {
        let emptied = match self.inner.get_mut(&user_id) {
            Some(mut subscribers) => {
                subscribers.retain(|s| s.id != subscriber_id);
                subscribers.is_empty()
            }
            None => false,
        };
        if emptied {
            self.inner.remove_if(&user_id, |_, subscribers| subscribers.is_empty());
        }
        tracing::debug!(user_id = %user_id, subscriber = ?subscriber_id, "left user channel");
    }

    /// Sends `frame` to every live connection of `user_id`; returns how many got it.
    ///
    /// Senders whose receiver is gone are dropped along the way.
    pub fn deliver(&self, user_id: Uuid, frame: &str) -> usize {
        let Some(mut subscribers) = self.inner.get_mut(&user_id) else {
            return 0;
        };
        subscribers.retain(|s| s.sender.send(frame.to_string()).is_ok());
        let delivered = subscribers.len();
        let emptied = subscribers.is_empty();
        drop(subscribers);

        if emptied {
            self.inner.remove_if(&user_id, |_, subscribers| subscribers.is_empty());
        }
        delivered
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner.get(&user_id).map(|v| v.len()).unwrap_or(0)
    }

    pub fn online_users(&self) -> usize {
        self.inner.len()
    }
}

/// Subscribes this instance to the delivery bridge and forwards each event to
/// the recipient's local connections.
pub async fn start_gateway(
    bridge: &DeliveryBridge,
    registry: ChannelRegistry,
) -> Result<JoinHandle<()>, DeliveryError> {
    bridge
        .subscribe(move |event| {
            let registry = registry.clone();
            async move {
                let frame = match serde_json::to_string(&event.frame) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode delivery frame");
                        return;
                    }
                };
                let delivered = registry.deliver(event.recipient_id, &frame);
                tracing::debug!(
                    recipient_id = %event.recipient_id,
                    event = event.frame.event_name(),
                    delivered,
                    "delivery event dispatched"
                );
            }
        })
        .await
}
