use super::{DeliveryBus, DeliveryError, DeliveryStream};
use crate::models::DeliveryEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Redis pub/sub transport: every instance PUBLISHes to and SUBSCRIBEs on one channel.
#[derive(Clone)]
pub struct RedisDeliveryBus {
    client: Client,
    publisher: ConnectionManager,
    channel: String,
}

impl RedisDeliveryBus {
    pub async fn connect(redis_url: &str, channel: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            publisher,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl DeliveryBus for RedisDeliveryBus {
    async fn publish(&self, event: &DeliveryEvent) -> Result<usize, DeliveryError> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.publisher.clone();
        let receivers: usize = conn.publish(&self.channel, payload).await?;
        Ok(receivers)
    }

    /// The first SUBSCRIBE must succeed. After that a dropped connection is
    /// re-established with backoff for as long as the stream is being read.
    async fn subscribe(&self) -> Result<DeliveryStream, DeliveryError> {
        let first = open_subscription(&self.client, &self.channel).await?;
        info!(channel = %self.channel, "subscribed to delivery channel");

        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let channel = self.channel.clone();
        tokio::spawn(async move {
            let mut pubsub = Some(first);
            let mut backoff = ResubscribeBackoff::default();

            loop {
                let current = match pubsub.take() {
                    Some(current) => current,
                    None => match open_subscription(&client, &channel).await {
                        Ok(reopened) => {
                            backoff.reset();
                            info!(channel = %channel, "resubscribed to delivery channel");
                            reopened
                        }
                        Err(e) => {
                            let delay = backoff.next_delay();
                            error!(
                                channel = %channel,
                                error = %e,
                                retry_in_ms = delay.as_millis() as u64,
                                "delivery resubscribe failed"
                            );
                            time::sleep(delay).await;
                            if tx.is_closed() {
                                break;
                            }
                            continue;
                        }
                    },
                };

                if !forward_messages(current, &tx).await {
                    break;
                }

                let delay = backoff.next_delay();
                warn!(
                    channel = %channel,
                    retry_in_ms = delay.as_millis() as u64,
                    "delivery channel subscription ended, resubscribing"
                );
                time::sleep(delay).await;
                if tx.is_closed() {
                    break;
                }
            }
            debug!(channel = %channel, "delivery stream dropped, subscriber stopped");
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

async fn open_subscription(client: &Client, channel: &str) -> redis::RedisResult<PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Forwards events until the connection drops. Returns false once nobody
/// reads the stream any more.
async fn forward_messages(mut pubsub: PubSub, tx: &mpsc::UnboundedSender<DeliveryEvent>) -> bool {
    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload = match msg.get_payload::<String>() {
            Ok(p) => p,
            Err(e) => {
                error!(error = ?e, "failed to read delivery payload");
                continue;
            }
        };

        let event: DeliveryEvent = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                // Payload bodies are never logged; they may carry ciphertext.
                error!(error = %e, bytes = payload.len(), "malformed delivery event");
                continue;
            }
        };

        debug!(recipient_id = %event.recipient_id, event = event.frame.event_name(), "delivery event received");
        if tx.send(event).is_err() {
            return false;
        }
    }
    !tx.is_closed()
}

const RESUBSCRIBE_INITIAL: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Doubling delay between resubscribe attempts.
#[derive(Debug)]
struct ResubscribeBackoff {
    next: Duration,
}

impl Default for ResubscribeBackoff {
    fn default() -> Self {
        Self {
            next: RESUBSCRIBE_INITIAL,
        }
    }
}

impl ResubscribeBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(RESUBSCRIBE_MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = RESUBSCRIBE_INITIAL;
    }
}
