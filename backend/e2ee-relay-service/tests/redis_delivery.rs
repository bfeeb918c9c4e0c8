//! Integration Tests: Redis delivery bus
//!
//! Runs the pub/sub transport against a real Redis started with testcontainers.

use e2ee_relay_service::delivery::{DeliveryBus, RedisDeliveryBus};
use e2ee_relay_service::models::DeliveryEvent;
use futures_util::StreamExt;
use std::time::Duration;
use testcontainers::{core::WaitFor, runners::AsyncRunner, GenericImage};
use uuid::Uuid;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

async fn setup_redis() -> TestResult<String> {
    let redis_image = GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));

    let container = redis_image.start().await?;
    let port = container.get_host_port_ipv4(6379).await?;

    // Keep the container alive for the rest of the test
    Box::leak(Box::new(container));

    Ok(format!("redis://127.0.0.1:{}", port))
}

#[tokio::test]
#[ignore] // Run manually: cargo test --test redis_delivery -- --ignored
async fn subscriber_survives_a_dropped_connection() -> TestResult {
    let redis_url = setup_redis().await?;
    let bus = RedisDeliveryBus::connect(&redis_url, "delivery-test").await?;
    let mut stream = bus.subscribe().await?;

    let before = DeliveryEvent::typing(Uuid::new_v4(), Uuid::new_v4());
    bus.publish(&before).await?;
    let received = tokio::time::timeout(Duration::from_secs(2), stream.next()).await?;
    assert_eq!(received, Some(before));

    // Drop every subscriber connection on the server side.
    let admin = redis::Client::open(redis_url.as_str())?;
    let mut conn = admin.get_multiplexed_async_connection().await?;
    let killed: i64 = redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("pubsub")
        .query_async(&mut conn)
        .await?;
    assert!(killed >= 1);

    // Events published while resubscribing are lost, so keep publishing until
    // one arrives on the same stream.
    let after = DeliveryEvent::typing(Uuid::new_v4(), Uuid::new_v4());
    let resumed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            bus.publish(&after).await?;
            if let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_millis(250), stream.next()).await
            {
                return Ok::<_, Box<dyn std::error::Error>>(event);
            }
        }
    })
    .await??;
    assert_eq!(resumed, after);
    Ok(())
}
