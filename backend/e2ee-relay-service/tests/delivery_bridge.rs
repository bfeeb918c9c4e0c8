mod common;

use common::{next_frame, stays_silent, text_message, Harness};
use e2ee_relay_service::models::{DeliveryStatus, Envelope};

#[tokio::test]
async fn connected_recipient_receives_the_stored_envelope() {
    let h = Harness::new().await;
    let (alice, bob) = (h.user(), h.user());
    let mut bob_live = h.connect(bob);

    let sent = h
        .state
        .ledger
        .send_message(alice, text_message(bob, b"\x00secret\xff"))
        .await
        .unwrap();

    let frame = next_frame(&mut bob_live).await;
    assert_eq!(frame["event"], "new_message");
    let pushed: Envelope = serde_json::from_value(frame["payload"].clone()).unwrap();
    assert_eq!(pushed, sent);

    // Live delivery does not consume the durable copy.
    let page = h.state.ledger.sync(bob, None).await.unwrap();
    assert_eq!(page.messages, vec![sent]);
}

#[tokio::test]
async fn every_device_of_the_recipient_gets_the_push() {
    let h = Harness::new().await;
    let (alice, bob) = (h.user(), h.user());
    let mut phone = h.connect(bob);
    let mut laptop = h.connect(bob);
    let mut alice_live = h.connect(alice);

    h.state
        .ledger
        .send_message(alice, text_message(bob, b"hi"))
        .await
        .unwrap();

    assert_eq!(next_frame(&mut phone).await["event"], "new_message");
    assert_eq!(next_frame(&mut laptop).await["event"], "new_message");
    assert!(stays_silent(&mut alice_live).await);
}

#[tokio::test]
async fn disconnected_recipient_catches_up_through_sync_only() {
    let h = Harness::new().await;
    let (alice, bob, carol) = (h.user(), h.user(), h.user());
    let mut carol_live = h.connect(carol);

    let sent = h
        .state
        .ledger
        .send_message(alice, text_message(bob, b"while away"))
        .await
        .unwrap();

    // The gateway dispatches in publish order, so once Carol hears the later
    // typing event, Bob's envelope has already been dispatched to nobody.
    h.state.ledger.relay_typing(alice, carol).await.unwrap();
    assert_eq!(next_frame(&mut carol_live).await["event"], "typing");

    // Connecting later replays nothing live.
    let mut bob_live = h.connect(bob);
    assert!(stays_silent(&mut bob_live).await);

    let page = h.state.ledger.sync(bob, None).await.unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].id, sent.id);
}

#[tokio::test]
async fn typing_is_relayed_but_never_stored() {
    let h = Harness::new().await;
    let (alice, bob) = (h.user(), h.user());
    let mut bob_live = h.connect(bob);

    h.state.ledger.relay_typing(alice, bob).await.unwrap();

    let frame = next_frame(&mut bob_live).await;
    assert_eq!(frame["event"], "typing");
    assert_eq!(frame["payload"]["from"], alice.to_string());
    assert!(h.state.ledger.sync(bob, None).await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn sender_hears_about_status_changes_once() {
    let h = Harness::new().await;
    let (alice, bob) = (h.user(), h.user());
    let envelope = h
        .state
        .ledger
        .send_message(alice, text_message(bob, b"x"))
        .await
        .unwrap();
    let mut alice_live = h.connect(alice);

    h.state
        .ledger
        .update_status(bob, envelope.id, DeliveryStatus::Delivered)
        .await
        .unwrap();
    let frame = next_frame(&mut alice_live).await;
    assert_eq!(frame["event"], "status_changed");
    assert_eq!(frame["payload"]["message_id"], envelope.id.to_string());
    assert_eq!(frame["payload"]["status"], "delivered");

    // A repeat is a no-op and publishes nothing.
    h.state
        .ledger
        .update_status(bob, envelope.id, DeliveryStatus::Delivered)
        .await
        .unwrap();
    assert!(stays_silent(&mut alice_live).await);
}
