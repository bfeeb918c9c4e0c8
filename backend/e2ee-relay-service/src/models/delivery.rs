use super::envelope::{DeliveryStatus, Envelope};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frame pushed to a connected client: `{"event": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum DeliveryFrame {
    NewMessage(Envelope),
    Typing { from: Uuid },
    KeysLow { device_id: u32, remaining: i64 },
    StatusChanged { message_id: Uuid, status: DeliveryStatus },
}

impl DeliveryFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            DeliveryFrame::NewMessage(_) => "new_message",
            DeliveryFrame::Typing { .. } => "typing",
            DeliveryFrame::KeysLow { .. } => "keys_low",
            DeliveryFrame::StatusChanged { .. } => "status_changed",
        }
    }
}

/// Unit published on the delivery channel; every gateway instance sees every event
/// and forwards it only to its own connections of `recipient_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub recipient_id: Uuid,
    pub frame: DeliveryFrame,
}

impl DeliveryEvent {
    pub fn new(recipient_id: Uuid, frame: DeliveryFrame) -> Self {
        Self {
            recipient_id,
            frame,
        }
    }

    pub fn new_message(envelope: Envelope) -> Self {
        Self::new(envelope.recipient_id, DeliveryFrame::NewMessage(envelope))
    }

    pub fn typing(recipient_id: Uuid, from: Uuid) -> Self {
        Self::new(recipient_id, DeliveryFrame::Typing { from })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_frame_wire_shape() {
        let from = Uuid::new_v4();
        let event = DeliveryEvent::typing(Uuid::new_v4(), from);
        let frame = serde_json::to_value(&event.frame).unwrap();
        assert_eq!(frame["event"], "typing");
        assert_eq!(frame["payload"]["from"], from.to_string());
        assert_eq!(event.frame.event_name(), "typing");
    }

    #[test]
    fn event_survives_the_channel() {
        let event = DeliveryEvent::new(
            Uuid::new_v4(),
            DeliveryFrame::KeysLow {
                device_id: 1,
                remaining: 3,
            },
        );
        let raw = serde_json::to_string(&event).unwrap();
        let back: DeliveryEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, event);
    }
}
