use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(ConversationKind::Direct),
            "group" => Some(ConversationKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    /// For direct conversations: exactly two ids, ascending.
    pub participants: Vec<Uuid>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Canonical key of a direct conversation; the order of the inputs does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectPair {
    low: Uuid,
    high: Uuid,
}

impl DirectPair {
    pub fn new(a: Uuid, b: Uuid) -> Result<Self, AppError> {
        if a == b {
            return Err(AppError::InvalidInput(
                "a direct conversation needs two distinct users".into(),
            ));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn low(&self) -> Uuid {
        self.low
    }

    pub fn high(&self) -> Uuid {
        self.high
    }

    pub fn participants(&self) -> Vec<Uuid> {
        vec![self.low, self.high]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ab = DirectPair::new(a, b).unwrap();
        let ba = DirectPair::new(b, a).unwrap();
        assert_eq!(ab, ba);
        assert!(ab.low() < ab.high());
        assert_eq!(ab.participants(), vec![ab.low(), ab.high()]);
    }

    #[test]
    fn self_pair_is_rejected() {
        let a = Uuid::new_v4();
        assert!(matches!(
            DirectPair::new(a, a),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn kind_round_trips_through_db_text() {
        for kind in [ConversationKind::Direct, ConversationKind::Group] {
            assert_eq!(ConversationKind::from_db(kind.as_str()), Some(kind));
        }
        assert_eq!(ConversationKind::from_db("channel"), None);
    }
}
