pub mod conversation;
pub mod delivery;
pub mod envelope;
pub mod keys;

pub use conversation::{Conversation, ConversationKind, DirectPair};
pub use delivery::{DeliveryEvent, DeliveryFrame};
pub use envelope::{DeliveryStatus, Envelope, MessageKind, NewEnvelope, OpaqueBytes};
pub use keys::{
    FetchedBundle, KeyBundle, KeyUpload, OneTimeKey, SignedPreKey, UploadOutcome, UploadReceipt,
};
