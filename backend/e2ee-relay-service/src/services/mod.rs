pub mod conversation_service;
pub mod identity_client;
pub mod key_bundle_service;
pub mod message_service;
pub mod retry;

pub use conversation_service::ConversationResolver;
pub use identity_client::{HttpIdentityClient, IdentityDirectory, InMemoryIdentityDirectory};
pub use key_bundle_service::KeyBundleService;
pub use message_service::{MessageLedger, SendMessage, SyncPage};
pub use retry::StoreRetry;
