use crate::{
    config::Config,
    delivery::DeliveryBridge,
    middleware::JwtVerifier,
    repository::Repositories,
    services::{
        ConversationResolver, IdentityDirectory, KeyBundleService, MessageLedger, StoreRetry,
    },
    websocket::ChannelRegistry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub keys: Arc<KeyBundleService>,
    pub conversations: Arc<ConversationResolver>,
    pub ledger: Arc<MessageLedger>,
    pub bridge: DeliveryBridge,
    /// Live connections held by this instance
    pub registry: ChannelRegistry,
    pub jwt: Arc<JwtVerifier>,
}

impl AppState {
    /// Wires the services over the given stores, identity directory and delivery bridge.
    pub fn new(
        config: Config,
        repos: Repositories,
        identity: Arc<dyn IdentityDirectory>,
        bridge: DeliveryBridge,
    ) -> Self {
        let retry = StoreRetry::with_attempts(config.store_retry_attempts);

        let keys = Arc::new(KeyBundleService::new(
            repos.keys,
            bridge.clone(),
            retry.clone(),
            config.otk_low_water_mark,
        ));
        let conversations = Arc::new(ConversationResolver::new(repos.conversations, retry));
        let ledger = Arc::new(MessageLedger::new(
            repos.envelopes,
            conversations.clone(),
            identity,
            bridge.clone(),
            config.sync_page_size,
        ));
        let jwt = Arc::new(JwtVerifier::new(&config.jwt_secret));

        Self {
            config: Arc::new(config),
            keys,
            conversations,
            ledger,
            bridge,
            registry: ChannelRegistry::new(),
            jwt,
        }
    }
}
