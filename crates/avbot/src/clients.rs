//! Chat clients keyed by the bot account they act as.

use dashmap::DashMap;
use matrix_client::ChatClient;
use std::sync::Arc;

/// One chat client per bot account user ID.
#[derive(Default, Clone)]
pub struct ClientSet {
    clients: Arc<DashMap<String, Arc<dyn ChatClient>>>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Arc<dyn ChatClient>) {
        self.clients.insert(client.user_id().to_string(), client);
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<dyn ChatClient>> {
        self.clients.get(user_id).map(|c| Arc::clone(c.value()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
