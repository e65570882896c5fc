use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Keyed table of cancellation tokens, one per in-flight execution.
/// `create` and `remove` bracket a generation's lifetime; agents and the
/// orchestrator clone the token cheaply and poll `is_cancelled()` at
/// phase entry and before any long I/O.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: RwLock<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, execution_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .write()
            .await
            .insert(execution_id.to_string(), token.clone());
        token
    }

    pub async fn cancel(&self, execution_id: &str) -> bool {
        if let Some(token) = self.tokens.read().await.get(execution_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn remove(&self, execution_id: &str) {
        self.tokens.write().await.remove(execution_id);
    }
}
