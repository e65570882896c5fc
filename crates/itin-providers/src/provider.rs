use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderInfo {
    pub name: String,
    pub default_model: String,
}

/// The opaque LLM backing behind each agent (spec §1: "the individual
/// agents' internal reasoning and LLM/provider calls ... each agent is
/// opaque behind a narrow interface"). Grounded on
/// `tandem-providers::Provider`'s `async_trait` contract, trimmed to the
/// one call shape the pipeline agents actually need — a single-shot
/// completion, no streaming, since the orchestrator drives persistence
/// boundaries itself rather than consuming token deltas.
#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    default: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default: None,
        }
    }

    pub fn register(&mut self, key: impl Into<String>, provider: Arc<dyn Provider>) {
        let key = key.into();
        if self.default.is_none() {
            self.default = Some(key.clone());
        }
        self.providers.insert(key, provider);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(key).cloned()
    }

    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.default.as_ref().and_then(|k| self.get(k))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
