use async_trait::async_trait;
use rand::Rng;
use tokio::time::Duration;

use crate::provider::{ChatMessage, Provider, ProviderInfo};

/// A deterministic-enough stand-in for a real LLM backend so the
/// pipeline is exercisable without a provider API key configured (spec
/// §9.5, playing the role `tandem-providers`' registry default-selection
/// fallback plays for the teacher). Echoes structure derived from the
/// last message rather than actually reasoning about it.
pub struct MockProvider {
    pub name: String,
    pub latency_ms: (u64, u64),
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency_ms: (10, 60),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name.clone(),
            default_model: "mock-1".to_string(),
        }
    }

    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let delay = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.latency_ms.0..=self.latency_ms.1)
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let last = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!("[{}] acknowledged: {}", self.name, truncate(&last, 120)))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}
