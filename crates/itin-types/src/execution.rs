use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Carried through one pipeline run. Not persisted as-is; phases read and
/// append to `scratchpad` to pass derived values (e.g. skeleton output)
/// downstream without threading extra function parameters everywhere.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub itinerary_id: String,
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub scratchpad: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>, itinerary_id: impl Into<String>) -> Self {
        let execution_id = execution_id.into();
        Self {
            correlation_id: execution_id.clone(),
            execution_id,
            itinerary_id: itinerary_id.into(),
            started_at: Utc::now(),
            scratchpad: Map::new(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0)
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.scratchpad.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.scratchpad.get(key)
    }
}
