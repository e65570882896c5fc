use std::sync::Arc;

use async_trait::async_trait;
use itin_types::{AgentName, ExecutionContext};
use serde_json::{json, Value};

use crate::agent::{Agent, AgentError};
use crate::provider::{ChatMessage, Provider};

fn prompt(content: impl Into<String>) -> Vec<ChatMessage> {
    vec![ChatMessage {
        role: "user".to_string(),
        content: content.into(),
    }]
}

/// Fatal on failure (spec §4.4 phase table: "Skeleton ... fatal").
pub struct SkeletonPlannerAgent {
    pub provider: Arc<dyn Provider>,
}

#[async_trait]
impl Agent for SkeletonPlannerAgent {
    fn name(&self) -> AgentName {
        AgentName::SkeletonPlanner
    }

    fn fatal_on_failure(&self) -> bool {
        true
    }

    async fn run(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, AgentError> {
        let destination = input["destination"].as_str().unwrap_or("the destination");
        let themes = input["themes"].as_array().cloned().unwrap_or_default();
        let reply = self
            .provider
            .complete(&prompt(format!("Summarize a trip to {destination}")))
            .await
            .map_err(|e| AgentError::transient(e.to_string()))?;
        Ok(json!({ "summary": reply, "themes": themes }))
    }
}

pub struct DayPlannerAgent {
    pub provider: Arc<dyn Provider>,
}

#[async_trait]
impl Agent for DayPlannerAgent {
    fn name(&self) -> AgentName {
        AgentName::DayPlanner
    }

    async fn run(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, AgentError> {
        let day_number = input["day_number"].as_u64().unwrap_or(0);
        let destination = input["destination"].as_str().unwrap_or("");
        let reply = self
            .provider
            .complete(&prompt(format!("Plan the shape of day {day_number} in {destination}")))
            .await
            .map_err(|e| AgentError::transient(e.to_string()))?;
        Ok(json!({
            "location": destination,
            "pacing": { "intensity": "moderate" },
            "note": reply,
        }))
    }
}

/// One agent implementation shared by the three node-producing phases
/// (activities, meals, transport) — they differ only in which node
/// `type` they populate, so distinct structs avoid a runtime flag while
/// keeping each phase's identity explicit in `AgentName` (spec §4.3's
/// "specialization is by composition, not by subclassing").
pub struct ActivityAgent {
    pub provider: Arc<dyn Provider>,
}

#[async_trait]
impl Agent for ActivityAgent {
    fn name(&self) -> AgentName {
        AgentName::ActivityAgent
    }

    async fn run(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, AgentError> {
        produce_nodes(&*self.provider, "attraction", &input).await
    }
}

pub struct MealAgent {
    pub provider: Arc<dyn Provider>,
}

#[async_trait]
impl Agent for MealAgent {
    fn name(&self) -> AgentName {
        AgentName::MealAgent
    }

    async fn run(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, AgentError> {
        produce_nodes(&*self.provider, "meal", &input).await
    }
}

pub struct TransportAgent {
    pub provider: Arc<dyn Provider>,
}

#[async_trait]
impl Agent for TransportAgent {
    fn name(&self) -> AgentName {
        AgentName::TransportAgent
    }

    async fn run(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, AgentError> {
        produce_nodes(&*self.provider, "transport", &input).await
    }
}

async fn produce_nodes(provider: &dyn Provider, kind: &str, input: &Value) -> Result<Value, AgentError> {
    let destination = input["destination"].as_str().unwrap_or("");
    let day_number = input["day_number"].as_u64().unwrap_or(0);
    let reply = provider
        .complete(&prompt(format!("Suggest one {kind} for day {day_number} in {destination}")))
        .await
        .map_err(|e| AgentError::transient(e.to_string()))?;
    Ok(json!({
        "nodes": [{
            "type": kind,
            "title": reply,
        }]
    }))
}

pub struct CostEstimatorAgent {
    pub provider: Arc<dyn Provider>,
}

#[async_trait]
impl Agent for CostEstimatorAgent {
    fn name(&self) -> AgentName {
        AgentName::CostEstimator
    }

    async fn run(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, AgentError> {
        let node_count = input["node_count"].as_u64().unwrap_or(0);
        let _ = self
            .provider
            .complete(&prompt(format!("Estimate cost for {node_count} nodes")))
            .await
            .map_err(|e| AgentError::transient(e.to_string()))?;
        let per_node = 35.0;
        Ok(json!({
            "amount": per_node * node_count as f64,
            "currency": "USD",
        }))
    }
}

pub struct EnrichmentAgent {
    pub provider: Arc<dyn Provider>,
}

#[async_trait]
impl Agent for EnrichmentAgent {
    fn name(&self) -> AgentName {
        AgentName::EnrichmentAgent
    }

    async fn run(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value, AgentError> {
        let title = input["title"].as_str().unwrap_or("this stop");
        let reply = self
            .provider
            .complete(&prompt(format!("Add detail and a short description for {title}")))
            .await
            .map_err(|e| AgentError::transient(e.to_string()))?;
        Ok(json!({ "details": { "description": reply } }))
    }
}
