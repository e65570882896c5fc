pub mod agent_runtime;
pub mod cancellation;
pub mod config;
pub mod event_bus;
pub mod event_publisher;
pub mod storage;

pub use agent_runtime::{AgentRuntime, Invocation};
pub use cancellation::CancellationRegistry;
pub use config::PipelineConfig;
pub use event_bus::{
    connected_event, ConnectionManager, Registration, SubscriptionId, DEFAULT_SUBSCRIBER_BUFFER,
    DEFAULT_TAIL_SIZE,
};
pub use event_publisher::EventPublisher;
pub use storage::{Storage, StorageError};
