//! Durable queue: topology declaration (main / retry / DLQ), a producer,
//! and a batch consumer with broker-TTL-driven retry.
//!
//! The wire format is UTF-8 JSON `{"number": "<decimal>"}`, persistent
//! delivery, `content-type: application/json`.

pub mod consumer;
pub mod producer;
pub mod topology;

pub use consumer::{BatchConsumer, Delivery, DlqHeaders};
pub use producer::{Producer, RabbitMqProducer};
pub use topology::{declare_topology, PREFETCH_COUNT, RETRY_TTL_MS};

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}
