//! Publishes factorial work items onto the main queue.

use async_trait::async_trait;
use factorial_types::FactorialMessage;
use lapin::options::BasicPublishOptions;
use lapin::types::ShortString;
use lapin::{BasicProperties, Channel};

use crate::QueueError;

#[async_trait]
pub trait Producer: Send + Sync {
    async fn publish(&self, number: u64) -> Result<(), QueueError>;
}

pub struct RabbitMqProducer {
    channel: Channel,
    queue_name: String,
}

impl RabbitMqProducer {
    pub fn new(channel: Channel, queue_name: impl Into<String>) -> Self {
        RabbitMqProducer {
            channel,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl Producer for RabbitMqProducer {
    async fn publish(&self, number: u64) -> Result<(), QueueError> {
        let body = serde_json::to_vec(&FactorialMessage::new(number))?;
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(2); // persistent

        self.channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use factorial_types::FactorialMessage;

    #[test]
    fn message_body_round_trips_through_json() {
        let msg = FactorialMessage::new(42);
        let body = serde_json::to_vec(&msg).unwrap();
        let decoded: FactorialMessage = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.number, "42");
    }
}
