//! Batch consumption with broker-TTL-driven retry.
//!
//! A delivery that fails processing is `nack`ed without requeue, which the
//! topology in [`crate::topology`] routes to the retry queue; once it has
//! been dead-lettered `x-death` enough times the handler instead publishes
//! it straight to the terminal DLQ and acks the original.

use factorial_types::FactorialMessage;
use futures_util::StreamExt;
use lapin::message::Delivery as RawDelivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};
use std::time::Duration;

use crate::topology::dlq_name;
use crate::QueueError;

/// A message has been redelivered this many times via the retry queue
/// before it is parked in the DLQ instead of retried again.
pub const MAX_RETRIES: u64 = 3;

/// Counts toward the retry ceiling; reconstructed from the `x-death` header
/// the broker stamps on every dead-lettered message.
#[derive(Debug, Clone, Default)]
pub struct DlqHeaders {
    pub retry_count: u64,
}

impl DlqHeaders {
    fn from_raw(delivery: &RawDelivery) -> Self {
        let count = delivery
            .properties
            .headers()
            .as_ref()
            .and_then(|headers| headers.inner().get("x-death"))
            .and_then(|value| match value {
                AMQPValue::FieldArray(arr) => arr.as_slice().first().cloned(),
                _ => None,
            })
            .and_then(|entry| match entry {
                AMQPValue::FieldTable(table) => table.inner().get("count").cloned(),
                _ => None,
            })
            .and_then(|count| match count {
                AMQPValue::LongLongInt(n) => Some(n as u64),
                AMQPValue::LongInt(n) => Some(n as u64),
                _ => None,
            })
            .unwrap_or(0);
        DlqHeaders { retry_count: count }
    }
}

/// One message pulled off the queue, parsed and annotated with its retry
/// history. Parse failures are not discarded here — the caller decides
/// whether a malformed body is retried or routed straight to the DLQ.
pub struct Delivery {
    raw: RawDelivery,
    pub number: Result<u64, String>,
    pub dlq_headers: DlqHeaders,
}

impl Delivery {
    fn from_raw(raw: RawDelivery) -> Self {
        let dlq_headers = DlqHeaders::from_raw(&raw);
        let number = serde_json::from_slice::<FactorialMessage>(&raw.data)
            .map_err(|e| e.to_string())
            .and_then(|msg| msg.number.parse::<u64>().map_err(|e| e.to_string()));
        Delivery {
            raw,
            number,
            dlq_headers,
        }
    }

    pub fn has_exceeded_retry_limit(&self) -> bool {
        self.dlq_headers.retry_count >= MAX_RETRIES
    }
}

pub struct BatchConsumer {
    channel: Channel,
    queue_name: String,
    batch_size: usize,
    /// How long to wait for the batch to fill out after the first delivery
    /// arrives, so a trickle of messages doesn't stall processing forever.
    linger: Duration,
}

impl BatchConsumer {
    pub fn new(channel: Channel, queue_name: impl Into<String>, batch_size: usize) -> Self {
        BatchConsumer {
            channel,
            queue_name: queue_name.into(),
            batch_size: batch_size.max(1),
            linger: Duration::from_millis(200),
        }
    }

    pub async fn consume(
        &self,
        consumer_tag: &str,
    ) -> Result<lapin::Consumer, QueueError> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    /// Pulls up to `batch_size` deliveries out of `consumer`, blocking for
    /// the first one and then giving stragglers `linger` to show up.
    pub async fn recv_batch(
        &self,
        consumer: &mut lapin::Consumer,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut batch = Vec::with_capacity(self.batch_size);
        match consumer.next().await {
            Some(delivery) => batch.push(Delivery::from_raw(delivery?)),
            None => return Ok(batch),
        }

        while batch.len() < self.batch_size {
            match tokio::time::timeout(self.linger, consumer.next()).await {
                Ok(Some(delivery)) => batch.push(Delivery::from_raw(delivery?)),
                Ok(None) | Err(_) => break,
            }
        }
        Ok(batch)
    }

    pub async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        delivery
            .raw
            .ack(BasicAckOptions::default())
            .await
            .map_err(QueueError::from)
    }

    /// Sends the delivery to the retry path by nacking without requeue; the
    /// topology's dead-letter wiring bounces it through the TTL retry queue.
    pub async fn retry(&self, delivery: &Delivery) -> Result<(), QueueError> {
        delivery
            .raw
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await
            .map_err(QueueError::from)
    }

    /// Publishes the delivery straight to the terminal DLQ, tagged with
    /// `{original_queue, failed_at, retry_count, failure_reason}`, and acks
    /// the original so it doesn't re-enter the retry cycle.
    pub async fn park_in_dlq(
        &self,
        delivery: &Delivery,
        failed_at_unix_secs: i64,
        failure_reason: &str,
    ) -> Result<(), QueueError> {
        let mut headers = FieldTable::default();
        headers.insert(
            "original_queue".into(),
            AMQPValue::LongString(self.queue_name.clone().into()),
        );
        headers.insert("failed_at".into(), AMQPValue::LongLongInt(failed_at_unix_secs));
        headers.insert(
            "retry_count".into(),
            AMQPValue::LongLongInt(delivery.dlq_headers.retry_count as i64),
        );
        headers.insert(
            "failure_reason".into(),
            AMQPValue::LongString(failure_reason.to_string().into()),
        );
        let properties = BasicProperties::default().with_headers(headers);

        self.channel
            .basic_publish(
                "",
                &dlq_name(&self.queue_name),
                BasicPublishOptions::default(),
                &delivery.raw.data,
                properties,
            )
            .await?
            .await?;
        self.ack(delivery).await
    }
}
