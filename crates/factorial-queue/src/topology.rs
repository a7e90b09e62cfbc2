//! Declares the three durable queues described in this service's pipeline
//! design: the main queue, a TTL-gated retry queue, and a terminal DLQ.
//!
//! ```text
//! <Q>        --dead-letters-to-->  <Q>.retry.exchange / <Q>.retry
//! <Q>.retry  --5s TTL, then dead-letters-to-->  default exchange / <Q>
//! <Q>.dlq    terminal parking lot
//! ```

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};

use crate::QueueError;

/// Broker-side retry back-off: messages dead-lettered into `<Q>.retry` sit
/// for this long before being republished to `<Q>`.
pub const RETRY_TTL_MS: u32 = 5_000;

/// Unacked-window size per channel.
pub const PREFETCH_COUNT: u16 = 100;

fn retry_exchange_name(queue_name: &str) -> String {
    format!("{queue_name}.retry.exchange")
}

pub fn retry_queue_name(queue_name: &str) -> String {
    format!("{queue_name}.retry")
}

pub fn dlq_name(queue_name: &str) -> String {
    format!("{queue_name}.dlq")
}

/// Declares the main/retry/DLQ queues and sets the channel's prefetch.
pub async fn declare_topology(channel: &Channel, queue_name: &str) -> Result<(), QueueError> {
    let retry_exchange = retry_exchange_name(queue_name);
    let retry_queue = retry_queue_name(queue_name);
    let dlq = dlq_name(queue_name);

    channel
        .exchange_declare(
            &retry_exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut main_args = FieldTable::default();
    main_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(retry_exchange.clone().into()),
    );
    main_args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(retry_queue.clone().into()),
    );
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            main_args,
        )
        .await?;

    let mut retry_args = FieldTable::default();
    retry_args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongUInt(RETRY_TTL_MS),
    );
    retry_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString("".into()),
    );
    retry_args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(queue_name.into()),
    );
    channel
        .queue_declare(
            &retry_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            retry_args,
        )
        .await?;
    channel
        .queue_bind(
            &retry_queue,
            &retry_exchange,
            &retry_queue,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(
            &dlq,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .basic_qos(PREFETCH_COUNT, Default::default())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names_follow_the_documented_scheme() {
        assert_eq!(retry_queue_name("factorial-calculations"), "factorial-calculations.retry");
        assert_eq!(dlq_name("factorial-calculations"), "factorial-calculations.dlq");
        assert_eq!(
            retry_exchange_name("factorial-calculations"),
            "factorial-calculations.retry.exchange"
        );
    }
}
