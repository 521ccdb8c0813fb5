//! `rdkafka`-backed [`Topic`] implementation, enabled by the `kafka` feature.
//! Producers use acknowledged sends with librdkafka's own retry/backoff;
//! consumers disable auto-commit and commit explicitly after the caller's
//! per-message pipeline succeeds.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as RdConsumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as RdMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::TopicPartitionList;

use crate::{Consumer, Message, Producer, QueueError, Topic};

pub struct KafkaTopic {
    name: String,
    brokers: String,
    partition_count: u32,
}

impl KafkaTopic {
    pub fn new(name: impl Into<String>, brokers: impl Into<String>, partition_count: u32) -> Self {
        Self {
            name: name.into(),
            brokers: brokers.into(),
            partition_count,
        }
    }
}

impl Topic for KafkaTopic {
    fn producer(&self) -> std::sync::Arc<dyn Producer> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("message.send.max.retries", "5")
            .set("retry.backoff.ms", "200")
            .create()
            .expect("failed to construct Kafka producer");
        std::sync::Arc::new(KafkaProducer {
            producer,
            topic: self.name.clone(),
        })
    }

    fn consumer(&self, group: &str, partition: u32) -> Box<dyn Consumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .expect("failed to construct Kafka consumer");

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition(&self.name, partition as i32);
        consumer
            .assign(&assignment)
            .expect("failed to assign partition");

        Box::new(KafkaConsumer {
            consumer,
            topic: self.name.clone(),
            partition,
        })
    }

    fn partition_count(&self) -> u32 {
        self.partition_count
    }
}

struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn send(&self, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map(|_| ())
            .map_err(|(err, _)| QueueError::PublishFailed(err.to_string()))
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
    partition: u32,
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn recv(&mut self) -> Result<Message, QueueError> {
        let borrowed = self
            .consumer
            .recv()
            .await
            .map_err(|e: KafkaError| QueueError::ConsumerError(e.to_string()))?;
        let key = borrowed
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();
        let payload = borrowed.payload().unwrap_or_default().to_vec();
        Ok(Message {
            key,
            payload,
            partition: self.partition,
            offset: borrowed.offset() as u64,
        })
    }

    async fn commit(&mut self, message: &Message) -> Result<(), QueueError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &self.topic,
            message.partition as i32,
            rdkafka::Offset::Offset(message.offset as i64 + 1),
        )
        .map_err(|e| QueueError::ConsumerError(e.to_string()))?;
        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Sync)
            .map_err(|e| QueueError::ConsumerError(e.to_string()))
    }
}
