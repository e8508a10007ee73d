//! rdkafka 消息源

use crate::pool::MetaPool;
use async_trait::async_trait;
use bytes::Bytes;
use muqun::{
    GroupMessage, OFFSET_NEWEST, OFFSET_OLDEST,
    config::GroupConfig,
    errors::SourceError,
    source::{MessageSource, PartitionStream},
};
use rdkafka::{
    ClientConfig, Message, Offset, TopicPartitionList,
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    message::OwnedMessage,
    types::RDKafkaErrorCode,
};
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// rdkafka 消息源
pub struct KafkaSource {
    config: ClientConfig,
    buffer: usize,
    timeout: Duration,
    pool: MetaPool,
}

impl KafkaSource {
    /// 构造函数
    pub fn new(brokers: &[String], group_config: &GroupConfig) -> Self {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", brokers.join(","));
        config.set("group.id", &group_config.client_id);
        config.set("client.id", &group_config.client_id);
        config.set("enable.auto.commit", "false");
        config.set("enable.partition.eof", "false");
        config.set("auto.offset.reset", "error");

        let pool = MetaPool::new(config.clone(), 4);
        Self {
            config,
            buffer: group_config.channel_buffer_size.max(1),
            timeout: group_config.session_timeout,
            pool,
        }
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<PartitionStream, SourceError> {
        let start = start_offset(offset).ok_or(SourceError::OffsetOutOfRange)?;
        if let Offset::Offset(o) = start {
            let guard = self.pool.get()?;
            let (low, high) = guard
                .fetch_watermarks(topic, partition, self.timeout)
                .map_err(|e| SourceError::Source(e.to_string()))?;
            if o < low || o > high {
                return Err(SourceError::OffsetOutOfRange);
            }
        }

        let consumer: StreamConsumer = self
            .config
            .create()
            .map_err(|e| SourceError::Source(e.to_string()))?;
        let consumer = Arc::new(consumer);
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, start)
            .map_err(|e| SourceError::Source(e.to_string()))?;
        consumer
            .assign(&tpl)
            .map_err(|e| SourceError::Source(e.to_string()))?;
        let queue = consumer
            .split_partition_queue(topic, partition)
            .ok_or_else(|| SourceError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })?;

        let (msg_tx, messages) = mpsc::channel(self.buffer);
        let (err_tx, errors) = mpsc::channel(self.buffer);
        let stop = CancellationToken::new();

        // 分区队列拆出后主消费者仍需被轮询，事件才能得到驱动
        let driver = Arc::clone(&consumer);
        let driver_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = driver_stop.cancelled() => break,
                    event = driver.recv() => {
                        if let Err(e) = event {
                            debug!("主消费者事件：{e}");
                        }
                    }
                }
            }
        });

        let pump_stop = stop.clone();
        let pump_topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = pump_stop.cancelled() => break,
                    received = queue.recv() => match received {
                        Ok(message) => {
                            let message = convert(message.detach());
                            if msg_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(topic = %pump_topic, partition, "分区流错误：{e}");
                            if err_tx.send(map_error(e)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            if let Err(e) = consumer.unassign() {
                debug!("解除分区指派失败：{e}");
            }
        });

        debug!(topic, partition, offset, "打开分区流");
        Ok(PartitionStream::new(messages, errors, stop))
    }

    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

pub(crate) fn start_offset(offset: i64) -> Option<Offset> {
    match offset {
        OFFSET_OLDEST => Some(Offset::Beginning),
        OFFSET_NEWEST => Some(Offset::End),
        o if o >= 0 => Some(Offset::Offset(o)),
        _ => None,
    }
}

pub(crate) fn convert(message: OwnedMessage) -> GroupMessage {
    GroupMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        value: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
        timestamp: message.timestamp().to_millis().unwrap_or(-1),
    }
}

pub(crate) fn map_error(error: KafkaError) -> SourceError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::OffsetOutOfRange) => SourceError::OffsetOutOfRange,
        _ => SourceError::Source(error.to_string()),
    }
}
