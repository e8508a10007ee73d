//! 分区消费者
//!
//! 在一个世代内独占一个分区：先在元数据存储中认领，再打开源侧分区流
//! 并把消息转投到共享通道，退出时终结台账并释放认领。

use super::{
    core::{GroupCore, Senders},
    topic::send_error,
};
use crate::{
    config::InitialOffset,
    errors::{ConsumerError, RegistryError, SourceError},
    source::PartitionStream,
};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[instrument(
    name = "partition_consumer",
    skip_all,
    fields(group = %core.name, topic = %topic, partition)
)]
pub(crate) async fn consume(
    core: Arc<GroupCore>,
    generation: CancellationToken,
    topic: String,
    partition: i32,
    senders: Senders,
) {
    // 处理超时决定认领重试预算，多出的两次给前任持有者留出
    // 观察成员变更并释放分区的余量
    let max_retries = core.config.processing_timeout.as_millis().div_ceil(1000) as u32 + 2;
    for attempt in 1..=max_retries {
        tokio::select! {
            biased;
            _ = generation.cancelled() => return,
            _ = time::sleep(Duration::from_secs(1)) => {}
        }
        match core.instance.claim_partition(&topic, partition).await {
            Ok(()) => break,
            Err(RegistryError::ClaimedByOther) if attempt < max_retries => {
                debug!("分区仍被其他实例持有，等待其释放（第 {attempt}/{max_retries} 次）");
            }
            Err(e) if attempt < max_retries => {
                warn!("认领分区失败，一秒后重试（第 {attempt}/{max_retries} 次）：{e}");
            }
            Err(e) => {
                error!("认领分区失败：{e}");
                send_error(
                    &generation,
                    &senders.errors,
                    ConsumerError::new(topic.clone(), partition, e.into()),
                )
                .await;
                return;
            }
        }
    }
    debug!("已认领分区");

    run_claimed(&core, &generation, &topic, partition, &senders).await;

    match core.instance.release_partition(&topic, partition).await {
        Ok(()) => debug!("已释放分区"),
        Err(e) => {
            error!("释放分区失败：{e}");
            // 关闭阶段下游通道可能已满或已关，滞后错误尽力投递，失败即丢弃
            let late = ConsumerError::new(topic.clone(), partition, e.into());
            if senders.errors.try_send(late).is_err() {
                debug!("错误通道不可用，丢弃释放错误");
            }
        }
    }
}

async fn run_claimed(
    core: &Arc<GroupCore>,
    generation: &CancellationToken,
    topic: &str,
    partition: i32,
    senders: &Senders,
) {
    let committed = match core.offsets.initialize_partition(topic, partition).await {
        Ok(offset) => offset,
        Err(e) => {
            error!("获取初始偏移失败：{e}");
            return;
        }
    };
    let start = if committed >= 0 {
        info!("从已提交偏移 {committed} 恢复消费");
        committed
    } else {
        match core.config.initial {
            InitialOffset::Oldest => info!("无已提交偏移，从最旧可用偏移开始消费"),
            InitialOffset::Newest => info!("无已提交偏移，仅消费新到达的消息"),
        }
        core.config.initial.sentinel()
    };

    let mut stream = match open_stream(core, topic, partition, start).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("打开分区流失败：{e}");
            return;
        }
    };

    let mut last_offset: i64 = -1;
    'consuming: loop {
        tokio::select! {
            biased;
            _ = generation.cancelled() => break 'consuming,
            inner = stream.errors.recv() => match inner {
                Some(e) => {
                    let forwarded = ConsumerError::new(topic.to_string(), partition, e.into());
                    tokio::select! {
                        biased;
                        _ = generation.cancelled() => break 'consuming,
                        sent = senders.errors.send(forwarded) => {
                            if sent.is_err() {
                                break 'consuming;
                            }
                        }
                    }
                }
                None => {
                    info!("分区流被源侧断开，自偏移 {last_offset} 重建消费");
                    stream.close();
                    stream = match open_stream(core, topic, partition, last_offset).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            error!("重建分区流失败：{e}");
                            break 'consuming;
                        }
                    };
                }
            },
            message = stream.messages.recv() => match message {
                Some(message) => {
                    let offset = message.offset;
                    tokio::select! {
                        biased;
                        _ = generation.cancelled() => break 'consuming,
                        sent = senders.messages.send(message) => {
                            if sent.is_err() {
                                break 'consuming;
                            }
                            last_offset = offset;
                        }
                    }
                }
                None => {
                    info!("分区流被源侧断开，自偏移 {last_offset} 重建消费");
                    stream.close();
                    stream = match open_stream(core, topic, partition, last_offset).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            error!("重建分区流失败：{e}");
                            break 'consuming;
                        }
                    };
                }
            },
        }
    }

    stream.close();
    info!("停止分区消费，最后投递偏移 {last_offset}");
    if let Err(e) = core
        .offsets
        .finalize_partition(topic, partition, last_offset, core.config.processing_timeout)
        .await
    {
        warn!("{e}");
    }
}

/// 打开分区流，具体偏移越界时按初始偏移策略回退重试一次
async fn open_stream(
    core: &Arc<GroupCore>,
    topic: &str,
    partition: i32,
    offset: i64,
) -> Result<PartitionStream, SourceError> {
    match core.source.consume_partition(topic, partition, offset).await {
        Err(SourceError::OffsetOutOfRange) => {
            match core.config.initial {
                InitialOffset::Oldest => warn!("偏移 {offset} 越界，回退到最旧可用偏移"),
                InitialOffset::Newest => warn!("偏移 {offset} 越界，回退到最新偏移"),
            }
            core.source
                .consume_partition(topic, partition, core.config.initial.sentinel())
                .await
        }
        other => other,
    }
}
