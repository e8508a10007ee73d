//! 消息源能力接口

use crate::{GroupMessage, errors::SourceError};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 单分区消息流
///
/// 两条通道终止（返回 `None`）表示流已被源侧断开，消费者应在最后投递
/// 偏移处重建消费。
pub struct PartitionStream {
    /// 消息通道
    pub messages: mpsc::Receiver<GroupMessage>,
    /// 流内错误通道
    pub errors: mpsc::Receiver<SourceError>,
    stop: CancellationToken,
}

impl PartitionStream {
    /// 组装分区流
    pub fn new(
        messages: mpsc::Receiver<GroupMessage>,
        errors: mpsc::Receiver<SourceError>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            messages,
            errors,
            stop,
        }
    }

    /// 关闭流，终止源侧泵任务
    pub fn close(&self) {
        self.stop.cancel();
    }
}

impl Drop for PartitionStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// 消息源能力
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// 自指定偏移打开一个分区流
    ///
    /// `offset` 可以是具体偏移，也可以是 [`OFFSET_OLDEST`](crate::OFFSET_OLDEST)
    /// 或 [`OFFSET_NEWEST`](crate::OFFSET_NEWEST) 哨兵；具体偏移越界时返回
    /// [`SourceError::OffsetOutOfRange`]。
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<PartitionStream, SourceError>;

    /// 关闭消息源
    async fn close(&self) -> Result<(), SourceError>;
}
