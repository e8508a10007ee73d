//! # **muqun** 消费组协调核心库
//!
//! 一组进程通过外部强一致元数据存储协作消费分区日志：实例相互发现、
//! 瓜分分区、经统一通道投递消息、周期性持久化处理进度，并在关闭或
//! 重平衡时有序释放分区归属。

#![warn(missing_docs)]

pub(crate) mod limiter;

pub mod assignment;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod memory;
pub mod offsets;
pub mod registry;
pub mod source;

use bytes::Bytes;

/// 最旧可用偏移哨兵
pub const OFFSET_OLDEST: i64 = -2;

/// 最新偏移哨兵
pub const OFFSET_NEWEST: i64 = -1;

/// 消费消息结构
#[derive(Debug, Clone)]
pub struct GroupMessage {
    /// 主题
    pub topic: String,
    /// 分区 id
    pub partition: i32,
    /// 消息偏移
    pub offset: i64,
    /// 消息键
    pub key: Option<Bytes>,
    /// 消息体
    pub value: Bytes,
    /// 消息时间戳，Unix 毫秒，未知时为 -1
    pub timestamp: i64,
}

pub use consumer::ConsumerGroup;
