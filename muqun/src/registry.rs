//! 元数据存储能力接口
//!
//! 协调引擎只通过本模块的窄接口访问外部设施：消费组级读写、实例级
//! 临时注册与分区认领、主题元数据查询，以及 [`Bootstrap`] 能力工厂。
//! 存储的线缆协议由外部实现承担。

use crate::{config::GroupConfig, errors::GroupError, errors::RegistryError, source::MessageSource};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

/// 分区描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// 分区 id
    pub id: i32,
    /// 当前首领 broker id
    pub leader: i32,
}

/// 消费组级存储能力
#[async_trait]
pub trait GroupOps: Send + Sync {
    /// 消费组是否已存在
    async fn exists(&self) -> Result<bool, RegistryError>;

    /// 创建消费组
    async fn create(&self) -> Result<(), RegistryError>;

    /// 获取分区的已提交偏移，无记录时返回 -1
    async fn fetch_offset(&self, topic: &str, partition: i32) -> Result<i64, RegistryError>;

    /// 提交分区偏移
    async fn commit_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), RegistryError>;

    /// 清除消费组全部已提交偏移
    async fn reset_offsets(&self) -> Result<(), RegistryError>;

    /// 监视成员列表
    ///
    /// 返回当前成员快照与一次性变更事件，任何成员的加入或退出都会触发该事件。
    async fn watch_instances(&self)
    -> Result<(Vec<String>, oneshot::Receiver<()>), RegistryError>;
}

/// 实例级存储能力
///
/// 注册与认领均为临时节点语义：会话终止时由存储侧自动清除。
#[async_trait]
pub trait InstanceOps: Send + Sync {
    /// 以订阅主题集注册本实例
    async fn register(&self, topics: &[String]) -> Result<(), RegistryError>;

    /// 注销本实例
    async fn deregister(&self) -> Result<(), RegistryError>;

    /// 本实例是否仍在注册表中
    async fn registered(&self) -> Result<bool, RegistryError>;

    /// 认领分区，已被占用时返回 [`RegistryError::ClaimedByOther`]
    async fn claim_partition(&self, topic: &str, partition: i32) -> Result<(), RegistryError>;

    /// 释放分区认领
    async fn release_partition(&self, topic: &str, partition: i32) -> Result<(), RegistryError>;
}

/// 主题元数据能力
#[async_trait]
pub trait TopicOps: Send + Sync {
    /// 主题分区列表，按分区 id 升序并携带当前首领
    async fn topic_partitions(&self, topic: &str) -> Result<Vec<Partition>, RegistryError>;

    /// 关闭存储客户端
    async fn close(&self) -> Result<(), RegistryError>;
}

/// 一个实例所需的全部外部能力
pub struct Suite {
    /// 消费组级能力
    pub group: Arc<dyn GroupOps>,
    /// 实例级能力
    pub instance: Arc<dyn InstanceOps>,
    /// 主题元数据能力
    pub topics: Arc<dyn TopicOps>,
    /// 消息源能力
    pub source: Arc<dyn MessageSource>,
}

/// 能力工厂
///
/// [`ConsumerGroup::join_with`](crate::ConsumerGroup::join_with) 的注入点，
/// 把外部设施装配成 [`Suite`]。
#[async_trait]
pub trait Bootstrap: Send + Sync {
    /// 连接外部设施，产出绑定到指定消费组与实例的能力组合
    async fn connect(
        &self,
        group: &str,
        instance_id: &str,
        endpoints: &[String],
        config: &GroupConfig,
    ) -> Result<Suite, GroupError>;
}
