//! 错误定义

use thiserror::Error;

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置加载错误
    #[error("配置加载错误：{0}")]
    Load(#[from] config::ConfigError),
    /// 配置无效
    #[error("配置无效：{0}")]
    Invalid(String),
}

impl From<&str> for ConfigError {
    fn from(s: &str) -> Self {
        ConfigError::Invalid(s.to_owned())
    }
}

/// 元数据存储错误
#[derive(Debug, Error)]
pub enum RegistryError {
    /// 分区已被其他实例占用
    #[error("分区已被其他实例占用")]
    ClaimedByOther,
    /// 节点不存在
    #[error("节点不存在：{0}")]
    NoNode(String),
    /// 存储访问错误
    #[error("存储访问错误：{0}")]
    Store(String),
}

/// 消息源错误
#[derive(Debug, Error)]
pub enum SourceError {
    /// 请求的偏移越界
    #[error("偏移越界")]
    OffsetOutOfRange,
    /// 主题或分区不存在
    #[error("主题或分区不存在：{topic}/{partition}")]
    UnknownPartition {
        /// 主题
        topic: String,
        /// 分区 id
        partition: i32,
    },
    /// 消息源访问错误
    #[error("消息源错误：{0}")]
    Source(String),
}

/// 偏移管理错误
#[derive(Debug, Error)]
pub enum OffsetError {
    /// 等待应用处理完成超时
    #[error("等待分区 {topic}/{partition} 处理至偏移 {delivered} 超时，已处理至 {processed}")]
    ProcessingTimeout {
        /// 主题
        topic: String,
        /// 分区 id
        partition: i32,
        /// 最后投递偏移
        delivered: i64,
        /// 超时时刻的最高处理偏移
        processed: i64,
    },
    /// 分区台账未初始化
    #[error("分区 {topic}/{partition} 的台账未初始化")]
    Uninitialized {
        /// 主题
        topic: String,
        /// 分区 id
        partition: i32,
    },
    /// 存储读写错误
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// 消费组生命周期错误
#[derive(Debug, Error)]
pub enum GroupError {
    /// 消费组正在关闭
    #[error("消费组正在关闭")]
    AlreadyClosing,
    /// 配置错误
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// 存储错误
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// 偏移管理错误
    #[error(transparent)]
    Offsets(#[from] OffsetError),
    /// 消息源错误
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// 消费者错误内核
#[derive(Debug, Error)]
pub enum ConsumerErrorKind {
    /// 存储侧错误
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// 消息源侧错误
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// errors 通道投递的消费者错误
#[derive(Debug, Error)]
#[error("消费 {topic}/{partition} 错误：{source}")]
pub struct ConsumerError {
    /// 主题
    pub topic: String,
    /// 分区 id，整个主题层面的错误为 -1
    pub partition: i32,
    /// 底层错误
    #[source]
    pub source: ConsumerErrorKind,
}

impl ConsumerError {
    /// 构造函数
    pub fn new(topic: impl Into<String>, partition: i32, source: ConsumerErrorKind) -> Self {
        Self {
            topic: topic.into(),
            partition,
            source,
        }
    }
}
