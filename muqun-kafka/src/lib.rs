//! # **muqun** 消息源能力的 rdkafka 实现
//!
//! 面向真实 Kafka 集群的 [`MessageSource`](muqun::source::MessageSource)：
//! 每个分区流独占一个 StreamConsumer，经分区队列把消息泵入流通道；
//! 打开流之前用池化的元数据消费者查询水位，越界偏移以类型化错误上报，
//! 由协调引擎按初始偏移策略回退。

pub(crate) mod pool;

pub mod source;

pub use source::KafkaSource;
