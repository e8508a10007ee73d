//! 消费组协调器
//!
//! 顶层循环每轮构成一个世代：获取成员快照与变更监视，按主题派生消费
//! 任务，由分区消费者认领分区并向统一通道投递消息。成员变更取消当前
//! 世代、等待全部工作任务退出并释放认领，再开启下一个世代；关闭路径
//! 则在此之上依次完成最终提交、实例注销与通道关闭。

pub(crate) mod core;
pub(crate) mod partition;
pub(crate) mod topic;
#[cfg(test)]
pub(crate) mod tests;

pub use self::core::ConsumerGroup;
