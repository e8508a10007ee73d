pub(crate) use bytes::Bytes;
pub(crate) use muqun::{
    ConsumerGroup, GroupMessage,
    config::GroupConfig,
    memory::{MemoryBootstrap, MemoryCluster},
};
pub(crate) use rstest::{fixture, rstest};
pub(crate) use std::sync::Arc;
pub(crate) use tokio::time::{Duration, sleep, timeout};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::fmt;

static SETUP: Once = Once::new();

#[fixture]
pub(crate) fn setup() {
    SETUP.call_once(|| {
        fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .with_test_writer()
            .init();
    });
}

/// 缩短各项时限的测试配置
pub(crate) fn test_config() -> GroupConfig {
    GroupConfig {
        processing_timeout: Duration::from_secs(2),
        commit_interval: Duration::from_millis(100),
        ..GroupConfig::default()
    }
}

pub(crate) fn produce_n(cluster: &MemoryCluster, topic: &str, partition: i32, count: usize) {
    for i in 0..count {
        cluster
            .produce(topic, partition, None, Bytes::from(format!("消息-{i}")))
            .unwrap();
    }
}

pub(crate) async fn recv_message(consumer: &mut ConsumerGroup) -> GroupMessage {
    timeout(Duration::from_secs(60), consumer.messages().recv())
        .await
        .expect("等待消息超时")
        .expect("消息通道已关闭")
}
