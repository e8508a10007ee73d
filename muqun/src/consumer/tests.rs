mod close_test;

use crate::{
    config::GroupConfig,
    errors::{GroupError, RegistryError, SourceError},
    registry::{Bootstrap, GroupOps, InstanceOps, Partition, Suite, TopicOps},
    source::{MessageSource, PartitionStream},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::{
    sync::oneshot,
    time::{Duration, sleep},
};

/// 最小能力组合，按复现启动/关闭竞争所需的时序作延迟与出错
#[derive(Default)]
pub(crate) struct RacingBootstrap;

#[async_trait]
impl Bootstrap for RacingBootstrap {
    async fn connect(
        &self,
        _group: &str,
        _instance_id: &str,
        _endpoints: &[String],
        _config: &GroupConfig,
    ) -> Result<Suite, GroupError> {
        Ok(Suite {
            group: Arc::new(RacingGroup::default()),
            instance: Arc::new(RacingInstance),
            topics: Arc::new(RacingTopics),
            source: Arc::new(RacingSource),
        })
    }
}

#[derive(Default)]
struct RacingGroup {
    watchers: Mutex<Vec<oneshot::Sender<()>>>,
}

#[async_trait]
impl GroupOps for RacingGroup {
    async fn exists(&self) -> Result<bool, RegistryError> {
        Ok(true)
    }

    async fn create(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn fetch_offset(&self, _topic: &str, _partition: i32) -> Result<i64, RegistryError> {
        Ok(1)
    }

    async fn commit_offset(
        &self,
        _topic: &str,
        _partition: i32,
        _offset: i64,
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn reset_offsets(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn watch_instances(
        &self,
    ) -> Result<(Vec<String>, oneshot::Receiver<()>), RegistryError> {
        // 监视时延为关闭路径抢先推进留出窗口
        sleep(Duration::from_millis(5)).await;
        let (tx, rx) = oneshot::channel();
        self.watchers.lock().unwrap().push(tx);
        Ok((
            vec!["test-instance-a".to_string(), "test-instance-b".to_string()],
            rx,
        ))
    }
}

struct RacingInstance;

#[async_trait]
impl InstanceOps for RacingInstance {
    async fn register(&self, _topics: &[String]) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn registered(&self) -> Result<bool, RegistryError> {
        Ok(true)
    }

    async fn claim_partition(&self, _topic: &str, _partition: i32) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn release_partition(&self, _topic: &str, _partition: i32) -> Result<(), RegistryError> {
        Ok(())
    }
}

struct RacingTopics;

#[async_trait]
impl TopicOps for RacingTopics {
    async fn topic_partitions(&self, _topic: &str) -> Result<Vec<Partition>, RegistryError> {
        // 出错迫使主题消费者在关闭期间向 errors 通道投递
        Err(RegistryError::Store("测试错误".to_string()))
    }

    async fn close(&self) -> Result<(), RegistryError> {
        // 时延让关闭竞争的资源清理有机会与在途任务交错
        sleep(Duration::from_millis(100)).await;
        Ok(())
    }
}

struct RacingSource;

#[async_trait]
impl MessageSource for RacingSource {
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        _offset: i64,
    ) -> Result<PartitionStream, SourceError> {
        Err(SourceError::UnknownPartition {
            topic: topic.to_string(),
            partition,
        })
    }

    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}
