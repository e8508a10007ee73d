//! 进程内能力实现
//!
//! 在单进程内完整实现元数据存储与消息源两侧能力：命名共享集群让同进程
//! 的多个实例相互发现并竞争分区，测试套件与内嵌部署直接使用。注册与
//! 认领的临时语义由显式注销或 [`MemoryCluster::expire_instance`] 模拟。

use crate::{
    GroupMessage, OFFSET_NEWEST, OFFSET_OLDEST,
    config::GroupConfig,
    errors::{GroupError, RegistryError, SourceError},
    registry::{Bootstrap, GroupOps, InstanceOps, Partition, Suite, TopicOps},
    source::{MessageSource, PartitionStream},
};
use ahash::AHashMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    sync::{Arc, LazyLock, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

static CLUSTERS: LazyLock<Mutex<AHashMap<String, Arc<MemoryCluster>>>> =
    LazyLock::new(|| Mutex::new(AHashMap::new()));

/// 进程内集群
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

#[derive(Default)]
struct ClusterState {
    topics: AHashMap<String, Vec<PartitionLog>>,
    groups: AHashMap<String, GroupState>,
}

struct PartitionLog {
    leader: i32,
    low: i64,
    next: i64,
    records: Vec<GroupMessage>,
    high_tx: watch::Sender<i64>,
    interrupt: CancellationToken,
    err_txs: Vec<mpsc::Sender<SourceError>>,
}

impl PartitionLog {
    fn new(leader: i32) -> Self {
        let (high_tx, _) = watch::channel(0);
        Self {
            leader,
            low: 0,
            next: 0,
            records: Vec::new(),
            high_tx,
            interrupt: CancellationToken::new(),
            err_txs: Vec::new(),
        }
    }
}

#[derive(Default)]
struct GroupState {
    offsets: AHashMap<(String, i32), i64>,
    instances: AHashMap<String, Vec<String>>,
    claims: AHashMap<(String, i32), String>,
    watchers: Vec<oneshot::Sender<()>>,
}

impl GroupState {
    fn notify_watchers(&mut self) {
        for watcher in self.watchers.drain(..) {
            let _ = watcher.send(());
        }
    }
}

impl MemoryCluster {
    /// 创建一个独立集群
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ClusterState::default()),
        })
    }

    /// 获取进程级命名共享集群
    pub fn named(name: &str) -> Arc<Self> {
        let mut clusters = CLUSTERS.lock().unwrap();
        Arc::clone(clusters.entry(name.to_string()).or_insert_with(Self::new))
    }

    /// 创建主题
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let mut state = self.state.lock().unwrap();
        state.topics.entry(topic.to_string()).or_insert_with(|| {
            (0..partitions).map(|id| PartitionLog::new(id % 3)).collect()
        });
    }

    /// 写入一条消息，返回其偏移
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<i64, SourceError> {
        let mut state = self.state.lock().unwrap();
        let log = partition_log(&mut state, topic, partition)?;
        let offset = log.next;
        log.records.push(GroupMessage {
            topic: topic.to_string(),
            partition,
            offset,
            key,
            value,
            timestamp: now_millis(),
        });
        log.next = offset + 1;
        let _ = log.high_tx.send(log.next);
        Ok(offset)
    }

    /// 丢弃指定偏移之前的消息，抬升最旧可用偏移
    pub fn truncate_before(&self, topic: &str, partition: i32, offset: i64) {
        let mut state = self.state.lock().unwrap();
        if let Ok(log) = partition_log(&mut state, topic, partition) {
            log.records.retain(|m| m.offset >= offset);
            log.low = log.low.max(offset);
            log.next = log.next.max(offset);
        }
    }

    /// 掐断分区上的全部在消费流，模拟源侧断连
    pub fn interrupt_partition(&self, topic: &str, partition: i32) {
        let mut state = self.state.lock().unwrap();
        if let Ok(log) = partition_log(&mut state, topic, partition) {
            log.interrupt.cancel();
            log.interrupt = CancellationToken::new();
        }
    }

    /// 向分区上的在消费流注入一个流内错误
    pub fn inject_error(&self, topic: &str, partition: i32, message: &str) {
        let mut state = self.state.lock().unwrap();
        if let Ok(log) = partition_log(&mut state, topic, partition) {
            log.err_txs.retain(|tx| !tx.is_closed());
            for tx in &log.err_txs {
                let _ = tx.try_send(SourceError::Source(message.to_string()));
            }
        }
    }

    /// 模拟会话过期：清除实例的注册与全部分区认领
    pub fn expire_instance(&self, group: &str, instance: &str) {
        let mut state = self.state.lock().unwrap();
        let group_state = state.groups.entry(group.to_string()).or_default();
        group_state.instances.remove(instance);
        group_state.claims.retain(|_, holder| holder != instance);
        group_state.notify_watchers();
    }

    /// 查询分区认领的当前持有者
    pub fn claim_holder(&self, group: &str, topic: &str, partition: i32) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        let group_state = state.groups.entry(group.to_string()).or_default();
        group_state
            .claims
            .get(&(topic.to_string(), partition))
            .cloned()
    }

    /// 装配绑定到指定消费组与实例的能力组合
    pub fn suite(self: &Arc<Self>, group: &str, instance_id: &str, config: &GroupConfig) -> Suite {
        Suite {
            group: Arc::new(MemoryGroup {
                cluster: Arc::clone(self),
                group: group.to_string(),
            }),
            instance: Arc::new(MemoryInstance {
                cluster: Arc::clone(self),
                group: group.to_string(),
                instance: instance_id.to_string(),
            }),
            topics: Arc::new(MemoryTopics {
                cluster: Arc::clone(self),
            }),
            source: Arc::new(MemorySource {
                cluster: Arc::clone(self),
                buffer: config.channel_buffer_size,
            }),
        }
    }
}

fn partition_log<'s>(
    state: &'s mut ClusterState,
    topic: &str,
    partition: i32,
) -> Result<&'s mut PartitionLog, SourceError> {
    state
        .topics
        .get_mut(topic)
        .and_then(|logs| logs.get_mut(partition as usize))
        .ok_or_else(|| SourceError::UnknownPartition {
            topic: topic.to_string(),
            partition,
        })
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(-1)
}

/// 进程内能力工厂
pub struct MemoryBootstrap {
    cluster: Arc<MemoryCluster>,
}

impl MemoryBootstrap {
    /// 构造函数
    pub fn new(cluster: Arc<MemoryCluster>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl Bootstrap for MemoryBootstrap {
    async fn connect(
        &self,
        group: &str,
        instance_id: &str,
        _endpoints: &[String],
        config: &GroupConfig,
    ) -> Result<Suite, GroupError> {
        Ok(self.cluster.suite(group, instance_id, config))
    }
}

struct MemoryGroup {
    cluster: Arc<MemoryCluster>,
    group: String,
}

#[async_trait]
impl GroupOps for MemoryGroup {
    async fn exists(&self) -> Result<bool, RegistryError> {
        let state = self.cluster.state.lock().unwrap();
        Ok(state.groups.contains_key(&self.group))
    }

    async fn create(&self) -> Result<(), RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        state.groups.entry(self.group.clone()).or_default();
        Ok(())
    }

    async fn fetch_offset(&self, topic: &str, partition: i32) -> Result<i64, RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        Ok(group_state
            .offsets
            .get(&(topic.to_string(), partition))
            .copied()
            .unwrap_or(-1))
    }

    async fn commit_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        group_state
            .offsets
            .insert((topic.to_string(), partition), offset);
        Ok(())
    }

    async fn reset_offsets(&self) -> Result<(), RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        group_state.offsets.clear();
        Ok(())
    }

    async fn watch_instances(
        &self,
    ) -> Result<(Vec<String>, oneshot::Receiver<()>), RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        let (tx, rx) = oneshot::channel();
        group_state.watchers.push(tx);
        let mut snapshot: Vec<String> = group_state.instances.keys().cloned().collect();
        snapshot.sort();
        Ok((snapshot, rx))
    }
}

struct MemoryInstance {
    cluster: Arc<MemoryCluster>,
    group: String,
    instance: String,
}

#[async_trait]
impl InstanceOps for MemoryInstance {
    async fn register(&self, topics: &[String]) -> Result<(), RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        group_state
            .instances
            .insert(self.instance.clone(), topics.to_vec());
        group_state.notify_watchers();
        Ok(())
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        group_state.instances.remove(&self.instance);
        group_state.notify_watchers();
        Ok(())
    }

    async fn registered(&self) -> Result<bool, RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        Ok(group_state.instances.contains_key(&self.instance))
    }

    async fn claim_partition(&self, topic: &str, partition: i32) -> Result<(), RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        match group_state.claims.get(&(topic.to_string(), partition)) {
            Some(holder) if *holder != self.instance => Err(RegistryError::ClaimedByOther),
            _ => {
                group_state
                    .claims
                    .insert((topic.to_string(), partition), self.instance.clone());
                Ok(())
            }
        }
    }

    async fn release_partition(&self, topic: &str, partition: i32) -> Result<(), RegistryError> {
        let mut state = self.cluster.state.lock().unwrap();
        let group_state = state.groups.entry(self.group.clone()).or_default();
        match group_state.claims.get(&(topic.to_string(), partition)) {
            Some(holder) if *holder == self.instance => {
                group_state.claims.remove(&(topic.to_string(), partition));
                Ok(())
            }
            _ => Err(RegistryError::Store(format!(
                "未持有分区 {topic}/{partition} 的认领"
            ))),
        }
    }
}

struct MemoryTopics {
    cluster: Arc<MemoryCluster>,
}

#[async_trait]
impl TopicOps for MemoryTopics {
    async fn topic_partitions(&self, topic: &str) -> Result<Vec<Partition>, RegistryError> {
        let state = self.cluster.state.lock().unwrap();
        let logs = state
            .topics
            .get(topic)
            .ok_or_else(|| RegistryError::NoNode(topic.to_string()))?;
        Ok(logs
            .iter()
            .enumerate()
            .map(|(id, log)| Partition {
                id: id as i32,
                leader: log.leader,
            })
            .collect())
    }

    async fn close(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// 进程内消息源
pub struct MemorySource {
    cluster: Arc<MemoryCluster>,
    buffer: usize,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<PartitionStream, SourceError> {
        let (cursor, high_rx, interrupt, err_tx, errors) = {
            let mut state = self.cluster.state.lock().unwrap();
            let log = partition_log(&mut state, topic, partition)?;
            let cursor = match offset {
                OFFSET_OLDEST => log.low,
                OFFSET_NEWEST => log.next,
                o if o >= log.low && o <= log.next => o,
                _ => return Err(SourceError::OffsetOutOfRange),
            };
            let (err_tx, errors) = mpsc::channel(self.buffer);
            log.err_txs.retain(|tx| !tx.is_closed());
            log.err_txs.push(err_tx.clone());
            (
                cursor,
                log.high_tx.subscribe(),
                log.interrupt.clone(),
                err_tx,
                errors,
            )
        };

        let (msg_tx, messages) = mpsc::channel(self.buffer);
        let stop = CancellationToken::new();
        tokio::spawn(pump(
            Arc::clone(&self.cluster),
            topic.to_string(),
            partition,
            cursor,
            high_rx,
            stop.clone(),
            interrupt,
            msg_tx,
        ));
        drop(err_tx);
        debug!(topic, partition, cursor, "打开进程内分区流");
        Ok(PartitionStream::new(messages, errors, stop))
    }

    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump(
    cluster: Arc<MemoryCluster>,
    topic: String,
    partition: i32,
    mut cursor: i64,
    mut high_rx: watch::Receiver<i64>,
    stop: CancellationToken,
    interrupt: CancellationToken,
    msg_tx: mpsc::Sender<GroupMessage>,
) {
    loop {
        let batch: Vec<GroupMessage> = {
            let mut state = cluster.state.lock().unwrap();
            match partition_log(&mut state, &topic, partition) {
                Ok(log) => log
                    .records
                    .iter()
                    .filter(|m| m.offset >= cursor.max(log.low))
                    .cloned()
                    .collect(),
                Err(_) => return,
            }
        };

        for message in batch {
            let delivered = message.offset + 1;
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                _ = interrupt.cancelled() => return,
                sent = msg_tx.send(message) => {
                    if sent.is_err() {
                        return;
                    }
                    cursor = delivered;
                }
            }
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = interrupt.cancelled() => return,
            changed = high_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
