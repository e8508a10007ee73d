//! 偏移管理
//!
//! 内存台账记录各分区的最高处理位点，后台提交任务周期性地把推进过的
//! 位点写入元数据存储。存储中的取值是下一条待消费偏移，分区内单调不减。

use crate::{
    errors::{OffsetError, RegistryError},
    registry::GroupOps,
};
use ahash::AHashMap;
use std::sync::{Arc, Mutex};
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 偏移管理器
pub struct OffsetManager {
    group: Arc<dyn GroupOps>,
    ledger: Mutex<AHashMap<(String, i32), Arc<PartitionTracker>>>,
    stop: CancellationToken,
    committer: Mutex<Option<JoinHandle<()>>>,
}

struct PartitionTracker {
    state: Mutex<TrackerState>,
    advanced: Notify,
    /// 序化同一分区的存储写入，避免周期提交与终结提交交错回退
    commit_gate: tokio::sync::Mutex<()>,
}

struct TrackerState {
    highest_processed: i64,
    last_committed: i64,
}

impl PartitionTracker {
    fn new(committed: i64) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                highest_processed: committed - 1,
                last_committed: committed - 1,
            }),
            advanced: Notify::new(),
            commit_gate: tokio::sync::Mutex::new(()),
        }
    }
}

impl OffsetManager {
    /// 启动偏移管理器
    ///
    /// `commit_interval` 为零时不启动周期提交任务，位点仍会在刷新与
    /// 分区终结时写入存储。
    pub fn start(group: Arc<dyn GroupOps>, commit_interval: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            group,
            ledger: Mutex::new(AHashMap::new()),
            stop: CancellationToken::new(),
            committer: Mutex::new(None),
        });

        if !commit_interval.is_zero() {
            let cloned = Arc::clone(&manager);
            let handle = tokio::spawn(async move {
                let mut interval =
                    time::interval_at(Instant::now() + commit_interval, commit_interval);
                loop {
                    tokio::select! {
                        biased;
                        _ = cloned.stop.cancelled() => break,
                        _ = interval.tick() => {
                            if let Err(e) = cloned.commit_all().await {
                                warn!("周期提交偏移失败：{e}");
                            }
                        }
                    }
                }
            });
            *manager.committer.lock().unwrap() = Some(handle);
        }

        manager
    }

    /// 初始化分区台账
    ///
    /// 返回存储中的已提交偏移，无记录时返回负哨兵。
    pub async fn initialize_partition(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<i64, OffsetError> {
        let committed = self.group.fetch_offset(topic, partition).await?;
        let tracker = Arc::new(PartitionTracker::new(committed));
        self.ledger
            .lock()
            .unwrap()
            .insert((topic.to_string(), partition), tracker);
        Ok(committed)
    }

    /// 推进分区的最高处理位点
    ///
    /// 仅严格更大的偏移生效；返回是否推进。
    pub fn mark_as_processed(&self, topic: &str, partition: i32, offset: i64) -> bool {
        let tracker = {
            let ledger = self.ledger.lock().unwrap();
            match ledger.get(&(topic.to_string(), partition)) {
                Some(t) => Arc::clone(t),
                None => {
                    warn!(topic, partition, offset, "分区台账不存在，忽略处理标记");
                    return false;
                }
            }
        };

        let mut state = tracker.state.lock().unwrap();
        if offset > state.highest_processed {
            state.highest_processed = offset;
            drop(state);
            tracker.advanced.notify_waiters();
            true
        } else {
            false
        }
    }

    /// 终结分区台账
    ///
    /// 等待处理位点追上 `last_delivered` 或超出 `timeout`；超时同样把已
    /// 观察到的最高处理位点写入存储，再返回超时错误。台账条目随后移除。
    pub async fn finalize_partition(
        &self,
        topic: &str,
        partition: i32,
        last_delivered: i64,
        timeout: Duration,
    ) -> Result<(), OffsetError> {
        let key = (topic.to_string(), partition);
        let tracker = self
            .ledger
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| OffsetError::Uninitialized {
                topic: topic.to_string(),
                partition,
            })?;

        let mut result = Ok(());
        if last_delivered >= 0 {
            let deadline = Instant::now() + timeout;
            loop {
                let notified = tracker.advanced.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let processed = tracker.state.lock().unwrap().highest_processed;
                if processed >= last_delivered {
                    break;
                }
                debug!(topic, partition, processed, last_delivered, "等待应用处理完成");

                tokio::select! {
                    _ = &mut notified => {}
                    _ = time::sleep_until(deadline) => {
                        result = Err(OffsetError::ProcessingTimeout {
                            topic: topic.to_string(),
                            partition,
                            delivered: last_delivered,
                            processed,
                        });
                        break;
                    }
                }
            }

            if let Err(e) = self.commit_entry(topic, partition, &tracker).await {
                warn!(topic, partition, "终结提交失败：{e}");
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }

        self.ledger.lock().unwrap().remove(&key);
        result
    }

    /// 立即提交全部台账条目
    pub async fn flush(&self) -> Result<(), OffsetError> {
        self.commit_all().await
    }

    /// 关闭偏移管理器
    ///
    /// 停止提交任务并做最后一次全量提交。
    pub async fn close(&self) -> Result<(), OffsetError> {
        self.stop.cancel();
        let handle = self.committer.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("提交任务异常退出：{e}");
            }
        }
        let result = self.commit_all().await;
        info!("偏移管理器已关闭");
        result
    }

    async fn commit_all(&self) -> Result<(), OffsetError> {
        let entries: Vec<((String, i32), Arc<PartitionTracker>)> = self
            .ledger
            .lock()
            .unwrap()
            .iter()
            .map(|(key, tracker)| (key.clone(), Arc::clone(tracker)))
            .collect();

        let mut result = Ok(());
        for ((topic, partition), tracker) in entries {
            if let Err(e) = self.commit_entry(&topic, partition, &tracker).await {
                warn!(topic = %topic, partition, "提交偏移失败：{e}");
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }
        result
    }

    async fn commit_entry(
        &self,
        topic: &str,
        partition: i32,
        tracker: &PartitionTracker,
    ) -> Result<(), RegistryError> {
        let _gate = tracker.commit_gate.lock().await;
        let next = {
            let state = tracker.state.lock().unwrap();
            if state.highest_processed <= state.last_committed {
                return Ok(());
            }
            state.highest_processed + 1
        };

        self.group.commit_offset(topic, partition, next).await?;

        let mut state = tracker.state.lock().unwrap();
        if next - 1 > state.last_committed {
            state.last_committed = next - 1;
        }
        debug!(topic, partition, offset = next, "已提交偏移");
        Ok(())
    }
}
