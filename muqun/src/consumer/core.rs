//! 实例生命周期与世代循环

use crate::{
    GroupMessage,
    config::GroupConfig,
    consumer::topic,
    errors::{ConfigError, ConsumerError, GroupError, OffsetError, RegistryError},
    limiter::TokenBucket,
    memory::{MemoryBootstrap, MemoryCluster},
    offsets::OffsetManager,
    registry::{Bootstrap, GroupOps, InstanceOps, Suite, TopicOps},
    source::MessageSource,
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::{sync::mpsc, task::JoinHandle, time::Duration};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// 消费组实例句柄
///
/// 经 [`ConsumerGroup::join`] 或 [`ConsumerGroup::join_with`] 取得。消息与
/// 错误经两条独立通道投递；应用处理完一条消息后调用
/// [`commit_upto`](ConsumerGroup::commit_upto) 推进位点。
pub struct ConsumerGroup {
    core: Arc<GroupCore>,
    top: Mutex<Option<JoinHandle<()>>>,
    messages: mpsc::Receiver<GroupMessage>,
    errors: mpsc::Receiver<ConsumerError>,
}

pub(crate) struct GroupCore {
    pub(crate) name: String,
    pub(crate) instance_id: String,
    pub(crate) topics: Vec<String>,
    pub(crate) config: GroupConfig,
    pub(crate) group: Arc<dyn GroupOps>,
    pub(crate) instance: Arc<dyn InstanceOps>,
    pub(crate) metadata: Arc<dyn TopicOps>,
    pub(crate) source: Arc<dyn MessageSource>,
    pub(crate) offsets: Arc<OffsetManager>,
    /// 全局停止信号，仅由关闭路径触发一次
    pub(crate) stopper: CancellationToken,
    /// 停止信号与世代派生之间的互斥闩
    pub(crate) interlock: tokio::sync::Mutex<()>,
    pub(crate) senders: Mutex<Option<Senders>>,
    closing: AtomicBool,
    defunct: AtomicBool,
}

#[derive(Clone)]
pub(crate) struct Senders {
    pub(crate) messages: mpsc::Sender<GroupMessage>,
    pub(crate) errors: mpsc::Sender<ConsumerError>,
}

impl ConsumerGroup {
    /// 加入消费组
    ///
    /// 使用以首个地址命名的进程内共享集群；跨进程部署经
    /// [`join_with`](ConsumerGroup::join_with) 注入外部设施的能力工厂。
    pub async fn join(
        name: &str,
        topics: &[String],
        endpoints: &[String],
        config: GroupConfig,
    ) -> Result<Self, GroupError> {
        validate_join(name, topics, endpoints, &config)?;
        let cluster = MemoryCluster::named(&endpoints[0]);
        Self::join_with(name, topics, endpoints, config, &MemoryBootstrap::new(cluster)).await
    }

    /// 以指定能力工厂加入消费组
    pub async fn join_with(
        name: &str,
        topics: &[String],
        endpoints: &[String],
        mut config: GroupConfig,
        bootstrap: &dyn Bootstrap,
    ) -> Result<Self, GroupError> {
        validate_join(name, topics, endpoints, &config)?;
        config.client_id = name.to_string();

        let instance_id = Uuid::new_v4().to_string();
        let Suite {
            group,
            instance,
            topics: metadata,
            source,
        } = bootstrap
            .connect(name, &instance_id, endpoints, &config)
            .await?;

        if config.reset_offsets {
            info!("清除消费组 {name} 的全部已提交偏移");
            group.reset_offsets().await?;
        }

        if !group.exists().await? {
            info!("消费组 {name} 尚不存在，开始创建");
            group.create().await?;
        }
        instance.register(topics).await?;
        info!(
            group = name,
            instance = short_id(&instance_id),
            "实例已注册"
        );

        let offsets = OffsetManager::start(Arc::clone(&group), config.commit_interval);
        let buffer = config.channel_buffer_size.max(1);
        let (messages_tx, messages) = mpsc::channel(buffer);
        let (errors_tx, errors) = mpsc::channel(buffer);

        let core = Arc::new(GroupCore {
            name: name.to_string(),
            instance_id,
            topics: topics.to_vec(),
            config,
            group,
            instance,
            metadata,
            source,
            offsets,
            stopper: CancellationToken::new(),
            interlock: tokio::sync::Mutex::new(()),
            senders: Mutex::new(Some(Senders {
                messages: messages_tx,
                errors: errors_tx,
            })),
            closing: AtomicBool::new(false),
            defunct: AtomicBool::new(false),
        });
        let top = tokio::spawn(Arc::clone(&core).run());

        Ok(Self {
            core,
            top: Mutex::new(Some(top)),
            messages,
            errors,
        })
    }

    /// 消息通道
    pub fn messages(&mut self) -> &mut mpsc::Receiver<GroupMessage> {
        &mut self.messages
    }

    /// 错误通道
    pub fn errors(&mut self) -> &mut mpsc::Receiver<ConsumerError> {
        &mut self.errors
    }

    /// 标记消息及其之前的记录已处理完毕
    pub fn commit_upto(&self, message: &GroupMessage) {
        self.core
            .offsets
            .mark_as_processed(&message.topic, message.partition, message.offset);
    }

    /// 立即提交全部分区的处理位点
    pub async fn flush(&self) -> Result<(), OffsetError> {
        self.core.offsets.flush().await
    }

    /// 本实例是否仍在注册表中
    pub async fn registered(&self) -> Result<bool, RegistryError> {
        self.core.instance.registered().await
    }

    /// 实例是否已关闭
    pub fn closed(&self) -> bool {
        self.core.defunct.load(Ordering::SeqCst)
    }

    /// 消费组名称
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// 实例标识
    pub fn instance_id(&self) -> &str {
        &self.core.instance_id
    }

    /// 关闭消费组实例
    ///
    /// 幂等：首次调用执行完整关闭序列，后续调用返回
    /// [`GroupError::AlreadyClosing`]。序列为：触发停止信号（与世代派生
    /// 互斥）、等待顶层循环及全部工作任务退出、关闭偏移管理器做最终
    /// 提交、注销实例、关闭消息源、关闭两条输出通道、关闭存储客户端。
    pub async fn close(&self) -> Result<(), GroupError> {
        if self.core.closing.swap(true, Ordering::SeqCst) {
            return Err(GroupError::AlreadyClosing);
        }

        {
            let _guard = self.core.interlock.lock().await;
            self.core.stopper.cancel();
        }
        let top = self.top.lock().unwrap().take();
        if let Some(top) = top {
            if let Err(e) = top.await {
                error!("顶层循环异常退出：{e}");
            }
        }

        if let Err(e) = self.core.offsets.close().await {
            warn!("关闭偏移管理器失败：{e}");
        }

        let mut result = Ok(());
        match self.core.instance.deregister().await {
            Ok(()) => info!(
                group = %self.core.name,
                instance = short_id(&self.core.instance_id),
                "实例已注销"
            ),
            Err(e) => {
                error!("注销实例失败：{e}");
                result = Err(e.into());
            }
        }

        if let Err(e) = self.core.source.close().await {
            error!("关闭消息源失败：{e}");
            if result.is_ok() {
                result = Err(e.into());
            }
        }

        self.core.senders.lock().unwrap().take();
        self.core.defunct.store(true, Ordering::SeqCst);

        if let Err(e) = self.core.metadata.close().await {
            warn!("关闭存储客户端失败：{e}");
        }

        result
    }
}

impl GroupCore {
    /// 顶层循环，每轮迭代即一个世代
    #[instrument(
        name = "group_coordinator",
        skip_all,
        fields(group = %self.name, instance = %short_id(&self.instance_id))
    )]
    pub(crate) async fn run(self: Arc<Self>) {
        let mut limiter = TokenBucket::new(4, Duration::from_secs(1));
        loop {
            // 互斥闩保证：要么本轮在派生前观察到停止信号，要么关闭路径
            // 等到派生完成后才触发信号
            let guard = self.interlock.lock().await;
            if self.stopper.is_cancelled() {
                return;
            }
            limiter.acquire().await;

            let (members, mut change) = match self.group.watch_instances().await {
                Ok(watched) => watched,
                Err(e) => {
                    error!("获取注册实例列表失败：{e}");
                    return;
                }
            };
            info!("当前注册实例数：{}", members.len());

            let generation = CancellationToken::new();
            let tracker = TaskTracker::new();
            let senders = match self.senders.lock().unwrap().clone() {
                Some(senders) => senders,
                None => return,
            };
            for topic in &self.topics {
                tracker.spawn(topic::consume(
                    Arc::clone(&self),
                    generation.clone(),
                    topic.clone(),
                    members.clone(),
                    senders.clone(),
                ));
            }
            tracker.close();
            drop(guard);

            tokio::select! {
                biased;
                _ = self.stopper.cancelled() => {
                    generation.cancel();
                    tracker.wait().await;
                    return;
                }
                _ = &mut change => {
                    match self.instance.registered().await {
                        Ok(true) => {}
                        Ok(false) => match self.instance.register(&self.topics).await {
                            Ok(()) => info!("实例已重新注册"),
                            Err(e) => error!("实例重新注册失败：{e}"),
                        },
                        Err(e) => error!("查询实例注册状态失败：{e}"),
                    }
                    info!("成员列表变更，触发重平衡");
                    generation.cancel();
                    tracker.wait().await;
                }
                _ = generation.cancelled() => {
                    tracker.wait().await;
                }
            }
        }
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    &id[id.len().saturating_sub(12)..]
}

fn validate_join(
    name: &str,
    topics: &[String],
    endpoints: &[String],
    config: &GroupConfig,
) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err("消费组名称为空".into());
    }
    if topics.is_empty() {
        return Err("未提供订阅主题".into());
    }
    if endpoints.is_empty() {
        return Err("未提供元数据存储地址".into());
    }
    config.validate()
}
