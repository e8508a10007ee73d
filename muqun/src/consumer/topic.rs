//! 主题消费者

use super::core::{GroupCore, Senders};
use crate::{
    assignment,
    errors::ConsumerError,
    registry::Partition,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, instrument};

/// 消费一个主题在本世代内分派给本实例的分区
#[instrument(name = "topic_consumer", skip_all, fields(group = %core.name, topic = %topic))]
pub(crate) async fn consume(
    core: Arc<GroupCore>,
    generation: CancellationToken,
    topic: String,
    members: Vec<String>,
    senders: Senders,
) {
    if generation.is_cancelled() {
        return;
    }
    info!("启动主题消费者");

    let partitions = match core.metadata.topic_partitions(&topic).await {
        Ok(partitions) => partitions,
        Err(e) => {
            error!("获取分区列表失败：{e}");
            send_error(
                &generation,
                &senders.errors,
                ConsumerError::new(topic.clone(), -1, e.into()),
            )
            .await;
            generation.cancel();
            return;
        }
    };

    let divided = assignment::divide_partitions(&members, &partitions);
    let mine: Vec<Partition> = divided
        .get(core.instance_id.as_str())
        .cloned()
        .unwrap_or_default();
    info!("认领 {}/{} 个分区", mine.len(), partitions.len());

    let tracker = TaskTracker::new();
    for partition in mine {
        tracker.spawn(super::partition::consume(
            Arc::clone(&core),
            generation.clone(),
            topic.clone(),
            partition.id,
            senders.clone(),
        ));
    }
    tracker.close();
    tracker.wait().await;
    info!("主题消费者退出");
}

/// 可取消的错误投递：关闭或重平衡时不会卡在写满的下游通道上
pub(crate) async fn send_error(
    generation: &CancellationToken,
    errors: &mpsc::Sender<ConsumerError>,
    error: ConsumerError,
) {
    tokio::select! {
        biased;
        _ = generation.cancelled() => {}
        _ = errors.send(error) => {}
    }
}
