//! 偏移管理器行为

mod common;
use common::*;
use muqun::{errors::OffsetError, offsets::OffsetManager, registry::Suite};

fn observer(cluster: &Arc<MemoryCluster>, group: &str) -> Suite {
    cluster.suite(group, "observer", &GroupConfig::default())
}

fn manager(cluster: &Arc<MemoryCluster>, group: &str, interval: Duration) -> Arc<OffsetManager> {
    let suite = cluster.suite(group, "manager", &GroupConfig::default());
    OffsetManager::start(suite.group, interval)
}

#[rstest]
#[tokio::test]
async fn initialize_returns_negative_sentinel_without_commit(_setup: ()) {
    let cluster = MemoryCluster::new();
    let manager = manager(&cluster, "g-offsets", Duration::ZERO);
    assert_eq!(manager.initialize_partition("t", 0).await.unwrap(), -1);
    manager.close().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn marks_only_advance(_setup: ()) {
    let cluster = MemoryCluster::new();
    let manager = manager(&cluster, "g-offsets", Duration::ZERO);
    manager.initialize_partition("t", 0).await.unwrap();

    assert!(manager.mark_as_processed("t", 0, 5));
    assert!(!manager.mark_as_processed("t", 0, 3));
    assert!(!manager.mark_as_processed("t", 0, 5));
    assert!(manager.mark_as_processed("t", 0, 6));
    assert!(!manager.mark_as_processed("t", 1, 6), "未初始化的分区应被忽略");
    manager.close().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn flush_stores_next_offset_to_consume(_setup: ()) {
    let cluster = MemoryCluster::new();
    let manager = manager(&cluster, "g-offsets", Duration::ZERO);
    manager.initialize_partition("t", 0).await.unwrap();
    manager.mark_as_processed("t", 0, 9);
    manager.flush().await.unwrap();

    let suite = observer(&cluster, "g-offsets");
    assert_eq!(suite.group.fetch_offset("t", 0).await.unwrap(), 10);
    assert_eq!(manager.initialize_partition("t", 0).await.unwrap(), 10);
    manager.close().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn committed_offsets_never_regress(_setup: ()) {
    let cluster = MemoryCluster::new();
    let manager = manager(&cluster, "g-offsets", Duration::ZERO);
    manager.initialize_partition("t", 0).await.unwrap();
    let suite = observer(&cluster, "g-offsets");

    manager.mark_as_processed("t", 0, 7);
    manager.flush().await.unwrap();
    assert_eq!(suite.group.fetch_offset("t", 0).await.unwrap(), 8);

    // 较小的标记不生效，重复刷新不会把位点写回去
    manager.mark_as_processed("t", 0, 3);
    manager.flush().await.unwrap();
    assert_eq!(suite.group.fetch_offset("t", 0).await.unwrap(), 8);
    manager.close().await.unwrap();
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn committer_runs_periodically(_setup: ()) {
    let cluster = MemoryCluster::new();
    let manager = manager(&cluster, "g-offsets", Duration::from_secs(1));
    manager.initialize_partition("t", 0).await.unwrap();
    manager.mark_as_processed("t", 0, 4);

    sleep(Duration::from_millis(1500)).await;
    let suite = observer(&cluster, "g-offsets");
    assert_eq!(suite.group.fetch_offset("t", 0).await.unwrap(), 5);
    manager.close().await.unwrap();
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn finalize_waits_for_processing(_setup: ()) {
    let cluster = MemoryCluster::new();
    let manager = manager(&cluster, "g-offsets", Duration::ZERO);
    manager.initialize_partition("t", 0).await.unwrap();

    let marker = Arc::clone(&manager);
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        marker.mark_as_processed("t", 0, 42);
    });

    manager
        .finalize_partition("t", 0, 42, Duration::from_secs(2))
        .await
        .unwrap();

    let suite = observer(&cluster, "g-offsets");
    assert_eq!(suite.group.fetch_offset("t", 0).await.unwrap(), 43);
    manager.close().await.unwrap();
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn finalize_timeout_still_commits_highest_mark(_setup: ()) {
    let cluster = MemoryCluster::new();
    let manager = manager(&cluster, "g-offsets", Duration::ZERO);
    manager.initialize_partition("t", 0).await.unwrap();
    manager.mark_as_processed("t", 0, 40);

    let result = manager
        .finalize_partition("t", 0, 42, Duration::from_millis(200))
        .await;
    assert!(matches!(
        result,
        Err(OffsetError::ProcessingTimeout { processed: 40, .. })
    ));

    let suite = observer(&cluster, "g-offsets");
    assert_eq!(suite.group.fetch_offset("t", 0).await.unwrap(), 41);

    // 台账条目已移除，再次终结报未初始化
    assert!(matches!(
        manager.finalize_partition("t", 0, 42, Duration::ZERO).await,
        Err(OffsetError::Uninitialized { .. })
    ));
    manager.close().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn close_commits_outstanding_marks(_setup: ()) {
    let cluster = MemoryCluster::new();
    let manager = manager(&cluster, "g-offsets", Duration::from_secs(600));
    manager.initialize_partition("t", 0).await.unwrap();
    manager.mark_as_processed("t", 0, 12);
    manager.close().await.unwrap();

    let suite = observer(&cluster, "g-offsets");
    assert_eq!(suite.group.fetch_offset("t", 0).await.unwrap(), 13);
}
