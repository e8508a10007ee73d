use super::*;
use crate::consumer::ConsumerGroup;
use rstest::*;

fn race_args() -> (String, Vec<String>, Vec<String>) {
    (
        "race-group".to_string(),
        vec!["topic".to_string()],
        vec!["localhost:2181".to_string()],
    )
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn join_then_close_immediately() {
    let (name, topics, endpoints) = race_args();
    let mut consumer = ConsumerGroup::join_with(
        &name,
        &topics,
        &endpoints,
        GroupConfig::default(),
        &RacingBootstrap,
    )
    .await
    .unwrap();

    // 一毫秒的间隔保证顶层循环先越过停止检查，复现关闭竞争的事件顺序
    sleep(Duration::from_millis(1)).await;
    consumer.close().await.unwrap();

    assert!(consumer.closed());
    while consumer.messages().recv().await.is_some() {}
    while consumer.errors().recv().await.is_some() {}
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn close_is_idempotent() {
    let (name, topics, endpoints) = race_args();
    let consumer = ConsumerGroup::join_with(
        &name,
        &topics,
        &endpoints,
        GroupConfig::default(),
        &RacingBootstrap,
    )
    .await
    .unwrap();

    consumer.close().await.unwrap();
    assert!(matches!(
        consumer.close().await,
        Err(GroupError::AlreadyClosing)
    ));
    assert!(consumer.closed());
}
