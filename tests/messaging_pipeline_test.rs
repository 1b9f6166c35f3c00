//! End-to-end messaging behavior over the in-memory broker
//!
//! Live-broker variants at the bottom are ignored by default; run them with
//! `NATS_URL=nats://localhost:4222 cargo test -- --ignored`.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use radar_core::messaging::service::BrokerOp;
use radar_core::messaging::{
    handler_fn, ConsumerDescriptor, ConsumerManager, InMemoryBroker, MessagingError, Publisher,
    ArticleId, RankTask, ReconcileOutcome, RetentionPolicy, Router, RssFetchTask, ShareTask,
    StreamDescriptor, StreamReconciler, TaskKind,
};
use radar_core::resilience::RetryPolicy;
use radar_core::DedupGuard;

use common::{connection, wait_for};

fn radar_stream() -> StreamDescriptor {
    StreamDescriptor::for_prefix("ai-radar", "ai-radar").with_retention(RetentionPolicy::WorkQueue)
}

fn feed_task() -> RssFetchTask {
    RssFetchTask {
        url: "https://example.com/feed.xml".to_string(),
        name: "Example".to_string(),
        source_id: Some(7),
        timestamp: None,
    }
}

#[tokio::test]
async fn test_first_publish_creates_work_queue_stream() {
    let broker = InMemoryBroker::new();
    let publisher = Publisher::new(
        connection(&broker),
        RetryPolicy::fixed(3, Duration::from_millis(10)),
        "ai-radar",
    )
    .with_stream(radar_stream());

    let ack = publisher.publish_task(&feed_task()).await.unwrap();

    assert_eq!(ack.stream, "ai-radar");
    assert_eq!(ack.sequence, 1);
    let stream = broker.stream("ai-radar").unwrap();
    assert_eq!(stream.retention, RetentionPolicy::WorkQueue);
    assert_eq!(stream.subjects, vec!["ai-radar.>".to_string()]);

    let stored = broker.messages("ai-radar");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].subject, "ai-radar.tasks.rss_fetch");
    assert_eq!(stored[0].json().unwrap()["url"], "https://example.com/feed.xml");
}

#[tokio::test(start_paused = true)]
async fn test_publish_to_unreachable_broker_fails_after_exact_attempts() {
    let broker = InMemoryBroker::new();
    broker.set_unreachable();
    let connection = Arc::new(radar_core::ConnectionManager::new(
        Some(common::PRIMARY_URL),
        &[],
        Duration::from_secs(1),
        Arc::new(broker.clone()),
    ));
    let publisher = Publisher::new(
        connection,
        RetryPolicy::fixed(5, Duration::from_secs(2)),
        "ai-radar",
    );

    let started = tokio::time::Instant::now();
    let err = publisher.publish_task(&feed_task()).await.unwrap_err();

    match err {
        MessagingError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(broker.connect_attempts().len(), 5);
    // four pauses between five attempts
    assert_eq!(started.elapsed(), Duration::from_secs(8));
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let broker = InMemoryBroker::new();
    let connection = connection(&broker);
    connection.connect().await.unwrap();
    let reconciler = StreamReconciler::new(connection);

    assert_eq!(
        reconciler.reconcile(&radar_stream()).await.unwrap(),
        ReconcileOutcome::Created
    );
    assert_eq!(
        reconciler.reconcile(&radar_stream()).await.unwrap(),
        ReconcileOutcome::Unchanged
    );
    assert_eq!(broker.ops(), vec![BrokerOp::CreateStream("ai-radar".to_string())]);
}

#[tokio::test]
async fn test_retention_change_recreates_stream() {
    let broker = InMemoryBroker::new();
    broker.seed_stream(
        StreamDescriptor::for_prefix("ai-radar", "ai-radar").with_retention(RetentionPolicy::Limits),
    );
    let connection = connection(&broker);
    connection.connect().await.unwrap();

    let outcome = StreamReconciler::new(connection)
        .reconcile(&radar_stream())
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Recreated);
    assert_eq!(
        broker.ops(),
        vec![
            BrokerOp::DeleteStream("ai-radar".to_string()),
            BrokerOp::CreateStream("ai-radar".to_string()),
        ]
    );
    assert_eq!(
        broker.stream("ai-radar").unwrap().retention,
        RetentionPolicy::WorkQueue
    );
}

#[tokio::test]
async fn test_ensure_consumer_twice_leaves_one_consumer() {
    let broker = InMemoryBroker::new();
    broker.seed_stream(radar_stream());
    let consumers = ConsumerManager::new(connection(&broker));
    let descriptor = ConsumerDescriptor::new("ranker").with_max_deliver(3);
    let handler: Arc<dyn radar_core::messaging::DeliveryHandler> = Arc::new(Noop);

    let first = consumers
        .ensure("ai-radar", &descriptor, "ai-radar.tasks.rank", Arc::clone(&handler))
        .await
        .unwrap();
    let second = consumers
        .ensure("ai-radar", &descriptor, "ai-radar.tasks.rank", handler)
        .await
        .unwrap();

    assert_eq!(broker.consumer_names("ai-radar"), vec!["ranker".to_string()]);
    let bound = broker.consumer("ai-radar", "ranker").unwrap();
    assert_eq!(bound.filter_subject.as_deref(), Some("ai-radar.tasks.rank"));

    wait_for(|| !first.is_active()).await;
    assert!(second.is_active());
    consumers.stop_all();
}

#[derive(Debug)]
struct Noop;

#[async_trait::async_trait]
impl radar_core::messaging::DeliveryHandler for Noop {
    async fn handle(&self, delivery: radar_core::messaging::Delivery) {
        let _ = delivery.ack().await;
    }
}

#[tokio::test]
async fn test_failing_handler_message_is_acked_once() {
    let broker = InMemoryBroker::new();
    broker.seed_stream(radar_stream());
    let connection = connection(&broker);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar");
    let counter = Arc::clone(&calls);
    router
        .register(
            TaskKind::Rank,
            handler_fn(move |_, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("ranking model unavailable"))
                }
            }),
        )
        .unwrap();
    assert!(router.start().await.unwrap().is_complete());

    let publisher = Publisher::new(
        Arc::clone(&connection),
        RetryPolicy::fixed(2, Duration::from_millis(10)),
        "ai-radar",
    );
    let task = RankTask {
        article_id: ArticleId::Numeric(42),
        title: "Agents in production".to_string(),
        summary: None,
        url: None,
    };
    let ack = publisher.publish_task(&task).await.unwrap();

    wait_for(|| broker.ack_count("ai-radar", ack.sequence) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.ack_count("ai-radar", ack.sequence), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(router.health().errors(), 1);
    assert_eq!(router.health().processed(), 0);
    assert_eq!(broker.pending_count("ai-radar"), 0);

    router.shutdown().await;
}

#[tokio::test]
async fn test_redelivered_message_is_not_dispatched_twice() {
    let broker = InMemoryBroker::new();
    broker.seed_stream(radar_stream());
    let connection = connection(&broker);
    let dedup = Arc::new(DedupGuard::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar")
        .with_dedup(Arc::clone(&dedup));
    let counter = Arc::clone(&calls);
    router
        .register(
            TaskKind::RssFetch,
            handler_fn(move |_, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap();
    router.start().await.unwrap();

    let publisher = Publisher::new(
        Arc::clone(&connection),
        RetryPolicy::fixed(2, Duration::from_millis(10)),
        "ai-radar",
    );
    let ack = publisher.publish_task(&feed_task()).await.unwrap();
    wait_for(|| broker.ack_count("ai-radar", ack.sequence) == 1).await;

    assert!(broker.redeliver("ai-radar", TaskKind::RssFetch.default_durable(), ack.sequence));
    wait_for(|| broker.ack_count("ai-radar", ack.sequence) == 2).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(dedup.seen(&format!("ai-radar:{}", ack.sequence)));

    router.shutdown().await;
}

#[tokio::test]
async fn test_stage_handler_publishes_next_stage() {
    let broker = InMemoryBroker::new();
    broker.seed_stream(radar_stream());
    let connection = connection(&broker);
    let publisher = Arc::new(Publisher::new(
        Arc::clone(&connection),
        RetryPolicy::fixed(2, Duration::from_millis(10)),
        "ai-radar",
    ));

    let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar");
    let downstream = Arc::clone(&publisher);
    router
        .register(
            TaskKind::Rank,
            handler_fn(move |payload, _| {
                let downstream = Arc::clone(&downstream);
                async move {
                    let task: RankTask = serde_json::from_value(payload)?;
                    let share = ShareTask {
                        article_title: task.title,
                        article_url: task.url.unwrap_or_default(),
                    };
                    downstream.publish_task(&share).await?;
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap();
    router.start().await.unwrap();

    let task = RankTask {
        article_id: ArticleId::Text("a-1".to_string()),
        title: "Vector search at scale".to_string(),
        summary: Some("short".to_string()),
        url: Some("https://example.com/a-1".to_string()),
    };
    publisher.publish_task(&task).await.unwrap();

    wait_for(|| broker.messages("ai-radar").len() == 2).await;
    let messages = broker.messages("ai-radar");
    assert_eq!(messages[1].subject, "ai-radar.tasks.share");
    assert_eq!(
        messages[1].json().unwrap()["article_url"],
        "https://example.com/a-1"
    );

    router.shutdown().await;
}

#[tokio::test]
#[ignore = "requires a running NATS server with JetStream"]
async fn test_live_broker_round_trip() {
    use radar_core::messaging::NatsConnector;

    let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let connection = Arc::new(radar_core::ConnectionManager::new(
        Some(&url),
        &[],
        Duration::from_secs(5),
        Arc::new(NatsConnector),
    ));
    connection.connect().await.unwrap();

    let stream = StreamDescriptor::for_prefix("ai-radar-it", "ai-radar-it")
        .with_retention(RetentionPolicy::WorkQueue);
    StreamReconciler::new(Arc::clone(&connection))
        .reconcile(&stream)
        .await
        .unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new(Arc::clone(&connection), "ai-radar-it", "ai-radar-it");
    let counter = Arc::clone(&received);
    router
        .register(
            TaskKind::RssFetch,
            handler_fn(move |_, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap();
    router.start().await.unwrap();

    let publisher = Publisher::new(Arc::clone(&connection), RetryPolicy::for_publish(), "ai-radar-it");
    publisher.publish_task(&feed_task()).await.unwrap();

    for _ in 0..100 {
        if received.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(received.load(Ordering::SeqCst), 1);

    router.shutdown().await;
    connection.close().await.unwrap();
}
