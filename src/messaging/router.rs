//! # Router
//!
//! Subject-to-handler dispatch table over durable consumers.
//!
//! Handlers are registered per subject before [`Router::start`]. Each delivery is
//! decoded as JSON and passed to its handler together with a [`DeliveryContext`].
//!
//! ## Acknowledgement policy
//!
//! Every delivery is acknowledged once the handler returns, **including when it
//! returns an error**. A deterministic failure would otherwise be redelivered
//! until `max_deliver` is exhausted. Handlers retry transient failures
//! themselves and record compensating state before returning `Err`.
//!
//! ## Duplicates
//!
//! Stream sequences are claimed in a [`DedupGuard`] before the handler runs. A
//! redelivery of a sequence whose handler already returned is acknowledged
//! without running it again. A redelivery that arrives while the first run is
//! still in progress is dropped unacknowledged; the first run acknowledges the
//! message when it returns.
//!
//! ## Supervision
//!
//! Each subject is watched by its own task. When a delivery loop ends without
//! being stopped (stream closed, connection lost) the subject is subscribed again
//! under the router's retry policy. Exhausting that budget marks the router's
//! health not ready.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::ConnectionManager;
use super::consumer::{ConsumerManager, DeliveryHandler, LoopExit, Subscription};
use super::errors::MessagingError;
use super::service::{ConsumerDescriptor, Delivery};
use super::subjects::{qualify, TaskKind};
use crate::constants::DEFAULT_MAX_DELIVER;
use crate::dedup::{Claim, DedupGuard};
use crate::health::AgentHealth;
use crate::resilience::RetryPolicy;

/// Delivery metadata handed to a [`TaskHandler`] next to the decoded payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryContext {
    pub subject: String,
    pub reply_to: Option<String>,
    pub stream_sequence: u64,
    pub delivery_count: u64,
}

impl DeliveryContext {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Business logic bound to one subject
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Value, context: DeliveryContext) -> anyhow::Result<()>;
}

/// [`TaskHandler`] backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Value, DeliveryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: Value, context: DeliveryContext) -> anyhow::Result<()> {
        (self.f)(payload, context).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value, DeliveryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[derive(Clone)]
struct Route {
    subject: String,
    durable: String,
    handler: Arc<dyn TaskHandler>,
}

/// Outcome of [`Router::start`]; one failed subject does not stop the others
#[derive(Debug, Default)]
pub struct StartReport {
    pub subscribed: Vec<String>,
    pub failed: Vec<(String, MessagingError)>,
}

impl StartReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-subject [`DeliveryHandler`]: dedup, decode, dispatch, ack
struct Dispatcher {
    stream: String,
    subject: String,
    handler: Arc<dyn TaskHandler>,
    dedup: Arc<DedupGuard>,
    health: Arc<AgentHealth>,
}

#[async_trait]
impl DeliveryHandler for Dispatcher {
    async fn handle(&self, delivery: Delivery) {
        let key = format!("{}:{}", self.stream, delivery.stream_sequence);
        match self.dedup.begin(&key) {
            Claim::Acquired => {}
            Claim::Completed => {
                debug!(
                    subject = %delivery.subject,
                    sequence = delivery.stream_sequence,
                    delivery_count = delivery.delivery_count,
                    "Delivery already dispatched, acknowledging"
                );
                self.acknowledge(&delivery).await;
                return;
            }
            Claim::InFlight => {
                debug!(
                    subject = %delivery.subject,
                    sequence = delivery.stream_sequence,
                    delivery_count = delivery.delivery_count,
                    "Delivery still being handled, leaving the ack to the running handler"
                );
                return;
            }
        }

        self.dispatch(&delivery).await;
        self.dedup.complete(&key);
        self.acknowledge(&delivery).await;
    }
}

impl Dispatcher {
    async fn acknowledge(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack().await {
            // not fatal: the broker redelivers and the dedup key absorbs it
            warn!(
                subject = %delivery.subject,
                sequence = delivery.stream_sequence,
                error = %e,
                "Failed to acknowledge delivery"
            );
        }
    }

    async fn dispatch(&self, delivery: &Delivery) {
        let payload: Value = match serde_json::from_slice(&delivery.payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    subject = %delivery.subject,
                    sequence = delivery.stream_sequence,
                    error = %e,
                    "Undecodable payload, acknowledging"
                );
                self.health.increment_error();
                return;
            }
        };

        let context = DeliveryContext {
            subject: delivery.subject.clone(),
            reply_to: delivery.reply_to.clone(),
            stream_sequence: delivery.stream_sequence,
            delivery_count: delivery.delivery_count,
        };

        let outcome = AssertUnwindSafe(self.handler.handle(payload, context))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("handler panicked")));

        match outcome {
            Ok(()) => {
                self.health.increment_processed();
                debug!(
                    subject = %self.subject,
                    sequence = delivery.stream_sequence,
                    "Handled delivery"
                );
            }
            Err(e) => {
                self.health.increment_error();
                error!(
                    subject = %self.subject,
                    sequence = delivery.stream_sequence,
                    delivery_count = delivery.delivery_count,
                    error = %format!("{e:#}"),
                    "Handler failed, acknowledging to prevent redelivery"
                );
            }
        }
    }
}

/// What a route needs to be bound again, shared with its supervisor task
#[derive(Clone)]
struct Binder {
    consumers: Arc<ConsumerManager>,
    stream: String,
    max_deliver: i64,
    policy: RetryPolicy,
    dedup: Arc<DedupGuard>,
    health: Arc<AgentHealth>,
}

impl Binder {
    async fn subscribe(&self, route: &Route) -> Result<Subscription, MessagingError> {
        let descriptor = ConsumerDescriptor::new(route.durable.as_str()).with_max_deliver(self.max_deliver);
        let dispatcher: Arc<dyn DeliveryHandler> = Arc::new(Dispatcher {
            stream: self.stream.clone(),
            subject: route.subject.clone(),
            handler: Arc::clone(&route.handler),
            dedup: Arc::clone(&self.dedup),
            health: Arc::clone(&self.health),
        });
        let operation = format!("subscribe {}", route.subject);

        self.policy
            .run(&operation, MessagingError::is_retryable, |_| {
                self.consumers.ensure(
                    &self.stream,
                    &descriptor,
                    &route.subject,
                    Arc::clone(&dispatcher),
                )
            })
            .await
            .map_err(|failure| {
                if failure.exhausted {
                    MessagingError::retries_exhausted(operation.as_str(), failure.attempts, failure.error)
                } else {
                    failure.error
                }
            })
    }

    /// Keep `route` bound until `stop` flips
    async fn supervise(self, route: Route, mut subscription: Subscription, mut stop: watch::Receiver<bool>) {
        loop {
            let stop_switch = subscription.stop_switch();
            let mut closed = Box::pin(subscription.closed());
            let exit = tokio::select! {
                exit = &mut closed => Some(exit),
                _ = stop.changed() => None,
            };

            let Some(exit) = exit else {
                stop_switch.send_replace(true);
                closed.await;
                info!(subject = %route.subject, "Unsubscribed");
                return;
            };
            if exit == LoopExit::Stopped {
                debug!(subject = %route.subject, "Delivery loop stopped");
                return;
            }

            warn!(subject = %route.subject, "Delivery loop ended, resubscribing");
            let resubscribed = tokio::select! {
                result = self.subscribe(&route) => result,
                _ = stop.changed() => return,
            };
            match resubscribed {
                Ok(next) => {
                    info!(subject = %route.subject, durable = %route.durable, "Resubscribed");
                    subscription = next;
                }
                Err(e) => {
                    error!(subject = %route.subject, error = %e, "Resubscribe failed, subject is no longer consumed");
                    self.health.increment_error();
                    self.health.mark_not_ready();
                    return;
                }
            }
        }
    }
}

/// Handle on a supervisor task
struct Supervisor {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Supervisor {
    fn spawn(binder: Binder, route: Route, subscription: Subscription) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(binder.supervise(route, subscription, stop_rx));
        Self { stop, task }
    }

    async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Subscription supervisor ended abnormally");
        }
    }

    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

pub struct Router {
    consumers: Arc<ConsumerManager>,
    stream: String,
    prefix: String,
    max_deliver: i64,
    policy: RetryPolicy,
    dedup: Arc<DedupGuard>,
    health: Arc<AgentHealth>,
    routes: Vec<Route>,
    subscriptions: Mutex<HashMap<String, Supervisor>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("stream", &self.stream)
            .field("prefix", &self.prefix)
            .field("subjects", &self.subjects())
            .finish()
    }
}

impl Router {
    pub fn new(
        connection: Arc<ConnectionManager>,
        stream: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self::with_consumers(Arc::new(ConsumerManager::new(connection)), stream, prefix)
    }

    /// Share a consumer manager so its owner can stop every delivery loop at shutdown
    pub fn with_consumers(
        consumers: Arc<ConsumerManager>,
        stream: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            consumers,
            stream: stream.into(),
            prefix: prefix.into(),
            max_deliver: DEFAULT_MAX_DELIVER,
            policy: RetryPolicy::for_subscribe(),
            dedup: Arc::new(DedupGuard::new()),
            health: Arc::new(AgentHealth::new("router")),
            routes: Vec::new(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: i64) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    pub fn with_dedup(mut self, dedup: Arc<DedupGuard>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_health(mut self, health: Arc<AgentHealth>) -> Self {
        self.health = health;
        self
    }

    /// Bind `handler` to `<prefix>.tasks.<kind>` under the kind's default durable name
    pub fn register<H: TaskHandler>(&mut self, kind: TaskKind, handler: H) -> Result<(), MessagingError> {
        self.register_subject(&kind.suffix(), kind.default_durable(), handler)
    }

    /// Bind `handler` to a subject given relative to the prefix
    pub fn register_subject<H: TaskHandler>(
        &mut self,
        suffix: &str,
        durable: &str,
        handler: H,
    ) -> Result<(), MessagingError> {
        let subject = qualify(&self.prefix, suffix);
        if self.routes.iter().any(|r| r.subject == subject) {
            return Err(MessagingError::duplicate_handler(subject));
        }
        debug!(subject = %subject, durable, "Registered handler");
        self.routes.push(Route {
            subject,
            durable: durable.to_string(),
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Registered subjects, in registration order
    pub fn subjects(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.subject.clone()).collect()
    }

    pub fn health(&self) -> &Arc<AgentHealth> {
        &self.health
    }

    fn binder(&self) -> Binder {
        Binder {
            consumers: Arc::clone(&self.consumers),
            stream: self.stream.clone(),
            max_deliver: self.max_deliver,
            policy: self.policy.clone(),
            dedup: Arc::clone(&self.dedup),
            health: Arc::clone(&self.health),
        }
    }

    /// Subscribe every registered subject, each under its own retry budget
    pub async fn start(&self) -> Result<StartReport, MessagingError> {
        if self.routes.is_empty() {
            return Err(MessagingError::configuration("router", "no handlers registered"));
        }

        let binder = self.binder();
        let mut report = StartReport::default();
        for route in &self.routes {
            match binder.subscribe(route).await {
                Ok(subscription) => {
                    let supervisor = Supervisor::spawn(binder.clone(), route.clone(), subscription);
                    let previous = self
                        .subscriptions
                        .lock()
                        .await
                        .insert(route.subject.clone(), supervisor);
                    if let Some(previous) = previous {
                        previous.stop().await;
                    }
                    report.subscribed.push(route.subject.clone());
                }
                Err(e) => {
                    error!(subject = %route.subject, error = %e, "Failed to subscribe");
                    self.health.increment_error();
                    report.failed.push((route.subject.clone(), e));
                }
            }
        }

        info!(
            stream = %self.stream,
            subscribed = report.subscribed.len(),
            failed = report.failed.len(),
            "Router started"
        );
        Ok(report)
    }

    /// Subjects whose supervisor is still consuming
    pub async fn active_subjects(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.lock().await;
        let mut subjects: Vec<String> = subscriptions
            .iter()
            .filter(|(_, supervisor)| supervisor.is_running())
            .map(|(subject, _)| subject.clone())
            .collect();
        subjects.sort();
        subjects
    }

    /// Stop the delivery loop of one subject; returns whether it was subscribed
    pub async fn unsubscribe(&self, suffix: &str) -> bool {
        let subject = qualify(&self.prefix, suffix);
        let supervisor = self.subscriptions.lock().await.remove(&subject);
        match supervisor {
            Some(supervisor) => {
                supervisor.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every delivery loop; running handlers finish on their own tasks
    pub async fn shutdown(&self) {
        let supervisors: Vec<_> = self.subscriptions.lock().await.drain().map(|(_, s)| s).collect();
        for supervisor in supervisors {
            supervisor.stop().await;
        }
        info!(stream = %self.stream, "Router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::service::{InMemoryBroker, StreamDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup() -> (InMemoryBroker, Arc<ConnectionManager>) {
        let broker = InMemoryBroker::new();
        broker.seed_stream(StreamDescriptor::for_prefix("ai-radar", "ai-radar"));
        let connection = Arc::new(ConnectionManager::new(
            Some("nats://test:4222"),
            &[],
            Duration::from_secs(1),
            Arc::new(broker.clone()),
        ));
        (broker, connection)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (_broker, connection) = setup();
        let mut router = Router::new(connection, "ai-radar", "ai-radar");

        router
            .register(TaskKind::Rank, handler_fn(|_, _| async { anyhow::Ok(()) }))
            .unwrap();
        let result = router.register_subject("tasks.rank", "other", handler_fn(|_, _| async { anyhow::Ok(()) }));

        assert!(matches!(result, Err(MessagingError::DuplicateHandler { .. })));
        assert_eq!(router.subjects(), vec!["ai-radar.tasks.rank".to_string()]);
    }

    #[tokio::test]
    async fn test_start_without_handlers_fails() {
        let (_broker, connection) = setup();
        let router = Router::new(connection, "ai-radar", "ai-radar");
        assert!(router.start().await.is_err());
    }

    #[tokio::test]
    async fn test_successful_handler_is_acked_and_counted() {
        let (broker, connection) = setup();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar");
        let sink = Arc::clone(&seen);
        router
            .register(
                TaskKind::Share,
                handler_fn(move |payload, context| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().push((payload, context));
                        anyhow::Ok(())
                    }
                }),
            )
            .unwrap();
        let report = router.start().await.unwrap();
        assert!(report.is_complete());

        let provider = connection.provider().await.unwrap();
        provider
            .publish(
                "ai-radar.tasks.share",
                br#"{"article_title":"t","article_url":"https://x/a"}"#.to_vec(),
            )
            .await
            .unwrap();

        wait_for(|| broker.ack_count("ai-radar", 1) == 1).await;
        let calls = seen.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0["article_url"], "https://x/a");
        assert_eq!(calls[0].1.subject, "ai-radar.tasks.share");
        assert_eq!(calls[0].1.stream_sequence, 1);
        assert_eq!(router.health().processed(), 1);

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_acked_and_counted_as_error() {
        let (broker, connection) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar");
        router
            .register(
                TaskKind::Rank,
                handler_fn(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { anyhow::Ok(()) }
                }),
            )
            .unwrap();
        router.start().await.unwrap();

        let provider = connection.provider().await.unwrap();
        provider.publish("ai-radar.tasks.rank", b"not json".to_vec()).await.unwrap();

        wait_for(|| broker.ack_count("ai-radar", 1) == 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.health().errors(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_sequence_skips_handler() {
        let (broker, connection) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar");
        router
            .register(
                TaskKind::Summarize,
                handler_fn(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { anyhow::Ok(()) }
                }),
            )
            .unwrap();
        router.start().await.unwrap();

        let provider = connection.provider().await.unwrap();
        provider.publish("ai-radar.tasks.summarize", b"{}".to_vec()).await.unwrap();
        wait_for(|| broker.ack_count("ai-radar", 1) == 1).await;

        assert!(broker.redeliver("ai-radar", TaskKind::Summarize.default_durable(), 1));
        wait_for(|| broker.ack_count("ai-radar", 1) == 2).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redelivery_during_running_handler_is_left_unacked() {
        let (broker, connection) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(tokio::sync::Notify::new());
        let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar");
        let (counter, gate) = (Arc::clone(&calls), Arc::clone(&release));
        router
            .register(
                TaskKind::Summarize,
                handler_fn(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        anyhow::Ok(())
                    }
                }),
            )
            .unwrap();
        router.start().await.unwrap();

        let provider = connection.provider().await.unwrap();
        provider.publish("ai-radar.tasks.summarize", b"{}".to_vec()).await.unwrap();
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;

        assert!(broker.redeliver("ai-radar", TaskKind::Summarize.default_durable(), 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.ack_count("ai-radar", 1), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        release.notify_one();
        wait_for(|| broker.ack_count("ai-radar", 1) == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.ack_count("ai-radar", 1), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.health().processed(), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_acked_and_counted_as_error() {
        let (broker, connection) = setup();
        let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar");
        router
            .register(
                TaskKind::Rank,
                handler_fn(|payload: Value, _| async move {
                    if payload.get("boom").is_some() {
                        panic!("ranking model unavailable");
                    }
                    anyhow::Ok(())
                }),
            )
            .unwrap();
        router.start().await.unwrap();

        let provider = connection.provider().await.unwrap();
        provider.publish("ai-radar.tasks.rank", br#"{"boom":true}"#.to_vec()).await.unwrap();
        wait_for(|| broker.ack_count("ai-radar", 1) == 1).await;
        assert_eq!(router.health().errors(), 1);

        // the delivery loop survives the panic
        provider.publish("ai-radar.tasks.rank", b"{}".to_vec()).await.unwrap();
        wait_for(|| broker.ack_count("ai-radar", 2) == 1).await;
        assert_eq!(router.health().processed(), 1);
    }

    #[tokio::test]
    async fn test_lost_connection_is_resubscribed() {
        let (broker, connection) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar")
            .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(10)));
        router
            .register(
                TaskKind::Rank,
                handler_fn(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { anyhow::Ok(()) }
                }),
            )
            .unwrap();
        router.start().await.unwrap();
        router.health().mark_ready();

        broker.drop_connections();
        let provider = connection.connect().await.unwrap();
        provider.publish("ai-radar.tasks.rank", b"{}".to_vec()).await.unwrap();

        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;
        wait_for(|| broker.ack_count("ai-radar", 1) == 1).await;
        assert!(router.health().is_ready());
        assert_eq!(router.active_subjects().await, vec!["ai-radar.tasks.rank".to_string()]);

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_resubscribe_marks_not_ready() {
        let (broker, connection) = setup();
        let mut router = Router::new(Arc::clone(&connection), "ai-radar", "ai-radar")
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(10)));
        router
            .register(TaskKind::Rank, handler_fn(|_, _| async { anyhow::Ok(()) }))
            .unwrap();
        router.start().await.unwrap();
        router.health().mark_ready();

        broker.set_unreachable();
        broker.drop_connections();

        let health = Arc::clone(router.health());
        wait_for(|| !health.is_ready()).await;
        assert_eq!(health.errors(), 1);
        // initial connect plus one per resubscribe attempt
        assert_eq!(broker.connect_attempts().len(), 3);
        assert!(router.active_subjects().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_single_subject() {
        let (_broker, connection) = setup();
        let mut router = Router::new(connection, "ai-radar", "ai-radar");
        router
            .register(TaskKind::Rank, handler_fn(|_, _| async { anyhow::Ok(()) }))
            .unwrap();
        router.start().await.unwrap();

        assert!(router.unsubscribe("tasks.rank").await);
        assert!(!router.unsubscribe("tasks.rank").await);
    }
}
