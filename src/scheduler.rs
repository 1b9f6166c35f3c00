//! # Source Scheduler
//!
//! Periodic producer at the head of the pipeline. Each pass loads the active RSS
//! sources (least recently fetched first), publishes one `rss_fetch` task per
//! source with a pacing delay, and stamps `last_fetched_at`. A failing source is
//! logged and skipped; the pass continues.
//!
//! A separate, slower pass deactivates sources that have not been fetched for
//! `stale_after_days`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::database::{RetryingStoreClient, StoreError};
use crate::messaging::{Publisher, RssFetchTask};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedSource {
    pub id: i64,
    pub name: String,
    pub url: String,
}

/// Persistence the scheduler needs from the `sources` table
#[async_trait]
pub trait SourceRepository: Send + Sync + 'static {
    /// Active RSS sources, never-fetched first, then oldest fetch first
    async fn active_rss_sources(&self) -> Result<Vec<FeedSource>, StoreError>;

    async fn mark_fetched(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Active sources not fetched since `cutoff` (or never)
    async fn stale_sources(&self, cutoff: DateTime<Utc>) -> Result<Vec<FeedSource>, StoreError>;

    async fn deactivate(&self, id: i64) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgSourceRepository {
    store: RetryingStoreClient,
}

impl PgSourceRepository {
    pub fn new(store: RetryingStoreClient) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SourceRepository for PgSourceRepository {
    async fn active_rss_sources(&self) -> Result<Vec<FeedSource>, StoreError> {
        self.store
            .fetch_as(
                "SELECT id, name, url \
                 FROM ai_radar.sources \
                 WHERE active = true AND source_type = 'rss' \
                 ORDER BY last_fetched_at ASC NULLS FIRST",
                |q| q,
            )
            .await
    }

    async fn mark_fetched(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store
            .execute(
                "UPDATE ai_radar.sources SET last_fetched_at = $1 WHERE id = $2",
                |q| q.bind(at).bind(id),
            )
            .await
            .map(|_| ())
    }

    async fn stale_sources(&self, cutoff: DateTime<Utc>) -> Result<Vec<FeedSource>, StoreError> {
        self.store
            .fetch_as(
                "SELECT id, name, url \
                 FROM ai_radar.sources \
                 WHERE active = true \
                 AND (last_fetched_at IS NULL OR last_fetched_at < $1)",
                |q| q.bind(cutoff),
            )
            .await
    }

    async fn deactivate(&self, id: i64) -> Result<(), StoreError> {
        self.store
            .execute(
                "UPDATE ai_radar.sources SET active = false WHERE id = $1",
                |q| q.bind(id),
            )
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub total: usize,
    pub scheduled: usize,
    pub failed: usize,
}

/// `now` minus `days`; `None` when the result is not representable
fn stale_cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(days).and_then(|age| now.checked_sub_signed(age))
}

pub struct SourceScheduler {
    repository: Arc<dyn SourceRepository>,
    publisher: Arc<Publisher>,
    config: SchedulerConfig,
}

impl std::fmt::Debug for SourceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceScheduler")
            .field("config", &self.config)
            .finish()
    }
}

impl SourceScheduler {
    pub fn new(
        repository: Arc<dyn SourceRepository>,
        publisher: Arc<Publisher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            config,
        }
    }

    /// One scheduling pass; only a failure to load the source list is an error
    pub async fn schedule_once(&self) -> Result<ScheduleReport, StoreError> {
        let sources = self.repository.active_rss_sources().await?;
        let mut report = ScheduleReport {
            total: sources.len(),
            ..ScheduleReport::default()
        };

        if sources.is_empty() {
            warn!("No active RSS sources found");
            return Ok(report);
        }
        info!(sources = sources.len(), "Scheduling RSS updates");

        let pacing = Duration::from_millis(self.config.source_pacing_ms);
        for (index, source) in sources.iter().enumerate() {
            if index > 0 && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
            match self.schedule_source(source).await {
                Ok(()) => report.scheduled += 1,
                Err(e) => {
                    error!(source = %source.name, source_id = source.id, error = %e, "Failed to schedule source");
                    report.failed += 1;
                }
            }
        }

        info!(
            scheduled = report.scheduled,
            total = report.total,
            failed = report.failed,
            "Scheduling pass complete"
        );
        Ok(report)
    }

    async fn schedule_source(&self, source: &FeedSource) -> anyhow::Result<()> {
        let now = Utc::now();
        let task = RssFetchTask {
            url: source.url.clone(),
            name: source.name.clone(),
            source_id: Some(source.id),
            timestamp: Some(now),
        };
        self.publisher.publish_task(&task).await?;
        self.repository.mark_fetched(source.id, now).await?;
        info!(source = %source.name, source_id = source.id, "Scheduled update for source");
        Ok(())
    }

    /// Deactivate sources not fetched within `stale_after_days`; returns how many
    pub async fn check_stale_sources(&self) -> Result<usize, StoreError> {
        let Some(cutoff) = stale_cutoff(Utc::now(), self.config.stale_after_days) else {
            warn!(
                stale_after_days = self.config.stale_after_days,
                "Stale threshold out of range, skipping check"
            );
            return Ok(0);
        };
        let stale = self.repository.stale_sources(cutoff).await?;
        if stale.is_empty() {
            info!("All sources are healthy");
            return Ok(0);
        }

        warn!(count = stale.len(), "Found stale sources");
        let mut deactivated = 0;
        for source in &stale {
            match self.repository.deactivate(source.id).await {
                Ok(()) => {
                    info!(source = %source.name, source_id = source.id, "Marked source inactive");
                    deactivated += 1;
                }
                Err(e) => {
                    error!(source = %source.name, error = %e, "Failed to deactivate source");
                }
            }
        }
        Ok(deactivated)
    }

    /// Run passes until `shutdown` flips to true; the first pass starts immediately
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        // tokio intervals panic on a zero period
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let stale_period = Duration::from_secs(self.config.stale_check_interval_secs.max(1));

        let mut schedule_tick = interval(period);
        schedule_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stale_tick = interval_at(Instant::now() + stale_period, stale_period);
        stale_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval_secs,
            stale_check_interval_secs = self.config.stale_check_interval_secs,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = schedule_tick.tick() => {
                    if let Err(e) = self.schedule_once().await {
                        error!(error = %e, "Scheduling pass failed");
                    }
                }
                _ = stale_tick.tick() => {
                    if let Err(e) = self.check_stale_sources().await {
                        error!(error = %e, "Stale source check failed");
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{ConnectionManager, InMemoryBroker, StreamDescriptor};
    use crate::resilience::RetryPolicy;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemorySources {
        sources: Mutex<Vec<(FeedSource, Option<DateTime<Utc>>, bool)>>,
        fail_mark_for: Option<i64>,
    }

    impl MemorySources {
        fn with(sources: Vec<(FeedSource, Option<DateTime<Utc>>)>) -> Self {
            Self {
                sources: Mutex::new(sources.into_iter().map(|(s, t)| (s, t, true)).collect()),
                fail_mark_for: None,
            }
        }
    }

    #[async_trait]
    impl SourceRepository for MemorySources {
        async fn active_rss_sources(&self) -> Result<Vec<FeedSource>, StoreError> {
            let mut active: Vec<_> = self
                .sources
                .lock()
                .iter()
                .filter(|(_, _, active)| *active)
                .map(|(s, t, _)| (s.clone(), *t))
                .collect();
            active.sort_by_key(|(_, t)| *t);
            Ok(active.into_iter().map(|(s, _)| s).collect())
        }

        async fn mark_fetched(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
            if self.fail_mark_for == Some(id) {
                return Err(StoreError::connection("connection reset"));
            }
            for entry in self.sources.lock().iter_mut() {
                if entry.0.id == id {
                    entry.1 = Some(at);
                }
            }
            Ok(())
        }

        async fn stale_sources(&self, cutoff: DateTime<Utc>) -> Result<Vec<FeedSource>, StoreError> {
            Ok(self
                .sources
                .lock()
                .iter()
                .filter(|(_, t, active)| *active && t.map_or(true, |t| t < cutoff))
                .map(|(s, _, _)| s.clone())
                .collect())
        }

        async fn deactivate(&self, id: i64) -> Result<(), StoreError> {
            for entry in self.sources.lock().iter_mut() {
                if entry.0.id == id {
                    entry.2 = false;
                }
            }
            Ok(())
        }
    }

    fn source(id: i64, name: &str) -> FeedSource {
        FeedSource {
            id,
            name: name.to_string(),
            url: format!("https://{name}.example/feed"),
        }
    }

    fn scheduler(broker: &InMemoryBroker, repository: Arc<MemorySources>) -> SourceScheduler {
        let connection = Arc::new(ConnectionManager::new(
            Some("nats://test:4222"),
            &[],
            Duration::from_secs(1),
            Arc::new(broker.clone()),
        ));
        let publisher = Arc::new(
            Publisher::new(connection, RetryPolicy::fixed(1, Duration::ZERO), "ai-radar")
                .with_stream(StreamDescriptor::for_prefix("ai-radar", "ai-radar")),
        );
        SourceScheduler::new(repository, publisher, SchedulerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_publishes_in_fetch_order() {
        let broker = InMemoryBroker::new();
        let earlier = Utc::now() - chrono::Duration::hours(2);
        let repository = Arc::new(MemorySources::with(vec![
            (source(1, "fetched"), Some(earlier)),
            (source(2, "never"), None),
        ]));
        let scheduler = scheduler(&broker, Arc::clone(&repository));

        let start = Instant::now();
        let report = scheduler.schedule_once().await.unwrap();

        assert_eq!(report, ScheduleReport { total: 2, scheduled: 2, failed: 0 });
        // one pacing delay between two sources
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        let messages = broker.messages("ai-radar");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].subject, "ai-radar.tasks.rss_fetch");
        let first: RssFetchTask = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(first.source_id, Some(2));
        assert_eq!(first.name, "never");
        assert!(repository.sources.lock().iter().all(|(_, t, _)| t.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_source_does_not_stop_pass() {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(MemorySources {
            fail_mark_for: Some(1),
            ..MemorySources::with(vec![(source(1, "a"), None), (source(2, "b"), None)])
        });
        let scheduler = scheduler(&broker, repository);

        let report = scheduler.schedule_once().await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_stale_sources_are_deactivated() {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(MemorySources::with(vec![
            (source(1, "old"), Some(Utc::now() - chrono::Duration::days(8))),
            (source(2, "fresh"), Some(Utc::now())),
            (source(3, "never"), None),
        ]));
        let scheduler = scheduler(&broker, Arc::clone(&repository));

        assert_eq!(scheduler.check_stale_sources().await.unwrap(), 2);
        let active: Vec<i64> = repository
            .sources
            .lock()
            .iter()
            .filter(|(_, _, active)| *active)
            .map(|(s, _, _)| s.id)
            .collect();
        assert_eq!(active, vec![2]);
    }

    #[test]
    fn test_stale_cutoff_rejects_unrepresentable_ages() {
        let now = Utc::now();
        assert_eq!(stale_cutoff(now, 7), Some(now - chrono::Duration::days(7)));
        assert_eq!(stale_cutoff(now, i64::MAX), None);
        assert_eq!(stale_cutoff(now, 100_000_000), None);
    }

    #[tokio::test]
    async fn test_out_of_range_stale_threshold_skips_check() {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(MemorySources::with(vec![(
            source(1, "old"),
            Some(Utc::now() - chrono::Duration::days(30)),
        )]));
        let mut scheduler = scheduler(&broker, Arc::clone(&repository));
        scheduler.config.stale_after_days = i64::MAX;

        assert_eq!(scheduler.check_stale_sources().await.unwrap(), 0);
        assert!(repository.sources.lock().iter().all(|(_, _, active)| *active));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_do_not_panic() {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(MemorySources::with(vec![(source(1, "a"), None)]));
        let mut scheduler = scheduler(&broker, repository);
        scheduler.config.interval_secs = 0;
        scheduler.config.stale_check_interval_secs = 0;
        let scheduler = Arc::new(scheduler);
        let (tx, rx) = watch::channel(false);

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(rx).await })
        };
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!broker.messages("ai-radar").is_empty());

        tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(MemorySources::with(vec![(source(1, "a"), None)]));
        let scheduler = Arc::new(scheduler(&broker, repository));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(rx).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(broker.messages("ai-radar").len(), 1);

        tx.send(true).unwrap();
        runner.await.unwrap();
    }
}
