use std::sync::Arc;
use std::time::Duration;

use log::*;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::label::LabelSet;
use crate::lambda::TagSource;
use crate::metrics::TagMetrics;

#[derive(Debug, PartialEq)]
pub enum PollOutcome {
    Published(LabelSet),
    Skipped,
}

/// Periodically fetches the tags of one resource and publishes them.
pub struct TagPoller {
    resource: String,
    source: Arc<dyn TagSource>,
    metrics: Arc<TagMetrics>,
    interval: Duration,
}

impl TagPoller {
    pub fn new(
        resource: String,
        source: Arc<dyn TagSource>,
        metrics: Arc<TagMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            resource,
            source,
            metrics,
            interval,
        }
    }

    /// Spawns the poll loop. The first poll happens one full interval from
    /// now. The loop runs until `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::task::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut ticks = tokio::time::interval_at(Instant::now() + self.interval, self.interval);

        // a slow poll delays the next one, it never queues up more than one tick
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticks.tick() => (),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.poll_once() => (),
            }
        }

        debug!("Tag poller for {} stopped", self.resource);
    }

    pub async fn poll_once(&self) -> PollOutcome {
        match self.source.fetch_tags(&self.resource).await {
            Ok(tags) => {
                let labels = LabelSet::project(&tags);

                match self.metrics.publish(&labels) {
                    Ok(()) => debug!("Published {labels} for {}", self.resource),
                    Err(err) => error!("Publishing {labels} for {}: {err}", self.resource),
                }

                PollOutcome::Published(labels)
            }
            Err(err) => {
                warn!("Skipping poll for {}: {err}", self.resource);
                self.metrics.record_fetch_failure();
                PollOutcome::Skipped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use assert2::assert;
    use async_trait::async_trait;
    use prometheus::Registry;

    use super::*;
    use crate::config::MAX_INTERVAL;
    use crate::error::FetchError;

    const INTERVAL: Duration = Duration::from_secs(10);

    type Reply = Result<HashMap<String, String>, FetchError>;

    #[derive(Default)]
    struct ScriptedSource {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<Instant>>,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TagSource for ScriptedSource {
        async fn fetch_tags(&self, _resource: &str) -> Reply {
            self.calls.lock().unwrap().push(Instant::now());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HashMap::new()))
        }
    }

    fn version(v: &str) -> Reply {
        Ok(HashMap::from([("Version".to_string(), v.to_string())]))
    }

    fn fetch_error() -> Reply {
        Err(FetchError::Api {
            resource: "func".to_string(),
            message: "connection refused".to_string(),
        })
    }

    fn labels(v: &str) -> LabelSet {
        LabelSet::project(&HashMap::from([("Version".to_string(), v.to_string())]))
    }

    fn poller(source: Arc<ScriptedSource>) -> (TagPoller, Arc<TagMetrics>) {
        let metrics = Arc::new(TagMetrics::register(&Registry::new(), "func").unwrap());
        let poller = TagPoller::new("func".to_string(), source, metrics.clone(), INTERVAL);
        (poller, metrics)
    }

    #[tokio::test]
    async fn test_poll_once() {
        let source = Arc::new(ScriptedSource::new(vec![version("1.2.3"), Ok(HashMap::new())]));
        let (poller, metrics) = poller(source);

        assert!(poller.poll_once().await == PollOutcome::Published(labels("1.2.3")));
        assert!(poller.poll_once().await == PollOutcome::Published(LabelSet::empty()));

        assert!(metrics.value(&labels("1.2.3")) == 1.0);
        assert!(metrics.value(&LabelSet::empty()) == 1.0);
    }

    #[tokio::test]
    async fn test_poll_once_failure() {
        let source = Arc::new(ScriptedSource::new(vec![fetch_error()]));
        let (poller, metrics) = poller(source);

        assert!(poller.poll_once().await == PollOutcome::Skipped);

        assert!(metrics.fetch_failures() == 1);
        assert!(metrics.value(&LabelSet::empty()) == 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_immediate_tick() {
        let source = Arc::new(ScriptedSource::new(vec![version("1.0")]));
        let (poller, metrics) = poller(source.clone());

        let start = Instant::now();
        let shutdown = CancellationToken::new();
        let task = poller.start(shutdown.clone());

        tokio::time::sleep(INTERVAL - Duration::from_millis(1)).await;
        assert!(source.calls().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(source.calls() == vec![start + INTERVAL]);
        assert!(metrics.value(&labels("1.0")) == 1.0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_skips_cycle() {
        let source = Arc::new(ScriptedSource::new(vec![fetch_error(), version("1.0")]));
        let (poller, metrics) = poller(source.clone());

        let start = Instant::now();
        let shutdown = CancellationToken::new();
        let task = poller.start(shutdown.clone());

        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert!(metrics.fetch_failures() == 1);
        assert!(metrics.value(&labels("1.0")) == 0.0);

        tokio::time::sleep(INTERVAL).await;
        assert!(source.calls() == vec![start + INTERVAL, start + INTERVAL * 2]);
        assert!(metrics.fetch_failures() == 1);
        assert!(metrics.value(&labels("1.0")) == 1.0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_tags_add_series() {
        let source = Arc::new(ScriptedSource::new(vec![version("1.0"), version("2.0")]));
        let (poller, metrics) = poller(source.clone());

        let shutdown = CancellationToken::new();
        let task = poller.start(shutdown.clone());

        tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(1)).await;
        assert!(source.calls().len() == 2);
        assert!(metrics.value(&labels("1.0")) == 1.0);
        assert!(metrics.value(&labels("2.0")) == 1.0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_does_not_overlap() {
        let source = Arc::new(ScriptedSource {
            delay: Duration::from_secs(25),
            ..Default::default()
        });
        let (poller, _metrics) = poller(source.clone());

        let start = Instant::now();
        let shutdown = CancellationToken::new();
        let task = poller.start(shutdown.clone());

        // the poll at 10s ends at 35s: the missed 20s and 30s ticks collapse
        // into one poll at 35s, and the 40s tick into one at 60s
        tokio::time::sleep(Duration::from_secs(71)).await;
        assert!(
            source.calls()
                == vec![
                    start + INTERVAL,
                    start + Duration::from_secs(35),
                    start + Duration::from_secs(60),
                ]
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_longest_interval() {
        let source = Arc::new(ScriptedSource::default());
        let metrics = Arc::new(TagMetrics::register(&Registry::new(), "func").unwrap());
        let poller = TagPoller::new("func".to_string(), source.clone(), metrics, MAX_INTERVAL);

        let shutdown = CancellationToken::new();
        let task = poller.start(shutdown.clone());

        tokio::time::sleep(MAX_INTERVAL + Duration::from_secs(1)).await;
        assert!(source.calls().len() == 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_fetch() {
        let source = Arc::new(ScriptedSource {
            delay: Duration::from_secs(3600),
            ..Default::default()
        });
        let (poller, metrics) = poller(source.clone());

        let shutdown = CancellationToken::new();
        let task = poller.start(shutdown.clone());

        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert!(source.calls().len() == 1);

        shutdown.cancel();
        task.await.unwrap();
        assert!(metrics.value(&LabelSet::empty()) == 0.0);
    }
}
