use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bearing_core::{Clock, RegistryError, RegistrySnapshot, RegistrySource, SystemClock};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Delay between successful refreshes.
    pub refresh_interval: Duration,
    /// Upper bound for the delay after consecutive failures.
    pub backoff_ceiling: Duration,
    /// Instances whose last heartbeat is older than this are not routable.
    pub heartbeat_staleness: Duration,
    /// A snapshot older than this is no longer served.
    pub max_snapshot_staleness: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            backoff_ceiling: Duration::from_secs(300),
            heartbeat_staleness: Duration::from_secs(90),
            max_snapshot_staleness: Duration::from_secs(300),
        }
    }
}

/// Delay before the next refresh attempt: the plain interval after a success,
/// doubling per consecutive failure up to the ceiling.
pub fn backoff_delay(config: &RegistryConfig, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return config.refresh_interval;
    }
    let factor = 2u32.saturating_pow(consecutive_failures.min(16));
    config
        .refresh_interval
        .saturating_mul(factor)
        .min(config.backoff_ceiling.max(config.refresh_interval))
}

/// Holds the most recent registry snapshot and keeps it fresh.
///
/// Readers get an `Arc` to a complete snapshot; refreshes replace it wholesale.
pub struct RegistryClient {
    source: Arc<dyn RegistrySource>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    current: ArcSwapOption<RegistrySnapshot>,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
}

impl RegistryClient {
    pub fn new(source: Arc<dyn RegistrySource>, config: RegistryConfig) -> Self {
        Self {
            source,
            config,
            clock: Arc::new(SystemClock),
            current: ArcSwapOption::empty(),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The latest snapshot, or `None` before the first successful refresh and
    /// once the last good snapshot is older than the maximum staleness.
    pub fn current_snapshot(&self) -> Option<Arc<RegistrySnapshot>> {
        let snapshot = self.current.load_full()?;
        if snapshot.age(self.clock.now_millis()) > self.config.max_snapshot_staleness {
            return None;
        }
        Some(snapshot)
    }

    /// Runs one step of the refresh protocol.
    pub async fn refresh_once(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        match self.source.list_instances().await {
            Ok(instances) => {
                let snapshot = Arc::new(RegistrySnapshot::build(
                    instances,
                    self.clock.now_millis(),
                    self.config.heartbeat_staleness,
                ));
                self.current.store(Some(snapshot.clone()));
                self.consecutive_failures.store(0, Ordering::SeqCst);

                metrics::gauge!("registry_healthy_instances").set(snapshot.healthy_count() as f64);
                metrics::gauge!("registry_consecutive_failures").set(0.0);
                debug!(
                    instances = snapshot.instances().len(),
                    healthy = snapshot.healthy_count(),
                    "Registry snapshot refreshed"
                );
                Ok(snapshot)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                self.total_failures.fetch_add(1, Ordering::SeqCst);

                metrics::counter!("registry_refresh_failures_total").increment(1);
                metrics::gauge!("registry_consecutive_failures").set(failures as f64);
                warn!(
                    error = %e,
                    consecutive_failures = failures,
                    "Registry refresh failed, keeping previous snapshot"
                );
                Err(e)
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::SeqCst)
    }

    pub fn next_delay(&self) -> Duration {
        backoff_delay(&self.config, self.consecutive_failures())
    }

    /// Starts the background refresh loop. The first refresh runs immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.refresh_interval.as_secs(),
                "Registry refresh loop started"
            );
            loop {
                // Failures are logged and counted inside refresh_once.
                let _ = self.refresh_once().await;
                tokio::time::sleep(self.jittered_delay()).await;
            }
        })
    }

    fn jittered_delay(&self) -> Duration {
        let delay = self.next_delay();
        if self.consecutive_failures() == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(delay.as_secs_f64() * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bearing_core::{HealthStatus, ManualClock, ServiceInstance};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const START: u64 = 1_700_000_000_000;

    /// Replays a fixed script of listings; `None` is a failed fetch.
    struct ScriptedSource {
        script: Mutex<VecDeque<Option<Vec<ServiceInstance>>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<Vec<ServiceInstance>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl RegistrySource for ScriptedSource {
        async fn list_instances(&self) -> Result<Vec<ServiceInstance>, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Some(instances)) => Ok(instances),
                _ => Err(RegistryError::Transport("connection refused".into())),
            }
        }
    }

    /// Alternates between two listings forever.
    struct FlipSource {
        small: Vec<ServiceInstance>,
        large: Vec<ServiceInstance>,
        flip: AtomicU32,
    }

    #[async_trait::async_trait]
    impl RegistrySource for FlipSource {
        async fn list_instances(&self) -> Result<Vec<ServiceInstance>, RegistryError> {
            if self.flip.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Ok(self.small.clone())
            } else {
                Ok(self.large.clone())
            }
        }
    }

    fn up(id: &str, beat: u64) -> ServiceInstance {
        ServiceInstance::new("orders", format!("{}:80", id), HealthStatus::Up, Some(beat)).with_instance_id(id)
    }

    fn client(source: impl RegistrySource + 'static, clock: &ManualClock) -> RegistryClient {
        RegistryClient::new(Arc::new(source), RegistryConfig::default()).with_clock(Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn not_ready_before_first_refresh() {
        let clock = ManualClock::new(START);
        let client = client(ScriptedSource::new(vec![None]), &clock);

        assert!(client.current_snapshot().is_none());
        assert!(client.refresh_once().await.is_err());
        assert!(client.current_snapshot().is_none());
    }

    #[tokio::test]
    async fn refresh_publishes_new_snapshot() {
        let clock = ManualClock::new(START);
        let client = client(
            ScriptedSource::new(vec![Some(vec![up("a", START)]), Some(vec![up("a", START), up("b", START)])]),
            &clock,
        );

        client.refresh_once().await.unwrap();
        assert_eq!(client.current_snapshot().unwrap().healthy("orders").len(), 1);

        client.refresh_once().await.unwrap();
        assert_eq!(client.current_snapshot().unwrap().healthy("orders").len(), 2);
    }

    #[tokio::test]
    async fn failures_keep_last_snapshot_until_max_staleness() {
        let clock = ManualClock::new(START);
        let client = client(
            ScriptedSource::new(vec![Some(vec![up("a", START)]), None, None, None]),
            &clock,
        );

        let first = client.refresh_once().await.unwrap();
        for attempt in 1..=3 {
            clock.advance(Duration::from_secs(30));
            assert!(client.refresh_once().await.is_err());
            assert_eq!(client.consecutive_failures(), attempt);

            let current = client.current_snapshot().unwrap();
            assert!(Arc::ptr_eq(&current, &first));
        }

        // 90s elapsed so far; the default limit is 300s.
        clock.advance(Duration::from_secs(210));
        assert!(client.current_snapshot().is_some());

        clock.advance(Duration::from_millis(1));
        assert!(client.current_snapshot().is_none());
        assert_eq!(client.total_failures(), 3);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let clock = ManualClock::new(START);
        let client = client(
            ScriptedSource::new(vec![None, None, Some(vec![up("a", START)]), None]),
            &clock,
        );

        let _ = client.refresh_once().await;
        let _ = client.refresh_once().await;
        assert_eq!(client.consecutive_failures(), 2);
        assert_eq!(client.next_delay(), Duration::from_secs(120));

        client.refresh_once().await.unwrap();
        assert_eq!(client.consecutive_failures(), 0);
        assert_eq!(client.next_delay(), Duration::from_secs(30));

        let _ = client.refresh_once().await;
        assert_eq!(client.consecutive_failures(), 1);
        assert_eq!(client.total_failures(), 3);
    }

    #[tokio::test]
    async fn heartbeat_freshness_is_judged_at_refresh_time() {
        let clock = ManualClock::new(START);
        let client = client(ScriptedSource::new(vec![Some(vec![up("a", START), up("b", START - 60_000)])]), &clock);

        clock.advance(Duration::from_secs(60));
        let snapshot = client.refresh_once().await.unwrap();

        let healthy: Vec<&str> = snapshot.healthy("orders").iter().map(|i| i.instance_id.as_str()).collect();
        assert_eq!(healthy, vec!["a"]);
        assert_eq!(snapshot.instances().len(), 2);
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let config = RegistryConfig::default();
        let delays: Vec<u64> = [0, 1, 2, 3, 4, 5, 40]
            .iter()
            .map(|failures| backoff_delay(&config, *failures).as_secs())
            .collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 300, 300, 300]);
    }

    #[test]
    fn backoff_never_drops_below_interval() {
        let config = RegistryConfig {
            refresh_interval: Duration::from_secs(60),
            backoff_ceiling: Duration::from_secs(10),
            ..RegistryConfig::default()
        };
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_partial_snapshots() {
        let small: Vec<_> = (0..2).map(|i| up(&format!("s{}", i), START)).collect();
        let large: Vec<_> = (0..6).map(|i| up(&format!("l{}", i), START)).collect();
        let clock = ManualClock::new(START);
        let client = Arc::new(client(
            FlipSource {
                small,
                large,
                flip: AtomicU32::new(0),
            },
            &clock,
        ));
        client.refresh_once().await.unwrap();

        let writer = {
            let client = client.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    client.refresh_once().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move {
                    for _ in 0..2_000 {
                        let snapshot = client.current_snapshot().unwrap();
                        let healthy = snapshot.healthy("orders");
                        assert!(healthy.len() == 2 || healthy.len() == 6);
                        assert_eq!(healthy.len(), snapshot.instances().len());
                        let prefix = &healthy[0].instance_id[..1];
                        assert!(healthy.iter().all(|i| i.instance_id.starts_with(prefix)));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for result in futures::future::join_all(readers).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn spawned_loop_refreshes_in_background() {
        let source = Arc::new(ScriptedSource::new(vec![Some(vec![up("a", bearing_core::time::now())]); 50]));
        let config = RegistryConfig {
            refresh_interval: Duration::from_millis(10),
            ..RegistryConfig::default()
        };
        let client = Arc::new(RegistryClient::new(source.clone(), config));

        let handle = client.clone().spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(client.current_snapshot().is_some());
        assert!(source.calls.load(Ordering::SeqCst) >= 2);
    }
}
