//! Public directory client
//!
//! [`DirectoryClient`] is the handle the host embeds: cheap to clone, safe
//! to call from any task, and never blocking the caller on directory
//! traffic. Mount notifications go through a debounced queue; the actual
//! network work runs in a single background pass kicked off by
//! [`DirectoryClient::recheck`] (or the built-in driver task).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use crate::config::{
    DirectoryConfig, DEBOUNCE_WINDOW_MS, IDLE_RECHECK_MS, RECHECK_DEFER_MS,
    SHUTDOWN_DRAIN_GRACE_MS,
};
use crate::queue::{Change, ChangeQueue};
use crate::registry::DirectoryRegistry;
use crate::stats::StatsSource;
use crate::transport::TransportFactory;
use crate::util::now_secs;

/// Outcome of a [`DirectoryClient::recheck`] probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recheck {
    /// Registry is busy right now; probe again after the given delay
    Defer(Duration),
    /// Nothing is due; probe again after the given delay
    Idle(Duration),
    /// A background pass was started; it signals completion itself
    PassStarted,
    /// The client has been shut down
    Stopped,
}

struct ClientInner {
    /// Directory servers and their listings. Write lock for structural
    /// changes, read lock for the network pass.
    registry: RwLock<DirectoryRegistry>,

    /// Debounced mount notifications awaiting batch application
    queue: ChangeQueue,

    /// Source of per-mount metadata and listener figures
    stats: Arc<dyn StatsSource>,

    /// Creates transport sessions for newly configured servers
    factory: Arc<dyn TransportFactory>,

    /// Cleared by shutdown; everything else checks it first
    running: AtomicBool,

    /// A background pass is in flight; only one runs at a time
    pass_active: AtomicBool,

    /// Woken when a pass finishes or new work arrives, so the driver
    /// rechecks early instead of sleeping out its full interval
    wakeup: Notify,
}

/// Directory registration client
///
/// Clones share one underlying client.
#[derive(Clone)]
pub struct DirectoryClient {
    inner: Arc<ClientInner>,
}

impl DirectoryClient {
    /// Create a client and reconcile the initial configuration
    ///
    /// Transport sessions are established (cheaply) up front; no network
    /// traffic happens until a pass runs.
    pub fn new(
        config: DirectoryConfig,
        factory: Arc<dyn TransportFactory>,
        stats: Arc<dyn StatsSource>,
    ) -> Self {
        let mut registry = DirectoryRegistry::new(config.clone());
        registry.reconcile(config, factory.as_ref());
        Self {
            inner: Arc::new(ClientInner {
                registry: RwLock::new(registry),
                queue: ChangeQueue::new(),
                stats,
                factory,
                running: AtomicBool::new(true),
                pass_active: AtomicBool::new(false),
                wakeup: Notify::new(),
            }),
        }
    }

    /// Announce a mount that should be listed on every configured server
    pub fn add(&self, mount: &str) {
        self.notify(Change::Add(mount.to_string()));
    }

    /// Withdraw a mount's listings
    pub fn remove(&self, mount: &str) {
        self.notify(Change::Remove(mount.to_string()));
    }

    /// Report fresh now-playing metadata for a listed mount
    pub fn touch(&self, mount: &str, now_playing: Option<&str>) {
        self.notify(Change::Touch {
            mount: mount.to_string(),
            now_playing: now_playing.map(str::to_string),
        });
    }

    fn notify(&self, change: Change) {
        if !self.inner.running.load(Ordering::Acquire) {
            tracing::debug!(mount = %change.mount(), "dropping notification, client stopped");
            return;
        }
        if self.inner.queue.enqueue(change) {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                drain_queue(inner).await;
            });
        }
    }

    /// Replace the directory server set with a new configuration
    ///
    /// Waits for any in-flight pass to finish; existing servers keep their
    /// listings, vanished servers are drained and dropped.
    pub async fn reconfigure(&self, config: DirectoryConfig) {
        {
            let mut registry = self.inner.registry.write().await;
            registry.reconcile(config, self.inner.factory.as_ref());
        }
        self.inner.wakeup.notify_one();
    }

    /// Probe for due work and start a pass if there is any
    ///
    /// Never blocks: a registry busy with a structural change yields
    /// `Defer`. The returned variant tells the caller when to probe again.
    pub fn recheck(&self) -> Recheck {
        if !self.inner.running.load(Ordering::Acquire) {
            return Recheck::Stopped;
        }
        let registry = match self.inner.registry.try_read() {
            Ok(guard) => guard,
            Err(_) => return Recheck::Defer(Duration::from_millis(RECHECK_DEFER_MS)),
        };
        if !registry.has_update() && !registry.wake_due(now_secs()) {
            return Recheck::Idle(Duration::from_millis(IDLE_RECHECK_MS));
        }
        if self
            .inner
            .pass_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Recheck::Defer(Duration::from_millis(RECHECK_DEFER_MS));
        }
        registry.reset_wake();
        drop(registry);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_pass(inner).await;
        });
        Recheck::PassStarted
    }

    /// Run the recheck loop in a background task
    ///
    /// The task exits once [`DirectoryClient::shutdown`] has run.
    pub fn spawn_driver(&self) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let delay = match client.recheck() {
                    Recheck::Stopped => break,
                    Recheck::Defer(delay) | Recheck::Idle(delay) => delay,
                    Recheck::PassStarted => {
                        client.inner.wakeup.notified().await;
                        continue;
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = client.inner.wakeup.notified() => {}
                }
            }
            tracing::debug!("directory driver exited");
        })
    }

    /// Stop the client
    ///
    /// New notifications are dropped from here on. A short grace period
    /// lets an in-flight remove finish, then all servers and listings are
    /// dropped. Listings still registered remotely expire server-side once
    /// touches stop.
    pub async fn shutdown(&self) {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            tracing::info!("directory client shutting down");
        }
        self.inner.wakeup.notify_waiters();
        tokio::time::sleep(Duration::from_millis(SHUTDOWN_DRAIN_GRACE_MS)).await;
        let mut registry = self.inner.registry.write().await;
        let servers = registry.active.len() + registry.pending.len();
        registry.clear();
        tracing::info!(servers, "directory client stopped");
    }
}

/// Debounce, then batch-apply queued notifications
///
/// One drain task exists at a time; the queue hands it batches until the
/// queue observes itself empty.
async fn drain_queue(inner: Arc<ClientInner>) {
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_WINDOW_MS)).await;
    loop {
        let batch = inner.queue.detach();
        if batch.is_empty() {
            break;
        }
        tracing::debug!(changes = batch.len(), "applying queued mount changes");
        {
            let mut registry = inner.registry.write().await;
            let now = now_secs();
            for change in &batch {
                registry.apply_change(change, now);
            }
        }
        inner.wakeup.notify_one();
    }
}

/// One full background pass: apply structure, walk servers, reschedule
async fn run_pass(inner: Arc<ClientInner>) {
    if inner.registry.read().await.has_update() {
        let mut registry = inner.registry.write().await;
        if registry.take_update() {
            registry.apply_pending(inner.stats.as_ref(), now_secs());
        }
    }

    {
        let registry = inner.registry.read().await;
        for server in &registry.active {
            registry.process_server(server, inner.stats.as_ref()).await;
        }
        registry.recompute_wake();
    }

    inner.pass_active.store(false, Ordering::Release);
    inner.wakeup.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerEndpointConfig;
    use crate::registry::EntryState;
    use crate::stats::testing::MemoryStats;
    use crate::transport::testing::{MockFactory, MockTransport};

    fn client_with(urls: &[&str]) -> (DirectoryClient, Arc<MockTransport>, Arc<MemoryStats>) {
        let transport = MockTransport::new();
        let factory = Arc::new(MockFactory(transport.clone()));
        let stats = Arc::new(MemoryStats::new());
        let mut config = DirectoryConfig::default()
            .server_id("test/1.0")
            .client_limit(100)
            .listen_host("radio.example.com", 8000);
        for url in urls {
            config = config.server(ServerEndpointConfig::new(*url));
        }
        let client = DirectoryClient::new(config, factory, stats.clone());
        (client, transport, stats)
    }

    async fn wait_for_pass(client: &DirectoryClient) {
        while client.inner.pass_active.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn run_one_pass(client: &DirectoryClient) {
        assert_eq!(client.recheck(), Recheck::PassStarted);
        wait_for_pass(client).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_apply_after_debounce() {
        let (client, _, _) = client_with(&["http://a/yp"]);
        run_one_pass(&client).await; // applies the initial configuration

        client.add("/live");
        assert!(!client.inner.queue.is_empty(), "queued, not yet applied");

        tokio::time::sleep(Duration::from_millis(DEBOUNCE_WINDOW_MS * 3)).await;
        assert!(client.inner.queue.is_empty());

        let registry = client.inner.registry.read().await;
        assert!(registry.active[0].has_mount("/live"));
        assert!(registry.has_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_notifications_is_one_batch() {
        let (client, _, _) = client_with(&["http://a/yp"]);
        run_one_pass(&client).await;

        client.add("/a");
        client.add("/b");
        client.touch("/a", Some("song"));
        assert_eq!(client.inner.queue.len(), 3);

        tokio::time::sleep(Duration::from_millis(DEBOUNCE_WINDOW_MS * 3)).await;
        assert!(client.inner.queue.is_empty());

        let registry = client.inner.registry.read().await;
        assert!(registry.active[0].has_mount("/a"));
        assert!(registry.active[0].has_mount("/b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_idle_when_nothing_due() {
        let (client, _, _) = client_with(&[]);
        run_one_pass(&client).await; // consumes the initial update flag

        match client.recheck() {
            Recheck::Idle(delay) => {
                assert_eq!(delay, Duration::from_millis(IDLE_RECHECK_MS));
            }
            other => panic!("expected Idle, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_defers_while_registry_is_held() {
        let (client, _, _) = client_with(&[]);
        let guard = client.inner.registry.write().await;

        match client.recheck() {
            Recheck::Defer(delay) => {
                assert_eq!(delay, Duration::from_millis(RECHECK_DEFER_MS));
            }
            other => panic!("expected Defer, got {:?}", other),
        }
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let (client, _, _) = client_with(&["http://a/yp"]);
        client.shutdown().await;

        assert_eq!(client.recheck(), Recheck::Stopped);

        client.add("/live");
        assert!(client.inner.queue.is_empty(), "notification dropped");

        let registry = client.inner.registry.read().await;
        assert!(registry.active.is_empty());
        assert!(registry.pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_registration_flow() {
        let (client, transport, stats) = client_with(&["http://a/yp"]);
        stats.set_basic("/live", "Radio", "Rock", "mp3", "128");

        client.add("/live");
        tokio::time::sleep(Duration::from_millis(DEBOUNCE_WINDOW_MS * 3)).await;

        transport.push_response(Ok(MockTransport::accept_with_sid("abc123")));
        // one pass splices the entry in and sends the add, which is due
        // immediately
        run_one_pass(&client).await;

        assert_eq!(transport.request_count(), 1);
        let body = transport.last_request().unwrap();
        assert!(body.starts_with("action=add"));

        let registry = client.inner.registry.read().await;
        let handle = registry.active[0].find_mount("/live").unwrap();
        let entry = handle.lock().unwrap();
        assert_eq!(entry.state, EntryState::Touch);
        assert_eq!(entry.sid.as_deref(), Some("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_swaps_server_set() {
        let (client, transport, _) = client_with(&["http://a/yp"]);
        run_one_pass(&client).await;

        let config = DirectoryConfig::default()
            .server_id("test/1.0")
            .listen_host("radio.example.com", 8000)
            .server(ServerEndpointConfig::new("http://b/yp"));
        client.reconfigure(config).await;
        run_one_pass(&client).await;

        let registry = client.inner.registry.read().await;
        assert_eq!(registry.active.len(), 1);
        assert_eq!(registry.active[0].url, "http://b/yp");
        drop(registry);
        assert_eq!(transport.request_count(), 0, "no traffic without mounts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_runs_passes_on_its_own() {
        let (client, transport, stats) = client_with(&["http://a/yp"]);
        stats.set_basic("/live", "Radio", "Rock", "mp3", "128");
        transport.push_response(Ok(MockTransport::accept_with_sid("abc123")));

        let driver = client.spawn_driver();
        client.add("/live");

        // debounce, splice pass, registration pass all happen under the
        // driver; paused time auto-advances through the sleeps
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if transport.request_count() > 0 {
                break;
            }
        }
        assert!(transport.request_count() >= 1);

        client.shutdown().await;
        let _ = driver.await;
    }
}
