//! Directory server registry
//!
//! Owns the configured directory servers and their mount entries, and
//! implements the three mutation paths: configuration reconciliation,
//! batch application of change notifications, and the periodic network
//! pass.
//!
//! Locking contract (the caller holds the locks, the registry assumes
//! them): `reconcile`, `apply_pending` and `apply_change` run under the
//! registry write lock; `process_server` and `recompute_wake` run under a
//! read lock held by the single background pass. The write lock is never
//! held across a network call; the pass's read lock is, which also means a
//! reconfigure or drain waits for an in-flight pass to finish.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{
    DirectoryConfig, FAILURE_SPREAD_BASE_SECS, FAILURE_SPREAD_WINDOW_SECS,
    MAX_ENTRIES_PER_SERVER_PASS, STARTUP_STAGGER_WINDOW_SECS,
};
use crate::queue::Change;
use crate::stats::{keys, StatsSource};
use crate::transport::{SessionConfig, TransportFactory};
use crate::util::{now_secs, url_escape};

use super::entry::{EntryState, MountEntry};
use super::server::{DirectoryServer, EntryHandle};

/// What a due entry wants sent, composed under the entry lock
enum Attempt {
    Add(String),
    Touch(String),
    Remove(Option<String>),
    Nothing,
}

/// Set of configured directory servers and their mount listings
pub struct DirectoryRegistry {
    /// Servers currently walked by the background pass
    pub active: Vec<DirectoryServer>,

    /// Servers created by reconciliation, promoted on the next
    /// `apply_pending`
    pub pending: Vec<DirectoryServer>,

    /// Last applied configuration (listen host, passwords, ceiling)
    config: DirectoryConfig,

    /// Startup stagger counter; successive new entries land 0..29s apart
    adjust: u64,

    /// Failure spread counter; entries skipped after a server failure land
    /// 30..89s apart
    disperse: AtomicU64,

    /// Structural changes are pending; the next pass runs `apply_pending`
    update_flag: AtomicBool,

    /// Earliest `next_update` across all entries, unix seconds
    /// (`u64::MAX` when nothing is scheduled)
    next_wake: AtomicU64,
}

impl DirectoryRegistry {
    /// Create an empty registry carrying the initial configuration values
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            active: Vec::new(),
            pending: Vec::new(),
            config,
            adjust: 0,
            disperse: AtomicU64::new(0),
            update_flag: AtomicBool::new(false),
            next_wake: AtomicU64::new(0),
        }
    }

    /// Reconcile the live server set against a new configuration
    ///
    /// Active servers absent from the configuration are flagged for
    /// removal; configured URLs with no server yet get a fresh pending
    /// server (with its own transport session); servers present in both
    /// have any removal flag cleared. Re-invoking with an unchanged set
    /// only clears flags. A server whose session cannot be created is
    /// dropped with a log line; the rest proceed.
    pub fn reconcile(&mut self, config: DirectoryConfig, factory: &dyn TransportFactory) {
        tracing::debug!("updating directory configuration");

        for server in &mut self.active {
            server.remove = true;
        }

        for endpoint in &config.servers {
            if let Some(server) = self.find_server_mut(&endpoint.url) {
                server.remove = false;
                continue;
            }
            let session = SessionConfig {
                url: endpoint.url.clone(),
                timeout: endpoint.timeout,
                user_agent: config.server_id.clone(),
            };
            match factory.create(&session) {
                Ok(transport) => {
                    tracing::info!(
                        server = %endpoint.url,
                        timeout_secs = endpoint.timeout.as_secs(),
                        interval_secs = endpoint.touch_interval.as_secs(),
                        "adding directory server"
                    );
                    self.pending.push(DirectoryServer::new(
                        &endpoint.url,
                        &config.server_id,
                        endpoint.timeout,
                        endpoint.touch_interval,
                        transport,
                    ));
                }
                Err(error) => {
                    tracing::error!(
                        server = %endpoint.url,
                        error = %error,
                        "dropping directory server, session creation failed"
                    );
                }
            }
        }

        self.config = config;
        self.update_flag.store(true, Ordering::Release);
    }

    fn find_server_mut(&mut self, url: &str) -> Option<&mut DirectoryServer> {
        self.active
            .iter_mut()
            .chain(self.pending.iter_mut())
            .find(|s| s.url == url)
    }

    /// Apply structural changes: drop removal-flagged servers, promote
    /// pending ones, splice pending entries, prune removed entries
    ///
    /// A flagged server still holding entries is a lifecycle violation; it
    /// is kept (destruction skipped) with its entries put on the release
    /// path, and goes away once they have drained.
    pub fn apply_pending(&mut self, stats: &dyn StatsSource, now: u64) {
        // Splice and prune before the destruction check, so a flagged
        // server whose last entry just finished its remove attempt counts
        // as empty and is dropped in this same pass.
        for server in &mut self.active {
            if !server.pending_mounts.is_empty() {
                let count = server.pending_mounts.len();
                let pending = std::mem::take(&mut server.pending_mounts);
                server.mounts.extend(pending);
                tracing::debug!(count, server = %server.url, "entries spliced in");
                self.next_wake.fetch_min(now, Ordering::AcqRel);
            }
            let url = server.url.clone();
            server.mounts.retain(|handle| {
                let entry = handle.lock().expect("entry lock poisoned");
                if entry.remove {
                    tracing::debug!(mount = %entry.mount, server = %url, "entry removed");
                    false
                } else {
                    true
                }
            });
        }

        let current = std::mem::take(&mut self.active);
        let mut kept = Vec::with_capacity(current.len());
        for server in current {
            if !server.remove {
                kept.push(server);
                continue;
            }
            if server.entry_count() == 0 {
                tracing::debug!(server = %server.url, "directory server removed");
                continue;
            }
            tracing::warn!(
                server = %server.url,
                entries = server.entry_count(),
                "removed server still has listings, draining them first"
            );
            for handle in server.mounts.iter().chain(server.pending_mounts.iter()) {
                let mut entry = handle.lock().expect("entry lock poisoned");
                if !entry.release && !entry.remove {
                    entry.release = true;
                    entry.next_update = now;
                }
            }
            self.note_wake(now);
            kept.push(server);
        }
        self.active = kept;

        // Promote pending servers, seeding each with every mount the host
        // currently marks public. Entries queued against a server while it
        // was still pending are spliced in here as well.
        let promoted = std::mem::take(&mut self.pending);
        for mut server in promoted {
            tracing::debug!(server = %server.url, "directory server active");
            for mount in stats.public_mounts() {
                let mut entry = self.build_entry(&mount, server.touch_interval);
                self.adjust += 1;
                entry.schedule(now, self.adjust % STARTUP_STAGGER_WINDOW_SECS);
                self.note_wake(entry.next_update);
                tracing::debug!(mount = %mount, server = %server.url, "listing existing mount");
                server.mounts.push(Arc::new(Mutex::new(entry)));
            }
            if !server.pending_mounts.is_empty() {
                let pending = std::mem::take(&mut server.pending_mounts);
                server.mounts.extend(pending);
                self.note_wake(now);
            }
            self.active.push(server);
        }
    }

    /// Apply one queued change notification
    pub fn apply_change(&mut self, change: &Change, now: u64) {
        match change {
            Change::Add(mount) => {
                let listen_url = self.config.listen_url(mount);
                let password = self
                    .config
                    .cluster_passwords
                    .get(mount)
                    .cloned()
                    .unwrap_or_default();
                let mut created = false;
                for server in self.active.iter_mut().chain(self.pending.iter_mut()) {
                    if server.has_mount(mount) {
                        tracing::debug!(mount = %mount, server = %server.url, "entry already exists");
                        continue;
                    }
                    let mut entry =
                        MountEntry::new(mount, &listen_url, &password, server.touch_interval);
                    entry.schedule(now, 0);
                    tracing::debug!(mount = %mount, server = %server.url, "adding mount");
                    server.pending_mounts.push(Arc::new(Mutex::new(entry)));
                    created = true;
                }
                if created {
                    self.update_flag.store(true, Ordering::Release);
                    self.note_wake(now);
                }
            }
            Change::Remove(mount) => {
                for server in self.active.iter().chain(self.pending.iter()) {
                    if let Some(handle) = server.find_live_mount(mount) {
                        let mut entry = handle.lock().expect("entry lock poisoned");
                        tracing::debug!(mount = %mount, server = %server.url, "releasing mount");
                        entry.release = true;
                        entry.next_update = now;
                        self.update_flag.store(true, Ordering::Release);
                        self.note_wake(now);
                    }
                }
            }
            Change::Touch { mount, now_playing } => {
                for server in self.active.iter().chain(self.pending.iter()) {
                    if let Some(handle) = server.find_live_mount(mount) {
                        let mut entry = handle.lock().expect("entry lock poisoned");
                        entry.apply_touch_notification(now_playing.as_deref(), now);
                        self.note_wake(entry.next_update);
                    }
                }
            }
        }
    }

    /// Build an entry carrying the configured listen URL and password
    fn build_entry(&self, mount: &str, touch_interval: u64) -> MountEntry {
        let listen_url = self.config.listen_url(mount);
        let password = self
            .config
            .cluster_passwords
            .get(mount)
            .cloned()
            .unwrap_or_default();
        MountEntry::new(mount, &listen_url, &password, touch_interval)
    }

    /// Walk one server's entries, sending whatever is due
    ///
    /// A transport-level failure marks the server unreachable for the rest
    /// of the pass: later due entries are not attempted and are spread over
    /// the next 30..90s instead of piling onto the retry. At most
    /// [`MAX_ENTRIES_PER_SERVER_PASS`] attempts are made per call.
    pub async fn process_server(&self, server: &DirectoryServer, stats: &dyn StatsSource) {
        let mut server_failed = false;
        let mut budget = MAX_ENTRIES_PER_SERVER_PASS;

        for handle in &server.mounts {
            let now = now_secs();
            if server_failed {
                let mut entry = handle.lock().expect("entry lock poisoned");
                if !entry.remove && entry.is_due(now) {
                    let spread = FAILURE_SPREAD_BASE_SECS
                        + self.disperse.fetch_add(1, Ordering::Relaxed) % FAILURE_SPREAD_WINDOW_SECS;
                    tracing::debug!(
                        mount = %entry.mount,
                        server = %server.url,
                        delay_secs = spread,
                        "skipping entry after server failure"
                    );
                    entry.state = EntryState::Add;
                    entry.sid = None;
                    entry.schedule(now, spread);
                }
            } else if budget > 0 {
                let due = {
                    let entry = handle.lock().expect("entry lock poisoned");
                    !entry.remove && entry.is_due(now)
                };
                if due {
                    budget -= 1;
                    if self.process_entry(server, handle, stats).await {
                        tracing::warn!(
                            server = %server.url,
                            "transport failure, backing off remaining entries"
                        );
                        server_failed = true;
                    }
                }
            }

            let entry = handle.lock().expect("entry lock poisoned");
            if !entry.remove {
                self.note_wake(entry.next_update);
            }
        }
    }

    /// Run one entry's due attempt; returns true on a transport failure
    ///
    /// The entry lock is held for composing the request and applying the
    /// result, never across the network call itself. Nothing else mutates
    /// the entry in between: the pass is single-flight and every other
    /// writer needs the registry write lock, which the pass's read lock
    /// holds off.
    async fn process_entry(
        &self,
        server: &DirectoryServer,
        handle: &EntryHandle,
        stats: &dyn StatsSource,
    ) -> bool {
        let now = now_secs();
        let (mount, attempt) = {
            let mut entry = handle.lock().expect("entry lock poisoned");
            if entry.release && entry.state != EntryState::Remove {
                entry.state = EntryState::Remove;
                entry.next_update = now;
            }
            let attempt = match entry.state {
                EntryState::Add => {
                    if !entry.refresh_add_attributes(stats) {
                        entry.on_missing_stats(now);
                        Attempt::Nothing
                    } else {
                        match entry.compose_add() {
                            Some(body) => Attempt::Add(body),
                            None => {
                                entry.on_missing_stats(now);
                                Attempt::Nothing
                            }
                        }
                    }
                }
                EntryState::Touch => {
                    if entry.sid.is_none() {
                        // odd case, ask for a new attempt shortly
                        entry.on_missing_sid(now);
                        Attempt::Nothing
                    } else {
                        let listeners = stats
                            .get(&entry.mount, keys::LISTENERS)
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        let max_listeners = match stats.get(&entry.mount, keys::MAX_LISTENERS) {
                            Some(v) if v != "unlimited" => match v.parse::<i64>() {
                                Ok(n) if n >= 0 => n as u32,
                                _ => self.config.client_limit,
                            },
                            _ => self.config.client_limit,
                        };
                        if let Some(subtype) = stats.get(&entry.mount, keys::SUBTYPE) {
                            entry.subtype = url_escape(&subtype);
                        }
                        match entry.compose_touch(listeners, max_listeners) {
                            Some(body) => Attempt::Touch(body),
                            None => Attempt::Nothing,
                        }
                    }
                }
                EntryState::Remove => Attempt::Remove(entry.compose_remove()),
            };
            (entry.mount.clone(), attempt)
        };

        match attempt {
            Attempt::Nothing => false,
            Attempt::Add(body) => {
                let result = server.transport.post(&body).await;
                let now = now_secs();
                let mut entry = handle.lock().expect("entry lock poisoned");
                match result {
                    Ok(resp) if resp.accepted => {
                        tracing::debug!(mount = %mount, server = %server.url, "directory add succeeded");
                        entry.on_add_accepted(&resp, now);
                        false
                    }
                    Ok(resp) => {
                        entry.on_rejected(&resp, now);
                        false
                    }
                    Err(error) => {
                        tracing::error!(
                            mount = %mount,
                            server = %server.url,
                            error = %error,
                            "directory add failed"
                        );
                        entry.on_transport_failure(now);
                        true
                    }
                }
            }
            Attempt::Touch(body) => {
                let result = server.transport.post(&body).await;
                let now = now_secs();
                let mut entry = handle.lock().expect("entry lock poisoned");
                match result {
                    Ok(resp) if resp.accepted => {
                        tracing::debug!(mount = %mount, server = %server.url, "directory touch succeeded");
                        entry.on_touch_accepted(&resp, now);
                        false
                    }
                    Ok(resp) => {
                        entry.on_rejected(&resp, now);
                        false
                    }
                    Err(error) => {
                        tracing::error!(
                            mount = %mount,
                            server = %server.url,
                            error = %error,
                            "directory touch failed"
                        );
                        entry.on_transport_failure(now);
                        true
                    }
                }
            }
            Attempt::Remove(body) => {
                // Outcome does not affect this entry; it is pruned on the
                // next apply_pending either way.
                let mut failed = false;
                if let Some(body) = body {
                    tracing::info!(mount = %mount, server = %server.url, "clearing directory entry");
                    failed = server.transport.post(&body).await.is_err();
                }
                let mut entry = handle.lock().expect("entry lock poisoned");
                entry.sid = None;
                entry.remove = true;
                drop(entry);
                self.update_flag.store(true, Ordering::Release);
                failed
            }
        }
    }

    /// Recompute the earliest-wake counter across all servers and entries
    pub fn recompute_wake(&self) {
        let mut earliest = u64::MAX;
        for server in &self.active {
            for handle in server.mounts.iter().chain(server.pending_mounts.iter()) {
                let entry = handle.lock().expect("entry lock poisoned");
                if !entry.remove {
                    earliest = earliest.min(entry.next_update);
                }
            }
        }
        self.next_wake.store(earliest, Ordering::Release);
    }

    /// Lower the earliest-wake counter to `when` if it is later
    pub fn note_wake(&self, when: u64) {
        self.next_wake.fetch_min(when, Ordering::AcqRel);
    }

    /// Park the wake counter while a pass is running
    pub fn reset_wake(&self) {
        self.next_wake.store(u64::MAX, Ordering::Release);
    }

    /// Whether any entry's attempt time has arrived
    pub fn wake_due(&self, now: u64) -> bool {
        self.next_wake.load(Ordering::Acquire) <= now
    }

    /// Earliest scheduled attempt, unix seconds
    pub fn next_wake_secs(&self) -> u64 {
        self.next_wake.load(Ordering::Acquire)
    }

    /// Whether structural changes await `apply_pending`
    pub fn has_update(&self) -> bool {
        self.update_flag.load(Ordering::Acquire)
    }

    /// Consume the update flag
    pub fn take_update(&self) -> bool {
        self.update_flag.swap(false, Ordering::AcqRel)
    }

    /// Drop every server and entry; shutdown path
    pub fn clear(&mut self) {
        self.active.clear();
        self.pending.clear();
        self.reset_wake();
    }
}
