//! Per-server directory record
//!
//! One [`DirectoryServer`] exists per configured directory URL. It owns the
//! transport session for that endpoint and the mount entries listed (or
//! about to be listed) there.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::TOUCH_INTERVAL_FLOOR_SECS;
use crate::transport::Transport;

use super::entry::MountEntry;

/// Shared handle to a mount entry
///
/// Entries are mutated either by the single-flight background pass (under
/// the registry read lock) or by batch application (under the write lock),
/// so the inner mutex sees no real contention; it exists to make the
/// sharing sound. Guards are never held across an await.
pub type EntryHandle = Arc<Mutex<MountEntry>>;

/// A configured directory server and its mount lists
pub struct DirectoryServer {
    /// Directory endpoint URL
    pub url: String,

    /// Identity string sent with requests
    pub server_id: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Default touch interval for new entries, in seconds
    pub touch_interval: u64,

    /// Flagged for removal by reconciliation
    pub remove: bool,

    /// Transport session for this endpoint
    pub transport: Arc<dyn Transport>,

    /// Entries currently walked by the background pass
    pub mounts: Vec<EntryHandle>,

    /// Entries created since the last pass, spliced in on the next
    /// reconciliation step
    pub pending_mounts: Vec<EntryHandle>,
}

impl DirectoryServer {
    /// Create a server record around an established transport session
    pub fn new(
        url: &str,
        server_id: &str,
        timeout: Duration,
        touch_interval: Duration,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            url: url.to_string(),
            server_id: server_id.to_string(),
            timeout,
            touch_interval: touch_interval.as_secs().max(TOUCH_INTERVAL_FLOOR_SECS),
            remove: false,
            transport,
            mounts: Vec::new(),
            pending_mounts: Vec::new(),
        }
    }

    /// Whether any entry (active or pending) exists for a mount
    pub fn has_mount(&self, mount: &str) -> bool {
        self.find_mount(mount).is_some()
    }

    /// First entry for a mount, searching active then pending
    pub fn find_mount(&self, mount: &str) -> Option<&EntryHandle> {
        self.mounts
            .iter()
            .chain(self.pending_mounts.iter())
            .find(|handle| {
                handle
                    .lock()
                    .map(|e| e.mount == mount)
                    .unwrap_or(false)
            })
    }

    /// First entry for a mount that is not already on its way out
    pub fn find_live_mount(&self, mount: &str) -> Option<&EntryHandle> {
        self.mounts
            .iter()
            .chain(self.pending_mounts.iter())
            .find(|handle| {
                handle
                    .lock()
                    .map(|e| e.mount == mount && !e.release && !e.remove)
                    .unwrap_or(false)
            })
    }

    /// Total entries across both lists
    pub fn entry_count(&self) -> usize {
        self.mounts.len() + self.pending_mounts.len()
    }
}

impl std::fmt::Debug for DirectoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryServer")
            .field("url", &self.url)
            .field("remove", &self.remove)
            .field("mounts", &self.mounts.len())
            .field("pending_mounts", &self.pending_mounts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;

    fn server() -> DirectoryServer {
        DirectoryServer::new(
            "http://dir.example.com/yp",
            "test/1.0",
            Duration::from_secs(10),
            Duration::from_secs(300),
            MockTransport::new(),
        )
    }

    fn handle(mount: &str) -> EntryHandle {
        Arc::new(Mutex::new(MountEntry::new(mount, "http://h:1/l", "", 300)))
    }

    #[test]
    fn test_touch_interval_floored() {
        let s = DirectoryServer::new(
            "http://dir.example.com/yp",
            "test/1.0",
            Duration::from_secs(10),
            Duration::from_secs(5),
            MockTransport::new(),
        );
        assert_eq!(s.touch_interval, TOUCH_INTERVAL_FLOOR_SECS);
    }

    #[test]
    fn test_find_mount_searches_both_lists() {
        let mut s = server();
        s.mounts.push(handle("/a"));
        s.pending_mounts.push(handle("/b"));

        assert!(s.has_mount("/a"));
        assert!(s.has_mount("/b"));
        assert!(!s.has_mount("/c"));
        assert_eq!(s.entry_count(), 2);
    }

    #[test]
    fn test_find_live_mount_skips_releasing_entries() {
        let mut s = server();
        let h = handle("/a");
        h.lock().unwrap().release = true;
        s.mounts.push(h);
        s.mounts.push(handle("/a"));

        let found = s.find_live_mount("/a").unwrap();
        assert!(!found.lock().unwrap().release);
    }
}
