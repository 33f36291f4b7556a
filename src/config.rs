//! Directory client configuration
//!
//! Configuration is supplied by the host (parsing is the host's concern) and
//! can be swapped at runtime via [`DirectoryClient::reconfigure`], which
//! reconciles the configured server set against the live one.
//!
//! The numeric scheduling constants below are empirical tunings against real
//! directory services; treat them as protocol parameters, not knobs.
//!
//! [`DirectoryClient::reconfigure`]: crate::client::DirectoryClient::reconfigure

use std::collections::HashMap;
use std::time::Duration;

/// Minimum interval between touch requests, also the floor applied to a
/// server-advised `TouchFreq`
pub const TOUCH_INTERVAL_FLOOR_SECS: u64 = 30;

/// Wait before retrying an add when mandatory stats are missing
pub const MISSING_STATS_BACKOFF_SECS: u64 = 600;

/// Wait after a transport-level failure before the next attempt
pub const TRANSPORT_FAILURE_BACKOFF_SECS: u64 = 1200;

/// Wait after the directory rejects an add request
pub const REJECTED_ADD_BACKOFF_SECS: u64 = 7200;

/// Delay before the first touch following a successful add
pub const FIRST_TOUCH_DELAY_SECS: u64 = 5;

/// Retry delay for the anomalous touch-without-session case
pub const MISSING_SID_RETRY_SECS: u64 = 60;

/// Window over which initial registrations are staggered (0..window)
pub const STARTUP_STAGGER_WINDOW_SECS: u64 = 30;

/// Base delay for entries skipped after a server transport failure
pub const FAILURE_SPREAD_BASE_SECS: u64 = 30;

/// Spread window added on top of the base delay (base..base+window)
pub const FAILURE_SPREAD_WINDOW_SECS: u64 = 60;

/// Debounce window for coalescing queued change notifications
pub const DEBOUNCE_WINDOW_MS: u64 = 50;

/// Recheck deferral when the registry lock is contended
pub const RECHECK_DEFER_MS: u64 = 300;

/// Recheck interval when no entry is due
pub const IDLE_RECHECK_MS: u64 = 1000;

/// Maximum due entries processed per server in one background pass
pub const MAX_ENTRIES_PER_SERVER_PASS: usize = 20;

/// Grace given to an in-flight drain task during shutdown
pub const SHUTDOWN_DRAIN_GRACE_MS: u64 = 60;

/// A single configured directory server endpoint
#[derive(Debug, Clone)]
pub struct ServerEndpointConfig {
    /// POST target, e.g. `http://dir.xiph.org/cgi-bin/yp-cgi`
    pub url: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Default keep-alive interval, floored at
    /// [`TOUCH_INTERVAL_FLOOR_SECS`]; the server may raise it via `TouchFreq`
    pub touch_interval: Duration,
}

impl ServerEndpointConfig {
    /// Create an endpoint with default timeout (10s) and touch interval (5m)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            touch_interval: Duration::from_secs(300),
        }
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default touch interval
    pub fn touch_interval(mut self, interval: Duration) -> Self {
        self.touch_interval = interval;
        self
    }
}

/// Directory client configuration
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Directory servers to keep listings on
    pub servers: Vec<ServerEndpointConfig>,

    /// Server identity string, sent as the HTTP User-Agent
    pub server_id: String,

    /// Listener ceiling reported when a mount's limit is unlimited/unknown
    pub client_limit: u32,

    /// Public hostname used to build listen URLs
    pub hostname: String,

    /// Public port used to build listen URLs
    pub port: u16,

    /// Per-mount cluster passwords, sent on add requests
    pub cluster_passwords: HashMap<String, String>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            server_id: "yp-rs/0.2".to_string(),
            client_limit: 0,
            hostname: "localhost".to_string(),
            port: 8000,
            cluster_passwords: HashMap::new(),
        }
    }
}

impl DirectoryConfig {
    /// Add a directory server endpoint
    pub fn server(mut self, endpoint: ServerEndpointConfig) -> Self {
        self.servers.push(endpoint);
        self
    }

    /// Set the server identity string
    pub fn server_id(mut self, id: impl Into<String>) -> Self {
        self.server_id = id.into();
        self
    }

    /// Set the listener ceiling
    pub fn client_limit(mut self, limit: u32) -> Self {
        self.client_limit = limit;
        self
    }

    /// Set the public hostname and port for listen URLs
    pub fn listen_host(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.hostname = hostname.into();
        self.port = port;
        self
    }

    /// Set a cluster password for a mount
    pub fn cluster_password(mut self, mount: impl Into<String>, password: impl Into<String>) -> Self {
        self.cluster_passwords.insert(mount.into(), password.into());
        self
    }

    /// Listen URL for a mount, built from the configured host and port
    pub fn listen_url(&self, mount: &str) -> String {
        format!("http://{}:{}{}", self.hostname, self.port, mount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_builder() {
        let ep = ServerEndpointConfig::new("http://dir.example.com/yp")
            .timeout(Duration::from_secs(5))
            .touch_interval(Duration::from_secs(120));

        assert_eq!(ep.url, "http://dir.example.com/yp");
        assert_eq!(ep.timeout, Duration::from_secs(5));
        assert_eq!(ep.touch_interval, Duration::from_secs(120));
    }

    #[test]
    fn test_config_builder() {
        let config = DirectoryConfig::default()
            .server(ServerEndpointConfig::new("http://dir.example.com/yp"))
            .server_id("stream-server/1.0")
            .client_limit(500)
            .listen_host("radio.example.com", 8000)
            .cluster_password("/live", "secret");

        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.server_id, "stream-server/1.0");
        assert_eq!(config.client_limit, 500);
        assert_eq!(config.cluster_passwords.get("/live").unwrap(), "secret");
    }

    #[test]
    fn test_listen_url() {
        let config = DirectoryConfig::default().listen_host("radio.example.com", 8010);
        assert_eq!(config.listen_url("/live"), "http://radio.example.com:8010/live");
    }
}
