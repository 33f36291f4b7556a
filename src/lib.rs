//! YP directory registration client
//!
//! Keeps a streaming server's public mounts listed on one or more YP
//! directory servers. Each mount gets a small state machine per server
//! (add, then periodic touches, then remove) driven by a single background
//! pass; the embedding server only fires cheap notifications when a source
//! connects, updates metadata, or disconnects.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use yp_rs::{DirectoryClient, DirectoryConfig, ServerEndpointConfig};
//! use yp_rs::transport::http::HttpTransportFactory;
//! # use yp_rs::stats::StatsSource;
//! # fn stats_source() -> Arc<dyn StatsSource> { unimplemented!() }
//!
//! # async fn run() {
//! let config = DirectoryConfig::default()
//!     .server_id("icecast/2.4")
//!     .listen_host("radio.example.com", 8000)
//!     .server(ServerEndpointConfig::new("http://dir.xiph.org/cgi-bin/yp-cgi"));
//!
//! let client = DirectoryClient::new(config, Arc::new(HttpTransportFactory), stats_source());
//! let _driver = client.spawn_driver();
//!
//! client.add("/live");
//! client.touch("/live", Some("Artist - Title"));
//! client.remove("/live");
//! client.shutdown().await;
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod transport;
pub mod util;

pub use client::{DirectoryClient, Recheck};
pub use config::{DirectoryConfig, ServerEndpointConfig};
pub use error::{Error, Result};
pub use queue::Change;
pub use stats::StatsSource;
pub use transport::{DirectoryResponse, Transport, TransportFactory};
