//! Register a mount with a YP directory server
//!
//! Run with: cargo run --example register_mount <DIRECTORY_URL> [MOUNT]
//!
//! Examples:
//!   cargo run --example register_mount http://localhost:8080/yp-cgi
//!   cargo run --example register_mount http://dir.example.com/cgi-bin/yp-cgi /jazz
//!
//! Registers the mount, keeps it touched for a minute with a changing
//! now-playing line, then withdraws it. Point RUST_LOG at `yp_rs=debug` to
//! watch the request scheduling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use yp_rs::stats::{keys, StatsSource};
use yp_rs::transport::http::HttpTransportFactory;
use yp_rs::{DirectoryClient, DirectoryConfig, ServerEndpointConfig};

/// Fixed-value stats source standing in for a real stream registry
struct DemoStats {
    values: Mutex<HashMap<(String, String), String>>,
}

impl DemoStats {
    fn new(mount: &str) -> Self {
        let mut values = HashMap::new();
        for (key, value) in [
            (keys::SERVER_NAME, "Demo Radio"),
            (keys::SERVER_DESCRIPTION, "yp-rs example stream"),
            (keys::GENRE, "Various"),
            (keys::SERVER_TYPE, "audio/mpeg"),
            (keys::BITRATE, "128"),
            (keys::LISTENERS, "0"),
        ] {
            values.insert((mount.to_string(), key.to_string()), value.to_string());
        }
        Self {
            values: Mutex::new(values),
        }
    }
}

impl StatsSource for DemoStats {
    fn get(&self, mount: &str, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap()
            .get(&(mount.to_string(), key.to_string()))
            .cloned()
    }

    fn public_mounts(&self) -> Vec<String> {
        Vec::new()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let Some(directory_url) = args.get(1) else {
        eprintln!("usage: register_mount <DIRECTORY_URL> [MOUNT]");
        std::process::exit(1);
    };
    let mount = args.get(2).map(String::as_str).unwrap_or("/live");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("yp_rs=debug".parse()?),
        )
        .init();

    let config = DirectoryConfig::default()
        .server_id("yp-rs-demo/0.2")
        .client_limit(100)
        .listen_host("localhost", 8000)
        .server(ServerEndpointConfig::new(directory_url).timeout(Duration::from_secs(10)));

    let client = DirectoryClient::new(
        config,
        Arc::new(HttpTransportFactory),
        Arc::new(DemoStats::new(mount)),
    );
    let _driver = client.spawn_driver();

    println!("Registering {} with {}", mount, directory_url);
    client.add(mount);

    for i in 1..=6 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        client.touch(mount, Some(&format!("Demo Track {}", i)));
    }

    println!("Withdrawing {}", mount);
    client.remove(mount);
    tokio::time::sleep(Duration::from_secs(2)).await;
    client.shutdown().await;

    Ok(())
}
