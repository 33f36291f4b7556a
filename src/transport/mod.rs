//! Transport seam for directory requests
//!
//! The client composes request bodies and interprets responses; actually
//! executing the HTTP POST is a collaborator concern behind [`Transport`].
//! One session exists per configured directory server, created through a
//! [`TransportFactory`] so the server's timeout and identity string are
//! baked in at reconcile time.
//!
//! Directory servers answer through response headers rather than the body:
//!
//! | Header        | Meaning                                            |
//! |---------------|----------------------------------------------------|
//! | `YPResponse`  | `1` accepted, `0` rejected                         |
//! | `YPMessage`   | human-readable rejection/info message              |
//! | `SID`         | session id, present on successful add responses    |
//! | `TouchFreq`   | server-advised minimum touch interval (30s floor)  |

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpTransportFactory;

/// Parsed directory server response
#[derive(Debug, Clone, Default)]
pub struct DirectoryResponse {
    /// `YPResponse: 1` was present
    pub accepted: bool,
    /// `YPMessage` header, if any
    pub message: Option<String>,
    /// `SID` header, if any
    pub sid: Option<String>,
    /// `TouchFreq` header in seconds, if any (not yet floored)
    pub touch_freq: Option<u64>,
}

impl DirectoryResponse {
    /// Rejection message, substituting the stock text when the server sent none
    pub fn message_or_default(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "no response from server".to_string())
    }
}

/// Per-server transport session
///
/// One POST per call; the implementation applies the session timeout and
/// returns `Error::Transport` when the call could not complete. A completed
/// call that the server rejected is still `Ok`; rejection is carried in
/// [`DirectoryResponse::accepted`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a form-encoded body to the server and parse the response headers
    async fn post(&self, body: &str) -> Result<DirectoryResponse>;
}

/// Session settings fixed at server creation
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory server URL
    pub url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Identity string sent as the User-Agent
    pub user_agent: String,
}

/// Creates transport sessions for configured servers
///
/// Creation may fail (malformed URL, client construction); the caller drops
/// that server entry and continues with the rest.
pub trait TransportFactory: Send + Sync {
    /// Create a session for one directory server
    fn create(&self, config: &SessionConfig) -> Result<Arc<dyn Transport>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::error::{Error, Result};

    use super::{DirectoryResponse, SessionConfig, Transport, TransportFactory};

    /// Scripted transport double shared across sessions
    ///
    /// Records every posted body and pops results from a script; when the
    /// script runs dry it answers with a plain acceptance.
    #[derive(Default)]
    pub struct MockTransport {
        pub requests: Mutex<Vec<String>>,
        script: Mutex<Vec<Result<DirectoryResponse>>>,
        pub fail_all: AtomicUsize,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn push_response(&self, response: Result<DirectoryResponse>) {
            self.script.lock().unwrap().insert(0, response);
        }

        pub fn accept_with_sid(sid: &str) -> DirectoryResponse {
            DirectoryResponse {
                accepted: true,
                sid: Some(sid.to_string()),
                ..Default::default()
            }
        }

        pub fn reject(message: &str) -> DirectoryResponse {
            DirectoryResponse {
                accepted: false,
                message: Some(message.to_string()),
                ..Default::default()
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn last_request(&self) -> Option<String> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn post(&self, body: &str) -> Result<DirectoryResponse> {
            self.requests.lock().unwrap().push(body.to_string());
            if self.fail_all.load(Ordering::Relaxed) != 0 {
                return Err(Error::Transport("connection refused".to_string()));
            }
            match self.script.lock().unwrap().pop() {
                Some(result) => result,
                None => Ok(DirectoryResponse {
                    accepted: true,
                    ..Default::default()
                }),
            }
        }
    }

    /// Factory handing out the same shared mock for every server
    pub struct MockFactory(pub Arc<MockTransport>);

    impl TransportFactory for MockFactory {
        fn create(&self, _config: &SessionConfig) -> Result<Arc<dyn Transport>> {
            Ok(self.0.clone())
        }
    }
}
