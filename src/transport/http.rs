//! HTTP transport backed by reqwest
//!
//! Production [`Transport`] implementation. Each directory server gets its
//! own `reqwest::Client` carrying the request timeout, the server identity
//! as User-Agent, and a redirect cap of 3.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use url::Url;

use crate::error::{Error, Result};

use super::{DirectoryResponse, SessionConfig, Transport, TransportFactory};

/// Factory producing reqwest-backed sessions
#[derive(Debug, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn create(&self, config: &SessionConfig) -> Result<Arc<dyn Transport>> {
        // Validate up front so a malformed URL surfaces as a config error
        // instead of failing on every pass.
        let url = Url::parse(&config.url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::InvalidUrl(config.url.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| Error::Session(e.to_string()))?;

        Ok(Arc::new(HttpTransport { url, client }))
    }
}

/// One session against one directory server
struct HttpTransport {
    url: Url,
    client: reqwest::Client,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, body: &str) -> Result<DirectoryResponse> {
        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let parsed = parse_headers(response.headers());

        // Drain the body; directory servers are not expected to send one.
        let _ = response.bytes().await;

        Ok(parsed)
    }
}

/// Interpret the YP response headers
///
/// Header names are matched case-insensitively (reqwest normalizes them to
/// lowercase). Values that fail to parse are treated as absent.
fn parse_headers(headers: &HeaderMap) -> DirectoryResponse {
    let text = |name: &str| -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    DirectoryResponse {
        accepted: text("ypresponse").as_deref() == Some("1"),
        message: text("ypmessage"),
        sid: text("sid"),
        touch_freq: text("touchfreq").and_then(|v| v.parse().ok()),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_accepted_add() {
        let resp = parse_headers(&headers(&[
            ("ypresponse", "1"),
            ("sid", "abc123"),
            ("touchfreq", "120"),
        ]));

        assert!(resp.accepted);
        assert_eq!(resp.sid.as_deref(), Some("abc123"));
        assert_eq!(resp.touch_freq, Some(120));
    }

    #[test]
    fn test_parse_rejection_with_message() {
        let resp = parse_headers(&headers(&[
            ("ypresponse", "0"),
            ("ypmessage", "listen url not reachable"),
        ]));

        assert!(!resp.accepted);
        assert_eq!(resp.message.as_deref(), Some("listen url not reachable"));
    }

    #[test]
    fn test_parse_empty_headers() {
        let resp = parse_headers(&HeaderMap::new());

        assert!(!resp.accepted);
        assert!(resp.message.is_none());
        assert!(resp.sid.is_none());
        assert!(resp.touch_freq.is_none());
        assert_eq!(resp.message_or_default(), "no response from server");
    }

    #[test]
    fn test_parse_garbage_touch_freq() {
        let resp = parse_headers(&headers(&[("touchfreq", "soon")]));
        assert!(resp.touch_freq.is_none());
    }

    #[test]
    fn test_factory_rejects_malformed_url() {
        let factory = HttpTransportFactory;
        let result = factory.create(&SessionConfig {
            url: "not a url".to_string(),
            timeout: std::time::Duration::from_secs(5),
            user_agent: "test/1.0".to_string(),
        });
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_factory_rejects_non_http_scheme() {
        let factory = HttpTransportFactory;
        let result = factory.create(&SessionConfig {
            url: "ftp://dir.example.com/yp".to_string(),
            timeout: std::time::Duration::from_secs(5),
            user_agent: "test/1.0".to_string(),
        });
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
