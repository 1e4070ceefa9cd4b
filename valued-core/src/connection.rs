//! HTTP delivery to the Valued ingestion API
//!
//! [`Connection`] builds its headers and endpoint once and performs a
//! blocking POST per event. It is only ever driven from inside the
//! dispatcher, so transport failures are logged here and go no further.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{StatusCode, Url};

use crate::error::{Error, Result};
use crate::event::Event;

/// Hosted ingestion endpoint
pub const DEFAULT_ENDPOINT: &str = "https://ingres.valued.app/events";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the dispatcher sends validated events.
///
/// Implementations must not panic or block indefinitely on ordinary
/// transport failures. Any closure taking `&Event` is a transport.
pub trait Transport: Send + Sync + 'static {
    fn deliver(&self, event: &Event);
}

impl<F> Transport for F
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn deliver(&self, event: &Event) {
        self(event)
    }
}

/// `valued-client/<version> (Rust; <os>)`
pub fn user_agent() -> String {
    format!(
        "valued-client/{} (Rust; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// Blocking HTTP sender for the ingestion API
pub struct Connection {
    token: String,
    endpoint: Url,
    http_client: reqwest::Client,
    /// Drives requests from dispatcher threads. `None` only during drop.
    runtime: Option<tokio::runtime::Runtime>,
}

impl Connection {
    /// Create a connection using [`DEFAULT_TIMEOUT`]
    ///
    /// Returns a configuration error for an empty token or an endpoint that
    /// is not an absolute URL.
    pub fn new(token: &str, endpoint: &str) -> Result<Self> {
        Self::with_timeout(token, endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(token: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Config("token must not be empty".to_string()));
        }

        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| Error::Config(format!("invalid endpoint {:?}: {}", endpoint, e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(build_headers(token)?)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("valued-http")
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            token: token.to_string(),
            endpoint,
            http_client,
            runtime: Some(runtime),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// POST the event and return the response status (blocking)
    ///
    /// Safe to call from async code: the calling thread blocks while the
    /// request runs on a helper thread.
    pub fn post(&self, event: &Event) -> Result<StatusCode> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Transport("connection is closed".to_string()))?;

        let body = event.to_json()?;
        let request = async {
            let response = self
                .http_client
                .post(self.endpoint.clone())
                .body(body)
                .send()
                .await
                .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;
            Ok::<_, Error>(response.status())
        };

        if tokio::runtime::Handle::try_current().is_err() {
            return runtime.block_on(request);
        }

        // block_on panics on a thread that is already driving a runtime
        tracing::trace!("Posting from a runtime thread via helper thread");
        std::thread::scope(|scope| {
            scope
                .spawn(move || runtime.block_on(request))
                .join()
                .map_err(|_| Error::Transport("request thread panicked".to_string()))?
        })
    }
}

impl Transport for Connection {
    fn deliver(&self, event: &Event) {
        match self.post(event) {
            Ok(status) if status.is_success() => {
                tracing::debug!(category = %event.category(), %status, "Event delivered");
            }
            Ok(status) => {
                tracing::warn!(
                    category = %event.category(),
                    %status,
                    endpoint = %self.endpoint,
                    "Event rejected by server"
                );
            }
            Err(e) => {
                tracing::warn!(
                    category = %event.category(),
                    endpoint = %self.endpoint,
                    error = %e,
                    "Event delivery failed"
                );
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The last client handle may be dropped inside an async context
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

fn build_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| Error::Config(format!("invalid token: {}", e)))?;
    auth_value.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth_value);

    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&user_agent())
            .map_err(|e| Error::Config(format!("invalid user agent: {}", e)))?,
    );
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_map;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn sample_event() -> Event {
        Event::new(normalize_map(&json!({
            "category": "action",
            "key": "signup",
            "user.id": 7,
            "occured_at": "2024-01-01T00:00:00Z"
        })))
        .unwrap()
    }

    /// Accepts one request, answers with `status`, and returns the raw request.
    fn serve_once(status: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/events", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (url, handle)
    }

    #[test]
    fn test_connection_rejects_empty_token() {
        assert!(matches!(
            Connection::new("  ", DEFAULT_ENDPOINT),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_connection_rejects_bad_endpoint() {
        assert!(matches!(
            Connection::new("tok", "not a url"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_connection_with_default_endpoint() {
        let connection = Connection::new("tok", DEFAULT_ENDPOINT).unwrap();
        assert_eq!(connection.endpoint().as_str(), DEFAULT_ENDPOINT);
        assert_eq!(connection.token(), "tok");
    }

    #[test]
    fn test_debug_hides_token() {
        let connection = Connection::new("secret-token", DEFAULT_ENDPOINT).unwrap();
        let debug = format!("{:?}", connection);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("ingres.valued.app"));
    }

    #[test]
    fn test_headers() {
        let headers = build_headers("tok").unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[AUTHORIZATION], "Bearer tok");
        assert!(headers[USER_AGENT]
            .to_str()
            .unwrap()
            .starts_with("valued-client/"));
        assert!(build_headers("bad\ntoken").is_err());
    }

    #[test]
    fn test_post_sends_json_body() {
        let (url, server) = serve_once("202 Accepted");
        let connection = Connection::new("tok", &url).unwrap();

        let status = connection.post(&sample_event()).unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        let request = server.join().unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /events HTTP/1.1"));
        assert!(lower.contains("authorization: bearer tok"));
        assert!(lower.contains("content-type: application/json"));
        assert!(lower.contains("user-agent: valued-client/"));

        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["key"], "signup");
        assert_eq!(body["user"]["id"], 7);
    }

    #[tokio::test]
    async fn test_post_from_async_context() {
        let (url, server) = serve_once("202 Accepted");
        let connection = Connection::new("tok", &url).unwrap();

        let status = connection.post(&sample_event()).unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(server.join().unwrap().starts_with("POST /events"));
    }

    #[test]
    fn test_deliver_swallows_failures() {
        let (url, server) = serve_once("500 Internal Server Error");
        let connection = Connection::new("tok", &url).unwrap();
        connection.deliver(&sample_event());
        server.join().unwrap();

        // Nothing is listening on the old address any more
        connection.deliver(&sample_event());
    }

    #[test]
    fn test_closure_is_transport() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let transport = move |event: &Event| sink.lock().push(event.category());
        transport.deliver(&sample_event());
        assert_eq!(seen.lock().len(), 1);
    }
}
