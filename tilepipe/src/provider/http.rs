//! HTTP client abstraction for testability.

use std::time::Duration;

use thiserror::Error;

use crate::config::NetworkConfig;

/// Network failure taxonomy for one fetch attempt.
///
/// All variants are terminal for the attempt: the pipeline never retries
/// on its own, a fresh request must be re-enqueued by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The connect or read deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// The server answered 404; the tile does not exist upstream.
    #[error("tile not found upstream")]
    NotFound,

    /// The host could not be reached at all.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// Any other non-success HTTP status.
    #[error("server returned HTTP {0}")]
    Server(u16),
}

/// Trait for HTTP GET operations.
///
/// This seam allows mock clients in tests; the production implementation
/// is [`ReqwestClient`].
pub trait HttpClient: Send + Sync {
    /// Performs an HTTP GET and returns the response body.
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Blocking HTTP client backed by reqwest.
///
/// Connect and read timeouts are seconds-scale so one stalled host cannot
/// pin a worker thread indefinitely.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client from network configuration.
    pub fn new(config: &NetworkConfig) -> Result<Self, FetchError> {
        Self::with_timeouts(
            config.connect_timeout,
            config.read_timeout,
            &config.user_agent,
        )
    }

    /// Creates a client with explicit timeouts.
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| FetchError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().map_err(classify_transport)?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Server(status.as_u16()));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(classify_transport)
    }
}

/// Maps a reqwest transport error onto the fetch taxonomy.
fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        FetchError::Unreachable(err.to_string())
    } else if let Some(status) = err.status() {
        FetchError::Server(status.as_u16())
    } else {
        FetchError::Unreachable(err.to_string())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock HTTP client with a scripted response and a call counter.
    pub struct MockHttpClient {
        response: Mutex<Result<Vec<u8>, FetchError>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl MockHttpClient {
        pub fn ok(body: Vec<u8>) -> Self {
            Self {
                response: Mutex::new(Ok(body)),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        pub fn failing(error: FetchError) -> Self {
            Self {
                response: Mutex::new(Err(error)),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        /// Makes every request take at least `delay`, for tests that need
        /// a run to still be in progress when they act on it.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpClient for MockHttpClient {
        fn get(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.response.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_mock_client_success() {
        let mock = MockHttpClient::ok(vec![1, 2, 3, 4]);
        assert_eq!(mock.get("http://example.com"), Ok(vec![1, 2, 3, 4]));
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_mock_client_error() {
        let mock = MockHttpClient::failing(FetchError::Server(503));
        assert_eq!(mock.get("http://example.com"), Err(FetchError::Server(503)));
    }

    #[test]
    fn test_fetch_error_display() {
        assert_eq!(FetchError::Timeout.to_string(), "request timed out");
        assert_eq!(FetchError::Server(500).to_string(), "server returned HTTP 500");
        assert!(FetchError::Unreachable("dns".into())
            .to_string()
            .contains("dns"));
    }

    #[test]
    fn test_reqwest_client_builds() {
        let client = ReqwestClient::with_timeouts(
            Duration::from_secs(5),
            Duration::from_secs(10),
            "tilepipe-test",
        );
        assert!(client.is_ok());
    }
}
