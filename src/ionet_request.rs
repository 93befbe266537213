//! Resilient request layer.
//!
//! Unique responsibility: execute a single io.net API call, retrying on rate
//! limiting (HTTP 429) and on transport failures, and classify the outcome.
//!
//! - 429 and transport failures are retried up to `max_attempts`, each retry
//!   waiting per [`Backoff`].
//! - Any other status >= 400 is terminal immediately.
//! - Running out of attempts yields [`RequestError::Exhausted`], which is
//!   distinct from a single-attempt rejection ([`RequestError::Api`]).
//!
//! Retry sleeps use `tokio::time::sleep`, so dropping the future cancels them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ionet_backoff::Backoff;

/// Default maximum number of attempts per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Description of one API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API base URL (including any query string).
    pub path: String,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// A GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    /// A POST request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    /// A DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }
}

/// Raw response as seen by the retry layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body text (may be empty).
    pub body: String,
}

impl RawResponse {
    /// Build a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Failure below the HTTP layer (connection refused, timeout, ...).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Human readable cause.
    pub message: String,
}

impl TransportError {
    /// Build a transport error from any message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        let kind = if value.is_timeout() {
            "timeout"
        } else if value.is_connect() {
            "connect"
        } else {
            "request"
        };
        Self::new(format!("{kind} error: {value}"))
    }
}

/// Terminal outcome of [`RetryingRequester::execute`].
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The remote rejected the request.
    #[error("HTTP {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Structured error message from the body, or the raw body.
        message: String,
    },
    /// Every attempt was rate limited or failed in transport.
    #[error("request failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Cause of the last failed attempt.
        last_error: String,
    },
}

impl RequestError {
    /// HTTP status of a remote rejection, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Sends a single request; implementations do not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one HTTP exchange.
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// `reqwest`-backed transport that attaches the io.net API key.
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ReqwestTransport {
    /// Create a transport for `base_url` authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .header("x-api-key", &self.api_key);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        Ok(RawResponse { status, body })
    }
}

/// Wraps a [`Transport`] with the retry contract.
pub struct RetryingRequester<T> {
    transport: T,
    max_attempts: u32,
    backoff: Backoff,
}

impl<T: Transport> RetryingRequester<T> {
    /// Create a requester. `max_attempts` of zero is treated as one.
    #[must_use]
    pub fn new(transport: T, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Maximum attempts per request.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The wrapped transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute `request` under the retry policy.
    ///
    /// # Errors
    ///
    /// [`RequestError::Api`] for a non-retryable rejection,
    /// [`RequestError::Exhausted`] when every attempt was rate limited or
    /// failed in transport.
    pub async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, RequestError> {
        let mut backoff = self.backoff.clone();
        backoff.reset();
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.transport.send(request).await {
                Ok(resp) if resp.status == 429 => {
                    last_error = "rate limited (HTTP 429)".to_string();
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        attempt,
                        "ionet request rate limited"
                    );
                }
                Ok(resp) if resp.status >= 400 => {
                    return Err(RequestError::Api {
                        status: resp.status,
                        message: error_message(&resp.body),
                    });
                }
                Ok(resp) => {
                    debug!(method = %request.method, path = %request.path, status = resp.status, "ionet request ok");
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        attempt,
                        error = %e,
                        "ionet request failed"
                    );
                    last_error = e.message;
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }

        Err(RequestError::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

/// Pull the `error` field out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("error") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &ApiRequest) -> Result<RawResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new("script exhausted")))
        }
    }

    fn requester(
        replies: Vec<Result<RawResponse, TransportError>>,
    ) -> RetryingRequester<ScriptedTransport> {
        RetryingRequester::new(
            ScriptedTransport::new(replies),
            6,
            Backoff::new(Duration::from_secs(5), 10),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let requester = requester(vec![Ok(RawResponse::new(200, "{}"))]);
        let resp = requester.execute(&ApiRequest::get("/x")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(requester.transport().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limit_then_succeeds() {
        let requester = requester(vec![
            Ok(RawResponse::new(429, "")),
            Ok(RawResponse::new(429, "")),
            Ok(RawResponse::new(200, r#"{"ok":true}"#)),
        ]);
        let start = tokio::time::Instant::now();
        let resp = requester.execute(&ApiRequest::get("/x")).await.unwrap();
        assert_eq!(resp.body, r#"{"ok":true}"#);
        assert_eq!(requester.transport().calls(), 3);
        // 5s + 8s of backoff.
        assert!(start.elapsed() >= Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_errors() {
        let requester = requester(vec![
            Err(TransportError::new("connect error: refused")),
            Ok(RawResponse::new(200, "{}")),
        ]);
        assert!(requester.execute(&ApiRequest::get("/x")).await.is_ok());
        assert_eq!(requester.transport().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_is_terminal_without_retry() {
        let requester = requester(vec![Ok(RawResponse::new(500, r#"{"error":"boom"}"#))]);
        let err = requester
            .execute(&ApiRequest::delete("/x"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, RequestError::Api { status: 500, message } if message == "boom"),
            "unexpected error: {err:?}"
        );
        assert_eq!(requester.transport().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_json_error_body_is_kept_verbatim() {
        let requester = requester(vec![Ok(RawResponse::new(404, "not found\n"))]);
        let err = requester.execute(&ApiRequest::get("/x")).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404: not found");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_is_distinct_error() {
        let requester = requester((0..6).map(|_| Ok(RawResponse::new(429, ""))).collect());
        let err = requester.execute(&ApiRequest::get("/x")).await.unwrap_err();
        assert!(matches!(err, RequestError::Exhausted { attempts: 6, .. }));
        assert_eq!(err.status(), None);
        assert_eq!(requester.transport().calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_transport_failures_report_last_cause() {
        let requester = requester(
            (0..6)
                .map(|i| Err(TransportError::new(format!("timeout error: #{i}"))))
                .collect(),
        );
        let err = requester.execute(&ApiRequest::get("/x")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "request failed after 6 attempts: timeout error: #5"
        );
    }

    #[test]
    fn error_message_prefers_error_field() {
        assert_eq!(error_message(r#"{"error":"bad hardware"}"#), "bad hardware");
        assert_eq!(error_message(r#"{"error":{"code":1}}"#), r#"{"code":1}"#);
        assert_eq!(error_message(r#"{"detail":"x"}"#), r#"{"detail":"x"}"#);
        assert_eq!(error_message("plain"), "plain");
    }
}
