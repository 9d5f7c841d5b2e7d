//! HTTP primitive
//!
//! Issues HTTP requests with retry, exponential backoff, and optional
//! response streaming. Retries cover network errors, 5xx, and 429 only;
//! no other 4xx is ever re-sent. A `Retry-After` header on a 429 overrides
//! the computed backoff when it parses as seconds.

use crate::executor::cancel::CancelHandle;
use crate::primitives::OutputSink;
use sdk::errors::KernelError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default per-request timeout when the merged config declares none
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Cap for inline-captured response bodies
pub const MAX_INLINE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Retry behaviour for one request
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Statuses that may be re-sent: 429 and the 5xx range
    pub fn is_retriable_status(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }

    /// Backoff before the next attempt, `attempt` counting from 1
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        let millis = if self.jitter {
            capped * rand::random::<f64>()
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }
}

/// A fully-resolved HTTP invocation
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }
}

/// The final response of a request, after retries
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the body is JSON, a string otherwise; `Null` when
    /// the body went to a sink
    pub body: Value,
    pub attempts: u32,
    pub truncated: bool,
    pub streamed: bool,
}

/// Reqwest-backed HTTP client shared across calls
#[derive(Clone, Default)]
pub struct HttpPrimitive {
    client: reqwest::Client,
}

impl HttpPrimitive {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Perform a request, retrying per policy, optionally streaming the
    /// response body into `sink`
    pub async fn request(
        &self,
        request: &HttpRequest,
        mut sink: Option<&mut (dyn OutputSink + 'static)>,
        cancel: &CancelHandle,
    ) -> Result<HttpResponse, KernelError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| {
                KernelError::InvalidParams(format!("invalid HTTP method '{}'", request.method))
            })?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let mut builder = self
                .client
                .request(method.clone(), &request.url)
                .timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            tracing::debug!(
                "HTTP {} {} (attempt {}/{})",
                request.method,
                request.url,
                attempt,
                request.retry.max_attempts
            );

            let sent = tokio::select! {
                result = builder.send() => result,
                _ = cancel.cancelled() => return Err(KernelError::Cancelled),
            };

            match sent {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if RetryPolicy::is_retriable_status(status)
                        && attempt < request.retry.max_attempts
                    {
                        let delay = retry_after(&response)
                            .unwrap_or_else(|| request.retry.delay_for(attempt));
                        tracing::warn!(
                            "HTTP {} from {}, retrying in {} ms",
                            status,
                            request.url,
                            delay.as_millis()
                        );
                        sleep_or_cancel(delay, cancel).await?;
                        continue;
                    }
                    return finalize(response, attempt, sink.take(), cancel).await;
                }
                Err(e) => {
                    let timed_out = e.is_timeout();
                    if attempt < request.retry.max_attempts {
                        let delay = request.retry.delay_for(attempt);
                        tracing::warn!(
                            "Network error for {} ({}), retrying in {} ms",
                            request.url,
                            e,
                            delay.as_millis()
                        );
                        sleep_or_cancel(delay, cancel).await?;
                        continue;
                    }
                    if timed_out {
                        return Err(KernelError::Timeout);
                    }
                    return Err(KernelError::PrimitiveFailure(format!(
                        "request to {} failed after {} attempts: {}",
                        request.url, attempt, e
                    )));
                }
            }
        }
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancelHandle) -> Result<(), KernelError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(KernelError::Cancelled),
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    if response.status().as_u16() != 429 {
        return None;
    }
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn finalize(
    response: reqwest::Response,
    attempts: u32,
    sink: Option<&mut (dyn OutputSink + 'static)>,
    cancel: &CancelHandle,
) -> Result<HttpResponse, KernelError> {
    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    match sink {
        Some(sink) => {
            let mut response = response;
            loop {
                let chunk = tokio::select! {
                    chunk = response.chunk() => chunk,
                    _ = cancel.cancelled() => return Err(KernelError::Cancelled),
                };
                match chunk {
                    Ok(Some(bytes)) => sink.write_chunk(&bytes).await.map_err(KernelError::Io)?,
                    Ok(None) => break,
                    Err(e) => {
                        return Err(KernelError::PrimitiveFailure(format!(
                            "body stream failed: {}",
                            e
                        )))
                    }
                }
            }
            Ok(HttpResponse {
                status,
                headers,
                body: Value::Null,
                attempts,
                truncated: false,
                streamed: true,
            })
        }
        None => {
            let mut body = Vec::new();
            let mut truncated = false;
            let mut response = response;
            loop {
                let chunk = tokio::select! {
                    chunk = response.chunk() => chunk,
                    _ = cancel.cancelled() => return Err(KernelError::Cancelled),
                };
                match chunk {
                    Ok(Some(bytes)) => {
                        let room = MAX_INLINE_BODY_BYTES.saturating_sub(body.len());
                        if bytes.len() > room {
                            truncated = true;
                        }
                        body.extend_from_slice(&bytes[..bytes.len().min(room)]);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        return Err(KernelError::PrimitiveFailure(format!(
                            "body read failed: {}",
                            e
                        )))
                    }
                }
            }

            let body = match serde_json::from_slice::<Value>(&body) {
                Ok(json) if !truncated => json,
                _ => Value::String(String::from_utf8_lossy(&body).into_owned()),
            };

            Ok(HttpResponse {
                status,
                headers,
                body,
                attempts,
                truncated,
                streamed: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::CollectSink;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: String) -> HttpRequest {
        let mut request = HttpRequest::new("GET", url);
        // Deterministic, fast retries for tests
        request.retry = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: false,
        };
        request
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"fine": true})))
            .mount(&server)
            .await;

        let response = HttpPrimitive::new()
            .request(
                &request(format!("{}/ok", server.uri())),
                None,
                &CancelHandle::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.attempts, 1);
        assert_eq!(response.body, json!({"fine": true}));
    }

    #[tokio::test]
    async fn test_retries_5xx_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let response = HttpPrimitive::new()
            .request(
                &request(format!("{}/flaky", server.uri())),
                None,
                &CancelHandle::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let response = HttpPrimitive::new()
            .request(
                &request(format!("{}/down", server.uri())),
                None,
                &CancelHandle::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.attempts, 3);
    }

    #[tokio::test]
    async fn test_plain_4xx_never_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = HttpPrimitive::new()
            .request(
                &request(format!("{}/missing", server.uri())),
                None,
                &CancelHandle::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.attempts, 1);
    }

    #[tokio::test]
    async fn test_429_is_retriable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let response = HttpPrimitive::new()
            .request(
                &request(format!("{}/limited", server.uri())),
                None,
                &CancelHandle::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.attempts, 2);
    }

    #[tokio::test]
    async fn test_post_with_body_query_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(query_param("tag", "latest"))
            .and(header("x-kiwi", "yes"))
            .and(body_json(json!({"file": "m.bin"})))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let mut req = request(format!("{}/upload", server.uri()));
        req.method = "POST".to_string();
        req.query.push(("tag".to_string(), "latest".to_string()));
        req.headers.insert("x-kiwi".to_string(), "yes".to_string());
        req.body = Some(json!({"file": "m.bin"}));

        let response = HttpPrimitive::new()
            .request(&req, None, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_streaming_to_sink() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blob"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let sink = CollectSink::new();
        let mut collector = sink.clone();
        let response = HttpPrimitive::new()
            .request(
                &request(format!("{}/blob", server.uri())),
                Some(&mut collector),
                &CancelHandle::new(),
            )
            .await
            .unwrap();
        assert!(response.streamed);
        assert_eq!(response.body, Value::Null);
        assert_eq!(sink.contents().len(), 4096);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let mut req = request(format!("{}/slow", server.uri()));
        req.timeout = Duration::from_millis(100);
        req.retry = RetryPolicy::none();

        let err = HttpPrimitive::new()
            .request(&req, None, &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Timeout));
    }

    #[tokio::test]
    async fn test_cancellation_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut req = request(format!("{}/slow", server.uri()));
        req.timeout = Duration::from_secs(60);
        let err = HttpPrimitive::new()
            .request(&req, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Cancelled));
    }

    #[test]
    fn test_backoff_growth_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        // Capped
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounded_by_backoff() {
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };
        for attempt in 1..5 {
            let unjittered = RetryPolicy {
                jitter: false,
                ..policy.clone()
            }
            .delay_for(attempt);
            assert!(policy.delay_for(attempt) <= unjittered);
        }
    }

    #[test]
    fn test_retriable_statuses() {
        assert!(RetryPolicy::is_retriable_status(429));
        assert!(RetryPolicy::is_retriable_status(500));
        assert!(RetryPolicy::is_retriable_status(503));
        assert!(!RetryPolicy::is_retriable_status(400));
        assert!(!RetryPolicy::is_retriable_status(404));
        assert!(!RetryPolicy::is_retriable_status(200));
    }
}
