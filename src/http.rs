//! HTTP client with per-call retry and linear backoff

use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, Method, Proxy as ReqwestProxy};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default number of retries after a failed attempt
const DEFAULT_RETRIES: u32 = 1;

/// Default base delay between retries in milliseconds
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Options for a single HTTP request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt; 0 means at most one attempt
    pub retries: u32,
    /// Base backoff delay; the wait before retry k is `retry_delay * k`
    pub retry_delay: Duration,
    /// Outbound proxy URL to route this request through
    pub proxy: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            url: String::new(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            proxy: None,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// A completed HTTP exchange. The status is reported as-is; admission
/// decisions belong to the caller.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Transport seam. Production uses [`ReqwestTransport`]; tests inject a
/// scripted implementation.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, options: &RequestOptions) -> Result<HttpResponse>;
}

/// reqwest-backed transport. A fresh client is built for proxied
/// requests since the outbound proxy is client-level configuration.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, options: &RequestOptions) -> Result<HttpResponse> {
        let client = match &options.proxy {
            Some(proxy_url) => Client::builder()
                .proxy(ReqwestProxy::all(proxy_url)?)
                .build()?,
            None => self.client.clone(),
        };

        let mut request = client
            .request(options.method.clone(), &options.url)
            .timeout(options.timeout);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// HTTP client wrapping a transport with bounded retry.
#[derive(Clone)]
pub struct RetryingHttpClient {
    transport: Arc<dyn HttpTransport>,
}

impl RetryingHttpClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Issue the request, retrying failed attempts with linearly
    /// increasing backoff. With `retries = N` and delay `D`, a
    /// persistently failing request makes N+1 attempts and waits `D * k`
    /// before retry k.
    pub async fn request(&self, options: &RequestOptions) -> Result<HttpResponse> {
        let mut attempt: u32 = 0;
        loop {
            match self.transport.send(options).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if attempt >= options.retries {
                        return Err(err);
                    }
                    attempt += 1;
                    debug!(url = %options.url, attempt, "request failed, retrying: {err}");
                    tokio::time::sleep(options.retry_delay * attempt).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Transport that always fails, recording each attempt.
    struct FailingTransport {
        attempts: AtomicU32,
    }

    impl FailingTransport {
        fn new() -> Self {
            Self {
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for FailingTransport {
        async fn send(&self, _options: &RequestOptions) -> Result<HttpResponse> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Transport("connection refused".to_string()))
        }
    }

    /// Transport that fails a fixed number of times, then succeeds.
    struct FlakyTransport {
        failures: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl HttpTransport for FlakyTransport {
        async fn send(&self, _options: &RequestOptions) -> Result<HttpResponse> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(Error::Transport("reset by peer".to_string()))
            } else {
                Ok(HttpResponse {
                    status: 200,
                    body: String::new(),
                })
            }
        }
    }

    #[tokio::test]
    async fn zero_retries_makes_exactly_one_attempt() {
        let transport = Arc::new(FailingTransport::new());
        let client = RetryingHttpClient::new(transport.clone());
        let options = RequestOptions::new(Method::GET, "http://unreachable.invalid/").with_retries(0);

        let result = client.request(&options).await;
        assert!(result.is_err());
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_makes_n_plus_one_attempts_with_linear_backoff() {
        let transport = Arc::new(FailingTransport::new());
        let client = RetryingHttpClient::new(transport.clone());
        let options = RequestOptions::new(Method::GET, "http://unreachable.invalid/")
            .with_retries(3)
            .with_retry_delay(Duration::from_millis(100));

        let started = Instant::now();
        let result = client.request(&options).await;
        assert!(result.is_err());
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
        // waits of 100, 200 and 300 ms between the four attempts
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let transport = Arc::new(FlakyTransport {
            failures: 2,
            attempts: AtomicU32::new(0),
        });
        let client = RetryingHttpClient::new(transport.clone());
        let options = RequestOptions::new(Method::GET, "http://flaky.invalid/")
            .with_retries(2)
            .with_retry_delay(Duration::from_millis(50));

        let response = client.request(&options).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }
}
