//! Lifecycle management for the external HTTP META test harness

use crate::check::models::InternalProxy;
use crate::error::Error;
use crate::http::{HttpTransport, RequestOptions, RetryingHttpClient};
use crate::Result;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default harness listen address and warm-up budget
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9876;
const DEFAULT_PROTOCOL: &str = "http";
const DEFAULT_START_DELAY_MS: u64 = 3000;
const DEFAULT_PROXY_TIMEOUT_MS: u64 = 10_000;

/// Where the harness control API lives and how long to budget for it.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub authorization: String,
    /// Warm-up delay before probing; the harness needs it to bind all
    /// listening ports
    pub start_delay: Duration,
    /// Per-proxy share of the harness self-destruct timeout
    pub proxy_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            protocol: DEFAULT_PROTOCOL.to_string(),
            authorization: String::new(),
            start_delay: Duration::from_millis(DEFAULT_START_DELAY_MS),
            proxy_timeout: Duration::from_millis(DEFAULT_PROXY_TIMEOUT_MS),
        }
    }
}

impl HarnessConfig {
    pub fn api_base(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Timeout sent to the harness so it self-terminates even if stop is
    /// never called: warm-up plus one per-proxy budget per candidate.
    pub fn session_timeout(&self, proxy_count: usize) -> Duration {
        self.start_delay + self.proxy_timeout * proxy_count as u32
    }
}

/// A running harness instance: its process id and one listening port per
/// submitted proxy, positionally aligned with the submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSession {
    pub pid: i64,
    pub ports: Vec<u16>,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    proxies: Vec<&'a Map<String, Value>>,
    timeout: u64,
}

#[derive(Deserialize)]
struct StartResponse {
    pid: Option<i64>,
    ports: Option<Vec<u16>>,
}

#[derive(Serialize)]
struct StopRequest {
    pid: [i64; 1],
}

/// Client for the harness control API.
#[derive(Clone)]
pub struct HarnessClient {
    config: HarnessConfig,
    http: RetryingHttpClient,
}

impl HarnessClient {
    pub fn new(config: HarnessConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            http: RetryingHttpClient::new(transport),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn control_request(&self, path: &str, body: String) -> RequestOptions {
        RequestOptions::new(Method::POST, format!("{}{}", self.config.api_base(), path))
            .with_header("Content-Type", "application/json")
            .with_header("Authorization", self.config.authorization.clone())
            .with_body(body)
    }

    /// Start the harness over the given proxies. Fails the whole batch
    /// when the harness does not come back with a pid and a port per
    /// proxy.
    pub async fn start(&self, proxies: &[InternalProxy]) -> Result<HarnessSession> {
        let timeout = self.config.session_timeout(proxies.len());
        let body = serde_json::to_string(&StartRequest {
            proxies: proxies.iter().map(|p| &p.wire).collect(),
            timeout: timeout.as_millis() as u64,
        })
        .map_err(|e| Error::HarnessStartup(e.to_string()))?;

        // no retry: a failed start is fatal and retrying could leak a
        // half-started harness process
        let response = self
            .http
            .request(&self.control_request("/start", body).with_retries(0))
            .await
            .map_err(|e| Error::HarnessStartup(e.to_string()))?;

        let parsed: StartResponse = serde_json::from_str(&response.body)
            .map_err(|_| Error::HarnessStartup(response.body.clone()))?;
        let (pid, ports) = match (parsed.pid, parsed.ports) {
            (Some(pid), Some(ports)) => (pid, ports),
            _ => return Err(Error::HarnessStartup(response.body)),
        };
        if ports.len() != proxies.len() {
            return Err(Error::HarnessStartup(format!(
                "expected {} ports, harness returned {}",
                proxies.len(),
                ports.len()
            )));
        }

        info!(pid, ports = ports.len(), "harness started");
        Ok(HarnessSession { pid, ports })
    }

    /// Wait out the warm-up delay so the harness can bind its ports.
    pub async fn warm_up(&self) {
        info!(
            "waiting {:.1}s for the harness to warm up",
            self.config.start_delay.as_secs_f64()
        );
        tokio::time::sleep(self.config.start_delay).await;
    }

    /// Best-effort shutdown. Probe results are final by the time this
    /// runs and the harness self-terminates on its own timeout, so a
    /// failure here is only logged.
    pub async fn stop(&self, session: &HarnessSession) {
        let body = StopRequest {
            pid: [session.pid],
        };
        let body = match serde_json::to_string(&body) {
            Ok(body) => body,
            Err(err) => {
                warn!(pid = session.pid, "could not encode stop request: {err}");
                return;
            }
        };
        match self
            .http
            .request(&self.control_request("/stop", body))
            .await
        {
            Ok(response) => info!(pid = session.pid, status = response.status, "harness stopped"),
            Err(err) => warn!(pid = session.pid, "harness stop failed: {err}"),
        }
    }
}
