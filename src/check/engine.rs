//! Probe and admission engine plus batch orchestration

use crate::cache::{CacheEntry, MemoryCache, ProbeCache};
use crate::check::compiler::{ClashCompiler, ProxyCompiler};
use crate::check::models::{
    BatchOutcome, CheckReport, InternalProxy, ProbeOutcome, ProxyDescriptor,
};
use crate::harness::{HarnessClient, HarnessConfig};
use crate::http::{HttpTransport, RequestOptions, ReqwestTransport, RetryingHttpClient};
use crate::notify::TelegramNotifier;
use crate::scheduler;
use crate::Result;
use reqwest::Method;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Proxies slower than this are rejected no matter what they answer
const LATENCY_THRESHOLD_MS: u64 = 1000;

/// Default probe target, a lightweight always-200 page
const DEFAULT_PROBE_URL: &str = "http://www.apple.com/library/test/success.html";

/// Default number of probes in flight at once
const DEFAULT_CONCURRENCY: usize = 10;

/// Default expected probe status
const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Default per-probe timeout in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 5000;

const USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5.2 Mobile/15E148 Safari/604.1";

/// Both halves of the admission rule must hold: the answer arrived under
/// the latency ceiling and with the expected status.
fn admissible(latency_ms: u64, status: u16, expected_status: u16) -> bool {
    latency_ms <= LATENCY_THRESHOLD_MS && status == expected_status
}

/// Configuration for a probing batch.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// URL probed through each candidate proxy
    pub probe_url: String,
    pub method: Method,
    pub expected_status: u16,
    /// Per-attempt probe timeout
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub concurrency: usize,
    pub cache_enabled: bool,
    /// Pass descriptors that cannot be compiled through untested instead
    /// of dropping them
    pub keep_incompatible: bool,
    /// Prefix surviving proxy names with the measured latency
    pub show_latency: bool,
    /// Label used in failure notifications
    pub batch_name: Option<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            probe_url: DEFAULT_PROBE_URL.to_string(),
            method: Method::HEAD,
            expected_status: DEFAULT_EXPECTED_STATUS,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: 1,
            retry_delay: Duration::from_millis(1000),
            concurrency: DEFAULT_CONCURRENCY,
            cache_enabled: false,
            keep_incompatible: false,
            show_latency: false,
            batch_name: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = url.into();
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
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

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_keep_incompatible(mut self, keep: bool) -> Self {
        self.keep_incompatible = keep;
        self
    }

    pub fn with_show_latency(mut self, show: bool) -> Self {
        self.show_latency = show;
        self
    }

    pub fn with_batch_name(mut self, name: impl Into<String>) -> Self {
        self.batch_name = Some(name.into());
        self
    }
}

/// Batch availability checker around an external test harness.
///
/// Transport, cache, compiler and notifier are all injectable; the
/// defaults are a reqwest transport, an in-memory cache, the ClashMeta
/// compiler and no notifier.
pub struct AvailabilityChecker {
    config: CheckerConfig,
    http: RetryingHttpClient,
    harness: HarnessClient,
    cache: Arc<dyn ProbeCache>,
    compiler: Arc<dyn ProxyCompiler>,
    notifier: Option<TelegramNotifier>,
}

impl AvailabilityChecker {
    pub fn new(config: CheckerConfig, harness_config: HarnessConfig) -> Self {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new());
        Self {
            config,
            http: RetryingHttpClient::new(transport.clone()),
            harness: HarnessClient::new(harness_config, transport),
            cache: Arc::new(MemoryCache::new()),
            compiler: Arc::new(ClashCompiler::new()),
            notifier: None,
        }
    }

    /// Swap the HTTP transport. Call before `with_notifier` so the
    /// notifier can share it.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = RetryingHttpClient::new(transport.clone());
        self.harness = HarnessClient::new(self.harness.config().clone(), transport);
        self
    }

    pub fn with_cache_store(mut self, cache: Arc<dyn ProbeCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn ProxyCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_notifier(mut self, notifier: TelegramNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Check the batch and return the caller-facing survivor list.
    pub async fn check(&self, proxies: Vec<ProxyDescriptor>) -> Result<Vec<ProxyDescriptor>> {
        let outcome = self.check_batch(proxies).await?;
        Ok(outcome.into_output(self.config.keep_incompatible))
    }

    /// Check the batch, keeping the per-bucket breakdown.
    ///
    /// Only a harness startup failure aborts; every per-proxy problem is
    /// absorbed into the failed or incompatible bucket.
    pub async fn check_batch(&self, proxies: Vec<ProxyDescriptor>) -> Result<BatchOutcome> {
        let mut incompatible = Vec::new();
        let mut internal = Vec::new();
        for (index, descriptor) in proxies.iter().enumerate() {
            match self.compiler.compile(descriptor) {
                Ok(mut wire) => {
                    for (key, value) in descriptor.internal_fields() {
                        wire.insert(key.clone(), value.clone());
                    }
                    internal.push(InternalProxy { wire, index });
                }
                Err(err) => {
                    warn!("{err}");
                    if self.config.keep_incompatible {
                        incompatible.push(descriptor.clone());
                    }
                }
            }
        }

        info!(
            "harness-compatible proxies: {}/{}",
            internal.len(),
            proxies.len()
        );
        if internal.is_empty() {
            return Ok(BatchOutcome::Untested(proxies));
        }

        let session = self.harness.start(&internal).await?;
        self.harness.warm_up().await;

        let tasks: Vec<_> = internal
            .iter()
            .zip(session.ports.iter().copied())
            .map(|(proxy, port)| self.probe(proxy, port))
            .collect();
        let outcomes = scheduler::run_all(tasks, self.config.concurrency).await;

        self.harness.stop(&session).await;

        let mut report = CheckReport {
            incompatible,
            ..CheckReport::default()
        };
        for (index, outcome) in outcomes {
            let mut descriptor = proxies[index].clone();
            match outcome {
                ProbeOutcome::Valid { latency_ms } => {
                    if self.config.show_latency {
                        let annotated = format!("[{latency_ms}ms] {}", descriptor.name());
                        descriptor.set_name(annotated);
                    }
                    report.valid.push(descriptor);
                }
                ProbeOutcome::Failed => report.failed.push(descriptor),
            }
        }

        if let Some(notifier) = &self.notifier {
            notifier
                .notify_failures(self.config.batch_name.as_deref(), &report.failed)
                .await;
        }

        Ok(BatchOutcome::Tested(report))
    }

    /// One proxy through the state machine:
    /// Pending -> (CacheHit | Probing) -> (Valid | Failed).
    async fn probe(&self, proxy: &InternalProxy, port: u16) -> (usize, ProbeOutcome) {
        let key = self.config.cache_enabled.then(|| {
            proxy.fingerprint(
                &self.config.probe_url,
                self.config.method.as_str(),
                self.config.expected_status,
            )
        });

        if let Some(key) = &key {
            if let Some(entry) = self.cache.get(key) {
                debug!(proxy = proxy.name(), "using cached result");
                let outcome = match entry.latency {
                    Some(latency) if latency <= LATENCY_THRESHOLD_MS => ProbeOutcome::Valid {
                        latency_ms: latency,
                    },
                    _ => ProbeOutcome::Failed,
                };
                return (proxy.index, outcome);
            }
        }

        let options = RequestOptions::new(self.config.method.clone(), self.config.probe_url.clone())
            .with_header("User-Agent", USER_AGENT)
            .with_timeout(self.config.timeout)
            .with_retries(self.config.retries)
            .with_retry_delay(self.config.retry_delay)
            .with_proxy(format!("http://{}:{port}", self.harness.config().host));

        let started = Instant::now();
        let outcome = match self.http.request(&options).await {
            Ok(response) => {
                let latency = started.elapsed().as_millis() as u64;
                info!(
                    proxy = proxy.name(),
                    status = response.status,
                    latency,
                    "probe finished"
                );
                if admissible(latency, response.status, self.config.expected_status) {
                    if let Some(key) = &key {
                        self.cache.set(key, CacheEntry::admitted(latency));
                    }
                    ProbeOutcome::Valid {
                        latency_ms: latency,
                    }
                } else {
                    if let Some(key) = &key {
                        self.cache.set(key, CacheEntry::rejected());
                    }
                    ProbeOutcome::Failed
                }
            }
            Err(err) => {
                warn!(proxy = proxy.name(), "probe failed: {err}");
                if let Some(key) = &key {
                    self.cache.set(key, CacheEntry::rejected());
                }
                ProbeOutcome::Failed
            }
        };
        (proxy.index, outcome)
    }
}
