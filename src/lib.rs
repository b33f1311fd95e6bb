//! Meta Check - Batch Proxy Availability Checker
//!
//! Verifies which proxies in a batch are currently reachable and fast
//! enough. Candidates are compiled to the wire format of an external
//! HTTP META test harness, probed concurrently through their assigned
//! local ports, and admitted by a combined latency and status rule.

pub mod cache;
pub mod check;
pub mod error;
pub mod harness;
pub mod http;
pub mod notify;
pub mod scheduler;

pub use cache::{CacheEntry, MemoryCache, ProbeCache};
pub use check::*;
pub use error::Error;
pub use harness::{HarnessClient, HarnessConfig, HarnessSession};
pub use http::{HttpResponse, HttpTransport, ReqwestTransport, RequestOptions, RetryingHttpClient};
pub use notify::TelegramNotifier;

/// Library result type
pub type Result<T> = std::result::Result<T, Error>;
