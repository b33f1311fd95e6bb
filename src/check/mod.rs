//! Batch availability checking
//!
//! This module provides functionality for:
//! - Compiling proxy descriptors to the harness wire format
//! - Probing each proxy through its assigned harness port
//! - Admitting proxies by latency and status, with result caching

pub mod compiler;
pub mod engine;
pub mod models;

pub use compiler::{ClashCompiler, ProxyCompiler};
pub use engine::{AvailabilityChecker, CheckerConfig};
pub use models::{BatchOutcome, CheckReport, InternalProxy, ProbeOutcome, ProxyDescriptor};
