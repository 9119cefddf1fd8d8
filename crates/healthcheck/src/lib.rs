//! Health probing and heartbeat monitoring for Switchboard.
//!
//! This crate answers one question about a registered service: does it answer
//! its health endpoint with a 2xx within the timeout? It provides:
//! - [`HttpChecker`], a single HTTP GET probe with host resolution rules
//!   (loopback, container DNS, declared host)
//! - [`HeartbeatMonitor`], periodic probes per service that report the first
//!   failure over a channel and then stop
//!
//! # Example
//!
//! ```no_run
//! use healthcheck::{HealthCheckConfig, HeartbeatMonitor, HttpChecker, ProbeTarget};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let checker = Arc::new(HttpChecker::new(&HealthCheckConfig::default())?);
//! let (monitor, mut failures) = HeartbeatMonitor::new(checker, Duration::from_secs(30), 64);
//!
//! monitor.arm(
//!     "posts",
//!     ProbeTarget {
//!         service: "posts".to_string(),
//!         host: "localhost".to_string(),
//!         port: 4000,
//!         path: "/posts/v1/health".to_string(),
//!     },
//! );
//!
//! if let Some(failure) = failures.recv().await {
//!     println!("{} failed: {:?}", failure.name, failure.result.cause());
//! }
//! # Ok(())
//! # }
//! ```

pub mod checkers;
pub mod monitor;
pub mod types;

pub use checkers::{HealthChecker, HttpChecker, is_connection_refused};
pub use monitor::{HeartbeatFailure, HeartbeatMonitor};
pub use types::{
    HealthCheckConfig, HealthCheckResult, HealthStatus, HostResolution, ProbeTarget,
};
