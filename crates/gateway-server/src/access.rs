//! Access control for the registry surface.
//!
//! Two checks, in order: the caller must come from an internal address, then
//! it must present the shared registry key in `x-registry-key`.

use crate::error::ApiError;
use crate::metrics::MetricsRegistry;
use crate::types::FailPolicy;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use common::{Error, Result};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const REGISTRY_KEY_HEADER: &str = "x-registry-key";

/// Effective client address.
///
/// With `trust_forwarded` set, the first `x-forwarded-for` entry wins, then
/// `x-real-ip`, then the socket peer. A forwarding header that is present but
/// unparseable yields `None`.
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trust_forwarded: bool,
) -> Option<IpAddr> {
    if trust_forwarded {
        if let Some(forwarded_for) = headers.get("x-forwarded-for") {
            // "client, proxy1, proxy2"
            let first = forwarded_for
                .to_str()
                .ok()
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .unwrap_or("");
            return first.parse::<IpAddr>().ok().map(|ip| ip.to_canonical());
        }

        if let Some(real_ip) = headers.get("x-real-ip") {
            return real_ip
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<IpAddr>().ok())
                .map(|ip| ip.to_canonical());
        }
    }

    peer.map(|ip| ip.to_canonical())
}

/// Loopback, RFC 1918, link-local, IPv6 loopback, unique-local or
/// IPv6 link-local.
pub fn is_internal(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

// Non-inline so the optimizer cannot short-circuit the fold.
#[inline(never)]
fn constant_time_ne(a: &[u8], b: &[u8]) -> u8 {
    let len = a.len().min(b.len());
    let a = &a[..len];
    let b = &b[..len];

    let mut diff = 0u8;
    for i in 0..len {
        diff |= a[i] ^ b[i];
    }
    diff // compared with 0 by the caller
}

/// Compares byte strings in constant time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && constant_time_ne(a, b) == 0
}

/// Gate in front of every registry endpoint.
pub struct RegistryGuard {
    key: Option<String>,
    when_unconfigured: FailPolicy,
    trust_forwarded_headers: bool,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl RegistryGuard {
    pub fn new(
        key: Option<String>,
        when_unconfigured: FailPolicy,
        trust_forwarded_headers: bool,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
            when_unconfigured,
            trust_forwarded_headers,
            metrics,
        }
    }

    /// Decide whether a request may reach the registry.
    pub fn check(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Result<()> {
        let client = client_address(headers, peer, self.trust_forwarded_headers);

        if !client.is_some_and(is_internal) {
            warn!(client = ?client, "Registry access denied for external address");
            self.record_denial("forbidden");
            return Err(Error::forbidden(
                "Registry access is restricted to internal network",
            ));
        }

        let Some(expected) = self.key.as_deref() else {
            return match self.when_unconfigured {
                FailPolicy::FailClosed => {
                    error!("Registry key is not configured; rejecting registry request");
                    self.record_denial("misconfigured");
                    Err(Error::misconfiguration(
                        "Registry authentication not configured",
                    ))
                }
                FailPolicy::FailOpen => {
                    warn!(client = ?client, "Registry key is not configured; allowing request");
                    Ok(())
                }
            };
        };

        let presented = headers
            .get(REGISTRY_KEY_HEADER)
            .map(|value| value.as_bytes())
            .unwrap_or_default();

        if presented.is_empty() || !constant_time_eq(presented, expected.as_bytes()) {
            warn!(client = ?client, "Invalid registry key");
            self.record_denial("unauthorized");
            return Err(Error::unauthorized("Invalid registry key"));
        }

        debug!(client = ?client, "Registry access granted");
        Ok(())
    }

    fn record_denial(&self, reason: &str) {
        if let Some(ref m) = self.metrics {
            m.record_access_denial(reason);
        }
    }
}

/// Middleware applying [`RegistryGuard`] to every registry route.
pub async fn registry_guard(
    State(guard): State<Arc<RegistryGuard>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    guard.check(request.headers(), peer)?;
    Ok(next.run(request).await)
}
