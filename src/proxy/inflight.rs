//! Per-request bookkeeping.
//!
//! An [`InFlight`] record is created once a request has matched a
//! route and lives until the response body is fully relayed or the
//! exchange fails. It owns the request's access log line: whichever of
//! [`InFlight::complete`], [`InFlight::fail`] or `Drop` runs first
//! writes it. Reaching `Drop` with nothing recorded means the client
//! connection went away and the upstream exchange was cancelled.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::http::{Method, StatusCode};

use super::Stats;
use crate::error::ProxyError;

#[derive(Debug)]
pub struct InFlight {
    pub correlation_id: String,
    pub method: Method,
    pub original_path: String,
    pub rewritten_path: String,
    pub client_addr: SocketAddr,
    pub upstream: String,
    pub started: Instant,
    status: Option<StatusCode>,
    relayed_bytes: u64,
    settled: bool,
    stats: Arc<Stats>,
}

impl InFlight {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        correlation_id: String,
        method: Method,
        original_path: String,
        rewritten_path: String,
        client_addr: SocketAddr,
        upstream: String,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            correlation_id,
            method,
            original_path,
            rewritten_path,
            client_addr,
            upstream,
            started: Instant::now(),
            status: None,
            relayed_bytes: 0,
            settled: false,
            stats,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn latency_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Upstream answered; the body is about to be streamed.
    pub fn responded(&mut self, status: StatusCode) {
        self.status = Some(status);
        tracing::debug!(
            correlation_id = %self.correlation_id,
            upstream = %self.upstream,
            status = status.as_u16(),
            latency_ms = self.latency_ms(),
            "upstream responded"
        );
    }

    pub fn record_bytes(&mut self, n: usize) {
        self.relayed_bytes += n as u64;
    }

    pub fn complete(&mut self) {
        if std::mem::replace(&mut self.settled, true) {
            return;
        }
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            correlation_id = %self.correlation_id,
            method = %self.method,
            path = %self.original_path,
            rewritten = %self.rewritten_path,
            upstream = %self.upstream,
            status = self.status.map_or(0, |s| s.as_u16()),
            bytes = self.relayed_bytes,
            latency_ms = self.latency_ms(),
            "request completed"
        );
    }

    pub fn fail(&mut self, err: &ProxyError) {
        if std::mem::replace(&mut self.settled, true) {
            return;
        }
        if matches!(err, ProxyError::ClientDisconnected) {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                correlation_id = %self.correlation_id,
                method = %self.method,
                path = %self.original_path,
                upstream = %self.upstream,
                bytes = self.relayed_bytes,
                latency_ms = self.latency_ms(),
                "client disconnected, upstream exchange cancelled"
            );
            return;
        }
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            correlation_id = %self.correlation_id,
            method = %self.method,
            path = %self.original_path,
            rewritten = %self.rewritten_path,
            upstream = %self.upstream,
            client = %self.client_addr,
            status = err.status().as_u16(),
            latency_ms = self.latency_ms(),
            error = %err,
            raw = ?err,
            "request failed"
        );
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.settled {
            self.fail(&ProxyError::ClientDisconnected);
        }
    }
}
