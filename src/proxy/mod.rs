//! Core HTTP reverse-proxy handling.
//!
//! [`ProxyRouter`] owns the immutable route table and the pooled
//! upstream client. For each request it matches a route
//! ([`routing`]), rewrites the path ([`rewrite`]), builds the outbound
//! headers ([`headers`]) and performs a single upstream exchange whose
//! body is streamed back to the client ([`forward`]). Per-request
//! failures become status codes here and never leave the request's
//! task. [`forward_handler`] is the Axum fallback that hands every
//! request to the router held in [`AppState`](crate::server::AppState).

pub mod forward;
pub mod headers;
pub mod inflight;
pub mod rewrite;
pub mod routing;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;

use crate::config::model::Defaults;
use crate::error::ProxyError;
use crate::server::{AppState, HttpClient};
use forward::RelayBody;
use headers::CORRELATION_ID;
use inflight::InFlight;
use routing::{Route, RouteTable};

#[derive(Debug)]
pub struct Stats {
    pub forwarded: AtomicU64,
    pub failed: AtomicU64,
    pub not_found: AtomicU64,
    pub cancelled: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            forwarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }
}

pub struct ProxyRouter {
    table: RouteTable,
    defaults: Defaults,
    client: HttpClient,
    stats: Arc<Stats>,
}

impl ProxyRouter {
    #[must_use]
    pub fn new(table: RouteTable, defaults: Defaults, client: HttpClient) -> Self {
        Self {
            table,
            defaults,
            client,
            stats: Arc::new(Stats::new()),
        }
    }

    #[must_use]
    pub const fn table(&self) -> &RouteTable {
        &self.table
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Longest-prefix route for `path`.
    #[must_use]
    pub fn match_route(&self, path: &str) -> Option<&Route> {
        self.table.match_route(path)
    }

    /// One attempt against the route's upstream. The returned body has
    /// not been read yet.
    pub async fn forward(
        &self,
        request: Request<Body>,
        route: &Route,
    ) -> Result<hyper::Response<Incoming>, ProxyError> {
        forward::send(&self.client, request, route.authority(), route.timeout()).await
    }

    pub async fn handle(&self, request: Request<Body>, client_addr: SocketAddr) -> Response {
        let correlation_id = request
            .headers()
            .get(CORRELATION_ID)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);
        let path = request.uri().path().to_string();

        let Some(route) = self.match_route(&path) else {
            tracing::warn!(
                correlation_id = %correlation_id,
                method = %request.method(),
                path = %path,
                "no route matched"
            );
            self.stats.not_found.fetch_add(1, Ordering::Relaxed);
            return error_response(&ProxyError::RouteNotFound { path }, &correlation_id);
        };

        let rewritten = route.rewrite(&path);
        let (parts, body) = request.into_parts();

        let mut flight = InFlight::new(
            correlation_id.clone(),
            parts.method.clone(),
            path,
            rewritten,
            client_addr,
            route.authority().to_string(),
            Arc::clone(&self.stats),
        );

        tracing::debug!(
            correlation_id = %correlation_id,
            method = %flight.method,
            path = %flight.original_path,
            rewritten = %flight.rewritten_path,
            prefix = %route.prefix(),
            upstream = %route.upstream(),
            "route matched"
        );

        let uri = match route.upstream_uri(&flight.rewritten_path, parts.uri.query()) {
            Ok(uri) => uri,
            Err(e) => {
                let err = ProxyError::InvalidRequest(e.to_string());
                flight.fail(&err);
                return error_response(&err, &correlation_id);
            }
        };

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = headers::build_forwarded_headers(
            &parts.headers,
            &client_addr.ip().to_string(),
            route,
            &self.defaults,
            &correlation_id,
        );

        match self.forward(outbound, route).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                if self.defaults.strip_hop_by_hop {
                    headers::strip_hop_by_hop(&mut parts.headers);
                }
                if let Ok(val) = HeaderValue::from_str(&correlation_id) {
                    parts.headers.insert(CORRELATION_ID, val);
                }
                flight.responded(parts.status);
                Response::from_parts(parts, Body::new(RelayBody::new(body, flight)))
            }
            Err(err) => {
                flight.fail(&err);
                error_response(&err, &correlation_id)
            }
        }
    }
}

fn error_response(err: &ProxyError, correlation_id: &str) -> Response {
    let status = err.status();
    let mut response = (status, status.canonical_reason().unwrap_or("error")).into_response();
    if let Ok(val) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_ID, val);
    }
    response
}

pub async fn forward_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    state.router.handle(request, addr).await
}
