//! Header construction, forwarding, and hop-by-hop stripping.
//!
//! [`build_forwarded_headers`] clones the client's headers, strips
//! hop-by-hop headers, replaces `Host` with the upstream authority when
//! the route asks for `change_origin`, and adds proxy metadata
//! (`X-Forwarded-*`, `X-Real-IP`, `Via`, `X-Correlation-Id`).

use std::sync::LazyLock;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use super::routing::Route;
use crate::config::model::Defaults;

pub const CORRELATION_ID: &str = "x-correlation-id";

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "proxy-connection",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

/// Remove hop-by-hop headers, including any listed in `Connection`.
///
/// `content-length` is kept: bodies are streamed, so the origin's
/// length is still accurate.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

pub fn build_forwarded_headers(
    original: &HeaderMap,
    client_ip: &str,
    route: &Route,
    defaults: &Defaults,
    correlation_id: &str,
) -> HeaderMap {
    let mut headers = original.clone();

    if defaults.strip_hop_by_hop {
        strip_hop_by_hop(&mut headers);
    }

    if route.change_origin() {
        if let Ok(val) = HeaderValue::from_str(route.authority()) {
            headers.insert(header::HOST, val);
        }
    }

    if defaults.proxy_headers {
        // X-Forwarded-For: append to chain
        let xff = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map_or_else(
                || client_ip.to_string(),
                |existing| format!("{existing}, {client_ip}"),
            );
        if let Ok(val) = HeaderValue::from_str(&xff) {
            headers.insert("x-forwarded-for", val);
        }

        let real_ip = xff.split(',').next().unwrap_or(client_ip).trim();
        if let Ok(val) = HeaderValue::from_str(real_ip) {
            headers.insert("x-real-ip", val);
        }

        // The listener only speaks plain HTTP; keep whatever an outer proxy said.
        if !headers.contains_key("x-forwarded-proto") {
            headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        }

        // Original Host the client targeted
        if let Some(original_host) = original.get(header::HOST) {
            if !headers.contains_key("x-forwarded-host") {
                headers.insert("x-forwarded-host", original_host.clone());
            }
        }

        headers.append(header::VIA, HeaderValue::from_static("1.1 waypoint"));
    }

    if let Ok(val) = HeaderValue::from_str(correlation_id) {
        headers.insert(CORRELATION_ID, val);
    }

    headers
}
