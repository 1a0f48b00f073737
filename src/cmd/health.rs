//! `waypoint health`: check the health of a running instance.
//!
//! Sends a `GET` to the instance's health path and displays the
//! response as formatted text or raw JSON.

use axum::body::Body;
use http_body_util::BodyExt;

use crate::cli::HealthArgs;
use crate::error::WaypointError;
use crate::health::HealthResponse;
use crate::server::build_http_client;

pub async fn execute(args: HealthArgs) -> Result<(), WaypointError> {
    let url = format!(
        "{}/{}",
        args.url.trim_end_matches('/'),
        args.path.trim_start_matches('/')
    );
    let uri: hyper::Uri =
        url.parse().map_err(
            |e: hyper::http::uri::InvalidUri| WaypointError::UriParse {
                source: Box::new(e),
            },
        )?;

    let client = build_http_client(std::time::Duration::from_secs(5));

    let req = hyper::Request::builder()
        .uri(uri)
        .body(Body::empty())
        .map_err(|e| WaypointError::HttpRequest {
            source: Box::new(e),
        })?;

    let response = tokio::time::timeout(std::time::Duration::from_secs(10), client.request(req))
        .await
        .map_err(|_| WaypointError::HttpRequest {
            source: "health check timed out after 10s".into(),
        })?
        .map_err(|e| WaypointError::HttpRequest {
            source: Box::new(e),
        })?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| WaypointError::HttpRequest {
            source: Box::new(e),
        })?
        .to_bytes();

    if !status.is_success() {
        return Err(WaypointError::HealthCheckFailed(status));
    }

    if args.json {
        println!("{}", String::from_utf8_lossy(&body));
        return Ok(());
    }

    match serde_json::from_slice::<HealthResponse>(&body) {
        Ok(health) => {
            let uptime = format_uptime(health.uptime_seconds);
            println!("\u{2713} waypoint is healthy ({})", args.url);
            println!("  version:        {} ({})", health.version, health.build.git);
            println!("  uptime:         {uptime}");
            println!("  config source:  {}", health.config.source);
            println!(
                "  config version: {} (loaded {}s ago)",
                health.config.version, health.config.loaded_ago_seconds
            );
            println!("  routes:         {}", health.config.routes);
            println!(
                "  requests:       {} forwarded, {} failed, {} unrouted, {} cancelled",
                health.stats.requests_forwarded,
                health.stats.requests_failed,
                health.stats.requests_unrouted,
                health.stats.requests_cancelled
            );
        }
        Err(e) => {
            eprintln!("Failed to parse health response: {e}");
            println!("{}", String::from_utf8_lossy(&body));
        }
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
