//! End-to-end tests: a real proxy listener in front of real upstreams.
//!
//! Well-behaved upstreams are small Axum apps; misbehaving ones (stalled,
//! malformed, streaming) are raw `TcpListener`s so the wire is under the
//! test's control.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use waypoint::config::model::{Config, Defaults, HealthConfig, RewriteRules, RouteConfig};
use waypoint::config::ConfigVersion;
use waypoint::health::HealthResponse;
use waypoint::server::{self, AppState};

fn route(prefix: &str, upstream: &str, rules: &[(&str, &str)], change_origin: bool) -> RouteConfig {
    RouteConfig {
        prefix: prefix.into(),
        upstream: upstream.into(),
        path_rewrite: rules.iter().copied().collect::<RewriteRules>(),
        change_origin,
        timeout: None,
    }
}

fn config(routes: Vec<RouteConfig>) -> Config {
    Config {
        defaults: Defaults {
            connect_timeout: 1_000,
            timeout: 5_000,
            ..Defaults::default()
        },
        health: HealthConfig::default(),
        routes,
    }
}

struct TestProxy {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: oneshot::Sender<()>,
}

impl TestProxy {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

async fn start_proxy(config: Config) -> TestProxy {
    let state = Arc::new(
        AppState::from_config(&config, ConfigVersion::Hash("test-hash-0123".into()), "test")
            .unwrap(),
    );
    let router = server::build_router(Arc::clone(&state), 1_048_576);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .unwrap();
    });

    TestProxy {
        addr,
        state,
        shutdown: shutdown_tx,
    }
}

/// Upstream that answers every request with what it received.
async fn start_echo_upstream() -> SocketAddr {
    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(String::from);
        Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "host": header("host"),
            "x_forwarded_for": header("x-forwarded-for"),
            "x_forwarded_host": header("x-forwarded-host"),
            "correlation_id": header("x-correlation-id"),
            "body_len": body.len(),
        }))
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().fallback(echo)).await.unwrap();
    });
    addr
}

async fn read_request_head(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return;
        }
    }
}

/// Raw upstream that counts accepted connections and hands each socket to `serve`.
async fn start_raw_upstream<F, Fut>(serve: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(stream));
        }
    });
    (addr, accepted)
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn forwards_rewritten_path_with_upstream_host() {
    let upstream = start_echo_upstream().await;
    let proxy = start_proxy(config(vec![route(
        "/api",
        &format!("http://{upstream}/"),
        &[("^/api/", "")],
        true,
    )]))
    .await;

    let resp = reqwest::get(proxy.url("/api/users?page=2")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let correlation = resp
        .headers()
        .get("x-correlation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let echoed: Value = resp.json().await.unwrap();
    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["path"], "/users");
    assert_eq!(echoed["query"], "page=2");
    assert_eq!(echoed["host"], upstream.to_string());
    assert_eq!(echoed["x_forwarded_host"], proxy.addr.to_string());
    assert_eq!(echoed["x_forwarded_for"], "127.0.0.1");
    assert_eq!(echoed["correlation_id"], correlation);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn round_trip_preserves_path_and_host() {
    let upstream = start_echo_upstream().await;
    let proxy = start_proxy(config(vec![route(
        "/api",
        &format!("http://{upstream}"),
        &[],
        false,
    )]))
    .await;

    for path in ["/api", "/api/users/", "/api/a/b/c"] {
        let echoed: Value = reqwest::get(proxy.url(path))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(echoed["path"], path);
        assert_eq!(echoed["host"], proxy.addr.to_string());
    }

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn longest_prefix_routes_to_its_own_upstream() {
    let api = start_echo_upstream().await;
    let admin = start_echo_upstream().await;
    let proxy = start_proxy(config(vec![
        route("/api", &format!("http://{api}"), &[], true),
        route("/api/admin", &format!("http://{admin}"), &[], true),
    ]))
    .await;

    let echoed: Value = reqwest::get(proxy.url("/api/admin/users"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["host"], admin.to_string());

    let echoed: Value = reqwest::get(proxy.url("/api/users"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["host"], api.to_string());

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn request_body_reaches_upstream() {
    let upstream = start_echo_upstream().await;
    let proxy = start_proxy(config(vec![route(
        "/upload",
        &format!("http://{upstream}"),
        &[],
        false,
    )]))
    .await;

    let payload = vec![b'x'; 64 * 1024];
    let echoed: Value = reqwest::Client::new()
        .post(proxy.url("/upload/blob"))
        .body(payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["body_len"], 64 * 1024);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn unmatched_route_returns_404_without_upstream_contact() {
    let (upstream, accepted) = start_raw_upstream(|_stream| async {}).await;
    let proxy = start_proxy(config(vec![route(
        "/api",
        &format!("http://{upstream}"),
        &[],
        false,
    )]))
    .await;

    let resp = reqwest::get(proxy.url("/unknown")).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().contains_key("x-correlation-id"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
    assert_eq!(proxy.state.router.stats().not_found.load(Ordering::Relaxed), 1);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn refused_upstream_returns_502_fast() {
    let port = unused_port().await;
    let proxy = start_proxy(config(vec![route(
        "/api",
        &format!("http://127.0.0.1:{port}"),
        &[],
        false,
    )]))
    .await;

    let started = Instant::now();
    let resp = reqwest::get(proxy.url("/api/users")).await.unwrap();
    assert_eq!(resp.status(), 502);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(proxy.state.router.stats().failed.load(Ordering::Relaxed), 1);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn malformed_upstream_response_is_502_without_retry() {
    let (upstream, accepted) = start_raw_upstream(|mut stream| async move {
        read_request_head(&mut stream).await;
        let _ = stream.write_all(b"this is not http\r\n\r\n").await;
        let _ = stream.shutdown().await;
    })
    .await;
    let proxy = start_proxy(config(vec![route(
        "/api",
        &format!("http://{upstream}"),
        &[],
        false,
    )]))
    .await;

    let resp = reqwest::get(proxy.url("/api/users")).await.unwrap();
    assert_eq!(resp.status(), 502);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn stalled_upstream_times_out_with_502() {
    let (upstream, accepted) = start_raw_upstream(|mut stream| async move {
        read_request_head(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    })
    .await;
    let mut slow = route("/slow", &format!("http://{upstream}"), &[], false);
    slow.timeout = Some(200);
    let proxy = start_proxy(config(vec![slow])).await;

    let started = Instant::now();
    let resp = reqwest::get(proxy.url("/slow")).await.unwrap();
    assert_eq!(resp.status(), 502);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn slow_upload_is_not_cut_off_by_response_timeout() {
    let upstream = start_echo_upstream().await;
    let mut upload = route("/upload", &format!("http://{upstream}"), &[], false);
    upload.timeout = Some(300);
    let proxy = start_proxy(config(vec![upload])).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(
            b"POST /upload/slow HTTP/1.1\r\nhost: localhost\r\ncontent-length: 12\r\nconnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    // 800ms of upload against a 300ms response timeout.
    for part in [b"abc", b"def", b"ghi", b"jkl"] {
        tokio::time::sleep(Duration::from_millis(200)).await;
        client.write_all(part).await.unwrap();
    }

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#""body_len":12"#), "{response}");

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn response_body_is_relayed_before_upstream_finishes() {
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
    let (upstream, _) = start_raw_upstream(move |mut stream| {
        let release_rx = Arc::clone(&release_rx);
        async move {
            read_request_head(&mut stream).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nhello\r\n")
                .await
                .unwrap();
            if let Some(rx) = release_rx.lock().await.take() {
                let _ = rx.await;
            }
            stream.write_all(b"6\r\n world\r\n0\r\n\r\n").await.unwrap();
        }
    })
    .await;
    let proxy = start_proxy(config(vec![route(
        "/stream",
        &format!("http://{upstream}"),
        &[],
        false,
    )]))
    .await;

    let mut resp = reqwest::get(proxy.url("/stream")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let first = tokio::time::timeout(Duration::from_secs(2), resp.chunk())
        .await
        .expect("first chunk should arrive while upstream is still open")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"hello");

    let _ = release_tx.send(());
    let mut rest = Vec::new();
    while let Some(chunk) = resp.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b" world");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(proxy.state.router.stats().forwarded.load(Ordering::Relaxed), 1);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn client_disconnect_closes_upstream_connection() {
    let (closed_tx, closed_rx) = oneshot::channel::<bool>();
    let closed_tx = Arc::new(tokio::sync::Mutex::new(Some(closed_tx)));
    let (upstream, _) = start_raw_upstream(move |mut stream| {
        let closed_tx = Arc::clone(&closed_tx);
        async move {
            read_request_head(&mut stream).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nhello\r\n")
                .await
                .unwrap();

            // Never finish the body; wait for the proxy to hang up on us.
            let mut buf = [0u8; 64];
            let closed = matches!(
                tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await,
                Ok(Ok(0) | Err(_))
            );
            if let Some(tx) = closed_tx.lock().await.take() {
                let _ = tx.send(closed);
            }
        }
    })
    .await;
    let proxy = start_proxy(config(vec![route(
        "/stream",
        &format!("http://{upstream}"),
        &[],
        false,
    )]))
    .await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(b"GET /stream HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = [0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(buf[..n].starts_with(b"HTTP/1.1 200"));
    drop(client);

    let closed = tokio::time::timeout(Duration::from_secs(6), closed_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(closed, "upstream connection should close after the client leaves");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = proxy.state.router.stats();
    assert_eq!(stats.cancelled.load(Ordering::Relaxed), 1);
    assert_eq!(stats.forwarded.load(Ordering::Relaxed), 0);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let proxy = start_proxy(config(vec![route("/api", "http://127.0.0.1:9", &[], false)])).await;

    let resp = reqwest::get(proxy.url("/healthz")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let health: HealthResponse = resp.json().await.unwrap();
    assert!(health.ok);
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.config.source, "test");
    assert_eq!(health.config.version, "test-has");
    assert_eq!(health.config.routes, 1);
    assert_eq!(health.stats.requests_forwarded, 0);
    assert_eq!(health.stats.requests_failed, 0);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn custom_health_path_is_served_by_the_proxy() {
    let upstream = start_echo_upstream().await;
    let mut cfg = config(vec![route("/", &format!("http://{upstream}"), &[], false)]);
    cfg.health.path = "/_waypoint/health".into();
    let proxy = start_proxy(cfg).await;

    let health: HealthResponse = reqwest::get(proxy.url("/_waypoint/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(health.ok);

    // Everything else still reaches the catch-all route.
    let echoed: Value = reqwest::get(proxy.url("/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["path"], "/healthz");

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn health_path_answers_any_method() {
    let upstream = start_echo_upstream().await;
    let proxy = start_proxy(config(vec![route("/", &format!("http://{upstream}"), &[], false)])).await;

    let client = reqwest::Client::new();
    for method in [reqwest::Method::POST, reqwest::Method::PUT, reqwest::Method::DELETE] {
        let resp = client
            .request(method.clone(), proxy.url("/healthz"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "{method}");
        let health: HealthResponse = resp.json().await.unwrap();
        assert!(health.ok);
    }
    assert_eq!(proxy.state.router.stats().forwarded.load(Ordering::Relaxed), 0);

    let _ = proxy.shutdown.send(());
}

#[tokio::test]
async fn graceful_shutdown_works() {
    let proxy = start_proxy(config(vec![route("/api", "http://127.0.0.1:9", &[], false)])).await;

    let url = proxy.url("/healthz");
    assert!(reqwest::get(&url).await.is_ok());

    let _ = proxy.shutdown.send(());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(reqwest::get(&url).await.is_err());
}
