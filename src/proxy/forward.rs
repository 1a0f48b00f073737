//! Single-attempt upstream exchange and streamed response relay.
//!
//! [`send`] issues the rewritten request on the shared client with a
//! response-header deadline and classifies failures into the
//! [`ProxyError`] taxonomy. There is no retry. The deadline starts once
//! the request body has been handed to the upstream in full, so upload
//! time never counts against it. [`RelayBody`] wraps the
//! upstream body so frames are passed to the client as they arrive.
//! Dropping it (the client hung up) drops the upstream body, which
//! makes the client connection task close the upstream socket.

use std::error::Error as StdError;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper::{Request, Response};
use tokio::sync::oneshot;

use super::inflight::InFlight;
use crate::error::ProxyError;
use crate::server::HttpClient;

pub async fn send(
    client: &HttpClient,
    request: Request<Body>,
    upstream: &str,
    timeout: Duration,
) -> Result<Response<Incoming>, ProxyError> {
    let (parts, body) = request.into_parts();
    let (body, body_sent) = UploadBody::new(body);
    let exchange = client.request(Request::from_parts(parts, Body::new(body)));

    let deadline = async move {
        // A dropped sender means the body is finished with as well.
        let _ = body_sent.await;
        tokio::time::sleep(timeout).await;
    };

    tokio::select! {
        result = exchange => result.map_err(|e| classify(e, upstream)),
        () = deadline => Err(ProxyError::UpstreamTimeout {
            upstream: upstream.to_string(),
            phase: "response",
        }),
    }
}

/// Client request body that reports when it has been fully written upstream.
struct UploadBody {
    inner: Body,
    sent: Option<oneshot::Sender<()>>,
}

impl UploadBody {
    fn new(inner: Body) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let mut body = Self {
            inner,
            sent: Some(tx),
        };
        // Empty bodies are never polled.
        if body.inner.is_end_stream() {
            body.finish();
        }
        (body, rx)
    }

    fn finish(&mut self) {
        if let Some(tx) = self.sent.take() {
            let _ = tx.send(());
        }
    }
}

impl HttpBody for UploadBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(None)) || this.inner.is_end_stream() {
            this.finish();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for UploadBody {
    fn drop(&mut self) {
        self.finish();
    }
}

fn find_in_chain<'a, T: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<T>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

fn classify(err: hyper_util::client::legacy::Error, upstream: &str) -> ProxyError {
    let upstream = upstream.to_string();

    if find_in_chain::<http_body_util::LengthLimitError>(&err).is_some() {
        return ProxyError::PayloadTooLarge;
    }

    // The request body is the client's own stream; if it broke, the client left.
    let request_body_failed = find_in_chain::<hyper::Error>(&err)
        .is_some_and(|e| e.is_user() && find_in_chain::<axum::Error>(e).is_some());
    if request_body_failed {
        return ProxyError::ClientDisconnected;
    }

    let timed_out = find_in_chain::<std::io::Error>(&err)
        .is_some_and(|e| e.kind() == std::io::ErrorKind::TimedOut);

    if err.is_connect() {
        if timed_out {
            return ProxyError::UpstreamTimeout {
                upstream,
                phase: "connect",
            };
        }
        return ProxyError::UpstreamUnreachable {
            upstream,
            source: Box::new(err),
        };
    }

    if timed_out {
        return ProxyError::UpstreamTimeout {
            upstream,
            phase: "response",
        };
    }

    ProxyError::UpstreamProtocolError {
        upstream,
        source: Box::new(err),
    }
}

/// Upstream response body relayed frame by frame to the client.
pub struct RelayBody {
    inner: Incoming,
    flight: InFlight,
}

impl RelayBody {
    #[must_use]
    pub const fn new(inner: Incoming, flight: InFlight) -> Self {
        Self { inner, flight }
    }
}

impl HttpBody for RelayBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.flight.record_bytes(data.len());
                }
            }
            Poll::Ready(Some(Err(e))) => {
                // Headers are already out; the connection is aborted, never patched up.
                let err = ProxyError::UpstreamProtocolError {
                    upstream: this.flight.upstream.clone(),
                    source: e.to_string().into(),
                };
                this.flight.fail(&err);
            }
            Poll::Ready(None) => this.flight.complete(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for RelayBody {
    fn drop(&mut self) {
        // Empty bodies may never be polled to completion.
        if self.inner.is_end_stream() {
            self.flight.complete();
        }
    }
}
