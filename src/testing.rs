//! An in-memory stand-in for APNs used by the unit tests.
//!
//! Responses depend on the device token in the request path:
//!
//! - `bad...`: 400 `BadDeviceToken`
//! - `gone...`: 410 `Unregistered` with a timestamp
//! - `weird...`: 400 with a reason nobody knows
//! - `reset...`: the stream fails before a response
//! - `hang...`: no answer until the connection closes
//! - `slow...`: answers after 20ms
//! - anything else: 200 with an `apns-id`
//!
//! A link that got a GOAWAY refuses new requests, like hyper does.

use crate::client::Endpoint;
use crate::error::Error;
use crate::session::{Connect, SessionOptions, Transport};
use async_trait::async_trait;
use http::{Request, Response, StatusCode};
use hyper::body::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FakeApns {
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    refuse_all: AtomicBool,
    requests: AtomicUsize,
    refused: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    links: Mutex<Vec<Arc<Link>>>,
    received: Mutex<Vec<Request<Bytes>>>,
}

/// State of one fake connection.
#[derive(Default)]
pub(crate) struct Link {
    closed: AtomicBool,
    draining: AtomicBool,
    goaway: AtomicBool,
}

impl Link {
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// GOAWAY the transport already noticed.
    pub(crate) fn drain(&self) {
        self.goaway.store(true, Ordering::SeqCst);
        self.draining.store(true, Ordering::SeqCst);
    }

    /// GOAWAY the transport only notices on its next request.
    pub(crate) fn go_away(&self) {
        self.goaway.store(true, Ordering::SeqCst);
    }
}

impl FakeApns {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn connector(self: &Arc<Self>) -> Arc<dyn Connect> {
        Arc::new(FakeConnector(self.clone()))
    }

    pub(crate) fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Every new connection is already shutting down.
    pub(crate) fn refuse_all_streams(&self) {
        self.refuse_all.store(true, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn link(&self, index: usize) -> Arc<Link> {
        self.links.lock()[index].clone()
    }

    /// Header value of the last request APNs received.
    pub(crate) fn last_header(&self, name: &str) -> Option<String> {
        self.received
            .lock()
            .last()
            .and_then(|r| r.headers().get(name))
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    pub(crate) fn last_path(&self) -> Option<String> {
        self.received.lock().last().map(|r| r.uri().path().to_string())
    }

    async fn respond(&self, link: &Link, request: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let number = self.requests.fetch_add(1, Ordering::SeqCst);
        let device_token = request.uri().path().rsplit('/').next().unwrap_or_default().to_string();
        let apns_id = request
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| format!("apns-id-{}", number));

        self.received.lock().push(request);

        // Scrambles completion order relative to submission order.
        tokio::time::sleep(Duration::from_millis((number as u64 * 7) % 5)).await;

        if device_token.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        if device_token.starts_with("hang") {
            while !link.closed.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        if link.closed.load(Ordering::SeqCst) || device_token.starts_with("reset") {
            return Err(Error::Closed);
        }

        let (status, body) = if device_token.starts_with("bad") {
            (StatusCode::BAD_REQUEST, r#"{"reason":"BadDeviceToken"}"#)
        } else if device_token.starts_with("gone") {
            (StatusCode::GONE, r#"{"reason":"Unregistered","timestamp":1508249865488}"#)
        } else if device_token.starts_with("weird") {
            (StatusCode::BAD_REQUEST, r#"{"reason":"NewReasonFromTheFuture"}"#)
        } else {
            (StatusCode::OK, "")
        };

        Ok(Response::builder()
            .status(status)
            .header("apns-id", apns_id)
            .body(Bytes::from_static(body.as_bytes()))?)
    }
}

struct FakeConnector(Arc<FakeApns>);

#[async_trait]
impl Connect for FakeConnector {
    async fn connect(&self, _: &Endpoint, _: &SessionOptions) -> Result<Box<dyn Transport>, Error> {
        let apns = &self.0;
        apns.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = apns.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            apns.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(Error::ConnectError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        apns.connects.fetch_add(1, Ordering::SeqCst);

        let link = Arc::new(Link::default());
        if apns.refuse_all.load(Ordering::SeqCst) {
            link.go_away();
        }
        apns.links.lock().push(link.clone());

        Ok(Box::new(FakeTransport {
            apns: apns.clone(),
            link,
        }))
    }
}

struct FakeTransport {
    apns: Arc<FakeApns>,
    link: Arc<Link>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        if self.link.goaway.load(Ordering::SeqCst) {
            self.link.draining.store(true, Ordering::SeqCst);
            self.apns.refused.fetch_add(1, Ordering::SeqCst);

            return Err(Error::Refused);
        }

        let current = self.apns.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.apns.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let response = self.apns.respond(&self.link, request).await;

        self.apns.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::SeqCst)
    }

    fn is_draining(&self) -> bool {
        self.link.draining.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.link.close();
    }
}
