//! The single multiplexed HTTP/2 session to APNs.
//!
//! A [`SessionManager`] owns at most one live [`Session`] per client. The
//! session is opened lazily by the first [`SessionManager::get_stream`] call,
//! and replaced the same way after it closes or starts draining. Streams are
//! handed out under a semaphore sized to the session's concurrent stream
//! limit; callers beyond the limit wait for a stream to free up.

pub mod http2;

use crate::client::Endpoint;
use crate::error::Error;
use async_trait::async_trait;
use http::{Request, Response};
use hyper::body::Bytes;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Opens physical connections to APNs.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint, options: &SessionOptions) -> Result<Box<dyn Transport>, Error>;
}

/// One established connection, able to carry many concurrent request/response
/// exchanges.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one request on its own stream and waits for the full response.
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Error>;

    /// The connection is gone: ping timeout, GOAWAY completed, or an I/O error.
    fn is_closed(&self) -> bool;

    /// The server asked to shut down; running streams may still complete but
    /// new ones should go to a fresh connection.
    fn is_draining(&self) -> bool;

    fn close(&self);
}

/// Health of the client's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session was opened yet.
    Disconnected,
    Connecting,
    Ready,
    Draining,
    /// Terminal until the next stream request opens a new session.
    Closed,
}

/// Connection settings handed to [`Connect`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How often an idle or busy connection is pinged.
    pub ping_interval: Duration,
    /// How long to wait for a ping acknowledgement before closing.
    pub ping_timeout: Duration,
    /// Upper bound of streams in flight on one session.
    pub max_concurrent_streams: usize,
    /// Immediate connection attempts before giving up.
    pub connect_attempts: usize,
}

/// A live connection with its stream budget.
pub struct Session {
    id: u64,
    transport: Box<dyn Transport>,
    streams: Arc<Semaphore>,
    max_concurrent_streams: usize,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
}

impl Session {
    fn new(id: u64, transport: Box<dyn Transport>, max_concurrent_streams: usize) -> Self {
        Self {
            id,
            transport,
            streams: Arc::new(Semaphore::new(max_concurrent_streams)),
            max_concurrent_streams,
            last_activity: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        if self.closed.load(Ordering::Acquire) || self.transport.is_closed() {
            SessionState::Closed
        } else if self.transport.is_draining() {
            SessionState::Draining
        } else {
            SessionState::Ready
        }
    }

    pub fn max_concurrent_streams(&self) -> usize {
        self.max_concurrent_streams
    }

    /// Streams that can be opened right now without waiting.
    pub fn available_streams(&self) -> usize {
        self.streams.available_permits()
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Stops handing out streams. Waiters move on to the next session while
    /// streams already running finish on this one.
    fn retire(&self) {
        self.streams.close();

        if self.state() == SessionState::Closed {
            self.transport.close();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.streams.close();
        self.transport.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("max_concurrent_streams", &self.max_concurrent_streams)
            .field("available_streams", &self.available_streams())
            .finish()
    }
}

/// The right to run one request on a session. Frees its stream on drop.
#[derive(Debug)]
pub struct StreamHandle {
    session: Arc<Session>,
    _permit: OwnedSemaphorePermit,
}

impl StreamHandle {
    pub fn session_id(&self) -> u64 {
        self.session.id
    }

    /// Runs the request and waits for APNs to answer or the stream to fail.
    pub async fn send(self, request: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        self.session.touch();
        let response = self.session.transport.send(request).await;
        self.session.touch();

        response
    }
}

/// Owns the client's one connection to APNs.
pub struct SessionManager {
    endpoint: Endpoint,
    connector: Arc<dyn Connect>,
    options: SessionOptions,
    session: RwLock<Option<Arc<Session>>>,
    connect_lock: tokio::sync::Mutex<()>,
    connecting: AtomicBool,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connect>, options: SessionOptions) -> Self {
        Self {
            endpoint,
            connector,
            options,
            session: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            connecting: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        if self.connecting.load(Ordering::Acquire) {
            return SessionState::Connecting;
        }

        self.session
            .read()
            .as_ref()
            .map(|session| session.state())
            .unwrap_or(SessionState::Disconnected)
    }

    /// The current session, if one was opened.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }

    /// Returns the ready session, connecting first when there is none.
    /// Concurrent callers share a single connection attempt.
    pub async fn open_session(&self) -> Result<Arc<Session>, Error> {
        if let Some(session) = self.ready_session() {
            return Ok(session);
        }

        let _connecting = self.connect_lock.lock().await;

        if let Some(session) = self.ready_session() {
            return Ok(session);
        }

        if let Some(old) = self.current() {
            tracing::debug!(session = old.id, state = ?old.state(), "replacing APNs session");
            old.retire();
        }

        self.connecting.store(true, Ordering::Release);
        let connected = self.connect().await;
        self.connecting.store(false, Ordering::Release);

        let session = Arc::new(connected?);
        *self.session.write() = Some(session.clone());

        Ok(session)
    }

    /// Waits for a free stream on the ready session. Suspends while the
    /// session's stream limit is exhausted.
    pub async fn get_stream(&self) -> Result<StreamHandle, Error> {
        for _ in 0..=self.options.connect_attempts {
            let session = self.open_session().await?;

            // A closed semaphore means the session was retired while we
            // waited; go again with its successor.
            let Ok(permit) = session.streams.clone().acquire_owned().await else {
                continue;
            };

            if session.state() == SessionState::Ready {
                return Ok(StreamHandle {
                    session,
                    _permit: permit,
                });
            }
        }

        Err(Error::Closed)
    }

    /// Closes the session. Streams in flight fail; the next stream request
    /// connects again.
    pub fn close_session(&self) {
        if let Some(session) = self.current() {
            tracing::debug!(session = session.id, "closing APNs session");
            session.close();
        }
    }

    fn ready_session(&self) -> Option<Arc<Session>> {
        self.current().filter(|session| session.state() == SessionState::Ready)
    }

    async fn connect(&self) -> Result<Session, Error> {
        let attempts = self.options.connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.connector.connect(&self.endpoint, &self.options).await {
                Ok(transport) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);

                    tracing::debug!(session = id, endpoint = %self.endpoint, attempt, "connected to APNs");

                    return Ok(Session::new(id, transport, self.options.max_concurrent_streams));
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(endpoint = %self.endpoint, attempt, error = %e, "connecting to APNs failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, attempt, error = %e, "connecting to APNs failed");

                    return Err(Error::SessionUnavailable {
                        attempts,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &self.endpoint)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApns;
    use futures::future::join_all;

    fn options(max_concurrent_streams: usize) -> SessionOptions {
        SessionOptions {
            ping_interval: Duration::from_millis(100),
            ping_timeout: Duration::from_secs(1),
            max_concurrent_streams,
            connect_attempts: 2,
        }
    }

    fn manager(apns: &Arc<FakeApns>, max_concurrent_streams: usize) -> SessionManager {
        SessionManager::new(Endpoint::Sandbox, apns.connector(), options(max_concurrent_streams))
    }

    fn request(device_token: &str) -> Request<Bytes> {
        Request::builder()
            .method("POST")
            .uri(format!("https://api.development.push.apple.com/3/device/{}", device_token))
            .body(Bytes::from_static(b"{}"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_session_is_opened_lazily() {
        let apns = FakeApns::new();
        let sessions = manager(&apns, 10);

        assert_eq!(SessionState::Disconnected, sessions.state());
        assert_eq!(0, apns.connects());

        let stream = sessions.get_stream().await.unwrap();

        assert_eq!(SessionState::Ready, sessions.state());
        assert_eq!(1, apns.connects());
        assert_eq!(200, stream.send(request("abc")).await.unwrap().status());
    }

    #[tokio::test]
    async fn test_concurrent_stream_requests_share_one_connection() {
        let apns = FakeApns::new();
        let sessions = manager(&apns, 100);

        let streams = join_all((0..20).map(|_| sessions.get_stream())).await;

        assert!(streams.iter().all(|s| s.is_ok()));
        assert_eq!(1, apns.connects());
    }

    #[tokio::test]
    async fn test_closed_transport_reconnects_on_next_stream() {
        let apns = FakeApns::new();
        let sessions = manager(&apns, 10);

        let first = sessions.get_stream().await.unwrap().session_id();
        apns.link(0).close();

        assert_eq!(SessionState::Closed, sessions.state());

        let second = sessions.get_stream().await.unwrap().session_id();

        assert_ne!(first, second);
        assert_eq!(2, apns.connects());
        assert_eq!(SessionState::Ready, sessions.state());
    }

    #[tokio::test]
    async fn test_draining_session_finishes_running_streams() {
        let apns = FakeApns::new();
        let sessions = manager(&apns, 10);

        let running = sessions.get_stream().await.unwrap();
        let running_session = running.session_id();
        let pending = tokio::spawn(running.send(request("slow")));

        tokio::time::sleep(Duration::from_millis(5)).await;
        apns.link(0).drain();

        assert_eq!(SessionState::Draining, sessions.state());

        let fresh = sessions.get_stream().await.unwrap();

        assert_ne!(running_session, fresh.session_id());
        assert_eq!(2, apns.connects());
        assert_eq!(200, pending.await.unwrap().unwrap().status());
        assert_eq!(200, fresh.send(request("abc")).await.unwrap().status());
    }

    #[tokio::test]
    async fn test_refused_stream_marks_the_session_draining() {
        let apns = FakeApns::new();
        let sessions = manager(&apns, 10);

        let stream = sessions.get_stream().await.unwrap();
        apns.link(0).go_away();

        assert_eq!(SessionState::Ready, sessions.state());
        assert!(matches!(stream.send(request("abc")).await, Err(Error::Refused)));
        assert_eq!(SessionState::Draining, sessions.state());

        let fresh = sessions.get_stream().await.unwrap();

        assert_eq!(2, apns.connects());
        assert_eq!(200, fresh.send(request("abc")).await.unwrap().status());
    }

    #[tokio::test]
    async fn test_close_session_is_terminal_until_next_stream() {
        let apns = FakeApns::new();
        let sessions = manager(&apns, 10);

        sessions.get_stream().await.unwrap();
        sessions.close_session();

        assert_eq!(SessionState::Closed, sessions.state());
        assert_eq!(1, apns.connects());

        sessions.get_stream().await.unwrap();

        assert_eq!(SessionState::Ready, sessions.state());
        assert_eq!(2, apns.connects());
    }

    #[tokio::test]
    async fn test_stream_limit_suspends_until_a_stream_frees_up() {
        let apns = FakeApns::new();
        let sessions = manager(&apns, 2);

        let first = sessions.get_stream().await.unwrap();
        let _second = sessions.get_stream().await.unwrap();

        assert_eq!(0, sessions.current().unwrap().available_streams());

        let waiting = tokio::time::timeout(Duration::from_millis(20), sessions.get_stream()).await;
        assert!(waiting.is_err());

        drop(first);

        let third = tokio::time::timeout(Duration::from_secs(1), sessions.get_stream()).await;
        assert!(matches!(third, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn test_in_flight_stream_fails_when_the_session_closes() {
        let apns = FakeApns::new();
        let sessions = manager(&apns, 10);

        let stream = sessions.get_stream().await.unwrap();
        let pending = tokio::spawn(stream.send(request("hang")));

        tokio::time::sleep(Duration::from_millis(5)).await;
        sessions.close_session();

        assert!(matches!(pending.await.unwrap(), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_one_immediate_retry_on_connect_failure() {
        let apns = FakeApns::new();
        apns.fail_next_connects(1);
        let sessions = manager(&apns, 10);

        assert!(sessions.get_stream().await.is_ok());
        assert_eq!(2, apns.connect_attempts());
    }

    #[tokio::test]
    async fn test_repeated_connect_failures_are_surfaced() {
        let apns = FakeApns::new();
        apns.fail_next_connects(5);
        let sessions = manager(&apns, 10);

        let result = sessions.get_stream().await;

        assert!(matches!(result, Err(Error::SessionUnavailable { attempts: 2, .. })));
        assert_eq!(2, apns.connect_attempts());
        assert_eq!(SessionState::Disconnected, sessions.state());
    }
}
