//! The client module for sending notifications and collecting their results

use crate::error::Error;
use crate::events::EventEmitter;
use crate::pipeline::Pipeline;
use crate::request::payload::PayloadLike;
use crate::response::SendResult;
use crate::session::http2::Http2Connector;
use crate::session::{Connect, SessionManager, SessionOptions, SessionState};
use crate::signer::Signer;
use futures::stream::{self, StreamExt};
use http::Request;
use hyper::body::Bytes;
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_PING_INTERVAL_MS: u64 = 60_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 1000;
const DEFAULT_CONNECT_ATTEMPTS: usize = 2;

/// The APNs service endpoint to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The production environment (api.push.apple.com)
    Production,
    /// The development/test environment (api.development.push.apple.com)
    Sandbox,
}

impl Endpoint {
    pub fn host(&self) -> &'static str {
        match self {
            Endpoint::Production => "api.push.apple.com",
            Endpoint::Sandbox => "api.development.push.apple.com",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host())
    }
}

/// Uses [`Endpoint::Production`] by default.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The endpoint where the requests are sent to
    pub endpoint: Endpoint,
    /// See [`crate::signer::Signer`]
    pub signer: Option<Signer>,
    /// The `apns-topic` of notifications that don't set one
    pub default_topic: Option<String>,
    /// How often the connection is pinged, in milliseconds
    pub ping_interval_ms: u64,
    /// How long a ping may go unanswered before the connection is dropped,
    /// in milliseconds
    pub ping_timeout_ms: u64,
    /// The most notifications in flight at once. Further sends wait for a
    /// free stream.
    ///
    /// This is a fixed bound on the client side. The limit APNs advertises
    /// in its HTTP/2 settings is not read back; hyper still keeps to it on
    /// the wire, so a lower server limit queues streams inside hyper.
    pub max_concurrent_streams: usize,
    /// Immediate connection attempts before a send fails with
    /// [`Error::SessionUnavailable`]
    pub connect_attempts: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Production,
            signer: None,
            default_topic: None,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

impl ClientOptions {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_default_topic(mut self, topic: impl Into<String>) -> Self {
        self.default_topic = Some(topic.into());
        self
    }

    pub fn with_ping_interval(mut self, millis: u64) -> Self {
        self.ping_interval_ms = millis;
        self
    }

    pub fn with_ping_timeout(mut self, millis: u64) -> Self {
        self.ping_timeout_ms = millis;
        self
    }

    pub fn with_max_concurrent_streams(mut self, streams: usize) -> Self {
        self.max_concurrent_streams = streams;
        self
    }

    pub fn with_connect_attempts(mut self, attempts: usize) -> Self {
        self.connect_attempts = attempts;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.ping_interval_ms == 0 || self.ping_timeout_ms == 0 {
            return Err(Error::InvalidOptions(String::from(
                "The ping interval and timeout must be positive",
            )));
        }

        if self.max_concurrent_streams == 0 {
            return Err(Error::InvalidOptions(String::from(
                "At least one concurrent stream is needed",
            )));
        }

        if self.connect_attempts == 0 {
            return Err(Error::InvalidOptions(String::from(
                "At least one connection attempt is needed",
            )));
        }

        Ok(())
    }
}

impl From<&ClientOptions> for SessionOptions {
    fn from(options: &ClientOptions) -> Self {
        Self {
            ping_interval: Duration::from_millis(options.ping_interval_ms),
            ping_timeout: Duration::from_millis(options.ping_timeout_ms),
            max_concurrent_streams: options.max_concurrent_streams,
            connect_attempts: options.connect_attempts,
        }
    }
}

/// Handles requests to and responses from Apple Push Notification service.
/// Keeps one HTTP/2 connection open, signs requests with the configured
/// [`Signer`] and maps responses into [`SendResult`]s.
///
/// Failed results are also published on the client's
/// [`EventEmitter`](crate::events::EventEmitter).
///
/// Clones share the connection, the token and the subscriptions.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: Pipeline,
    sessions: SessionManager,
    events: EventEmitter,
    max_concurrent_streams: usize,
}

impl Client {
    /// A client connecting to the endpoint of `options` over TLS.
    pub fn new(options: ClientOptions) -> Result<Client, Error> {
        Self::with_connector(Arc::new(Http2Connector::new()), options)
    }

    /// A client opening its connections with a connector of your own.
    pub fn with_connector(connector: Arc<dyn Connect>, options: ClientOptions) -> Result<Client, Error> {
        options.validate()?;

        let sessions = SessionManager::new(options.endpoint, connector, SessionOptions::from(&options));
        let max_concurrent_streams = options.max_concurrent_streams;
        let pipeline = Pipeline::new(options.endpoint, options.signer, options.default_topic);

        Ok(Client {
            inner: Arc::new(Inner {
                pipeline,
                sessions,
                events: EventEmitter::default(),
                max_concurrent_streams,
            }),
        })
    }

    /// Create a connection to APNs using system certificates, signing every
    /// request with a signature using a private key, key id and team id
    /// provisioned from your [Apple developer
    /// account](https://developer.apple.com/account/).
    pub fn token<S, T, R>(pkcs8_pem: R, key_id: S, team_id: T, endpoint: Endpoint) -> Result<Client, Error>
    where
        S: Into<String>,
        T: Into<String>,
        R: Read,
    {
        let signature_ttl = Duration::from_secs(60 * 55);
        let signer = Signer::new(pkcs8_pem, key_id, team_id, signature_ttl)?;

        Self::new(ClientOptions::new(endpoint).with_signer(signer))
    }

    /// Send a notification payload.
    ///
    /// Resolves with the successful result, or fails with
    /// [`Error::ResponseError`] carrying the failed one. See
    /// [ErrorReason](crate::response::ErrorReason) for possible reasons.
    #[tracing::instrument(skip_all)]
    pub async fn send<T>(&self, payload: T) -> Result<SendResult, Error>
    where
        T: PayloadLike + 'static,
    {
        let notification: Arc<dyn PayloadLike> = Arc::new(payload);
        let request = self.inner.pipeline.build_request(notification.as_ref())?;

        let result = self.dispatch(notification, request).await?;

        if result.is_success() {
            Ok(result)
        } else {
            Err(Error::ResponseError(result))
        }
    }

    /// Send many notification payloads at once, at most
    /// [`max_concurrent_streams`](ClientOptions::max_concurrent_streams) of
    /// them in flight.
    ///
    /// The results come back in the order of the payloads, whatever order
    /// APNs answered in, one for every payload. The call fails only before
    /// anything is sent: when a request can't be built or a token can't be
    /// signed. Once sending started, a notification that couldn't reach APNs
    /// gets a failed result with [`ConnectionError`](crate::response::ErrorReason::ConnectionError).
    #[tracing::instrument(skip_all, fields(notifications = tracing::field::Empty))]
    pub async fn send_many<I, T>(&self, payloads: I) -> Result<Vec<SendResult>, Error>
    where
        I: IntoIterator<Item = T>,
        T: PayloadLike + 'static,
    {
        let notifications: Vec<Arc<dyn PayloadLike>> = payloads
            .into_iter()
            .map(|payload| Arc::new(payload) as Arc<dyn PayloadLike>)
            .collect();

        tracing::Span::current().record("notifications", notifications.len());

        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let requests = notifications
            .iter()
            .map(|notification| self.inner.pipeline.build_request(notification.as_ref()))
            .collect::<Result<Vec<Request<Bytes>>, Error>>()?;

        self.inner.pipeline.check_signer()?;

        let unreachable = AtomicBool::new(false);
        let mut slots: Vec<Option<SendResult>> = vec![None; notifications.len()];

        let dispatches: Vec<_> = notifications
            .into_iter()
            .zip(requests)
            .enumerate()
            .map(|(index, (notification, request))| {
                let unreachable = &unreachable;
                async move { (index, self.dispatch_in_batch(notification, request, unreachable).await) }
            })
            .collect();

        let mut pending = stream::iter(dispatches).buffer_unordered(self.inner.max_concurrent_streams);

        while let Some((index, result)) = pending.next().await {
            slots[index] = Some(result);
        }

        let results: Vec<SendResult> = slots.into_iter().flatten().collect();

        tracing::debug!(
            failed = results.iter().filter(|r| !r.is_success()).count(),
            "batch sent"
        );

        Ok(results)
    }

    /// Subscriptions to failed results.
    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.sessions.state()
    }

    /// Closes the connection to APNs. Notifications in flight fail with a
    /// connection error; the next send connects again.
    pub fn close(&self) {
        self.inner.sessions.close_session();
    }

    async fn dispatch(&self, notification: Arc<dyn PayloadLike>, request: Request<Bytes>) -> Result<SendResult, Error> {
        let result = self
            .inner
            .pipeline
            .send(notification, request, &self.inner.sessions)
            .await?;

        self.inner.events.emit_failure(&result);

        Ok(result)
    }

    /// Like `dispatch`, but a notification that can't be sent becomes a
    /// connection failure. After APNs turned out unreachable the rest of the
    /// batch doesn't try to connect again.
    async fn dispatch_in_batch(
        &self,
        notification: Arc<dyn PayloadLike>,
        request: Request<Bytes>,
        unreachable: &AtomicBool,
    ) -> SendResult {
        if !unreachable.load(Ordering::Acquire) {
            match self.dispatch(notification.clone(), request).await {
                Ok(result) => return result,
                Err(e) => {
                    if matches!(e, Error::SessionUnavailable { .. }) {
                        unreachable.store(true, Ordering::Release);
                    }

                    tracing::warn!(
                        error = %e,
                        device_token = notification.get_device_token(),
                        "notification not sent"
                    );
                }
            }
        }

        let result = SendResult::connection_failure(notification);
        self.inner.events.emit_failure(&result);

        result
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pipeline", &self.inner.pipeline)
            .field("sessions", &self.inner.sessions)
            .field("events", &self.inner.events)
            .finish()
    }
}
