//! hyper-based HTTP/2 transport over rustls.

use crate::client::Endpoint;
use crate::error::Error;
use crate::session::{Connect, SessionOptions, Transport};
use async_trait::async_trait;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http2::{self, SendRequest};
use hyper_rustls::ConfigBuilderExt;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

const APNS_PORT: u16 = 443;

/// Connects to APNs over TLS with ALPN `h2`, trusting the webpki roots.
/// Keepalive pings are sent at the session's ping interval; a ping that isn't
/// acknowledged within the ping timeout closes the connection.
#[derive(Clone)]
pub struct Http2Connector {
    tls: TlsConnector,
}

impl Http2Connector {
    pub fn new() -> Self {
        let mut config = rustls::ClientConfig::builder()
            .with_webpki_roots()
            .with_no_client_auth();

        config.alpn_protocols = vec![b"h2".to_vec()];

        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }
}

impl Default for Http2Connector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connect for Http2Connector {
    async fn connect(&self, endpoint: &Endpoint, options: &SessionOptions) -> Result<Box<dyn Transport>, Error> {
        let host = endpoint.host();

        let tcp = TcpStream::connect((host, APNS_PORT))
            .await
            .map_err(Error::ConnectError)?;
        tcp.set_nodelay(true).map_err(Error::ConnectError)?;

        let server_name = ServerName::try_from(host)?.to_owned();
        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(Error::ConnectError)?;

        let transport = handshake(tls, host, options).await?;

        Ok(Box::new(transport))
    }
}

/// Runs the HTTP/2 handshake on an established byte stream and spawns the
/// task driving the connection.
async fn handshake<T>(io: T, host: &str, options: &SessionOptions) -> Result<Http2Transport, Error>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut builder = http2::Builder::new(TokioExecutor::new());
    builder
        .timer(TokioTimer::new())
        .keep_alive_interval(options.ping_interval)
        .keep_alive_timeout(options.ping_timeout)
        .keep_alive_while_idle(true);

    let (sender, connection) = builder.handshake::<_, Full<Bytes>>(TokioIo::new(io)).await?;

    let closed = Arc::new(AtomicBool::new(false));
    let connection_closed = closed.clone();
    let host = host.to_string();

    let task = tokio::spawn(async move {
        match connection.await {
            Ok(()) => tracing::debug!(%host, "APNs connection closed"),
            Err(e) => tracing::warn!(%host, error = %e, "APNs connection failed"),
        }

        connection_closed.store(true, Ordering::Release);
    });

    Ok(Http2Transport {
        sender: Mutex::new(sender),
        closed,
        draining: AtomicBool::new(false),
        task,
    })
}

struct Http2Transport {
    sender: Mutex<SendRequest<Full<Bytes>>>,
    closed: Arc<AtomicBool>,
    draining: AtomicBool,
    task: JoinHandle<()>,
}

#[async_trait]
impl Transport for Http2Transport {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let mut sender = self.sender.lock().clone();

        if let Err(error) = sender.ready().await {
            if self.is_closed() {
                return Err(error.into());
            }

            tracing::debug!(error = %error, "APNs connection stopped taking requests");
            self.draining.store(true, Ordering::Release);

            return Err(Error::Refused);
        }

        let response = match sender.try_send_request(request.map(Full::new)).await {
            Ok(response) => response,
            Err(mut e) => {
                let unsent = e.take_message().is_some();
                let error = e.into_error();
                let refused = refused_by_apns(&error);

                if !unsent && !refused && !error.is_canceled() {
                    return Err(error.into());
                }

                // Refused while the connection still runs: APNs sent GOAWAY.
                if !self.is_closed() {
                    tracing::debug!(error = %error, "APNs connection is draining");
                    self.draining.store(true, Ordering::Release);
                }

                return Err(Error::Refused);
            }
        };

        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(Response::from_parts(parts, body))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// hyper stops taking requests once it saw a GOAWAY, while the
    /// connection task keeps driving the streams already open.
    fn is_draining(&self) -> bool {
        !self.is_closed() && (self.draining.load(Ordering::Acquire) || self.sender.lock().is_closed())
    }

    fn close(&self) {
        self.task.abort();
        self.closed.store(true, Ordering::Release);
    }
}

/// APNs never processed the stream: it was refused outright, or opened after
/// the last stream a graceful GOAWAY accepted.
fn refused_by_apns(error: &hyper::Error) -> bool {
    let mut source = std::error::Error::source(error);

    while let Some(e) = source {
        if let Some(e) = e.downcast_ref::<h2::Error>() {
            return e.reason() == Some(h2::Reason::REFUSED_STREAM)
                || (e.is_go_away() && e.is_remote() && e.reason() == Some(h2::Reason::NO_ERROR));
        }

        source = e.source();
    }

    false
}

impl Drop for Http2Transport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn options() -> SessionOptions {
        SessionOptions {
            ping_interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(20),
            max_concurrent_streams: 10,
            connect_attempts: 1,
        }
    }

    fn request(device_token: &str) -> Request<Bytes> {
        Request::builder()
            .method("POST")
            .uri(format!("https://api.development.push.apple.com/3/device/{}", device_token))
            .header("apns-topic", "com.example.app")
            .body(Bytes::from_static(b"{\"aps\":{}}"))
            .unwrap()
    }

    fn ok(apns_id: &str) -> http::Response<()> {
        http::Response::builder()
            .status(200)
            .header("apns-id", apns_id)
            .body(())
            .unwrap()
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_response_with_headers_and_body() {
        let (client, server) = tokio::io::duplex(64 * 1024);

        let apns = tokio::spawn(async move {
            let mut connection = h2::server::handshake(server).await.unwrap();

            while let Some(Ok((request, mut respond))) = connection.accept().await {
                assert_eq!("/3/device/abc", request.uri().path());
                assert_eq!("com.example.app", request.headers()["apns-topic"]);

                let response = http::Response::builder()
                    .status(400)
                    .header("apns-id", "some-id")
                    .body(())
                    .unwrap();

                let mut body = respond.send_response(response, false).unwrap();
                body.send_data(Bytes::from_static(br#"{"reason":"BadDeviceToken"}"#), true)
                    .unwrap();
            }
        });

        let transport = handshake(client, "localhost", &options()).await.unwrap();
        let response = transport.send(request("abc")).await.unwrap();

        assert_eq!(400, response.status());
        assert_eq!("some-id", response.headers()["apns-id"]);
        assert_eq!(&br#"{"reason":"BadDeviceToken"}"#[..], response.body().as_ref());
        assert!(!transport.is_closed());
        assert!(!transport.is_draining());

        transport.close();
        assert!(transport.is_closed());

        drop(transport);
        apns.await.unwrap();
    }

    #[tokio::test]
    async fn test_goaway_marks_the_transport_draining() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (accepted, first_accepted) = oneshot::channel::<()>();
        let (release, released) = oneshot::channel::<()>();

        let apns = tokio::spawn(async move {
            let mut connection = h2::server::handshake(server).await.unwrap();
            let (request, mut respond) = connection.accept().await.unwrap().unwrap();
            assert_eq!("/3/device/first", request.uri().path());

            connection.graceful_shutdown();
            accepted.send(()).unwrap();

            // Streams opened before the final GOAWAY are dropped unanswered.
            let drop_new_streams = async { while let Some(Ok(_)) = connection.accept().await {} };

            tokio::select! {
                _ = drop_new_streams => {}
                _ = released => {
                    respond.send_response(ok("first"), true).unwrap();
                }
            }

            while let Some(Ok(_)) = connection.accept().await {}
        });

        let transport = Arc::new(handshake(client, "localhost", &options()).await.unwrap());

        let first = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(request("first")).await })
        };

        first_accepted.await.unwrap();

        let refused = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match transport.send(request("second")).await {
                    Err(Error::Refused) => break,
                    _ => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
        })
        .await;

        assert!(refused.is_ok());
        assert!(transport.is_draining());
        assert!(!transport.is_closed());

        release.send(()).unwrap();

        let response = first.await.unwrap().unwrap();
        assert_eq!(200, response.status());
        assert_eq!("first", response.headers()["apns-id"]);

        wait_for(|| transport.is_closed()).await;
        assert!(!transport.is_draining());

        apns.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_connection_fails_the_stream_in_flight() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (accepted, stream_accepted) = oneshot::channel::<()>();

        let apns = tokio::spawn(async move {
            let mut connection = h2::server::handshake(server).await.unwrap();
            let stream = connection.accept().await;
            assert!(matches!(stream, Some(Ok(_))));

            accepted.send(()).unwrap();
            // Dropping the connection closes the socket without a GOAWAY.
        });

        let transport = Arc::new(handshake(client, "localhost", &options()).await.unwrap());

        let in_flight = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(request("lost")).await })
        };

        stream_accepted.await.unwrap();
        apns.await.unwrap();

        assert!(in_flight.await.unwrap().is_err());

        wait_for(|| transport.is_closed()).await;
        assert!(!transport.is_draining());
    }
}
