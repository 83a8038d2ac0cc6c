//! Turning one notification into one APNs request and its answer into a
//! [`SendResult`].

use crate::client::Endpoint;
use crate::error::Error;
use crate::request::payload::PayloadLike;
use crate::response::{ErrorBody, SendResult};
use crate::session::SessionManager;
use crate::signer::Signer;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Request, Response, StatusCode};
use hyper::body::Bytes;
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) struct Pipeline {
    endpoint: Endpoint,
    signer: Option<Signer>,
    default_topic: Option<String>,
}

impl Pipeline {
    pub(crate) fn new(endpoint: Endpoint, signer: Option<Signer>, default_topic: Option<String>) -> Self {
        Self {
            endpoint,
            signer,
            default_topic,
        }
    }

    /// Everything of the request except its authorization, which is attached
    /// right before the request goes out.
    pub(crate) fn build_request(&self, payload: &dyn PayloadLike) -> Result<Request<Bytes>, Error> {
        let path = format!(
            "https://{}/3/device/{}",
            self.endpoint.host(),
            payload.get_device_token()
        );

        let mut builder = Request::builder()
            .uri(&path)
            .method("POST")
            .header(CONTENT_TYPE, "application/json");

        let options = payload.get_options();
        if let Some(ref apns_priority) = options.apns_priority {
            builder = builder.header("apns-priority", apns_priority.to_string().as_bytes());
        }
        if let Some(ref apns_id) = options.apns_id {
            builder = builder.header("apns-id", apns_id.as_bytes());
        }
        if let Some(ref apns_push_type) = options.apns_push_type {
            builder = builder.header("apns-push-type", apns_push_type.to_string().as_bytes());
        }
        if let Some(ref apns_expiration) = options.apns_expiration {
            builder = builder.header("apns-expiration", apns_expiration.to_string().as_bytes());
        }
        if let Some(ref apns_collapse_id) = options.apns_collapse_id {
            builder = builder.header("apns-collapse-id", apns_collapse_id.value.as_bytes());
        }
        if let Some(apns_topic) = options.apns_topic.as_ref().or(self.default_topic.as_ref()) {
            builder = builder.header("apns-topic", apns_topic.as_bytes());
        }

        let payload_json = payload.to_json_string()?;
        builder = builder.header(CONTENT_LENGTH, format!("{}", payload_json.len()).as_bytes());

        builder.body(Bytes::from(payload_json)).map_err(Error::BuildRequestError)
    }

    /// Fails if requests can't be authorized.
    pub(crate) fn check_signer(&self) -> Result<(), Error> {
        if let Some(ref signer) = self.signer {
            signer.token()?;
        }

        Ok(())
    }

    /// Sends a built request on a stream of the session and waits for APNs.
    ///
    /// Rejections and broken streams come back as failed results. Only a
    /// session that can't be opened or a token that can't be signed is an
    /// error. A request the connection refused before writing it goes out
    /// again on a fresh connection.
    pub(crate) async fn send(
        &self,
        notification: Arc<dyn PayloadLike>,
        mut request: Request<Bytes>,
        sessions: &SessionManager,
    ) -> Result<SendResult, Error> {
        let mut refused = 0;

        loop {
            let stream = match sessions.get_stream().await {
                Ok(stream) => stream,
                Err(Error::Closed) => return Ok(SendResult::connection_failure(notification)),
                Err(e) => return Err(e),
            };

            // Signed after queueing for a stream, so the token is fresh when sent.
            if let Some(ref signer) = self.signer {
                let token = signer.token()?;

                tracing::trace!(
                    age = ?token.issued_at().elapsed(),
                    expires_in = ?token.expires_at().saturating_duration_since(Instant::now()),
                    "authorizing request"
                );

                let auth = HeaderValue::from_str(&format!("Bearer {}", token.value())).map_err(http::Error::from)?;
                request.headers_mut().insert(AUTHORIZATION, auth);
            }

            let session = stream.session_id();

            match stream.send(copy_request(&request)).await {
                Ok(response) => return Ok(classify(notification, response)),
                Err(Error::Refused) if refused < MAX_REFUSED_STREAMS => {
                    refused += 1;
                    tracing::debug!(session, refused, "stream refused, sending on a fresh connection");
                }
                Err(e) => {
                    tracing::warn!(session, error = %e, "stream failed before APNs responded");
                    return Ok(SendResult::connection_failure(notification));
                }
            }
        }
    }
}

/// How often a request refused by a shutting down connection is sent again.
const MAX_REFUSED_STREAMS: usize = 2;

fn copy_request(request: &Request<Bytes>) -> Request<Bytes> {
    let mut copy = Request::new(request.body().clone());

    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();

    copy
}

fn classify(notification: Arc<dyn PayloadLike>, response: Response<Bytes>) -> SendResult {
    let apns_id = response
        .headers()
        .get("apns-id")
        .and_then(|s| s.to_str().ok())
        .map(String::from);

    match response.status() {
        StatusCode::OK => SendResult::success(notification, StatusCode::OK.as_u16(), apns_id),
        status => {
            let body: Option<ErrorBody> = serde_json::from_slice(response.body()).ok();

            let result = SendResult::rejected(notification, status.as_u16(), apns_id, body);

            tracing::debug!(
                status = status.as_u16(),
                reason = %result.reason_name(),
                device_token = result.notification().get_device_token(),
                "APNs rejected notification"
            );

            result
        }
    }
}
