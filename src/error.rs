//! Error and result module

use crate::response::SendResult;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// User request or Apple response JSON data was faulty.
    #[error("Error serializing to JSON: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// A problem connecting to APNs servers.
    #[error("Error connecting to APNs: {0}")]
    ConnectionError(#[from] hyper::Error),

    /// Could not establish a session after the configured number of immediate
    /// attempts.
    #[error("APNs session unavailable after {attempts} connection attempts: {source}")]
    SessionUnavailable {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    /// The transport went away before the request could be written.
    #[error("The APNs session was closed")]
    Closed,

    /// The connection refused a new stream, e.g. after APNs announced a
    /// shutdown. The request never reached APNs and can go out on a fresh
    /// connection.
    #[error("The APNs connection refused a new stream")]
    Refused,

    /// The TCP or TLS connection to APNs could not be opened.
    #[error("Error opening a connection to APNs: {0}")]
    ConnectError(#[source] io::Error),

    /// Couldn't generate an APNs token with the given key.
    #[error("Error creating a signature: {0}")]
    SignerError(String),

    /// APNs couldn't accept the notification. Contains the failed
    /// [SendResult](crate::response::SendResult) with the classified reason.
    #[error("Notification was not accepted by APNs (reason: {})", .0.reason_name())]
    ResponseError(SendResult),

    /// Invalid option values given in
    /// [NotificationOptions](crate::request::notification::NotificationOptions)
    /// or [ClientOptions](crate::client::ClientOptions).
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The request could not be built, e.g. a device token with characters
    /// not allowed in a path.
    #[error("Failed to construct HTTP request: {0}")]
    BuildRequestError(#[from] http::Error),

    /// TLS connection failed
    #[error("Error in creating a TLS connection: {0}")]
    TlsError(#[from] rustls::Error),

    /// The endpoint host is not a valid DNS name.
    #[error("Invalid server name: {0}")]
    InvalidServerName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Error reading the private key.
    #[error("Error in reading a key file: {0}")]
    ReadError(#[from] io::Error),
}

#[cfg(feature = "openssl")]
impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::SignerError(e.to_string())
    }
}

#[cfg(feature = "ring")]
impl From<ring::error::Unspecified> for Error {
    fn from(e: ring::error::Unspecified) -> Self {
        Self::SignerError(e.to_string())
    }
}

#[cfg(feature = "ring")]
impl From<ring::error::KeyRejected> for Error {
    fn from(e: ring::error::KeyRejected) -> Self {
        Self::SignerError(e.to_string())
    }
}

#[cfg(feature = "ring")]
impl From<pem::PemError> for Error {
    fn from(e: pem::PemError) -> Self {
        Self::SignerError(e.to_string())
    }
}
