//! Per-notification results and the classification of APNs failures

use crate::request::payload::PayloadLike;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Whether APNs accepted the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// The outcome of sending one notification. Created once per notification
/// and never changed afterwards.
#[derive(Debug, Clone)]
pub struct SendResult {
    notification: Arc<dyn PayloadLike>,
    outcome: Outcome,
    reason: Option<ErrorReason>,
    code: Option<u16>,
    apns_id: Option<String>,
    unregistered_at: Option<u64>,
    timestamp: SystemTime,
}

impl SendResult {
    pub(crate) fn success(notification: Arc<dyn PayloadLike>, code: u16, apns_id: Option<String>) -> Self {
        Self {
            notification,
            outcome: Outcome::Success,
            reason: None,
            code: Some(code),
            apns_id,
            unregistered_at: None,
            timestamp: SystemTime::now(),
        }
    }

    pub(crate) fn rejected(
        notification: Arc<dyn PayloadLike>,
        code: u16,
        apns_id: Option<String>,
        body: Option<ErrorBody>,
    ) -> Self {
        let (reason, unregistered_at) = match body {
            Some(ErrorBody { reason, timestamp }) => (reason, timestamp),
            None => (ErrorReason::Unknown, None),
        };

        Self {
            notification,
            outcome: Outcome::Failure,
            reason: Some(reason),
            code: Some(code),
            apns_id,
            unregistered_at,
            timestamp: SystemTime::now(),
        }
    }

    /// No response came back from APNs for this notification.
    pub(crate) fn connection_failure(notification: Arc<dyn PayloadLike>) -> Self {
        Self {
            notification,
            outcome: Outcome::Failure,
            reason: Some(ErrorReason::ConnectionError),
            code: None,
            apns_id: None,
            unregistered_at: None,
            timestamp: SystemTime::now(),
        }
    }

    /// The notification this result belongs to.
    pub fn notification(&self) -> &Arc<dyn PayloadLike> {
        &self.notification
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Why the notification failed. `None` for successful sends.
    pub fn reason(&self) -> Option<ErrorReason> {
        self.reason
    }

    /// The HTTP status code. Absent when the transport failed before APNs
    /// responded.
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    /// The `apns-id` header of the response, assigned by APNs when the
    /// request didn't carry one.
    pub fn apns_id(&self) -> Option<&str> {
        self.apns_id.as_deref()
    }

    /// For `Unregistered` failures, the last time (milliseconds since epoch)
    /// APNs confirmed the device token was no longer valid for the topic.
    pub fn unregistered_at(&self) -> Option<u64> {
        self.unregistered_at
    }

    /// When the result was created.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub(crate) fn reason_name(&self) -> &'static str {
        self.reason.map(|r| r.channel_name()).unwrap_or("none")
    }
}

/// The response body from APNs. Only available for errors.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorBody {
    /// The error indicating the reason for the failure.
    pub reason: ErrorReason,

    /// If the value of the `ErrorReason` is `Unregistered`, the value of this
    /// key is the last time at which APNs confirmed that the device token was
    /// no longer valid for the topic. The value is in milliseconds (ms).
    pub timestamp: Option<u64>,
}

/// A description what went wrong with the push notification.
///
/// Provider reasons are parsed from the `reason` string APNs returns; strings
/// this crate doesn't know map to [`ErrorReason::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorReason {
    /// The collapse identifier exceeds the maximum allowed size.
    BadCollapseId,

    /// The specified device token was bad. Verify that the request contains a
    /// valid token and that the token matches the environment.
    BadDeviceToken,

    /// The `apns_expiration` in `NotificationOptions` is bad.
    BadExpirationDate,

    /// The `apns_id` value in `NotificationOptions` is bad.
    BadMessageId,

    /// The `apns_priority` in `NotificationOptions` is bad.
    BadPriority,

    /// The `apns_topic` in `NotificationOptions` is bad.
    BadTopic,

    /// The device token does not match the specified topic.
    DeviceTokenNotForTopic,

    /// One or more headers were repeated.
    DuplicateHeaders,

    /// Idle time out.
    IdleTimeout,

    /// The `apns-push-type` value is invalid.
    InvalidPushType,

    /// The device token is not specified in the payload.
    MissingDeviceToken,

    /// The apns-topic header of the request was not specified and was
    /// required. The apns-topic header is mandatory when the client is
    /// connected using a certificate that supports multiple topics.
    MissingTopic,

    /// The message payload was empty.
    PayloadEmpty,

    /// Pushing to this topic is not allowed.
    TopicDisallowed,

    /// The certificate was bad.
    BadCertificate,

    /// The client certificate was for the wrong environment.
    BadCertificateEnvironment,

    /// The provider token is stale and a new token should be generated.
    ExpiredProviderToken,

    /// The specified action is not allowed.
    Forbidden,

    /// The provider token is not valid or the token signature could not be
    /// verified.
    InvalidProviderToken,

    /// No provider certificate was used to connect to APNs and Authorization
    /// header was missing or no provider token was specified.
    MissingProviderToken,

    /// The key ID in the provider token isn’t related to the key ID of the
    /// token used in the first push of this connection.
    UnrelatedKeyIdInToken,

    /// The request contained a bad `:path` value.
    BadPath,

    /// The specified `:method` was not `POST`.
    MethodNotAllowed,

    /// The device token has expired.
    ExpiredToken,

    /// The device token is inactive for the specified topic.
    Unregistered,

    /// The message payload was too large. The maximum payload size is 4096
    /// bytes.
    PayloadTooLarge,

    /// The provider token is being updated too often.
    TooManyProviderTokenUpdates,

    /// Too many requests were made consecutively to the same device token.
    TooManyRequests,

    /// An internal server error occurred.
    InternalServerError,

    /// The service is unavailable.
    ServiceUnavailable,

    /// The server is shutting down.
    Shutdown,

    /// The request never got a response: the connection was reset, timed out
    /// or could not be established. Not reported by APNs itself.
    ConnectionError,

    /// APNs returned a reason this crate doesn't know, or no reason at all.
    Unknown,
}

impl ErrorReason {
    const PROVIDER_REASONS: &'static [ErrorReason] = &[
        ErrorReason::BadCollapseId,
        ErrorReason::BadDeviceToken,
        ErrorReason::BadExpirationDate,
        ErrorReason::BadMessageId,
        ErrorReason::BadPriority,
        ErrorReason::BadTopic,
        ErrorReason::DeviceTokenNotForTopic,
        ErrorReason::DuplicateHeaders,
        ErrorReason::IdleTimeout,
        ErrorReason::InvalidPushType,
        ErrorReason::MissingDeviceToken,
        ErrorReason::MissingTopic,
        ErrorReason::PayloadEmpty,
        ErrorReason::TopicDisallowed,
        ErrorReason::BadCertificate,
        ErrorReason::BadCertificateEnvironment,
        ErrorReason::ExpiredProviderToken,
        ErrorReason::Forbidden,
        ErrorReason::InvalidProviderToken,
        ErrorReason::MissingProviderToken,
        ErrorReason::UnrelatedKeyIdInToken,
        ErrorReason::BadPath,
        ErrorReason::MethodNotAllowed,
        ErrorReason::ExpiredToken,
        ErrorReason::Unregistered,
        ErrorReason::PayloadTooLarge,
        ErrorReason::TooManyProviderTokenUpdates,
        ErrorReason::TooManyRequests,
        ErrorReason::InternalServerError,
        ErrorReason::ServiceUnavailable,
        ErrorReason::Shutdown,
    ];

    /// Maps a reason string from an APNs response body. Never fails: unknown
    /// strings become [`ErrorReason::Unknown`].
    pub fn from_provider(reason: &str) -> Self {
        Self::PROVIDER_REASONS
            .iter()
            .copied()
            .find(|r| r.as_str() == reason)
            .unwrap_or(ErrorReason::Unknown)
    }

    /// The reason string as APNs spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::BadCollapseId => "BadCollapseId",
            ErrorReason::BadDeviceToken => "BadDeviceToken",
            ErrorReason::BadExpirationDate => "BadExpirationDate",
            ErrorReason::BadMessageId => "BadMessageId",
            ErrorReason::BadPriority => "BadPriority",
            ErrorReason::BadTopic => "BadTopic",
            ErrorReason::DeviceTokenNotForTopic => "DeviceTokenNotForTopic",
            ErrorReason::DuplicateHeaders => "DuplicateHeaders",
            ErrorReason::IdleTimeout => "IdleTimeout",
            ErrorReason::InvalidPushType => "InvalidPushType",
            ErrorReason::MissingDeviceToken => "MissingDeviceToken",
            ErrorReason::MissingTopic => "MissingTopic",
            ErrorReason::PayloadEmpty => "PayloadEmpty",
            ErrorReason::TopicDisallowed => "TopicDisallowed",
            ErrorReason::BadCertificate => "BadCertificate",
            ErrorReason::BadCertificateEnvironment => "BadCertificateEnvironment",
            ErrorReason::ExpiredProviderToken => "ExpiredProviderToken",
            ErrorReason::Forbidden => "Forbidden",
            ErrorReason::InvalidProviderToken => "InvalidProviderToken",
            ErrorReason::MissingProviderToken => "MissingProviderToken",
            ErrorReason::UnrelatedKeyIdInToken => "UnrelatedKeyIdInToken",
            ErrorReason::BadPath => "BadPath",
            ErrorReason::MethodNotAllowed => "MethodNotAllowed",
            ErrorReason::ExpiredToken => "ExpiredToken",
            ErrorReason::Unregistered => "Unregistered",
            ErrorReason::PayloadTooLarge => "PayloadTooLarge",
            ErrorReason::TooManyProviderTokenUpdates => "TooManyProviderTokenUpdates",
            ErrorReason::TooManyRequests => "TooManyRequests",
            ErrorReason::InternalServerError => "InternalServerError",
            ErrorReason::ServiceUnavailable => "ServiceUnavailable",
            ErrorReason::Shutdown => "Shutdown",
            ErrorReason::ConnectionError => "ConnectionError",
            ErrorReason::Unknown => "Unknown",
        }
    }

    /// The event channel failures with this reason are published on, e.g.
    /// `badDeviceToken`.
    pub fn channel_name(&self) -> &'static str {
        match self {
            ErrorReason::BadCollapseId => "badCollapseId",
            ErrorReason::BadDeviceToken => "badDeviceToken",
            ErrorReason::BadExpirationDate => "badExpirationDate",
            ErrorReason::BadMessageId => "badMessageId",
            ErrorReason::BadPriority => "badPriority",
            ErrorReason::BadTopic => "badTopic",
            ErrorReason::DeviceTokenNotForTopic => "deviceTokenNotForTopic",
            ErrorReason::DuplicateHeaders => "duplicateHeaders",
            ErrorReason::IdleTimeout => "idleTimeout",
            ErrorReason::InvalidPushType => "invalidPushType",
            ErrorReason::MissingDeviceToken => "missingDeviceToken",
            ErrorReason::MissingTopic => "missingTopic",
            ErrorReason::PayloadEmpty => "payloadEmpty",
            ErrorReason::TopicDisallowed => "topicDisallowed",
            ErrorReason::BadCertificate => "badCertificate",
            ErrorReason::BadCertificateEnvironment => "badCertificateEnvironment",
            ErrorReason::ExpiredProviderToken => "expiredProviderToken",
            ErrorReason::Forbidden => "forbidden",
            ErrorReason::InvalidProviderToken => "invalidProviderToken",
            ErrorReason::MissingProviderToken => "missingProviderToken",
            ErrorReason::UnrelatedKeyIdInToken => "unrelatedKeyIdInToken",
            ErrorReason::BadPath => "badPath",
            ErrorReason::MethodNotAllowed => "methodNotAllowed",
            ErrorReason::ExpiredToken => "expiredToken",
            ErrorReason::Unregistered => "unregistered",
            ErrorReason::PayloadTooLarge => "payloadTooLarge",
            ErrorReason::TooManyProviderTokenUpdates => "tooManyProviderTokenUpdates",
            ErrorReason::TooManyRequests => "tooManyRequests",
            ErrorReason::InternalServerError => "internalServerError",
            ErrorReason::ServiceUnavailable => "serviceUnavailable",
            ErrorReason::Shutdown => "shutdown",
            ErrorReason::ConnectionError => "connectionError",
            ErrorReason::Unknown => "unknown",
        }
    }
}

impl<'de> Deserialize<'de> for ErrorReason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let reason = String::deserialize(deserializer)?;
        Ok(ErrorReason::from_provider(&reason))
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_parsing_bad_device_token() {
        let body: ErrorBody = serde_json::from_str(r#"{"reason":"BadDeviceToken"}"#).unwrap();

        assert_eq!(ErrorReason::BadDeviceToken, body.reason);
        assert_eq!(None, body.timestamp);
    }

    #[test]
    fn test_error_response_parsing_unregistered() {
        let body: ErrorBody = serde_json::from_str(r#"{"reason":"Unregistered","timestamp":1508249865488}"#).unwrap();

        assert_eq!(ErrorReason::Unregistered, body.reason);
        assert_eq!(Some(1508249865488), body.timestamp);
    }

    #[test]
    fn test_unrecognized_reason_maps_to_unknown() {
        let body: ErrorBody = serde_json::from_str(r#"{"reason":"SomethingApple2031"}"#).unwrap();

        assert_eq!(ErrorReason::Unknown, body.reason);
    }

    #[test]
    fn test_connection_error_is_not_a_provider_reason() {
        assert_eq!(ErrorReason::Unknown, ErrorReason::from_provider("ConnectionError"));
    }

    #[test]
    fn test_every_provider_reason_maps_back_to_itself() {
        for reason in ErrorReason::PROVIDER_REASONS {
            assert_eq!(*reason, ErrorReason::from_provider(reason.as_str()));
        }
    }

    #[test]
    fn test_channel_names() {
        assert_eq!("badDeviceToken", ErrorReason::BadDeviceToken.channel_name());
        assert_eq!("expiredProviderToken", ErrorReason::ExpiredProviderToken.channel_name());
        assert_eq!("connectionError", ErrorReason::ConnectionError.channel_name());
        assert_eq!("unknown", ErrorReason::Unknown.channel_name());
    }
}
