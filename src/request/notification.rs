//! The `aps` notification content builders

mod default;
mod options;
mod silent;

pub use self::default::DefaultNotificationBuilder;
pub use self::options::{CollapseId, NotificationOptions, Priority, PushType};
pub use self::silent::SilentNotificationBuilder;

use crate::request::payload::Payload;

pub trait NotificationBuilder {
    /// Generates the request payload to be send with the `Client`.
    fn build<S>(self, device_token: S, options: NotificationOptions) -> Payload
    where
        S: Into<String>;
}
