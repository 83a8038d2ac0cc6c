use crate::request::notification::{NotificationBuilder, NotificationOptions, Priority, PushType};
use crate::request::payload::{Payload, APS};
use std::collections::BTreeMap;

/// Builds a background notification: no alert, badge or sound, only
/// `content-available` and whatever custom data is added to the payload.
///
/// Unless the options say otherwise it goes out with push type
/// [`Background`](PushType::Background) and priority
/// [`Normal`](Priority::Normal), which APNs requires for background pushes.
///
/// ```rust
/// # use apns_h2::request::notification::{NotificationBuilder, SilentNotificationBuilder};
/// # use apns_h2::request::payload::PayloadLike;
/// # fn main() {
/// let mut payload = SilentNotificationBuilder::new().build("device_id", Default::default());
/// payload.add_custom_data("sync", &"inbox").unwrap();
///
/// assert_eq!(
///     r#"{"aps":{"content-available":1},"sync":"inbox"}"#,
///     &payload.to_json_string().unwrap()
/// );
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SilentNotificationBuilder {
    mutable_content: bool,
}

impl SilentNotificationBuilder {
    pub fn new() -> SilentNotificationBuilder {
        Self::default()
    }

    /// Let a notification service extension see the payload.
    pub fn set_mutable_content(mut self) -> Self {
        self.mutable_content = true;
        self
    }
}

impl NotificationBuilder for SilentNotificationBuilder {
    fn build<S>(self, device_token: S, mut options: NotificationOptions) -> Payload
    where
        S: Into<String>,
    {
        options.apns_push_type.get_or_insert(PushType::Background);
        options.apns_priority.get_or_insert(Priority::Normal);

        Payload {
            aps: APS {
                content_available: Some(1),
                mutable_content: self.mutable_content.then_some(1),
                ..Default::default()
            },
            device_token: device_token.into(),
            options,
            data: BTreeMap::new(),
        }
    }
}
