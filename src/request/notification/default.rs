use crate::request::notification::{NotificationBuilder, NotificationOptions};
use crate::request::payload::{Alert, Payload, APS};
use std::collections::BTreeMap;

/// Builds a notification the user sees.
///
/// A body on its own goes out as a plain text alert. With a title or a
/// subtitle the alert becomes a dictionary.
///
/// ```rust
/// # use apns_h2::request::notification::{DefaultNotificationBuilder, NotificationBuilder};
/// # use apns_h2::request::payload::PayloadLike;
/// # fn main() {
/// let payload = DefaultNotificationBuilder::new()
///     .set_title("Table for two")
///     .set_body("Your booking is confirmed")
///     .set_badge(1)
///     .set_sound("default")
///     .set_thread_id("bookings")
///     .build("device_id", Default::default());
///
/// assert_eq!(
///     r#"{"aps":{"alert":{"title":"Table for two","body":"Your booking is confirmed"},"badge":1,"sound":"default","thread-id":"bookings"}}"#,
///     &payload.to_json_string().unwrap()
/// );
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct DefaultNotificationBuilder {
    title: Option<String>,
    subtitle: Option<String>,
    body: Option<String>,
    badge: Option<u32>,
    sound: Option<String>,
    thread_id: Option<String>,
    category: Option<String>,
    content_available: bool,
    mutable_content: bool,
}

impl DefaultNotificationBuilder {
    pub fn new() -> DefaultNotificationBuilder {
        Self::default()
    }

    pub fn set_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn set_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    /// The alert text.
    pub fn set_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The number on the app icon. Zero clears it.
    pub fn set_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    /// A sound file in the app bundle, or `default` for the system sound.
    pub fn set_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn set_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Selects the actions the app registered under this category.
    pub fn set_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Also wake the app in the background.
    pub fn set_content_available(mut self) -> Self {
        self.content_available = true;
        self
    }

    /// Let the app's notification service extension edit the content
    /// before it is shown.
    pub fn set_mutable_content(mut self) -> Self {
        self.mutable_content = true;
        self
    }
}

impl NotificationBuilder for DefaultNotificationBuilder {
    fn build<S>(self, device_token: S, options: NotificationOptions) -> Payload
    where
        S: Into<String>,
    {
        let alert = match (self.title, self.subtitle, self.body) {
            (None, None, None) => None,
            (None, None, Some(body)) => Some(Alert::Text(body)),
            (title, subtitle, body) => Some(Alert::Structured { title, subtitle, body }),
        };

        Payload {
            aps: APS {
                alert,
                badge: self.badge,
                sound: self.sound,
                thread_id: self.thread_id,
                category: self.category,
                content_available: self.content_available.then_some(1),
                mutable_content: self.mutable_content.then_some(1),
            },
            device_token: device_token.into(),
            options,
            data: BTreeMap::new(),
        }
    }
}
