//! Payload with `aps` and custom data

use crate::error::Error;
use crate::request::notification::NotificationOptions;
use erased_serde::Serialize as ErasedSerialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Anything that can be sent as a notification: a device token, request
/// options and a JSON body.
///
/// Implemented by [`Payload`], which both notification builders produce.
/// Custom types can implement it to send a body of their own shape.
pub trait PayloadLike: ErasedSerialize + Debug + Send + Sync {
    /// Returns the device token of the payload.
    fn get_device_token(&self) -> &str;

    /// Returns the options of the payload.
    fn get_options(&self) -> &NotificationOptions;

    /// Serializes the payload into the JSON request body.
    fn to_json_string(&self) -> Result<String, Error> {
        let mut json = Vec::with_capacity(256);
        erased_serde::serialize(self, &mut serde_json::Serializer::new(&mut json))?;

        // serde_json only ever writes UTF-8
        Ok(String::from_utf8_lossy(&json).into_owned())
    }
}

/// The data and options for a push notification.
#[derive(Serialize, Debug, Clone)]
pub struct Payload {
    /// Send options
    #[serde(skip)]
    pub options: NotificationOptions,
    /// The token for the receiving device
    #[serde(skip)]
    pub device_token: String,
    /// The pre-defined notification payload
    pub aps: APS,
    /// Application specific payload
    #[serde(flatten)]
    pub data: BTreeMap<String, Value>,
}

impl Payload {
    /// Client-specific custom data to be added in the payload.
    /// The `root_key` defines the JSON key in the root of the request
    /// data, and `data` the object containing custom data. The `data`
    /// should implement `Serialize`, which allows using of any Rust
    /// collection or if needing more strict type definitions, any struct
    /// that has `#[derive(Serialize)]` from [Serde](https://serde.rs).
    ///
    /// ```rust
    /// # use apns_h2::request::notification::{SilentNotificationBuilder, NotificationBuilder};
    /// # use apns_h2::request::payload::PayloadLike;
    /// # use std::collections::HashMap;
    /// # fn main() {
    /// let mut payload = SilentNotificationBuilder::new()
    ///     .build("token", Default::default());
    /// let mut custom_data = HashMap::new();
    ///
    /// custom_data.insert("foo", "bar");
    /// payload.add_custom_data("foo_data", &custom_data).unwrap();
    ///
    /// assert_eq!(
    ///     "{\"aps\":{\"content-available\":1},\"foo_data\":{\"foo\":\"bar\"}}",
    ///     &payload.to_json_string().unwrap()
    /// );
    /// # }
    /// ```
    pub fn add_custom_data(&mut self, root_key: impl Into<String>, data: &dyn ErasedSerialize) -> Result<&mut Self, Error> {
        let value = erased_serde::serialize(data, serde_json::value::Serializer)?;
        self.data.insert(root_key.into(), value);

        Ok(self)
    }
}

impl PayloadLike for Payload {
    fn get_device_token(&self) -> &str {
        &self.device_token
    }

    fn get_options(&self) -> &NotificationOptions {
        &self.options
    }
}

/// The `aps` dictionary APNs reads.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[allow(clippy::upper_case_acronyms)]
pub struct APS {
    /// Absent for silent notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,

    /// Name of a sound file in the app bundle, or `default`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,

    /// Groups notifications of one conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// `1` wakes the app in the background.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_available: Option<u8>,

    /// `1` hands the notification to the app's service extension first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutable_content: Option<u8>,
}

/// The visible part of a notification.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Alert {
    /// Shown as the body, under the app name.
    Text(String),
    Structured {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        subtitle: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::notification::{DefaultNotificationBuilder, NotificationBuilder};
    use serde_json::json;

    #[derive(Serialize, Debug)]
    struct CustomPayload {
        #[serde(skip)]
        device_token: String,
        #[serde(skip)]
        options: NotificationOptions,
        greeting: &'static str,
    }

    impl PayloadLike for CustomPayload {
        fn get_device_token(&self) -> &str {
            &self.device_token
        }

        fn get_options(&self) -> &NotificationOptions {
            &self.options
        }
    }

    #[test]
    fn test_custom_payload_like() {
        let payload = CustomPayload {
            device_token: "device-token".into(),
            options: Default::default(),
            greeting: "hello",
        };

        let boxed: Box<dyn PayloadLike> = Box::new(payload);

        assert_eq!("device-token", boxed.get_device_token());
        assert_eq!(json!({ "greeting": "hello" }).to_string(), boxed.to_json_string().unwrap());
    }

    #[test]
    fn test_custom_data_is_flattened_next_to_aps() {
        let mut payload = DefaultNotificationBuilder::new()
            .set_body("hi")
            .build("device-token", Default::default());

        payload.add_custom_data("url", &"venue/icon").unwrap();

        let value: Value = serde_json::from_str(&payload.to_json_string().unwrap()).unwrap();

        assert_eq!(json!({ "aps": { "alert": "hi" }, "url": "venue/icon" }), value);
    }
}
