//! # apns-h2
//!
//! An asynchronous client for Apple push notifications, keeping all traffic
//! on a single multiplexed HTTP/2 connection.
//!
//! Notifications are signed with a provider token (JWT, ES256) created from
//! the private key, key id and team id of your [Apple developer
//! account](https://developer.apple.com/account/). The token is renewed well
//! before APNs stops accepting it.
//!
//! Every send resolves into a [`SendResult`](response::SendResult). Batches
//! come back in the order they were given, rejected notifications included,
//! and every failure is also published on the client's
//! [`EventEmitter`](events::EventEmitter).
//!
//! ## Example
//!
//! ```no_run
//! use apns_h2::{
//!     Client, ClientOptions, DefaultNotificationBuilder, Endpoint, ErrorReason, NotificationBuilder,
//!     NotificationOptions, Signer,
//! };
//! use std::fs::File;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signer = Signer::new(
//!         File::open("/path/to/private_key.p8")?,
//!         "KEY_ID",
//!         "TEAM_ID",
//!         Duration::from_secs(60 * 55),
//!     )?;
//!
//!     let options = ClientOptions::new(Endpoint::Production)
//!         .with_signer(signer)
//!         .with_default_topic("com.example.app");
//!
//!     let client = Client::new(options)?;
//!
//!     client.events().on(ErrorReason::BadDeviceToken, |result| {
//!         println!("forget {}", result.notification().get_device_token());
//!     });
//!
//!     let payloads = ["token-1", "token-2"].map(|token| {
//!         DefaultNotificationBuilder::new()
//!             .set_body("Hi there")
//!             .set_badge(420)
//!             .build(token, NotificationOptions::default())
//!     });
//!
//!     for result in client.send_many(payloads).await? {
//!         println!("{:?} {:?}", result.outcome(), result.reason());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod request;
pub mod response;
pub mod session;
pub mod signer;

mod pipeline;

#[cfg(test)]
mod testing;

pub use crate::request::notification::{
    CollapseId, DefaultNotificationBuilder, NotificationBuilder, NotificationOptions, Priority, PushType,
    SilentNotificationBuilder,
};

pub use crate::response::{ErrorBody, ErrorReason, Outcome, SendResult};

pub use crate::client::{Client, ClientOptions, Endpoint};
pub use crate::error::Error;
pub use crate::events::{Channel, EventEmitter, SubscriptionId};
pub use crate::session::SessionState;
pub use crate::signer::Signer;
