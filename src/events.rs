//! Failure events published per client.
//!
//! Every failed [`SendResult`] is published twice: once on [`Channel::Error`]
//! and once on the channel of its reason, so a subscriber can follow e.g. all
//! `badDeviceToken` failures without filtering the generic channel.
//!
//! ```rust
//! # use apns_h2::events::{Channel, EventEmitter};
//! # use apns_h2::response::ErrorReason;
//! let events = EventEmitter::default();
//!
//! let id = events.on(ErrorReason::BadDeviceToken, |result| {
//!     println!("stale token: {}", result.notification().get_device_token());
//! });
//! events.once(Channel::Error, |result| println!("first failure: {:?}", result.reason()));
//!
//! assert!(events.off(id));
//! ```

use crate::response::{ErrorReason, SendResult};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A named channel failures are published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Every failure, whatever the reason.
    Error,
    /// Only failures with the given reason.
    Reason(ErrorReason),
}

impl Channel {
    /// `error` for the generic channel, the camelCase reason otherwise.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Error => "error",
            Channel::Reason(reason) => reason.channel_name(),
        }
    }
}

impl From<ErrorReason> for Channel {
    fn from(reason: ErrorReason) -> Self {
        Channel::Reason(reason)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SendResult) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    channel: Channel,
    handler: Handler,
    once: bool,
}

/// Observer registry for failure events. Handlers run synchronously on the
/// task that resolved the failure, so they should be quick.
#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventEmitter {
    /// Calls `handler` for every failure published on `channel`.
    pub fn on<C, F>(&self, channel: C, handler: F) -> SubscriptionId
    where
        C: Into<Channel>,
        F: Fn(&SendResult) + Send + Sync + 'static,
    {
        self.subscribe(channel.into(), Arc::new(handler), false)
    }

    /// Calls `handler` for the next failure published on `channel` only.
    pub fn once<C, F>(&self, channel: C, handler: F) -> SubscriptionId
    where
        C: Into<Channel>,
        F: Fn(&SendResult) + Send + Sync + 'static,
    {
        self.subscribe(channel.into(), Arc::new(handler), true)
    }

    /// Unregisters a handler. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);

        subscriptions.len() != before
    }

    pub fn listener_count(&self, channel: impl Into<Channel>) -> usize {
        let channel = channel.into();
        self.subscriptions.lock().iter().filter(|s| s.channel == channel).count()
    }

    /// Publishes a failed result on the generic channel, then on its reason
    /// channel. Successful results are ignored.
    pub(crate) fn emit_failure(&self, result: &SendResult) {
        let Some(reason) = result.reason() else {
            return;
        };

        tracing::trace!(reason = %reason, "publishing failure");

        self.emit(Channel::Error, result);
        self.emit(Channel::Reason(reason), result);
    }

    fn subscribe(&self, channel: Channel, handler: Handler, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.subscriptions.lock().push(Subscription {
            id,
            channel,
            handler,
            once,
        });

        id
    }

    fn emit(&self, channel: Channel, result: &SendResult) {
        // Handlers run outside the lock so they can (un)subscribe themselves.
        let handlers: Vec<Handler> = {
            let mut subscriptions = self.subscriptions.lock();
            let handlers = subscriptions
                .iter()
                .filter(|s| s.channel == channel)
                .map(|s| s.handler.clone())
                .collect();

            subscriptions.retain(|s| !(s.once && s.channel == channel));
            handlers
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(result))).is_err() {
                tracing::warn!(channel = %channel, "event handler panicked");
            }
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish()
    }
}
