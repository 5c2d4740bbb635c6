//! Event Dispatcher
//!
//! Routes [`ClientEvent`]s to the subscribers registered for their [`EventKind`].
//! Delivery is synchronous and in subscription order. Subscribers receive mutable access
//! to a shared state object `S` that the caller owns, so the dispatcher itself holds no
//! channel or task state.
//!
//! A subscriber that returns an error or panics is reported in the [`DispatchReport`];
//! the remaining subscribers still receive the event.

use crate::events::{ClientEvent, EventKind};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, warn};

type Callback<S> = Box<dyn FnMut(&mut S, &ClientEvent) -> Result<(), String> + Send>;

struct Subscriber<S> {
    id: String,
    kind: EventKind,
    callback: Callback<S>,
}

/// A subscriber that failed to handle an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberFailure {
    pub subscriber: String,
    pub reason: String,
}

/// Result of delivering one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub kind: EventKind,
    /// Subscribers that handled the event successfully
    pub delivered: usize,
    pub failures: Vec<SubscriberFailure>,
}

impl DispatchReport {
    /// No subscriber was registered for the event kind
    pub fn dropped(&self) -> bool {
        self.delivered == 0 && self.failures.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Kind-based fan-out of client events
pub struct EventDispatcher<S> {
    subscribers: Vec<Subscriber<S>>,
}

impl<S> Default for EventDispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> EventDispatcher<S> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register `callback` for every event of `kind`
    ///
    /// Subscriber ids are labels for reporting; registering the same id twice adds a
    /// second subscription.
    pub fn subscribe<I, F>(&mut self, id: I, kind: EventKind, callback: F)
    where
        I: Into<String>,
        F: FnMut(&mut S, &ClientEvent) -> Result<(), String> + Send + 'static,
    {
        let id = id.into();
        debug!(subscriber = %id, kind = %kind, "Subscriber registered");
        self.subscribers.push(Subscriber {
            id,
            kind,
            callback: Box::new(callback),
        });
    }

    /// Remove all subscriptions registered under `id`
    pub fn unsubscribe(&mut self, id: &str) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|subscriber| subscriber.id != id);
        before - self.subscribers.len()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .iter()
            .filter(|subscriber| subscriber.kind == kind)
            .count()
    }

    /// Deliver `event` to every subscriber of its kind
    pub fn dispatch(&mut self, state: &mut S, event: &ClientEvent) -> DispatchReport {
        let kind = event.kind();
        let mut report = DispatchReport {
            kind,
            delivered: 0,
            failures: Vec::new(),
        };

        for subscriber in self.subscribers.iter_mut().filter(|s| s.kind == kind) {
            let callback = &mut subscriber.callback;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(state, event)));

            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(reason)) => {
                    warn!(subscriber = %subscriber.id, kind = %kind, %reason, "Subscriber failed to handle event");
                    report.failures.push(SubscriberFailure {
                        subscriber: subscriber.id.clone(),
                        reason,
                    });
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!(subscriber = %subscriber.id, kind = %kind, %reason, "Subscriber panicked while handling event");
                    report.failures.push(SubscriberFailure {
                        subscriber: subscriber.id.clone(),
                        reason: format!("panicked: {}", reason),
                    });
                }
            }
        }

        if report.dropped() {
            debug!(kind = %kind, "No subscriber for event, dropping");
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
