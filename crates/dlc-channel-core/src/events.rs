//! Inbound Event Types
//!
//! Typed events pushed by the transport-level backend into the client. Every event has
//! a [`EventKind`] discriminator that the [`EventDispatcher`](crate::EventDispatcher)
//! routes on.

use crate::model::{BackgroundTask, ChannelKey, ChannelState, OuterState, SignedSubState};
use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Channel Event
// ----------------------------------------------------------------------------

/// A DLC channel changed state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEvent {
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    pub outer_state: OuterState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_sub_state: Option<SignedSubState>,
}

impl ChannelEvent {
    pub fn new(
        reference_id: Option<String>,
        id: Option<String>,
        outer_state: OuterState,
        signed_sub_state: Option<SignedSubState>,
    ) -> Self {
        Self {
            reference_id,
            id,
            outer_state,
            signed_sub_state,
        }
    }

    /// A fresh offer, known only by its reference id
    pub fn offered<R: Into<String>>(reference_id: R) -> Self {
        Self::new(Some(reference_id.into()), None, OuterState::Offered, None)
    }

    /// A signed channel, optionally still carrying the reference id it was offered under
    pub fn signed<I: Into<String>>(
        reference_id: Option<String>,
        id: I,
        sub_state: SignedSubState,
    ) -> Self {
        Self::new(reference_id, Some(id.into()), OuterState::Signed, Some(sub_state))
    }

    /// A channel identified by id moving to a non-signed outer state
    pub fn outer<I: Into<String>>(id: I, outer_state: OuterState) -> Self {
        Self::new(None, Some(id.into()), outer_state, None)
    }

    /// The channel carries a resolved id that differs from its reference id
    pub fn promotes_reference(&self) -> bool {
        match (&self.reference_id, &self.id) {
            (Some(reference_id), Some(id)) => reference_id != id,
            _ => false,
        }
    }

    /// Map key under which this event is stored
    ///
    /// Offers are keyed by reference id, everything else by id. When the preferred
    /// identifier is missing the other one is used; `None` means the event is unkeyable.
    pub fn storage_key(&self) -> Option<ChannelKey> {
        let (preferred, fallback) = if self.outer_state == OuterState::Offered {
            (&self.reference_id, &self.id)
        } else {
            (&self.id, &self.reference_id)
        };
        preferred
            .as_deref()
            .or(fallback.as_deref())
            .map(ChannelKey::from)
    }

    /// The reference id key, if this event carries one
    pub fn reference_key(&self) -> Option<ChannelKey> {
        self.reference_id.as_deref().map(ChannelKey::from)
    }

    /// Convert into the sum-typed state, reporting anything that had to be adjusted
    pub fn state(&self) -> (ChannelState, Option<String>) {
        ChannelState::from_parts(self.outer_state.clone(), self.signed_sub_state.clone())
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel(ref={}, id={}, {}",
            self.reference_id.as_deref().unwrap_or("-"),
            self.id.as_deref().unwrap_or("-"),
            self.outer_state
        )?;
        if let Some(sub_state) = &self.signed_sub_state {
            write!(f, "/{}", sub_state)?;
        }
        write!(f, ")")
    }
}

// ----------------------------------------------------------------------------
// Client Event
// ----------------------------------------------------------------------------

/// Discriminator used to route events to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ChannelEvent,
    BackgroundTaskNotification,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::ChannelEvent => write!(f, "channel-event"),
            EventKind::BackgroundTaskNotification => write!(f, "background-task-notification"),
        }
    }
}

/// Events sent from the backend to the client core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    Channel(ChannelEvent),
    BackgroundTask(BackgroundTask),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Channel(_) => EventKind::ChannelEvent,
            ClientEvent::BackgroundTask(_) => EventKind::BackgroundTaskNotification,
        }
    }
}

impl From<ChannelEvent> for ClientEvent {
    fn from(event: ChannelEvent) -> Self {
        ClientEvent::Channel(event)
    }
}

impl From<BackgroundTask> for ClientEvent {
    fn from(task: BackgroundTask) -> Self {
        ClientEvent::BackgroundTask(task)
    }
}
