//! Channel Utilities for the Runtime
//!
//! Bounded tokio channels connecting the runtime handle, the backend event feed, spawned
//! outbound commands and the application with the core logic task.

use dlc_channel_core::{ChannelConfig, ClientEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::commands::{AppEvent, Completion, RuntimeCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel buffer is full")]
    ChannelFull,
    #[error("Channel is closed")]
    ChannelClosed,
}

impl<T> From<TrySendError<T>> for ChannelError {
    fn from(error: TrySendError<T>) -> Self {
        match error {
            TrySendError::Full(_) => ChannelError::ChannelFull,
            TrySendError::Closed(_) => ChannelError::ChannelClosed,
        }
    }
}

pub type CommandSender = mpsc::Sender<RuntimeCommand>;
pub type CommandReceiver = mpsc::Receiver<RuntimeCommand>;
pub type EventSender = mpsc::Sender<ClientEvent>;
pub type EventReceiver = mpsc::Receiver<ClientEvent>;
pub type CompletionSender = mpsc::Sender<Completion>;
pub type CompletionReceiver = mpsc::Receiver<Completion>;
pub type AppEventSender = mpsc::Sender<AppEvent>;
pub type AppEventReceiver = mpsc::Receiver<AppEvent>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create bounded command channel (Runtime handle → Core Logic)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

/// Create bounded event channel (Backend → Core Logic)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

/// Create bounded completion channel (Outbound commands → Core Logic)
pub fn create_completion_channel(config: &ChannelConfig) -> (CompletionSender, CompletionReceiver) {
    mpsc::channel(config.completion_buffer_size)
}

/// Create bounded app event channel (Core Logic → Application)
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    mpsc::channel(config.app_event_buffer_size)
}

// ----------------------------------------------------------------------------
// Non-blocking Send Utilities
// ----------------------------------------------------------------------------

/// Send without waiting for buffer space
///
/// Used wherever the sender must not stall: the core logic task towards a slow
/// application, and synchronous backend callbacks feeding events in.
pub trait NonBlockingSend<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError>;
}

impl NonBlockingSend<ClientEvent> for EventSender {
    fn try_send_non_blocking(&self, event: ClientEvent) -> Result<(), ChannelError> {
        self.try_send(event).map_err(ChannelError::from)
    }
}

impl NonBlockingSend<AppEvent> for AppEventSender {
    fn try_send_non_blocking(&self, event: AppEvent) -> Result<(), ChannelError> {
        self.try_send(event).map_err(ChannelError::from)
    }
}
