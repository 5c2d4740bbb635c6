//! Runtime Messages
//!
//! Types flowing through the runtime's channels:
//! - `RuntimeCommand`: requests from the [`RuntimeHandle`](crate::RuntimeHandle), answered
//!   over a oneshot reply
//! - `Completion`: the backend's answer to a spawned outbound command
//! - `AppEvent`: notifications for the application

use core::fmt;
use dlc_channel_core::{
    BackendCommand, BackgroundTask, ChannelEntity, ChannelStatus, ClientResult, CommandError,
    EventKind, FundingFeeEvent, RenewOffer, RenewalOutcome, RenewalRequest, StoreUpdate,
    SubscriberFailure, TaskUpdate,
};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::logic::CoreStats;

pub type Reply<T> = oneshot::Sender<ClientResult<T>>;

// ----------------------------------------------------------------------------
// Runtime Commands
// ----------------------------------------------------------------------------

/// Requests processed by the core logic task
#[derive(Debug)]
pub enum RuntimeCommand {
    /// Delete a channel on the backend, then locally
    DeleteChannel {
        channel_id: String,
        reply: Reply<()>,
    },
    /// Settle a funding period by renewing the active channel
    RenewWithFundingFee {
        request: RenewalRequest,
        reply: Reply<RenewalOutcome>,
    },
    GetChannels {
        reply: oneshot::Sender<Vec<ChannelEntity>>,
    },
    GetChannelStatus {
        reply: oneshot::Sender<ChannelStatus>,
    },
    PeekTask {
        reply: oneshot::Sender<Option<BackgroundTask>>,
    },
    DisplayNextTask {
        reply: oneshot::Sender<Option<BackgroundTask>>,
    },
    DismissTask {
        reply: Reply<BackgroundTask>,
    },
    GetStats {
        reply: oneshot::Sender<CoreStats>,
    },
    Shutdown,
}

impl RuntimeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeCommand::DeleteChannel { .. } => "deleteChannel",
            RuntimeCommand::RenewWithFundingFee { .. } => "renewWithFundingFee",
            RuntimeCommand::GetChannels { .. } => "getChannels",
            RuntimeCommand::GetChannelStatus { .. } => "getChannelStatus",
            RuntimeCommand::PeekTask { .. } => "peekTask",
            RuntimeCommand::DisplayNextTask { .. } => "displayNextTask",
            RuntimeCommand::DismissTask { .. } => "dismissTask",
            RuntimeCommand::GetStats { .. } => "getStats",
            RuntimeCommand::Shutdown => "shutdown",
        }
    }
}

// ----------------------------------------------------------------------------
// Command Completions
// ----------------------------------------------------------------------------

/// Result of an outbound command, routed back into the core logic task
#[derive(Debug)]
pub enum Completion {
    Deleted {
        command_id: Uuid,
        channel_id: String,
        result: Result<(), CommandError>,
        reply: Reply<()>,
    },
    Renewed {
        command_id: Uuid,
        offer: RenewOffer,
        result: Result<(), CommandError>,
        reply: Reply<RenewalOutcome>,
    },
}

impl Completion {
    pub fn command_id(&self) -> Uuid {
        match self {
            Completion::Deleted { command_id, .. } | Completion::Renewed { command_id, .. } => {
                *command_id
            }
        }
    }

    pub fn command(&self) -> BackendCommand {
        match self {
            Completion::Deleted { .. } => BackendCommand::DeleteChannel,
            Completion::Renewed { .. } => BackendCommand::RenewChannel,
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            Completion::Deleted { channel_id, .. } => channel_id,
            Completion::Renewed { offer, .. } => &offer.channel_id,
        }
    }
}

// ----------------------------------------------------------------------------
// Application Events
// ----------------------------------------------------------------------------

/// Notifications emitted by the core logic task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The coarse channel status moved
    ChannelStatusChanged {
        previous: ChannelStatus,
        current: ChannelStatus,
    },
    /// The background task tracker took a notification
    TaskUpdated(TaskUpdate),
    ChannelDeleted {
        channel_id: String,
    },
    FundingFeeApplied {
        channel_id: String,
        event: FundingFeeEvent,
    },
    CommandFailed {
        command: BackendCommand,
        channel_id: String,
        error: CommandError,
    },
    /// Some subscribers failed to handle an event
    SubscriberFailed {
        kind: EventKind,
        failures: Vec<SubscriberFailure>,
    },
    /// A store mutation, forwarded when enabled in the monitoring config
    StoreUpdated(StoreUpdate),
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppEvent::ChannelStatusChanged { previous, current } => {
                write!(f, "status {} -> {}", previous, current)
            }
            AppEvent::TaskUpdated(update) => write!(f, "task {:?}", update),
            AppEvent::ChannelDeleted { channel_id } => write!(f, "deleted {}", channel_id),
            AppEvent::FundingFeeApplied { channel_id, event } => {
                write!(f, "funding fee {} sats on {}", event.amount_sats, channel_id)
            }
            AppEvent::CommandFailed {
                command,
                channel_id,
                error,
            } => write!(f, "{} on {} failed: {}", command, channel_id, error),
            AppEvent::SubscriberFailed { kind, failures } => {
                write!(f, "{} subscriber(s) failed on {}", failures.len(), kind)
            }
            AppEvent::StoreUpdated(update) => write!(f, "store revision {}", update.revision),
        }
    }
}
