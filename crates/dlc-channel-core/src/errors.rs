//! Error types for the DLC channel client
//!
//! This module contains all error types used throughout the channel client core,
//! including reconciliation errors, outbound command failures, funding-fee errors,
//! background task errors, and the main ChannelClientError type that unifies them all.

use crate::model::channel::ChannelKey;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Reconciliation errors raised while applying channel events
///
/// These are recovered locally by the store: they are logged and a defensive default
/// is applied. They never abort the event-consumption loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("Reconciliation conflict for {key}: {reason}")]
    Conflict { key: ChannelKey, reason: String },
    #[error("Channel event carries neither an id nor a reference id")]
    Unkeyable,
    #[error("Unknown channel state {state:?} for {key}")]
    UnknownState { key: ChannelKey, state: String },
    #[error("More than one signed channel is active: {channels:?}")]
    MultipleSignedChannels { channels: Vec<String> },
}

/// Outbound command failures
///
/// Local state is left unchanged whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Backend rejected {command}: {reason}")]
    Backend { command: String, reason: String },
    #[error("Transport failure during {command}: {reason}")]
    Transport { command: String, reason: String },
    #[error("Command {command} for {channel_id} is already in flight")]
    AlreadyInFlight { command: String, channel_id: String },
    #[error("Runtime is shut down")]
    Shutdown,
}

/// Funding-fee renewal errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FundingError {
    #[error(
        "Funding fee of {fee_sats} sats violates collateral invariant: payer has {payer_collateral} sats"
    )]
    FundingFeeViolatesCollateralInvariant { fee_sats: u64, payer_collateral: u64 },
    #[error("Cannot compute funding fee with index price {price}")]
    InvalidIndexPrice { price: String },
    #[error("No active signed channel to renew")]
    NoActiveChannel,
    #[error("Channel {channel_id} cannot be renewed in state {state}")]
    ChannelNotRenewable { channel_id: String, state: String },
    #[error("Funding fee does not fit into a satoshi amount: {reason}")]
    Overflow { reason: String },
}

/// Background task tracker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("No background task is being displayed")]
    NothingDisplayed,
    #[error("Task {kind} is still pending and cannot be dismissed for another {remaining_ms}ms")]
    DismissNotAllowed { kind: String, remaining_ms: u64 },
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} cannot be zero")]
    Zero { field: &'static str },
    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the DLC channel client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelClientError {
    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Funding error: {0}")]
    Funding(#[from] FundingError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Channel communication error between the runtime and its callers
    #[error("Channel error: {message}")]
    Channel { message: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ChannelClientError {
    /// Create a backend rejection for the named command
    pub fn backend<C: Into<String>, R: Into<String>>(command: C, reason: R) -> Self {
        ChannelClientError::Command(CommandError::backend(command, reason))
    }

    /// Create a transport failure for the named command
    pub fn transport<C: Into<String>, R: Into<String>>(command: C, reason: R) -> Self {
        ChannelClientError::Command(CommandError::Transport {
            command: command.into(),
            reason: reason.into(),
        })
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        ChannelClientError::Channel {
            message: message.into(),
        }
    }

    /// Whether this error came from an outbound command
    pub fn is_command_failure(&self) -> bool {
        matches!(self, ChannelClientError::Command(_))
    }
}

impl CommandError {
    pub fn backend<C: Into<String>, R: Into<String>>(command: C, reason: R) -> Self {
        CommandError::Backend {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ChannelClientError>;
pub type ClientResult<T> = Result<T>;
