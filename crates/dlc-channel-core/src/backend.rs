//! Backend command interface
//!
//! The client never builds contracts or talks to the chain itself. Everything that
//! changes a channel on the protocol level goes through a [`ChannelBackend`], and the
//! resulting state changes come back later as [`ChannelEvent`](crate::ChannelEvent)s.

use async_trait::async_trait;
use core::fmt;

use crate::errors::CommandError;
use crate::model::ChannelEntity;

// ----------------------------------------------------------------------------
// Backend Trait
// ----------------------------------------------------------------------------

/// Outbound commands understood by the DLC backend
#[async_trait]
pub trait ChannelBackend: Send + Sync {
    /// Fetch every channel the backend knows about
    async fn list_channels(&self) -> Result<Vec<ChannelEntity>, CommandError>;

    /// Delete a channel from the backend
    async fn delete_channel(&self, channel_id: &str) -> Result<(), CommandError>;

    /// Send a renew offer carrying the new collateral split
    async fn renew_channel(
        &self,
        channel_id: &str,
        offer_collateral: u64,
        accept_collateral: u64,
    ) -> Result<(), CommandError>;
}

// ----------------------------------------------------------------------------
// Command Names
// ----------------------------------------------------------------------------

/// Outbound command identifiers used in logs and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCommand {
    ListChannels,
    DeleteChannel,
    RenewChannel,
}

impl BackendCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendCommand::ListChannels => "listChannels",
            BackendCommand::DeleteChannel => "deleteChannel",
            BackendCommand::RenewChannel => "renewChannel",
        }
    }
}

impl fmt::Display for BackendCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
