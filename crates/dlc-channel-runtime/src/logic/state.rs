//! Core Logic State Management
//!
//! Contains the client state owned by the core logic task and its statistics.

use dlc_channel_core::{
    BackgroundTaskTracker, ChannelStateStore, ClientConfig, FundingFeeRenewalProtocol,
    RecoveryMonitor, TimeSource,
};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Client State
// ----------------------------------------------------------------------------

/// Everything the core logic task owns
///
/// Only the core logic task holds a `ClientState`; readers get snapshots through
/// runtime commands.
pub struct ClientState {
    pub store: ChannelStateStore,
    pub tracker: BackgroundTaskTracker,
    pub recovery: RecoveryMonitor,
    pub funding: FundingFeeRenewalProtocol,
    pub stats: CoreStats,
}

impl ClientState {
    pub fn new(config: &ClientConfig, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            store: ChannelStateStore::new(time_source.clone()),
            tracker: BackgroundTaskTracker::new(config.tasks.clone(), time_source.clone()),
            recovery: RecoveryMonitor::new(),
            funding: FundingFeeRenewalProtocol::new(config.funding.clone(), time_source),
            stats: CoreStats::default(),
        }
    }
}

/// Statistics for the core logic task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreStats {
    pub events_processed: u64,
    /// Events no subscriber was registered for
    pub events_dropped: u64,
    pub subscriber_failures: u64,
    pub commands_processed: u64,
    pub commands_rejected: u64,
    pub outbound_commands: u64,
    pub outbound_failures: u64,
    pub app_events_generated: u64,
    /// App events lost because the application was not draining its receiver
    pub app_events_dropped: u64,
}
