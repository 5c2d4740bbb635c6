//! DLC Channel Client Core
//!
//! This crate keeps a consistent local view of a trader's DLC channels while protocol
//! events and outbound commands flow through the client:
//! - `store`: reconciles channel events into the channel map and derives the coarse status
//! - `tracker`: queues background task notifications for display
//! - `dispatcher`: routes typed backend events to their subscribers
//! - `funding`: settles funding fees through channel renewals
//!
//! The event loop that drives these lives in `dlc-channel-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod funding;
pub mod model;
pub mod recovery;
pub mod store;
pub mod tracker;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use backend::{BackendCommand, ChannelBackend};
pub use config::{ChannelConfig, ClientConfig, FundingConfig, MonitoringConfig, TaskTrackerConfig};
pub use dispatcher::{DispatchReport, EventDispatcher, SubscriberFailure};
pub use errors::{
    ChannelClientError, ClientResult, CommandError, ConfigError, FundingError,
    ReconciliationError, Result, TaskError,
};
pub use events::{ChannelEvent, ClientEvent, EventKind};
pub use funding::{
    calculate_funding_fee, CollateralSplit, FundingFee, FundingFeeEvent,
    FundingFeeRenewalProtocol, FundingRate, RenewOffer, RenewalOutcome, RenewalPlan,
    RenewalRequest,
};
pub use model::{
    BackgroundTask, ChannelEntity, ChannelKey, ChannelState, ChannelStatus, OuterState,
    SignedSubState, TaskKind, TaskStatus,
};
pub use recovery::RecoveryMonitor;
pub use store::{ApplyOutcome, ChannelStateStore, ListenerId, StoreChange, StoreUpdate};
pub use tracker::{BackgroundTaskTracker, DisplayedTask, TaskConflict, TaskStack, TaskUpdate};
pub use types::{ChannelParty, Direction, SystemTimeSource, TimeSource, Timestamp};
