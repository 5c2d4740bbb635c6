//! Value types for channels and background tasks

pub mod channel;
pub mod status;
pub mod task;

pub use channel::{
    ChannelEntity, ChannelKey, ChannelState, OuterState, SignedSubState, MISSING_SUB_STATE,
};
pub use status::{
    can_force_close, has_channel_without_position, has_open_position, is_closing,
    project_status, ChannelStatus,
};
pub use task::{BackgroundTask, TaskKind, TaskStatus};
