//! DLC Channel Client Runtime
//!
//! This crate runs the channel client:
//! - `CoreLogicTask`: the single consumer of backend events and runtime commands
//! - `RuntimeBuilder` / `RuntimeHandle`: wiring, lifecycle and the caller-facing API
//! - channel helpers and the messages flowing through them
//!
//! The state machines themselves live in `dlc-channel-core`.

pub mod builder;
pub mod channels;
pub mod commands;
pub mod logging;
pub mod logic;

pub use builder::{create_test_runtime, RuntimeBuilder, RuntimeHandle};
pub use channels::{
    create_app_event_channel, create_command_channel, create_completion_channel,
    create_event_channel, AppEventReceiver, AppEventSender, ChannelError, CommandReceiver,
    CommandSender, CompletionReceiver, CompletionSender, EventReceiver, EventSender,
    NonBlockingSend,
};
pub use commands::{AppEvent, Completion, Reply, RuntimeCommand};
pub use logging::{setup_logging, try_setup_logging};
pub use logic::{ClientState, CommandHandlers, CoreChannels, CoreLogicTask, CoreStats};

// Re-export core types for convenience
pub use dlc_channel_core::{
    BackgroundTask, ChannelBackend, ChannelClientError, ChannelEntity, ChannelEvent,
    ChannelStatus, ClientConfig, ClientEvent, ClientResult, CommandError, RenewalOutcome,
    RenewalRequest, TaskKind,
};
