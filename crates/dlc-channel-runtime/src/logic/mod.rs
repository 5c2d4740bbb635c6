//! Core Logic Module
//!
//! The core logic task is split into focused components:
//! - `state`: client state owned by the task and its statistics
//! - `handlers`: state-touching command and completion handlers
//! - `task`: the `CoreLogicTask` event loop and outbound command plumbing
//!
//! All channel and task state is owned by one task and mutated in one place, so the
//! store and tracker need no locking. The only asynchronous edge is an outbound command
//! waiting on the backend; its completion is applied on the task like any event.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::CommandHandlers;
pub use state::{ClientState, CoreStats};
pub use task::{CoreChannels, CoreLogicTask};
