//! Test doubles for deterministic testing
//!
//! [`MockTimeSource`] lets tests move the clock by hand. [`MockBackend`] records every
//! outbound command, returns scripted results and can hold a command "in flight" until
//! the test releases it.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, Semaphore};

use crate::backend::{BackendCommand, ChannelBackend};
use crate::errors::CommandError;
use crate::model::ChannelEntity;
use crate::types::{TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a new mock time source starting at time 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new mock time source starting at a specific time
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Mock Backend
// ----------------------------------------------------------------------------

/// An outbound command observed by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListChannels,
    DeleteChannel {
        channel_id: String,
    },
    RenewChannel {
        channel_id: String,
        offer_collateral: u64,
        accept_collateral: u64,
    },
}

#[derive(Default)]
struct MockBackendState {
    channels: Vec<ChannelEntity>,
    list_failure: Option<CommandError>,
    delete_results: VecDeque<Result<(), CommandError>>,
    renew_results: VecDeque<Result<(), CommandError>>,
    calls: Vec<BackendCall>,
}

/// Scriptable in-memory backend
///
/// Unscripted commands succeed. Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockBackendState>>,
    delete_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    delete_started: Arc<Notify>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that reports `channels` from `list_channels`
    pub fn with_channels(channels: Vec<ChannelEntity>) -> Self {
        let backend = Self::new();
        backend.lock().channels = channels;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockBackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `list_channels` fail with `error`
    pub fn fail_list(&self, error: CommandError) {
        self.lock().list_failure = Some(error);
    }

    /// Queue the result of the next `delete_channel` call
    pub fn push_delete_result(&self, result: Result<(), CommandError>) {
        self.lock().delete_results.push_back(result);
    }

    /// Queue the result of the next `renew_channel` call
    pub fn push_renew_result(&self, result: Result<(), CommandError>) {
        self.lock().renew_results.push_back(result);
    }

    /// Hold every following `delete_channel` call until [`release_delete`](Self::release_delete)
    pub fn hold_deletes(&self) {
        let mut gate = self
            .delete_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let one held `delete_channel` call complete
    pub fn release_delete(&self) {
        let gate = self
            .delete_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(semaphore) = gate.as_ref() {
            semaphore.add_permits(1);
        }
    }

    /// Wait until a `delete_channel` call has reached the backend
    pub async fn delete_started(&self) {
        self.delete_started.notified().await;
    }

    /// Every command received so far, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, command: BackendCommand) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| {
                matches!(
                    (command, call),
                    (BackendCommand::ListChannels, BackendCall::ListChannels)
                        | (BackendCommand::DeleteChannel, BackendCall::DeleteChannel { .. })
                        | (BackendCommand::RenewChannel, BackendCall::RenewChannel { .. })
                )
            })
            .count()
    }
}

#[async_trait]
impl ChannelBackend for MockBackend {
    async fn list_channels(&self) -> Result<Vec<ChannelEntity>, CommandError> {
        let mut state = self.lock();
        state.calls.push(BackendCall::ListChannels);
        match state.list_failure.clone() {
            Some(error) => Err(error),
            None => Ok(state.channels.clone()),
        }
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), CommandError> {
        let result = {
            let mut state = self.lock();
            state.calls.push(BackendCall::DeleteChannel {
                channel_id: channel_id.to_string(),
            });
            state.delete_results.pop_front().unwrap_or(Ok(()))
        };
        self.delete_started.notify_one();

        let gate = self
            .delete_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(semaphore) = gate {
            let permit = semaphore.acquire().await.map_err(|_| CommandError::Transport {
                command: BackendCommand::DeleteChannel.to_string(),
                reason: "mock gate closed".to_string(),
            })?;
            permit.forget();
        }
        result
    }

    async fn renew_channel(
        &self,
        channel_id: &str,
        offer_collateral: u64,
        accept_collateral: u64,
    ) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.calls.push(BackendCall::RenewChannel {
            channel_id: channel_id.to_string(),
            offer_collateral,
            accept_collateral,
        });
        state.renew_results.pop_front().unwrap_or(Ok(()))
    }
}
