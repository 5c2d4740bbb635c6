//! Runtime Builder API
//!
//! Provides a builder-style API for applications and tests to wire a channel backend
//! into the core logic task and get a handle for commands, backend events and app events.
//!
//! The handle is the explicit context object of the client: it is created by
//! [`RuntimeBuilder::build_and_start`], which loads the channel list before anything
//! else runs, and ends with [`RuntimeHandle::shutdown`].

use dlc_channel_core::{
    BackgroundTask, ChannelBackend, ChannelClientError, ChannelEntity, ChannelStatus,
    ClientConfig, ClientEvent, ClientResult, CommandError, EventKind, RenewalOutcome,
    RenewalRequest, SystemTimeSource, TimeSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channels::{
    create_app_event_channel, create_command_channel, create_completion_channel,
    create_event_channel, AppEventReceiver, ChannelError, CommandSender, EventSender,
    NonBlockingSend,
};
use crate::commands::RuntimeCommand;
use crate::logic::{ClientState, CoreChannels, CoreLogicTask, CoreStats};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriber = Box<dyn FnMut(&mut ClientState, &ClientEvent) -> Result<(), String> + Send>;

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for the channel client runtime
pub struct RuntimeBuilder {
    backend: Arc<dyn ChannelBackend>,
    config: ClientConfig,
    time_source: Arc<dyn TimeSource>,
    subscribers: Vec<(String, EventKind, Subscriber)>,
}

impl RuntimeBuilder {
    /// Create a new runtime builder around a backend
    pub fn new(backend: Arc<dyn ChannelBackend>) -> Self {
        Self {
            backend,
            config: ClientConfig::default(),
            time_source: Arc::new(SystemTimeSource::new()),
            subscribers: Vec::new(),
        }
    }

    /// Set the client configuration
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom time source (tests use a mock clock)
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Register an extra event subscriber, run after the built-in ones
    pub fn with_subscriber<F>(mut self, id: &str, kind: EventKind, callback: F) -> Self
    where
        F: FnMut(&mut ClientState, &ClientEvent) -> Result<(), String> + Send + 'static,
    {
        self.subscribers
            .push((id.to_string(), kind, Box::new(callback)));
        self
    }

    /// Validate the configuration, load the channel list and start the core logic task
    pub async fn build_and_start(self) -> ClientResult<RuntimeHandle> {
        self.config.validate()?;
        let instance_id = Uuid::new_v4();
        info!(%instance_id, "Building channel client runtime");

        let channel_config = &self.config.channels;
        let (command_sender, command_receiver) = create_command_channel(channel_config);
        let (event_sender, event_receiver) = create_event_channel(channel_config);
        let (completion_sender, completion_receiver) = create_completion_channel(channel_config);
        let (app_event_sender, app_event_receiver) = create_app_event_channel(channel_config);

        let state = ClientState::new(&self.config, self.time_source.clone());
        let mut task = CoreLogicTask::new(
            state,
            self.backend,
            &self.config,
            CoreChannels {
                command_receiver,
                event_receiver,
                completion_sender,
                completion_receiver,
                app_event_sender,
            },
        );
        for (id, kind, callback) in self.subscribers {
            task.subscribe(&id, kind, callback);
        }

        // Nothing is served before the store mirrors the backend
        task.initialize().await?;

        let task_handle = tokio::spawn(task.run());
        info!(%instance_id, "Channel client runtime started");

        Ok(RuntimeHandle {
            instance_id,
            command_sender,
            event_sender,
            app_event_receiver: Some(app_event_receiver),
            task_handle: Some(task_handle),
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running channel client
pub struct RuntimeHandle {
    instance_id: Uuid,
    command_sender: CommandSender,
    event_sender: EventSender,
    app_event_receiver: Option<AppEventReceiver>,
    task_handle: Option<JoinHandle<ClientResult<CoreStats>>>,
}

impl RuntimeHandle {
    /// Identifier of this runtime instance, as logged at startup
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Sender for backend events; hand this to the backend's event feed
    pub fn event_sender(&self) -> EventSender {
        self.event_sender.clone()
    }

    /// Feed one backend event, waiting for buffer space
    pub async fn send_event(&self, event: impl Into<ClientEvent>) -> ClientResult<()> {
        self.event_sender
            .send(event.into())
            .await
            .map_err(|_| ChannelClientError::channel_error("Failed to send event to runtime"))
    }

    /// Feed one backend event from synchronous code
    pub fn try_send_event(&self, event: impl Into<ClientEvent>) -> Result<(), ChannelError> {
        self.event_sender.try_send_non_blocking(event.into())
    }

    /// Take the app event receiver (can only be called once)
    pub fn take_app_event_receiver(&mut self) -> Option<AppEventReceiver> {
        self.app_event_receiver.take()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RuntimeCommand,
    ) -> ClientResult<T> {
        let (reply, response) = oneshot::channel();
        self.command_sender
            .send(command(reply))
            .await
            .map_err(|_| CommandError::Shutdown)?;
        response.await.map_err(|_| CommandError::Shutdown.into())
    }

    /// Delete a channel on the backend, then locally
    ///
    /// Resolves once the backend answered. Events for the channel keep being applied
    /// while the delete is pending.
    pub async fn delete_channel(&self, channel_id: &str) -> ClientResult<()> {
        let channel_id = channel_id.to_string();
        self.request(|reply| RuntimeCommand::DeleteChannel { channel_id, reply })
            .await?
    }

    /// Settle a funding period by renewing the active channel
    pub async fn renew_with_funding_fee(
        &self,
        request: RenewalRequest,
    ) -> ClientResult<RenewalOutcome> {
        self.request(|reply| RuntimeCommand::RenewWithFundingFee { request, reply })
            .await?
    }

    /// Snapshot of every channel
    pub async fn channels(&self) -> ClientResult<Vec<ChannelEntity>> {
        self.request(|reply| RuntimeCommand::GetChannels { reply }).await
    }

    pub async fn channel_status(&self) -> ClientResult<ChannelStatus> {
        self.request(|reply| RuntimeCommand::GetChannelStatus { reply })
            .await
    }

    /// The task notification that would be displayed next
    pub async fn peek_task(&self) -> ClientResult<Option<BackgroundTask>> {
        self.request(|reply| RuntimeCommand::PeekTask { reply }).await
    }

    pub async fn display_next_task(&self) -> ClientResult<Option<BackgroundTask>> {
        self.request(|reply| RuntimeCommand::DisplayNextTask { reply })
            .await
    }

    pub async fn dismiss_task(&self) -> ClientResult<BackgroundTask> {
        self.request(|reply| RuntimeCommand::DismissTask { reply })
            .await?
    }

    pub async fn stats(&self) -> ClientResult<CoreStats> {
        self.request(|reply| RuntimeCommand::GetStats { reply }).await
    }

    /// Check if the core logic task is still running
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the core logic task and return its final statistics
    ///
    /// Outbound commands still in flight are abandoned; their callers get
    /// [`CommandError::Shutdown`].
    pub async fn shutdown(&mut self) -> ClientResult<CoreStats> {
        let handle = self.task_handle.take().ok_or(CommandError::Shutdown)?;
        info!(instance_id = %self.instance_id, "Shutting down channel client runtime");

        if self.command_sender.send(RuntimeCommand::Shutdown).await.is_err() {
            warn!("Core logic task already stopped");
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(result)) => {
                info!(instance_id = %self.instance_id, "Channel client runtime shut down");
                result
            }
            Ok(Err(error)) => Err(ChannelClientError::channel_error(format!(
                "Core logic task panicked: {}",
                error
            ))),
            Err(_) => Err(ChannelClientError::channel_error(
                "Core logic task did not stop in time",
            )),
        }
    }
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Create a runtime with the testing configuration
pub async fn create_test_runtime(
    backend: Arc<dyn ChannelBackend>,
    time_source: Arc<dyn TimeSource>,
) -> ClientResult<RuntimeHandle> {
    RuntimeBuilder::new(backend)
        .with_config(ClientConfig::testing())
        .with_time_source(time_source)
        .build_and_start()
        .await
}
