//! Core Logic Task Implementation
//!
//! Contains the CoreLogicTask struct and its event loop.

use dlc_channel_core::{
    BackendCommand, ChannelBackend, ChannelClientError, ChannelStatus, ClientConfig,
    ClientEvent, ClientResult, CommandError, EventDispatcher, EventKind, MonitoringConfig,
    RenewalOutcome, RenewalPlan, RenewalRequest,
};
use hashbrown::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handlers::CommandHandlers;
use super::state::{ClientState, CoreStats};
use crate::channels::{
    AppEventSender, CommandReceiver, CompletionReceiver, CompletionSender, EventReceiver,
    NonBlockingSend,
};
use crate::commands::{AppEvent, Completion, Reply, RuntimeCommand};

/// The channels the core logic task is wired to
pub struct CoreChannels {
    pub command_receiver: CommandReceiver,
    pub event_receiver: EventReceiver,
    pub completion_sender: CompletionSender,
    pub completion_receiver: CompletionReceiver,
    pub app_event_sender: AppEventSender,
}

// ----------------------------------------------------------------------------
// Core Logic Task
// ----------------------------------------------------------------------------

/// The single consumer of channel events, task notifications and runtime commands
///
/// Events are applied synchronously in arrival order. Outbound commands are spawned so
/// that events keep flowing while the backend works; their results come back as
/// [`Completion`]s and are applied on this task as well.
pub struct CoreLogicTask {
    state: ClientState,
    dispatcher: EventDispatcher<ClientState>,
    backend: Arc<dyn ChannelBackend>,
    monitoring: MonitoringConfig,
    command_receiver: CommandReceiver,
    event_receiver: EventReceiver,
    completion_sender: CompletionSender,
    completion_receiver: CompletionReceiver,
    app_event_sender: AppEventSender,
    /// Outbound commands awaiting their completion, one per command and channel
    in_flight: HashMap<(BackendCommand, String), Uuid>,
    command_tasks: Vec<JoinHandle<()>>,
    last_status: ChannelStatus,
    events_open: bool,
    running: bool,
}

impl CoreLogicTask {
    /// Create a new core logic task
    pub fn new(
        state: ClientState,
        backend: Arc<dyn ChannelBackend>,
        config: &ClientConfig,
        channels: CoreChannels,
    ) -> Self {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(
            "channel-store",
            EventKind::ChannelEvent,
            |state: &mut ClientState, event| {
                if let ClientEvent::Channel(event) = event {
                    state.store.apply_event(event);
                }
                Ok(())
            },
        );
        dispatcher.subscribe(
            "task-tracker",
            EventKind::BackgroundTaskNotification,
            |state: &mut ClientState, event| {
                if let ClientEvent::BackgroundTask(task) = event {
                    state.tracker.on_notification(task.clone());
                }
                Ok(())
            },
        );

        let mut task = Self {
            last_status: state.store.channel_status(),
            state,
            dispatcher,
            backend,
            monitoring: config.monitoring.clone(),
            command_receiver: channels.command_receiver,
            event_receiver: channels.event_receiver,
            completion_sender: channels.completion_sender,
            completion_receiver: channels.completion_receiver,
            app_event_sender: channels.app_event_sender,
            in_flight: HashMap::new(),
            command_tasks: Vec::new(),
            events_open: true,
            running: true,
        };
        task.observe_state();
        task
    }

    /// Forward tracker (and optionally store) notifications to the application
    fn observe_state(&mut self) {
        let sender = self.app_event_sender.clone();
        self.state.tracker.observe(move |update| {
            if let Err(error) = sender.try_send_non_blocking(AppEvent::TaskUpdated(update.clone())) {
                warn!(%error, "Dropping task update");
            }
        });

        if self.monitoring.emit_store_updates {
            let sender = self.app_event_sender.clone();
            self.state.store.on_change(move |update| {
                if let Err(error) = sender.try_send_non_blocking(AppEvent::StoreUpdated(update.clone())) {
                    warn!(%error, "Dropping store update");
                }
            });
        }
    }

    /// Register an additional subscriber, e.g. an application-side audit hook
    pub fn subscribe<F>(&mut self, id: &str, kind: EventKind, callback: F)
    where
        F: FnMut(&mut ClientState, &ClientEvent) -> Result<(), String> + Send + 'static,
    {
        self.dispatcher.subscribe(id, kind, callback);
    }

    /// Load the channel list from the backend and check for interrupted protocols
    pub async fn initialize(&mut self) -> ClientResult<()> {
        let channels = self.state.store.initialize(self.backend.as_ref()).await?;

        if self.monitoring.detect_interrupted_protocols {
            if let Some(task) = self.state.recovery.on_initialized(&self.state.store) {
                self.state.tracker.on_notification(task);
            }
        }

        let status = self.state.store.channel_status();
        info!(channels, %status, "Channel client initialized");
        self.update_status(status);
        Ok(())
    }

    /// Run the main core logic loop
    pub async fn run(mut self) -> ClientResult<CoreStats> {
        info!("Core logic task starting");

        while self.running {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.process_command(command),
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                event = self.event_receiver.recv(), if self.events_open => {
                    match event {
                        Some(event) => self.process_event(event),
                        None => {
                            // No more backend events; commands are still served
                            info!("Event channel closed");
                            self.events_open = false;
                        }
                    }
                }

                Some(completion) = self.completion_receiver.recv() => {
                    self.process_completion(completion);
                }
            }
        }

        let abandoned = self.in_flight.len();
        for handle in self.command_tasks.drain(..) {
            handle.abort();
        }
        if abandoned > 0 {
            warn!(abandoned, "Abandoning outbound commands still in flight");
        }

        info!(
            events = self.state.stats.events_processed,
            commands = self.state.stats.commands_processed,
            "Core logic task stopped"
        );
        Ok(self.state.stats)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Dispatch one backend event to its subscribers
    fn process_event(&mut self, event: ClientEvent) {
        self.state.stats.events_processed += 1;

        let report = self.dispatcher.dispatch(&mut self.state, &event);
        if report.dropped() {
            self.state.stats.events_dropped += 1;
        }
        if !report.is_clean() {
            self.state.stats.subscriber_failures += report.failures.len() as u64;
            self.send_app_event(AppEvent::SubscriberFailed {
                kind: report.kind,
                failures: report.failures,
            });
        }

        if event.kind() == EventKind::ChannelEvent {
            self.after_store_mutation();
        }
    }

    /// Follow-up checks after the channel map may have changed
    fn after_store_mutation(&mut self) {
        if self.monitoring.detect_interrupted_protocols {
            if let Some(task) = self.state.recovery.on_store_changed(&self.state.store) {
                self.state.tracker.on_notification(task);
            }
        }
        let status = self.state.store.channel_status();
        self.update_status(status);
    }

    fn update_status(&mut self, current: ChannelStatus) {
        if current == self.last_status {
            return;
        }
        let previous = core::mem::replace(&mut self.last_status, current);
        info!(%previous, %current, "Channel status changed");
        if self.monitoring.track_status_changes {
            self.send_app_event(AppEvent::ChannelStatusChanged { previous, current });
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn process_command(&mut self, command: RuntimeCommand) {
        self.state.stats.commands_processed += 1;
        debug!(command = command.name(), "Processing runtime command");

        match command {
            RuntimeCommand::DeleteChannel { channel_id, reply } => {
                self.start_delete(channel_id, reply);
            }
            RuntimeCommand::RenewWithFundingFee { request, reply } => {
                self.start_renewal(&request, reply);
            }
            RuntimeCommand::GetChannels { reply } => {
                let _ = reply.send(CommandHandlers::handle_get_channels(&self.state));
            }
            RuntimeCommand::GetChannelStatus { reply } => {
                let _ = reply.send(self.state.store.channel_status());
            }
            RuntimeCommand::PeekTask { reply } => {
                let _ = reply.send(self.state.tracker.peek_top().cloned());
            }
            RuntimeCommand::DisplayNextTask { reply } => {
                let _ = reply.send(self.state.tracker.display_top());
            }
            RuntimeCommand::DismissTask { reply } => {
                let result = CommandHandlers::handle_dismiss_task(&mut self.state);
                if let Err(error) = &result {
                    debug!(%error, "Task dismissal refused");
                    self.state.stats.commands_rejected += 1;
                }
                let _ = reply.send(result);
            }
            RuntimeCommand::GetStats { reply } => {
                let _ = reply.send(self.state.stats.clone());
            }
            RuntimeCommand::Shutdown => {
                info!("Shutdown requested");
                self.running = false;
            }
        }
    }

    /// Reserve the in-flight slot for `command` on `channel_id`
    fn claim(&mut self, command: BackendCommand, channel_id: &str) -> Result<Uuid, CommandError> {
        let key = (command, channel_id.to_string());
        if self.in_flight.contains_key(&key) {
            return Err(CommandError::AlreadyInFlight {
                command: command.to_string(),
                channel_id: channel_id.to_string(),
            });
        }
        let command_id = Uuid::new_v4();
        self.in_flight.insert(key, command_id);
        Ok(command_id)
    }

    fn reject<T>(&mut self, reply: Reply<T>, error: ChannelClientError) {
        warn!(%error, "Rejecting runtime command");
        self.state.stats.commands_rejected += 1;
        let _ = reply.send(Err(error));
    }

    fn start_delete(&mut self, channel_id: String, reply: Reply<()>) {
        let command_id = match self.claim(BackendCommand::DeleteChannel, &channel_id) {
            Ok(command_id) => command_id,
            Err(error) => return self.reject(reply, error.into()),
        };
        if !self.state.store.contains(&channel_id) {
            // The backend is authoritative; it may know channels we have not seen yet
            debug!(%channel_id, "Deleting a channel unknown to the local store");
        }
        info!(%channel_id, %command_id, "Sending delete command");

        let backend = self.backend.clone();
        let completions = self.completion_sender.clone();
        self.spawn_outbound(async move {
            let result = backend.delete_channel(&channel_id).await;
            let completion = Completion::Deleted {
                command_id,
                channel_id,
                result,
                reply,
            };
            if completions.send(completion).await.is_err() {
                debug!(%command_id, "Core logic stopped before delete completed");
            }
        });
    }

    fn start_renewal(&mut self, request: &RenewalRequest, reply: Reply<RenewalOutcome>) {
        let offer = match CommandHandlers::handle_plan_renewal(&self.state, request) {
            Ok(RenewalPlan::Renew(offer)) => offer,
            Ok(RenewalPlan::NoFeeDue { channel_id }) => {
                let _ = reply.send(Ok(RenewalOutcome::NoFeeDue { channel_id }));
                return;
            }
            Err(error) => return self.reject(reply, error),
        };
        let command_id = match self.claim(BackendCommand::RenewChannel, &offer.channel_id) {
            Ok(command_id) => command_id,
            Err(error) => return self.reject(reply, error.into()),
        };
        info!(
            channel_id = %offer.channel_id,
            %command_id,
            fee_sats = offer.fee.amount_sats,
            payer = %offer.fee.payer,
            "Sending funding fee renew offer"
        );

        let backend = self.backend.clone();
        let completions = self.completion_sender.clone();
        self.spawn_outbound(async move {
            let result = backend
                .renew_channel(&offer.channel_id, offer.collateral.offer, offer.collateral.accept)
                .await;
            let completion = Completion::Renewed {
                command_id,
                offer,
                result,
                reply,
            };
            if completions.send(completion).await.is_err() {
                debug!(%command_id, "Core logic stopped before renewal completed");
            }
        });
    }

    fn spawn_outbound<F>(&mut self, future: F)
    where
        F: core::future::Future<Output = ()> + Send + 'static,
    {
        self.state.stats.outbound_commands += 1;
        self.command_tasks.retain(|handle| !handle.is_finished());
        self.command_tasks.push(tokio::spawn(future));
    }

    // ------------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------------

    fn process_completion(&mut self, completion: Completion) {
        let key = (completion.command(), completion.channel_id().to_string());
        if self.in_flight.remove(&key) != Some(completion.command_id()) {
            warn!(
                command = %key.0,
                channel_id = %key.1,
                command_id = %completion.command_id(),
                "Completion for an untracked command"
            );
        }

        let events = match completion {
            Completion::Deleted {
                channel_id,
                result,
                reply,
                ..
            } => {
                let (result, events) =
                    CommandHandlers::handle_delete_completed(&mut self.state, &channel_id, result);
                if let Err(error) = &result {
                    error!(%channel_id, %error, "Delete command failed");
                }
                let _ = reply.send(result);
                events
            }
            Completion::Renewed {
                offer,
                result,
                reply,
                ..
            } => {
                let (result, events) =
                    CommandHandlers::handle_renew_completed(&mut self.state, offer, result);
                let _ = reply.send(result);
                events
            }
        };

        for event in events {
            self.send_app_event(event);
        }
        self.after_store_mutation();
    }

    // ------------------------------------------------------------------------
    // App Events
    // ------------------------------------------------------------------------

    /// Send without blocking the loop on a slow application
    fn send_app_event(&mut self, event: AppEvent) {
        match self.app_event_sender.try_send_non_blocking(event) {
            Ok(()) => self.state.stats.app_events_generated += 1,
            Err(error) => {
                self.state.stats.app_events_dropped += 1;
                warn!(%error, "Dropping app event");
            }
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> &CoreStats {
        &self.state.stats
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }
}
