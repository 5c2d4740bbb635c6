//! Core Logic Command Handlers
//!
//! The state-touching half of command processing. Each handler works on the
//! [`ClientState`] alone and returns the reply value plus the app events to emit; channel
//! plumbing and spawning of outbound commands stay in the task.

use dlc_channel_core::{
    BackendCommand, BackgroundTask, ChannelEntity, ClientResult, CommandError, RenewOffer,
    RenewalOutcome, RenewalPlan, RenewalRequest,
};
use tracing::{debug, warn};

use super::state::ClientState;
use crate::commands::AppEvent;

/// Command and completion handlers for the core logic task
pub struct CommandHandlers;

impl CommandHandlers {
    /// Owned copy of every channel
    pub fn handle_get_channels(state: &ClientState) -> Vec<ChannelEntity> {
        state
            .store
            .snapshot()
            .into_iter()
            .map(|(_, channel)| channel)
            .collect()
    }

    /// Decide whether a funding-fee renewal has to be sent
    pub fn handle_plan_renewal(
        state: &ClientState,
        request: &RenewalRequest,
    ) -> ClientResult<RenewalPlan> {
        Ok(state.funding.plan(&state.store, request)?)
    }

    pub fn handle_dismiss_task(state: &mut ClientState) -> ClientResult<BackgroundTask> {
        Ok(state.tracker.dismiss()?)
    }

    /// Apply the backend's answer to a delete
    ///
    /// The entry is removed whatever state it reached while the delete was in flight.
    pub fn handle_delete_completed(
        state: &mut ClientState,
        channel_id: &str,
        result: Result<(), CommandError>,
    ) -> (ClientResult<()>, Vec<AppEvent>) {
        match state.store.complete_delete(channel_id, result) {
            Ok(()) => (
                Ok(()),
                vec![AppEvent::ChannelDeleted {
                    channel_id: channel_id.to_string(),
                }],
            ),
            Err(error) => {
                state.stats.outbound_failures += 1;
                let event = AppEvent::CommandFailed {
                    command: BackendCommand::DeleteChannel,
                    channel_id: channel_id.to_string(),
                    error: error.clone(),
                };
                (Err(error.into()), vec![event])
            }
        }
    }

    /// Apply the backend's answer to a renew offer
    pub fn handle_renew_completed(
        state: &mut ClientState,
        offer: RenewOffer,
        result: Result<(), CommandError>,
    ) -> (ClientResult<RenewalOutcome>, Vec<AppEvent>) {
        let channel_id = offer.channel_id.clone();
        match state.store.get(&channel_id) {
            Some(channel) => {
                debug!(%channel_id, state = %channel.state, "Renew offer answered");
            }
            None => warn!(%channel_id, "Channel disappeared while its renew offer was in flight"),
        }

        let failure = result.as_ref().err().cloned();
        let outcome = state
            .funding
            .complete(offer, result.map_err(Into::into));

        let events = match (&outcome, failure) {
            (Ok(RenewalOutcome::Renewed(offer)), _) => vec![AppEvent::FundingFeeApplied {
                channel_id,
                event: offer.event.clone(),
            }],
            (Err(_), Some(error)) => {
                state.stats.outbound_failures += 1;
                vec![AppEvent::CommandFailed {
                    command: BackendCommand::RenewChannel,
                    channel_id,
                    error,
                }]
            }
            _ => Vec::new(),
        };
        (outcome, events)
    }
}
