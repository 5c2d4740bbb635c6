//! Channel State Store
//!
//! The authoritative local projection of every DLC channel. Channel events are applied
//! in arrival order. The store reconciles the reference id a channel is offered under
//! with the permanent id it gets once signed, so a logical channel is never stored twice.
//!
//! Readers get owned snapshots or shared references; only the store mutates entities.

use hashbrown::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::ChannelBackend;
use crate::errors::{CommandError, ReconciliationError};
use crate::events::ChannelEvent;
use crate::model::status;
use crate::model::{ChannelEntity, ChannelKey, ChannelState, ChannelStatus, OuterState};
use crate::types::{SystemTimeSource, TimeSource};

// ----------------------------------------------------------------------------
// Outcomes and Notifications
// ----------------------------------------------------------------------------

/// What applying a channel event did to the map
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new entry was created
    Inserted(ChannelKey),
    /// An existing entry changed
    Updated(ChannelKey),
    /// The entry kept under a reference id moved to its permanent id
    Promoted { from: ChannelKey, to: ChannelKey },
    /// The event matched the stored entry exactly
    Unchanged(ChannelKey),
    /// The event had neither an id nor a reference id
    Unkeyable,
}

impl ApplyOutcome {
    pub fn key(&self) -> Option<&ChannelKey> {
        match self {
            ApplyOutcome::Inserted(key)
            | ApplyOutcome::Updated(key)
            | ApplyOutcome::Unchanged(key)
            | ApplyOutcome::Promoted { to: key, .. } => Some(key),
            ApplyOutcome::Unkeyable => None,
        }
    }

    pub fn mutated(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Inserted(_) | ApplyOutcome::Updated(_) | ApplyOutcome::Promoted { .. }
        )
    }
}

/// Kind of mutation reported to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Initialized { channels: usize },
    Applied(ApplyOutcome),
    Deleted,
}

/// Notification sent to listeners after every mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUpdate {
    pub revision: u64,
    pub key: Option<ChannelKey>,
    pub change: StoreChange,
    /// Coarse status after the mutation
    pub status: ChannelStatus,
}

type Listener = Box<dyn Fn(&StoreUpdate) + Send>;

/// Handle returned by [`ChannelStateStore::on_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// ----------------------------------------------------------------------------
// Channel State Store
// ----------------------------------------------------------------------------

/// In-memory map of DLC channels keyed by reference id (while offered) or channel id
pub struct ChannelStateStore {
    channels: HashMap<ChannelKey, ChannelEntity>,
    revision: u64,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
    conflicts: u64,
    time_source: Arc<dyn TimeSource>,
}

impl Default for ChannelStateStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemTimeSource::new()))
    }
}

impl ChannelStateStore {
    pub fn new(time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            channels: HashMap::new(),
            revision: 0,
            listeners: Vec::new(),
            next_listener_id: 0,
            conflicts: 0,
            time_source,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Replace the map with the backend's channel list
    ///
    /// The map is left untouched if the backend fails.
    pub async fn initialize(&mut self, backend: &dyn ChannelBackend) -> Result<usize, CommandError> {
        let channels = backend.list_channels().await.map_err(|error| {
            error!(%error, "Failed to fetch channel list");
            error
        })?;
        Ok(self.seed(channels))
    }

    /// Replace the map with `channels`, keyed by id (reference id for pure offers)
    pub fn seed(&mut self, channels: Vec<ChannelEntity>) -> usize {
        self.channels.clear();
        for channel in channels {
            let key = match (&channel.id, &channel.reference_id, &channel.state) {
                (_, Some(reference_id), ChannelState::Offered) => ChannelKey::from(reference_id.as_str()),
                (Some(id), _, _) => ChannelKey::from(id.as_str()),
                (None, Some(reference_id), _) => ChannelKey::from(reference_id.as_str()),
                (None, None, _) => {
                    warn!(state = %channel.state, "{}", ReconciliationError::Unkeyable);
                    self.conflicts += 1;
                    continue;
                }
            };
            if self.channels.insert(key.clone(), channel).is_some() {
                warn!(key = %key, "Backend listed the same channel twice, keeping the last entry");
            }
        }

        let count = self.channels.len();
        info!(channels = count, "Channel store initialized");
        self.notify(None, StoreChange::Initialized { channels: count });
        count
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    /// Apply one channel event
    ///
    /// Never fails: malformed or unexpected events are logged and handled defensively so
    /// that the event loop keeps running.
    pub fn apply_event(&mut self, event: &ChannelEvent) -> ApplyOutcome {
        let Some(key) = event.storage_key() else {
            self.conflicts += 1;
            warn!(event = %event, "{}", ReconciliationError::Unkeyable);
            return ApplyOutcome::Unkeyable;
        };

        let (state, adjustment) = event.state();
        if let Some(adjustment) = adjustment {
            warn!(key = %key, event = %event, "{}", adjustment);
        }
        self.log_unknown_state(&key, &state);

        if event.outer_state != OuterState::Offered && event.id.is_none() {
            self.record_conflict(&key, "non-offered event without a channel id, keyed by reference id");
        }

        // A channel offered under its reference id is re-keyed to its permanent id. This
        // has to happen before the insert below so the channel is never stored twice.
        let mut promoted_from = None;
        if event.promotes_reference() {
            if let Some(reference_key) = event.reference_key().filter(|r| *r != key) {
                if let Some(previous) = self.channels.remove(&reference_key) {
                    debug!(from = %reference_key, to = %key, "Promoting channel to its permanent id");
                    promoted_from = Some((reference_key, previous));
                }
            }
        }

        let was_signed = self.channels.get(&key).map(ChannelEntity::is_signed);
        let existing = self.channels.get(&key).or(promoted_from.as_ref().map(|(_, prev)| prev));

        let id = event.id.clone().or_else(|| existing.and_then(|e| e.id.clone()));
        let reference_id = event
            .reference_id
            .clone()
            .or_else(|| existing.and_then(|e| e.reference_id.clone()));

        if let Some(current) = self.channels.get(&key) {
            if promoted_from.is_none()
                && current.state == state
                && current.id == id
                && current.reference_id == reference_id
            {
                debug!(key = %key, state = %state, "Channel event already applied");
                return ApplyOutcome::Unchanged(key);
            }
        }

        if promoted_from.is_none()
            && was_signed.is_none()
            && event.outer_state != OuterState::Offered
            && event.promotes_reference()
        {
            self.record_conflict(&key, "event carries id and reference id but matches no known channel, inserting fresh");
        }

        let becomes_signed = matches!(state, ChannelState::Signed(_));
        let entity = ChannelEntity::new(id, reference_id, state, self.time_source.now());
        debug!(key = %key, state = %entity.state, "Applying channel event");

        let replaced = self.channels.insert(key.clone(), entity);
        if becomes_signed && was_signed != Some(true) {
            self.check_single_signed_channel(&key);
        }

        let outcome = match (promoted_from, replaced) {
            (Some((from, _)), _) => ApplyOutcome::Promoted { from, to: key.clone() },
            (None, Some(_)) => ApplyOutcome::Updated(key.clone()),
            (None, None) => ApplyOutcome::Inserted(key.clone()),
        };
        self.notify(Some(key), StoreChange::Applied(outcome.clone()));
        outcome
    }

    fn log_unknown_state(&self, key: &ChannelKey, state: &ChannelState) {
        let raw = match state {
            ChannelState::Other(raw) => raw.as_str(),
            ChannelState::Signed(sub_state) if !sub_state.is_known() => sub_state.as_str(),
            _ => return,
        };
        warn!(
            "{}",
            ReconciliationError::UnknownState {
                key: key.clone(),
                state: raw.to_string(),
            }
        );
    }

    fn record_conflict(&mut self, key: &ChannelKey, reason: &str) {
        self.conflicts += 1;
        warn!(
            "{}",
            ReconciliationError::Conflict {
                key: key.clone(),
                reason: reason.to_string(),
            }
        );
    }

    fn check_single_signed_channel(&mut self, key: &ChannelKey) {
        let mut signed: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, channel)| channel.is_signed())
            .map(|(key, _)| key.to_string())
            .collect();
        if signed.len() > 1 {
            signed.sort();
            self.conflicts += 1;
            warn!(key = %key, "{}", ReconciliationError::MultipleSignedChannels { channels: signed });
        }
    }

    // ------------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------------

    /// Delete a channel on the backend, then locally
    ///
    /// The local entry is only removed once the backend confirmed the deletion.
    pub async fn delete_channel(
        &mut self,
        backend: &dyn ChannelBackend,
        channel_id: &str,
    ) -> Result<(), CommandError> {
        let result = backend.delete_channel(channel_id).await;
        self.complete_delete(channel_id, result)
    }

    /// Apply the backend's answer to a delete command
    ///
    /// On success the entry is removed whatever state it reached in the meantime; a
    /// repeated success for an entry that is already gone is a no-op. On failure the
    /// entry is kept and the error returned.
    pub fn complete_delete(
        &mut self,
        channel_id: &str,
        result: Result<(), CommandError>,
    ) -> Result<(), CommandError> {
        if let Err(error) = result {
            error!(channel_id, %error, "Channel deletion failed, keeping local entry");
            return Err(error);
        }

        let key = ChannelKey::from(channel_id);
        match self.channels.remove(&key) {
            Some(removed) => {
                info!(channel_id, state = %removed.state, "Channel deleted");
                self.notify(Some(key), StoreChange::Deleted);
            }
            None => debug!(channel_id, "Channel already removed"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    /// Register a listener invoked once after every mutation
    pub fn on_change<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&StoreUpdate) + Send + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        before != self.listeners.len()
    }

    fn notify(&mut self, key: Option<ChannelKey>, change: StoreChange) {
        self.revision += 1;
        let update = StoreUpdate {
            revision: self.revision,
            key,
            change,
            status: self.channel_status(),
        };
        for (_, listener) in &self.listeners {
            listener(&update);
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Monotonic mutation counter
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Reconciliation conflicts seen so far
    pub fn conflict_count(&self) -> u64 {
        self.conflicts
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ChannelEntity> {
        self.channels.get(&ChannelKey::from(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.channels.contains_key(&ChannelKey::from(key))
    }

    /// Owned copy of every channel, sorted by key
    pub fn snapshot(&self) -> Vec<(ChannelKey, ChannelEntity)> {
        let mut entries: Vec<_> = self
            .channels
            .iter()
            .map(|(key, channel)| (key.clone(), channel.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn list_where<P>(&self, predicate: P) -> Vec<ChannelEntity>
    where
        P: Fn(&ChannelEntity) -> bool,
    {
        self.snapshot()
            .into_iter()
            .map(|(_, channel)| channel)
            .filter(|channel| predicate(channel))
            .collect()
    }

    pub fn list_by_outer_state(&self, outer_state: &OuterState) -> Vec<ChannelEntity> {
        self.list_where(|channel| channel.outer_state() == *outer_state)
    }

    pub fn list_offered(&self) -> Vec<ChannelEntity> {
        self.list_where(|channel| matches!(channel.state, ChannelState::Offered))
    }

    pub fn list_signed(&self) -> Vec<ChannelEntity> {
        self.list_where(ChannelEntity::is_signed)
    }

    /// Channels in a terminal closed state
    pub fn list_closed(&self) -> Vec<ChannelEntity> {
        self.list_where(|channel| channel.outer_state().is_terminal_closed())
    }

    /// Channels in an outer state this client does not recognize
    pub fn list_other(&self) -> Vec<ChannelEntity> {
        self.list_where(|channel| matches!(channel.state, ChannelState::Other(_)))
    }

    /// The signed channel the trader is working with
    ///
    /// If several are signed (which should not happen) the most recently updated wins.
    pub fn active_signed_channel(&self) -> Option<&ChannelEntity> {
        self.channels
            .values()
            .filter(|channel| channel.is_signed())
            .max_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then_with(|| b.display_id().cmp(a.display_id()))
            })
    }

    pub fn channel_status(&self) -> ChannelStatus {
        status::project_status(self.channels.values())
    }

    pub fn has_open_position(&self) -> bool {
        status::has_open_position(self.channels.values())
    }

    pub fn has_channel_without_position(&self) -> bool {
        status::has_channel_without_position(self.channels.values())
    }

    pub fn can_force_close(&self) -> bool {
        status::can_force_close(self.channels.values())
    }

    pub fn is_closing(&self) -> bool {
        status::is_closing(self.channels.values())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SignedSubState;
    use crate::testing::{MockBackend, MockTimeSource};
    use crate::types::Timestamp;
    use std::sync::Mutex;

    fn store() -> (ChannelStateStore, MockTimeSource) {
        let clock = MockTimeSource::new_at(1_000);
        (ChannelStateStore::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_offer_then_sign_is_promoted() {
        let (mut store, _) = store();

        let outcome = store.apply_event(&ChannelEvent::offered("r1"));
        assert_eq!(outcome, ApplyOutcome::Inserted(ChannelKey::from("r1")));
        assert_eq!(store.list_offered().len(), 1);

        let outcome = store.apply_event(&ChannelEvent::signed(
            Some("r1".into()),
            "c1",
            SignedSubState::Established,
        ));
        assert_eq!(
            outcome,
            ApplyOutcome::Promoted {
                from: ChannelKey::from("r1"),
                to: ChannelKey::from("c1"),
            }
        );
        assert_eq!(store.len(), 1);
        assert!(store.list_offered().is_empty());
        assert_eq!(store.get("c1").and_then(|c| c.reference_id.as_deref()), Some("r1"));
        assert_eq!(store.channel_status(), ChannelStatus::WithPosition);
    }

    #[test]
    fn test_later_event_without_reference_keeps_it() {
        let (mut store, clock) = store();
        store.apply_event(&ChannelEvent::offered("r1"));
        store.apply_event(&ChannelEvent::signed(Some("r1".into()), "c1", SignedSubState::Established));

        clock.advance(5);
        let outcome = store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Settled));
        assert_eq!(outcome, ApplyOutcome::Updated(ChannelKey::from("c1")));

        let channel = store.get("c1").unwrap();
        assert_eq!(channel.reference_id.as_deref(), Some("r1"));
        assert_eq!(channel.updated_at, Timestamp::new(1_005));
        assert_eq!(store.channel_status(), ChannelStatus::Open);
        assert!(store.has_channel_without_position());
    }

    #[test]
    fn test_duplicate_event_is_unchanged() {
        let (mut store, clock) = store();
        let event = ChannelEvent::signed(None, "c1", SignedSubState::RenewOffered);
        store.apply_event(&event);
        let revision = store.revision();

        clock.advance(1_000);
        assert_eq!(store.apply_event(&event), ApplyOutcome::Unchanged(ChannelKey::from("c1")));
        assert_eq!(store.revision(), revision);
        assert_eq!(store.get("c1").unwrap().updated_at, Timestamp::new(1_000));
    }

    #[test]
    fn test_unkeyable_event_is_ignored() {
        let (mut store, _) = store();
        let event = ChannelEvent::new(None, None, OuterState::Signed, Some(SignedSubState::Settled));
        assert_eq!(store.apply_event(&event), ApplyOutcome::Unkeyable);
        assert!(store.is_empty());
        assert_eq!(store.revision(), 0);
        assert_eq!(store.conflict_count(), 1);
    }

    #[test]
    fn test_unknown_outer_state_goes_to_other_bucket() {
        let (mut store, _) = store();
        store.apply_event(&ChannelEvent::outer("c7", OuterState::Other("splicing".into())));

        assert_eq!(store.list_other().len(), 1);
        assert!(store.list_signed().is_empty());
        assert_eq!(store.channel_status(), ChannelStatus::Unknown);
    }

    #[test]
    fn test_sub_state_on_non_signed_channel_is_dropped() {
        let (mut store, _) = store();
        let event = ChannelEvent::new(
            None,
            Some("c1".into()),
            OuterState::Closing,
            Some(SignedSubState::Established),
        );
        store.apply_event(&event);

        let channel = store.get("c1").unwrap();
        assert_eq!(channel.state, ChannelState::Closing);
        assert!(channel.signed_sub_state().is_none());
        assert!(store.is_closing());
    }

    #[test]
    fn test_second_signed_channel_is_a_conflict_but_kept() {
        let (mut store, _) = store();
        store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Settled));
        store.apply_event(&ChannelEvent::signed(None, "c2", SignedSubState::Established));

        assert_eq!(store.list_signed().len(), 2);
        assert_eq!(store.conflict_count(), 1);
        assert_eq!(store.channel_status(), ChannelStatus::WithPosition);
    }

    #[test]
    fn test_listeners_get_one_update_per_mutation() {
        let (mut store, _) = store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.on_change(move |update| sink.lock().unwrap().push((update.revision, update.status)));

        store.apply_event(&ChannelEvent::offered("r1"));
        store.apply_event(&ChannelEvent::offered("r1"));
        store.apply_event(&ChannelEvent::signed(Some("r1".into()), "c1", SignedSubState::Settled));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(1, ChannelStatus::NotOpen), (2, ChannelStatus::Open)]
        );
    }

    #[test]
    fn test_removed_listener_is_not_called() {
        let (mut store, _) = store();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        let id = store.on_change(move |_| *counter.lock().unwrap() += 1);

        store.apply_event(&ChannelEvent::offered("r1"));
        assert!(store.remove_listener(id));
        assert!(!store.remove_listener(id));
        store.apply_event(&ChannelEvent::offered("r2"));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_list_by_outer_state() {
        let (mut store, _) = store();
        store.apply_event(&ChannelEvent::offered("r1"));
        store.apply_event(&ChannelEvent::outer("c2", OuterState::Closed));
        store.apply_event(&ChannelEvent::outer("c3", OuterState::CounterClosed));
        store.apply_event(&ChannelEvent::outer("c4", OuterState::Other("splicing".into())));

        let closed = store.list_by_outer_state(&OuterState::Closed);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id.as_deref(), Some("c2"));
        assert_eq!(store.list_by_outer_state(&OuterState::Offered).len(), 1);
        assert_eq!(store.list_by_outer_state(&OuterState::Other("splicing".into())).len(), 1);
        assert!(store.list_by_outer_state(&OuterState::Signed).is_empty());
    }

    #[test]
    fn test_complete_delete_is_idempotent() {
        let (mut store, _) = store();
        store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Settled));

        let failure = CommandError::backend("deleteChannel", "offline");
        assert_eq!(store.complete_delete("c1", Err(failure.clone())), Err(failure));
        assert!(store.contains("c1"));

        assert_eq!(store.complete_delete("c1", Ok(())), Ok(()));
        assert!(!store.contains("c1"));
        let revision = store.revision();
        assert_eq!(store.complete_delete("c1", Ok(())), Ok(()));
        assert_eq!(store.revision(), revision);
    }

    #[tokio::test]
    async fn test_initialize_seeds_from_backend() {
        let (mut store, _) = store();
        let backend = MockBackend::with_channels(vec![
            ChannelEntity::new(
                Some("c1".into()),
                Some("r1".into()),
                ChannelState::Signed(SignedSubState::Established),
                Timestamp::new(10),
            ),
            ChannelEntity::new(None, Some("r2".into()), ChannelState::Offered, Timestamp::new(11)),
        ]);

        assert_eq!(store.initialize(&backend).await, Ok(2));
        assert!(store.contains("c1"));
        assert!(store.contains("r2"));
        assert!(store.has_open_position());
    }

    #[tokio::test]
    async fn test_initialize_failure_keeps_map() {
        let (mut store, _) = store();
        store.apply_event(&ChannelEvent::offered("r1"));

        let backend = MockBackend::new();
        backend.fail_list(CommandError::Transport {
            command: "listChannels".into(),
            reason: "timeout".into(),
        });

        assert!(store.initialize(&backend).await.is_err());
        assert_eq!(store.len(), 1);
    }
}
