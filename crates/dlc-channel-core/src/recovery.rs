//! Interrupted protocol detection
//!
//! A signed channel found mid-protocol when the client starts (a settle or renew that
//! never finished) has to be recovered by the backend. The monitor raises a `recover`
//! background task for that and resolves it once every such channel is back in a stable
//! sub-state.

use hashbrown::HashSet;
use tracing::info;

use crate::model::{BackgroundTask, ChannelKey, TaskKind};
use crate::store::ChannelStateStore;

#[derive(Debug, Default)]
pub struct RecoveryMonitor {
    recovering: HashSet<ChannelKey>,
}

impl RecoveryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recovering(&self) -> bool {
        !self.recovering.is_empty()
    }

    /// Inspect a freshly initialized store
    pub fn on_initialized(&mut self, store: &ChannelStateStore) -> Option<BackgroundTask> {
        self.recovering = store
            .snapshot()
            .into_iter()
            .filter(|(_, channel)| {
                channel
                    .signed_sub_state()
                    .is_some_and(|sub_state| !sub_state.is_stable())
            })
            .map(|(key, _)| key)
            .collect();

        if self.recovering.is_empty() {
            return None;
        }
        info!(channels = self.recovering.len(), "Found channels with an interrupted protocol");
        Some(BackgroundTask::pending(TaskKind::Recover))
    }

    /// Re-check after a store mutation
    pub fn on_store_changed(&mut self, store: &ChannelStateStore) -> Option<BackgroundTask> {
        if self.recovering.is_empty() {
            return None;
        }

        self.recovering.retain(|key| {
            store
                .get(key.as_str())
                .and_then(|channel| channel.signed_sub_state())
                .is_some_and(|sub_state| !sub_state.is_stable())
        });

        if self.recovering.is_empty() {
            info!("Interrupted channel protocols recovered");
            Some(BackgroundTask::success(TaskKind::Recover))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelEvent;
    use crate::model::{ChannelEntity, ChannelState, SignedSubState};
    use crate::types::Timestamp;

    fn signed(id: &str, sub_state: SignedSubState) -> ChannelEntity {
        ChannelEntity::new(Some(id.into()), None, ChannelState::Signed(sub_state), Timestamp::new(0))
    }

    #[test]
    fn test_stable_channels_need_no_recovery() {
        let mut store = ChannelStateStore::default();
        store.seed(vec![signed("c1", SignedSubState::Established)]);

        let mut monitor = RecoveryMonitor::new();
        assert_eq!(monitor.on_initialized(&store), None);
        assert_eq!(monitor.on_store_changed(&store), None);
    }

    #[test]
    fn test_interrupted_renew_is_recovered() {
        let mut store = ChannelStateStore::default();
        store.seed(vec![signed("c1", SignedSubState::RenewAccepted)]);

        let mut monitor = RecoveryMonitor::new();
        assert_eq!(
            monitor.on_initialized(&store),
            Some(BackgroundTask::pending(TaskKind::Recover))
        );

        store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::RenewFinalized));
        assert_eq!(monitor.on_store_changed(&store), None);
        assert!(monitor.is_recovering());

        store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Established));
        assert_eq!(
            monitor.on_store_changed(&store),
            Some(BackgroundTask::success(TaskKind::Recover))
        );
        assert!(!monitor.is_recovering());
        assert_eq!(monitor.on_store_changed(&store), None);
    }

    #[test]
    fn test_deleted_channel_ends_recovery() {
        let mut store = ChannelStateStore::default();
        store.seed(vec![signed("c1", SignedSubState::SettledOffered)]);

        let mut monitor = RecoveryMonitor::new();
        assert!(monitor.on_initialized(&store).is_some());

        store.complete_delete("c1", Ok(())).unwrap();
        assert_eq!(
            monitor.on_store_changed(&store),
            Some(BackgroundTask::success(TaskKind::Recover))
        );
    }
}
