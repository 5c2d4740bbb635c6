//! Integration tests for the DLC channel client core
//!
//! These tests drive the store, the task tracker, the dispatcher and the funding-fee
//! renewal protocol together through their public API, the way the runtime does.

use dlc_channel_core::testing::{BackendCall, MockBackend, MockTimeSource};
use dlc_channel_core::*;
use rust_decimal_macros::dec;
use std::sync::Arc;

const HOUR: u64 = 3_600_000;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

/// Store and tracker wired to one dispatcher, like the runtime's core state
struct TestClient {
    store: ChannelStateStore,
    tracker: BackgroundTaskTracker,
}

impl TestClient {
    fn new(clock: &MockTimeSource) -> Self {
        let time_source: Arc<dyn TimeSource> = Arc::new(clock.clone());
        Self {
            store: ChannelStateStore::new(time_source.clone()),
            tracker: BackgroundTaskTracker::new(TaskTrackerConfig::testing(), time_source),
        }
    }
}

fn wired_dispatcher() -> EventDispatcher<TestClient> {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe("store", EventKind::ChannelEvent, |client: &mut TestClient, event| {
        if let ClientEvent::Channel(event) = event {
            client.store.apply_event(event);
        }
        Ok(())
    });
    dispatcher.subscribe(
        "tracker",
        EventKind::BackgroundTaskNotification,
        |client: &mut TestClient, event| {
            if let ClientEvent::BackgroundTask(task) = event {
                client.tracker.on_notification(task.clone());
            }
            Ok(())
        },
    );
    dispatcher
}

fn established(id: &str) -> ChannelEntity {
    ChannelEntity::new(
        Some(id.to_string()),
        None,
        ChannelState::Signed(SignedSubState::Established),
        Timestamp::new(0),
    )
}

fn renewal_request(collateral: CollateralSplit) -> RenewalRequest {
    RenewalRequest {
        funding_rate: FundingRate::new(dec!(0.003), Timestamp::new(0), Timestamp::new(8 * HOUR)),
        quantity: dec!(500),
        index_price: dec!(20_000),
        trader_direction: Direction::Long,
        trader_party: ChannelParty::Accept,
        collateral,
        last_settlement: None,
    }
}

// ----------------------------------------------------------------------------
// Channel Lifecycle
// ----------------------------------------------------------------------------

#[test]
fn test_offer_sign_settle_lifecycle() {
    let clock = MockTimeSource::new_at(1_000);
    let mut client = TestClient::new(&clock);
    let mut dispatcher = wired_dispatcher();

    // Offer under a reference id
    let report = dispatcher.dispatch(&mut client, &ChannelEvent::offered("r1").into());
    assert_eq!(report.delivered, 1);
    let offered = client.store.list_offered();
    assert_eq!(offered.len(), 1);
    assert_eq!(offered[0].reference_id.as_deref(), Some("r1"));
    assert_eq!(client.store.channel_status(), ChannelStatus::NotOpen);

    // Signed with its permanent id
    let signed = ChannelEvent::signed(Some("r1".into()), "c1", SignedSubState::Established);
    dispatcher.dispatch(&mut client, &signed.into());
    assert!(client.store.list_offered().is_empty());
    assert_eq!(client.store.len(), 1);
    assert_eq!(client.store.channel_status(), ChannelStatus::WithPosition);
    assert!(client.store.has_open_position());

    // Position closed, channel stays open
    clock.advance(60_000);
    let settled = ChannelEvent::signed(None, "c1", SignedSubState::Settled);
    dispatcher.dispatch(&mut client, &settled.into());
    assert_eq!(client.store.channel_status(), ChannelStatus::Open);
    assert!(client.store.has_channel_without_position());
    assert!(!client.store.has_open_position());
    assert_eq!(
        client.store.get("c1").map(|channel| channel.updated_at),
        Some(Timestamp::new(61_000))
    );
}

#[test]
fn test_collaborative_close_walks_to_terminal_state() {
    let clock = MockTimeSource::new();
    let mut client = TestClient::new(&clock);

    client.store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Settled));
    client
        .store
        .apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::CollaborativeCloseOffered));
    assert_eq!(client.store.channel_status(), ChannelStatus::Unknown);
    assert!(!client.store.can_force_close());

    client
        .store
        .apply_event(&ChannelEvent::outer("c1", OuterState::CollaborativelyClosed));
    assert_eq!(client.store.channel_status(), ChannelStatus::NotOpen);
    assert_eq!(client.store.list_closed().len(), 1);
    assert!(client.store.list_signed().is_empty());
}

#[test]
fn test_force_close_moves_through_closing() {
    let clock = MockTimeSource::new();
    let mut client = TestClient::new(&clock);

    client.store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Established));
    assert!(client.store.can_force_close());

    client.store.apply_event(&ChannelEvent::outer("c1", OuterState::Closing));
    assert!(client.store.is_closing());
    assert!(!client.store.can_force_close());
    assert_eq!(client.store.channel_status(), ChannelStatus::NotOpen);

    client.store.apply_event(&ChannelEvent::outer("c1", OuterState::Closed));
    assert!(!client.store.is_closing());
    assert_eq!(client.store.list_closed().len(), 1);
}

#[test]
fn test_unknown_states_never_crash_the_store() {
    let clock = MockTimeSource::new();
    let mut client = TestClient::new(&clock);
    let mut dispatcher = wired_dispatcher();

    let events = [
        ChannelEvent::outer("c1", OuterState::Other("splicing".into())),
        ChannelEvent::signed(None, "c2", SignedSubState::Other("spliceOffered".into())),
        ChannelEvent::new(None, Some("c3".into()), OuterState::Signed, None),
        ChannelEvent::new(None, None, OuterState::Closed, None),
    ];
    for event in events {
        let report = dispatcher.dispatch(&mut client, &event.into());
        assert!(report.is_clean());
    }

    assert_eq!(client.store.len(), 3);
    assert_eq!(client.store.list_other().len(), 1);
    assert_eq!(client.store.channel_status(), ChannelStatus::Unknown);
    assert!(client.store.conflict_count() >= 1);
}

// ----------------------------------------------------------------------------
// Deletion
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_events_apply_while_delete_is_pending() {
    let clock = MockTimeSource::new();
    let mut client = TestClient::new(&clock);
    client.store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Settled));

    let backend = MockBackend::new();
    backend.hold_deletes();
    let in_flight = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.delete_channel("c1").await })
    };
    backend.delete_started().await;

    // The entry is not locked while the backend works on the delete
    let outcome = client
        .store
        .apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Established));
    assert_eq!(outcome, ApplyOutcome::Updated(ChannelKey::from("c1")));
    assert_eq!(client.store.channel_status(), ChannelStatus::WithPosition);

    backend.release_delete();
    let result = in_flight.await.expect("delete task panicked");
    assert_eq!(client.store.complete_delete("c1", result), Ok(()));

    // Removed regardless of the state it reached meanwhile
    assert!(client.store.is_empty());
    assert_eq!(client.store.channel_status(), ChannelStatus::NotOpen);
}

#[tokio::test]
async fn test_failed_delete_keeps_channel() {
    let clock = MockTimeSource::new();
    let mut client = TestClient::new(&clock);
    client.store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::Settled));

    let backend = MockBackend::new();
    backend.push_delete_result(Err(CommandError::backend("deleteChannel", "channel busy")));

    let result = client.store.delete_channel(&backend, "c1").await;
    assert!(matches!(result, Err(CommandError::Backend { .. })));
    assert!(client.store.contains("c1"));

    client.store.delete_channel(&backend, "c1").await.unwrap();
    assert!(!client.store.contains("c1"));
    assert_eq!(
        backend.calls(),
        vec![
            BackendCall::DeleteChannel {
                channel_id: "c1".into()
            },
            BackendCall::DeleteChannel {
                channel_id: "c1".into()
            },
        ]
    );
}

// ----------------------------------------------------------------------------
// Background Tasks
// ----------------------------------------------------------------------------

#[test]
fn test_task_notifications_flow_into_tracker() {
    let clock = MockTimeSource::new_at(10_000);
    let mut client = TestClient::new(&clock);
    let mut dispatcher = wired_dispatcher();

    dispatcher.dispatch(&mut client, &BackgroundTask::pending(TaskKind::Rollover).into());
    assert_eq!(
        client.tracker.display_top(),
        Some(BackgroundTask::pending(TaskKind::Rollover))
    );

    // A different kind while rollover is displayed is queued and reported
    dispatcher.dispatch(&mut client, &BackgroundTask::pending(TaskKind::Expire).into());
    assert_eq!(client.tracker.conflicts().count(), 1);
    assert_eq!(
        client.tracker.peek_top(),
        Some(&BackgroundTask::pending(TaskKind::Expire))
    );

    assert!(matches!(
        client.tracker.dismiss(),
        Err(TaskError::DismissNotAllowed { .. })
    ));

    // Success of the displayed kind unlocks it immediately
    dispatcher.dispatch(&mut client, &BackgroundTask::success(TaskKind::Rollover).into());
    assert_eq!(
        client.tracker.dismiss(),
        Ok(BackgroundTask::success(TaskKind::Rollover))
    );
    assert_eq!(client.tracker.queued().len(), 1);
}

#[test]
fn test_pending_task_unlocks_after_timeout() {
    let clock = MockTimeSource::new_at(0);
    let mut client = TestClient::new(&clock);

    client
        .tracker
        .on_notification(BackgroundTask::pending(TaskKind::CloseChannel));
    client.tracker.display_top();

    clock.advance(29_999);
    assert!(!client.tracker.can_dismiss());
    clock.advance(1);
    assert!(client.tracker.can_dismiss());
    assert!(client.tracker.dismiss().is_ok());
    assert_eq!(client.tracker.dismiss(), Err(TaskError::NothingDisplayed));
}

#[test]
fn test_failing_subscriber_does_not_block_others() {
    let clock = MockTimeSource::new();
    let mut client = TestClient::new(&clock);
    let mut dispatcher = wired_dispatcher();
    dispatcher.subscribe("broken", EventKind::ChannelEvent, |_: &mut TestClient, _| {
        panic!("subscriber bug")
    });
    dispatcher.subscribe("audit", EventKind::ChannelEvent, |_: &mut TestClient, _| Ok(()));

    let report = dispatcher.dispatch(&mut client, &ChannelEvent::offered("r1").into());
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].subscriber, "broken");
    assert_eq!(client.store.list_offered().len(), 1);

    assert_eq!(dispatcher.unsubscribe("broken"), 1);
    let report = dispatcher.dispatch(&mut client, &ChannelEvent::offered("r2").into());
    assert!(report.is_clean());
}

// ----------------------------------------------------------------------------
// Funding Fee Renewal
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_funding_fee_renewal_moves_collateral() {
    let clock = MockTimeSource::new_at(9 * HOUR);
    let mut store = ChannelStateStore::new(Arc::new(clock.clone()));
    store.seed(vec![established("c1")]);
    let backend = MockBackend::new();
    let protocol = FundingFeeRenewalProtocol::new(FundingConfig::default(), Arc::new(clock.clone()));

    let outcome = protocol
        .renew(&store, &backend, &renewal_request(CollateralSplit::new(100_000, 50_000)))
        .await
        .unwrap();

    let RenewalOutcome::Renewed(offer) = outcome else {
        panic!("expected a renewal, got {:?}", outcome);
    };
    assert_eq!(offer.fee.amount_sats, 7_500);
    assert_eq!(offer.fee.payer, ChannelParty::Accept);
    assert_eq!(offer.collateral, CollateralSplit::new(107_500, 42_500));
    assert_eq!(offer.event.amount_sats, 7_500);
    assert_eq!(offer.event.due_date, Timestamp::new(8 * HOUR));
    assert_eq!(offer.event.paid_date, Some(Timestamp::new(9 * HOUR)));
    assert_eq!(
        backend.calls(),
        vec![BackendCall::RenewChannel {
            channel_id: "c1".into(),
            offer_collateral: 107_500,
            accept_collateral: 42_500,
        }]
    );
}

#[tokio::test]
async fn test_fee_exceeding_payer_collateral_sends_nothing() {
    let clock = MockTimeSource::new_at(9 * HOUR);
    let mut store = ChannelStateStore::new(Arc::new(clock.clone()));
    store.seed(vec![established("c1")]);
    let backend = MockBackend::new();
    let protocol = FundingFeeRenewalProtocol::new(FundingConfig::default(), Arc::new(clock));

    let result = protocol
        .renew(&store, &backend, &renewal_request(CollateralSplit::new(1_000, 1_000)))
        .await;

    assert_eq!(
        result,
        Err(ChannelClientError::Funding(
            FundingError::FundingFeeViolatesCollateralInvariant {
                fee_sats: 7_500,
                payer_collateral: 1_000,
            }
        ))
    );
    assert_eq!(backend.count(BackendCommand::RenewChannel), 0);
}

#[tokio::test]
async fn test_settled_period_is_not_charged_twice() {
    let clock = MockTimeSource::new_at(9 * HOUR);
    let mut store = ChannelStateStore::new(Arc::new(clock.clone()));
    store.seed(vec![established("c1")]);
    let backend = MockBackend::new();
    let protocol = FundingFeeRenewalProtocol::new(FundingConfig::default(), Arc::new(clock));

    let mut request = renewal_request(CollateralSplit::new(100_000, 50_000));
    request.last_settlement = Some(Timestamp::new(8 * HOUR));

    let outcome = protocol.renew(&store, &backend, &request).await;
    assert_eq!(
        outcome,
        Ok(RenewalOutcome::NoFeeDue {
            channel_id: "c1".into()
        })
    );
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_renewal_requires_established_channel() {
    let clock = MockTimeSource::new();
    let backend = MockBackend::new();
    let protocol = FundingFeeRenewalProtocol::new(FundingConfig::default(), Arc::new(clock.clone()));
    let request = renewal_request(CollateralSplit::new(100_000, 50_000));

    let mut store = ChannelStateStore::new(Arc::new(clock));
    assert_eq!(
        protocol.renew(&store, &backend, &request).await,
        Err(ChannelClientError::Funding(FundingError::NoActiveChannel))
    );

    store.apply_event(&ChannelEvent::signed(None, "c1", SignedSubState::RenewOffered));
    assert!(matches!(
        protocol.renew(&store, &backend, &request).await,
        Err(ChannelClientError::Funding(FundingError::ChannelNotRenewable { .. }))
    ));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_rejected_renewal_is_reported() {
    let clock = MockTimeSource::new_at(9 * HOUR);
    let mut store = ChannelStateStore::new(Arc::new(clock.clone()));
    store.seed(vec![established("c1")]);
    let backend = MockBackend::new();
    backend.push_renew_result(Err(CommandError::backend("renewChannel", "counterparty offline")));
    let protocol = FundingFeeRenewalProtocol::new(FundingConfig::default(), Arc::new(clock));

    let error = protocol
        .renew(&store, &backend, &renewal_request(CollateralSplit::new(100_000, 50_000)))
        .await
        .unwrap_err();
    assert!(error.is_command_failure());
    assert_eq!(backend.count(BackendCommand::RenewChannel), 1);
    // No local state changed
    assert_eq!(store.channel_status(), ChannelStatus::WithPosition);
}
