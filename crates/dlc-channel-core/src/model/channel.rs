//! DLC Channel Entity Model
//!
//! A channel is identified by a `reference_id` while it is being negotiated and by a
//! permanent `id` once negotiation completes. Its state is a closed sum type: the signed
//! sub-state only exists inside [`ChannelState::Signed`], so "sub-state present iff the
//! outer state is signed" holds by construction.
//!
//! Both state enumerations parse from their wire strings without failing. Values this
//! client does not know land in an `Other` variant and are kept, never rejected.

use crate::types::Timestamp;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Outer State
// ----------------------------------------------------------------------------

/// Coarse protocol state of a DLC channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OuterState {
    Offered,
    Accepted,
    Signed,
    Cancelled,
    Closing,
    SettledClosing,
    Closed,
    CounterClosed,
    CollaborativelyClosed,
    ClosedPunished,
    FailedAccept,
    FailedSign,
    /// A state introduced by a newer backend
    Other(String),
}

impl OuterState {
    pub fn as_str(&self) -> &str {
        match self {
            OuterState::Offered => "offered",
            OuterState::Accepted => "accepted",
            OuterState::Signed => "signed",
            OuterState::Cancelled => "cancelled",
            OuterState::Closing => "closing",
            OuterState::SettledClosing => "settledClosing",
            OuterState::Closed => "closed",
            OuterState::CounterClosed => "counterClosed",
            OuterState::CollaborativelyClosed => "collaborativelyClosed",
            OuterState::ClosedPunished => "closedPunished",
            OuterState::FailedAccept => "failedAccept",
            OuterState::FailedSign => "failedSign",
            OuterState::Other(raw) => raw,
        }
    }

    /// Closed, counter-closed or collaboratively closed
    pub fn is_terminal_closed(&self) -> bool {
        matches!(
            self,
            OuterState::Closed | OuterState::CounterClosed | OuterState::CollaborativelyClosed
        )
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, OuterState::Other(_))
    }
}

impl FromStr for OuterState {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "offered" => OuterState::Offered,
            "accepted" => OuterState::Accepted,
            "signed" => OuterState::Signed,
            "cancelled" => OuterState::Cancelled,
            "closing" => OuterState::Closing,
            "settledClosing" => OuterState::SettledClosing,
            "closed" => OuterState::Closed,
            "counterClosed" => OuterState::CounterClosed,
            "collaborativelyClosed" => OuterState::CollaborativelyClosed,
            "closedPunished" => OuterState::ClosedPunished,
            "failedAccept" => OuterState::FailedAccept,
            "failedSign" => OuterState::FailedSign,
            other => OuterState::Other(other.to_string()),
        })
    }
}

impl From<String> for OuterState {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl From<OuterState> for String {
    fn from(value: OuterState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for OuterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Signed Sub-State
// ----------------------------------------------------------------------------

/// Detailed state of a signed DLC channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignedSubState {
    Established,
    SettledOffered,
    SettledReceived,
    SettledAccepted,
    SettledConfirmed,
    Settled,
    RenewOffered,
    RenewAccepted,
    RenewConfirmed,
    RenewFinalized,
    Closing,
    SettledClosing,
    CollaborativeCloseOffered,
    /// A sub-state introduced by a newer backend, or a signed event without one
    Other(String),
}

impl SignedSubState {
    pub fn as_str(&self) -> &str {
        match self {
            SignedSubState::Established => "established",
            SignedSubState::SettledOffered => "settledOffered",
            SignedSubState::SettledReceived => "settledReceived",
            SignedSubState::SettledAccepted => "settledAccepted",
            SignedSubState::SettledConfirmed => "settledConfirmed",
            SignedSubState::Settled => "settled",
            SignedSubState::RenewOffered => "renewOffered",
            SignedSubState::RenewAccepted => "renewAccepted",
            SignedSubState::RenewConfirmed => "renewConfirmed",
            SignedSubState::RenewFinalized => "renewFinalized",
            SignedSubState::Closing => "closing",
            SignedSubState::SettledClosing => "settledClosing",
            SignedSubState::CollaborativeCloseOffered => "collaborativeCloseOffered",
            SignedSubState::Other(raw) => raw,
        }
    }

    /// A settle protocol is in progress
    pub fn is_settling(&self) -> bool {
        matches!(
            self,
            SignedSubState::SettledOffered
                | SignedSubState::SettledReceived
                | SignedSubState::SettledAccepted
                | SignedSubState::SettledConfirmed
        )
    }

    /// A renew (rollover, resize, funding-fee) protocol is in progress
    pub fn is_renewing(&self) -> bool {
        matches!(
            self,
            SignedSubState::RenewOffered
                | SignedSubState::RenewAccepted
                | SignedSubState::RenewConfirmed
                | SignedSubState::RenewFinalized
        )
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, SignedSubState::Closing | SignedSubState::SettledClosing)
    }

    /// The channel still carries a contract, i.e. the trader has a position
    pub fn carries_position(&self) -> bool {
        matches!(
            self,
            SignedSubState::Established
                | SignedSubState::RenewOffered
                | SignedSubState::RenewAccepted
                | SignedSubState::RenewConfirmed
                | SignedSubState::RenewFinalized
                | SignedSubState::SettledOffered
        )
    }

    /// The channel is open but its contract has been settled
    pub fn is_without_position(&self) -> bool {
        matches!(
            self,
            SignedSubState::Settled
                | SignedSubState::SettledAccepted
                | SignedSubState::SettledConfirmed
        )
    }

    /// No protocol exchange is in progress. Any other sub-state observed at startup means
    /// a protocol was interrupted and needs recovery.
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            SignedSubState::Established
                | SignedSubState::Settled
                | SignedSubState::SettledClosing
                | SignedSubState::Closing
                | SignedSubState::CollaborativeCloseOffered
        )
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SignedSubState::Other(_))
    }
}

impl FromStr for SignedSubState {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "established" => SignedSubState::Established,
            "settledOffered" => SignedSubState::SettledOffered,
            "settledReceived" => SignedSubState::SettledReceived,
            "settledAccepted" => SignedSubState::SettledAccepted,
            "settledConfirmed" => SignedSubState::SettledConfirmed,
            "settled" => SignedSubState::Settled,
            "renewOffered" => SignedSubState::RenewOffered,
            "renewAccepted" => SignedSubState::RenewAccepted,
            "renewConfirmed" => SignedSubState::RenewConfirmed,
            "renewFinalized" => SignedSubState::RenewFinalized,
            "closing" => SignedSubState::Closing,
            "settledClosing" => SignedSubState::SettledClosing,
            "collaborativeCloseOffered" => SignedSubState::CollaborativeCloseOffered,
            other => SignedSubState::Other(other.to_string()),
        })
    }
}

impl From<String> for SignedSubState {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl From<SignedSubState> for String {
    fn from(value: SignedSubState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SignedSubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Channel State
// ----------------------------------------------------------------------------

/// Full channel state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Offered,
    Accepted,
    Signed(SignedSubState),
    Cancelled,
    Closing,
    SettledClosing,
    Closed,
    CounterClosed,
    CollaborativelyClosed,
    ClosedPunished,
    FailedAccept,
    FailedSign,
    Other(String),
}

/// Sub-state recorded for a signed channel reported without one
pub const MISSING_SUB_STATE: &str = "missing";

impl ChannelState {
    /// Build a state from the flat (outer, sub-state) view carried by events
    ///
    /// Returns the state plus a description of anything that had to be discarded or
    /// defaulted to keep the signed sub-state invariant.
    pub fn from_parts(
        outer: OuterState,
        sub_state: Option<SignedSubState>,
    ) -> (Self, Option<String>) {
        let state = match outer {
            OuterState::Signed => {
                return match sub_state {
                    Some(sub_state) => (ChannelState::Signed(sub_state), None),
                    None => (
                        ChannelState::Signed(SignedSubState::Other(
                            MISSING_SUB_STATE.to_string(),
                        )),
                        Some("signed channel reported without a sub-state".to_string()),
                    ),
                };
            }
            OuterState::Offered => ChannelState::Offered,
            OuterState::Accepted => ChannelState::Accepted,
            OuterState::Cancelled => ChannelState::Cancelled,
            OuterState::Closing => ChannelState::Closing,
            OuterState::SettledClosing => ChannelState::SettledClosing,
            OuterState::Closed => ChannelState::Closed,
            OuterState::CounterClosed => ChannelState::CounterClosed,
            OuterState::CollaborativelyClosed => ChannelState::CollaborativelyClosed,
            OuterState::ClosedPunished => ChannelState::ClosedPunished,
            OuterState::FailedAccept => ChannelState::FailedAccept,
            OuterState::FailedSign => ChannelState::FailedSign,
            OuterState::Other(raw) => ChannelState::Other(raw),
        };

        let discarded = sub_state.map(|sub_state| {
            format!(
                "dropped sub-state {} reported for non-signed channel",
                sub_state
            )
        });
        (state, discarded)
    }

    pub fn outer_state(&self) -> OuterState {
        match self {
            ChannelState::Offered => OuterState::Offered,
            ChannelState::Accepted => OuterState::Accepted,
            ChannelState::Signed(_) => OuterState::Signed,
            ChannelState::Cancelled => OuterState::Cancelled,
            ChannelState::Closing => OuterState::Closing,
            ChannelState::SettledClosing => OuterState::SettledClosing,
            ChannelState::Closed => OuterState::Closed,
            ChannelState::CounterClosed => OuterState::CounterClosed,
            ChannelState::CollaborativelyClosed => OuterState::CollaborativelyClosed,
            ChannelState::ClosedPunished => OuterState::ClosedPunished,
            ChannelState::FailedAccept => OuterState::FailedAccept,
            ChannelState::FailedSign => OuterState::FailedSign,
            ChannelState::Other(raw) => OuterState::Other(raw.clone()),
        }
    }

    pub fn signed_sub_state(&self) -> Option<&SignedSubState> {
        match self {
            ChannelState::Signed(sub_state) => Some(sub_state),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Signed(sub_state) => write!(f, "signed/{}", sub_state),
            other => write!(f, "{}", other.outer_state()),
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Key
// ----------------------------------------------------------------------------

/// Key of an entry in the channel map: the reference id while offered, the channel id
/// afterwards
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChannelKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ----------------------------------------------------------------------------
// Channel Entity
// ----------------------------------------------------------------------------

/// Local projection of one DLC channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ChannelRecord", into = "ChannelRecord")]
pub struct ChannelEntity {
    /// Permanent channel id, known once negotiation completed
    pub id: Option<String>,
    /// Temporary id assigned at offer time
    pub reference_id: Option<String>,
    pub state: ChannelState,
    /// When the last event for this channel was applied
    pub updated_at: Timestamp,
}

impl ChannelEntity {
    pub fn new(
        id: Option<String>,
        reference_id: Option<String>,
        state: ChannelState,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id,
            reference_id,
            state,
            updated_at,
        }
    }

    pub fn outer_state(&self) -> OuterState {
        self.state.outer_state()
    }

    pub fn signed_sub_state(&self) -> Option<&SignedSubState> {
        self.state.signed_sub_state()
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.state, ChannelState::Signed(_))
    }

    /// Human readable identifier for logs
    pub fn display_id(&self) -> &str {
        self.id
            .as_deref()
            .or(self.reference_id.as_deref())
            .unwrap_or("<unkeyed>")
    }
}

/// Flat wire shape of a channel entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelRecord {
    id: Option<String>,
    reference_id: Option<String>,
    outer_state: OuterState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signed_sub_state: Option<SignedSubState>,
    updated_at: Timestamp,
}

impl From<ChannelRecord> for ChannelEntity {
    fn from(record: ChannelRecord) -> Self {
        let (state, _) = ChannelState::from_parts(record.outer_state, record.signed_sub_state);
        ChannelEntity::new(record.id, record.reference_id, state, record.updated_at)
    }
}

impl From<ChannelEntity> for ChannelRecord {
    fn from(entity: ChannelEntity) -> Self {
        ChannelRecord {
            outer_state: entity.state.outer_state(),
            signed_sub_state: entity.state.signed_sub_state().cloned(),
            id: entity.id,
            reference_id: entity.reference_id,
            updated_at: entity.updated_at,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_outer_state_is_kept() {
        let state: OuterState = "splicing".parse().unwrap();
        assert_eq!(state, OuterState::Other("splicing".to_string()));
        assert!(!state.is_known());
        assert_eq!(state.to_string(), "splicing");
    }

    #[test]
    fn test_known_states_round_trip_through_strings() {
        for raw in ["offered", "signed", "settledClosing", "collaborativelyClosed"] {
            let state: OuterState = raw.parse().unwrap();
            assert!(state.is_known());
            assert_eq!(String::from(state), raw);
        }
    }

    #[test]
    fn test_from_parts_enforces_sub_state_invariant() {
        let (state, note) =
            ChannelState::from_parts(OuterState::Signed, Some(SignedSubState::Settled));
        assert_eq!(state.signed_sub_state(), Some(&SignedSubState::Settled));
        assert!(note.is_none());

        let (state, note) =
            ChannelState::from_parts(OuterState::Offered, Some(SignedSubState::Settled));
        assert_eq!(state, ChannelState::Offered);
        assert!(state.signed_sub_state().is_none());
        assert!(note.is_some());

        let (state, note) = ChannelState::from_parts(OuterState::Signed, None);
        assert_eq!(
            state.signed_sub_state(),
            Some(&SignedSubState::Other(MISSING_SUB_STATE.to_string()))
        );
        assert!(note.is_some());
    }

    #[test]
    fn test_sub_state_partitions() {
        assert!(SignedSubState::Established.carries_position());
        assert!(SignedSubState::SettledOffered.carries_position());
        assert!(SignedSubState::SettledOffered.is_settling());
        assert!(SignedSubState::SettledConfirmed.is_without_position());
        assert!(!SignedSubState::SettledReceived.is_without_position());
        assert!(SignedSubState::RenewFinalized.is_renewing());
        assert!(!SignedSubState::RenewOffered.is_stable());
        assert!(SignedSubState::CollaborativeCloseOffered.is_stable());
    }

    #[test]
    fn test_entity_serializes_flat_state() {
        let entity = ChannelEntity::new(
            Some("c1".to_string()),
            Some("r1".to_string()),
            ChannelState::Signed(SignedSubState::RenewOffered),
            Timestamp::new(7),
        );
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["outerState"], "signed");
        assert_eq!(json["signedSubState"], "renewOffered");
        assert_eq!(json["referenceId"], "r1");

        let back: ChannelEntity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_entity_keeps_unknown_outer_state_on_the_wire() {
        let json = serde_json::json!({
            "id": "c9",
            "referenceId": null,
            "outerState": "splicing",
            "updatedAt": 1
        });
        let entity: ChannelEntity = serde_json::from_value(json).unwrap();
        assert_eq!(entity.state, ChannelState::Other("splicing".to_string()));
        assert_eq!(serde_json::to_value(&entity).unwrap()["outerState"], "splicing");
    }
}
