//! Coarse channel status
//!
//! Everything in here is a pure function of a set of channel entities.

use super::channel::{ChannelEntity, ChannelState, SignedSubState};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Application-level view of the trader's channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelStatus {
    NotOpen,
    WithPosition,
    Settling,
    Open,
    Renewing,
    Unknown,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelStatus::NotOpen => "notOpen",
            ChannelStatus::WithPosition => "withPosition",
            ChannelStatus::Settling => "settling",
            ChannelStatus::Open => "open",
            ChannelStatus::Renewing => "renewing",
            ChannelStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Project the coarse status from the signed channels, first match wins:
///
/// | signed sub-state                    | status         |
/// |-------------------------------------|----------------|
/// | established                         | `WithPosition` |
/// | settledOffered .. settledConfirmed  | `Settling`     |
/// | settled                             | `Open`         |
/// | renewOffered .. renewFinalized      | `Renewing`     |
/// | closing, settledClosing             | `NotOpen`      |
/// | anything else                       | `Unknown`      |
///
/// No signed channel yields `NotOpen`. Channels in an unrecognized outer state turn an
/// `Open` or `NotOpen` result into `Unknown`.
pub fn project_status<'a, I>(channels: I) -> ChannelStatus
where
    I: IntoIterator<Item = &'a ChannelEntity>,
{
    let mut signed: Vec<&SignedSubState> = Vec::new();
    let mut has_other = false;

    for channel in channels {
        match &channel.state {
            ChannelState::Signed(sub_state) => signed.push(sub_state),
            ChannelState::Other(_) => has_other = true,
            _ => {}
        }
    }

    let status = project_signed(&signed);
    match status {
        ChannelStatus::Open | ChannelStatus::NotOpen if has_other => ChannelStatus::Unknown,
        status => status,
    }
}

fn project_signed(signed: &[&SignedSubState]) -> ChannelStatus {
    if signed.is_empty() {
        return ChannelStatus::NotOpen;
    }

    let any = |pred: fn(&SignedSubState) -> bool| signed.iter().any(|s| pred(s));

    if any(|s| matches!(s, SignedSubState::Established)) {
        ChannelStatus::WithPosition
    } else if any(SignedSubState::is_settling) {
        ChannelStatus::Settling
    } else if any(|s| matches!(s, SignedSubState::Settled)) {
        // An unknown sub-state next to a settled channel must not read as safe to trade
        if any(|s| !s.is_known()) {
            ChannelStatus::Unknown
        } else {
            ChannelStatus::Open
        }
    } else if any(SignedSubState::is_renewing) {
        ChannelStatus::Renewing
    } else if any(SignedSubState::is_closing) {
        if any(|s| !s.is_known()) {
            ChannelStatus::Unknown
        } else {
            ChannelStatus::NotOpen
        }
    } else {
        ChannelStatus::Unknown
    }
}

/// Any signed channel still carries a contract
pub fn has_open_position<'a, I>(channels: I) -> bool
where
    I: IntoIterator<Item = &'a ChannelEntity>,
{
    channels
        .into_iter()
        .filter_map(ChannelEntity::signed_sub_state)
        .any(SignedSubState::carries_position)
}

/// Any signed channel is open with a settled contract
pub fn has_channel_without_position<'a, I>(channels: I) -> bool
where
    I: IntoIterator<Item = &'a ChannelEntity>,
{
    channels
        .into_iter()
        .filter_map(ChannelEntity::signed_sub_state)
        .any(SignedSubState::is_without_position)
}

/// A signed channel exists that is neither closing, being collaboratively closed, nor in
/// an unrecognized sub-state
pub fn can_force_close<'a, I>(channels: I) -> bool
where
    I: IntoIterator<Item = &'a ChannelEntity>,
{
    channels
        .into_iter()
        .filter_map(ChannelEntity::signed_sub_state)
        .any(|s| {
            s.is_known() && !s.is_closing() && !matches!(s, SignedSubState::CollaborativeCloseOffered)
        })
}

/// Some channel is on its way to an on-chain close
pub fn is_closing<'a, I>(channels: I) -> bool
where
    I: IntoIterator<Item = &'a ChannelEntity>,
{
    channels.into_iter().any(|channel| match &channel.state {
        ChannelState::Closing | ChannelState::SettledClosing => true,
        ChannelState::Signed(sub_state) => sub_state.is_closing(),
        _ => false,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
