//! Funding-Fee Renewal Protocol
//!
//! A perpetual position pays (or receives) a funding fee at a fixed cadence. The fee is
//! settled by renewing the DLC channel with a new collateral split: the payer's
//! collateral shrinks by the fee and the receiver's grows by the same amount. Because
//! both values travel in the same renew request, the fee exchange and the renewal either
//! both happen or neither does.
//!
//! Nothing here retries. A failed renew is reported to the caller; a renewal that got
//! stuck mid-protocol is picked up by the `recover` background task.

use core::fmt;
use core::time::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendCommand, ChannelBackend};
use crate::config::FundingConfig;
use crate::errors::{ChannelClientError, FundingError};
use crate::model::{ChannelEntity, SignedSubState};
use crate::store::ChannelStateStore;
use crate::types::{ChannelParty, Direction, SystemTimeSource, TimeSource, Timestamp};

pub const SATS_PER_BTC: i64 = 100_000_000;

/// Fees are computed in BTC and rounded to whole sats
const BTC_DECIMAL_PLACES: u32 = 8;

// ----------------------------------------------------------------------------
// Funding Rate
// ----------------------------------------------------------------------------

/// The funding rate for positions that stayed open through `end_date`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRate {
    /// Positive: longs pay shorts. Negative: shorts pay longs.
    rate: Decimal,
    start_date: Timestamp,
    end_date: Timestamp,
}

impl FundingRate {
    /// Both dates are rounded down to a whole hour
    pub fn new(rate: Decimal, start_date: Timestamp, end_date: Timestamp) -> Self {
        Self {
            rate,
            start_date: start_date.floor_to_hour(),
            end_date: end_date.floor_to_hour(),
        }
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub fn start_date(&self) -> Timestamp {
        self.start_date
    }

    pub fn end_date(&self) -> Timestamp {
        self.end_date
    }
}

/// Compute the fee a trader owes for one funding period, in sats
///
/// Positive means the trader pays, negative means the trader receives. `elapsed` is the
/// part of the period the position was open; anything beyond `interval` counts as one
/// full period.
pub fn calculate_funding_fee(
    quantity: Decimal,
    funding_rate: Decimal,
    index_price: Decimal,
    trader_direction: Direction,
    elapsed: Duration,
    interval: Duration,
) -> Result<i64, FundingError> {
    if index_price <= Decimal::ZERO {
        return Err(FundingError::InvalidIndexPrice {
            price: index_price.to_string(),
        });
    }
    if interval.as_millis() == 0 {
        return Err(FundingError::Overflow {
            reason: "funding interval is shorter than one millisecond".into(),
        });
    }

    // The rate is quoted for the market (longs vs shorts); flip it for a short trader
    let funding_rate = match trader_direction {
        Direction::Long => funding_rate,
        Direction::Short => -funding_rate,
    };

    let overflow = |step: &str| FundingError::Overflow {
        reason: format!("{} overflowed", step),
    };

    // E.g. 500 [$] / 20_000 [$/BTC] = 0.025 [BTC]
    let mark_value = quantity
        .checked_div(index_price)
        .ok_or_else(|| overflow("mark value"))?;
    let fee_btc = mark_value
        .checked_mul(funding_rate)
        .and_then(|fee| period_share(elapsed, interval).and_then(|share| fee.checked_mul(share)))
        .ok_or_else(|| overflow("fee"))?
        .round_dp_with_strategy(BTC_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero);

    fee_btc
        .checked_mul(Decimal::from(SATS_PER_BTC))
        .and_then(|sats| sats.to_i64())
        .ok_or_else(|| overflow("sat conversion"))
}

fn period_share(elapsed: Duration, interval: Duration) -> Option<Decimal> {
    if elapsed >= interval {
        return Some(Decimal::ONE);
    }
    let millis = |d: Duration| Decimal::from(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    millis(elapsed).checked_div(millis(interval))
}

// ----------------------------------------------------------------------------
// Collateral
// ----------------------------------------------------------------------------

/// A funding fee between the two channel parties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingFee {
    pub amount_sats: u64,
    pub payer: ChannelParty,
}

impl FundingFee {
    /// Convert a trader-relative fee into a payer and an amount. `None` for a zero fee.
    pub fn from_trader_fee(fee_sats: i64, trader: ChannelParty) -> Option<Self> {
        let payer = match fee_sats {
            0 => return None,
            fee if fee > 0 => trader,
            _ => trader.counterparty(),
        };
        Some(Self {
            amount_sats: fee_sats.unsigned_abs(),
            payer,
        })
    }

    pub fn receiver(&self) -> ChannelParty {
        self.payer.counterparty()
    }
}

/// Collateral locked by each party of a channel, in sats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralSplit {
    pub offer: u64,
    pub accept: u64,
}

impl CollateralSplit {
    pub fn new(offer: u64, accept: u64) -> Self {
        Self { offer, accept }
    }

    pub fn of(&self, party: ChannelParty) -> u64 {
        match party {
            ChannelParty::Offer => self.offer,
            ChannelParty::Accept => self.accept,
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.offer.checked_add(self.accept)
    }

    /// Move `fee` from the payer to the receiver
    ///
    /// Rejected as a whole if the payer cannot cover it; the total is preserved.
    pub fn apply_fee(&self, fee: &FundingFee) -> Result<Self, FundingError> {
        let payer_collateral = self.of(fee.payer);
        let payer_after = payer_collateral.checked_sub(fee.amount_sats).ok_or(
            FundingError::FundingFeeViolatesCollateralInvariant {
                fee_sats: fee.amount_sats,
                payer_collateral,
            },
        )?;
        let receiver_after = self
            .of(fee.receiver())
            .checked_add(fee.amount_sats)
            .ok_or_else(|| FundingError::Overflow {
                reason: "receiver collateral overflowed".into(),
            })?;

        Ok(match fee.payer {
            ChannelParty::Offer => Self::new(payer_after, receiver_after),
            ChannelParty::Accept => Self::new(receiver_after, payer_after),
        })
    }
}

impl fmt::Display for CollateralSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offer={} accept={}", self.offer, self.accept)
    }
}

// ----------------------------------------------------------------------------
// Renewal Types
// ----------------------------------------------------------------------------

/// Record of a funding fee settled through a channel renewal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingFeeEvent {
    /// Sats, positive when the trader pays
    pub amount_sats: i64,
    pub due_date: Timestamp,
    pub price: Decimal,
    pub funding_rate: Decimal,
    /// Set once the renew offer carrying the fee was accepted by the backend
    pub paid_date: Option<Timestamp>,
}

/// Everything needed to settle one funding period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalRequest {
    pub funding_rate: FundingRate,
    /// Position size in quote currency
    pub quantity: Decimal,
    pub index_price: Decimal,
    pub trader_direction: Direction,
    /// Which side of the channel the trader is
    pub trader_party: ChannelParty,
    /// Current collateral split of the channel
    pub collateral: CollateralSplit,
    /// End of the last settled funding period, if any
    pub last_settlement: Option<Timestamp>,
}

/// The renew command to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewOffer {
    pub channel_id: String,
    pub fee: FundingFee,
    pub collateral: CollateralSplit,
    pub event: FundingFeeEvent,
}

/// Result of planning a renewal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalPlan {
    Renew(RenewOffer),
    /// The fee is zero or below the configured minimum
    NoFeeDue { channel_id: String },
}

/// Result of a completed renewal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    Renewed(RenewOffer),
    NoFeeDue { channel_id: String },
}

// ----------------------------------------------------------------------------
// Renewal Protocol
// ----------------------------------------------------------------------------

pub struct FundingFeeRenewalProtocol {
    config: FundingConfig,
    time_source: Arc<dyn TimeSource>,
}

impl Default for FundingFeeRenewalProtocol {
    fn default() -> Self {
        Self::new(FundingConfig::default(), Arc::new(SystemTimeSource::new()))
    }
}

impl FundingFeeRenewalProtocol {
    pub fn new(config: FundingConfig, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            time_source,
        }
    }

    pub fn config(&self) -> &FundingConfig {
        &self.config
    }

    /// Decide what to send for the store's active channel without touching anything
    pub fn plan(
        &self,
        store: &ChannelStateStore,
        request: &RenewalRequest,
    ) -> Result<RenewalPlan, FundingError> {
        let channel = store
            .active_signed_channel()
            .ok_or(FundingError::NoActiveChannel)?;
        self.plan_for(channel, request)
    }

    /// Decide what to send for `channel`
    pub fn plan_for(
        &self,
        channel: &ChannelEntity,
        request: &RenewalRequest,
    ) -> Result<RenewalPlan, FundingError> {
        let channel_id = match (&channel.id, channel.signed_sub_state()) {
            (Some(id), Some(SignedSubState::Established)) => id.clone(),
            _ => {
                return Err(FundingError::ChannelNotRenewable {
                    channel_id: channel.display_id().to_string(),
                    state: channel.state.to_string(),
                })
            }
        };

        let rate = &request.funding_rate;
        let period_start = match request.last_settlement {
            Some(last) if last >= rate.end_date() => {
                debug!(%channel_id, due = %rate.end_date(), "Funding period already settled");
                return Ok(RenewalPlan::NoFeeDue { channel_id });
            }
            Some(last) => last.max(rate.start_date()),
            None => rate.start_date(),
        };
        let elapsed = rate.end_date().duration_since(period_start);

        let fee_sats = calculate_funding_fee(
            request.quantity,
            rate.rate(),
            request.index_price,
            request.trader_direction,
            elapsed,
            self.config.interval,
        )?;

        let fee = match FundingFee::from_trader_fee(fee_sats, request.trader_party) {
            Some(fee) if fee.amount_sats >= self.config.min_fee_sats => fee,
            _ => {
                debug!(%channel_id, fee_sats, "No funding fee due");
                return Ok(RenewalPlan::NoFeeDue { channel_id });
            }
        };

        let collateral = request.collateral.apply_fee(&fee).map_err(|error| {
            warn!(%channel_id, collateral = %request.collateral, %error, "Rejecting funding fee renewal");
            error
        })?;

        Ok(RenewalPlan::Renew(RenewOffer {
            channel_id,
            fee,
            collateral,
            event: FundingFeeEvent {
                amount_sats: fee_sats,
                due_date: rate.end_date(),
                price: request.index_price,
                funding_rate: rate.rate(),
                paid_date: None,
            },
        }))
    }

    /// Send the planned renew offer and report the result
    pub async fn execute(
        &self,
        backend: &dyn ChannelBackend,
        offer: RenewOffer,
    ) -> Result<RenewalOutcome, ChannelClientError> {
        let result = backend
            .renew_channel(&offer.channel_id, offer.collateral.offer, offer.collateral.accept)
            .await;
        self.complete(offer, result.map_err(ChannelClientError::from))
    }

    /// Turn the backend's answer to a renew offer into an outcome
    pub fn complete(
        &self,
        mut offer: RenewOffer,
        result: Result<(), ChannelClientError>,
    ) -> Result<RenewalOutcome, ChannelClientError> {
        match result {
            Ok(()) => {
                offer.event.paid_date = Some(self.time_source.now());
                info!(
                    channel_id = %offer.channel_id,
                    fee_sats = offer.event.amount_sats,
                    collateral = %offer.collateral,
                    "Funding fee renewal offered"
                );
                Ok(RenewalOutcome::Renewed(offer))
            }
            Err(error) => {
                error!(
                    channel_id = %offer.channel_id,
                    command = %BackendCommand::RenewChannel,
                    %error,
                    "Funding fee renewal failed"
                );
                Err(error)
            }
        }
    }

    /// Plan and execute a renewal of the store's active channel
    pub async fn renew(
        &self,
        store: &ChannelStateStore,
        backend: &dyn ChannelBackend,
        request: &RenewalRequest,
    ) -> Result<RenewalOutcome, ChannelClientError> {
        match self.plan(store, request)? {
            RenewalPlan::NoFeeDue { channel_id } => Ok(RenewalOutcome::NoFeeDue { channel_id }),
            RenewalPlan::Renew(offer) => self.execute(backend, offer).await,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const EIGHT_HOURS: Duration = Duration::from_secs(8 * 3600);

    fn full_period(quantity: Decimal, rate: Decimal, price: Decimal, direction: Direction) -> i64 {
        calculate_funding_fee(quantity, rate, price, direction, EIGHT_HOURS, EIGHT_HOURS).unwrap()
    }

    #[test]
    fn test_funding_fee_direction_and_sign() {
        assert_eq!(full_period(dec!(500), dec!(0.003), dec!(20_000), Direction::Long), 7_500);
        assert_eq!(full_period(dec!(500), dec!(0.003), dec!(20_000), Direction::Short), -7_500);
        assert_eq!(full_period(dec!(500), dec!(-0.003), dec!(20_000), Direction::Long), -7_500);
        assert_eq!(full_period(dec!(500), dec!(-0.003), dec!(20_000), Direction::Short), 7_500);
        assert_eq!(full_period(dec!(500), dec!(0.003), dec!(40_000), Direction::Long), 3_750);
    }

    #[test]
    fn test_funding_fee_rounds_midpoint_away_from_zero() {
        // 5 / 10_000 * 0.00001 = 0.000000005 BTC
        assert_eq!(full_period(dec!(5), dec!(0.00001), dec!(10_000), Direction::Long), 1);
        assert_eq!(full_period(dec!(5), dec!(0.00001), dec!(10_000), Direction::Short), -1);
        assert_eq!(full_period(dec!(1), dec!(0.0001), dec!(30_000), Direction::Long), 0);
    }

    #[test]
    fn test_funding_fee_is_prorated() {
        let half = calculate_funding_fee(
            dec!(500),
            dec!(0.003),
            dec!(20_000),
            Direction::Long,
            Duration::from_secs(4 * 3600),
            EIGHT_HOURS,
        );
        assert_eq!(half, Ok(3_750));

        let over = calculate_funding_fee(
            dec!(500),
            dec!(0.003),
            dec!(20_000),
            Direction::Long,
            Duration::from_secs(24 * 3600),
            EIGHT_HOURS,
        );
        assert_eq!(over, Ok(7_500));
    }

    #[test]
    fn test_zero_index_price_is_rejected() {
        let result = calculate_funding_fee(
            dec!(500),
            dec!(0.003),
            Decimal::ZERO,
            Direction::Long,
            EIGHT_HOURS,
            EIGHT_HOURS,
        );
        assert!(matches!(result, Err(FundingError::InvalidIndexPrice { .. })));
    }

    #[test]
    fn test_sub_millisecond_interval_is_rejected() {
        let result = calculate_funding_fee(
            dec!(500),
            dec!(0.003),
            dec!(20_000),
            Direction::Long,
            Duration::ZERO,
            Duration::from_micros(500),
        );
        assert!(matches!(result, Err(FundingError::Overflow { .. })));
    }

    #[test]
    fn test_funding_rate_dates_round_to_hour() {
        let hour = 3_600_000;
        let rate = FundingRate::new(dec!(0.001), Timestamp::new(hour + 59_999), Timestamp::new(9 * hour + 1));
        assert_eq!(rate.start_date(), Timestamp::new(hour));
        assert_eq!(rate.end_date(), Timestamp::new(9 * hour));
    }

    #[test]
    fn test_fee_moves_collateral_between_parties() {
        let split = CollateralSplit::new(1_000, 1_000);
        let fee = FundingFee::from_trader_fee(-300, ChannelParty::Accept).unwrap();
        assert_eq!(fee.payer, ChannelParty::Offer);

        let after = split.apply_fee(&fee).unwrap();
        assert_eq!(after, CollateralSplit::new(700, 1_300));
        assert_eq!(after.total(), split.total());
        assert!(FundingFee::from_trader_fee(0, ChannelParty::Accept).is_none());
    }

    #[test]
    fn test_fee_larger_than_payer_collateral_is_rejected() {
        let split = CollateralSplit::new(1_000, 1_000);
        let fee = FundingFee {
            amount_sats: 1_500,
            payer: ChannelParty::Offer,
        };
        assert_eq!(
            split.apply_fee(&fee),
            Err(FundingError::FundingFeeViolatesCollateralInvariant {
                fee_sats: 1_500,
                payer_collateral: 1_000,
            })
        );

        let exact = FundingFee {
            amount_sats: 1_000,
            payer: ChannelParty::Offer,
        };
        assert_eq!(split.apply_fee(&exact), Ok(CollateralSplit::new(0, 2_000)));
    }
}
