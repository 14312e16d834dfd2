//! Linear accrual arithmetic.
//!
//! Pure functions over a [`StreamRecipient`] and a wall-clock instant; no I/O.
//! Elapsed time is measured in `Decimal` seconds at nanosecond resolution.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use tradestream_types::{Result, StreamRecipient, TradestreamError};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Seconds from `from` to `to` (negative if `to` is earlier).
#[must_use]
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Decimal {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(nanos) => Decimal::from_i128_with_scale(i128::from(nanos), 9),
        None => Decimal::from(delta.num_seconds()),
    }
}

/// A `Decimal` number of seconds as a duration, rounded to the nanosecond.
///
/// # Errors
/// `Internal` if the value does not fit a duration.
pub fn duration_from_seconds(seconds: Decimal) -> Result<Duration> {
    seconds
        .checked_mul(Decimal::from(NANOS_PER_SEC))
        .and_then(|nanos| nanos.round().to_i64())
        .map(Duration::nanoseconds)
        .ok_or_else(|| TradestreamError::Internal(format!("{seconds}s is out of range")))
}

/// `allocation / duration_seconds`.
///
/// # Errors
/// `InvalidStream` for a zero duration.
pub fn rate_per_second(allocation: Decimal, duration_seconds: u64) -> Result<Decimal> {
    if duration_seconds == 0 {
        return Err(TradestreamError::InvalidStream {
            reason: "duration_seconds must be > 0".into(),
        });
    }
    allocation
        .checked_div(Decimal::from(duration_seconds))
        .ok_or_else(|| TradestreamError::InvalidStream {
            reason: format!("rate for {allocation} over {duration_seconds}s overflows"),
        })
}

/// What a recipient could claim at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    /// `min(now, end_time)`.
    pub effective_now: DateTime<Utc>,
    /// Seconds since the last claim, never negative.
    pub elapsed: Decimal,
    /// `elapsed × rate`, uncapped (saturates at `Decimal::MAX`).
    pub accrued: Decimal,
    /// `accrued` capped at the unwithdrawn allocation.
    pub claimable: Decimal,
}

impl Accrual {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elapsed <= Decimal::ZERO || self.claimable <= Decimal::ZERO
    }
}

/// Accrual for `recipient` at `now`.
///
/// Once `end_time` is reached the whole unwithdrawn allocation is claimable,
/// so rounding in `rate_per_second` never strands dust.
#[must_use]
pub fn accrue(recipient: &StreamRecipient, now: DateTime<Utc>) -> Accrual {
    let effective_now = now.min(recipient.end_time);
    let elapsed = seconds_between(recipient.last_claim_time, effective_now).max(Decimal::ZERO);
    let accrued = elapsed
        .checked_mul(recipient.rate_per_second)
        .unwrap_or(Decimal::MAX);
    let unwithdrawn = recipient.unwithdrawn().max(Decimal::ZERO);

    let claimable = if elapsed.is_zero() {
        Decimal::ZERO
    } else if effective_now >= recipient.end_time {
        unwithdrawn
    } else {
        accrued.min(unwithdrawn)
    };

    Accrual {
        effective_now,
        elapsed,
        accrued,
        claimable,
    }
}

/// New `last_claim_time` after claiming `claimed` out of `accrual`.
///
/// Claiming everything moves the clock to `effective_now`. A partial claim
/// advances it by exactly `claimed / rate` seconds so the remainder keeps
/// accruing from where it was.
///
/// # Errors
/// `Internal` if the advance does not fit a duration.
pub fn advance_claim_time(
    recipient: &StreamRecipient,
    accrual: &Accrual,
    claimed: Decimal,
) -> Result<DateTime<Utc>> {
    if claimed >= accrual.claimable || recipient.rate_per_second <= Decimal::ZERO {
        return Ok(accrual.effective_now);
    }
    let seconds = claimed
        .checked_div(recipient.rate_per_second)
        .ok_or_else(|| TradestreamError::Internal(format!("{claimed} / rate overflows")))?;
    let advanced = recipient
        .last_claim_time
        .checked_add_signed(duration_from_seconds(seconds)?)
        .unwrap_or(accrual.effective_now);
    Ok(advanced.min(accrual.effective_now))
}

#[cfg(test)]
mod tests {
    use tradestream_types::{RecipientId, StreamId, UserId};

    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn schedule(allocation: i64, duration: i64) -> (StreamRecipient, DateTime<Utc>) {
        let start = Utc::now();
        let recipient = StreamRecipient {
            id: RecipientId::new(),
            stream_id: StreamId::new(),
            recipient_address: "bitcoincash:qrecipient".into(),
            recipient_user_id: UserId::new(),
            allocation: dec(allocation),
            start_time: start,
            end_time: start + Duration::seconds(duration),
            rate_per_second: rate_per_second(dec(allocation), duration.unsigned_abs()).unwrap(),
            withdrawn_amount: Decimal::ZERO,
            last_claim_time: start,
            version: 0,
        };
        (recipient, start)
    }

    #[test]
    fn linear_in_elapsed_time() {
        let (r, start) = schedule(100, 100);
        for t in [1, 25, 50, 99] {
            let a = accrue(&r, start + Duration::seconds(t));
            assert_eq!(a.claimable, dec(t));
        }
    }

    #[test]
    fn capped_at_allocation_after_end() {
        let (r, start) = schedule(100, 100);
        let a = accrue(&r, start + Duration::seconds(1_000));
        assert_eq!(a.effective_now, r.end_time);
        assert_eq!(a.claimable, dec(100));
    }

    #[test]
    fn nothing_before_start() {
        let (r, start) = schedule(100, 100);
        let a = accrue(&r, start - Duration::seconds(5));
        assert!(a.is_empty());
        assert_eq!(a.elapsed, Decimal::ZERO);
    }

    #[test]
    fn sub_second_resolution() {
        let (r, start) = schedule(100, 100);
        let a = accrue(&r, start + Duration::milliseconds(1_500));
        assert_eq!(a.claimable, Decimal::new(15, 1));
    }

    #[test]
    fn repeating_rate_vests_fully_at_end() {
        let (r, start) = schedule(100, 3);
        let a = accrue(&r, r.end_time);
        assert_eq!(a.claimable, dec(100));
        assert!(accrue(&r, start + Duration::seconds(1)).claimable < dec(34));
    }

    #[test]
    fn partial_claim_advances_by_claimed_time() {
        let (r, start) = schedule(100, 100);
        let a = accrue(&r, start + Duration::seconds(50));
        let next = advance_claim_time(&r, &a, dec(20)).unwrap();
        assert_eq!(next, start + Duration::seconds(20));
    }

    #[test]
    fn full_claim_moves_to_effective_now() {
        let (r, start) = schedule(100, 100);
        let a = accrue(&r, start + Duration::seconds(500));
        let next = advance_claim_time(&r, &a, a.claimable).unwrap();
        assert_eq!(next, r.end_time);
    }

    #[test]
    fn zero_duration_rejected() {
        assert!(matches!(
            rate_per_second(dec(10), 0),
            Err(TradestreamError::InvalidStream { .. })
        ));
    }

    #[test]
    fn seconds_roundtrip() {
        let start = Utc::now();
        let end = start + Duration::nanoseconds(2_500_000_001);
        let secs = seconds_between(start, end);
        assert_eq!(secs, Decimal::new(2_500_000_001, 9));
        assert_eq!(duration_from_seconds(secs).unwrap(), end - start);
    }
}
