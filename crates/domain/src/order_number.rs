//! Order-number generation.
//!
//! Order numbers come from a snowflake-style id: milliseconds since a custom
//! epoch, a worker id, and a per-millisecond sequence. No allocator round-trip
//! is needed; uniqueness across processes follows from distinct worker ids.
//!
//! The rendered form is `ORD` + 13-digit Unix milliseconds + 7-digit
//! `worker << 12 | sequence`, e.g. `ORD17302000000000004097`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 2023-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MS: u64 = 1_672_531_200_000;

/// Fixed alphabetic prefix of every order number.
pub const PREFIX: &str = "ORD";

/// How far the wall clock may step back before generation fails.
pub const CLOCK_SKEW_TOLERANCE_MS: u64 = 10;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// Largest accepted worker id.
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

const TIMESTAMP_DIGITS: usize = 13;
const UNIQUE_DIGITS: usize = 7;

/// Reasons an id cannot be issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("clock moved backwards by {drift_ms}ms (tolerance {}ms)", CLOCK_SKEW_TOLERANCE_MS)]
    ClockMovedBackwards { drift_ms: u64 },

    #[error("system clock is before the id epoch")]
    ClockBeforeEpoch,

    #[error("worker id {0} out of range (max {max})", max = MAX_WORKER_ID)]
    InvalidWorkerId(u16),
}

/// A generated order number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Parses a rendered order number, validating prefix, width and digits.
    pub fn parse(s: &str) -> Option<Self> {
        let digits = s.strip_prefix(PREFIX)?;
        if digits.len() != TIMESTAMP_DIGITS + UNIQUE_DIGITS
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        Some(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the wall-clock component in Unix milliseconds.
    pub fn timestamp_ms(&self) -> u64 {
        let start = PREFIX.len();
        self.0[start..start + TIMESTAMP_DIGITS]
            .parse()
            .unwrap_or_default()
    }

    /// Returns the wall-clock component as a UTC timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(i64::try_from(self.timestamp_ms()).ok()?)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of order numbers. The coordinator depends on this seam rather than
/// on a concrete generator.
pub trait OrderNumberSource: Send + Sync {
    /// Issues a new order number, failing closed if uniqueness cannot be
    /// guaranteed.
    fn generate(&self) -> Result<OrderNumber, IdError>;
}

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

/// Lock-free snowflake generator.
///
/// The last issued `(elapsed_ms, sequence)` pair is packed into one atomic and
/// advanced with compare-and-swap, so concurrent callers never share an id.
pub struct SnowflakeGenerator {
    worker_id: u16,
    /// `elapsed_ms << SEQUENCE_BITS | sequence` of the last issued id.
    state: AtomicU64,
    clock: Clock,
}

impl SnowflakeGenerator {
    /// Creates a generator reading the system clock.
    pub fn new(worker_id: u16) -> Result<Self, IdError> {
        Self::with_clock(worker_id, system_millis)
    }

    /// Creates a generator with a custom Unix-millisecond clock.
    pub fn with_clock(
        worker_id: u16,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Result<Self, IdError> {
        if worker_id > MAX_WORKER_ID {
            return Err(IdError::InvalidWorkerId(worker_id));
        }
        Ok(Self {
            worker_id,
            state: AtomicU64::new(0),
            clock: Box::new(clock),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Returns the next raw 63-bit id.
    pub fn next_id(&self) -> Result<u64, IdError> {
        let (elapsed, sequence) = self.next_slot()?;
        Ok((elapsed << (WORKER_BITS + SEQUENCE_BITS))
            | (u64::from(self.worker_id) << SEQUENCE_BITS)
            | sequence)
    }

    fn next_slot(&self) -> Result<(u64, u64), IdError> {
        loop {
            let now = (self.clock)()
                .checked_sub(EPOCH_MS)
                .ok_or(IdError::ClockBeforeEpoch)?;
            let current = self.state.load(Ordering::Acquire);
            let last_ms = current >> SEQUENCE_BITS;
            let last_seq = current & MAX_SEQUENCE;

            let next = if now > last_ms {
                now << SEQUENCE_BITS
            } else {
                let drift_ms = last_ms - now;
                if drift_ms > CLOCK_SKEW_TOLERANCE_MS {
                    return Err(IdError::ClockMovedBackwards { drift_ms });
                }
                if last_seq == MAX_SEQUENCE {
                    // Millisecond exhausted; wait for the clock to pass it.
                    std::hint::spin_loop();
                    continue;
                }
                current + 1
            };

            if self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok((next >> SEQUENCE_BITS, next & MAX_SEQUENCE));
            }
        }
    }
}

impl OrderNumberSource for SnowflakeGenerator {
    fn generate(&self) -> Result<OrderNumber, IdError> {
        let (elapsed, sequence) = self.next_slot()?;
        let unique = (u64::from(self.worker_id) << SEQUENCE_BITS) | sequence;
        Ok(OrderNumber(format!(
            "{PREFIX}{:0tw$}{:0uw$}",
            elapsed + EPOCH_MS,
            unique,
            tw = TIMESTAMP_DIGITS,
            uw = UNIQUE_DIGITS,
        )))
    }
}

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
