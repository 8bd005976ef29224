//! 31-bit wrapping sequence numbers for data-channel payloads.
//!
//! # Why 31 bits?
//!
//! Both ends of the link serialize sequence numbers as JSON numbers, and the
//! peers that produce them wrap their counters at `2^31` so the value always
//! fits a signed 32-bit integer on every platform.  Ordering therefore has to
//! be decided with modular arithmetic: after `2^31 - 1` comes `0`, and `0`
//! must still count as "newer".
//!
//! # Acceptance rule
//!
//! [`seq_ahead`] maps the difference between two sequence numbers into the
//! signed range `(-2^30, 2^30]`.  A positive distance means "newer".  This is
//! correct across the wrap boundary and tolerates reordering of up to half the
//! modulus, which is far more than any real link produces.

/// The sequence-number modulus (`2^31`).
pub const SEQ_MODULUS: u32 = 1 << 31;

/// Returns `true` when `current` is strictly newer than `previous`.
///
/// The first message always wins: with no previous sequence the result is
/// `true`.  Duplicates (distance 0) and anything more than half the modulus
/// ahead (which is really behind) are rejected.
///
/// # Examples
///
/// ```rust
/// use rover_core::protocol::sequence::{seq_ahead, SEQ_MODULUS};
///
/// assert!(seq_ahead(5, None));
/// assert!(seq_ahead(6, Some(5)));
/// assert!(!seq_ahead(5, Some(5)));
/// assert!(seq_ahead(0, Some(SEQ_MODULUS - 1)));
/// ```
pub fn seq_ahead(current: u32, previous: Option<u32>) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let modulus = i64::from(SEQ_MODULUS);
    let mut diff = (i64::from(current) - i64::from(previous)).rem_euclid(modulus);
    if diff > modulus / 2 {
        diff -= modulus;
    }
    diff > 0
}

/// Outbound sequence counter for control payloads.
///
/// The first call to [`next`](Self::next) returns `1`; the counter wraps from
/// `2^31 - 1` back to `0`.  The owning data-channel manager is the only
/// writer, so no atomics are needed.
///
/// # Examples
///
/// ```rust
/// use rover_core::protocol::OutboundSequence;
///
/// let mut seq = OutboundSequence::new();
/// assert_eq!(seq.next(), 1);
/// assert_eq!(seq.next(), 2);
/// assert_eq!(seq.current(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundSequence {
    /// The most recently issued value (0 before the first send).
    current: u32,
}

impl OutboundSequence {
    /// Creates a new counter; the first issued value is 1.
    pub fn new() -> Self {
        Self { current: 0 }
    }

    /// Advances the counter and returns the new value.
    pub fn next(&mut self) -> u32 {
        self.current = (self.current + 1) % SEQ_MODULUS;
        self.current
    }

    /// Returns the most recently issued value without advancing.
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Restarts the counter so the next issued value is 1 again.
    pub fn reset(&mut self) {
        self.current = 0;
    }
}
