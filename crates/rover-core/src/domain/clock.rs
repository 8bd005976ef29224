//! One-shot clock offset between the vehicle's wall clock and the local
//! monotonic clock.
//!
//! The offset is fixed by the first timestamped sample and never refined.
//! Clock drift over a long session therefore shows up as a slowly growing
//! error in mapped times.

/// Maps sender timestamps into the local clock domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockSync {
    offset_ms: Option<f64>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// `local - remote`, once known.
    pub fn offset_ms(&self) -> Option<f64> {
        self.offset_ms
    }

    /// Returns the local time for a sample received at `now_ms`.
    ///
    /// The first call with a timestamp fixes the offset.  Samples without a
    /// timestamp map to their receipt time.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rover_core::domain::clock::ClockSync;
    ///
    /// let mut clock = ClockSync::new();
    /// assert_eq!(clock.map(Some(1_000.0), 50.0), 50.0);
    /// // offset is now -950; later samples keep their relative spacing
    /// assert_eq!(clock.map(Some(1_100.0), 400.0), 150.0);
    /// assert_eq!(clock.map(None, 400.0), 400.0);
    /// ```
    pub fn map(&mut self, sent_at_ms: Option<f64>, now_ms: f64) -> f64 {
        match sent_at_ms {
            Some(sent_at) => {
                let offset = *self.offset_ms.get_or_insert(now_ms - sent_at);
                sent_at + offset
            }
            None => now_ms,
        }
    }
}
