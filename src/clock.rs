//! Millisecond time source and wraparound-safe deadlines.

/// A free running millisecond counter. Wrapping past `u32::MAX` is expected.
pub trait Clock {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u32;
}

impl<F> Clock for F
where
    F: Fn() -> u32,
{
    fn now_ms(&self) -> u32 {
        self()
    }
}

/// Milliseconds from `start` to `now`, modulo 2^32.
#[inline]
pub fn elapsed(start: u32, now: u32) -> u32 {
    now.wrapping_sub(start)
}

/// A timeout armed at a given instant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    start: u32,
    timeout: u32,
}

impl Deadline {
    /// Arms a deadline `timeout` ms after `now`.
    pub fn new(now: u32, timeout: u32) -> Self {
        Self {
            start: now,
            timeout,
        }
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: u32) -> bool {
        elapsed(self.start, now) >= self.timeout
    }

    /// Milliseconds left before expiry, zero once expired.
    pub fn remaining(&self, now: u32) -> u32 {
        self.timeout.saturating_sub(elapsed(self.start, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_at_timeout() {
        let d = Deadline::new(100, 10);
        assert!(!d.is_expired(100));
        assert!(!d.is_expired(109));
        assert!(d.is_expired(110));
        assert_eq!(d.remaining(104), 6);
        assert_eq!(d.remaining(500), 0);
    }

    #[test]
    fn survives_counter_wraparound() {
        let d = Deadline::new(u32::MAX - 4, 10);
        assert!(!d.is_expired(u32::MAX));
        assert!(!d.is_expired(4));
        assert!(d.is_expired(5));
        assert_eq!(elapsed(u32::MAX, 1), 2);
    }

    #[test]
    fn closures_are_clocks() {
        let clock = || 42u32;
        assert_eq!(clock.now_ms(), 42);
    }
}
