//! Admission gate in front of all outbound API calls.
//!
//! The Spotify Web API computes its limit over a rolling 30 second window.
//! Own requests are counted against a fixed window of the same length with a
//! ceiling comfortably below what the service tolerates:
//!
//! * 180 calls per 30 seconds
//! * A single counter shared by every endpoint
//! * Requests over the ceiling are rejected, not delayed
//!
//! Rejections are a hint for the caller to poll less often. They do not
//! guarantee that the server will never answer 429.

use std::{
    num::NonZeroU32,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use governor::clock::{Clock, MonotonicClock, Reference};

use crate::error::{Error, Result};

/// Fixed-window request counter.
///
/// Generic over the clock so that tests can substitute
/// [`governor::clock::FakeRelativeClock`].
pub struct RateLimiter<C: Clock = MonotonicClock> {
    clock: C,
    window: Duration,
    ceiling: NonZeroU32,
    state: Mutex<RateWindow<C::Instant>>,
}

#[derive(Clone, Copy)]
struct RateWindow<I> {
    start: I,
    count: u32,
}

/// Length of the counting window.
pub const WINDOW: Duration = Duration::from_secs(30);

/// Maximum calls admitted per window.
pub const CEILING: u32 = 180;

impl RateLimiter {
    #[must_use]
    pub fn new(window: Duration, ceiling: NonZeroU32) -> Self {
        Self::with_clock(window, ceiling, MonotonicClock)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(WINDOW, NonZeroU32::new(CEILING).unwrap_or(NonZeroU32::MIN))
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(window: Duration, ceiling: NonZeroU32, clock: C) -> Self {
        let start = clock.now();
        Self {
            clock,
            window,
            ceiling,
            state: Mutex::new(RateWindow { start, count: 0 }),
        }
    }

    /// Admits one request or rejects it with `RateLimitExceeded`.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` when the ceiling has been reached within
    /// the current window.
    pub fn acquire(&self) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let elapsed = Duration::from(now.duration_since(state.start));
        if elapsed > self.window {
            state.start = now;
            state.count = 0;
        }

        if state.count >= self.ceiling.get() {
            return Err(Error::rate_limit_exceeded(format!(
                "{} requests within {}s",
                state.count,
                self.window.as_secs()
            )));
        }

        state.count += 1;
        Ok(())
    }

    /// Calls admitted in the current window.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count
    }

    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}
