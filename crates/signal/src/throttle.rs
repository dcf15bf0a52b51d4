// Leading-edge rate limiting.
//
// The first call in a quiet period runs immediately and opens a suppression
// window; calls landing inside the window are dropped, never queued or
// replayed on the trailing edge.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    suppressed_until: Option<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            suppressed_until: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Claim the slot at `now`. False while a window is still open.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        if self.is_suppressed_at(now) {
            return false;
        }
        self.suppressed_until = Some(now + self.window);
        true
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn is_suppressed_at(&self, now: Instant) -> bool {
        self.suppressed_until.is_some_and(|until| now < until)
    }

    /// Close any open window.
    pub fn reset(&mut self) {
        self.suppressed_until = None;
    }
}

/// A function wrapped in a `RateLimiter`.
pub struct Throttled<F> {
    func: F,
    limiter: RateLimiter,
}

/// Wrap `func` so it runs at most once per `window`.
pub fn limit<F>(func: F, window: Duration) -> Throttled<F> {
    Throttled {
        func,
        limiter: RateLimiter::new(window),
    }
}

impl<F> Throttled<F> {
    /// Invoke the wrapped function unless suppressed. Returns whether it ran.
    pub fn call<A>(&mut self, args: A) -> bool
    where
        F: FnMut(A),
    {
        self.call_at(args, Instant::now())
    }

    pub fn call_at<A>(&mut self, args: A, now: Instant) -> bool
    where
        F: FnMut(A),
    {
        if !self.limiter.try_acquire_at(now) {
            return false;
        }
        (self.func)(args);
        true
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn reset(&mut self) {
        self.limiter.reset();
    }
}
