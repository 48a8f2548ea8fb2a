//! Loop pacing and the shutdown flag shared by both loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::{LoopConfig, LoopMode};

/// One-way stop signal observed by both loops after each iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Paces a loop at a target rate.
///
/// In fixed mode, elapsed time accumulates and [`LoopClock::advance`] returns
/// how many whole steps are due, at most `max_catch_up_steps`; time beyond
/// that is dropped. In adaptive mode every call yields one step of the actual
/// elapsed length.
#[derive(Debug, Clone)]
pub struct LoopClock {
    mode: LoopMode,
    step: Duration,
    max_catch_up: u32,
    accumulator: Duration,
    last: Option<Instant>,
}

/// Steps due after an [`LoopClock::advance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub steps: u32,
    /// Seconds simulated per step
    pub dt: f64,
}

impl LoopClock {
    pub fn new(config: &LoopConfig) -> Self {
        let rate = if config.rate_hz.is_finite() && config.rate_hz > 0.0 {
            config.rate_hz
        } else {
            60.0
        };
        Self {
            mode: config.mode,
            step: Duration::from_secs_f64(1.0 / rate),
            max_catch_up: config.max_catch_up_steps.max(1),
            accumulator: Duration::ZERO,
            last: None,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Accounts for time elapsed up to `now`.
    pub fn advance(&mut self, now: Instant) -> Tick {
        let elapsed = match self.last.replace(now) {
            Some(last) => now.saturating_duration_since(last),
            None => self.step,
        };
        match self.mode {
            LoopMode::Fixed => {
                self.accumulator += elapsed;
                let mut steps = 0;
                while self.accumulator >= self.step && steps < self.max_catch_up {
                    self.accumulator -= self.step;
                    steps += 1;
                }
                if steps == self.max_catch_up && self.accumulator >= self.step {
                    tracing::debug!(
                        dropped_ms = self.accumulator.as_secs_f64() * 1000.0,
                        "Loop fell behind, dropping time"
                    );
                    self.accumulator = Duration::ZERO;
                }
                Tick {
                    steps,
                    dt: self.step.as_secs_f64(),
                }
            }
            LoopMode::Adaptive => Tick {
                steps: 1,
                dt: elapsed.as_secs_f64(),
            },
        }
    }

    /// How long to sleep after an iteration that started at `started`.
    pub fn idle_time(&self, started: Instant, now: Instant) -> Duration {
        let busy = now.saturating_duration_since(started);
        match self.mode {
            LoopMode::Fixed => self.step.saturating_sub(self.accumulator).saturating_sub(busy),
            LoopMode::Adaptive => self.step.saturating_sub(busy),
        }
    }

    /// Sleeps out the rest of the iteration.
    pub fn wait(&self, started: Instant) {
        let idle = self.idle_time(started, Instant::now());
        if !idle.is_zero() {
            std::thread::sleep(idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fixed(rate_hz: f64, max_catch_up_steps: u32) -> LoopClock {
        LoopClock::new(&LoopConfig {
            rate_hz,
            mode: LoopMode::Fixed,
            max_catch_up_steps,
        })
    }

    #[test]
    fn test_fixed_accumulates_partial_steps() {
        let mut clock = fixed(100.0, 5);
        let start = Instant::now();
        assert_eq!(clock.advance(start).steps, 1);
        assert_eq!(clock.advance(start + Duration::from_millis(5)).steps, 0);
        let tick = clock.advance(start + Duration::from_millis(25));
        assert_eq!(tick.steps, 2);
        assert_relative_eq!(tick.dt, 0.01);
    }

    #[test]
    fn test_fixed_catch_up_is_bounded() {
        let mut clock = fixed(100.0, 3);
        let start = Instant::now();
        clock.advance(start);
        assert_eq!(clock.advance(start + Duration::from_secs(1)).steps, 3);
        // The backlog was dropped rather than carried.
        assert_eq!(clock.advance(start + Duration::from_millis(1005)).steps, 0);
    }

    #[test]
    fn test_adaptive_uses_elapsed_time() {
        let mut clock = LoopClock::new(&LoopConfig::adaptive(50.0));
        let start = Instant::now();
        clock.advance(start);
        let tick = clock.advance(start + Duration::from_millis(30));
        assert_eq!(tick.steps, 1);
        assert_relative_eq!(tick.dt, 0.03, epsilon = 1e-9);
        assert_eq!(
            clock.idle_time(start, start + Duration::from_millis(5)),
            Duration::from_millis(15)
        );
    }

    #[test]
    fn test_shutdown_flag_is_shared() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.is_requested());
        flag.request();
        assert!(other.is_requested());
    }
}
