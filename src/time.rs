//! Host-side simulation clock.
//!
//! The clock turns wall-clock frame intervals into the `(time, delta)` pair
//! a [`Frame`](crate::simulation::Frame) carries. Simulation time is the sum
//! of the deltas handed out, so it never jumps: a long stall is clamped to
//! `max_delta`, pausing contributes nothing, and scaling applies to each
//! delta rather than to total elapsed time.
//!
//! # Example
//!
//! ```ignore
//! let mut clock = SimClock::new();
//! clock.set_max_delta(0.1);
//!
//! // Once per frame:
//! let (time, delta) = clock.update();
//! sim.step(&mut backend, &Frame::new(time, delta))?;
//! ```

use std::time::Instant;

/// Default cap on a single step, in seconds.
pub const DEFAULT_MAX_DELTA: f32 = 0.1;

/// Accumulating simulation clock.
#[derive(Debug)]
pub struct SimClock {
    /// Wall-clock instant of the last update.
    last_frame: Option<Instant>,
    /// Simulation time in seconds.
    elapsed: f32,
    /// Step handed out by the last update.
    delta: f32,
    /// Frames since start (paused frames included).
    frame_count: u64,
    paused: bool,
    /// Replaces the measured interval when set.
    fixed_delta: Option<f32>,
    time_scale: f32,
    max_delta: f32,
}

impl SimClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self {
            last_frame: None,
            elapsed: 0.0,
            delta: 0.0,
            frame_count: 0,
            paused: false,
            fixed_delta: None,
            time_scale: 1.0,
            max_delta: DEFAULT_MAX_DELTA,
        }
    }

    /// Measure the wall-clock interval since the last call and advance by it.
    ///
    /// The first call measures nothing and yields a zero delta (or the fixed
    /// delta, if one is set).
    pub fn update(&mut self) -> (f32, f32) {
        let now = Instant::now();
        let raw = self
            .last_frame
            .map(|last| now.duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);
        self.advance(raw)
    }

    /// Advance by an externally measured interval. Deterministic.
    ///
    /// Returns `(time, delta)` where `time` already includes `delta`.
    pub fn advance(&mut self, raw_delta: f32) -> (f32, f32) {
        self.frame_count += 1;
        if self.paused {
            self.delta = 0.0;
            return (self.elapsed, 0.0);
        }
        let raw = self.fixed_delta.unwrap_or(raw_delta);
        let raw = if raw.is_finite() { raw.max(0.0) } else { 0.0 };
        self.delta = raw.min(self.max_delta) * self.time_scale;
        self.elapsed += self.delta;
        (self.elapsed, self.delta)
    }

    /// Simulation time in seconds.
    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Last step in seconds.
    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta
    }

    /// Updates since start.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    /// Whether time is currently paused.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Current time scale multiplier.
    #[inline]
    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Largest raw interval accepted per update.
    #[inline]
    pub fn max_delta(&self) -> f32 {
        self.max_delta
    }

    /// Pause time progression. While paused, deltas are 0.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume after pausing. The pause duration is not replayed.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.last_frame = Some(Instant::now());
        }
    }

    /// Toggle pause state.
    pub fn toggle_pause(&mut self) {
        if self.paused {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Use a fixed step instead of the measured interval. `None` restores
    /// real frame timing.
    pub fn set_fixed_delta(&mut self, delta: Option<f32>) {
        self.fixed_delta = delta;
    }

    /// Set time scale multiplier.
    ///
    /// - `1.0` = normal speed
    /// - `0.5` = half speed (slow motion)
    /// - `2.0` = double speed
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    /// Cap a single raw interval, so a stalled frame does not make particles
    /// jump.
    pub fn set_max_delta(&mut self, max_delta: f32) {
        self.max_delta = max_delta.max(0.0);
    }

    /// Back to time zero; settings are kept.
    pub fn reset(&mut self) {
        self.last_frame = None;
        self.elapsed = 0.0;
        self.delta = 0.0;
        self.frame_count = 0;
        self.paused = false;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clock_new() {
        let clock = SimClock::new();
        assert_eq!(clock.frame(), 0);
        assert!(!clock.is_paused());
        assert_eq!(clock.time_scale(), 1.0);
        assert_eq!(clock.elapsed(), 0.0);
    }

    #[test]
    fn test_elapsed_is_sum_of_deltas() {
        let mut clock = SimClock::new();
        let mut sum = 0.0;
        for raw in [0.016, 0.02, 0.01, 0.033] {
            let (_, delta) = clock.advance(raw);
            sum += delta;
        }
        assert!((clock.elapsed() - sum).abs() < 1e-6);
        assert_eq!(clock.frame(), 4);
    }

    #[test]
    fn test_stall_is_clamped() {
        let mut clock = SimClock::new();
        clock.set_max_delta(0.05);
        let (time, delta) = clock.advance(3.0);
        assert_eq!(delta, 0.05);
        assert_eq!(time, 0.05);
    }

    #[test]
    fn test_invalid_intervals_ignored() {
        let mut clock = SimClock::new();
        assert_eq!(clock.advance(-1.0).1, 0.0);
        assert_eq!(clock.advance(f32::NAN).1, 0.0);
    }

    #[test]
    fn test_pause() {
        let mut clock = SimClock::new();
        clock.advance(0.01);
        clock.pause();
        let before = clock.elapsed();
        let (time, delta) = clock.advance(0.05);
        assert_eq!(time, before);
        assert_eq!(delta, 0.0);
        clock.resume();
        assert!(clock.advance(0.01).1 > 0.0);
    }

    #[test]
    fn test_time_scale() {
        let mut clock = SimClock::new();
        clock.set_time_scale(2.0);
        assert_eq!(clock.advance(0.01).1, 0.02);

        // Negative scale should clamp to 0
        clock.set_time_scale(-1.0);
        assert_eq!(clock.time_scale(), 0.0);
    }

    #[test]
    fn test_fixed_delta() {
        let mut clock = SimClock::new();
        clock.set_fixed_delta(Some(1.0 / 60.0));
        clock.update();
        thread::sleep(Duration::from_millis(20));
        let (_, delta) = clock.update();
        assert!((delta - 1.0 / 60.0).abs() < 0.0001);
    }

    #[test]
    fn test_first_update_is_zero() {
        let mut clock = SimClock::new();
        assert_eq!(clock.update(), (0.0, 0.0));
    }
}
