//! Frame timing.

use std::time::{Duration, Instant};

/// Measures elapsed time and reports a frame rate over a fixed window.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    window_start: Instant,
    window_frames: u32,
    report_interval: Duration,
}

impl Timer {
    /// Create a new timer reporting once per second.
    pub fn new() -> Self {
        Self::with_report_interval(Duration::from_secs(1))
    }

    /// Create a new timer with a custom reporting window.
    pub fn with_report_interval(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            window_start: now,
            window_frames: 0,
            report_interval,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Counts one frame.
    ///
    /// Returns the average frames per second once the reporting window has
    /// elapsed, then starts a new window.
    pub fn frame(&mut self) -> Option<f32> {
        self.window_frames += 1;

        let window = self.window_start.elapsed();
        if window < self.report_interval {
            return None;
        }

        let fps = self.window_frames as f32 / window.as_secs_f32();
        self.window_start = Instant::now();
        self.window_frames = 0;
        Some(fps)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
