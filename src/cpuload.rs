//! CPU load measurement for the transfer thread
//!
//! Diagnostics only: measures the fraction of realtime the transfer
//! iteration spends doing work, exponentially smoothed. Never affects
//! control flow.

use std::time::Instant;

/// Smoothing factor for the running load average
const LOAD_SMOOTHING: f64 = 0.9;

/// Start/stop timer reporting transfer-loop CPU usage as a fraction of
/// the realtime the processed frames represent.
pub struct CpuLoadMeasurer {
    sample_rate: f64,
    measurement_start: Option<Instant>,
    average_load: f64,
}

impl CpuLoadMeasurer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            measurement_start: None,
            average_load: 0.0,
        }
    }

    /// Mark the start of one transfer iteration
    pub fn begin(&mut self) {
        self.measurement_start = Some(Instant::now());
    }

    /// Mark the end of one transfer iteration that processed
    /// `frames_processed` frames. Iterations that processed nothing leave
    /// the average untouched.
    pub fn end(&mut self, frames_processed: u64) {
        let Some(start) = self.measurement_start.take() else {
            return;
        };
        if frames_processed == 0 || self.sample_rate <= 0.0 {
            return;
        }

        let elapsed = start.elapsed().as_secs_f64();
        let buffer_duration = frames_processed as f64 / self.sample_rate;
        let load = elapsed / buffer_duration;
        self.average_load = LOAD_SMOOTHING * self.average_load + (1.0 - LOAD_SMOOTHING) * load;
    }

    /// Smoothed CPU load, 0.0 = idle, 1.0 = consuming all realtime
    pub fn value(&self) -> f64 {
        self.average_load
    }
}
