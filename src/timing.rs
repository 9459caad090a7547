//! Timing bookkeeping for the transfer loop
//!
//! Translates raw server-reported stream time and latency into the common
//! time-base structure handed to the buffer processor. When the server has
//! no timing data yet, the previous value is left untouched rather than
//! reset to zero, so transient unavailability never shows up as a timing
//! discontinuity.

use crate::server::ServerStream;

const USEC_PER_SEC: f64 = 1_000_000.0;

/// Callback time info in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeInfo {
    /// Current stream time
    pub current_time: f64,
    /// Estimated capture time of the current input buffer
    pub input_buffer_adc_time: f64,
    /// Estimated playback time of the current output buffer
    pub output_buffer_dac_time: f64,
}

/// Refresh `time_info` from a server stream. `record` selects which side
/// the latency estimate feeds: capture (ADC) or playback (DAC). Direction
/// is explicit, never inferred.
pub fn update_time_info(stream: &dyn ServerStream, time_info: &mut TimeInfo, record: bool) {
    match stream.time() {
        Some(usec) => time_info.current_time = usec as f64 / USEC_PER_SEC,
        None => tracing::debug!("no stream time available"),
    }

    match stream.latency() {
        Some(latency) => {
            let mut seconds = latency.usec as f64 / USEC_PER_SEC;
            if latency.negative {
                seconds = -seconds;
            }
            if record {
                time_info.input_buffer_adc_time = seconds;
            } else {
                time_info.output_buffer_dac_time = seconds;
            }
        }
        None => tracing::debug!("no stream latency available"),
    }
}
