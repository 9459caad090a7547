//! Buffer processor abstraction
//!
//! The buffer processor is the external collaborator that performs
//! sample-format conversion and invokes the application's audio callback.
//! The transfer thread brackets each host buffer with
//! [`BufferProcessor::begin_processing`] / [`BufferProcessor::end_processing`]
//! and hands interleaved byte regions in between; everything about formats
//! and the user callback stays behind this trait.

use crate::timing::TimeInfo;

/// Continuation signal returned by the application callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    /// Keep streaming
    Continue,
    /// Finish after draining what has been produced
    Complete,
    /// Stop immediately, discarding buffered data
    Abort,
}

/// Outcome of one processing pass
#[derive(Debug, Clone, Copy)]
pub struct ProcessingResult {
    pub frames_processed: u64,
    pub result: CallbackResult,
}

/// Format-agnostic processor driving the application audio callback.
///
/// Call order per pass: `begin_processing`, the input/output staging
/// setters for the configured directions, then `end_processing`, which
/// runs the callback and fills the presented output region.
pub trait BufferProcessor: Send {
    /// Drop any buffered state; called once per stream start
    fn reset(&mut self);

    /// Host buffer size in frames, `None` when the application left it
    /// unspecified (the transfer thread then derives it from the
    /// server-negotiated buffer sizes)
    fn frames_per_host_buffer(&self) -> Option<u32>;

    fn begin_processing(&mut self, time_info: &TimeInfo, flags: u32);

    /// Present the current interleaved input region
    fn set_interleaved_input(&mut self, data: &[u8], channels: u16);

    fn set_input_frame_count(&mut self, frames: u32);

    /// Record the interleaved output channel layout; the output region
    /// itself is presented to [`BufferProcessor::end_processing`]
    fn set_interleaved_output(&mut self, channels: u16);

    fn set_output_frame_count(&mut self, frames: u32);

    /// Run the application callback, producing into `output` (empty for a
    /// capture-only stream)
    fn end_processing(&mut self, output: &mut [u8]) -> ProcessingResult;

    /// Final teardown; called once at stream close
    fn terminate(&mut self);
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic processor doubles for lifecycle and transfer tests

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Observable processor state, shared with the test that built the
    /// processor (the processor itself is boxed away inside the stream).
    #[derive(Default)]
    pub(crate) struct ProcessorProbe {
        pub reset_calls: u32,
        pub end_calls: u32,
        pub terminated: bool,
        pub inputs_seen: Vec<Vec<u8>>,
    }

    /// Copies the presented input to the output (mono passthrough) and
    /// records every call; switches to `Complete` after a configured
    /// number of processing passes.
    pub(crate) struct PassthroughProcessor {
        frames_per_buffer: Option<u32>,
        complete_after: Option<u32>,
        staged_input: Vec<u8>,
        probe: Arc<Mutex<ProcessorProbe>>,
    }

    impl PassthroughProcessor {
        pub fn new(frames_per_buffer: u32) -> (Self, Arc<Mutex<ProcessorProbe>>) {
            let probe = Arc::new(Mutex::new(ProcessorProbe::default()));
            let processor = Self {
                frames_per_buffer: Some(frames_per_buffer),
                complete_after: None,
                staged_input: Vec::new(),
                probe: probe.clone(),
            };
            (processor, probe)
        }

        pub fn completing_after(mut self, passes: u32) -> Self {
            self.complete_after = Some(passes);
            self
        }

        /// Leave the host buffer size unspecified, forcing the transfer
        /// thread to derive one itself
        pub fn without_host_buffer_size(mut self) -> Self {
            self.frames_per_buffer = None;
            self
        }
    }

    impl BufferProcessor for PassthroughProcessor {
        fn reset(&mut self) {
            self.probe.lock().reset_calls += 1;
        }

        fn frames_per_host_buffer(&self) -> Option<u32> {
            self.frames_per_buffer
        }

        fn begin_processing(&mut self, _time_info: &TimeInfo, _flags: u32) {}

        fn set_interleaved_input(&mut self, data: &[u8], _channels: u16) {
            self.staged_input = data.to_vec();
            self.probe.lock().inputs_seen.push(data.to_vec());
        }

        fn set_input_frame_count(&mut self, _frames: u32) {}

        fn set_interleaved_output(&mut self, _channels: u16) {}

        fn set_output_frame_count(&mut self, _frames: u32) {}

        fn end_processing(&mut self, output: &mut [u8]) -> ProcessingResult {
            let end_calls = {
                let mut probe = self.probe.lock();
                probe.end_calls += 1;
                probe.end_calls
            };

            if !output.is_empty() {
                let n = output.len().min(self.staged_input.len());
                output[..n].copy_from_slice(&self.staged_input[..n]);
                output[n..].fill(0);
            }

            let frames = output.len().max(self.staged_input.len()) as u64;
            let result = match self.complete_after {
                Some(limit) if end_calls >= limit => CallbackResult::Complete,
                _ => CallbackResult::Continue,
            };
            ProcessingResult {
                frames_processed: frames,
                result,
            }
        }

        fn terminate(&mut self) {
            self.probe.lock().terminated = true;
        }
    }
}
