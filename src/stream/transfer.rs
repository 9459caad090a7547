//! Real-time transfer thread
//!
//! One long-lived loop per active stream. Each iteration queries the
//! server's writable/readable byte counts, refreshes timing, runs the
//! buffer processor when the rings need topping up, drains exactly what
//! the server currently accepts (backpressure) and appends captured
//! fragments to the input ring. The loop never blocks on audio data:
//! input shortfall is zero-filled, and a sub-millisecond pause per
//! iteration bounds server round-trip overhead.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use super::StreamShared;
use crate::constants::{KEEP_QUEUED_HOST_BUFFERS, TRANSFER_BUFFER_SIZE, TRANSFER_LOOP_PAUSE};
use crate::cpuload::CpuLoadMeasurer;
use crate::error::StreamError;
use crate::processor::{BufferProcessor, CallbackResult};
use crate::server::{SeekMode, ServerStream, UNSPECIFIED};
use crate::timing::{update_time_info, TimeInfo};

/// Host buffer size used when neither the application nor the server
/// negotiation pinned one down
const FALLBACK_FRAMES_PER_HOST_BUFFER: u32 = 512;

/// Everything the transfer thread needs, captured at spawn time
pub(crate) struct TransferContext {
    pub shared: Arc<StreamShared>,
    pub out_stream: Option<Arc<dyn ServerStream>>,
    pub in_stream: Option<Arc<dyn ServerStream>>,
    pub processor: Arc<Mutex<Box<dyn BufferProcessor>>>,
    pub out_frame_size: usize,
    pub out_channels: u16,
    pub in_frame_size: usize,
    pub in_channels: u16,
    pub sample_rate: u32,
    pub finished_callback: Option<Arc<dyn Fn() + Send + Sync>>,
    pub errors: Sender<StreamError>,
}

/// Clears the stream's liveness flags when the transfer thread exits,
/// whether normally or by unwinding out of the application callback.
/// `request_stop` polls `thread_active` unboundedly, so the flag must
/// fall on every exit path.
struct ThreadActiveGuard {
    shared: Arc<StreamShared>,
}

impl Drop for ThreadActiveGuard {
    fn drop(&mut self) {
        self.shared.is_active.store(false, Ordering::SeqCst);
        self.shared.thread_active.store(false, Ordering::SeqCst);
    }
}

/// Transfer loop entry point. Runs until the lifecycle clears
/// `is_active` or the application callback signals completion; on exit
/// flushes both rings and clears `thread_active` last, so close never
/// observes a live thread with flushed state.
pub(crate) fn run(ctx: TransferContext) {
    let shared = ctx.shared.clone();
    // Declared before the scratch guards so it drops after them
    let _liveness = ThreadActiveGuard {
        shared: shared.clone(),
    };

    let output_configured = ctx.out_stream.is_some();
    let input_configured = ctx.in_stream.is_some();

    let frames_per_host_buffer = resolve_frames_per_host_buffer(&ctx);
    let out_frame_bytes = if output_configured {
        frames_per_host_buffer as usize * ctx.out_frame_size
    } else {
        0
    };
    let in_frame_bytes = if input_configured {
        frames_per_host_buffer as usize * ctx.in_frame_size
    } else {
        0
    };

    // One host buffer must fit the scratch and ring buffers; a mono
    // output needs room for the stereo upmix as well
    let out_required = if ctx.out_channels == 1 {
        out_frame_bytes * 2
    } else {
        out_frame_bytes
    };
    if out_required > TRANSFER_BUFFER_SIZE || in_frame_bytes > TRANSFER_BUFFER_SIZE {
        let bytes = out_required.max(in_frame_bytes);
        tracing::error!(
            bytes,
            limit = TRANSFER_BUFFER_SIZE,
            "host buffer does not fit the transfer buffer"
        );
        let _ = ctx.errors.try_send(StreamError::OversizedHostBuffer(bytes));
        return;
    }

    // Transfer buffers were allocated by start; hold them for the
    // thread's lifetime. Close only reclaims them after thread exit.
    let mut out_scratch = shared.out_scratch.lock();
    let mut in_scratch = shared.in_scratch.lock();
    if output_configured && out_scratch.is_none() {
        *out_scratch = Some(vec![0u8; TRANSFER_BUFFER_SIZE]);
    }
    if input_configured && in_scratch.is_none() {
        *in_scratch = Some(vec![0u8; TRANSFER_BUFFER_SIZE]);
    }

    let mut time_info = TimeInfo::default();
    let mut cpu_load = CpuLoadMeasurer::new(ctx.sample_rate);
    let mut frames_processed: u64 = 0;
    let mut result = CallbackResult::Continue;

    loop {
        cpu_load.begin();

        let mut writable_bytes = 0usize;
        let mut readable_bytes = 0usize;
        if let Some(out) = &ctx.out_stream {
            let _guard = shared.mainloop.lock();
            writable_bytes = out.writable_size();
        }
        if let Some(input) = &ctx.in_stream {
            let _guard = shared.mainloop.lock();
            readable_bytes = input.readable_size();
        }

        {
            let _guard = shared.mainloop.lock();
            if let Some(input) = &ctx.in_stream {
                update_time_info(input.as_ref(), &mut time_info, true);
            }
            if let Some(out) = &ctx.out_stream {
                update_time_info(out.as_ref(), &mut time_info, false);
            }
        }

        // Run the application callback when the output ring needs topping
        // up or a full host buffer of input is waiting for it
        let output_ring_ready = shared.output_ring.read_available();
        let run_callback = (output_configured
            && (output_ring_ready < out_frame_bytes * KEEP_QUEUED_HOST_BUFFERS
                || (writable_bytes > 0 && output_ring_ready < writable_bytes)))
            || (input_configured && shared.input_ring.read_available() >= in_frame_bytes);

        if run_callback {
            let mut processor = ctx.processor.lock();
            processor.begin_processing(&time_info, 0);

            if let Some(staging) = in_scratch.as_mut().filter(|_| input_configured) {
                let region = &mut staging[..in_frame_bytes];
                if shared.input_ring.read_available() >= in_frame_bytes {
                    shared.input_ring.read(region);
                } else {
                    // Never block on input: hand the callback silence
                    region.fill(0);
                }
                processor.set_interleaved_input(region, ctx.in_channels);
                processor.set_input_frame_count(frames_per_host_buffer);
            }

            let outcome = match out_scratch.as_mut().filter(|_| output_configured) {
                Some(scratch) => {
                    processor.set_interleaved_output(ctx.out_channels);
                    processor.set_output_frame_count(frames_per_host_buffer);
                    let outcome = processor.end_processing(&mut scratch[..out_frame_bytes]);

                    let produced_bytes = if ctx.out_channels == 1 {
                        // Mono output feeding a stereo consumer: duplicate
                        // every frame into both interleaved channels
                        upmix_mono_to_stereo(scratch, out_frame_bytes, ctx.out_frame_size);
                        out_frame_bytes * 2
                    } else {
                        out_frame_bytes
                    };
                    shared.output_ring.write(&scratch[..produced_bytes]);
                    outcome
                }
                None => processor.end_processing(&mut []),
            };
            frames_processed = outcome.frames_processed;
            result = outcome.result;
        }

        // Drain exactly what the server accepts right now; never more
        if output_configured
            && writable_bytes > 0
            && writable_bytes < shared.output_ring.read_available()
        {
            if let Some(scratch) = out_scratch.as_mut() {
                if let Err(err) = write_audio(&ctx, scratch, writable_bytes) {
                    tracing::warn!("can't write audio: {err}");
                    let _ = ctx.errors.try_send(err);
                }
            }
        }

        if let Some(input) = &ctx.in_stream {
            let _guard = shared.mainloop.lock();
            if readable_bytes > 0 {
                match input.peek() {
                    Ok(Some(fragment)) => {
                        let appended = shared.input_ring.write(&fragment);
                        if appended < fragment.len() {
                            // Best effort: a full input ring loses the rest
                            tracing::warn!(
                                dropped = fragment.len() - appended,
                                "input ring full, captured audio dropped"
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(err) => tracing::debug!("can't read audio: {err}"),
                }
                input.drop_fragment();
            }
        }

        cpu_load.end(frames_processed);

        if result != CallbackResult::Continue {
            // Deliberate completion from the callback, not an error; the
            // finished notification fires at most once
            if shared.is_active.load(Ordering::SeqCst) {
                if let Some(finished) = &ctx.finished_callback {
                    finished();
                }
            }
            let _guard = shared.mainloop.lock();
            shared.is_active.store(false, Ordering::SeqCst);
            break;
        }

        thread::sleep(TRANSFER_LOOP_PAUSE);
        if !shared.is_active.load(Ordering::SeqCst) {
            break;
        }
    }

    // A stopped or aborted stream never resumes mid-buffer
    if output_configured {
        shared.output_ring.flush();
    }
    if input_configured {
        shared.input_ring.flush();
    }
}

/// Drain `length` bytes from the output ring into the server stream; a
/// zero length drains everything the ring holds. Short ring reads still
/// send a full zero-padded write, matching the server's expectation of
/// the promised byte count.
fn write_audio(
    ctx: &TransferContext,
    scratch: &mut [u8],
    length: usize,
) -> Result<(), StreamError> {
    let Some(out) = &ctx.out_stream else {
        return Ok(());
    };

    let mut length = if length == 0 {
        ctx.shared.output_ring.read_available()
    } else {
        length
    };
    length = length.min(scratch.len());

    scratch[..length].fill(0);
    ctx.shared.output_ring.read(&mut scratch[..length]);

    let _guard = ctx.shared.mainloop.lock();
    out.write(&scratch[..length], SeekMode::Relative)
        .map_err(|err| StreamError::WriteFailure(err.to_string()))
}

/// Duplicate each mono frame in `scratch[..frame_bytes]` into two
/// interleaved channel slots, in place. `scratch` must hold at least
/// `2 * frame_bytes`.
pub(crate) fn upmix_mono_to_stereo(scratch: &mut [u8], frame_bytes: usize, frame_size: usize) {
    if frame_size == 0 || scratch.len() < frame_bytes * 2 {
        return;
    }

    let frames = frame_bytes / frame_size;
    // Back to front so no source frame is overwritten before it is read
    for frame in (0..frames).rev() {
        let src = frame * frame_size;
        let left = 2 * frame * frame_size;
        let right = left + frame_size;
        scratch.copy_within(src..src + frame_size, left);
        scratch.copy_within(left..left + frame_size, right);
    }
}

/// Host buffer sizing: the application's request wins; otherwise derive
/// from the server-negotiated target length, as a last resort fall back
/// to a fixed size.
fn resolve_frames_per_host_buffer(ctx: &TransferContext) -> u32 {
    if let Some(frames) = ctx.processor.lock().frames_per_host_buffer() {
        return frames;
    }

    let _guard = ctx.shared.mainloop.lock();
    if let Some(input) = &ctx.in_stream {
        if let Some(attrs) = input.negotiated_attrs() {
            if attrs.target_length != UNSPECIFIED && ctx.in_frame_size > 0 {
                return attrs.target_length / ctx.in_frame_size as u32;
            }
        }
    }
    if let Some(out) = &ctx.out_stream {
        if let Some(attrs) = out.negotiated_attrs() {
            if attrs.target_length != UNSPECIFIED && ctx.out_frame_size > 0 {
                return attrs.target_length / ctx.out_frame_size as u32;
            }
        }
    }
    FALLBACK_FRAMES_PER_HOST_BUFFER
}
