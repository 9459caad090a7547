//! Stream lifecycle state machine
//!
//! Owns the per-stream state flags, drives connect/cork/disconnect
//! sequencing against the audio server session, spawns and joins the
//! transfer thread, and enforces bounded-time teardown. The four public
//! operations — [`Stream::start`], [`Stream::stop`], [`Stream::abort`],
//! [`Stream::close`] — are the only entry points into the engine; state
//! is never mutated from outside them.
//!
//! Lifecycle: `Unstarted → Starting → Active → (Stopping | Aborting) →
//! Stopped → Closed`, where a failed start lands directly in `Stopped`.

pub(crate) mod handlers;
pub(crate) mod transfer;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::buffer::RingBuffer;
use crate::constants::{
    CLOSE_POLL_INTERVAL, CLOSE_POLL_LIMIT, START_POLL_INTERVAL, START_POLL_LIMIT,
    STOP_POLL_INTERVAL, TRANSFER_BUFFER_SIZE,
};
use crate::error::{Result, StreamError};
use crate::processor::BufferProcessor;
use crate::server::{
    BufferAttributes, ConnectFlags, Direction, MainLoop, OperationState, ServerStream, StreamState,
};

/// Per-direction stream configuration
#[derive(Debug, Clone)]
pub struct DirectionConfig {
    /// Interleaved channel count the application works with
    pub channels: u16,
    /// Bytes per frame (sample size × channel count)
    pub frame_size: usize,
    /// Device index into the server-side device name table;
    /// `None` selects the server default device
    pub device: Option<usize>,
}

/// Stream-wide configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub sample_rate: u32,
    /// Requested target latency in seconds; zero lets the server pick
    pub latency_seconds: f64,
    pub output: Option<DirectionConfig>,
    pub input: Option<DirectionConfig>,
    /// Server-side device names, indexed by [`DirectionConfig::device`]
    pub device_names: Arc<Vec<String>>,
}

/// State shared between the lifecycle owner, the transfer thread and the
/// server callback handlers.
pub(crate) struct StreamShared {
    pub(crate) mainloop: Arc<MainLoop>,
    pub(crate) output_ring: RingBuffer,
    pub(crate) input_ring: RingBuffer,
    /// True while the transfer thread should keep running
    pub(crate) is_active: AtomicBool,
    /// Mutually exclusive lifecycle flag
    pub(crate) is_stopped: AtomicBool,
    /// True only between thread spawn and the thread's own exit
    pub(crate) thread_active: AtomicBool,
    pub(crate) underflow_count: AtomicU32,
    /// Per-direction transfer buffers, allocated at start, freed at close
    pub(crate) out_scratch: Mutex<Option<Vec<u8>>>,
    pub(crate) in_scratch: Mutex<Option<Vec<u8>>>,
}

impl StreamShared {
    fn new(mainloop: Arc<MainLoop>) -> Arc<Self> {
        Arc::new(Self {
            mainloop,
            output_ring: RingBuffer::new(TRANSFER_BUFFER_SIZE),
            input_ring: RingBuffer::new(TRANSFER_BUFFER_SIZE),
            is_active: AtomicBool::new(false),
            is_stopped: AtomicBool::new(true),
            thread_active: AtomicBool::new(false),
            underflow_count: AtomicU32::new(0),
            out_scratch: Mutex::new(None),
            in_scratch: Mutex::new(None),
        })
    }
}

/// One open audio session bridging the server to the application callback
pub struct Stream {
    shared: Arc<StreamShared>,
    out_stream: Option<Arc<dyn ServerStream>>,
    in_stream: Option<Arc<dyn ServerStream>>,
    processor: Arc<Mutex<Box<dyn BufferProcessor>>>,
    output: Option<DirectionConfig>,
    input: Option<DirectionConfig>,
    sample_rate: u32,
    latency_seconds: f64,
    buffer_attrs: BufferAttributes,
    device_names: Arc<Vec<String>>,
    finished_callback: Option<Arc<dyn Fn() + Send + Sync>>,
    thread: Option<JoinHandle<()>>,
    error_tx: Sender<StreamError>,
    error_rx: Receiver<StreamError>,
}

impl Stream {
    /// Create a stream over up to two server stream objects. Directions
    /// are configured by pairing a handle with a [`DirectionConfig`]; a
    /// stream with neither direction fails at [`Stream::start`].
    pub fn new(
        config: StreamConfig,
        mainloop: Arc<MainLoop>,
        out_stream: Option<Arc<dyn ServerStream>>,
        in_stream: Option<Arc<dyn ServerStream>>,
        processor: Box<dyn BufferProcessor>,
    ) -> Self {
        debug_assert_eq!(config.output.is_some(), out_stream.is_some());
        debug_assert_eq!(config.input.is_some(), in_stream.is_some());

        let (error_tx, error_rx) = bounded::<StreamError>(16);

        Self {
            shared: StreamShared::new(mainloop),
            out_stream,
            in_stream,
            processor: Arc::new(Mutex::new(processor)),
            output: config.output,
            input: config.input,
            sample_rate: config.sample_rate,
            latency_seconds: config.latency_seconds,
            buffer_attrs: BufferAttributes::unspecified(),
            device_names: config.device_names,
            finished_callback: None,
            thread: None,
            error_tx,
            error_rx,
        }
    }

    /// Register a callback fired once when the application callback
    /// signals completion or abort while the stream is still active
    pub fn set_finished_callback(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.finished_callback = Some(Arc::new(callback));
    }

    /// Start streaming: connect (or resume) the configured directions,
    /// wait for readiness and spawn the transfer thread.
    pub fn start(&mut self) -> Result<()> {
        // A second start would connect the handles again and spawn a
        // second producer/consumer over the same rings; checked before
        // the failure path so it cannot tear down the running stream
        if self.shared.is_active.load(Ordering::SeqCst)
            || self.shared.thread_active.load(Ordering::SeqCst)
        {
            return Err(StreamError::AlreadyStarted.into());
        }

        match self.try_start() {
            Ok(()) => Ok(()),
            Err(err) => {
                // Single abort-and-cleanup path for every start failure,
                // so a half-started stream never leaks a connected object
                tracing::error!("can't start audio: {err}");
                let _ = self.request_stop(true);
                self.shared.is_active.store(false, Ordering::SeqCst);
                self.shared.is_stopped.store(true, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    /// Stop streaming, letting buffered output drain gracefully
    pub fn stop(&mut self) -> Result<()> {
        self.request_stop(false).map_err(Into::into)
    }

    /// Stop streaming immediately, discarding data in flight
    pub fn abort(&mut self) -> Result<()> {
        self.request_stop(true).map_err(Into::into)
    }

    /// Tear the stream down. Must only be called after [`Stream::stop`]
    /// or [`Stream::abort`]. Disconnects both directions and waits a
    /// bounded time for the server to acknowledge termination; resources
    /// are released after the bound regardless, because a remote endpoint
    /// may never acknowledge.
    pub fn close(&mut self) -> Result<()> {
        if self.shared.is_active.load(Ordering::SeqCst)
            || !self.shared.is_stopped.load(Ordering::SeqCst)
        {
            return Err(StreamError::NotStopped.into());
        }

        {
            let _guard = self.shared.mainloop.lock();
            if let Some(out) = &self.out_stream {
                if out.state() == StreamState::Ready {
                    // Cancel pending writes first; termination can take a
                    // while for network-backed servers
                    out.cancel_write();
                    out.disconnect();
                }
            }
            if let Some(input) = &self.in_stream {
                if input.state() == StreamState::Ready {
                    input.disconnect();
                }
            }
        }

        let mut iterations = 0u32;
        loop {
            {
                let _guard = self.shared.mainloop.lock();
                if self
                    .out_stream
                    .as_ref()
                    .is_some_and(|s| s.state() == StreamState::Terminated)
                {
                    self.out_stream = None;
                    *self.shared.out_scratch.lock() = None;
                }
                if self
                    .in_stream
                    .as_ref()
                    .is_some_and(|s| s.state() == StreamState::Terminated)
                {
                    self.in_stream = None;
                    *self.shared.in_scratch.lock() = None;
                }
            }

            if self.out_stream.is_none() && self.in_stream.is_none() {
                break;
            }
            if iterations >= CLOSE_POLL_LIMIT {
                tracing::warn!(
                    output_pending = self.out_stream.is_some(),
                    input_pending = self.in_stream.is_some(),
                    "termination wait expired, releasing stream resources anyway"
                );
                self.out_stream = None;
                self.in_stream = None;
                *self.shared.out_scratch.lock() = None;
                *self.shared.in_scratch.lock() = None;
                break;
            }

            iterations += 1;
            thread::sleep(CLOSE_POLL_INTERVAL);
        }

        self.processor.lock().terminate();
        Ok(())
    }

    /// True while the transfer thread should keep running
    pub fn is_active(&self) -> bool {
        self.shared.is_active.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped.load(Ordering::SeqCst)
    }

    /// True while the transfer thread is alive
    pub fn is_thread_active(&self) -> bool {
        self.shared.thread_active.load(Ordering::SeqCst)
    }

    /// Output underflows reported by the server since the last start
    pub fn underflow_count(&self) -> u32 {
        self.shared.underflow_count.load(Ordering::Relaxed)
    }

    /// Buffer sizing requested from the server at the last start
    pub fn buffer_attributes(&self) -> BufferAttributes {
        self.buffer_attrs
    }

    /// Non-fatal errors surfaced by the transfer thread (e.g. rejected
    /// writes), oldest first
    pub fn check_errors(&self) -> Option<StreamError> {
        self.error_rx.try_recv().ok()
    }

    fn try_start(&mut self) -> std::result::Result<(), StreamError> {
        if self.out_stream.is_none() && self.in_stream.is_none() {
            return Err(StreamError::NoStreamsConfigured);
        }

        self.processor.lock().reset();
        self.buffer_attrs = self.compute_buffer_attrs();
        self.shared.underflow_count.store(0, Ordering::Relaxed);

        if let (Some(config), Some(stream)) = (self.output.clone(), self.out_stream.clone()) {
            self.start_direction(Direction::Playback, stream, config.device)?;
        }
        if let (Some(config), Some(stream)) = (self.input.clone(), self.in_stream.clone()) {
            self.start_direction(Direction::Capture, stream, config.device)?;
        }

        self.wait_until_ready()?;

        self.shared.is_active.store(true, Ordering::SeqCst);
        self.shared.is_stopped.store(false, Ordering::SeqCst);

        let context = transfer::TransferContext {
            shared: self.shared.clone(),
            out_stream: self.out_stream.clone(),
            in_stream: self.in_stream.clone(),
            processor: self.processor.clone(),
            out_frame_size: self.output.as_ref().map_or(0, |c| c.frame_size),
            out_channels: self.output.as_ref().map_or(0, |c| c.channels),
            in_frame_size: self.input.as_ref().map_or(0, |c| c.frame_size),
            in_channels: self.input.as_ref().map_or(0, |c| c.channels),
            sample_rate: self.sample_rate,
            finished_callback: self.finished_callback.clone(),
            errors: self.error_tx.clone(),
        };

        self.shared.thread_active.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("audio-transfer".to_string())
            .spawn(move || transfer::run(context))
            .map_err(|_| {
                self.shared.thread_active.store(false, Ordering::SeqCst);
                StreamError::AllocationFailure
            })?;
        self.thread = Some(handle);

        Ok(())
    }

    /// Connect one direction, or resume it with an uncork if a previous
    /// stop left it connected and paused.
    fn start_direction(
        &self,
        direction: Direction,
        stream: Arc<dyn ServerStream>,
        device: Option<usize>,
    ) -> std::result::Result<(), StreamError> {
        let scratch = match direction {
            Direction::Playback => &self.shared.out_scratch,
            Direction::Capture => &self.shared.in_scratch,
        };
        {
            let mut guard = scratch.lock();
            if guard.is_none() {
                *guard = Some(allocate_transfer_buffer(TRANSFER_BUFFER_SIZE)?);
            }
        }

        let resume = {
            let _guard = self.shared.mainloop.lock();
            stream.state() == StreamState::Ready && stream.is_corked()
        };
        if resume {
            // Previously stopped stream: uncork instead of reconnecting
            self.wait_for_cork(stream.as_ref(), false);
            return Ok(());
        }

        let device_name = self.resolve_device(device)?;

        let _guard = self.shared.mainloop.lock();
        stream
            .connect(
                direction,
                device_name.as_deref(),
                &self.buffer_attrs,
                ConnectFlags::streaming(),
            )
            .map_err(|err| StreamError::ConnectFailure(err.to_string()))?;
        stream.set_underflow_callback(handlers::underflow(&self.shared));
        stream.set_started_callback(handlers::started(&self.shared));

        Ok(())
    }

    /// Issue a cork/uncork request and block on the shared condition
    /// variable until the server acknowledges it.
    fn wait_for_cork(&self, stream: &dyn ServerStream, pause: bool) {
        let mainloop = &self.shared.mainloop;
        let mut guard = mainloop.lock();
        let operation = stream.cork(pause, handlers::cork_complete(mainloop));
        while operation.state() == OperationState::Running {
            mainloop.wait(&mut guard);
        }
    }

    /// Bounded poll until every configured direction reports ready. A
    /// direction with no stream object is trivially satisfied.
    fn wait_until_ready(&self) -> std::result::Result<(), StreamError> {
        let mut playback_ready = self.out_stream.is_none();
        let mut record_ready = self.in_stream.is_none();

        for _ in 0..START_POLL_LIMIT {
            for (stream, ready) in [
                (&self.out_stream, &mut playback_ready),
                (&self.in_stream, &mut record_ready),
            ] {
                if let Some(stream) = stream {
                    let state = {
                        let _guard = self.shared.mainloop.lock();
                        stream.state()
                    };
                    match state {
                        StreamState::Ready => *ready = true,
                        StreamState::Failed | StreamState::Terminated => {
                            return Err(StreamError::ConnectFailure(format!(
                                "stream entered {state:?} while starting"
                            )));
                        }
                        StreamState::Unconnected => {}
                    }
                }
            }

            if playback_ready && record_ready {
                return Ok(());
            }
            thread::sleep(START_POLL_INTERVAL);
        }

        Err(StreamError::ReadinessTimeout)
    }

    /// Unified stop/abort: flag the transfer thread down, wait for it to
    /// exit, and (stop only) cork the output so buffered audio drains.
    fn request_stop(&mut self, abort: bool) -> std::result::Result<(), StreamError> {
        {
            let _guard = self.shared.mainloop.lock();
            self.shared.is_active.store(false, Ordering::SeqCst);
            self.shared.is_stopped.store(true, Ordering::SeqCst);
        }

        // Poll with the session lock released so the transfer thread can
        // finish its in-flight locked queries
        while self.shared.thread_active.load(Ordering::SeqCst) {
            thread::sleep(STOP_POLL_INTERVAL);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }

        if !abort {
            if let Some(out) = self.out_stream.clone() {
                let needs_cork = {
                    let _guard = self.shared.mainloop.lock();
                    out.state() == StreamState::Ready && !out.is_corked()
                };
                if needs_cork {
                    self.wait_for_cork(out.as_ref(), true);
                }
            }
        }

        Ok(())
    }

    fn compute_buffer_attrs(&self) -> BufferAttributes {
        let mut attrs = BufferAttributes::unspecified();
        if self.latency_seconds > 0.0 {
            let latency_bytes = |frame_size: usize| {
                (self.latency_seconds * self.sample_rate as f64 * frame_size as f64) as u32
            };
            // target_length sizes playback, fragment_size sizes capture
            if let Some(output) = &self.output {
                attrs.target_length = latency_bytes(output.frame_size);
            }
            if let Some(input) = &self.input {
                attrs.fragment_size = latency_bytes(input.frame_size);
            }
        }
        attrs
    }

    fn resolve_device(
        &self,
        device: Option<usize>,
    ) -> std::result::Result<Option<String>, StreamError> {
        match device {
            None => Ok(None),
            Some(index) => self
                .device_names
                .get(index)
                .cloned()
                .map(Some)
                .ok_or(StreamError::InvalidDevice(index)),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.shared.thread_active.load(Ordering::SeqCst) {
            let _ = self.request_stop(true);
        }
    }
}

fn allocate_transfer_buffer(size: usize) -> std::result::Result<Vec<u8>, StreamError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| StreamError::AllocationFailure)?;
    buffer.resize(size, 0);
    Ok(buffer)
}
