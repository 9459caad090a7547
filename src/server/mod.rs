//! Audio server session abstraction
//!
//! The native audio server connection is a black box to this engine: it
//! raises callbacks on its own event thread and exposes readable/writable
//! byte counts, latency and a connect/disconnect/cork protocol. The
//! [`ServerStream`] trait captures exactly that surface; the engine never
//! assumes anything about the implementation behind it.

pub mod mainloop;
#[cfg(test)]
pub(crate) mod mock;

pub use mainloop::MainLoop;

use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::ServerError;

/// Sentinel for "let the server pick" buffer sizing fields
pub const UNSPECIFIED: u32 = u32::MAX;

/// Stream direction, playback or capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Playback,
    Capture,
}

/// Connection state of a server stream object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unconnected,
    Ready,
    Failed,
    Terminated,
}

/// Seek behavior for stream writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Append at the current write index
    Relative,
    /// Write at an absolute offset
    Absolute,
}

/// Server-facing buffer sizing request.
///
/// `target_length` applies to playback, `fragment_size` to capture.
/// Fields left at [`UNSPECIFIED`] let the server pick its defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAttributes {
    pub max_length: u32,
    pub target_length: u32,
    pub fragment_size: u32,
    pub prebuffer: u32,
    pub min_request: u32,
}

impl BufferAttributes {
    /// All fields unspecified: the server chooses every size
    pub fn unspecified() -> Self {
        Self {
            max_length: UNSPECIFIED,
            target_length: UNSPECIFIED,
            fragment_size: UNSPECIFIED,
            prebuffer: UNSPECIFIED,
            min_request: UNSPECIFIED,
        }
    }
}

/// Connection flags requested at connect time
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectFlags {
    pub interpolate_timing: bool,
    pub adjust_latency: bool,
    pub auto_timing_update: bool,
    pub no_remix_channels: bool,
    pub no_remap_channels: bool,
    pub dont_move: bool,
}

impl ConnectFlags {
    /// The flag set the transfer engine always requests: timing
    /// interpolation with periodic updates, automatic latency adjustment,
    /// no server-side remixing or remapping, and device pinning.
    pub fn streaming() -> Self {
        Self {
            interpolate_timing: true,
            adjust_latency: true,
            auto_timing_update: true,
            no_remix_channels: true,
            no_remap_channels: true,
            dont_move: true,
        }
    }
}

/// Latency report from the server: microseconds plus a negative flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLatency {
    pub usec: u64,
    pub negative: bool,
}

/// State of an asynchronous server operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Running,
    Done,
    Cancelled,
}

/// Handle to an asynchronous server operation (cork/uncork).
///
/// The server implementation marks the operation done from its event
/// thread and then invokes the completion callback; waiters loop on the
/// main loop condvar checking [`Operation::state`] each wake.
pub struct Operation {
    state: AtomicU8,
}

impl Operation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(0),
        })
    }

    pub fn state(&self) -> OperationState {
        match self.state.load(Ordering::Acquire) {
            0 => OperationState::Running,
            1 => OperationState::Done,
            _ => OperationState::Cancelled,
        }
    }

    /// Mark the operation complete (server side)
    pub fn complete(&self) {
        self.state.store(1, Ordering::Release);
    }

    /// Mark the operation cancelled (server side)
    pub fn cancel(&self) {
        self.state.store(2, Ordering::Release);
    }
}

/// Parameterless notification raised on the server's event thread
pub type NotifyCallback = Box<dyn Fn() + Send + Sync>;

/// Completion notification carrying the operation's success flag
pub type CompletionCallback = Box<dyn Fn(bool) + Send + Sync>;

/// One stream object inside the audio server session.
///
/// Locking convention: every method except callback registration must be
/// invoked while holding the session [`MainLoop`] lock. The trait cannot
/// enforce this; the engine's call sites do.
pub trait ServerStream: Send + Sync {
    /// Connect the stream to a device (`None` means the server default)
    fn connect(
        &self,
        direction: Direction,
        device_name: Option<&str>,
        attrs: &BufferAttributes,
        flags: ConnectFlags,
    ) -> Result<(), ServerError>;

    /// Request disconnection; the stream reaches
    /// [`StreamState::Terminated`] asynchronously
    fn disconnect(&self);

    /// Cancel any in-flight write (playback only)
    fn cancel_write(&self);

    /// Pause (`true`) or resume (`false`) the stream without
    /// disconnecting. Asynchronous: the returned handle completes when the
    /// server acknowledges, after which `on_done` runs on the server's
    /// event thread.
    fn cork(&self, pause: bool, on_done: CompletionCallback) -> Arc<Operation>;

    fn state(&self) -> StreamState;

    fn is_corked(&self) -> bool;

    /// Bytes the server currently accepts for playback
    fn writable_size(&self) -> usize;

    /// Captured bytes currently available from the server
    fn readable_size(&self) -> usize;

    fn write(&self, data: &[u8], seek: SeekMode) -> Result<(), ServerError>;

    /// Borrow the next captured fragment without consuming it.
    /// `Ok(None)` means a hole or nothing buffered.
    fn peek(&self) -> Result<Option<Bytes>, ServerError>;

    /// Release the fragment returned by the last [`ServerStream::peek`]
    fn drop_fragment(&self);

    /// Current stream time in microseconds, `None` when no timing data is
    /// available yet
    fn time(&self) -> Option<u64>;

    /// Current stream latency, `None` when no timing data is available yet
    fn latency(&self) -> Option<StreamLatency>;

    /// Buffer sizes the server actually negotiated, once connected
    fn negotiated_attrs(&self) -> Option<BufferAttributes>;

    fn set_underflow_callback(&self, callback: NotifyCallback);

    fn set_started_callback(&self, callback: NotifyCallback);
}
