//! Scriptable in-memory server stream for tests
//!
//! Deterministic stand-in for a real server connection: connect succeeds
//! (or fails) immediately, cork completion arrives from a short-lived
//! helper thread the way a real server's event loop delivers it, captured
//! audio is served from a queue of fragments and playback writes are
//! recorded for inspection.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{
    BufferAttributes, CompletionCallback, ConnectFlags, Direction, NotifyCallback, Operation,
    SeekMode, ServerStream, StreamLatency, StreamState,
};
use crate::error::ServerError;

#[derive(Default)]
pub(crate) struct MockBehavior {
    /// Connect returns an error
    pub fail_connect: bool,
    /// Connect succeeds but the stream never reaches Ready
    pub stay_unconnected: bool,
    /// Disconnect never reaches Terminated (slow remote endpoint)
    pub never_terminate: bool,
    /// Writes are rejected
    pub fail_writes: bool,
    /// Cork acknowledgments arrive only after a delay
    pub slow_cork: bool,
}

pub(crate) struct MockServerStream {
    behavior: MockBehavior,
    state: Mutex<StreamState>,
    corked: AtomicBool,
    writable: AtomicUsize,
    written: Mutex<Vec<u8>>,
    peek_queue: Mutex<VecDeque<Bytes>>,
    time_usec: Mutex<Option<u64>>,
    latency: Mutex<Option<StreamLatency>>,
    negotiated: Mutex<Option<BufferAttributes>>,
    underflow_cb: Mutex<Option<NotifyCallback>>,
    started_cb: Mutex<Option<NotifyCallback>>,
    connect_calls: AtomicUsize,
    cork_calls: Mutex<Vec<bool>>,
    cancel_write_calls: AtomicUsize,
    connected_device: Mutex<Option<Option<String>>>,
    connect_flags: Mutex<Option<ConnectFlags>>,
}

impl MockServerStream {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            state: Mutex::new(StreamState::Unconnected),
            corked: AtomicBool::new(false),
            writable: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
            peek_queue: Mutex::new(VecDeque::new()),
            time_usec: Mutex::new(None),
            latency: Mutex::new(None),
            negotiated: Mutex::new(None),
            underflow_cb: Mutex::new(None),
            started_cb: Mutex::new(None),
            connect_calls: AtomicUsize::new(0),
            cork_calls: Mutex::new(Vec::new()),
            cancel_write_calls: AtomicUsize::new(0),
            connected_device: Mutex::new(None),
            connect_flags: Mutex::new(None),
        })
    }

    /// Pretend the stream is already connected (and optionally paused),
    /// as left behind by a previous stop.
    pub fn set_connected(&self, corked: bool) {
        *self.state.lock() = StreamState::Ready;
        self.corked.store(corked, Ordering::SeqCst);
    }

    pub fn set_writable(&self, bytes: usize) {
        self.writable.store(bytes, Ordering::SeqCst);
    }

    pub fn queue_capture_fragment(&self, fragment: Bytes) {
        self.peek_queue.lock().push_back(fragment);
    }

    pub fn set_timing(&self, time_usec: Option<u64>, latency: Option<StreamLatency>) {
        *self.time_usec.lock() = time_usec;
        *self.latency.lock() = latency;
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Pause flags of every cork request issued, in order
    pub fn cork_requests(&self) -> Vec<bool> {
        self.cork_calls.lock().clone()
    }

    pub fn cancel_write_count(&self) -> usize {
        self.cancel_write_calls.load(Ordering::SeqCst)
    }

    pub fn connected_device(&self) -> Option<Option<String>> {
        self.connected_device.lock().clone()
    }

    pub fn connect_flags(&self) -> Option<ConnectFlags> {
        *self.connect_flags.lock()
    }

    /// Fire the registered underflow callback, as the server event thread
    /// would on a playback underrun.
    pub fn trigger_underflow(&self) {
        if let Some(cb) = self.underflow_cb.lock().as_ref() {
            cb();
        }
    }

    /// Fire the registered started callback
    pub fn trigger_started(&self) {
        if let Some(cb) = self.started_cb.lock().as_ref() {
            cb();
        }
    }
}

impl ServerStream for MockServerStream {
    fn connect(
        &self,
        _direction: Direction,
        device_name: Option<&str>,
        attrs: &BufferAttributes,
        flags: ConnectFlags,
    ) -> Result<(), ServerError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_connect {
            return Err(ServerError::ConnectRefused("mock refused".into()));
        }

        *self.connected_device.lock() = Some(device_name.map(str::to_string));
        *self.connect_flags.lock() = Some(flags);
        *self.negotiated.lock() = Some(*attrs);

        if !self.behavior.stay_unconnected {
            *self.state.lock() = StreamState::Ready;
        }
        Ok(())
    }

    fn disconnect(&self) {
        if !self.behavior.never_terminate {
            *self.state.lock() = StreamState::Terminated;
        }
    }

    fn cancel_write(&self) {
        self.cancel_write_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn cork(&self, pause: bool, on_done: CompletionCallback) -> Arc<Operation> {
        self.cork_calls.lock().push(pause);
        self.corked.store(pause, Ordering::SeqCst);

        // Completion must come from another thread: the caller holds the
        // main loop lock, and the handler re-acquires it to signal
        let op = Operation::new();
        let completion = op.clone();
        let delay = if self.behavior.slow_cork {
            std::time::Duration::from_millis(20)
        } else {
            std::time::Duration::ZERO
        };
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            completion.complete();
            on_done(true);
        });
        op
    }

    fn state(&self) -> StreamState {
        *self.state.lock()
    }

    fn is_corked(&self) -> bool {
        self.corked.load(Ordering::SeqCst)
    }

    fn writable_size(&self) -> usize {
        self.writable.load(Ordering::SeqCst)
    }

    fn readable_size(&self) -> usize {
        self.peek_queue.lock().front().map_or(0, Bytes::len)
    }

    fn write(&self, data: &[u8], _seek: SeekMode) -> Result<(), ServerError> {
        if self.behavior.fail_writes {
            return Err(ServerError::WriteRejected("mock rejected".into()));
        }
        self.written.lock().extend_from_slice(data);
        Ok(())
    }

    fn peek(&self) -> Result<Option<Bytes>, ServerError> {
        Ok(self.peek_queue.lock().front().cloned())
    }

    fn drop_fragment(&self) {
        self.peek_queue.lock().pop_front();
    }

    fn time(&self) -> Option<u64> {
        *self.time_usec.lock()
    }

    fn latency(&self) -> Option<StreamLatency> {
        *self.latency.lock()
    }

    fn negotiated_attrs(&self) -> Option<BufferAttributes> {
        *self.negotiated.lock()
    }

    fn set_underflow_callback(&self, callback: NotifyCallback) {
        *self.underflow_cb.lock() = Some(callback);
    }

    fn set_started_callback(&self, callback: NotifyCallback) {
        *self.started_cb.lock() = Some(callback);
    }
}
