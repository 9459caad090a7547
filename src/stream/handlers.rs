//! Notification handlers invoked on the server's event thread
//!
//! These run in the server's callback context: they touch atomics and
//! the shared mutex/condvar pair, never stream lifecycle state. Each
//! notification acquires and releases the main loop lock before
//! signalling; without that round-trip a waiter sitting between its
//! state check and its `Condvar::wait` would miss the wakeup and block
//! forever.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::StreamShared;
use crate::server::{CompletionCallback, MainLoop, NotifyCallback};

/// Generic success acknowledgment, informational only
pub(crate) fn acknowledge(success: bool) {
    tracing::debug!(success, "server acknowledged stream operation");
}

/// Cork/uncork completion: acknowledge and wake any lifecycle thread
/// blocked in the start/stop cork handshake
pub(crate) fn cork_complete(mainloop: &Arc<MainLoop>) -> CompletionCallback {
    let mainloop = mainloop.clone();
    Box::new(move |success| {
        acknowledge(success);
        drop(mainloop.lock());
        mainloop.signal();
    })
}

/// Stream started: wake waiters blocked in start
pub(crate) fn started(shared: &Arc<StreamShared>) -> NotifyCallback {
    let shared = shared.clone();
    Box::new(move || {
        tracing::debug!("server reports stream started");
        drop(shared.mainloop.lock());
        shared.mainloop.signal();
    })
}

/// Output underflow: count it and wake waiters
pub(crate) fn underflow(shared: &Arc<StreamShared>) -> NotifyCallback {
    let shared = shared.clone();
    Box::new(move || {
        let count = shared.underflow_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(count, "output underflow reported by server");
        drop(shared.mainloop.lock());
        shared.mainloop.signal();
    })
}
