//! The shared mutex/condition-variable pair serializing server access
//!
//! Every call that touches a server stream object or issues a server
//! request is made while holding this lock. Waiting for an asynchronous
//! operation releases the lock so the server's own event thread can make
//! progress and signal completion.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;

/// Single lock/condvar pair shared between the lifecycle owner, the
/// transfer thread and the server's event thread.
pub struct MainLoop {
    lock: Mutex<()>,
    cond: Condvar,
}

impl MainLoop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        })
    }

    /// Acquire the session lock
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Release the lock and block until signalled. The lock is re-acquired
    /// before returning; callers re-check their condition each wake.
    pub fn wait(&self, guard: &mut MutexGuard<'_, ()>) {
        self.cond.wait(guard);
    }

    /// Wake all threads blocked in [`MainLoop::wait`]. A caller that has
    /// just made an awaited condition true must acquire and release the
    /// lock first; otherwise a waiter between its condition check and its
    /// wait misses the notification.
    pub fn signal(&self) {
        self.cond.notify_all();
    }
}
