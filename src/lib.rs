//! # Audio Bridge
//!
//! Realtime audio transfer engine bridging a pull/push-style native audio
//! server connection to a callback-driven application audio interface.
//!
//! The engine owns the per-stream lifecycle state machine, a dedicated
//! transfer thread per active stream, lock-free byte ring buffers and the
//! channel upmix policy. The audio server itself and the format-converting
//! buffer processor are external collaborators consumed through traits.
//!
//! ## Architecture Overview
//!
//! ```text
//!  application callback                         native audio server
//!        ▲    │                                      ▲    │
//!        │    ▼                                      │    ▼
//!  ┌───────────────┐    ┌───────────────┐    ┌────────────────────┐
//!  │   Buffer      │    │  output ring  │───▶│  playback stream   │
//!  │   Processor   │───▶│  (SPSC bytes) │    │  (ServerStream)    │
//!  │  (trait)      │    ├───────────────┤    ├────────────────────┤
//!  │               │◀───│  input ring   │◀───│  capture stream    │
//!  └───────────────┘    │  (SPSC bytes) │    │  (ServerStream)    │
//!        ▲              └───────────────┘    └────────────────────┘
//!        │                      ▲                      ▲
//!        └──────────────────────┴──────────────────────┘
//!                       transfer thread
//!                (one per active Stream, owned by
//!                 the stream lifecycle state machine)
//! ```
//!
//! All interaction with the server session is serialized through a single
//! mutex/condition-variable pair ([`server::MainLoop`]); the server's own
//! event thread signals it to complete asynchronous cork and uncork
//! operations.

pub mod buffer;
pub mod cpuload;
pub mod error;
pub mod processor;
pub mod server;
pub mod stream;
pub mod timing;

pub use error::{Error, Result};
pub use stream::{DirectionConfig, Stream, StreamConfig};

/// Engine-wide constants
pub mod constants {
    use std::time::Duration;

    /// Transfer scratch buffer and ring buffer size in bytes (power of two)
    pub const TRANSFER_BUFFER_SIZE: usize = 65_536;

    /// Keep at least this many host buffers queued in the output ring
    pub const KEEP_QUEUED_HOST_BUFFERS: usize = 3;

    /// Maximum readiness polls during start
    pub const START_POLL_LIMIT: u32 = 100;

    /// Interval between readiness polls during start
    pub const START_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Interval between thread-exit polls during stop
    pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Maximum termination polls during close
    pub const CLOSE_POLL_LIMIT: u32 = 5000;

    /// Interval between termination polls during close
    pub const CLOSE_POLL_INTERVAL: Duration = Duration::from_micros(500);

    /// Pause between transfer loop iterations (bounds server query overhead)
    pub const TRANSFER_LOOP_PAUSE: Duration = Duration::from_micros(200);
}
