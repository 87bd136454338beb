//! sockpool - A bounded, caller-driven pool of TCP and TLS server connections
//!
//! sockpool accepts, secures and services many peers from a single thread
//! without an internal event loop. The owner launches a [`ConnectionPool`]
//! and then repeatedly issues short, non-blocking passes: accept, TLS
//! handshake, read, write and cleanup. Reads and writes are mediated by
//! callbacks that see a per-connection correlation id and a fixed-capacity
//! [`Frame`], and decide about replies, id reassignment and eviction.
//!
//! ```no_run
//! use sockpool::prelude::*;
//!
//! let mut pool = ConnectionPool::with_settings(PoolSettings::new(7000, 16).with_max_inactivity(1000));
//! pool.launch()?;
//! loop {
//!     let _ = pool.accept_connection();
//!     pool.read_from_connections(Some(&mut |_id: i64, frame: &mut Frame, reply: &mut bool| {
//!         *reply = !frame.is_empty();
//!         Directive::Keep
//!     }))?;
//!     pool.cleanup_connections()?;
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! # Ok::<(), sockpool::Error>(())
//! ```

// Internal-only modules
pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod server;

// These are the intended public API
pub use crate::config::PoolSettings;
pub use crate::error::Error;
pub use crate::server::{
    Connection, ConnectionPool, Directive, Frame, ReadCallback, ReadStatus, WriteCallback,
    FRAME_CAPACITY, UNIDENTIFIED,
};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::config::PoolSettings;
    pub use crate::error::Error;
    pub use crate::server::{
        ConnectionPool, Directive, Frame, ReadCallback, ReadStatus, WriteCallback, FRAME_CAPACITY,
        UNIDENTIFIED,
    };
}
