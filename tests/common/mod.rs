//! Helpers shared by the integration tests.
//!
//! Use the TEST_LOG environment variable to control tracing verbosity:
//!
//! ```bash
//! # Info level
//! TEST_LOG=1 cargo test -- --nocapture
//!
//! # Debug level
//! TEST_LOG=2 cargo test -- --nocapture
//!
//! # Trace level
//! TEST_LOG=3 cargo test -- --nocapture
//! ```

#![allow(dead_code)]

use sockpool::prelude::*;
use std::net::TcpStream;
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

pub const DEADLINE: Duration = Duration::from_secs(10);

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing based on TEST_LOG environment variable
pub fn init_tracing() {
    INIT.call_once(|| {
        if let Ok(level_str) = std::env::var("TEST_LOG") {
            let verbosity = level_str.parse::<u8>().unwrap_or(0);

            if verbosity > 0 {
                let level = match verbosity {
                    1 => "info",
                    2 => "debug",
                    _ => "trace", // 3 or more
                };

                let filter = format!("sockpool={}", level);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_test_writer()
                    .try_init();
            }
        }
    });
}

// ============================================================================
// Pool Helpers
// ============================================================================

/// Settings for a loopback pool on an ephemeral port.
pub fn loopback_settings(max_connections: usize) -> PoolSettings {
    PoolSettings::new(0, max_connections).with_bind_address("127.0.0.1")
}

/// Launches a plain TCP, non-blocking pool on an ephemeral loopback port.
pub fn plain_pool(max_connections: usize, max_inactivity: u32) -> ConnectionPool {
    init_tracing();
    let mut pool = ConnectionPool::with_settings(
        loopback_settings(max_connections).with_max_inactivity(max_inactivity),
    );
    pool.launch().expect("Failed to launch pool");
    pool
}

/// Opens a blocking client socket to the pool.
pub fn connect(pool: &ConnectionPool) -> TcpStream {
    let addr = pool.local_addr().expect("Pool is not launched");
    let stream = TcpStream::connect(addr).expect("Failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("Failed to set read timeout");
    stream
}

/// Issues accept passes until one connection is accepted.
pub fn accept_one(pool: &mut ConnectionPool) {
    eventually("accept a connection", || {
        pool.accept_connection().expect("Accept failed")
    });
}

/// Polls `condition` until it holds, panicking after [`DEADLINE`].
pub fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("Timed out waiting to {what}");
}
