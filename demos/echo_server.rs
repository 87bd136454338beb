//! Echo server driven by a single-threaded tick loop.
//!
//! Every tick accepts at most one peer, advances pending TLS handshakes,
//! echoes whatever each peer sent and evicts idle peers.
//!
//! ```bash
//! cargo run --example echo_server -- --port 7000 -v
//! cargo run --example echo_server -- --port 7443 --tls-key key.pem --tls-cert cert.pem -vv
//! ```

use clap::Parser;
use config::Config;
use sockpool::prelude::*;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing for sockpool crate based on verbosity level
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => return, // No tracing
        1 => "info",
        2 => "debug",
        _ => "trace", // 3 or more
    };

    let filter = format!("sockpool={}", level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Parser)]
#[command(author, version, about = "Echo server", long_about = None)]
struct Args {
    /// Address to bind server to
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 7000)]
    port: u16,

    /// Maximum number of simultaneous peers
    #[arg(short, long, default_value_t = 16)]
    max_connections: usize,

    /// Idle ticks before a peer is kicked (0 disables)
    #[arg(long, default_value_t = 30_000)]
    max_inactivity: u32,

    /// PEM private key, enables TLS together with --tls-cert
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,

    /// PEM certificate chain
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path (TOML format), overrides the flags above
    #[arg(long)]
    config: Option<String>,
}

fn settings_from_args(args: &Args) -> Result<PoolSettings, Error> {
    if let Some(config_path) = &args.config {
        let config = Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()?;
        return PoolSettings::from_config(&config);
    }

    let mut settings = PoolSettings::new(args.port, args.max_connections)
        .with_bind_address(args.bind.clone())
        .with_max_inactivity(args.max_inactivity);
    if let (Some(key), Some(cert)) = (&args.tls_key, &args.tls_cert) {
        settings = settings.with_tls(key, cert);
    }
    Ok(settings)
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let settings = match settings_from_args(&args) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Invalid configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut pool = ConnectionPool::with_settings(settings);
    if let Err(err) = pool.launch() {
        eprintln!("Failed to launch server: {}", err);
        return ExitCode::FAILURE;
    }
    if let Some(addr) = pool.local_addr() {
        println!("Echo server listening on {} (tls: {})", addr, pool.is_tls());
    }

    let mut next_id = 0;
    let mut echo = |id: i64, frame: &mut Frame, reply: &mut bool| {
        if frame.is_empty() {
            return Directive::Keep;
        }
        *reply = true;
        if id == UNIDENTIFIED {
            next_id += 1;
            println!("Peer {} said {:?}", next_id, String::from_utf8_lossy(frame.as_bytes()));
            return Directive::Reassign(next_id);
        }
        println!("Peer {} said {:?}", id, String::from_utf8_lossy(frame.as_bytes()));
        Directive::Keep
    };

    loop {
        match pool.accept_connection() {
            Ok(_) | Err(Error::PoolFull { .. }) => {}
            Err(err) => eprintln!("Accept failed: {}", err),
        }
        if pool.is_tls() {
            if let Err(err) = pool.handshake_connections() {
                eprintln!("Handshake pass failed: {}", err);
            }
        }
        if let Err(err) = pool.read_from_connections(Some(&mut echo)) {
            eprintln!("Read pass failed: {}", err);
            return ExitCode::FAILURE;
        }
        if let Err(err) = pool.cleanup_connections() {
            eprintln!("Cleanup pass failed: {}", err);
            return ExitCode::FAILURE;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
