use thiserror::Error;

/// The error type for sockpool operations.
///
/// Would-block conditions (and their TLS equivalents) are never reported
/// through this type; they surface as "no progress" outcomes instead.
///
/// Connection-scoped errors (handshake, read and write failures) are
/// returned after the offending connection has already been disconnected.
/// The pool and every other connection are unaffected by them.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The listening socket could not be bound or put into listening state.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The configured bind address could not be parsed or resolved.
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    /// Attempted I/O on a connection whose socket is already unset.
    #[error("Connection is not connected")]
    NotConnected,

    /// The peer closed the connection in the middle of the TLS handshake.
    #[error("Peer closed the connection during the TLS handshake")]
    HandshakeEof,

    // ============================================================================
    // Pool State Errors
    // ============================================================================

    /// `launch()` was called on a pool that is already launched.
    #[error("Server is already launched")]
    AlreadyLaunched,

    /// A pass was requested on a pool that has not been launched.
    #[error("Server is not launched")]
    NotLaunched,

    /// A handshake pass was requested on a pool running in plain TCP mode.
    #[error("Server is set up in non-TLS mode")]
    NotTls,

    /// The pool is at capacity; no accept attempt was made.
    #[error("Server is full ({connected}/{max})")]
    PoolFull {
        connected: usize,
        max: usize,
    },

    // ============================================================================
    // TLS Errors
    // ============================================================================

    /// Protocol error reported by the TLS session.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Failed to load TLS certificate file from disk.
    #[error("Failed to load certificate from {path}: {source}")]
    TlsCertificateLoad {
        path: String,
        source: std::io::Error,
    },

    /// Failed to load TLS private key file from disk.
    #[error("Failed to load private key from {path}: {source}")]
    TlsKeyLoad {
        path: String,
        source: std::io::Error,
    },

    /// Certificate file format is invalid or unsupported.
    #[error("Invalid certificate format: {0}")]
    TlsInvalidCertificate(String),

    /// Private key file format is invalid or unsupported.
    #[error("Invalid private key format: {0}")]
    TlsInvalidKey(String),

    /// TLS mode was requested but no key or certificate path was configured.
    #[error("TLS server configuration not provided - tls_server_key and tls_server_cert are required")]
    TlsServerConfigMissing,

    /// Failed to build the TLS server configuration.
    #[error("Failed to build TLS server config: {0}")]
    TlsServerConfigBuild(String),

    /// Failed to allocate a server-side TLS session for an accepted socket.
    #[error("Failed to create TLS session: {0}")]
    TlsSession(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid value for `transport_type` configuration key.
    #[error("Invalid transport type '{got}', expected one of: {}", .valid.join(", "))]
    InvalidTransportType { got: String, valid: Vec<String> },
}

