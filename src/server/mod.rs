//! Bounded pool of server connections driven by caller-issued passes.
//!
//! The [`ConnectionPool`] owns the listening socket, the TLS context and an
//! ordered set of [`Connection`]s. There is no event loop: the owner calls
//! [`launch`](ConnectionPool::launch) once and then issues passes at its own
//! cadence:
//!
//! - [`accept_connection`](ConnectionPool::accept_connection): at most one new
//!   connection per call
//! - [`handshake_connections`](ConnectionPool::handshake_connections): one
//!   step of every pending TLS handshake
//! - [`read_from_connections`](ConnectionPool::read_from_connections) and
//!   [`write_to_connections`](ConnectionPool::write_to_connections): one I/O
//!   attempt per connection, mediated by callbacks
//! - [`cleanup_connections`](ConnectionPool::cleanup_connections): evicts idle
//!   and dead connections
//!
//! Every pass is bounded and non-blocking (unless the pool was configured in
//! blocking mode) and takes `&mut self`, so passes never overlap.

mod connection;
mod dispatch;
mod frame;
mod tls_config;

pub use connection::{Connection, ReadStatus, UNIDENTIFIED};
pub use dispatch::{Directive, ReadCallback, WriteCallback};
pub use frame::{Frame, FRAME_CAPACITY};

use crate::config::PoolSettings;
use crate::error::Error;
use ::config::Config;
use rustls::ServerConfig;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use tls_config::load_tls_server_config;
use tracing::{debug, error, info, instrument, warn};

/// A bounded, ordered pool of TCP or TLS server connections.
///
/// Connections are kept in accept order and are never reordered. The pool
/// never holds more than `max_connections` of them.
///
/// Not thread-safe; all passes are expected to run on one thread.
#[derive(Debug)]
pub struct ConnectionPool {
    settings: PoolSettings,
    listener: Option<TcpListener>,
    tls_config: Option<Arc<ServerConfig>>,
    connections: Vec<Connection>,
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionPool {
    /// Creates an unlaunched pool from configuration.
    ///
    /// See [`PoolSettings`] for the configuration keys.
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::new_named(config, "")
    }

    /// Creates an unlaunched pool from configuration with namespacing.
    ///
    /// Keys are looked up as `{name}.{key}` first, then `{key}`.
    pub fn new_named(config: &Config, name: &str) -> Result<Self, Error> {
        Ok(Self::with_settings(PoolSettings::from_config_named(
            config, name,
        )?))
    }

    /// Creates an unlaunched pool from explicit settings.
    pub fn with_settings(settings: PoolSettings) -> Self {
        Self {
            settings,
            listener: None,
            tls_config: None,
            connections: Vec::new(),
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl ConnectionPool {
    /// Binds and listens, and in TLS mode builds the TLS context.
    ///
    /// On failure every resource created so far is released and the pool is
    /// left unlaunched. Calling it on a launched pool fails without touching
    /// the running server.
    #[instrument(skip(self))]
    pub fn launch(&mut self) -> Result<(), Error> {
        if self.listener.is_some() {
            error!("Server is already launched");
            return Err(Error::AlreadyLaunched);
        }

        if let Err(err) = self.try_launch() {
            error!(?err, "Server launch aborted");
            self.shutdown();
            return Err(err);
        }
        Ok(())
    }

    fn try_launch(&mut self) -> Result<(), Error> {
        let requested = format!("{}:{}", self.settings.bind_address, self.settings.port);
        let addr = (self.settings.bind_address.as_str(), self.settings.port)
            .to_socket_addrs()
            .map_err(|_| Error::InvalidAddress(requested.clone()))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(requested.clone()))?;

        let listener = TcpListener::bind(addr).map_err(|source| Error::Bind {
            addr: requested,
            source,
        })?;
        listener.set_nonblocking(!self.settings.blocking)?;
        let local_addr = listener.local_addr()?;
        self.listener = Some(listener);

        if self.settings.tls {
            let (Some(key_path), Some(cert_path)) =
                (&self.settings.key_path, &self.settings.cert_path)
            else {
                return Err(Error::TlsServerConfigMissing);
            };
            self.tls_config = Some(Arc::new(load_tls_server_config(key_path, cert_path)?));
        }

        info!(
            %local_addr,
            tls = self.settings.tls,
            blocking = self.settings.blocking,
            max_connections = self.settings.max_connections,
            "Listening for connections"
        );
        Ok(())
    }

    /// Evicts every connection, drops the TLS context and closes the
    /// listening socket. Idempotent.
    #[instrument(skip(self))]
    pub fn shutdown(&mut self) {
        let evicted = self.connections.len();
        for mut connection in self.connections.drain(..) {
            connection.disconnect();
        }
        self.tls_config = None;
        if let Some(listener) = self.listener.take() {
            match listener.local_addr() {
                Ok(local_addr) => info!(%local_addr, evicted, "Server shut down"),
                Err(_) => info!(evicted, "Server shut down"),
            }
        }
    }

    /// Accepts at most one pending connection.
    ///
    /// Returns `Ok(false)` when no peer is waiting. Fails with
    /// [`Error::PoolFull`] without attempting an accept when the pool is at
    /// capacity.
    #[instrument(skip(self))]
    pub fn accept_connection(&mut self) -> Result<bool, Error> {
        let Some(listener) = self.listener.as_ref() else {
            error!("Trying to accept a connection on an unlaunched server");
            return Err(Error::NotLaunched);
        };

        let connected = self.connections.len();
        let max = self.settings.max_connections;
        if connected >= max {
            warn!(connected, max, "Server is full, can't accept connection");
            return Err(Error::PoolFull { connected, max });
        }

        let mut connection = Connection::new(self.settings.tls, self.settings.blocking);
        if connection.accept(listener, self.tls_config.as_ref())? {
            self.connections.push(connection);
            debug!(connected = self.connections.len(), max, "Connection added to pool");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Advances every pending TLS handshake by one step.
    ///
    /// Connections whose handshake fails are disconnected and reaped by the
    /// next [`cleanup_connections`](Self::cleanup_connections). Returns the
    /// number of handshakes completed by this pass.
    #[instrument(skip(self))]
    pub fn handshake_connections(&mut self) -> Result<usize, Error> {
        self.ensure_launched("handshake")?;
        if !self.settings.tls {
            error!("Trying to handshake on a non-TLS server");
            return Err(Error::NotTls);
        }

        let mut completed = 0;
        for connection in self
            .connections
            .iter_mut()
            .filter(|c| c.is_tls() && !c.is_handshake_complete())
        {
            if let Ok(true) = connection.do_handshake() {
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Evicts connections that reached the inactivity threshold, and
    /// connections whose socket is already released.
    ///
    /// A threshold of 0 disables idle eviction. Returns the number of
    /// evicted connections.
    #[instrument(skip(self))]
    pub fn cleanup_connections(&mut self) -> Result<usize, Error> {
        self.ensure_launched("cleanup")?;

        let max_inactivity = self.settings.max_inactivity;
        let mut evicted = 0;
        let mut index = 0;
        while index < self.connections.len() {
            let connection = &self.connections[index];
            let idle = max_inactivity != 0 && connection.inactivity_counter() >= max_inactivity;
            if idle || !connection.is_connected() {
                if idle {
                    info!(
                        id = connection.connection_id(),
                        inactivity = connection.inactivity_counter(),
                        "Kicking inactive connection"
                    );
                }
                self.kick_connection(index);
                evicted += 1;
            } else {
                index += 1;
            }
        }
        Ok(evicted)
    }

    // Releases the connection at `index` and removes it from the pool,
    // keeping the order of the remaining connections.
    fn kick_connection(&mut self, index: usize) {
        let mut connection = self.connections.remove(index);
        debug!(
            id = connection.connection_id(),
            remaining = self.connections.len(),
            "Kicked connection"
        );
        connection.disconnect();
    }

    fn ensure_launched(&self, pass: &str) -> Result<(), Error> {
        if self.listener.is_none() {
            error!(pass, "Server is not launched");
            return Err(Error::NotLaunched);
        }
        Ok(())
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ConnectionPool {
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn max_connections(&self) -> usize {
        self.settings.max_connections
    }

    /// Number of live connections, including ones waiting to be reaped.
    pub fn connected_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn is_launched(&self) -> bool {
        self.listener.is_some()
    }

    pub fn is_tls(&self) -> bool {
        self.settings.tls
    }

    /// Address the listening socket is bound to, useful when launching on
    /// port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Live connections in accept order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Correlation ids of the live connections in accept order.
    pub fn connection_ids(&self) -> Vec<i64> {
        self.connections.iter().map(Connection::connection_id).collect()
    }
}
