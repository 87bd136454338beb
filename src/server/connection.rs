//! A single accepted peer connection.
//!
//! A [`Connection`] owns one socket and, in TLS mode, one server-side
//! `rustls` session bound to it. Every operation performs at most one
//! bounded I/O attempt and returns immediately; would-block (and the TLS
//! session wanting more input) is reported as "no progress", never as an
//! error. Fatal failures disconnect the connection before the error is
//! returned.

use super::frame::Frame;
use crate::error::Error;
use rustls::{ServerConfig, ServerConnection};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Correlation id of a connection the application has not identified yet.
pub const UNIDENTIFIED: i64 = -1;

/// Outcome of a single read attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes were stored in the frame.
    Data(usize),
    /// Nothing to read right now.
    Idle,
    /// The TLS handshake has not completed; no I/O was attempted.
    Pending,
    /// The peer closed the connection. The connection is disconnected and
    /// waits to be reaped by cleanup.
    Closed,
}

/// One accepted peer: socket, optional TLS session, inactivity tracking
/// and an application-assigned correlation id.
///
/// Resources are released exactly once, either by an explicit
/// [`disconnect`](Self::disconnect) or when the connection is dropped.
pub struct Connection {
    stream: Option<TcpStream>,
    tls_session: Option<ServerConnection>,
    peer_addr: SocketAddr,
    tls: bool,
    blocking: bool,
    handshake_complete: bool,
    inactivity: u32,
    read_attempts: u64,
    id: i64,
}

// ============================================================================
// Constructors
// ============================================================================

impl Connection {
    /// Creates an unset connection. It only becomes usable through a
    /// successful [`accept`](Self::accept).
    pub fn new(tls: bool, blocking: bool) -> Self {
        Self {
            stream: None,
            tls_session: None,
            peer_addr: unspecified_addr(),
            tls,
            blocking,
            handshake_complete: false,
            inactivity: 0,
            read_attempts: 0,
            id: UNIDENTIFIED,
        }
    }

    /// Performs one accept attempt on `listener`.
    ///
    /// Returns `Ok(false)` when no peer is pending. On success the socket is
    /// switched to non-blocking mode (unless the connection is blocking) and,
    /// in TLS mode, a server session is allocated from `tls_config`, leaving
    /// the connection in handshake-pending state.
    pub fn accept(
        &mut self,
        listener: &TcpListener,
        tls_config: Option<&Arc<ServerConfig>>,
    ) -> Result<bool, Error> {
        let (stream, peer_addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::Interrupted
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::ConnectionReset
                ) =>
            {
                warn!(?err, "Transient accept error");
                return Ok(false);
            }
            Err(err) => {
                error!(?err, "Error accepting connection");
                return Err(err.into());
            }
        };

        if let Err(err) = self.attach(stream, peer_addr, tls_config) {
            error!(%peer_addr, ?err, "Can't set up accepted connection");
            self.disconnect();
            return Err(err);
        }

        info!(%peer_addr, tls = self.tls, blocking = self.blocking, "Accepted connection");
        Ok(true)
    }

    fn attach(
        &mut self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        tls_config: Option<&Arc<ServerConfig>>,
    ) -> Result<(), Error> {
        self.peer_addr = peer_addr;
        stream.set_nonblocking(!self.blocking)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);

        if self.tls {
            let config = tls_config
                .ok_or_else(|| Error::TlsSession("no TLS context available".to_string()))?;
            let session = ServerConnection::new(Arc::clone(config))
                .map_err(|e| Error::TlsSession(e.to_string()))?;
            self.tls_session = Some(session);
        }

        Ok(())
    }
}

// ============================================================================
// Handshake
// ============================================================================

impl Connection {
    /// Advances the TLS server handshake by one step.
    ///
    /// Returns `Ok(true)` exactly once, on the step that completes the
    /// handshake. Returns `Ok(false)` while the handshake is in progress, and
    /// for plain, unset or already-complete connections. Any failure other
    /// than would-block disconnects the connection.
    pub fn do_handshake(&mut self) -> Result<bool, Error> {
        if !self.tls || self.handshake_complete {
            return Ok(false);
        }
        let (Some(stream), Some(session)) = (self.stream.as_mut(), self.tls_session.as_mut())
        else {
            return Ok(false);
        };

        match handshake_step(session, stream) {
            Ok(true) => {
                self.handshake_complete = true;
                info!(peer_addr = %self.peer_addr, "TLS handshake completed");
                Ok(true)
            }
            Ok(false) => {
                trace!(peer_addr = %self.peer_addr, "TLS handshake in progress");
                Ok(false)
            }
            Err(err) => {
                warn!(peer_addr = %self.peer_addr, ?err, "TLS handshake failed");
                self.disconnect();
                Err(err)
            }
        }
    }
}

// ============================================================================
// Data Operations
// ============================================================================

impl Connection {
    /// Attempts one read into `frame`.
    ///
    /// The inactivity counter is incremented before the attempt and reset
    /// to 0 when data arrives. An orderly close is reported once as
    /// [`ReadStatus::Closed`]; reading again afterwards fails with
    /// [`Error::NotConnected`].
    pub fn read_from_connection(&mut self, frame: &mut Frame) -> Result<ReadStatus, Error> {
        self.inactivity = self.inactivity.saturating_add(1);
        self.read_attempts += 1;

        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::NotConnected);
        };

        let result = if self.tls {
            if !self.handshake_complete {
                return Ok(ReadStatus::Pending);
            }
            match self.tls_session.as_mut() {
                Some(session) => read_tls_plaintext(session, stream, frame),
                None => Err(Error::NotConnected),
            }
        } else {
            read_plain(stream, frame)
        };

        match result {
            Ok(ReadStatus::Data(len)) => {
                self.inactivity = 0;
                trace!(len, peer_addr = %self.peer_addr, "Received data");
                Ok(ReadStatus::Data(len))
            }
            Ok(ReadStatus::Closed) => {
                info!(peer_addr = %self.peer_addr, "Connection closed by peer");
                self.disconnect();
                Ok(ReadStatus::Closed)
            }
            Ok(status) => Ok(status),
            Err(err) => {
                self.report_failure("reading from", &err);
                self.disconnect();
                Err(err)
            }
        }
    }

    /// Attempts one write of the frame payload.
    ///
    /// Returns the number of payload bytes accepted, `0` when the socket
    /// would block or the TLS handshake is still pending. In TLS mode the
    /// payload is handed to the session in full and encrypted records the
    /// socket could not take yet stay buffered until the next write.
    pub fn write_to_connection(&mut self, frame: &Frame) -> Result<usize, Error> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::NotConnected);
        };
        let payload = frame.as_bytes();
        if payload.is_empty() {
            return Ok(0);
        }

        let result = if self.tls {
            if !self.handshake_complete {
                return Ok(0);
            }
            match self.tls_session.as_mut() {
                Some(session) => write_tls_plaintext(session, stream, payload),
                None => Err(Error::NotConnected),
            }
        } else {
            write_plain(stream, payload)
        };

        match result {
            Ok(len) => {
                trace!(len, peer_addr = %self.peer_addr, "Sent data");
                Ok(len)
            }
            Err(err) => {
                self.report_failure("writing to", &err);
                self.disconnect();
                Err(err)
            }
        }
    }

    fn report_failure(&self, action: &str, err: &Error) {
        let peer_addr = &self.peer_addr;
        match err {
            Error::Io(io_err) if io_err.kind() == ErrorKind::BrokenPipe => {
                warn!(%peer_addr, "Broken pipe");
            }
            Error::Io(io_err) if io_err.kind() == ErrorKind::ConnectionReset => {
                warn!(%peer_addr, "Connection reset");
            }
            _ => error!(%peer_addr, ?err, "Error {action} connection"),
        }
    }
}

// ============================================================================
// Teardown
// ============================================================================

impl Connection {
    /// Releases the socket and TLS session and resets the handshake state,
    /// inactivity counter and correlation id. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Some(session) = self.tls_session.as_mut() {
                if self.handshake_complete {
                    session.send_close_notify();
                    if let Err(err) = flush_tls(session, &mut stream) {
                        trace!(peer_addr = %self.peer_addr, ?err, "Can't deliver close_notify");
                    }
                }
            }
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                trace!(peer_addr = %self.peer_addr, ?err, "Error shutting down socket");
            }
            debug!(peer_addr = %self.peer_addr, id = self.id, "Disconnected");
        }
        self.tls_session = None;
        self.peer_addr = unspecified_addr();
        self.handshake_complete = false;
        self.inactivity = 0;
        self.id = UNIDENTIFIED;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Connection {
    /// Sets the correlation id. Only the application changes it.
    pub fn identify_connection(&mut self, id: i64) {
        self.id = id;
    }

    pub fn connection_id(&self) -> i64 {
        self.id
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// False once the socket has been released.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().map(|_| self.peer_addr)
    }

    /// Consecutive read attempts that yielded no data.
    pub fn inactivity_counter(&self) -> u32 {
        self.inactivity
    }

    /// Read attempts made over the lifetime of the connection.
    pub fn read_attempts(&self) -> u64 {
        self.read_attempts
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr())
            .field("tls", &self.tls)
            .field("handshake_complete", &self.handshake_complete)
            .field("inactivity", &self.inactivity)
            .field("id", &self.id)
            .finish()
    }
}

// ============================================================================
// Internal I/O Helpers
// ============================================================================

fn unspecified_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

fn would_block(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

// Writes buffered TLS records until the session is drained or the socket
// would block.
fn flush_tls(session: &mut ServerConnection, stream: &mut TcpStream) -> io::Result<()> {
    while session.wants_write() {
        match session.write_tls(stream) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if would_block(&err) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn process_packets(session: &mut ServerConnection, stream: &mut TcpStream) -> Result<(), Error> {
    if let Err(err) = session.process_new_packets() {
        // The session queued an alert describing the failure.
        let _ = flush_tls(session, stream);
        return Err(err.into());
    }
    Ok(())
}

fn handshake_step(session: &mut ServerConnection, stream: &mut TcpStream) -> Result<bool, Error> {
    flush_tls(session, stream)?;

    if session.wants_read() {
        match session.read_tls(stream) {
            Ok(0) => return Err(Error::HandshakeEof),
            Ok(_) => process_packets(session, stream)?,
            Err(err) if would_block(&err) => {}
            Err(err) => return Err(err.into()),
        }
    }

    flush_tls(session, stream)?;
    Ok(!session.is_handshaking())
}

fn read_plain(stream: &mut TcpStream, frame: &mut Frame) -> Result<ReadStatus, Error> {
    match stream.read(frame.buffer_mut()) {
        Ok(0) => Ok(ReadStatus::Closed),
        Ok(len) => {
            frame.set_len(len);
            Ok(ReadStatus::Data(len))
        }
        Err(err) if would_block(&err) => Ok(ReadStatus::Idle),
        Err(err) => Err(err.into()),
    }
}

fn read_tls_plaintext(
    session: &mut ServerConnection,
    stream: &mut TcpStream,
    frame: &mut Frame,
) -> Result<ReadStatus, Error> {
    // Skipped while decrypted data is still buffered in the session.
    if session.wants_read() {
        match session.read_tls(stream) {
            Ok(0) => {}
            Ok(_) => process_packets(session, stream)?,
            Err(err) if would_block(&err) => {}
            Err(err) => return Err(err.into()),
        }
    }

    // Post-handshake messages such as session tickets.
    flush_tls(session, stream)?;

    match session.reader().read(frame.buffer_mut()) {
        // close_notify received and all data consumed
        Ok(0) => Ok(ReadStatus::Closed),
        Ok(len) => {
            frame.set_len(len);
            Ok(ReadStatus::Data(len))
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(ReadStatus::Idle),
        // Transport closed without close_notify
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(ReadStatus::Closed),
        Err(err) => Err(err.into()),
    }
}

fn write_plain(stream: &mut TcpStream, payload: &[u8]) -> Result<usize, Error> {
    match stream.write(payload) {
        Ok(len) => Ok(len),
        Err(err) if would_block(&err) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

fn write_tls_plaintext(
    session: &mut ServerConnection,
    stream: &mut TcpStream,
    payload: &[u8],
) -> Result<usize, Error> {
    let len = session.writer().write(payload)?;
    flush_tls(session, stream)?;
    Ok(len)
}
