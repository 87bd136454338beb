//! Callback-driven read and write passes over the pool.

use super::connection::ReadStatus;
use super::frame::Frame;
use super::ConnectionPool;
use crate::error::Error;
use tracing::{debug, instrument, trace};

/// What the read callback wants done with the connection it was called for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Leave the correlation id unchanged.
    Keep,
    /// Assign a new correlation id.
    Reassign(i64),
    /// Evict the connection now, before any reply is sent.
    Evict,
}

/// Maps the classic integer convention: `-1` evicts, `0` keeps, positive
/// values reassign. Other negative values keep the current id.
impl From<i64> for Directive {
    fn from(value: i64) -> Self {
        match value {
            -1 => Directive::Evict,
            v if v > 0 => Directive::Reassign(v),
            _ => Directive::Keep,
        }
    }
}

/// Application hook invoked by
/// [`ConnectionPool::read_from_connections`] once per connection and pass.
///
/// `frame` holds what was read (empty when nothing arrived). Setting
/// `wants_reply` sends the frame, as left by the callback, straight back to
/// the same connection unless the directive is [`Directive::Evict`].
///
/// Implemented for every `FnMut(i64, &mut Frame, &mut bool) -> Directive`.
pub trait ReadCallback {
    fn on_read(&mut self, id: i64, frame: &mut Frame, wants_reply: &mut bool) -> Directive;
}

impl<F> ReadCallback for F
where
    F: FnMut(i64, &mut Frame, &mut bool) -> Directive,
{
    fn on_read(&mut self, id: i64, frame: &mut Frame, wants_reply: &mut bool) -> Directive {
        self(id, frame, wants_reply)
    }
}

/// Application hook invoked by
/// [`ConnectionPool::write_to_connections`] once per connection and pass.
///
/// The callback fills the zeroed `frame` and returns true to send it.
///
/// Implemented for every `FnMut(i64, &mut Frame) -> bool`.
pub trait WriteCallback {
    fn on_write(&mut self, id: i64, frame: &mut Frame) -> bool;
}

impl<F> WriteCallback for F
where
    F: FnMut(i64, &mut Frame) -> bool,
{
    fn on_write(&mut self, id: i64, frame: &mut Frame) -> bool {
        self(id, frame)
    }
}

// ============================================================================
// Passes
// ============================================================================

impl ConnectionPool {
    /// Attempts one read on every connection, in accept order.
    ///
    /// A connection whose read fails hard is evicted without invoking the
    /// callback. Every other connection, including ones with nothing to read,
    /// is handed to the callback when one is supplied.
    ///
    /// A connection closed by its peer is handed over once, with
    /// [`UNIDENTIFIED`](super::UNIDENTIFIED) as id and an empty frame. No
    /// reply is sent to it, and unless the callback evicts it the entry is
    /// left for [`cleanup_connections`](Self::cleanup_connections).
    ///
    /// Returns the number of callback invocations.
    #[instrument(skip_all)]
    pub fn read_from_connections(
        &mut self,
        mut callback: Option<&mut dyn ReadCallback>,
    ) -> Result<usize, Error> {
        self.ensure_launched("read")?;

        let mut frame = Frame::new();
        let mut invoked = 0;
        let mut index = 0;
        while index < self.connections.len() {
            frame.clear();
            let connection = &mut self.connections[index];

            let status = match connection.read_from_connection(&mut frame) {
                Ok(status) => status,
                Err(err) => {
                    debug!(?err, "Evicting connection after read failure");
                    self.kick_connection(index);
                    continue;
                }
            };
            let Some(handler) = callback.as_deref_mut() else {
                index += 1;
                continue;
            };

            let mut wants_reply = false;
            let directive = handler.on_read(connection.connection_id(), &mut frame, &mut wants_reply);
            invoked += 1;
            match directive {
                Directive::Evict => {
                    debug!(id = connection.connection_id(), "Callback evicted connection");
                    self.kick_connection(index);
                    continue;
                }
                Directive::Reassign(id) => {
                    trace!(old = connection.connection_id(), new = id, "Reassigning connection id");
                    connection.identify_connection(id);
                }
                Directive::Keep => {}
            }

            if wants_reply && status != ReadStatus::Closed {
                if let Err(err) = connection.write_to_connection(&frame) {
                    debug!(?err, "Evicting connection after reply failure");
                    self.kick_connection(index);
                    continue;
                }
            }
            index += 1;
        }
        Ok(invoked)
    }

    /// Offers every connection, in accept order, a zeroed frame to fill.
    ///
    /// When the callback returns true the frame is written to that
    /// connection, and the connection is evicted if the write fails hard.
    /// When it returns false no I/O happens for that connection.
    ///
    /// Returns the number of frames written.
    #[instrument(skip_all)]
    pub fn write_to_connections(&mut self, callback: &mut dyn WriteCallback) -> Result<usize, Error> {
        self.ensure_launched("write")?;

        let mut frame = Frame::new();
        let mut sent = 0;
        let mut index = 0;
        while index < self.connections.len() {
            frame.clear();
            let connection = &mut self.connections[index];
            if !callback.on_write(connection.connection_id(), &mut frame) {
                index += 1;
                continue;
            }

            match connection.write_to_connection(&frame) {
                Ok(_) => {
                    sent += 1;
                    index += 1;
                }
                Err(err) => {
                    debug!(?err, "Evicting connection after write failure");
                    self.kick_connection(index);
                }
            }
        }
        Ok(sent)
    }
}
