//! Serial link trait and error types.

use async_trait::async_trait;
use thiserror::Error;

/// Serial link errors.
///
/// A read timing out is NOT an error; it is signalled by a short byte count
/// so callers can tell a silent device from a broken one.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// Failed to open or configure the device
    #[error("failed to open serial device {device}: {reason}")]
    Open { device: String, reason: String },

    /// Write operation failed
    #[error("write failed: {0}")]
    Write(String),

    /// Read operation failed
    #[error("read failed: {0}")]
    Read(String),

    /// Input flush failed
    #[error("input flush failed: {0}")]
    Flush(String),
}

/// One half-duplex serial link.
///
/// The executor owns exactly one link and runs one transaction at a time on
/// it; implementations do not need to be re-entrant.
#[async_trait]
pub trait SerialLink: Send {
    /// Write the buffer to the link.
    ///
    /// Returns the number of bytes the driver accepted. A short write is the
    /// caller's problem; the link never retries internally.
    async fn write(&mut self, data: &[u8]) -> Result<usize, LinkError>;

    /// Read until `buf` is full or the inter-byte idle window elapses.
    ///
    /// The idle timer restarts on every received byte. Returns the number of
    /// bytes actually read; a short count (including zero) means the line
    /// went quiet, not that the call failed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Discard any buffered unread input.
    ///
    /// Used to resynchronize framing after a decode failure; a partially
    /// consumed frame corrupts every subsequent read on the same link.
    async fn flush_input(&mut self) -> Result<(), LinkError>;
}
