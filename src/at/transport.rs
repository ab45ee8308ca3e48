//! Transport abstraction — the byte-oriented serial channel to the modem.
//!
//! Concrete implementations:
//! - ESP-IDF UART driver ([`crate::adapters::uart::UartTransport`])
//! - scripted mocks in the integration tests
//!
//! The session is generic over `Transport`, so it never touches UART
//! registers itself.  All calls must be non-blocking.

use crate::error::Error;

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns the number of bytes actually read.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Check if data is available for reading.
    fn available(&self) -> bool;
}

/// Write every byte of `data`, converting failures into [`Error::Transport`].
///
/// A write that makes no progress is treated as a transport failure rather
/// than spinning.
pub fn write_all<T: Transport>(transport: &mut T, mut data: &[u8]) -> Result<(), Error> {
    while !data.is_empty() {
        let n = transport.write(data).map_err(transport_error)?;
        if n == 0 {
            return Err(Error::Transport("write stalled".into()));
        }
        data = &data[n.min(data.len())..];
    }
    Ok(())
}

/// Map a transport-specific error into the crate error.
pub fn transport_error<E: core::fmt::Debug>(e: E) -> Error {
    Error::Transport(format!("{e:?}"))
}
