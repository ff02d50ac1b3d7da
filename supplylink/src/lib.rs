//! SupplyLink: a narrow serial-link abstraction for bench power supplies.
//!
//! Bench supplies such as the TENMA/Korad series speak a simple ASCII protocol: the host
//! sends newline-terminated commands, and the instrument answers queries with a short,
//! *unterminated* payload. Since there is no terminator to read up to, a driver has to poll
//! the line until enough bytes have arrived. This crate captures exactly that contract in
//! the [`LinkInterface`] trait and provides:
//!
//! - A blocking serial implementation, [`SerialLink`], using the [`serialport`] crate
//!   (behind the `serial` feature), including discovery of a uniquely attached device by
//!   its USB product string.
//! - A scripted [`LoopbackLink`] that lets you test an instrument driver without any
//!   hardware attached.
//!
//! All fallible operations return a [`LinkError`], which propagates nicely with the `?`
//! operator.
//!
//! # License
//!
//! Licensed under either of
//!
//! - Apache License, Version 2.0 ([LICENSE-APACHE](http://www.apache.org/licenses/LICENSE-2.0))
//! - MIT license ([LICENSE-MIT](http://opensource.org/licenses/MIT))
//!
//! at your option.

#![warn(missing_docs)]

mod loopback;
#[cfg(feature = "serial")]
mod serial;

pub use loopback::{Exchange, LoopbackLink};
#[cfg(feature = "serial")]
pub use serial::SerialLink;

use std::time::Duration;

use thiserror::Error;

/// How long `read_at_least` waits between two polls of the line.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The error enum for all link operations.
///
/// Drivers built on top of a [`LinkInterface`] should return this error type for any
/// command sending or querying, so that errors propagate with the `?` operator all the way
/// up to the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LinkError {
    /// More than one attached device matched the requested USB product string during
    /// discovery. The error contains the product string and the number of matches.
    #[error(
        "Expected exactly one device with USB product string '{product}', but found {count}."
    )]
    AmbiguousDevice {
        /// The product string that was searched for.
        product: String,
        /// Number of matching ports that were found.
        count: usize,
    },
    /// Error when reading from/writing to a link. See [`std::io::Error`] for more details.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// No attached device matched the requested USB product string during discovery.
    #[error("No device with USB product string '{product}' was found.")]
    NoDeviceFound {
        /// The product string that was searched for.
        product: String,
    },
    /// Instrument response could not be parsed because it was unexpected by the driver.
    /// This error contains the response that was received from the instrument.
    #[error("Response from instrument could not be parsed. Response was: {0}")]
    ResponseParseError(String),
    #[cfg(feature = "serial")]
    /// Serial port errors can occur when opening or polling a serial interface. See the
    /// [`serialport::Error`] documentation for more information.
    #[error(transparent)]
    Serialport(#[from] serialport::Error),
    /// Timeout occured while waiting for a response from the instrument. The error
    /// contains the timeout that was set.
    #[error(
        "Timeout occured while waiting for a response from the instrument. Timeout was set to {0:?}."
    )]
    Timeout(Duration),
}

/// The `LinkInterface` trait defines the line-level contract to a power supply.
///
/// Implementors provide raw writing and a non-blocking poll for whatever bytes the
/// instrument has sent so far; the trait builds the protocol-level helpers on top of that:
/// [`send_line`](LinkInterface::send_line) for newline-terminated commands and
/// [`read_at_least`](LinkInterface::read_at_least) for the bounded polling read that
/// unterminated responses require.
///
/// # Example
///
/// A minimal driver that reads the identification string of its instrument, tested against
/// the [`LoopbackLink`]:
///
/// ```
/// use supplylink::{Exchange, LinkError, LinkInterface, LoopbackLink};
///
/// struct MyInstrument<T: LinkInterface> {
///     link: T,
/// }
///
/// impl<T: LinkInterface> MyInstrument<T> {
///     fn identification(&mut self) -> Result<String, LinkError> {
///         self.link.send_line("*IDN?")?;
///         let raw = self.link.read_at_least(4)?;
///         Ok(String::from_utf8_lossy(&raw).into_owned())
///     }
/// }
///
/// let link = LoopbackLink::new(vec![Exchange::query("*IDN?", "ACME")]);
/// let mut inst = MyInstrument { link };
/// assert_eq!(inst.identification().unwrap(), "ACME");
/// ```
pub trait LinkInterface {
    /// Write raw bytes to the instrument and make sure they are sent out immediately.
    fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Return all bytes the instrument has sent so far without blocking.
    ///
    /// An empty vector means that no data is currently available; it is not an error.
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError>;

    /// Get the timeout that bounds [`read_at_least`](LinkInterface::read_at_least).
    fn get_timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Set the timeout that bounds [`read_at_least`](LinkInterface::read_at_least).
    fn set_timeout(&mut self, _timeout: Duration) {}

    /// Send a command line to the instrument.
    ///
    /// The `\n` terminator is appended before the command is written out.
    fn send_line(&mut self, cmd: &str) -> Result<(), LinkError> {
        let mut data = Vec::with_capacity(cmd.len() + 1);
        data.extend_from_slice(cmd.as_bytes());
        data.push(b'\n');
        self.write_raw(&data)
    }

    /// Poll the line until at least `min_len` bytes have arrived and the instrument has
    /// gone quiet, then return everything that was received.
    ///
    /// `min_len` is a protocol floor, not the exact response length: replies carry no
    /// terminator and may arrive fragmented, so after the floor is reached the line is
    /// polled until one poll comes back empty. Cutting off at exactly `min_len` would
    /// silently truncate a fragmented reply into a wrong-but-parseable value.
    ///
    /// The wait is bounded by the link timeout; if fewer than `min_len` bytes arrive in
    /// time a [`LinkError::Timeout`] is returned.
    fn read_at_least(&mut self, min_len: usize) -> Result<Vec<u8>, LinkError> {
        let mut buf = Vec::new();
        let tic = std::time::Instant::now();
        loop {
            let chunk = self.read_available()?;
            let quiet = chunk.is_empty();
            buf.extend(chunk);
            if buf.len() >= min_len && quiet {
                return Ok(buf);
            }
            if tic.elapsed() >= self.get_timeout() {
                if buf.len() >= min_len {
                    return Ok(buf);
                }
                return Err(LinkError::Timeout(self.get_timeout()));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Discard any bytes the instrument has sent that were not picked up.
    ///
    /// Call this before a query to make sure a stale response cannot be mistaken for the
    /// answer to the new one.
    fn drain(&mut self) -> Result<(), LinkError> {
        while !self.read_available()?.is_empty() {}
        Ok(())
    }
}
