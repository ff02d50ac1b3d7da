//! A rust driver for the TENMA 72-2705 programmable power supply.
//!
//! The 72-2705 speaks a simple ASCII protocol over its USB virtual COM port: commands are
//! newline-terminated, query responses are short unterminated payloads. This driver
//! formats the commands, parses the responses into [`measurements`] quantities, and takes
//! care of the bounded polling reads through the [`supplylink`] crate.
//!
//! The driver is cheap to clone; clones share one link behind an `Arc<Mutex<_>>`, so a
//! background task can poll the supply while another part of the program adjusts
//! setpoints through its own handle.
//!
//! # Example
//!
//! This example discovers the supply on the USB bus and sets an operating point.
//!
//! ```no_run
//! use measurements::{Current, Voltage};
//! use tenma72_2705::Tenma722705;
//!
//! let mut supply = Tenma722705::discover().unwrap();
//! println!("power supply: {}", supply.identification().unwrap());
//!
//! supply.set_voltage(Voltage::from_volts(3.3)).unwrap();
//! supply.set_current(Current::from_amperes(0.01)).unwrap();
//! supply.set_output(true).unwrap();
//! ```

#![warn(missing_docs)]

use std::sync::{Arc, Mutex};

use measurements::{Current, Voltage};
use supplylink::{LinkError, LinkInterface, SerialLink};

/// USB product string the 72-2705 registers itself with.
pub const USB_PRODUCT: &str = "USB Virtual COM";

/// Baud rate of the USB virtual COM port.
pub const BAUD_RATE: u32 = 115_200;

/// Minimum length of a `VOUT1?` / `IOUT1?` response, e.g., `12.34`.
const MIN_VALUE_RESPONSE: usize = 4;

/// Minimum length of a `*IDN?` response.
const MIN_IDN_RESPONSE: usize = 28;

/// A rust driver for the TENMA 72-2705.
///
/// To talk to the supply, you have to first define what link you want to use. On real
/// hardware that is a [`SerialLink`], most conveniently through
/// [`discover`](Tenma722705::discover); tests use the [`supplylink::LoopbackLink`].
pub struct Tenma722705<T: LinkInterface> {
    link: Arc<Mutex<T>>,
}

impl<T: LinkInterface> Clone for Tenma722705<T> {
    fn clone(&self) -> Self {
        Tenma722705 {
            link: Arc::clone(&self.link),
        }
    }
}

impl Tenma722705<SerialLink> {
    /// Discover the one attached 72-2705 on the USB bus and create a driver for it.
    ///
    /// Fails with [`LinkError::NoDeviceFound`] or [`LinkError::AmbiguousDevice`] if not
    /// exactly one supply is attached.
    pub fn discover() -> Result<Self, LinkError> {
        let link = SerialLink::discover(USB_PRODUCT, BAUD_RATE)?;
        Ok(Self::new(link))
    }
}

impl<T: LinkInterface> Tenma722705<T> {
    /// Create a new 72-2705 driver instance with the given link.
    pub fn new(link: T) -> Self {
        Tenma722705 {
            link: Arc::new(Mutex::new(link)),
        }
    }

    /// Set the voltage setpoint of channel 1.
    ///
    /// # Arguments
    /// * `voltage` - The voltage to set; sent with two decimals, as the supply expects.
    pub fn set_voltage(&mut self, voltage: Voltage) -> Result<(), LinkError> {
        self.sendcmd(&format!("VSET1:{:.2}", voltage.as_volts()))
    }

    /// Set the current setpoint of channel 1.
    ///
    /// # Arguments
    /// * `current` - The current to set; sent with three decimals, as the supply expects.
    pub fn set_current(&mut self, current: Current) -> Result<(), LinkError> {
        self.sendcmd(&format!("ISET1:{:.3}", current.as_amperes()))
    }

    /// Query the actual output voltage of channel 1.
    pub fn get_voltage(&mut self) -> Result<Voltage, LinkError> {
        let response = self.query("VOUT1?", MIN_VALUE_RESPONSE)?;
        let volts: f64 = response.trim().parse().map_err(|e| {
            LinkError::ResponseParseError(format!(
                "Failed to parse voltage from response '{}': {}",
                response, e
            ))
        })?;
        Ok(Voltage::from_volts(volts))
    }

    /// Query the actual output current of channel 1.
    pub fn get_current(&mut self) -> Result<Current, LinkError> {
        let response = self.query("IOUT1?", MIN_VALUE_RESPONSE)?;
        let amperes: f64 = response.trim().parse().map_err(|e| {
            LinkError::ResponseParseError(format!(
                "Failed to parse current from response '{}': {}",
                response, e
            ))
        })?;
        Ok(Current::from_amperes(amperes))
    }

    /// Enable or disable the output of the supply.
    ///
    /// # Arguments
    /// * `enabled` - `true` turns the output on, `false` turns it off.
    pub fn set_output(&mut self, enabled: bool) -> Result<(), LinkError> {
        self.sendcmd(if enabled { "OUT1" } else { "OUT0" })
    }

    /// Reset the supply to its power-on defaults.
    pub fn reset(&mut self) -> Result<(), LinkError> {
        self.sendcmd("*RST")
    }

    /// Query the identification string of the supply.
    ///
    /// Returns, e.g., `TENMA 72-2705 V2.0 SN:00000001`.
    pub fn identification(&mut self) -> Result<String, LinkError> {
        let response = self.query("*IDN?", MIN_IDN_RESPONSE)?;
        Ok(response.trim().to_string())
    }

    /// Send a command to the supply.
    fn sendcmd(&mut self, cmd: &str) -> Result<(), LinkError> {
        let mut link = self.link.lock().expect("Mutex should not be poisoned");
        link.send_line(cmd)
    }

    /// Query the supply and return the response as a String.
    ///
    /// Responses carry no terminator, so the link is polled until at least `min_len`
    /// bytes have arrived. Stale input is drained before the query goes out.
    fn query(&mut self, cmd: &str, min_len: usize) -> Result<String, LinkError> {
        let mut link = self.link.lock().expect("Mutex should not be poisoned");
        link.drain()?;
        link.send_line(cmd)?;
        let raw = link.read_at_least(min_len)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}
