//! This module provides the blocking serial implementation of the [`LinkInterface`] trait
//! using the [`serialport`] crate, including discovery of a uniquely attached device by
//! its USB product string.

use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortType};

use crate::{LinkError, LinkInterface};

/// Settle time after opening the port before the input buffer is cleared.
///
/// USB-serial bridges of bench supplies tend to push a few garbage bytes right after the
/// port is opened; give them time to arrive so the clear actually catches them.
const SETTLE_TIME: Duration = Duration::from_millis(200);

/// A blocking serial link built on the [`serialport`] crate.
///
/// The response timeout defaults to one second and can be changed via
/// [`set_timeout`](LinkInterface::set_timeout).
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialLink {
    /// Try to open a serial link on a known port name.
    ///
    /// After opening, the implementation waits briefly and then clears the input buffer,
    /// so that stale bytes from a previous session cannot corrupt the first query.
    ///
    /// # Arguments
    /// * `port_name` - The name of the serial port, e.g., `"/dev/ttyACM0"` or `"COM3"`.
    /// * `baud_rate` - The baud rate the instrument is configured for.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;
        std::thread::sleep(SETTLE_TIME);
        port.clear(ClearBuffer::Input)?;
        Ok(SerialLink {
            port,
            timeout: Duration::from_secs(1),
        })
    }

    /// Discover the one attached device whose USB product string matches and open it.
    ///
    /// All serial ports of the system are enumerated and filtered by the given product
    /// string. The link is only opened if exactly one port matches; otherwise a
    /// [`LinkError::NoDeviceFound`] or [`LinkError::AmbiguousDevice`] is returned and
    /// nothing is opened.
    ///
    /// # Arguments
    /// * `product` - The USB product string to search for, e.g., `"USB Virtual COM"`.
    /// * `baud_rate` - The baud rate the instrument is configured for.
    pub fn discover(product: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let ports = serialport::available_ports()?;
        let candidates = ports
            .into_iter()
            .filter(|port| match &port.port_type {
                SerialPortType::UsbPort(usb) => usb.product.as_deref() == Some(product),
                _ => false,
            })
            .map(|port| port.port_name)
            .collect();
        let port_name = unique_port(candidates, product)?;
        Self::open(&port_name, baud_rate)
    }
}

impl LinkInterface for SerialLink {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let available = self.port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; available];
        self.port.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn get_timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

/// Reduce a list of matching port names to the single expected one.
fn unique_port(mut candidates: Vec<String>, product: &str) -> Result<String, LinkError> {
    match candidates.len() {
        0 => Err(LinkError::NoDeviceFound {
            product: product.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        count => Err(LinkError::AmbiguousDevice {
            product: product.to_string(),
            count,
        }),
    }
}
