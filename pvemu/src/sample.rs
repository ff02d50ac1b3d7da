//! Data types recorded and shared by the sampling loop.

use std::time::Duration;

use measurements::{Current, Voltage};

/// One entry of the sampling log.
///
/// A sample pairs the measured output of the supply with the setpoint that was active at
/// the moment the measurement was logged, so a later analysis can tell commanded from
/// actual behavior. Samples are immutable once appended to the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Time since the sampling loop started.
    pub elapsed: Duration,
    /// Measured output voltage.
    pub voltage: Voltage,
    /// Measured output current.
    pub current: Current,
    /// Voltage setpoint active when the sample was logged.
    pub setpoint_voltage: Voltage,
    /// Current setpoint active when the sample was logged.
    pub setpoint_current: Current,
}

impl Sample {
    /// Export the sample as a plain `(seconds, V, A, V, A)` tuple.
    ///
    /// The tuple order is elapsed time, measured voltage, measured current, setpoint
    /// voltage, setpoint current - handy for handing the log to plotting or analysis
    /// tools that do not know about [`measurements`] types.
    pub fn into_tuple(self) -> (f64, f64, f64, f64, f64) {
        (
            self.elapsed.as_secs_f64(),
            self.voltage.as_volts(),
            self.current.as_amperes(),
            self.setpoint_voltage.as_volts(),
            self.setpoint_current.as_amperes(),
        )
    }
}

/// Commanded (voltage, current) target sent to the supply.
///
/// The same pair is recorded alongside each measurement as the reference fields of a
/// [`Sample`]. Updates are last-writer-wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    /// Commanded voltage.
    pub voltage: Voltage,
    /// Commanded current.
    pub current: Current,
}

impl Default for Setpoint {
    fn default() -> Self {
        Setpoint {
            voltage: Voltage::from_volts(0.0),
            current: Current::from_amperes(0.0),
        }
    }
}
