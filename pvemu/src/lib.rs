//! PvEmu: emulate a photovoltaic source with MPPT on a TENMA 72-2705 bench supply.
//!
//! A photovoltaic panel together with its maximum-power-point tracker looks, from the
//! outside, like a source whose operating point moves around with irradiance. This crate
//! emulates that behavior on a programmable bench supply: the [`PvEmulator`] drives
//! voltage/current setpoints over the serial link and runs a background sampling loop
//! that periodically queries the actual output and records a time series for later
//! inspection.
//!
//! The emulator core is deliberately small: one sampling thread per emulator, a single
//! mutex around the shared setpoint and log buffer, and an atomic run-state that makes
//! start/stop safe to call concurrently with the loop. Port discovery and command
//! formatting live in the [`supplylink`] and [`tenma72_2705`] crates; plotting of the
//! recorded samples is left to external tools, which is why the log exports as plain
//! 5-tuples.
//!
//! # Example
//!
//! The classic bench session: log every 50 ms, emulate one irradiance level for a while,
//! then step to another one.
//!
//! ```no_run
//! use std::{thread, time::Duration};
//!
//! use measurements::{Current, Voltage};
//! use pvemu::PvEmulator;
//!
//! let mut pv = PvEmulator::serial();
//! pv.set_log_interval(Duration::from_millis(50));
//!
//! pv.start(Voltage::from_volts(3.3), Current::from_amperes(0.01)).unwrap();
//! thread::sleep(Duration::from_secs(5));
//!
//! // another irradiance..
//! pv.set_operating_point(Voltage::from_volts(3.3), Current::from_amperes(0.5)).unwrap();
//! thread::sleep(Duration::from_secs(5));
//!
//! pv.stop();
//! pv.join().unwrap();
//!
//! for sample in pv.snapshot() {
//!     let (t, v, i, v_ref, i_ref) = sample.into_tuple();
//!     println!("{t:.3}\t{v:.2}\t{i:.3}\t{v_ref:.2}\t{i_ref:.3}");
//! }
//! ```
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

mod emulator;
mod sample;

pub use emulator::PvEmulator;
pub use sample::{Sample, Setpoint};

use supplylink::LinkError;
use thiserror::Error;

/// The error enum for the PV emulator.
///
/// Link and driver failures are wrapped as [`PvEmuError::Link`] so that everything
/// propagates with the `?` operator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PvEmuError {
    /// `start` was called while a sampling loop is already active.
    #[error("The sampling loop is already running.")]
    AlreadyRunning,
    /// Error on the link to the power supply. See [`LinkError`] for more details.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// The requested operation needs a bound power supply. Call `connect` or `start`
    /// first.
    #[error("Not connected to a power supply.")]
    NotConnected,
    /// The sampling thread panicked instead of returning a result.
    #[error("The sampling thread panicked.")]
    SamplerPanicked,
}
