//! Run a small irradiance-step profile against a real, attached TENMA 72-2705.
//!
//! The recorded log is dumped as tab-separated values to stdout, ready for any external
//! plotting tool.

use std::{error::Error, thread, time::Duration};

use measurements::{Current, Voltage};
use pvemu::PvEmulator;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let mut pv = PvEmulator::serial();
    pv.connect()?;
    println!("power supply: {}", pv.identification()?);

    // Log every 50 ms.
    pv.set_log_interval(Duration::from_millis(50));

    // Start at a low irradiance..
    pv.start(Voltage::from_volts(3.3), Current::from_amperes(0.01))?;
    thread::sleep(Duration::from_secs(5));

    // ..then step to a brighter one.
    pv.set_operating_point(Voltage::from_volts(3.3), Current::from_amperes(0.5))?;
    thread::sleep(Duration::from_secs(5));

    pv.stop();
    pv.join()?;

    println!("t_s\tv_meas\ti_meas\tv_ref\ti_ref");
    for sample in pv.snapshot() {
        let (t, v, i, v_ref, i_ref) = sample.into_tuple();
        println!("{t:.3}\t{v:.2}\t{i:.3}\t{v_ref:.2}\t{i_ref:.3}");
    }

    Ok(())
}
