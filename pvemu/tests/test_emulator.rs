//! Tests for the PV emulator core, run against a small simulated supply.
//!
//! The scripted loopback link of `supplylink` expects an exact command sequence, which
//! does not fit a free-running sampling loop whose iteration count depends on timing.
//! These tests therefore use a simulated supply that answers `VOUT1?`/`IOUT1?` from its
//! stored setpoints, i.e., an ideal supply that is always exactly at its operating
//! point.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use measurements::{Current, Voltage};
use rstest::*;

use pvemu::{PvEmuError, PvEmulator};
use supplylink::{LinkError, LinkInterface};
use tenma72_2705::Tenma722705;

const IDN: &str = "TENMA 72-2705 V2.0 SN:00000001";

/// Observable state of the simulated supply, shared with the test body.
#[derive(Debug)]
struct SimState {
    vset: f64,
    iset: f64,
    output: bool,
    pending: VecDeque<u8>,
    /// When `Some(0)`, every further value query fails with an I/O error.
    queries_left: Option<u32>,
}

impl SimState {
    fn new() -> Self {
        SimState {
            vset: 0.0,
            iset: 0.0,
            output: false,
            pending: VecDeque::new(),
            queries_left: None,
        }
    }
}

/// A simulated 72-2705 behind the `LinkInterface` trait.
#[derive(Debug, Clone)]
struct SimLink {
    state: Arc<Mutex<SimState>>,
}

impl SimLink {
    fn new() -> (Self, Arc<Mutex<SimState>>) {
        let state = Arc::new(Mutex::new(SimState::new()));
        (
            SimLink {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl LinkInterface for SimLink {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let line = str::from_utf8(data).expect("Commands should be valid UTF-8");
        let cmd = line.trim_end_matches('\n');
        let mut state = self.state.lock().unwrap();

        if let Some(value) = cmd.strip_prefix("VSET1:") {
            state.vset = value.parse().unwrap();
        } else if let Some(value) = cmd.strip_prefix("ISET1:") {
            state.iset = value.parse().unwrap();
        } else {
            match cmd {
                "OUT1" => state.output = true,
                "OUT0" => state.output = false,
                "*RST" => *state = SimState::new(),
                "*IDN?" => state.pending.extend(IDN.as_bytes()),
                "VOUT1?" | "IOUT1?" => {
                    match &mut state.queries_left {
                        Some(0) => {
                            return Err(LinkError::Io(std::io::Error::other(
                                "simulated line failure",
                            )));
                        }
                        Some(n) => *n -= 1,
                        None => {}
                    }
                    let reply = if cmd == "VOUT1?" {
                        format!("{:.2}", state.vset)
                    } else {
                        format!("{:.3}", state.iset)
                    };
                    state.pending.extend(reply.as_bytes());
                }
                other => panic!("Unexpected command: {other}"),
            }
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.pending.drain(..).collect())
    }
}

/// Create an emulator over a fresh simulated supply, keeping the sim state observable.
fn sim_emulator() -> (PvEmulator<SimLink>, Arc<Mutex<SimState>>) {
    let (link, state) = SimLink::new();
    let mut link = Some(link);
    let emulator = PvEmulator::new(move || {
        let link = link
            .take()
            .ok_or_else(|| PvEmuError::Link(LinkError::NoDeviceFound {
                product: "sim".to_string(),
            }))?;
        Ok(Tenma722705::new(link))
    });
    (emulator, state)
}

fn volts(v: f64) -> Voltage {
    Voltage::from_volts(v)
}

fn amps(i: f64) -> Current {
    Current::from_amperes(i)
}

#[fixture]
fn emu() -> PvEmulator<SimLink> {
    sim_emulator().0
}

#[rstest]
fn test_operations_require_connection(mut emu: PvEmulator<SimLink>) {
    assert!(matches!(
        emu.set_operating_point(volts(3.3), amps(0.01)),
        Err(PvEmuError::NotConnected)
    ));
    assert!(matches!(
        emu.identification(),
        Err(PvEmuError::NotConnected)
    ));
    assert!(matches!(emu.reset(), Err(PvEmuError::NotConnected)));
}

#[rstest]
fn test_connect_disables_output_and_identifies() {
    let (mut emu, state) = sim_emulator();
    emu.connect().unwrap();
    assert!(!state.lock().unwrap().output);
    assert_eq!(emu.identification().unwrap(), IDN);
    assert!(emu.identification().unwrap().len() >= 28);
}

#[rstest]
fn test_set_operating_point_reaches_supply() {
    let (mut emu, state) = sim_emulator();
    emu.connect().unwrap();
    emu.set_operating_point(volts(3.3), amps(0.01)).unwrap();

    let sim = state.lock().unwrap();
    assert_eq!(sim.vset, 3.3);
    assert_eq!(sim.iset, 0.01);
    drop(sim);

    let setpoint = emu.operating_point();
    assert_eq!(setpoint.voltage, volts(3.3));
    assert_eq!(setpoint.current, amps(0.01));
}

#[rstest]
fn test_start_twice_fails_with_already_running(mut emu: PvEmulator<SimLink>) {
    emu.set_log_interval(Duration::from_millis(5));
    emu.start(volts(3.3), amps(0.01)).unwrap();
    assert!(emu.is_running());

    assert!(matches!(
        emu.start(volts(3.3), amps(0.01)),
        Err(PvEmuError::AlreadyRunning)
    ));

    emu.stop();
    emu.join().unwrap();
}

#[rstest]
fn test_stop_is_idempotent(mut emu: PvEmulator<SimLink>) {
    emu.set_log_interval(Duration::from_millis(5));
    emu.start(volts(3.3), amps(0.01)).unwrap();
    emu.stop();
    emu.stop();
    emu.join().unwrap();
    assert!(!emu.is_running());
}

/// The irradiance-step scenario: run at one operating point, step the current setpoint,
/// and check that the logged reference fields follow the change in order.
#[rstest]
fn test_irradiance_step_scenario() {
    let (mut emu, state) = sim_emulator();
    emu.set_log_interval(Duration::from_millis(5));
    emu.start(volts(3.3), amps(0.01)).unwrap();
    thread::sleep(Duration::from_millis(100));

    let first_phase = emu.snapshot();
    assert!(first_phase.len() >= 5, "expected several samples by now");
    for sample in &first_phase {
        assert_eq!(sample.setpoint_voltage, volts(3.3));
        assert_eq!(sample.setpoint_current, amps(0.01));
        // The ideal simulated supply sits exactly at its setpoint.
        assert_eq!(sample.voltage, volts(3.3));
    }

    emu.set_operating_point(volts(3.3), amps(0.5)).unwrap();
    thread::sleep(Duration::from_millis(100));

    emu.stop();
    emu.join().unwrap();
    assert!(!state.lock().unwrap().output, "output must be off after stop");

    let log = emu.snapshot();
    assert!(log.len() > first_phase.len());
    assert_eq!(log.last().unwrap().setpoint_current, amps(0.5));

    // Reference fields are pair-consistent and change over monotonically: once the new
    // setpoint shows up, no sample carries the old one anymore.
    let switch = log
        .iter()
        .position(|s| s.setpoint_current == amps(0.5))
        .expect("new setpoint never showed up in the log");
    assert!(log[..switch]
        .iter()
        .all(|s| s.setpoint_current == amps(0.01)));
    assert!(log[switch..].iter().all(|s| s.setpoint_current == amps(0.5)));

    // Elapsed timestamps are nondecreasing.
    for pair in log.windows(2) {
        assert!(pair[0].elapsed <= pair[1].elapsed);
    }
}

#[rstest]
fn test_log_stops_growing_after_join(mut emu: PvEmulator<SimLink>) {
    emu.set_log_interval(Duration::from_millis(2));
    emu.start(volts(1.0), amps(0.1)).unwrap();
    thread::sleep(Duration::from_millis(30));
    emu.stop();
    emu.join().unwrap();

    let len = emu.snapshot().len();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(emu.snapshot().len(), len);

    // The supply handle was released together with the loop.
    assert!(matches!(
        emu.set_operating_point(volts(1.0), amps(0.1)),
        Err(PvEmuError::NotConnected)
    ));
}

#[rstest]
fn test_zero_interval_free_runs(mut emu: PvEmulator<SimLink>) {
    emu.set_log_interval(Duration::ZERO);
    emu.start(volts(1.0), amps(0.1)).unwrap();
    thread::sleep(Duration::from_millis(60));
    emu.stop();
    emu.join().unwrap();

    // Back-to-back reads give far more samples than any realistic interval would.
    assert!(emu.snapshot().len() >= 10);
}

/// The configured interval also bounds the rate from above: a loop that ignored it and
/// free-ran would log hundreds of samples here instead of roughly run-time / interval.
#[rstest]
fn test_log_interval_paces_sampling(mut emu: PvEmulator<SimLink>) {
    emu.set_log_interval(Duration::from_millis(20));
    emu.start(volts(3.3), amps(0.01)).unwrap();
    thread::sleep(Duration::from_millis(200));
    emu.stop();
    emu.join().unwrap();

    let count = emu.snapshot().len();
    assert!(
        (5..=15).contains(&count),
        "expected roughly 10 samples, got {count}"
    );
}

#[rstest]
fn test_restart_after_join_clears_log() {
    let (link, _state) = SimLink::new();
    let mut emu = PvEmulator::new(move || Ok(Tenma722705::new(link.clone())));

    emu.set_log_interval(Duration::from_millis(2));
    emu.start(volts(1.0), amps(0.1)).unwrap();
    thread::sleep(Duration::from_millis(30));
    emu.stop();
    emu.join().unwrap();
    assert!(!emu.snapshot().is_empty());

    emu.start(volts(2.0), amps(0.2)).unwrap();
    thread::sleep(Duration::from_millis(30));
    emu.stop();
    emu.join().unwrap();

    let log = emu.snapshot();
    assert!(!log.is_empty());
    // Only samples of the second run are left.
    assert!(log.iter().all(|s| s.setpoint_voltage == volts(2.0)));
    // Elapsed restarts from the new loop origin.
    assert!(log.first().unwrap().elapsed < Duration::from_millis(100));
}

#[rstest]
fn test_device_failure_stops_loop_and_surfaces_on_join() {
    let (mut emu, state) = sim_emulator();
    state.lock().unwrap().queries_left = Some(4);

    emu.set_log_interval(Duration::from_millis(2));
    emu.start(volts(1.0), amps(0.1)).unwrap();

    // Give the loop time to hit the injected failure and wind down on its own.
    thread::sleep(Duration::from_millis(100));
    assert!(!emu.is_running());

    match emu.join() {
        Err(PvEmuError::Link(LinkError::Io(_))) => {}
        other => panic!("Expected the loop's I/O error from join, got {other:?}"),
    }
    assert!(emu.snapshot().len() <= 2);
}

#[rstest]
fn test_drop_while_running_joins_cleanly(mut emu: PvEmulator<SimLink>) {
    emu.set_log_interval(Duration::from_millis(2));
    emu.start(volts(1.0), amps(0.1)).unwrap();
    thread::sleep(Duration::from_millis(10));
    drop(emu);
}
