//! The emulator core: a fixed-period sampling loop over a TENMA 72-2705.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use measurements::{Current, Voltage};
use supplylink::LinkInterface;
use tenma72_2705::Tenma722705;

use crate::{PvEmuError, Sample, Setpoint};

/// Default duration between two logged samples.
const DEFAULT_LOG_INTERVAL: Duration = Duration::from_millis(100);

// Run states of the emulator, kept in one `AtomicU8` so that the already-running check
// and the transition into it are a single atomic operation.
const IDLE: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

/// State shared between the caller and the sampling thread.
///
/// Everything in here is guarded by one mutex, which is held only for short read/modify
/// scopes and never across device I/O.
#[derive(Debug)]
struct Shared {
    setpoint: Setpoint,
    log_interval: Duration,
    log: Vec<Sample>,
}

type Connector<T> = Box<dyn FnMut() -> Result<Tenma722705<T>, PvEmuError> + Send>;

/// Emulates a PV+MPPT source on a programmable bench power supply.
///
/// The emulator owns the connection to the supply, a mutable setpoint pair, the sampling
/// log, and the run state of the background sampling loop. See the crate documentation
/// for a usage example.
///
/// At most one sampling loop is active per emulator at any time; this is enforced
/// atomically, so a second `start` fails with [`PvEmuError::AlreadyRunning`] even if it
/// races with the first one.
pub struct PvEmulator<T: LinkInterface + Send + 'static> {
    connector: Connector<T>,
    supply: Option<Tenma722705<T>>,
    shared: Arc<Mutex<Shared>>,
    state: Arc<AtomicU8>,
    sampler: Option<JoinHandle<Result<(), PvEmuError>>>,
}

impl PvEmulator<supplylink::SerialLink> {
    /// Create an emulator that connects to the one 72-2705 attached to the USB bus.
    ///
    /// Discovery only happens once [`connect`](PvEmulator::connect) or
    /// [`start`](PvEmulator::start) is called.
    pub fn serial() -> Self {
        Self::new(|| Ok(Tenma722705::discover()?))
    }
}

impl<T: LinkInterface + Send + 'static> PvEmulator<T> {
    /// Create a new emulator with the given connector.
    ///
    /// The connector is invoked whenever the emulator needs to establish the supply
    /// connection, i.e., on [`connect`](PvEmulator::connect) or on the first
    /// [`start`](PvEmulator::start) after the handle was released.
    ///
    /// # Arguments
    /// * `connector` - A closure producing a connected [`Tenma722705`] driver.
    pub fn new<C>(connector: C) -> Self
    where
        C: FnMut() -> Result<Tenma722705<T>, PvEmuError> + Send + 'static,
    {
        PvEmulator {
            connector: Box::new(connector),
            supply: None,
            shared: Arc::new(Mutex::new(Shared {
                setpoint: Setpoint::default(),
                log_interval: DEFAULT_LOG_INTERVAL,
                log: Vec::new(),
            })),
            state: Arc::new(AtomicU8::new(IDLE)),
            sampler: None,
        }
    }

    /// Establish the supply connection if no handle is bound yet.
    ///
    /// The output of the supply is disabled right after connecting, so the bench is in a
    /// known state before the first operating point is applied.
    pub fn connect(&mut self) -> Result<(), PvEmuError> {
        if self.supply.is_none() {
            let mut supply = (self.connector)()?;
            supply.set_output(false)?;
            self.supply = Some(supply);
        }
        Ok(())
    }

    /// Set the duration between two logged samples.
    ///
    /// The new interval takes effect at the next loop iteration; last-writer-wins. If the
    /// interval is shorter than the time one voltage/current read pair actually takes
    /// (including zero), the loop runs back-to-back with no idle wait. That is documented
    /// behavior, not an error.
    pub fn set_log_interval(&mut self, interval: Duration) {
        let mut shared = self.shared.lock().expect("Mutex should not be poisoned");
        shared.log_interval = interval;
    }

    /// Get the currently configured duration between two logged samples.
    pub fn log_interval(&self) -> Duration {
        self.shared
            .lock()
            .expect("Mutex should not be poisoned")
            .log_interval
    }

    /// Set the operating point of the emulated source.
    ///
    /// The shared setpoint is updated first (under the lock, so samples logged from here
    /// on carry the new reference), then the `VSET1`/`ISET1` commands are issued to the
    /// supply. Fails with [`PvEmuError::NotConnected`] if no supply handle is bound.
    pub fn set_operating_point(
        &mut self,
        voltage: Voltage,
        current: Current,
    ) -> Result<(), PvEmuError> {
        let supply = match &mut self.supply {
            Some(supply) => supply,
            None => return Err(PvEmuError::NotConnected),
        };
        {
            let mut shared = self.shared.lock().expect("Mutex should not be poisoned");
            shared.setpoint = Setpoint { voltage, current };
        }
        supply.set_voltage(voltage)?;
        supply.set_current(current)?;
        Ok(())
    }

    /// Get the operating point that is currently commanded.
    pub fn operating_point(&self) -> Setpoint {
        self.shared
            .lock()
            .expect("Mutex should not be poisoned")
            .setpoint
    }

    /// Query the identification string of the connected supply.
    ///
    /// Fails with [`PvEmuError::NotConnected`] if no supply handle is bound.
    pub fn identification(&mut self) -> Result<String, PvEmuError> {
        match &mut self.supply {
            Some(supply) => Ok(supply.identification()?),
            None => Err(PvEmuError::NotConnected),
        }
    }

    /// Reset the connected supply to its power-on defaults.
    ///
    /// Fails with [`PvEmuError::NotConnected`] if no supply handle is bound.
    pub fn reset(&mut self) -> Result<(), PvEmuError> {
        match &mut self.supply {
            Some(supply) => Ok(supply.reset()?),
            None => Err(PvEmuError::NotConnected),
        }
    }

    /// Start emulating: connect, apply the initial operating point, enable the output,
    /// clear the log, and launch the sampling loop.
    ///
    /// Non-blocking: this returns once the loop is launched, not once it has produced
    /// data. Fails with [`PvEmuError::AlreadyRunning`] if a loop is already active; any
    /// setup error leaves the emulator idle again.
    ///
    /// # Arguments
    /// * `voltage` - Initial voltage setpoint.
    /// * `current` - Initial current setpoint.
    pub fn start(&mut self, voltage: Voltage, current: Current) -> Result<(), PvEmuError> {
        if self
            .state
            .compare_exchange(IDLE, STARTING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PvEmuError::AlreadyRunning);
        }
        match self.start_sampler(voltage, current) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.store(IDLE, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn start_sampler(&mut self, voltage: Voltage, current: Current) -> Result<(), PvEmuError> {
        // Reap a sampler that stopped on its own; its result is only logged here, use
        // `join` after `stop` to retrieve it programmatically.
        if let Some(handle) = self.sampler.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("previous sampling run ended with error: {e}"),
                Err(_) => tracing::warn!("previous sampling thread panicked"),
            }
        }

        self.connect()?;
        self.set_operating_point(voltage, current)?;

        let mut supply = match &self.supply {
            Some(supply) => supply.clone(),
            None => return Err(PvEmuError::NotConnected),
        };
        supply.set_output(true)?;

        {
            let mut shared = self.shared.lock().expect("Mutex should not be poisoned");
            shared.log.clear();
        }

        // The loop only runs while it observes RUNNING, so the state must be set before
        // the thread is spawned.
        self.state.store(RUNNING, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);
        self.sampler = Some(thread::spawn(move || sampling_loop(supply, shared, state)));
        tracing::debug!(
            voltage_v = voltage.as_volts(),
            current_a = current.as_amperes(),
            "sampling loop launched"
        );
        Ok(())
    }

    /// Request termination of the sampling loop.
    ///
    /// This only flags the loop to stop and never blocks; the loop exits at its next
    /// iteration boundary, so at most one in-flight sample is still appended. Callers
    /// that need the loop to be finished must call [`join`](PvEmulator::join).
    /// Idempotent.
    pub fn stop(&mut self) {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::debug!("sampling loop stop requested");
        }
    }

    /// Wait for the sampling loop to finish and release the supply handle.
    ///
    /// Returns the result of the loop: `Ok` after a clean stop, or the device error that
    /// terminated it. A no-op if no loop was ever started.
    pub fn join(&mut self) -> Result<(), PvEmuError> {
        if let Some(handle) = self.sampler.take() {
            let result = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(PvEmuError::SamplerPanicked),
            };
            self.supply = None;
            return result;
        }
        Ok(())
    }

    /// Whether a sampling loop is currently active.
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Get a copy of all samples recorded so far.
    ///
    /// Taken under the log lock, so a snapshot never observes a partially written
    /// sample.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.shared
            .lock()
            .expect("Mutex should not be poisoned")
            .log
            .clone()
    }
}

impl<T: LinkInterface + Send + 'static> Drop for PvEmulator<T> {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.sampler.take() {
            match handle.join() {
                Ok(Ok(())) => tracing::trace!("sampling thread joined"),
                Ok(Err(e)) => tracing::warn!("sampling loop ended with error: {e}"),
                Err(_) => tracing::warn!("sampling thread panicked during shutdown"),
            }
        }
    }
}

/// Read the configured log interval under the lock.
fn log_interval(shared: &Mutex<Shared>) -> Duration {
    shared
        .lock()
        .expect("Mutex should not be poisoned")
        .log_interval
}

/// The sampling loop, running on its own thread until the run state leaves `RUNNING`.
///
/// Scheduling is fixed-period: the deadline advances by exactly one interval per
/// iteration. When an iteration overruns, the sleep collapses to zero and the loop
/// free-runs; there is no catch-up burst, persistent overruns simply drift.
fn sampling_loop<T: LinkInterface + Send + 'static>(
    mut supply: Tenma722705<T>,
    shared: Arc<Mutex<Shared>>,
    state: Arc<AtomicU8>,
) -> Result<(), PvEmuError> {
    let origin = Instant::now();
    let mut deadline = origin + log_interval(&shared);

    let result = loop {
        if state.load(Ordering::SeqCst) != RUNNING {
            break Ok(());
        }

        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        deadline += log_interval(&shared);

        let voltage = match supply.get_voltage() {
            Ok(voltage) => voltage,
            Err(e) => break Err(e.into()),
        };
        let current = match supply.get_current() {
            Ok(current) => current,
            Err(e) => break Err(e.into()),
        };

        let mut guard = shared.lock().expect("Mutex should not be poisoned");
        let sample = Sample {
            elapsed: origin.elapsed(),
            voltage,
            current,
            setpoint_voltage: guard.setpoint.voltage,
            setpoint_current: guard.setpoint.current,
        };
        guard.log.push(sample);
    };

    if let Err(e) = &result {
        tracing::error!("sampling loop terminated: {e}");
    }
    // Best effort; when the loop died of a link error this will usually fail too.
    if let Err(e) = supply.set_output(false) {
        tracing::warn!("failed to disable output on shutdown: {e}");
    }
    state.store(IDLE, Ordering::SeqCst);
    result
}
