//! Actor-like control boundary around a running simulation.
//!
//! The loop thread is the sole mutator of simulation state; this module
//! only carries flags, a progress snapshot and the sample stream across
//! the thread boundary. `pause`/`resume`/`cancel` are asynchronous
//! requests the loop honors at its per-step checkpoint, so every
//! externally observable event is totally ordered by step index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use helios_core::error::SimulationError;

use crate::orchestrator::{RunSummary, Simulation};
use crate::sampling::TimeSeriesPoint;
use crate::state::Progress;

/// Capacity of the live sample channel; a consumer further behind than
/// this suspends the loop at its sampling point.
const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// Shared control state between a simulation loop and its callers.
pub struct SimulationControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
    /// True while the loop is actually parked at the pause checkpoint.
    parked: AtomicBool,
    gate: Mutex<()>,
    signal: Condvar,
    progress: Mutex<Progress>,
}

impl SimulationControl {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            gate: Mutex::new(()),
            signal: Condvar::new(),
            progress: Mutex::new(Progress::default()),
        })
    }

    /// Requests suspension at the next step boundary.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Wakes exactly the suspended step (the loop is the only waiter).
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.signal.notify_all();
    }

    /// Requests cooperative cancellation; also wakes a paused loop so it
    /// can unwind.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.signal.notify_all();
    }

    /// True while the loop is parked at its pause checkpoint.
    pub fn is_paused(&self) -> bool {
        self.parked.load(Ordering::SeqCst)
    }

    pub fn is_pause_requested(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Latest published snapshot; never blocks the loop for a non-trivial
    /// duration.
    pub fn progress(&self) -> Progress {
        self.progress.lock().expect("progress lock poisoned").clone()
    }

    pub(crate) fn publish(&self, progress: Progress) {
        *self.progress.lock().expect("progress lock poisoned") = progress;
    }

    /// The loop's cooperative checkpoint: parks while paused, and returns
    /// false when cancellation was requested.
    pub(crate) fn checkpoint(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        if self.paused.load(Ordering::SeqCst) {
            let mut guard = self.gate.lock().expect("pause gate poisoned");
            while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
                self.parked.store(true, Ordering::SeqCst);
                guard = self.signal.wait(guard).expect("pause gate poisoned");
            }
            self.parked.store(false, Ordering::SeqCst);
        }
        !self.cancelled.load(Ordering::SeqCst)
    }
}

/// Owner handle of a background simulation run.
pub struct SimulationHandle {
    control: Arc<SimulationControl>,
    samples: Option<Receiver<TimeSeriesPoint>>,
    worker: Option<JoinHandle<Result<RunSummary, SimulationError>>>,
}

impl SimulationHandle {
    /// Spawns the loop on its own thread. The simulation must already be
    /// initialized.
    pub fn spawn(mut simulation: Simulation) -> Self {
        let control = SimulationControl::new();
        let (tx, rx): (Option<Sender<TimeSeriesPoint>>, Option<Receiver<TimeSeriesPoint>>) =
            if simulation.config().sampling.enable_live_streaming {
                let (tx, rx) = bounded(SAMPLE_CHANNEL_CAPACITY);
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };
        let loop_control = Arc::clone(&control);
        let worker = std::thread::spawn(move || simulation.run(&loop_control, tx.as_ref()));
        Self {
            control,
            samples: rx,
            worker: Some(worker),
        }
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// True while the loop is parked at its pause checkpoint (not merely
    /// requested).
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn progress(&self) -> Progress {
        self.control.progress()
    }

    /// Live sample stream, when the run streams.
    pub fn samples(&self) -> Option<&Receiver<TimeSeriesPoint>> {
        self.samples.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| worker.is_finished())
            .unwrap_or(true)
    }

    /// Waits for the loop and returns its terminal result.
    pub fn join(mut self) -> Result<RunSummary, SimulationError> {
        let worker = self.worker.take().ok_or(SimulationError::NotInitialized)?;
        worker.join().map_err(|_| {
            SimulationError::InitializationFailed("simulation thread panicked".to_string())
        })?
    }
}
