//! Top-level control loop: keep the broker link up, wait for the trigger,
//! run one acquisition cycle at a time.

use crate::classifier::{Classifier, InferenceError};
use crate::decision::{DecisionEngine, DecisionError, Verdict};
use crate::recorder::{RecordError, Recorder};
use crate::reporter::{PublishError, Reporter};
use crate::signal::SignalAssembler;
use crate::status::{Status, StatusDisplay};
use crate::storage::StorageError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A single digital input
pub trait TriggerInput {
    fn is_asserted(&mut self) -> std::io::Result<bool>;
}

/// Active-low input exposed as a sysfs-style value file (`0` = pressed)
pub struct GpioTrigger {
    path: PathBuf,
}

impl GpioTrigger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TriggerInput for GpioTrigger {
    fn is_asserted(&mut self) -> std::io::Result<bool> {
        let value = fs::read_to_string(&self.path)?;
        Ok(value.trim() == "0")
    }
}

/// Why a cycle stopped before publishing
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Recording failed: {0}")]
    Record(#[from] RecordError),
    #[error("Recording unreadable: {0}")]
    ReadBack(#[from] StorageError),
    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("Unusable classifier output: {0}")]
    Decision(#[from] DecisionError),
    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),
}

#[derive(Debug)]
pub enum CycleOutcome {
    Published(Verdict),
    Aborted(CycleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    CycleRunning,
}

pub struct TriggerLoop {
    trigger: Box<dyn TriggerInput>,
    recorder: Recorder,
    assembler: SignalAssembler,
    classifier: Box<dyn Classifier>,
    engine: DecisionEngine,
    reporter: Reporter,
    display: Arc<dyn StatusDisplay>,
    record_duration: Duration,
    debounce: Duration,
    idle_poll: Duration,
    state: LoopState,
    trigger_fault_reported: bool,
}

impl TriggerLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trigger: Box<dyn TriggerInput>,
        recorder: Recorder,
        assembler: SignalAssembler,
        classifier: Box<dyn Classifier>,
        reporter: Reporter,
        display: Arc<dyn StatusDisplay>,
        record_duration: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            trigger,
            recorder,
            assembler,
            classifier,
            engine: DecisionEngine::new(),
            reporter,
            display,
            record_duration,
            debounce,
            idle_poll: Duration::from_millis(20),
            state: LoopState::Idle,
            trigger_fault_reported: false,
        }
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// One loop iteration. Returns the outcome when the trigger started a cycle.
    pub fn tick(&mut self) -> Option<CycleOutcome> {
        if self.reporter.ensure_connected() {
            self.display.show(&Status::Ready);
        }
        self.reporter.service();

        if !self.sample_trigger() {
            return None;
        }

        log::info!("🔘 Trigger asserted");
        self.state = LoopState::CycleRunning;
        std::thread::sleep(self.debounce);

        let outcome = match self.run_cycle() {
            Ok(verdict) => CycleOutcome::Published(verdict),
            Err(e) => {
                log::warn!("⚠️ Cycle aborted: {}", e);
                CycleOutcome::Aborted(e)
            }
        };

        self.state = LoopState::Idle;
        Some(outcome)
    }

    fn sample_trigger(&mut self) -> bool {
        match self.trigger.is_asserted() {
            Ok(asserted) => {
                if self.trigger_fault_reported {
                    log::info!("🔘 Trigger input readable again");
                    self.trigger_fault_reported = false;
                    self.display.show(&Status::Ready);
                }
                asserted
            }
            Err(e) => {
                if !self.trigger_fault_reported {
                    log::warn!("⚠️ Cannot read trigger input: {}", e);
                    self.trigger_fault_reported = true;
                    self.display.show(&Status::TriggerError);
                }
                false
            }
        }
    }

    /// Record → assemble → classify → decide → publish
    pub fn run_cycle(&mut self) -> Result<Verdict, CycleError> {
        // Recorder reports its own status
        let recording = self.recorder.record(self.record_duration)?;
        // Keep the session alive across the blocking capture
        self.reporter.service();

        let buffer = self.assembler.assemble(&recording.name).inspect_err(|_| {
            self.display.show(&Status::FileError);
        })?;

        let scores = self.classifier.classify(&buffer).inspect_err(|_| {
            self.display.show(&Status::InferenceError);
        })?;

        let verdict = self.engine.decide(&scores).inspect_err(|_| {
            self.display.show(&Status::InferenceError);
        })?;
        self.display.show(&Status::Result(verdict.category));

        self.reporter.publish(&verdict).inspect_err(|_| {
            self.display.show(&Status::PublishError);
        })?;

        Ok(verdict)
    }

    /// Tick until `shutdown` is raised
    pub fn run(&mut self, shutdown: Arc<AtomicBool>) {
        log::info!("👂 Waiting for trigger...");
        while !shutdown.load(Ordering::SeqCst) {
            if let Some(outcome) = self.tick() {
                match outcome {
                    CycleOutcome::Published(verdict) => {
                        log::info!("🏁 Cycle complete: {}", verdict.category)
                    }
                    CycleOutcome::Aborted(_) => log::info!("🏁 Cycle aborted, back to idle"),
                }
            }
            std::thread::sleep(self.idle_poll);
        }
        log::info!("🛑 Trigger loop stopped");
    }
}
