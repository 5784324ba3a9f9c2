//! This module contains the concrete side of the search: the interface a
//! concrete runner exposes, and the threaded wrapper that bounds each run
//! with a wall-clock timeout.
//!
//! A runner takes one set of recovered inputs, executes the method under
//! test, and produces the textual trace of the run. The crate ships an
//! instrumented interpreter over the method model in [`interpreter`]; a
//! front end with access to a real runtime can provide its own runner
//! instead.

pub mod interpreter;

use std::{
    fmt::Debug,
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use crate::{constant::DEFAULT_METHOD_TIMEOUT_MS, smt::model::RecoveredInputs};

/// The result of one concrete run of the method under test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// The run completed normally and produced a trace.
    Completed { trace: String },

    /// The run threw the recorded exception class; the trace ends at the
    /// throwing instruction.
    Threw { trace: String, class: String },

    /// The run exceeded its budget and was abandoned.
    TimedOut,

    /// The run could not be performed at all.
    Failed { reason: String },
}

/// The interface to a concrete, instrumented execution of a method.
///
/// The method to run is named by the inputs themselves, so a single runner
/// serves every method of its program.
pub trait ConcreteRunner: Debug {
    /// Runs the method named by `inputs` with the provided input values.
    fn run(&self, inputs: &RecoveredInputs) -> RunOutcome;
}

/// Configuration for the threaded runner.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// The wall-clock budget of a single run, in milliseconds.
    pub method_timeout_ms: u64,
}

impl Config {
    /// Sets the wall-clock budget of a single run, in milliseconds.
    #[must_use]
    pub fn with_method_timeout_ms(mut self, value: u64) -> Self {
        self.method_timeout_ms = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            method_timeout_ms: DEFAULT_METHOD_TIMEOUT_MS,
        }
    }
}

/// A wrapper that executes an inner runner on a worker thread and enforces a
/// wall-clock timeout per run.
///
/// Runs are serialised through an internal gate: instrumented runtimes tend
/// to capture output process-globally, so two interleaved runs would corrupt
/// each other's traces.
#[derive(Debug)]
pub struct ThreadedRunner<R> {
    inner:  Arc<R>,
    config: Config,
    gate:   Mutex<()>,
}

impl<R> ThreadedRunner<R>
where
    R: ConcreteRunner + Send + Sync + 'static,
{
    /// Constructs a new threaded runner around `inner`.
    pub fn new(inner: R, config: Config) -> Self {
        Self {
            inner: Arc::new(inner),
            config,
            gate: Mutex::new(()),
        }
    }
}

impl<R> ConcreteRunner for ThreadedRunner<R>
where
    R: ConcreteRunner + Send + Sync + 'static,
{
    fn run(&self, inputs: &RecoveredInputs) -> RunOutcome {
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned_inputs = inputs.clone();
        let spawned = thread::Builder::new()
            .name(format!("run-{}", inputs.method))
            .spawn(move || {
                // The receiver may have given up; a send failure is fine.
                let _ = tx.send(inner.run(&owned_inputs));
            });

        if let Err(e) = spawned {
            return RunOutcome::Failed {
                reason: format!("could not spawn the run thread: {e}"),
            };
        }

        match rx.recv_timeout(Duration::from_millis(self.config.method_timeout_ms)) {
            Ok(outcome) => outcome,
            Err(_) => {
                // The worker is left to finish on its own; its result is
                // discarded when it arrives.
                tracing::warn!(
                    method = %inputs.method,
                    timeout_ms = self.config.method_timeout_ms,
                    "the concrete run exceeded its wall-clock budget"
                );
                RunOutcome::TimedOut
            }
        }
    }
}
