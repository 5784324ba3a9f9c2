//! This module contains the type definitions necessary to support the
//! monitoring functionality for the search loop.
//!
//! # Best-Effort Monitoring
//!
//! Note that the monitoring provided by the watchdog is a best-effort
//! approach. The explorer and selector poll it between branch evaluations,
//! so a stop request takes effect at the next such point rather than
//! immediately.
//!
//! A run of the method under test is bounded separately by the runner's own
//! timeout; see [`crate::runner::ThreadedRunner`].

use std::{
    fmt::Debug,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use crate::constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;

/// A dynamically dispatched [`Watchdog`] instance.
pub type DynWatchdog = Rc<dyn Watchdog>;

/// The interface to an object that can be polled to see if the search needs
/// to abort processing.
///
/// The interface is simple, but it can encapsulate arbitrary logic as far as
/// the search is concerned, allowing the client to implement complex stop
/// logic.
pub trait Watchdog
where
    Self: Debug,
{
    /// Checks if the search should halt and return what it has found so far.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of loop iterations the search should wait before
    /// polling the watchdog.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// An implementation of the [`Watchdog`] trait that does not place any
/// restrictions on the execution of the search.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn Watchdog> {
        Rc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        // Something ridiculously huge so it basically never gets checked.
        1_000_000_000_000
    }
}

/// A watchdog that tells the search when to stop based on a flag in the form
/// of an atomic boolean.
///
/// By default, it requests that the search poll for watchdog status every
/// [`DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS`]. This is configurable by calling
/// [`Self::polling_every`].
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    /// The flag that should be mutated externally to stop the search by this
    /// watchdog.
    flag: Arc<AtomicBool>,

    /// The number of loop iterations the search should wait before polling
    /// the watchdog.
    poll_loop_iterations: usize,
}

impl FlagWatchdog {
    /// Constructs a new `FlagWatchdog` wrapping the provided `flag`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            flag,
            poll_loop_iterations,
        }
    }

    /// Specifies the number of loop iterations that the search should wait
    /// before polling the watchdog for status.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps the watchdog into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn Watchdog> {
        Rc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

/// A watchdog that requests a stop once a wall-clock deadline has passed.
///
/// This is the standard way to hand the search a time budget: budget expiry
/// is normal termination for the selector, not an error.
#[derive(Clone, Debug)]
pub struct DeadlineWatchdog {
    /// The instant after which the search should stop.
    deadline: Instant,

    /// The number of loop iterations the search should wait before polling
    /// the watchdog.
    poll_loop_iterations: usize,
}

impl DeadlineWatchdog {
    /// Constructs a new `DeadlineWatchdog` that requests a stop at the
    /// provided `deadline`.
    #[must_use]
    pub fn new(deadline: Instant) -> Self {
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            deadline,
            poll_loop_iterations,
        }
    }

    /// Constructs a new `DeadlineWatchdog` whose deadline lies the provided
    /// duration `from_now` in the future.
    #[must_use]
    pub fn after(from_now: std::time::Duration) -> Self {
        Self::new(Instant::now() + from_now)
    }

    /// Specifies the number of loop iterations that the search should wait
    /// before polling the watchdog for status.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps the watchdog into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn Watchdog> {
        Rc::new(self)
    }
}

impl Watchdog for DeadlineWatchdog {
    fn should_stop(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}
