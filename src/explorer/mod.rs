//! This module contains the explorer: the top-level loop that ties the
//! concrete and symbolic halves of the search together.
//!
//! One iteration of the loop asks the selector for a branch outcome nobody
//! has observed, assembles the corresponding query, hands it to a
//! satisfiability backend, recovers inputs from the model, and re-runs the
//! method on them. The resulting trace is replayed symbolically and merged
//! into the execution tree, where it feeds the next selection. The loop ends
//! when the selector has nothing left to propose, when the iteration budget
//! runs out, or when the watchdog requests a stop.
//!
//! An inconclusive query is skipped rather than treated as exhausting its
//! branch: the same branch may still fall to a different context, and the
//! selector never proposes the same context twice.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    builder::concolic::ConcolicStateBuilder,
    constant::DEFAULT_MAX_ITERATIONS,
    context::ExecutionContext,
    error::{
        self,
        container::{Locatable, SourceLoc},
        graph,
    },
    ir::Program,
    runner::{interpreter, interpreter::Interpreter, ConcreteRunner, RunOutcome},
    selector::{self, ContextGuidedSelector, NextTarget},
    smt::{
        backend::{CheckStatus, SolverBackend},
        convert::Converter,
        local::LocalSolver,
        model::{self, RecoveredInputs},
    },
    trace::parser,
    tree::ExecutionTree,
    watchdog::{DynWatchdog, LazyWatchdog},
};

/// The configuration for an exploration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum number of search iterations before the exploration gives
    /// up on a method.
    ///
    /// Defaults to [`DEFAULT_MAX_ITERATIONS`].
    pub max_iterations: usize,

    /// The seed of the exploration's random decisions, or [`None`] to draw
    /// one from entropy.
    ///
    /// Two explorations of the same program with the same seed make
    /// identical decisions.
    pub seed: Option<u64>,

    /// The configuration of the branch selector.
    pub selector: selector::Config,
}

impl Config {
    /// Sets the `max_iterations` config parameter to `value`.
    #[must_use]
    pub fn with_max_iterations(mut self, value: usize) -> Self {
        self.max_iterations = value;
        self
    }

    /// Sets the `seed` config parameter to `value`.
    #[must_use]
    pub fn with_seed(mut self, value: u64) -> Self {
        self.seed = Some(value);
        self
    }

    /// Sets the `selector` config parameter to `value`.
    #[must_use]
    pub fn with_selector(mut self, value: selector::Config) -> Self {
        self.selector = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed:           None,
            selector:       selector::Config::default(),
        }
    }
}

/// What one exploration of a method found.
#[derive(Debug, Default)]
pub struct ExplorationReport {
    /// One set of generated inputs per distinct path the exploration
    /// observed, the seeding defaults first.
    pub inputs: Vec<RecoveredInputs>,

    /// The number of search iterations that were performed.
    pub iterations: usize,

    /// Whether the selector ran out of unexplored outcomes, as opposed to
    /// the budget or the watchdog ending the search.
    pub exhausted: bool,

    /// The number of proposals that were skipped because their query was
    /// inconclusive.
    pub skipped: usize,

    /// The non-fatal errors the exploration encountered along the way.
    pub errors: error::Errors,
}

/// The concolic explorer for one program.
///
/// The explorer owns the execution tree it grows; [`Self::tree`] exposes it
/// for inspection after a search.
#[derive(Debug)]
pub struct Explorer {
    ctx:      ExecutionContext,
    tree:     ExecutionTree,
    selector: ContextGuidedSelector,
    concolic: ConcolicStateBuilder,
    backend:  Box<dyn SolverBackend>,
    runner:   Box<dyn ConcreteRunner>,
    watchdog: DynWatchdog,
    config:   Config,
}

impl Explorer {
    /// Constructs an explorer over `program` with the built-in backend and
    /// the instrumented interpreter as the runner.
    #[must_use]
    pub fn new(program: Arc<Program>, config: Config) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let ctx = ExecutionContext::new(Arc::clone(&program), seed);
        let selector = ContextGuidedSelector::new(config.selector.clone());
        let concolic = ConcolicStateBuilder::new(Arc::clone(&program));
        let runner = Interpreter::new(program, interpreter::Config::default());

        Self {
            ctx,
            tree: ExecutionTree::new(),
            selector,
            concolic,
            backend: Box::new(LocalSolver::default()),
            runner: Box::new(runner),
            watchdog: LazyWatchdog.in_rc(),
            config,
        }
    }

    /// Replaces the satisfiability backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Box<dyn SolverBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Replaces the concrete runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Box<dyn ConcreteRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replaces the watchdog consulted between iterations.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: DynWatchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Gets the execution tree the exploration has grown so far.
    #[must_use]
    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    /// Explores `method` starting from its default inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no method named `method` exists in the program.
    pub fn run(&mut self, method: &str) -> error::Result<ExplorationReport> {
        let id = self.ctx.program().by_name(method).ok_or_else(|| {
            graph::Error::UnknownMethod {
                name: method.to_string(),
            }
            .locate(SourceLoc::Program)
        })?;
        let seed = RecoveredInputs::defaults(self.ctx.program().method(id));
        self.run_from(method, seed)
    }

    /// Explores `method` starting from the provided inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no method named `method` exists in the program.
    pub fn run_from(
        &mut self,
        method: &str,
        seed: RecoveredInputs,
    ) -> error::Result<ExplorationReport> {
        if self.ctx.program().by_name(method).is_none() {
            return Err(graph::Error::UnknownMethod {
                name: method.to_string(),
            }
            .locate(SourceLoc::Program)
            .into());
        }

        let mut report = ExplorationReport::default();
        self.try_run(&seed, &mut report);

        loop {
            if report.iterations >= self.config.max_iterations {
                tracing::info!(
                    iterations = report.iterations,
                    "the iteration budget ended the search"
                );
                break;
            }
            if report.iterations % self.watchdog.poll_every() == 0 && self.watchdog.should_stop() {
                tracing::info!("the watchdog ended the search");
                break;
            }

            let Some(target) =
                self.selector.poll(&mut self.tree, &mut self.ctx, &self.watchdog)
            else {
                report.exhausted = !self.watchdog.should_stop();
                break;
            };

            report.iterations += 1;
            self.pursue(method, &target, &mut report);
        }

        tracing::info!(
            method,
            paths = report.inputs.len(),
            iterations = report.iterations,
            skipped = report.skipped,
            exhausted = report.exhausted,
            "the exploration finished"
        );
        Ok(report)
    }

    /// Decides one proposal and, when it is satisfiable, re-runs the method
    /// on the recovered inputs and merges the observed path.
    fn pursue(&mut self, method: &str, target: &NextTarget, report: &mut ExplorationReport) {
        let mut converter = Converter::new();
        let predicates = target
            .state
            .iter()
            .map(|clause| &clause.predicate)
            .chain(target.query.iter().map(|clause| &clause.predicate));
        let assertions = match converter.convert_all(predicates) {
            Ok(assertions) => assertions,
            Err(e) => {
                report.errors.add(e.locate(SourceLoc::Program).into());
                report.skipped += 1;
                return;
            }
        };

        let status = match self.backend.check(&assertions) {
            Ok(status) => status,
            Err(e) => {
                report.errors.add(e.locate(SourceLoc::Program).into());
                report.skipped += 1;
                return;
            }
        };

        let assignment = match status {
            CheckStatus::Sat(assignment) => assignment,
            CheckStatus::Unsat => {
                // Unsatisfiable under this context only; a different route
                // to the branch may still flip it.
                tracing::debug!(vertex = target.vertex, "the flip query is unsatisfiable");
                report.skipped += 1;
                return;
            }
            CheckStatus::Unknown(reason) => {
                tracing::debug!(
                    vertex = target.vertex,
                    %reason,
                    "the flip query was inconclusive"
                );
                report.skipped += 1;
                return;
            }
        };

        let program = Arc::clone(self.ctx.program());
        let Some(id) = program.by_name(method) else {
            report.skipped += 1;
            return;
        };
        let inputs = match model::recover(&converter, &assignment, program.method(id)) {
            Ok(inputs) => inputs,
            Err(e) => {
                report.errors.add(e.locate(SourceLoc::Program).into());
                report.skipped += 1;
                return;
            }
        };

        self.try_run(&inputs, report);
    }

    /// Runs the method concretely on `inputs` and merges the trace into the
    /// tree; discards runs that produced no usable trace.
    fn try_run(&mut self, inputs: &RecoveredInputs, report: &mut ExplorationReport) {
        let trace = match self.runner.run(inputs) {
            RunOutcome::Completed { trace } | RunOutcome::Threw { trace, .. } => trace,
            RunOutcome::TimedOut => {
                tracing::warn!(method = %inputs.method, "a concrete run timed out");
                return;
            }
            RunOutcome::Failed { reason } => {
                tracing::warn!(method = %inputs.method, %reason, "a concrete run failed");
                return;
            }
        };

        let actions = match parser::parse(&trace) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!(error = %e, "a trace could not be parsed");
                report.errors.add(e.into());
                return;
            }
        };

        let state = match self.concolic.build(Uuid::new_v4(), &actions) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "a trace could not be replayed symbolically");
                report.errors.add(e.into());
                return;
            }
        };

        match self.tree.merge(&state) {
            Ok(()) => report.inputs.push(inputs.clone()),
            Err(e) => report.errors.add(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{atomic::AtomicBool, Arc};

    use crate::{
        explorer::{Config, Explorer},
        ir::{
            CmpOp,
            Const,
            Instruction,
            MethodBuilder,
            Program,
            Terminator,
            TypeSig,
            Value,
        },
        watchdog::FlagWatchdog,
    };

    /// Builds `f(x) { if (x > 0) return 1; else return -1; }`.
    fn branching_program() -> anyhow::Result<Arc<Program>> {
        let mut b = MethodBuilder::new("f", [TypeSig::Int], Some(TypeSig::Int));
        let entry = b.block();
        let then = b.block();
        let els = b.block();
        let cond = b.local(TypeSig::Bool);
        b.push(
            entry,
            Instruction::Cmp {
                result: cond,
                op:     CmpOp::Gt,
                lhs:    Value::Arg(0),
                rhs:    Value::Const(Const::Int(0)),
            },
        );
        b.terminate(
            entry,
            Terminator::Branch {
                cond:     Value::Local(cond),
                on_true:  then,
                on_false: els,
            },
        );
        b.terminate(
            then,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(1))),
            },
        );
        b.terminate(
            els,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(-1))),
            },
        );
        Ok(Arc::new(Program::new(vec![b.finish()?])?))
    }

    #[test]
    fn a_zero_iteration_budget_stops_after_the_seed_run() -> anyhow::Result<()> {
        let mut explorer = Explorer::new(
            branching_program()?,
            Config::default().with_seed(0).with_max_iterations(0),
        );
        let report = explorer.run("f")?;

        assert_eq!(report.iterations, 0);
        assert_eq!(report.inputs.len(), 1);
        assert!(!report.exhausted);

        Ok(())
    }

    #[test]
    fn a_stopped_watchdog_ends_the_search_unexhausted() -> anyhow::Result<()> {
        let flag = Arc::new(AtomicBool::new(true));
        let mut explorer = Explorer::new(branching_program()?, Config::default().with_seed(0))
            .with_watchdog(FlagWatchdog::new(flag).polling_every(1).in_rc());
        let report = explorer.run("f")?;

        assert_eq!(report.iterations, 0);
        assert!(!report.exhausted);

        Ok(())
    }

    #[test]
    fn exploring_an_unknown_method_fails() -> anyhow::Result<()> {
        let mut explorer = Explorer::new(branching_program()?, Config::default().with_seed(0));

        assert!(explorer.run("nope").is_err());

        Ok(())
    }
}
