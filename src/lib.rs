//! This library implements concolic test generation for JVM-shaped method
//! models: it discovers, per method, a set of input values that together
//! cover the branch outcomes the method can take. It is a _best effort_
//! search; a branch whose flip query is beyond the configured backend is
//! skipped, never guessed at.
//!
//! # How it Works
//!
//! From a very high level, the input discovery process is performed as
//! follows:
//!
//! 1. A bytecode front end populates the method model in [`ir`] via
//!    [`ir::MethodBuilder`]. The crate analyses this model alone.
//! 2. The method is run concretely on default inputs by a
//!    [`runner::ConcreteRunner`], by default the instrumented interpreter in
//!    [`runner::interpreter`], which records the run as a textual trace.
//! 3. The trace is replayed symbolically by the
//!    [`builder::concolic::ConcolicStateBuilder`], producing the run's
//!    clauses and path condition, which are merged into the
//!    [`tree::ExecutionTree`].
//! 4. The [`selector::ContextGuidedSelector`] proposes a branch outcome no
//!    run has observed, together with the query whose satisfying model would
//!    steer a run through it.
//! 5. A [`smt::backend::SolverBackend`] decides the query; from a model,
//!    [`smt::model`] recovers language-level inputs, which seed the next
//!    concrete run. The loop in [`explorer`] repeats from step 2 until
//!    nothing unexplored remains or a budget runs out.
//!
//! # Basic Usage
//!
//! For the most basic usage of the library, it is sufficient to construct an
//! explorer over a program and ask it to explore one method:
//!
//! ```
//! use std::sync::Arc;
//!
//! use concolic_path_explorer::{
//!     explorer,
//!     ir::{CmpOp, Const, Instruction, MethodBuilder, Program, Terminator, TypeSig, Value},
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! // f(x) { if (x > 0) return 1; else return -1; }
//! let mut b = MethodBuilder::new("f", [TypeSig::Int], Some(TypeSig::Int));
//! let entry = b.block();
//! let then = b.block();
//! let els = b.block();
//! let cond = b.local(TypeSig::Bool);
//! b.push(entry, Instruction::Cmp {
//!     result: cond,
//!     op:     CmpOp::Gt,
//!     lhs:    Value::Arg(0),
//!     rhs:    Value::Const(Const::Int(0)),
//! });
//! b.terminate(entry, Terminator::Branch {
//!     cond:     Value::Local(cond),
//!     on_true:  then,
//!     on_false: els,
//! });
//! b.terminate(then, Terminator::Return {
//!     value: Some(Value::Const(Const::Int(1))),
//! });
//! b.terminate(els, Terminator::Return {
//!     value: Some(Value::Const(Const::Int(-1))),
//! });
//!
//! let program = Arc::new(Program::new(vec![b.finish()?])?);
//! let report = concolic_path_explorer::new(program, explorer::Config::default().with_seed(0))
//!     .run("f")?;
//!
//! // Both outcomes of the lone branch were covered.
//! assert!(report.inputs.len() >= 2);
//! assert!(report.exhausted);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod builder;
pub mod constant;
pub mod context;
pub mod error;
pub mod explorer;
pub mod graph;
pub mod ir;
pub mod predicate;
pub mod runner;
pub mod selector;
pub mod smt;
pub mod trace;
pub mod tree;
pub mod watchdog;

use std::sync::Arc;

// Re-exports to provide the library interface.
pub use explorer::{ExplorationReport, Explorer};
pub use smt::model::{RecoveredInputs, RecoveredValue};

use crate::ir::Program;

/// Constructs an explorer over `program` with the provided configuration,
/// using the built-in satisfiability backend and the instrumented
/// interpreter as the concrete runner.
#[must_use]
pub fn new(program: Arc<Program>, config: explorer::Config) -> Explorer {
    Explorer::new(program, config)
}
