//! This module contains the execution context: the shared, explicit home for
//! everything that parameterises an exploration but is not part of any one
//! subsystem.
//!
//! All randomness in the crate flows through the context's seeded generator,
//! so two explorations of the same program with the same seed make identical
//! decisions.

use std::sync::Arc;

use derivative::Derivative;
use rand::{rngs::StdRng, SeedableRng};

use crate::ir::{Program, TypeSig};

/// Chooses a class to aim a type check at when the path to be explored
/// requires a type that no run has produced yet.
///
/// The crate itself has no view of the class hierarchy of the analysed
/// program, so clients with one can supply it here.
pub trait InstantiationOracle {
    /// Picks a class assignable to `target` that is not in `seen`, or
    /// [`None`] when no such class is known.
    fn pick(&self, target: &TypeSig, seen: &[String], rng: &mut StdRng) -> Option<String>;
}

/// The oracle used when no class hierarchy is available: the only known
/// inhabitant of a reference type is the type itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactOracle;

impl InstantiationOracle for ExactOracle {
    fn pick(&self, target: &TypeSig, seen: &[String], _rng: &mut StdRng) -> Option<String> {
        match target {
            TypeSig::Reference(class) if !seen.iter().any(|s| s == class) => Some(class.clone()),
            _ => None,
        }
    }
}

/// The explicit context of one exploration.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ExecutionContext {
    program: Arc<Program>,
    rng:     StdRng,
    #[derivative(Debug = "ignore")]
    oracle:  Box<dyn InstantiationOracle>,
}

impl ExecutionContext {
    /// Constructs a context over `program` whose random decisions are
    /// reproducible from `seed`.
    #[must_use]
    pub fn new(program: Arc<Program>, seed: u64) -> Self {
        Self {
            program,
            rng: StdRng::seed_from_u64(seed),
            oracle: Box::new(ExactOracle),
        }
    }

    /// Replaces the instantiation oracle.
    #[must_use]
    pub fn with_oracle(mut self, oracle: Box<dyn InstantiationOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Gets the program under exploration.
    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Gets the context's random generator.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Asks the oracle for a class assignable to `target` that is not in
    /// `seen`, drawing any random choice from the context's generator.
    pub fn instantiate(&mut self, target: &TypeSig, seen: &[String]) -> Option<String> {
        let Self { rng, oracle, .. } = self;
        oracle.pick(target, seen, rng)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use rand::Rng;

    use crate::{
        context::ExecutionContext,
        ir::{Program, TypeSig},
    };

    #[test]
    fn the_same_seed_draws_the_same_numbers() -> anyhow::Result<()> {
        let program = Arc::new(Program::new(vec![])?);
        let mut a = ExecutionContext::new(Arc::clone(&program), 42);
        let mut b = ExecutionContext::new(program, 42);

        let draws_a: Vec<u32> = (0..8).map(|_| a.rng().gen_range(0..100)).collect();
        let draws_b: Vec<u32> = (0..8).map(|_| b.rng().gen_range(0..100)).collect();

        assert_eq!(draws_a, draws_b);

        Ok(())
    }

    #[test]
    fn the_exact_oracle_offers_the_target_once() -> anyhow::Result<()> {
        let program = Arc::new(Program::new(vec![])?);
        let mut ctx = ExecutionContext::new(program, 0);
        let target = TypeSig::Reference("java.util.ArrayList".into());

        assert_eq!(
            ctx.instantiate(&target, &[]),
            Some("java.util.ArrayList".into())
        );
        assert_eq!(
            ctx.instantiate(&target, &["java.util.ArrayList".into()]),
            None
        );

        Ok(())
    }
}
