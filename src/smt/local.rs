//! This module contains the built-in satisfiability backend: a bounded
//! candidate-probing decision procedure for the quantifier-free fragment the
//! converter emits.
//!
//! The solver first replaces every read from an unmodified array variable
//! with a fresh probe variable, then enumerates candidate assignments over
//! all scalar variables. Candidates are drawn from the literals occurring in
//! the assertions, their immediate neighbours, and a handful of defaults, so
//! a query such as `!(x > 0)` finds `x = 0` in a few steps. Any abstracted
//! candidate that passes is re-validated against the original assertions
//! with the probed reads written back into their arrays, which also makes
//! the array contents available to model recovery.
//!
//! The procedure is deliberately incomplete: when the candidate space is
//! larger than the probe budget, or holds no satisfying assignment without
//! being exhaustive, the solver answers [`CheckStatus::Unknown`] rather than
//! guessing.

use std::collections::{BTreeSet, HashMap};

use crate::{
    constant::DEFAULT_PROBE_LIMIT,
    error::solver,
    smt::{
        backend::{Assignment, CheckStatus, ScalarValue, SolverBackend},
        eval::Evaluator,
        expr::{Expr, ExprRef, Sort},
    },
};

/// The configuration for the built-in solver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The number of candidate assignments evaluated before the solver
    /// reports the query as beyond it.
    ///
    /// Defaults to [`DEFAULT_PROBE_LIMIT`].
    pub probe_limit: usize,
}

impl Config {
    /// Sets the `probe_limit` config parameter to `value`.
    #[must_use]
    pub fn with_probe_limit(mut self, value: usize) -> Self {
        self.probe_limit = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let probe_limit = DEFAULT_PROBE_LIMIT;
        Self { probe_limit }
    }
}

/// The built-in probing solver.
#[derive(Clone, Debug, Default)]
pub struct LocalSolver {
    config: Config,
}

impl LocalSolver {
    /// Constructs a new solver with the provided configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl SolverBackend for LocalSolver {
    fn check(&mut self, assertions: &[ExprRef]) -> Result<CheckStatus, solver::Error> {
        let mut abstraction = Abstraction::default();
        let abstracted: Vec<ExprRef> = assertions
            .iter()
            .map(|assertion| abstraction.rewrite(assertion))
            .collect();

        // Scalar variables of the abstracted set, probe variables included.
        let mut vars = std::collections::BTreeMap::new();
        for assertion in &abstracted {
            assertion.collect_vars(&mut vars);
        }
        vars.retain(|_, sort| !sort.is_array());

        let mut literals = BTreeSet::new();
        for assertion in &abstracted {
            collect_literals(assertion, &mut literals);
        }

        let domains: Vec<(String, Vec<ScalarValue>)> = vars
            .iter()
            .map(|(name, sort)| (name.clone(), candidates(sort, &literals)))
            .collect();

        let total = domains
            .iter()
            .map(|(_, domain)| domain.len().max(1))
            .try_fold(1usize, |acc, len| acc.checked_mul(len));
        let (budget, exhaustive) = match total {
            Some(total) if total <= self.config.probe_limit => (total, true),
            _ => (self.config.probe_limit, false),
        };

        for candidate in 0..budget {
            let probe = assign(&domains, candidate);
            if !all_hold(&probe, &abstracted)? {
                continue;
            }

            let concrete = abstraction.concretise(&probe, &vars)?;
            if all_hold(&concrete, assertions)? {
                tracing::debug!(candidate, "the probe found a satisfying assignment");
                return Ok(CheckStatus::Sat(concrete));
            }
        }

        if exhaustive
            && abstraction.reads.is_empty()
            && vars.values().all(|sort| *sort == Sort::Bool)
        {
            tracing::debug!("the boolean candidate space is exhausted");
            return Ok(CheckStatus::Unsat);
        }

        let reason = if exhaustive {
            "no candidate assignment satisfies the query".to_string()
        } else {
            format!(
                "the candidate space exceeds the probe budget of {}",
                self.config.probe_limit
            )
        };
        tracing::debug!(%reason, "the probe gave up");
        Ok(CheckStatus::Unknown(reason))
    }
}

/// One abstracted read from an array variable.
#[derive(Clone, Debug)]
struct ArrayRead {
    /// The array variable read from.
    array: String,

    /// The element sort of the array.
    elem: Sort,

    /// The abstracted index expression.
    index: ExprRef,

    /// The probe variable standing in for the read value.
    probe: String,
}

/// The rewriting state: selects from unmodified array variables become
/// probe variables, consistently by structure.
#[derive(Debug, Default)]
struct Abstraction {
    atoms: HashMap<ExprRef, ExprRef>,
    reads: Vec<ArrayRead>,
}

impl Abstraction {
    /// Rewrites the expression bottom-up, abstracting array-variable reads.
    fn rewrite(&mut self, expr: &ExprRef) -> ExprRef {
        match expr.as_ref() {
            Expr::BoolLit(_) | Expr::BvLit { .. } | Expr::Var { .. } => expr.clone(),
            Expr::Not(operand) => Expr::not(self.rewrite(operand)),
            Expr::And(operands) => {
                Expr::and(operands.iter().map(|operand| self.rewrite(operand)).collect())
            }
            Expr::Or(operands) => {
                Expr::or(operands.iter().map(|operand| self.rewrite(operand)).collect())
            }
            Expr::Eq { lhs, rhs } => Expr::eq(self.rewrite(lhs), self.rewrite(rhs)),
            Expr::Ite { cond, then, els } => {
                Expr::ite(self.rewrite(cond), self.rewrite(then), self.rewrite(els))
            }
            Expr::BvBin { op, lhs, rhs } => {
                Expr::bv_bin(*op, self.rewrite(lhs), self.rewrite(rhs))
            }
            Expr::BvCmp { op, lhs, rhs } => {
                Expr::bv_cmp(*op, self.rewrite(lhs), self.rewrite(rhs))
            }
            Expr::BvNeg(operand) => Expr::bv_neg(self.rewrite(operand)),
            Expr::Select { array, index } => {
                let array = self.rewrite(array);
                let index = self.rewrite(index);
                if let Expr::Var { name, sort: Sort::Array { elem, .. } } = array.as_ref() {
                    let key = Expr::select(array.clone(), index.clone());
                    if let Some(probe) = self.atoms.get(&key) {
                        return probe.clone();
                    }
                    let probe_name = format!("%read{}", self.reads.len());
                    let probe = Expr::var(probe_name.clone(), elem.as_ref().clone());
                    self.reads.push(ArrayRead {
                        array: name.clone(),
                        elem:  elem.as_ref().clone(),
                        index,
                        probe: probe_name,
                    });
                    self.atoms.insert(key, probe.clone());
                    return probe;
                }
                Expr::select(array, index)
            }
            Expr::Store {
                array,
                index,
                value,
            } => Expr::store(self.rewrite(array), self.rewrite(index), self.rewrite(value)),
            Expr::ZeroExtend { by, operand } => Expr::zero_extend(*by, self.rewrite(operand)),
            Expr::SignExtend { by, operand } => Expr::sign_extend(*by, self.rewrite(operand)),
            Expr::Extract { high, low, operand } => {
                Expr::extract(*high, *low, self.rewrite(operand))
            }
            Expr::Concat { high, low } => Expr::concat(self.rewrite(high), self.rewrite(low)),
        }
    }

    /// Turns a probe assignment into a concrete one: probe variables are
    /// dropped and their values written back into the arrays they were read
    /// from, at the index the probe assignment implies.
    fn concretise(
        &self,
        probe: &Assignment,
        vars: &std::collections::BTreeMap<String, Sort>,
    ) -> Result<Assignment, solver::Error> {
        let mut concrete = Assignment::new();
        for (name, value) in &probe.scalars {
            if vars.contains_key(name) && !name.starts_with("%read") {
                concrete.set_scalar(name.clone(), *value);
            }
        }

        let evaluator = Evaluator::new(probe);
        for read in &self.reads {
            let index = evaluator.scalar(&read.index)?.as_i64();
            let value = probe
                .scalar(&read.probe)
                .unwrap_or_else(|| ScalarValue::default_of(&read.elem));
            concrete.set_array_entry(read.array.clone(), index, value);
        }
        Ok(concrete)
    }
}

/// Evaluates every assertion under the assignment.
fn all_hold(assignment: &Assignment, assertions: &[ExprRef]) -> Result<bool, solver::Error> {
    let evaluator = Evaluator::new(assignment);
    for assertion in assertions {
        if !evaluator.truthy(assertion)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Adds every bitvector literal of the expression to `out`.
fn collect_literals(expr: &ExprRef, out: &mut BTreeSet<i64>) {
    match expr.as_ref() {
        Expr::BvLit { value, .. } => {
            out.insert(*value);
        }
        Expr::BoolLit(_) | Expr::Var { .. } => {}
        Expr::Not(operand)
        | Expr::BvNeg(operand)
        | Expr::ZeroExtend { operand, .. }
        | Expr::SignExtend { operand, .. }
        | Expr::Extract { operand, .. } => collect_literals(operand, out),
        Expr::And(operands) | Expr::Or(operands) => {
            for operand in operands {
                collect_literals(operand, out);
            }
        }
        Expr::Eq { lhs, rhs }
        | Expr::BvBin { lhs, rhs, .. }
        | Expr::BvCmp { lhs, rhs, .. }
        | Expr::Concat {
            high: lhs,
            low: rhs,
        } => {
            collect_literals(lhs, out);
            collect_literals(rhs, out);
        }
        Expr::Ite { cond, then, els } => {
            collect_literals(cond, out);
            collect_literals(then, out);
            collect_literals(els, out);
        }
        Expr::Select { array, index } => {
            collect_literals(array, out);
            collect_literals(index, out);
        }
        Expr::Store {
            array,
            index,
            value,
        } => {
            collect_literals(array, out);
            collect_literals(index, out);
            collect_literals(value, out);
        }
    }
}

/// The candidate domain of one variable: for booleans both values, for
/// bitvectors the literal pool with its neighbours plus a few defaults.
fn candidates(sort: &Sort, literals: &BTreeSet<i64>) -> Vec<ScalarValue> {
    match sort {
        Sort::Bool => vec![ScalarValue::Bool(false), ScalarValue::Bool(true)],
        Sort::BitVec(width) => {
            let mut pool = BTreeSet::new();
            for &literal in literals {
                pool.insert(literal);
                pool.insert(literal.wrapping_add(1));
                pool.insert(literal.wrapping_sub(1));
            }
            pool.extend([0, 1, -1]);
            pool.into_iter()
                .map(|value| ScalarValue::Bits {
                    value,
                    width: *width,
                })
                .collect()
        }
        Sort::Array { .. } => Vec::new(),
    }
}

/// Builds the `candidate`-th assignment of the mixed-radix candidate space.
fn assign(domains: &[(String, Vec<ScalarValue>)], candidate: usize) -> Assignment {
    let mut assignment = Assignment::new();
    let mut remaining = candidate;
    for (name, domain) in domains {
        if domain.is_empty() {
            continue;
        }
        let value = domain[remaining % domain.len()];
        remaining /= domain.len();
        assignment.set_scalar(name.clone(), value);
    }
    assignment
}
