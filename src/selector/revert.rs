//! This module contains clause reversal: turning the recorded outcome of a
//! branch into the predicate of an outcome no run has taken yet.
//!
//! Reversal is branch-kind-specific. Two-outcome checks flip to their logical
//! negation. Switches pick uniformly among the declared-but-unobserved case
//! values, with the default standing in as one more candidate until some run
//! falls through. Type checks are asymmetric: the failing side is a plain
//! flip, but steering a failed check back to the passing side needs a
//! concrete class, which only the [`crate::context::InstantiationOracle`]
//! can supply.

use rand::seq::SliceRandom;

use crate::{
    context::ExecutionContext,
    ir::{BinaryOp, Const, InstLoc, Terminator, TypeSig},
    predicate::{
        term::{Term, TermRef},
        Predicate,
        PredicateKind,
        PredicateOp,
    },
    trace::symbolic::{Clause, PathClauseKind},
    tree::{ExecutionTree, VertexId},
};

/// Derives the predicate of an unobserved outcome of the branch at `vertex`,
/// or [`None`] when the branch offers nothing further.
///
/// `tried` accumulates the classes already aimed at the vertex's type check
/// across calls; a type check whose oracle runs dry is marked exhausted in
/// the tree as a side effect.
pub fn revert(
    tree: &mut ExecutionTree,
    vertex: VertexId,
    tried: &mut Vec<String>,
    ctx: &mut ExecutionContext,
) -> Option<Predicate> {
    let kind = tree.vertex(vertex).kind()?;
    let clause = tree.vertex(vertex).clause()?.clone();

    match kind {
        PathClauseKind::Condition | PathClauseKind::NullCheck | PathClauseKind::BoundsCheck => {
            clause.predicate.inverse()
        }
        PathClauseKind::Switch | PathClauseKind::TableSwitch => {
            revert_switch(tree, vertex, &clause, ctx)
        }
        PathClauseKind::TypeCheck => revert_type_check(tree, vertex, &clause, tried, ctx),
    }
}

/// Picks an unobserved switch outcome uniformly at random: a declared case
/// value no sibling has matched, or the default when no run has fallen
/// through yet.
fn revert_switch(
    tree: &ExecutionTree,
    vertex: VertexId,
    clause: &Clause,
    ctx: &mut ExecutionContext,
) -> Option<Predicate> {
    let key = switch_key(&clause.predicate)?.clone();
    let declared = declared_cases(ctx, clause.location)?;

    let mut default_seen = false;
    let mut observed: Vec<i64> = Vec::new();
    for &sibling in tree.siblings(vertex) {
        let Some(sibling_clause) = tree.vertex(sibling).clause() else {
            continue;
        };
        match &sibling_clause.predicate.op {
            PredicateOp::Equality { rhs, .. } => observed.extend(const_value(rhs)),
            PredicateOp::DefaultSwitch { .. } => default_seen = true,
            _ => {}
        }
    }

    // `None` stands in for the default outcome.
    let mut candidates: Vec<Option<i64>> = declared
        .iter()
        .filter(|value| !observed.contains(value))
        .map(|value| Some(*value))
        .collect();
    if !default_seen {
        candidates.push(None);
    }

    match candidates.choose(ctx.rng())? {
        Some(value) => Some(Predicate::eq(
            PredicateKind::Path,
            key.clone(),
            Term::int_of(&key.ty(), *value),
        )),
        None => {
            let cases = declared
                .iter()
                .map(|case| Term::int_of(&key.ty(), *case))
                .collect();
            Some(Predicate::default_switch(PredicateKind::Path, key, cases))
        }
    }
}

/// Reverts a type check.
///
/// A recorded pass flips to the failing side directly: the solver is free to
/// pick any value outside the target type. A recorded failure instead asks
/// the oracle for a concrete class to aim at, because "some instance of the
/// target" is not a constraint a model can be recovered from.
fn revert_type_check(
    tree: &mut ExecutionTree,
    vertex: VertexId,
    clause: &Clause,
    tried: &mut Vec<String>,
    ctx: &mut ExecutionContext,
) -> Option<Predicate> {
    let PredicateOp::Equality { lhs, rhs } = &clause.predicate.op else {
        return None;
    };
    let Term::Const(Const::Bool(passed)) = rhs.as_ref() else {
        return None;
    };

    if *passed {
        return clause.predicate.inverse();
    }

    let (operand, target) = castable_parts(lhs)?;
    match ctx.instantiate(&target, tried) {
        Some(class) => {
            tried.push(class.clone());
            Some(Predicate::eq(
                PredicateKind::Path,
                Term::instance_of(operand, TypeSig::Reference(class)),
                Term::bool(true),
            ))
        }
        None => {
            tracing::debug!(vertex, "no further class to aim the type check at");
            tree.force_exhausted(vertex);
            None
        }
    }
}

/// Gets the switch key out of either recorded outcome shape.
fn switch_key(predicate: &Predicate) -> Option<&TermRef> {
    match &predicate.op {
        PredicateOp::Equality { lhs, .. } | PredicateOp::DefaultSwitch { cond: lhs, .. } => {
            Some(lhs)
        }
        _ => None,
    }
}

/// Gets the declared case values of the switch whose clause sits at `loc`.
fn declared_cases(ctx: &ExecutionContext, loc: InstLoc) -> Option<Vec<i64>> {
    match ctx.program().method(loc.method).block(loc.block).terminator() {
        Terminator::Switch { cases, .. } => Some(cases.iter().map(|(value, _)| *value).collect()),
        Terminator::TableSwitch { low, targets, .. } => Some(
            (0..targets.len())
                .map(|offset| low.saturating_add(i64::try_from(offset).unwrap_or(i64::MAX)))
                .collect(),
        ),
        _ => None,
    }
}

/// Gets the numeric value of an integral constant term.
fn const_value(term: &TermRef) -> Option<i64> {
    match term.as_ref() {
        Term::Const(Const::Int(value)) => Some(i64::from(*value)),
        Term::Const(Const::Long(value)) => Some(*value),
        _ => None,
    }
}

/// Splits the `operand == null || operand instanceof target` test recorded
/// for a cast back into its operand and target type.
fn castable_parts(term: &TermRef) -> Option<(TermRef, TypeSig)> {
    match term.as_ref() {
        Term::Binary {
            op: BinaryOp::Or,
            rhs,
            ..
        } => castable_parts(rhs),
        Term::InstanceOf { operand, target } => Some((operand.clone(), target.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::{
        context::ExecutionContext,
        ir::{BinaryOp, CmpOp, Const, InstLoc, MethodBuilder, Program, Terminator, TypeSig, Value},
        predicate::{
            term::{Term, TermRef},
            Predicate,
            PredicateKind,
            PredicateOp,
        },
        selector::revert::revert,
        trace::symbolic::{PathClause, PathClauseKind, SymbolicState},
        tree::ExecutionTree,
    };

    fn state_of(run: u128, path: Vec<PathClause>) -> SymbolicState {
        SymbolicState {
            clauses: path.iter().map(PathClause::as_clause).collect(),
            path,
            concrete: std::collections::HashMap::new(),
            run: Uuid::from_u128(run),
            raised: None,
        }
    }

    fn empty_context(seed: u64) -> anyhow::Result<ExecutionContext> {
        Ok(ExecutionContext::new(Arc::new(Program::new(vec![])?), seed))
    }

    #[test]
    fn conditions_revert_to_the_opposite_outcome() -> anyhow::Result<()> {
        let taken = Predicate::eq(
            PredicateKind::Path,
            Term::value("%t0", TypeSig::Bool),
            Term::bool(true),
        );
        let mut tree = ExecutionTree::new();
        tree.merge(&state_of(
            1,
            vec![PathClause::new(
                InstLoc::new(0, 0, 0),
                PathClauseKind::Condition,
                taken.clone(),
            )],
        ))?;

        let mut ctx = empty_context(0)?;
        let reverted = revert(&mut tree, 1, &mut Vec::new(), &mut ctx);

        assert_eq!(reverted, taken.inverse());
        assert_ne!(reverted, Some(taken), "reversal must not return the original");

        Ok(())
    }

    #[test]
    fn switch_reversal_avoids_the_observed_cases() -> anyhow::Result<()> {
        let mut b = MethodBuilder::new("label", [TypeSig::Int], Some(TypeSig::Int));
        let entry = b.block();
        let one = b.block();
        let two = b.block();
        let three = b.block();
        let fallthrough = b.block();
        b.terminate(
            entry,
            Terminator::Switch {
                key:     Value::Arg(0),
                cases:   vec![(1, one), (2, two), (3, three)],
                default: fallthrough,
            },
        );
        for (block, result) in [(one, 1), (two, 2), (three, 3), (fallthrough, 0)] {
            b.terminate(
                block,
                Terminator::Return {
                    value: Some(Value::Const(Const::Int(result))),
                },
            );
        }
        let program = Arc::new(Program::new(vec![b.finish()?])?);
        let mut ctx = ExecutionContext::new(program, 7);

        let key = Term::arg(0, TypeSig::Int);
        let loc = InstLoc::new(0, entry, 0);
        let case = |value: i32, run: u128| {
            state_of(
                run,
                vec![PathClause::new(
                    loc,
                    PathClauseKind::Switch,
                    Predicate::eq(PredicateKind::Path, key.clone(), Term::int(value)),
                )],
            )
        };

        let mut tree = ExecutionTree::new();
        tree.merge(&case(1, 1))?;
        tree.merge(&case(2, 2))?;

        // The draw is random, so check membership over several draws rather
        // than a single outcome.
        for _ in 0..16 {
            let reverted = revert(&mut tree, 1, &mut Vec::new(), &mut ctx)
                .ok_or_else(|| anyhow::anyhow!("two unobserved outcomes remain"))?;
            match &reverted.op {
                PredicateOp::Equality { rhs, .. } => {
                    assert_eq!(rhs, &Term::int(3), "cases 1 and 2 were already observed");
                }
                PredicateOp::DefaultSwitch { cases, .. } => {
                    assert_eq!(cases, &vec![Term::int(1), Term::int(2), Term::int(3)]);
                }
                other => anyhow::bail!("unexpected reversal {other:?}"),
            }
        }

        // Once case 3 and the default have both been seen there is nothing
        // left to aim for.
        tree.merge(&case(3, 3))?;
        tree.merge(&state_of(
            4,
            vec![PathClause::new(
                loc,
                PathClauseKind::Switch,
                Predicate::default_switch(
                    PredicateKind::Path,
                    key.clone(),
                    vec![Term::int(1), Term::int(2), Term::int(3)],
                ),
            )],
        ))?;
        assert_eq!(revert(&mut tree, 1, &mut Vec::new(), &mut ctx), None);

        Ok(())
    }

    fn castable(operand: &TermRef, class: &str) -> TermRef {
        Term::binary(
            BinaryOp::Or,
            Term::cmp(CmpOp::Eq, operand.clone(), Term::null()),
            Term::instance_of(operand.clone(), TypeSig::Reference(class.into())),
        )
    }

    #[test]
    fn passed_type_checks_flip_to_the_failing_side() -> anyhow::Result<()> {
        let operand = Term::arg(0, TypeSig::Reference("java.lang.Object".into()));
        let taken = Predicate::eq(
            PredicateKind::Path,
            castable(&operand, "java.util.List"),
            Term::bool(true),
        );
        let mut tree = ExecutionTree::new();
        tree.merge(&state_of(
            1,
            vec![PathClause::new(
                InstLoc::new(0, 0, 0),
                PathClauseKind::TypeCheck,
                taken.clone(),
            )],
        ))?;

        let mut ctx = empty_context(0)?;
        let reverted = revert(&mut tree, 1, &mut Vec::new(), &mut ctx);

        assert_eq!(reverted, taken.inverse());

        Ok(())
    }

    #[test]
    fn failed_type_checks_ask_the_oracle_until_it_runs_dry() -> anyhow::Result<()> {
        let operand = Term::arg(0, TypeSig::Reference("java.lang.Object".into()));
        let mut tree = ExecutionTree::new();
        tree.merge(&state_of(
            1,
            vec![PathClause::new(
                InstLoc::new(0, 0, 0),
                PathClauseKind::TypeCheck,
                Predicate::eq(
                    PredicateKind::Path,
                    castable(&operand, "java.util.List"),
                    Term::bool(false),
                ),
            )],
        ))?;

        let mut ctx = empty_context(0)?;
        let mut tried = Vec::new();

        // The exact oracle knows one inhabitant: the target itself.
        let first = revert(&mut tree, 1, &mut tried, &mut ctx);
        assert_eq!(
            first,
            Some(Predicate::eq(
                PredicateKind::Path,
                Term::instance_of(
                    operand.clone(),
                    TypeSig::Reference("java.util.List".into())
                ),
                Term::bool(true),
            ))
        );
        assert_eq!(tried, vec!["java.util.List".to_string()]);
        assert!(!tree.is_exhausted(1));

        let second = revert(&mut tree, 1, &mut tried, &mut ctx);
        assert_eq!(second, None);
        assert!(tree.is_exhausted(1), "a dry oracle exhausts the check");

        Ok(())
    }
}
