//! This module contains the state structure that predicates are accumulated
//! into.
//!
//! A [`PredicateState`] is an ordered composition of predicates shaped by
//! control flow: straight-line code contributes [`PredicateState::Basic`]
//! runs, sequencing contributes [`PredicateState::Chain`]s, and joins of
//! several in-edges contribute [`PredicateState::Choice`]s. The two
//! operations the rest of the crate leans on are [`PredicateState::simplify`]
//! (a canonical left-folded spine with adjacent runs merged) and
//! [`PredicateState::slice_on`] (removal of a known prefix).

use std::{fmt, sync::Arc};

use crate::predicate::{Predicate, PredicateKind};

/// An ordered composition of predicates.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PredicateState {
    /// A straight-line run of predicates.
    Basic(Vec<Predicate>),

    /// The composition `base` followed by `curr`.
    Chain {
        base: Arc<PredicateState>,
        curr: Arc<PredicateState>,
    },

    /// One of several alternative states, one per in-edge of a join.
    Choice(Vec<PredicateState>),
}

impl PredicateState {
    /// Constructs the state with no predicates.
    #[must_use]
    pub fn empty() -> Self {
        Self::Basic(vec![])
    }

    /// Constructs a straight-line state over the provided predicates.
    #[must_use]
    pub fn basic(predicates: impl Into<Vec<Predicate>>) -> Self {
        Self::Basic(predicates.into())
    }

    /// Constructs a choice over the provided alternative states.
    #[must_use]
    pub fn choice(branches: impl Into<Vec<PredicateState>>) -> Self {
        Self::Choice(branches.into())
    }

    /// Composes `self` followed by `other`.
    #[must_use]
    pub fn extend(self, other: Self) -> Self {
        Self::Chain {
            base: Arc::new(self),
            curr: Arc::new(other),
        }
    }

    /// Appends a single predicate at the end of the state.
    #[must_use]
    pub fn with(self, predicate: Predicate) -> Self {
        match self {
            Self::Basic(mut predicates) => {
                predicates.push(predicate);
                Self::Basic(predicates)
            }
            Self::Chain { base, curr } => Self::Chain {
                base,
                curr: Arc::new(curr.as_ref().clone().with(predicate)),
            },
            choice @ Self::Choice(_) => choice.extend(Self::basic([predicate])),
        }
    }

    /// Checks whether the state contains no predicates at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Basic(predicates) => predicates.is_empty(),
            Self::Chain { base, curr } => base.is_empty() && curr.is_empty(),
            Self::Choice(branches) => branches.iter().all(Self::is_empty),
        }
    }

    /// Counts the predicates in the state, across all choice branches.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Basic(predicates) => predicates.len(),
            Self::Chain { base, curr } => base.len() + curr.len(),
            Self::Choice(branches) => branches.iter().map(Self::len).sum(),
        }
    }

    /// Gets the predicates of the state in order, descending into choice
    /// branches in their declared order.
    #[must_use]
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        match self {
            Self::Basic(predicates) => out.extend(predicates.iter()),
            Self::Chain { base, curr } => {
                base.collect_predicates(out);
                curr.collect_predicates(out);
            }
            Self::Choice(branches) => {
                for branch in branches {
                    branch.collect_predicates(out);
                }
            }
        }
    }

    /// Keeps only the predicates of the provided `kind`, preserving the
    /// shape of the state.
    #[must_use]
    pub fn filter_by_kind(&self, kind: PredicateKind) -> Self {
        match self {
            Self::Basic(predicates) => Self::Basic(
                predicates
                    .iter()
                    .filter(|p| p.kind == kind)
                    .cloned()
                    .collect(),
            ),
            Self::Chain { base, curr } => Self::Chain {
                base: Arc::new(base.filter_by_kind(kind)),
                curr: Arc::new(curr.filter_by_kind(kind)),
            },
            Self::Choice(branches) => {
                Self::Choice(branches.iter().map(|b| b.filter_by_kind(kind)).collect())
            }
        }
    }

    /// Rewrites the state into its canonical form: a left-folded spine of
    /// non-empty units with adjacent straight-line runs merged, single-branch
    /// choices collapsed, and all-empty compositions reduced to the empty
    /// state.
    ///
    /// Two states describe the same composition exactly when their
    /// simplified forms are equal.
    #[must_use]
    pub fn simplify(&self) -> Self {
        match self {
            Self::Basic(_) => self.clone(),
            Self::Choice(branches) => {
                let simplified: Vec<Self> = branches.iter().map(Self::simplify).collect();
                if simplified.iter().all(Self::is_empty) {
                    return Self::empty();
                }
                if simplified.len() == 1 {
                    return simplified.into_iter().next().unwrap_or_else(Self::empty);
                }
                Self::Choice(simplified)
            }
            Self::Chain { .. } => {
                let mut units = Vec::new();
                self.collect_units(&mut units);
                let mut iter = units.into_iter();
                let Some(first) = iter.next() else {
                    return Self::empty();
                };
                iter.fold(first, |acc, unit| acc.extend(unit))
            }
        }
    }

    /// Collects the simplified non-empty units of the chain spine, merging
    /// adjacent straight-line runs as it goes.
    fn collect_units(&self, units: &mut Vec<Self>) {
        match self {
            Self::Chain { base, curr } => {
                base.collect_units(units);
                curr.collect_units(units);
            }
            other => {
                let simplified = other.simplify();
                if simplified.is_empty() {
                    return;
                }
                // A collapsed single-branch choice may itself be a chain.
                if matches!(simplified, Self::Chain { .. }) {
                    simplified.collect_units(units);
                    return;
                }
                match (units.last_mut(), &simplified) {
                    (Some(Self::Basic(tail)), Self::Basic(run)) => {
                        tail.extend(run.iter().cloned());
                    }
                    _ => units.push(simplified),
                }
            }
        }
    }

    /// Removes the leading `base` from this state, returning the suffix that
    /// remains.
    ///
    /// Both states are compared in simplified form, so any two compositions
    /// of the same predicates slice against each other. For a choice, every
    /// branch must contain the prefix; slicing is all-or-none.
    #[must_use]
    pub fn slice_on(&self, base: &Self) -> Option<Self> {
        let target = self.simplify();
        let base = base.simplify();
        if base.is_empty() {
            return Some(target);
        }
        if target == base {
            return Some(Self::empty());
        }
        Self::slice_simplified(&target, &base)
    }

    /// Slices `target` on `base` where both are already simplified and
    /// unequal.
    fn slice_simplified(target: &Self, base: &Self) -> Option<Self> {
        match target {
            Self::Basic(run) => {
                if let Self::Basic(prefix) = base {
                    if run.len() >= prefix.len() && run[..prefix.len()] == prefix[..] {
                        return Some(Self::Basic(run[prefix.len()..].to_vec()));
                    }
                }
                None
            }
            Self::Chain {
                base: inner,
                curr,
            } => {
                if inner.as_ref() == base {
                    return Some(curr.as_ref().clone());
                }
                // The prefix may end strictly inside the left side.
                if let Some(rest) = Self::slice_simplified(inner, base) {
                    return Some(rest.extend(curr.as_ref().clone()).simplify());
                }
                // Or it may cover the left side entirely and continue into
                // the right one.
                if let Self::Chain {
                    base: base_inner,
                    curr: base_curr,
                } = base
                {
                    if inner.as_ref() == base_inner.as_ref() {
                        return Self::slice_simplified(curr, base_curr);
                    }
                }
                None
            }
            Self::Choice(branches) => {
                let sliced: Option<Vec<Self>> = branches
                    .iter()
                    .map(|branch| {
                        if branch == base {
                            Some(Self::empty())
                        } else {
                            Self::slice_simplified(branch, base)
                        }
                    })
                    .collect();
                sliced.map(Self::Choice)
            }
        }
    }
}

impl Default for PredicateState {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for PredicateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic(predicates) => {
                write!(f, "{{")?;
                for (i, predicate) in predicates.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, " {predicate}")?;
                }
                write!(f, " }}")
            }
            Self::Chain { base, curr } => write!(f, "{base} -> {curr}"),
            Self::Choice(branches) => {
                write!(f, "<")?;
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{branch}")?;
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ir::TypeSig,
        predicate::{state::PredicateState, term::Term, Predicate, PredicateKind},
    };

    fn pred(name: &str, value: i32) -> Predicate {
        Predicate::eq(
            PredicateKind::State,
            Term::value(name, TypeSig::Int),
            Term::int(value),
        )
    }

    fn path(name: &str, taken: bool) -> Predicate {
        Predicate::eq(
            PredicateKind::Path,
            Term::value(name, TypeSig::Bool),
            Term::bool(taken),
        )
    }

    #[test]
    fn appending_one_predicate_slices_back_out() {
        let base = PredicateState::basic([pred("%t0", 1), pred("%t1", 2)]);
        let extended = base.clone().with(pred("%t2", 3));

        let suffix = extended.slice_on(&base).expect("prefix should slice");
        assert_eq!(suffix.simplify(), PredicateState::basic([pred("%t2", 3)]));
    }

    #[test]
    fn extending_then_slicing_recovers_the_suffix() {
        let base = PredicateState::basic([pred("%t0", 1)]).extend(PredicateState::choice([
            PredicateState::basic([path("%t1", true)]),
            PredicateState::basic([path("%t1", false)]),
        ]));
        let suffix = PredicateState::basic([pred("%t2", 7), pred("%t3", 8)]);
        let whole = base.clone().extend(suffix.clone());

        let sliced = whole.slice_on(&base).expect("prefix should slice");
        assert_eq!(sliced.simplify(), suffix.simplify());
    }

    #[test]
    fn slicing_the_whole_state_leaves_nothing() {
        let state = PredicateState::basic([pred("%t0", 1), pred("%t1", 2)]);

        let rest = state.slice_on(&state).expect("state slices on itself");
        assert!(rest.is_empty());
    }

    #[test]
    fn slicing_a_non_prefix_fails() {
        let state = PredicateState::basic([pred("%t0", 1), pred("%t1", 2)]);
        let other = PredicateState::basic([pred("%t9", 9)]);

        assert!(state.slice_on(&other).is_none());
    }

    #[test]
    fn prefixes_that_end_mid_run_still_slice() {
        let base = PredicateState::basic([pred("%t0", 1)]);
        let whole = PredicateState::basic([pred("%t0", 1), pred("%t1", 2)])
            .extend(PredicateState::basic([pred("%t2", 3)]));

        let sliced = whole.slice_on(&base).expect("prefix should slice");
        assert_eq!(
            sliced.simplify(),
            PredicateState::basic([pred("%t1", 2), pred("%t2", 3)])
        );
    }

    #[test]
    fn choice_slicing_is_all_or_none() {
        let base = PredicateState::basic([pred("%t0", 1)]);
        let sliceable = PredicateState::choice([
            base.clone().extend(PredicateState::basic([path("%t1", true)])),
            base.clone()
                .extend(PredicateState::basic([path("%t1", false)])),
        ]);
        let partial = PredicateState::choice([
            base.clone().extend(PredicateState::basic([path("%t1", true)])),
            PredicateState::basic([pred("%t9", 9)]),
        ]);

        let sliced = sliceable
            .slice_on(&base)
            .expect("all branches carry the prefix");
        assert_eq!(
            sliced.simplify(),
            PredicateState::choice([
                PredicateState::basic([path("%t1", true)]),
                PredicateState::basic([path("%t1", false)]),
            ])
        );
        assert!(partial.slice_on(&base).is_none());
    }

    #[test]
    fn simplify_merges_adjacent_runs() {
        let state = PredicateState::basic([pred("%t0", 1)])
            .extend(PredicateState::empty())
            .extend(PredicateState::basic([pred("%t1", 2)]))
            .extend(PredicateState::basic([pred("%t2", 3)]));

        assert_eq!(
            state.simplify(),
            PredicateState::basic([pred("%t0", 1), pred("%t1", 2), pred("%t2", 3)])
        );
    }

    #[test]
    fn single_branch_choices_collapse() {
        let state = PredicateState::choice([PredicateState::basic([pred("%t0", 1)])]);

        assert_eq!(
            state.simplify(),
            PredicateState::basic([pred("%t0", 1)])
        );
    }

    #[test]
    fn all_empty_choices_are_empty() {
        let state = PredicateState::choice([PredicateState::empty(), PredicateState::empty()]);

        assert!(state.is_empty());
        assert_eq!(state.simplify(), PredicateState::empty());
    }

    #[test]
    fn filtering_keeps_only_the_requested_kind() {
        let state = PredicateState::basic([pred("%t0", 1), path("%t1", true), pred("%t2", 2)]);
        let paths = state.filter_by_kind(PredicateKind::Path);

        assert_eq!(paths.simplify(), PredicateState::basic([path("%t1", true)]));
    }
}
