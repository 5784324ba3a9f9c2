//! This module contains the context-guided selector: the strategy that
//! decides, between concrete runs, which branch outcome the search should
//! aim at next.
//!
//! The selector sweeps the execution tree shallowest-first. Within a round
//! it visits the unexhausted decisions of one branch depth in random order;
//! for each it picks a not-yet-proposed context (a bounded run of the
//! non-dominating decisions that reached it, see
//! [`crate::tree::ExecutionTree::contexts`]) and reverts the decision's
//! clause towards an unobserved outcome. Once every depth is swept the
//! context length grows by one and the sweep restarts, so reaches that were
//! indistinguishable under a short context become distinguishable later.
//!
//! Selection is an explicit [`ContextGuidedSelector::poll`] state machine:
//! each call either yields one proposal or reports that the search is over.
//! The watchdog is consulted between branch evaluations, never inside one.

pub mod revert;

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::{
    constant::DEFAULT_INITIAL_CONTEXT_LENGTH,
    context::ExecutionContext,
    predicate::Predicate,
    selector::revert::revert,
    trace::symbolic::{Clause, PathClause},
    tree::{Context, ExecutionTree, VertexId},
    watchdog::DynWatchdog,
};

/// The configuration for the context-guided selector.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The context length a search session starts with.
    ///
    /// Longer contexts distinguish more reaches of the same branch at the
    /// cost of proposing more queries; the selector grows the length by one
    /// each time a full sweep over the tree's depths completes.
    ///
    /// Defaults to [`DEFAULT_INITIAL_CONTEXT_LENGTH`].
    pub initial_context_length: usize,
}

impl Config {
    /// Sets the `initial_context_length` config parameter to `value`.
    #[must_use]
    pub fn with_initial_context_length(mut self, value: usize) -> Self {
        self.initial_context_length = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let initial_context_length = DEFAULT_INITIAL_CONTEXT_LENGTH;
        Self {
            initial_context_length,
        }
    }
}

/// One proposed exploration step: the branch to flip, and the query that a
/// satisfying model would steer through its unobserved outcome.
#[derive(Clone, Debug)]
pub struct NextTarget {
    /// The vertex whose branch the proposal flips.
    pub vertex: VertexId,

    /// The state clauses of the originating run up to, and excluding, the
    /// flipped decision.
    pub state: Vec<Clause>,

    /// The new path condition: the context's decisions followed by the
    /// reverted clause.
    pub query: Vec<PathClause>,

    /// The concrete run the proposal was derived from.
    pub run: Uuid,
}

/// The selector itself.
///
/// The selector owns no part of the tree; it keeps only its sweep position
/// and the memory of what it has already proposed, so the caller is free to
/// merge new runs into the tree between polls.
#[derive(Debug)]
pub struct ContextGuidedSelector {
    /// The configuration of the selector.
    config: Config,

    /// The branch depth the current sweep is at.
    depth: usize,

    /// The context length of the current sweep.
    length: usize,

    /// The unproposed candidates of the current depth, in randomised order.
    queue: Vec<VertexId>,

    /// Every context already proposed; a context is never proposed twice.
    visited: HashSet<Context>,

    /// The classes already aimed at each type-check vertex.
    tried: HashMap<VertexId, Vec<String>>,
}

impl ContextGuidedSelector {
    /// Constructs a new selector with the provided configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let length = config.initial_context_length;
        Self {
            config,
            depth: 0,
            length,
            queue: Vec::new(),
            visited: HashSet::new(),
            tried: HashMap::new(),
        }
    }

    /// Proposes the next branch outcome to aim a run at.
    ///
    /// Returns [`None`] when the watchdog requests a stop, or when the sweep
    /// has passed the deepest decision with the longest useful context and
    /// nothing unexplored remains; both are normal termination.
    pub fn poll(
        &mut self,
        tree: &mut ExecutionTree,
        ctx: &mut ExecutionContext,
        watchdog: &DynWatchdog,
    ) -> Option<NextTarget> {
        loop {
            if watchdog.should_stop() {
                tracing::debug!("the watchdog stopped the selection sweep");
                return None;
            }

            let vertex = self.next_candidate(tree, ctx)?;
            if tree.is_exhausted(vertex) {
                continue;
            }

            let Some(context) = self.unvisited_context(tree, vertex) else {
                continue;
            };
            self.visited.insert(context.clone());

            let tried = self.tried.entry(vertex).or_default();
            let Some(reverted) = revert(tree, vertex, tried, ctx) else {
                continue;
            };
            let Some(target) = Self::build_target(tree, vertex, &context, reverted) else {
                continue;
            };

            tracing::debug!(
                vertex,
                run = %target.run,
                "proposing a branch flip"
            );
            return Some(target);
        }
    }

    /// Pops the next candidate of the current round, refilling from the next
    /// depth once the round runs dry.
    fn next_candidate(
        &mut self,
        tree: &ExecutionTree,
        ctx: &mut ExecutionContext,
    ) -> Option<VertexId> {
        loop {
            if let Some(vertex) = self.queue.pop() {
                return Some(vertex);
            }
            if !self.advance(tree, ctx) {
                return None;
            }
        }
    }

    /// Moves the sweep to the next depth that has unexhausted decisions,
    /// growing the context length and starting over when a full pass found
    /// none. Yields `false` once the grown length also exceeds the tree's
    /// depth, which terminates the search.
    fn advance(&mut self, tree: &ExecutionTree, ctx: &mut ExecutionContext) -> bool {
        let max_depth = tree.max_path_depth();
        loop {
            self.depth += 1;
            if self.depth > max_depth {
                if self.length > max_depth {
                    return false;
                }
                self.length += 1;
                self.depth = 0;
                continue;
            }

            let depths = tree.path_depths();
            let mut found: Vec<VertexId> = (0..tree.len())
                .filter(|&id| depths[id] == Some(self.depth))
                .filter(|&id| tree.vertex(id).kind().is_some())
                .filter(|&id| !tree.is_exhausted(id))
                .collect();
            if found.is_empty() {
                continue;
            }

            found.shuffle(ctx.rng());
            tracing::debug!(
                depth = self.depth,
                length = self.length,
                candidates = found.len(),
                "advanced the selection sweep"
            );
            self.queue = found;
            return true;
        }
    }

    /// Picks the first context of `vertex` that has not been proposed yet.
    fn unvisited_context(&self, tree: &ExecutionTree, vertex: VertexId) -> Option<Context> {
        tree.contexts(vertex, self.length)
            .into_iter()
            .find(|context| !self.visited.contains(context))
    }

    /// Assembles the proposal for flipping `vertex` under `context`: the
    /// originating run's clauses strictly before the flipped decision as the
    /// state, and the context's decisions plus the reverted clause as the
    /// new path condition.
    fn build_target(
        tree: &ExecutionTree,
        vertex: VertexId,
        context: &Context,
        reverted: Predicate,
    ) -> Option<NextTarget> {
        let target_clause = tree.vertex(vertex).clause()?.clone();
        let kind = tree.vertex(vertex).kind()?;
        let state = context.state();

        let cut = state.clauses.iter().position(|clause| *clause == target_clause)?;
        let prefix = state.clauses[..cut].to_vec();

        let mut query: Vec<PathClause> = context
            .vertices()
            .iter()
            .filter_map(|&decision| {
                let vertex = tree.vertex(decision);
                let clause = vertex.clause()?;
                Some(PathClause::new(
                    clause.location,
                    vertex.kind()?,
                    clause.predicate.clone(),
                ))
            })
            .collect();
        query.push(PathClause::new(target_clause.location, kind, reverted));

        Some(NextTarget {
            vertex,
            state: prefix,
            query,
            run: state.run,
        })
    }
}

impl Default for ContextGuidedSelector {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod test {
    use std::sync::{atomic::AtomicBool, Arc};

    use uuid::Uuid;

    use crate::{
        context::ExecutionContext,
        ir::{InstLoc, Program, TypeSig},
        predicate::{term::Term, Predicate, PredicateKind},
        selector::{Config, ContextGuidedSelector, NextTarget},
        trace::symbolic::{PathClause, PathClauseKind, SymbolicState},
        tree::ExecutionTree,
        watchdog::{FlagWatchdog, LazyWatchdog},
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

    fn condition(block: usize, value: bool) -> PathClause {
        PathClause::new(
            InstLoc::new(0, block, 0),
            PathClauseKind::Condition,
            Predicate::eq(
                PredicateKind::Path,
                Term::value(format!("%c{block}"), TypeSig::Bool),
                Term::bool(value),
            ),
        )
    }

    fn context(seed: u64) -> anyhow::Result<ExecutionContext> {
        Ok(ExecutionContext::new(Arc::new(Program::new(vec![])?), seed))
    }

    fn drain(
        selector: &mut ContextGuidedSelector,
        tree: &mut ExecutionTree,
        ctx: &mut ExecutionContext,
    ) -> Vec<NextTarget> {
        let watchdog = LazyWatchdog.in_rc();
        let mut targets = Vec::new();
        while let Some(target) = selector.poll(tree, ctx, &watchdog) {
            targets.push(target);
        }
        targets
    }

    #[test]
    fn an_empty_tree_yields_no_proposal() -> anyhow::Result<()> {
        let mut selector = ContextGuidedSelector::default();
        let mut tree = ExecutionTree::new();
        let mut ctx = context(0)?;

        assert!(selector.poll(&mut tree, &mut ctx, &LazyWatchdog.in_rc()).is_none());

        Ok(())
    }

    #[test]
    fn a_lone_condition_is_proposed_inverted_and_then_never_again() -> anyhow::Result<()> {
        let mut selector = ContextGuidedSelector::default();
        let mut tree = ExecutionTree::new();
        let mut ctx = context(1)?;
        let watchdog = LazyWatchdog.in_rc();

        let taken = condition(0, true);
        tree.merge(&state_of(1, vec![taken.clone()]))?;

        let target = selector
            .poll(&mut tree, &mut ctx, &watchdog)
            .ok_or_else(|| anyhow::anyhow!("one unexplored outcome exists"))?;
        assert_eq!(target.vertex, 1);
        assert!(target.state.is_empty(), "nothing precedes the decision");
        assert_eq!(target.query.len(), 1);
        assert_eq!(
            Some(target.query[0].predicate.clone()),
            taken.predicate.inverse()
        );
        assert_eq!(target.run, Uuid::from_u128(1));

        // The flipped run lands in the tree, exhausting the branch.
        tree.merge(&state_of(2, vec![condition(0, false)]))?;
        assert!(selector.poll(&mut tree, &mut ctx, &watchdog).is_none());

        Ok(())
    }

    #[test]
    fn the_watchdog_stops_the_sweep_before_any_proposal() -> anyhow::Result<()> {
        let mut selector = ContextGuidedSelector::default();
        let mut tree = ExecutionTree::new();
        let mut ctx = context(0)?;
        tree.merge(&state_of(1, vec![condition(0, true)]))?;

        let stop = Arc::new(AtomicBool::new(true));
        let watchdog = FlagWatchdog::new(stop).in_rc();

        assert!(selector.poll(&mut tree, &mut ctx, &watchdog).is_none());

        Ok(())
    }

    #[test]
    fn exhausted_branches_are_never_proposed() -> anyhow::Result<()> {
        let mut selector = ContextGuidedSelector::default();
        let mut tree = ExecutionTree::new();
        let mut ctx = context(3)?;

        // Both outcomes of the first decision are already known; only the
        // second decision has anything left to offer.
        tree.merge(&state_of(1, vec![condition(0, true), condition(1, true)]))?;
        tree.merge(&state_of(2, vec![condition(0, false)]))?;

        let targets = drain(&mut selector, &mut tree, &mut ctx);
        assert!(!targets.is_empty());
        for target in &targets {
            assert_eq!(target.vertex, 2, "only the open decision may be proposed");
        }

        Ok(())
    }

    #[test]
    fn proposals_carry_the_state_prefix_and_the_context_path() -> anyhow::Result<()> {
        let mut selector = ContextGuidedSelector::new(Config::default().with_initial_context_length(2));
        let mut tree = ExecutionTree::new();
        let mut ctx = context(5)?;

        // Two distinct routes reach the decision at block 2, so it is
        // proposed once per context, each proposal replaying its own route.
        tree.merge(&state_of(
            1,
            vec![condition(0, true), condition(1, true), condition(2, true)],
        ))?;
        tree.merge(&state_of(2, vec![condition(0, false), condition(2, true)]))?;

        let shared = 3;
        assert_eq!(
            tree.vertex(shared).clause().map(|c| c.location.block),
            Some(2)
        );

        let targets = drain(&mut selector, &mut tree, &mut ctx);
        let shared_targets: Vec<_> =
            targets.iter().filter(|target| target.vertex == shared).collect();
        assert_eq!(shared_targets.len(), 2, "one proposal per context");

        for target in shared_targets {
            assert_eq!(
                target.query.last().map(|clause| clause.predicate.clone()),
                condition(2, true).predicate.inverse(),
            );
            if target.run == Uuid::from_u128(1) {
                let route = vec![condition(0, true), condition(1, true)];
                assert_eq!(target.query[..2], route[..]);
                assert_eq!(
                    target.state,
                    route.iter().map(PathClause::as_clause).collect::<Vec<_>>()
                );
            } else {
                assert_eq!(target.run, Uuid::from_u128(2));
                let route = vec![condition(0, false)];
                assert_eq!(target.query[..1], route[..]);
                assert_eq!(
                    target.state,
                    route.iter().map(PathClause::as_clause).collect::<Vec<_>>()
                );
            }
        }

        Ok(())
    }
}
