//! This module contains the execution tree: the record of every branch
//! outcome observed across the concrete runs of one search session.
//!
//! The tree is an append-only DAG of clause vertices, de-duplicated by
//! clause identity so that runs sharing a prefix share vertices. Vertices
//! live in an arena and are addressed by [`VertexId`]; edges connect
//! temporally adjacent clauses of the merged runs. Because symbolic value
//! names are handed out deterministically per run, two runs produce equal
//! clauses exactly as long as they behave identically, and diverge into
//! separate vertices at their first differing decision.

use std::collections::HashMap;

use derivative::Derivative;

use crate::{
    error::{
        container::{Locatable, SourceLoc},
        graph::Result,
    },
    graph::{topological_order, DominatorTree, Successors},
    ir::InstLoc,
    predicate::PredicateOp,
    trace::symbolic::{Clause, PathClauseKind, SymbolicState},
};

/// The index of a vertex within the tree's arena.
pub type VertexId = usize;

/// One clause observed during at least one merged run.
#[derive(Clone, Debug)]
pub struct Vertex {
    /// The clause this vertex stands for, or [`None`] for the synthetic
    /// root.
    clause: Option<Clause>,

    /// The branch shape for path vertices, or [`None`] for state vertices
    /// and the root.
    kind: Option<PathClauseKind>,

    /// The vertices observed immediately before this one in some run.
    up: Vec<VertexId>,

    /// The vertices observed immediately after this one in some run.
    down: Vec<VertexId>,

    /// For path vertices, the runs that reached this decision, keyed by the
    /// sequence of path vertices they took to get here.
    states: Vec<(Vec<VertexId>, SymbolicState)>,

    /// Set when the selector has proven the branch exhausted out-of-band,
    /// such as an instantiation oracle running dry.
    forced: bool,
}

impl Vertex {
    /// Gets the clause this vertex stands for, or [`None`] for the root.
    #[must_use]
    pub fn clause(&self) -> Option<&Clause> {
        self.clause.as_ref()
    }

    /// Gets the branch shape, when this is a path vertex.
    #[must_use]
    pub fn kind(&self) -> Option<PathClauseKind> {
        self.kind
    }

    /// Gets the predecessors of this vertex.
    #[must_use]
    pub fn up(&self) -> &[VertexId] {
        &self.up
    }

    /// Gets the successors of this vertex.
    #[must_use]
    pub fn down(&self) -> &[VertexId] {
        &self.down
    }

    /// Gets the recorded runs that reached this decision, each keyed by the
    /// path-vertex prefix it arrived through.
    #[must_use]
    pub fn states(&self) -> &[(Vec<VertexId>, SymbolicState)] {
        &self.states
    }
}

/// A bounded disambiguation of one reach of a branch: the non-dominating
/// decisions that distinguish this arrival at `target` from other arrivals.
///
/// Two contexts are equal when they name the same target through the same
/// decision sequence; the recorded state is carried for later prefix
/// reconstruction and takes no part in equality.
#[derive(Clone, Debug, Derivative)]
#[derivative(Eq, Hash, PartialEq)]
pub struct Context {
    target: VertexId,

    vertices: Vec<VertexId>,

    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    state: SymbolicState,
}

impl Context {
    /// Constructs a new context for `target`.
    #[must_use]
    pub fn new(target: VertexId, vertices: Vec<VertexId>, state: SymbolicState) -> Self {
        Self {
            target,
            vertices,
            state,
        }
    }

    /// Gets the vertex this context reaches.
    #[must_use]
    pub fn target(&self) -> VertexId {
        self.target
    }

    /// Gets the disambiguating decision sequence, oldest first.
    #[must_use]
    pub fn vertices(&self) -> &[VertexId] {
        &self.vertices
    }

    /// Gets the recorded state of the run that produced this context.
    #[must_use]
    pub fn state(&self) -> &SymbolicState {
        &self.state
    }
}

/// The execution tree of one search session.
#[derive(Clone, Debug)]
pub struct ExecutionTree {
    /// The vertex arena; index 0 is always the synthetic root.
    vertices: Vec<Vertex>,

    /// The vertex standing for each clause seen so far.
    by_clause: HashMap<Clause, VertexId>,

    /// The path vertices at each instruction, for sibling-outcome queries.
    by_location: HashMap<InstLoc, Vec<VertexId>>,

    /// The dominator relation over the down-edges, rebuilt per merge.
    doms: Option<DominatorTree<VertexId>>,
}

impl ExecutionTree {
    /// The synthetic root every merged run hangs off.
    pub const ROOT: VertexId = 0;

    /// Constructs an empty tree.
    #[must_use]
    pub fn new() -> Self {
        let root = Vertex {
            clause: None,
            kind:   None,
            up:     Vec::new(),
            down:   Vec::new(),
            states: Vec::new(),
            forced: false,
        };
        Self {
            vertices:    vec![root],
            by_clause:   HashMap::new(),
            by_location: HashMap::new(),
            doms:        None,
        }
    }

    /// Gets the number of vertices in the tree, the root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Checks whether the tree holds only the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.len() == 1
    }

    /// Gets the vertex at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not handed out by this tree.
    #[must_use]
    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id]
    }

    /// Merges the symbolic state of one completed run into the tree.
    ///
    /// Every clause of the run becomes (or re-uses) a vertex; edges follow
    /// the run's temporal order. Path vertices additionally record the run
    /// keyed by the decision prefix that reached them. The dominator
    /// relation is rebuilt afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the merged edges close a cycle, which leaves the
    /// dominator relation stale until a later merge succeeds.
    pub fn merge(&mut self, state: &SymbolicState) -> Result<()> {
        let mut prev = Self::ROOT;
        let mut prefix: Vec<VertexId> = Vec::new();

        for clause in &state.clauses {
            let kind = state
                .path
                .iter()
                .find(|path| {
                    path.location == clause.location && path.predicate == clause.predicate
                })
                .map(|path| path.kind);
            let id = self.ensure_vertex(clause, kind);
            self.link(prev, id);

            if kind.is_some() {
                let vertex = &mut self.vertices[id];
                match vertex
                    .states
                    .iter_mut()
                    .find(|(recorded, _)| *recorded == prefix)
                {
                    Some((_, recorded)) => *recorded = state.clone(),
                    None => vertex.states.push((prefix.clone(), state.clone())),
                }
                prefix.push(id);
            }
            prev = id;
        }

        tracing::trace!(
            run = %state.run,
            vertices = self.vertices.len(),
            "merged a run into the execution tree"
        );
        self.rebuild_dominators()
    }

    /// Checks whether every outcome of the branch at `id` has been observed.
    ///
    /// The closure is branch-kind-specific: two-outcome checks (conditions,
    /// null checks, bounds checks) are exhausted once the inverse outcome
    /// has a sibling vertex; switches once every declared case and the
    /// default appear among the siblings; type checks only when forced.
    /// State vertices have no outcomes to explore and always count as
    /// exhausted.
    #[must_use]
    pub fn is_exhausted(&self, id: VertexId) -> bool {
        let vertex = &self.vertices[id];
        if vertex.forced {
            return true;
        }
        let (Some(kind), Some(clause)) = (vertex.kind, vertex.clause.as_ref()) else {
            return true;
        };
        let siblings = self.siblings(id);

        match kind {
            PathClauseKind::Condition
            | PathClauseKind::NullCheck
            | PathClauseKind::BoundsCheck => {
                let Some(inverse) = clause.predicate.inverse() else {
                    return false;
                };
                siblings.iter().any(|&sibling| {
                    self.vertices[sibling]
                        .clause
                        .as_ref()
                        .is_some_and(|c| c.predicate == inverse)
                })
            }
            PathClauseKind::Switch | PathClauseKind::TableSwitch => {
                // The declared case set only becomes known once some run
                // fell through to the default.
                let declared = siblings.iter().find_map(|&sibling| {
                    self.vertices[sibling].clause.as_ref().and_then(|c| {
                        match &c.predicate.op {
                            PredicateOp::DefaultSwitch { cases, .. } => Some(cases),
                            _ => None,
                        }
                    })
                });
                let Some(declared) = declared else {
                    return false;
                };
                declared.iter().all(|case| {
                    siblings.iter().any(|&sibling| {
                        self.vertices[sibling].clause.as_ref().is_some_and(|c| {
                            matches!(
                                &c.predicate.op,
                                PredicateOp::Equality { rhs, .. } if rhs == case
                            )
                        })
                    })
                })
            }
            PathClauseKind::TypeCheck => false,
        }
    }

    /// Marks the branch at `id` exhausted regardless of observed outcomes.
    pub fn force_exhausted(&mut self, id: VertexId) {
        self.vertices[id].forced = true;
    }

    /// Gets the path vertices sharing the instruction of `id`, `id` itself
    /// included.
    #[must_use]
    pub fn siblings(&self, id: VertexId) -> &[VertexId] {
        self.vertices[id]
            .clause
            .as_ref()
            .and_then(|clause| self.by_location.get(&clause.location))
            .map_or(&[], Vec::as_slice)
    }

    /// Gets the contexts reaching `target`, each bounded to the last `k`
    /// non-dominating decisions of the run that produced it.
    ///
    /// Decisions that dominate the target are dropped: every arrival passes
    /// them, so they cannot distinguish one arrival from another.
    #[must_use]
    pub fn contexts(&self, target: VertexId, k: usize) -> Vec<Context> {
        let mut out: Vec<Context> = Vec::new();
        for (prefix, state) in &self.vertices[target].states {
            let mut picked: Vec<VertexId> = prefix
                .iter()
                .rev()
                .filter(|&&decision| !self.dominates(decision, target))
                .take(k)
                .copied()
                .collect();
            picked.reverse();

            let context = Context::new(target, picked, state.clone());
            if !out.contains(&context) {
                out.push(context);
            }
        }
        out
    }

    /// Checks whether `a` dominates `b` under the relation of the last
    /// successful merge.
    #[must_use]
    pub fn dominates(&self, a: VertexId, b: VertexId) -> bool {
        self.doms.as_ref().is_some_and(|doms| doms.dominates(a, b))
    }

    /// Gets the branch depth of every vertex: the number of decisions on
    /// the shallowest route from the root, the vertex itself included when
    /// it is a decision. Unreachable vertices map to [`None`].
    #[must_use]
    pub fn path_depths(&self) -> Vec<Option<usize>> {
        let mut depths: Vec<Option<usize>> = vec![None; self.vertices.len()];
        depths[Self::ROOT] = Some(0);

        let Ok(order) = topological_order(self, [Self::ROOT]) else {
            return depths;
        };
        for id in order {
            let Some(depth) = depths[id] else {
                continue;
            };
            for &succ in &self.vertices[id].down {
                let step = usize::from(self.vertices[succ].kind.is_some());
                let candidate = depth + step;
                depths[succ] = Some(match depths[succ] {
                    Some(existing) => existing.min(candidate),
                    None => candidate,
                });
            }
        }
        depths
    }

    /// Gets the depth of the deepest decision in the tree.
    #[must_use]
    pub fn max_path_depth(&self) -> usize {
        self.path_depths()
            .iter()
            .zip(&self.vertices)
            .filter(|(_, vertex)| vertex.kind.is_some())
            .filter_map(|(depth, _)| *depth)
            .max()
            .unwrap_or(0)
    }

    fn ensure_vertex(&mut self, clause: &Clause, kind: Option<PathClauseKind>) -> VertexId {
        if let Some(&id) = self.by_clause.get(clause) {
            return id;
        }
        let id = self.vertices.len();
        self.vertices.push(Vertex {
            clause: Some(clause.clone()),
            kind,
            up: Vec::new(),
            down: Vec::new(),
            states: Vec::new(),
            forced: false,
        });
        self.by_clause.insert(clause.clone(), id);
        if kind.is_some() {
            self.by_location.entry(clause.location).or_default().push(id);
        }
        id
    }

    fn link(&mut self, from: VertexId, to: VertexId) {
        if from == to {
            return;
        }
        if !self.vertices[from].down.contains(&to) {
            self.vertices[from].down.push(to);
        }
        if !self.vertices[to].up.contains(&from) {
            self.vertices[to].up.push(from);
        }
    }

    fn rebuild_dominators(&mut self) -> Result<()> {
        let doms = DominatorTree::new(&*self, Self::ROOT).locate(SourceLoc::Program)?;
        self.doms = Some(doms);
        Ok(())
    }
}

impl Default for ExecutionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Successors<VertexId> for ExecutionTree {
    fn successors(&self, node: VertexId) -> Vec<VertexId> {
        self.vertices[node].down.clone()
    }
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use crate::{
        ir::{InstLoc, TypeSig},
        predicate::{term::Term, Predicate, PredicateKind},
        trace::symbolic::{Clause, PathClause, PathClauseKind, SymbolicState},
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

    #[test]
    fn merging_the_same_run_twice_adds_no_vertices() -> anyhow::Result<()> {
        let mut tree = ExecutionTree::new();
        let state = state_of(1, vec![condition(0, true), condition(1, false)]);

        tree.merge(&state)?;
        let after_first = tree.len();
        tree.merge(&state)?;

        assert_eq!(tree.len(), after_first);
        assert_eq!(after_first, 3);

        Ok(())
    }

    #[test]
    fn a_condition_is_exhausted_once_both_outcomes_are_seen() -> anyhow::Result<()> {
        let mut tree = ExecutionTree::new();
        tree.merge(&state_of(1, vec![condition(0, true)]))?;

        let vertex = 1;
        assert!(!tree.is_exhausted(vertex));

        tree.merge(&state_of(2, vec![condition(0, false)]))?;
        assert!(tree.is_exhausted(vertex));
        assert!(tree.is_exhausted(2));

        Ok(())
    }

    #[test]
    fn a_switch_is_exhausted_only_with_every_case_and_the_default() -> anyhow::Result<()> {
        let key = Term::value("%k", TypeSig::Int);
        let loc = InstLoc::new(0, 0, 0);
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
        let default = state_of(
            9,
            vec![PathClause::new(
                loc,
                PathClauseKind::Switch,
                Predicate::default_switch(
                    PredicateKind::Path,
                    key.clone(),
                    vec![Term::int(1), Term::int(2), Term::int(3)],
                ),
            )],
        );

        let mut tree = ExecutionTree::new();
        tree.merge(&case(1, 1))?;
        tree.merge(&case(2, 2))?;
        assert!(!tree.is_exhausted(1), "two of four outcomes is not enough");

        tree.merge(&default)?;
        assert!(
            !tree.is_exhausted(1),
            "case 3 has not been observed among the siblings"
        );

        tree.merge(&case(3, 3))?;
        assert!(tree.is_exhausted(1));
        assert!(tree.is_exhausted(2));

        Ok(())
    }

    #[test]
    fn type_checks_are_only_exhausted_by_force() -> anyhow::Result<()> {
        let clause = PathClause::new(
            InstLoc::new(0, 0, 0),
            PathClauseKind::TypeCheck,
            Predicate::eq(
                PredicateKind::Path,
                Term::value("%i", TypeSig::Bool),
                Term::bool(true),
            ),
        );
        let inverse = PathClause::new(
            clause.location,
            PathClauseKind::TypeCheck,
            Predicate::eq(
                PredicateKind::Path,
                Term::value("%i", TypeSig::Bool),
                Term::bool(false),
            ),
        );

        let mut tree = ExecutionTree::new();
        tree.merge(&state_of(1, vec![clause]))?;
        tree.merge(&state_of(2, vec![inverse]))?;
        assert!(!tree.is_exhausted(1), "both outcomes never exhaust a type check");

        tree.force_exhausted(1);
        assert!(tree.is_exhausted(1));

        Ok(())
    }

    #[test]
    fn dominating_decisions_are_dropped_from_contexts() -> anyhow::Result<()> {
        let mut tree = ExecutionTree::new();
        // Two runs reach the decision at block 2 through opposite outcomes
        // at block 0; a third decision at block 1 lies on only one route.
        tree.merge(&state_of(
            1,
            vec![condition(0, true), condition(1, true), condition(2, true)],
        ))?;
        tree.merge(&state_of(2, vec![condition(0, false), condition(2, true)]))?;

        let target = 3;
        assert_eq!(
            tree.vertex(target).clause().map(|c| c.location.block),
            Some(2)
        );

        let contexts = tree.contexts(target, 2);
        assert_eq!(contexts.len(), 2);
        // Neither route's decisions dominate the target, so each context
        // keeps its own history.
        assert_eq!(contexts[0].vertices(), &[1, 2]);
        assert_eq!(contexts[1].vertices(), &[4]);

        Ok(())
    }

    #[test]
    fn decisions_every_route_shares_are_implied_and_excluded() -> anyhow::Result<()> {
        let mut tree = ExecutionTree::new();
        tree.merge(&state_of(1, vec![condition(0, true), condition(1, true)]))?;

        // The only route to the second decision passes the first, so the
        // first dominates it and disambiguates nothing.
        let contexts = tree.contexts(2, 4);
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].vertices().is_empty());

        Ok(())
    }

    #[test]
    fn branch_depths_count_decisions_from_the_root() -> anyhow::Result<()> {
        let mut tree = ExecutionTree::new();
        tree.merge(&state_of(1, vec![condition(0, true), condition(1, true)]))?;

        let depths = tree.path_depths();
        assert_eq!(depths[ExecutionTree::ROOT], Some(0));
        assert_eq!(depths[1], Some(1));
        assert_eq!(depths[2], Some(2));
        assert_eq!(tree.max_path_depth(), 2);

        Ok(())
    }
}
