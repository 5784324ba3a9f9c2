//! This module contains the graph utilities that are shared between the
//! control-flow analyses and the execution tree.
//!
//! Both the method model's control flow graph and the execution tree built
//! from observed runs are directed graphs over `usize`-like node handles, so
//! the ordering and dominance computations are written once here against the
//! [`Successors`] view and reused by both.

use std::{collections::HashMap, fmt::Display, hash::Hash};

use crate::{
    error::graph::Error,
    ir::{BlockId, Method},
};

/// The result type of the graph computations; errors are unlocated here and
/// positioned by callers that know which method or tree they were working
/// on.
pub type Result<T> = std::result::Result<T, Error>;

/// A view of a directed graph with nodes of type `N`.
pub trait Successors<N> {
    /// Gets the nodes that are directly reachable from `node`.
    fn successors(&self, node: N) -> Vec<N>;
}

/// Bring the control flow graph of a method under the shared view.
impl Successors<BlockId> for Method {
    fn successors(&self, node: BlockId) -> Vec<BlockId> {
        self.block(node).terminator().successors()
    }
}

/// The colours of the depth-first traversal used for ordering.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Colour {
    Grey,
    Black,
}

/// The steps of the iterative depth-first traversal.
#[derive(Clone, Copy, Debug)]
enum Step<N> {
    Enter(N),
    Exit(N),
}

/// Orders the nodes reachable from `roots` such that every node appears
/// before all of its successors.
///
/// The traversal is iterative, so deeply nested graphs cannot overflow the
/// stack. Node order within the result is deterministic given a
/// deterministic [`Successors`] implementation.
///
/// # Errors
///
/// Returns [`Err`] if the reachable portion of the graph contains a cycle.
pub fn topological_order<N, G>(graph: &G, roots: impl IntoIterator<Item = N>) -> Result<Vec<N>>
where
    N: Copy + Display + Eq + Hash,
    G: Successors<N>,
{
    let mut colours: HashMap<N, Colour> = HashMap::new();
    let mut stack: Vec<Step<N>> = Vec::new();
    let mut order: Vec<N> = Vec::new();

    for root in roots {
        stack.push(Step::Enter(root));

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(node) => match colours.get(&node) {
                    Some(Colour::Black) => continue,
                    Some(Colour::Grey) => {
                        // The node is on the current traversal path, so the
                        // edge we arrived along closes a cycle.
                        return Err(Error::CyclicGraph {
                            at: node.to_string(),
                        });
                    }
                    None => {
                        colours.insert(node, Colour::Grey);
                        stack.push(Step::Exit(node));
                        for succ in graph.successors(node).into_iter().rev() {
                            if colours.get(&succ) != Some(&Colour::Black) {
                                stack.push(Step::Enter(succ));
                            }
                        }
                    }
                },
                Step::Exit(node) => {
                    colours.insert(node, Colour::Black);
                    order.push(node);
                }
            }
        }
    }

    order.reverse();
    Ok(order)
}

/// The immediate-dominator relation over the nodes reachable from a root.
///
/// A node `a` dominates `b` when every path from the root to `b` passes
/// through `a`. The relation is computed over an acyclic graph by a single
/// forward pass in topological order, intersecting the dominator sets of
/// each node's predecessors through their immediate-dominator chains.
#[derive(Clone, Debug)]
pub struct DominatorTree<N> {
    root:  N,
    idoms: HashMap<N, N>,
    ranks: HashMap<N, usize>,
}

impl<N> DominatorTree<N>
where
    N: Copy + Display + Eq + Hash,
{
    /// Computes the dominator relation of the acyclic `graph` from `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the reachable portion of the graph contains a
    /// cycle, as dominance is only computed over acyclic graphs here.
    pub fn new<G>(graph: &G, root: N) -> Result<Self>
    where
        G: Successors<N>,
    {
        let order = topological_order(graph, [root])?;
        let ranks: HashMap<N, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut preds: HashMap<N, Vec<N>> = HashMap::new();
        for node in &order {
            for succ in graph.successors(*node) {
                preds.entry(succ).or_default().push(*node);
            }
        }

        let mut idoms: HashMap<N, N> = HashMap::new();
        idoms.insert(root, root);

        // In topological order every predecessor of a node has already had
        // its immediate dominator fixed, so one pass suffices.
        for node in order.iter().skip(1) {
            let mut candidate: Option<N> = None;
            if let Some(node_preds) = preds.get(node) {
                for pred in node_preds {
                    if !idoms.contains_key(pred) {
                        continue;
                    }
                    candidate = Some(match candidate {
                        None => *pred,
                        Some(current) => Self::intersect(&idoms, &ranks, current, *pred),
                    });
                }
            }
            if let Some(idom) = candidate {
                idoms.insert(*node, idom);
            }
        }

        Ok(Self { root, idoms, ranks })
    }

    /// Walks the two immediate-dominator chains to their common ancestor.
    fn intersect(idoms: &HashMap<N, N>, ranks: &HashMap<N, usize>, a: N, b: N) -> N {
        let rank = |n: &N| ranks.get(n).copied().unwrap_or(usize::MAX);
        let mut a = a;
        let mut b = b;
        while a != b {
            while rank(&a) > rank(&b) {
                a = idoms[&a];
            }
            while rank(&b) > rank(&a) {
                b = idoms[&b];
            }
        }
        a
    }

    /// Gets the immediate dominator of `node`, or [`None`] for the root and
    /// for nodes that were not reachable when the relation was computed.
    #[must_use]
    pub fn idom(&self, node: N) -> Option<N> {
        if node == self.root {
            return None;
        }
        self.idoms.get(&node).copied()
    }

    /// Checks whether `a` dominates `b`.
    ///
    /// Every node dominates itself. Unreachable nodes are dominated by
    /// nothing and dominate nothing but themselves.
    #[must_use]
    pub fn dominates(&self, a: N, b: N) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        while let Some(idom) = self.idom(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use crate::graph::{topological_order, DominatorTree, Successors};

    struct Adjacency {
        edges: HashMap<usize, Vec<usize>>,
    }

    impl Adjacency {
        fn new(edges: &[(usize, usize)]) -> Self {
            let mut map: HashMap<usize, Vec<usize>> = HashMap::new();
            for (from, to) in edges {
                map.entry(*from).or_default().push(*to);
            }
            Self { edges: map }
        }
    }

    impl Successors<usize> for Adjacency {
        fn successors(&self, node: usize) -> Vec<usize> {
            self.edges.get(&node).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn orders_nodes_before_their_successors() -> anyhow::Result<()> {
        let graph = Adjacency::new(&[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)]);
        let order = topological_order(&graph, [0])?;

        let position = |n: usize| order.iter().position(|x| *x == n).expect("node missing");
        for (from, to) in [(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)] {
            assert!(position(from) < position(to));
        }

        Ok(())
    }

    #[test]
    fn rejects_cyclic_graphs() {
        let graph = Adjacency::new(&[(0, 1), (1, 2), (2, 0)]);

        assert!(topological_order(&graph, [0]).is_err());
    }

    #[test]
    fn self_loops_are_cycles() {
        let graph = Adjacency::new(&[(0, 0)]);

        assert!(topological_order(&graph, [0]).is_err());
    }

    #[test]
    fn diamond_reconverges_at_the_fork() -> anyhow::Result<()> {
        let graph = Adjacency::new(&[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let doms = DominatorTree::new(&graph, 0)?;

        assert_eq!(doms.idom(3), Some(0));
        assert_eq!(doms.idom(1), Some(0));
        assert_eq!(doms.idom(2), Some(0));
        assert_eq!(doms.idom(0), None);

        Ok(())
    }

    #[test]
    fn chains_dominate_transitively() -> anyhow::Result<()> {
        let graph = Adjacency::new(&[(0, 1), (1, 2), (2, 3)]);
        let doms = DominatorTree::new(&graph, 0)?;

        assert!(doms.dominates(0, 3));
        assert!(doms.dominates(1, 3));
        assert!(doms.dominates(3, 3));
        assert!(!doms.dominates(3, 1));

        Ok(())
    }

    #[test]
    fn branch_sides_do_not_dominate_the_join() -> anyhow::Result<()> {
        let graph = Adjacency::new(&[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let doms = DominatorTree::new(&graph, 0)?;

        assert!(!doms.dominates(1, 3));
        assert!(!doms.dominates(2, 3));
        assert!(doms.dominates(0, 3));

        Ok(())
    }
}
