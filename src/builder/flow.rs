//! This module contains the static state builder that walks a method's
//! control flow graph.
//!
//! The builder processes blocks in topological order. Each block's entry
//! state starts from the exit state of its immediate dominator; the state
//! arriving along each in-edge is sliced at that base, and the suffixes are
//! merged into a choice when the block has several in-edges. The result is
//! that shared prefixes are represented once, however many paths reach a
//! block.

use std::{collections::HashMap, sync::Arc};

use crate::{
    builder::PredicateBuilder,
    error::{
        container::{Locatable, SourceLoc},
        translation,
        LocatedError,
    },
    graph::{topological_order, DominatorTree},
    ir::{BlockId, InstLoc, MethodId, Program, Terminator},
    predicate::state::PredicateState,
};

/// Builds predicate states for every position in one method, statically.
///
/// Construction fails for methods whose control flow graph is cyclic; loops
/// must be unrolled by the front end before a method is analysed.
#[derive(Debug)]
pub struct FlowStateBuilder {
    program:    Arc<Program>,
    method:     MethodId,
    order:      Vec<BlockId>,
    doms:       DominatorTree<BlockId>,
    predicates: PredicateBuilder,
    entries:    HashMap<BlockId, PredicateState>,
    exits:      HashMap<BlockId, PredicateState>,
}

impl FlowStateBuilder {
    /// Constructs a state builder for the provided method.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the method's control flow graph is cyclic.
    pub fn new(program: Arc<Program>, method: MethodId) -> Result<Self, LocatedError> {
        let m = program.method(method);
        let entry = m.entry();
        let order = topological_order(m, [entry]).locate(SourceLoc::Method(method))?;
        let doms = DominatorTree::new(m, entry).locate(SourceLoc::Method(method))?;
        let predicates = PredicateBuilder::new(Arc::clone(&program), method);

        Ok(Self {
            program,
            method,
            order,
            doms,
            predicates,
            entries: HashMap::new(),
            exits: HashMap::new(),
        })
    }

    /// Gets the state holding at the entry of `block`, before any of its
    /// instructions.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] for catch blocks, whose entry states are not
    /// modelled, and for blocks unreachable from the method entry.
    pub fn block_entry(&mut self, block: BlockId) -> Result<PredicateState, LocatedError> {
        if self.program.method(self.method).is_catch(block) {
            return Err(translation::Error::CatchEntry { block }
                .locate(InstLoc::new(self.method, block, 0))
                .into());
        }
        self.ensure_built()?;
        self.entries.get(&block).cloned().ok_or_else(|| {
            translation::Error::UnmodelledBlock { block }
                .locate(InstLoc::new(self.method, block, 0))
                .into()
        })
    }

    /// Gets the state holding at the exit of `block`, after all of its
    /// instructions.
    ///
    /// # Errors
    ///
    /// As for [`Self::block_entry`].
    pub fn block_exit(&mut self, block: BlockId) -> Result<PredicateState, LocatedError> {
        if self.program.method(self.method).is_catch(block) {
            return Err(translation::Error::CatchEntry { block }
                .locate(InstLoc::new(self.method, block, 0))
                .into());
        }
        self.ensure_built()?;
        self.exits.get(&block).cloned().ok_or_else(|| {
            translation::Error::UnmodelledBlock { block }
                .locate(InstLoc::new(self.method, block, 0))
                .into()
        })
    }

    /// Gets the state holding immediately after the instruction at `loc`;
    /// an index at or past the terminator yields the block's exit state.
    ///
    /// # Errors
    ///
    /// As for [`Self::block_entry`].
    pub fn instruction_state(&mut self, loc: InstLoc) -> Result<PredicateState, LocatedError> {
        let mut state = self.block_entry(loc.block)?;
        let count = self
            .program
            .method(self.method)
            .block(loc.block)
            .instructions()
            .len();
        let upto = (loc.index as usize).saturating_add(1).min(count);
        for index in 0..upto {
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            if let Some(predicate) = self
                .predicates
                .instruction_predicate(InstLoc::new(self.method, loc.block, index))
            {
                state = state.with(predicate);
            }
        }
        Ok(state)
    }

    /// Gets the state of the whole method: a choice over the exit states of
    /// all returning blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any state in the method fails to build.
    pub fn method_state(&mut self) -> Result<PredicateState, LocatedError> {
        self.ensure_built()?;
        let returning: Vec<BlockId> = self
            .order
            .iter()
            .copied()
            .filter(|block| {
                matches!(
                    self.program.method(self.method).block(*block).terminator(),
                    Terminator::Return { .. }
                )
            })
            .collect();
        let mut exits = Vec::with_capacity(returning.len());
        for block in returning {
            exits.push(self.block_exit(block)?);
        }
        Ok(match exits.len() {
            0 => PredicateState::empty(),
            1 => exits.remove(0),
            _ => PredicateState::choice(exits),
        })
    }

    /// Builds the entry and exit states of every reachable block, in
    /// topological order, if they have not been built yet.
    fn ensure_built(&mut self) -> Result<(), LocatedError> {
        if self.exits.len() == self.order.len() {
            return Ok(());
        }

        let program = Arc::clone(&self.program);
        let method = program.method(self.method);
        let entry = method.entry();

        for block in self.order.clone() {
            if self.exits.contains_key(&block) {
                continue;
            }

            let entry_state = if block == entry {
                PredicateState::empty()
            } else {
                self.join_entry_state(block)?
            };
            self.entries.insert(block, entry_state.clone());

            let mut exit_state = entry_state;
            for (index, _) in method.block(block).instructions().iter().enumerate() {
                let index = u32::try_from(index).unwrap_or(u32::MAX);
                let loc = InstLoc::new(self.method, block, index);
                if let Some(predicate) = self.predicates.instruction_predicate(loc) {
                    exit_state = exit_state.with(predicate);
                }
            }
            self.exits.insert(block, exit_state);
        }

        Ok(())
    }

    /// Builds the entry state of a join: the dominator's exit state followed
    /// by a choice over the per-edge suffixes.
    fn join_entry_state(&mut self, block: BlockId) -> Result<PredicateState, LocatedError> {
        let program = Arc::clone(&self.program);
        let method = program.method(self.method);

        let Some(idom) = self.doms.idom(block) else {
            return Err(translation::Error::UnmodelledBlock { block }
                .locate(InstLoc::new(self.method, block, 0))
                .into());
        };
        let base = self.exits.get(&idom).cloned().unwrap_or_default();

        let mut branches = Vec::new();
        for pred in method.preds(block).to_vec() {
            // In-edges from blocks outside the ordered region (for example
            // from catch blocks) are not modelled.
            let Some(pred_exit) = self.exits.get(&pred).cloned() else {
                continue;
            };
            let edge = self.predicates.edge_state(pred, block);
            let phis = self.predicates.phi_predicates(block, pred)?;
            let arriving = pred_exit.extend(edge).extend(PredicateState::basic(phis));
            let sliced = arriving.slice_on(&base).ok_or_else(|| {
                translation::Error::UnsliceableState { block }
                    .locate(InstLoc::new(self.method, block, 0))
            })?;
            branches.push(sliced);
        }

        Ok(match branches.len() {
            0 => base,
            1 => base.extend(branches.remove(0)),
            _ => base.extend(PredicateState::choice(branches)),
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        builder::flow::FlowStateBuilder,
        ir::{
            BinaryOp,
            CmpOp,
            Const,
            InstLoc,
            Instruction,
            MethodBuilder,
            Program,
            Terminator,
            TypeSig,
            Value,
        },
        predicate::{state::PredicateState, PredicateKind},
    };

    /// Builds `select(flag) { r = flag ? 1 : 2; return r; }` with a phi at
    /// the join.
    fn diamond_program() -> anyhow::Result<Arc<Program>> {
        let mut b = MethodBuilder::new("select", [TypeSig::Bool], Some(TypeSig::Int));
        let entry = b.block();
        let left = b.block();
        let right = b.block();
        let join = b.block();

        let merged = b.local(TypeSig::Int);
        b.terminate(
            entry,
            Terminator::Branch {
                cond:     Value::Arg(0),
                on_true:  left,
                on_false: right,
            },
        );
        b.terminate(left, Terminator::Jump { target: join });
        b.terminate(right, Terminator::Jump { target: join });
        b.push(
            join,
            Instruction::Phi {
                result:   merged,
                incoming: vec![
                    (left, Value::Const(Const::Int(1))),
                    (right, Value::Const(Const::Int(2))),
                ],
            },
        );
        b.terminate(
            join,
            Terminator::Return {
                value: Some(Value::Local(merged)),
            },
        );

        Ok(Arc::new(Program::new(vec![b.finish()?])?))
    }

    #[test]
    fn joins_become_choices_over_edge_suffixes() -> anyhow::Result<()> {
        let program = diamond_program()?;
        let mut builder = FlowStateBuilder::new(program, 0)?;

        let base = builder.block_exit(0)?;
        let join_entry = builder.block_entry(3)?;
        let suffix = join_entry
            .slice_on(&base)
            .expect("the dominator exit is a prefix of the join entry")
            .simplify();

        let PredicateState::Choice(branches) = suffix else {
            panic!("expected a choice over the two in-edges, got {suffix}");
        };
        assert_eq!(branches.len(), 2);
        for branch in &branches {
            let predicates = branch.predicates();
            // One path predicate for the branch direction, one binding for
            // the phi.
            assert_eq!(predicates.len(), 2);
            assert_eq!(predicates[0].kind, PredicateKind::Path);
            assert_eq!(predicates[1].kind, PredicateKind::State);
        }

        Ok(())
    }

    #[test]
    fn straight_line_states_accumulate_per_instruction() -> anyhow::Result<()> {
        let mut b = MethodBuilder::new("sum3", [TypeSig::Int], Some(TypeSig::Int));
        let entry = b.block();
        let a = b.local(TypeSig::Int);
        let c = b.local(TypeSig::Int);
        b.push(
            entry,
            Instruction::Binary {
                result: a,
                op:     BinaryOp::Add,
                lhs:    Value::Arg(0),
                rhs:    Value::Const(Const::Int(1)),
            },
        );
        b.push(
            entry,
            Instruction::Binary {
                result: c,
                op:     BinaryOp::Mul,
                lhs:    Value::Local(a),
                rhs:    Value::Const(Const::Int(3)),
            },
        );
        b.terminate(
            entry,
            Terminator::Return {
                value: Some(Value::Local(c)),
            },
        );
        let program = Arc::new(Program::new(vec![b.finish()?])?);
        let mut builder = FlowStateBuilder::new(program, 0)?;

        let after_first = builder.instruction_state(InstLoc::new(0, 0, 0))?;
        let after_second = builder.instruction_state(InstLoc::new(0, 0, 1))?;

        assert_eq!(after_first.len(), 1);
        assert_eq!(after_second.len(), 2);
        assert!(after_second.slice_on(&after_first).is_some());
        assert_eq!(after_second.simplify(), builder.block_exit(0)?.simplify());

        Ok(())
    }

    #[test]
    fn catch_blocks_have_no_entry_state() -> anyhow::Result<()> {
        let mut b = MethodBuilder::new("guarded", [], None);
        let entry = b.block();
        let handler = b.block();
        b.terminate(entry, Terminator::Return { value: None });
        b.terminate(handler, Terminator::Return { value: None });
        b.mark_catch(handler);
        let program = Arc::new(Program::new(vec![b.finish()?])?);
        let mut builder = FlowStateBuilder::new(program, 0)?;

        assert!(builder.block_entry(1).is_err());
        assert!(builder.block_entry(0).is_ok());

        Ok(())
    }

    #[test]
    fn cyclic_graphs_are_rejected_at_construction() -> anyhow::Result<()> {
        let mut b = MethodBuilder::new("spin", [], None);
        let entry = b.block();
        let body = b.block();
        b.terminate(entry, Terminator::Jump { target: body });
        b.terminate(body, Terminator::Jump { target: entry });
        let program = Arc::new(Program::new(vec![b.finish()?])?);

        assert!(FlowStateBuilder::new(program, 0).is_err());

        Ok(())
    }

    #[test]
    fn method_state_merges_all_returns() -> anyhow::Result<()> {
        let mut b = MethodBuilder::new("sign", [TypeSig::Int], Some(TypeSig::Int));
        let entry = b.block();
        let pos = b.block();
        let neg = b.block();
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
                on_true:  pos,
                on_false: neg,
            },
        );
        b.terminate(
            pos,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(1))),
            },
        );
        b.terminate(
            neg,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(-1))),
            },
        );
        let program = Arc::new(Program::new(vec![b.finish()?])?);
        let mut builder = FlowStateBuilder::new(program, 0)?;

        let state = builder.method_state()?.simplify();
        let PredicateState::Choice(branches) = &state else {
            panic!("expected a choice over the two returns, got {state}");
        };
        assert_eq!(branches.len(), 2);

        Ok(())
    }
}
