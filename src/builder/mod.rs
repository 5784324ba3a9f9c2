//! This module contains the builders that translate the method model into
//! predicate states.
//!
//! [`PredicateBuilder`] is the shared bottom layer: it turns single
//! instructions, terminator edges and phi edges into predicates, memoising
//! each translation so that the static walk in [`flow`] and the trace replay
//! in [`concolic`] agree on every shared translation. The two higher layers
//! then differ only in *which* predicates they compose and in how they name
//! intermediate values.

pub mod concolic;
pub mod flow;

use std::{collections::HashMap, sync::Arc};

use crate::{
    error::translation::{Error, Result},
    ir::{
        BlockId,
        InstLoc,
        Instruction,
        MethodId,
        Program,
        Terminator,
        TypeSig,
        UnaryOp,
        Value,
    },
    predicate::{
        state::PredicateState,
        term::{Term, TermRef},
        Predicate,
        PredicateKind,
    },
};

/// Translates individual pieces of one method into predicates, memoising
/// every translation.
///
/// The builder names values statically: `this`, `arg$<i>` and `%<l>` terms
/// are derived from the model itself, so repeated queries for the same piece
/// return identical predicates.
#[derive(Debug)]
pub struct PredicateBuilder {
    program:      Arc<Program>,
    method:       MethodId,
    instructions: HashMap<InstLoc, Option<Predicate>>,
    edges:        HashMap<(BlockId, BlockId), PredicateState>,
    phis:         HashMap<(BlockId, BlockId), Vec<Predicate>>,
}

impl PredicateBuilder {
    /// Constructs a builder for the provided method.
    #[must_use]
    pub fn new(program: Arc<Program>, method: MethodId) -> Self {
        Self {
            program,
            method,
            instructions: HashMap::new(),
            edges: HashMap::new(),
            phis: HashMap::new(),
        }
    }

    /// Gets the term for a model value as seen by the static translation.
    #[must_use]
    pub fn value_term(&self, value: &Value) -> TermRef {
        let method = self.program.method(self.method);
        match value {
            Value::This => {
                let class = method.receiver().unwrap_or("java.lang.Object");
                Term::this(TypeSig::Reference(class.into()))
            }
            Value::Arg(index) => {
                let ty = method
                    .params()
                    .get(*index as usize)
                    .cloned()
                    .unwrap_or(TypeSig::Int);
                Term::arg(*index, ty)
            }
            Value::Local(local) => {
                Term::value(format!("%{local}"), method.local_ty(*local).clone())
            }
            Value::Const(constant) => Term::constant(*constant),
        }
    }

    /// Gets the state predicate for the instruction at `loc`, or [`None`]
    /// for instructions that contribute no straight-line predicate.
    ///
    /// Phi instructions return [`None`] here: their effect is carried by the
    /// per-edge predicates of [`Self::phi_predicates`].
    pub fn instruction_predicate(&mut self, loc: InstLoc) -> Option<Predicate> {
        if let Some(memo) = self.instructions.get(&loc) {
            return memo.clone();
        }
        let predicate = self
            .program
            .method(self.method)
            .instruction(loc.block, loc.index)
            .and_then(|inst| self.translate_instruction(inst));
        self.instructions.insert(loc, predicate.clone());
        predicate
    }

    fn translate_instruction(&self, inst: &Instruction) -> Option<Predicate> {
        let result_term = |local: &u32| {
            let method = self.program.method(self.method);
            Term::value(format!("%{local}"), method.local_ty(*local).clone())
        };

        let predicate = match inst {
            Instruction::ArrayLoad {
                result,
                array,
                index,
            } => Predicate::eq(
                PredicateKind::State,
                result_term(result),
                Term::array_load(self.value_term(array), self.value_term(index)),
            ),
            Instruction::ArrayStore {
                array,
                index,
                value,
            } => Predicate::array_store(
                PredicateKind::State,
                self.value_term(array),
                self.value_term(index),
                self.value_term(value),
            ),
            Instruction::Binary {
                result,
                op,
                lhs,
                rhs,
            } => Predicate::eq(
                PredicateKind::State,
                result_term(result),
                Term::binary(*op, self.value_term(lhs), self.value_term(rhs)),
            ),
            Instruction::Unary {
                result,
                op,
                operand,
            } => {
                let rhs = match op {
                    UnaryOp::Neg => Term::neg(self.value_term(operand)),
                    UnaryOp::Length => Term::array_length(self.value_term(operand)),
                };
                Predicate::eq(PredicateKind::State, result_term(result), rhs)
            }
            Instruction::Cast {
                result,
                operand,
                target,
            } => Predicate::eq(
                PredicateKind::State,
                result_term(result),
                Term::cast(self.value_term(operand), target.clone()),
            ),
            Instruction::Cmp {
                result,
                op,
                lhs,
                rhs,
            } => Predicate::eq(
                PredicateKind::State,
                result_term(result),
                Term::cmp(*op, self.value_term(lhs), self.value_term(rhs)),
            ),
            Instruction::FieldLoad {
                result,
                object,
                field,
            } => Predicate::eq(
                PredicateKind::State,
                result_term(result),
                Term::field_load(
                    object.as_ref().map(|object| self.value_term(object)),
                    field.clone(),
                ),
            ),
            Instruction::FieldStore {
                object,
                field,
                value,
            } => Predicate::field_store(
                PredicateKind::State,
                object.as_ref().map(|object| self.value_term(object)),
                field.clone(),
                self.value_term(value),
            ),
            Instruction::InstanceOf {
                result,
                operand,
                target,
            } => Predicate::eq(
                PredicateKind::State,
                result_term(result),
                Term::instance_of(self.value_term(operand), target.clone()),
            ),
            Instruction::New { result, class } => {
                Predicate::new_object(PredicateKind::State, result_term(result), class.clone())
            }
            Instruction::NewArray {
                result,
                elem,
                length,
            } => Predicate::new_array(
                PredicateKind::State,
                result_term(result),
                elem.clone(),
                self.value_term(length),
            ),
            Instruction::Phi { .. } => return None,
            Instruction::Call {
                result,
                method,
                receiver,
                args,
            } => Predicate::call(
                PredicateKind::State,
                result.map(|local| result_term(&local)),
                method.clone(),
                receiver.as_ref().map(|receiver| self.value_term(receiver)),
                args.iter().map(|arg| self.value_term(arg)).collect(),
            ),
        };
        Some(predicate)
    }

    /// Gets the path state that taking the edge `from -> to` asserts.
    ///
    /// Unconditional edges assert nothing. A switch with several case values
    /// leading to the same block asserts a choice between their equalities,
    /// and its default edge asserts that the key matched no declared case.
    pub fn edge_state(&mut self, from: BlockId, to: BlockId) -> PredicateState {
        if let Some(memo) = self.edges.get(&(from, to)) {
            return memo.clone();
        }
        let state = self.translate_edge(from, to);
        self.edges.insert((from, to), state.clone());
        state
    }

    fn translate_edge(&self, from: BlockId, to: BlockId) -> PredicateState {
        let method = self.program.method(self.method);
        match method.block(from).terminator() {
            Terminator::Branch {
                cond,
                on_true,
                on_false,
            } => {
                let cond = self.value_term(cond);
                let mut branches = Vec::new();
                if *on_true == to {
                    branches.push(PredicateState::basic([Predicate::eq(
                        PredicateKind::Path,
                        cond.clone(),
                        Term::bool(true),
                    )]));
                }
                if *on_false == to {
                    branches.push(PredicateState::basic([Predicate::eq(
                        PredicateKind::Path,
                        cond,
                        Term::bool(false),
                    )]));
                }
                Self::collapse(branches)
            }
            Terminator::Switch { key, cases, default } => {
                let key_term = self.value_term(key);
                let case_terms: Vec<(i64, TermRef)> = cases
                    .iter()
                    .map(|(value, _)| (*value, Term::int_of(&key_term.ty(), *value)))
                    .collect();
                let mut branches: Vec<PredicateState> = cases
                    .iter()
                    .zip(case_terms.iter())
                    .filter(|((_, target), _)| *target == to)
                    .map(|(_, (_, constant))| {
                        PredicateState::basic([Predicate::eq(
                            PredicateKind::Path,
                            key_term.clone(),
                            constant.clone(),
                        )])
                    })
                    .collect();
                if *default == to {
                    branches.push(PredicateState::basic([Predicate::default_switch(
                        PredicateKind::Path,
                        key_term,
                        case_terms.into_iter().map(|(_, term)| term).collect(),
                    )]));
                }
                Self::collapse(branches)
            }
            Terminator::TableSwitch {
                key,
                low,
                targets,
                default,
            } => {
                let key_term = self.value_term(key);
                let case_terms: Vec<TermRef> = (0..targets.len())
                    .map(|offset| {
                        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
                        Term::int_of(&key_term.ty(), low.saturating_add(offset))
                    })
                    .collect();
                let mut branches: Vec<PredicateState> = targets
                    .iter()
                    .zip(case_terms.iter())
                    .filter(|(target, _)| **target == to)
                    .map(|(_, constant)| {
                        PredicateState::basic([Predicate::eq(
                            PredicateKind::Path,
                            key_term.clone(),
                            constant.clone(),
                        )])
                    })
                    .collect();
                if *default == to {
                    branches.push(PredicateState::basic([Predicate::default_switch(
                        PredicateKind::Path,
                        key_term,
                        case_terms,
                    )]));
                }
                Self::collapse(branches)
            }
            Terminator::Jump { .. }
            | Terminator::Return { .. }
            | Terminator::Throw { .. }
            | Terminator::Unreachable => PredicateState::empty(),
        }
    }

    fn collapse(mut branches: Vec<PredicateState>) -> PredicateState {
        match branches.len() {
            0 => PredicateState::empty(),
            1 => branches.remove(0),
            _ => PredicateState::choice(branches),
        }
    }

    /// Gets the predicates binding the phis at the start of `block` to the
    /// values flowing in along the edge from `pred`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a phi has no incoming value for `pred`.
    pub fn phi_predicates(&mut self, block: BlockId, pred: BlockId) -> Result<Vec<Predicate>> {
        use crate::error::container::Locatable;

        if let Some(memo) = self.phis.get(&(block, pred)) {
            return Ok(memo.clone());
        }

        let method = self.program.method(self.method);
        let mut predicates = Vec::new();
        for (index, inst) in method.block(block).phis().enumerate() {
            if let Instruction::Phi { result, incoming } = inst {
                let value = incoming
                    .iter()
                    .find(|(from, _)| *from == pred)
                    .map(|(_, value)| value.clone());
                let Some(value) = value else {
                    let index = u32::try_from(index).unwrap_or(u32::MAX);
                    let loc = InstLoc::new(self.method, block, index);
                    return Err(Error::MissingPhiIncoming { block, pred }).locate(loc);
                };
                predicates.push(Predicate::eq(
                    PredicateKind::State,
                    self.value_term(&Value::Local(*result)),
                    self.value_term(&value),
                ));
            }
        }

        self.phis.insert((block, pred), predicates.clone());
        Ok(predicates)
    }
}
