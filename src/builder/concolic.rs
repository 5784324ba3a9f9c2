//! This module contains the concolic state builder: the symbolic replay of a
//! recorded concrete run.
//!
//! The replay walks the method model in lock-step with the trace. Values are
//! named freshly (`%t0`, `%t1`, ...) per definition, so an unrolled loop
//! body yields distinct names per iteration, and the numbering restarts for
//! every build so that replaying the same trace twice yields identical
//! states. Calls whose callee appears in the trace are inlined by binding
//! the callee's formals to the caller's argument terms; any other call is
//! kept opaque behind a call predicate.

use std::{collections::HashMap, sync::Arc};

use bimap::BiHashMap;
use uuid::Uuid;

use crate::{
    constant::{
        ARG_PREFIX,
        CLASS_CAST_CLASS,
        NULL_POINTER_CLASS,
        OUT_OF_BOUNDS_CLASS,
        THIS_NAME,
    },
    error::{
        container::{Locatable, SourceLoc},
        translation::{Error, Result},
    },
    ir::{
        BinaryOp,
        BlockId,
        CmpOp,
        InstLoc,
        Instruction,
        LocalId,
        MethodId,
        Program,
        Terminator,
        TypeSig,
        UnaryOp,
        Value,
    },
    predicate::{
        term::{Term, TermRef},
        Predicate,
        PredicateKind,
        PredicateOp,
    },
    trace::{
        symbolic::{Clause, PathClause, PathClauseKind, SymbolicState},
        Action,
        TraceValue,
    },
};

/// Builds the symbolic state of a recorded run by replaying its actions over
/// the method model.
#[derive(Debug)]
pub struct ConcolicStateBuilder {
    program: Arc<Program>,
}

impl ConcolicStateBuilder {
    /// Constructs a builder over the provided program.
    #[must_use]
    pub fn new(program: Arc<Program>) -> Self {
        Self { program }
    }

    /// Replays `actions` and produces the symbolic state of the run
    /// identified by `run`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the trace names unknown methods or diverges from
    /// the method model.
    pub fn build(&self, run: Uuid, actions: &[Action]) -> Result<SymbolicState> {
        Replay::new(Arc::clone(&self.program)).run(run, actions)
    }
}

/// One method activation during the replay.
#[derive(Debug)]
struct Frame {
    /// The method being replayed.
    method: MethodId,

    /// The terms currently naming each model value. The map is bidirectional
    /// so that a term can name at most one value per frame.
    values: BiHashMap<Value, TermRef>,

    /// The caller local awaiting this frame's return value, for inlined
    /// frames.
    receiver: Option<LocalId>,

    /// The block being executed and the index of the next instruction of it
    /// still to be processed.
    current: Option<(BlockId, usize)>,

    /// The previously executed block, for resolving phis.
    last_block: Option<BlockId>,
}

/// The working state of one replay.
#[derive(Debug)]
struct Replay {
    program:  Arc<Program>,
    fresh:    usize,
    frames:   Vec<Frame>,
    clauses:  Vec<Clause>,
    path:     Vec<PathClause>,
    concrete: HashMap<TermRef, TraceValue>,
    raised:   Option<String>,
}

impl Replay {
    fn new(program: Arc<Program>) -> Self {
        Self {
            program,
            fresh: 0,
            frames: Vec::new(),
            clauses: Vec::new(),
            path: Vec::new(),
            concrete: HashMap::new(),
            raised: None,
        }
    }

    fn run(mut self, run: Uuid, actions: &[Action]) -> Result<SymbolicState> {
        for action in actions {
            match action {
                Action::Enter { method } => {
                    if self.frames.is_empty() {
                        self.push_root(method)?;
                    } else {
                        self.enter_call(method)?;
                    }
                }
                Action::Arguments { bindings, .. } => self.bind_arguments(bindings)?,
                Action::Block { block } => self.enter_block(*block)?,
                Action::Branch { block, taken } => self.take_branch(*block, *taken)?,
                Action::Switch { block, key } => self.take_switch(*block, *key, false)?,
                Action::TableSwitch { block, key } => self.take_switch(*block, *key, true)?,
                Action::Return { value, .. } => {
                    if self.return_from(value.as_ref())? {
                        break;
                    }
                }
                Action::Throw {
                    class,
                    block,
                    index,
                    ..
                } => {
                    self.throw_at(class, *block, *index)?;
                    break;
                }
            }
        }

        Ok(SymbolicState {
            clauses:  self.clauses,
            path:     self.path,
            concrete: self.concrete,
            run,
            raised:   self.raised,
        })
    }

    /// Opens the root frame, binding `this` and the arguments to their
    /// canonical terms.
    fn push_root(&mut self, name: &str) -> Result<()> {
        let method = self
            .program
            .by_name(name)
            .ok_or_else(|| {
                Error::UnknownCallTarget {
                    name: name.to_string(),
                }
                .locate(SourceLoc::Program)
            })?;
        let m = self.program.method(method);

        let mut values = BiHashMap::new();
        if let Some(class) = m.receiver() {
            values.insert(Value::This, Term::this(TypeSig::Reference(class.to_string())));
        }
        for (index, ty) in m.params().iter().enumerate() {
            let index = u16::try_from(index).unwrap_or(u16::MAX);
            values.insert(Value::Arg(index), Term::arg(index, ty.clone()));
        }

        self.frames.push(Frame {
            method,
            values,
            receiver: None,
            current: None,
            last_block: None,
        });
        Ok(())
    }

    /// Advances the caller to its next call of `name` and opens the inlined
    /// callee frame, binding formals to the caller's argument terms.
    fn enter_call(&mut self, name: &str) -> Result<()> {
        let program = Arc::clone(&self.program);
        loop {
            let frame = self.require_frame()?;
            let method = frame.method;
            let Some((block, next)) = frame.current else {
                return Err(Error::TraceMismatch {
                    expected: format!("a call of {name}"),
                    found:    "no active block".to_string(),
                })
                .locate(SourceLoc::Method(method));
            };
            let m = program.method(method);
            let loc = InstLoc::new(method, block, u32::try_from(next).unwrap_or(u32::MAX));

            let Some(inst) = m.block(block).instructions().get(next).cloned() else {
                return Err(Error::TraceMismatch {
                    expected: format!("a call of {name}"),
                    found:    "the end of the block".to_string(),
                })
                .locate(loc);
            };

            if let Instruction::Call {
                result,
                method: callee_name,
                receiver,
                args,
            } = &inst
            {
                if callee_name == name {
                    let callee = program.by_name(name).ok_or_else(|| {
                        Error::UnknownCallTarget {
                            name: name.to_string(),
                        }
                        .locate(loc)
                    })?;

                    let this_term = receiver.as_ref().map(|receiver| {
                        let term = self.resolve(receiver);
                        self.null_pass(loc, &term);
                        term
                    });
                    let arg_terms: Vec<TermRef> =
                        args.iter().map(|arg| self.resolve(arg)).collect();

                    let callee_m = program.method(callee);
                    if arg_terms.len() != callee_m.params().len() {
                        return Err(Error::TraceMismatch {
                            expected: format!(
                                "{} arguments for {name}",
                                callee_m.params().len()
                            ),
                            found: format!("{}", arg_terms.len()),
                        })
                        .locate(loc);
                    }

                    let mut values = BiHashMap::new();
                    if let Some(term) = this_term {
                        values.insert(Value::This, term);
                    }
                    for (index, term) in arg_terms.into_iter().enumerate() {
                        let index = u16::try_from(index).unwrap_or(u16::MAX);
                        values.insert(Value::Arg(index), term);
                    }

                    let receiver_local = *result;
                    self.advance(block, next + 1)?;
                    self.frames.push(Frame {
                        method: callee,
                        values,
                        receiver: receiver_local,
                        current: None,
                        last_block: None,
                    });
                    return Ok(());
                }
            }

            // Anything before the traced call is processed in place, with
            // calls kept opaque.
            self.advance(block, next + 1)?;
            self.process_instruction(loc, inst)?;
        }
    }

    /// Records the observed concrete values of the current frame's receiver
    /// and arguments.
    fn bind_arguments(&mut self, bindings: &[(String, TraceValue)]) -> Result<()> {
        for (name, observed) in bindings {
            let value = if name == THIS_NAME {
                Value::This
            } else if let Some(index) = name
                .strip_prefix(ARG_PREFIX)
                .and_then(|digits| digits.parse::<u16>().ok())
            {
                Value::Arg(index)
            } else {
                let method = self.require_frame()?.method;
                return Err(Error::TraceMismatch {
                    expected: "this or arg$<i>".to_string(),
                    found:    name.clone(),
                })
                .locate(SourceLoc::Method(method));
            };
            let term = self.resolve(&value);
            self.concrete.insert(term, observed.clone());
        }
        Ok(())
    }

    /// Enters a block: finishes the previous one when it fell through a
    /// jump, then resolves the phis at the new block's start.
    fn enter_block(&mut self, block: BlockId) -> Result<()> {
        let program = Arc::clone(&self.program);
        let method = self.require_frame()?.method;
        let m = program.method(method);

        if let Some((prev, _)) = self.require_frame()?.current {
            self.finish_block_instructions()?;
            match m.block(prev).terminator() {
                Terminator::Jump { target } if *target == block => {}
                other => {
                    return Err(Error::TraceMismatch {
                        expected: format!("a jump to %bb{block}"),
                        found:    format!("{other:?}"),
                    })
                    .locate(m.terminator_loc(method, prev));
                }
            }
            let frame = self.require_frame()?;
            frame.last_block = Some(prev);
            frame.current = None;
        }

        let last_block = self.require_frame()?.last_block;

        // Phis evaluate simultaneously on entry: resolve every incoming
        // value against the old bindings before defining any result.
        let mut resolved: Vec<(LocalId, InstLoc, TermRef)> = Vec::new();
        for (index, inst) in m.block(block).instructions().iter().enumerate() {
            let Instruction::Phi { result, incoming } = inst else {
                break;
            };
            let loc = InstLoc::new(method, block, u32::try_from(index).unwrap_or(u32::MAX));
            let Some(prev) = last_block else {
                return Err(Error::TraceMismatch {
                    expected: "a predecessor for the phi".to_string(),
                    found:    "the method entry".to_string(),
                })
                .locate(loc);
            };
            let value = incoming
                .iter()
                .find(|(from, _)| *from == prev)
                .map(|(_, value)| value.clone());
            let Some(value) = value else {
                return Err(Error::MissingPhiIncoming { block, pred: prev }).locate(loc);
            };
            let term = self.resolve(&value);
            resolved.push((*result, loc, term));
        }
        for (result, loc, term) in resolved {
            let defined = self.define(result);
            self.state_clause(loc, Predicate::eq(PredicateKind::State, defined, term));
        }

        let frame = self.require_frame()?;
        frame.current = Some((block, 0));
        Ok(())
    }

    /// Consumes a branch decision: finishes the block's instructions and
    /// records the taken direction as a path clause.
    fn take_branch(&mut self, block: BlockId, taken: bool) -> Result<()> {
        let program = Arc::clone(&self.program);
        let method = self.expect_current(block)?;
        self.finish_block_instructions()?;

        let m = program.method(method);
        let loc = m.terminator_loc(method, block);
        match m.block(block).terminator().clone() {
            Terminator::Branch { cond, .. } => {
                let cond = self.resolve(&cond);
                self.push_path(
                    loc,
                    PathClauseKind::Condition,
                    Predicate::eq(PredicateKind::Path, cond, Term::bool(taken)),
                );
            }
            other => {
                return Err(Error::TraceMismatch {
                    expected: "a conditional branch".to_string(),
                    found:    format!("{other:?}"),
                })
                .locate(loc);
            }
        }

        let frame = self.require_frame()?;
        frame.last_block = Some(block);
        frame.current = None;
        Ok(())
    }

    /// Consumes a switch decision, recording either the matched case's
    /// equality or the default's exclusion of every declared case.
    fn take_switch(&mut self, block: BlockId, key: i64, table: bool) -> Result<()> {
        let program = Arc::clone(&self.program);
        let method = self.expect_current(block)?;
        self.finish_block_instructions()?;

        let m = program.method(method);
        let loc = m.terminator_loc(method, block);
        let kind = if table {
            PathClauseKind::TableSwitch
        } else {
            PathClauseKind::Switch
        };

        let (key_value, declared) = match m.block(block).terminator().clone() {
            Terminator::Switch { key: value, cases, .. } if !table => {
                let declared: Vec<i64> = cases.iter().map(|(case, _)| *case).collect();
                (value, declared)
            }
            Terminator::TableSwitch {
                key: value,
                low,
                targets,
                ..
            } if table => {
                let declared: Vec<i64> = (0..targets.len())
                    .map(|offset| low.saturating_add(i64::try_from(offset).unwrap_or(i64::MAX)))
                    .collect();
                (value, declared)
            }
            other => {
                return Err(Error::TraceMismatch {
                    expected: "a switch".to_string(),
                    found:    format!("{other:?}"),
                })
                .locate(loc);
            }
        };

        let key_term = self.resolve(&key_value);
        let predicate = if declared.contains(&key) {
            Predicate::eq(
                PredicateKind::Path,
                key_term.clone(),
                Term::int_of(&key_term.ty(), key),
            )
        } else {
            let cases = declared
                .iter()
                .map(|case| Term::int_of(&key_term.ty(), *case))
                .collect();
            Predicate::default_switch(PredicateKind::Path, key_term, cases)
        };
        self.push_path(loc, kind, predicate);

        let frame = self.require_frame()?;
        frame.last_block = Some(block);
        frame.current = None;
        Ok(())
    }

    /// Consumes a return: pops the finished frame and, for inlined frames,
    /// binds the caller's receiving local to the returned term. Yields
    /// `true` when the root frame returned.
    fn return_from(&mut self, observed: Option<&TraceValue>) -> Result<bool> {
        let program = Arc::clone(&self.program);
        let method = self.require_frame()?.method;
        self.finish_block_instructions()?;

        let m = program.method(method);
        let frame = self.require_frame()?;
        let Some((block, _)) = frame.current else {
            return Err(Error::TraceMismatch {
                expected: "an active block to return from".to_string(),
                found:    "none".to_string(),
            })
            .locate(SourceLoc::Method(method));
        };
        let loc = m.terminator_loc(method, block);

        let returned = match m.block(block).terminator().clone() {
            Terminator::Return { value } => value.as_ref().map(|value| self.resolve(value)),
            other => {
                return Err(Error::TraceMismatch {
                    expected: "a return".to_string(),
                    found:    format!("{other:?}"),
                })
                .locate(loc);
            }
        };
        if let (Some(term), Some(observed)) = (&returned, observed) {
            self.concrete.insert(term.clone(), observed.clone());
        }

        let finished = self.frames.pop().ok_or_else(|| {
            Error::TraceMismatch {
                expected: "an active frame".to_string(),
                found:    "none".to_string(),
            }
            .locate(SourceLoc::Program)
        })?;
        if self.frames.is_empty() {
            return Ok(true);
        }

        if let Some(local) = finished.receiver {
            let caller = self.require_frame()?;
            let call_loc = match caller.current {
                Some((block, next)) => InstLoc::new(
                    caller.method,
                    block,
                    u32::try_from(next.saturating_sub(1)).unwrap_or(u32::MAX),
                ),
                None => loc,
            };
            let defined = self.define(local);
            if let Some(returned) = returned {
                self.state_clause(
                    call_loc,
                    Predicate::eq(PredicateKind::State, defined, returned),
                );
            }
        }
        Ok(false)
    }

    /// Consumes a throw: re-emits the failing implicit check (when the
    /// instruction has one matching the thrown class) and truncates the
    /// replay.
    fn throw_at(&mut self, class: &str, block: BlockId, index: u32) -> Result<()> {
        let program = Arc::clone(&self.program);
        let method = self.expect_current(block)?;

        // Everything before the faulting instruction executed normally.
        loop {
            let frame = self.require_frame()?;
            let Some((current, next)) = frame.current else {
                break;
            };
            if next >= index as usize {
                break;
            }
            let m = program.method(method);
            let Some(inst) = m.block(current).instructions().get(next).cloned() else {
                break;
            };
            let loc = InstLoc::new(method, current, u32::try_from(next).unwrap_or(u32::MAX));
            self.advance(current, next + 1)?;
            self.process_instruction(loc, inst)?;
        }

        let m = program.method(method);
        let loc = InstLoc::new(method, block, index);
        if let Some(inst) = m.block(block).instructions().get(index as usize).cloned() {
            self.failing_check(loc, &inst, class);
        }
        self.raised = Some(class.to_string());
        Ok(())
    }

    /// Emits the path clause for the check that failed at `loc`, when the
    /// instruction has a modelled check matching the thrown class.
    fn failing_check(&mut self, loc: InstLoc, inst: &Instruction, class: &str) {
        match inst {
            Instruction::ArrayLoad { array, index, .. }
            | Instruction::ArrayStore { array, index, .. } => {
                let array = self.resolve(array);
                if class == NULL_POINTER_CLASS {
                    self.null_fail(loc, &array);
                } else if class == OUT_OF_BOUNDS_CLASS {
                    // The null check passed before the bounds check failed.
                    self.null_pass(loc, &array);
                    let index = self.resolve(index);
                    let in_bounds = Self::bounds_term(&array, &index);
                    self.push_path(
                        loc,
                        PathClauseKind::BoundsCheck,
                        Predicate::eq(PredicateKind::Path, in_bounds, Term::bool(false)),
                    );
                }
            }
            Instruction::FieldLoad {
                object: Some(object),
                ..
            }
            | Instruction::FieldStore {
                object: Some(object),
                ..
            } => {
                if class == NULL_POINTER_CLASS {
                    let object = self.resolve(object);
                    self.null_fail(loc, &object);
                }
            }
            Instruction::Unary {
                op: UnaryOp::Length,
                operand,
                ..
            } => {
                if class == NULL_POINTER_CLASS {
                    let operand = self.resolve(operand);
                    self.null_fail(loc, &operand);
                }
            }
            Instruction::Call {
                receiver: Some(receiver),
                ..
            } => {
                if class == NULL_POINTER_CLASS {
                    let receiver = self.resolve(receiver);
                    self.null_fail(loc, &receiver);
                }
            }
            Instruction::Cast {
                operand, target, ..
            } => {
                if class == CLASS_CAST_CLASS && target.is_reference() {
                    let operand = self.resolve(operand);
                    let castable = Self::castable_term(&operand, target);
                    self.push_path(
                        loc,
                        PathClauseKind::TypeCheck,
                        Predicate::eq(PredicateKind::Path, castable, Term::bool(false)),
                    );
                }
            }
            _ => {}
        }
    }

    /// Processes the instructions of the current block up to its terminator,
    /// treating every remaining call as opaque.
    fn finish_block_instructions(&mut self) -> Result<()> {
        let program = Arc::clone(&self.program);
        loop {
            let frame = self.require_frame()?;
            let method = frame.method;
            let Some((block, next)) = frame.current else {
                return Ok(());
            };
            let m = program.method(method);
            let Some(inst) = m.block(block).instructions().get(next).cloned() else {
                return Ok(());
            };
            let loc = InstLoc::new(method, block, u32::try_from(next).unwrap_or(u32::MAX));
            self.advance(block, next + 1)?;
            self.process_instruction(loc, inst)?;
        }
    }

    /// Translates one instruction against the current frame: implicit checks
    /// first, then the effect itself under a freshly defined result.
    fn process_instruction(&mut self, loc: InstLoc, inst: Instruction) -> Result<()> {
        match inst {
            Instruction::ArrayLoad {
                result,
                array,
                index,
            } => {
                let array = self.resolve(&array);
                let index = self.resolve(&index);
                self.null_pass(loc, &array);
                self.bounds_pass(loc, &array, &index);
                let defined = self.define(result);
                self.state_clause(
                    loc,
                    Predicate::eq(
                        PredicateKind::State,
                        defined,
                        Term::array_load(array, index),
                    ),
                );
            }
            Instruction::ArrayStore {
                array,
                index,
                value,
            } => {
                let array = self.resolve(&array);
                let index = self.resolve(&index);
                let value = self.resolve(&value);
                self.null_pass(loc, &array);
                self.bounds_pass(loc, &array, &index);
                self.state_clause(
                    loc,
                    Predicate::array_store(PredicateKind::State, array, index, value),
                );
            }
            Instruction::Binary {
                result,
                op,
                lhs,
                rhs,
            } => {
                let lhs = self.resolve(&lhs);
                let rhs = self.resolve(&rhs);
                let defined = self.define(result);
                self.state_clause(
                    loc,
                    Predicate::eq(PredicateKind::State, defined, Term::binary(op, lhs, rhs)),
                );
            }
            Instruction::Unary {
                result,
                op,
                operand,
            } => {
                let operand = self.resolve(&operand);
                let rhs = match op {
                    UnaryOp::Neg => Term::neg(operand),
                    UnaryOp::Length => {
                        self.null_pass(loc, &operand);
                        Term::array_length(operand)
                    }
                };
                let defined = self.define(result);
                self.state_clause(loc, Predicate::eq(PredicateKind::State, defined, rhs));
            }
            Instruction::Cast {
                result,
                operand,
                target,
            } => {
                let operand = self.resolve(&operand);
                if target.is_reference() {
                    let castable = Self::castable_term(&operand, &target);
                    self.push_path(
                        loc,
                        PathClauseKind::TypeCheck,
                        Predicate::eq(PredicateKind::Path, castable, Term::bool(true)),
                    );
                }
                let defined = self.define(result);
                self.state_clause(
                    loc,
                    Predicate::eq(PredicateKind::State, defined, Term::cast(operand, target)),
                );
            }
            Instruction::Cmp {
                result,
                op,
                lhs,
                rhs,
            } => {
                let lhs = self.resolve(&lhs);
                let rhs = self.resolve(&rhs);
                let defined = self.define(result);
                self.state_clause(
                    loc,
                    Predicate::eq(PredicateKind::State, defined, Term::cmp(op, lhs, rhs)),
                );
            }
            Instruction::FieldLoad {
                result,
                object,
                field,
            } => {
                let object = object.map(|object| {
                    let term = self.resolve(&object);
                    self.null_pass(loc, &term);
                    term
                });
                let defined = self.define(result);
                self.state_clause(
                    loc,
                    Predicate::eq(
                        PredicateKind::State,
                        defined,
                        Term::field_load(object, field),
                    ),
                );
            }
            Instruction::FieldStore {
                object,
                field,
                value,
            } => {
                let object = object.map(|object| {
                    let term = self.resolve(&object);
                    self.null_pass(loc, &term);
                    term
                });
                let value = self.resolve(&value);
                self.state_clause(
                    loc,
                    Predicate::field_store(PredicateKind::State, object, field, value),
                );
            }
            Instruction::InstanceOf {
                result,
                operand,
                target,
            } => {
                let operand = self.resolve(&operand);
                let defined = self.define(result);
                self.state_clause(
                    loc,
                    Predicate::eq(
                        PredicateKind::State,
                        defined,
                        Term::instance_of(operand, target),
                    ),
                );
            }
            Instruction::New { result, class } => {
                let defined = self.define(result);
                self.state_clause(loc, Predicate::new_object(PredicateKind::State, defined, class));
            }
            Instruction::NewArray {
                result,
                elem,
                length,
            } => {
                let length = self.resolve(&length);
                let defined = self.define(result);
                self.state_clause(
                    loc,
                    Predicate::new_array(PredicateKind::State, defined, elem, length),
                );
            }
            Instruction::Phi { .. } => {
                // Resolved when the block was entered.
            }
            Instruction::Call {
                result,
                method,
                receiver,
                args,
            } => {
                let receiver = receiver.map(|receiver| {
                    let term = self.resolve(&receiver);
                    self.null_pass(loc, &term);
                    term
                });
                let args: Vec<TermRef> = args.iter().map(|arg| self.resolve(arg)).collect();
                let defined = result.map(|local| self.define(local));
                self.state_clause(
                    loc,
                    Predicate::call(PredicateKind::State, defined, method, receiver, args),
                );
            }
        }
        Ok(())
    }

    /// Resolves a model value to its current term, creating a fresh binding
    /// on first use.
    fn resolve(&mut self, value: &Value) -> TermRef {
        if let Value::Const(constant) = value {
            return Term::constant(*constant);
        }
        if let Some(frame) = self.frames.last() {
            if let Some(term) = frame.values.get_by_left(value) {
                return term.clone();
            }
        }

        let term = {
            let Some(frame) = self.frames.last() else {
                return Term::null();
            };
            let m = self.program.method(frame.method);
            match value {
                Value::This => {
                    let class = m.receiver().unwrap_or("java.lang.Object");
                    Term::this(TypeSig::Reference(class.to_string()))
                }
                Value::Arg(index) => {
                    let ty = m
                        .params()
                        .get(*index as usize)
                        .cloned()
                        .unwrap_or(TypeSig::Int);
                    Term::arg(*index, ty)
                }
                Value::Local(local) => {
                    let ty = m.local_ty(*local).clone();
                    self.fresh_term(ty)
                }
                Value::Const(constant) => return Term::constant(*constant),
            }
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.values.insert(value.clone(), term.clone());
        }
        term
    }

    /// Defines a fresh term for `local` and rebinds the frame to it.
    fn define(&mut self, local: LocalId) -> TermRef {
        let ty = match self.frames.last() {
            Some(frame) => self.program.method(frame.method).local_ty(local).clone(),
            None => TypeSig::Int,
        };
        let term = self.fresh_term(ty);
        if let Some(frame) = self.frames.last_mut() {
            frame.values.insert(Value::Local(local), term.clone());
        }
        term
    }

    fn fresh_term(&mut self, ty: TypeSig) -> TermRef {
        let name = format!("%t{}", self.fresh);
        self.fresh += 1;
        Term::value(name, ty)
    }

    /// Records a passing null check for `term`, unless it is the receiver,
    /// which can never be null.
    fn null_pass(&mut self, loc: InstLoc, term: &TermRef) {
        if matches!(term.as_ref(), Term::This { .. }) {
            return;
        }
        self.push_path(
            loc,
            PathClauseKind::NullCheck,
            Predicate::eq(
                PredicateKind::Path,
                Term::cmp(CmpOp::Eq, term.clone(), Term::null()),
                Term::bool(false),
            ),
        );
    }

    /// Records a failing null check for `term`.
    fn null_fail(&mut self, loc: InstLoc, term: &TermRef) {
        self.push_path(
            loc,
            PathClauseKind::NullCheck,
            Predicate::eq(
                PredicateKind::Path,
                Term::cmp(CmpOp::Eq, term.clone(), Term::null()),
                Term::bool(true),
            ),
        );
    }

    /// Records a passing bounds check for `array[index]`.
    fn bounds_pass(&mut self, loc: InstLoc, array: &TermRef, index: &TermRef) {
        let in_bounds = Self::bounds_term(array, index);
        self.push_path(
            loc,
            PathClauseKind::BoundsCheck,
            Predicate::eq(PredicateKind::Path, in_bounds, Term::bool(true)),
        );
    }

    /// Builds `0 <= index && index < length(array)`.
    fn bounds_term(array: &TermRef, index: &TermRef) -> TermRef {
        let lower = Term::cmp(CmpOp::Le, Term::int(0), index.clone());
        let upper = Term::cmp(CmpOp::Lt, index.clone(), Term::array_length(array.clone()));
        Term::binary(BinaryOp::And, lower, upper)
    }

    /// Builds `operand == null || operand instanceof target`.
    fn castable_term(operand: &TermRef, target: &TypeSig) -> TermRef {
        let null_ok = Term::cmp(CmpOp::Eq, operand.clone(), Term::null());
        let is_instance = Term::instance_of(operand.clone(), target.clone());
        Term::binary(BinaryOp::Or, null_ok, is_instance)
    }

    fn state_clause(&mut self, loc: InstLoc, predicate: Predicate) {
        self.clauses.push(Clause::new(loc, predicate));
    }

    /// Appends a path clause, dropping tautologies and decisions whose
    /// predicate is already on the path. A repeat at a different site is
    /// implied by the first occurrence and cannot be flipped on its own.
    fn push_path(&mut self, loc: InstLoc, kind: PathClauseKind, predicate: Predicate) {
        if Self::is_tautology(&predicate) {
            return;
        }
        if self.path.iter().any(|seen| seen.predicate == predicate) {
            return;
        }
        let clause = PathClause::new(loc, kind, predicate);
        self.clauses.push(clause.as_clause());
        self.path.push(clause);
    }

    fn is_tautology(predicate: &Predicate) -> bool {
        match &predicate.op {
            PredicateOp::Equality { lhs, rhs } => lhs == rhs,
            _ => false,
        }
    }

    fn advance(&mut self, block: BlockId, next: usize) -> Result<()> {
        let frame = self.require_frame()?;
        frame.current = Some((block, next));
        Ok(())
    }

    /// Checks that the current frame is executing `block`.
    fn expect_current(&mut self, block: BlockId) -> Result<MethodId> {
        let frame = self.require_frame()?;
        let method = frame.method;
        match frame.current {
            Some((current, _)) if current == block => Ok(method),
            other => Err(Error::TraceMismatch {
                expected: format!("execution inside %bb{block}"),
                found:    format!("{other:?}"),
            })
            .locate(SourceLoc::Method(method)),
        }
    }

    fn require_frame(&mut self) -> Result<&mut Frame> {
        self.frames.last_mut().ok_or_else(|| {
            Error::TraceMismatch {
                expected: "an active frame".to_string(),
                found:    "none".to_string(),
            }
            .locate(SourceLoc::Program)
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::{
        builder::concolic::ConcolicStateBuilder,
        ir::{
            BinaryOp,
            CmpOp,
            Const,
            Instruction,
            MethodBuilder,
            Program,
            Terminator,
            TypeSig,
            Value,
        },
        predicate::{term::Term, Predicate, PredicateKind, PredicateOp},
        trace::{symbolic::PathClauseKind, Action, TraceValue},
    };

    fn run_id() -> Uuid {
        Uuid::from_u128(7)
    }

    /// Builds `inc(x) { a = x + 1; b = a * 3; return b; }`.
    fn linear_program() -> anyhow::Result<Arc<Program>> {
        let mut b = MethodBuilder::new("inc", [TypeSig::Int], Some(TypeSig::Int));
        let entry = b.block();
        let a = b.local(TypeSig::Int);
        let out = b.local(TypeSig::Int);
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
                result: out,
                op:     BinaryOp::Mul,
                lhs:    Value::Local(a),
                rhs:    Value::Const(Const::Int(3)),
            },
        );
        b.terminate(
            entry,
            Terminator::Return {
                value: Some(Value::Local(out)),
            },
        );
        Ok(Arc::new(Program::new(vec![b.finish()?])?))
    }

    fn linear_trace() -> Vec<Action> {
        vec![
            Action::Enter {
                method: "inc".into(),
            },
            Action::Arguments {
                method:   "inc".into(),
                bindings: vec![("arg$0".into(), TraceValue::Int(4))],
            },
            Action::Block { block: 0 },
            Action::Return {
                method: "inc".into(),
                value:  Some(TraceValue::Int(15)),
            },
        ]
    }

    #[test]
    fn straight_line_replay_defines_fresh_values() -> anyhow::Result<()> {
        let builder = ConcolicStateBuilder::new(linear_program()?);
        let state = builder.build(run_id(), &linear_trace())?;

        assert_eq!(state.clauses.len(), 2);
        assert!(state.path.is_empty());
        assert_eq!(
            state.clauses[0].predicate,
            Predicate::eq(
                PredicateKind::State,
                Term::value("%t0", TypeSig::Int),
                Term::binary(BinaryOp::Add, Term::arg(0, TypeSig::Int), Term::int(1)),
            )
        );
        assert_eq!(
            state.clauses[1].predicate,
            Predicate::eq(
                PredicateKind::State,
                Term::value("%t1", TypeSig::Int),
                Term::binary(BinaryOp::Mul, Term::value("%t0", TypeSig::Int), Term::int(3)),
            )
        );

        Ok(())
    }

    #[test]
    fn replaying_the_same_trace_twice_is_identical() -> anyhow::Result<()> {
        let builder = ConcolicStateBuilder::new(linear_program()?);
        let first = builder.build(run_id(), &linear_trace())?;
        let second = builder.build(run_id(), &linear_trace())?;

        assert_eq!(first.clauses, second.clauses);
        assert_eq!(first.path, second.path);

        Ok(())
    }

    /// Builds `max(a, b) { if (a > b) return a; else return b; }`.
    fn branching_program() -> anyhow::Result<Arc<Program>> {
        let mut b = MethodBuilder::new("max", [TypeSig::Int, TypeSig::Int], Some(TypeSig::Int));
        let entry = b.block();
        let first = b.block();
        let second = b.block();
        let cond = b.local(TypeSig::Bool);
        b.push(
            entry,
            Instruction::Cmp {
                result: cond,
                op:     CmpOp::Gt,
                lhs:    Value::Arg(0),
                rhs:    Value::Arg(1),
            },
        );
        b.terminate(
            entry,
            Terminator::Branch {
                cond:     Value::Local(cond),
                on_true:  first,
                on_false: second,
            },
        );
        b.terminate(
            first,
            Terminator::Return {
                value: Some(Value::Arg(0)),
            },
        );
        b.terminate(
            second,
            Terminator::Return {
                value: Some(Value::Arg(1)),
            },
        );
        Ok(Arc::new(Program::new(vec![b.finish()?])?))
    }

    #[test]
    fn branch_replay_produces_the_taken_path() -> anyhow::Result<()> {
        let builder = ConcolicStateBuilder::new(branching_program()?);
        let actions = vec![
            Action::Enter {
                method: "max".into(),
            },
            Action::Arguments {
                method:   "max".into(),
                bindings: vec![
                    ("arg$0".into(), TraceValue::Int(3)),
                    ("arg$1".into(), TraceValue::Int(-2)),
                ],
            },
            Action::Block { block: 0 },
            Action::Branch {
                block: 0,
                taken: true,
            },
            Action::Block { block: 1 },
            Action::Return {
                method: "max".into(),
                value:  Some(TraceValue::Int(3)),
            },
        ];
        let state = builder.build(run_id(), &actions)?;

        assert_eq!(state.path.len(), 1);
        assert_eq!(state.path[0].kind, PathClauseKind::Condition);
        assert_eq!(
            state.path[0].predicate,
            Predicate::eq(
                PredicateKind::Path,
                Term::value("%t0", TypeSig::Bool),
                Term::bool(true),
            )
        );
        assert!(state.raised.is_none());

        Ok(())
    }

    /// Builds `get(a, i) { v = a[i]; return v; }`.
    fn array_program() -> anyhow::Result<Arc<Program>> {
        let mut b = MethodBuilder::new(
            "get",
            [TypeSig::array_of(TypeSig::Int), TypeSig::Int],
            Some(TypeSig::Int),
        );
        let entry = b.block();
        let v = b.local(TypeSig::Int);
        b.push(
            entry,
            Instruction::ArrayLoad {
                result: v,
                array:  Value::Arg(0),
                index:  Value::Arg(1),
            },
        );
        b.terminate(
            entry,
            Terminator::Return {
                value: Some(Value::Local(v)),
            },
        );
        Ok(Arc::new(Program::new(vec![b.finish()?])?))
    }

    #[test]
    fn array_access_emits_implicit_checks() -> anyhow::Result<()> {
        let builder = ConcolicStateBuilder::new(array_program()?);
        let actions = vec![
            Action::Enter {
                method: "get".into(),
            },
            Action::Arguments {
                method:   "get".into(),
                bindings: vec![
                    (
                        "arg$0".into(),
                        TraceValue::Array {
                            elem:   TypeSig::Int,
                            length: 3,
                            id:     1,
                        },
                    ),
                    ("arg$1".into(), TraceValue::Int(1)),
                ],
            },
            Action::Block { block: 0 },
            Action::Return {
                method: "get".into(),
                value:  Some(TraceValue::Int(0)),
            },
        ];
        let state = builder.build(run_id(), &actions)?;

        assert_eq!(state.path.len(), 2);
        assert_eq!(state.path[0].kind, PathClauseKind::NullCheck);
        assert_eq!(state.path[1].kind, PathClauseKind::BoundsCheck);
        // Passing outcomes: the null test is false, the bounds test true.
        assert!(matches!(
            &state.path[0].predicate.op,
            PredicateOp::Equality { rhs, .. }
                if **rhs == *Term::bool(false)
        ));
        assert!(matches!(
            &state.path[1].predicate.op,
            PredicateOp::Equality { rhs, .. }
                if **rhs == *Term::bool(true)
        ));

        Ok(())
    }

    #[test]
    fn thrown_null_pointer_records_the_failing_check() -> anyhow::Result<()> {
        let builder = ConcolicStateBuilder::new(array_program()?);
        let actions = vec![
            Action::Enter {
                method: "get".into(),
            },
            Action::Arguments {
                method:   "get".into(),
                bindings: vec![
                    ("arg$0".into(), TraceValue::Null),
                    ("arg$1".into(), TraceValue::Int(0)),
                ],
            },
            Action::Block { block: 0 },
            Action::Throw {
                method: "get".into(),
                class:  "java.lang.NullPointerException".into(),
                block:  0,
                index:  0,
            },
        ];
        let state = builder.build(run_id(), &actions)?;

        assert_eq!(state.raised.as_deref(), Some("java.lang.NullPointerException"));
        assert_eq!(state.path.len(), 1);
        assert_eq!(state.path[0].kind, PathClauseKind::NullCheck);
        assert!(matches!(
            &state.path[0].predicate.op,
            PredicateOp::Equality { rhs, .. }
                if **rhs == *Term::bool(true)
        ));

        Ok(())
    }

    /// Builds a caller/callee pair where `twice` calls `inc` and returns its
    /// result.
    fn calling_program() -> anyhow::Result<Arc<Program>> {
        let mut callee = MethodBuilder::new("bump", [TypeSig::Int], Some(TypeSig::Int));
        let entry = callee.block();
        let r = callee.local(TypeSig::Int);
        callee.push(
            entry,
            Instruction::Binary {
                result: r,
                op:     BinaryOp::Add,
                lhs:    Value::Arg(0),
                rhs:    Value::Const(Const::Int(1)),
            },
        );
        callee.terminate(
            entry,
            Terminator::Return {
                value: Some(Value::Local(r)),
            },
        );

        let mut caller = MethodBuilder::new("twice", [TypeSig::Int], Some(TypeSig::Int));
        let entry = caller.block();
        let r = caller.local(TypeSig::Int);
        let out = caller.local(TypeSig::Int);
        caller.push(
            entry,
            Instruction::Call {
                result:   Some(r),
                method:   "bump".into(),
                receiver: None,
                args:     vec![Value::Arg(0)],
            },
        );
        caller.push(
            entry,
            Instruction::Binary {
                result: out,
                op:     BinaryOp::Mul,
                lhs:    Value::Local(r),
                rhs:    Value::Const(Const::Int(2)),
            },
        );
        caller.terminate(
            entry,
            Terminator::Return {
                value: Some(Value::Local(out)),
            },
        );

        Ok(Arc::new(Program::new(vec![
            callee.finish()?,
            caller.finish()?,
        ])?))
    }

    #[test]
    fn traced_calls_inline_the_callee() -> anyhow::Result<()> {
        let builder = ConcolicStateBuilder::new(calling_program()?);
        let actions = vec![
            Action::Enter {
                method: "twice".into(),
            },
            Action::Arguments {
                method:   "twice".into(),
                bindings: vec![("arg$0".into(), TraceValue::Int(5))],
            },
            Action::Block { block: 0 },
            Action::Enter {
                method: "bump".into(),
            },
            Action::Arguments {
                method:   "bump".into(),
                bindings: vec![("arg$0".into(), TraceValue::Int(5))],
            },
            Action::Block { block: 0 },
            Action::Return {
                method: "bump".into(),
                value:  Some(TraceValue::Int(6)),
            },
            Action::Return {
                method: "twice".into(),
                value:  Some(TraceValue::Int(12)),
            },
        ];
        let state = builder.build(run_id(), &actions)?;

        // The callee computes over the caller's argument term directly, and
        // the caller's receiving local is bound to the returned term.
        assert_eq!(state.clauses.len(), 3);
        assert_eq!(
            state.clauses[0].predicate,
            Predicate::eq(
                PredicateKind::State,
                Term::value("%t0", TypeSig::Int),
                Term::binary(BinaryOp::Add, Term::arg(0, TypeSig::Int), Term::int(1)),
            )
        );
        assert_eq!(
            state.clauses[1].predicate,
            Predicate::eq(
                PredicateKind::State,
                Term::value("%t1", TypeSig::Int),
                Term::value("%t0", TypeSig::Int),
            )
        );
        assert_eq!(
            state.clauses[2].predicate,
            Predicate::eq(
                PredicateKind::State,
                Term::value("%t2", TypeSig::Int),
                Term::binary(BinaryOp::Mul, Term::value("%t1", TypeSig::Int), Term::int(2)),
            )
        );

        Ok(())
    }

    /// Builds a method that branches on the same argument twice in a row.
    fn repeated_branch_program() -> anyhow::Result<Arc<Program>> {
        let mut b = MethodBuilder::new("gate", [TypeSig::Bool], Some(TypeSig::Int));
        let entry = b.block();
        let mid = b.block();
        let yes = b.block();
        let no = b.block();
        b.terminate(
            entry,
            Terminator::Branch {
                cond:     Value::Arg(0),
                on_true:  mid,
                on_false: no,
            },
        );
        b.terminate(
            mid,
            Terminator::Branch {
                cond:     Value::Arg(0),
                on_true:  yes,
                on_false: no,
            },
        );
        b.terminate(
            yes,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(1))),
            },
        );
        b.terminate(
            no,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(0))),
            },
        );
        Ok(Arc::new(Program::new(vec![b.finish()?])?))
    }

    #[test]
    fn repeated_decisions_appear_once_on_the_path() -> anyhow::Result<()> {
        let builder = ConcolicStateBuilder::new(repeated_branch_program()?);
        let actions = vec![
            Action::Enter {
                method: "gate".into(),
            },
            Action::Arguments {
                method:   "gate".into(),
                bindings: vec![("arg$0".into(), TraceValue::Bool(true))],
            },
            Action::Block { block: 0 },
            Action::Branch {
                block: 0,
                taken: true,
            },
            Action::Block { block: 1 },
            Action::Branch {
                block: 1,
                taken: true,
            },
            Action::Block { block: 2 },
            Action::Return {
                method: "gate".into(),
                value:  Some(TraceValue::Int(1)),
            },
        ];
        let state = builder.build(run_id(), &actions)?;

        // The second decision re-tests the same argument and is implied by
        // the first.
        assert_eq!(state.path.len(), 1);
        assert_eq!(
            state.path[0].predicate,
            Predicate::eq(
                PredicateKind::Path,
                Term::arg(0, TypeSig::Bool),
                Term::bool(true),
            )
        );

        Ok(())
    }

    /// Builds `label(k) { switch (k) { case 1,2,3 -> k; default -> 0; } }`.
    fn switch_program() -> anyhow::Result<Arc<Program>> {
        let mut b = MethodBuilder::new("label", [TypeSig::Int], Some(TypeSig::Int));
        let entry = b.block();
        let hit = b.block();
        let miss = b.block();
        b.terminate(
            entry,
            Terminator::Switch {
                key:     Value::Arg(0),
                cases:   vec![(1, hit), (2, hit), (3, hit)],
                default: miss,
            },
        );
        b.terminate(
            hit,
            Terminator::Return {
                value: Some(Value::Arg(0)),
            },
        );
        b.terminate(
            miss,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(0))),
            },
        );
        Ok(Arc::new(Program::new(vec![b.finish()?])?))
    }

    #[test]
    fn switch_replay_distinguishes_cases_from_the_default() -> anyhow::Result<()> {
        let builder = ConcolicStateBuilder::new(switch_program()?);
        let case_actions = vec![
            Action::Enter {
                method: "label".into(),
            },
            Action::Arguments {
                method:   "label".into(),
                bindings: vec![("arg$0".into(), TraceValue::Int(2))],
            },
            Action::Block { block: 0 },
            Action::Switch { block: 0, key: 2 },
            Action::Block { block: 1 },
            Action::Return {
                method: "label".into(),
                value:  Some(TraceValue::Int(2)),
            },
        ];
        let case_state = builder.build(run_id(), &case_actions)?;
        assert_eq!(
            case_state.path[0].predicate,
            Predicate::eq(
                PredicateKind::Path,
                Term::arg(0, TypeSig::Int),
                Term::int(2),
            )
        );

        let default_actions = vec![
            Action::Enter {
                method: "label".into(),
            },
            Action::Arguments {
                method:   "label".into(),
                bindings: vec![("arg$0".into(), TraceValue::Int(99))],
            },
            Action::Block { block: 0 },
            Action::Switch { block: 0, key: 99 },
            Action::Block { block: 2 },
            Action::Return {
                method: "label".into(),
                value:  Some(TraceValue::Int(0)),
            },
        ];
        let default_state = builder.build(run_id(), &default_actions)?;
        assert!(matches!(
            &default_state.path[0].predicate.op,
            PredicateOp::DefaultSwitch { cases, .. } if cases.len() == 3
        ));

        Ok(())
    }
}
