//! This module contains an instrumented interpreter over the method model.
//!
//! The interpreter is the crate's built-in concrete runner: it executes a
//! method directly from its control-flow graph, emitting the trace actions
//! an instrumented runtime would emit. Its heap is a flat arena of objects
//! and arrays with identities starting at `1`, so identity `0` never clashes
//! with a live referent. Runtime checks mirror the JVM's: dereferencing
//! `null`, indexing out of bounds, dividing by zero, casting to the wrong
//! class, and allocating with a negative length all throw, ending the run
//! with the corresponding exception class.

use std::{collections::HashMap, sync::Arc};

use crate::{
    constant::{
        ARG_PREFIX,
        ARITHMETIC_CLASS,
        CLASS_CAST_CLASS,
        DEFAULT_INTERPRETER_STEP_LIMIT,
        NEGATIVE_ARRAY_SIZE_CLASS,
        NULL_POINTER_CLASS,
        OUT_OF_BOUNDS_CLASS,
        THIS_NAME,
    },
    ir::{
        BinaryOp,
        BlockId,
        CmpOp,
        Const,
        Instruction,
        LocalId,
        Method,
        MethodId,
        Program,
        Terminator,
        TypeSig,
        UnaryOp,
        Value,
    },
    runner::{ConcreteRunner, RunOutcome},
    smt::model::{RecoveredInputs, RecoveredValue},
    trace::{render, Action, TraceValue},
};

/// Configuration for the interpreter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// The number of instructions a single run may execute.
    pub step_limit: usize,
}

impl Config {
    /// Sets the number of instructions a single run may execute.
    #[must_use]
    pub fn with_step_limit(mut self, value: usize) -> Self {
        self.step_limit = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            step_limit: DEFAULT_INTERPRETER_STEP_LIMIT,
        }
    }
}

/// An instrumented interpreter over a program's method model.
#[derive(Debug)]
pub struct Interpreter {
    program: Arc<Program>,
    config:  Config,
}

impl Interpreter {
    /// Constructs a new interpreter over the provided program.
    #[must_use]
    pub fn new(program: Arc<Program>, config: Config) -> Self {
        Self { program, config }
    }
}

impl ConcreteRunner for Interpreter {
    fn run(&self, inputs: &RecoveredInputs) -> RunOutcome {
        let Some(method) = self.program.by_name(&inputs.method) else {
            return RunOutcome::Failed {
                reason: format!("unknown method {}", inputs.method),
            };
        };
        Machine::new(Arc::clone(&self.program), self.config).execute(method, inputs)
    }
}

/// A runtime value of the interpreter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Rt {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Ref(u64),
}

impl Rt {
    /// The default value of a type, as the JVM zero-initialises it.
    fn default_of(ty: &TypeSig) -> Self {
        match ty {
            TypeSig::Bool => Self::Bool(false),
            TypeSig::Int => Self::Int(0),
            TypeSig::Long => Self::Long(0),
            TypeSig::Reference(_) | TypeSig::Array(_) => Self::Null,
        }
    }
}

/// One referent on the interpreter's heap.
#[derive(Clone, Debug)]
enum HeapEntry {
    Object {
        class:  String,
        fields: HashMap<String, Rt>,
    },
    Array {
        elem:   TypeSig,
        length: usize,
        cells:  HashMap<usize, Rt>,
    },
}

/// The reason a run stopped before returning from the root method.
#[derive(Clone, Debug)]
enum Halt {
    /// An exception propagated out of the root method.
    Thrown { class: String },

    /// The model was malformed or an input could not be executed.
    Failed { reason: String },

    /// The step budget ran out.
    StepLimit,
}

/// One method activation.
struct Frame<'a> {
    method: &'a Method,
    this:   Option<Rt>,
    args:   Vec<Rt>,
    locals: HashMap<LocalId, Rt>,
}

/// The mutable state of one run.
struct Machine {
    program: Arc<Program>,
    config:  Config,
    heap:    Vec<HeapEntry>,
    statics: HashMap<(String, String), Rt>,
    actions: Vec<Action>,
    steps:   usize,
}

impl Machine {
    fn new(program: Arc<Program>, config: Config) -> Self {
        Self {
            program,
            config,
            heap: Vec::new(),
            statics: HashMap::new(),
            actions: Vec::new(),
            steps: 0,
        }
    }

    fn execute(mut self, method: MethodId, inputs: &RecoveredInputs) -> RunOutcome {
        let this = inputs.this.as_ref().map(|value| self.materialise(value));
        let args = inputs.args.iter().map(|value| self.materialise(value)).collect();

        match self.call(method, this, args) {
            Ok(_) => RunOutcome::Completed {
                trace: render(&self.actions),
            },
            Err(Halt::Thrown { class }) => RunOutcome::Threw {
                trace: render(&self.actions),
                class,
            },
            Err(Halt::StepLimit) => RunOutcome::TimedOut,
            Err(Halt::Failed { reason }) => RunOutcome::Failed { reason },
        }
    }

    /// Builds a heap shape for one recovered input value.
    fn materialise(&mut self, value: &RecoveredValue) -> Rt {
        match value {
            RecoveredValue::Null => Rt::Null,
            RecoveredValue::Bool(b) => Rt::Bool(*b),
            RecoveredValue::Int(i) => Rt::Int(*i),
            RecoveredValue::Long(l) => Rt::Long(*l),
            RecoveredValue::Ref { class, fields } => {
                let materialised = fields
                    .iter()
                    .map(|(name, value)| (name.clone(), self.materialise(value)))
                    .collect();
                self.allocate(HeapEntry::Object {
                    class:  class.clone(),
                    fields: materialised,
                })
            }
            RecoveredValue::Array {
                elem,
                length,
                elements,
            } => {
                let cells = elements
                    .iter()
                    .enumerate()
                    .map(|(index, value)| (index, self.materialise(value)))
                    .collect();
                self.allocate(HeapEntry::Array {
                    elem: elem.clone(),
                    length: *length,
                    cells,
                })
            }
        }
    }

    fn allocate(&mut self, entry: HeapEntry) -> Rt {
        self.heap.push(entry);
        Rt::Ref(u64::try_from(self.heap.len()).unwrap_or(u64::MAX))
    }

    fn entry(&self, id: u64) -> Result<&HeapEntry, Halt> {
        let index = usize::try_from(id).ok().and_then(|raw| raw.checked_sub(1));
        index
            .and_then(|index| self.heap.get(index))
            .ok_or_else(|| malformed(format!("dangling reference #{id}")))
    }

    fn entry_mut(&mut self, id: u64) -> Result<&mut HeapEntry, Halt> {
        let index = usize::try_from(id).ok().and_then(|raw| raw.checked_sub(1));
        index
            .and_then(|index| self.heap.get_mut(index))
            .ok_or_else(|| malformed(format!("dangling reference #{id}")))
    }

    fn step(&mut self) -> Result<(), Halt> {
        self.steps += 1;
        if self.steps > self.config.step_limit {
            return Err(Halt::StepLimit);
        }
        Ok(())
    }

    /// Records a throw at the provided instruction and produces the halt
    /// that propagates it.
    fn throw(&mut self, method: &str, class: &str, block: BlockId, index: u32) -> Halt {
        self.actions.push(Action::Throw {
            method: method.to_string(),
            class: class.to_string(),
            block,
            index,
        });
        Halt::Thrown {
            class: class.to_string(),
        }
    }

    /// The observable shape of a runtime value, as the trace records it.
    fn observe(&self, value: Rt) -> Result<TraceValue, Halt> {
        Ok(match value {
            Rt::Null => TraceValue::Null,
            Rt::Bool(b) => TraceValue::Bool(b),
            Rt::Int(i) => TraceValue::Int(i),
            Rt::Long(l) => TraceValue::Long(l),
            Rt::Ref(id) => match self.entry(id)? {
                HeapEntry::Object { class, .. } => TraceValue::Ref {
                    class: class.clone(),
                    id,
                },
                HeapEntry::Array { elem, length, .. } => TraceValue::Array {
                    elem: elem.clone(),
                    length: *length,
                    id,
                },
            },
        })
    }

    /// Runs one method activation to completion.
    fn call(
        &mut self,
        method: MethodId,
        this: Option<Rt>,
        args: Vec<Rt>,
    ) -> Result<Option<Rt>, Halt> {
        let program = Arc::clone(&self.program);
        let m = program.method(method);

        self.actions.push(Action::Enter {
            method: m.name().to_string(),
        });
        let mut bindings = Vec::with_capacity(args.len() + 1);
        if let Some(this) = this {
            bindings.push((THIS_NAME.to_string(), self.observe(this)?));
        }
        for (index, arg) in args.iter().enumerate() {
            bindings.push((format!("{ARG_PREFIX}{index}"), self.observe(*arg)?));
        }
        self.actions.push(Action::Arguments {
            method: m.name().to_string(),
            bindings,
        });

        let mut frame = Frame {
            method: m,
            this,
            args,
            locals: HashMap::new(),
        };
        let mut block = m.entry();
        let mut last_block: Option<BlockId> = None;

        loop {
            self.actions.push(Action::Block { block });

            // Phis evaluate simultaneously against the bindings of the
            // previous block.
            let mut resolved: Vec<(LocalId, Rt)> = Vec::new();
            for inst in m.block(block).phis() {
                let Instruction::Phi { result, incoming } = inst else {
                    break;
                };
                let Some(prev) = last_block else {
                    return Err(malformed(format!("phi in the entry block of {}", m.name())));
                };
                let value = incoming
                    .iter()
                    .find(|(from, _)| *from == prev)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| {
                        malformed(format!("no phi incoming from %bb{prev} in %bb{block}"))
                    })?;
                resolved.push((*result, self.eval(&frame, &value)?));
            }
            for (result, value) in resolved {
                frame.locals.insert(result, value);
            }

            let phi_count = m.block(block).phis().count();
            for (index, inst) in m.block(block).instructions().iter().enumerate().skip(phi_count)
            {
                self.step()?;
                let index = u32::try_from(index).unwrap_or(u32::MAX);
                self.instruction(&mut frame, block, index, inst)?;
            }

            self.step()?;
            let terminator_index =
                u32::try_from(m.block(block).instructions().len()).unwrap_or(u32::MAX);
            match m.block(block).terminator().clone() {
                Terminator::Jump { target } => {
                    last_block = Some(block);
                    block = target;
                }
                Terminator::Branch {
                    cond,
                    on_true,
                    on_false,
                } => {
                    let taken = self.truthy(&frame, &cond)?;
                    self.actions.push(Action::Branch { block, taken });
                    last_block = Some(block);
                    block = if taken { on_true } else { on_false };
                }
                Terminator::Switch {
                    key,
                    cases,
                    default,
                } => {
                    let key = self.numeric(&frame, &key)?;
                    self.actions.push(Action::Switch { block, key });
                    last_block = Some(block);
                    block = cases
                        .iter()
                        .find(|(value, _)| *value == key)
                        .map_or(default, |(_, target)| *target);
                }
                Terminator::TableSwitch {
                    key,
                    low,
                    targets,
                    default,
                } => {
                    let key = self.numeric(&frame, &key)?;
                    self.actions.push(Action::TableSwitch { block, key });
                    last_block = Some(block);
                    let offset = key.wrapping_sub(low);
                    block = usize::try_from(offset)
                        .ok()
                        .and_then(|offset| targets.get(offset).copied())
                        .unwrap_or(default);
                }
                Terminator::Return { value } => {
                    let value = match value {
                        Some(value) => Some(self.eval(&frame, &value)?),
                        None => None,
                    };
                    let observed = match value {
                        Some(value) => Some(self.observe(value)?),
                        None => None,
                    };
                    self.actions.push(Action::Return {
                        method: m.name().to_string(),
                        value:  observed,
                    });
                    return Ok(value);
                }
                Terminator::Throw { exception } => {
                    let class = match self.eval(&frame, &exception)? {
                        Rt::Null => NULL_POINTER_CLASS.to_string(),
                        Rt::Ref(id) => match self.entry(id)? {
                            HeapEntry::Object { class, .. } => class.clone(),
                            HeapEntry::Array { .. } => {
                                return Err(malformed("an array was thrown".to_string()));
                            }
                        },
                        other => {
                            return Err(malformed(format!("a non-reference was thrown: {other:?}")));
                        }
                    };
                    return Err(self.throw(m.name(), &class, block, terminator_index));
                }
                Terminator::Unreachable => {
                    return Err(malformed(format!(
                        "control reached an unreachable point in {}",
                        m.name()
                    )));
                }
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn instruction(
        &mut self,
        frame: &mut Frame<'_>,
        block: BlockId,
        index: u32,
        inst: &Instruction,
    ) -> Result<(), Halt> {
        let name = frame.method.name().to_string();
        match inst {
            Instruction::ArrayLoad {
                result,
                array,
                index: at,
            } => {
                let array = self.eval(frame, array)?;
                let at = self.numeric(frame, at)?;
                let value = self.array_read(&name, array, at, block, index)?;
                frame.locals.insert(*result, value);
            }
            Instruction::ArrayStore {
                array,
                index: at,
                value,
            } => {
                let array = self.eval(frame, array)?;
                let at = self.numeric(frame, at)?;
                let value = self.eval(frame, value)?;
                self.array_write(&name, array, at, value, block, index)?;
            }
            Instruction::Binary {
                result,
                op,
                lhs,
                rhs,
            } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                let value = self.binary(&name, *op, lhs, rhs, block, index)?;
                frame.locals.insert(*result, value);
            }
            Instruction::Unary {
                result,
                op,
                operand,
            } => {
                let operand = self.eval(frame, operand)?;
                let value = match op {
                    UnaryOp::Neg => match operand {
                        Rt::Int(i) => Rt::Int(i.wrapping_neg()),
                        Rt::Long(l) => Rt::Long(l.wrapping_neg()),
                        other => {
                            return Err(malformed(format!("negation of {other:?}")));
                        }
                    },
                    UnaryOp::Length => match operand {
                        Rt::Null => {
                            return Err(self.throw(&name, NULL_POINTER_CLASS, block, index));
                        }
                        Rt::Ref(id) => match self.entry(id)? {
                            HeapEntry::Array { length, .. } => {
                                Rt::Int(i32::try_from(*length).unwrap_or(i32::MAX))
                            }
                            HeapEntry::Object { .. } => {
                                return Err(malformed("length of a non-array".to_string()));
                            }
                        },
                        other => {
                            return Err(malformed(format!("length of {other:?}")));
                        }
                    },
                };
                frame.locals.insert(*result, value);
            }
            Instruction::Cast {
                result,
                operand,
                target,
            } => {
                let operand = self.eval(frame, operand)?;
                let value = self.cast(&name, operand, target, block, index)?;
                frame.locals.insert(*result, value);
            }
            Instruction::Cmp {
                result,
                op,
                lhs,
                rhs,
            } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                frame.locals.insert(*result, Rt::Bool(compare(*op, lhs, rhs)?));
            }
            Instruction::FieldLoad {
                result,
                object,
                field,
            } => {
                let value = match object {
                    Some(object) => match self.eval(frame, object)? {
                        Rt::Null => {
                            return Err(self.throw(&name, NULL_POINTER_CLASS, block, index));
                        }
                        Rt::Ref(id) => match self.entry(id)? {
                            HeapEntry::Object { fields, .. } => fields
                                .get(&field.name)
                                .copied()
                                .unwrap_or_else(|| Rt::default_of(&field.ty)),
                            HeapEntry::Array { .. } => {
                                return Err(malformed("field load on an array".to_string()));
                            }
                        },
                        other => {
                            return Err(malformed(format!("field load on {other:?}")));
                        }
                    },
                    None => self
                        .statics
                        .get(&(field.class.clone(), field.name.clone()))
                        .copied()
                        .unwrap_or_else(|| Rt::default_of(&field.ty)),
                };
                frame.locals.insert(*result, value);
            }
            Instruction::FieldStore {
                object,
                field,
                value,
            } => {
                let value = self.eval(frame, value)?;
                match object {
                    Some(object) => match self.eval(frame, object)? {
                        Rt::Null => {
                            return Err(self.throw(&name, NULL_POINTER_CLASS, block, index));
                        }
                        Rt::Ref(id) => match self.entry_mut(id)? {
                            HeapEntry::Object { fields, .. } => {
                                fields.insert(field.name.clone(), value);
                            }
                            HeapEntry::Array { .. } => {
                                return Err(malformed("field store on an array".to_string()));
                            }
                        },
                        other => {
                            return Err(malformed(format!("field store on {other:?}")));
                        }
                    },
                    None => {
                        self.statics
                            .insert((field.class.clone(), field.name.clone()), value);
                    }
                }
            }
            Instruction::InstanceOf {
                result,
                operand,
                target,
            } => {
                let operand = self.eval(frame, operand)?;
                let is = match operand {
                    Rt::Ref(id) => match self.entry(id)? {
                        HeapEntry::Object { class, .. } => {
                            matches!(target, TypeSig::Reference(wanted) if wanted == class)
                        }
                        HeapEntry::Array { elem, .. } => {
                            matches!(target, TypeSig::Array(wanted) if wanted.as_ref() == elem)
                        }
                    },
                    _ => false,
                };
                frame.locals.insert(*result, Rt::Bool(is));
            }
            Instruction::New { result, class } => {
                let value = self.allocate(HeapEntry::Object {
                    class:  class.clone(),
                    fields: HashMap::new(),
                });
                frame.locals.insert(*result, value);
            }
            Instruction::NewArray {
                result,
                elem,
                length,
            } => {
                let length = self.numeric(frame, length)?;
                let Ok(length) = usize::try_from(length) else {
                    return Err(self.throw(&name, NEGATIVE_ARRAY_SIZE_CLASS, block, index));
                };
                let value = self.allocate(HeapEntry::Array {
                    elem: elem.clone(),
                    length,
                    cells: HashMap::new(),
                });
                frame.locals.insert(*result, value);
            }
            Instruction::Phi { .. } => {
                // Handled at block entry.
            }
            Instruction::Call {
                result,
                method,
                receiver,
                args,
            } => {
                let this = match receiver {
                    Some(receiver) => match self.eval(frame, receiver)? {
                        Rt::Null => {
                            return Err(self.throw(&name, NULL_POINTER_CLASS, block, index));
                        }
                        value => Some(value),
                    },
                    None => None,
                };
                let args = args
                    .iter()
                    .map(|arg| self.eval(frame, arg))
                    .collect::<Result<Vec<Rt>, Halt>>()?;
                let Some(callee) = self.program.by_name(method) else {
                    return Err(malformed(format!("unknown call target {method}")));
                };
                let returned = self.call(callee, this, args)?;
                if let (Some(result), Some(returned)) = (result, returned) {
                    frame.locals.insert(*result, returned);
                }
            }
        }
        Ok(())
    }

    fn eval(&self, frame: &Frame<'_>, value: &Value) -> Result<Rt, Halt> {
        match value {
            Value::This => frame
                .this
                .ok_or_else(|| malformed("this in a static method".to_string())),
            Value::Arg(index) => frame
                .args
                .get(*index as usize)
                .copied()
                .ok_or_else(|| malformed(format!("argument {index} out of range"))),
            Value::Local(local) => frame
                .locals
                .get(local)
                .copied()
                .ok_or_else(|| malformed(format!("use of the undefined local %{local}"))),
            Value::Const(constant) => Ok(match constant {
                Const::Bool(b) => Rt::Bool(*b),
                Const::Int(i) => Rt::Int(*i),
                Const::Long(l) => Rt::Long(*l),
                Const::Null => Rt::Null,
            }),
        }
    }

    fn truthy(&self, frame: &Frame<'_>, value: &Value) -> Result<bool, Halt> {
        Ok(match self.eval(frame, value)? {
            Rt::Bool(b) => b,
            Rt::Int(i) => i != 0,
            Rt::Long(l) => l != 0,
            other => return Err(malformed(format!("a non-boolean condition: {other:?}"))),
        })
    }

    fn numeric(&self, frame: &Frame<'_>, value: &Value) -> Result<i64, Halt> {
        numeric_rt(self.eval(frame, value)?)
    }

    fn array_read(
        &mut self,
        method: &str,
        array: Rt,
        index: i64,
        block: BlockId,
        at: u32,
    ) -> Result<Rt, Halt> {
        let id = match array {
            Rt::Null => return Err(self.throw(method, NULL_POINTER_CLASS, block, at)),
            Rt::Ref(id) => id,
            other => return Err(malformed(format!("array load on {other:?}"))),
        };
        match self.entry(id)? {
            HeapEntry::Array {
                elem,
                length,
                cells,
            } => match usize::try_from(index).ok().filter(|index| index < length) {
                Some(index) => Ok(cells
                    .get(&index)
                    .copied()
                    .unwrap_or_else(|| Rt::default_of(elem))),
                None => Err(self.throw(method, OUT_OF_BOUNDS_CLASS, block, at)),
            },
            HeapEntry::Object { .. } => Err(malformed("array load on an object".to_string())),
        }
    }

    fn array_write(
        &mut self,
        method: &str,
        array: Rt,
        index: i64,
        value: Rt,
        block: BlockId,
        at: u32,
    ) -> Result<(), Halt> {
        let id = match array {
            Rt::Null => return Err(self.throw(method, NULL_POINTER_CLASS, block, at)),
            Rt::Ref(id) => id,
            other => return Err(malformed(format!("array store on {other:?}"))),
        };
        let in_bounds = match self.entry(id)? {
            HeapEntry::Array { length, .. } => {
                usize::try_from(index).ok().filter(|index| index < length)
            }
            HeapEntry::Object { .. } => {
                return Err(malformed("array store on an object".to_string()));
            }
        };
        let Some(index) = in_bounds else {
            return Err(self.throw(method, OUT_OF_BOUNDS_CLASS, block, at));
        };
        if let HeapEntry::Array { cells, .. } = self.entry_mut(id)? {
            cells.insert(index, value);
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn binary(
        &mut self,
        method: &str,
        op: BinaryOp,
        lhs: Rt,
        rhs: Rt,
        block: BlockId,
        index: u32,
    ) -> Result<Rt, Halt> {
        // Boolean logic stays boolean; everything else is integral.
        if let (Rt::Bool(a), Rt::Bool(b)) = (lhs, rhs) {
            return match op {
                BinaryOp::And => Ok(Rt::Bool(a & b)),
                BinaryOp::Or => Ok(Rt::Bool(a | b)),
                BinaryOp::Xor => Ok(Rt::Bool(a ^ b)),
                other => Err(malformed(format!("boolean operands for {other}"))),
            };
        }

        let shift = matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr);
        // The left operand fixes the width of a shift; otherwise a long on
        // either side promotes the operation.
        let wide = matches!(lhs, Rt::Long(_)) || (!shift && matches!(rhs, Rt::Long(_)));
        let l = numeric_rt(lhs)?;
        let r = numeric_rt(rhs)?;

        if matches!(op, BinaryOp::Div | BinaryOp::Rem) && r == 0 {
            return Err(self.throw(method, ARITHMETIC_CLASS, block, index));
        }

        if wide {
            let amount = (r & 0x3f) as u32;
            Ok(Rt::Long(match op {
                BinaryOp::Add => l.wrapping_add(r),
                BinaryOp::Sub => l.wrapping_sub(r),
                BinaryOp::Mul => l.wrapping_mul(r),
                BinaryOp::Div => l.wrapping_div(r),
                BinaryOp::Rem => l.wrapping_rem(r),
                BinaryOp::Shl => l.wrapping_shl(amount),
                BinaryOp::Shr => l.wrapping_shr(amount),
                BinaryOp::Ushr => ((l as u64).wrapping_shr(amount)) as i64,
                BinaryOp::And => l & r,
                BinaryOp::Or => l | r,
                BinaryOp::Xor => l ^ r,
            }))
        } else {
            let a = l as i32;
            let b = r as i32;
            let amount = (b & 0x1f) as u32;
            Ok(Rt::Int(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => a.wrapping_div(b),
                BinaryOp::Rem => a.wrapping_rem(b),
                BinaryOp::Shl => a.wrapping_shl(amount),
                BinaryOp::Shr => a.wrapping_shr(amount),
                BinaryOp::Ushr => ((a as u32).wrapping_shr(amount)) as i32,
                BinaryOp::And => a & b,
                BinaryOp::Or => a | b,
                BinaryOp::Xor => a ^ b,
            }))
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cast(
        &mut self,
        method: &str,
        operand: Rt,
        target: &TypeSig,
        block: BlockId,
        index: u32,
    ) -> Result<Rt, Halt> {
        match target {
            TypeSig::Bool => Ok(Rt::Bool(numeric_rt(operand)? != 0)),
            TypeSig::Int => Ok(Rt::Int(numeric_rt(operand)? as i32)),
            TypeSig::Long => Ok(Rt::Long(numeric_rt(operand)?)),
            TypeSig::Reference(wanted) => match operand {
                Rt::Null => Ok(Rt::Null),
                Rt::Ref(id) => match self.entry(id)? {
                    HeapEntry::Object { class, .. } if class == wanted => Ok(operand),
                    _ => Err(self.throw(method, CLASS_CAST_CLASS, block, index)),
                },
                other => Err(malformed(format!("reference cast of {other:?}"))),
            },
            TypeSig::Array(wanted) => match operand {
                Rt::Null => Ok(Rt::Null),
                Rt::Ref(id) => match self.entry(id)? {
                    HeapEntry::Array { elem, .. } if elem == wanted.as_ref() => Ok(operand),
                    _ => Err(self.throw(method, CLASS_CAST_CLASS, block, index)),
                },
                other => Err(malformed(format!("array cast of {other:?}"))),
            },
        }
    }
}

fn malformed(reason: String) -> Halt {
    Halt::Failed { reason }
}

fn numeric_rt(value: Rt) -> Result<i64, Halt> {
    match value {
        Rt::Bool(b) => Ok(i64::from(b)),
        Rt::Int(i) => Ok(i64::from(i)),
        Rt::Long(l) => Ok(l),
        other => Err(malformed(format!("a non-numeric operand: {other:?}"))),
    }
}

/// Compares two runtime values; references compare by identity.
fn compare(op: CmpOp, lhs: Rt, rhs: Rt) -> Result<bool, Halt> {
    let identity = |value: Rt| match value {
        Rt::Null => Some(0),
        Rt::Ref(id) => Some(id),
        _ => None,
    };
    if let (Some(a), Some(b)) = (identity(lhs), identity(rhs)) {
        return match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            other => Err(malformed(format!("ordered comparison {other} of references"))),
        };
    }

    let a = numeric_rt(lhs)?;
    let b = numeric_rt(rhs)?;
    Ok(match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    })
}
