//! This module contains the in-memory model of the methods under analysis.
//!
//! The model is a JVM-shaped control-flow graph: a [`Method`] is a list of
//! [`BasicBlock`]s holding [`Instruction`]s and ending in a [`Terminator`].
//! It is deliberately small; it exists to be _populated_ by an external
//! bytecode front end (via [`MethodBuilder`]) rather than to be a faithful
//! rendition of the class-file format. All analysis in this crate operates
//! on this model alone.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::error::graph;

/// A basic block identifier, indexing into [`Method::blocks`].
pub type BlockId = usize;

/// A method identifier, indexing into [`Program::methods`].
pub type MethodId = usize;

/// A local value identifier within one method.
///
/// Locals are single-assignment at the model level: each value-producing
/// instruction defines exactly one local, and loops redefine locals through
/// [`Instruction::Phi`] nodes at block entry.
pub type LocalId = u32;

/// The type of a value in the method model.
///
/// Types serialize so that recovered inputs, which carry the element types
/// of their arrays, can cross a process boundary.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum TypeSig {
    /// The JVM `boolean` type.
    Bool,

    /// The JVM `int` type, covering the smaller integral types as well.
    Int,

    /// The JVM `long` type.
    Long,

    /// A reference to an instance of the named class.
    Reference(String),

    /// An array with the provided element type.
    Array(Box<TypeSig>),
}

impl TypeSig {
    /// Checks whether values of this type live on the heap.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_) | Self::Array(_))
    }

    /// Constructs an array type over the provided element type.
    #[must_use]
    pub fn array_of(elem: TypeSig) -> Self {
        Self::Array(Box::new(elem))
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "boolean"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Reference(class) => write!(f, "{class}"),
            Self::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

/// A reference to an instance or static field.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FieldRef {
    /// The class that declares the field.
    pub class: String,

    /// The field's name within its class.
    pub name: String,

    /// The field's declared type.
    pub ty: TypeSig,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

/// A compile-time constant operand.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Const {
    /// A boolean constant.
    Bool(bool),

    /// An `int` constant.
    Int(i32),

    /// A `long` constant.
    Long(i64),

    /// The `null` reference.
    Null,
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Long(l) => write!(f, "{l}L"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// An operand of an instruction.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Value {
    /// The receiver of the method, when it has one.
    This,

    /// The argument at the provided position.
    Arg(u16),

    /// The local defined by an earlier instruction.
    Local(LocalId),

    /// An inline constant.
    Const(Const),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::This => write!(f, "this"),
            Self::Arg(index) => write!(f, "arg${index}"),
            Self::Local(local) => write!(f, "%{local}"),
            Self::Const(constant) => write!(f, "{constant}"),
        }
    }
}

/// The binary arithmetic and bitwise operators.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Ushr => ">>>",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        };
        write!(f, "{symbol}")
    }
}

/// The comparison operators, each producing a boolean.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        write!(f, "{symbol}")
    }
}

/// The unary operators.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,

    /// The length of an array.
    Length,
}

/// A non-terminating instruction within a basic block.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Instruction {
    /// Reads `array[index]` into `result`.
    ArrayLoad {
        result: LocalId,
        array:  Value,
        index:  Value,
    },

    /// Writes `value` into `array[index]`.
    ArrayStore {
        array: Value,
        index: Value,
        value: Value,
    },

    /// Applies the binary operator `op` to `lhs` and `rhs`.
    Binary {
        result: LocalId,
        op:     BinaryOp,
        lhs:    Value,
        rhs:    Value,
    },

    /// Applies the unary operator `op` to `operand`.
    Unary {
        result:  LocalId,
        op:      UnaryOp,
        operand: Value,
    },

    /// Converts `operand` to the `target` type.
    Cast {
        result:  LocalId,
        operand: Value,
        target:  TypeSig,
    },

    /// Compares `lhs` against `rhs`, producing a boolean.
    Cmp {
        result: LocalId,
        op:     CmpOp,
        lhs:    Value,
        rhs:    Value,
    },

    /// Reads the field `field` of `object` (or the static field when no
    /// object is present) into `result`.
    FieldLoad {
        result: LocalId,
        object: Option<Value>,
        field:  FieldRef,
    },

    /// Writes `value` into the field `field` of `object` (or the static
    /// field when no object is present).
    FieldStore {
        object: Option<Value>,
        field:  FieldRef,
        value:  Value,
    },

    /// Tests whether `operand` is a non-null instance of `target`.
    InstanceOf {
        result:  LocalId,
        operand: Value,
        target:  TypeSig,
    },

    /// Allocates a new instance of `class`.
    New { result: LocalId, class: String },

    /// Allocates a new array of `elem` with the provided `length`.
    NewArray {
        result: LocalId,
        elem:   TypeSig,
        length: Value,
    },

    /// Merges the values flowing in from each predecessor block.
    Phi {
        result:   LocalId,
        incoming: Vec<(BlockId, Value)>,
    },

    /// Invokes `method`, binding its return value to `result` when one is
    /// expected.
    Call {
        result:   Option<LocalId>,
        method:   String,
        receiver: Option<Value>,
        args:     Vec<Value>,
    },
}

impl Instruction {
    /// Gets the local that this instruction defines, if it defines one.
    #[must_use]
    pub fn result(&self) -> Option<LocalId> {
        match self {
            Self::ArrayLoad { result, .. }
            | Self::Binary { result, .. }
            | Self::Unary { result, .. }
            | Self::Cast { result, .. }
            | Self::Cmp { result, .. }
            | Self::FieldLoad { result, .. }
            | Self::InstanceOf { result, .. }
            | Self::New { result, .. }
            | Self::NewArray { result, .. }
            | Self::Phi { result, .. } => Some(*result),
            Self::Call { result, .. } => *result,
            Self::ArrayStore { .. } | Self::FieldStore { .. } => None,
        }
    }
}

/// The instruction that ends a basic block.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Terminator {
    /// Unconditionally continues at `target`.
    Jump { target: BlockId },

    /// Continues at `on_true` or `on_false` depending on `cond`.
    Branch {
        cond:     Value,
        on_true:  BlockId,
        on_false: BlockId,
    },

    /// A lookup switch over `key` with explicit case values.
    Switch {
        key:     Value,
        cases:   Vec<(i64, BlockId)>,
        default: BlockId,
    },

    /// A table switch over `key` covering the contiguous value range
    /// starting at `low`.
    TableSwitch {
        key:     Value,
        low:     i64,
        targets: Vec<BlockId>,
        default: BlockId,
    },

    /// Returns from the method, with a value when the method has one.
    Return { value: Option<Value> },

    /// Throws the provided exception reference.
    Throw { exception: Value },

    /// Control can never reach this point.
    Unreachable,
}

impl Terminator {
    /// Gets the blocks that control flow may continue at after this
    /// terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Jump { target } => vec![*target],
            Self::Branch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            Self::Switch { cases, default, .. } => {
                let mut succs: Vec<BlockId> = cases.iter().map(|(_, block)| *block).collect();
                succs.push(*default);
                succs
            }
            Self::TableSwitch {
                targets, default, ..
            } => {
                let mut succs = targets.clone();
                succs.push(*default);
                succs
            }
            Self::Return { .. } | Self::Throw { .. } | Self::Unreachable => vec![],
        }
    }
}

/// A basic block: straight-line instructions followed by one terminator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BasicBlock {
    instructions: Vec<Instruction>,
    terminator:   Terminator,
}

impl BasicBlock {
    /// Gets the straight-line instructions of the block.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Gets the terminator of the block.
    #[must_use]
    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    /// Gets the phi instructions of the block, which by construction sit at
    /// its start.
    pub fn phis(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions
            .iter()
            .take_while(|inst| matches!(inst, Instruction::Phi { .. }))
    }
}

/// The position of one instruction within a [`Program`].
///
/// An `index` equal to the instruction count of the block denotes the
/// block's terminator.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstLoc {
    /// The method the instruction belongs to.
    pub method: MethodId,

    /// The block within the method.
    pub block: BlockId,

    /// The index within the block.
    pub index: u32,
}

impl InstLoc {
    /// Constructs a new instruction location.
    #[must_use]
    pub fn new(method: MethodId, block: BlockId, index: u32) -> Self {
        Self {
            method,
            block,
            index,
        }
    }
}

impl fmt::Display for InstLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}:%bb{}#{}", self.method, self.block, self.index)
    }
}

/// A method under analysis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Method {
    name:         String,
    params:       Vec<TypeSig>,
    ret:          Option<TypeSig>,
    blocks:       Vec<BasicBlock>,
    preds:        Vec<Vec<BlockId>>,
    catch_blocks: BTreeSet<BlockId>,
    locals:       Vec<TypeSig>,
    receiver:     Option<String>,
}

impl Method {
    /// Gets the method's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the method's parameter types.
    #[must_use]
    pub fn params(&self) -> &[TypeSig] {
        &self.params
    }

    /// Gets the method's return type, or [`None`] for `void`.
    #[must_use]
    pub fn ret(&self) -> Option<&TypeSig> {
        self.ret.as_ref()
    }

    /// Gets the class of the method's receiver (`this`), or [`None`] for a
    /// static method.
    #[must_use]
    pub fn receiver(&self) -> Option<&str> {
        self.receiver.as_deref()
    }

    /// Gets the method's basic blocks; the entry block is block `0`.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Gets the block with the provided `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of bounds. Block identifiers handed out by
    /// [`MethodBuilder`] are always in bounds.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    /// Gets the entry block identifier.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        0
    }

    /// Gets the predecessors of the block with the provided `id`.
    #[must_use]
    pub fn preds(&self, id: BlockId) -> &[BlockId] {
        &self.preds[id]
    }

    /// Checks whether the block with the provided `id` is an exception
    /// handler.
    #[must_use]
    pub fn is_catch(&self, id: BlockId) -> bool {
        self.catch_blocks.contains(&id)
    }

    /// Gets the declared type of the provided local.
    #[must_use]
    pub fn local_ty(&self, local: LocalId) -> &TypeSig {
        &self.locals[local as usize]
    }

    /// Gets the instruction at the provided block and index, or [`None`]
    /// when the index denotes the terminator or is out of bounds.
    #[must_use]
    pub fn instruction(&self, block: BlockId, index: u32) -> Option<&Instruction> {
        self.blocks.get(block)?.instructions.get(index as usize)
    }

    /// Gets the location of the terminator of the provided block within the
    /// method identified by `method`.
    #[must_use]
    pub fn terminator_loc(&self, method: MethodId, block: BlockId) -> InstLoc {
        let index = u32::try_from(self.blocks[block].instructions.len()).unwrap_or(u32::MAX);
        InstLoc::new(method, block, index)
    }
}

/// A collection of methods closed under the calls the analysis may inline.
#[derive(Clone, Debug)]
pub struct Program {
    methods: Vec<Method>,
    index:   HashMap<String, MethodId>,
}

impl Program {
    /// Constructs a new program over the provided `methods`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if two methods share a name; call targets are looked
    /// up by name, so names must be unique.
    pub fn new(methods: Vec<Method>) -> Result<Self, graph::Error> {
        let mut index = HashMap::new();
        for (id, method) in methods.iter().enumerate() {
            if index.insert(method.name.clone(), id).is_some() {
                return Err(graph::Error::DuplicateMethod {
                    name: method.name.clone(),
                });
            }
        }
        Ok(Self { methods, index })
    }

    /// Gets the method with the provided identifier.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of bounds. Identifiers obtained from
    /// [`Self::by_name`] are always in bounds.
    #[must_use]
    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id]
    }

    /// Looks a method up by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<MethodId> {
        self.index.get(name).copied()
    }

    /// Gets all methods with their identifiers.
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &Method)> {
        self.methods.iter().enumerate()
    }
}

/// A fluent builder for [`Method`]s, intended for bytecode front ends and
/// tests.
///
/// Blocks are declared up front with [`Self::block`] so they can be referred
/// to before being filled in; [`Self::finish`] validates the result.
#[derive(Clone, Debug)]
pub struct MethodBuilder {
    name:         String,
    params:       Vec<TypeSig>,
    ret:          Option<TypeSig>,
    blocks:       Vec<(Vec<Instruction>, Option<Terminator>)>,
    locals:       Vec<TypeSig>,
    catch_blocks: BTreeSet<BlockId>,
    receiver:     Option<String>,
}

impl MethodBuilder {
    /// Constructs a builder for a static method with the provided signature.
    pub fn new(
        name: impl Into<String>,
        params: impl Into<Vec<TypeSig>>,
        ret: Option<TypeSig>,
    ) -> Self {
        Self {
            name: name.into(),
            params: params.into(),
            ret,
            blocks: Vec::new(),
            locals: Vec::new(),
            catch_blocks: BTreeSet::new(),
            receiver: None,
        }
    }

    /// Marks the method as taking a receiver (`this`) of the provided class.
    #[must_use]
    pub fn with_receiver(mut self, class: impl Into<String>) -> Self {
        self.receiver = Some(class.into());
        self
    }

    /// Declares a new, empty block and returns its identifier.
    ///
    /// The first declared block is the method's entry block.
    pub fn block(&mut self) -> BlockId {
        self.blocks.push((Vec::new(), None));
        self.blocks.len() - 1
    }

    /// Declares a new local of the provided type and returns its identifier.
    pub fn local(&mut self, ty: TypeSig) -> LocalId {
        self.locals.push(ty);
        u32::try_from(self.locals.len() - 1).unwrap_or(u32::MAX)
    }

    /// Appends `inst` to the provided block.
    ///
    /// # Panics
    ///
    /// Panics if `block` has not been declared with [`Self::block`].
    pub fn push(&mut self, block: BlockId, inst: Instruction) {
        self.blocks[block].0.push(inst);
    }

    /// Sets the terminator of the provided block.
    ///
    /// # Panics
    ///
    /// Panics if `block` has not been declared with [`Self::block`].
    pub fn terminate(&mut self, block: BlockId, terminator: Terminator) {
        self.blocks[block].1 = Some(terminator);
    }

    /// Marks the provided block as an exception handler.
    pub fn mark_catch(&mut self, block: BlockId) {
        self.catch_blocks.insert(block);
    }

    /// Validates the accumulated blocks and produces the method.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the method has no blocks, if any block lacks a
    /// terminator, or if any terminator or phi refers to an undeclared
    /// block.
    pub fn finish(self) -> Result<Method, graph::Error> {
        if self.blocks.is_empty() {
            return Err(graph::Error::EmptyMethod {
                name: self.name.clone(),
            });
        }

        let block_count = self.blocks.len();
        let mut blocks = Vec::with_capacity(block_count);
        for (id, (instructions, terminator)) in self.blocks.into_iter().enumerate() {
            let Some(terminator) = terminator else {
                return Err(graph::Error::MissingTerminator { block: id });
            };
            for target in terminator.successors() {
                if target >= block_count {
                    return Err(graph::Error::InvalidBlockReference { block: id, target });
                }
            }
            for inst in &instructions {
                if let Instruction::Phi { incoming, .. } = inst {
                    for (pred, _) in incoming {
                        if *pred >= block_count {
                            return Err(graph::Error::InvalidBlockReference {
                                block:  id,
                                target: *pred,
                            });
                        }
                    }
                }
            }
            blocks.push(BasicBlock {
                instructions,
                terminator,
            });
        }

        // Predecessors are derived once, here, so queries against the
        // finished method are cheap.
        let mut preds = vec![Vec::new(); block_count];
        for (id, block) in blocks.iter().enumerate() {
            for succ in block.terminator.successors() {
                if !preds[succ].contains(&id) {
                    preds[succ].push(id);
                }
            }
        }

        Ok(Method {
            name: self.name,
            params: self.params,
            ret: self.ret,
            blocks,
            preds,
            catch_blocks: self.catch_blocks,
            locals: self.locals,
            receiver: self.receiver,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::ir::{
        CmpOp,
        Const,
        Instruction,
        MethodBuilder,
        Program,
        Terminator,
        TypeSig,
        Value,
    };

    /// Builds `f(x) { if (x > 0) return 1; else return -1; }`.
    fn branching_method() -> anyhow::Result<crate::ir::Method> {
        let mut b = MethodBuilder::new("f", [TypeSig::Int], Some(TypeSig::Int));
        let entry = b.block();
        let then = b.block();
        let els = b.block();

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
                on_true:  then,
                on_false: els,
            },
        );
        b.terminate(
            then,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(1))),
            },
        );
        b.terminate(
            els,
            Terminator::Return {
                value: Some(Value::Const(Const::Int(-1))),
            },
        );

        Ok(b.finish()?)
    }

    #[test]
    fn builder_computes_predecessors() -> anyhow::Result<()> {
        let method = branching_method()?;

        assert_eq!(method.preds(0), &[] as &[usize]);
        assert_eq!(method.preds(1), &[0]);
        assert_eq!(method.preds(2), &[0]);

        Ok(())
    }

    #[test]
    fn builder_rejects_unterminated_blocks() {
        let mut b = MethodBuilder::new("broken", [], None);
        let _ = b.block();

        assert!(b.finish().is_err());
    }

    #[test]
    fn builder_rejects_out_of_bounds_targets() {
        let mut b = MethodBuilder::new("broken", [], None);
        let entry = b.block();
        b.terminate(entry, Terminator::Jump { target: 7 });

        assert!(b.finish().is_err());
    }

    #[test]
    fn program_rejects_duplicate_names() -> anyhow::Result<()> {
        let first = branching_method()?;
        let second = branching_method()?;

        assert!(Program::new(vec![first, second]).is_err());

        Ok(())
    }

    #[test]
    fn program_resolves_methods_by_name() -> anyhow::Result<()> {
        let program = Program::new(vec![branching_method()?])?;
        let id = program.by_name("f").expect("method should be present");

        assert_eq!(program.method(id).name(), "f");
        assert_eq!(program.method(id).params(), &[TypeSig::Int]);

        Ok(())
    }
}
