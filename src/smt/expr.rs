//! This module contains the solver-neutral expression language that queries
//! are encoded in.
//!
//! The language is the quantifier-free fragment over booleans, fixed-width
//! bitvectors, and arrays that the converter needs; every backend consumes
//! this one AST. Expressions are immutable trees shared through [`ExprRef`]
//! and compared structurally. [`fmt::Display`] renders the SMT-LIB2 text of
//! an expression, which the process-based backend sends as-is.

use std::{collections::BTreeMap, fmt, sync::Arc};

/// A shared handle to an expression.
pub type ExprRef = Arc<Expr>;

/// The sort of an expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// The boolean sort.
    Bool,

    /// A bitvector of the provided width.
    BitVec(u32),

    /// An array from `index` to `elem`.
    Array { index: Box<Sort>, elem: Box<Sort> },
}

impl Sort {
    /// Constructs an array sort.
    #[must_use]
    pub fn array_of(index: Sort, elem: Sort) -> Self {
        Self::Array {
            index: Box::new(index),
            elem:  Box::new(elem),
        }
    }

    /// Checks whether this is an array sort.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    /// Gets the bit width of the sort, or [`None`] when it has no width.
    #[must_use]
    pub fn width(&self) -> Option<u32> {
        match self {
            Self::BitVec(width) => Some(*width),
            Self::Bool | Self::Array { .. } => None,
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "Bool"),
            Self::BitVec(width) => write!(f, "(_ BitVec {width})"),
            Self::Array { index, elem } => write!(f, "(Array {index} {elem})"),
        }
    }
}

/// The binary bitvector operators; division and remainder are signed, and
/// three shift shapes mirror the source language.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BvBinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    Shl,
    AShr,
    LShr,
    And,
    Or,
    Xor,
}

impl fmt::Display for BvBinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "bvadd",
            Self::Sub => "bvsub",
            Self::Mul => "bvmul",
            Self::SDiv => "bvsdiv",
            Self::SRem => "bvsrem",
            Self::Shl => "bvshl",
            Self::AShr => "bvashr",
            Self::LShr => "bvlshr",
            Self::And => "bvand",
            Self::Or => "bvor",
            Self::Xor => "bvxor",
        };
        write!(f, "{name}")
    }
}

/// The signed bitvector comparison operators; equality is [`Expr::Eq`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BvCmpOp {
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl fmt::Display for BvCmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Slt => "bvslt",
            Self::Sle => "bvsle",
            Self::Sgt => "bvsgt",
            Self::Sge => "bvsge",
        };
        write!(f, "{name}")
    }
}

/// A solver-neutral expression.
///
/// Bitvector literals carry their two's-complement value sign-extended into
/// an `i64`, so a width-32 literal of `-1` and one of `0xFFFF_FFFF` are the
/// same expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Expr {
    /// A boolean constant.
    BoolLit(bool),

    /// A bitvector constant of the provided width.
    BvLit { value: i64, width: u32 },

    /// A free variable of the provided sort.
    Var { name: String, sort: Sort },

    /// Boolean negation.
    Not(ExprRef),

    /// Boolean conjunction.
    And(Vec<ExprRef>),

    /// Boolean disjunction.
    Or(Vec<ExprRef>),

    /// Equality between two expressions of the same sort.
    Eq { lhs: ExprRef, rhs: ExprRef },

    /// A conditional expression.
    Ite {
        cond: ExprRef,
        then: ExprRef,
        els:  ExprRef,
    },

    /// A binary bitvector operation.
    BvBin {
        op:  BvBinOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },

    /// A signed bitvector comparison.
    BvCmp {
        op:  BvCmpOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },

    /// Two's-complement negation.
    BvNeg(ExprRef),

    /// An array read.
    Select { array: ExprRef, index: ExprRef },

    /// An array write, yielding the updated array.
    Store {
        array: ExprRef,
        index: ExprRef,
        value: ExprRef,
    },

    /// Widening by `by` zero bits.
    ZeroExtend { by: u32, operand: ExprRef },

    /// Widening by `by` copies of the sign bit.
    SignExtend { by: u32, operand: ExprRef },

    /// The bits of `operand` from `low` to `high`, both inclusive.
    Extract {
        high:    u32,
        low:     u32,
        operand: ExprRef,
    },

    /// The bits of `high` followed by the bits of `low`.
    Concat { high: ExprRef, low: ExprRef },
}

impl Expr {
    /// Gets the sort of the expression.
    #[must_use]
    pub fn sort(&self) -> Sort {
        match self {
            Self::BoolLit(_)
            | Self::Not(_)
            | Self::And(_)
            | Self::Or(_)
            | Self::Eq { .. }
            | Self::BvCmp { .. } => Sort::Bool,
            Self::BvLit { width, .. } => Sort::BitVec(*width),
            Self::Var { sort, .. } => sort.clone(),
            Self::Ite { then, .. } => then.sort(),
            Self::BvBin { lhs, .. } => lhs.sort(),
            Self::BvNeg(operand) => operand.sort(),
            Self::Select { array, .. } => match array.sort() {
                Sort::Array { elem, .. } => *elem,
                other => other,
            },
            Self::Store { array, .. } => array.sort(),
            Self::ZeroExtend { by, operand } | Self::SignExtend { by, operand } => {
                Sort::BitVec(operand.sort().width().unwrap_or(0) + by)
            }
            Self::Extract { high, low, .. } => Sort::BitVec(high - low + 1),
            Self::Concat { high, low } => Sort::BitVec(
                high.sort().width().unwrap_or(0) + low.sort().width().unwrap_or(0),
            ),
        }
    }

    /// Adds every free variable of the expression to `vars`.
    pub fn collect_vars(&self, vars: &mut BTreeMap<String, Sort>) {
        match self {
            Self::BoolLit(_) | Self::BvLit { .. } => {}
            Self::Var { name, sort } => {
                vars.insert(name.clone(), sort.clone());
            }
            Self::Not(operand) | Self::BvNeg(operand) => operand.collect_vars(vars),
            Self::And(operands) | Self::Or(operands) => {
                for operand in operands {
                    operand.collect_vars(vars);
                }
            }
            Self::Eq { lhs, rhs }
            | Self::BvBin { lhs, rhs, .. }
            | Self::BvCmp { lhs, rhs, .. }
            | Self::Concat {
                high: lhs,
                low: rhs,
            } => {
                lhs.collect_vars(vars);
                rhs.collect_vars(vars);
            }
            Self::Ite { cond, then, els } => {
                cond.collect_vars(vars);
                then.collect_vars(vars);
                els.collect_vars(vars);
            }
            Self::Select { array, index } => {
                array.collect_vars(vars);
                index.collect_vars(vars);
            }
            Self::Store {
                array,
                index,
                value,
            } => {
                array.collect_vars(vars);
                index.collect_vars(vars);
                value.collect_vars(vars);
            }
            Self::ZeroExtend { operand, .. }
            | Self::SignExtend { operand, .. }
            | Self::Extract { operand, .. } => operand.collect_vars(vars),
        }
    }

    /// Constructs a boolean constant.
    #[must_use]
    pub fn bool_lit(value: bool) -> ExprRef {
        Arc::new(Self::BoolLit(value))
    }

    /// Constructs a bitvector constant.
    #[must_use]
    pub fn bv(value: i64, width: u32) -> ExprRef {
        Arc::new(Self::BvLit { value, width })
    }

    /// Constructs a free variable.
    #[must_use]
    pub fn var(name: impl Into<String>, sort: Sort) -> ExprRef {
        Arc::new(Self::Var {
            name: name.into(),
            sort,
        })
    }

    /// Constructs a boolean negation.
    #[must_use]
    pub fn not(operand: ExprRef) -> ExprRef {
        Arc::new(Self::Not(operand))
    }

    /// Constructs a conjunction; an empty conjunction is `true` and a
    /// singleton is its only operand.
    #[must_use]
    pub fn and(mut operands: Vec<ExprRef>) -> ExprRef {
        match operands.len() {
            0 => Self::bool_lit(true),
            1 => operands.remove(0),
            _ => Arc::new(Self::And(operands)),
        }
    }

    /// Constructs a disjunction; an empty disjunction is `false` and a
    /// singleton is its only operand.
    #[must_use]
    pub fn or(mut operands: Vec<ExprRef>) -> ExprRef {
        match operands.len() {
            0 => Self::bool_lit(false),
            1 => operands.remove(0),
            _ => Arc::new(Self::Or(operands)),
        }
    }

    /// Constructs an equality.
    #[must_use]
    pub fn eq(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::Eq { lhs, rhs })
    }

    /// Constructs a conditional expression.
    #[must_use]
    pub fn ite(cond: ExprRef, then: ExprRef, els: ExprRef) -> ExprRef {
        Arc::new(Self::Ite { cond, then, els })
    }

    /// Constructs a binary bitvector operation.
    #[must_use]
    pub fn bv_bin(op: BvBinOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::BvBin { op, lhs, rhs })
    }

    /// Constructs a signed bitvector comparison.
    #[must_use]
    pub fn bv_cmp(op: BvCmpOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::BvCmp { op, lhs, rhs })
    }

    /// Constructs a two's-complement negation.
    #[must_use]
    pub fn bv_neg(operand: ExprRef) -> ExprRef {
        Arc::new(Self::BvNeg(operand))
    }

    /// Constructs an array read.
    #[must_use]
    pub fn select(array: ExprRef, index: ExprRef) -> ExprRef {
        Arc::new(Self::Select { array, index })
    }

    /// Constructs an array write.
    #[must_use]
    pub fn store(array: ExprRef, index: ExprRef, value: ExprRef) -> ExprRef {
        Arc::new(Self::Store {
            array,
            index,
            value,
        })
    }

    /// Constructs a zero extension; extending by zero bits is the identity.
    #[must_use]
    pub fn zero_extend(by: u32, operand: ExprRef) -> ExprRef {
        if by == 0 {
            return operand;
        }
        Arc::new(Self::ZeroExtend { by, operand })
    }

    /// Constructs a sign extension; extending by zero bits is the identity.
    #[must_use]
    pub fn sign_extend(by: u32, operand: ExprRef) -> ExprRef {
        if by == 0 {
            return operand;
        }
        Arc::new(Self::SignExtend { by, operand })
    }

    /// Constructs a bit extraction.
    #[must_use]
    pub fn extract(high: u32, low: u32, operand: ExprRef) -> ExprRef {
        Arc::new(Self::Extract { high, low, operand })
    }

    /// Constructs a concatenation.
    #[must_use]
    pub fn concat(high: ExprRef, low: ExprRef) -> ExprRef {
        Arc::new(Self::Concat { high, low })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BoolLit(value) => write!(f, "{value}"),
            Self::BvLit { value, width } => {
                let unsigned = unsigned_bits(*value, *width);
                write!(f, "(_ bv{unsigned} {width})")
            }
            Self::Var { name, .. } => write!(f, "|{name}|"),
            Self::Not(operand) => write!(f, "(not {operand})"),
            Self::And(operands) => write_nary(f, "and", operands),
            Self::Or(operands) => write_nary(f, "or", operands),
            Self::Eq { lhs, rhs } => write!(f, "(= {lhs} {rhs})"),
            Self::Ite { cond, then, els } => write!(f, "(ite {cond} {then} {els})"),
            Self::BvBin { op, lhs, rhs } => write!(f, "({op} {lhs} {rhs})"),
            Self::BvCmp { op, lhs, rhs } => write!(f, "({op} {lhs} {rhs})"),
            Self::BvNeg(operand) => write!(f, "(bvneg {operand})"),
            Self::Select { array, index } => write!(f, "(select {array} {index})"),
            Self::Store {
                array,
                index,
                value,
            } => write!(f, "(store {array} {index} {value})"),
            Self::ZeroExtend { by, operand } => write!(f, "((_ zero_extend {by}) {operand})"),
            Self::SignExtend { by, operand } => write!(f, "((_ sign_extend {by}) {operand})"),
            Self::Extract { high, low, operand } => {
                write!(f, "((_ extract {high} {low}) {operand})")
            }
            Self::Concat { high, low } => write!(f, "(concat {high} {low})"),
        }
    }
}

/// Writes an n-ary boolean connective, degenerating to its unit when empty.
fn write_nary(f: &mut fmt::Formatter<'_>, name: &str, operands: &[ExprRef]) -> fmt::Result {
    match operands {
        [] => write!(f, "{}", name == "and"),
        [only] => write!(f, "{only}"),
        _ => {
            write!(f, "({name}")?;
            for operand in operands {
                write!(f, " {operand}")?;
            }
            write!(f, ")")
        }
    }
}

/// Gets the low `width` bits of `value` as an unsigned number.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn unsigned_bits(value: i64, width: u32) -> u64 {
    let bits = value as u64;
    if width >= 64 {
        bits
    } else {
        bits & ((1u64 << width) - 1)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use crate::smt::expr::{BvCmpOp, Expr, Sort};

    #[test]
    fn display_renders_smtlib() {
        let cmp = Expr::bv_cmp(
            BvCmpOp::Sgt,
            Expr::var("arg$0", Sort::BitVec(32)),
            Expr::bv(0, 32),
        );

        assert_eq!(cmp.to_string(), "(bvsgt |arg$0| (_ bv0 32))");
    }

    #[test]
    fn negative_literals_render_as_two_complement_bits() {
        assert_eq!(Expr::bv(-1, 32).to_string(), "(_ bv4294967295 32)");
    }

    #[test]
    fn extension_widens_the_sort() {
        let extended = Expr::sign_extend(32, Expr::var("x", Sort::BitVec(32)));

        assert_eq!(extended.sort(), Sort::BitVec(64));
    }

    #[test]
    fn empty_connectives_collapse_to_their_unit() {
        assert_eq!(Expr::and(vec![]).as_ref(), &Expr::BoolLit(true));
        assert_eq!(Expr::or(vec![]).as_ref(), &Expr::BoolLit(false));
    }

    #[test]
    fn variables_are_collected_with_their_sorts() {
        let expr = Expr::eq(
            Expr::select(
                Expr::var(
                    "lengths",
                    Sort::array_of(Sort::BitVec(32), Sort::BitVec(32)),
                ),
                Expr::var("arg$0", Sort::BitVec(32)),
            ),
            Expr::bv(3, 32),
        );

        let mut vars = BTreeMap::new();
        expr.collect_vars(&mut vars);

        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("arg$0"), Some(&Sort::BitVec(32)));
    }
}
