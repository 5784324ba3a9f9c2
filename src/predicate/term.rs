//! This module contains the term language over which predicates are written.
//!
//! Terms are immutable expression trees shared through [`TermRef`]. They
//! mirror the value-producing operations of the method model, with two
//! additions that only exist symbolically: generated values (the `%t<n>`
//! names handed out while translating) and phi terms that stand for a merge
//! of control-flow paths.

use std::{fmt, sync::Arc};

use crate::ir::{BinaryOp, CmpOp, Const, FieldRef, TypeSig};

/// A shared handle to a term.
///
/// Terms are compared structurally, so two handles to equal trees are
/// interchangeable even when they do not share an allocation.
pub type TermRef = Arc<Term>;

/// A symbolic value.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Term {
    /// The receiver of the method under analysis.
    This { ty: TypeSig },

    /// The formal argument at `index` of the method under analysis.
    Arg { index: u16, ty: TypeSig },

    /// A generated symbolic value, named `%t<n>` by its builder.
    Value { name: String, ty: TypeSig },

    /// A constant.
    Const(Const),

    /// A binary arithmetic or bitwise operation.
    Binary {
        op:  BinaryOp,
        lhs: TermRef,
        rhs: TermRef,
        ty:  TypeSig,
    },

    /// A comparison, producing a boolean.
    Cmp {
        op:  CmpOp,
        lhs: TermRef,
        rhs: TermRef,
    },

    /// Arithmetic negation.
    Neg { operand: TermRef, ty: TypeSig },

    /// The length of an array.
    ArrayLength { array: TermRef },

    /// A conversion of `operand` to the `target` type.
    Cast { operand: TermRef, target: TypeSig },

    /// The element of `array` at `index`.
    ArrayLoad {
        array: TermRef,
        index: TermRef,
        ty:    TypeSig,
    },

    /// The value of `field` on `object`, or of the static field when no
    /// object is present.
    FieldLoad {
        object: Option<TermRef>,
        field:  FieldRef,
    },

    /// A type test of `operand` against `target`, producing a boolean.
    InstanceOf { operand: TermRef, target: TypeSig },

    /// The result of a call that has not been inlined.
    Call {
        method:   String,
        receiver: Option<TermRef>,
        args:     Vec<TermRef>,
        ty:       TypeSig,
    },

    /// A merge of the values flowing in from several control-flow paths.
    Phi { merged: Vec<TermRef>, ty: TypeSig },
}

impl Term {
    /// Gets the type of the value this term denotes.
    #[must_use]
    pub fn ty(&self) -> TypeSig {
        match self {
            Self::This { ty }
            | Self::Arg { ty, .. }
            | Self::Value { ty, .. }
            | Self::Binary { ty, .. }
            | Self::Neg { ty, .. }
            | Self::ArrayLoad { ty, .. }
            | Self::Call { ty, .. }
            | Self::Phi { ty, .. } => ty.clone(),
            Self::Const(constant) => match constant {
                Const::Bool(_) => TypeSig::Bool,
                Const::Int(_) => TypeSig::Int,
                Const::Long(_) => TypeSig::Long,
                Const::Null => TypeSig::Reference("null".into()),
            },
            Self::Cmp { .. } | Self::InstanceOf { .. } => TypeSig::Bool,
            Self::ArrayLength { .. } => TypeSig::Int,
            Self::Cast { target, .. } => target.clone(),
            Self::FieldLoad { field, .. } => field.ty.clone(),
        }
    }

    /// Checks whether this term is a compile-time constant.
    #[must_use]
    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const(_))
    }

    /// Constructs the receiver term.
    #[must_use]
    pub fn this(ty: TypeSig) -> TermRef {
        Arc::new(Self::This { ty })
    }

    /// Constructs the term for the formal argument at `index`.
    #[must_use]
    pub fn arg(index: u16, ty: TypeSig) -> TermRef {
        Arc::new(Self::Arg { index, ty })
    }

    /// Constructs a generated value term with the provided `name`.
    #[must_use]
    pub fn value(name: impl Into<String>, ty: TypeSig) -> TermRef {
        Arc::new(Self::Value {
            name: name.into(),
            ty,
        })
    }

    /// Constructs a constant term.
    #[must_use]
    pub fn constant(constant: Const) -> TermRef {
        Arc::new(Self::Const(constant))
    }

    /// Constructs a boolean constant term.
    #[must_use]
    pub fn bool(value: bool) -> TermRef {
        Self::constant(Const::Bool(value))
    }

    /// Constructs an `int` constant term.
    #[must_use]
    pub fn int(value: i32) -> TermRef {
        Self::constant(Const::Int(value))
    }

    /// Constructs a `long` constant term.
    #[must_use]
    pub fn long(value: i64) -> TermRef {
        Self::constant(Const::Long(value))
    }

    /// Constructs the `null` constant term.
    #[must_use]
    pub fn null() -> TermRef {
        Self::constant(Const::Null)
    }

    /// Constructs an integer constant matching the width of `ty`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn int_of(ty: &TypeSig, value: i64) -> TermRef {
        match ty {
            TypeSig::Long => Self::long(value),
            _ => Self::int(value as i32),
        }
    }

    /// Constructs a binary operation term; the result type follows the left
    /// operand.
    #[must_use]
    pub fn binary(op: BinaryOp, lhs: TermRef, rhs: TermRef) -> TermRef {
        let ty = lhs.ty();
        Arc::new(Self::Binary { op, lhs, rhs, ty })
    }

    /// Constructs a comparison term.
    #[must_use]
    pub fn cmp(op: CmpOp, lhs: TermRef, rhs: TermRef) -> TermRef {
        Arc::new(Self::Cmp { op, lhs, rhs })
    }

    /// Constructs an arithmetic negation term.
    #[must_use]
    pub fn neg(operand: TermRef) -> TermRef {
        let ty = operand.ty();
        Arc::new(Self::Neg { operand, ty })
    }

    /// Constructs an array length term.
    #[must_use]
    pub fn array_length(array: TermRef) -> TermRef {
        Arc::new(Self::ArrayLength { array })
    }

    /// Constructs a conversion term.
    #[must_use]
    pub fn cast(operand: TermRef, target: TypeSig) -> TermRef {
        Arc::new(Self::Cast { operand, target })
    }

    /// Constructs an array element term; the element type is derived from
    /// the array's type.
    #[must_use]
    pub fn array_load(array: TermRef, index: TermRef) -> TermRef {
        let ty = match array.ty() {
            TypeSig::Array(elem) => *elem,
            _ => TypeSig::Int,
        };
        Arc::new(Self::ArrayLoad { array, index, ty })
    }

    /// Constructs a field value term.
    #[must_use]
    pub fn field_load(object: Option<TermRef>, field: FieldRef) -> TermRef {
        Arc::new(Self::FieldLoad { object, field })
    }

    /// Constructs a type test term.
    #[must_use]
    pub fn instance_of(operand: TermRef, target: TypeSig) -> TermRef {
        Arc::new(Self::InstanceOf { operand, target })
    }

    /// Constructs a term for the result of an un-inlined call.
    #[must_use]
    pub fn call(
        method: impl Into<String>,
        receiver: Option<TermRef>,
        args: Vec<TermRef>,
        ty: TypeSig,
    ) -> TermRef {
        Arc::new(Self::Call {
            method: method.into(),
            receiver,
            args,
            ty,
        })
    }

    /// Constructs a merge term over the provided incoming values.
    #[must_use]
    pub fn phi(merged: Vec<TermRef>, ty: TypeSig) -> TermRef {
        Arc::new(Self::Phi { merged, ty })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::This { .. } => write!(f, "this"),
            Self::Arg { index, .. } => write!(f, "arg${index}"),
            Self::Value { name, .. } => write!(f, "{name}"),
            Self::Const(constant) => write!(f, "{constant}"),
            Self::Binary { op, lhs, rhs, .. } => write!(f, "({lhs} {op} {rhs})"),
            Self::Cmp { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Self::Neg { operand, .. } => write!(f, "-({operand})"),
            Self::ArrayLength { array } => write!(f, "length({array})"),
            Self::Cast { operand, target } => write!(f, "({target}) {operand}"),
            Self::ArrayLoad { array, index, .. } => write!(f, "{array}[{index}]"),
            Self::FieldLoad { object, field } => match object {
                Some(object) => write!(f, "{object}.{}", field.name),
                None => write!(f, "{field}"),
            },
            Self::InstanceOf { operand, target } => write!(f, "({operand} instanceof {target})"),
            Self::Call {
                method,
                receiver,
                args,
                ..
            } => {
                if let Some(receiver) = receiver {
                    write!(f, "{receiver}.")?;
                }
                write!(f, "{method}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::Phi { merged, .. } => {
                write!(f, "phi(")?;
                for (i, value) in merged.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ir::{CmpOp, TypeSig},
        predicate::term::Term,
    };

    #[test]
    fn comparisons_are_boolean() {
        let term = Term::cmp(CmpOp::Gt, Term::arg(0, TypeSig::Int), Term::int(0));

        assert_eq!(term.ty(), TypeSig::Bool);
    }

    #[test]
    fn array_loads_take_the_element_type() {
        let array = Term::arg(0, TypeSig::array_of(TypeSig::Long));
        let term = Term::array_load(array, Term::int(1));

        assert_eq!(term.ty(), TypeSig::Long);
    }

    #[test]
    fn structural_equality_ignores_sharing() {
        let a = Term::cmp(CmpOp::Eq, Term::arg(0, TypeSig::Int), Term::int(3));
        let b = Term::cmp(CmpOp::Eq, Term::arg(0, TypeSig::Int), Term::int(3));

        assert_eq!(a, b);
    }

    #[test]
    fn display_is_readable() {
        let term = Term::cmp(CmpOp::Gt, Term::arg(0, TypeSig::Int), Term::int(0));

        assert_eq!(term.to_string(), "(arg$0 > 0)");
    }
}
