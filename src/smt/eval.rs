//! This module contains the expression evaluator used for model recovery and
//! by the built-in probing solver.
//!
//! Evaluation happens under a scalar/array [`Assignment`]; variables absent
//! from the assignment take the default of their sort, which realises the
//! rule that unconstrained values recover as defaults. Array reads walk
//! store chains structurally before falling back to the base variable's
//! assigned entries.

use crate::{
    error::solver,
    smt::{
        backend::{ArrayValue, Assignment, ScalarValue},
        expr::{unsigned_bits, BvBinOp, BvCmpOp, Expr, ExprRef, Sort},
    },
};

/// A value an expression evaluates to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    /// A scalar.
    Scalar(ScalarValue),

    /// An array.
    Array(ArrayValue),
}

/// Evaluates expressions under one assignment.
#[derive(Clone, Copy, Debug)]
pub struct Evaluator<'a> {
    assignment: &'a Assignment,
}

impl<'a> Evaluator<'a> {
    /// Constructs an evaluator over the provided assignment.
    #[must_use]
    pub fn new(assignment: &'a Assignment) -> Self {
        Self { assignment }
    }

    /// Evaluates the expression.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the expression mixes sorts in a way the language
    /// does not define, such as equality between arrays.
    pub fn eval(&self, expr: &ExprRef) -> Result<Value, solver::Error> {
        match expr.as_ref() {
            Expr::BoolLit(value) => Ok(Value::Scalar(ScalarValue::Bool(*value))),
            Expr::BvLit { value, width } => Ok(Value::Scalar(bits(*value, *width))),
            Expr::Var { name, sort } => Ok(self.var(name, sort)),
            Expr::Not(operand) => Ok(Value::Scalar(ScalarValue::Bool(!self.truthy(operand)?))),
            Expr::And(operands) => {
                let mut result = true;
                for operand in operands {
                    result &= self.truthy(operand)?;
                }
                Ok(Value::Scalar(ScalarValue::Bool(result)))
            }
            Expr::Or(operands) => {
                let mut result = false;
                for operand in operands {
                    result |= self.truthy(operand)?;
                }
                Ok(Value::Scalar(ScalarValue::Bool(result)))
            }
            Expr::Eq { lhs, rhs } => {
                let lhs = self.scalar(lhs)?;
                let rhs = self.scalar(rhs)?;
                Ok(Value::Scalar(ScalarValue::Bool(lhs.as_i64() == rhs.as_i64())))
            }
            Expr::Ite { cond, then, els } => {
                if self.truthy(cond)? {
                    self.eval(then)
                } else {
                    self.eval(els)
                }
            }
            Expr::BvBin { op, lhs, rhs } => {
                let lhs = self.scalar(lhs)?;
                let rhs = self.scalar(rhs)?;
                Ok(Value::Scalar(bv_bin(*op, lhs, rhs)))
            }
            Expr::BvCmp { op, lhs, rhs } => {
                let lhs = self.scalar(lhs)?.as_i64();
                let rhs = self.scalar(rhs)?.as_i64();
                let result = match op {
                    BvCmpOp::Slt => lhs < rhs,
                    BvCmpOp::Sle => lhs <= rhs,
                    BvCmpOp::Sgt => lhs > rhs,
                    BvCmpOp::Sge => lhs >= rhs,
                };
                Ok(Value::Scalar(ScalarValue::Bool(result)))
            }
            Expr::BvNeg(operand) => {
                let operand = self.scalar(operand)?;
                let width = width_of(operand);
                Ok(Value::Scalar(bits(operand.as_i64().wrapping_neg(), width)))
            }
            Expr::Select { array, index } => {
                let array = self.array(array)?;
                let index = self.scalar(index)?.as_i64();
                Ok(Value::Scalar(array.get(index)))
            }
            Expr::Store {
                array,
                index,
                value,
            } => {
                let mut stored = self.array(array)?;
                let index = self.scalar(index)?.as_i64();
                let value = self.scalar(value)?;
                stored.entries.insert(index, value);
                Ok(Value::Array(stored))
            }
            Expr::ZeroExtend { by, operand } => {
                let operand = self.scalar(operand)?;
                let width = width_of(operand);
                let raw = unsigned_bits(operand.as_i64(), width);
                Ok(Value::Scalar(bits(norm(raw, width + by), width + by)))
            }
            Expr::SignExtend { by, operand } => {
                let operand = self.scalar(operand)?;
                let width = width_of(operand);
                Ok(Value::Scalar(bits(operand.as_i64(), width + by)))
            }
            Expr::Extract { high, low, operand } => {
                let operand = self.scalar(operand)?;
                let width = high - low + 1;
                let raw = unsigned_bits(operand.as_i64(), 64) >> low;
                Ok(Value::Scalar(bits(norm(raw, width), width)))
            }
            Expr::Concat { high, low } => {
                let high_value = self.scalar(high)?;
                let low_value = self.scalar(low)?;
                let high_width = width_of(high_value);
                let low_width = width_of(low_value);
                let raw = (unsigned_bits(high_value.as_i64(), high_width) << low_width)
                    | unsigned_bits(low_value.as_i64(), low_width);
                let width = high_width + low_width;
                Ok(Value::Scalar(bits(norm(raw, width), width)))
            }
        }
    }

    /// Evaluates the expression to a scalar.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the expression is ill-sorted or evaluates to an
    /// array.
    pub fn scalar(&self, expr: &ExprRef) -> Result<ScalarValue, solver::Error> {
        match self.eval(expr)? {
            Value::Scalar(value) => Ok(value),
            Value::Array(_) => Err(solver::Error::unsupported(
                "an array appeared where a scalar was required",
            )),
        }
    }

    /// Evaluates the expression to a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the expression is ill-sorted or not boolean.
    pub fn truthy(&self, expr: &ExprRef) -> Result<bool, solver::Error> {
        match self.scalar(expr)? {
            ScalarValue::Bool(value) => Ok(value),
            ScalarValue::Bits { .. } => Err(solver::Error::unsupported(
                "a bitvector appeared where a boolean was required",
            )),
        }
    }

    /// Evaluates the expression to an array.
    fn array(&self, expr: &ExprRef) -> Result<ArrayValue, solver::Error> {
        match self.eval(expr)? {
            Value::Array(value) => Ok(value),
            Value::Scalar(_) => Err(solver::Error::unsupported(
                "a scalar appeared where an array was required",
            )),
        }
    }

    /// Reads a variable, falling back to the default of its sort.
    fn var(&self, name: &str, sort: &Sort) -> Value {
        if let Sort::Array { elem, .. } = sort {
            let value = self
                .assignment
                .arrays
                .get(name)
                .cloned()
                .unwrap_or_else(|| ArrayValue::empty(elem));
            Value::Array(value)
        } else {
            let value = self
                .assignment
                .scalar(name)
                .unwrap_or_else(|| ScalarValue::default_of(sort));
            Value::Scalar(value)
        }
    }
}

/// Constructs a bitvector scalar, normalising the value to `width` bits.
fn bits(value: i64, width: u32) -> ScalarValue {
    ScalarValue::Bits {
        value: norm(unsigned_bits(value, width), width),
        width,
    }
}

/// Sign-extends the low `width` bits of `raw` into an `i64`.
#[allow(clippy::cast_possible_wrap)]
fn norm(raw: u64, width: u32) -> i64 {
    if width == 0 {
        return 0;
    }
    if width >= 64 {
        return raw as i64;
    }
    let mask = (1u64 << width) - 1;
    let raw = raw & mask;
    if raw & (1u64 << (width - 1)) != 0 {
        (raw | !mask) as i64
    } else {
        raw as i64
    }
}

/// Gets the width of a scalar; booleans act as width-1 vectors here.
fn width_of(value: ScalarValue) -> u32 {
    match value {
        ScalarValue::Bool(_) => 1,
        ScalarValue::Bits { width, .. } => width,
    }
}

/// Applies a binary bitvector operator with wrap-around at the operand
/// width. Division and remainder by zero follow the SMT-LIB definitions so
/// the evaluator agrees with an external solver.
fn bv_bin(op: BvBinOp, lhs: ScalarValue, rhs: ScalarValue) -> ScalarValue {
    let width = width_of(lhs);
    let a = lhs.as_i64();
    let b = rhs.as_i64();
    let value = match op {
        BvBinOp::Add => a.wrapping_add(b),
        BvBinOp::Sub => a.wrapping_sub(b),
        BvBinOp::Mul => a.wrapping_mul(b),
        BvBinOp::SDiv => {
            if b == 0 {
                if a < 0 {
                    1
                } else {
                    -1
                }
            } else {
                a.wrapping_div(b)
            }
        }
        BvBinOp::SRem => {
            if b == 0 {
                a
            } else {
                a.wrapping_rem(b)
            }
        }
        BvBinOp::Shl => shift(a, b, width, |bits, by| bits << by),
        BvBinOp::LShr => shift(a, b, width, |bits, by| bits >> by),
        BvBinOp::AShr => {
            let by = unsigned_bits(b, width).min(u64::from(width) - 1);
            a >> by
        }
        BvBinOp::And => a & b,
        BvBinOp::Or => a | b,
        BvBinOp::Xor => a ^ b,
    };
    bits(value, width)
}

/// Applies an unsigned shift; shifting by the width or more yields zero, as
/// SMT-LIB defines.
#[allow(clippy::cast_possible_wrap)]
fn shift(value: i64, by: i64, width: u32, apply: impl Fn(u64, u64) -> u64) -> i64 {
    let by = unsigned_bits(by, width);
    if by >= u64::from(width) {
        return 0;
    }
    apply(unsigned_bits(value, width), by) as i64
}

#[cfg(test)]
mod test {
    use crate::smt::{
        backend::{Assignment, ScalarValue},
        eval::Evaluator,
        expr::{BvBinOp, Expr, Sort},
    };

    #[test]
    fn unassigned_variables_take_sort_defaults() -> anyhow::Result<()> {
        let assignment = Assignment::new();
        let evaluator = Evaluator::new(&assignment);

        let x = Expr::var("x", Sort::BitVec(32));
        assert_eq!(evaluator.scalar(&x)?.as_i64(), 0);

        Ok(())
    }

    #[test]
    fn store_chains_shadow_the_base_array() -> anyhow::Result<()> {
        let assignment = Assignment::new();
        let evaluator = Evaluator::new(&assignment);

        let base = Expr::var("cells", Sort::array_of(Sort::BitVec(64), Sort::BitVec(32)));
        let stored = Expr::store(base, Expr::bv(5, 64), Expr::bv(42, 32));
        let hit = Expr::select(stored.clone(), Expr::bv(5, 64));
        let miss = Expr::select(stored, Expr::bv(6, 64));

        assert_eq!(evaluator.scalar(&hit)?.as_i64(), 42);
        assert_eq!(evaluator.scalar(&miss)?.as_i64(), 0);

        Ok(())
    }

    #[test]
    fn arithmetic_wraps_at_the_operand_width() -> anyhow::Result<()> {
        let assignment = Assignment::new();
        let evaluator = Evaluator::new(&assignment);

        let sum = Expr::bv_bin(BvBinOp::Add, Expr::bv(i64::from(i32::MAX), 32), Expr::bv(1, 32));
        assert_eq!(
            evaluator.scalar(&sum)?,
            ScalarValue::Bits {
                value: i64::from(i32::MIN),
                width: 32
            }
        );

        Ok(())
    }

    #[test]
    fn concatenation_builds_the_composite_index() -> anyhow::Result<()> {
        let assignment = Assignment::new();
        let evaluator = Evaluator::new(&assignment);

        let composite = Expr::concat(Expr::bv(1, 32), Expr::bv(2, 32));
        assert_eq!(evaluator.scalar(&composite)?.as_i64(), (1 << 32) | 2);

        Ok(())
    }

    #[test]
    fn division_by_zero_follows_the_solver_definition() -> anyhow::Result<()> {
        let assignment = Assignment::new();
        let evaluator = Evaluator::new(&assignment);

        let negative = Expr::bv_bin(BvBinOp::SDiv, Expr::bv(-7, 32), Expr::bv(0, 32));
        let positive = Expr::bv_bin(BvBinOp::SDiv, Expr::bv(7, 32), Expr::bv(0, 32));

        assert_eq!(evaluator.scalar(&negative)?.as_i64(), 1);
        assert_eq!(evaluator.scalar(&positive)?.as_i64(), -1);

        Ok(())
    }
}
