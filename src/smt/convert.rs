//! This module contains the converter from the predicate language to the
//! solver-neutral expression language.
//!
//! Scalar terms translate structurally. The heap translates into one SMT
//! array per memory space: one space per field reference (address → value),
//! one per array element sort (address‖index → value), one for array
//! lengths, and one for dynamic type tags. The converter tracks an
//! `(initial, current)` pair of array expressions per space; store effects
//! rewrite `current`, reads select from it, and model recovery later
//! evaluates both to reconstruct the heap shape a model implies.
//!
//! Pure terms are memoized so shared subterms encode once; heap reads are
//! deliberately not, because their meaning depends on the memory version at
//! the clause being converted.

use std::collections::HashMap;

use crate::{
    constant::{
        ADDRESS_WIDTH_BITS,
        ARG_PREFIX,
        ARRAY_CELL_WIDTH_BITS,
        INT_WIDTH_BITS,
        LONG_WIDTH_BITS,
        THIS_NAME,
    },
    error::solver,
    ir::{BinaryOp, CmpOp, Const, FieldRef, TypeSig},
    predicate::{
        term::{Term, TermRef},
        Predicate,
        PredicateOp,
    },
    smt::expr::{BvBinOp, BvCmpOp, Expr, ExprRef, Sort},
};

/// The identity of one memory space.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SpaceKey {
    /// The values of one field, per owner address.
    Field(FieldRef),

    /// The cells of every array with the provided element sort, per
    /// composite address‖index.
    Cells(Sort),

    /// The lengths of all arrays, per address.
    Lengths,

    /// The dynamic type tags of all allocations, per address.
    Tags,
}

impl SpaceKey {
    /// Gets the variable name of the space's initial array.
    #[must_use]
    pub fn var_name(&self) -> String {
        match self {
            Self::Field(field) => format!("field${field}"),
            Self::Cells(elem) => format!("cells${}", sort_tag(elem)),
            Self::Lengths => "lengths".into(),
            Self::Tags => "tags".into(),
        }
    }

    /// Gets the array sort of the space.
    #[must_use]
    pub fn sort(&self) -> Sort {
        let address = Sort::BitVec(ADDRESS_WIDTH_BITS);
        match self {
            Self::Field(field) => Sort::array_of(address, sort_of(&field.ty)),
            Self::Cells(elem) => {
                Sort::array_of(Sort::BitVec(ARRAY_CELL_WIDTH_BITS), elem.clone())
            }
            Self::Lengths | Self::Tags => Sort::array_of(address, Sort::BitVec(INT_WIDTH_BITS)),
        }
    }
}

/// One memory space during conversion.
#[derive(Clone, Debug)]
pub struct Space {
    /// The space's array variable: its contents as the encoded path begins.
    pub initial: ExprRef,

    /// The store chain over `initial` reflecting every store effect
    /// converted so far.
    pub current: ExprRef,
}

/// Converts predicates and terms into solver expressions.
#[derive(Debug, Default)]
pub struct Converter {
    memo:   HashMap<TermRef, ExprRef>,
    spaces: HashMap<SpaceKey, Space>,
    tags:   HashMap<String, i64>,
    fresh:  usize,
}

impl Converter {
    /// Constructs an empty converter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the memory spaces the conversion has touched.
    #[must_use]
    pub fn spaces(&self) -> &HashMap<SpaceKey, Space> {
        &self.spaces
    }

    /// Gets the tag interned for `class`, interning a fresh one on first
    /// sight. Tags start at `1`; `0` is never a valid tag.
    pub fn class_tag(&mut self, class: &str) -> i64 {
        let next = i64::try_from(self.tags.len()).unwrap_or(i64::MAX - 1) + 1;
        *self.tags.entry(class.to_string()).or_insert(next)
    }

    /// Converts a run of predicates in order, producing one assertion per
    /// predicate that asserts anything. Store and allocation effects mutate
    /// the memory spaces as a side effect, so order matters.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any predicate cannot be encoded.
    pub fn convert_all<'a>(
        &mut self,
        predicates: impl IntoIterator<Item = &'a Predicate>,
    ) -> Result<Vec<ExprRef>, solver::Error> {
        let mut assertions = Vec::new();
        for predicate in predicates {
            if let Some(assertion) = self.convert_predicate(predicate)? {
                assertions.push(assertion);
            }
        }
        Ok(assertions)
    }

    /// Converts one predicate, returning its assertion when it has one.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the predicate cannot be encoded.
    pub fn convert_predicate(
        &mut self,
        predicate: &Predicate,
    ) -> Result<Option<ExprRef>, solver::Error> {
        match &predicate.op {
            PredicateOp::Equality { lhs, rhs } => {
                let lhs = self.convert_term(lhs)?;
                let rhs = self.convert_term(rhs)?;
                let (lhs, rhs) = coerce(lhs, rhs);
                Ok(Some(Expr::eq(lhs, rhs)))
            }
            PredicateOp::Inequality { lhs, rhs } => {
                let lhs = self.convert_term(lhs)?;
                let rhs = self.convert_term(rhs)?;
                let (lhs, rhs) = coerce(lhs, rhs);
                Ok(Some(Expr::not(Expr::eq(lhs, rhs))))
            }
            PredicateOp::DefaultSwitch { cond, cases } => {
                let cond = self.convert_term(cond)?;
                let mut misses = Vec::with_capacity(cases.len());
                for case in cases {
                    let case = self.convert_term(case)?;
                    let (lhs, rhs) = coerce(cond.clone(), case);
                    misses.push(Expr::not(Expr::eq(lhs, rhs)));
                }
                Ok(Some(Expr::and(misses)))
            }
            PredicateOp::ArrayStore {
                array,
                index,
                value,
            } => {
                let elem = elem_sort(&array.ty());
                let address = self.convert_term(array)?;
                let index = self.convert_term(index)?;
                let value = self.convert_term(value)?;
                let cell = cell_index(address, index);
                let space = self.space_mut(SpaceKey::Cells(elem));
                space.current = Expr::store(space.current.clone(), cell, value);
                Ok(None)
            }
            PredicateOp::FieldStore {
                object,
                field,
                value,
            } => {
                let address = match object {
                    Some(object) => self.convert_term(object)?,
                    None => Expr::bv(0, ADDRESS_WIDTH_BITS),
                };
                let value = self.convert_term(value)?;
                let space = self.space_mut(SpaceKey::Field(field.clone()));
                space.current = Expr::store(space.current.clone(), address, value);
                Ok(None)
            }
            PredicateOp::NewObject { result, class } => {
                let address = self.convert_term(result)?;
                let tag = self.class_tag(class);
                let tag = Expr::bv(tag, INT_WIDTH_BITS);
                let space = self.space_mut(SpaceKey::Tags);
                space.current = Expr::store(space.current.clone(), address.clone(), tag);
                Ok(Some(non_null(&address)))
            }
            PredicateOp::NewArray {
                result,
                elem,
                length,
            } => {
                let address = self.convert_term(result)?;
                let length = self.convert_term(length)?;
                let tag = self.class_tag(&TypeSig::array_of(elem.clone()).to_string());
                let tag = Expr::bv(tag, INT_WIDTH_BITS);

                let lengths = self.space_mut(SpaceKey::Lengths);
                lengths.current = Expr::store(lengths.current.clone(), address.clone(), length);
                let tags = self.space_mut(SpaceKey::Tags);
                tags.current = Expr::store(tags.current.clone(), address.clone(), tag);
                Ok(Some(non_null(&address)))
            }
            // An un-inlined call constrains nothing; its result variable
            // stays free.
            PredicateOp::Call { .. } => Ok(None),
        }
    }

    /// Converts one term.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the term cannot be encoded.
    pub fn convert_term(&mut self, term: &TermRef) -> Result<ExprRef, solver::Error> {
        if let Some(hit) = self.memo.get(term) {
            return Ok(hit.clone());
        }

        let converted = match term.as_ref() {
            Term::This { .. } => Expr::var(THIS_NAME, Sort::BitVec(ADDRESS_WIDTH_BITS)),
            Term::Arg { index, ty } => Expr::var(format!("{ARG_PREFIX}{index}"), sort_of(ty)),
            Term::Value { name, ty } => Expr::var(name.clone(), sort_of(ty)),
            Term::Const(constant) => match constant {
                Const::Bool(value) => Expr::bool_lit(*value),
                Const::Int(value) => Expr::bv(i64::from(*value), INT_WIDTH_BITS),
                Const::Long(value) => Expr::bv(*value, LONG_WIDTH_BITS),
                Const::Null => Expr::bv(0, ADDRESS_WIDTH_BITS),
            },
            Term::Binary { op, lhs, rhs, .. } => self.binary(*op, lhs, rhs)?,
            Term::Cmp { op, lhs, rhs } => {
                let lhs = self.convert_term(lhs)?;
                let rhs = self.convert_term(rhs)?;
                let (lhs, rhs) = coerce(lhs, rhs);
                match op {
                    CmpOp::Eq => Expr::eq(lhs, rhs),
                    CmpOp::Ne => Expr::not(Expr::eq(lhs, rhs)),
                    CmpOp::Lt => Expr::bv_cmp(BvCmpOp::Slt, lhs, rhs),
                    CmpOp::Le => Expr::bv_cmp(BvCmpOp::Sle, lhs, rhs),
                    CmpOp::Gt => Expr::bv_cmp(BvCmpOp::Sgt, lhs, rhs),
                    CmpOp::Ge => Expr::bv_cmp(BvCmpOp::Sge, lhs, rhs),
                }
            }
            Term::Neg { operand, .. } => Expr::bv_neg(self.convert_term(operand)?),
            Term::ArrayLength { array } => {
                let address = self.convert_term(array)?;
                let space = self.space_mut(SpaceKey::Lengths);
                let current = space.current.clone();
                return Ok(Expr::select(current, address));
            }
            Term::Cast { operand, target } => {
                let source_ty = operand.ty();
                let operand = self.convert_term(operand)?;
                cast(operand, &source_ty, target)?
            }
            Term::ArrayLoad { array, index, .. } => {
                let elem = elem_sort(&array.ty());
                let address = self.convert_term(array)?;
                let index = self.convert_term(index)?;
                let cell = cell_index(address, index);
                let space = self.space_mut(SpaceKey::Cells(elem));
                let current = space.current.clone();
                return Ok(Expr::select(current, cell));
            }
            Term::FieldLoad { object, field } => {
                let address = match object {
                    Some(object) => self.convert_term(object)?,
                    None => Expr::bv(0, ADDRESS_WIDTH_BITS),
                };
                let space = self.space_mut(SpaceKey::Field(field.clone()));
                let current = space.current.clone();
                return Ok(Expr::select(current, address));
            }
            Term::InstanceOf { operand, target } => {
                let address = self.convert_term(operand)?;
                let tag = self.class_tag(&target.to_string());
                let tag = Expr::bv(tag, INT_WIDTH_BITS);
                let space = self.space_mut(SpaceKey::Tags);
                let current = space.current.clone();
                return Ok(Expr::and(vec![
                    non_null(&address),
                    Expr::eq(Expr::select(current, address), tag),
                ]));
            }
            Term::Call { ty, .. } => {
                let name = format!("%call{}", self.fresh);
                self.fresh += 1;
                Expr::var(name, sort_of(ty))
            }
            Term::Phi { ty, .. } => {
                let name = format!("%phi{}", self.fresh);
                self.fresh += 1;
                Expr::var(name, sort_of(ty))
            }
        };

        self.memo.insert(term.clone(), converted.clone());
        Ok(converted)
    }

    /// Converts a binary operation, with boolean connectives for boolean
    /// operands and JVM shift-amount masking for the shifts.
    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &TermRef,
        rhs: &TermRef,
    ) -> Result<ExprRef, solver::Error> {
        let lhs = self.convert_term(lhs)?;
        let rhs = self.convert_term(rhs)?;

        if lhs.sort() == Sort::Bool {
            return match op {
                BinaryOp::And => Ok(Expr::and(vec![lhs, rhs])),
                BinaryOp::Or => Ok(Expr::or(vec![lhs, rhs])),
                BinaryOp::Xor => Ok(Expr::not(Expr::eq(lhs, rhs))),
                _ => Err(solver::Error::unsupported(format!(
                    "the operator `{op}` is not defined on booleans"
                ))),
            };
        }

        let Some(width) = lhs.sort().width() else {
            return Err(solver::Error::unsupported(format!(
                "the operator `{op}` is not defined on arrays"
            )));
        };

        let mapped = match op {
            BinaryOp::Add => BvBinOp::Add,
            BinaryOp::Sub => BvBinOp::Sub,
            BinaryOp::Mul => BvBinOp::Mul,
            BinaryOp::Div => BvBinOp::SDiv,
            BinaryOp::Rem => BvBinOp::SRem,
            BinaryOp::Shl => BvBinOp::Shl,
            BinaryOp::Shr => BvBinOp::AShr,
            BinaryOp::Ushr => BvBinOp::LShr,
            BinaryOp::And => BvBinOp::And,
            BinaryOp::Or => BvBinOp::Or,
            BinaryOp::Xor => BvBinOp::Xor,
        };

        if matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr) {
            // The source language masks shift amounts by width-1; a long
            // shift amount is still an int.
            let amount = Expr::bv_bin(
                BvBinOp::And,
                fit(rhs, width),
                Expr::bv(i64::from(width - 1), width),
            );
            return Ok(Expr::bv_bin(mapped, lhs, amount));
        }

        let (lhs, rhs) = coerce(lhs, rhs);
        Ok(Expr::bv_bin(mapped, lhs, rhs))
    }

    /// Gets the space for `key`, creating it at its initial state on first
    /// use.
    fn space_mut(&mut self, key: SpaceKey) -> &mut Space {
        self.spaces.entry(key.clone()).or_insert_with(|| {
            let initial = Expr::var(key.var_name(), key.sort());
            Space {
                initial: initial.clone(),
                current: initial,
            }
        })
    }
}

/// Converts a numeric or reference cast; a checked reference cast leaves
/// the address untouched.
fn cast(operand: ExprRef, source: &TypeSig, target: &TypeSig) -> Result<ExprRef, solver::Error> {
    let target_sort = sort_of(target);
    if operand.sort() == target_sort {
        return Ok(operand);
    }
    match (operand.sort().width(), target_sort.width()) {
        (Some(from), Some(to)) if from < to => Ok(Expr::sign_extend(to - from, operand)),
        (Some(_), Some(to)) => Ok(Expr::extract(to - 1, 0, operand)),
        (None, Some(to)) if operand.sort() == Sort::Bool => {
            Ok(Expr::ite(operand, Expr::bv(1, to), Expr::bv(0, to)))
        }
        _ => Err(solver::Error::unsupported(format!(
            "cannot encode a cast from {source} to {target}"
        ))),
    }
}

/// Gets the scalar sort encoding values of `ty`; references encode as
/// addresses.
#[must_use]
pub fn sort_of(ty: &TypeSig) -> Sort {
    match ty {
        TypeSig::Bool => Sort::Bool,
        TypeSig::Int => Sort::BitVec(INT_WIDTH_BITS),
        TypeSig::Long => Sort::BitVec(LONG_WIDTH_BITS),
        TypeSig::Reference(_) | TypeSig::Array(_) => Sort::BitVec(ADDRESS_WIDTH_BITS),
    }
}

/// Gets the element sort of an array type; a non-array type falls back to
/// `int` cells, matching the term builder's fallback.
fn elem_sort(ty: &TypeSig) -> Sort {
    match ty {
        TypeSig::Array(elem) => sort_of(elem),
        _ => Sort::BitVec(INT_WIDTH_BITS),
    }
}

/// A short name for an element sort, used in space variable names.
fn sort_tag(sort: &Sort) -> String {
    match sort {
        Sort::Bool => "bool".into(),
        Sort::BitVec(width) => format!("bv{width}"),
        Sort::Array { elem, .. } => format!("arrayof_{}", sort_tag(elem)),
    }
}

/// The composite cell index: the array's address concatenated with the
/// element index.
fn cell_index(address: ExprRef, index: ExprRef) -> ExprRef {
    Expr::concat(address, fit(index, INT_WIDTH_BITS))
}

/// The assertion that an address is not `null`.
fn non_null(address: &ExprRef) -> ExprRef {
    Expr::not(Expr::eq(address.clone(), Expr::bv(0, ADDRESS_WIDTH_BITS)))
}

/// Widens or narrows a bitvector expression to the provided width.
fn fit(expr: ExprRef, width: u32) -> ExprRef {
    match expr.sort().width() {
        Some(have) if have < width => Expr::sign_extend(width - have, expr),
        Some(have) if have > width => Expr::extract(width - 1, 0, expr),
        _ => expr,
    }
}

/// Sign-extends the narrower of two bitvector expressions to the width of
/// the wider one.
fn coerce(lhs: ExprRef, rhs: ExprRef) -> (ExprRef, ExprRef) {
    match (lhs.sort().width(), rhs.sort().width()) {
        (Some(a), Some(b)) if a < b => (Expr::sign_extend(b - a, lhs), rhs),
        (Some(a), Some(b)) if a > b => (lhs, Expr::sign_extend(a - b, rhs)),
        _ => (lhs, rhs),
    }
}
