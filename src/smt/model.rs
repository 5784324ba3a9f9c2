//! This module contains model recovery: the walk from a backend's scalar
//! assignment back to language-level input values.
//!
//! Scalars read straight out of the assignment. Reference values read
//! through the converter's memory spaces: the address of the value indexes
//! the evaluated `initial` array of each space, so the recovered object is
//! the one the caller must construct _before_ the run. Address `0` recovers
//! `null`, and anything the model left unconstrained takes the default of
//! its sort. The `(initial, updated)` shape of every space is also exposed,
//! which is how a store observed along the path shows up in the recovered
//! model.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    constant::{ARG_PREFIX, MAX_RECOVERED_ARRAY_LENGTH, THIS_NAME},
    error::solver,
    ir::{Method, TypeSig},
    smt::{
        backend::{ArrayValue, Assignment, ScalarValue},
        convert::{sort_of, Converter, SpaceKey},
        eval::{Evaluator, Value},
        expr::{unsigned_bits, Expr},
    },
};

/// A language-level value recovered from a model.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RecoveredValue {
    /// The `null` reference.
    Null,

    /// A boolean.
    Bool(bool),

    /// An `int`.
    Int(i32),

    /// A `long`.
    Long(i64),

    /// An instance of `class` with the recovered field values.
    Ref {
        class:  String,
        fields: BTreeMap<String, RecoveredValue>,
    },

    /// An array of `elem` with the recovered element values.
    Array {
        elem:     TypeSig,
        length:   usize,
        elements: Vec<RecoveredValue>,
    },
}

impl RecoveredValue {
    /// Gets the default value of a type: zero, `false`, `null`, or an empty
    /// array.
    #[must_use]
    pub fn default_of(ty: &TypeSig) -> Self {
        match ty {
            TypeSig::Bool => Self::Bool(false),
            TypeSig::Int => Self::Int(0),
            TypeSig::Long => Self::Long(0),
            TypeSig::Reference(_) => Self::Null,
            TypeSig::Array(elem) => Self::Array {
                elem:     elem.as_ref().clone(),
                length:   0,
                elements: Vec::new(),
            },
        }
    }
}

/// One full set of inputs for a method under test.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RecoveredInputs {
    /// The method the inputs are for.
    pub method: String,

    /// The receiver, when the method has one.
    pub this: Option<RecoveredValue>,

    /// The arguments, in declaration order.
    pub args: Vec<RecoveredValue>,
}

impl RecoveredInputs {
    /// Constructs the default inputs for a method: zeroes, empty arrays, a
    /// fresh blank receiver. These seed the first concrete run of a search.
    #[must_use]
    pub fn defaults(method: &Method) -> Self {
        let this = method.receiver().map(|class| RecoveredValue::Ref {
            class:  class.to_string(),
            fields: BTreeMap::new(),
        });
        let args = method.params().iter().map(RecoveredValue::default_of).collect();
        Self {
            method: method.name().to_string(),
            this,
            args,
        }
    }
}

/// The `(initial, updated)` contents of one memory space under a model.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpaceShape {
    /// The space's variable name.
    pub name: String,

    /// The explicitly constrained entries as the path begins.
    pub initial: BTreeMap<i64, ScalarValue>,

    /// The entries after every store of the path.
    pub updated: BTreeMap<i64, ScalarValue>,
}

/// Evaluates the shape of every memory space the conversion touched.
///
/// # Errors
///
/// Returns [`Err`] if a space's store chain is ill-sorted, which indicates a
/// converter defect rather than a bad model.
pub fn shapes(
    converter: &Converter,
    assignment: &Assignment,
) -> Result<Vec<SpaceShape>, solver::Error> {
    let evaluator = Evaluator::new(assignment);
    let mut shapes = Vec::new();
    for (key, space) in converter.spaces() {
        let initial = array_of(evaluator.eval(&space.initial)?)?;
        let updated = array_of(evaluator.eval(&space.current)?)?;
        shapes.push(SpaceShape {
            name:    key.var_name(),
            initial: initial.entries,
            updated: updated.entries,
        });
    }
    shapes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(shapes)
}

/// Recovers the inputs of `method` from a satisfying assignment.
///
/// # Errors
///
/// Returns [`Err`] if the assignment cannot be evaluated against the
/// converter's spaces.
pub fn recover(
    converter: &Converter,
    assignment: &Assignment,
    method: &Method,
) -> Result<RecoveredInputs, solver::Error> {
    let view = HeapView::new(converter, assignment)?;

    let this = match method.receiver() {
        Some(class) => {
            let address = view.scalar_var(THIS_NAME, &TypeSig::Reference(class.to_string()));
            Some(view.reference(&TypeSig::Reference(class.to_string()), address.as_i64())?)
        }
        None => None,
    };

    let mut args = Vec::with_capacity(method.params().len());
    for (index, ty) in method.params().iter().enumerate() {
        let value = view.scalar_var(&format!("{ARG_PREFIX}{index}"), ty);
        args.push(view.recover_value(ty, value)?);
    }

    Ok(RecoveredInputs {
        method: method.name().to_string(),
        this,
        args,
    })
}

/// The evaluated memory spaces of one model.
struct HeapView<'a> {
    assignment: &'a Assignment,
    converter:  &'a Converter,
    initial:    HashMap<SpaceKey, ArrayValue>,
}

impl<'a> HeapView<'a> {
    fn new(converter: &'a Converter, assignment: &'a Assignment) -> Result<Self, solver::Error> {
        let evaluator = Evaluator::new(assignment);
        let mut initial = HashMap::new();
        for (key, space) in converter.spaces() {
            initial.insert(key.clone(), array_of(evaluator.eval(&space.initial)?)?);
        }
        Ok(Self {
            assignment,
            converter,
            initial,
        })
    }

    /// Reads a scalar variable, falling back to the default of its sort.
    fn scalar_var(&self, name: &str, ty: &TypeSig) -> ScalarValue {
        self.assignment
            .scalar(name)
            .unwrap_or_else(|| ScalarValue::default_of(&sort_of(ty)))
    }

    /// Reads one entry of a space's initial array.
    fn read(&self, key: &SpaceKey, index: i64) -> ScalarValue {
        match self.initial.get(key) {
            Some(array) => array.get(index),
            None => ScalarValue::default_of(&key.sort()),
        }
    }

    fn recover_value(
        &self,
        ty: &TypeSig,
        value: ScalarValue,
    ) -> Result<RecoveredValue, solver::Error> {
        match ty {
            TypeSig::Bool => Ok(RecoveredValue::Bool(value.as_i64() != 0)),
            #[allow(clippy::cast_possible_truncation)]
            TypeSig::Int => Ok(RecoveredValue::Int(value.as_i64() as i32)),
            TypeSig::Long => Ok(RecoveredValue::Long(value.as_i64())),
            TypeSig::Reference(_) | TypeSig::Array(_) => self.reference(ty, value.as_i64()),
        }
    }

    /// Recovers a reference value from its address.
    fn reference(&self, ty: &TypeSig, address: i64) -> Result<RecoveredValue, solver::Error> {
        let mut seen = HashSet::new();
        self.reference_inner(ty, address, &mut seen)
    }

    fn reference_inner(
        &self,
        ty: &TypeSig,
        address: i64,
        seen: &mut HashSet<i64>,
    ) -> Result<RecoveredValue, solver::Error> {
        if address == 0 || !seen.insert(address) {
            // Null, or a cycle through the heap; either way the walk ends.
            return Ok(RecoveredValue::Null);
        }

        let result = match ty {
            TypeSig::Reference(class) => {
                let mut fields = BTreeMap::new();
                for key in self.converter.spaces().keys() {
                    let SpaceKey::Field(field) = key else {
                        continue;
                    };
                    if field.class != *class {
                        continue;
                    }
                    let raw = self.read(key, address);
                    let value = match &field.ty {
                        ty if ty.is_reference() => {
                            self.reference_inner(ty, raw.as_i64(), seen)?
                        }
                        ty => self.recover_value(ty, raw)?,
                    };
                    fields.insert(field.name.clone(), value);
                }
                RecoveredValue::Ref {
                    class: class.clone(),
                    fields,
                }
            }
            TypeSig::Array(elem) => {
                let raw_length = self.read(&SpaceKey::Lengths, address).as_i64();
                let length = usize::try_from(raw_length)
                    .unwrap_or(0)
                    .min(MAX_RECOVERED_ARRAY_LENGTH);

                let key = SpaceKey::Cells(sort_of(elem));
                let mut elements = Vec::with_capacity(length);
                for index in 0..length {
                    let cell = composite(address, i64::try_from(index).unwrap_or(i64::MAX));
                    let raw = self.read(&key, cell);
                    let value = if elem.is_reference() {
                        self.reference_inner(elem, raw.as_i64(), seen)?
                    } else {
                        self.recover_value(elem, raw)?
                    };
                    elements.push(value);
                }
                RecoveredValue::Array {
                    elem: elem.as_ref().clone(),
                    length,
                    elements,
                }
            }
            _ => RecoveredValue::default_of(ty),
        };

        seen.remove(&address);
        Ok(result)
    }
}

/// The composite cell index of `address` and `index`, matching the
/// evaluator's reading of [`Expr::Concat`].
#[allow(clippy::cast_possible_wrap)]
fn composite(address: i64, index: i64) -> i64 {
    ((unsigned_bits(address, 32) << 32) | unsigned_bits(index, 32)) as i64
}

/// Requires an evaluated value to be an array.
fn array_of(value: Value) -> Result<ArrayValue, solver::Error> {
    match value {
        Value::Array(array) => Ok(array),
        Value::Scalar(_) => Err(solver::Error::unsupported(
            "a memory space evaluated to a scalar",
        )),
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ir::{MethodBuilder, Terminator, TypeSig},
        predicate::{term::Term, Predicate, PredicateKind},
        smt::{
            backend::{Assignment, ScalarValue},
            convert::Converter,
            model::{recover, shapes, RecoveredInputs, RecoveredValue},
        },
    };

    fn int_method(params: Vec<TypeSig>) -> anyhow::Result<crate::ir::Method> {
        let mut b = MethodBuilder::new("f", params, Some(TypeSig::Int));
        let entry = b.block();
        b.terminate(entry, Terminator::Return { value: None });
        Ok(b.finish()?)
    }

    #[test]
    fn scalars_recover_from_the_assignment() -> anyhow::Result<()> {
        let converter = Converter::new();
        let mut assignment = Assignment::new();
        assignment.set_scalar("arg$0", ScalarValue::Bits { value: -3, width: 32 });

        let method = int_method(vec![TypeSig::Int, TypeSig::Bool])?;
        let inputs = recover(&converter, &assignment, &method)?;

        assert_eq!(inputs.method, "f");
        assert_eq!(
            inputs.args,
            vec![RecoveredValue::Int(-3), RecoveredValue::Bool(false)]
        );

        Ok(())
    }

    #[test]
    fn the_null_address_recovers_null() -> anyhow::Result<()> {
        let converter = Converter::new();
        let assignment = Assignment::new();

        let method = int_method(vec![TypeSig::Reference("java.lang.Object".into())])?;
        let inputs = recover(&converter, &assignment, &method)?;

        assert_eq!(inputs.args, vec![RecoveredValue::Null]);

        Ok(())
    }

    #[test]
    fn array_lengths_and_cells_read_from_the_spaces() -> anyhow::Result<()> {
        let mut converter = Converter::new();
        let array = Term::arg(0, TypeSig::array_of(TypeSig::Int));

        // Touch the spaces the way a translated load would.
        converter.convert_term(&Term::array_length(array.clone()))?;
        converter.convert_term(&Term::array_load(array, Term::int(0)))?;

        let mut assignment = Assignment::new();
        assignment.set_scalar("arg$0", ScalarValue::Bits { value: 1, width: 32 });
        assignment.set_array_entry("lengths", 1, ScalarValue::Bits { value: 2, width: 32 });
        assignment.set_array_entry("cells$bv32", 1 << 32, ScalarValue::Bits {
            value: 9,
            width: 32,
        });

        let method = int_method(vec![TypeSig::array_of(TypeSig::Int)])?;
        let inputs = recover(&converter, &assignment, &method)?;

        assert_eq!(
            inputs.args,
            vec![RecoveredValue::Array {
                elem:     TypeSig::Int,
                length:   2,
                elements: vec![RecoveredValue::Int(9), RecoveredValue::Int(0)],
            }]
        );

        Ok(())
    }

    #[test]
    fn shapes_split_initial_from_updated_entries() -> anyhow::Result<()> {
        let mut converter = Converter::new();
        let array = Term::value("%t0", TypeSig::array_of(TypeSig::Int));
        converter.convert_predicate(&Predicate::array_store(
            PredicateKind::State,
            array,
            Term::int(1),
            Term::int(5),
        ))?;

        let assignment = Assignment::new();
        let shapes = shapes(&converter, &assignment)?;
        let cells = shapes
            .iter()
            .find(|shape| shape.name == "cells$bv32")
            .ok_or_else(|| anyhow::anyhow!("the store touched the int cell space"))?;

        assert!(cells.initial.is_empty());
        assert_eq!(cells.updated.len(), 1);
        assert_eq!(cells.updated.values().next().map(ScalarValue::as_i64), Some(5));

        Ok(())
    }

    #[test]
    fn defaults_seed_a_runnable_input_set() -> anyhow::Result<()> {
        let method = int_method(vec![TypeSig::Int, TypeSig::array_of(TypeSig::Long)])?;
        let inputs = RecoveredInputs::defaults(&method);

        assert_eq!(inputs.this, None);
        assert_eq!(inputs.args[0], RecoveredValue::Int(0));
        assert!(matches!(
            &inputs.args[1],
            RecoveredValue::Array { length: 0, .. }
        ));

        Ok(())
    }

    #[test]
    fn recovered_inputs_round_trip_through_json() -> anyhow::Result<()> {
        let inputs = RecoveredInputs {
            method: "f".into(),
            this:   None,
            args:   vec![
                RecoveredValue::Int(-3),
                RecoveredValue::Array {
                    elem:     TypeSig::Int,
                    length:   1,
                    elements: vec![RecoveredValue::Int(7)],
                },
            ],
        };

        let text = serde_json::to_string(&inputs)?;
        let back: RecoveredInputs = serde_json::from_str(&text)?;

        assert_eq!(back, inputs);

        Ok(())
    }
}
