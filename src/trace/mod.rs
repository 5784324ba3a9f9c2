//! This module contains the textual trace format shared between the concrete
//! runners and the symbolic replay.
//!
//! An instrumented run emits one [`Action`] per line; the parser in
//! [`parser`] reads them back. The format is deliberately plain text so that
//! traces can be produced by any instrumented runtime, captured in files, and
//! inspected by hand when a run behaves unexpectedly.

pub mod parser;
pub mod symbolic;

use std::fmt;

use itertools::Itertools;

use crate::ir::{BlockId, TypeSig};

/// A concrete value observed during an instrumented run.
///
/// Reference values carry only an identity and a shape; the referent's field
/// contents are reconstructed symbolically rather than recorded.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum TraceValue {
    /// The `null` reference.
    Null,

    /// A boolean.
    Bool(bool),

    /// An `int`.
    Int(i32),

    /// A `long`.
    Long(i64),

    /// A reference to an instance of `class` with a per-run identity.
    Ref { class: String, id: u64 },

    /// A reference to an array of `elem` with the observed `length` and a
    /// per-run identity.
    Array {
        elem:   TypeSig,
        length: usize,
        id:     u64,
    },
}

impl fmt::Display for TraceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Long(l) => write!(f, "{l}L"),
            Self::Ref { class, id } => write!(f, "ref {class}#{id}"),
            Self::Array { elem, length, id } => write!(f, "array {elem}[{length}]#{id}"),
        }
    }
}

/// One step of an instrumented run.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    /// Control entered the named method.
    Enter { method: String },

    /// The named method's receiver and arguments, recorded on entry.
    Arguments {
        method:   String,
        bindings: Vec<(String, TraceValue)>,
    },

    /// Control entered the basic block.
    Block { block: BlockId },

    /// The branch terminating `block` went the recorded way.
    Branch { block: BlockId, taken: bool },

    /// The lookup switch terminating `block` saw the recorded key.
    Switch { block: BlockId, key: i64 },

    /// The table switch terminating `block` saw the recorded key.
    TableSwitch { block: BlockId, key: i64 },

    /// Control returned from the named method.
    Return {
        method: String,
        value:  Option<TraceValue>,
    },

    /// The named method threw, at the recorded instruction.
    Throw {
        method: String,
        class:  String,
        block:  BlockId,
        index:  u32,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter { method } => write!(f, "enter {method};"),
            Self::Arguments { method, bindings } => {
                write!(f, "arguments {method};")?;
                if !bindings.is_empty() {
                    let rendered = bindings
                        .iter()
                        .map(|(name, value)| format!("{name} == {value}"))
                        .join(", ");
                    write!(f, " {rendered};")?;
                }
                Ok(())
            }
            Self::Block { block } => write!(f, "block %bb{block};"),
            Self::Branch { block, taken } => write!(f, "branch %bb{block}; cond == {taken};"),
            Self::Switch { block, key } => write!(f, "switch %bb{block}; key == {key};"),
            Self::TableSwitch { block, key } => {
                write!(f, "tableswitch %bb{block}; key == {key};")
            }
            Self::Return { method, value } => match value {
                Some(value) => write!(f, "return {method}; == {value};"),
                None => write!(f, "return {method};"),
            },
            Self::Throw {
                method,
                class,
                block,
                index,
            } => write!(f, "throw {method}; {class}; %bb{block}#{index};"),
        }
    }
}

/// Renders a sequence of actions as the textual trace format, one action per
/// line.
#[must_use]
pub fn render(actions: &[Action]) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    for action in actions {
        let _ = writeln!(out, "{action}");
    }
    out
}
