//! This module contains the parser for the textual trace format.

use crate::{
    error::{
        container::{Locatable, SourceLoc},
        trace::{Error, Result},
    },
    ir::{BlockId, TypeSig},
    trace::{Action, TraceValue},
};

/// Parses a full trace, one action per line.
///
/// Blank lines are ignored. Errors carry the 1-based line number at which
/// they occurred.
///
/// # Errors
///
/// Returns [`Err`] if any line is not a well-formed action.
pub fn parse(text: &str) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let location = SourceLoc::Line(u32::try_from(number + 1).unwrap_or(u32::MAX));
        let action = parse_line(line).locate(location)?;
        actions.push(action);
    }
    Ok(actions)
}

/// Parses a single action line.
fn parse_line(line: &str) -> std::result::Result<Action, Error> {
    let clauses: Vec<&str> = line
        .split(';')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .collect();
    let head = clauses.first().copied().unwrap_or_default();
    let (keyword, rest) = head.split_once(' ').unwrap_or((head, ""));
    let rest = rest.trim();

    let require = |field: &str, clause: Option<&&str>| -> std::result::Result<String, Error> {
        clause.map(|c| (*c).to_string()).ok_or(Error::MissingField {
            action: keyword.to_string(),
            field:  field.to_string(),
        })
    };
    let named_head = || -> std::result::Result<String, Error> {
        if rest.is_empty() {
            Err(Error::MissingField {
                action: keyword.to_string(),
                field:  "method".to_string(),
            })
        } else {
            Ok(rest.to_string())
        }
    };

    match keyword {
        "enter" => Ok(Action::Enter {
            method: named_head()?,
        }),
        "arguments" => {
            let method = named_head()?;
            let bindings = match clauses.get(1) {
                Some(clause) => parse_bindings(clause)?,
                None => vec![],
            };
            Ok(Action::Arguments { method, bindings })
        }
        "block" => Ok(Action::Block {
            block: parse_block_ref(rest)?,
        }),
        "branch" => {
            let block = parse_block_ref(rest)?;
            let field = require("cond", clauses.get(1))?;
            let taken = match field.strip_prefix("cond ==").map(str::trim) {
                Some("true") => true,
                Some("false") => false,
                _ => return Err(Error::InvalidValue { text: field }),
            };
            Ok(Action::Branch { block, taken })
        }
        "switch" | "tableswitch" => {
            let block = parse_block_ref(rest)?;
            let field = require("key", clauses.get(1))?;
            let key = field
                .strip_prefix("key ==")
                .map(str::trim)
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or(Error::InvalidValue { text: field })?;
            if keyword == "switch" {
                Ok(Action::Switch { block, key })
            } else {
                Ok(Action::TableSwitch { block, key })
            }
        }
        "return" => {
            let method = named_head()?;
            let value = match clauses.get(1) {
                Some(clause) => {
                    let text = clause.strip_prefix("==").map(str::trim).ok_or_else(|| {
                        Error::InvalidValue {
                            text: (*clause).to_string(),
                        }
                    })?;
                    Some(parse_value(text)?)
                }
                None => None,
            };
            Ok(Action::Return { method, value })
        }
        "throw" => {
            let method = named_head()?;
            let class = require("class", clauses.get(1))?;
            let at = require("location", clauses.get(2))?;
            let (block, index) = parse_inst_ref(&at)?;
            Ok(Action::Throw {
                method,
                class,
                block,
                index,
            })
        }
        _ => Err(Error::InvalidAction {
            text: line.to_string(),
        }),
    }
}

/// Parses the comma-separated `name == value` bindings of an `arguments`
/// action.
fn parse_bindings(clause: &str) -> std::result::Result<Vec<(String, TraceValue)>, Error> {
    let mut bindings = Vec::new();
    for binding in clause.split(',').map(str::trim) {
        let (name, value) = binding.split_once("==").ok_or_else(|| Error::InvalidValue {
            text: binding.to_string(),
        })?;
        bindings.push((name.trim().to_string(), parse_value(value.trim())?));
    }
    Ok(bindings)
}

/// Parses a `%bb<i>` block reference.
fn parse_block_ref(text: &str) -> std::result::Result<BlockId, Error> {
    text.strip_prefix("%bb")
        .and_then(|digits| digits.parse::<BlockId>().ok())
        .ok_or_else(|| Error::InvalidBlockRef {
            text: text.to_string(),
        })
}

/// Parses a `%bb<i>#<j>` instruction reference.
fn parse_inst_ref(text: &str) -> std::result::Result<(BlockId, u32), Error> {
    let invalid = || Error::InvalidBlockRef {
        text: text.to_string(),
    };
    let (block, index) = text.split_once('#').ok_or_else(invalid)?;
    let block = parse_block_ref(block)?;
    let index = index.parse::<u32>().map_err(|_| invalid())?;
    Ok((block, index))
}

/// Parses a value literal.
pub fn parse_value(text: &str) -> std::result::Result<TraceValue, Error> {
    let invalid = || Error::InvalidValue {
        text: text.to_string(),
    };

    match text {
        "null" => return Ok(TraceValue::Null),
        "true" => return Ok(TraceValue::Bool(true)),
        "false" => return Ok(TraceValue::Bool(false)),
        _ => {}
    }

    if let Some(rest) = text.strip_prefix("ref ") {
        let (class, id) = rest.split_once('#').ok_or_else(invalid)?;
        let id = id.parse::<u64>().map_err(|_| invalid())?;
        return Ok(TraceValue::Ref {
            class: class.to_string(),
            id,
        });
    }

    if let Some(rest) = text.strip_prefix("array ") {
        // The element type may itself be an array, so split at the last
        // opening bracket: `int[][3]#2` is a 3-element array of `int[]`.
        let open = rest.rfind('[').ok_or_else(invalid)?;
        let elem = parse_type(rest[..open].trim());
        let tail = &rest[open + 1..];
        let (length, id) = tail.split_once("]#").ok_or_else(invalid)?;
        let length = length.parse::<usize>().map_err(|_| invalid())?;
        let id = id.parse::<u64>().map_err(|_| invalid())?;
        return Ok(TraceValue::Array { elem, length, id });
    }

    if let Some(digits) = text.strip_suffix('L') {
        if let Ok(value) = digits.parse::<i64>() {
            return Ok(TraceValue::Long(value));
        }
    }
    if let Ok(value) = text.parse::<i32>() {
        return Ok(TraceValue::Int(value));
    }

    Err(invalid())
}

/// Parses a type name as written in trace literals.
#[must_use]
pub fn parse_type(text: &str) -> TypeSig {
    if let Some(elem) = text.strip_suffix("[]") {
        return TypeSig::array_of(parse_type(elem));
    }
    match text {
        "boolean" => TypeSig::Bool,
        "int" => TypeSig::Int,
        "long" => TypeSig::Long,
        other => TypeSig::Reference(other.to_string()),
    }
}
