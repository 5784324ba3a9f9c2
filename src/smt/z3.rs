//! This module contains the process-based satisfiability backend: queries
//! are rendered as SMT-LIB2 text and piped through a `z3` executable, so no
//! native solver bindings are required.
//!
//! Only scalar model entries are read back; array-valued entries of a model
//! are skipped, and the affected values fall back to their sort defaults at
//! recovery time.

use std::{
    collections::BTreeMap,
    io::Write as _,
    process::{Command, Stdio},
};

use crate::{
    constant::DEFAULT_SOLVER_TIMEOUT_MS,
    error::solver,
    smt::{
        backend::{Assignment, CheckStatus, ScalarValue, SolverBackend},
        expr::{ExprRef, Sort},
    },
};

/// The configuration for the process-based backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The solver executable to invoke.
    ///
    /// Defaults to `z3`, resolved through the ambient `PATH`.
    pub binary: String,

    /// The hard timeout handed to the solver, in milliseconds.
    ///
    /// Defaults to [`DEFAULT_SOLVER_TIMEOUT_MS`].
    pub solver_timeout_ms: u64,
}

impl Config {
    /// Sets the `binary` config parameter to `value`.
    #[must_use]
    pub fn with_binary(mut self, value: impl Into<String>) -> Self {
        self.binary = value.into();
        self
    }

    /// Sets the `solver_timeout_ms` config parameter to `value`.
    #[must_use]
    pub fn with_solver_timeout_ms(mut self, value: u64) -> Self {
        self.solver_timeout_ms = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary:            "z3".into(),
            solver_timeout_ms: DEFAULT_SOLVER_TIMEOUT_MS,
        }
    }
}

/// The process-based backend.
#[derive(Clone, Debug, Default)]
pub struct Z3Process {
    config: Config,
}

impl Z3Process {
    /// Constructs a new backend with the provided configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Renders the SMT-LIB2 script for the assertion set.
    #[must_use]
    pub fn script(assertions: &[ExprRef]) -> String {
        use std::fmt::Write as _;

        let mut vars = BTreeMap::new();
        for assertion in assertions {
            assertion.collect_vars(&mut vars);
        }

        let mut script = String::from("(set-logic QF_ABV)\n");
        for (name, sort) in &vars {
            let _ = writeln!(script, "(declare-const |{name}| {sort})");
        }
        for assertion in assertions {
            let _ = writeln!(script, "(assert {assertion})");
        }
        script.push_str("(check-sat)\n(get-model)\n");
        script
    }

    /// Parses the solver's textual response.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the verdict line or a scalar model entry cannot be
    /// interpreted.
    pub fn parse_response(text: &str) -> Result<CheckStatus, solver::Error> {
        let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
        let verdict = lines.next().unwrap_or("");
        match verdict {
            "sat" => {
                let rest: String = lines.collect::<Vec<_>>().join("\n");
                Ok(CheckStatus::Sat(parse_model(&rest)?))
            }
            "unsat" => Ok(CheckStatus::Unsat),
            "unknown" => Ok(CheckStatus::Unknown("the solver reported unknown".into())),
            "timeout" => Ok(CheckStatus::Unknown("the solver timed out".into())),
            other => Err(solver::Error::MalformedResponse {
                line: other.to_string(),
            }),
        }
    }
}

impl SolverBackend for Z3Process {
    fn check(&mut self, assertions: &[ExprRef]) -> Result<CheckStatus, solver::Error> {
        let script = Self::script(assertions);
        let seconds = self.config.solver_timeout_ms.div_ceil(1000).max(1);

        tracing::debug!(
            assertions = assertions.len(),
            timeout_s = seconds,
            "handing the query to the solver process"
        );

        let mut child = Command::new(&self.config.binary)
            .arg("-in")
            .arg(format!("-T:{seconds}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(solver::Error::io)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).map_err(solver::Error::io)?;
        }
        let output = child.wait_with_output().map_err(solver::Error::io)?;

        let text = String::from_utf8_lossy(&output.stdout);
        let status = Self::parse_response(&text)?;
        tracing::debug!(?status, "the solver process answered");
        Ok(status)
    }
}

/// Parses the `(get-model)` output into a scalar assignment, skipping
/// function and array entries.
fn parse_model(text: &str) -> Result<Assignment, solver::Error> {
    let tokens = tokenize(text);
    let mut assignment = Assignment::new();

    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] != "define-fun" {
            i += 1;
            continue;
        }
        let entry_end = skip_sexpr(&tokens, i.saturating_sub(1));

        let name = tokens
            .get(i + 1)
            .ok_or_else(|| malformed("a definition without a name"))?
            .clone();

        // Only nullary scalar definitions are read; anything with
        // parameters or an array sort is skipped.
        if tokens.get(i + 2).map(String::as_str) != Some("(")
            || tokens.get(i + 3).map(String::as_str) != Some(")")
        {
            i = entry_end;
            continue;
        }

        let sort_start = i + 4;
        match tokens.get(sort_start).map(String::as_str) {
            Some("Bool") => {
                let value = match tokens.get(sort_start + 1).map(String::as_str) {
                    Some("true") => true,
                    Some("false") => false,
                    other => {
                        return Err(malformed(format!("a boolean read as {other:?}")));
                    }
                };
                assignment.set_scalar(name, ScalarValue::Bool(value));
            }
            Some("(") if tokens.get(sort_start + 2).map(String::as_str) == Some("BitVec") => {
                let width: u32 = tokens
                    .get(sort_start + 3)
                    .and_then(|token| token.parse().ok())
                    .ok_or_else(|| malformed("a bitvector sort without a width"))?;
                let value = parse_bv_value(&tokens, sort_start + 5, width)?;
                assignment.set_scalar(name, ScalarValue::Bits { value, width });
            }
            _ => {}
        }
        i = entry_end;
    }

    Ok(assignment)
}

/// Parses a bitvector value token: `#x...`, `#b...`, or `(_ bvN w)`.
fn parse_bv_value(tokens: &[String], at: usize, width: u32) -> Result<i64, solver::Error> {
    let token = tokens
        .get(at)
        .ok_or_else(|| malformed("a definition without a value"))?;
    let raw = if let Some(hex) = token.strip_prefix("#x") {
        u64::from_str_radix(hex, 16).map_err(|_| malformed(format!("the literal `{token}`")))?
    } else if let Some(bits) = token.strip_prefix("#b") {
        u64::from_str_radix(bits, 2).map_err(|_| malformed(format!("the literal `{token}`")))?
    } else if token == "(" {
        let literal = tokens
            .get(at + 2)
            .and_then(|token| token.strip_prefix("bv"))
            .ok_or_else(|| malformed("an uninterpretable value form"))?;
        literal
            .parse::<u64>()
            .map_err(|_| malformed(format!("the literal `bv{literal}`")))?
    } else {
        return Err(malformed(format!("the value token `{token}`")));
    };
    Ok(signed(raw, width))
}

/// Sign-extends the low `width` bits of `raw`.
#[allow(clippy::cast_possible_wrap)]
fn signed(raw: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
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

/// Splits s-expression text into tokens, keeping parentheses separate and
/// unquoting `|...|` symbols.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            '|' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                let mut symbol = String::new();
                for q in chars.by_ref() {
                    if q == '|' {
                        break;
                    }
                    symbol.push(q);
                }
                tokens.push(symbol);
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Gets the index one past the s-expression opening at `open`.
fn skip_sexpr(tokens: &[String], open: usize) -> usize {
    if tokens.get(open).map(String::as_str) != Some("(") {
        return open + 1;
    }
    let mut depth = 0usize;
    for (offset, token) in tokens[open..].iter().enumerate() {
        match token.as_str() {
            "(" => depth += 1,
            ")" => {
                depth -= 1;
                if depth == 0 {
                    return open + offset + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

/// Constructs a malformed-model error.
fn malformed(detail: impl std::fmt::Display) -> solver::Error {
    solver::Error::MalformedModel {
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod test {
    use crate::smt::{
        backend::{CheckStatus, ScalarValue},
        expr::{BvCmpOp, Expr, Sort},
        z3::Z3Process,
    };

    #[test]
    fn scripts_declare_before_asserting() {
        let x = Expr::var("arg$0", Sort::BitVec(32));
        let query = vec![Expr::bv_cmp(BvCmpOp::Sgt, x, Expr::bv(0, 32))];

        let script = Z3Process::script(&query);

        assert!(script.starts_with("(set-logic QF_ABV)"));
        assert!(script.contains("(declare-const |arg$0| (_ BitVec 32))"));
        assert!(script.contains("(assert (bvsgt |arg$0| (_ bv0 32)))"));
        assert!(script.ends_with("(check-sat)\n(get-model)\n"));
    }

    #[test]
    fn an_unsat_verdict_needs_no_model() -> anyhow::Result<()> {
        assert_eq!(Z3Process::parse_response("unsat\n")?, CheckStatus::Unsat);

        Ok(())
    }

    #[test]
    fn unknown_and_timeout_are_inconclusive() -> anyhow::Result<()> {
        assert!(matches!(
            Z3Process::parse_response("unknown\n")?,
            CheckStatus::Unknown(_)
        ));
        assert!(matches!(
            Z3Process::parse_response("timeout\n")?,
            CheckStatus::Unknown(_)
        ));

        Ok(())
    }

    #[test]
    fn garbage_verdicts_are_errors() {
        assert!(Z3Process::parse_response("segmentation fault\n").is_err());
    }

    #[test]
    fn sat_models_parse_scalars_and_skip_arrays() -> anyhow::Result<()> {
        let response = r"sat
(
  (define-fun |arg$0| () (_ BitVec 32)
    #xfffffffb)
  (define-fun |%t0| () Bool
    true)
  (define-fun |%t1| () (_ BitVec 64)
    (_ bv9 64))
  (define-fun lengths () (Array (_ BitVec 32) (_ BitVec 32))
    ((as const (Array (_ BitVec 32) (_ BitVec 32))) #x00000000))
)
";
        let CheckStatus::Sat(model) = Z3Process::parse_response(response)? else {
            anyhow::bail!("the verdict line says sat");
        };

        assert_eq!(
            model.scalar("arg$0"),
            Some(ScalarValue::Bits {
                value: -5,
                width: 32
            })
        );
        assert_eq!(model.scalar("%t0"), Some(ScalarValue::Bool(true)));
        assert_eq!(
            model.scalar("%t1"),
            Some(ScalarValue::Bits { value: 9, width: 64 })
        );
        assert!(model.arrays.is_empty());

        Ok(())
    }
}
