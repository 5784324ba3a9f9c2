//! This module contains constants that are needed throughout the codebase.

/// The default maximum number of search iterations (solver query + concrete
/// re-run) that the explorer will perform before giving up on a method.
pub const DEFAULT_MAX_ITERATIONS: usize = 1_000;

/// The default wall-clock timeout for a single concrete run of the method
/// under test, in milliseconds.
///
/// A run that exceeds this budget is discarded without being merged into the
/// execution tree.
pub const DEFAULT_METHOD_TIMEOUT_MS: u64 = 1_000;

/// The default number of interpreter steps a single concrete run may take
/// before it is abandoned.
///
/// This bounds runaway loops in the method under test even when no wall-clock
/// timeout is enforced.
pub const DEFAULT_INTERPRETER_STEP_LIMIT: usize = 100_000;

/// The default timeout handed to an external SMT solver process, in
/// milliseconds.
pub const DEFAULT_SOLVER_TIMEOUT_MS: u64 = 3_000;

/// The default number of candidate assignments the built-in solver will
/// evaluate before reporting that the query is beyond it.
pub const DEFAULT_PROBE_LIMIT: usize = 4_096;

/// The context length that the selector starts a search session with.
///
/// The length grows by one every time a full round over the tree's branch
/// depths completes without the search terminating.
pub const DEFAULT_INITIAL_CONTEXT_LENGTH: usize = 1;

/// The default number of loop iterations the explorer will wait before
/// polling the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;

/// The width of a JVM `int` in bits, as encoded on the solver side.
pub const INT_WIDTH_BITS: u32 = 32;

/// The width of a JVM `long` in bits, as encoded on the solver side.
pub const LONG_WIDTH_BITS: u32 = 64;

/// The width of an object address in bits, as encoded on the solver side.
///
/// Addresses are an artefact of the heap encoding and never escape to
/// recovered values; address `0` is reserved for `null`.
pub const ADDRESS_WIDTH_BITS: u32 = 32;

/// The width of the composite array-cell index (address concatenated with the
/// element index) in bits.
pub const ARRAY_CELL_WIDTH_BITS: u32 = ADDRESS_WIDTH_BITS + INT_WIDTH_BITS;

/// The name given to the synthetic `this` symbol in traces and terms.
pub const THIS_NAME: &str = "this";

/// The prefix for argument symbols in traces and terms, as in `arg$0`.
pub const ARG_PREFIX: &str = "arg$";

/// The class of the exception thrown by a failed null check.
pub const NULL_POINTER_CLASS: &str = "java.lang.NullPointerException";

/// The class of the exception thrown by a failed array bounds check.
pub const OUT_OF_BOUNDS_CLASS: &str = "java.lang.ArrayIndexOutOfBoundsException";

/// The class of the exception thrown by a failed checked cast.
pub const CLASS_CAST_CLASS: &str = "java.lang.ClassCastException";

/// The class of the exception thrown by an integer division by zero.
pub const ARITHMETIC_CLASS: &str = "java.lang.ArithmeticException";

/// The class of the exception thrown by an allocation with a negative
/// length.
pub const NEGATIVE_ARRAY_SIZE_CLASS: &str = "java.lang.NegativeArraySizeException";

/// The largest array length model recovery will materialise.
///
/// A solver is free to pick an enormous length for an array whose length is
/// only bounded from below; recovered inputs cap it so a single model cannot
/// exhaust memory.
pub const MAX_RECOVERED_ARRAY_LENGTH: usize = 4_096;
