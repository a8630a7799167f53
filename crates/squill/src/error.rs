//! Runtime and reader error types.
//!
//! Keeping reader/eval failures distinct lets callers handle user feedback and
//! recovery policies accurately without string matching. Evaluation errors
//! unwind through `?`; every `source` wrapper frame they pass appends its
//! location to the trace, so `Display` prints a backtrace chain.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can produce a runtime error.
pub type EvalResult<T> = Result<T, EvalError>;

/// Classification of runtime failures.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Reader failure surfaced through evaluation (`eval` of a string, REPL input).
    Parse,
    /// A symbol had no binding in any enclosing frame or the declaration registry.
    UnboundSymbol,
    /// A call arity fell outside the declared `[min, max]` range.
    ArityMismatch,
    /// A coercion failed or a special form received the wrong kind of value.
    TypeMismatch,
    /// `nth`, `car`, and friends ran off the end of a sequence.
    IndexOutOfRange,
    /// Unknown pattern head or malformed regex capture arity in `match`.
    PatternMalformed,
    /// A PEG parse produced no match.
    ParserFailed,
    /// `(error x)` raised by user code, carrying `x` as payload.
    UserError,
    /// The ambient cancellation token fired.
    Cancelled,
    /// An evaluator invariant was violated. Should never surface to users.
    InternalPanic,
}

/// A source location attached to an error as it unwinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    /// Source name as given to the reader (file name, `"repl"`, ...).
    pub source: String,
    /// 1-based line of the opening token.
    pub line: u32,
    /// 1-based column of the opening token.
    pub col: u32,
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.col)
    }
}

/// A runtime error unwinding out of the evaluator.
#[derive(Debug, Clone)]
pub struct EvalError {
    /// What went wrong, as a flat kind usable for dispatch.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// The raised value for `UserError`, nil otherwise.
    pub payload: Option<Value>,
    /// Source locations appended by `source` wrappers, innermost first.
    pub trace: Vec<SourceLoc>,
}

impl EvalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
            trace: Vec::new(),
        }
    }

    /// Builds a `UserError` carrying the raised value.
    pub fn user(payload: Value) -> Self {
        Self {
            kind: ErrorKind::UserError,
            message: payload.to_string(),
            payload: Some(payload),
            trace: Vec::new(),
        }
    }

    /// Appends a source location to the trace; called by `source` wrapper frames
    /// as the error unwinds, innermost location first.
    #[must_use]
    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.trace.push(loc);
        self
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for loc in &self.trace {
            write!(f, "\n  at {loc}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {}

/// Convenience constructors for the common kinds, so call sites stay short.
impl EvalError {
    pub fn unbound(name: &str) -> Self {
        Self::new(ErrorKind::UnboundSymbol, format!("unbound symbol `{name}`"))
    }

    pub fn arity(name: &str, got: usize, min: usize, max: usize) -> Self {
        let range = if max == usize::MAX {
            format!("at least {min}")
        } else if min == max {
            format!("{min}")
        } else {
            format!("{min}..{max}")
        };
        Self::new(
            ErrorKind::ArityMismatch,
            format!("`{name}` expects {range} argument(s), got {got}"),
        )
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexOutOfRange, message)
    }

    pub fn pattern(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PatternMalformed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalPanic, message)
    }
}

/// Reader-stage failure. Carries the location of the token that opened the
/// offending construct, not the position where input ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// A `(` was never closed.
    Unclosed(SourceLoc),
    /// A `"` was never closed.
    UnterminatedString(SourceLoc),
    /// An unsupported backslash escape inside a string literal.
    BadEscape(SourceLoc, char),
    /// A `/*` comment was never closed.
    UnclosedComment(SourceLoc),
    /// A `)` with no matching opener. Never incomplete: more input cannot
    /// repair it, so the REPL discards the buffer.
    UnexpectedClose(SourceLoc),
}

impl ReadError {
    /// True when feeding more input could complete the form. The REPL uses
    /// this to keep the partial buffer and switch to the continuation prompt.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::Unclosed(_) | Self::UnterminatedString(_) | Self::UnclosedComment(_)
        )
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unclosed(loc) => write!(f, "unclosed `(` opened at {loc}"),
            Self::UnterminatedString(loc) => write!(f, "unterminated string opened at {loc}"),
            Self::BadEscape(loc, c) => write!(f, "unsupported string escape `\\{c}` at {loc}"),
            Self::UnclosedComment(loc) => write!(f, "unclosed block comment opened at {loc}"),
            Self::UnexpectedClose(loc) => write!(f, "unexpected `)` at {loc}"),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<ReadError> for EvalError {
    fn from(error: ReadError) -> Self {
        Self::new(ErrorKind::Parse, error.to_string())
    }
}

/// Error type for REPL execution, separating failures by pipeline stage.
#[derive(Debug, Clone)]
pub enum ReplError {
    /// Tokenizing or tree-building failed before evaluation.
    Read(ReadError),
    /// The evaluator raised while executing the form.
    Eval(EvalError),
}

impl fmt::Display for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(error) => write!(f, "read error: {error}"),
            Self::Eval(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ReplError {}

impl From<ReadError> for ReplError {
    fn from(error: ReadError) -> Self {
        Self::Read(error)
    }
}

impl From<EvalError> for ReplError {
    fn from(error: EvalError) -> Self {
        Self::Eval(error)
    }
}
