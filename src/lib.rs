//! schemexp - core evaluator for a small Scheme dialect
//!
//! The crate is split the way the interpreter pipeline runs:
//!
//! ```text
//! source text --(scheme)--> Syntax --(parser)--> Expr --(evaluator)--> Value
//! ```
//!
//! The reader is optional (cargo feature `scheme`); the parser and evaluator only need a
//! [`syntax::Syntax`] tree and an [`evaluator::Environment`], so any other syntax producer
//! can drive them.
//!
//! ```scheme
//! (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))
//! (fact 10)                 ; 3628800
//! (/ 1 3)                   ; 1/3, exact rational
//! (quote (1 2 . 3))         ; improper list
//! (letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1)))))
//!          (odd? (lambda (n) (if (= n 0) #f (even? (- n 1))))))
//!   (even? 10))             ; #t
//! ```
//!
//! ## Semantics worth knowing
//!
//! - Every value except `#f` is true in `if`, `cond`, `and` and `or`.
//! - `or` yields `#t`/`#f`, never the truthy operand itself.
//! - Rationals are kept exactly as computed: `(/ 2 4)` is `2/4`, not `1/2`.
//! - Pairs and environment frames are shared, so `set-car!`, `set-cdr!`, `set!` and
//!   `define` are visible through every alias and every closure.
//! - Special-form keywords and primitive names may be shadowed by lambda parameters and
//!   `let` bindings, but not redefined with `define`.
//!
//! ## Modules
//!
//! - `value`: runtime values, pairs and procedures
//! - `syntax`: the parser's input tree
//! - `ast`: the executable expression tree
//! - `builtinops`: primitive and special form registry, numeric tower
//! - `parser`: syntax tree to expression tree
//! - `evaluator`: expression evaluation and the lexical environment
//! - `scheme`: text reader (feature `scheme`)

use std::fmt;

use crate::builtinops::Arity;

/// Maximum nesting accepted by the text reader
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum number of nested procedure applications before evaluation is abandoned with
/// an error. The evaluator grows its stack on demand, so this only stops runaway
/// recursion from consuming memory without bound.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of reader errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
}

/// A structured error providing detailed information about a reader failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, context: Option<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
        }
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Error types for the interpreter
///
/// Every failure is fatal for the expression being parsed or evaluated; the host decides
/// whether to keep going (a REPL) or stop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The text reader could not build a syntax tree
    #[error("ParseError: {0}")]
    Parse(ParseError),
    /// A special form or quoted datum has the wrong shape
    #[error("SyntaxError: {0}")]
    Syntax(String),
    #[error("EvaluationError: {0}")]
    Eval(String),
    #[error("Type error: {0}")]
    Type(String),
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    #[error("{}", format_arity(.expected, .got, .expression))]
    Arity {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
}

fn format_arity(expected: &Arity, got: &usize, expression: &Option<String>) -> String {
    match expression {
        Some(expr) => {
            format!("ArityError: {expr}: expected {expected} arguments, got {got}")
        }
        None => format!("ArityError: procedure expected {expected} arguments but got {got}"),
    }
}

impl Error {
    /// Create an arity error without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::Arity {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an arity error naming the offending form
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: impl Into<String>) -> Self {
        Error::Arity {
            expected,
            got,
            expression: Some(expression.into()),
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod parser;
pub mod syntax;
pub mod value;

#[cfg(feature = "scheme")]
pub mod scheme;

pub use evaluator::{Environment, eval, eval_with_output};
pub use parser::parse;
pub use syntax::Syntax;
pub use value::Value;

#[cfg(feature = "scheme")]
pub use evaluator::{eval_source, eval_source_with_output};
