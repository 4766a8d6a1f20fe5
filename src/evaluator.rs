//! Expression evaluation.
//!
//! [`eval`] walks an [`Expr`] recursively against a shared [`Environment`]. There is no
//! tail-call elimination, so every nested evaluation runs on a stack that is grown on
//! demand (see [`ensure_sufficient_stack`]). The depth counter tracks nested procedure
//! applications only; exceeding [`MAX_EVAL_DEPTH`] aborts runaway recursion with an error.
//!
//! `display` output goes to stdout through [`eval`], or to any writer through
//! [`eval_with_output`].

mod environment;

pub use environment::Environment;

use std::io::{self, Write};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Expr, UnaryOp};
use crate::builtinops::{
    Arity, ConstantOp, OpKind, apply_binary, apply_builtin_procedure, apply_unary,
    apply_variadic, builtin_procedure, find_scheme_op, is_reserved_name,
};
use crate::syntax::Syntax;
use crate::value::{Procedure, Value};
use crate::{Error, MAX_EVAL_DEPTH};

/// Evaluate an expression, writing `display` output to stdout
pub fn eval(expr: &Expr, env: &Environment) -> Result<Value, Error> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    eval_with_output(expr, env, &mut out)
}

/// Evaluate an expression, writing `display` output to `out`
pub fn eval_with_output(expr: &Expr, env: &Environment, out: &mut dyn Write) -> Result<Value, Error> {
    Evaluation { out }.eval_with_depth_tracking(expr, env, 0)
}

/// Read, parse and evaluate every datum of a program text in order.
///
/// Stops early and returns [`Value::Terminate`] when `(exit)` is evaluated at top level;
/// otherwise returns the value of the last datum (`Void` for an empty program).
#[cfg(feature = "scheme")]
pub fn eval_source(input: &str, env: &Environment) -> Result<Value, Error> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    eval_source_with_output(input, env, &mut out)
}

/// Like [`eval_source`], writing `display` output to `out`
#[cfg(feature = "scheme")]
pub fn eval_source_with_output(
    input: &str,
    env: &Environment,
    out: &mut dyn Write,
) -> Result<Value, Error> {
    let mut last = Value::Void;
    for datum in crate::scheme::parse_program(input)? {
        // Each datum is parsed only after the previous one ran, so earlier
        // definitions are visible to shadowing checks
        let expr = crate::parser::parse(&datum, env)?;
        last = eval_with_output(&expr, env, out)?;
        if matches!(last, Value::Terminate) {
            break;
        }
    }
    Ok(last)
}

/// Keep at least this much stack available before recursing (100KB)
const RED_ZONE: usize = 100 * 1024;

/// Size of each stack segment allocated when the red zone is reached (1MB)
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Runs `f`, first moving to a freshly allocated stack segment if the current one is
/// nearly exhausted
#[inline]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// State shared by one top-level evaluation
struct Evaluation<'out> {
    out: &'out mut dyn Write,
}

impl Evaluation<'_> {
    /// Evaluate an expression; `depth` is the number of procedure applications in
    /// progress
    fn eval_with_depth_tracking(
        &mut self,
        expr: &Expr,
        env: &Environment,
        depth: usize,
    ) -> Result<Value, Error> {
        ensure_sufficient_stack(|| self.eval_expr(expr, env, depth))
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Environment, depth: usize) -> Result<Value, Error> {
        match expr {
            Expr::Fixnum(n) => Ok(Value::Integer(*n)),
            Expr::RationalNum(_, 0) => Err(Error::Eval("Division by zero".to_owned())),
            Expr::RationalNum(num, den) => Ok(Value::Rational(*num, *den)),
            // Fresh storage on every evaluation
            Expr::StringExpr(text) => Ok(Value::string(text)),
            Expr::True => Ok(Value::Boolean(true)),
            Expr::False => Ok(Value::Boolean(false)),
            Expr::MakeVoid => Ok(Value::Void),
            Expr::Exit => {
                debug!("exit requested");
                Ok(Value::Terminate)
            }

            Expr::Var(name) => lookup_variable(name, env),

            Expr::Quote(datum) => quote_to_value(datum),

            Expr::Unary {
                op: UnaryOp::Display,
                operand,
            } => {
                let value = self.eval_with_depth_tracking(operand, env, depth)?;
                self.display(&value)?;
                Ok(Value::Void)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_with_depth_tracking(operand, env, depth)?;
                apply_unary(*op, &value).map_err(|err| add_context(err, expr))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval_with_depth_tracking(lhs, env, depth)?;
                let rhs = self.eval_with_depth_tracking(rhs, env, depth)?;
                apply_binary(*op, &lhs, &rhs).map_err(|err| add_context(err, expr))
            }
            Expr::Variadic { op, operands } => {
                let args = self.eval_args(operands, env, depth)?;
                apply_variadic(*op, &args).map_err(|err| add_context(err, expr))
            }

            Expr::If {
                cond,
                conseq,
                alter,
            } => {
                if self.eval_with_depth_tracking(cond, env, depth)?.is_truthy() {
                    self.eval_with_depth_tracking(conseq, env, depth)
                } else {
                    self.eval_with_depth_tracking(alter, env, depth)
                }
            }

            Expr::Begin(exprs) => self.eval_sequence(exprs, env, depth),

            Expr::Cond(clauses) => self.eval_cond(clauses, env, depth),

            Expr::Lambda { params, body } => Ok(Value::Procedure(Rc::new(Procedure::Closure {
                params: params.clone(),
                body: Rc::clone(body),
                env: env.clone(),
            }))),

            Expr::Apply { rator, rands } => {
                let procedure = match self.eval_with_depth_tracking(rator, env, depth)? {
                    Value::Procedure(procedure) => procedure,
                    other => {
                        return Err(add_context(
                            Error::Type(format!("Cannot apply non-procedure: {other}")),
                            expr,
                        ));
                    }
                };
                let args = self.eval_args(rands, env, depth)?;
                self.apply_procedure(&procedure, args, depth)
                    .map_err(|err| add_context(err, expr))
            }

            Expr::Define { name, expr: init } => {
                if is_reserved_name(name) {
                    return Err(Error::Eval(format!(
                        "Cannot redefine primitive or reserved word: {name}"
                    )));
                }
                // Bound before the initialiser runs so recursive lambdas can see themselves
                if !env.contains_local(name) {
                    env.define(name.as_str(), Value::Void);
                }
                let value = self.eval_with_depth_tracking(init, env, depth)?;
                debug!(name = %name, value = %value, "define");
                env.define(name.as_str(), value);
                Ok(Value::Void)
            }

            Expr::Let { bindings, body } => {
                let values = bindings
                    .iter()
                    .map(|(_, init)| self.eval_with_depth_tracking(init, env, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                let frame = Environment::with_parent(env);
                for ((name, _), value) in bindings.iter().zip(values) {
                    frame.define(name.as_str(), value);
                }
                self.eval_with_depth_tracking(body, &frame, depth)
            }

            Expr::Letrec { bindings, body } => {
                let frame = Environment::with_parent(env);
                for (name, _) in bindings {
                    frame.define(name.as_str(), Value::Void);
                }
                let values = bindings
                    .iter()
                    .map(|(_, init)| self.eval_with_depth_tracking(init, &frame, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                for ((name, _), value) in bindings.iter().zip(values) {
                    frame.modify(name, value)?;
                }
                self.eval_with_depth_tracking(body, &frame, depth)
            }

            Expr::Set { name, expr: value_expr } => {
                // The target must exist before the new value is computed
                if !env.contains(name) {
                    return Err(Error::UnboundVariable(name.clone()));
                }
                let value = self.eval_with_depth_tracking(value_expr, env, depth)?;
                debug!(name = %name, value = %value, "set!");
                env.modify(name, value)?;
                Ok(Value::Void)
            }

            Expr::And(operands) => {
                let Some((last, rest)) = operands.split_last() else {
                    return Ok(Value::Boolean(true));
                };
                for operand in rest {
                    if !self.eval_with_depth_tracking(operand, env, depth)?.is_truthy() {
                        return Ok(Value::Boolean(false));
                    }
                }
                let value = self.eval_with_depth_tracking(last, env, depth)?;
                if value.is_truthy() {
                    Ok(value)
                } else {
                    Ok(Value::Boolean(false))
                }
            }

            // Yields #t rather than the truthy operand itself
            Expr::Or(operands) => {
                for operand in operands {
                    if self.eval_with_depth_tracking(operand, env, depth)?.is_truthy() {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            }
        }
    }

    /// Helper function to evaluate a list of argument expressions, left to right
    fn eval_args(
        &mut self,
        args: &[Expr],
        env: &Environment,
        depth: usize,
    ) -> Result<Vec<Value>, Error> {
        args.iter()
            .map(|arg| self.eval_with_depth_tracking(arg, env, depth))
            .collect()
    }

    fn eval_sequence(
        &mut self,
        exprs: &[Expr],
        env: &Environment,
        depth: usize,
    ) -> Result<Value, Error> {
        let mut result = Value::Void;
        for expr in exprs {
            result = self.eval_with_depth_tracking(expr, env, depth)?;
        }
        Ok(result)
    }

    fn eval_cond(
        &mut self,
        clauses: &[Vec<Expr>],
        env: &Environment,
        depth: usize,
    ) -> Result<Value, Error> {
        for clause in clauses {
            let Some((test, body)) = clause.split_first() else {
                return Err(Error::Eval("cond: empty clause is invalid".to_owned()));
            };
            let test_value = self.eval_with_depth_tracking(test, env, depth)?;
            if test_value.is_truthy() {
                if body.is_empty() {
                    return Ok(test_value);
                }
                return self.eval_sequence(body, env, depth);
            }
        }
        Ok(Value::Boolean(false))
    }

    fn apply_procedure(
        &mut self,
        procedure: &Procedure,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, Error> {
        trace!(procedure = ?procedure, arguments = args.len(), "apply");
        match procedure {
            Procedure::Builtin(op) => apply_builtin_procedure(op, &args),
            Procedure::Closure { params, body, env } => {
                if params.len() != args.len() {
                    return Err(Error::arity_error(Arity::Exact(params.len()), args.len()));
                }
                if depth >= MAX_EVAL_DEPTH {
                    return Err(Error::Eval(format!(
                        "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
                    )));
                }
                // Fresh frame over the captured environment, never the caller's
                let frame = Environment::with_parent(env);
                for (param, arg) in params.iter().zip(args) {
                    frame.define(param.as_str(), arg);
                }
                self.eval_with_depth_tracking(body, &frame, depth + 1)
            }
        }
    }

    fn display(&mut self, value: &Value) -> Result<(), Error> {
        let written = match value {
            Value::String(text) => write!(self.out, "{text}"),
            other => write!(self.out, "{other}"),
        };
        written
            .and_then(|()| self.out.flush())
            .map_err(|err| Error::Eval(format!("display: {err}")))
    }
}

/// Helper function to add expression context to errors. Only the innermost failing
/// expression is recorded.
fn add_context(error: Error, expr: &Expr) -> Error {
    const MARKER: &str = "\n  Context: while evaluating: ";
    match error {
        Error::Eval(msg) if !msg.contains(MARKER) => Error::Eval(format!("{msg}{MARKER}{expr}")),
        Error::Type(msg) if !msg.contains(MARKER) => Error::Type(format!("{msg}{MARKER}{expr}")),
        // Unbound variables and arity errors carry their own context
        other => other,
    }
}

/// Whether a token would have been read as a numeric literal: an optionally signed
/// integer or decimal, with an optional exponent
fn looks_numeric(name: &str) -> bool {
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let unsigned = name.strip_prefix(['+', '-']).unwrap_or(name);
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], Some(&unsigned[pos + 1..])),
        None => (unsigned, None),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let has_digit = !int_part.is_empty() || !frac_part.is_empty();
    if !has_digit || !is_digits(int_part) || !is_digits(frac_part) {
        return false;
    }
    match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !exp.is_empty() && is_digits(exp)
        }
    }
}

fn check_variable_name(name: &str) -> Result<(), Error> {
    let invalid = |reason: String| Err(Error::Eval(format!("Invalid variable name {name:?}: {reason}")));
    match name.chars().next() {
        None => return invalid("empty name".to_owned()),
        Some(first) if first.is_ascii_digit() || first == '.' || first == '@' => {
            return invalid(format!("cannot start with '{first}'"));
        }
        Some(_) => {}
    }
    if let Some(c) = name.chars().find(|c| matches!(c, '#' | '\'' | '"' | '`')) {
        return invalid(format!("contains forbidden character '{c}'"));
    }
    if looks_numeric(name) {
        return invalid("numeric format is read as a literal".to_owned());
    }
    Ok(())
}

fn lookup_variable(name: &str, env: &Environment) -> Result<Value, Error> {
    check_variable_name(name)?;
    env.find(name)
        .or_else(|| primitive_as_procedure(name))
        .ok_or_else(|| Error::UnboundVariable(name.to_owned()))
}

/// Procedure value for a primitive named where a value is expected, e.g. `(map car xs)`.
/// Fixed-arity primitives become closures around the primitive node; `and`/`or` are
/// syntax-like and have no procedure form.
fn primitive_as_procedure(name: &str) -> Option<Value> {
    let op = find_scheme_op(name).filter(|op| op.is_first_class())?;
    let arg = |param: &str| Box::new(Expr::Var(param.to_owned()));
    let (params, body) = match op.op_kind {
        OpKind::Variadic(_) => return Some(builtin_procedure(op)),
        OpKind::Constant(ConstantOp::Void) => (vec![], Expr::MakeVoid),
        OpKind::Constant(ConstantOp::Exit) => (vec![], Expr::Exit),
        OpKind::Unary(op) => (
            vec!["arg".to_owned()],
            Expr::Unary {
                op,
                operand: arg("arg"),
            },
        ),
        OpKind::Binary(op) => (
            vec!["lhs".to_owned(), "rhs".to_owned()],
            Expr::Binary {
                op,
                lhs: arg("lhs"),
                rhs: arg("rhs"),
            },
        ),
        OpKind::And | OpKind::Or => return None,
    };
    Some(Value::Procedure(Rc::new(Procedure::Closure {
        params,
        body: Rc::new(body),
        env: Environment::new(),
    })))
}

/// Converts quoted syntax to a value without evaluating it; a `.` before the last
/// element makes that element the tail of the list
fn quote_to_value(datum: &Syntax) -> Result<Value, Error> {
    match datum {
        Syntax::Number(n) => Ok(Value::Integer(*n)),
        Syntax::Rational(num, den) => Ok(Value::Rational(*num, *den)),
        Syntax::Symbol(name) => Ok(Value::symbol(name.as_str())),
        Syntax::String(text) => Ok(Value::string(text)),
        Syntax::True => Ok(Value::Boolean(true)),
        Syntax::False => Ok(Value::Boolean(false)),
        Syntax::List(items) => {
            let (elements, tail) = match items.iter().position(Syntax::is_dot) {
                None => (items.as_slice(), Value::Null),
                Some(pos) if pos > 0 && pos + 2 == items.len() => {
                    (&items[..pos], quote_to_value(&items[pos + 1])?)
                }
                Some(_) => {
                    return Err(Error::Syntax(format!(
                        "Invalid dotted list in quote: {datum}"
                    )));
                }
            };
            elements.iter().rev().try_fold(tail, |tail, item| {
                Ok(Value::cons(quote_to_value(item)?, tail))
            })
        }
    }
}

#[cfg(all(test, feature = "scheme"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::scheme::parse_scheme;
    use crate::value::val;
    use pretty_assertions::assert_eq;

    fn sym(name: &str) -> Value {
        Value::symbol(name)
    }

    fn list(items: Vec<Value>) -> Value {
        Value::list_from(items)
    }

    fn nil() -> Value {
        Value::Null
    }

    fn rat(num: i64, den: i64) -> Value {
        Value::Rational(num, den)
    }

    /// Read, parse and evaluate one datum, collecting `display` output
    fn run(input: &str, env: &Environment, out: &mut Vec<u8>) -> Result<Value, crate::Error> {
        let syntax = parse_scheme(input)?;
        let expr = parse(&syntax, env)?;
        eval_with_output(&expr, env, out)
    }

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Macro for setup expressions that return Void (like define)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Value::Void))
        };
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = Environment::new();

            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let mut out = Vec::new();
        match (run(input, env, &mut out), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert!(
                    actual == *expected_val,
                    "{test_id} '{input}': expected {expected_val}, got {actual}"
                );
            }
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id} '{input}': error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id} '{input}': expected error, got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!(
                    "{test_id} '{input}': expected error containing '{expected_text}', got {actual:?}"
                );
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id} '{input}': expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    /// Each case runs in a fresh environment
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = Environment::new();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("9223372036854775807", success(i64::MAX)),
            ("3/4", EvalResult(rat(3, 4))),
            ("#t", success(true)),
            ("#f", success(false)),
            ("\"hello\"", success("hello")),
            ("\"with\\\"quotes\"", success("with\"quotes")),
            ("(void)", EvalResult(Value::Void)),
            ("(exit)", EvalResult(Value::Terminate)),
            // === NUMERIC TOWER ===
            ("(+)", success(0)),
            ("(*)", success(1)),
            ("(- 5)", success(-5)),
            ("(/ 2)", EvalResult(rat(1, 2))),
            ("(+ 'a)", success(sym("a"))),
            ("(* \"s\")", success("s")),
            ("(+ 1 2 3)", success(6)),
            ("(- 10 3 2)", success(5)),
            ("(* 2 3 4)", success(24)),
            ("(/ 6 3)", success(2)),
            ("(/ 6 4)", EvalResult(rat(6, 4))),
            ("(/ 12 2 3)", success(2)),
            ("(+ 1/2 1/2)", EvalResult(rat(4, 4))),
            ("(+ 1 1/2)", EvalResult(rat(3, 2))),
            ("(* 2 1/3)", EvalResult(rat(2, 3))),
            ("(- 1/2 1/3)", EvalResult(rat(1, 6))),
            ("(/ 1/2 1/4)", EvalResult(rat(4, 2))),
            ("(/ 1 0)", SpecificError("Division by zero")),
            ("(/ 1 0/5)", SpecificError("Division by zero")),
            ("(+ 9223372036854775807 1)", SpecificError("overflow")),
            ("(* 4611686018427387904 2)", SpecificError("overflow")),
            ("(+ 1 \"hello\")", SpecificError("Type error: + requires numeric")),
            ("(+ 1 #t)", SpecificError("Context: while evaluating: (+ 1 #t)")),
            ("(modulo 7 3)", success(1)),
            ("(modulo -7 3)", success(-1)),
            ("(modulo 7 0)", SpecificError("Division by zero")),
            ("(modulo 1/2 3)", Error),
            ("(expt 2 10)", success(1024)),
            ("(expt 2 0)", success(1)),
            ("(expt 2 -1)", SpecificError("Negative exponent")),
            ("(expt 0 0)", SpecificError("0^0")),
            ("(expt 2 31)", SpecificError("overflow")),
            ("(expt -2 31)", success(-2_147_483_648_i64)),
            // === COMPARISONS ===
            ("(< 1 2 3)", success(true)),
            ("(< 1 3 2)", success(false)),
            ("(<)", success(true)),
            ("(< 5)", success(true)),
            ("(<= 1 1 2)", success(true)),
            ("(= 1/2 2/4)", success(true)),
            ("(= 2 4/2)", success(true)),
            ("(> 3 2 1)", success(true)),
            ("(>= 1/3 1/2)", success(false)),
            ("(< 1 \"a\")", SpecificError("requires numeric")),
            // Short-circuit: the pair after a false pair is never examined
            ("(< 2 1 \"a\")", success(false)),
            // === BOOLEANS ===
            ("(not #f)", success(true)),
            ("(not 0)", success(false)),
            ("(not '())", success(false)),
            ("(and)", success(true)),
            ("(and 1 2)", success(2)),
            ("(and 1 #f 3)", success(false)),
            ("(and #f undefined-var)", success(false)),
            ("(or)", success(false)),
            ("(or #f 5)", success(true)),
            ("(or #f #f)", success(false)),
            ("(or #t undefined-var)", success(true)),
            // === CONDITIONALS ===
            ("(if 0 1 2)", success(1)),
            ("(if '() 1 2)", success(1)),
            ("(if #f 1)", success(false)),
            ("(if #f (car 1) 2)", success(2)),
            ("(cond (#f 1) (#t 2))", success(2)),
            ("(cond (#f 1) (else 3))", success(3)),
            ("(cond (#f 1))", success(false)),
            ("(cond (5))", success(5)),
            ("(cond (#t 1 2 3))", success(3)),
            ("(cond (#f) ())", SpecificError("empty clause")),
            // === QUOTE ===
            ("(quote hello)", success(sym("hello"))),
            ("'(1 2 3)", success(list(vec![val(1), val(2), val(3)]))),
            ("'()", success(nil())),
            ("()", success(nil())),
            (
                "(quote (1 2 . 3))",
                success(Value::cons(val(1), Value::cons(val(2), val(3)))),
            ),
            ("'(a . b)", success(Value::cons(sym("a"), sym("b")))),
            (
                "'((1 . 2) 3)",
                success(list(vec![Value::cons(val(1), val(2)), val(3)])),
            ),
            ("''x", success(list(vec![sym("quote"), sym("x")]))),
            ("'(if 1 2)", success(list(vec![sym("if"), val(1), val(2)]))),
            ("(quote (1 . 2 . 3))", SpecificError("Invalid dotted list")),
            ("(quote (. 1))", Error),
            // === PAIRS AND LISTS ===
            ("(car (list 1 2 3))", success(1)),
            ("(cdr (list 1 2 3))", success(list(vec![val(2), val(3)]))),
            ("(cons 1 2)", success(Value::cons(val(1), val(2)))),
            ("(cons 1 '())", success(list(vec![val(1)]))),
            ("(list)", success(nil())),
            ("(car '())", SpecificError("car requires a pair")),
            ("(cdr 5)", SpecificError("Type error")),
            ("(list? '(1 2))", success(true)),
            ("(list? '(1 . 2))", success(false)),
            ("(list? '())", success(true)),
            ("(pair? '())", success(false)),
            ("(null? '())", success(true)),
            // === PREDICATES ===
            ("(boolean? #f)", success(true)),
            ("(number? 1/2)", success(true)),
            ("(number? \"1\")", success(false)),
            ("(symbol? 'a)", success(true)),
            ("(string? \"a\")", success(true)),
            ("(procedure? car)", success(true)),
            ("(procedure? +)", success(true)),
            ("(procedure? (lambda () 1))", success(true)),
            ("(procedure? 'car)", success(false)),
            // === EQ? ===
            ("(eq? 1 1)", success(true)),
            ("(eq? 1/2 1/2)", success(true)),
            ("(eq? 1/2 2/4)", success(false)),
            ("(eq? 'a 'a)", success(true)),
            ("(eq? '() '())", success(true)),
            ("(eq? (void) (void))", success(true)),
            ("(eq? \"a\" \"a\")", success(false)),
            ("(eq? (list 1) (list 1))", success(false)),
            ("(let ((p (cons 1 2))) (eq? p p))", success(true)),
            // === LAMBDA AND APPLICATION ===
            ("((lambda (x) (* x x)) 4)", success(16)),
            ("((lambda () 42))", success(42)),
            ("((lambda (x) x 1 2) 0)", success(2)),
            ("((if #t + *) 2 3)", success(5)),
            ("((if #f + *) 2 3)", success(6)),
            ("(((lambda (x) (lambda (y) (+ x y))) 10) 5)", success(15)),
            ("((lambda (x) x))", SpecificError("expected 1 arguments but got 0")),
            ("((lambda (x) x) 1 2)", SpecificError("ArityError")),
            ("(5 3)", SpecificError("Cannot apply non-procedure: 5")),
            ("(\"f\" 1)", SpecificError("Type error")),
            // === SHADOWING RESERVED NAMES ===
            ("((lambda (if) (if 1 2 3)) +)", success(6)),
            ("((lambda (quote) (quote 1 2)) *)", success(2)),
            ("((lambda (car) (car 5)) (lambda (x) (+ x 1)))", success(6)),
            ("(let ((define list)) (define 1 2))", success(list(vec![val(1), val(2)]))),
            // === PRIMITIVES AS VALUES ===
            ("((lambda (f) (f '(1 2))) car)", success(1)),
            ("((lambda (f) (f 1 2)) cons)", success(Value::cons(val(1), val(2)))),
            ("((lambda (f) (f 1 2 3)) list)", success(list(vec![val(1), val(2), val(3)]))),
            ("((lambda (f) (f 9 6 2)) >)", success(true)),
            ("((lambda (f) (f 5)) -)", success(-5)),
            ("((lambda (f) (f)) -)", SpecificError("ArityError")),
            ("((lambda (f) (f 1 2)) car)", SpecificError("ArityError")),
            ("((lambda (f) (f 'a 'a)) eq?)", success(true)),
            ("((lambda (f) (f)) void)", EvalResult(Value::Void)),
            ("and", SpecificError("Unbound variable: and")),
            ("if", SpecificError("Unbound variable: if")),
            // === VARIABLE NAMES ===
            ("undefined-var", SpecificError("Unbound variable: undefined-var")),
            ("1abc", SpecificError("Invalid variable name")),
            ("...", SpecificError("Invalid variable name")),
            ("@x", SpecificError("Invalid variable name")),
            ("a#b", SpecificError("forbidden character")),
            ("+1e5", SpecificError("numeric format")),
            ("-.5", SpecificError("numeric format")),
            ("+.e", SpecificError("Unbound variable")),
            ("(procedure? -)", success(true)),
            // === LET / LETREC / SET! ===
            ("(let ((x 1)) (set! x 2) x)", success(2)),
            ("(let ((x 1) (y 2)) (+ x y))", success(3)),
            ("(let () 5)", success(5)),
            ("(let ((x 1)) (let ((x 2) (y x)) y))", success(1)),
            (
                "(letrec ((f (lambda (n) (if (= n 0) 1 (* n (f (- n 1))))))) (f 5))",
                success(120),
            ),
            (
                "(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1))))) (odd? (lambda (n) (if (= n 0) #f (even? (- n 1)))))) (even? 10))",
                success(true),
            ),
            ("(set! undefined-var 1)", SpecificError("Unbound variable: undefined-var")),
            // === DEFINE ===
            ("(define car 1)", SpecificError("Cannot redefine")),
            ("(define if 1)", SpecificError("Cannot redefine")),
            ("(define (lambda) 1)", SpecificError("Cannot redefine")),
            // === DISPLAY ===
            ("(display \"hi\")", EvalResult(Value::Void)),
            // === BEGIN ===
            ("(begin)", EvalResult(Value::Void)),
            ("(begin 1 2 3)", success(3)),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_environment_sensitive_operations() {
        let environment_test_cases = vec![
            // === DEFINE AND LOOKUP ===
            TestEnvironment(vec![
                test_setup!("(define x 42)"),
                ("x", success(42)),
                ("(+ x 8)", success(50)),
                test_setup!("(define x 100)"),
                ("x", success(100)),
                ("y", Error),
            ]),
            // === RECURSIVE DEFINE ===
            TestEnvironment(vec![
                test_setup!("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))"),
                ("(fact 10)", success(3_628_800)),
                ("(fact 0)", success(1)),
            ]),
            // === MUTUAL RECURSION THROUGH TOP-LEVEL DEFINES ===
            TestEnvironment(vec![
                test_setup!("(define (is-even n) (if (= n 0) #t (is-odd (- n 1))))"),
                test_setup!("(define (is-odd n) (if (= n 0) #f (is-even (- n 1))))"),
                ("(is-even 4)", success(true)),
                ("(is-odd 7)", success(true)),
            ]),
            // === PAIR ALIASING ===
            TestEnvironment(vec![
                test_setup!("(define p (cons 1 2))"),
                test_setup!("(define q p)"),
                test_setup!("(set-car! p 9)"),
                ("(car p)", success(9)),
                ("(car q)", success(9)),
                test_setup!("(set-cdr! q '(3))"),
                ("p", success(list(vec![val(9), val(3)]))),
                ("(set-car! 5 1)", SpecificError("set-car! requires a pair")),
            ]),
            // === CIRCULAR LISTS ===
            TestEnvironment(vec![
                test_setup!("(define c (list 1 2 3))"),
                test_setup!("(set-cdr! (cdr (cdr c)) c)"),
                ("(list? c)", success(false)),
                ("(pair? c)", success(true)),
                ("(car (cdr (cdr (cdr c))))", success(1)),
            ]),
            // === CLOSURES SEE LATER MUTATION ===
            TestEnvironment(vec![
                test_setup!("(define y 100)"),
                test_setup!("(define (g) y)"),
                ("(g)", success(100)),
                test_setup!("(set! y 200)"),
                ("(g)", success(200)),
                test_setup!("(define y 300)"),
                ("(g)", success(300)),
            ]),
            // === COUNTER WITH PRIVATE STATE ===
            TestEnvironment(vec![
                test_setup!(
                    "(define make-counter (lambda () (let ((n 0)) (lambda () (set! n (+ n 1)) n))))"
                ),
                test_setup!("(define c1 (make-counter))"),
                test_setup!("(define c2 (make-counter))"),
                ("(c1)", success(1)),
                ("(c1)", success(2)),
                ("(c2)", success(1)),
            ]),
            // === LEXICAL SCOPING ===
            TestEnvironment(vec![
                test_setup!("(define x 1)"),
                test_setup!("(define f (lambda (x) (+ x 10)))"),
                ("(f 5)", success(15)),
                ("x", success(1)),
                ("(f x)", success(11)),
                test_setup!("(define make-adder (lambda (n) (lambda (x) (+ x n))))"),
                test_setup!("(define add5 (make-adder 5))"),
                ("(add5 3)", success(8)),
            ]),
            // === DEFINE INSIDE A BODY IS LOCAL ===
            TestEnvironment(vec![
                test_setup!("(define (f) (define local 7) local)"),
                ("(f)", success(7)),
                ("local", SpecificError("Unbound variable: local")),
            ]),
            // === PRIMITIVES STORED IN VARIABLES ===
            TestEnvironment(vec![
                test_setup!("(define my-add +)"),
                ("(my-add 10 20)", success(30)),
                test_setup!("(define first car)"),
                ("(first '(7 8))", success(7)),
                test_setup!("(define twice (lambda (f x) (f (f x))))"),
                test_setup!("(define inc (lambda (x) (+ x 1)))"),
                ("(twice inc 5)", success(7)),
            ]),
            // === SHADOWING BY DEFINED NAMES ===
            TestEnvironment(vec![
                test_setup!("(define else #f)"),
                ("(cond (else 1) (#t 2))", success(2)),
            ]),
            // === EXIT INSIDE BEGIN DOES NOT UNWIND ===
            TestEnvironment(vec![
                ("(begin (exit))", EvalResult(Value::Terminate)),
                ("(begin (exit) 5)", success(5)),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }

    #[test]
    fn test_display_writes_to_output() {
        let env = Environment::new();
        let mut out = Vec::new();
        for input in [
            "(display \"hi\\n\")",
            "(display 'sym)",
            "(display (quote (1 \"s\" . 3/4)))",
            "(display (list))",
        ] {
            assert_eq!(run(input, &env, &mut out).unwrap(), Value::Void);
        }
        assert_eq!(String::from_utf8(out).unwrap(), "hi\nsym(1 \"s\" . 3/4)()");
    }

    #[test]
    fn test_string_literals_are_fresh() {
        let env = Environment::new();
        let mut out = Vec::new();
        run("(define s \"abc\")", &env, &mut out).unwrap();
        assert_eq!(run("(eq? s s)", &env, &mut out).unwrap(), val(true));
        assert_eq!(run("(eq? s \"abc\")", &env, &mut out).unwrap(), val(false));
    }

    #[test]
    fn test_lambda_captures_environment_by_reference() {
        let env = Environment::new();
        let mut out = Vec::new();
        run("(define (get) late)", &env, &mut out).unwrap();
        assert!(matches!(
            run("(get)", &env, &mut out),
            Err(crate::Error::UnboundVariable(_))
        ));
        run("(define late 'here)", &env, &mut out).unwrap();
        assert_eq!(run("(get)", &env, &mut out).unwrap(), sym("here"));
    }

    #[test]
    fn test_eval_source_stops_at_exit() {
        let env = Environment::new();
        let mut out = Vec::new();
        let program = "
            (define (square x) (* x x))
            (display (square 4))
            (exit)
            (display \"unreachable\")
        ";
        let result = eval_source_with_output(program, &env, &mut out).unwrap();
        assert_eq!(result, Value::Terminate);
        assert_eq!(String::from_utf8(out).unwrap(), "16");

        let mut out = Vec::new();
        assert_eq!(
            eval_source_with_output("(define x 2) (* x 21)", &env, &mut out).unwrap(),
            val(42)
        );
        assert_eq!(
            eval_source_with_output("", &env, &mut out).unwrap(),
            Value::Void
        );
    }

    #[test]
    fn test_eval_source_reports_errors() {
        let env = Environment::new();
        let mut out = Vec::new();
        assert!(matches!(
            eval_source_with_output("(define x 1) (car", &env, &mut out),
            Err(crate::Error::Parse(_))
        ));
        assert!(matches!(
            eval_source_with_output("(if)", &env, &mut out),
            Err(crate::Error::Arity { .. })
        ));
        assert!(matches!(
            eval_source_with_output("(let ((x)) x)", &env, &mut out),
            Err(crate::Error::Syntax(_))
        ));
    }

    #[test]
    fn test_evaluation_depth_limit() {
        let depth_test_environments = vec![TestEnvironment(vec![
            test_setup!("(define (make-deep depth) (if (= depth 0) 42 (+ 1 (make-deep (- depth 1)))))"),
            ("(make-deep 10)", success(52)),
            ("(make-deep 1000)", success(1042)),
            ("(make-deep 5000)", success(5042)),
            ("(make-deep 20000)", SpecificError("depth limit exceeded")),
        ])];

        run_tests_in_environment(depth_test_environments);
    }

    #[test]
    fn test_set_checks_binding_before_evaluating_value() {
        let env = Environment::new();
        let mut out = Vec::new();
        match run("(set! missing (display \"side effect\"))", &env, &mut out) {
            Err(crate::Error::UnboundVariable(name)) => assert_eq!(name, "missing"),
            other => panic!("expected unbound variable error, got {other:?}"),
        }
        assert!(out.is_empty(), "value expression ran: {out:?}");

        run("(define present 1)", &env, &mut out).unwrap();
        run("(set! present (begin (display \"ran\") 2))", &env, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ran");
        assert_eq!(run("present", &env, &mut Vec::new()).unwrap(), val(2));
    }

    #[test]
    fn test_quote_builds_fresh_pairs() {
        let env = Environment::new();
        let mut out = Vec::new();
        run("(define (f) '(1 2))", &env, &mut out).unwrap();
        assert_eq!(run("(eq? (f) (f))", &env, &mut out).unwrap(), val(false));
        run("(define a (f))", &env, &mut out).unwrap();
        run("(set-car! a 5)", &env, &mut out).unwrap();
        assert_eq!(run("(f)", &env, &mut out).unwrap(), list(vec![val(1), val(2)]));
    }

    #[test]
    fn test_looks_numeric() {
        for token in ["1", "+12", "-3", "1.5", ".5", "5.", "1e3", "1E-3", "+2.5e+7"] {
            assert!(looks_numeric(token), "{token} should look numeric");
        }
        for token in ["+", "-", ".", "+.", "e5", "1e", "1e+", "1.2.3", "1e2.5", "a1", "1/2"] {
            assert!(!looks_numeric(token), "{token} should not look numeric");
        }
    }
}
