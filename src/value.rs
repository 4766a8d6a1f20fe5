//! Runtime values.
//!
//! [`Value`] is a closed sum type; every operation matches on it exhaustively. Pairs and
//! procedures live behind `Rc` so that copies of a value alias the same storage:
//! `set-car!`/`set-cdr!` on one copy are visible through every other, and `eq?` can ask
//! whether two values are the same object.
//!
//! Strings are immutable (`Rc<str>`); each evaluation of a string literal allocates new
//! storage, so two equal strings built separately are not `eq?`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::ast::Expr;
use crate::builtinops::BuiltinOp;
use crate::evaluator::Environment;

/// Type alias for integer values in the interpreter
pub(crate) type NumberType = i64;

/// Nesting depth after which printing gives up on a structure (car-side cycles)
const MAX_PRINT_DEPTH: usize = 128;

/// Core runtime value
#[derive(Clone)]
pub enum Value {
    Integer(NumberType),
    /// Numerator and denominator, exactly as computed (never reduced)
    Rational(NumberType, NumberType),
    Boolean(bool),
    String(Rc<str>),
    Symbol(String),
    Pair(Rc<Pair>),
    Null,
    Void,
    Procedure(Rc<Procedure>),
    /// Produced by `(exit)`; tells the driver to stop
    Terminate,
}

/// A mutable cons cell shared by every value that refers to it
pub struct Pair {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl Pair {
    pub fn new(car: Value, cdr: Value) -> Self {
        Pair {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }
    }

    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Value) {
        self.car.replace(value);
    }

    pub fn set_cdr(&self, value: Value) {
        self.cdr.replace(value);
    }
}

/// Something that can be applied to arguments
pub enum Procedure {
    /// A lambda together with the environment it was created in
    Closure {
        params: Vec<String>,
        body: Rc<Expr>,
        env: Environment,
    },
    /// A variadic primitive used as a value, e.g. `(define add +)`
    Builtin(&'static BuiltinOp),
}

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Rc::new(Pair::new(car, cdr)))
    }

    /// Builds a proper list, terminated by `Null`
    pub fn list_from<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(Value::Null, |tail, item| Value::cons(item, tail))
    }

    pub fn string(text: &str) -> Value {
        Value::String(Rc::from(text))
    }

    pub fn symbol<S: Into<String>>(name: S) -> Value {
        Value::Symbol(name.into())
    }

    /// Everything except `#f` counts as true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Rational(_, _))
    }

    /// The `eq?` relation: value equality for numbers, booleans and symbols, identity
    /// for everything with its own storage.
    pub fn is_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Rational(n1, d1), Value::Rational(n2, d2)) => n1 == n2 && d1 == d2,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Null, Value::Null)
            | (Value::Void, Value::Void)
            | (Value::Terminate, Value::Terminate) => true,
            (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Procedure(a), Value::Procedure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Short type description used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Rational(_, _) => "rational",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Null => "null",
            Value::Void => "void",
            Value::Procedure(_) => "procedure",
            Value::Terminate => "terminate",
        }
    }
}

impl From<NumberType> for Value {
    fn from(n: NumberType) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(NumberType::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl PartialEq for Value {
    /// Structural comparison, as `equal?` would see it. Pairs are compared element by
    /// element, procedures by identity. Terminates on circular structure: a pair of
    /// cells already under comparison is taken as equal.
    fn eq(&self, other: &Self) -> bool {
        structural_eq(self, other, &mut HashSet::new())
    }
}

type PairsInProgress = HashSet<(*const Pair, *const Pair)>;

fn structural_eq(lhs: &Value, rhs: &Value, seen: &mut PairsInProgress) -> bool {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Pair(a), Value::Pair(b)) => pairs_eq(a, b, seen),
        _ => lhs.is_eq(rhs),
    }
}

/// Walks the cdr chains iteratively; only cars recurse
fn pairs_eq(lhs: &Rc<Pair>, rhs: &Rc<Pair>, seen: &mut PairsInProgress) -> bool {
    let mut lhs = Rc::clone(lhs);
    let mut rhs = Rc::clone(rhs);
    loop {
        if Rc::ptr_eq(&lhs, &rhs) || !seen.insert((Rc::as_ptr(&lhs), Rc::as_ptr(&rhs))) {
            return true;
        }
        if !structural_eq(&lhs.car(), &rhs.car(), seen) {
            return false;
        }
        match (lhs.cdr(), rhs.cdr()) {
            (Value::Pair(next_lhs), Value::Pair(next_rhs)) => {
                lhs = next_lhs;
                rhs = next_rhs;
            }
            (tail_lhs, tail_rhs) => return structural_eq(&tail_lhs, &tail_rhs, seen),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Rational(num, den) => write!(f, "Rational({num}, {den})"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Pair(_) => write!(f, "Pair{self}"),
            Value::Null => write!(f, "Null"),
            Value::Void => write!(f, "Void"),
            Value::Procedure(p) => write!(f, "Procedure({p:?})"),
            Value::Terminate => write!(f, "Terminate"),
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Closure { params, body, .. } => {
                write!(f, "params={params:?}, body={body}")
            }
            Procedure::Builtin(op) => write!(f, "builtin {}", op.scheme_id),
        }
    }
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

/// Writes a pair chain. The cdr walk runs a half-speed follower so a circular tail is
/// cut short with `...` instead of looping.
fn write_pair(f: &mut fmt::Formatter<'_>, head: &Rc<Pair>, depth: usize) -> fmt::Result {
    write!(f, "(")?;
    write_value(f, &head.car(), depth + 1)?;

    let mut follower = Rc::clone(head);
    let mut tail = head.cdr();
    let mut steps = 0usize;
    loop {
        match tail {
            Value::Null => break,
            Value::Pair(next) => {
                steps += 1;
                if steps % 2 == 0 {
                    if let Value::Pair(ahead) = follower.cdr() {
                        follower = ahead;
                    }
                }
                if Rc::ptr_eq(&follower, &next) {
                    write!(f, " ...")?;
                    break;
                }
                write!(f, " ")?;
                write_value(f, &next.car(), depth + 1)?;
                tail = next.cdr();
            }
            other => {
                write!(f, " . ")?;
                write_value(f, &other, depth + 1)?;
                break;
            }
        }
    }
    write!(f, ")")
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, depth: usize) -> fmt::Result {
    if depth > MAX_PRINT_DEPTH {
        return write!(f, "...");
    }
    match value {
        Value::Integer(n) => write!(f, "{n}"),
        Value::Rational(num, den) => write!(f, "{num}/{den}"),
        Value::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
        Value::String(s) => write_string_literal(f, s),
        Value::Symbol(s) => write!(f, "{s}"),
        Value::Pair(pair) => write_pair(f, pair, depth),
        Value::Null => write!(f, "()"),
        Value::Void => write!(f, "#<void>"),
        Value::Procedure(p) => match p.as_ref() {
            Procedure::Closure { .. } => write!(f, "#<procedure>"),
            Procedure::Builtin(op) => write!(f, "#<procedure:{}>", op.scheme_id),
        },
        Value::Terminate => write!(f, "#<terminate>"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, 0)
    }
}

/// Helper for building values in tests
#[cfg(test)]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}
