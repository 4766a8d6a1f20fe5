//! Built-in operations registry.
//!
//! This module owns the two static name tables the parser consults (primitives and
//! special-form keywords) and the semantics of every primitive that works on already
//! evaluated values.
//!
//! ## Primitives vs Special Forms
//!
//! - **Primitives** evaluate all operands, then apply a function (`+`, `car`, `eq?`).
//!   `and`/`or` are listed here too because they share the primitive namespace, but
//!   their operands are evaluated lazily by the evaluator.
//! - **Special forms** control evaluation of their parts (`if`, `lambda`, `let`, ...)
//!   and are parsed by dedicated rules in the parser.
//!
//! Both tables are built once, on first use, and never change afterwards. A name in
//! either table is reserved: it cannot be the target of `define`, though a lambda
//! parameter or `let` binding may still shadow it.
//!
//! ## Numeric tower
//!
//! Two exact tiers: `Integer` and `Rational`. Integer arithmetic stays integral (checked,
//! overflow is an error). As soon as a rational is involved the result is a rational
//! computed by cross multiplication, without reducing to lowest terms:
//!
//! ```scheme
//! (+ 1/2 1/2)   ; 4/4
//! (/ 6 3)       ; 2
//! (/ 6 4)       ; 6/4
//! (* 2 1/3)     ; 2/3
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::{BinaryOp, UnaryOp, VariadicOp};
use crate::value::{NumberType, Procedure, Value};

/// Number of arguments an operation or special form accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    /// Check an argument count, producing an arity error on mismatch
    pub fn validate(&self, arg_count: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => arg_count == n,
            Arity::AtLeast(n) => arg_count >= n,
            Arity::Range(min, max) => (min..=max).contains(&arg_count),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(*self, arg_count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Zero-argument primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantOp {
    Void,
    Exit,
}

/// How a primitive is lowered into the expression tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Constant(ConstantOp),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Variadic(VariadicOp),
    /// Short-circuit forms: operands are evaluated by the evaluator, one at a time
    And,
    Or,
}

/// Definition of a built-in operation
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinOp {
    /// The Scheme identifier for this operation
    pub scheme_id: &'static str,
    pub op_kind: OpKind,
    /// Expected number of arguments
    pub arity: Arity,
}

impl BuiltinOp {
    /// Check if the given number of arguments is valid for this operation
    pub(crate) fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.validate(arg_count)
    }

    /// Whether this primitive evaluates all operands eagerly and can therefore be used as
    /// a first-class procedure value
    pub(crate) fn is_first_class(&self) -> bool {
        !matches!(self.op_kind, OpKind::And | OpKind::Or)
    }
}

/// Syntactic keywords parsed by dedicated rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Quote,
    If,
    Lambda,
    Define,
    Begin,
    Cond,
    Let,
    Letrec,
    Set,
}

impl SpecialForm {
    const ALL: [SpecialForm; 9] = [
        SpecialForm::Quote,
        SpecialForm::If,
        SpecialForm::Lambda,
        SpecialForm::Define,
        SpecialForm::Begin,
        SpecialForm::Cond,
        SpecialForm::Let,
        SpecialForm::Letrec,
        SpecialForm::Set,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            SpecialForm::Quote => "quote",
            SpecialForm::If => "if",
            SpecialForm::Lambda => "lambda",
            SpecialForm::Define => "define",
            SpecialForm::Begin => "begin",
            SpecialForm::Cond => "cond",
            SpecialForm::Let => "let",
            SpecialForm::Letrec => "letrec",
            SpecialForm::Set => "set!",
        }
    }

    /// Number of forms accepted after the keyword
    pub fn arity(self) -> Arity {
        match self {
            SpecialForm::Quote => Arity::Exact(1),
            SpecialForm::If => Arity::Range(2, 3),
            SpecialForm::Lambda | SpecialForm::Define | SpecialForm::Let | SpecialForm::Letrec => {
                Arity::AtLeast(2)
            }
            SpecialForm::Begin => Arity::Any,
            SpecialForm::Cond => Arity::AtLeast(1),
            SpecialForm::Set => Arity::Exact(2),
        }
    }
}

impl VariadicOp {
    fn arity(self) -> Arity {
        match self {
            VariadicOp::Sub | VariadicOp::Div => Arity::AtLeast(1),
            _ => Arity::Any,
        }
    }
}

fn constant(scheme_id: &'static str, op: ConstantOp) -> BuiltinOp {
    BuiltinOp {
        scheme_id,
        op_kind: OpKind::Constant(op),
        arity: Arity::Exact(0),
    }
}

fn unary(op: UnaryOp) -> BuiltinOp {
    BuiltinOp {
        scheme_id: op.scheme_id(),
        op_kind: OpKind::Unary(op),
        arity: Arity::Exact(1),
    }
}

fn binary(op: BinaryOp) -> BuiltinOp {
    BuiltinOp {
        scheme_id: op.scheme_id(),
        op_kind: OpKind::Binary(op),
        arity: Arity::Exact(2),
    }
}

fn variadic(op: VariadicOp) -> BuiltinOp {
    BuiltinOp {
        scheme_id: op.scheme_id(),
        op_kind: OpKind::Variadic(op),
        arity: op.arity(),
    }
}

/// Global registry of all primitives.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    vec![
        // Arithmetic
        variadic(VariadicOp::Add),
        variadic(VariadicOp::Sub),
        variadic(VariadicOp::Mul),
        variadic(VariadicOp::Div),
        binary(BinaryOp::Modulo),
        binary(BinaryOp::Expt),
        // Comparison
        variadic(VariadicOp::Lt),
        variadic(VariadicOp::Le),
        variadic(VariadicOp::NumEq),
        variadic(VariadicOp::Ge),
        variadic(VariadicOp::Gt),
        // Logic
        BuiltinOp {
            scheme_id: "and",
            op_kind: OpKind::And,
            arity: Arity::Any,
        },
        BuiltinOp {
            scheme_id: "or",
            op_kind: OpKind::Or,
            arity: Arity::Any,
        },
        unary(UnaryOp::Not),
        // Pairs and lists
        binary(BinaryOp::Cons),
        unary(UnaryOp::Car),
        unary(UnaryOp::Cdr),
        binary(BinaryOp::SetCar),
        binary(BinaryOp::SetCdr),
        variadic(VariadicOp::List),
        // Predicates
        binary(BinaryOp::IsEq),
        unary(UnaryOp::IsBoolean),
        unary(UnaryOp::IsNumber),
        unary(UnaryOp::IsNull),
        unary(UnaryOp::IsPair),
        unary(UnaryOp::IsProcedure),
        unary(UnaryOp::IsSymbol),
        unary(UnaryOp::IsString),
        unary(UnaryOp::IsList),
        // Side effects and control
        unary(UnaryOp::Display),
        constant("void", ConstantOp::Void),
        constant("exit", ConstantOp::Exit),
    ]
});

/// Lazy static map from scheme_id to BuiltinOp (private - use find_scheme_op)
static BUILTIN_SCHEME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.scheme_id, op)).collect()
});

static SPECIAL_FORMS: LazyLock<HashMap<&'static str, SpecialForm>> = LazyLock::new(|| {
    SpecialForm::ALL
        .iter()
        .map(|form| (form.keyword(), *form))
        .collect()
});

/// Get all builtin operations, in registration order
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its Scheme identifier
pub(crate) fn find_scheme_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_SCHEME.get(id).copied()
}

/// Find a special form by its keyword
pub(crate) fn find_special_form(keyword: &str) -> Option<SpecialForm> {
    SPECIAL_FORMS.get(keyword).copied()
}

/// Primitive names and special-form keywords
pub fn is_reserved_name(name: &str) -> bool {
    find_scheme_op(name).is_some() || find_special_form(name).is_some()
}

//
// Numeric tower
//

fn overflow(operation: &str) -> Error {
    Error::Eval(format!("Integer overflow in {operation}"))
}

fn division_by_zero() -> Error {
    Error::Eval("Division by zero".to_owned())
}

/// Numerator and denominator of a number; integers have denominator 1
fn as_fraction(value: &Value, op_name: &str) -> Result<(NumberType, NumberType), Error> {
    match value {
        Value::Integer(n) => Ok((*n, 1)),
        Value::Rational(num, den) => Ok((*num, *den)),
        other => Err(Error::Type(format!(
            "{op_name} requires numeric arguments, got {}: {other}",
            other.type_name()
        ))),
    }
}

fn as_integer(value: &Value, op_name: &str) -> Result<NumberType, Error> {
    match value {
        Value::Integer(n) => Ok(*n),
        other => Err(Error::Type(format!(
            "{op_name} requires integer arguments, got {}: {other}",
            other.type_name()
        ))),
    }
}

/// `a*b + c*d` with overflow checking
fn cross_sum(
    a: NumberType,
    b: NumberType,
    c: NumberType,
    d: NumberType,
    operation: &str,
) -> Result<NumberType, Error> {
    a.checked_mul(b)
        .zip(c.checked_mul(d))
        .and_then(|(x, y)| x.checked_add(y))
        .ok_or_else(|| overflow(operation))
}

fn checked_product(a: NumberType, b: NumberType, operation: &str) -> Result<NumberType, Error> {
    a.checked_mul(b).ok_or_else(|| overflow(operation))
}

pub(crate) fn add(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        return a
            .checked_add(*b)
            .map(Value::Integer)
            .ok_or_else(|| overflow("addition"));
    }
    let (n1, d1) = as_fraction(lhs, "+")?;
    let (n2, d2) = as_fraction(rhs, "+")?;
    Ok(Value::Rational(
        cross_sum(n1, d2, n2, d1, "addition")?,
        checked_product(d1, d2, "addition")?,
    ))
}

pub(crate) fn sub(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        return a
            .checked_sub(*b)
            .map(Value::Integer)
            .ok_or_else(|| overflow("subtraction"));
    }
    let (n1, d1) = as_fraction(lhs, "-")?;
    let (n2, d2) = as_fraction(rhs, "-")?;
    let neg_n2 = n2.checked_neg().ok_or_else(|| overflow("subtraction"))?;
    Ok(Value::Rational(
        cross_sum(n1, d2, neg_n2, d1, "subtraction")?,
        checked_product(d1, d2, "subtraction")?,
    ))
}

pub(crate) fn mul(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        return a
            .checked_mul(*b)
            .map(Value::Integer)
            .ok_or_else(|| overflow("multiplication"));
    }
    let (n1, d1) = as_fraction(lhs, "*")?;
    let (n2, d2) = as_fraction(rhs, "*")?;
    Ok(Value::Rational(
        checked_product(n1, n2, "multiplication")?,
        checked_product(d1, d2, "multiplication")?,
    ))
}

/// Exact division. Two integers give an integer only when the division is exact,
/// otherwise the unreduced rational `a/b`.
pub(crate) fn div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    let (n2, d2) = as_fraction(rhs, "/")?;
    let (n1, d1) = as_fraction(lhs, "/")?;
    if n2 == 0 {
        return Err(division_by_zero());
    }
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        let remainder = a.checked_rem(*b).ok_or_else(|| overflow("division"))?;
        return if remainder == 0 {
            a.checked_div(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow("division"))
        } else {
            Ok(Value::Rational(*a, *b))
        };
    }
    Ok(Value::Rational(
        checked_product(n1, d2, "division")?,
        checked_product(d1, n2, "division")?,
    ))
}

/// Orders two numbers by value. Cross products are taken in 128 bits so the comparison
/// itself cannot overflow; a negative denominator product flips the result.
pub fn compare_numbers(lhs: &Value, rhs: &Value, op_name: &str) -> Result<Ordering, Error> {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        return Ok(a.cmp(b));
    }
    let (n1, d1) = as_fraction(lhs, op_name)?;
    let (n2, d2) = as_fraction(rhs, op_name)?;
    let left = i128::from(n1) * i128::from(d2);
    let right = i128::from(n2) * i128::from(d1);
    let ordering = left.cmp(&right);
    if (i128::from(d1) * i128::from(d2)) < 0 {
        Ok(ordering.reverse())
    } else {
        Ok(ordering)
    }
}

/// Left fold for `+` and `*`: no operands give the identity element and a single
/// operand is returned as is
fn fold_from(
    identity: NumberType,
    args: &[Value],
    step: fn(&Value, &Value) -> Result<Value, Error>,
) -> Result<Value, Error> {
    match args {
        [] => Ok(Value::Integer(identity)),
        [only] => Ok(only.clone()),
        [first, rest @ ..] => rest
            .iter()
            .try_fold(first.clone(), |acc, arg| step(&acc, arg)),
    }
}

/// `-` and `/`: one operand is applied against the identity, more are left-folded
fn fold_inverse(
    identity: NumberType,
    args: &[Value],
    step: fn(&Value, &Value) -> Result<Value, Error>,
) -> Result<Value, Error> {
    match args {
        [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
        [only] => step(&Value::Integer(identity), only),
        [first, rest @ ..] => rest
            .iter()
            .try_fold(first.clone(), |acc, arg| step(&acc, arg)),
    }
}

/// Pairwise comparison chain; stops at the first pair that does not hold
fn compare_chain(
    args: &[Value],
    op_name: &str,
    holds: fn(Ordering) -> bool,
) -> Result<Value, Error> {
    for window in args.windows(2) {
        if !holds(compare_numbers(&window[0], &window[1], op_name)?) {
            return Ok(Value::Boolean(false));
        }
    }
    Ok(Value::Boolean(true))
}

/// Integer remainder; the sign of a nonzero result follows the dividend
fn modulo(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    let dividend = as_integer(lhs, "modulo")?;
    let divisor = as_integer(rhs, "modulo")?;
    if divisor == 0 {
        return Err(division_by_zero());
    }
    dividend
        .checked_rem(divisor)
        .map(Value::Integer)
        .ok_or_else(|| overflow("modulo"))
}

/// Square-and-multiply exponentiation. Results are limited to the 32-bit signed range.
fn expt(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    let base = as_integer(lhs, "expt")?;
    let exponent = as_integer(rhs, "expt")?;
    if exponent < 0 {
        return Err(Error::Eval(
            "Negative exponent not supported for integers".to_owned(),
        ));
    }
    if base == 0 && exponent == 0 {
        return Err(Error::Eval("0^0 is undefined".to_owned()));
    }

    let in_range = |n: i128| (i128::from(i32::MIN)..=i128::from(i32::MAX)).contains(&n);
    let mut result: i128 = 1;
    let mut square = i128::from(base);
    let mut remaining = exponent;
    while remaining > 0 {
        if remaining % 2 == 1 {
            result *= square;
            if !in_range(result) {
                return Err(overflow("expt"));
            }
        }
        if remaining > 1 {
            square *= square;
            if !in_range(square) {
                return Err(overflow("expt"));
            }
        }
        remaining /= 2;
    }
    NumberType::try_from(result)
        .map(Value::Integer)
        .map_err(|_| overflow("expt"))
}

//
// Pairs and predicates
//

fn car(value: &Value) -> Result<Value, Error> {
    match value {
        Value::Pair(pair) => Ok(pair.car()),
        other => Err(Error::Type(format!("car requires a pair, got {other}"))),
    }
}

fn cdr(value: &Value) -> Result<Value, Error> {
    match value {
        Value::Pair(pair) => Ok(pair.cdr()),
        other => Err(Error::Type(format!("cdr requires a pair, got {other}"))),
    }
}

/// Proper-list test with tortoise and hare over the cdr chain
fn is_list(value: &Value) -> bool {
    let head = match value {
        Value::Null => return true,
        Value::Pair(head) => head,
        _ => return false,
    };

    let mut slow = Rc::clone(head);
    let mut fast = head.cdr();
    while let Value::Pair(fast_pair) = fast.clone() {
        if Rc::ptr_eq(&slow, &fast_pair) {
            return false;
        }
        if let Value::Pair(next) = slow.cdr() {
            slow = next;
        }
        fast = match fast_pair.cdr() {
            Value::Pair(second) => second.cdr(),
            tail => tail,
        };
    }
    matches!(fast, Value::Null)
}

/// Applies a one-operand primitive. `display` needs an output sink and is handled by
/// the evaluator.
pub(crate) fn apply_unary(op: UnaryOp, operand: &Value) -> Result<Value, Error> {
    let result = match op {
        UnaryOp::Car => return car(operand),
        UnaryOp::Cdr => return cdr(operand),
        UnaryOp::Not => matches!(operand, Value::Boolean(false)),
        UnaryOp::IsBoolean => matches!(operand, Value::Boolean(_)),
        UnaryOp::IsNumber => operand.is_number(),
        UnaryOp::IsNull => matches!(operand, Value::Null),
        UnaryOp::IsPair => matches!(operand, Value::Pair(_)),
        UnaryOp::IsProcedure => matches!(operand, Value::Procedure(_)),
        UnaryOp::IsSymbol => matches!(operand, Value::Symbol(_)),
        UnaryOp::IsString => matches!(operand, Value::String(_)),
        UnaryOp::IsList => is_list(operand),
        UnaryOp::Display => {
            return Err(Error::Eval(
                "display must be evaluated with an output sink".to_owned(),
            ));
        }
    };
    Ok(Value::Boolean(result))
}

pub(crate) fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match op {
        BinaryOp::Modulo => modulo(lhs, rhs),
        BinaryOp::Expt => expt(lhs, rhs),
        BinaryOp::Cons => Ok(Value::cons(lhs.clone(), rhs.clone())),
        BinaryOp::SetCar | BinaryOp::SetCdr => match lhs {
            Value::Pair(pair) => {
                if op == BinaryOp::SetCar {
                    pair.set_car(rhs.clone());
                } else {
                    pair.set_cdr(rhs.clone());
                }
                Ok(Value::Void)
            }
            other => Err(Error::Type(format!(
                "{} requires a pair, got {other}",
                op.scheme_id()
            ))),
        },
        BinaryOp::IsEq => Ok(Value::Boolean(lhs.is_eq(rhs))),
    }
}

pub(crate) fn apply_variadic(op: VariadicOp, args: &[Value]) -> Result<Value, Error> {
    match op {
        VariadicOp::Add => fold_from(0, args, add),
        VariadicOp::Mul => fold_from(1, args, mul),
        VariadicOp::Sub => fold_inverse(0, args, sub),
        VariadicOp::Div => fold_inverse(1, args, div),
        VariadicOp::Lt => compare_chain(args, "<", Ordering::is_lt),
        VariadicOp::Le => compare_chain(args, "<=", Ordering::is_le),
        VariadicOp::NumEq => compare_chain(args, "=", Ordering::is_eq),
        VariadicOp::Ge => compare_chain(args, ">=", Ordering::is_ge),
        VariadicOp::Gt => compare_chain(args, ">", Ordering::is_gt),
        VariadicOp::List => Ok(Value::list_from(args.iter().cloned())),
    }
}

/// Calls a variadic primitive that was passed around as a procedure value
pub(crate) fn apply_builtin_procedure(op: &BuiltinOp, args: &[Value]) -> Result<Value, Error> {
    op.validate_arity(args.len())?;
    match op.op_kind {
        OpKind::Variadic(variadic_op) => apply_variadic(variadic_op, args),
        _ => Err(Error::Eval(format!(
            "{} cannot be applied as a builtin procedure",
            op.scheme_id
        ))),
    }
}

/// Procedure value for a variadic primitive
pub(crate) fn builtin_procedure(op: &'static BuiltinOp) -> Value {
    Value::Procedure(Rc::new(Procedure::Builtin(op)))
}
