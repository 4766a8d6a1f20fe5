//! Lowers a [`Syntax`] tree into an executable [`Expr`].
//!
//! The parser resolves every list head against three namespaces, in this order: names
//! bound in the environment, primitives, special-form keywords. Anything else is an
//! application whose operator is looked up at evaluation time.
//!
//! Binding forms (`lambda`, `let`, `letrec`, `define` shorthand) parse their bodies in
//! a scratch scope that binds the introduced names to placeholders. This is how
//! `((lambda (if) (if 1 2 3)) +)` parses `(if 1 2 3)` as a call to the parameter rather
//! than as the `if` form. The scratch scope is a child frame; the caller's environment
//! is never modified.

use tracing::trace;

use crate::Error;
use crate::ast::Expr;
use crate::builtinops::{
    Arity, BuiltinOp, ConstantOp, OpKind, SpecialForm, find_scheme_op, find_special_form,
};
use crate::evaluator::Environment;
use crate::syntax::Syntax;
use crate::value::Value;

/// Symbol that stands for an always-true test in a `cond` clause
const ELSE: &str = "else";

/// Parse a syntax tree into an expression, resolving names against `env`
pub fn parse(syntax: &Syntax, env: &Environment) -> Result<Expr, Error> {
    match syntax {
        Syntax::Number(n) => Ok(Expr::Fixnum(*n)),
        Syntax::Rational(_, 0) => Err(Error::Syntax(format!(
            "Rational literal with zero denominator: {syntax}"
        ))),
        Syntax::Rational(num, den) => Ok(Expr::RationalNum(*num, *den)),
        Syntax::Symbol(name) => Ok(Expr::Var(name.clone())),
        Syntax::String(text) => Ok(Expr::StringExpr(text.clone())),
        Syntax::True => Ok(Expr::True),
        Syntax::False => Ok(Expr::False),
        Syntax::List(items) => parse_list(syntax, items, env),
    }
}

fn parse_list(form: &Syntax, items: &[Syntax], env: &Environment) -> Result<Expr, Error> {
    let Some((head, args)) = items.split_first() else {
        return Ok(Expr::Quote(Syntax::List(Vec::new())));
    };

    let Some(name) = head.as_symbol() else {
        return parse_application(head, args, env);
    };

    // A lexical binding shadows primitives and keywords alike
    if env.contains(name) {
        return parse_application(head, args, env);
    }

    if let Some(op) = find_scheme_op(name) {
        return parse_primitive(op, form, args, env);
    }

    if let Some(special_form) = find_special_form(name) {
        return parse_special_form(special_form, form, args, env);
    }

    parse_application(head, args, env)
}

fn parse_all(items: &[Syntax], env: &Environment) -> Result<Vec<Expr>, Error> {
    items.iter().map(|item| parse(item, env)).collect()
}

fn parse_application(head: &Syntax, args: &[Syntax], env: &Environment) -> Result<Expr, Error> {
    Ok(Expr::Apply {
        rator: Box::new(parse(head, env)?),
        rands: parse_all(args, env)?,
    })
}

/// Attaches the offending form to an arity error
fn in_form(err: Error, form: &Syntax) -> Error {
    match err {
        Error::Arity { expected, got, .. } => {
            Error::arity_error_with_expr(expected, got, form.to_string())
        }
        other => other,
    }
}

/// Moves exactly `N` parsed operands into an array
fn exactly<const N: usize>(operands: Vec<Expr>, form: &Syntax) -> Result<[Expr; N], Error> {
    let got = operands.len();
    operands
        .try_into()
        .map_err(|_| Error::arity_error_with_expr(Arity::Exact(N), got, form.to_string()))
}

fn parse_primitive(
    op: &'static BuiltinOp,
    form: &Syntax,
    args: &[Syntax],
    env: &Environment,
) -> Result<Expr, Error> {
    op.validate_arity(args.len())
        .map_err(|err| in_form(err, form))?;
    trace!(primitive = op.scheme_id, operands = args.len(), "parsing primitive");

    let operands = parse_all(args, env)?;
    let expr = match op.op_kind {
        OpKind::Constant(ConstantOp::Void) => Expr::MakeVoid,
        OpKind::Constant(ConstantOp::Exit) => Expr::Exit,
        OpKind::Unary(unary_op) => {
            let [operand] = exactly(operands, form)?;
            Expr::Unary {
                op: unary_op,
                operand: Box::new(operand),
            }
        }
        OpKind::Binary(binary_op) => {
            let [lhs, rhs] = exactly(operands, form)?;
            Expr::Binary {
                op: binary_op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
        OpKind::Variadic(variadic_op) => Expr::Variadic {
            op: variadic_op,
            operands,
        },
        OpKind::And => Expr::And(operands),
        OpKind::Or => Expr::Or(operands),
    };
    Ok(expr)
}

fn parse_special_form(
    special_form: SpecialForm,
    form: &Syntax,
    args: &[Syntax],
    env: &Environment,
) -> Result<Expr, Error> {
    special_form
        .arity()
        .validate(args.len())
        .map_err(|err| in_form(err, form))?;
    trace!(keyword = special_form.keyword(), "parsing special form");

    match (special_form, args) {
        (SpecialForm::Quote, [datum]) => {
            validate_datum(datum)?;
            Ok(Expr::Quote(datum.clone()))
        }
        (SpecialForm::If, [cond, conseq, rest @ ..]) => {
            let alter = match rest {
                [alter] => parse(alter, env)?,
                _ => Expr::False,
            };
            Ok(Expr::If {
                cond: Box::new(parse(cond, env)?),
                conseq: Box::new(parse(conseq, env)?),
                alter: Box::new(alter),
            })
        }
        (SpecialForm::Lambda, [param_spec, body @ ..]) => {
            let params = parse_params(param_spec.as_list(), "lambda", form)?;
            parse_lambda(params, body, env)
        }
        (SpecialForm::Define, [target, body @ ..]) => parse_define(target, body, form, env),
        (SpecialForm::Begin, exprs) => Ok(Expr::Begin(parse_all(exprs, env)?)),
        (SpecialForm::Cond, clauses) => parse_cond(clauses, env),
        (SpecialForm::Let, [binding_spec, body @ ..]) => {
            let (names, inits) = parse_bindings(binding_spec, "let", form)?;
            let inits = parse_all(inits.as_slice(), env)?;
            let scope = placeholder_scope(env, &names);
            Ok(Expr::Let {
                bindings: names.into_iter().zip(inits).collect(),
                body: Box::new(parse_body(body, &scope)?),
            })
        }
        (SpecialForm::Letrec, [binding_spec, body @ ..]) => {
            let (names, inits) = parse_bindings(binding_spec, "letrec", form)?;
            let scope = placeholder_scope(env, &names);
            let inits = parse_all(inits.as_slice(), &scope)?;
            Ok(Expr::Letrec {
                bindings: names.into_iter().zip(inits).collect(),
                body: Box::new(parse_body(body, &scope)?),
            })
        }
        (SpecialForm::Set, [target, value]) => {
            let name = target.as_symbol().ok_or_else(|| {
                Error::Syntax(format!("set! variable must be a symbol: {form}"))
            })?;
            Ok(Expr::Set {
                name: name.to_owned(),
                expr: Box::new(parse(value, env)?),
            })
        }
        _ => Err(Error::Syntax(format!("Malformed {}: {form}", special_form.keyword()))),
    }
}

/// Child scope binding every name to a placeholder, used only while parsing
fn placeholder_scope(env: &Environment, names: &[String]) -> Environment {
    let scope = Environment::with_parent(env);
    for name in names {
        scope.define(name.as_str(), Value::Void);
    }
    scope
}

/// One or more body forms; several are wrapped in `begin`
fn parse_body(body: &[Syntax], env: &Environment) -> Result<Expr, Error> {
    Ok(Expr::sequence(parse_all(body, env)?))
}

fn parse_lambda(params: Vec<String>, body: &[Syntax], env: &Environment) -> Result<Expr, Error> {
    let scope = placeholder_scope(env, &params);
    let body = parse_body(body, &scope)?;
    Ok(Expr::Lambda {
        params,
        body: body.into(),
    })
}

/// Parameter names of a lambda; only fixed-arity lists of distinct symbols are accepted
fn parse_params(
    param_spec: Option<&[Syntax]>,
    keyword: &str,
    form: &Syntax,
) -> Result<Vec<String>, Error> {
    let items = param_spec
        .ok_or_else(|| Error::Syntax(format!("{keyword} parameters must be a list: {form}")))?;

    let mut params: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if item.is_dot() {
            return Err(Error::Syntax(format!(
                "{keyword}: rest parameters are not supported: {form}"
            )));
        }
        let name = item.as_symbol().ok_or_else(|| {
            Error::Syntax(format!("{keyword} parameters must be symbols: {form}"))
        })?;
        if params.iter().any(|existing| existing == name) {
            return Err(Error::Syntax(format!(
                "Duplicate parameter name: {name} in {form}"
            )));
        }
        params.push(name.to_owned());
    }
    Ok(params)
}

fn parse_define(
    target: &Syntax,
    body: &[Syntax],
    form: &Syntax,
    env: &Environment,
) -> Result<Expr, Error> {
    match target {
        Syntax::Symbol(name) => Ok(Expr::Define {
            name: name.clone(),
            expr: Box::new(parse_body(body, env)?),
        }),
        // (define (name params...) body...) is (define name (lambda (params...) body...))
        Syntax::List(signature) => {
            let Some((name, param_spec)) = signature.split_first() else {
                return Err(Error::Syntax(format!(
                    "define function shorthand cannot be empty: {form}"
                )));
            };
            let name = name.as_symbol().ok_or_else(|| {
                Error::Syntax(format!("define function name must be a symbol: {form}"))
            })?;
            let params = parse_params(Some(param_spec), "define", form)?;
            Ok(Expr::Define {
                name: name.to_owned(),
                expr: Box::new(parse_lambda(params, body, env)?),
            })
        }
        _ => Err(Error::Syntax(format!(
            "define: left-hand side must be a symbol or function shorthand: {form}"
        ))),
    }
}

fn parse_cond(clauses: &[Syntax], env: &Environment) -> Result<Expr, Error> {
    let else_is_keyword = !env.contains(ELSE);
    let mut parsed = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let items = clause
            .as_list()
            .ok_or_else(|| Error::Syntax(format!("cond clauses must be lists: {clause}")))?;
        let mut exprs = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if i == 0 && else_is_keyword && item.as_symbol() == Some(ELSE) {
                exprs.push(Expr::True);
            } else {
                exprs.push(parse(item, env)?);
            }
        }
        parsed.push(exprs);
    }
    Ok(Expr::Cond(parsed))
}

/// Splits `((name init) ...)` into names and initialiser syntax
fn parse_bindings(
    binding_spec: &Syntax,
    keyword: &str,
    form: &Syntax,
) -> Result<(Vec<String>, Vec<Syntax>), Error> {
    let bindings = binding_spec
        .as_list()
        .ok_or_else(|| Error::Syntax(format!("{keyword} bindings must be a list: {form}")))?;

    let mut names: Vec<String> = Vec::with_capacity(bindings.len());
    let mut inits = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let Some([name, init]) = binding.as_list() else {
            return Err(Error::Syntax(format!(
                "{keyword} binding must be a (var expr) pair: {binding}"
            )));
        };
        let name = name.as_symbol().ok_or_else(|| {
            Error::Syntax(format!("{keyword} binding variable must be a symbol: {binding}"))
        })?;
        if names.iter().any(|existing| existing == name) {
            return Err(Error::Syntax(format!(
                "Duplicate {keyword} binding: {name} in {form}"
            )));
        }
        names.push(name.to_owned());
        inits.push(init.clone());
    }
    Ok((names, inits))
}

/// Dotted tails in quoted data: one `.`, not first, followed by exactly one datum
fn validate_datum(datum: &Syntax) -> Result<(), Error> {
    let Syntax::List(items) = datum else {
        return Ok(());
    };

    let dots: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_dot())
        .map(|(i, _)| i)
        .collect();
    match dots.as_slice() {
        [] => {}
        [pos] if *pos > 0 && pos + 2 == items.len() => {}
        _ => {
            return Err(Error::Syntax(format!(
                "Invalid dotted list in quote: {datum}"
            )));
        }
    }

    items
        .iter()
        .filter(|item| !item.is_dot())
        .try_for_each(validate_datum)
}
