//! The executable expression tree.
//!
//! [`Expr`] is built once by the parser from a [`Syntax`] tree and never changes
//! afterwards; evaluation only mutates environment frames and pairs. Primitive operators
//! are resolved at parse time into [`UnaryOp`], [`BinaryOp`] and [`VariadicOp`] nodes so
//! the evaluator dispatches on a closed set instead of looking names up again.
//!
//! `Display` renders an expression back to source form; error messages use it for
//! context.

use std::fmt;
use std::rc::Rc;

use crate::syntax::Syntax;

/// Primitives taking exactly one evaluated operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Car,
    Cdr,
    Not,
    IsBoolean,
    IsNumber,
    IsNull,
    IsPair,
    IsProcedure,
    IsSymbol,
    IsString,
    IsList,
    Display,
}

/// Primitives taking exactly two evaluated operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Modulo,
    Expt,
    Cons,
    SetCar,
    SetCdr,
    IsEq,
}

/// Primitives taking any number of evaluated operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariadicOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    NumEq,
    Ge,
    Gt,
    List,
}

impl UnaryOp {
    pub fn scheme_id(self) -> &'static str {
        match self {
            UnaryOp::Car => "car",
            UnaryOp::Cdr => "cdr",
            UnaryOp::Not => "not",
            UnaryOp::IsBoolean => "boolean?",
            UnaryOp::IsNumber => "number?",
            UnaryOp::IsNull => "null?",
            UnaryOp::IsPair => "pair?",
            UnaryOp::IsProcedure => "procedure?",
            UnaryOp::IsSymbol => "symbol?",
            UnaryOp::IsString => "string?",
            UnaryOp::IsList => "list?",
            UnaryOp::Display => "display",
        }
    }
}

impl BinaryOp {
    pub fn scheme_id(self) -> &'static str {
        match self {
            BinaryOp::Modulo => "modulo",
            BinaryOp::Expt => "expt",
            BinaryOp::Cons => "cons",
            BinaryOp::SetCar => "set-car!",
            BinaryOp::SetCdr => "set-cdr!",
            BinaryOp::IsEq => "eq?",
        }
    }
}

impl VariadicOp {
    pub fn scheme_id(self) -> &'static str {
        match self {
            VariadicOp::Add => "+",
            VariadicOp::Sub => "-",
            VariadicOp::Mul => "*",
            VariadicOp::Div => "/",
            VariadicOp::Lt => "<",
            VariadicOp::Le => "<=",
            VariadicOp::NumEq => "=",
            VariadicOp::Ge => ">=",
            VariadicOp::Gt => ">",
            VariadicOp::List => "list",
        }
    }
}

/// Executable expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Fixnum(i64),
    RationalNum(i64, i64),
    StringExpr(String),
    True,
    False,
    /// `(void)`
    MakeVoid,
    /// `(exit)`
    Exit,
    Var(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Variadic {
        op: VariadicOp,
        operands: Vec<Expr>,
    },
    /// Unevaluated datum; converted to a value each time it is evaluated
    Quote(Syntax),
    If {
        cond: Box<Expr>,
        conseq: Box<Expr>,
        alter: Box<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Rc<Expr>,
    },
    Apply {
        rator: Box<Expr>,
        rands: Vec<Expr>,
    },
    Define {
        name: String,
        expr: Box<Expr>,
    },
    Begin(Vec<Expr>),
    /// Each clause is its test followed by its body
    Cond(Vec<Vec<Expr>>),
    Let {
        bindings: Vec<(String, Expr)>,
        body: Box<Expr>,
    },
    Letrec {
        bindings: Vec<(String, Expr)>,
        body: Box<Expr>,
    },
    Set {
        name: String,
        expr: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Wraps several body forms in `begin`; a single form is returned as is
    pub(crate) fn sequence(mut body: Vec<Expr>) -> Expr {
        if body.len() == 1 {
            body.remove(0)
        } else {
            Expr::Begin(body)
        }
    }
}

fn write_spaced(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for item in items {
        write!(f, " {item}")?;
    }
    Ok(())
}

fn write_bindings(f: &mut fmt::Formatter<'_>, bindings: &[(String, Expr)]) -> fmt::Result {
    write!(f, "(")?;
    for (i, (name, init)) in bindings.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "({name} {init})")?;
    }
    write!(f, ")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Fixnum(n) => write!(f, "{n}"),
            Expr::RationalNum(num, den) => write!(f, "{num}/{den}"),
            Expr::StringExpr(s) => write!(f, "{s:?}"),
            Expr::True => write!(f, "#t"),
            Expr::False => write!(f, "#f"),
            Expr::MakeVoid => write!(f, "(void)"),
            Expr::Exit => write!(f, "(exit)"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Unary { op, operand } => write!(f, "({} {operand})", op.scheme_id()),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {lhs} {rhs})", op.scheme_id()),
            Expr::Variadic { op, operands } => {
                write!(f, "({}", op.scheme_id())?;
                write_spaced(f, operands)?;
                write!(f, ")")
            }
            Expr::Quote(datum) => write!(f, "(quote {datum})"),
            Expr::If {
                cond,
                conseq,
                alter,
            } => write!(f, "(if {cond} {conseq} {alter})"),
            Expr::Lambda { params, body } => {
                write!(f, "(lambda ({}) {body})", params.join(" "))
            }
            Expr::Apply { rator, rands } => {
                write!(f, "({rator}")?;
                write_spaced(f, rands)?;
                write!(f, ")")
            }
            Expr::Define { name, expr } => write!(f, "(define {name} {expr})"),
            Expr::Begin(exprs) => {
                write!(f, "(begin")?;
                write_spaced(f, exprs)?;
                write!(f, ")")
            }
            Expr::Cond(clauses) => {
                write!(f, "(cond")?;
                for clause in clauses {
                    write!(f, " (")?;
                    for (i, e) in clause.iter().enumerate() {
                        if i > 0 {
                            write!(f, " ")?;
                        }
                        write!(f, "{e}")?;
                    }
                    write!(f, ")")?;
                }
                write!(f, ")")
            }
            Expr::Let { bindings, body } => {
                write!(f, "(let ")?;
                write_bindings(f, bindings)?;
                write!(f, " {body})")
            }
            Expr::Letrec { bindings, body } => {
                write!(f, "(letrec ")?;
                write_bindings(f, bindings)?;
                write!(f, " {body})")
            }
            Expr::Set { name, expr } => write!(f, "(set! {name} {expr})"),
            Expr::And(exprs) => {
                write!(f, "(and")?;
                write_spaced(f, exprs)?;
                write!(f, ")")
            }
            Expr::Or(exprs) => {
                write!(f, "(or")?;
                write_spaced(f, exprs)?;
                write!(f, ")")
            }
        }
    }
}
