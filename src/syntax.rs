//! The syntax tree consumed by the parser.
//!
//! A [`Syntax`] node is what a reader produces from source text: atoms and nested lists,
//! with no interpretation attached. Every compound form (applications, special forms,
//! quoted data) is a [`Syntax::List`]; dotted pairs are lists that contain the literal
//! symbol `.`.

use std::fmt;

/// One node of the reader's output
#[derive(Debug, Clone, PartialEq)]
pub enum Syntax {
    Number(i64),
    /// Rational literal such as `3/4`, kept exactly as written
    Rational(i64, i64),
    Symbol(String),
    String(String),
    True,
    False,
    List(Vec<Syntax>),
}

/// Symbol marking the dotted tail of a quoted list
pub(crate) const DOT: &str = ".";

impl Syntax {
    /// Returns the symbol name if this node is a symbol
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Syntax::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements if this node is a list
    pub fn as_list(&self) -> Option<&[Syntax]> {
        match self {
            Syntax::List(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn is_dot(&self) -> bool {
        self.as_symbol() == Some(DOT)
    }
}

/// Helper for building symbol nodes in code and tests
pub fn sym<S: AsRef<str>>(name: S) -> Syntax {
    Syntax::Symbol(name.as_ref().to_owned())
}

/// Helper for building integer nodes
pub fn num(n: i64) -> Syntax {
    Syntax::Number(n)
}

/// Helper for building string literal nodes
pub fn str_lit<S: AsRef<str>>(text: S) -> Syntax {
    Syntax::String(text.as_ref().to_owned())
}

/// Helper for building list nodes
pub fn list<I: IntoIterator<Item = Syntax>>(items: I) -> Syntax {
    Syntax::List(items.into_iter().collect())
}

impl From<i64> for Syntax {
    fn from(n: i64) -> Self {
        Syntax::Number(n)
    }
}

impl From<bool> for Syntax {
    fn from(b: bool) -> Self {
        if b { Syntax::True } else { Syntax::False }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Syntax::Number(n) => write!(f, "{n}"),
            Syntax::Rational(num, den) => write!(f, "{num}/{den}"),
            Syntax::Symbol(s) => write!(f, "{s}"),
            Syntax::String(s) => write!(f, "{s:?}"),
            Syntax::True => write!(f, "#t"),
            Syntax::False => write!(f, "#f"),
            Syntax::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}
