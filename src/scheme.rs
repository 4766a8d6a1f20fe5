//! Text reader: source text to [`Syntax`] trees.
//!
//! Lists, `'datum` shorthand, string literals, booleans and atoms. An atom becomes a
//! `Number` when it is a signed decimal integer, a `Rational` when it is `int/digits`,
//! and a `Symbol` otherwise (`.` included, so dotted data reach the parser intact).

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0, multispace1, not_line_ending},
    combinator::{cut, value},
    error::ErrorKind,
    multi::many0,
    sequence::{pair, preceded},
};

use crate::syntax::{Syntax, sym};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Treat `;` up to the end of the line as whitespace
    pub handle_comments: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
        }
    }
}

/// Characters that end an atom
fn is_atom_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '\'' | '"' | ';')
}

/// Convert nom parsing errors to structured reader errors
fn to_parse_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ),
                _ if position >= input.len() => (
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input".to_owned(),
                ),
                ErrorKind::Digit => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Integer literal out of range at position {position}"),
                ),
                ErrorKind::Verify => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Rational literal with zero denominator at position {position}"),
                ),
                ErrorKind::Escaped => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Unknown escape sequence at position {position}"),
                ),
                _ => {
                    let near: String = input[position..].chars().take(10).collect();
                    (
                        ParseErrorKind::InvalidSyntax,
                        format!("Invalid syntax near '{near}'"),
                    )
                }
            };
            ParseError::with_context(kind, message, input, position)
        }
        nom::Err::Incomplete(_) => {
            ParseError::new(ParseErrorKind::Incomplete, "Incomplete input", None)
        }
    }
}

/// Skips whitespace, and comments when enabled
fn skip_space(input: &str, config: ParseConfig) -> IResult<&str, ()> {
    if config.handle_comments {
        value(
            (),
            many0(alt((
                value((), multispace1),
                value((), pair(char(';'), not_line_ending)),
            ))),
        )
        .parse(input)
    } else {
        value((), multispace0).parse(input)
    }
}

fn is_integer_literal(token: &str) -> bool {
    let digits = token.strip_prefix(['+', '-']).unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Classifies an atom token; the error kind names why a numeric-looking token was refused
fn classify_atom(token: &str) -> Result<Syntax, ErrorKind> {
    match token {
        "#t" => return Ok(Syntax::True),
        "#f" => return Ok(Syntax::False),
        _ => {}
    }

    if is_integer_literal(token) {
        return token
            .parse::<i64>()
            .map(Syntax::Number)
            .map_err(|_| ErrorKind::Digit);
    }

    if let Some((num, den)) = token.split_once('/')
        && is_integer_literal(num)
        && !den.is_empty()
        && den.bytes().all(|b| b.is_ascii_digit())
    {
        let num = num.parse::<i64>().map_err(|_| ErrorKind::Digit)?;
        let den = den.parse::<i64>().map_err(|_| ErrorKind::Digit)?;
        if den == 0 {
            return Err(ErrorKind::Verify);
        }
        return Ok(Syntax::Rational(num, den));
    }

    Ok(Syntax::Symbol(token.to_owned()))
}

/// Parse a number, boolean or symbol
fn parse_atom(input: &str) -> IResult<&str, Syntax> {
    let (remaining, token) = take_while1(is_atom_char).parse(input)?;
    match classify_atom(token) {
        Ok(syntax) => Ok((remaining, syntax)),
        Err(kind) => Err(nom::Err::Failure(nom::error::Error::new(input, kind))),
    }
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Syntax> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), Syntax::String(text))),
            Some('\\') => {
                let escaped = match chars.next() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('\\') => '\\',
                    Some('"') => '"',
                    Some(_) => {
                        return Err(nom::Err::Failure(nom::error::Error::new(
                            remaining,
                            ErrorKind::Escaped,
                        )));
                    }
                    // Backslash at end of input
                    None => {
                        return Err(nom::Err::Failure(nom::error::Error::new(
                            chars.as_str(),
                            ErrorKind::Char,
                        )));
                    }
                };
                text.push(escaped);
                remaining = chars.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = chars.as_str();
            }
            // Unterminated string
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    remaining,
                    ErrorKind::Char,
                )));
            }
        }
    }
}

/// Parse a parenthesised list; once `(` is read, a missing `)` is a hard failure
fn parse_list(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Syntax> {
    let (input, _) = char('(').parse(input)?;
    let (input, items) = many0(preceded(
        |input| skip_space(input, config),
        |input| parse_datum(input, config, depth + 1),
    ))
    .parse(input)?;
    let (input, _) = skip_space(input, config)?;
    let (input, _) = cut(char(')')).parse(input)?;
    Ok((input, Syntax::List(items)))
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Syntax> {
    let (input, _) = char('\'').parse(input)?;
    let (input, _) = skip_space(input, config)?;
    let (input, datum) = cut(|input| parse_datum(input, config, depth + 1)).parse(input)?;
    Ok((input, Syntax::List(vec![sym("quote"), datum])))
}

fn parse_datum(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Syntax> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    alt((
        |input| parse_list(input, config, depth),
        |input| parse_quote(input, config, depth),
        parse_string,
        parse_atom,
    ))
    .parse(input)
}

/// Parse exactly one datum from input.
pub fn parse_scheme(input: &str) -> Result<Syntax, Error> {
    parse_scheme_with_config(input, ParseConfig::default())
}

/// Parse exactly one datum with explicit reader options
pub fn parse_scheme_with_config(input: &str, config: ParseConfig) -> Result<Syntax, Error> {
    let parsed = skip_space(input, config)
        .and_then(|(rest, ())| parse_datum(rest, config, 0))
        .and_then(|(rest, datum)| {
            skip_space(rest, config).map(|(rest, ())| (rest, datum))
        });

    match parsed {
        Ok(("", datum)) => Ok(datum),
        Ok((remaining, _)) => {
            let offset = input.len() - remaining.len();
            Err(ParseError::with_context(
                ParseErrorKind::TrailingContent,
                format!("Unexpected remaining input: '{}'", remaining.trim_end()),
                input,
                offset,
            )
            .into())
        }
        Err(e) => Err(to_parse_error(input, e).into()),
    }
}

/// Parse every datum in a program text, in order
pub fn parse_program(input: &str) -> Result<Vec<Syntax>, Error> {
    parse_program_with_config(input, ParseConfig::default())
}

/// Parse every datum in a program text with explicit reader options
pub fn parse_program_with_config(input: &str, config: ParseConfig) -> Result<Vec<Syntax>, Error> {
    let mut data = Vec::new();
    let mut rest = input;
    loop {
        let (remaining, ()) = skip_space(rest, config).map_err(|e| to_parse_error(input, e))?;
        if remaining.is_empty() {
            return Ok(data);
        }
        let (remaining, datum) =
            parse_datum(remaining, config, 0).map_err(|e| to_parse_error(input, e))?;
        data.push(datum);
        rest = remaining;
    }
}
