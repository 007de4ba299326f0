//! Parameterized header-value codec.
//!
//! Several handshake headers share the shape `token (; name [= value])*`,
//! where a value is either a bare token or a quoted string with `\"`
//! escaping. `Sec-WebSocket-Extensions` and `Content-Type` both use it.
//! [`Parameterized`] parses and formats that shape, applying the minimal
//! quoting rule on output: bare when every character is a token character,
//! quoted otherwise, with `"` and `\` escaped inside quotes.

use std::fmt;

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, space0},
    combinator::opt,
    sequence::{pair, preceded},
    IResult,
};

/// A header value of the form `token (; name [= value])*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameterized {
    /// The leading token, e.g. `permessage-deflate` or `text/plain`.
    pub token: String,
    /// Parameters in source order; `None` values are bare flags.
    pub params: Vec<(String, Option<String>)>,
}

impl Parameterized {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            params: Vec::new(),
        }
    }

    /// Appends a parameter, builder style.
    pub fn with_param(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.params.push((name.into(), value.map(str::to_owned)));
        self
    }

    /// Case-insensitive comparison of the leading token.
    pub fn token_is(&self, token: &str) -> bool {
        self.token.eq_ignore_ascii_case(token)
    }

    /// Looks up a parameter by case-insensitive name. The outer `Option`
    /// distinguishes "absent" from "present without a value".
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }

    /// Parses a single parameterized value.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let (rest, parsed) = parse_one(input.trim()).map_err(|_| ParseError)?;
        if !rest.trim().is_empty() {
            return Err(ParseError);
        }
        Ok(parsed)
    }

    /// Parses a comma-separated list of parameterized values, as carried by
    /// `Sec-WebSocket-Extensions`. Commas inside quoted values do not split.
    pub fn parse_list(input: &str) -> Result<Vec<Self>, ParseError> {
        let mut items = Vec::new();
        let mut rest = input.trim_start();
        loop {
            let (after, parsed) = parse_one(rest).map_err(|_| ParseError)?;
            items.push(parsed);
            rest = after.trim_start();
            if rest.is_empty() {
                return Ok(items);
            }
            rest = rest.strip_prefix(',').ok_or(ParseError)?.trim_start();
            if rest.is_empty() {
                return Err(ParseError);
            }
        }
    }
}

impl std::str::FromStr for Parameterized {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

/// The input did not match `token (; name [= value])*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError;

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed parameterized header value")
    }
}

impl std::error::Error for ParseError {}

/// RFC 7230 tchar set.
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|'
                | '~'
        )
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

/// `"` ( qdtext | `\` any )* `"`, unescaping as it goes.
fn quoted_string(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('"')(input)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                rest = &rest[i + 1..];
                return Ok((rest, out));
            }
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn param_value(input: &str) -> IResult<&str, String> {
    if input.starts_with('"') {
        quoted_string(input)
    } else {
        let (rest, value) = token(input)?;
        Ok((rest, value.to_owned()))
    }
}

/// `; name [= value]`, tolerating optional whitespace around separators.
fn param(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (rest, (name, value)) = preceded(
        pair(space0, char(';')),
        preceded(
            space0,
            pair(
                token,
                opt(preceded(pair(space0, pair(char('='), space0)), param_value)),
            ),
        ),
    )(input)?;
    Ok((rest, (name.to_owned(), value)))
}

fn parse_one(input: &str) -> IResult<&str, Parameterized> {
    let (mut rest, lead) = token(input)?;
    let mut parsed = Parameterized::new(lead);
    // Content-Type style tokens may carry a single slash: `text/html`.
    if let Some(after_slash) = rest.strip_prefix('/') {
        let (after, subtype) = token(after_slash)?;
        parsed.token.push('/');
        parsed.token.push_str(subtype);
        rest = after;
    }
    loop {
        match param(rest) {
            Ok((after, p)) => {
                parsed.params.push(p);
                rest = after;
            }
            Err(_) => return Ok((rest, parsed)),
        }
    }
}

/// Formats a value with minimal quoting.
fn format_value(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    if !value.is_empty() && value.chars().all(is_token_char) {
        return f.write_str(value);
    }
    f.write_str("\"")?;
    for c in value.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

impl fmt::Display for Parameterized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)?;
        for (name, value) in &self.params {
            write!(f, "; {name}")?;
            if let Some(value) = value {
                f.write_str("=")?;
                format_value(f, value)?;
            }
        }
        Ok(())
    }
}
