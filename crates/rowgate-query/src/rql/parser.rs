use super::{Comparison, Operator, PageSpec, Predicate, Query, SortDirection, SortKey};
use crate::error::{QueryError, Result};
use serde_json::Value;
use std::borrow::Cow;

/// Split a raw query string into decoded `(key, value)` terms.
///
/// Terms are separated by `&` outside of parentheses and quotes. A term
/// without `=` yields an empty value.
pub fn split_terms(raw: &str) -> Result<Vec<(String, String)>> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let mut terms = Vec::new();

    for term in split_top_level(raw, '&')? {
        if term.is_empty() {
            continue;
        }
        let (key, value) = match find_top_level(term, '=') {
            Some(pos) => (&term[..pos], &term[pos + 1..]),
            None => (term, ""),
        };
        terms.push((decode(key)?, decode(value)?));
    }

    Ok(terms)
}

/// Parse a raw query string
pub fn parse(raw: &str) -> Result<Query> {
    parse_terms(&split_terms(raw)?)
}

/// Parse already split and decoded terms
pub fn parse_terms(terms: &[(String, String)]) -> Result<Query> {
    let mut query = Query::default();
    let mut predicates = Vec::new();

    for (key, value) in terms {
        let key = key.trim();
        match key.to_ascii_lowercase().as_str() {
            "sort" => query.sort.extend(parse_sort(value)?),
            "page" => query.page.page = Some(parse_count("page", value)?),
            "pagesize" | "limit" => query.page.page_size = Some(parse_count(key, value)?),
            _ if key.contains('(') => {
                if !value.is_empty() {
                    return Err(QueryError::malformed(format!(
                        "unexpected '={}' after '{}'",
                        value, key
                    )));
                }
                predicates.push(Parser::new(key).parse_all()?);
            }
            _ => {
                if !is_identifier(key) {
                    return Err(QueryError::malformed(format!("invalid term '{}'", key)));
                }
                predicates.push(bare_equality(key, value.trim())?);
            }
        }
    }

    query.root = match predicates.len() {
        0 => None,
        1 => predicates.pop(),
        _ => Some(Predicate::And(predicates)),
    };

    Ok(query)
}

fn parse_sort(value: &str) -> Result<Vec<SortKey>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let (direction, attribute) = match s.as_bytes()[0] {
                b'-' => (SortDirection::Desc, &s[1..]),
                b'+' => (SortDirection::Asc, &s[1..]),
                _ => (SortDirection::Asc, s),
            };
            if !is_identifier(attribute) {
                return Err(QueryError::malformed(format!("invalid sort key '{}'", s)));
            }
            Ok(SortKey {
                attribute: attribute.to_string(),
                direction,
            })
        })
        .collect()
}

fn parse_count(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| QueryError::malformed(format!("{} must be a non-negative integer, got '{}'", name, value)))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'))
}

/// `attr=value` shorthand, quoted the same way as a function operand
fn bare_equality(attribute: &str, value: &str) -> Result<Predicate> {
    match value.chars().next() {
        Some(q @ ('\'' | '"')) => {
            let inner = value[1..]
                .strip_suffix(q)
                .filter(|inner| !inner.contains(q))
                .ok_or_else(|| {
                    QueryError::malformed(format!("unterminated quote in '{}={}'", attribute, value))
                })?;
            Ok(Predicate::compare(
                Operator::Eq,
                attribute,
                Value::String(inner.to_string()),
            ))
        }
        _ => Ok(Predicate::pattern(Operator::Eq, attribute, typed_literal(value))),
    }
}

/// Type an unquoted literal
fn typed_literal(token: &str) -> Value {
    match token {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::Number(i.into());
    }
    if token.contains(['.', 'e', 'E']) {
        if let Some(n) = token
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .and_then(serde_json::Number::from_f64)
        {
            return Value::Number(n);
        }
    }
    Value::String(token.to_string())
}

fn decode(s: &str) -> Result<String> {
    let s: Cow<str> = if s.contains('+') {
        Cow::Owned(s.replace('+', " "))
    } else {
        Cow::Borrowed(s)
    };
    urlencoding::decode(&s)
        .map(|d| d.into_owned())
        .map_err(|e| QueryError::malformed(format!("invalid percent-encoding: {}", e)))
}

/// Split on `sep` outside parentheses and quotes
fn split_top_level(s: &str, sep: char) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return Err(QueryError::malformed("unbalanced parentheses"));
                }
            }
            (None, c) if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(QueryError::malformed("unbalanced parentheses"));
    }
    if quote.is_some() {
        return Err(QueryError::malformed("unterminated quote"));
    }

    parts.push(&s[start..]);
    Ok(parts)
}

fn find_top_level(s: &str, target: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            (None, c) if c == target && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

enum Arg {
    Call(Predicate),
    Token(String),
    Quoted(String),
    Name(String),
}

/// Recursive-descent parser for one function-call term
struct Parser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn parse_all(mut self) -> Result<Predicate> {
        let predicate = self.parse_call()?;
        self.skip_ws();
        if self.pos < self.chars.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(predicate)
    }

    fn error(&self, msg: &str) -> QueryError {
        QueryError::malformed(format!("{} at position {} in '{}'", msg, self.pos, self.src))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn read_name(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_call(&mut self) -> Result<Predicate> {
        self.skip_ws();
        let name = self.read_name();
        if name.is_empty() {
            return Err(self.error("expected operator name"));
        }
        self.expect('(')?;

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() != Some(')') {
            loop {
                args.push(self.parse_arg()?);
                self.skip_ws();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => break,
                    _ => return Err(self.error("unbalanced parentheses")),
                }
            }
        }
        self.expect(')')?;

        self.build(&name, args)
    }

    fn parse_arg(&mut self) -> Result<Arg> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('\'' | '"' | '`')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(self.error("unterminated quote"));
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(if q == '`' { Arg::Name(text) } else { Arg::Quoted(text) })
            }
            _ => {
                let start = self.pos;
                while self.peek().is_some_and(|c| !matches!(c, ',' | ')' | '(')) {
                    self.pos += 1;
                }
                if self.peek() == Some('(') {
                    self.pos = start;
                    return self.parse_call().map(Arg::Call);
                }
                let token: String = self.chars[start..self.pos].iter().collect();
                Ok(Arg::Token(token.trim().to_string()))
            }
        }
    }

    fn build(&self, name: &str, args: Vec<Arg>) -> Result<Predicate> {
        match name.to_ascii_lowercase().as_str() {
            "and" | "or" => {
                if args.is_empty() {
                    return Err(self.error(&format!("'{}' needs at least one term", name)));
                }
                let children = args
                    .into_iter()
                    .map(|a| match a {
                        Arg::Call(p) => Ok(p),
                        _ => Err(self.error(&format!("'{}' only combines function terms", name))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(if name.eq_ignore_ascii_case("and") {
                    Predicate::And(children)
                } else {
                    Predicate::Or(children)
                })
            }
            _ => {
                let op = Operator::from_name(name)
                    .ok_or_else(|| self.error(&format!("unknown operator '{}'", name)))?;

                let arity_ok = match op {
                    Operator::In => args.len() >= 2,
                    _ => args.len() == 2,
                };
                if !arity_ok {
                    return Err(self.error(&format!(
                        "'{}' takes {} arguments, got {}",
                        op,
                        if op == Operator::In { "at least 2" } else { "2" },
                        args.len()
                    )));
                }

                let mut args = args.into_iter();
                let attribute = match args.next() {
                    Some(Arg::Token(t)) | Some(Arg::Name(t)) | Some(Arg::Quoted(t))
                        if is_identifier(&t) =>
                    {
                        t
                    }
                    _ => return Err(self.error(&format!("'{}' needs an attribute name first", op))),
                };

                let mut wildcard = false;
                let values = args
                    .enumerate()
                    .map(|(i, a)| match a {
                        Arg::Token(t) => {
                            wildcard |= i == 0;
                            Ok(typed_literal(&t))
                        }
                        Arg::Quoted(t) | Arg::Name(t) => Ok(Value::String(t)),
                        Arg::Call(_) => Err(self.error("a comparison value cannot be a function")),
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(Predicate::Compare(Comparison {
                    op,
                    attribute,
                    values,
                    wildcard,
                }))
            }
        }
    }
}
