//! Parameter spec payload decoding.
//!
//! The canonical payload is an s-expression of key/value pairs, either flat
//! `(type int min 0 max 10)` or paired `((type int) (min 0) (max 10))`. A
//! value may itself be a list of atoms: `(type choice choices (a b c))`.
//!
//! Payloads starting with `{` are the legacy JSON encoding
//! (`{"type": "INTEGER", "min": 0, "max": 10}`), accepted for older
//! generator headers.

use at_types::{protocol_error, AtResult, ParameterKind, ProtocolError};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Atom(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

/// A decoded field value: a single atom or a list of atoms.
#[derive(Debug, Clone, PartialEq)]
enum Field {
    Atom(String),
    List(Vec<String>),
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in input.char_indices() {
        if c == '(' || c == ')' || c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(Token::Atom(&input[s..i]));
            }
            match c {
                '(' => tokens.push(Token::Open),
                ')' => tokens.push(Token::Close),
                _ => {}
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(Token::Atom(&input[s..]));
    }
    tokens
}

struct Parser<'a> {
    payload: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(payload: &'a str) -> Self {
        Self {
            payload,
            tokens: tokenize(payload),
            pos: 0,
        }
    }

    fn expr(&mut self) -> AtResult<SExpr> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Atom(a)) => {
                self.pos += 1;
                Ok(SExpr::Atom(a.to_string()))
            }
            Some(Token::Open) => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    match self.tokens.get(self.pos) {
                        Some(Token::Close) => {
                            self.pos += 1;
                            return Ok(SExpr::List(items));
                        }
                        Some(_) => items.push(self.expr()?),
                        None => return Err(protocol_error!(self.payload, "unbalanced parentheses")),
                    }
                }
            }
            Some(Token::Close) => Err(protocol_error!(self.payload, "unexpected ')'")),
            None => Err(protocol_error!(self.payload, "empty expression")),
        }
    }

    fn parse(mut self) -> AtResult<SExpr> {
        let expr = self.expr()?;
        if self.pos != self.tokens.len() {
            return Err(protocol_error!(self.payload, "trailing tokens after expression"));
        }
        Ok(expr)
    }
}

fn field_value(payload: &str, expr: SExpr) -> AtResult<Field> {
    match expr {
        SExpr::Atom(a) => Ok(Field::Atom(a)),
        SExpr::List(items) => items
            .into_iter()
            .map(|item| match item {
                SExpr::Atom(a) => Ok(a),
                SExpr::List(_) => Err(protocol_error!(payload, "nested list inside a value")),
            })
            .collect::<AtResult<Vec<_>>>()
            .map(Field::List),
    }
}

fn key(payload: &str, expr: SExpr) -> AtResult<String> {
    match expr {
        SExpr::Atom(a) => Ok(a),
        SExpr::List(_) => Err(protocol_error!(payload, "field key must be an atom")),
    }
}

fn fields(payload: &str, root: SExpr) -> AtResult<BTreeMap<String, Field>> {
    let items = match root {
        SExpr::List(items) => items,
        SExpr::Atom(_) => return Err(protocol_error!(payload, "spec must be a parenthesized list")),
    };

    let mut out = BTreeMap::new();
    if matches!(items.first(), Some(SExpr::List(_))) {
        // Paired layout: ((k v) (k v) ...)
        for item in items {
            match item {
                SExpr::List(pair) if pair.len() == 2 => {
                    let mut pair = pair.into_iter();
                    let (k, v) = match (pair.next(), pair.next()) {
                        (Some(k), Some(v)) => (k, v),
                        _ => return Err(protocol_error!(payload, "expected a (key value) pair")),
                    };
                    out.insert(key(payload, k)?, field_value(payload, v)?);
                }
                _ => return Err(protocol_error!(payload, "expected a (key value) pair")),
            }
        }
    } else {
        if items.len() % 2 != 0 {
            return Err(protocol_error!(payload, "odd number of elements in key/value list"));
        }
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            out.insert(key(payload, k)?, field_value(payload, v)?);
        }
    }
    Ok(out)
}

fn atom<'f>(payload: &str, fields: &'f BTreeMap<String, Field>, name: &str) -> AtResult<&'f str> {
    match fields.get(name) {
        Some(Field::Atom(a)) => Ok(a),
        Some(Field::List(_)) => Err(protocol_error!(
            payload,
            "field '{name}' must be a single value"
        )),
        None => Err(protocol_error!(payload, "missing field '{name}'")),
    }
}

fn number<T: std::str::FromStr>(
    payload: &str,
    fields: &BTreeMap<String, Field>,
    name: &str,
) -> AtResult<T> {
    let raw = atom(payload, fields, name)?;
    raw.parse()
        .map_err(|_| protocol_error!(payload, "field '{name}' is not a valid number: '{raw}'"))
}

fn float_kind(payload: &str, min: f64, max: f64) -> AtResult<ParameterKind> {
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(protocol_error!(payload, "invalid float range [{min}, {max}]"));
    }
    // Uniform draws need a finite span as well as finite bounds.
    if !(max - min).is_finite() {
        return Err(protocol_error!(payload, "float range [{min}, {max}] is too wide"));
    }
    Ok(ParameterKind::Float { min, max })
}

fn integer_kind(payload: &str, min: i64, max: i64) -> AtResult<ParameterKind> {
    if min > max {
        return Err(protocol_error!(payload, "invalid int range [{min}, {max}]"));
    }
    Ok(ParameterKind::Integer { min, max })
}

fn choice_kind(payload: &str, values: Vec<String>) -> AtResult<ParameterKind> {
    if values.is_empty() {
        return Err(protocol_error!(payload, "choice set is empty"));
    }
    Ok(ParameterKind::Choice { values })
}

/// Parse a canonical s-expression spec payload.
pub fn parse_sexpr_spec(payload: &str) -> AtResult<ParameterKind> {
    let root = Parser::new(payload).parse()?;
    let fields = fields(payload, root)?;

    match atom(payload, &fields, "type")? {
        "float" => float_kind(
            payload,
            number(payload, &fields, "min")?,
            number(payload, &fields, "max")?,
        ),
        "int" => integer_kind(
            payload,
            number(payload, &fields, "min")?,
            number(payload, &fields, "max")?,
        ),
        "choice" => match fields.get("choices") {
            Some(Field::List(values)) => choice_kind(payload, values.clone()),
            Some(Field::Atom(single)) => choice_kind(payload, vec![single.clone()]),
            None => Err(protocol_error!(payload, "missing field 'choices'")),
        },
        other => Err(ProtocolError::UnrecognizedSpec {
            kind: other.to_string(),
        }
        .into()),
    }
}

/// Parse the legacy JSON spec payload.
pub fn parse_json_spec(payload: &str) -> AtResult<ParameterKind> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| protocol_error!(payload, "invalid JSON: {e}"))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| protocol_error!(payload, "missing field 'type'"))?;
    let num = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| protocol_error!(payload, "missing numeric field '{name}'"))
    };

    match kind.to_ascii_lowercase().as_str() {
        "float" => float_kind(payload, num("min")?, num("max")?),
        "integer" | "int" => {
            let int = |name: &str| {
                value
                    .get(name)
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| protocol_error!(payload, "missing integer field '{name}'"))
            };
            integer_kind(payload, int("min")?, int("max")?)
        }
        "choice" => {
            let values = value
                .get("choices")
                .and_then(|c| c.as_array())
                .ok_or_else(|| protocol_error!(payload, "missing field 'choices'"))?
                .iter()
                .map(|c| match c {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            choice_kind(payload, values)
        }
        _ => Err(ProtocolError::UnrecognizedSpec {
            kind: kind.to_string(),
        }
        .into()),
    }
}

/// Decode a request payload, dispatching on its encoding.
pub fn parse_spec(payload: &str) -> AtResult<ParameterKind> {
    let payload = payload.trim();
    if payload.starts_with('{') {
        tracing::debug!("Decoding legacy JSON spec payload: {}", payload);
        parse_json_spec(payload)
    } else {
        parse_sexpr_spec(payload)
    }
}
