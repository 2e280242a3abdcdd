//! Tagged literal values
//!
//! Parameter values, stage inputs and stage outputs all share the `Val` type.
//! Literal text from scripts is decoded with the literal rules of the script
//! grammar; anything that is not a literal falls back to a plain string.

use pest::iterators::Pair;
use pest::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use crate::parser::{Rule, ScriptParser};

/// Ordered map of named values (stage inputs, stage outputs, parameters)
pub type ValMap = BTreeMap<String, Val>;

/// Runtime value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Val {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Obj(ValMap),
}

impl Val {
    /// Decode a structured literal (`None`, `True`, `1.5`, `"text"`, `[..]`, `{..}`).
    ///
    /// Returns `None` when the text is not a complete literal.
    pub fn parse_literal(text: &str) -> Option<Val> {
        let mut pairs = ScriptParser::parse(Rule::literal_doc, text).ok()?;
        let doc = pairs.next()?;
        let literal = doc.into_inner().find(|p| p.as_rule() != Rule::EOI)?;
        build_literal(literal)
    }

    /// Decode a script argument: a structured literal when possible, otherwise
    /// the trimmed text with one layer of surrounding quotes removed.
    pub fn decode_argument(text: &str) -> Val {
        let trimmed = text.trim();
        Val::parse_literal(trimmed).unwrap_or_else(|| Val::Str(strip_quotes(trimmed).to_string()))
    }

    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Null => false,
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&ValMap> {
        match self {
            Val::Obj(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Val]> {
        match self {
            Val::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert to a JSON value. Non-finite numbers become `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Val::Null => JsonValue::Null,
            Val::Bool(b) => JsonValue::Bool(*b),
            Val::Num(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Val::Str(s) => JsonValue::String(s.clone()),
            Val::List(items) => JsonValue::Array(items.iter().map(Val::to_json).collect()),
            Val::Obj(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(json: &JsonValue) -> Val {
        match json {
            JsonValue::Null => Val::Null,
            JsonValue::Bool(b) => Val::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map(Val::Num).unwrap_or(Val::Null),
            JsonValue::String(s) => Val::Str(s.clone()),
            JsonValue::Array(items) => Val::List(items.iter().map(Val::from_json).collect()),
            JsonValue::Object(map) => Val::Obj(
                map.iter()
                    .map(|(k, v)| (k.clone(), Val::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Str(s)
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Num(n)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<ValMap> for Val {
    fn from(map: ValMap) -> Self {
        Val::Obj(map)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => write!(f, "null"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Num(n) => write!(f, "{}", n),
            Val::Str(s) => write!(f, "{}", s),
            Val::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Val::Obj(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/* ===================== Literal Builder ===================== */

fn build_literal(pair: Pair<Rule>) -> Option<Val> {
    match pair.as_rule() {
        Rule::null_lit => Some(Val::Null),
        Rule::bool_lit => Some(Val::Bool(matches!(pair.as_str(), "True" | "true"))),
        Rule::number => pair.as_str().parse::<f64>().ok().map(Val::Num),
        Rule::string_lit => Some(Val::Str(unescape_string_lit(pair))),
        Rule::list_lit | Rule::tuple_lit => pair
            .into_inner()
            .map(build_literal)
            .collect::<Option<Vec<_>>>()
            .map(Val::List),
        Rule::map_lit => {
            let mut map = ValMap::new();
            for entry in pair.into_inner() {
                let mut inner = entry.into_inner();
                let key_pair = inner.next()?;
                let key = match key_pair.as_rule() {
                    Rule::string_lit => unescape_string_lit(key_pair),
                    _ => key_pair.as_str().to_string(),
                };
                let value = build_literal(inner.next()?)?;
                map.insert(key, value);
            }
            Some(Val::Obj(map))
        }
        _ => None,
    }
}

/// Unescape the body of a quoted string literal pair
pub(crate) fn unescape_string_lit(pair: Pair<Rule>) -> String {
    let body = pair
        .into_inner()
        .next()
        .map(|inner| inner.as_str())
        .unwrap_or("");
    unescape(body)
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Strip one layer of matching surrounding quotes
pub(crate) fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}
