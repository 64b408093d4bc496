//! Parameter domains and concrete parameter values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A parameter declared by the generator at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Name as it appears in the request line (e.g. "tree/loga").
    pub name: String,
    /// The domain the value must be drawn from.
    pub kind: ParameterKind,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Domain of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterKind {
    /// Continuous range [min, max].
    Float { min: f64, max: f64 },
    /// Integer range [min, max] inclusive.
    #[serde(rename = "int")]
    Integer { min: i64, max: i64 },
    /// Enumerated choice set, in declaration order.
    Choice { values: Vec<String> },
}

impl ParameterKind {
    /// Whether `value` lies inside this domain.
    ///
    /// Text values are accepted for numeric kinds when they parse, since
    /// pinned parameters arrive verbatim from the task file.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match self {
            Self::Float { min, max } => value.as_f64().is_some_and(|v| v >= *min && v <= *max),
            Self::Integer { min, max } => value.as_i64().is_some_and(|v| v >= *min && v <= *max),
            Self::Choice { values } => {
                let text = value.to_string();
                values.iter().any(|c| *c == text)
            }
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float { min, max } => write!(f, "float[{min}, {max}]"),
            Self::Integer { min, max } => write!(f, "int[{min}, {max}]"),
            Self::Choice { values } => write!(f, "choice{{{}}}", values.join(", ")),
        }
    }
}

/// A concrete value bound to a parameter for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric view of the value. Text is parsed, so a pinned `"2.5"` reads as 2.5.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Float(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Parameter assignment for one trial, keyed by name.
///
/// Sparse: a name that is absent was not observed, it does not default to
/// anything.
pub type FeedDict = BTreeMap<String, ParamValue>;
