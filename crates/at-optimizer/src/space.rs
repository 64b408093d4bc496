//! Parameter registry and feasible-value synthesis.

use at_types::{AtResult, ParamValue, ParameterKind, ParameterSpec, ProtocolError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decimal places kept for float parameters. Bounds the search resolution.
pub const FLOAT_DECIMALS: i32 = 3;

/// Round a float parameter value to the search resolution.
pub fn round_float(value: f64) -> f64 {
    let scale = 10f64.powi(FLOAT_DECIMALS);
    let scaled = value * scale;
    if !scaled.is_finite() {
        // Already coarser than the grid.
        return value;
    }
    scaled.round() / scale
}

/// Draw a uniformly random value from `kind`.
pub fn synthesize<R: Rng + ?Sized>(kind: &ParameterKind, rng: &mut R) -> ParamValue {
    match kind {
        ParameterKind::Float { min, max } => {
            let raw = rng.random_range(*min..=*max);
            // Rounding can step just outside a bound that is not itself on the grid.
            ParamValue::Float(round_float(raw).clamp(*min, *max))
        }
        ParameterKind::Integer { min, max } => ParamValue::Int(rng.random_range(*min..=*max)),
        ParameterKind::Choice { values } => {
            let idx = rng.random_range(0..values.len());
            ParamValue::Text(values[idx].clone())
        }
    }
}

/// Every parameter discovered so far in this run.
///
/// Append-only: names are never removed and a name's kind never changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterRegistry {
    parameters: BTreeMap<String, ParameterSpec>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `spec` under `name`. Returns `true` if the name was new.
    ///
    /// Re-registering an identical kind is a no-op; a different kind is a
    /// protocol error.
    pub fn register(&mut self, name: &str, kind: ParameterKind) -> AtResult<bool> {
        match self.parameters.get(name) {
            Some(existing) if existing.kind == kind => Ok(false),
            Some(existing) => Err(ProtocolError::ConflictingDefinition {
                name: name.to_string(),
                existing: existing.kind.to_string(),
                proposed: kind.to_string(),
            }
            .into()),
            None => {
                tracing::debug!("Registered parameter {} as {}", name, kind);
                self.parameters
                    .insert(name.to_string(), ParameterSpec::new(name, kind));
                Ok(true)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }
}
