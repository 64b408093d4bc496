//! Distance between produced and target objective vectors, plus a small
//! regularization on sampled float parameters.

use at_types::{AtResult, FeedDict, ParamValue, SearchError};
use serde::{Deserialize, Serialize};

/// Elementwise difference aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Sum of absolute differences.
    Absolute,
    /// Sum of squared differences.
    Squared,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        Self::Absolute
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "absolute" | "l1" => Ok(Self::Absolute),
            "squared" | "l2" => Ok(Self::Squared),
            other => Err(format!("unknown distance metric '{other}'")),
        }
    }
}

/// Default weight of the L2 penalty on sampled float parameters.
pub const DEFAULT_REGULARIZATION: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossFunction {
    pub metric: DistanceMetric,
    pub regularization: f64,
}

impl Default for LossFunction {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Absolute,
            regularization: DEFAULT_REGULARIZATION,
        }
    }
}

impl LossFunction {
    pub fn new(metric: DistanceMetric, regularization: f64) -> Self {
        Self {
            metric,
            regularization,
        }
    }

    pub fn distance(&self, outputs: &[f64], targets: &[f64]) -> AtResult<f64> {
        if outputs.len() != targets.len() {
            return Err(SearchError::ContractMismatch {
                expected: targets.len(),
                actual: outputs.len(),
            }
            .into());
        }
        Ok(outputs
            .iter()
            .zip(targets)
            .map(|(o, t)| match self.metric {
                DistanceMetric::Absolute => (o - t).abs(),
                DistanceMetric::Squared => (o - t) * (o - t),
            })
            .sum())
    }

    /// Penalty over float parameters of `feed` that are not pinned.
    pub fn regularization_term(&self, feed: &FeedDict, pinned: &FeedDict) -> f64 {
        feed.iter()
            .filter(|(name, _)| !pinned.contains_key(*name))
            .filter_map(|(_, value)| match value {
                ParamValue::Float(v) => Some(self.regularization * v * v),
                _ => None,
            })
            .sum()
    }

    /// Total loss of one trial. Always finite and non-negative on success.
    pub fn compute(
        &self,
        outputs: &[f64],
        targets: &[f64],
        feed: &FeedDict,
        pinned: &FeedDict,
    ) -> AtResult<f64> {
        let loss = self.distance(outputs, targets)? + self.regularization_term(feed, pinned);
        if !loss.is_finite() || loss < 0.0 {
            return Err(SearchError::InvalidObjective {
                message: format!("loss {loss} from outputs {outputs:?}"),
            }
            .into());
        }
        Ok(loss)
    }
}
