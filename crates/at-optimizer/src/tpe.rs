//! Density-ratio sampling over a growing, ragged parameter space.
//!
//! Each free parameter is proposed independently. Its observations across the
//! history are split by loss into a "good" quantile and the "bad" remainder;
//! candidates are drawn from the good density and the one maximising
//! `good(x) / bad(x)` wins. Parameters with too few observations (including
//! ones discovered this run) are sampled uniformly.

use at_types::{AtResult, FeedDict, ParamValue, ParameterKind};
use rand::rngs::StdRng;
use rand::Rng;
use std::f64::consts::PI;

use crate::sampler::{Sampler, SamplerConfig, SearchContext};
use crate::space::{round_float, synthesize};

/// Weight of the uniform component mixed into every density estimate.
const PRIOR_WEIGHT: f64 = 1.0;

/// One-dimensional Parzen estimator on `[low, high]`: Gaussian kernels at the
/// observations plus a uniform prior.
#[derive(Debug, Clone)]
struct ParzenEstimator {
    centers: Vec<f64>,
    bandwidth: f64,
    low: f64,
    high: f64,
}

impl ParzenEstimator {
    fn new(centers: Vec<f64>, low: f64, high: f64, min_bandwidth: f64) -> Self {
        let range = high - low;
        let n = centers.len().max(1) as f64;
        let bandwidth = (range * 0.5 * n.powf(-0.2))
            .max(min_bandwidth)
            .max(f64::EPSILON);
        Self {
            centers,
            bandwidth,
            low,
            high,
        }
    }

    fn pdf(&self, x: f64) -> f64 {
        let range = self.high - self.low;
        let prior = if range > 0.0 { 1.0 / range } else { 1.0 };
        let norm = 1.0 / (self.bandwidth * (2.0 * PI).sqrt());
        let kernels: f64 = self
            .centers
            .iter()
            .map(|c| {
                let z = (x - c) / self.bandwidth;
                norm * (-0.5 * z * z).exp()
            })
            .sum();
        (PRIOR_WEIGHT * prior + kernels) / (PRIOR_WEIGHT + self.centers.len() as f64)
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        let total = PRIOR_WEIGHT + self.centers.len() as f64;
        let u = rng.random::<f64>() * total;
        if u < PRIOR_WEIGHT || self.centers.is_empty() {
            return rng.random_range(self.low..=self.high);
        }
        let idx = ((u - PRIOR_WEIGHT) as usize).min(self.centers.len() - 1);
        (self.centers[idx] + self.bandwidth * standard_normal(rng)).clamp(self.low, self.high)
    }
}

/// Box-Muller transform.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Split observations into (good, bad) by ascending loss. Requires `len >= 2`.
fn split_by_loss<T>(mut observations: Vec<(T, f64)>, gamma: f64) -> (Vec<T>, Vec<T>) {
    // Stable sort: among equal losses the earlier trial counts as better.
    observations.sort_by(|a, b| a.1.total_cmp(&b.1));
    let n = observations.len();
    let n_good = ((gamma * n as f64).ceil() as usize).clamp(1, n - 1);
    let mut good = Vec::with_capacity(n_good);
    let mut bad = Vec::with_capacity(n - n_good);
    for (i, (value, _)) in observations.into_iter().enumerate() {
        if i < n_good {
            good.push(value);
        } else {
            bad.push(value);
        }
    }
    (good, bad)
}

/// Good-vs-bad density-ratio sampler (a tree-structured Parzen estimator
/// without the tree: parameters are treated independently).
#[derive(Debug, Clone)]
pub struct DensityRatioSampler {
    context: SearchContext,
    rng: StdRng,
    gamma: f64,
    n_startup: usize,
    n_candidates: usize,
}

impl DensityRatioSampler {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            context: SearchContext::new(),
            rng: config.rng(),
            gamma: config.gamma,
            n_startup: config.n_startup.max(2),
            n_candidates: config.n_candidates.max(1),
        }
    }

    fn propose_numeric(
        &mut self,
        observations: Vec<(f64, f64)>,
        low: f64,
        high: f64,
        integer: bool,
    ) -> f64 {
        let (good, bad) = split_by_loss(observations, self.gamma);
        let min_bandwidth = if integer { 0.5 } else { (high - low) / 100.0 };
        let l = ParzenEstimator::new(good, low, high, min_bandwidth);
        let g = ParzenEstimator::new(bad, low, high, min_bandwidth);

        let mut best = (f64::NEG_INFINITY, low);
        for _ in 0..self.n_candidates {
            let mut x = l.sample(&mut self.rng);
            if integer {
                x = x.round().clamp(low, high);
            }
            let score = l.pdf(x).ln() - g.pdf(x).ln();
            if score > best.0 {
                best = (score, x);
            }
        }
        best.1
    }

    fn propose_choice(&mut self, observations: Vec<(usize, f64)>, k: usize) -> usize {
        let (good, bad) = split_by_loss(observations, self.gamma);
        let smoothed = |picks: &[usize]| {
            let mut counts = vec![1.0; k];
            for &i in picks {
                counts[i] += 1.0;
            }
            let total: f64 = counts.iter().sum();
            counts.into_iter().map(|c| c / total).collect::<Vec<f64>>()
        };
        let l = smoothed(&good);
        let g = smoothed(&bad);

        let mut best = (f64::NEG_INFINITY, 0);
        for _ in 0..self.n_candidates {
            let mut u = self.rng.random::<f64>();
            let mut idx = k - 1;
            for (i, p) in l.iter().enumerate() {
                if u < *p {
                    idx = i;
                    break;
                }
                u -= p;
            }
            let score = l[idx] / g[idx];
            if score > best.0 {
                best = (score, idx);
            }
        }
        best.1
    }

    fn propose_value(&mut self, name: &str, kind: &ParameterKind) -> ParamValue {
        let history = &self.context.history;
        match kind {
            ParameterKind::Float { min, max } => {
                let observations: Vec<(f64, f64)> = history
                    .observations(name)
                    .filter(|(v, _)| kind.contains(v))
                    .filter_map(|(v, loss)| v.as_f64().map(|x| (x, loss)))
                    .collect();
                if observations.len() < self.n_startup || min == max {
                    return synthesize(kind, &mut self.rng);
                }
                let x = self.propose_numeric(observations, *min, *max, false);
                ParamValue::Float(round_float(x).clamp(*min, *max))
            }
            ParameterKind::Integer { min, max } => {
                let observations: Vec<(f64, f64)> = history
                    .observations(name)
                    .filter(|(v, _)| kind.contains(v))
                    .filter_map(|(v, loss)| v.as_i64().map(|x| (x as f64, loss)))
                    .collect();
                if observations.len() < self.n_startup || min == max {
                    return synthesize(kind, &mut self.rng);
                }
                let x = self.propose_numeric(observations, *min as f64, *max as f64, true);
                ParamValue::Int((x as i64).clamp(*min, *max))
            }
            ParameterKind::Choice { values } => {
                let observations: Vec<(usize, f64)> = history
                    .observations(name)
                    .filter_map(|(v, loss)| {
                        let text = v.to_string();
                        values.iter().position(|c| *c == text).map(|i| (i, loss))
                    })
                    .collect();
                if observations.len() < self.n_startup {
                    return synthesize(kind, &mut self.rng);
                }
                let idx = self.propose_choice(observations, values.len());
                ParamValue::Text(values[idx].clone())
            }
        }
    }
}

impl Sampler for DensityRatioSampler {
    fn context(&self) -> &SearchContext {
        &self.context
    }

    fn register(&mut self, name: &str, kind: ParameterKind) -> AtResult<bool> {
        self.context.registry.register(name, kind)
    }

    fn propose(&mut self, pinned: &FeedDict) -> AtResult<FeedDict> {
        let free = self.context.free_parameters(pinned);
        if free.is_empty() {
            return Ok(pinned.clone());
        }

        let mut feed = pinned.clone();
        for spec in free {
            let value = self.propose_value(&spec.name, &spec.kind);
            tracing::trace!("Proposed {} = {}", spec.name, value);
            feed.insert(spec.name, value);
        }
        Ok(feed)
    }

    fn observe(&mut self, feed: &FeedDict, loss: f64) {
        debug_assert!(loss.is_finite() && loss >= 0.0, "invalid loss {loss}");
        self.context.history.push(feed.clone(), loss);
    }

    fn resolve(&mut self, name: &str, kind: &ParameterKind) -> AtResult<ParamValue> {
        self.register(name, kind.clone())?;
        // Nothing can have been observed for a name registered this trial,
        // but a re-declared name may already have history.
        Ok(self.propose_value(name, kind))
    }

    fn name(&self) -> &str {
        "tpe"
    }
}
