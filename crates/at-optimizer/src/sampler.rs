//! Sampler capability and the search context it owns.

use at_types::{config_error, AtResult, FeedDict, ParamValue, ParameterKind, ParameterSpec};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::space::{synthesize, ParameterRegistry};
use crate::tpe::DensityRatioSampler;
use crate::trial::TrialHistory;

/// Registry and history for one run. Created at run start, shared by every
/// task, dropped at run end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchContext {
    pub registry: ParameterRegistry,
    pub history: TrialHistory,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered parameters not pinned by `pinned`.
    pub fn free_parameters(&self, pinned: &FeedDict) -> Vec<ParameterSpec> {
        self.registry
            .iter()
            .filter(|spec| !pinned.contains_key(&spec.name))
            .cloned()
            .collect()
    }
}

/// Proposes parameter assignments and learns from their losses.
pub trait Sampler: Send {
    /// Read access to the registry and history.
    fn context(&self) -> &SearchContext;

    /// Add a parameter to the registry. Returns `true` if it was new.
    fn register(&mut self, name: &str, kind: ParameterKind) -> AtResult<bool>;

    /// Full assignment for the next trial: `pinned` plus one value for every
    /// other registered parameter.
    fn propose(&mut self, pinned: &FeedDict) -> AtResult<FeedDict>;

    /// Record a completed trial.
    fn observe(&mut self, feed: &FeedDict, loss: f64);

    /// Value for a parameter the generator declared mid-trial.
    fn resolve(&mut self, name: &str, kind: &ParameterKind) -> AtResult<ParamValue>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Which sampler to build and how to tune it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// "tpe" (density ratio) or "random".
    pub strategy: String,
    /// Fraction of lowest-loss observations treated as "good".
    pub gamma: f64,
    /// Observations required before a parameter leaves uniform sampling.
    pub n_startup: usize,
    /// Draws from the good density scored per proposal.
    pub n_candidates: usize,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            strategy: "tpe".to_string(),
            gamma: 0.25,
            n_startup: 10,
            n_candidates: 24,
            seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_n_startup(mut self, n: usize) -> Self {
        self.n_startup = n;
        self
    }

    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n;
        self
    }

    pub(crate) fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

/// Build the sampler named by `config.strategy`.
pub fn build_sampler(config: &SamplerConfig) -> AtResult<Box<dyn Sampler>> {
    match config.strategy.as_str() {
        "tpe" => {
            if !(config.gamma > 0.0 && config.gamma < 1.0) {
                return Err(config_error!("gamma must lie in (0, 1), got {}", config.gamma));
            }
            if config.n_candidates == 0 {
                return Err(config_error!("n_candidates must be positive"));
            }
            Ok(Box::new(DensityRatioSampler::new(config)))
        }
        "random" => Ok(Box::new(RandomSampler::new(config))),
        other => Err(config_error!("unknown sampler strategy '{other}'")),
    }
}

// ---- Random sampling ----

/// Uniform sampling of every free parameter, ignoring history.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    context: SearchContext,
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            context: SearchContext::new(),
            rng: config.rng(),
        }
    }
}

impl Sampler for RandomSampler {
    fn context(&self) -> &SearchContext {
        &self.context
    }

    fn register(&mut self, name: &str, kind: ParameterKind) -> AtResult<bool> {
        self.context.registry.register(name, kind)
    }

    fn propose(&mut self, pinned: &FeedDict) -> AtResult<FeedDict> {
        let mut feed = pinned.clone();
        for spec in self.context.free_parameters(pinned) {
            feed.insert(spec.name, synthesize(&spec.kind, &mut self.rng));
        }
        Ok(feed)
    }

    fn observe(&mut self, feed: &FeedDict, loss: f64) {
        self.context.history.push(feed.clone(), loss);
    }

    fn resolve(&mut self, name: &str, kind: &ParameterKind) -> AtResult<ParamValue> {
        self.register(name, kind.clone())?;
        Ok(synthesize(kind, &mut self.rng))
    }

    fn name(&self) -> &str {
        "random"
    }
}
