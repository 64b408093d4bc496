//! # at-optimizer
//!
//! Parameter-space model and surrogate search for autotest.
//!
//! Provides the parameter spec grammar, the append-only parameter registry,
//! feasible-value synthesis, the run-wide trial history, the [`Sampler`]
//! capability with density-ratio and random strategies, and loss computation.

mod grammar;
mod loss;
mod sampler;
mod space;
mod tpe;
mod trial;

pub use grammar::{parse_json_spec, parse_sexpr_spec, parse_spec};
pub use loss::{DistanceMetric, LossFunction, DEFAULT_REGULARIZATION};
pub use sampler::{build_sampler, RandomSampler, Sampler, SamplerConfig, SearchContext};
pub use space::{round_float, synthesize, ParameterRegistry, FLOAT_DECIMALS};
pub use tpe::DensityRatioSampler;
pub use trial::{Candidate, SearchStatus, TaskState, TrialHistory, TrialRecord};
