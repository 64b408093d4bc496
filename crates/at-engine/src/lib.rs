//! # at-engine
//!
//! Drives the generator and solution processes and runs the goal-directed
//! search over the parameters the generator declares.

pub mod driver;
pub mod evaluator;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod tasks;
pub mod toolchain;

pub use driver::{SearchConfig, SearchDriver};
pub use evaluator::{
    parse_objective, Evaluation, Evaluator, EvaluatorConfig, DEFAULT_SOLUTION_TIMEOUT_MS,
};
pub use output::{write_report, ArtifactSink, FileSink, TaskReport};
pub use protocol::{
    parse_request, Generator, GeneratorConfig, ParamRequest, Resolver, INTERACTIVE_FLAG,
    PARAM_REQUEST_SENTINEL,
};
pub use tasks::{load_tasks, parse_task_table};
pub use toolchain::Toolchain;
