use serde::{Deserialize, Serialize};

use crate::params::FeedDict;

/// One row of the task table: a named search target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    /// Parameters pinned for this task; excluded from search.
    pub fixed: FeedDict,
    /// Goal objective vector, compared elementwise with the solution's output.
    pub targets: Vec<f64>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, targets: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            fixed: FeedDict::new(),
            targets,
        }
    }

    pub fn with_fixed(mut self, fixed: FeedDict) -> Self {
        self.fixed = fixed;
        self
    }
}
