//! Persistence of selected test cases and the run report.

use at_optimizer::{Candidate, SearchStatus, TaskState};
use at_types::{AtResult, FeedDict, TaskSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives the best candidate of each task as soon as its search finishes.
pub trait ArtifactSink {
    fn persist(&mut self, task: &TaskSpec, best: &Candidate) -> AtResult<()>;
}

/// Writes `<dir>/<in_pattern>` and `<dir>/<ans_pattern>` per task, with
/// `{name}` replaced by the task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSink {
    pub output_dir: PathBuf,
    pub in_pattern: String,
    pub ans_pattern: String,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            in_pattern: "{name}.in".to_string(),
            ans_pattern: "{name}.ok".to_string(),
        }
    }

    pub fn with_patterns(mut self, in_pattern: &str, ans_pattern: &str) -> Self {
        self.in_pattern = in_pattern.to_string();
        self.ans_pattern = ans_pattern.to_string();
        self
    }

    pub fn input_path(&self, task_id: &str) -> PathBuf {
        self.output_dir.join(self.in_pattern.replace("{name}", task_id))
    }

    pub fn answer_path(&self, task_id: &str) -> PathBuf {
        self.output_dir.join(self.ans_pattern.replace("{name}", task_id))
    }
}

impl ArtifactSink for FileSink {
    fn persist(&mut self, task: &TaskSpec, best: &Candidate) -> AtResult<()> {
        fs::create_dir_all(&self.output_dir)?;

        let input_path = self.input_path(&task.id);
        fs::write(&input_path, &best.artifact)?;
        info!("Input file written to {}", input_path.display());

        let answer_path = self.answer_path(&task.id);
        fs::write(&answer_path, &best.answer)?;
        info!("Answer file written to {}", answer_path.display());
        Ok(())
    }
}

/// Summary of one task's search, without the artifact bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub state: TaskState,
    /// Why the task failed, if it did.
    pub error: Option<String>,
    pub targets: Vec<f64>,
    pub outputs: Vec<f64>,
    pub loss: Option<f64>,
    pub feed: FeedDict,
    pub best_trial: Option<usize>,
    pub trials: usize,
    pub elapsed_seconds: Option<f64>,
}

impl From<&SearchStatus> for TaskReport {
    fn from(status: &SearchStatus) -> Self {
        let best = status.best.as_ref();
        Self {
            task_id: status.task_id.clone(),
            state: status.state,
            error: status.error.clone(),
            targets: status.targets.clone(),
            outputs: best.map(|b| b.outputs.clone()).unwrap_or_default(),
            loss: best.map(|b| b.loss),
            feed: best.map(|b| b.feed.clone()).unwrap_or_default(),
            best_trial: best.map(|b| b.trial_number),
            trials: status.trials_completed,
            elapsed_seconds: status.elapsed_seconds(),
        }
    }
}

/// Write a JSON report for `statuses` to `path`.
pub fn write_report(path: &Path, statuses: &[SearchStatus]) -> AtResult<()> {
    let reports: Vec<TaskReport> = statuses.iter().map(TaskReport::from).collect();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&reports)?)?;
    info!("Run report written to {}", path.display());
    Ok(())
}
