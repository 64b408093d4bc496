//! Trial history and per-task search status.

use at_types::{FeedDict, ParamValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed trial: the assignment that was run and the loss it scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: Uuid,
    /// Position in the run-wide history.
    pub trial_number: usize,
    pub feed: FeedDict,
    pub loss: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only record of every trial in the run, across all tasks.
///
/// Records may have different key sets: a parameter discovered late is simply
/// absent from earlier records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialHistory {
    records: Vec<TrialRecord>,
}

impl TrialHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, feed: FeedDict, loss: f64) -> &TrialRecord {
        let record = TrialRecord {
            id: Uuid::new_v4(),
            trial_number: self.records.len(),
            feed,
            loss,
            recorded_at: Utc::now(),
        };
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    /// `(value, loss)` pairs for every trial that observed `name`.
    pub fn observations<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (&'a ParamValue, f64)> + 'a {
        self.records
            .iter()
            .filter_map(move |r| r.feed.get(name).map(|v| (v, r.loss)))
    }
}

/// Best trial found so far for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Generator output (the test input).
    pub artifact: String,
    /// Solution stdout (the expected answer).
    pub answer: String,
    pub loss: f64,
    pub feed: FeedDict,
    pub outputs: Vec<f64>,
    pub trial_number: usize,
}

/// Lifecycle state for one task's search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of one task's search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub task_id: String,
    pub targets: Vec<f64>,
    pub state: TaskState,
    pub trials_completed: usize,
    pub best: Option<Candidate>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SearchStatus {
    pub fn new(task_id: impl Into<String>, targets: Vec<f64>) -> Self {
        Self {
            task_id: task_id.into(),
            targets,
            state: TaskState::Pending,
            trials_completed: 0,
            best: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = TaskState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = TaskState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Count a finished trial and keep `candidate` if it strictly improves
    /// on the current best. Returns whether it was kept.
    pub fn record_trial(&mut self, candidate: Candidate) -> bool {
        self.trials_completed += 1;
        let improves = match &self.best {
            None => true,
            Some(current) => candidate.loss < current.loss,
        };
        if improves {
            self.best = Some(candidate);
        }
        improves
    }

    /// Wall-clock duration, once the search has finished.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(loss: f64, artifact: &str, trial_number: usize) -> Candidate {
        Candidate {
            artifact: artifact.to_string(),
            answer: String::new(),
            loss,
            feed: FeedDict::new(),
            outputs: vec![],
            trial_number,
        }
    }

    #[test]
    fn search_status_lifecycle() {
        let mut status = SearchStatus::new("case1", vec![5.0]);
        assert_eq!(status.state, TaskState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, TaskState::Running);
        assert!(status.started_at.is_some());

        status.mark_completed();
        assert_eq!(status.state, TaskState::Completed);
        assert!(status.finished_at.is_some());
        assert!(status.elapsed_seconds().is_some());
    }

    #[test]
    fn best_candidate_requires_strict_improvement() {
        let mut status = SearchStatus::new("case1", vec![5.0]);

        assert!(status.record_trial(candidate(2.0, "first", 0)));
        assert!(status.record_trial(candidate(1.0, "second", 1)));
        // Tie keeps the earlier candidate
        assert!(!status.record_trial(candidate(1.0, "third", 2)));
        // Worse result should not replace
        assert!(!status.record_trial(candidate(3.0, "fourth", 3)));

        let best = status.best.as_ref().unwrap();
        assert_eq!(best.artifact, "second");
        assert_eq!(best.trial_number, 1);
        assert_eq!(status.trials_completed, 4);
    }

    #[test]
    fn search_status_failure() {
        let mut status = SearchStatus::new("case2", vec![]);
        status.mark_running();
        status.mark_failed("solution timed out".into());
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.error.as_deref(), Some("solution timed out"));
    }

    #[test]
    fn history_observations_skip_missing_names() {
        let mut history = TrialHistory::new();

        let mut early = FeedDict::new();
        early.insert("n".into(), ParamValue::Int(3));
        history.push(early, 2.0);

        let mut late = FeedDict::new();
        late.insert("n".into(), ParamValue::Int(5));
        late.insert("tree/loga".into(), ParamValue::Float(0.25));
        history.push(late, 0.5);

        let n: Vec<_> = history.observations("n").collect();
        assert_eq!(n.len(), 2);

        let loga: Vec<_> = history.observations("tree/loga").collect();
        assert_eq!(loga, vec![(&ParamValue::Float(0.25), 0.5)]);

        assert_eq!(history.records()[1].trial_number, 1);
    }
}
