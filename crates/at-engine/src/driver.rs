//! The goal-directed search loop.
//!
//! For each task, in order, run `n_iterations` trials:
//! propose → generate → evaluate → loss → observe → keep the best. The
//! sampler (registry and history) is shared by every task of the run, so
//! what one task learns seeds the next.

use at_optimizer::{Candidate, LossFunction, Sampler, SearchStatus};
use at_types::{AtResult, SearchError, TaskSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::evaluator::{Evaluator, EvaluatorConfig};
use crate::output::ArtifactSink;
use crate::protocol::{Generator, GeneratorConfig, Resolver};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Trials per task.
    pub n_iterations: usize,
    pub loss: LossFunction,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_iterations: 50,
            loss: LossFunction::default(),
        }
    }
}

impl SearchConfig {
    pub fn with_iterations(mut self, n: usize) -> Self {
        self.n_iterations = n;
        self
    }

    pub fn with_loss(mut self, loss: LossFunction) -> Self {
        self.loss = loss;
        self
    }
}

pub struct SearchDriver {
    generator: Generator,
    evaluator: Evaluator,
    config: SearchConfig,
}

impl SearchDriver {
    pub fn new(
        generator: GeneratorConfig,
        evaluator: EvaluatorConfig,
        config: SearchConfig,
    ) -> Self {
        Self {
            generator: Generator::new(generator),
            evaluator: Evaluator::new(evaluator),
            config,
        }
    }

    /// Search every task in order, persisting each task's best candidate
    /// before the next one starts. The first error aborts the run.
    pub async fn run(
        &self,
        tasks: &[TaskSpec],
        sampler: &mut dyn Sampler,
        sink: &mut dyn ArtifactSink,
    ) -> AtResult<Vec<SearchStatus>> {
        let mut statuses = Vec::with_capacity(tasks.len());
        self.run_into(tasks, sampler, sink, &mut statuses).await?;
        Ok(statuses)
    }

    /// Like [`SearchDriver::run`], but every task that was started leaves its
    /// status in `statuses`, including the failed one that aborted the run.
    pub async fn run_into(
        &self,
        tasks: &[TaskSpec],
        sampler: &mut dyn Sampler,
        sink: &mut dyn ArtifactSink,
        statuses: &mut Vec<SearchStatus>,
    ) -> AtResult<()> {
        for task in tasks {
            let mut status = SearchStatus::new(&task.id, task.targets.clone());
            let outcome = match self.search(task, sampler, &mut status).await {
                Ok(()) => match &status.best {
                    Some(best) => sink.persist(task, best),
                    None => Ok(()),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                status.mark_failed(e.to_string());
            }
            statuses.push(status);
            outcome?;
        }
        Ok(())
    }

    /// Run the trials for one task and return its final status.
    pub async fn search_task(
        &self,
        task: &TaskSpec,
        sampler: &mut dyn Sampler,
    ) -> AtResult<SearchStatus> {
        let mut status = SearchStatus::new(&task.id, task.targets.clone());
        self.search(task, sampler, &mut status).await?;
        Ok(status)
    }

    async fn search(
        &self,
        task: &TaskSpec,
        sampler: &mut dyn Sampler,
        status: &mut SearchStatus,
    ) -> AtResult<()> {
        status.mark_running();
        info!("Generating test '{}' (targets: {:?})", task.id, task.targets);

        for iteration in 0..self.config.n_iterations {
            match self.run_trial(task, sampler).await {
                Ok(candidate) => {
                    let loss = candidate.loss;
                    if status.record_trial(candidate) {
                        info!(
                            "Task '{}' iteration {}: loss improved to {:.3}",
                            task.id, iteration, loss
                        );
                    } else {
                        debug!("Task '{}' iteration {}: loss {:.3}", task.id, iteration, loss);
                    }
                }
                Err(e) => {
                    let kind = if e.is_trial_local() {
                        "trial failure"
                    } else {
                        "fatal error"
                    };
                    error!(
                        "Task '{}' aborted at iteration {} on {}: {}",
                        task.id, iteration, kind, e
                    );
                    return Err(e);
                }
            }
        }

        let Some(best) = &status.best else {
            return Err(SearchError::NoSolutionFound {
                task_id: task.id.clone(),
            }
            .into());
        };
        info!(
            "Task '{}': outputs {:?}, loss {:.3} after {} trials",
            task.id, best.outputs, best.loss, status.trials_completed
        );
        debug!("Task '{}' best feed: {:?}", task.id, best.feed);

        status.mark_completed();
        Ok(())
    }

    async fn run_trial(&self, task: &TaskSpec, sampler: &mut dyn Sampler) -> AtResult<Candidate> {
        let mut feed = sampler.propose(&task.fixed)?;
        let artifact = {
            let mut resolver = Resolver::Sampler(&mut *sampler);
            self.generator.run(&mut feed, &mut resolver).await?
        };
        let evaluation = self.evaluator.evaluate(&artifact).await?;
        let loss = self
            .config
            .loss
            .compute(&evaluation.outputs, &task.targets, &feed, &task.fixed)?;

        sampler.observe(&feed, loss);
        let trial_number = sampler.context().history.len() - 1;

        Ok(Candidate {
            artifact,
            answer: evaluation.answer,
            loss,
            feed,
            outputs: evaluation.outputs,
            trial_number,
        })
    }
}
