//! Solution invocation and objective extraction.

use at_types::{internal_error, AtError, AtResult, ProcessError};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::protocol::reap;

/// Wall-clock limit for one solution run.
pub const DEFAULT_SOLUTION_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub executable: PathBuf,
    pub timeout_ms: u64,
}

impl EvaluatorConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout_ms: DEFAULT_SOLUTION_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// What one solution run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Solution stdout, kept as the answer file if the trial wins.
    pub answer: String,
    /// Objective vector from the last non-empty stderr line.
    pub outputs: Vec<f64>,
}

/// Extract the objective vector from the solution's diagnostic stream.
pub fn parse_objective(diagnostics: &str) -> AtResult<Vec<f64>> {
    let line = diagnostics
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ProcessError::SolutionFailure {
            message: "no objective line on stderr".to_string(),
        })?;

    line.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                AtError::from(ProcessError::SolutionFailure {
                    message: format!("objective value '{token}' is not a number (line: {line:?})"),
                })
            })
        })
        .collect()
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn join_output(handle: JoinHandle<std::io::Result<String>>) -> AtResult<String> {
    handle
        .await
        .map_err(|e| internal_error!("output reader task failed: {e}"))?
        .map_err(Into::into)
}

/// Runs the solution against generated inputs.
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub async fn evaluate(&self, artifact: &str) -> AtResult<Evaluation> {
        let mut child = Command::new(&self.config.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.config.executable.display().to_string(),
                source,
            })?;

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            reap(&mut child).await;
            return Err(internal_error!("solution pipes were not captured"));
        };

        let input = artifact.to_owned();
        let writer = tokio::spawn(async move {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await
        });
        let answer = tokio::spawn(drain(stdout));
        let diagnostics = tokio::spawn(drain(stderr));

        let limit = Duration::from_millis(self.config.timeout_ms);
        let waited = tokio::time::timeout(limit, child.wait()).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                reap(&mut child).await;
                writer.abort();
                answer.abort();
                diagnostics.abort();
                return Err(ProcessError::SolutionTimeout {
                    timeout_ms: self.config.timeout_ms,
                }
                .into());
            }
        };

        match writer.await {
            Ok(Ok(())) => {}
            // The solution may exit without consuming all of its input.
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("Solution closed stdin early");
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => return Err(internal_error!("input writer task failed: {e}")),
        }
        let answer = join_output(answer).await?;
        let diagnostics = join_output(diagnostics).await?;

        if !status.success() {
            return Err(ProcessError::SolutionFailure {
                message: format!("non-zero exit code: {:?}", status.code()),
            }
            .into());
        }

        let outputs = parse_objective(&diagnostics)?;
        Ok(Evaluation { answer, outputs })
    }
}
