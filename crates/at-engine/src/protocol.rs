//! Generator session driver.
//!
//! The generator is started with `--interactive` and every known binding as
//! `-P<name> <value>`. Whenever it needs a parameter it does not have, it
//! prints
//!
//! ```text
//! TU_PARAM_REQ <name> <payload>
//! ```
//!
//! and blocks reading one line from stdin. Every other stdout line is part of
//! the generated test input. Exactly one value is written per request, and
//! only after the request has been read.

use at_optimizer::{parse_spec, synthesize, ParameterRegistry, Sampler};
use at_types::{
    internal_error, AtError, AtResult, FeedDict, ParamValue, ParameterKind, ProcessError,
    ProtocolError,
};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Prefix of a parameter request line.
pub const PARAM_REQUEST_SENTINEL: &str = "TU_PARAM_REQ";

/// Flag telling the generator to ask for missing parameters instead of failing.
pub const INTERACTIVE_FLAG: &str = "--interactive";

/// How long a generator that closed its stdin gets to exit on its own.
const EXIT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub executable: PathBuf,
    pub sentinel: String,
    pub interactive_flag: String,
}

impl GeneratorConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            sentinel: PARAM_REQUEST_SENTINEL.to_string(),
            interactive_flag: INTERACTIVE_FLAG.to_string(),
        }
    }

    pub fn with_sentinel(mut self, sentinel: &str) -> Self {
        self.sentinel = sentinel.to_string();
        self
    }
}

/// A decoded request line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRequest {
    pub name: String,
    pub payload: String,
}

/// Decode `line` as a parameter request.
///
/// Returns `None` for ordinary output lines.
pub fn parse_request(line: &str, sentinel: &str) -> Option<AtResult<ParamRequest>> {
    let rest = line.strip_prefix(sentinel)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let malformed = || -> AtResult<ParamRequest> {
        Err(ProtocolError::MalformedRequest {
            line: line.to_string(),
        }
        .into())
    };
    let Some((name, payload)) = rest.trim().split_once(char::is_whitespace) else {
        return Some(malformed());
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Some(malformed());
    }
    Some(Ok(ParamRequest {
        name: name.to_string(),
        payload: payload.to_string(),
    }))
}

/// Where values for newly requested parameters come from.
pub enum Resolver<'a> {
    /// Sampler-driven trial: the sampler registers and proposes.
    Sampler(&'a mut dyn Sampler),
    /// Discovery: plain synthesis into a standalone registry.
    Synthesizer {
        registry: &'a mut ParameterRegistry,
        rng: &'a mut StdRng,
    },
}

impl Resolver<'_> {
    fn register(&mut self, name: &str, kind: ParameterKind) -> AtResult<bool> {
        match self {
            Resolver::Sampler(sampler) => sampler.register(name, kind),
            Resolver::Synthesizer { registry, .. } => registry.register(name, kind),
        }
    }

    fn resolve(&mut self, name: &str, kind: &ParameterKind) -> AtResult<ParamValue> {
        match self {
            Resolver::Sampler(sampler) => sampler.resolve(name, kind),
            Resolver::Synthesizer { registry, rng } => {
                registry.register(name, kind.clone())?;
                Ok(synthesize(kind, &mut **rng))
            }
        }
    }
}

/// Runs generator sessions.
#[derive(Debug, Clone)]
pub struct Generator {
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Run one session with `feed` as bindings and return the generated text.
    ///
    /// Parameters requested during the session are resolved through
    /// `resolver` and added to `feed`.
    pub async fn run(&self, feed: &mut FeedDict, resolver: &mut Resolver<'_>) -> AtResult<String> {
        let mut command = Command::new(&self.config.executable);
        command.arg(&self.config.interactive_flag);
        for (name, value) in feed.iter() {
            command.arg(format!("-P{name}")).arg(value.to_string());
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.config.executable.display().to_string(),
            source,
        })?;

        let streams = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
            _ => Err(internal_error!("generator pipes were not captured")),
        };
        let session = match streams {
            Ok((stdin, stdout)) => self.converse(stdin, stdout, feed, resolver).await,
            Err(e) => Err(e),
        };

        match session {
            Ok(artifact) => {
                let status = child.wait().await?;
                if !status.success() {
                    return Err(ProcessError::GeneratorFailure { code: status.code() }.into());
                }
                Ok(artifact)
            }
            Err(e) if is_broken_pipe(&e) => {
                // The generator stopped reading; its exit status says why.
                let waited = tokio::time::timeout(EXIT_GRACE, child.wait()).await;
                match waited {
                    Ok(Ok(status)) if !status.success() => {
                        Err(ProcessError::GeneratorFailure { code: status.code() }.into())
                    }
                    Ok(Ok(_)) => Err(e),
                    _ => {
                        reap(&mut child).await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                reap(&mut child).await;
                Err(e)
            }
        }
    }

    /// Run one session with no bindings, answering every request with a
    /// synthesized value, and return what the generator declared.
    pub async fn discover(&self, rng: &mut StdRng) -> AtResult<(ParameterRegistry, FeedDict)> {
        let mut registry = ParameterRegistry::new();
        let mut feed = FeedDict::new();
        let mut resolver = Resolver::Synthesizer {
            registry: &mut registry,
            rng,
        };
        self.run(&mut feed, &mut resolver).await?;
        Ok((registry, feed))
    }

    async fn converse(
        &self,
        mut stdin: ChildStdin,
        stdout: ChildStdout,
        feed: &mut FeedDict,
        resolver: &mut Resolver<'_>,
    ) -> AtResult<String> {
        let mut lines = BufReader::new(stdout).lines();
        let mut artifact = String::new();

        while let Some(line) = lines.next_line().await? {
            match parse_request(&line, &self.config.sentinel) {
                Some(request) => {
                    let request = request?;
                    let value = Self::answer(&request, feed, resolver)?;
                    debug!("Parameter request {} -> {}", request.name, value);
                    stdin.write_all(format!("{value}\n").as_bytes()).await?;
                    stdin.flush().await?;
                }
                None => {
                    artifact.push_str(&line);
                    artifact.push('\n');
                }
            }
        }

        Ok(artifact)
    }

    fn answer(
        request: &ParamRequest,
        feed: &mut FeedDict,
        resolver: &mut Resolver<'_>,
    ) -> AtResult<ParamValue> {
        let kind = parse_spec(&request.payload)?;
        if let Some(bound) = feed.get(&request.name) {
            warn!(
                "Generator requested '{}' although it was bound to {}",
                request.name, bound
            );
            resolver.register(&request.name, kind)?;
            return Ok(bound.clone());
        }
        let value = resolver.resolve(&request.name, &kind)?;
        feed.insert(request.name.clone(), value.clone());
        Ok(value)
    }
}

fn is_broken_pipe(e: &AtError) -> bool {
    matches!(e, AtError::Io(io) if io.kind() == ErrorKind::BrokenPipe)
}

/// Kill and wait on a child so it never outlives a failed session.
pub(crate) async fn reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to reap child process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_lines() {
        let request =
            parse_request("TU_PARAM_REQ n (type int min 1 max 10)", PARAM_REQUEST_SENTINEL)
                .unwrap()
                .unwrap();
        assert_eq!(request.name, "n");
        assert_eq!(request.payload, "(type int min 1 max 10)");

        let request = parse_request(
            "TU_PARAM_REQ tree/loga   ((type float) (min -15) (max 15))  ",
            PARAM_REQUEST_SENTINEL,
        )
        .unwrap()
        .unwrap();
        assert_eq!(request.name, "tree/loga");
        assert_eq!(request.payload, "((type float) (min -15) (max 15))");
    }

    #[test]
    fn ordinary_lines_are_not_requests() {
        assert!(parse_request("5", PARAM_REQUEST_SENTINEL).is_none());
        assert!(parse_request("", PARAM_REQUEST_SENTINEL).is_none());
        assert!(parse_request("TU_PARAM_REQUEST n", PARAM_REQUEST_SENTINEL).is_none());
        assert!(
            parse_request(" TU_PARAM_REQ n (type int min 0 max 1)", PARAM_REQUEST_SENTINEL)
                .is_none()
        );
    }

    #[test]
    fn truncated_requests_are_protocol_errors() {
        for line in ["TU_PARAM_REQ", "TU_PARAM_REQ n", "TU_PARAM_REQ n   "] {
            assert!(matches!(
                parse_request(line, PARAM_REQUEST_SENTINEL),
                Some(Err(AtError::Protocol(ProtocolError::MalformedRequest { .. })))
            ));
        }
    }

    #[test]
    fn answer_reuses_bound_values() {
        use rand::SeedableRng;

        let mut registry = ParameterRegistry::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut resolver = Resolver::Synthesizer {
            registry: &mut registry,
            rng: &mut rng,
        };
        let mut feed = FeedDict::new();
        feed.insert("n".into(), ParamValue::from("4"));

        let request = ParamRequest {
            name: "n".into(),
            payload: "(type int min 0 max 10)".into(),
        };
        let value = Generator::answer(&request, &mut feed, &mut resolver).unwrap();
        assert_eq!(value, ParamValue::from("4"));

        let request = ParamRequest {
            name: "k".into(),
            payload: "(type int min 2 max 2)".into(),
        };
        let value = Generator::answer(&request, &mut feed, &mut resolver).unwrap();
        assert_eq!(value, ParamValue::Int(2));
        assert_eq!(feed.get("k"), Some(&ParamValue::Int(2)));

        drop(resolver);
        assert!(registry.contains("n"));
        assert!(registry.contains("k"));
    }
}
