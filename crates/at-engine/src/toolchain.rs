//! Compilation of generator and solution sources.

use at_types::{config_error, AtError, AtResult, ProcessError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++"];

/// Compiler invocation; the source and `-o <output>` are appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toolchain {
    pub command: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            command: vec!["g++".into(), "-std=c++11".into(), "-O2".into()],
        }
    }
}

impl Toolchain {
    /// Build from a shell-style command line such as `"clang++ -O2"`.
    pub fn from_command_line(command: &str) -> AtResult<Self> {
        let command: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if command.is_empty() {
            return Err(config_error!("compile command is empty"));
        }
        Ok(Self { command })
    }

    pub fn is_source(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
    }

    pub async fn compile(&self, source: &Path, output: &Path) -> AtResult<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| config_error!("compile command is empty"))?;

        info!("Compiling {} -> {}", source.display(), output.display());
        let result = Command::new(program)
            .args(args)
            .arg(source)
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(AtError::Compile {
                source_path: source.display().to_string(),
                message: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Executable for `path`: sources are compiled into `build_dir`, anything
    /// else is assumed to be runnable already.
    pub async fn prepare(&self, path: &Path, build_dir: &Path) -> AtResult<PathBuf> {
        if !Self::is_source(path) {
            return Ok(path.to_path_buf());
        }
        std::fs::create_dir_all(build_dir)?;
        let stem = path
            .file_stem()
            .ok_or_else(|| config_error!("cannot derive executable name from {}", path.display()))?;
        let output = build_dir.join(stem);
        self.compile(path, &output).await?;
        Ok(output)
    }
}
