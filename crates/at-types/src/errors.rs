use thiserror::Error;

/// Main error type for autotest.
///
/// Every variant is fatal to the run at the point where it is raised; the
/// search driver performs no retries.
#[derive(Error, Debug)]
pub enum AtError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Task file error: {0}")]
    TaskFile(#[from] TaskFileError),

    #[error("Compilation of {source_path} failed: {message}")]
    Compile { source_path: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AtError {
    /// Whether the failure is confined to a single trial.
    ///
    /// The driver still aborts on these; the classification exists so a
    /// skip-and-penalize policy can be introduced without touching callers.
    pub fn is_trial_local(&self) -> bool {
        matches!(
            self,
            AtError::Process(
                ProcessError::GeneratorFailure { .. }
                    | ProcessError::SolutionFailure { .. }
                    | ProcessError::SolutionTimeout { .. }
            )
        )
    }
}

/// Errors raised while talking to the generator or decoding parameter specs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed parameter request: {line:?}")]
    MalformedRequest { line: String },

    #[error("Malformed parameter spec {payload:?}: {message}")]
    MalformedSpec { payload: String, message: String },

    #[error("Unrecognized spec type: '{kind}'")]
    UnrecognizedSpec { kind: String },

    #[error("Conflicting definition for '{name}': was {existing}, redeclared as {proposed}")]
    ConflictingDefinition {
        name: String,
        existing: String,
        proposed: String,
    },
}

/// Child process failures.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Generator returned non-zero exit code: {code:?}")]
    GeneratorFailure { code: Option<i32> },

    #[error("Solution failed: {message}")]
    SolutionFailure { message: String },

    #[error("Solution timeout: did not finish within {timeout_ms} ms")]
    SolutionTimeout { timeout_ms: u64 },
}

/// Errors raised by the search loop itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Objective length mismatch: expected {expected} values, got {actual}")]
    ContractMismatch { expected: usize, actual: usize },

    #[error("Invalid objective: {message}")]
    InvalidObjective { message: String },

    #[error("No solution found for task '{task_id}'")]
    NoSolutionFound { task_id: String },
}

/// Errors in the task definition table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskFileError {
    #[error("Task file has no header row")]
    MissingHeader,

    #[error("Header must start with '#', found '{found}'")]
    InvalidHeader { found: String },

    #[error("Line {line}: expected {expected} columns, found {found}")]
    RowWidth {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Line {line}: target {column} is not a number: '{value}'")]
    InvalidTarget {
        line: usize,
        column: String,
        value: String,
    },
}

/// Result type alias for autotest operations
pub type AtResult<T> = Result<T, AtError>;

/// Macro for creating malformed-spec protocol errors
#[macro_export]
macro_rules! protocol_error {
    ($payload:expr, $($arg:tt)*) => {
        $crate::AtError::Protocol($crate::ProtocolError::MalformedSpec {
            payload: $payload.to_string(),
            message: format!($($arg)*),
        })
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::AtError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::AtError::Config(format!($($arg)*))
    };
}
