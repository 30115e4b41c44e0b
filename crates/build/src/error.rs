//! Error taxonomy for shader builds
//!
//! Errors are grouped by how far they reach. [`ChainError`] fails the chain of a
//! single source file and never touches sibling chains, while [`BuildError`] aborts
//! the whole run before (or instead of) scheduling.

use std::{fmt, path::PathBuf, time::Duration};
use thiserror::Error;

use crate::chain::StepKind;

/// The source root could not be walked
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The root does not exist or cannot be listed
    #[error("source root '{}' is not a readable directory: {source}", root.display())]
    UnreadableRoot {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The root exists but is a file
    #[error("source root '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),
    /// An entry below the root could not be read during the walk
    #[error("failed to walk source tree below '{}': {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// The file name does not carry a recognized stage tag
#[derive(Debug, Clone, Error)]
#[error("'{}' has unsupported stage tag '{tag}' (expected one of vert, frag, mesh, task, comp)", path.display())]
pub struct UnsupportedStageError {
    /// Offending source file
    pub path: PathBuf,
    /// Raw tag extracted from the file name (empty when the name has no stage segment)
    pub tag: String,
}

/// An output path could not be derived or prepared
#[derive(Debug, Error)]
pub enum PathPlanningError {
    /// The source file does not live below the configured source root
    #[error("'{}' is not located under source root '{}'", path.display(), root.display())]
    OutsideSourceRoot { path: PathBuf, root: PathBuf },
    /// The source file does not carry the configured source extension
    #[error("'{}' does not have the source extension '.{extension}'", path.display())]
    UnexpectedExtension { path: PathBuf, extension: String },
    /// The parent directory of an output could not be created
    #[error("failed to create output directory '{}': {source}", dir.display())]
    CreateDirectory {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A chain was assembled with a step whose inputs can never exist
///
/// This is a builder-time defect (or an inconsistent configuration), so it aborts the
/// run instead of being reported per file.
#[derive(Debug, Clone, Error)]
pub enum ChainConsistencyError {
    /// A chain must contain at least one step
    #[error("chain for '{}' has no steps", source_file.display())]
    EmptyChain { source_file: PathBuf },
    /// A step consumes a file that no earlier fatal step of the chain produces
    #[error("step {step} of the chain for '{}' consumes '{}', which no earlier step produces", source_file.display(), input.display())]
    UnsatisfiedInput { source_file: PathBuf, step: usize, input: PathBuf },
    /// Two steps of a chain declare the same output
    #[error("step {step} of the chain for '{}' overwrites output '{}'", source_file.display(), output.display())]
    OutputOverwritten { source_file: PathBuf, step: usize, output: PathBuf },
    /// Native conversion was requested but no intermediate binary is produced for it
    #[error("native conversion for '{}' requires the primary intermediate format, which is not emitted", source_file.display())]
    MissingNativeInput { source_file: PathBuf },
}

/// How an external tool invocation went wrong
#[derive(Debug, Error)]
pub enum StepFailure {
    /// The program could not be started at all
    #[error("could not be started: {0}")]
    Spawn(#[source] std::io::Error),
    /// Waiting on the child process failed
    #[error("could not be waited on: {0}")]
    Wait(#[source] std::io::Error),
    /// The program exited with a non-zero status code
    #[error("exited with status {0}")]
    ExitCode(i32),
    /// The program was terminated without an exit code (usually by a signal)
    #[error("was terminated abnormally")]
    Terminated,
    /// The program ran longer than the configured step timeout and was killed
    #[error("timed out after {0:?} and was killed")]
    TimedOut(Duration),
    /// The run was cancelled before or while the step executed
    #[error("was cancelled by a shutdown request")]
    Cancelled,
    /// The program reported success but a declared output is missing
    #[error("exited successfully but did not produce '{}'", .0.display())]
    MissingOutput(PathBuf),
    /// A produced output could not be moved from its staging path to its final path
    #[error("produced '{}', which could not be committed: {source}", path.display())]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An external tool invocation failed
///
/// Carries the full command line and whatever the tool printed so the final report
/// can show the diagnostic of the failing invocation.
#[derive(Debug)]
pub struct StepExecutionError {
    /// Program that was invoked
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// What went wrong
    pub failure: StepFailure,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl StepExecutionError {
    /// Returns the command line as a single space-joined string
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)).collect::<Vec<_>>().join(" ")
    }

    /// Returns the captured tool output, stderr first, or `None` when the tool printed nothing
    pub fn diagnostic(&self) -> Option<String> {
        let text = [self.stderr.trim(), self.stdout.trim()].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join("\n");
        (!text.is_empty()).then_some(text)
    }
}

impl fmt::Display for StepExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {}", self.command_line(), self.failure)
    }
}

impl std::error::Error for StepExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.failure)
    }
}

/// Failure local to the chain of one source file
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    UnsupportedStage(#[from] UnsupportedStageError),
    #[error(transparent)]
    PathPlanning(#[from] PathPlanningError),
    #[error(transparent)]
    Consistency(#[from] ChainConsistencyError),
    #[error("{kind} step failed: {error}")]
    StepExecution {
        kind: StepKind,
        #[source]
        error: StepExecutionError,
    },
    /// The worker running this chain panicked
    #[error("worker panicked: {0}")]
    WorkerPanic(String),
}

impl ChainError {
    /// Whether this error must abort the whole run rather than only its chain
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }

    /// Captured output of the failing external invocation, if any
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Self::StepExecution { error, .. } => error.diagnostic(),
            _ => None,
        }
    }
}

/// The configuration is unusable
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_norway::Error,
    },
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_norway::Error),
    #[error("sourceRoot is required")]
    MissingSourceRoot,
    #[error("sourceExtension must be a non-empty extension without dots, got '{0}'")]
    InvalidSourceExtension(String),
    #[error("at least one intermediate format must be emitted")]
    NoIntermediateFormat,
    #[error("stepTimeoutSecs must be greater than zero when set")]
    ZeroTimeout,
}

/// Failure that aborts the whole run
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    ChainConsistency(#[from] ChainConsistencyError),
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
