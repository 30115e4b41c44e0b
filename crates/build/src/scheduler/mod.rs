//! Bounded parallel execution of chains
//!
//! Chains run on a dedicated rayon pool with exactly `max_concurrency` threads. Steps of
//! one chain run strictly in order on the same worker. Every chain yields exactly one
//! [`ChainOutcome`], in input order, whether it succeeded, failed or panicked.

mod cancel;
mod executor;

pub use cancel::CancellationToken;
pub use executor::{ProcessExecutor, StepExecutor};

use crate::{
    chain::{Chain, CompilationStep, StepKind},
    error::{ChainError, StepExecutionError, StepFailure},
};
use rayon::prelude::*;
use std::{
    any::Any,
    fs,
    io::{self, Write},
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Position and kind of a step within its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRef {
    pub index: usize,
    pub kind: StepKind,
}

/// Result of running (or refusing to run) the chain of one source file
#[derive(Debug)]
pub struct ChainOutcome {
    source: PathBuf,
    failed_step: Option<StepRef>,
    failure: Option<ChainError>,
    warnings: Vec<StepExecutionError>,
}

impl ChainOutcome {
    pub(crate) fn succeeded(source: PathBuf, warnings: Vec<StepExecutionError>) -> Self {
        Self {
            source,
            failed_step: None,
            failure: None,
            warnings,
        }
    }

    pub(crate) fn failed(source: PathBuf, failed_step: Option<StepRef>, failure: ChainError, warnings: Vec<StepExecutionError>) -> Self {
        Self {
            source,
            failed_step,
            failure: Some(failure),
            warnings,
        }
    }

    /// Outcome of a source whose chain could not be built
    pub fn rejected(source: impl Into<PathBuf>, failure: ChainError) -> Self {
        Self::failed(source.into(), None, failure, Vec::new())
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The fatal step that stopped the chain, `None` if the chain never started a step
    pub fn failed_step(&self) -> Option<StepRef> {
        self.failed_step
    }

    pub fn failure(&self) -> Option<&ChainError> {
        self.failure.as_ref()
    }

    /// Failures of non-fatal steps
    pub fn warnings(&self) -> &[StepExecutionError] {
        &self.warnings
    }
}

/// Where verbose mode echoes command lines, one whole line per write
enum Echo {
    Stdout,
    Writer(Mutex<Box<dyn Write + Send>>),
}

impl Echo {
    fn line(&self, line: &str) {
        let _ = match self {
            Self::Stdout => writeln!(io::stdout().lock(), "{line}"),
            Self::Writer(writer) => match writer.lock() {
                Ok(mut writer) => writeln!(writer, "{line}"),
                Err(_) => Ok(()),
            },
        };
    }
}

/// Runs chains against a [`StepExecutor`]
pub struct Scheduler<E> {
    executor: E,
    max_concurrency: NonZeroUsize,
    echo: Option<Echo>,
    cancel: CancellationToken,
}

impl<E: StepExecutor> Scheduler<E> {
    pub fn new(executor: E, max_concurrency: NonZeroUsize) -> Self {
        Self {
            executor,
            max_concurrency,
            echo: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Echo each command line to stdout before dispatching it
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.echo = verbose.then_some(Echo::Stdout);
        self
    }

    /// Echo each command line to `writer` instead of stdout
    pub fn echo_to(mut self, writer: impl Write + Send + 'static) -> Self {
        self.echo = Some(Echo::Writer(Mutex::new(Box::new(writer))));
        self
    }

    /// Observe `cancel` instead of a private token
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs every chain and returns their outcomes in input order
    ///
    /// # Errors
    /// Fails only if the worker pool cannot be created; chain failures are outcomes.
    pub fn run(&self, chains: Vec<Chain>) -> Result<Vec<ChainOutcome>, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_concurrency.get())
            .thread_name(|index| format!("shaderbake-worker-{index}"))
            .build()?;

        Ok(pool.install(|| chains.into_par_iter().map(|chain| self.run_isolated(&chain)).collect()))
    }

    fn run_isolated(&self, chain: &Chain) -> ChainOutcome {
        let source = chain.source().path();
        panic::catch_unwind(AssertUnwindSafe(|| self.run_chain(chain))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!("Worker panicked while building {}: {message}", source.display());
            // The panicking step never reached its own cleanup
            for target in chain.steps().iter().flat_map(CompilationStep::outputs) {
                remove_if_present(&target.staging_path());
            }
            ChainOutcome::failed(source.to_path_buf(), None, ChainError::WorkerPanic(message), Vec::new())
        })
    }

    fn run_chain(&self, chain: &Chain) -> ChainOutcome {
        let source = chain.source().path();
        let mut warnings = Vec::new();

        for (index, step) in chain.steps().iter().enumerate() {
            let Err(error) = self.run_step(step) else {
                continue;
            };

            let kind = step.kind();
            if step.is_fatal() {
                tracing::error!("{} failed at step {index} ({kind}): {error}", source.display());
                let failure = ChainError::StepExecution { kind, error };
                return ChainOutcome::failed(source.to_path_buf(), Some(StepRef { index, kind }), failure, warnings);
            }

            tracing::warn!("{} step for {} failed, continuing: {error}", kind, source.display());
            warnings.push(error);
        }

        tracing::debug!("Built {}", source.display());
        ChainOutcome::succeeded(source.to_path_buf(), warnings)
    }

    fn run_step(&self, step: &CompilationStep) -> Result<(), StepExecutionError> {
        for target in step.outputs() {
            remove_if_present(&target.staging_path());
        }

        if self.cancel.is_cancelled() {
            return Err(StepExecutionError {
                program: step.program().to_string(),
                args: step.display_args(),
                failure: StepFailure::Cancelled,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        if let Some(echo) = &self.echo {
            echo.line(&step.command_line());
        }
        tracing::debug!("Running {}", step.command_line());

        let result = self.executor.execute(step, &self.cancel).and_then(|()| commit(step));
        if result.is_err() {
            for target in step.outputs() {
                remove_if_present(&target.staging_path());
                remove_if_present(target.path());
            }
        }
        result
    }
}

/// Moves every output of a successful step from its staging path to its final path
fn commit(step: &CompilationStep) -> Result<(), StepExecutionError> {
    let error = |failure| StepExecutionError {
        program: step.program().to_string(),
        args: step.display_args(),
        failure,
        stdout: String::new(),
        stderr: String::new(),
    };

    if let Some(missing) = step.outputs().iter().find(|target| !target.staging_path().is_file()) {
        return Err(error(StepFailure::MissingOutput(missing.path().to_path_buf())));
    }

    for target in step.outputs() {
        fs::rename(target.staging_path(), target.path()).map_err(|source| {
            error(StepFailure::Commit {
                path: target.path().to_path_buf(),
                source,
            })
        })?;
    }

    Ok(())
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {e}", path.display()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
