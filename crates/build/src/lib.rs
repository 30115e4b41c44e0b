//! Shader build orchestration
//!
//! This crate compiles a tree of HLSL sources into intermediate (DXIL, optionally SPIR-V)
//! and native (Metal library) binaries by driving the external `dxc` and
//! `metal-shaderconverter` tools. Every source file gets its own chain of steps; chains
//! run in parallel on a bounded worker pool and fail independently of each other.
//!
//! The flow is:
//! 1. [`catalog::SourceCatalog`] walks the source root
//! 2. [`stage::StageResolver`] maps `<name>.<stage>.<ext>` to a shader model
//! 3. [`chain::ChainBuilder`] plans output paths and assembles the steps
//! 4. [`scheduler::Scheduler`] runs the chains
//! 5. [`report::BuildReport`] summarizes the outcomes

pub mod catalog;
pub mod chain;
pub mod config;
pub mod error;
pub mod paths;
pub mod report;
pub mod scheduler;
pub mod stage;

pub use config::BuildConfig;
pub use error::BuildError;
pub use report::BuildReport;
pub use scheduler::{CancellationToken, ProcessExecutor, StepExecutor};

use catalog::SourceCatalog;
use chain::{Chain, ChainBuilder};
use paths::PathPlanner;
use scheduler::{ChainOutcome, Scheduler};
use stage::StageResolver;

/// Chains ready to run plus the sources rejected while building them
#[derive(Debug)]
pub struct BuildPlan {
    pub chains: Vec<Chain>,
    pub rejected: Vec<ChainOutcome>,
}

/// Discovers sources and builds their chains
///
/// Chain-local problems (unknown stage, unplannable output path) become rejected
/// outcomes; only configuration, discovery and chain consistency errors abort.
pub fn plan_build(config: &BuildConfig) -> Result<BuildPlan, BuildError> {
    config.validate()?;

    let resolver = StageResolver::new(&config.shader_model_version);
    let catalog = SourceCatalog::new(&config.source_root, &config.source_extension)?;
    let planner = PathPlanner::from_config(config);
    let builder = ChainBuilder::new(config, &planner);

    let mut plan = BuildPlan {
        chains: Vec::new(),
        rejected: Vec::new(),
    };

    for path in catalog.files() {
        let source = catalog::SourceDescriptor::new(path?, catalog.root(), &resolver);
        let path = source.path().to_path_buf();
        match builder.build(source) {
            Ok(chain) => plan.chains.push(chain),
            Err(error::ChainError::Consistency(error)) => return Err(error.into()),
            Err(error) => {
                tracing::error!("Skipping {}: {error}", path.display());
                plan.rejected.push(ChainOutcome::rejected(path, error));
            }
        }
    }

    Ok(plan)
}

/// Builds every shader below the configured source root
///
/// # Errors
/// Returns [`BuildError`] for failures that prevent the run as a whole. Failures of
/// individual sources are reported in the returned [`BuildReport`].
pub fn build_shaders<E: StepExecutor>(config: &BuildConfig, executor: E, cancel: CancellationToken) -> Result<BuildReport, BuildError> {
    let plan = plan_build(config)?;
    if plan.chains.is_empty() && plan.rejected.is_empty() {
        tracing::warn!("No .{} sources found below {}", config.source_extension, config.source_root.display());
    }

    let concurrency = config.effective_concurrency();
    tracing::info!("Building {} shader(s) with {} worker(s)", plan.chains.len(), concurrency);

    let scheduler = Scheduler::new(executor, concurrency).verbose(config.verbose).cancellation(cancel);
    let mut outcomes = plan.rejected;
    outcomes.extend(scheduler.run(plan.chains)?);

    let report = BuildReport::aggregate(&outcomes);
    tracing::info!("Finished: {} succeeded, {} failed", report.succeeded, report.failed);
    Ok(report)
}
