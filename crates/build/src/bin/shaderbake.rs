//! Shader build tool
//!
//! Compiles every `<name>.<stage>.hlsl` file below a source root to DXIL (and optionally
//! SPIR-V) with `dxc`, then converts the DXIL to a Metal library with
//! `metal-shaderconverter`. Sources are built in parallel; a failing source never stops
//! the others.
//!
//! # Usage
//! ```bash
//! shaderbake --source-root resources/shaders/hlsl -j 8 --report build-report.json
//! shaderbake --config shaders.yaml --verbose
//! ```
//!
//! Exits with 0 when every source was built, 1 when some failed, and 2 when the build
//! could not run at all.

use clap::Parser;
use shaderbake_build::{BuildConfig, BuildReport, CancellationToken, ProcessExecutor, build_shaders};
use std::{num::NonZeroUsize, path::PathBuf, process::ExitCode};

/// Command-line arguments
///
/// Every option overrides the corresponding key of the config file.
#[derive(Parser)]
#[command(version, about = "Parallel HLSL shader build orchestrator")]
struct Args {
    /// YAML config file (camelCase keys)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory walked for shader sources
    #[arg(long)]
    source_root: Option<PathBuf>,

    /// Output directory for intermediate binaries
    #[arg(long)]
    intermediate_output_root: Option<PathBuf>,

    /// Output directory for native binaries and reflection sidecars
    #[arg(long)]
    native_output_root: Option<PathBuf>,

    /// Output directory for dependency records
    #[arg(long)]
    dependency_output_root: Option<PathBuf>,

    /// Maximum number of sources built at once (defaults to the number of CPUs)
    #[arg(long, short = 'j')]
    max_concurrency: Option<NonZeroUsize>,

    /// Kill any tool invocation running longer than this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print every command line before running it
    #[arg(long, short)]
    verbose: bool,

    /// Skip the Metal library conversion
    #[arg(long)]
    no_native: bool,

    /// Do not write reflection JSON next to the Metal library
    #[arg(long)]
    no_reflection: bool,

    /// Skip the dependency scan
    #[arg(long)]
    no_dependency_scan: bool,

    /// Also compile to SPIR-V
    #[arg(long)]
    alternate_format: bool,

    /// Write the build report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); defaults to debug with --verbose, info otherwise
    #[arg(long)]
    log_level: Option<tracing::Level>,
}

impl Args {
    /// Loads the config file (if any) and applies the command-line overrides
    fn into_config(self) -> Result<BuildConfig, shaderbake_build::error::ConfigError> {
        let mut config = match &self.config {
            Some(path) => BuildConfig::from_file(path)?,
            None => BuildConfig::default(),
        };

        if let Some(root) = self.source_root {
            config.source_root = root;
        }
        if let Some(root) = self.intermediate_output_root {
            config.intermediate_output_root = root;
        }
        if let Some(root) = self.native_output_root {
            config.native_output_root = root;
        }
        if let Some(root) = self.dependency_output_root {
            config.dependency_output_root = root;
        }
        if self.max_concurrency.is_some() {
            config.max_concurrency = self.max_concurrency;
        }
        if self.timeout.is_some() {
            config.step_timeout_secs = self.timeout;
        }

        config.verbose |= self.verbose;
        config.emit_native_format &= !self.no_native;
        config.emit_reflection &= !self.no_reflection;
        config.dependency_scan &= !self.no_dependency_scan;
        config.emit_alternate_intermediate_format |= self.alternate_format;

        Ok(config)
    }
}

/// Builds the shaders and writes the optional JSON report
fn run(args: Args, cancel: CancellationToken) -> Result<BuildReport, Box<dyn std::error::Error>> {
    let report_path = args.report.clone();
    let config = args.into_config()?;

    let report = build_shaders(&config, ProcessExecutor::new(config.step_timeout()), cancel)?;
    print!("{report}");

    if let Some(path) = report_path {
        report.write_json(&path).map_err(|e| format!("failed to write report to {}: {e}", path.display()))?;
    }

    Ok(report)
}

/// Process exit status: 0 when every source was built, 1 when some failed, 2 when the build did not run
fn exit_status<E>(result: &Result<BuildReport, E>) -> u8 {
    match result {
        Ok(report) if report.all_succeeded() => 0,
        Ok(_) => 1,
        Err(_) => 2,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = args.log_level.unwrap_or(if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO });
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let cancel = CancellationToken::new();
    if let Err(e) = cancel.cancel_on_shutdown_signal() {
        tracing::warn!("Failed to install shutdown handler: {e}");
    }

    let result = run(args, cancel);
    if let Err(e) = &result {
        tracing::error!("{e}");
    }
    ExitCode::from(exit_status(&result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("shaders.yaml");
        let yaml = format!(
            "sourceRoot: {}\nemitReflection: false\nmaxConcurrency: 2\nstepTimeoutSecs: 10\n",
            dir.join("shaders").display()
        );
        std::fs::write(&path, yaml).unwrap();
        path
    }

    fn config_from(args: &[&str]) -> BuildConfig {
        Args::try_parse_from(std::iter::once("shaderbake").chain(args.iter().copied())).unwrap().into_config().unwrap()
    }

    #[test]
    fn test_config_file_without_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let config = config_from(&["--config", path.to_str().unwrap()]);

        assert_eq!(config.source_root, dir.path().join("shaders"));
        assert_eq!(config.max_concurrency, NonZeroUsize::new(2));
        assert_eq!(config.step_timeout_secs, Some(10));
        assert!(config.emit_native_format);
        assert!(!config.emit_reflection);
        assert!(!config.emit_alternate_intermediate_format);
        assert!(!config.verbose);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let config = config_from(&[
            "--config",
            path.to_str().unwrap(),
            "--source-root",
            "other/hlsl",
            "--native-output-root",
            "out/native",
            "--no-native",
            "--no-dependency-scan",
            "--alternate-format",
            "-j",
            "8",
            "--timeout",
            "30",
            "-v",
        ]);

        assert_eq!(config.source_root, PathBuf::from("other/hlsl"));
        assert_eq!(config.native_output_root, PathBuf::from("out/native"));
        assert!(!config.emit_native_format);
        assert!(!config.dependency_scan);
        assert!(config.emit_alternate_intermediate_format);
        assert_eq!(config.max_concurrency, NonZeroUsize::new(8));
        assert_eq!(config.step_timeout_secs, Some(30));
        assert!(config.verbose);
        // Keys without a flag keep their file value
        assert!(!config.emit_reflection);
    }

    #[test]
    fn test_invalid_arguments_are_rejected() {
        assert!(Args::try_parse_from(["shaderbake", "-j", "0"]).is_err());
        assert!(Args::try_parse_from(["shaderbake", "--log-level", "loud"]).is_err());

        let args = Args::try_parse_from(["shaderbake", "--config", "does/not/exist.yaml"]).unwrap();
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status::<()>(&Ok(BuildReport::aggregate(&[]))), 0);

        let failed = BuildReport {
            total: 3,
            succeeded: 2,
            failed: 1,
            all_succeeded: false,
            ..BuildReport::default()
        };
        assert_eq!(exit_status::<()>(&Ok(failed)), 1);
        assert_eq!(exit_status::<()>(&Err(())), 2);
    }

    #[test]
    fn test_fatal_errors_exit_with_two() {
        let dir = tempfile::tempdir().unwrap();
        let missing_root = dir.path().join("missing");
        let args = Args::try_parse_from(["shaderbake", "--source-root", missing_root.to_str().unwrap()]).unwrap();
        assert_eq!(exit_status(&run(args, CancellationToken::new())), 2);

        let args = Args::try_parse_from(["shaderbake"]).unwrap();
        assert_eq!(exit_status(&run(args, CancellationToken::new())), 2);
    }

    #[test]
    fn test_empty_source_tree_exits_with_zero_and_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shaders")).unwrap();
        let report_path = dir.path().join("report.json");
        let args = Args::try_parse_from([
            "shaderbake",
            "--source-root",
            dir.path().join("shaders").to_str().unwrap(),
            "--report",
            report_path.to_str().unwrap(),
        ])
        .unwrap();

        assert_eq!(exit_status(&run(args, CancellationToken::new())), 0);
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(json["total"], 0);
        assert_eq!(json["allSucceeded"], true);
    }
}
