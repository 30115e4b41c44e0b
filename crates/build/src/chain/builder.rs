//! Chain construction
//!
//! Turns a [`SourceDescriptor`] into the ordered steps that build it:
//!
//! 1. dependency scan (`dxc ... -MF <dep>`), optional and non-fatal
//! 2. one intermediate compile per enabled format (`dxc ... -Fo <out>`)
//! 3. native conversion of the DXIL binary (`metal-shaderconverter <dxil> -o <native>`)
//!
//! Every output argument points at the target's staging path; the scheduler moves the
//! file into place once the step has succeeded.

use super::{Chain, CompilationStep, IntermediateFormat, StepInput, StepKind};
use crate::{
    catalog::SourceDescriptor,
    config::BuildConfig,
    error::{ChainConsistencyError, ChainError, UnsupportedStageError},
    paths::{OutputKind, OutputTarget, PathPlanner},
};

/// Flags embedding debug information and the source into the intermediate binary
const DEBUG_INFO_FLAGS: [&str; 3] = ["-Zi", "-Qembed_debug", "-Qsource_in_debug_module"];

/// Builds the chain of steps for each source file
pub struct ChainBuilder<'a> {
    config: &'a BuildConfig,
    planner: &'a PathPlanner,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(config: &'a BuildConfig, planner: &'a PathPlanner) -> Self {
        Self { config, planner }
    }

    /// Builds the chain for `source`
    ///
    /// # Errors
    /// * [`ChainError::UnsupportedStage`] if the file name has no recognized stage tag
    /// * [`ChainError::PathPlanning`] if an output path cannot be derived or prepared
    /// * [`ChainError::Consistency`] if the configuration asks for a step whose input
    ///   is never produced; this one is fatal for the whole run
    pub fn build(&self, source: SourceDescriptor) -> Result<Chain, ChainError> {
        let Some(shader_model) = source.shader_model().map(str::to_owned) else {
            return Err(UnsupportedStageError {
                path: source.path().to_path_buf(),
                tag: source.stage().to_string(),
            }
            .into());
        };

        let mut steps = Vec::new();

        if self.config.dependency_scan {
            steps.push(self.dependency_scan_step(&source, &shader_model)?);
        }

        let mut primary_binary = None;
        if self.config.emit_primary_intermediate_format {
            let target = self.planner.plan(&source, OutputKind::IntermediateBinary)?;
            steps.push(self.compile_step(&source, &shader_model, IntermediateFormat::Dxil, &target));
            primary_binary = Some(target);
        }

        if self.config.emit_alternate_intermediate_format {
            let target = self.planner.plan(&source, OutputKind::AlternateBinary)?;
            steps.push(self.compile_step(&source, &shader_model, IntermediateFormat::Spirv, &target));
        }

        if self.config.emit_native_format {
            let Some(intermediate) = primary_binary else {
                return Err(ChainConsistencyError::MissingNativeInput {
                    source_file: source.path().to_path_buf(),
                }
                .into());
            };
            steps.push(self.native_conversion_step(&source, intermediate)?);
        }

        Ok(Chain::new(source, steps)?)
    }

    fn dependency_scan_step(&self, source: &SourceDescriptor, shader_model: &str) -> Result<CompilationStep, ChainError> {
        let record = self.planner.plan(source, OutputKind::DependencyRecord)?;
        Ok(CompilationStep::new(StepKind::DependencyScan, &self.config.compiler)
            .arg(source.path())
            .args(["-T", shader_model, "-E", self.config.entry_point.as_str(), "-MF"])
            .arg(record.staging_path())
            .input(StepInput::Source(source.path().to_path_buf()))
            .output(record))
    }

    fn compile_step(&self, source: &SourceDescriptor, shader_model: &str, format: IntermediateFormat, target: &OutputTarget) -> CompilationStep {
        let mut step = CompilationStep::new(StepKind::IntermediateCompile(format), &self.config.compiler)
            .arg(source.path())
            .arg("-Fo")
            .arg(target.staging_path())
            .args(["-T", shader_model, "-E", self.config.entry_point.as_str()]);

        if self.config.debug_info {
            step = step.args(DEBUG_INFO_FLAGS);
        }

        if format == IntermediateFormat::Spirv {
            step = step.arg("-spirv").arg(format!("-fspv-target-env={}", self.config.spirv_target_env));
        }

        step.input(StepInput::Source(source.path().to_path_buf())).output(target.clone())
    }

    fn native_conversion_step(&self, source: &SourceDescriptor, intermediate: OutputTarget) -> Result<CompilationStep, ChainError> {
        let native = self.planner.plan(source, OutputKind::NativeBinary)?;
        let mut step = CompilationStep::new(StepKind::NativeConversion, &self.config.converter)
            .arg(intermediate.path())
            .arg("-o")
            .arg(native.staging_path())
            .input(StepInput::Artifact(intermediate))
            .output(native);

        if self.config.emit_reflection {
            let reflection = self.planner.plan(source, OutputKind::ReflectionSidecar)?;
            step = step.arg("--output-reflection-file").arg(reflection.staging_path()).output(reflection);
        }

        Ok(step)
    }
}
