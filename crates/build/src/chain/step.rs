//! Compilation steps and chains
//!
//! A [`Chain`] is the ordered list of external tool invocations for one source file.
//! Steps declare what they read and what they write; [`Chain::new`] rejects any chain
//! whose steps read something that no earlier step is guaranteed to have written.

use crate::{catalog::SourceDescriptor, error::ChainConsistencyError, paths::OutputTarget};
use std::{
    collections::HashSet,
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

/// Intermediate binary format emitted by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntermediateFormat {
    Dxil,
    Spirv,
}

/// What a step does, used for logging and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    DependencyScan,
    IntermediateCompile(IntermediateFormat),
    NativeConversion,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyScan => write!(f, "dependency scan"),
            Self::IntermediateCompile(IntermediateFormat::Dxil) => write!(f, "DXIL compile"),
            Self::IntermediateCompile(IntermediateFormat::Spirv) => write!(f, "SPIR-V compile"),
            Self::NativeConversion => write!(f, "native conversion"),
        }
    }
}

/// A file consumed by a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepInput {
    /// The chain's own source file
    Source(PathBuf),
    /// An artifact committed by an earlier step of the same chain
    Artifact(OutputTarget),
}

impl StepInput {
    pub fn path(&self) -> &Path {
        match self {
            Self::Source(path) => path,
            Self::Artifact(target) => target.path(),
        }
    }
}

/// One external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationStep {
    kind: StepKind,
    program: String,
    args: Vec<OsString>,
    inputs: Vec<StepInput>,
    outputs: Vec<OutputTarget>,
    fatal: bool,
}

impl CompilationStep {
    /// Creates a step running `program` without arguments
    ///
    /// Dependency scans are non-fatal, every other kind stops its chain when it fails.
    pub fn new(kind: StepKind, program: impl Into<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            fatal: kind != StepKind::DependencyScan,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Declares a file this step reads
    pub fn input(mut self, input: StepInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Declares an artifact this step writes (to the target's staging path)
    pub fn output(mut self, target: OutputTarget) -> Self {
        self.outputs.push(target);
        self
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args_os(&self) -> &[OsString] {
        &self.args
    }

    pub fn inputs(&self) -> &[StepInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputTarget] {
        &self.outputs
    }

    /// Whether a failure of this step stops the chain
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Arguments rendered as (lossy) UTF-8 strings
    pub fn display_args(&self) -> Vec<String> {
        self.args.iter().map(|arg| arg.to_string_lossy().into_owned()).collect()
    }

    /// Program and arguments joined by spaces, as echoed in verbose mode
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone()).chain(self.display_args()).collect::<Vec<_>>().join(" ")
    }
}

/// Ordered steps transforming one source file
#[derive(Debug, Clone)]
pub struct Chain {
    source: SourceDescriptor,
    steps: Vec<CompilationStep>,
}

impl Chain {
    /// Assembles a chain, checking that every step's inputs are available when it runs
    ///
    /// # Errors
    /// Returns [`ChainConsistencyError`] if the chain is empty, a step reads something no
    /// earlier fatal step produces, or two steps declare the same output.
    pub fn new(source: SourceDescriptor, steps: Vec<CompilationStep>) -> Result<Self, ChainConsistencyError> {
        validate(&source, &steps)?;
        Ok(Self { source, steps })
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub fn steps(&self) -> &[CompilationStep] {
        &self.steps
    }
}

fn validate(source: &SourceDescriptor, steps: &[CompilationStep]) -> Result<(), ChainConsistencyError> {
    let source_file = source.path();
    if steps.is_empty() {
        return Err(ChainConsistencyError::EmptyChain {
            source_file: source_file.to_path_buf(),
        });
    }

    // Outputs of non-fatal steps may legitimately be missing, so only fatal outputs count
    let mut available: HashSet<&OutputTarget> = HashSet::new();
    let mut declared: HashSet<&Path> = HashSet::new();

    for (index, step) in steps.iter().enumerate() {
        for input in &step.inputs {
            let satisfied = match input {
                StepInput::Source(path) => path == source_file,
                StepInput::Artifact(target) => available.contains(target),
            };
            if !satisfied {
                return Err(ChainConsistencyError::UnsatisfiedInput {
                    source_file: source_file.to_path_buf(),
                    step: index,
                    input: input.path().to_path_buf(),
                });
            }
        }

        for output in &step.outputs {
            if !declared.insert(output.path()) {
                return Err(ChainConsistencyError::OutputOverwritten {
                    source_file: source_file.to_path_buf(),
                    step: index,
                    output: output.path().to_path_buf(),
                });
            }
        }

        if step.fatal {
            available.extend(&step.outputs);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{paths::OutputKind, stage::StageResolver};

    fn source() -> SourceDescriptor {
        SourceDescriptor::new("src/a.vert.hlsl", "src", &StageResolver::new("6_7"))
    }

    fn compile(target: &OutputTarget) -> CompilationStep {
        CompilationStep::new(StepKind::IntermediateCompile(IntermediateFormat::Dxil), "dxc")
            .input(StepInput::Source(PathBuf::from("src/a.vert.hlsl")))
            .output(target.clone())
    }

    #[test]
    fn test_valid_chain() {
        let dxil = OutputTarget::new(OutputKind::IntermediateBinary, "out/a.vert.dxil");
        let native = CompilationStep::new(StepKind::NativeConversion, "metal-shaderconverter")
            .input(StepInput::Artifact(dxil.clone()))
            .output(OutputTarget::new(OutputKind::NativeBinary, "out/a.vert.metallib"));

        let chain = Chain::new(source(), vec![compile(&dxil), native]).unwrap();
        assert_eq!(chain.steps().len(), 2);
        assert!(chain.steps().iter().all(CompilationStep::is_fatal));
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        assert!(matches!(Chain::new(source(), Vec::new()), Err(ChainConsistencyError::EmptyChain { .. })));
    }

    #[test]
    fn test_input_before_producer_is_rejected() {
        let dxil = OutputTarget::new(OutputKind::IntermediateBinary, "out/a.vert.dxil");
        let native = CompilationStep::new(StepKind::NativeConversion, "metal-shaderconverter").input(StepInput::Artifact(dxil.clone()));

        let result = Chain::new(source(), vec![native, compile(&dxil)]);
        assert!(matches!(result, Err(ChainConsistencyError::UnsatisfiedInput { step: 0, .. })));
    }

    /// Outputs of a non-fatal step cannot satisfy later inputs
    #[test]
    fn test_non_fatal_outputs_are_not_available() {
        let dep = OutputTarget::new(OutputKind::DependencyRecord, "deps/a.vert.d");
        let scan = CompilationStep::new(StepKind::DependencyScan, "dxc").output(dep.clone());
        assert!(!scan.is_fatal());

        let consumer = CompilationStep::new(StepKind::NativeConversion, "tool").input(StepInput::Artifact(dep));
        assert!(matches!(Chain::new(source(), vec![scan, consumer]), Err(ChainConsistencyError::UnsatisfiedInput { step: 1, .. })));
    }

    #[test]
    fn test_foreign_source_and_duplicate_output_are_rejected() {
        let dxil = OutputTarget::new(OutputKind::IntermediateBinary, "out/a.vert.dxil");
        let foreign = CompilationStep::new(StepKind::IntermediateCompile(IntermediateFormat::Dxil), "dxc").input(StepInput::Source(PathBuf::from("src/b.vert.hlsl")));
        assert!(matches!(Chain::new(source(), vec![foreign]), Err(ChainConsistencyError::UnsatisfiedInput { .. })));

        assert!(matches!(Chain::new(source(), vec![compile(&dxil), compile(&dxil)]), Err(ChainConsistencyError::OutputOverwritten { step: 1, .. })));
    }

    #[test]
    fn test_command_line() {
        let step = CompilationStep::new(StepKind::DependencyScan, "dxc").args(["a.hlsl", "-T", "vs_6_7"]).arg("-MF");
        assert_eq!(step.command_line(), "dxc a.hlsl -T vs_6_7 -MF");
    }
}
