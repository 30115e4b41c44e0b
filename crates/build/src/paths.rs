//! Output path planning
//!
//! Every artifact path mirrors its source's location below the source root, re-rooted
//! under the output root of the artifact kind, with the source extension swapped for the
//! kind's extension: `<root>/mesh/cull.task.hlsl` becomes `<out>/mesh/cull.task.dxil`.
//!
//! Each kind has its own extension and every source shares the same source extension,
//! so the mapping stays injective even when several kinds share one output root.

use crate::{catalog::SourceDescriptor, config::BuildConfig, error::PathPlanningError};
use serde::Serialize;
use std::{
    ffi::{OsStr, OsString},
    fmt,
    path::{Path, PathBuf},
};

/// Suffix appended to an output path while a step is still writing it
pub const STAGING_SUFFIX: &str = ".partial";

/// Kind of artifact produced for a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutputKind {
    /// Primary intermediate binary (DXIL)
    IntermediateBinary,
    /// Alternate intermediate binary (SPIR-V)
    AlternateBinary,
    /// Include dependency list written by the compiler
    DependencyRecord,
    /// Platform-native binary (Metal library)
    NativeBinary,
    /// Reflection metadata written next to the native binary
    ReflectionSidecar,
}

impl OutputKind {
    pub const ALL: [OutputKind; 5] = [Self::IntermediateBinary, Self::AlternateBinary, Self::DependencyRecord, Self::NativeBinary, Self::ReflectionSidecar];

    /// Canonical file extension of this kind
    pub fn extension(self) -> &'static str {
        match self {
            Self::IntermediateBinary => "dxil",
            Self::AlternateBinary => "spirv",
            Self::DependencyRecord => "d",
            Self::NativeBinary => "metallib",
            Self::ReflectionSidecar => "json",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IntermediateBinary => "intermediate binary",
            Self::AlternateBinary => "alternate binary",
            Self::DependencyRecord => "dependency record",
            Self::NativeBinary => "native binary",
            Self::ReflectionSidecar => "reflection sidecar",
        };
        f.write_str(name)
    }
}

/// An artifact a step is expected to produce
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputTarget {
    kind: OutputKind,
    path: PathBuf,
}

impl OutputTarget {
    pub fn new(kind: OutputKind, path: impl Into<PathBuf>) -> Self {
        Self { kind, path: path.into() }
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    /// Final location of the artifact
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location the producing step writes to before the artifact is committed
    pub fn staging_path(&self) -> PathBuf {
        let mut staging = OsString::from(self.path.as_os_str());
        staging.push(STAGING_SUFFIX);
        PathBuf::from(staging)
    }
}

/// Output root directory for each artifact kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRoots {
    /// Primary and alternate intermediate binaries
    pub intermediate: PathBuf,
    /// Native binaries and reflection sidecars
    pub native: PathBuf,
    /// Dependency records
    pub dependency: PathBuf,
}

impl OutputRoots {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            intermediate: config.intermediate_output_root.clone(),
            native: config.native_output_root.clone(),
            dependency: config.dependency_output_root.clone(),
        }
    }

    /// Root directory that artifacts of `kind` are written below
    pub fn root(&self, kind: OutputKind) -> &Path {
        match kind {
            OutputKind::IntermediateBinary | OutputKind::AlternateBinary => &self.intermediate,
            OutputKind::NativeBinary | OutputKind::ReflectionSidecar => &self.native,
            OutputKind::DependencyRecord => &self.dependency,
        }
    }
}

/// Derives mirrored output paths for source files
#[derive(Debug, Clone)]
pub struct PathPlanner {
    roots: OutputRoots,
    source_extension: String,
}

impl PathPlanner {
    /// Creates a planner for sources carrying `source_extension` (without the dot)
    pub fn new(roots: OutputRoots, source_extension: impl Into<String>) -> Self {
        Self {
            roots,
            source_extension: source_extension.into(),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(OutputRoots::from_config(config), config.source_extension.clone())
    }

    pub fn roots(&self) -> &OutputRoots {
        &self.roots
    }

    /// Computes the output path of `kind` for `source` without touching the filesystem
    ///
    /// # Errors
    /// Fails if the source is not below its source root or does not carry the source extension.
    pub fn output_path(&self, source: &SourceDescriptor, kind: OutputKind) -> Result<PathBuf, PathPlanningError> {
        let relative = source.relative_path()?;
        if relative.extension().is_none_or(|extension| extension != OsStr::new(&self.source_extension)) {
            return Err(PathPlanningError::UnexpectedExtension {
                path: source.path().to_path_buf(),
                extension: self.source_extension.clone(),
            });
        }

        Ok(self.roots.root(kind).join(relative).with_extension(kind.extension()))
    }

    /// Plans the output of `kind` for `source`, creating its parent directory
    ///
    /// Creating a directory that already exists (possibly created a moment earlier by
    /// another worker) is not an error.
    pub fn plan(&self, source: &SourceDescriptor, kind: OutputKind) -> Result<OutputTarget, PathPlanningError> {
        let path = self.output_path(source, kind)?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| PathPlanningError::CreateDirectory { dir: dir.to_path_buf(), source })?;
        }

        Ok(OutputTarget::new(kind, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageResolver;
    use std::collections::HashSet;

    fn shared_roots(out: &Path) -> OutputRoots {
        OutputRoots {
            intermediate: out.join("metal"),
            native: out.join("metal"),
            dependency: out.join("deps"),
        }
    }

    #[test]
    fn test_mirrored_output_paths() {
        let resolver = StageResolver::new("6_7");
        let planner = PathPlanner::new(shared_roots(Path::new("out")), "hlsl");
        let source = SourceDescriptor::new("shaders/mesh/cull.task.hlsl", "shaders", &resolver);

        assert_eq!(planner.output_path(&source, OutputKind::IntermediateBinary).unwrap(), Path::new("out/metal/mesh/cull.task.dxil"));
        assert_eq!(planner.output_path(&source, OutputKind::AlternateBinary).unwrap(), Path::new("out/metal/mesh/cull.task.spirv"));
        assert_eq!(planner.output_path(&source, OutputKind::DependencyRecord).unwrap(), Path::new("out/deps/mesh/cull.task.d"));
        assert_eq!(planner.output_path(&source, OutputKind::NativeBinary).unwrap(), Path::new("out/metal/mesh/cull.task.metallib"));
        assert_eq!(planner.output_path(&source, OutputKind::ReflectionSidecar).unwrap(), Path::new("out/metal/mesh/cull.task.json"));
    }

    /// No two distinct (source, kind) pairs may share an output path, even with shared roots
    #[test]
    fn test_output_paths_are_injective() {
        let resolver = StageResolver::new("6_7");
        let planner = PathPlanner::new(shared_roots(Path::new("out")), "hlsl");
        let names = [
            "a.vert.hlsl",
            "a.frag.hlsl",
            "a.bogus.hlsl",
            "a.b.vert.hlsl",
            "a/b.vert.hlsl",
            "a/b/vert.hlsl",
            "deps/a.vert.hlsl",
            "metal/a.vert.hlsl",
            "x.vert.dxil.hlsl",
        ];

        let mut seen = HashSet::new();
        for name in names {
            let source = SourceDescriptor::new(Path::new("src").join(name), "src", &resolver);
            for kind in OutputKind::ALL {
                let path = planner.output_path(&source, kind).unwrap();
                assert!(seen.insert(path.clone()), "{name} ({kind}) collides at {}", path.display());
            }
        }
        assert_eq!(seen.len(), names.len() * OutputKind::ALL.len());
    }

    #[test]
    fn test_planning_is_deterministic_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = StageResolver::new("6_7");
        let planner = PathPlanner::new(shared_roots(dir.path()), "hlsl");
        let source = SourceDescriptor::new("src/deep/nested/a.comp.hlsl", "src", &resolver);

        let first = planner.plan(&source, OutputKind::DependencyRecord).unwrap();
        let second = planner.plan(&source, OutputKind::DependencyRecord).unwrap();
        assert_eq!(first, second);
        assert!(dir.path().join("deps/deep/nested").is_dir());
        assert_eq!(first.staging_path(), dir.path().join("deps/deep/nested/a.comp.d.partial"));
    }

    #[test]
    fn test_planning_rejects_foreign_sources() {
        let resolver = StageResolver::new("6_7");
        let planner = PathPlanner::new(shared_roots(Path::new("out")), "hlsl");

        let outside = SourceDescriptor::new("other/a.vert.hlsl", "src", &resolver);
        assert!(matches!(planner.output_path(&outside, OutputKind::IntermediateBinary), Err(PathPlanningError::OutsideSourceRoot { .. })));

        let wrong_extension = SourceDescriptor::new("src/a.vert.glsl", "src", &resolver);
        assert!(matches!(planner.output_path(&wrong_extension, OutputKind::IntermediateBinary), Err(PathPlanningError::UnexpectedExtension { .. })));
    }
}
