//! Shader source discovery
//!
//! Walks a source root recursively and yields every file carrying the configured
//! extension. Entries are visited sorted by file name, so the order only depends on the
//! tree's contents and not on the filesystem.

use crate::{
    error::{DiscoveryError, PathPlanningError},
    stage::{StageResolver, StageTag},
};
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// A discovered shader source with its resolved stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    path: PathBuf,
    source_root: PathBuf,
    stage: StageTag,
    shader_model: Option<String>,
}

impl SourceDescriptor {
    /// Describes `path`, discovered below `source_root`, resolving its stage with `resolver`
    pub fn new(path: impl Into<PathBuf>, source_root: impl Into<PathBuf>, resolver: &StageResolver) -> Self {
        let path = path.into();
        let (stage, shader_model) = resolver.resolve(&path);
        Self {
            path,
            source_root: source_root.into(),
            stage,
            shader_model,
        }
    }

    /// Path of the source file as discovered
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root the source was discovered under
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Stage tag taken from the file name
    pub fn stage(&self) -> &StageTag {
        &self.stage
    }

    /// Shader-model identifier, `None` for unknown stages
    pub fn shader_model(&self) -> Option<&str> {
        self.shader_model.as_deref()
    }

    /// Path of the source relative to its source root
    pub fn relative_path(&self) -> Result<&Path, PathPlanningError> {
        self.path
            .strip_prefix(&self.source_root)
            .ok()
            .filter(|relative| relative.file_name().is_some())
            .ok_or_else(|| PathPlanningError::OutsideSourceRoot {
                path: self.path.clone(),
                root: self.source_root.clone(),
            })
    }
}

/// Recursive listing of shader sources under one root
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    root: PathBuf,
    extension: String,
}

impl SourceCatalog {
    /// Opens a catalog over `root`, matching files whose final extension is `extension`
    ///
    /// # Errors
    /// Returns [`DiscoveryError`] if `root` is not a readable directory.
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self, DiscoveryError> {
        let root = root.into();
        let metadata = std::fs::metadata(&root).map_err(|source| DiscoveryError::UnreadableRoot { root: root.clone(), source })?;
        if !metadata.is_dir() {
            return Err(DiscoveryError::NotADirectory(root));
        }
        std::fs::read_dir(&root).map_err(|source| DiscoveryError::UnreadableRoot { root: root.clone(), source })?;

        Ok(Self {
            root,
            extension: extension.into(),
        })
    }

    /// Root directory of this catalog
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walks the tree, yielding matching file paths
    pub fn files(&self) -> impl Iterator<Item = Result<PathBuf, DiscoveryError>> + '_ {
        WalkDir::new(&self.root).sort_by_file_name().into_iter().filter_map(move |entry| match entry {
            Ok(entry) => {
                let path = entry.into_path();
                (path.is_file() && self.matches(&path)).then_some(Ok(path))
            }
            Err(source) => Some(Err(DiscoveryError::Walk { root: self.root.clone(), source })),
        })
    }

    /// Walks the whole tree and describes every matching file
    pub fn discover(&self, resolver: &StageResolver) -> Result<Vec<SourceDescriptor>, DiscoveryError> {
        self.files().map(|path| path.map(|path| SourceDescriptor::new(path, &self.root, resolver))).collect()
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension().is_some_and(|extension| extension == OsStr::new(&self.extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ShaderStage;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "float4 main() : SV_Target { return 0; }").unwrap();
    }

    #[test]
    fn test_discovery_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.frag.hlsl");
        touch(dir.path(), "a.vert.hlsl");
        touch(dir.path(), "shared/common.h");
        touch(dir.path(), "sub/c.comp.hlsl");
        touch(dir.path(), "sub/notes.xhlsl");

        let catalog = SourceCatalog::new(dir.path(), "hlsl").unwrap();
        let files: Vec<_> = catalog.files().map(Result::unwrap).collect();
        let relative: Vec<_> = files.iter().map(|path| path.strip_prefix(dir.path()).unwrap().to_path_buf()).collect();
        assert_eq!(relative, [PathBuf::from("a.vert.hlsl"), PathBuf::from("b.frag.hlsl"), PathBuf::from("sub/c.comp.hlsl")]);

        let sources = catalog.discover(&StageResolver::new("6_7")).unwrap();
        assert_eq!(sources[2].stage(), &StageTag::Known(ShaderStage::Compute));
        assert_eq!(sources[2].shader_model(), Some("cs_6_7"));
        assert_eq!(sources[2].relative_path().unwrap(), Path::new("sub/c.comp.hlsl"));
    }

    #[test]
    fn test_discovery_rejects_bad_roots() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(SourceCatalog::new(dir.path().join("missing"), "hlsl"), Err(DiscoveryError::UnreadableRoot { .. })));

        touch(dir.path(), "file.vert.hlsl");
        assert!(matches!(SourceCatalog::new(dir.path().join("file.vert.hlsl"), "hlsl"), Err(DiscoveryError::NotADirectory(_))));
    }

    #[test]
    fn test_relative_path_outside_root() {
        let source = SourceDescriptor::new("/elsewhere/a.vert.hlsl", "/shaders", &StageResolver::new("6_7"));
        assert!(matches!(source.relative_path(), Err(PathPlanningError::OutsideSourceRoot { .. })));
    }
}
