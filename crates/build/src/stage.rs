//! Shader stage resolution from file names
//!
//! Sources follow the `<name>.<stage>.<ext>` naming convention, e.g. `gbuffer.frag.hlsl`.
//! The stage segment selects the shader-model prefix through a fixed table; anything
//! outside that table resolves to [`StageTag::Unknown`] instead of a guessed prefix.

use regex::Regex;
use std::{fmt, path::Path, sync::LazyLock};

/// `<name>.<stage>.<ext>`, where the stage is the second-to-last dot segment
static STAGE_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?<name>.+)\.(?<stage>[^.]+)\.(?<ext>[^.]+)$").unwrap());

/// Pipeline stage of a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Mesh,
    /// Amplification stage in DirectX terms
    Task,
    Compute,
}

impl ShaderStage {
    /// Every supported stage, in table order
    pub const ALL: [ShaderStage; 5] = [Self::Vertex, Self::Fragment, Self::Mesh, Self::Task, Self::Compute];

    /// Looks up a stage by its file-name tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.tag() == tag)
    }

    /// File-name tag of this stage
    pub fn tag(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Mesh => "mesh",
            Self::Task => "task",
            Self::Compute => "comp",
        }
    }

    /// Compiler-facing shader-model prefix of this stage
    pub fn shader_model_prefix(self) -> &'static str {
        match self {
            Self::Vertex => "vs",
            Self::Fragment => "ps",
            Self::Mesh => "ms",
            Self::Task => "as",
            Self::Compute => "cs",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Stage tag extracted from a file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StageTag {
    Known(ShaderStage),
    /// The raw segment did not match any stage (empty if the name has no stage segment)
    Unknown(String),
}

impl StageTag {
    /// Extracts the stage tag from the file name of `path`
    pub fn from_path(path: &Path) -> Self {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            return Self::Unknown(String::new());
        };

        match STAGE_FILE_NAME.captures(file_name) {
            Some(captures) => {
                let tag = &captures["stage"];
                ShaderStage::from_tag(tag).map_or_else(|| Self::Unknown(tag.to_string()), Self::Known)
            }
            None => Self::Unknown(String::new()),
        }
    }

    /// The stage, unless the tag is unknown
    pub fn stage(&self) -> Option<ShaderStage> {
        match self {
            Self::Known(stage) => Some(*stage),
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for StageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(stage) => write!(f, "{stage}"),
            Self::Unknown(tag) => write!(f, "{tag}"),
        }
    }
}

/// Maps source files to their stage and shader-model identifier
#[derive(Debug, Clone)]
pub struct StageResolver {
    shader_model_version: String,
}

impl StageResolver {
    /// Creates a resolver producing shader models with the given version suffix (e.g. `6_7`)
    pub fn new(shader_model_version: impl Into<String>) -> Self {
        Self {
            shader_model_version: shader_model_version.into(),
        }
    }

    /// Shader-model identifier for a stage, e.g. `ps_6_7`
    pub fn shader_model(&self, stage: ShaderStage) -> String {
        format!("{}_{}", stage.shader_model_prefix(), self.shader_model_version)
    }

    /// Resolves the stage tag of `path` and, when it is known, its shader model
    pub fn resolve(&self, path: &Path) -> (StageTag, Option<String>) {
        let tag = StageTag::from_path(path);
        let shader_model = tag.stage().map(|stage| self.shader_model(stage));
        (tag, shader_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tag_extraction() {
        assert_eq!(StageTag::from_path(Path::new("foo.vert.hlsl")), StageTag::Known(ShaderStage::Vertex));
        assert_eq!(StageTag::from_path(Path::new("dir/a.b.frag.hlsl")), StageTag::Known(ShaderStage::Fragment));
        assert_eq!(StageTag::from_path(Path::new("cull.task.hlsl")), StageTag::Known(ShaderStage::Task));
        assert_eq!(StageTag::from_path(Path::new("c.bogus.hlsl")), StageTag::Unknown("bogus".to_string()));
        assert_eq!(StageTag::from_path(Path::new("plain.hlsl")), StageTag::Unknown(String::new()));
        assert_eq!(StageTag::from_path(Path::new(".vert.hlsl")), StageTag::Unknown(String::new()));
    }

    #[test]
    fn test_shader_model_table() {
        let resolver = StageResolver::new("6_7");
        let models: Vec<_> = ShaderStage::ALL.into_iter().map(|stage| resolver.shader_model(stage)).collect();
        assert_eq!(models, ["vs_6_7", "ps_6_7", "ms_6_7", "as_6_7", "cs_6_7"]);

        for stage in ShaderStage::ALL {
            assert_eq!(ShaderStage::from_tag(stage.tag()), Some(stage));
        }
    }

    #[test]
    fn test_unknown_stage_has_no_shader_model() {
        let resolver = StageResolver::new("6_7");
        assert_eq!(resolver.resolve(Path::new("x.geom.hlsl")), (StageTag::Unknown("geom".to_string()), None));
        assert_eq!(resolver.resolve(Path::new("x.comp.hlsl")), (StageTag::Known(ShaderStage::Compute), Some("cs_6_7".to_string())));
    }
}
