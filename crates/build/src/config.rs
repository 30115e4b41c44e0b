//! Build configuration
//!
//! A [`BuildConfig`] is parsed from a YAML file (camelCase keys, all optional except
//! `sourceRoot`) and may then be overridden from the command line. The value is passed
//! explicitly into every component; nothing reads process-global state.

use crate::error::ConfigError;
use serde::Deserialize;
use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

/// Default location of compiled intermediate and native binaries
pub const DEFAULT_SHADER_OUTPUT_ROOT: &str = "resources/shader_out/metal";
/// Default location of dependency records
pub const DEFAULT_DEPENDENCY_OUTPUT_ROOT: &str = "resources/shader_out/deps";

/// Complete configuration of a shader build
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildConfig {
    /// Root directory that is walked for shader sources
    pub source_root: PathBuf,
    /// Extension (without the dot) that identifies shader sources
    pub source_extension: String,
    /// Root for intermediate binaries (primary and alternate format)
    pub intermediate_output_root: PathBuf,
    /// Root for native binaries and reflection sidecars
    pub native_output_root: PathBuf,
    /// Root for dependency records
    pub dependency_output_root: PathBuf,

    /// Run the compiler in dependency-listing mode before compiling
    pub dependency_scan: bool,
    /// Emit the primary intermediate format (DXIL)
    pub emit_primary_intermediate_format: bool,
    /// Emit the alternate intermediate format (SPIR-V)
    pub emit_alternate_intermediate_format: bool,
    /// Convert the primary intermediate binary to the native format
    pub emit_native_format: bool,
    /// Ask the native converter for a reflection sidecar
    pub emit_reflection: bool,

    /// Shader compiler executable
    pub compiler: String,
    /// Native format converter executable
    pub converter: String,
    /// Version suffix appended to the shader model prefix (`vs` + `_` + `6_7`)
    pub shader_model_version: String,
    /// Shader entry point name
    pub entry_point: String,
    /// Embed debug information and source in the intermediate binaries
    pub debug_info: bool,
    /// Target environment passed to the compiler for the alternate format
    pub spirv_target_env: String,

    /// Maximum number of chains executed at once (defaults to the host's parallelism)
    pub max_concurrency: Option<NonZeroUsize>,
    /// Kill a step after this many seconds
    pub step_timeout_secs: Option<u64>,
    /// Echo every command line before dispatching it
    pub verbose: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::new(),
            source_extension: "hlsl".to_string(),
            intermediate_output_root: PathBuf::from(DEFAULT_SHADER_OUTPUT_ROOT),
            native_output_root: PathBuf::from(DEFAULT_SHADER_OUTPUT_ROOT),
            dependency_output_root: PathBuf::from(DEFAULT_DEPENDENCY_OUTPUT_ROOT),
            dependency_scan: true,
            emit_primary_intermediate_format: true,
            emit_alternate_intermediate_format: false,
            emit_native_format: true,
            emit_reflection: true,
            compiler: "dxc".to_string(),
            converter: "metal-shaderconverter".to_string(),
            shader_model_version: "6_7".to_string(),
            entry_point: "main".to_string(),
            debug_info: true,
            spirv_target_env: "vulkan1.3".to_string(),
            max_concurrency: None,
            step_timeout_secs: None,
            verbose: false,
        }
    }
}

impl BuildConfig {
    /// Creates a default configuration for the given source root
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration from YAML content
    ///
    /// Missing keys take their default values. The result is not validated yet.
    pub fn from_yaml(yaml_content: &str) -> Result<Self, ConfigError> {
        Ok(serde_norway::from_str(yaml_content)?)
    }

    /// Parses a configuration from a YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_norway::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Checks the configuration for values no build could run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingSourceRoot);
        }

        if self.source_extension.is_empty() || self.source_extension.contains('.') {
            return Err(ConfigError::InvalidSourceExtension(self.source_extension.clone()));
        }

        if !self.emit_primary_intermediate_format && !self.emit_alternate_intermediate_format {
            return Err(ConfigError::NoIntermediateFormat);
        }

        if self.step_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(())
    }

    /// Number of worker threads to schedule chains on
    pub fn effective_concurrency(&self) -> NonZeroUsize {
        self.max_concurrency.unwrap_or_else(|| std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN))
    }

    /// Per-step timeout, if one is configured
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let yaml = r#"
sourceRoot: resources/shaders/hlsl
nativeOutputRoot: out/native
emitAlternateIntermediateFormat: true
emitReflection: false
maxConcurrency: 4
stepTimeoutSecs: 30
"#;

        let config = BuildConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.source_root, PathBuf::from("resources/shaders/hlsl"));
        assert_eq!(config.native_output_root, PathBuf::from("out/native"));
        assert_eq!(config.intermediate_output_root, PathBuf::from(DEFAULT_SHADER_OUTPUT_ROOT));
        assert!(config.emit_alternate_intermediate_format);
        assert!(!config.emit_reflection);
        assert!(config.emit_native_format);
        assert_eq!(config.effective_concurrency().get(), 4);
        assert_eq!(config.step_timeout(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_unknown_keys_and_zero_concurrency() {
        assert!(BuildConfig::from_yaml("sourceRoot: a\nemitNative: true\n").is_err());
        assert!(BuildConfig::from_yaml("sourceRoot: a\nmaxConcurrency: 0\n").is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(BuildConfig::default().validate(), Err(ConfigError::MissingSourceRoot)));

        let mut config = BuildConfig::new("shaders");
        config.step_timeout_secs = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));

        let mut config = BuildConfig::new("shaders");
        config.emit_primary_intermediate_format = false;
        assert!(matches!(config.validate(), Err(ConfigError::NoIntermediateFormat)));

        let mut config = BuildConfig::new("shaders");
        config.source_extension = ".hlsl".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSourceExtension(_))));
    }
}
