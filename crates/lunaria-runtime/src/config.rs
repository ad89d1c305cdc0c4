//! Runtime configuration (lunaria.toml)
//!
//! ```toml
//! [compile]
//! optimization_level = 2
//! debug_level = 1
//!
//! [runtime]
//! libraries = ["base", "string", "table", "coroutine"]
//! module_root = "scripts"
//! require = true
//! wait = true
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use std::path::{Path, PathBuf};

use lunaria::CompileOptions;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Standard libraries a script may ask for by name.
pub const STANDARD_LIBRARIES: &[&str] = &[
    "base",
    "coroutine",
    "table",
    "os",
    "string",
    "bit32",
    "buffer",
    "utf8",
    "math",
    "debug",
];

/// Options for building a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Compiler settings for scripts and modules
    pub compile: CompileOptions,

    /// Environment exposed to scripts
    pub runtime: EnvironmentOptions,
}

/// Globals and host functions installed into a new runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentOptions {
    /// Standard libraries to open (default: all of them)
    #[serde(default = "default_libraries")]
    pub libraries: Vec<String>,

    /// Directory `require` resolves modules against (default: working directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_root: Option<PathBuf>,

    /// Install the global `require` (default: true)
    #[serde(default = "default_true")]
    pub require: bool,

    /// Install the global `wait(seconds)` (default: true)
    #[serde(default = "default_true")]
    pub wait: bool,
}

fn default_libraries() -> Vec<String> {
    STANDARD_LIBRARIES.iter().map(|name| name.to_string()).collect()
}

fn default_true() -> bool {
    true
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            libraries: default_libraries(),
            module_root: None,
            require: true,
            wait: true,
        }
    }
}

impl RuntimeOptions {
    /// Parse options from a file
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        let mut options = Self::from_toml_str(&content)?;

        // A relative module root is relative to the config file.
        if let (Some(root), Some(dir)) = (&options.runtime.module_root, path.parent()) {
            if root.is_relative() {
                options.runtime.module_root = Some(dir.join(root));
            }
        }
        Ok(options)
    }

    /// Parse options from a string
    pub fn from_toml_str(content: &str) -> Result<Self, RuntimeError> {
        let options: RuntimeOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Check option values that TOML alone cannot constrain.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        for name in &self.runtime.libraries {
            if !STANDARD_LIBRARIES.contains(&name.as_str()) {
                return Err(RuntimeError::InvalidOption(format!(
                    "unknown library '{}'. Expected one of: {}",
                    name,
                    STANDARD_LIBRARIES.join(", ")
                )));
            }
        }

        let levels = [
            ("optimization_level", self.compile.optimization_level, 2),
            ("debug_level", self.compile.debug_level, 2),
            ("type_info_level", self.compile.type_info_level, 1),
            ("coverage_level", self.compile.coverage_level, 2),
        ];
        for (key, value, max) in levels {
            if value > max {
                return Err(RuntimeError::InvalidOption(format!(
                    "compile.{} must be between 0 and {}, got {}",
                    key, max, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let options = RuntimeOptions::from_toml_str("").unwrap();
        assert_eq!(options, RuntimeOptions::default());
        assert_eq!(options.runtime.libraries.len(), STANDARD_LIBRARIES.len());
        assert!(options.runtime.require);
        assert!(options.runtime.wait);
        assert_eq!(options.compile, CompileOptions::default());
    }

    #[test]
    fn test_parse_full_config() {
        let options = RuntimeOptions::from_toml_str(
            r#"
            [compile]
            optimization_level = 2
            debug_level = 0

            [runtime]
            libraries = ["base", "math"]
            module_root = "scripts"
            wait = false
            "#,
        )
        .unwrap();

        assert_eq!(options.compile.optimization_level, 2);
        assert_eq!(options.compile.debug_level, 0);
        assert_eq!(options.compile.coverage_level, 2);
        assert_eq!(options.runtime.libraries, vec!["base", "math"]);
        assert_eq!(options.runtime.module_root, Some(PathBuf::from("scripts")));
        assert!(options.runtime.require);
        assert!(!options.runtime.wait);
    }

    #[test]
    fn test_unknown_library_rejected() {
        let err = RuntimeOptions::from_toml_str("[runtime]\nlibraries = [\"io\"]").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidOption(ref m) if m.contains("'io'")));
    }

    #[test]
    fn test_level_out_of_range() {
        let err = RuntimeOptions::from_toml_str("[compile]\noptimization_level = 3").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidOption(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = RuntimeOptions::from_toml_str("[runtime\nwait = true").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn test_module_root_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lunaria.toml");
        std::fs::write(&path, "[runtime]\nmodule_root = \"lib\"").unwrap();
        let options = RuntimeOptions::from_file(&path).unwrap();
        assert_eq!(options.runtime.module_root, Some(dir.path().join("lib")));
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut options = RuntimeOptions::default();
        options.runtime.libraries = vec!["base".into()];
        let text = toml::to_string(&options).unwrap();
        assert_eq!(RuntimeOptions::from_toml_str(&text).unwrap(), options);
    }
}
