//! Modules loaded from `.luau` files.

use std::path::{Path, PathBuf};

use super::{ModuleChunk, Requirer};
use crate::compiler::{compile, CompileOptions};
use crate::error::{Error, Result};
use crate::state::State;

/// Resolves `require(name)` to `<root>/<name>.luau`.
///
/// The cache key is the canonical path of the module file, so different
/// spellings of the same path share one cache entry.
#[derive(Debug, Clone)]
pub struct FileSystemRequirer {
    root: PathBuf,
    options: CompileOptions,
}

impl FileSystemRequirer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            options: CompileOptions::default(),
        }
    }

    /// Resolve modules against the process working directory.
    pub fn current_dir() -> Result<Self> {
        let root = std::env::current_dir()
            .map_err(|e| Error::runtime(format!("cannot read working directory: {}", e)))?;
        Ok(Self::new(root))
    }

    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> PathBuf {
        let mut path = self.root.join(name);
        if path.extension().is_none() {
            path.set_extension("luau");
        }
        path
    }
}

impl Requirer for FileSystemRequirer {
    fn cache_key(&self, name: &str) -> Result<String> {
        let path = self.resolve(name);
        let canonical = path
            .canonicalize()
            .map_err(|e| Error::runtime(format!("module '{}' not found: {}", name, e)))?;
        Ok(canonical.to_string_lossy().into_owned())
    }

    fn load(&self, _state: &State, cache_key: &str) -> Result<ModuleChunk> {
        let source = std::fs::read(cache_key)
            .map_err(|e| Error::runtime(format!("cannot read module {}: {}", cache_key, e)))?;
        Ok(ModuleChunk {
            chunk_name: format!("@{}", cache_key),
            bytecode: compile(&source, &self.options)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_adds_extension() {
        let requirer = FileSystemRequirer::new("/modules");
        assert_eq!(requirer.resolve("util"), PathBuf::from("/modules/util.luau"));
        assert_eq!(requirer.resolve("lib/util.lua"), PathBuf::from("/modules/lib/util.lua"));
    }

    #[test]
    fn test_equivalent_paths_share_a_key() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/util.luau"), "return 1").unwrap();

        let requirer = FileSystemRequirer::new(dir.path());
        let a = requirer.cache_key("lib/util").unwrap();
        let b = requirer.cache_key("lib/../lib/util.luau").unwrap();
        assert_eq!(a, b);
        assert!(requirer.cache_key("missing").is_err());
    }

    #[test]
    fn test_load_compiles_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("answer.luau"), "return 42").unwrap();

        let state = State::new().unwrap();
        let requirer = FileSystemRequirer::new(dir.path());
        let key = requirer.cache_key("answer").unwrap();
        let chunk = requirer.load(&state, &key).unwrap();
        assert!(chunk.chunk_name.starts_with('@'));
        assert_eq!(
            state.execute(&chunk.bytecode, Some(&chunk.chunk_name)).unwrap(),
            vec![42.0.into()]
        );
    }
}
