//! A configured Luau state ready to run scripts.

use std::path::Path;

use lunaria::{compile, CancellationToken, FileSystemRequirer, State, Value};

use crate::builtins;
use crate::config::RuntimeOptions;
use crate::error::RuntimeError;

/// One VM heap set up according to [`RuntimeOptions`].
///
/// # Example
///
/// ```rust,ignore
/// use lunaria_runtime::{Runtime, RuntimeOptions};
///
/// let runtime = Runtime::new(RuntimeOptions::default())?;
/// let values = runtime.run_source("return 6 * 7", "answer")?;
/// ```
pub struct Runtime {
    state: State,
    options: RuntimeOptions,
}

impl Runtime {
    /// Create a state and install the configured libraries and globals.
    pub fn new(options: RuntimeOptions) -> Result<Self, RuntimeError> {
        options.validate()?;
        let state = State::new()?;

        for name in &options.runtime.libraries {
            state.open_library_by_name(name)?;
        }

        if options.runtime.require {
            let requirer = match &options.runtime.module_root {
                Some(root) => FileSystemRequirer::new(root),
                None => FileSystemRequirer::current_dir()?,
            };
            let requirer = requirer.with_compile_options(options.compile);
            tracing::debug!(root = %requirer.root().display(), "installing require");
            state.open_require(requirer)?;
        }

        if options.runtime.wait {
            let wait = builtins::create_wait(&state)?;
            state.set_global("wait", &wait)?;
        }

        tracing::debug!(libraries = ?options.runtime.libraries, "runtime ready");
        Ok(Self { state, options })
    }

    /// The underlying state.
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Compile and run `source`, reporting errors under `chunk_name`.
    pub fn run_source(&self, source: &str, chunk_name: &str) -> Result<Vec<Value>, RuntimeError> {
        let bytecode = compile(source, &self.options.compile)?;
        Ok(self.state.execute(&bytecode, Some(&format!("={}", chunk_name)))?)
    }

    /// Like [`run_source`](Self::run_source), awaiting asynchronous host
    /// functions such as `wait`.
    pub async fn run_source_async(
        &self,
        source: &str,
        chunk_name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let bytecode = compile(source, &self.options.compile)?;
        let chunk = format!("={}", chunk_name);
        Ok(self.state.execute_async(&bytecode, Some(&chunk), cancel).await?)
    }

    /// Run a script file.
    pub fn run_file(&self, path: &Path) -> Result<Vec<Value>, RuntimeError> {
        let source = std::fs::read_to_string(path)?;
        let bytecode = compile(&source, &self.options.compile)?;
        Ok(self.state.execute(&bytecode, Some(&file_chunk_name(path)))?)
    }

    /// Run a script file, awaiting asynchronous host functions.
    pub async fn run_file_async(
        &self,
        path: &Path,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let source = std::fs::read_to_string(path)?;
        let bytecode = compile(&source, &self.options.compile)?;
        Ok(self
            .state
            .execute_async(&bytecode, Some(&file_chunk_name(path)), cancel)
            .await?)
    }
}

fn file_chunk_name(path: &Path) -> String {
    format!("@{}", path.display())
}
