//! Lunaria Runtime
//!
//! Builds a ready-to-use Luau state on top of the `lunaria` bridge: opens the
//! configured standard libraries, installs a filesystem-backed `require` and
//! the asynchronous `wait` timer, and runs source strings or script files.
//!
//! Options come from [`RuntimeOptions`], usually loaded from a TOML file.

pub mod builtins;
pub mod config;
pub mod error;
mod runtime;

pub use config::{EnvironmentOptions, RuntimeOptions, STANDARD_LIBRARIES};
pub use error::RuntimeError;
pub use runtime::Runtime;
