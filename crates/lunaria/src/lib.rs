//! Lunaria - host embedding layer for the Luau VM
//!
//! Lunaria drives a Luau VM from Rust: it creates states, compiles and runs
//! chunks, moves values across the boundary and resumes coroutines, either
//! synchronously or on a tokio runtime where host functions may await.
//!
//! # Architecture
//!
//! ```text
//! Host ──► State (main / thread) ──► Runner ──► lua_resume loop
//!   │           │                                  │
//!   │           └─ identity cache (pointer → wrapper)
//!   │                                              ▼
//!   └─ Table / Function / UserData / Buffer ◄── registry slots
//! ```
//!
//! - [`State`]: one native execution context; the main state owns the heap
//! - [`Value`]: tagged copy of any Luau value, heap objects as handles
//! - [`Table`], [`Function`], [`UserData`], [`Buffer`]: registry-pinned handles
//! - [`compile`]: source to bytecode
//! - [`Requirer`]: pluggable `require` with a per-heap module cache
//!
//! # Example
//!
//! ```ignore
//! use lunaria::State;
//!
//! let state = State::new()?;
//! state.open_libraries()?;
//! let results = state.do_string("return 1 + 2")?;
//! assert_eq!(results[0].read::<i64>()?, 3);
//! ```
//!
//! States are single-threaded: none of the wrapper types are `Send`.

pub mod buffer;
mod callback;
pub mod cancel;
pub mod compiler;
pub mod convert;
pub mod error;
pub mod function;
pub mod registry;
pub mod require;
mod runner;
pub mod state;
pub mod table;
pub mod userdata;
mod util;
pub mod value;

pub use buffer::Buffer;
pub use cancel::CancellationToken;
pub use compiler::{compile, CompileOptions};
pub use convert::FromValue;
pub use error::{Error, Result};
pub use function::Function;
pub use registry::RegistryStats;
pub use require::{FileSystemRequirer, ModuleChunk, Requirer};
pub use state::{Library, State, ThreadStatus, DEFAULT_CHUNK_NAME};
pub use table::{Pairs, Table};
pub use userdata::UserData;
pub use value::{LightUserData, LuauString, Value, ValueKind, Vector};

/// Raw C API declarations.
pub use lunaria_sys as ffi;
