//! Source compilation.
//!
//! Source → `luau_compile` → bytecode copied into host memory.
//!
//! The compiler never fails outright on bad source: it emits a bytecode blob
//! that carries the diagnostic, and loading that blob reports the syntax
//! error. Only allocation failure and oversized output fail here.

use std::ffi::c_char;
use std::slice;

use serde::{Deserialize, Serialize};

use lunaria_sys as ffi;

use crate::error::{Error, Result};

/// Largest bytecode blob the bridge accepts.
pub const MAX_BYTECODE_SIZE: usize = 0x7FFF_FFC7;

/// Options controlling compilation output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// 0: no optimization, 1: baseline (debuggable), 2: inlining and unrolling
    pub optimization_level: u8,
    /// 0: none, 1: line info and function names, 2: full debug info
    pub debug_level: u8,
    /// 0: native modules only, 1: all modules
    pub type_info_level: u8,
    /// 0: none, 1: statement coverage, 2: statement and expression coverage
    pub coverage_level: u8,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimization_level: 1,
            debug_level: 1,
            type_info_level: 1,
            coverage_level: 2,
        }
    }
}

impl CompileOptions {
    pub fn with_optimization_level(mut self, level: u8) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    pub fn with_type_info_level(mut self, level: u8) -> Self {
        self.type_info_level = level;
        self
    }

    pub fn with_coverage_level(mut self, level: u8) -> Self {
        self.coverage_level = level;
        self
    }

    fn to_native(self) -> ffi::lua_CompileOptions {
        ffi::lua_CompileOptions {
            optimizationLevel: self.optimization_level.into(),
            debugLevel: self.debug_level.into(),
            typeInfoLevel: self.type_info_level.into(),
            coverageLevel: self.coverage_level.into(),
            ..Default::default()
        }
    }
}

/// Bytecode owned by the native allocator; freed on drop.
struct NativeBytecode {
    data: *mut c_char,
    len: usize,
}

impl NativeBytecode {
    fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data as *const u8, self.len) }
    }
}

impl Drop for NativeBytecode {
    fn drop(&mut self) {
        unsafe { ffi::luau_free(self.data) };
    }
}

/// Compile `source` to bytecode.
pub fn compile(source: impl AsRef<[u8]>, options: &CompileOptions) -> Result<Vec<u8>> {
    let source = source.as_ref();
    let mut native_options = options.to_native();
    let mut len = 0usize;
    let data = unsafe {
        ffi::luau_compile(
            source.as_ptr() as *const c_char,
            source.len(),
            &mut native_options,
            &mut len,
        )
    };
    if data.is_null() {
        return Err(Error::Resource("compiler could not allocate bytecode".into()));
    }
    let bytecode = NativeBytecode { data, len };
    if bytecode.len > MAX_BYTECODE_SIZE {
        return Err(Error::Resource(format!(
            "bytecode of {} bytes exceeds the {} byte limit",
            bytecode.len, MAX_BYTECODE_SIZE
        )));
    }
    tracing::trace!(source_len = source.len(), bytecode_len = bytecode.len, "compiled chunk");
    Ok(bytecode.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        let options = CompileOptions::default();
        assert_eq!(
            (
                options.optimization_level,
                options.debug_level,
                options.type_info_level,
                options.coverage_level
            ),
            (1, 1, 1, 2)
        );
        let native = options.with_optimization_level(2).to_native();
        assert_eq!(native.optimizationLevel, 2);
        assert!(native.vectorLib.is_null());
    }

    #[test]
    fn test_compile_produces_bytecode() {
        let bytecode = compile("return 1 + 1", &CompileOptions::default()).unwrap();
        assert!(!bytecode.is_empty());
        assert_ne!(bytecode[0], 0);
    }

    #[test]
    fn test_syntax_error_is_encoded() {
        // A zero version byte marks an error blob.
        let bytecode = compile("local = 1", &CompileOptions::default()).unwrap();
        assert_eq!(bytecode[0], 0);
    }
}
