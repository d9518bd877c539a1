#![forbid(unsafe_code)]

//! Virtual machine for the Viper IL.
//!
//! - [`Vm`] walks a shared [`viper_il::Module`] with either dispatch strategy.
//! - [`RuntimeContext`] is the single trap channel for VM-detected and native faults.
//! - [`NativeRegistry`] maps extern symbols to native implementations for the bridge.

/// Native call bridge and symbol registry.
pub mod bridge;

/// Run configuration and dispatch selection.
pub mod config;

/// Label, line and step breakpoints.
pub mod debug;

mod dispatch;

/// Frames and the bounded `alloca` allocator.
pub mod frame;

mod ops;

/// Trap kinds, records, rendering and the runtime context.
pub mod trap;

/// VM values.
pub mod value;

mod vm;

pub use bridge::{AbiValue, NativeFn, NativeRegistry, NativeSig, RegistryError};
pub use config::{ConfigError, DISPATCH_ENV, DispatchKind, RunConfig};
pub use debug::{BreakEvent, BreakReason, DebugCtrl, PAUSE_STATUS};
pub use frame::{DEFAULT_STACK_BYTES, StackAllocator, StackError};
pub use trap::{BufferSink, DiagnosticSink, RuntimeContext, StderrSink, Trap, TrapKind, TrapSite};
pub use value::{ObjRef, Ptr, Value};
pub use vm::Vm;

#[cfg(feature = "serde")]
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to load module: {0}")]
    Binary(#[from] bitcode::Error),
    #[error("failed to load module: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to load module: {0}")]
    Index(#[from] viper_il::BuildError),
}

/// Decodes a module from its binary encoding and validates it like [`load_module_json`].
#[cfg(feature = "serde")]
pub fn load_module(bytes: &[u8]) -> Result<viper_il::Module, LoadError> {
    let mut module: viper_il::Module = bitcode::deserialize(bytes)?;
    module.reindex()?;
    Ok(module)
}

/// Encodes a module in the binary form read by [`load_module`].
#[cfg(feature = "serde")]
pub fn save_module(module: &viper_il::Module) -> Result<Vec<u8>, LoadError> {
    Ok(bitcode::serialize(module)?)
}

/// Parses a module from JSON. Name maps may be omitted; they are rebuilt from the tables.
///
/// Blocks are re-checked with the builder rules and slot ids are bounded by
/// [`viper_il::MAX_SLOTS`], so a hostile file cannot request an oversized frame.
#[cfg(feature = "serde")]
pub fn load_module_json(text: &str) -> Result<viper_il::Module, LoadError> {
    let mut module: viper_il::Module = serde_json::from_str(text)?;
    module.reindex()?;
    Ok(module)
}
