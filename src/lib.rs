#![forbid(unsafe_code)]

//! Viper IL virtual machine.
//!
//! The IL data model lives in [`il`], the interpreter and trap subsystem in [`vm`] and the
//! native runtime library in [`rt`]. [`Runner`] wires them together the way the `viper`
//! binary does.

use std::process;
use std::sync::Arc;

use tracing::debug;

/// IL modules, functions, blocks and instructions.
pub use viper_il as il;

/// Native runtime helpers.
pub use viper_rt as rt;

/// Dispatch engine, traps and the native bridge.
pub use viper_vm as vm;

pub use viper_il::Module;
pub use viper_rt::Runtime;
pub use viper_vm::{
    NativeRegistry, RegistryError, RunConfig, RuntimeContext, Trap, TrapKind, Value, Vm,
};

/// Runs modules against the standard runtime library.
///
/// A runner owns one [`Runtime`] (monitors, heap, console) and the registry built from it;
/// every VM it creates shares both, so VMs on different threads see the same monitors.
pub struct Runner {
    config: RunConfig,
    runtime: Runtime,
    natives: NativeRegistry,
}

impl Runner {
    /// A runner that reports traps on stderr.
    pub fn new(config: RunConfig) -> Result<Self, RegistryError> {
        Self::with_runtime(config, Runtime::new(Arc::new(RuntimeContext::stderr())))
    }

    /// A runner over an existing runtime, e.g. one with a captured diagnostic or output sink.
    pub fn with_runtime(config: RunConfig, runtime: Runtime) -> Result<Self, RegistryError> {
        let mut natives = NativeRegistry::new();
        runtime.register(&mut natives)?;
        Ok(Self {
            config,
            runtime,
            natives,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        self.runtime.context()
    }

    /// Extra natives for embedders. Must be registered before creating VMs that use them.
    pub fn natives_mut(&mut self) -> &mut NativeRegistry {
        &mut self.natives
    }

    /// Creates a VM for `module` with this runner's natives and configuration.
    pub fn vm(&self, module: Arc<Module>) -> Vm {
        Vm::new(
            module,
            &self.natives,
            self.config.clone(),
            Arc::clone(self.runtime.context()),
        )
    }

    pub fn run(&self, module: Arc<Module>, entry: &str, args: Vec<Value>) -> Result<Value, Trap> {
        self.vm(module).run(entry, args)
    }

    pub fn run_main(&self, module: Arc<Module>) -> Result<i64, Trap> {
        self.vm(module).run_main()
    }

    /// Terminates the process with the trap's exit status.
    ///
    /// The diagnostic line was already written when the trap was raised.
    pub fn report_and_exit(trap: &Trap) -> ! {
        debug!(kind = %trap.kind, status = trap.exit_status(), "exiting on trap");
        process::exit(trap.exit_status())
    }
}

/// Maps `main`'s return value to a process status, saturating at the `i32` bounds.
///
/// The host may still truncate the status further; Unix keeps only the low 8 bits.
pub fn exit_status(code: i64) -> i32 {
    i32::try_from(code).unwrap_or(if code < 0 { i32::MIN } else { i32::MAX })
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("natives", &self.natives)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_saturates_instead_of_wrapping() {
        assert_eq!(exit_status(3), 3);
        assert_eq!(exit_status(-1), -1);
        assert_eq!(exit_status(1 << 32), i32::MAX);
        assert_eq!(exit_status(i64::MIN), i32::MIN);
    }
}
