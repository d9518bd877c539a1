//! Native runtime library for the Viper VM.
//!
//! [`Runtime::register`] installs every `rt_*` helper into a [`NativeRegistry`]. Helpers
//! validate their arguments and report faults through the shared [`RuntimeContext`], so
//! their traps render and attribute exactly like traps raised by the dispatch loop.

#![forbid(unsafe_code)]

mod console;
mod heap;
mod math;
mod monitor;
mod strings;

use std::sync::Arc;

use tracing::debug;
use viper_il::Type;
use viper_vm::{
    AbiValue, NativeRegistry, NativeSig, ObjRef, RegistryError, RuntimeContext, Trap, TrapKind,
};

pub use console::{CapturedOutput, OutputSink, StdoutSink};
pub use heap::ObjectHeap;
pub use monitor::MonitorTable;
pub use strings::format_f64;

/// Shared state behind the native helpers.
///
/// Cloning is cheap; clones share the same monitors, heap and output.
#[derive(Clone)]
pub struct Runtime {
    ctx: Arc<RuntimeContext>,
    monitors: Arc<MonitorTable>,
    heap: Arc<ObjectHeap>,
    out: Arc<dyn OutputSink>,
}

impl Runtime {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self {
            monitors: Arc::new(MonitorTable::new(Arc::clone(&ctx))),
            heap: Arc::new(ObjectHeap::new()),
            out: Arc::new(StdoutSink),
            ctx,
        }
    }

    /// Redirects console output.
    pub fn with_output(mut self, out: Arc<dyn OutputSink>) -> Self {
        self.out = out;
        self
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    pub fn monitors(&self) -> &Arc<MonitorTable> {
        &self.monitors
    }

    pub fn heap(&self) -> &Arc<ObjectHeap> {
        &self.heap
    }

    /// Installs all runtime helpers.
    pub fn register(&self, natives: &mut NativeRegistry) -> Result<(), RegistryError> {
        let before = natives.len();
        self.register_monitor_fns(natives)?;
        register_math_fns(natives)?;
        self.register_heap_fns(natives)?;
        register_string_fns(natives)?;
        self.register_console_fns(natives)?;
        natives.register(
            "rt_trap",
            NativeSig::new([Type::Str], Type::Void),
            |rt, args| match args {
                [AbiValue::Str(msg)] => Err(rt.trap(TrapKind::DomainError, msg.to_string())),
                other => Err(bad_args(rt, "rt_trap", other)),
            },
        )?;
        debug!(helpers = natives.len() - before, "runtime helpers registered");
        Ok(())
    }

    fn register_monitor_fns(&self, natives: &mut NativeRegistry) -> Result<(), RegistryError> {
        type ObjOp = fn(&MonitorTable, ObjRef) -> Result<(), Trap>;
        let unit_ops: [(&'static str, ObjOp); 5] = [
            ("rt_monitor_enter", MonitorTable::enter),
            ("rt_monitor_exit", MonitorTable::exit),
            ("rt_monitor_wait", MonitorTable::wait),
            ("rt_monitor_pause", MonitorTable::pause),
            ("rt_monitor_pause_all", MonitorTable::pause_all),
        ];
        for (name, op) in unit_ops {
            let monitors = Arc::clone(&self.monitors);
            natives.register(
                name,
                NativeSig::new([Type::Obj], Type::Void),
                move |rt, args| match args {
                    [AbiValue::Obj(obj)] => op(&*monitors, *obj).map(|()| AbiValue::Void),
                    other => Err(bad_args(rt, name, other)),
                },
            )?;
        }

        let monitors = Arc::clone(&self.monitors);
        natives.register(
            "rt_monitor_try_enter",
            NativeSig::new([Type::Obj], Type::I1),
            move |rt, args| match args {
                [AbiValue::Obj(obj)] => monitors.try_enter(*obj).map(AbiValue::Bool),
                other => Err(bad_args(rt, "rt_monitor_try_enter", other)),
            },
        )?;

        type TimedOp = fn(&MonitorTable, ObjRef, i64) -> Result<bool, Trap>;
        let timed_ops: [(&'static str, TimedOp); 2] = [
            ("rt_monitor_try_enter_for", MonitorTable::try_enter_for),
            ("rt_monitor_wait_for", MonitorTable::wait_for),
        ];
        for (name, op) in timed_ops {
            let monitors = Arc::clone(&self.monitors);
            natives.register(
                name,
                NativeSig::new([Type::Obj, Type::I64], Type::I1),
                move |rt, args| match args {
                    [AbiValue::Obj(obj), AbiValue::Int(ms)] => {
                        op(&*monitors, *obj, *ms).map(AbiValue::Bool)
                    }
                    other => Err(bad_args(rt, name, other)),
                },
            )?;
        }
        Ok(())
    }

    fn register_heap_fns(&self, natives: &mut NativeRegistry) -> Result<(), RegistryError> {
        let heap = Arc::clone(&self.heap);
        natives.register(
            "rt_alloc",
            NativeSig::new([Type::I64], Type::Obj),
            move |rt, args| match args {
                [AbiValue::Int(bytes)] => heap.alloc(rt, *bytes).map(AbiValue::Obj),
                other => Err(bad_args(rt, "rt_alloc", other)),
            },
        )?;

        let heap = Arc::clone(&self.heap);
        natives.register(
            "rt_obj_size",
            NativeSig::new([Type::Obj], Type::I64),
            move |rt, args| match args {
                [AbiValue::Obj(obj)] if obj.is_null() => {
                    Err(rt.trap(TrapKind::NullPointer, "rt_obj_size: null object"))
                }
                [AbiValue::Obj(obj)] => match heap.size_of(*obj) {
                    Some(size) => Ok(AbiValue::Int(size as i64)),
                    None => Err(rt.trap(
                        TrapKind::InvalidOperation,
                        format!("rt_obj_size: unknown object #{}", obj.0),
                    )),
                },
                other => Err(bad_args(rt, "rt_obj_size", other)),
            },
        )?;
        Ok(())
    }

    fn register_console_fns(&self, natives: &mut NativeRegistry) -> Result<(), RegistryError> {
        let out = Arc::clone(&self.out);
        natives.register(
            "rt_print_i64",
            NativeSig::new([Type::I64], Type::Void),
            move |rt, args| match args {
                [AbiValue::Int(v)] => print_line(rt, &*out, "rt_print_i64", &v.to_string()),
                other => Err(bad_args(rt, "rt_print_i64", other)),
            },
        )?;

        let out = Arc::clone(&self.out);
        natives.register(
            "rt_print_f64",
            NativeSig::new([Type::F64], Type::Void),
            move |rt, args| match args {
                [AbiValue::Float(v)] => print_line(rt, &*out, "rt_print_f64", &format_f64(*v)),
                other => Err(bad_args(rt, "rt_print_f64", other)),
            },
        )?;

        let out = Arc::clone(&self.out);
        natives.register(
            "rt_print_str",
            NativeSig::new([Type::Str], Type::Void),
            move |rt, args| match args {
                [AbiValue::Str(s)] => print_line(rt, &*out, "rt_print_str", s),
                other => Err(bad_args(rt, "rt_print_str", other)),
            },
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("heap", &self.heap)
            .finish_non_exhaustive()
    }
}

fn register_math_fns(natives: &mut NativeRegistry) -> Result<(), RegistryError> {
    natives.register(
        "rt_pow_f64_chkdom",
        NativeSig::new([Type::F64, Type::F64], Type::F64),
        |rt, args| match args {
            [AbiValue::Float(base), AbiValue::Float(exp)] => {
                math::pow_checked(rt, *base, *exp).map(AbiValue::Float)
            }
            other => Err(bad_args(rt, "rt_pow_f64_chkdom", other)),
        },
    )?;
    natives.register(
        "rt_sqrt",
        NativeSig::new([Type::F64], Type::F64),
        |rt, args| match args {
            [AbiValue::Float(x)] => math::sqrt_checked(rt, *x).map(AbiValue::Float),
            other => Err(bad_args(rt, "rt_sqrt", other)),
        },
    )?;
    natives.register(
        "rt_floor",
        NativeSig::new([Type::F64], Type::F64),
        |rt, args| match args {
            [AbiValue::Float(x)] => Ok(AbiValue::Float(x.floor())),
            other => Err(bad_args(rt, "rt_floor", other)),
        },
    )?;
    natives.register(
        "rt_abs_i64",
        NativeSig::new([Type::I64], Type::I64),
        |rt, args| match args {
            [AbiValue::Int(x)] => math::abs_checked(rt, *x).map(AbiValue::Int),
            other => Err(bad_args(rt, "rt_abs_i64", other)),
        },
    )?;
    Ok(())
}

fn register_string_fns(natives: &mut NativeRegistry) -> Result<(), RegistryError> {
    natives.register(
        "rt_concat",
        NativeSig::new([Type::Str, Type::Str], Type::Str),
        |rt, args| match args {
            [AbiValue::Str(a), AbiValue::Str(b)] => Ok(AbiValue::Str(strings::concat(a, b))),
            other => Err(bad_args(rt, "rt_concat", other)),
        },
    )?;
    natives.register(
        "rt_len",
        NativeSig::new([Type::Str], Type::I64),
        |rt, args| match args {
            [AbiValue::Str(s)] => Ok(AbiValue::Int(strings::len(s))),
            other => Err(bad_args(rt, "rt_len", other)),
        },
    )?;
    natives.register(
        "rt_int_to_str",
        NativeSig::new([Type::I64], Type::Str),
        |rt, args| match args {
            [AbiValue::Int(v)] => Ok(AbiValue::Str(v.to_string().into())),
            other => Err(bad_args(rt, "rt_int_to_str", other)),
        },
    )?;
    natives.register(
        "rt_f64_to_str",
        NativeSig::new([Type::F64], Type::Str),
        |rt, args| match args {
            [AbiValue::Float(v)] => Ok(AbiValue::Str(format_f64(*v).into())),
            other => Err(bad_args(rt, "rt_f64_to_str", other)),
        },
    )?;
    Ok(())
}

fn print_line(
    rt: &RuntimeContext,
    out: &dyn OutputSink,
    name: &str,
    line: &str,
) -> Result<AbiValue, Trap> {
    out.write_line(line)
        .map(|()| AbiValue::Void)
        .map_err(|e| rt.trap(TrapKind::IoError, format!("{name}: io error: {e}")))
}

fn bad_args(rt: &RuntimeContext, name: &str, args: &[AbiValue]) -> Trap {
    rt.trap(TrapKind::DomainError, format!("{name}: bad args: {args:?}"))
}
