//! Host-call bridge between IL `call` instructions and native runtime functions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};
use viper_il::{ExternDecl, Module, Type};

use crate::trap::{RuntimeContext, Trap, TrapKind, TrapSite};
use crate::value::{ObjRef, Ptr, Value};

/// A value at the VM/native boundary. Integer widths are widened to `i64`.
#[derive(Clone, Debug, PartialEq)]
pub enum AbiValue {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Ptr(Ptr),
    Obj(ObjRef),
}

impl AbiValue {
    pub fn kind(&self) -> &'static str {
        match self {
            AbiValue::Void => "void",
            AbiValue::Bool(_) => "bool",
            AbiValue::Int(_) => "int",
            AbiValue::Float(_) => "float",
            AbiValue::Str(_) => "str",
            AbiValue::Ptr(_) => "ptr",
            AbiValue::Obj(_) => "obj",
        }
    }

    fn from_value(value: Value) -> Self {
        match value {
            Value::Void => AbiValue::Void,
            Value::I1(b) => AbiValue::Bool(b),
            Value::I16(v) => AbiValue::Int(i64::from(v)),
            Value::I32(v) => AbiValue::Int(i64::from(v)),
            Value::I64(v) => AbiValue::Int(v),
            Value::F64(v) => AbiValue::Float(v),
            Value::Str(s) => AbiValue::Str(s),
            Value::Ptr(p) => AbiValue::Ptr(p),
            Value::Obj(o) => AbiValue::Obj(o),
        }
    }

    /// Converts back to a VM value of type `ty`. `None` if the kinds disagree.
    fn into_value(self, ty: Type) -> Option<Result<Value, i64>> {
        let value = match (self, ty) {
            (AbiValue::Void, Type::Void) => Value::Void,
            (AbiValue::Bool(b), Type::I1) => Value::I1(b),
            (AbiValue::Int(v), ty) if ty.is_integer() => {
                return Some(Value::int_checked(ty, v).ok_or(v));
            }
            (AbiValue::Float(v), Type::F64) => Value::F64(v),
            (AbiValue::Str(s), Type::Str) => Value::Str(s),
            (AbiValue::Ptr(p), Type::Ptr) => Value::Ptr(p),
            (AbiValue::Obj(o), Type::Obj) => Value::Obj(o),
            _ => return None,
        };
        Some(Ok(value))
    }
}

/// Declared signature of a native function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeSig {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl NativeSig {
    pub fn new(params: impl Into<Vec<Type>>, ret: Type) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    fn matches(&self, decl: &ExternDecl) -> bool {
        self.params == decl.params && self.ret == decl.ret
    }
}

impl fmt::Display for NativeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A native function callable from IL.
///
/// Implementations validate their arguments and report faults by raising a trap through `rt`,
/// the same entry point the dispatch loop uses.
pub trait NativeFn: Send + Sync + 'static {
    fn call(&self, rt: &RuntimeContext, args: &[AbiValue]) -> Result<AbiValue, Trap>;
}

impl<F> NativeFn for F
where
    F: Fn(&RuntimeContext, &[AbiValue]) -> Result<AbiValue, Trap> + Send + Sync + 'static,
{
    fn call(&self, rt: &RuntimeContext, args: &[AbiValue]) -> Result<AbiValue, Trap> {
        self(rt, args)
    }
}

#[derive(Clone)]
struct NativeEntry {
    sig: NativeSig,
    func: Arc<dyn NativeFn>,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("native symbol `{name}` is already registered")]
    Duplicate { name: String },
}

/// Native symbol table, built by the embedder before a run.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    entries: BTreeMap<String, NativeEntry>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure under `name`. Names are matched exactly.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        sig: NativeSig,
        func: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&RuntimeContext, &[AbiValue]) -> Result<AbiValue, Trap> + Send + Sync + 'static,
    {
        self.register_native(name, sig, Arc::new(func))
    }

    /// Registers a shared [`NativeFn`] implementation under `name`.
    pub fn register_native(
        &mut self,
        name: impl Into<String>,
        sig: NativeSig,
        func: Arc<dyn NativeFn>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }
        self.entries.insert(name, NativeEntry { sig, func });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn signature(&self, name: &str) -> Option<&NativeSig> {
        self.entries.get(name).map(|e| &e.sig)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

enum Binding {
    Bound(Arc<dyn NativeFn>),
    Unresolved,
    Mismatch(NativeSig),
}

/// Module externs resolved against a registry, indexed by `ExternId`.
///
/// Resolution failures are recorded rather than rejected so the trap is raised at the first call
/// site, with that instruction's attribution.
pub(crate) struct RuntimeBridge {
    bindings: Vec<Binding>,
}

impl RuntimeBridge {
    pub(crate) fn resolve(module: &Module, registry: &NativeRegistry) -> Self {
        let bindings = module
            .externs
            .iter()
            .map(|decl| match registry.entries.get(&decl.name) {
                Some(entry) if entry.sig.matches(decl) => Binding::Bound(Arc::clone(&entry.func)),
                Some(entry) => {
                    warn!(symbol = %decl.name, native = %entry.sig, "extern signature mismatch");
                    Binding::Mismatch(entry.sig.clone())
                }
                None => {
                    warn!(symbol = %decl.name, "extern has no native implementation");
                    Binding::Unresolved
                }
            })
            .collect();
        Self { bindings }
    }

    /// Marshals `args`, invokes the native bound to `index` and marshals the result back.
    ///
    /// The call site is installed in `ctx` for the duration of the native call so traps raised by
    /// native code without metadata are attributed to it.
    pub(crate) fn call(
        &self,
        ctx: &RuntimeContext,
        index: usize,
        decl: &ExternDecl,
        args: Vec<Value>,
        site: TrapSite,
    ) -> Result<Value, Trap> {
        let func = match self.bindings.get(index) {
            Some(Binding::Bound(func)) => func,
            Some(Binding::Mismatch(sig)) => {
                return Err(ctx.trap_at(
                    TrapKind::DomainError,
                    format!(
                        "extern `{}` signature mismatch: native is {sig}",
                        decl.name
                    ),
                    site,
                ));
            }
            Some(Binding::Unresolved) | None => {
                return Err(ctx.trap_at(
                    TrapKind::DomainError,
                    format!("unknown runtime helper `{}`", decl.name),
                    site,
                ));
            }
        };

        if args.len() != decl.params.len() {
            return Err(ctx.trap_at(
                TrapKind::DomainError,
                format!(
                    "call to `{}`: expected {} arguments, got {}",
                    decl.name,
                    decl.params.len(),
                    args.len()
                ),
                site,
            ));
        }
        let mut abi_args = Vec::with_capacity(args.len());
        for (i, (arg, ty)) in args.into_iter().zip(&decl.params).enumerate() {
            if arg.ty() != *ty {
                return Err(ctx.trap_at(
                    TrapKind::DomainError,
                    format!(
                        "call to `{}`: argument {i} expected {ty}, got {}",
                        decl.name,
                        arg.ty()
                    ),
                    site,
                ));
            }
            abi_args.push(AbiValue::from_value(arg));
        }

        trace!(symbol = %decl.name, args = abi_args.len(), "native call");
        ctx.enter_call(site.clone());
        let result = func.call(ctx, &abi_args);
        ctx.leave_call();
        let ret = result?;

        let kind = ret.kind();
        match ret.into_value(decl.ret) {
            Some(Ok(value)) => Ok(value),
            Some(Err(raw)) => Err(ctx.trap_at(
                TrapKind::Overflow,
                format!("`{}` returned {raw}, out of range for {}", decl.name, decl.ret),
                site,
            )),
            None => Err(ctx.trap_at(
                TrapKind::DomainError,
                format!("`{}` returned {kind}, expected {}", decl.name, decl.ret),
                site,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trap::BufferSink;
    use viper_il::SourceLoc;

    fn ctx() -> RuntimeContext {
        RuntimeContext::new(Arc::new(BufferSink::new()))
    }

    fn site() -> TrapSite {
        TrapSite::new("main", "entry", 1, SourceLoc::line(3))
    }

    fn module_with(decl: ExternDecl) -> Module {
        let mut module = Module::new("m");
        module.add_extern(decl).unwrap();
        module
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut reg = NativeRegistry::new();
        let sig = NativeSig::new([], Type::Void);
        reg.register("f", sig.clone(), |_, _| Ok(AbiValue::Void))
            .unwrap();
        let err = reg
            .register("f", sig, |_, _| Ok(AbiValue::Void))
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate { name: "f".into() });
    }

    #[test]
    fn narrows_integer_returns_with_range_check() {
        let decl = ExternDecl::new("big", vec![], Type::I16);
        let module = module_with(decl.clone());
        let mut reg = NativeRegistry::new();
        reg.register("big", NativeSig::new([], Type::I16), |_, _| {
            Ok(AbiValue::Int(70_000))
        })
        .unwrap();
        let bridge = RuntimeBridge::resolve(&module, &reg);
        let trap = bridge.call(&ctx(), 0, &decl, vec![], site()).unwrap_err();
        assert_eq!(trap.kind, TrapKind::Overflow);
        assert_eq!(trap.site, site());
    }

    #[test]
    fn unresolved_symbol_traps_at_call_site() {
        let decl = ExternDecl::new("rt_missing", vec![Type::I64], Type::I64);
        let module = module_with(decl.clone());
        let bridge = RuntimeBridge::resolve(&module, &NativeRegistry::new());
        let trap = bridge
            .call(&ctx(), 0, &decl, vec![Value::I64(1)], site())
            .unwrap_err();
        assert_eq!(trap.kind, TrapKind::DomainError);
        assert!(trap.message.contains("rt_missing"));
        assert_eq!(trap.site.ip, Some(1));
    }

    #[test]
    fn signature_mismatch_traps_at_call_site() {
        let decl = ExternDecl::new("rt_len", vec![Type::Str], Type::I64);
        let module = module_with(decl.clone());
        let mut reg = NativeRegistry::new();
        reg.register(
            "rt_len",
            NativeSig::new([Type::Str], Type::F64),
            |_, _| Ok(AbiValue::Float(0.0)),
        )
        .unwrap();
        let bridge = RuntimeBridge::resolve(&module, &reg);
        let trap = bridge
            .call(&ctx(), 0, &decl, vec![Value::Str("x".into())], site())
            .unwrap_err();
        assert!(trap.message.contains("signature mismatch"));
    }

    #[test]
    fn native_traps_without_metadata_cite_the_call() {
        let decl = ExternDecl::new("rt_fail", vec![], Type::Void);
        let module = module_with(decl.clone());
        let mut reg = NativeRegistry::new();
        reg.register("rt_fail", NativeSig::new([], Type::Void), |rt, _| {
            Err(rt.trap(TrapKind::ResourceExhausted, "out of handles"))
        })
        .unwrap();
        let ctx = ctx();
        let bridge = RuntimeBridge::resolve(&module, &reg);
        let trap = bridge.call(&ctx, 0, &decl, vec![], site()).unwrap_err();
        assert_eq!(trap.site, site());
        assert_eq!(ctx.trap(TrapKind::Bounds, "").site, TrapSite::UNKNOWN);
    }

    #[test]
    fn void_extern_yields_void() {
        let decl = ExternDecl::new("rt_noop", vec![Type::I32], Type::Void);
        let module = module_with(decl.clone());
        let mut reg = NativeRegistry::new();
        reg.register(
            "rt_noop",
            NativeSig::new([Type::I32], Type::Void),
            |_, args| {
                assert_eq!(args, &[AbiValue::Int(7)]);
                Ok(AbiValue::Void)
            },
        )
        .unwrap();
        let bridge = RuntimeBridge::resolve(&module, &reg);
        let out = bridge
            .call(&ctx(), 0, &decl, vec![Value::I32(7)], site())
            .unwrap();
        assert_eq!(out, Value::Void);
    }
}
