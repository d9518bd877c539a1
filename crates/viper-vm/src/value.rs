use std::fmt;
use std::sync::Arc;

use viper_il::{Const, Type};

/// Opaque identity of a runtime-owned heap object.
///
/// `0` is the null object. Monitors and other identity-keyed runtime tables use this handle
/// rather than an address, so objects never need to be pinned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjRef(pub u64);

impl ObjRef {
    pub const NULL: ObjRef = ObjRef(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A pointer into a frame's scratch stack.
///
/// Frame ids are never reused within a VM, so a pointer that outlives its frame is detectable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Ptr {
    pub frame: u64,
    pub offset: usize,
}

impl Ptr {
    pub const NULL: Ptr = Ptr {
        frame: 0,
        offset: 0,
    };

    pub const fn is_null(self) -> bool {
        self.frame == 0
    }
}

/// A VM value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Void,
    I1(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(Arc<str>),
    Ptr(Ptr),
    Obj(ObjRef),
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::I1(_) => Type::I1,
            Value::I16(_) => Type::I16,
            Value::I32(_) => Type::I32,
            Value::I64(_) => Type::I64,
            Value::F64(_) => Type::F64,
            Value::Str(_) => Type::Str,
            Value::Ptr(_) => Type::Ptr,
            Value::Obj(_) => Type::Obj,
        }
    }

    pub fn from_const(c: &Const) -> Self {
        match c {
            Const::I1(b) => Value::I1(*b),
            Const::I16(v) => Value::I16(*v),
            Const::I32(v) => Value::I32(*v),
            Const::I64(v) => Value::I64(*v),
            Const::F64(v) => Value::F64(*v),
            Const::Str(s) => Value::Str(Arc::from(s.as_str())),
            Const::NullPtr => Value::Ptr(Ptr::NULL),
            Const::NullObj => Value::Obj(ObjRef::NULL),
        }
    }

    /// Widens any integer value to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::I1(b) => Some(*b),
            _ => None,
        }
    }

    /// Builds an integer of width `ty` from `v`, or `None` if `v` is out of range.
    pub fn int_checked(ty: Type, v: i64) -> Option<Value> {
        match ty {
            Type::I16 => i16::try_from(v).ok().map(Value::I16),
            Type::I32 => i32::try_from(v).ok().map(Value::I32),
            Type::I64 => Some(Value::I64(v)),
            _ => None,
        }
    }

    /// Builds an integer of width `ty` from the low bits of `v`.
    pub fn int_wrapping(ty: Type, v: i64) -> Option<Value> {
        match ty {
            Type::I16 => Some(Value::I16(v as i16)),
            Type::I32 => Some(Value::I32(v as i32)),
            Type::I64 => Some(Value::I64(v)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::I1(b) => write!(f, "{}", u8::from(*b)),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Ptr(p) if p.is_null() => f.write_str("null"),
            Value::Ptr(p) => write!(f, "ptr(frame {}, +{})", p.frame, p.offset),
            Value::Obj(o) if o.is_null() => f.write_str("null"),
            Value::Obj(o) => write!(f, "obj#{}", o.0),
        }
    }
}
