use std::collections::BTreeMap;

use viper_il::{BlockId, FunctionId, SlotId, Type};

use crate::trap::TrapKind;
use crate::value::{ObjRef, Ptr, Value};

/// Default per-frame `alloca` budget in bytes.
pub const DEFAULT_STACK_BYTES: usize = 64 * 1024;

const ALLOCA_ALIGN: usize = 8;

/// A stack-memory fault, mapped to a trap at the instruction that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    NegativeSize { requested: i64 },
    Overflow { requested: i64, remaining: usize },
    OutOfBounds { offset: usize, size: usize, len: usize },
    WrongCell { offset: usize, ty: Type },
}

impl StackError {
    pub fn kind(&self) -> TrapKind {
        match self {
            StackError::NegativeSize { .. } => TrapKind::DomainError,
            StackError::Overflow { .. } => TrapKind::Overflow,
            StackError::OutOfBounds { .. } | StackError::WrongCell { .. } => TrapKind::Bounds,
        }
    }

    pub fn message(&self) -> String {
        match self {
            StackError::NegativeSize { requested } => {
                format!("negative allocation ({requested} bytes)")
            }
            StackError::Overflow {
                requested,
                remaining,
            } => format!(
                "stack overflow in alloca: requested {requested} bytes, {remaining} remaining"
            ),
            StackError::OutOfBounds { offset, size, len } => format!(
                "stack access out of bounds: {size} bytes at offset {offset} (region is {len} bytes)"
            ),
            StackError::WrongCell { offset, ty } => {
                format!("no {ty} stored at stack offset {offset}")
            }
        }
    }
}

/// Bump allocator over a frame's private scratch region.
///
/// Scalars are stored as little-endian bytes. Handle-typed values (`str`, `ptr`, `obj`) occupy an
/// 8-byte cell in the region and live in a side table keyed by offset.
#[derive(Debug, Clone)]
pub struct StackAllocator {
    capacity: usize,
    bytes: Vec<u8>,
    handles: BTreeMap<usize, Value>,
}

impl StackAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bytes: Vec::new(),
            handles: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    /// Reserves `size` zeroed bytes and returns their offset.
    pub fn alloca(&mut self, size: i64) -> Result<usize, StackError> {
        let Ok(size) = usize::try_from(size) else {
            return Err(StackError::NegativeSize { requested: size });
        };
        let start = self.used().next_multiple_of(ALLOCA_ALIGN);
        let end = start
            .checked_add(size)
            .filter(|end| *end <= self.capacity)
            .ok_or(StackError::Overflow {
                requested: size as i64,
                remaining: self.remaining(),
            })?;
        self.bytes.resize(end, 0);
        Ok(start)
    }

    fn range(&self, offset: usize, size: usize) -> Result<std::ops::Range<usize>, StackError> {
        let end = offset.checked_add(size).unwrap_or(usize::MAX);
        if end > self.bytes.len() {
            return Err(StackError::OutOfBounds {
                offset,
                size,
                len: self.bytes.len(),
            });
        }
        Ok(offset..end)
    }

    pub fn load(&self, offset: usize, ty: Type) -> Result<Value, StackError> {
        let range = self.range(offset, ty.size_of())?;
        let raw = &self.bytes[range];
        let word = |n: usize| {
            let mut buf = [0u8; 8];
            buf[..n].copy_from_slice(&raw[..n]);
            buf
        };
        match ty {
            Type::I1 => Ok(Value::I1(raw[0] != 0)),
            Type::I16 => Ok(Value::I16(i16::from_le_bytes([raw[0], raw[1]]))),
            Type::I32 => Ok(Value::I32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))),
            Type::I64 => Ok(Value::I64(i64::from_le_bytes(word(8)))),
            Type::F64 => Ok(Value::F64(f64::from_le_bytes(word(8)))),
            Type::Str | Type::Ptr | Type::Obj => match self.handles.get(&offset) {
                Some(v) if v.ty() == ty => Ok(v.clone()),
                // Zeroed memory reads back as a null handle.
                None if raw.iter().all(|b| *b == 0) => Ok(match ty {
                    Type::Ptr => Value::Ptr(Ptr::NULL),
                    Type::Obj => Value::Obj(ObjRef::NULL),
                    _ => Value::Str("".into()),
                }),
                _ => Err(StackError::WrongCell { offset, ty }),
            },
            Type::Void => Err(StackError::WrongCell { offset, ty }),
        }
    }

    pub fn store(&mut self, offset: usize, value: &Value) -> Result<(), StackError> {
        let ty = value.ty();
        let range = self.range(offset, ty.size_of())?;
        // Any overlapping handle cell is clobbered by the write.
        let start = range.start.saturating_sub(7);
        let stale: Vec<usize> = self.handles.range(start..range.end).map(|(k, _)| *k).collect();
        for key in stale {
            self.handles.remove(&key);
        }
        let dst = &mut self.bytes[range];
        match value {
            Value::I1(b) => dst[0] = u8::from(*b),
            Value::I16(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Value::I32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Value::I64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Value::F64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Value::Str(_) | Value::Ptr(_) | Value::Obj(_) => {
                dst.fill(0xff);
                self.handles.insert(offset, value.clone());
            }
            Value::Void => return Err(StackError::WrongCell { offset, ty }),
        }
        Ok(())
    }
}

/// One function activation.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) id: u64,
    pub(crate) func: FunctionId,
    pub(crate) block: BlockId,
    pub(crate) ip: usize,
    slots: Vec<Option<Value>>,
    pub(crate) stack: StackAllocator,
    /// Caller slot receiving this frame's return value.
    pub(crate) return_dst: Option<SlotId>,
}

impl Frame {
    pub(crate) fn new(
        id: u64,
        func: FunctionId,
        slot_count: usize,
        stack_bytes: usize,
        return_dst: Option<SlotId>,
    ) -> Self {
        Self {
            id,
            func,
            block: BlockId(0),
            ip: 0,
            slots: vec![None; slot_count],
            stack: StackAllocator::new(stack_bytes),
            return_dst,
        }
    }

    pub(crate) fn read_slot(&self, slot: SlotId) -> Option<&Value> {
        self.slots.get(slot.0 as usize).and_then(|v| v.as_ref())
    }

    pub(crate) fn write_slot(&mut self, slot: SlotId, value: Value) -> bool {
        match self.slots.get_mut(slot.0 as usize) {
            Some(dst) => {
                *dst = Some(value);
                true
            }
            None => false,
        }
    }

    pub(crate) fn jump(&mut self, block: BlockId) {
        self.block = block;
        self.ip = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloca_respects_capacity() {
        let mut stack = StackAllocator::new(DEFAULT_STACK_BYTES);
        let err = stack.alloca(70_000).unwrap_err();
        assert_eq!(err.kind(), TrapKind::Overflow);
        assert!(err.message().contains("stack overflow in alloca"));
        assert_eq!(stack.used(), 0);

        let mut big = StackAllocator::new(2 * 1024 * 1024);
        assert_eq!(big.alloca(32 * 1024).unwrap(), 0);

        let mut small = StackAllocator::new(16 * 1024);
        assert!(matches!(
            small.alloca(32 * 1024),
            Err(StackError::Overflow { .. })
        ));
    }

    #[test]
    fn alloca_rejects_negative_sizes() {
        let mut stack = StackAllocator::new(64);
        let err = stack.alloca(-1).unwrap_err();
        assert_eq!(err.kind(), TrapKind::DomainError);
        assert!(err.message().contains("negative allocation"));
    }

    #[test]
    fn allocations_are_aligned_and_exhaust_budget() {
        let mut stack = StackAllocator::new(32);
        assert_eq!(stack.alloca(3).unwrap(), 0);
        assert_eq!(stack.alloca(8).unwrap(), 8);
        assert_eq!(stack.remaining(), 16);
        assert_eq!(stack.alloca(16).unwrap(), 16);
        assert!(stack.alloca(1).is_err());
    }

    #[test]
    fn scalar_and_handle_cells_round_trip() {
        let mut stack = StackAllocator::new(64);
        let base = stack.alloca(24).unwrap();
        assert_eq!(stack.load(base, Type::I64).unwrap(), Value::I64(0));

        stack.store(base, &Value::F64(2.5)).unwrap();
        stack.store(base + 8, &Value::Str("hi".into())).unwrap();
        assert_eq!(stack.load(base, Type::F64).unwrap(), Value::F64(2.5));
        assert_eq!(
            stack.load(base + 8, Type::Str).unwrap(),
            Value::Str("hi".into())
        );

        stack.store(base + 8, &Value::I64(9)).unwrap();
        assert_eq!(stack.load(base + 8, Type::I64).unwrap(), Value::I64(9));
        assert!(stack.load(base + 8, Type::Str).is_err());
        assert!(matches!(
            stack.load(base + 20, Type::I64),
            Err(StackError::OutOfBounds { .. })
        ));
    }
}
