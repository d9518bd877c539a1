use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use viper_vm::{ObjRef, RuntimeContext, Trap, TrapKind};

/// Hands out object identities for runtime allocations.
///
/// Objects are identified by a monotonically increasing handle rather than an address, so
/// identity-keyed tables (monitors) stay valid without pinning. Reclamation policy belongs to
/// the owning library; this table only tracks sizes.
#[derive(Debug)]
pub struct ObjectHeap {
    next: AtomicU64,
    sizes: Mutex<HashMap<ObjRef, usize>>,
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            sizes: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates an object of `bytes` bytes. Negative sizes trap.
    pub fn alloc(&self, rt: &RuntimeContext, bytes: i64) -> Result<ObjRef, Trap> {
        let Ok(size) = usize::try_from(bytes) else {
            return Err(rt.trap(
                TrapKind::DomainError,
                format!("negative allocation ({bytes} bytes)"),
            ));
        };
        let obj = ObjRef(self.next.fetch_add(1, Ordering::Relaxed));
        self.sizes.lock().insert(obj, size);
        Ok(obj)
    }

    pub fn size_of(&self, obj: ObjRef) -> Option<usize> {
        self.sizes.lock().get(&obj).copied()
    }

    pub fn live_objects(&self) -> usize {
        self.sizes.lock().len()
    }
}
