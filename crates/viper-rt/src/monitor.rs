//! Re-entrant, FIFO-fair monitors keyed by object identity.
//!
//! Each monitor keeps two queues: threads waiting to acquire ownership, and threads parked in
//! `wait` until a `pause`/`pause_all`. Ownership is handed directly to the head of the acquire
//! queue on release, so threads are granted the lock strictly in queue order. Every queued thread
//! sleeps on its own condition variable and is woken only when it is granted ownership or moved
//! between queues.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;
use viper_vm::{ObjRef, RuntimeContext, Trap, TrapKind};

const WAITING_PAUSE: u8 = 0;
const WAITING_LOCK: u8 = 1;
const ACQUIRED: u8 = 2;

struct Waiter {
    thread: ThreadId,
    /// Re-entrancy depth restored when ownership is granted.
    depth: usize,
    /// Only written while the monitor's mutex is held.
    state: AtomicU8,
    cv: Condvar,
}

impl Waiter {
    fn new(thread: ThreadId, depth: usize, state: u8) -> Arc<Self> {
        Arc::new(Self {
            thread,
            depth,
            state: AtomicU8::new(state),
            cv: Condvar::new(),
        })
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }
}

#[derive(Default)]
struct MonitorState {
    owner: Option<ThreadId>,
    depth: usize,
    acquire: VecDeque<Arc<Waiter>>,
    waiting: VecDeque<Arc<Waiter>>,
}

impl MonitorState {
    fn is_owner(&self, me: ThreadId) -> bool {
        self.owner == Some(me)
    }

    /// Takes ownership immediately if the caller already owns the monitor, or if it is free
    /// and nobody is queued ahead.
    fn try_acquire(&mut self, me: ThreadId) -> bool {
        if self.is_owner(me) {
            self.depth += 1;
            return true;
        }
        if self.owner.is_none() && self.acquire.is_empty() {
            self.owner = Some(me);
            self.depth = 1;
            return true;
        }
        false
    }

    /// Hands ownership to the head of the acquire queue, if any.
    fn grant_next(&mut self) {
        let Some(next) = self.acquire.pop_front() else {
            return;
        };
        self.owner = Some(next.thread);
        self.depth = next.depth;
        next.set_state(ACQUIRED);
        next.cv.notify_one();
    }

    /// Releases ownership entirely and returns the depth that was held.
    fn release(&mut self) -> usize {
        let depth = self.depth;
        self.owner = None;
        self.depth = 0;
        self.grant_next();
        depth
    }

    fn remove(queue: &mut VecDeque<Arc<Waiter>>, w: &Arc<Waiter>) {
        if let Some(pos) = queue.iter().position(|q| Arc::ptr_eq(q, w)) {
            queue.remove(pos);
        }
    }

    /// Moves the oldest waiter onto the acquire queue. Returns `false` if nobody was waiting.
    fn pause_one(&mut self) -> bool {
        let Some(w) = self.waiting.pop_front() else {
            return false;
        };
        w.set_state(WAITING_LOCK);
        w.cv.notify_one();
        self.acquire.push_back(w);
        true
    }
}

#[derive(Default)]
struct Monitor {
    state: Mutex<MonitorState>,
}

/// Process-wide table of monitors, keyed by [`ObjRef`].
///
/// Entries are created on first use and live as long as the table.
pub struct MonitorTable {
    ctx: Arc<RuntimeContext>,
    monitors: Mutex<HashMap<ObjRef, Arc<Monitor>>>,
}

impl MonitorTable {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self {
            ctx,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    fn monitor(&self, obj: ObjRef) -> Arc<Monitor> {
        Arc::clone(self.monitors.lock().entry(obj).or_default())
    }

    fn checked(&self, obj: ObjRef, null_message: &str) -> Result<Arc<Monitor>, Trap> {
        if obj.is_null() {
            return Err(self.ctx.trap(TrapKind::NullPointer, null_message));
        }
        Ok(self.monitor(obj))
    }

    fn not_owner(&self, message: &str) -> Trap {
        self.ctx.trap(TrapKind::InvalidOperation, message)
    }

    /// Acquires `obj`, blocking in FIFO order behind earlier enterers.
    pub fn enter(&self, obj: ObjRef) -> Result<(), Trap> {
        let m = self.checked(obj, "Monitor.Enter: null object")?;
        let me = thread::current().id();
        let mut st = m.state.lock();
        if st.try_acquire(me) {
            return Ok(());
        }
        trace!(obj = obj.0, "monitor enter blocked");
        let w = Waiter::new(me, 1, WAITING_LOCK);
        st.acquire.push_back(Arc::clone(&w));
        while w.state() != ACQUIRED {
            w.cv.wait(&mut st);
        }
        Ok(())
    }

    /// Acquires `obj` only if that is possible without blocking.
    pub fn try_enter(&self, obj: ObjRef) -> Result<bool, Trap> {
        let m = self.checked(obj, "Monitor.Enter: null object")?;
        let me = thread::current().id();
        Ok(m.state.lock().try_acquire(me))
    }

    /// Like [`enter`](Self::enter), giving up after `ms` milliseconds. Negative waits are zero.
    pub fn try_enter_for(&self, obj: ObjRef, ms: i64) -> Result<bool, Trap> {
        let m = self.checked(obj, "Monitor.Enter: null object")?;
        let me = thread::current().id();
        let deadline = deadline_after(ms);
        let mut st = m.state.lock();
        if st.try_acquire(me) {
            return Ok(true);
        }
        let w = Waiter::new(me, 1, WAITING_LOCK);
        st.acquire.push_back(Arc::clone(&w));
        while w.state() != ACQUIRED {
            let timed_out = w.cv.wait_until(&mut st, deadline).timed_out();
            if timed_out && w.state() != ACQUIRED {
                MonitorState::remove(&mut st.acquire, &w);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Releases one level of ownership, handing the monitor to the next enterer at depth 0.
    pub fn exit(&self, obj: ObjRef) -> Result<(), Trap> {
        let m = self.checked(obj, "Monitor.Exit: null object")?;
        let me = thread::current().id();
        let mut st = m.state.lock();
        if !st.is_owner(me) {
            drop(st);
            return Err(self.not_owner("Monitor.Exit: not owner"));
        }
        if st.depth > 1 {
            st.depth -= 1;
        } else {
            st.release();
        }
        Ok(())
    }

    /// Releases `obj` fully and parks until paused, then re-acquires it at the same depth.
    pub fn wait(&self, obj: ObjRef) -> Result<(), Trap> {
        let m = self.checked(obj, "Monitor.Wait: not owner")?;
        let me = thread::current().id();
        let mut st = m.state.lock();
        let w = self.park(&mut st, me, "Monitor.Wait: not owner")?;
        while w.state() == WAITING_PAUSE {
            w.cv.wait(&mut st);
        }
        while w.state() != ACQUIRED {
            w.cv.wait(&mut st);
        }
        Ok(())
    }

    /// Like [`wait`](Self::wait), but stops waiting for a pause after `ms` milliseconds.
    ///
    /// Returns `true` if paused, `false` on timeout. Either way the caller holds the monitor
    /// again when this returns.
    pub fn wait_for(&self, obj: ObjRef, ms: i64) -> Result<bool, Trap> {
        let m = self.checked(obj, "Monitor.Wait: not owner")?;
        let me = thread::current().id();
        let deadline = deadline_after(ms);
        let mut st = m.state.lock();
        let w = self.park(&mut st, me, "Monitor.Wait: not owner")?;

        let mut timed_out = false;
        while w.state() == WAITING_PAUSE {
            let expired = w.cv.wait_until(&mut st, deadline).timed_out();
            if expired && w.state() == WAITING_PAUSE {
                timed_out = true;
                break;
            }
        }

        if timed_out {
            // Leave the wait queue and re-acquire fairly behind existing enterers.
            MonitorState::remove(&mut st.waiting, &w);
            w.set_state(WAITING_LOCK);
            st.acquire.push_back(Arc::clone(&w));
            if st.owner.is_none() {
                st.grant_next();
            }
        }
        while w.state() != ACQUIRED {
            w.cv.wait(&mut st);
        }
        Ok(!timed_out)
    }

    /// Releases the caller's ownership and appends it to the wait queue.
    fn park(
        &self,
        st: &mut MutexGuard<'_, MonitorState>,
        me: ThreadId,
        not_owner: &str,
    ) -> Result<Arc<Waiter>, Trap> {
        if !st.is_owner(me) {
            return Err(MutexGuard::unlocked(st, || self.not_owner(not_owner)));
        }
        let depth = st.release();
        let w = Waiter::new(me, depth, WAITING_PAUSE);
        st.waiting.push_back(Arc::clone(&w));
        Ok(w)
    }

    /// Moves the oldest waiter to the acquire queue. The caller keeps ownership.
    pub fn pause(&self, obj: ObjRef) -> Result<(), Trap> {
        let m = self.checked(obj, "Monitor.Pause: not owner")?;
        let me = thread::current().id();
        let mut st = m.state.lock();
        if !st.is_owner(me) {
            drop(st);
            return Err(self.not_owner("Monitor.Pause: not owner"));
        }
        st.pause_one();
        Ok(())
    }

    /// Moves every waiter to the acquire queue, preserving the order they called `wait`.
    pub fn pause_all(&self, obj: ObjRef) -> Result<(), Trap> {
        let m = self.checked(obj, "Monitor.PauseAll: not owner")?;
        let me = thread::current().id();
        let mut st = m.state.lock();
        if !st.is_owner(me) {
            drop(st);
            return Err(self.not_owner("Monitor.PauseAll: not owner"));
        }
        let mut moved = 0usize;
        while st.pause_one() {
            moved += 1;
        }
        trace!(obj = obj.0, moved, "monitor pause_all");
        Ok(())
    }

    /// Number of threads parked in `wait` on `obj`.
    pub fn waiters(&self, obj: ObjRef) -> usize {
        self.monitors
            .lock()
            .get(&obj)
            .map_or(0, |m| m.state.lock().waiting.len())
    }

    /// Number of threads blocked acquiring `obj`.
    pub fn enterers(&self, obj: ObjRef) -> usize {
        self.monitors
            .lock()
            .get(&obj)
            .map_or(0, |m| m.state.lock().acquire.len())
    }

    /// Whether the calling thread owns `obj`.
    pub fn held_by_current_thread(&self, obj: ObjRef) -> bool {
        let me = thread::current().id();
        self.monitors
            .lock()
            .get(&obj)
            .is_some_and(|m| m.state.lock().is_owner(me))
    }
}

fn deadline_after(ms: i64) -> Instant {
    Instant::now() + Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_vm::BufferSink;

    fn table() -> MonitorTable {
        MonitorTable::new(Arc::new(RuntimeContext::new(Arc::new(BufferSink::new()))))
    }

    #[test]
    fn enter_is_reentrant() {
        let t = table();
        let obj = ObjRef(1);
        t.enter(obj).unwrap();
        t.enter(obj).unwrap();
        t.exit(obj).unwrap();
        assert!(t.held_by_current_thread(obj));
        t.exit(obj).unwrap();
        assert!(!t.held_by_current_thread(obj));
    }

    #[test]
    fn exit_by_non_owner_traps() {
        let t = table();
        let trap = t.exit(ObjRef(7)).unwrap_err();
        assert_eq!(trap.kind, TrapKind::InvalidOperation);
        assert_eq!(trap.message, "Monitor.Exit: not owner");
    }

    #[test]
    fn null_object_traps() {
        let t = table();
        let trap = t.enter(ObjRef::NULL).unwrap_err();
        assert!(trap.message.contains("Monitor.Enter: null object"));
        assert!(t.try_enter(ObjRef::NULL).is_err());
        assert!(t.wait(ObjRef::NULL).is_err());
    }

    #[test]
    fn try_enter_fails_while_owned_elsewhere() {
        let t = Arc::new(table());
        let obj = ObjRef(3);
        t.enter(obj).unwrap();
        let other = Arc::clone(&t);
        let (plain, timed) = thread::spawn(move || {
            (
                other.try_enter(obj).unwrap(),
                other.try_enter_for(obj, 5).unwrap(),
            )
        })
        .join()
        .unwrap();
        assert!(!plain);
        assert!(!timed);
        assert_eq!(t.enterers(obj), 0);
        t.exit(obj).unwrap();
    }

    #[test]
    fn wait_preserves_depth() {
        let t = Arc::new(table());
        let obj = ObjRef(4);
        t.enter(obj).unwrap();
        t.enter(obj).unwrap();
        assert!(!t.wait_for(obj, 1).unwrap());
        t.exit(obj).unwrap();
        assert!(t.held_by_current_thread(obj));
        t.exit(obj).unwrap();
        assert!(!t.held_by_current_thread(obj));
    }
}
