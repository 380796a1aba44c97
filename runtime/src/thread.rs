//! Thread spawn/sync plumbing and lock brackets.
//!
//! A `spawn` site in generated code packs its arguments into a stack
//! struct and hands a thunk to [`spawn`]. The thunk runs on an OS thread
//! with a root arena of its own (arenas are single-threaded; values cross
//! threads only by promotion at sync time). [`sync`] joins the thread and
//! hands back a [`ThreadResult`]; the typed wrappers in [`crate::ffi`]
//! promote heap-shaped results into the syncing function's arena and
//! destroy the thread's root arena.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::any::Any;
use crate::arena::{self, Arena, Handle};
use crate::fatal;

/// What a spawned call produced. Exactly one field is meaningful; the
/// generated thunk knows which from the callee's return type.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ThreadResult {
    /// Integral results (int, long, bool, char, byte variants).
    pub bits: i64,
    /// Floating results.
    pub dbits: f64,
    /// Heap-shaped results (string, array, struct, closure), owned by
    /// `arena` until sync promotes them out.
    pub handle: *mut Handle,
    /// Boxed dynamic results.
    pub any: Any,
    /// The spawned call's root arena; destroyed once the result has been
    /// promoted into the syncing side.
    pub arena: *mut Arena,
}

impl ThreadResult {
    pub const fn zero() -> Self {
        ThreadResult {
            bits: 0,
            dbits: 0.0,
            handle: core::ptr::null_mut(),
            any: Any::nil(),
            arena: core::ptr::null_mut(),
        }
    }
}

/// Thunk signature emitted per spawn site: unpack arguments, run the call
/// under a fresh root arena, report the result.
pub type ThreadEntry = unsafe extern "C" fn(args: *mut u8) -> ThreadResult;

struct SendCell<T>(T);
// The runtime moves raw pointers across the spawn boundary by design: the
// arguments were copied out of the spawner's frame and the result arena is
// owned by exactly one side at a time.
unsafe impl<T> Send for SendCell<T> {}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<HashMap<u64, JoinHandle<SendCell<ThreadResult>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, JoinHandle<SendCell<ThreadResult>>>>> =
        OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Spawns `entry` on an OS thread over a private copy of `args` and returns
/// a pending handle (allocated in `spawner_arena`) for the later `sync`.
pub unsafe fn spawn(
    spawner_arena: *mut Arena,
    entry: ThreadEntry,
    args: *const u8,
    args_size: usize,
) -> *mut Handle {
    let mut buf = vec![0u8; args_size];
    if args_size > 0 && !args.is_null() {
        core::ptr::copy_nonoverlapping(args, buf.as_mut_ptr(), args_size);
    }
    let cell = SendCell((entry, buf));
    let join = std::thread::spawn(move || {
        let SendCell((entry, mut buf)) = cell;
        SendCell(unsafe { entry(buf.as_mut_ptr()) })
    });

    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    registry()
        .lock()
        .unwrap_or_else(|_| fatal("Thread error: registry poisoned"))
        .insert(id, join);

    let pending = arena::alloc(spawner_arena, core::mem::size_of::<u64>());
    if pending.is_null() {
        fatal("Thread error: could not allocate pending handle");
    }
    (*pending).ptr.cast::<u64>().write(id);
    pending
}

/// Joins the thread behind a pending handle. Syncing the same handle twice
/// is a fatal error.
pub unsafe fn sync(pending: *mut Handle) -> ThreadResult {
    if pending.is_null() || (*pending).ptr.is_null() {
        fatal("Sync error: sync on a null thread handle");
    }
    let id = (*pending).ptr.cast::<u64>().read();
    let join = registry()
        .lock()
        .unwrap_or_else(|_| fatal("Thread error: registry poisoned"))
        .remove(&id)
        .unwrap_or_else(|| fatal("Sync error: thread handle already synchronized"));
    match join.join() {
        Ok(SendCell(result)) => result,
        Err(_) => fatal("Thread error: spawned function aborted"),
    }
}

struct LockCell {
    locked: Mutex<bool>,
    cv: Condvar,
}

fn locks() -> &'static Mutex<HashMap<usize, Arc<LockCell>>> {
    static LOCKS: OnceLock<Mutex<HashMap<usize, Arc<LockCell>>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_cell(addr: usize) -> Arc<LockCell> {
    locks()
        .lock()
        .unwrap_or_else(|_| fatal("Lock error: registry poisoned"))
        .entry(addr)
        .or_insert_with(|| {
            Arc::new(LockCell {
                locked: Mutex::new(false),
                cv: Condvar::new(),
            })
        })
        .clone()
}

/// Acquires the lock associated with `addr`, blocking until available.
pub fn lock(addr: usize) {
    let cell = lock_cell(addr);
    let mut held = cell
        .locked
        .lock()
        .unwrap_or_else(|_| fatal("Lock error: lock poisoned"));
    while *held {
        held = cell
            .cv
            .wait(held)
            .unwrap_or_else(|_| fatal("Lock error: lock poisoned"));
    }
    *held = true;
}

/// Releases the lock associated with `addr`.
pub fn unlock(addr: usize) {
    let cell = lock_cell(addr);
    let mut held = cell
        .locked
        .lock()
        .unwrap_or_else(|_| fatal("Lock error: lock poisoned"));
    *held = false;
    cell.cv.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn forty_two(_args: *mut u8) -> ThreadResult {
        let mut r = ThreadResult::zero();
        r.bits = 42;
        r
    }

    unsafe extern "C" fn doubles_arg(args: *mut u8) -> ThreadResult {
        let n = args.cast::<i64>().read();
        let mut r = ThreadResult::zero();
        r.bits = n * 2;
        r
    }

    #[test]
    fn spawn_then_sync_returns_result() {
        unsafe {
            let a = arena::create(core::ptr::null_mut());
            let pending = spawn(a, forty_two, core::ptr::null(), 0);
            assert_eq!(sync(pending).bits, 42);
            arena::destroy(a);
            drop(Box::from_raw(a));
        }
    }

    #[test]
    fn spawn_copies_arguments() {
        unsafe {
            let a = arena::create(core::ptr::null_mut());
            let n = 21i64;
            let pending = spawn(a, doubles_arg, core::ptr::addr_of!(n).cast(), 8);
            assert_eq!(sync(pending).bits, 42);
            arena::destroy(a);
            drop(Box::from_raw(a));
        }
    }

    #[test]
    fn lock_unlock_brackets_are_reentrant_across_threads() {
        let addr = 0xBEEF_usize;
        lock(addr);
        let t = std::thread::spawn(move || {
            lock(addr);
            unlock(addr);
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        unlock(addr);
        t.join().unwrap();
    }
}
