//! Engine backend interface
//!
//! Every supported engine family provides one adapter type implementing
//! [`ScriptEngine`]. Scope guards are generic over the adapter, so the
//! backend is chosen at compile time and calls are statically dispatched.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, trace};

use crate::error::{Fatal, Result, fatal};
use crate::locals::{FrameId, Local};
use crate::runtime_type::RuntimeType;
use crate::string_holder::transcode;
use crate::value::{NativeStr, ValueKind};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique engine identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(u64);

impl EngineId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        EngineId(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Ownership {
    thread: Option<ThreadId>,
    depth: usize,
}

/// Identity and thread ownership shared by every adapter
///
/// An engine is owned by at most one thread at a time. The owning thread
/// may enter it again (nesting), any other thread entering it is fatal.
#[derive(Debug)]
pub struct EngineState {
    id: EngineId,
    runtime_type: RuntimeType,
    label: Option<String>,
    ownership: Mutex<Ownership>,
}

impl EngineState {
    pub fn new(runtime_type: RuntimeType, label: Option<String>) -> Self {
        let id = EngineId::next();
        debug!(runtime = runtime_type.tag(), engine = id.get(), "engine created");
        Self {
            id,
            runtime_type,
            label,
            ownership: Mutex::new(Ownership::default()),
        }
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Thread currently holding this engine, if any
    pub fn owner(&self) -> Option<ThreadId> {
        self.ownership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .thread
    }

    /// Number of engine scopes holding this engine
    pub fn hold_depth(&self) -> usize {
        self.ownership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .depth
    }

    /// Take (or re-take) ownership for the calling thread
    pub(crate) fn acquire(&self) {
        let current = thread::current().id();
        let mut ownership = self.ownership.lock().unwrap_or_else(PoisonError::into_inner);
        let holder = ownership.thread;
        match holder {
            Some(owner) if owner != current => {
                drop(ownership);
                fatal(
                    Fatal::ThreadAffinity,
                    format_args!(
                        "engine {} is held by {:?}, cannot enter from {:?}",
                        self.id, owner, current
                    ),
                );
            }
            _ => {
                ownership.thread = Some(current);
                ownership.depth += 1;
            }
        }
    }

    pub(crate) fn release(&self) {
        let mut ownership = self.ownership.lock().unwrap_or_else(PoisonError::into_inner);
        ownership.depth = ownership.depth.saturating_sub(1);
        if ownership.depth == 0 {
            ownership.thread = None;
        }
    }
}

impl Drop for EngineState {
    fn drop(&mut self) {
        debug!(runtime = self.runtime_type.tag(), engine = self.id.get(), "engine destroyed");
    }
}

/// Primitive operations an engine adapter supplies
///
/// Adapters are free to choose how locals are stored (refcounted handles,
/// rooted slots, stack-scoped values). The scope guards only rely on:
/// after `close_frame`, no local owned by that frame resolves any more
/// unless it was promoted first.
///
/// Callers reach these through [`EngineScope`](crate::EngineScope),
/// [`StackFrameScope`](crate::StackFrameScope) and
/// [`StringHolder`](crate::StringHolder), which check that the engine is
/// current on the calling thread before delegating.
pub trait ScriptEngine: 'static {
    /// What a local resolves to: an owned value or a persistent handle
    type Value;

    fn state(&self) -> &EngineState;

    /// Resolve `local`; fails with `EngineNotActive` unless the engine is current
    fn get(&self, local: Local) -> Result<Self::Value>;

    /// Handle the thread's active stack uses to switch this engine in and out
    fn context_switch(&self) -> Rc<dyn ContextSwitch>;

    fn open_frame(&self) -> Result<FrameId>;

    /// Release every local still owned by `frame`. Closing any frame but
    /// the innermost is a fatal scope order violation.
    fn close_frame(&self, frame: FrameId);

    /// Rebind `local` to the frame enclosing `frame`
    fn promote(&self, frame: FrameId, local: Local) -> Result<Local>;

    fn kind_of(&self, local: Local) -> Result<ValueKind>;

    /// Expose the canonical bytes of a string local to `f`
    fn with_string_bytes<R, F>(&self, local: Local, f: F) -> Result<R>
    where
        F: FnOnce(NativeStr<'_>) -> R;

    /// UTF-8 copy of a string local followed by a NUL byte
    ///
    /// The default decodes the bytes exposed by `with_string_bytes`.
    /// Adapters whose engine already returns an owned, validated UTF-8 copy
    /// override it so the text is copied once.
    fn copy_string(&self, local: Local) -> Result<String> {
        self.with_string_bytes(local, transcode)?
    }

    fn id(&self) -> EngineId {
        self.state().id()
    }
}

/// Context-switch bookkeeping of one engine
///
/// Called by the active stack whenever the thread's current engine changes:
/// the engine that stops being current is deactivated, the one that becomes
/// current is activated. Calls come in strict alternation per engine.
/// Implementations must not open or close scopes.
pub trait ContextSwitch {
    fn activate(&self);

    fn deactivate(&self);
}

/// Flag-only switch for engines without a native enter/exit call
#[derive(Debug)]
pub struct SwitchFlag {
    runtime: RuntimeType,
    engine: EngineId,
    active: Cell<bool>,
    switches: Cell<u64>,
}

impl SwitchFlag {
    pub fn new(runtime: RuntimeType, engine: EngineId) -> Self {
        Self {
            runtime,
            engine,
            active: Cell::new(false),
            switches: Cell::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// How many times the engine was switched in
    pub fn switches(&self) -> u64 {
        self.switches.get()
    }
}

impl ContextSwitch for SwitchFlag {
    fn activate(&self) {
        if !self.active.replace(true) {
            self.switches.set(self.switches.get() + 1);
            trace!(runtime = self.runtime.tag(), engine = self.engine.get(), "context switched in");
        }
    }

    fn deactivate(&self) {
        if self.active.replace(false) {
            trace!(runtime = self.runtime.tag(), engine = self.engine.get(), "context switched out");
        }
    }
}

/// Anything that owns a frame locals can be allocated into
///
/// Implemented by [`EngineScope`](crate::EngineScope) (its base frame) and
/// [`StackFrameScope`](crate::StackFrameScope).
pub trait LocalScope<E: ScriptEngine> {
    fn engine(&self) -> &E;

    fn frame_id(&self) -> FrameId;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_engine_ids_are_unique() {
        let a = EngineId::next();
        let b = EngineId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_acquire_nests_on_same_thread() {
        let state = EngineState::new(RuntimeType::Memory, None);
        state.acquire();
        state.acquire();
        assert_eq!(state.hold_depth(), 2);
        assert_eq!(state.owner(), Some(thread::current().id()));

        state.release();
        assert_eq!(state.owner(), Some(thread::current().id()));
        state.release();
        assert_eq!(state.owner(), None);
        assert_eq!(state.hold_depth(), 0);
    }

    #[test]
    fn test_switch_flag_counts_transitions() {
        let flag = SwitchFlag::new(RuntimeType::Memory, EngineId::next());
        assert!(!flag.is_active());
        flag.activate();
        flag.activate();
        assert!(flag.is_active());
        assert_eq!(flag.switches(), 1);
        flag.deactivate();
        flag.deactivate();
        assert!(!flag.is_active());
        flag.activate();
        assert_eq!(flag.switches(), 2);
    }

    #[test]
    fn test_released_engine_can_move_threads() {
        let state = Arc::new(EngineState::new(RuntimeType::Memory, Some("worker".into())));
        state.acquire();
        state.release();

        let remote = Arc::clone(&state);
        thread::spawn(move || {
            remote.acquire();
            remote.release();
        })
        .join()
        .unwrap();
        assert_eq!(state.label(), Some("worker"));
    }

    #[test]
    fn test_acquire_from_other_thread_is_fatal() {
        let state = Arc::new(EngineState::new(RuntimeType::Memory, None));
        state.acquire();

        let remote = Arc::clone(&state);
        let result = thread::spawn(move || remote.acquire()).join();
        assert!(result.is_err());
        // The owning thread is unaffected
        assert_eq!(state.owner(), Some(thread::current().id()));
        state.release();
    }
}
