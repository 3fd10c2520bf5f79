//! Engine scope guards
//!
//! [`EngineScope`] makes an engine current on the calling thread until it
//! is dropped; [`ExitEngineScope`] suspends it again for a nested region.
//! Both restore the previous state in `Drop`, so every exit path (early
//! return, `?`, panic unwinding) leaves the thread exactly as it found it.

use std::marker::PhantomData;

use tracing::trace;

use crate::context::{self, ActiveEngine};
use crate::engine::{EngineId, LocalScope, ScriptEngine};
use crate::error::Result;
use crate::locals::FrameId;

/// Guard marking `engine` as the current engine of this thread
///
/// Scopes nest: entering the same engine again is allowed, entering a
/// different engine makes that one current until the inner scope drops.
/// Each scope also opens a base frame, so locals can be allocated directly
/// against the scope.
///
/// Scopes must be dropped in reverse order of creation. Dropping one out
/// of order is fatal.
///
/// ```rust,ignore
/// let engine = MemoryEngine::new();
/// let scope = EngineScope::new(&engine)?;
/// let frame = StackFrameScope::new(&scope)?;
/// let text = MemoryEngine::new_string(&frame, "hello")?;
/// let holder = StringHolder::new(&engine, text)?;
/// ```
pub struct EngineScope<'e, E: ScriptEngine> {
    engine: &'e E,
    token: u64,
    frame: FrameId,
    // pinned to the thread that entered
    _not_send: PhantomData<*const ()>,
}

impl<'e, E: ScriptEngine> EngineScope<'e, E> {
    /// Enter `engine` on the calling thread
    ///
    /// # Panics
    /// If another thread currently holds `engine`.
    pub fn new(engine: &'e E) -> Result<Self> {
        let state = engine.state();
        state.acquire();

        let token = context::push_entered(ActiveEngine::of(state), engine.context_switch());

        let frame = match engine.open_frame() {
            Ok(frame) => frame,
            Err(e) => {
                context::pop(token, "engine scope");
                state.release();
                return Err(e);
            }
        };

        trace!(
            runtime = state.runtime_type().tag(),
            engine = state.id().get(),
            "enter engine scope (depth {})",
            context::depth()
        );

        Ok(Self {
            engine,
            token,
            frame,
            _not_send: PhantomData,
        })
    }

    /// Run `f` with `engine` entered, leaving it afterwards
    pub fn with<R>(engine: &'e E, f: impl FnOnce(&EngineScope<'e, E>) -> R) -> Result<R> {
        let scope = EngineScope::new(engine)?;
        Ok(f(&scope))
    }

    pub fn engine(&self) -> &'e E {
        self.engine
    }

    pub fn id(&self) -> EngineId {
        self.engine.id()
    }

    /// Check whether `engine` is the current engine of this thread
    pub fn is_current(engine: &E) -> bool {
        context::is_current(engine.id())
    }

    /// Fail with `EngineNotActive` unless `engine` is current on this thread
    pub fn ensure_current(engine: &E) -> Result<()> {
        context::ensure_current(engine.id())
    }

    /// Engine current on this thread, whatever its adapter type
    pub fn current() -> Option<ActiveEngine> {
        context::current()
    }

    /// Number of engine and exit scopes open on this thread
    pub fn depth() -> usize {
        context::depth()
    }
}

impl<E: ScriptEngine> LocalScope<E> for EngineScope<'_, E> {
    fn engine(&self) -> &E {
        self.engine
    }

    fn frame_id(&self) -> FrameId {
        self.frame
    }
}

impl<E: ScriptEngine> Drop for EngineScope<'_, E> {
    fn drop(&mut self) {
        let state = self.engine.state();
        context::pop(self.token, "engine scope");
        self.engine.close_frame(self.frame);
        state.release();

        trace!(
            runtime = state.runtime_type().tag(),
            engine = state.id().get(),
            "leave engine scope"
        );
    }
}

/// Guard suspending the engine of an open [`EngineScope`]
///
/// While it lives, the engine is not current: engine-scoped operations on
/// it fail with `EngineNotActive`, and the thread may enter another engine
/// or run host code. Dropping it makes the engine current again.
pub struct ExitEngineScope<'s, E: ScriptEngine> {
    engine: &'s E,
    token: u64,
    _not_send: PhantomData<*const ()>,
}

impl<'s, E: ScriptEngine> ExitEngineScope<'s, E> {
    /// Suspend `scope`'s engine, which must be current on this thread
    pub fn new(scope: &'s EngineScope<'_, E>) -> Result<Self> {
        let engine: &'s E = scope.engine;
        context::ensure_current(engine.id())?;

        let token =
            context::push_exited(ActiveEngine::of(engine.state()), engine.context_switch());

        trace!(
            runtime = engine.state().runtime_type().tag(),
            engine = engine.id().get(),
            "exit engine scope"
        );

        Ok(Self {
            engine,
            token,
            _not_send: PhantomData,
        })
    }

    /// Run `f` with `scope`'s engine suspended
    pub fn with<R>(scope: &'s EngineScope<'_, E>, f: impl FnOnce() -> R) -> Result<R> {
        let _exit = ExitEngineScope::new(scope)?;
        Ok(f())
    }
}

impl<E: ScriptEngine> Drop for ExitEngineScope<'_, E> {
    fn drop(&mut self) {
        context::pop(self.token, "exit scope");

        trace!(
            runtime = self.engine.state().runtime_type().tag(),
            engine = self.engine.id().get(),
            "re-enter engine scope"
        );
    }
}
