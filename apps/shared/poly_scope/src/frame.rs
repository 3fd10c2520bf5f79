use std::marker::PhantomData;

use tracing::trace;

use crate::context;
use crate::engine::{LocalScope, ScriptEngine};
use crate::error::{Fatal, Result, fatal};
use crate::locals::{FrameId, Local};

/// Guard bracketing the locals of one call or evaluation
///
/// Every local allocated against the frame is released when the frame
/// drops, unless it was handed to [`return_value`](Self::return_value)
/// first. Released locals report `StaleReference` on later use.
///
/// A frame borrows its parent (an [`EngineScope`](crate::EngineScope) or
/// another frame), so it cannot outlive it.
pub struct StackFrameScope<'s, E: ScriptEngine> {
    engine: &'s E,
    id: FrameId,
    _not_send: PhantomData<*const ()>,
}

impl<'s, E: ScriptEngine> StackFrameScope<'s, E> {
    /// Open a frame inside `parent`; the engine must be current
    pub fn new<P: LocalScope<E>>(parent: &'s P) -> Result<Self> {
        let engine = parent.engine();
        context::ensure_current(engine.id())?;

        let id = engine.open_frame()?;
        trace!(
            runtime = engine.state().runtime_type().tag(),
            engine = engine.id().get(),
            "open stack frame at depth {}",
            id.depth()
        );

        Ok(Self {
            engine,
            id,
            _not_send: PhantomData,
        })
    }

    /// Open a frame nested in this one
    pub fn nested(&self) -> Result<StackFrameScope<'_, E>> {
        StackFrameScope::new(self)
    }

    /// Keep `local` alive past this frame by moving it to the enclosing one
    ///
    /// The returned handle denotes the same value and stays valid until the
    /// enclosing frame closes.
    pub fn return_value(&self, local: Local) -> Result<Local> {
        context::ensure_current(self.engine.id())?;
        self.engine.promote(self.id, local)
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn depth(&self) -> usize {
        self.id.depth()
    }
}

impl<E: ScriptEngine> LocalScope<E> for StackFrameScope<'_, E> {
    fn engine(&self) -> &E {
        self.engine
    }

    fn frame_id(&self) -> FrameId {
        self.id
    }
}

impl<E: ScriptEngine> Drop for StackFrameScope<'_, E> {
    fn drop(&mut self) {
        if !context::is_current(self.engine.id()) {
            fatal(
                Fatal::ScopeOrderViolation,
                format_args!(
                    "stack frame at depth {} of engine {} closed while its engine is not current",
                    self.id.depth(),
                    self.engine.id()
                ),
            );
        }

        self.engine.close_frame(self.id);
        trace!(
            runtime = self.engine.state().runtime_type().tag(),
            engine = self.engine.id().get(),
            "close stack frame at depth {}",
            self.id.depth()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryEngine;
    use crate::config::EngineConfig;
    use crate::error::ScopeError;
    use crate::scope::{EngineScope, ExitEngineScope};
    use crate::string_holder::StringHolder;
    use std::mem::ManuallyDrop;

    #[test]
    fn test_promoted_value_survives_inner_frame() {
        let engine = MemoryEngine::new();
        {
            let scope = EngineScope::new(&engine).unwrap();
            let outer = StackFrameScope::new(&scope).unwrap();
            assert_eq!(outer.depth(), 1);
            let kept = MemoryEngine::new_string(&outer, "outer").unwrap();

            let (result, temp) = {
                let inner = outer.nested().unwrap();
                assert_eq!(inner.depth(), 2);
                let temp = MemoryEngine::new_string(&inner, "scratch").unwrap();
                let result = MemoryEngine::new_number(&inner, 42.0).unwrap();
                (inner.return_value(result).unwrap(), temp)
            };

            assert_eq!(engine.to_number(result).unwrap(), 42.0);
            assert_eq!(StringHolder::new(&engine, kept).unwrap(), "outer");
            assert!(matches!(
                engine.get(temp),
                Err(ScopeError::StaleReference { .. })
            ));

            drop(outer);
            for local in [result, kept] {
                assert!(matches!(
                    engine.get(local),
                    Err(ScopeError::StaleReference { .. })
                ));
            }
            assert!(engine.is_active());
        }
        assert!(!engine.is_active());
        assert_eq!(engine.live_locals(), 0);
    }

    #[test]
    fn test_frame_requires_current_engine() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();
        let _exit = ExitEngineScope::new(&scope).unwrap();
        assert_eq!(
            StackFrameScope::new(&scope).err(),
            Some(ScopeError::EngineNotActive(engine.id()))
        );
    }

    #[test]
    fn test_frame_of_suspended_engine_rejects_allocation() {
        let a = MemoryEngine::new();
        let b = MemoryEngine::new();
        let scope_a = EngineScope::new(&a).unwrap();
        let frame_a = StackFrameScope::new(&scope_a).unwrap();
        let kept = MemoryEngine::new_number(&frame_a, 1.0).unwrap();
        {
            let scope_b = EngineScope::new(&b).unwrap();
            assert_eq!(
                MemoryEngine::new_number(&frame_a, 2.0),
                Err(ScopeError::EngineNotActive(a.id()))
            );
            assert_eq!(
                frame_a.return_value(kept),
                Err(ScopeError::EngineNotActive(a.id()))
            );
            // a local of one engine means nothing to another
            let frame_b = StackFrameScope::new(&scope_b).unwrap();
            assert!(matches!(
                frame_b.return_value(kept),
                Err(ScopeError::EngineMismatch { .. })
            ));
        }
        assert_eq!(a.to_number(kept).unwrap(), 1.0);
    }

    #[test]
    fn test_local_limit_per_engine() {
        let engine = MemoryEngine::with_config(EngineConfig::default().with_max_locals(2));
        let scope = EngineScope::new(&engine).unwrap();
        MemoryEngine::new_null(&scope).unwrap();
        {
            let frame = StackFrameScope::new(&scope).unwrap();
            MemoryEngine::new_null(&frame).unwrap();
            assert_eq!(
                MemoryEngine::new_null(&frame),
                Err(ScopeError::TooManyLocals { limit: 2 })
            );
        }
        assert!(MemoryEngine::new_null(&scope).is_ok());
    }

    #[test]
    fn test_slots_reused_across_frames() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();
        for round in 0..100 {
            let frame = StackFrameScope::new(&scope).unwrap();
            for _ in 0..10 {
                MemoryEngine::new_number(&frame, round as f64).unwrap();
            }
        }
        assert_eq!(engine.live_locals(), 0);
        assert_eq!(engine.frame_depth(), 1);
    }

    #[test]
    #[should_panic(expected = "Scope order violation")]
    fn test_frame_closed_under_other_engine_is_fatal() {
        let a = MemoryEngine::new();
        let b = MemoryEngine::new();
        // leaked so unwinding does not close a's base frame over the open frame
        let scope_a = ManuallyDrop::new(EngineScope::new(&a).unwrap());
        let frame_a = StackFrameScope::new(&*scope_a).unwrap();
        let _scope_b = EngineScope::new(&b).unwrap();
        drop(frame_a);
    }
}
