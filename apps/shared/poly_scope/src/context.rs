//! Per-thread record of which engine is current
//!
//! The stack starts empty on every thread. Entering an engine pushes an
//! `Entered` entry, suspending it pushes `Exited`; the current engine is
//! the engine of the top entry if that entry is `Entered`. Only the scope
//! guards push and pop, and every pop must match the top entry.
//!
//! Whenever a push or pop changes the current engine, the previous one is
//! switched out and the new one switched in through its [`ContextSwitch`].

use std::cell::RefCell;
use std::rc::Rc;

use tracing::error;

use crate::engine::{ContextSwitch, EngineId, EngineState};
use crate::error::{Fatal, Result, ScopeError, fatal};
use crate::runtime_type::RuntimeType;

/// The engine current on the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveEngine {
    pub id: EngineId,
    pub runtime_type: RuntimeType,
}

impl ActiveEngine {
    pub(crate) fn of(state: &EngineState) -> Self {
        Self {
            id: state.id(),
            runtime_type: state.runtime_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Entered,
    Exited,
}

struct Entry {
    kind: EntryKind,
    engine: ActiveEngine,
    token: u64,
    // keeps the switch alive even if the engine goes away with the entry leaked
    switch: Rc<dyn ContextSwitch>,
}

#[derive(Default)]
struct ActiveStack {
    entries: Vec<Entry>,
    next_token: u64,
}

impl ActiveStack {
    fn push(
        &mut self,
        kind: EntryKind,
        engine: ActiveEngine,
        switch: Rc<dyn ContextSwitch>,
    ) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        self.entries.push(Entry {
            kind,
            engine,
            token,
            switch,
        });
        token
    }

    fn current_entry(&self) -> Option<&Entry> {
        self.entries
            .last()
            .filter(|entry| entry.kind == EntryKind::Entered)
    }

    fn current(&self) -> Option<ActiveEngine> {
        self.current_entry().map(|entry| entry.engine)
    }

    fn current_switch(&self) -> Option<(EngineId, Rc<dyn ContextSwitch>)> {
        self.current_entry()
            .map(|entry| (entry.engine.id, Rc::clone(&entry.switch)))
    }
}

impl Drop for ActiveStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            error!(
                "thread exiting with {} engine scope(s) still open",
                self.entries.len()
            );
        }
    }
}

thread_local! {
    static ACTIVE: RefCell<ActiveStack> = RefCell::new(ActiveStack::default());
}

type Switch = Option<(EngineId, Rc<dyn ContextSwitch>)>;

/// Run backend bookkeeping for a change of current engine
///
/// Called with the stack borrow released, so a switch may query the stack.
fn switch_over(before: Switch, after: Switch) {
    let unchanged = matches!(
        (&before, &after),
        (Some((old, _)), Some((new, _))) if old == new
    );
    if unchanged {
        return;
    }
    if let Some((_, switch)) = before {
        switch.deactivate();
    }
    if let Some((_, switch)) = after {
        switch.activate();
    }
}

fn push(kind: EntryKind, engine: ActiveEngine, switch: Rc<dyn ContextSwitch>) -> u64 {
    let (token, before, after) = ACTIVE.with(|stack| {
        let mut stack = stack.borrow_mut();
        let before = stack.current_switch();
        let token = stack.push(kind, engine, switch);
        (token, before, stack.current_switch())
    });
    switch_over(before, after);
    token
}

/// Make `engine` current, switching out whichever engine was
pub(crate) fn push_entered(engine: ActiveEngine, switch: Rc<dyn ContextSwitch>) -> u64 {
    push(EntryKind::Entered, engine, switch)
}

/// Suspend `engine`, leaving the thread with no current engine
pub(crate) fn push_exited(engine: ActiveEngine, switch: Rc<dyn ContextSwitch>) -> u64 {
    push(EntryKind::Exited, engine, switch)
}

/// Remove the entry created under `token`, which must be the top entry,
/// and switch back to the engine that is current afterwards
pub(crate) fn pop(token: u64, what: &str) {
    let outcome = ACTIVE.try_with(|stack| {
        let mut stack = stack.borrow_mut();
        let top = stack
            .entries
            .last()
            .map(|entry| (entry.token, entry.engine.id));
        match top {
            Some((top_token, _)) if top_token == token => {
                let before = stack.current_switch();
                stack.entries.pop();
                Ok((before, stack.current_switch()))
            }
            Some((top_token, engine)) => Err(format!(
                "{} closed while engine {} scope (token {}) is still open above it",
                what, engine, top_token
            )),
            None => Err(format!("{} closed but no engine scope is open", what)),
        }
    });

    match outcome {
        Ok(Ok((before, after))) => switch_over(before, after),
        Ok(Err(detail)) => fatal(Fatal::ScopeOrderViolation, detail),
        // Thread-local storage already torn down: nothing left to restore
        Err(_) => {}
    }
}

/// Engine current on this thread, `None` outside any scope or inside an exit scope
pub fn current() -> Option<ActiveEngine> {
    ACTIVE
        .try_with(|stack| stack.borrow().current())
        .ok()
        .flatten()
}

/// Number of open engine and exit scopes on this thread
pub fn depth() -> usize {
    ACTIVE
        .try_with(|stack| stack.borrow().entries.len())
        .unwrap_or(0)
}

pub fn is_current(id: EngineId) -> bool {
    current().is_some_and(|active| active.id == id)
}

pub(crate) fn ensure_current(id: EngineId) -> Result<()> {
    if is_current(id) {
        Ok(())
    } else {
        Err(ScopeError::EngineNotActive(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SwitchFlag;

    fn engine() -> (ActiveEngine, Rc<SwitchFlag>) {
        let id = EngineId::next();
        let engine = ActiveEngine {
            id,
            runtime_type: RuntimeType::Memory,
        };
        (engine, Rc::new(SwitchFlag::new(RuntimeType::Memory, id)))
    }

    #[test]
    fn test_empty_thread_has_no_engine() {
        std::thread::spawn(|| {
            assert_eq!(current(), None);
            assert_eq!(depth(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_exit_entry_hides_engine() {
        let (a, flag) = engine();
        let entered = push_entered(a, flag.clone());
        assert_eq!(current(), Some(a));
        assert!(flag.is_active());

        let exited = push_exited(a, flag.clone());
        assert_eq!(current(), None);
        assert!(!flag.is_active());
        assert!(ensure_current(a.id).is_err());

        pop(exited, "exit scope");
        assert!(ensure_current(a.id).is_ok());
        assert!(flag.is_active());
        pop(entered, "engine scope");
        assert_eq!(current(), None);
        assert!(!flag.is_active());
    }

    #[test]
    fn test_switching_follows_top_entry() {
        let (a, flag_a) = engine();
        let (b, flag_b) = engine();

        let outer = push_entered(a, flag_a.clone());
        let middle = push_entered(b, flag_b.clone());
        assert!(!flag_a.is_active());
        assert!(flag_b.is_active());

        let inner = push_entered(a, flag_a.clone());
        assert!(flag_a.is_active());
        assert!(!flag_b.is_active());

        pop(inner, "engine scope");
        assert!(!flag_a.is_active());
        assert!(flag_b.is_active());
        pop(middle, "engine scope");
        assert!(flag_a.is_active());
        assert!(!flag_b.is_active());
        pop(outer, "engine scope");
        assert!(!flag_a.is_active());
        assert_eq!(flag_a.switches(), 3);
        assert_eq!(flag_b.switches(), 2);
    }

    #[test]
    fn test_same_engine_nesting_does_not_switch() {
        let (a, flag) = engine();
        let outer = push_entered(a, flag.clone());
        let inner = push_entered(a, flag.clone());
        pop(inner, "engine scope");
        assert!(flag.is_active());
        pop(outer, "engine scope");
        assert_eq!(flag.switches(), 1);
    }

    #[test]
    #[should_panic(expected = "Scope order violation")]
    fn test_pop_out_of_order_is_fatal() {
        let (a, flag_a) = engine();
        let (b, flag_b) = engine();
        let outer = push_entered(a, flag_a);
        let _inner = push_entered(b, flag_b);
        pop(outer, "engine scope");
    }
}
