use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::{ContextSwitch, EngineState, LocalScope, ScriptEngine, SwitchFlag};
use crate::error::{Result, ScopeError};
use crate::locals::{FrameId, Local, LocalTable};
use crate::runtime_type::RuntimeType;
use crate::scope::EngineScope;
use crate::value::{Encoding, NativeStr, ValueKind};

use super::value::{MemString, MemValue};

/// In-process reference engine
///
/// Values live directly in the local table; there is no heap and no
/// collector, so a value exists exactly as long as some frame owns a local
/// for it. Strings keep the encoding they were created with, which lets the
/// marshaling path see Latin-1, UTF-8 and UTF-16 storage.
pub struct MemoryEngine {
    state: EngineState,
    locals: RefCell<LocalTable<MemValue>>,
    switch: Rc<SwitchFlag>,
    string_reads: Cell<u64>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let state = EngineState::new(RuntimeType::Memory, config.name.clone());
        debug!(
            runtime = RuntimeType::Memory.tag(),
            engine = state.id().get(),
            "memory engine ready (max {} frames, {} locals)",
            config.max_frame_depth,
            config.max_locals
        );

        Self {
            locals: RefCell::new(LocalTable::new(state.id(), &config)),
            switch: Rc::new(SwitchFlag::new(RuntimeType::Memory, state.id())),
            state,
            string_reads: Cell::new(0),
        }
    }

    /// Whether the engine context is currently switched in
    pub fn is_active(&self) -> bool {
        self.switch.is_active()
    }

    /// How many times the engine context was switched in
    pub fn context_switches(&self) -> u64 {
        self.switch.switches()
    }

    /// How many times string bytes were handed out
    pub fn string_reads(&self) -> u64 {
        self.string_reads.get()
    }

    pub fn live_locals(&self) -> usize {
        self.locals.borrow().live()
    }

    pub fn frame_depth(&self) -> usize {
        self.locals.borrow().depth()
    }

    fn alloc<S: LocalScope<Self>>(scope: &S, value: MemValue) -> Result<Local> {
        let engine = scope.engine();
        EngineScope::ensure_current(engine)?;
        engine.locals.borrow_mut().alloc(scope.frame_id(), value)
    }

    pub fn new_undefined<S: LocalScope<Self>>(scope: &S) -> Result<Local> {
        Self::alloc(scope, MemValue::Undefined)
    }

    pub fn new_null<S: LocalScope<Self>>(scope: &S) -> Result<Local> {
        Self::alloc(scope, MemValue::Null)
    }

    pub fn new_bool<S: LocalScope<Self>>(scope: &S, value: bool) -> Result<Local> {
        Self::alloc(scope, MemValue::Bool(value))
    }

    pub fn new_number<S: LocalScope<Self>>(scope: &S, value: f64) -> Result<Local> {
        Self::alloc(scope, MemValue::Number(value))
    }

    /// New string stored as UTF-8
    pub fn new_string<S: LocalScope<Self>>(scope: &S, text: &str) -> Result<Local> {
        Self::new_string_in(scope, text, Encoding::Utf8)
    }

    /// New string stored in `encoding`
    ///
    /// # Errors
    /// `InvalidEncoding` if `text` has characters Latin-1 cannot store
    pub fn new_string_in<S: LocalScope<Self>>(
        scope: &S,
        text: &str,
        encoding: Encoding,
    ) -> Result<Local> {
        let bytes: Vec<u8> = match encoding {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)))
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| ScopeError::InvalidEncoding {
                    encoding,
                    reason: format!("{:?} has characters above U+00FF", text),
                })?,
            Encoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        };
        Self::new_raw_string(scope, &bytes, encoding)
    }

    /// New string from raw storage bytes, not validated
    pub fn new_raw_string<S: LocalScope<Self>>(
        scope: &S,
        bytes: &[u8],
        encoding: Encoding,
    ) -> Result<Local> {
        Self::alloc(scope, MemValue::String(MemString::new(bytes, encoding)))
    }

    /// New array holding copies of the values behind `items`
    pub fn new_array<S: LocalScope<Self>>(scope: &S, items: &[Local]) -> Result<Local> {
        let engine = scope.engine();
        let values = items
            .iter()
            .map(|&item| engine.get(item))
            .collect::<Result<Vec<_>>>()?;
        Self::alloc(scope, MemValue::Array(Rc::new(values)))
    }

    /// Element `index` of `array` as a new local in `scope`
    pub fn array_get<S: LocalScope<Self>>(scope: &S, array: Local, index: usize) -> Result<Local> {
        let element = match scope.engine().get(array)? {
            MemValue::Array(items) => items.get(index).cloned().unwrap_or(MemValue::Undefined),
            other => {
                return Err(ScopeError::TypeMismatch {
                    expected: ValueKind::Array,
                    found: other.kind(),
                });
            }
        };
        Self::alloc(scope, element)
    }

    pub fn to_number(&self, local: Local) -> Result<f64> {
        match self.get(local)? {
            MemValue::Number(n) => Ok(n),
            other => Err(ScopeError::TypeMismatch {
                expected: ValueKind::Number,
                found: other.kind(),
            }),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for MemoryEngine {
    type Value = MemValue;

    fn state(&self) -> &EngineState {
        &self.state
    }

    /// Copy of the value behind `local`
    fn get(&self, local: Local) -> Result<MemValue> {
        EngineScope::ensure_current(self)?;
        self.locals.borrow().get(local).cloned()
    }

    fn context_switch(&self) -> Rc<dyn ContextSwitch> {
        self.switch.clone()
    }

    fn open_frame(&self) -> Result<FrameId> {
        self.locals.borrow_mut().open_frame()
    }

    fn close_frame(&self, frame: FrameId) {
        self.locals.borrow_mut().close_frame(frame);
    }

    fn promote(&self, frame: FrameId, local: Local) -> Result<Local> {
        self.locals.borrow_mut().promote(frame, local)
    }

    fn kind_of(&self, local: Local) -> Result<ValueKind> {
        self.locals.borrow().get(local).map(MemValue::kind)
    }

    fn with_string_bytes<R, F>(&self, local: Local, f: F) -> Result<R>
    where
        F: FnOnce(NativeStr<'_>) -> R,
    {
        let locals = self.locals.borrow();
        match locals.get(local)? {
            MemValue::String(s) => {
                self.string_reads.set(self.string_reads.get() + 1);
                Ok(f(NativeStr::new(s.bytes(), s.encoding())))
            }
            other => Err(ScopeError::TypeMismatch {
                expected: ValueKind::String,
                found: other.kind(),
            }),
        }
    }
}
