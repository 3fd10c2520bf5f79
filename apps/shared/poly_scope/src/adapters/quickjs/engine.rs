use std::cell::RefCell;
use std::rc::Rc;

use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Function, Persistent, Runtime, Value};
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::engine::{ContextSwitch, EngineState, LocalScope, ScriptEngine, SwitchFlag};
use crate::error::{Result, ScopeError};
use crate::locals::{FrameId, Local, LocalTable};
use crate::runtime_type::RuntimeType;
use crate::scope::EngineScope;
use crate::value::{Encoding, NativeStr, ValueKind};

type Saved = Persistent<Value<'static>>;

/// QuickJS engine: one runtime with one full context
///
/// Locals hold persistent references, so a value stays reachable for the
/// collector exactly as long as the frame owning its local is open.
pub struct QuickJsEngine {
    // dropped first: persistent values must be freed before the runtime
    locals: RefCell<LocalTable<Saved>>,
    context: Context,
    runtime: Runtime,
    state: EngineState,
    switch: Rc<SwitchFlag>,
}

impl QuickJsEngine {
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| ScopeError::Engine(e.to_string()))?;
        let context = Context::full(&runtime).map_err(|e| ScopeError::Engine(e.to_string()))?;
        let state = EngineState::new(RuntimeType::JavaScript, config.name.clone());
        debug!(
            runtime = RuntimeType::JavaScript.tag(),
            engine = state.id().get(),
            "quickjs engine ready (max {} frames, {} locals)",
            config.max_frame_depth,
            config.max_locals
        );

        Ok(Self {
            locals: RefCell::new(LocalTable::new(state.id(), &config)),
            context,
            runtime,
            switch: Rc::new(SwitchFlag::new(RuntimeType::JavaScript, state.id())),
            state,
        })
    }

    pub fn is_active(&self) -> bool {
        self.switch.is_active()
    }

    pub fn live_locals(&self) -> usize {
        self.locals.borrow().live()
    }

    /// Run a full collection; values behind closed frames become collectable
    pub fn collect_garbage(&self) {
        self.runtime.run_gc();
    }

    fn saved(&self, local: Local) -> Result<Saved> {
        self.locals.borrow().get(local).cloned()
    }

    /// Owned UTF-8 copy of a string local
    fn string_text(&self, local: Local) -> Result<String> {
        let saved = self.saved(local)?;
        self.context.with(|ctx| {
            let value = saved.restore(&ctx).map_err(|e| js_error(&ctx, e))?;
            let Some(text) = value.as_string() else {
                return Err(ScopeError::TypeMismatch {
                    expected: ValueKind::String,
                    found: kind_of_value(&value),
                });
            };
            // QuickJS hands strings out as UTF-8; lone surrogates fail here
            text.to_string().map_err(|e| ScopeError::InvalidEncoding {
                encoding: Encoding::Utf8,
                reason: e.to_string(),
            })
        })
    }

    fn save<S, F>(scope: &S, make: F) -> Result<Local>
    where
        S: LocalScope<Self>,
        F: for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<Value<'js>>,
    {
        let engine = scope.engine();
        EngineScope::ensure_current(engine)?;

        let saved = engine.context.with(|ctx| {
            make(&ctx)
                .map(|value| Persistent::save(&ctx, value))
                .map_err(|e| js_error(&ctx, e))
        })?;
        engine.locals.borrow_mut().alloc(scope.frame_id(), saved)
    }

    /// Evaluate `source` as a script, its completion value as a new local
    ///
    /// A thrown exception is reported as `ScopeError::Engine` carrying
    /// `"Name: message"`.
    pub fn eval<S: LocalScope<Self>>(scope: &S, source: &str) -> Result<Local> {
        trace!(runtime = "js", engine = scope.engine().id().get(), "eval {} bytes", source.len());
        Self::save(scope, |ctx| ctx.eval::<Value, _>(source))
    }

    pub fn new_string<S: LocalScope<Self>>(scope: &S, text: &str) -> Result<Local> {
        Self::save(scope, |ctx| {
            rquickjs::String::from_str(ctx.clone(), text).map(|s| s.into_value())
        })
    }

    pub fn new_number<S: LocalScope<Self>>(scope: &S, value: f64) -> Result<Local> {
        Self::save(scope, |ctx| Ok(Value::new_float(ctx.clone(), value)))
    }

    /// Call `function` with `args`, the result as a new local in `scope`
    pub fn call<S: LocalScope<Self>>(scope: &S, function: Local, args: &[Local]) -> Result<Local> {
        let engine = scope.engine();
        EngineScope::ensure_current(engine)?;

        match engine.kind_of(function)? {
            ValueKind::Function => {}
            found => {
                return Err(ScopeError::TypeMismatch {
                    expected: ValueKind::Function,
                    found,
                });
            }
        }

        let function = engine.saved(function)?;
        let args = args
            .iter()
            .map(|&arg| engine.saved(arg))
            .collect::<Result<Vec<_>>>()?;

        Self::save(scope, move |ctx| {
            let function: Function = function.restore(ctx)?.get()?;
            let args = args
                .into_iter()
                .map(|arg| arg.restore(ctx))
                .collect::<rquickjs::Result<Vec<_>>>()?;
            function.call((Rest(args),))
        })
    }

    /// `String(value)` as a new local, for display
    pub fn stringify<S: LocalScope<Self>>(scope: &S, local: Local) -> Result<Local> {
        let value = scope.engine().saved(local)?;
        Self::save(scope, move |ctx| {
            let value = value.restore(ctx)?;
            let convert: Function = ctx.globals().get("String")?;
            convert.call((value,))
        })
    }

    /// Property `name` of `object` as a new local in `scope`
    pub fn get_property<S: LocalScope<Self>>(scope: &S, object: Local, name: &str) -> Result<Local> {
        let engine = scope.engine();
        EngineScope::ensure_current(engine)?;

        match engine.kind_of(object)? {
            ValueKind::Object | ValueKind::Array | ValueKind::Function => {}
            found => {
                return Err(ScopeError::TypeMismatch {
                    expected: ValueKind::Object,
                    found,
                });
            }
        }

        let object = engine.saved(object)?;
        Self::save(scope, move |ctx| {
            let value = object.restore(ctx)?;
            match value.as_object() {
                Some(object) => object.get(name),
                None => Ok(Value::new_undefined(ctx.clone())),
            }
        })
    }
}

impl ScriptEngine for QuickJsEngine {
    type Value = Saved;

    fn state(&self) -> &EngineState {
        &self.state
    }

    fn get(&self, local: Local) -> Result<Saved> {
        EngineScope::ensure_current(self)?;
        self.saved(local)
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
        let saved = self.saved(local)?;
        self.context.with(|ctx| {
            let value = saved.restore(&ctx).map_err(|e| js_error(&ctx, e))?;
            Ok(kind_of_value(&value))
        })
    }

    fn with_string_bytes<R, F>(&self, local: Local, f: F) -> Result<R>
    where
        F: FnOnce(NativeStr<'_>) -> R,
    {
        let text = self.string_text(local)?;
        Ok(f(NativeStr::new(text.as_bytes(), Encoding::Utf8)))
    }

    /// The engine's own UTF-8 copy, already validated, gets the NUL appended
    fn copy_string(&self, local: Local) -> Result<String> {
        let mut text = self.string_text(local)?;
        text.push('\0');
        Ok(text)
    }
}

fn kind_of_value(value: &Value<'_>) -> ValueKind {
    if value.is_undefined() {
        ValueKind::Undefined
    } else if value.is_null() {
        ValueKind::Null
    } else if value.is_bool() {
        ValueKind::Boolean
    } else if value.is_number() {
        ValueKind::Number
    } else if value.is_string() {
        ValueKind::String
    } else if value.is_array() {
        ValueKind::Array
    } else if value.is_function() {
        ValueKind::Function
    } else if value.is_object() {
        ValueKind::Object
    } else {
        ValueKind::Other
    }
}

fn js_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> ScopeError {
    if error.is_exception() {
        ScopeError::Engine(describe_exception(ctx))
    } else {
        ScopeError::Engine(error.to_string())
    }
}

fn as_text(value: Option<Value<'_>>) -> Option<String> {
    value?.as_string()?.to_string().ok()
}

/// Pending exception as `"Name: message"`, stack appended when present
fn describe_exception(ctx: &Ctx<'_>) -> String {
    let exception = ctx.catch();

    if let Some(object) = exception.as_object() {
        let name = as_text(object.get("name").ok()).unwrap_or_else(|| "Error".to_string());
        let mut output = match as_text(object.get("message").ok()) {
            Some(message) if !message.is_empty() => format!("{}: {}", name, message),
            _ => name,
        };
        if let Some(stack) = as_text(object.get("stack").ok()).filter(|s| !s.trim().is_empty()) {
            output.push('\n');
            output.push_str(stack.trim_end());
        }
        return output;
    }

    match as_text(Some(exception)) {
        Some(message) => format!("Error: {}", message),
        None => "Error: Unknown JavaScript error".to_string(),
    }
}
