//! Polyscript Scope System
//!
//! Engine-neutral scope lifecycle and value marshaling for hosts embedding
//! one or more script engines. Host code declares which engine it is
//! working with, brackets the values it touches in stack frames, and copies
//! engine strings into host-owned buffers.
//!
//! # Architecture
//!
//! - **ScriptEngine**: Trait every engine adapter implements (context switch, frames, values)
//! - **EngineScope**: Guard making an engine current on the calling thread
//! - **ExitEngineScope**: Guard suspending the current engine for a nested region
//! - **StackFrameScope**: Guard owning the locals allocated during one call
//! - **StringHolder**: Engine-independent copy of a native string
//! - **LocalTable**: Generation-checked slot table adapters use to back their locals
//!
//! All guards are released in `Drop`, in reverse order of creation. Closing
//! a guard out of order is a fatal error ([`Fatal::ScopeOrderViolation`]).
//!
//! # Usage
//!
//! ```rust,ignore
//! use poly_scope::{EngineScope, MemoryEngine, StackFrameScope, StringHolder};
//!
//! let engine = MemoryEngine::new();
//! let scope = EngineScope::new(&engine)?;
//! let kept = {
//!     let frame = StackFrameScope::new(&scope)?;
//!     let text = MemoryEngine::new_string(&frame, "hello")?;
//!     frame.return_value(text)?
//! };
//! let holder = StringHolder::new(&engine, kept)?;
//! assert_eq!(holder, "hello");
//! ```

pub mod adapters;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod locals;
pub mod runtime_type;
pub mod scope;
pub mod string_holder;
pub mod value;

pub use adapters::memory::{MemValue, MemoryEngine};
#[cfg(feature = "quickjs")]
pub use adapters::quickjs::QuickJsEngine;
pub use config::{ConfigError, EngineConfig, Validatable};
pub use context::ActiveEngine;
pub use engine::{ContextSwitch, EngineId, EngineState, LocalScope, ScriptEngine, SwitchFlag};
pub use error::{Fatal, Result, ScopeError};
pub use frame::StackFrameScope;
pub use locals::{FrameId, Local, LocalTable};
pub use runtime_type::RuntimeType;
pub use scope::{EngineScope, ExitEngineScope};
pub use string_holder::StringHolder;
pub use value::{Encoding, NativeStr, ValueKind};
