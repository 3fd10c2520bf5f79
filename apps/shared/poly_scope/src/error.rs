use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::engine::EngineId;
use crate::value::{Encoding, ValueKind};

pub type Result<T> = std::result::Result<T, ScopeError>;

/// Recoverable failures surfaced by scope and marshaling operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScopeError {
    #[error("Engine {0} is not active on this thread")]
    EngineNotActive(EngineId),

    #[error("Stale reference: slot {slot} (generation {generation}) was released when its frame closed")]
    StaleReference { slot: u32, generation: u32 },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: ValueKind, found: ValueKind },

    #[error("Reference belongs to engine {found}, not engine {expected}")]
    EngineMismatch { expected: EngineId, found: EngineId },

    #[error("Frame at depth {depth} is already closed")]
    FrameClosed { depth: usize },

    #[error("Frame depth limit reached ({limit} frames)")]
    StackOverflow { limit: usize },

    #[error("Local reference limit reached ({limit} live locals)")]
    TooManyLocals { limit: usize },

    #[error("Frame at depth {depth} has no enclosing frame to promote into")]
    NoEnclosingFrame { depth: usize },

    #[error("Invalid {encoding} string data: {reason}")]
    InvalidEncoding { encoding: Encoding, reason: String },

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Unrecoverable scope conditions
///
/// These mean the host's control flow no longer matches the scope stack.
/// They are logged and raised as a panic; nothing tries to repair the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    /// A scope or frame was closed out of LIFO order
    ScopeOrderViolation,
    /// An engine was entered from a thread other than the one holding it
    ThreadAffinity,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fatal::ScopeOrderViolation => write!(f, "Scope order violation"),
            Fatal::ThreadAffinity => write!(f, "Engine thread affinity violation"),
        }
    }
}

/// Log and panic. If the thread is already unwinding this aborts the process.
#[cold]
pub(crate) fn fatal(kind: Fatal, detail: impl fmt::Display) -> ! {
    error!("{}: {}", kind, detail);
    panic!("{}: {}", kind, detail)
}
