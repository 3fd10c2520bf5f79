//! Engine adapters
//!
//! One module per engine family. Optional families sit behind cargo
//! features so hosts only link the runtimes they embed.

pub mod memory;

#[cfg(feature = "quickjs")]
pub mod quickjs;

pub use memory::MemoryEngine;

#[cfg(feature = "quickjs")]
pub use quickjs::QuickJsEngine;
