//! In-process engine with no external runtime
//!
//! Always built. It is the engine the scope guards are exercised against in
//! tests, and the default engine of `poly_host`.

mod engine;
mod value;

pub use engine::MemoryEngine;
pub use value::{MemString, MemValue};
