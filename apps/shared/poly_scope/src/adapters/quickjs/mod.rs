//! QuickJS adapter, enabled by the `quickjs` feature

mod engine;

pub use engine::QuickJsEngine;
