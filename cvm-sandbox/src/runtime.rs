//! Engine backends

mod v8;

pub use v8::{SnapshotConfig, SnapshotManager, V8Engine, V8EngineBuilder, V8Script, V8Value};
