// crates/packcore/src/events/mod.rs

mod base;

pub use base::{EventBus, EventEmitter, ExecutionEvent, ExecutionId, NoticeLevel};
