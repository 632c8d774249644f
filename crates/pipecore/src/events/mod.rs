mod base;

pub use base::{EventBus, EventEmitter, ExecutionEvent, ExecutionId, LogLevel, NodeEvent};
