//! Pipeline execution runtime
//!
//! Graph validation, execution planning, the node registry, run and
//! pipeline stores, the background worker queue and the engine facade
//! that ties them together.

mod dispatcher;
mod executor;
mod graph;
mod planner;
mod registry;
mod runtime;
mod store;

pub use dispatcher::{JobDispatcher, JobHandler, JobQueue, QueueDispatcher, RunJob};
pub use executor::{collect_output, ExecutionScope, PipelineExecutor};
pub use graph::{PipelineGraph, ResolvedEdge};
pub use planner::{Binding, ExecutionPlan, ExecutionPlanner, PlannedInput, PlannedStep};
pub use registry::{NodeRegistry, NodeTypeInfo};
pub use runtime::{PipelineEngine, RuntimeConfig};
pub use store::{InMemoryPipelineStore, InMemoryRunStore, PipelineStore, RunStore};
