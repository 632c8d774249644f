//! Core abstractions for the pipeline engine
//!
//! Graph and run records, port values, the node executor trait, the
//! collaborator capabilities executors depend on, and the error taxonomy.
//! Nothing here executes anything.

mod error;
pub mod events;
mod node;
mod page;
mod pipeline;
mod run;
pub mod services;
mod value;

pub use error::{GraphError, NodeError, PipelineError, StoreError};
pub use events::*;
pub use node::{
    json_kind, BrandContext, NodeContext, NodeDescriptor, NodeExecutor, NodeOutput, NodePorts,
    NodePresentation, PortDefinition,
};
pub use page::{Page, Paginated, MAX_PER_PAGE};
pub use pipeline::{
    BrandId, CanvasPayload, NewPipeline, NodeId, Pipeline, PipelineEdge, PipelineId, PipelineNode,
    PipelineStatus, PipelineSummary, PipelineUpdate, Position,
};
pub use run::{NodeValues, Run, RunId, RunOutcome, RunStatus};
pub use services::{Collaborators, ServiceError};
pub use value::ValueMap;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
