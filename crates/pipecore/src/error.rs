use crate::services::ServiceError;
use crate::{NodeId, PipelineId, RunId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Graph validation failed: {0}")]
    Graph(#[from] GraphError),

    #[error("Node '{node_id}' failed: {source}")]
    Node {
        node_id: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(PipelineId),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Errors raised before anything executes: the request itself is wrong.
    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Graph(_) | PipelineError::InvalidRequest(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::PipelineNotFound(_)
                | PipelineError::NodeNotFound(_)
                | PipelineError::RunNotFound(_)
                | PipelineError::Store(StoreError::PipelineNotFound(_))
                | PipelineError::Store(StoreError::RunNotFound(_))
        )
    }
}

/// Raised by a node executor while it runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Structural problems with an authored graph. Never produces a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Pipeline has no nodes")]
    EmptyPipeline,

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    #[error("Unknown node type '{node_type}' on node {node_id}")]
    UnknownNodeType { node_id: NodeId, node_type: String },

    #[error("Edge {0} references a node that does not exist")]
    DanglingEdge(String),

    #[error("Edge {edge_id} references unknown port '{port}' on node {node_id}")]
    UnknownPort {
        edge_id: String,
        node_id: NodeId,
        port: String,
    },

    #[error("Input '{port}' of node {node_id} is bound by more than one edge")]
    DuplicateInputBinding { node_id: NodeId, port: String },

    #[error("Cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<NodeId>),

    #[error("Missing required input '{port}' on node {node_id}")]
    MissingRequiredInput { node_id: NodeId, port: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(PipelineId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Result for node {node_id} already recorded on run {run_id}")]
    ResultAlreadyRecorded { run_id: RunId, node_id: NodeId },

    #[error("Run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: RunId,
        from: String,
        to: String,
    },
}
