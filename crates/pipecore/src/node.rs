use crate::services::Collaborators;
use crate::{events::EventEmitter, BrandId, NodeError, NodeId, NodeValues, ValueMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that every node kind implements.
///
/// One executor instance serves every node of its type, across runs, so
/// implementations must not keep per-run state.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Registry tag (e.g. "text_input", "ai_image_generator")
    fn node_type(&self) -> &str;

    /// Declared ports plus presentation metadata for the editor.
    fn descriptor(&self) -> NodeDescriptor;

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Brand the run executes for, with its brand-kit snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrandContext {
    pub brand_id: BrandId,
    /// Colours, fonts, tone of voice... opaque to the engine.
    #[serde(default)]
    pub brand_kit: serde_json::Value,
}

impl BrandContext {
    pub fn new(brand_id: BrandId) -> Self {
        Self {
            brand_id,
            brand_kit: serde_json::Value::Null,
        }
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub node_type: String,

    /// Resolved input port values
    pub inputs: ValueMap,

    /// Static authoring parameters
    pub config: ValueMap,

    /// Literal payload (uploaded file path, pasted text...)
    pub data: ValueMap,

    pub brand: BrandContext,

    /// Results of every node that ran before this one in the same execution
    pub upstream: Arc<NodeValues>,

    pub services: Collaborators,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    pub cancellation: CancellationToken,
}

impl NodeContext {
    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&serde_json::Value, NodeError> {
        self.inputs
            .get_present(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Required input that must be a non-empty string
    pub fn require_str_input(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_input(name)?;
        value
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "non-empty string".to_string(),
                actual: json_kind(value).to_string(),
            })
    }

    /// Input if bound, else the same key in data, then config.
    pub fn input_or_literal(&self, name: &str) -> Option<&serde_json::Value> {
        self.inputs
            .get_present(name)
            .or_else(|| self.data.get_present(name))
            .or_else(|| self.config.get_present(name))
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&serde_json::Value, NodeError> {
        self.config
            .get_present(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config.get_str(name)
    }
}

/// Name of a JSON value's type, for error messages.
pub fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub outputs: ValueMap,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.outputs.insert(port, value);
        self
    }
}

impl From<ValueMap> for NodeOutput {
    fn from(outputs: ValueMap) -> Self {
        Self { outputs }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    pub required: bool,
    /// Config/data key consulted when the port has no inbound edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_key: Option<String>,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            fallback_key: None,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            fallback_key: None,
        }
    }

    pub fn with_fallback(mut self, key: impl Into<String>) -> Self {
        self.fallback_key = Some(key.into());
        self
    }
}

/// What the planner knows about a node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePorts {
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<String>,
}

impl NodePorts {
    pub fn input(&self, name: &str) -> Option<&PortDefinition> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|p| p == name)
    }
}

/// Editor-only metadata. Never consulted during execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePresentation {
    pub label: String,
    pub icon: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDescriptor {
    pub ports: NodePorts,
    pub presentation: NodePresentation,
    /// Forces pipelines containing this node onto the background worker.
    pub long_running: bool,
    /// Outputs of nodes of this type make up a run's `output_data`.
    pub is_output: bool,
}

impl NodeDescriptor {
    pub fn new(label: &str, icon: &str, color: &str) -> Self {
        Self {
            ports: NodePorts::default(),
            presentation: NodePresentation {
                label: label.to_string(),
                icon: icon.to_string(),
                color: color.to_string(),
            },
            long_running: false,
            is_output: false,
        }
    }

    pub fn input(mut self, port: PortDefinition) -> Self {
        self.ports.inputs.push(port);
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.ports.outputs.push(name.to_string());
        self
    }

    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    pub fn marks_output(mut self) -> Self {
        self.is_output = true;
        self
    }
}
