use crate::{Run, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PipelineId = Uuid;
pub type BrandId = Uuid;
/// Author-chosen node identifier, unique within one pipeline.
pub type NodeId = String;

/// Complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub brand_id: BrandId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Canvas viewport state, stored verbatim for the editor.
    #[serde(default)]
    pub canvas_state: Option<serde_json::Value>,
    #[serde(default)]
    pub status: PipelineStatus,
    #[serde(default)]
    pub nodes: Vec<PipelineNode>,
    #[serde(default)]
    pub edges: Vec<PipelineEdge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn new(brand_id: BrandId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            brand_id,
            name: name.into(),
            description: None,
            canvas_state: None,
            status: PipelineStatus::Draft,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn add_node(&mut self, node: PipelineNode) -> NodeId {
        let id = node.node_id.clone();
        self.nodes.push(node);
        id
    }

    /// Bind `source.source_port` to `target.target_port`.
    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        source_port: impl Into<String>,
        target: impl Into<NodeId>,
        target_port: impl Into<String>,
    ) {
        let edge_id = format!("e{}", self.edges.len() + 1);
        self.edges.push(PipelineEdge {
            edge_id,
            source_node_id: source.into(),
            source_handle: Some(source_port.into()),
            target_node_id: target.into(),
            target_handle: Some(target_port.into()),
        });
    }

    pub fn find_node(&self, node_id: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

impl std::str::FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PipelineStatus::Draft),
            "active" => Ok(PipelineStatus::Active),
            "archived" => Ok(PipelineStatus::Archived),
            other => Err(format!("unknown pipeline status: {}", other)),
        }
    }
}

/// Node specification in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineNode {
    pub node_id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub config: ValueMap,
    #[serde(default)]
    pub data: ValueMap,
}

impl PipelineNode {
    pub fn new(node_id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            label: None,
            position: Position::default(),
            config: ValueMap::new(),
            data: ValueMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key, value);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key, value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }
}

/// Directed binding from an output port to an input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEdge {
    pub edge_id: String,
    pub source_node_id: NodeId,
    #[serde(default)]
    pub source_handle: Option<String>,
    pub target_node_id: NodeId,
    #[serde(default)]
    pub target_handle: Option<String>,
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Full graph sent by the editor on every save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasPayload {
    #[serde(default)]
    pub canvas_state: Option<serde_json::Value>,
    pub nodes: Vec<PipelineNode>,
    #[serde(default)]
    pub edges: Vec<PipelineEdge>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPipeline {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<PipelineStatus>,
}

/// Listing entry: the pipeline plus counts and its most recent run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub nodes_count: usize,
    pub runs_count: usize,
    pub latest_run: Option<Run>,
}
