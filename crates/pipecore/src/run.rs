use crate::{NodeId, PipelineId, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type RunId = Uuid;

/// Per-node port values: external seed values or recorded outputs.
pub type NodeValues = BTreeMap<NodeId, ValueMap>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub pipeline_id: PipelineId,
    pub status: RunStatus,
    #[serde(default)]
    pub input_data: NodeValues,
    /// Append-only within one execution.
    #[serde(default)]
    pub node_results: NodeValues,
    #[serde(default)]
    pub output_data: Option<serde_json::Value>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub failed_node_id: Option<NodeId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn pending(pipeline_id: PipelineId, input_data: NodeValues) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            status: RunStatus::Pending,
            input_data,
            node_results: NodeValues::new(),
            output_data: None,
            output_path: None,
            error_message: None,
            failed_node_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn running(pipeline_id: PipelineId, input_data: NodeValues) -> Self {
        let mut run = Self::pending(pipeline_id, input_data);
        run.status = RunStatus::Running;
        run.started_at = Some(run.created_at);
        run
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Terminal outcome handed to the run store.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded {
        output_data: Option<serde_json::Value>,
        output_path: Option<String>,
    },
    Failed {
        failed_node_id: Option<NodeId>,
        error_message: String,
    },
}
