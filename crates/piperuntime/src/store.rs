use async_trait::async_trait;
use chrono::Utc;
use pipecore::{
    BrandId, CanvasPayload, NodeId, Page, Paginated, Pipeline, PipelineId, PipelineStatus,
    PipelineUpdate, Run, RunId, RunOutcome, RunStatus, StoreError, ValueMap,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persisted execution records.
///
/// Only the execution service writes runs. Every transition is checked
/// here so a terminal run can never change again.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: Run) -> Result<Run, StoreError>;

    async fn get(&self, run_id: RunId) -> Result<Run, StoreError>;

    /// Newest first
    async fn list_for_pipeline(&self, pipeline_id: PipelineId, page: Page) -> Result<Paginated<Run>, StoreError>;

    /// Pending -> Running
    async fn mark_running(&self, run_id: RunId) -> Result<Run, StoreError>;

    /// Append one node's outputs. An existing entry is never overwritten.
    async fn record_node_result(
        &self,
        run_id: RunId,
        node_id: &str,
        outputs: ValueMap,
    ) -> Result<(), StoreError>;

    /// Running -> Succeeded, or Pending|Running -> Failed
    async fn finish(&self, run_id: RunId, outcome: RunOutcome) -> Result<Run, StoreError>;
}

/// Pipeline definitions. Graph saves replace nodes and edges in one step.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError>;

    /// Soft-deleted pipelines are not found.
    async fn get(&self, pipeline_id: PipelineId) -> Result<Pipeline, StoreError>;

    /// Newest first, optionally filtered by status
    async fn list_for_brand(
        &self,
        brand_id: BrandId,
        status: Option<PipelineStatus>,
        page: Page,
    ) -> Result<Paginated<Pipeline>, StoreError>;

    async fn update(&self, pipeline_id: PipelineId, update: PipelineUpdate) -> Result<Pipeline, StoreError>;

    async fn soft_delete(&self, pipeline_id: PipelineId) -> Result<(), StoreError>;

    /// Replace canvas state, nodes and edges atomically.
    async fn replace_graph(&self, pipeline_id: PipelineId, canvas: CanvasPayload) -> Result<Pipeline, StoreError>;
}

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn invalid_transition(run: &Run, to: RunStatus) -> StoreError {
    StoreError::InvalidTransition {
        run_id: run.id,
        from: run.status.to_string(),
        to: to.to_string(),
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: Run) -> Result<Run, StoreError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, run_id: RunId) -> Result<Run, StoreError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn list_for_pipeline(&self, pipeline_id: PipelineId, page: Page) -> Result<Paginated<Run>, StoreError> {
        let runs = self.runs.read().await;
        let mut found: Vec<Run> = runs
            .values()
            .filter(|r| r.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(page.slice(found))
    }

    async fn mark_running(&self, run_id: RunId) -> Result<Run, StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if run.status != RunStatus::Pending {
            return Err(invalid_transition(run, RunStatus::Running));
        }
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        Ok(run.clone())
    }

    async fn record_node_result(
        &self,
        run_id: RunId,
        node_id: &str,
        outputs: ValueMap,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if run.status != RunStatus::Running {
            return Err(invalid_transition(run, RunStatus::Running));
        }
        if run.node_results.contains_key(node_id) {
            return Err(StoreError::ResultAlreadyRecorded {
                run_id,
                node_id: NodeId::from(node_id),
            });
        }
        run.node_results.insert(node_id.to_string(), outputs);
        Ok(())
    }

    async fn finish(&self, run_id: RunId, outcome: RunOutcome) -> Result<Run, StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;

        match outcome {
            RunOutcome::Succeeded {
                output_data,
                output_path,
            } => {
                if run.status != RunStatus::Running {
                    return Err(invalid_transition(run, RunStatus::Succeeded));
                }
                run.status = RunStatus::Succeeded;
                run.output_data = output_data;
                run.output_path = output_path;
            }
            RunOutcome::Failed {
                failed_node_id,
                error_message,
            } => {
                if run.status.is_terminal() {
                    return Err(invalid_transition(run, RunStatus::Failed));
                }
                run.status = RunStatus::Failed;
                run.failed_node_id = failed_node_id;
                run.error_message = Some(error_message);
            }
        }
        run.completed_at = Some(Utc::now());
        Ok(run.clone())
    }
}

#[derive(Default)]
pub struct InMemoryPipelineStore {
    pipelines: RwLock<HashMap<PipelineId, Pipeline>>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn create(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError> {
        self.pipelines
            .write()
            .await
            .insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn get(&self, pipeline_id: PipelineId) -> Result<Pipeline, StoreError> {
        self.pipelines
            .read()
            .await
            .get(&pipeline_id)
            .filter(|p| !p.is_deleted())
            .cloned()
            .ok_or(StoreError::PipelineNotFound(pipeline_id))
    }

    async fn list_for_brand(
        &self,
        brand_id: BrandId,
        status: Option<PipelineStatus>,
        page: Page,
    ) -> Result<Paginated<Pipeline>, StoreError> {
        let pipelines = self.pipelines.read().await;
        let mut found: Vec<Pipeline> = pipelines
            .values()
            .filter(|p| p.brand_id == brand_id && !p.is_deleted())
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(page.slice(found))
    }

    async fn update(&self, pipeline_id: PipelineId, update: PipelineUpdate) -> Result<Pipeline, StoreError> {
        let mut pipelines = self.pipelines.write().await;
        let pipeline = live_mut(&mut pipelines, pipeline_id)?;

        if let Some(name) = update.name {
            pipeline.name = name;
        }
        if update.description.is_some() {
            pipeline.description = update.description;
        }
        if let Some(status) = update.status {
            pipeline.status = status;
        }
        pipeline.updated_at = Utc::now();
        Ok(pipeline.clone())
    }

    async fn soft_delete(&self, pipeline_id: PipelineId) -> Result<(), StoreError> {
        let mut pipelines = self.pipelines.write().await;
        let pipeline = live_mut(&mut pipelines, pipeline_id)?;
        pipeline.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn replace_graph(&self, pipeline_id: PipelineId, canvas: CanvasPayload) -> Result<Pipeline, StoreError> {
        // One write guard covers the whole swap: readers see the old graph or the new one.
        let mut pipelines = self.pipelines.write().await;
        let pipeline = live_mut(&mut pipelines, pipeline_id)?;
        pipeline.canvas_state = canvas.canvas_state;
        pipeline.nodes = canvas.nodes;
        pipeline.edges = canvas.edges;
        pipeline.updated_at = Utc::now();
        Ok(pipeline.clone())
    }
}

fn live_mut(
    pipelines: &mut HashMap<PipelineId, Pipeline>,
    pipeline_id: PipelineId,
) -> Result<&mut Pipeline, StoreError> {
    pipelines
        .get_mut(&pipeline_id)
        .filter(|p| !p.is_deleted())
        .ok_or(StoreError::PipelineNotFound(pipeline_id))
}
