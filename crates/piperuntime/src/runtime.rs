use crate::dispatcher::{JobDispatcher, JobHandler, QueueDispatcher, RunJob};
use crate::executor::{collect_output, ExecutionScope, PipelineExecutor};
use crate::graph::PipelineGraph;
use crate::planner::{ExecutionPlan, ExecutionPlanner};
use crate::registry::{NodeRegistry, NodeTypeInfo};
use crate::store::{InMemoryPipelineStore, InMemoryRunStore, PipelineStore, RunStore};
use async_trait::async_trait;
use chrono::Utc;
use pipecore::services::StoredFile;
use pipecore::{
    BrandContext, BrandId, CanvasPayload, Collaborators, EventBus, ExecutionEvent, GraphError,
    NewPipeline, NodeValues, Page, Paginated, Pipeline, PipelineError, PipelineId, PipelineStatus,
    PipelineSummary, PipelineUpdate, Run, RunId, RunOutcome, StoreError, ValueMap,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 1000;
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Main entry point: pipeline authoring, execution and run lookup.
///
/// Cheap to clone; clones share stores, registry and worker queue.
#[derive(Clone)]
pub struct PipelineEngine {
    registry: Arc<NodeRegistry>,
    executor: Arc<PipelineExecutor>,
    event_bus: Arc<EventBus>,
    pipelines: Arc<dyn PipelineStore>,
    runs: Arc<dyn RunStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    services: Collaborators,
    cancellations: Arc<Mutex<HashMap<RunId, CancellationToken>>>,
    shutdown: CancellationToken,
    config: RuntimeConfig,
}

impl PipelineEngine {
    /// Engine with in-memory stores and an in-process worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        registry: Arc<NodeRegistry>,
        services: Collaborators,
        config: RuntimeConfig,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, queue) = QueueDispatcher::channel();
        let engine = Self::with_stores(
            registry,
            services,
            config.clone(),
            Arc::new(InMemoryPipelineStore::new()),
            Arc::new(InMemoryRunStore::new()),
            Arc::new(dispatcher),
        );
        let worker = queue.spawn_worker(
            Arc::new(engine.clone()),
            config.max_concurrent_runs,
            engine.shutdown.clone(),
        );
        (engine, worker)
    }

    /// Engine over caller-provided stores and dispatcher
    pub fn with_stores(
        registry: Arc<NodeRegistry>,
        services: Collaborators,
        config: RuntimeConfig,
        pipelines: Arc<dyn PipelineStore>,
        runs: Arc<dyn RunStore>,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        Self {
            registry,
            executor: Arc::new(PipelineExecutor::new(config.node_timeout)),
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            pipelines,
            runs,
            dispatcher,
            services,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Stop the background worker.
    ///
    /// Queued runs that have not started fail with "worker stopped"; runs
    /// already executing finish on their own and the worker handle
    /// resolves after them.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ---- authoring -------------------------------------------------------

    pub async fn create_pipeline(&self, brand_id: BrandId, request: NewPipeline) -> Result<Pipeline, PipelineError> {
        check_name(&request.name)?;
        check_description(request.description.as_deref())?;

        let mut pipeline = Pipeline::new(brand_id, request.name);
        pipeline.description = request.description;
        let pipeline = self.pipelines.create(pipeline).await?;
        tracing::info!(pipeline_id = %pipeline.id, brand_id = %brand_id, "Pipeline created");
        Ok(pipeline)
    }

    pub async fn get_pipeline(&self, brand_id: BrandId, pipeline_id: PipelineId) -> Result<Pipeline, PipelineError> {
        match self.pipelines.get(pipeline_id).await {
            Ok(pipeline) if pipeline.brand_id == brand_id => Ok(pipeline),
            Ok(_) | Err(StoreError::PipelineNotFound(_)) => Err(PipelineError::PipelineNotFound(pipeline_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// One page of the brand's pipelines, newest first, each with its
    /// node and run counts and latest run.
    pub async fn list_pipelines(
        &self,
        brand_id: BrandId,
        status: Option<PipelineStatus>,
        page: Page,
    ) -> Result<Paginated<PipelineSummary>, PipelineError> {
        let listing = self.pipelines.list_for_brand(brand_id, status, page).await?;

        let mut items = Vec::with_capacity(listing.items.len());
        for pipeline in listing.items {
            let mut runs = self.runs.list_for_pipeline(pipeline.id, Page::first(1)).await?;
            items.push(PipelineSummary {
                nodes_count: pipeline.nodes.len(),
                runs_count: runs.total,
                latest_run: runs.items.pop(),
                pipeline,
            });
        }

        Ok(Paginated {
            items,
            total: listing.total,
            page: listing.page,
            per_page: listing.per_page,
        })
    }

    pub async fn update_pipeline(
        &self,
        brand_id: BrandId,
        pipeline_id: PipelineId,
        update: PipelineUpdate,
    ) -> Result<Pipeline, PipelineError> {
        if let Some(name) = &update.name {
            check_name(name)?;
        }
        check_description(update.description.as_deref())?;
        self.get_pipeline(brand_id, pipeline_id).await?;
        Ok(self.pipelines.update(pipeline_id, update).await?)
    }

    pub async fn delete_pipeline(&self, brand_id: BrandId, pipeline_id: PipelineId) -> Result<(), PipelineError> {
        self.get_pipeline(brand_id, pipeline_id).await?;
        self.pipelines.soft_delete(pipeline_id).await?;
        tracing::info!(pipeline_id = %pipeline_id, "Pipeline deleted");
        Ok(())
    }

    /// Replace the pipeline's whole graph.
    ///
    /// The payload is validated first; an invalid payload leaves the
    /// stored graph untouched. An empty canvas is accepted.
    pub async fn save_canvas(
        &self,
        brand_id: BrandId,
        pipeline_id: PipelineId,
        canvas: CanvasPayload,
    ) -> Result<Pipeline, PipelineError> {
        self.get_pipeline(brand_id, pipeline_id).await?;

        if canvas.nodes.is_empty() {
            if let Some(edge) = canvas.edges.first() {
                return Err(GraphError::DanglingEdge(edge.edge_id.clone()).into());
            }
        } else {
            PipelineGraph::build(&canvas.nodes, &canvas.edges, &self.registry)?;
        }

        let pipeline = self.pipelines.replace_graph(pipeline_id, canvas).await?;
        tracing::info!(
            pipeline_id = %pipeline_id,
            nodes = pipeline.nodes.len(),
            edges = pipeline.edges.len(),
            "Canvas saved"
        );
        Ok(pipeline)
    }

    pub fn node_types(&self) -> Vec<NodeTypeInfo> {
        self.registry.list_node_types()
    }

    // ---- execution -------------------------------------------------------

    /// Small graphs without long-running nodes execute inline.
    pub fn is_simple_pipeline(&self, pipeline: &Pipeline) -> bool {
        pipeline.nodes.len() < self.config.simple_node_threshold
            && !pipeline
                .nodes
                .iter()
                .any(|n| self.registry.is_long_running(&n.node_type))
    }

    /// Execute the whole pipeline.
    ///
    /// Validation errors are returned before any run exists. Simple
    /// pipelines return the terminal run; others return a Pending run that
    /// the background worker picks up.
    pub async fn execute(
        &self,
        brand_id: BrandId,
        pipeline_id: PipelineId,
        input_data: NodeValues,
    ) -> Result<Run, PipelineError> {
        let pipeline = self.get_pipeline(brand_id, pipeline_id).await?;
        let plan = self.plan(&pipeline, None, &input_data, &ValueMap::new())?;

        if self.is_simple_pipeline(&pipeline) {
            let run = self.runs.create(Run::running(pipeline_id, input_data)).await?;
            let token = self.register_cancellation(run.id).await;
            tracing::info!(pipeline_id = %pipeline_id, run_id = %run.id, "Executing pipeline inline");
            return self.drive(run.id, pipeline_id, brand_id, &plan, token).await;
        }

        let run = self.runs.create(Run::pending(pipeline_id, input_data)).await?;
        self.register_cancellation(run.id).await;

        let job = RunJob {
            run_id: run.id,
            pipeline_id,
            brand_id,
            plan,
        };
        if let Err(e) = self.dispatcher.enqueue(job).await {
            self.runs
                .finish(
                    run.id,
                    RunOutcome::Failed {
                        failed_node_id: None,
                        error_message: e.to_string(),
                    },
                )
                .await?;
            self.cancellations.lock().await.remove(&run.id);
            return Err(e);
        }

        tracing::info!(pipeline_id = %pipeline_id, run_id = %run.id, "Pipeline queued");
        Ok(run)
    }

    /// Run `node_id` and its ancestors inline and return the node's outputs.
    ///
    /// Nothing is persisted. `inputs` override the node's resolved inputs.
    pub async fn execute_up_to(
        &self,
        brand_id: BrandId,
        pipeline_id: PipelineId,
        node_id: &str,
        inputs: ValueMap,
    ) -> Result<ValueMap, PipelineError> {
        let pipeline = self.get_pipeline(brand_id, pipeline_id).await?;
        if pipeline.find_node(node_id).is_none() {
            return Err(PipelineError::NodeNotFound(node_id.to_string()));
        }

        let plan = self.plan(&pipeline, Some(node_id), &NodeValues::new(), &inputs)?;
        let brand = self.brand_context(brand_id).await?;
        let execution_id = Uuid::new_v4();

        self.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id,
            pipeline_id,
            preview: true,
            timestamp: Utc::now(),
        });
        tracing::debug!(pipeline_id = %pipeline_id, node_id, steps = plan.len(), "Previewing node");

        let scope = ExecutionScope {
            execution_id,
            brand: &brand,
            services: &self.services,
            events: &self.event_bus,
            cancellation: CancellationToken::new(),
            run: None,
        };
        let mut results = self.executor.execute_plan(&plan, &self.registry, &scope).await?;
        Ok(results.remove(node_id).unwrap_or_default())
    }

    pub async fn run_status(
        &self,
        brand_id: BrandId,
        pipeline_id: PipelineId,
        run_id: RunId,
    ) -> Result<Run, PipelineError> {
        self.get_pipeline(brand_id, pipeline_id).await?;
        match self.runs.get(run_id).await {
            Ok(run) if run.pipeline_id == pipeline_id => Ok(run),
            Ok(_) | Err(StoreError::RunNotFound(_)) => Err(PipelineError::RunNotFound(run_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Newest first
    pub async fn list_runs(
        &self,
        brand_id: BrandId,
        pipeline_id: PipelineId,
        page: Page,
    ) -> Result<Paginated<Run>, PipelineError> {
        self.get_pipeline(brand_id, pipeline_id).await?;
        Ok(self.runs.list_for_pipeline(pipeline_id, page).await?)
    }

    /// Request cooperative cancellation.
    ///
    /// The node currently executing is allowed to finish; the run fails
    /// before the next node starts.
    pub async fn cancel_run(
        &self,
        brand_id: BrandId,
        pipeline_id: PipelineId,
        run_id: RunId,
    ) -> Result<Run, PipelineError> {
        let run = self.run_status(brand_id, pipeline_id, run_id).await?;
        if run.is_finished() {
            return Err(StoreError::InvalidTransition {
                run_id,
                from: run.status.to_string(),
                to: "cancelled".to_string(),
            }
            .into());
        }
        if let Some(token) = self.cancellations.lock().await.get(&run_id) {
            token.cancel();
        }
        tracing::info!(run_id = %run_id, "Run cancellation requested");
        Ok(run)
    }

    /// Store an uploaded image for use as a node's literal `data`.
    pub async fn upload_node_image(
        &self,
        brand_id: BrandId,
        pipeline_id: PipelineId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredFile, PipelineError> {
        self.get_pipeline(brand_id, pipeline_id).await?;

        if bytes.is_empty() {
            return Err(PipelineError::InvalidRequest("image is empty".to_string()));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(PipelineError::InvalidRequest(format!(
                "image exceeds {} bytes",
                MAX_UPLOAD_BYTES
            )));
        }
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| PipelineError::InvalidRequest(format!("not an image file: {}", filename)))?;

        let path = format!("pipelines/{}/inputs/{}.{}", brand_id, Uuid::new_v4(), extension);
        let stored = self.services.files.put(&path, bytes).await?;
        tracing::info!(pipeline_id = %pipeline_id, path = %stored.path, "Node image stored");
        Ok(stored)
    }

    // ---- internals -------------------------------------------------------

    fn plan(
        &self,
        pipeline: &Pipeline,
        target: Option<&str>,
        input_data: &NodeValues,
        overrides: &ValueMap,
    ) -> Result<ExecutionPlan, PipelineError> {
        let graph = PipelineGraph::build(&pipeline.nodes, &pipeline.edges, &self.registry)?;
        ExecutionPlanner::new(&self.registry).plan(&graph, target, input_data, overrides)
    }

    async fn brand_context(&self, brand_id: BrandId) -> Result<BrandContext, PipelineError> {
        let brand_kit = self.services.brand_kits.brand_kit(brand_id).await?;
        Ok(BrandContext { brand_id, brand_kit })
    }

    async fn register_cancellation(&self, run_id: RunId) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellations.lock().await.insert(run_id, token.clone());
        token
    }

    /// Execute a Running run to its terminal state.
    async fn drive(
        &self,
        run_id: RunId,
        pipeline_id: PipelineId,
        brand_id: BrandId,
        plan: &ExecutionPlan,
        cancellation: CancellationToken,
    ) -> Result<Run, PipelineError> {
        let started = Instant::now();
        self.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id: run_id,
            pipeline_id,
            preview: false,
            timestamp: Utc::now(),
        });

        let result = match self.brand_context(brand_id).await {
            Ok(brand) => {
                let scope = ExecutionScope {
                    execution_id: run_id,
                    brand: &brand,
                    services: &self.services,
                    events: &self.event_bus,
                    cancellation,
                    run: Some((self.runs.as_ref(), run_id)),
                };
                self.executor.execute_plan(plan, &self.registry, &scope).await
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(results) => {
                let (output_data, output_path) = collect_output(plan, &results);
                RunOutcome::Succeeded {
                    output_data,
                    output_path,
                }
            }
            Err(PipelineError::Node { node_id, source }) => {
                let node_type = plan
                    .steps
                    .iter()
                    .find(|s| s.node_id == node_id)
                    .map(|s| s.node_type.as_str())
                    .unwrap_or("unknown");
                RunOutcome::Failed {
                    error_message: format!("node '{}' ({}) failed: {}", node_id, node_type, source),
                    failed_node_id: Some(node_id),
                }
            }
            Err(PipelineError::Cancelled) => RunOutcome::Failed {
                failed_node_id: None,
                error_message: "run cancelled".to_string(),
            },
            Err(e) => RunOutcome::Failed {
                failed_node_id: None,
                error_message: e.to_string(),
            },
        };

        let run = self.runs.finish(run_id, outcome).await?;
        self.cancellations.lock().await.remove(&run_id);

        let duration_ms = started.elapsed().as_millis() as u64;
        match &run.error_message {
            Some(error) => tracing::error!(run_id = %run_id, pipeline_id = %pipeline_id, duration_ms, error = %error, "Run failed"),
            None => tracing::info!(run_id = %run_id, pipeline_id = %pipeline_id, duration_ms, "Run succeeded"),
        }
        self.event_bus.emit(ExecutionEvent::RunCompleted {
            execution_id: run_id,
            status: run.status,
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(run)
    }

    /// Fail a run outside the node loop and forget its cancellation token.
    async fn fail_unstarted(&self, run_id: RunId, error_message: String) {
        self.cancellations.lock().await.remove(&run_id);
        let outcome = RunOutcome::Failed {
            failed_node_id: None,
            error_message,
        };
        if let Err(e) = self.runs.finish(run_id, outcome).await {
            tracing::warn!(run_id = %run_id, error = %e, "Could not mark run as failed");
        }
    }

    /// Worker side of an asynchronous run.
    async fn process_job(&self, job: RunJob) -> Result<Run, PipelineError> {
        let run = self.runs.get(job.run_id).await?;
        if run.is_finished() {
            tracing::debug!(run_id = %run.id, "Run already finished, skipping");
            return Ok(run);
        }

        let token = {
            let cancellations = self.cancellations.lock().await;
            cancellations.get(&job.run_id).cloned()
        }
        .unwrap_or_else(CancellationToken::new);

        if token.is_cancelled() {
            self.cancellations.lock().await.remove(&job.run_id);
            return Ok(self
                .runs
                .finish(
                    job.run_id,
                    RunOutcome::Failed {
                        failed_node_id: None,
                        error_message: "run cancelled".to_string(),
                    },
                )
                .await?);
        }

        self.runs.mark_running(job.run_id).await?;
        self.drive(job.run_id, job.pipeline_id, job.brand_id, &job.plan, token)
            .await
    }
}

#[async_trait]
impl JobHandler for PipelineEngine {
    async fn handle(&self, job: RunJob) {
        let run_id = job.run_id;
        if let Err(e) = self.process_job(job).await {
            tracing::error!(run_id = %run_id, error = %e, "Background run could not be processed");
            self.fail_unstarted(run_id, e.to_string()).await;
        }
    }

    async fn abandon(&self, job: RunJob, reason: &str) {
        tracing::warn!(run_id = %job.run_id, pipeline_id = %job.pipeline_id, reason, "Run abandoned");
        self.fail_unstarted(job.run_id, reason.to_string()).await;
    }
}

fn check_name(name: &str) -> Result<(), PipelineError> {
    if name.trim().is_empty() {
        return Err(PipelineError::InvalidRequest("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(PipelineError::InvalidRequest(format!(
            "name exceeds {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn check_description(description: Option<&str>) -> Result<(), PipelineError> {
    match description {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LEN => Err(PipelineError::InvalidRequest(format!(
            "description exceeds {} characters",
            MAX_DESCRIPTION_LEN
        ))),
        _ => Ok(()),
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Pipelines with fewer nodes than this (and no long-running node) run inline
    pub simple_node_threshold: usize,
    /// Upper bound for one node executor call
    pub node_timeout: Duration,
    /// Background runs executing at the same time
    pub max_concurrent_runs: usize,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            simple_node_threshold: 4,
            node_timeout: Duration::from_secs(300),
            max_concurrent_runs: 4,
            event_buffer_size: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `PIPELINE_SIMPLE_NODE_THRESHOLD`,
    /// `PIPELINE_NODE_TIMEOUT_SECS` and `PIPELINE_MAX_CONCURRENT_RUNS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_number("PIPELINE_SIMPLE_NODE_THRESHOLD") {
            config.simple_node_threshold = v as usize;
        }
        if let Some(v) = env_number("PIPELINE_NODE_TIMEOUT_SECS") {
            config.node_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_number("PIPELINE_MAX_CONCURRENT_RUNS") {
            config.max_concurrent_runs = v as usize;
        }
        config
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring non-numeric setting");
            None
        }
    }
}
