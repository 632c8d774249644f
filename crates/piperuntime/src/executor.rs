use crate::planner::ExecutionPlan;
use crate::registry::NodeRegistry;
use crate::store::RunStore;
use chrono::Utc;
use pipecore::{
    BrandContext, Collaborators, EventBus, ExecutionEvent, ExecutionId, GraphError, NodeContext,
    NodeError, NodeValues, PipelineError, RunId, ValueMap,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Everything a single pass over a plan needs besides the plan itself.
pub struct ExecutionScope<'a> {
    pub execution_id: ExecutionId,
    pub brand: &'a BrandContext,
    pub services: &'a Collaborators,
    pub events: &'a EventBus,
    pub cancellation: CancellationToken,
    /// Where node results are persisted; previews pass `None`.
    pub run: Option<(&'a dyn RunStore, RunId)>,
}

/// Runs a plan's steps one after another.
///
/// Independent branches are not run concurrently: a node starts only after
/// the previous one finished, so results always land in plan order.
pub struct PipelineExecutor {
    node_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(node_timeout: Duration) -> Self {
        Self { node_timeout }
    }

    /// Execute every step and return each node's outputs.
    ///
    /// Stops at the first failing node; later steps are never attempted.
    pub async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        registry: &NodeRegistry,
        scope: &ExecutionScope<'_>,
    ) -> Result<NodeValues, PipelineError> {
        let mut results = NodeValues::new();

        for step in &plan.steps {
            if scope.cancellation.is_cancelled() {
                tracing::warn!(execution_id = %scope.execution_id, node_id = %step.node_id, "Execution cancelled before node");
                return Err(PipelineError::Cancelled);
            }

            let executor = registry
                .executor(&step.node_type)
                .ok_or_else(|| GraphError::UnknownNodeType {
                    node_id: step.node_id.clone(),
                    node_type: step.node_type.clone(),
                })?;

            let inputs = step
                .resolve_inputs(&results)
                .map_err(|e| self.fail(scope, &step.node_id, e))?;

            let ctx = NodeContext {
                node_id: step.node_id.clone(),
                node_type: step.node_type.clone(),
                inputs,
                config: step.config.clone(),
                data: step.data.clone(),
                brand: scope.brand.clone(),
                upstream: Arc::new(results.clone()),
                services: scope.services.clone(),
                events: scope.events.emitter_for(scope.execution_id, step.node_id.clone()),
                cancellation: scope.cancellation.child_token(),
            };

            scope.events.emit(ExecutionEvent::NodeStarted {
                execution_id: scope.execution_id,
                node_id: step.node_id.clone(),
                node_type: step.node_type.clone(),
                timestamp: Utc::now(),
            });

            let start = Instant::now();
            let outcome = match timeout(self.node_timeout, executor.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout {
                    ms: self.node_timeout.as_millis() as u64,
                }),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            let output = outcome.map_err(|e| self.fail(scope, &step.node_id, e))?;

            tracing::info!(
                execution_id = %scope.execution_id,
                node_id = %step.node_id,
                node_type = %step.node_type,
                duration_ms,
                "Node completed"
            );
            scope.events.emit(ExecutionEvent::NodeCompleted {
                execution_id: scope.execution_id,
                node_id: step.node_id.clone(),
                outputs: output.outputs.clone(),
                duration_ms,
                timestamp: Utc::now(),
            });

            if let Some((store, run_id)) = scope.run {
                store
                    .record_node_result(run_id, &step.node_id, output.outputs.clone())
                    .await?;
            }
            results.insert(step.node_id.clone(), output.outputs);
        }

        Ok(results)
    }

    fn fail(&self, scope: &ExecutionScope<'_>, node_id: &str, error: NodeError) -> PipelineError {
        tracing::error!(execution_id = %scope.execution_id, node_id = %node_id, error = %error, "Node failed");
        scope.events.emit(ExecutionEvent::NodeFailed {
            execution_id: scope.execution_id,
            node_id: node_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        PipelineError::Node {
            node_id: node_id.to_string(),
            source: error,
        }
    }
}

/// Run output: one output node's values as-is, several keyed by node id.
/// `output_path` is the `image` output when it is a string.
pub fn collect_output(
    plan: &ExecutionPlan,
    results: &NodeValues,
) -> (Option<serde_json::Value>, Option<String>) {
    let produced: Vec<(&String, &ValueMap)> = plan
        .output_nodes
        .iter()
        .filter_map(|id| results.get(id).map(|values| (id, values)))
        .collect();

    let output = match produced.as_slice() {
        [] => None,
        [(_, values)] => Some(values.to_json()),
        many => Some(serde_json::Value::Object(
            many.iter()
                .map(|(id, values)| ((*id).clone(), values.to_json()))
                .collect(),
        )),
    };

    let output_path = output
        .as_ref()
        .and_then(|o| o.get("image"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    (output, output_path)
}
