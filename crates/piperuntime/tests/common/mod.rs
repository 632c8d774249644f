#![allow(dead_code)]

use async_trait::async_trait;
use pipecore::{
    NodeContext, NodeDescriptor, NodeError, NodeExecutor, NodeOutput, PipelineEdge, PipelineNode,
    PortDefinition,
};
use piperuntime::{JobDispatcher, NodeRegistry, RunJob};
use pipecore::PipelineError;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// "fetch": emits `data` built from its optional `topic`
pub struct FetchNode;

#[async_trait]
impl NodeExecutor for FetchNode {
    fn node_type(&self) -> &str {
        "fetch"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Fetch", "globe", "cyan")
            .input(PortDefinition::optional("topic"))
            .output("data")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let topic = ctx.inputs.get_str("topic").unwrap_or("nothing");
        Ok(NodeOutput::new().with_output("data", format!("news about {}", topic)))
    }
}

/// "caption": required `text` (falls back to config `prompt`)
pub struct CaptionNode;

#[async_trait]
impl NodeExecutor for CaptionNode {
    fn node_type(&self) -> &str {
        "caption"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Caption", "chat", "teal")
            .input(PortDefinition::required("text").with_fallback("prompt"))
            .output("text")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let text = ctx.require_str_input("text")?;
        Ok(NodeOutput::new().with_output("text", format!("caption: {}", text)))
    }
}

/// "prompted": required `prompt` without any fallback
pub struct PromptedNode;

#[async_trait]
impl NodeExecutor for PromptedNode {
    fn node_type(&self) -> &str {
        "prompted"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Prompted", "sparkles", "pink")
            .input(PortDefinition::required("prompt"))
            .output("text")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let prompt = ctx.require_str_input("prompt")?;
        Ok(NodeOutput::new().with_output("text", prompt))
    }
}

/// "pass": copies optional `text` to `text`
pub struct PassNode;

#[async_trait]
impl NodeExecutor for PassNode {
    fn node_type(&self) -> &str {
        "pass"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Pass", "arrow-right", "gray")
            .input(PortDefinition::optional("text"))
            .output("text")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let text = ctx.inputs.get("text").cloned().unwrap_or(Value::Null);
        Ok(NodeOutput::new().with_output("text", text))
    }
}

/// "fail": always fails
pub struct FailNode;

#[async_trait]
impl NodeExecutor for FailNode {
    fn node_type(&self) -> &str {
        "fail"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Fail", "x-mark", "red")
            .input(PortDefinition::optional("text"))
            .output("text")
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Err(NodeError::ExecutionFailed("boom".to_string()))
    }
}

/// "slow": long-running passthrough
pub struct SlowNode;

#[async_trait]
impl NodeExecutor for SlowNode {
    fn node_type(&self) -> &str {
        "slow"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Slow", "clock", "purple")
            .input(PortDefinition::optional("text"))
            .output("text")
            .long_running()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let text = ctx.inputs.get("text").cloned().unwrap_or(Value::Null);
        Ok(NodeOutput::new().with_output("text", text))
    }
}

/// "sleepy": sleeps far longer than any test timeout
pub struct SleepyNode;

#[async_trait]
impl NodeExecutor for SleepyNode {
    fn node_type(&self) -> &str {
        "sleepy"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Sleepy", "moon", "gray").output("text")
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(NodeOutput::new().with_output("text", "late"))
    }
}

/// "gate": signals `entered`, then waits for `release`
pub struct GateNode {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl NodeExecutor for GateNode {
    fn node_type(&self) -> &str {
        "gate"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Gate", "lock-closed", "gray")
            .output("text")
            .long_running()
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(NodeOutput::new().with_output("text", "opened"))
    }
}

/// "sink": marks the run output
pub struct SinkNode;

#[async_trait]
impl NodeExecutor for SinkNode {
    fn node_type(&self) -> &str {
        "sink"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Sink", "arrow-down-tray", "gray")
            .input(PortDefinition::optional("text"))
            .input(PortDefinition::optional("image"))
            .marks_output()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::from(ctx.inputs))
    }
}

pub fn test_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(FetchNode));
    registry.register(Arc::new(CaptionNode));
    registry.register(Arc::new(PromptedNode));
    registry.register(Arc::new(PassNode));
    registry.register(Arc::new(FailNode));
    registry.register(Arc::new(SlowNode));
    registry.register(Arc::new(SleepyNode));
    registry.register(Arc::new(SinkNode));
    registry
}

pub fn node(id: &str, node_type: &str) -> PipelineNode {
    PipelineNode::new(id, node_type)
}

pub fn edge(id: &str, source: &str, source_port: &str, target: &str, target_port: &str) -> PipelineEdge {
    PipelineEdge {
        edge_id: id.to_string(),
        source_node_id: source.to_string(),
        source_handle: Some(source_port.to_string()),
        target_node_id: target.to_string(),
        target_handle: Some(target_port.to_string()),
    }
}

/// Keeps jobs instead of running them, so tests decide when a worker picks one up.
#[derive(Default)]
pub struct HeldJobs {
    jobs: Mutex<Vec<RunJob>>,
}

impl HeldJobs {
    pub fn take(&self) -> Vec<RunJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

#[async_trait]
impl JobDispatcher for HeldJobs {
    async fn enqueue(&self, job: RunJob) -> Result<(), PipelineError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Dispatcher whose queue is gone
pub struct ClosedQueue;

#[async_trait]
impl JobDispatcher for ClosedQueue {
    async fn enqueue(&self, _job: RunJob) -> Result<(), PipelineError> {
        Err(PipelineError::Dispatch("worker queue is closed".to_string()))
    }
}
