use async_trait::async_trait;
use pipecore::{NodeContext, NodeDescriptor, NodeError, NodeExecutor, NodeOutput, PortDefinition};

/// Sink whose inputs become the run's output
pub struct OutputNode;

#[async_trait]
impl NodeExecutor for OutputNode {
    fn node_type(&self) -> &str {
        "output"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Output", "arrow-down-tray", "gray")
            .input(PortDefinition::optional("image"))
            .input(PortDefinition::optional("text"))
            .marks_output()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        if ctx.inputs.is_empty() {
            ctx.events.warn("Output node received no values");
        }
        Ok(NodeOutput::from(ctx.inputs))
    }
}
