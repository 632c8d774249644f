use async_trait::async_trait;
use pipecore::{NodeContext, NodeDescriptor, NodeError, NodeExecutor, NodeOutput};
use serde_json::Value;

/// Literal text typed into the editor
pub struct TextInputNode;

#[async_trait]
impl NodeExecutor for TextInputNode {
    fn node_type(&self) -> &str {
        "text_input"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Text Input", "document-text", "green").output("text")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let text = match ctx.input_or_literal("text") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(NodeError::MissingInput("Text Input has no text".to_string())),
        };
        Ok(NodeOutput::new().with_output("text", text))
    }
}

/// Image uploaded through the editor; emits its storage path.
pub struct ImageInputNode;

#[async_trait]
impl NodeExecutor for ImageInputNode {
    fn node_type(&self) -> &str {
        "image_input"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Image Input", "photo", "blue").output("image")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let path = ["image", "image_path"]
            .iter()
            .find_map(|key| {
                ctx.inputs
                    .get_str(key)
                    .or_else(|| ctx.data.get_str(key))
                    .or_else(|| ctx.config.get_str(key))
            })
            .ok_or_else(|| NodeError::MissingInput("Image Input has no uploaded image".to_string()))?;

        Ok(NodeOutput::new().with_output("image", path))
    }
}

/// Template canvas picked in the editor
pub struct TemplateNode;

#[async_trait]
impl NodeExecutor for TemplateNode {
    fn node_type(&self) -> &str {
        "template"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Template", "template", "purple").output("template")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let template = ctx
            .input_or_literal("template")
            .ok_or_else(|| NodeError::MissingInput("Template has no canvas".to_string()))?;

        // Canvases saved as a JSON string are accepted too
        let canvas = match template {
            Value::String(raw) => serde_json::from_str::<Value>(raw).map_err(|e| NodeError::InvalidInputType {
                field: "template".to_string(),
                expected: "canvas object".to_string(),
                actual: format!("unparseable string ({})", e),
            })?,
            other => other.clone(),
        };

        if !canvas.is_object() {
            return Err(NodeError::InvalidInputType {
                field: "template".to_string(),
                expected: "object".to_string(),
                actual: pipecore::json_kind(&canvas).to_string(),
            });
        }
        Ok(NodeOutput::new().with_output("template", canvas))
    }
}
