use crate::render::{apply_layer_edits, image_data_url, render_and_store, LayerEdits, TemplateRenderer};
use async_trait::async_trait;
use pipecore::{NodeContext, NodeDescriptor, NodeError, NodeExecutor, NodeOutput, PortDefinition};
use serde_json::Value;
use std::sync::Arc;

/// Image-to-image model used when the configured model has no edit variant.
pub const DEFAULT_IMAGE_TO_IMAGE_MODEL: &str = "google/nano-banana/edit";

/// Edit-capable counterpart of a text-to-image model.
pub fn image_to_image_model(text_to_image: Option<&str>) -> &'static str {
    match text_to_image {
        Some("google/nano-banana/text-to-image") => "google/nano-banana/edit",
        Some("google/nano-banana-pro/text-to-image") => "google/nano-banana-pro/edit",
        Some("openai/gpt-image-1.5/text-to-image") => "openai/gpt-image-1.5/edit",
        Some("openai/gpt-image-1/text-to-image") => "openai/gpt-image-1-mini/edit",
        Some("alibaba/wan-2.6/text-to-image") => "alibaba/wan-2.6/image-edit",
        Some("alibaba/wan-2.5/text-to-image") => "alibaba/wan-2.5/image-edit",
        Some("wavespeed-ai/qwen-image/text-to-image") => "wavespeed-ai/wan-2.2/image-to-image",
        Some("bytedance/dreamina-v3.0/text-to-image") => "bytedance/dreamina-v3.0/edit",
        _ => DEFAULT_IMAGE_TO_IMAGE_MODEL,
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fill `{{text}}` and `{{brand.<key>}}` placeholders.
pub fn render_prompt(template: &str, text: &str, brand_kit: &Value) -> String {
    let mut prompt = template.replace("{{text}}", text);

    if let Some(kit) = brand_kit.as_object() {
        for (key, value) in kit {
            let placeholder = format!("{{{{brand.{}}}}}", key);
            if prompt.contains(&placeholder) {
                prompt = prompt.replace(&placeholder, &value_as_text(value));
            }
        }
    }
    prompt
}

/// Text generation through the AI gateway (captions, copy...)
pub struct AiTextGeneratorNode;

#[async_trait]
impl NodeExecutor for AiTextGeneratorNode {
    fn node_type(&self) -> &str {
        "ai_text_generator"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("AI Text Generator", "chat-bubble-left", "teal")
            .input(PortDefinition::required("text").with_fallback("prompt"))
            .output("text")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let text = value_as_text(ctx.require_input("text")?);
        let prompt = match ctx.config_str("prompt_template") {
            Some(template) => render_prompt(template, &text, &ctx.brand.brand_kit),
            None => text,
        };
        if prompt.trim().is_empty() {
            return Err(NodeError::MissingInput("AI Text Generator requires a prompt".to_string()));
        }

        ctx.events.info("Generating text");
        let generated = ctx
            .services
            .ai
            .generate_text(&ctx.brand, &prompt, &ctx.config)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("AI text generation failed: {}", e)))?;

        Ok(NodeOutput::new().with_output("text", generated))
    }
}

/// Image generation from a prompt, optionally from a source image and
/// optionally composed into a template.
pub struct AiImageGeneratorNode {
    renderer: Arc<dyn TemplateRenderer>,
}

impl AiImageGeneratorNode {
    pub fn new(renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl NodeExecutor for AiImageGeneratorNode {
    fn node_type(&self) -> &str {
        "ai_image_generator"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("AI Image Generator", "sparkles", "pink")
            .input(PortDefinition::required("text").with_fallback("prompt"))
            .input(PortDefinition::optional("image"))
            .input(PortDefinition::optional("template"))
            .output("image")
            .long_running()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let prompt = ctx
            .inputs
            .get_present("text")
            .map(value_as_text)
            .or_else(|| ctx.config_str("prompt").map(str::to_string))
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| NodeError::MissingInput("AI Image Generator requires a text prompt".to_string()))?;

        let generated = match ctx.inputs.get_str("image") {
            Some(source) => {
                let model = image_to_image_model(ctx.config_str("model"));
                ctx.events.info(format!("Editing image with {}", model));
                let options = ctx.config.clone().with("model", model);
                ctx.services.ai.edit_image(&ctx.brand, &prompt, source, &options).await
            }
            None => {
                ctx.events.info("Generating image from prompt");
                ctx.services.ai.generate_image(&ctx.brand, &prompt, &ctx.config).await
            }
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("AI image generation failed: {}", e)))?;

        let mut image_path = generated.image_path;

        if let Some(template) = ctx.inputs.get_present("template").filter(|t| t.is_object()) {
            ctx.events.stage(50, "Composing into template");
            let mut canvas = template.clone();
            let edits = LayerEdits {
                image_src: image_data_url(ctx.services.files.as_ref(), &image_path).await,
                text: None,
            };
            apply_layer_edits(&mut canvas, &edits);
            image_path = render_and_store(&ctx, self.renderer.as_ref(), &canvas, "compose").await?;
        }

        tracing::debug!(node_id = %ctx.node_id, image = %image_path, "Image generated");
        Ok(NodeOutput::new().with_output("image", image_path))
    }
}

/// Describes an image through the AI gateway and passes the image on.
pub struct ImageAnalysisNode;

#[async_trait]
impl NodeExecutor for ImageAnalysisNode {
    fn node_type(&self) -> &str {
        "image_analysis"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Image Analysis", "eye", "orange")
            .input(PortDefinition::required("image"))
            .output("analysis")
            .output("image")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let image = ctx.require_str_input("image")?;

        ctx.events.info("Analyzing image");
        let analysis = ctx
            .services
            .ai
            .analyze_image(&ctx.brand, image, &ctx.config)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Image analysis failed: {}", e)))?;

        Ok(NodeOutput::new()
            .with_output("analysis", analysis)
            .with_output("image", image))
    }
}
