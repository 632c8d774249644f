//! Built-in node library
//!
//! Input sources, AI generation and analysis, template rendering, HTTP
//! fetch and webhook delivery, plus the output sink. Also hosts the HTTP
//! and disk implementations of the engine's collaborators.

mod ai;
pub mod clients;
mod http;
mod input;
mod output;
mod render;

pub use ai::{
    image_to_image_model, render_prompt, AiImageGeneratorNode, AiTextGeneratorNode,
    ImageAnalysisNode, DEFAULT_IMAGE_TO_IMAGE_MODEL,
};
pub use http::{HttpFetchNode, WebhookNode};
pub use input::{ImageInputNode, TemplateNode, TextInputNode};
pub use output::OutputNode;
pub use render::{
    apply_layer_edits, image_data_url, HttpTemplateRenderer, LayerEdits, TemplateRenderNode,
    TemplateRenderer,
};
use piperuntime::NodeRegistry;

use std::sync::Arc;

/// Register every built-in node type, in editor listing order
pub fn register_all(registry: &mut NodeRegistry, renderer: Arc<dyn TemplateRenderer>) {
    registry.register(Arc::new(ImageInputNode));
    registry.register(Arc::new(TextInputNode));
    registry.register(Arc::new(TemplateNode));
    registry.register(Arc::new(AiImageGeneratorNode::new(renderer.clone())));
    registry.register(Arc::new(ImageAnalysisNode));
    registry.register(Arc::new(TemplateRenderNode::new(renderer)));
    registry.register(Arc::new(OutputNode));
    registry.register(Arc::new(AiTextGeneratorNode));
    registry.register(Arc::new(HttpFetchNode::new()));
    registry.register(Arc::new(WebhookNode::new()));
}

/// Registry holding every built-in node type
pub fn default_registry(renderer: Arc<dyn TemplateRenderer>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry, renderer);
    registry
}
