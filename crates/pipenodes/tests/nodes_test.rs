use async_trait::async_trait;
use pipecore::services::{AiClient, FileStorage, GeneratedImage, MemoryFileStorage};
use pipecore::{
    BrandContext, Collaborators, EventBus, ExecutionEvent, NodeContext, NodeError, NodeEvent,
    NodeExecutor, NodeValues, ServiceError, ValueMap,
};
use pipenodes::{
    apply_layer_edits, image_to_image_model, render_prompt, AiImageGeneratorNode,
    AiTextGeneratorNode, ImageAnalysisNode, ImageInputNode, LayerEdits, OutputNode,
    TemplateNode, TemplateRenderNode, TemplateRenderer, TextInputNode, WebhookNode,
    DEFAULT_IMAGE_TO_IMAGE_MODEL,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Records every gateway call as "<kind>:<prompt>:<model>"
#[derive(Default)]
struct MockAi {
    calls: Mutex<Vec<String>>,
}

impl MockAi {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, kind: &str, prompt: &str, options: &ValueMap) {
        let model = options.get_str("model").unwrap_or("-").to_string();
        self.calls.lock().unwrap().push(format!("{}:{}:{}", kind, prompt, model));
    }
}

#[async_trait]
impl AiClient for MockAi {
    async fn generate_text(
        &self,
        _brand: &BrandContext,
        prompt: &str,
        options: &ValueMap,
    ) -> Result<String, ServiceError> {
        self.record("text", prompt, options);
        Ok(format!("caption for {}", prompt))
    }

    async fn generate_image(
        &self,
        _brand: &BrandContext,
        prompt: &str,
        options: &ValueMap,
    ) -> Result<GeneratedImage, ServiceError> {
        self.record("t2i", prompt, options);
        Ok(GeneratedImage {
            image_path: "pipelines/generated.png".to_string(),
        })
    }

    async fn edit_image(
        &self,
        _brand: &BrandContext,
        prompt: &str,
        source_image: &str,
        options: &ValueMap,
    ) -> Result<GeneratedImage, ServiceError> {
        self.record("i2i", prompt, options);
        Ok(GeneratedImage {
            image_path: format!("{}.edited.png", source_image),
        })
    }

    async fn analyze_image(
        &self,
        _brand: &BrandContext,
        image: &str,
        _options: &ValueMap,
    ) -> Result<Value, ServiceError> {
        Ok(json!({ "subject": "coffee cup", "source": image }))
    }
}

#[derive(Default)]
struct MockRenderer {
    canvases: Mutex<Vec<Value>>,
}

#[async_trait]
impl TemplateRenderer for MockRenderer {
    async fn render(&self, canvas: &Value) -> Result<Vec<u8>, ServiceError> {
        self.canvases.lock().unwrap().push(canvas.clone());
        Ok(b"rendered-png".to_vec())
    }
}

struct Harness {
    ai: Arc<MockAi>,
    files: Arc<MemoryFileStorage>,
    renderer: Arc<MockRenderer>,
    brand: BrandContext,
    bus: EventBus,
}

impl Harness {
    fn new() -> Self {
        Self {
            ai: Arc::new(MockAi::default()),
            files: Arc::new(MemoryFileStorage::default()),
            renderer: Arc::new(MockRenderer::default()),
            brand: BrandContext::new(Uuid::new_v4()),
            bus: EventBus::new(100),
        }
    }

    // Helper function to create a test context
    fn context(&self, node_type: &str, inputs: ValueMap, config: ValueMap, data: ValueMap) -> NodeContext {
        let execution_id = Uuid::new_v4();
        let services = Collaborators::offline()
            .with_ai(self.ai.clone())
            .with_files(self.files.clone());

        NodeContext {
            node_id: "n1".to_string(),
            node_type: node_type.to_string(),
            inputs,
            config,
            data,
            brand: self.brand.clone(),
            upstream: Arc::new(NodeValues::new()),
            services,
            events: self.bus.emitter_for(execution_id, "n1"),
            cancellation: CancellationToken::new(),
        }
    }
}

fn canvas() -> Value {
    json!({
        "width": 1080,
        "height": 1350,
        "layers": [
            { "type": "shape", "properties": { "fill": "#fff" } },
            { "type": "image", "properties": { "src": "old-1.png" } },
            { "type": "text", "properties": { "text": "Old headline" } },
            { "type": "image", "properties": { "src": "old-2.png" } },
            { "type": "text", "properties": { "text": "Old footer" } }
        ]
    })
}

#[tokio::test]
async fn test_text_input_prefers_bound_value_over_literal() {
    let h = Harness::new();
    let node = TextInputNode;

    let literal = h.context("text_input", ValueMap::new(), ValueMap::new(), ValueMap::new().with("text", "from data"));
    let output = node.execute(literal).await.unwrap();
    assert_eq!(output.outputs.get_str("text"), Some("from data"));

    let external = h.context(
        "text_input",
        ValueMap::new().with("text", "from run input"),
        ValueMap::new(),
        ValueMap::new().with("text", "from data"),
    );
    let output = node.execute(external).await.unwrap();
    assert_eq!(output.outputs.get_str("text"), Some("from run input"));
}

#[tokio::test]
async fn test_text_input_without_text_fails() {
    let h = Harness::new();
    let ctx = h.context("text_input", ValueMap::new(), ValueMap::new(), ValueMap::new());

    let err = TextInputNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::MissingInput(_)));
}

#[tokio::test]
async fn test_image_input_reads_uploaded_path() {
    let h = Harness::new();
    let ctx = h.context(
        "image_input",
        ValueMap::new(),
        ValueMap::new(),
        ValueMap::new().with("image_path", "pipelines/b/inputs/a.png"),
    );

    let output = ImageInputNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get_str("image"), Some("pipelines/b/inputs/a.png"));
}

#[tokio::test]
async fn test_template_accepts_canvas_saved_as_string() {
    let h = Harness::new();
    let ctx = h.context(
        "template",
        ValueMap::new(),
        ValueMap::new().with("template", canvas().to_string()),
        ValueMap::new(),
    );

    let output = TemplateNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get("template"), Some(&canvas()));
}

#[tokio::test]
async fn test_template_rejects_non_object() {
    let h = Harness::new();
    let ctx = h.context("template", ValueMap::new(), ValueMap::new().with("template", json!([1, 2])), ValueMap::new());

    let err = TemplateNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidInputType { .. }));
}

#[test]
fn test_image_to_image_model_mapping() {
    assert_eq!(
        image_to_image_model(Some("openai/gpt-image-1/text-to-image")),
        "openai/gpt-image-1-mini/edit"
    );
    assert_eq!(
        image_to_image_model(Some("wavespeed-ai/qwen-image/text-to-image")),
        "wavespeed-ai/wan-2.2/image-to-image"
    );
    assert_eq!(image_to_image_model(Some("someone/else")), DEFAULT_IMAGE_TO_IMAGE_MODEL);
    assert_eq!(image_to_image_model(None), "google/nano-banana/edit");
}

#[tokio::test]
async fn test_ai_image_generator_text_to_image() {
    let h = Harness::new();
    let node = AiImageGeneratorNode::new(h.renderer.clone());
    let ctx = h.context(
        "ai_image_generator",
        ValueMap::new().with("text", "a latte on a desk"),
        ValueMap::new().with("model", "google/nano-banana/text-to-image"),
        ValueMap::new(),
    );

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get_str("image"), Some("pipelines/generated.png"));
    assert_eq!(
        h.ai.calls(),
        vec!["t2i:a latte on a desk:google/nano-banana/text-to-image".to_string()]
    );
}

#[tokio::test]
async fn test_ai_image_generator_switches_to_image_to_image() {
    let h = Harness::new();
    let node = AiImageGeneratorNode::new(h.renderer.clone());
    let ctx = h.context(
        "ai_image_generator",
        ValueMap::new()
            .with("text", "make it autumn")
            .with("image", "pipelines/b/inputs/photo.png"),
        ValueMap::new().with("model", "alibaba/wan-2.5/text-to-image"),
        ValueMap::new(),
    );

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(
        output.outputs.get_str("image"),
        Some("pipelines/b/inputs/photo.png.edited.png")
    );
    assert_eq!(
        h.ai.calls(),
        vec!["i2i:make it autumn:alibaba/wan-2.5/image-edit".to_string()]
    );
}

#[tokio::test]
async fn test_ai_image_generator_uses_config_prompt() {
    let h = Harness::new();
    let node = AiImageGeneratorNode::new(h.renderer.clone());
    let ctx = h.context(
        "ai_image_generator",
        ValueMap::new(),
        ValueMap::new().with("prompt", "sunrise over mountains"),
        ValueMap::new(),
    );

    node.execute(ctx).await.unwrap();
    assert_eq!(h.ai.calls(), vec!["t2i:sunrise over mountains:-".to_string()]);
}

#[tokio::test]
async fn test_ai_image_generator_requires_prompt() {
    let h = Harness::new();
    let node = AiImageGeneratorNode::new(h.renderer.clone());
    let ctx = h.context(
        "ai_image_generator",
        ValueMap::new().with("text", "   "),
        ValueMap::new(),
        ValueMap::new(),
    );

    let err = node.execute(ctx).await.unwrap_err();
    assert_eq!(
        err,
        NodeError::MissingInput("AI Image Generator requires a text prompt".to_string())
    );
    assert!(h.ai.calls().is_empty());
}

#[tokio::test]
async fn test_ai_image_generator_reports_gateway_failure() {
    let h = Harness::new();
    let node = AiImageGeneratorNode::new(h.renderer.clone());
    let mut ctx = h.context(
        "ai_image_generator",
        ValueMap::new().with("text", "anything"),
        ValueMap::new(),
        ValueMap::new(),
    );
    ctx.services = Collaborators::offline();

    match node.execute(ctx).await.unwrap_err() {
        NodeError::ExecutionFailed(message) => {
            assert!(message.starts_with("AI image generation failed: "), "{}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_ai_image_generator_composes_into_template() {
    let h = Harness::new();
    h.files
        .put("pipelines/generated.png", b"generated".to_vec())
        .await
        .unwrap();
    let node = AiImageGeneratorNode::new(h.renderer.clone());
    let ctx = h.context(
        "ai_image_generator",
        ValueMap::new().with("text", "a latte").with("template", canvas()),
        ValueMap::new(),
        ValueMap::new(),
    );

    let output = node.execute(ctx).await.unwrap();
    let path = output.outputs.get_str("image").unwrap().to_string();
    assert!(path.starts_with(&format!("pipelines/{}/compose_", h.brand.brand_id)));
    assert!(h.files.contains(&path).await);

    let rendered = h.renderer.canvases.lock().unwrap().clone();
    assert_eq!(rendered.len(), 1);
    let src = rendered[0]["layers"][1]["properties"]["src"].as_str().unwrap();
    assert!(src.starts_with("data:image/png;base64,"));
    assert_eq!(rendered[0]["layers"][3]["properties"]["src"], "old-2.png");
    // Text layers are untouched during composition
    assert_eq!(rendered[0]["layers"][2]["properties"]["text"], "Old headline");
}

#[tokio::test]
async fn test_template_render_replaces_first_layers_only() {
    let h = Harness::new();
    h.files
        .put("pipelines/b/inputs/photo.jpg", b"jpeg-bytes".to_vec())
        .await
        .unwrap();
    let node = TemplateRenderNode::new(h.renderer.clone());
    let ctx = h.context(
        "template_render",
        ValueMap::new()
            .with("template", canvas())
            .with("image", "/storage/pipelines/b/inputs/photo.jpg")
            .with("text", "Fresh roast"),
        ValueMap::new(),
        ValueMap::new(),
    );

    let mut events = h.bus.subscribe();
    let output = node.execute(ctx).await.unwrap();
    let path = output.outputs.get_str("image").unwrap().to_string();
    assert!(path.starts_with(&format!("pipelines/{}/render_", h.brand.brand_id)));

    let mut stored = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeEvent {
            event: NodeEvent::Stored { path },
            ..
        } = event
        {
            stored.push(path);
        }
    }
    assert_eq!(stored, vec![path.clone()]);
    assert!(path.ends_with(".png"));
    assert_eq!(h.files.get(&path).await.unwrap(), b"rendered-png".to_vec());

    let rendered = h.renderer.canvases.lock().unwrap().clone();
    let layers = &rendered[0]["layers"];
    assert!(layers[1]["properties"]["src"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
    assert_eq!(layers[2]["properties"]["text"], "Fresh roast");
    assert_eq!(layers[3]["properties"]["src"], "old-2.png");
    assert_eq!(layers[4]["properties"]["text"], "Old footer");
    assert_eq!(layers[0]["properties"]["fill"], "#fff");
}

#[tokio::test]
async fn test_template_render_requires_template() {
    let h = Harness::new();
    let node = TemplateRenderNode::new(h.renderer.clone());
    let ctx = h.context(
        "template_render",
        ValueMap::new().with("text", "hello"),
        ValueMap::new(),
        ValueMap::new(),
    );

    let err = node.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::MissingInput(_)));
    assert!(h.renderer.canvases.lock().unwrap().is_empty());
}

#[test]
fn test_apply_layer_edits_without_layers_is_noop() {
    let mut canvas = json!({ "width": 100 });
    apply_layer_edits(
        &mut canvas,
        &LayerEdits {
            image_src: Some("data:x".to_string()),
            text: Some("t".to_string()),
        },
    );
    assert_eq!(canvas, json!({ "width": 100 }));
}

#[test]
fn test_render_prompt_fills_placeholders() {
    let kit = json!({ "name": "Bean Co", "tone": "playful" });
    let prompt = render_prompt("Write a {{brand.tone}} caption for {{brand.name}}: {{text}}", "new blend", &kit);
    assert_eq!(prompt, "Write a playful caption for Bean Co: new blend");
}

#[tokio::test]
async fn test_ai_text_generator_applies_prompt_template() {
    let h = Harness::new();
    let ctx = h.context(
        "ai_text_generator",
        ValueMap::new().with("text", "coffee"),
        ValueMap::new().with("prompt_template", "Caption about {{text}}"),
        ValueMap::new(),
    );

    let output = AiTextGeneratorNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get_str("text"), Some("caption for Caption about coffee"));
}

#[tokio::test]
async fn test_ai_text_generator_stringifies_structured_input() {
    let h = Harness::new();
    let ctx = h.context(
        "ai_text_generator",
        ValueMap::new().with("text", json!({ "topic": "coffee" })),
        ValueMap::new(),
        ValueMap::new(),
    );

    AiTextGeneratorNode.execute(ctx).await.unwrap();
    assert_eq!(h.ai.calls(), vec![r#"text:{"topic":"coffee"}:-"#.to_string()]);
}

#[tokio::test]
async fn test_image_analysis_passes_image_through() {
    let h = Harness::new();
    let ctx = h.context(
        "image_analysis",
        ValueMap::new().with("image", "pipelines/b/a.png"),
        ValueMap::new(),
        ValueMap::new(),
    );

    let output = ImageAnalysisNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get_str("image"), Some("pipelines/b/a.png"));
    assert_eq!(output.outputs.get("analysis").unwrap()["subject"], "coffee cup");
}

#[tokio::test]
async fn test_output_passes_inputs_through() {
    let h = Harness::new();
    let inputs = ValueMap::new().with("text", "done").with("image", "pipelines/b/x.png");
    let ctx = h.context("output", inputs.clone(), ValueMap::new(), ValueMap::new());

    let output = OutputNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs, inputs);
}

#[tokio::test]
async fn test_webhook_requires_url() {
    let h = Harness::new();
    let ctx = h.context(
        "webhook",
        ValueMap::new().with("payload", json!({ "ok": true })),
        ValueMap::new(),
        ValueMap::new(),
    );

    let err = WebhookNode::new().execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[test]
fn test_descriptors_match_editor_listing() {
    let h = Harness::new();
    let generator = AiImageGeneratorNode::new(h.renderer.clone()).descriptor();
    assert!(generator.long_running);
    assert!(generator.ports.input("text").unwrap().required);
    assert_eq!(generator.ports.input("text").unwrap().fallback_key.as_deref(), Some("prompt"));

    let render = TemplateRenderNode::new(h.renderer.clone()).descriptor();
    let inputs: Vec<_> = render.ports.inputs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(inputs, vec!["template", "image", "text", "analysis"]);

    assert!(OutputNode.descriptor().is_output);
    assert!(!AiTextGeneratorNode.descriptor().long_running);
}
