use async_trait::async_trait;
use base64::Engine;
use pipecore::services::FileStorage;
use pipecore::{NodeContext, NodeDescriptor, NodeError, NodeExecutor, NodeOutput, PortDefinition, ServiceError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_CANVAS_SIZE: u64 = 1080;
const RENDER_SCALE: u64 = 2;

/// Turns a template canvas into PNG bytes.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, canvas: &Value) -> Result<Vec<u8>, ServiceError>;
}

/// Client for the template-renderer service (`POST {base}/render-vue`).
pub struct HttpTemplateRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTemplateRenderer {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TemplateRenderer for HttpTemplateRenderer {
    async fn render(&self, canvas: &Value) -> Result<Vec<u8>, ServiceError> {
        let width = canvas.get("width").and_then(Value::as_u64).unwrap_or(DEFAULT_CANVAS_SIZE);
        let height = canvas.get("height").and_then(Value::as_u64).unwrap_or(DEFAULT_CANVAS_SIZE);

        let response = self
            .client
            .post(format!("{}/render-vue", self.base_url))
            .json(&json!({
                "template": canvas,
                "width": width,
                "height": height,
                "scale": RENDER_SCALE,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::Unavailable {
                service: "template renderer".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Failed(format!("renderer returned {}: {}", status, body)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Failed(format!("failed to read rendered image: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

/// Load a stored image and encode it as a `data:` URL for the renderer.
///
/// Paths may carry the public `/storage/` prefix. Returns `None` when the
/// file cannot be read.
pub async fn image_data_url(files: &dyn FileStorage, path: &str) -> Option<String> {
    let relative = path.strip_prefix("/storage/").unwrap_or(path);
    let bytes = files.get(relative).await.ok()?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Some(format!("data:{};base64,{}", mime_for(relative), encoded))
}

fn mime_for(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

/// Replacement values for a template's layers.
#[derive(Debug, Default, Clone)]
pub struct LayerEdits {
    /// New `src` for the first image layer
    pub image_src: Option<String>,
    /// New text for the first text layer
    pub text: Option<String>,
}

/// Apply `edits` to the first image layer and the first text layer.
/// Other layers are left as they are.
pub fn apply_layer_edits(canvas: &mut Value, edits: &LayerEdits) {
    let Some(layers) = canvas.get_mut("layers").and_then(Value::as_array_mut) else {
        return;
    };

    let mut image_done = edits.image_src.is_none();
    let mut text_done = edits.text.is_none();

    for layer in layers.iter_mut() {
        if image_done && text_done {
            break;
        }
        let kind = layer.get("type").and_then(Value::as_str).unwrap_or_default().to_string();

        if !image_done && kind == "image" {
            if let Some(src) = &edits.image_src {
                set_property(layer, "src", Value::String(src.clone()));
            }
            image_done = true;
        } else if !text_done && kind == "text" {
            if let Some(text) = &edits.text {
                set_property(layer, "text", Value::String(text.clone()));
            }
            text_done = true;
        }
    }
}

fn set_property(layer: &mut Value, key: &str, value: Value) {
    let Some(object) = layer.as_object_mut() else {
        return;
    };
    let properties = object
        .entry("properties")
        .or_insert_with(|| Value::Object(Default::default()));
    if !properties.is_object() {
        *properties = Value::Object(Default::default());
    }
    if let Some(properties) = properties.as_object_mut() {
        properties.insert(key.to_string(), value);
    }
}

/// Render `canvas` and store the PNG under `pipelines/<brand>/<prefix>_<uuid>.png`.
pub(crate) async fn render_and_store(
    ctx: &NodeContext,
    renderer: &dyn TemplateRenderer,
    canvas: &Value,
    prefix: &str,
) -> Result<String, NodeError> {
    let png = renderer
        .render(canvas)
        .await
        .map_err(|e| NodeError::ExecutionFailed(format!("Template rendering failed: {}", e)))?;

    let path = format!("pipelines/{}/{}_{}.png", ctx.brand.brand_id, prefix, Uuid::new_v4().simple());
    let stored = ctx.services.files.put(&path, png).await?;
    ctx.events.stored(stored.path.as_str());
    Ok(stored.path)
}

/// Renders a template with the first image and text layers replaced by
/// the node's inputs.
pub struct TemplateRenderNode {
    renderer: Arc<dyn TemplateRenderer>,
}

impl TemplateRenderNode {
    pub fn new(renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl NodeExecutor for TemplateRenderNode {
    fn node_type(&self) -> &str {
        "template_render"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Template Render", "paint-brush", "indigo")
            .input(PortDefinition::required("template"))
            .input(PortDefinition::optional("image"))
            .input(PortDefinition::optional("text"))
            .input(PortDefinition::optional("analysis"))
            .output("image")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut canvas = match ctx.inputs.get_present("template") {
            Some(template) if template.is_object() => template.clone(),
            _ => {
                return Err(NodeError::MissingInput(
                    "Template Render requires a template input".to_string(),
                ))
            }
        };

        let mut edits = LayerEdits {
            text: ctx.inputs.get_str("text").map(str::to_string),
            ..LayerEdits::default()
        };
        if let Some(image) = ctx.inputs.get_str("image") {
            edits.image_src = image_data_url(ctx.services.files.as_ref(), image).await;
            if edits.image_src.is_none() {
                ctx.events.warn(format!("Image {} could not be loaded, keeping template image", image));
            }
        }
        apply_layer_edits(&mut canvas, &edits);

        ctx.events.info("Rendering template");
        let path = render_and_store(&ctx, self.renderer.as_ref(), &canvas, "render").await?;
        tracing::debug!(node_id = %ctx.node_id, path = %path, "Template rendered");

        Ok(NodeOutput::new().with_output("image", path))
    }
}
