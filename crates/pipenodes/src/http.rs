use async_trait::async_trait;
use pipecore::{NodeContext, NodeDescriptor, NodeError, NodeExecutor, NodeOutput, PortDefinition};
use serde_json::Value;
use std::time::Duration;

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

/// Response body as JSON when it parses, else as a string.
fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

fn apply_headers(mut request: reqwest::RequestBuilder, ctx: &NodeContext) -> reqwest::RequestBuilder {
    if let Some(Value::Object(headers)) = ctx.config.get("headers") {
        for (key, value) in headers {
            if let Some(value) = value.as_str() {
                request = request.header(key.as_str(), value);
            }
        }
    }
    request
}

/// Fetches content over HTTP GET
pub struct HttpFetchNode {
    client: reqwest::Client,
}

impl HttpFetchNode {
    pub fn new() -> Self {
        Self { client: client() }
    }
}

impl Default for HttpFetchNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpFetchNode {
    fn node_type(&self) -> &str {
        "http_fetch"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("HTTP Fetch", "globe-alt", "cyan")
            .input(PortDefinition::required("url"))
            .input(PortDefinition::optional("topic"))
            .output("data")
            .output("status")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = ctx.require_str_input("url")?;

        let mut query: Vec<(String, String)> = Vec::new();
        if let Some(Value::Object(params)) = ctx.config.get("query") {
            for (key, value) in params {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                query.push((key.clone(), value));
            }
        }
        if let Some(topic) = ctx.input_or_literal("topic").and_then(Value::as_str) {
            query.push(("topic".to_string(), topic.to_string()));
        }

        ctx.events.info(format!("GET {}", url));
        let request = apply_headers(self.client.get(url).query(&query), &ctx);

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(NodeError::ExecutionFailed(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        ctx.events.info(format!("Response status: {}", status.as_u16()));
        Ok(NodeOutput::new()
            .with_output("data", parse_body(body))
            .with_output("status", status.as_u16()))
    }
}

/// POSTs its inputs as JSON to a configured URL
pub struct WebhookNode {
    client: reqwest::Client,
}

impl WebhookNode {
    pub fn new() -> Self {
        Self { client: client() }
    }
}

impl Default for WebhookNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for WebhookNode {
    fn node_type(&self) -> &str {
        "webhook"
    }

    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("Webhook", "paper-airplane", "yellow")
            .input(PortDefinition::optional("payload"))
            .input(PortDefinition::optional("image"))
            .input(PortDefinition::optional("text"))
            .output("status")
            .output("response")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = ctx
            .config_str("url")
            .ok_or_else(|| NodeError::Configuration("Webhook requires a url".to_string()))?;

        let body = match ctx.inputs.get_present("payload") {
            Some(payload) if ctx.inputs.len() == 1 => payload.clone(),
            _ => ctx.inputs.to_json(),
        };

        let mut request = apply_headers(self.client.post(url).json(&body), &ctx);

        if let Some(name) = ctx.config_str("credential") {
            let token = ctx
                .services
                .credentials
                .credential(ctx.brand.brand_id, name)
                .await?
                .ok_or_else(|| NodeError::Configuration(format!("Credential '{}' is not set for this brand", name)))?;
            request = request.bearer_auth(token);
        }

        ctx.events.info(format!("POST {}", url));
        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(NodeError::ExecutionFailed(format!(
                "Webhook returned {}: {}",
                status, text
            )));
        }

        Ok(NodeOutput::new()
            .with_output("status", status.as_u16())
            .with_output("response", parse_body(text)))
    }
}
