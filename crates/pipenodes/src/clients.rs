//! Network and disk backed implementations of the engine's collaborators.

use async_trait::async_trait;
use pipecore::services::{AiClient, FileStorage, GeneratedImage, StoredFile};
use pipecore::{BrandContext, ServiceError, ValueMap};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// AI gateway reached over HTTP.
///
/// Every call POSTs `{brand_id, brand_kit, prompt, options}` (plus
/// `image` where relevant) to one endpoint per capability.
pub struct HttpAiClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

impl HttpAiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(&self, endpoint: &str, body: Value) -> Result<Value, ServiceError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Unavailable {
                service: "AI gateway".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint, status = status.as_u16(), "AI gateway call failed");
            return Err(ServiceError::Failed(format!("{} returned {}: {}", endpoint, status, text)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ServiceError::Failed(format!("invalid response from {}: {}", endpoint, e)))
    }

    fn request(brand: &BrandContext, prompt: &str, options: &ValueMap) -> Value {
        json!({
            "brand_id": brand.brand_id,
            "brand_kit": brand.brand_kit,
            "prompt": prompt,
            "options": options,
        })
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Result<T, ServiceError> {
    serde_json::from_value(value).map_err(|e| ServiceError::Failed(format!("malformed {} response: {}", what, e)))
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn generate_text(
        &self,
        brand: &BrandContext,
        prompt: &str,
        options: &ValueMap,
    ) -> Result<String, ServiceError> {
        let response = self.call("text", Self::request(brand, prompt, options)).await?;
        Ok(decode::<TextResponse>(response, "text")?.text)
    }

    async fn generate_image(
        &self,
        brand: &BrandContext,
        prompt: &str,
        options: &ValueMap,
    ) -> Result<GeneratedImage, ServiceError> {
        let response = self.call("images", Self::request(brand, prompt, options)).await?;
        decode(response, "image")
    }

    async fn edit_image(
        &self,
        brand: &BrandContext,
        prompt: &str,
        source_image: &str,
        options: &ValueMap,
    ) -> Result<GeneratedImage, ServiceError> {
        let mut body = Self::request(brand, prompt, options);
        body["image"] = Value::String(source_image.to_string());
        let response = self.call("images/edit", body).await?;
        decode(response, "image edit")
    }

    async fn analyze_image(
        &self,
        brand: &BrandContext,
        image: &str,
        options: &ValueMap,
    ) -> Result<Value, ServiceError> {
        let mut body = Self::request(brand, "", options);
        body["image"] = Value::String(image.to_string());
        self.call("analyze", body).await
    }
}

/// Files under a directory on disk, served from `public_base_url`.
pub struct LocalFileStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Absolute location of `path`; anything escaping the root is refused.
    fn resolve(&self, path: &str) -> Result<PathBuf, ServiceError> {
        let relative = Path::new(path);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !clean || path.is_empty() {
            return Err(ServiceError::Failed(format!("invalid storage path: {}", path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StoredFile, ServiceError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::Failed(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| ServiceError::Failed(format!("cannot write {}: {}", path, e)))?;

        tracing::debug!(path, "File stored");
        Ok(StoredFile {
            path: path.to_string(),
            url: self.url(path),
        })
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ServiceError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::NotFound(format!("file {}", path)))
            }
            Err(e) => Err(ServiceError::Failed(format!("cannot read {}: {}", path, e))),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path)
    }
}
