//! Capabilities the engine consumes from the surrounding application.
//!
//! Brand credentials, brand kits, file storage and the AI gateway live
//! outside this workspace; executors only ever see these traits.

use crate::{BrandContext, BrandId, NodeError, ValueMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

impl From<ServiceError> for NodeError {
    fn from(err: ServiceError) -> Self {
        NodeError::Collaborator(err.to_string())
    }
}

/// Brand-scoped secrets (API keys, webhook tokens).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential(&self, brand_id: BrandId, name: &str) -> Result<Option<String>, ServiceError>;
}

/// Brand-kit context (colours, fonts, voice) threaded into every run.
#[async_trait]
pub trait BrandKitProvider: Send + Sync {
    async fn brand_kit(&self, brand_id: BrandId) -> Result<serde_json::Value, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub path: String,
    pub url: String,
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StoredFile, ServiceError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, ServiceError>;

    fn url(&self, path: &str) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Storage path of the produced image
    pub image_path: String,
}

/// AI gateway. Model choice and provider routing belong to the implementation.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn generate_text(
        &self,
        brand: &BrandContext,
        prompt: &str,
        options: &ValueMap,
    ) -> Result<String, ServiceError>;

    async fn generate_image(
        &self,
        brand: &BrandContext,
        prompt: &str,
        options: &ValueMap,
    ) -> Result<GeneratedImage, ServiceError>;

    async fn edit_image(
        &self,
        brand: &BrandContext,
        prompt: &str,
        source_image: &str,
        options: &ValueMap,
    ) -> Result<GeneratedImage, ServiceError>;

    async fn analyze_image(
        &self,
        brand: &BrandContext,
        image: &str,
        options: &ValueMap,
    ) -> Result<serde_json::Value, ServiceError>;
}

/// Handles to every collaborator, shared read-only across runs.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub brand_kits: Arc<dyn BrandKitProvider>,
    pub files: Arc<dyn FileStorage>,
    pub ai: Arc<dyn AiClient>,
}

impl Collaborators {
    /// In-memory storage, no credentials, empty brand kits and no AI gateway.
    pub fn offline() -> Self {
        Self {
            credentials: Arc::new(StaticCredentials::default()),
            brand_kits: Arc::new(StaticBrandKits::default()),
            files: Arc::new(MemoryFileStorage::default()),
            ai: Arc::new(UnavailableAi),
        }
    }

    pub fn with_ai(mut self, ai: Arc<dyn AiClient>) -> Self {
        self.ai = ai;
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileStorage>) -> Self {
        self.files = files;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_brand_kits(mut self, brand_kits: Arc<dyn BrandKitProvider>) -> Self {
        self.brand_kits = brand_kits;
        self
    }
}

/// Credentials held in memory, keyed by brand then name.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticCredentials {
    entries: HashMap<BrandId, HashMap<String, String>>,
}

impl StaticCredentials {
    pub fn insert(&mut self, brand_id: BrandId, name: impl Into<String>, secret: impl Into<String>) {
        self.entries
            .entry(brand_id)
            .or_default()
            .insert(name.into(), secret.into());
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn credential(&self, brand_id: BrandId, name: &str) -> Result<Option<String>, ServiceError> {
        Ok(self
            .entries
            .get(&brand_id)
            .and_then(|secrets| secrets.get(name))
            .cloned())
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticBrandKits {
    kits: HashMap<BrandId, serde_json::Value>,
}

impl StaticBrandKits {
    pub fn insert(&mut self, brand_id: BrandId, kit: serde_json::Value) {
        self.kits.insert(brand_id, kit);
    }
}

#[async_trait]
impl BrandKitProvider for StaticBrandKits {
    async fn brand_kit(&self, brand_id: BrandId) -> Result<serde_json::Value, ServiceError> {
        Ok(self
            .kits
            .get(&brand_id)
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }
}

#[derive(Debug, Default)]
pub struct MemoryFileStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStorage {
    pub async fn contains(&self, path: &str) -> bool {
        self.files.read().await.contains_key(path)
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StoredFile, ServiceError> {
        self.files.write().await.insert(path.to_string(), bytes);
        Ok(StoredFile {
            path: path.to_string(),
            url: self.url(path),
        })
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ServiceError> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("file {}", path)))
    }

    fn url(&self, path: &str) -> String {
        format!("memory://{}", path)
    }
}

/// Stand-in when no AI gateway is configured.
pub struct UnavailableAi;

impl UnavailableAi {
    fn error() -> ServiceError {
        ServiceError::Unavailable {
            service: "AI gateway".to_string(),
            message: "not configured".to_string(),
        }
    }
}

#[async_trait]
impl AiClient for UnavailableAi {
    async fn generate_text(&self, _: &BrandContext, _: &str, _: &ValueMap) -> Result<String, ServiceError> {
        Err(Self::error())
    }

    async fn generate_image(
        &self,
        _: &BrandContext,
        _: &str,
        _: &ValueMap,
    ) -> Result<GeneratedImage, ServiceError> {
        Err(Self::error())
    }

    async fn edit_image(
        &self,
        _: &BrandContext,
        _: &str,
        _: &str,
        _: &ValueMap,
    ) -> Result<GeneratedImage, ServiceError> {
        Err(Self::error())
    }

    async fn analyze_image(
        &self,
        _: &BrandContext,
        _: &str,
        _: &ValueMap,
    ) -> Result<serde_json::Value, ServiceError> {
        Err(Self::error())
    }
}
