//! Upstream menu provider seam.
//!
//! Menu data lives in an external service; this crate only reads it, either
//! on the uncached request path or from the cache warmer. The provider is a
//! trait so tests can substitute stubs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MenuError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned status {status} for `{path}`")]
    Status { status: u16, path: String },
}

/// Read-only contract against the upstream menu service.
#[async_trait]
pub trait MenuProvider: Send + Sync {
    /// All known menu category ids.
    async fn list_categories(&self) -> Result<Vec<String>, MenuError>;

    /// The items of one category, as the upstream JSON payload.
    async fn list_items(&self, category_id: &str) -> Result<Value, MenuError>;

    /// Full-text search across menu items.
    async fn search(&self, query: &str) -> Result<Value, MenuError>;
}

/// The JSON envelope every public route returns. The warmer uses the same
/// function so warmed bodies are byte-identical to handler output.
pub fn api_envelope(data: Value) -> Value {
    json!({ "success": true, "data": data })
}

/// HTTP-backed provider against the configured upstream base URL.
pub struct HttpMenuProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMenuProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MenuError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, MenuError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MenuError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl MenuProvider for HttpMenuProvider {
    async fn list_categories(&self) -> Result<Vec<String>, MenuError> {
        let payload = self.fetch("/categories", &[]).await?;
        let ids = payload
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| match entry {
                        Value::String(id) => Some(id.clone()),
                        Value::Object(map) => map
                            .get("id")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn list_items(&self, category_id: &str) -> Result<Value, MenuError> {
        self.fetch(&format!("/categories/{category_id}/items"), &[])
            .await
    }

    async fn search(&self, query: &str) -> Result<Value, MenuError> {
        self.fetch("/search", &[("q", query)]).await
    }
}
