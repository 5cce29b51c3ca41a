use anyhow::{ensure, Context};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, Response, StatusCode,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::{AppError, ProfessionalId};

use crate::store::{Document, DocumentStore, WriteBatch};

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sequence: u64,
}

/// HTTP client for the hosted document store.
pub struct RestDocumentStore {
    client: Client,
    base_url: String,
}

impl RestDocumentStore {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        ensure!(config.is_configured(), "document store URL and API key must be set");

        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&config.document_store_api_key).context("invalid API key")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.document_store_api_key))
                .context("invalid API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.document_store_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, tenant: &ProfessionalId, collection: &str) -> String {
        format!("{}/v1/{}/{}", self.base_url, tenant, collection)
    }

    async fn send(&self, method: Method, url: &str, body: Option<&WriteBatch>) -> Result<Response, AppError> {
        debug!("Making request to {}", url);

        let mut req = self.client.request(method, url);
        if let Some(batch) = body {
            req = req.json(batch);
        }

        req.send()
            .await
            .map_err(|e| AppError::Database(format!("request to {} failed: {}", url, e)))
    }

    async fn error_for(response: Response) -> AppError {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        error!("API error ({}): {}", status, error_text);

        match status {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => AppError::Conflict(error_text),
            StatusCode::NOT_FOUND => AppError::NotFound(error_text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                AppError::ExternalService(format!("Authentication error: {}", error_text))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AppError::ValidationError(error_text),
            _ => AppError::Database(format!("API error ({}): {}", status, error_text)),
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, AppError> {
        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn get(
        &self,
        tenant: &ProfessionalId,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, AppError> {
        let url = format!("{}/{}", self.collection_url(tenant, collection), id);
        let response = self.send(Method::GET, &url, None).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(Self::decode(response).await?)),
            _ => Err(Self::error_for(response).await),
        }
    }

    async fn list(&self, tenant: &ProfessionalId, collection: &str) -> Result<Vec<Document>, AppError> {
        let url = self.collection_url(tenant, collection);
        let response = self.send(Method::GET, &url, None).await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Self::decode(response).await
    }

    async fn commit(&self, tenant: &ProfessionalId, batch: WriteBatch) -> Result<u64, AppError> {
        let url = format!("{}/v1/{}:commit", self.base_url, tenant);
        let response = self.send(Method::POST, &url, Some(&batch)).await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        let committed: CommitResponse = Self::decode(response).await?;
        debug!("Committed {} writes at sequence {}", batch.len(), committed.sequence);
        Ok(committed.sequence)
    }
}
