//! REST document store.
//!
//! Talks to the case management server's summary endpoints:
//! - `GET  {base}/case/summary/fetch?cid={id}`
//! - `POST {base}/case/summary/update?cid={id}` with `{"case_description", "cid"}`
//!
//! Both answer with the server's envelope
//! `{"status": "success" | "error", "message": ..., "data": {...}}`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use summary_core::store::Result;
use summary_core::{CaseId, Checksum, Document, DocumentStore, StoreError};
use tracing::debug;

/// Response envelope used by every API route.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SummaryData {
    /// Null for a case that never had a summary
    #[serde(default)]
    case_description: Option<String>,
    crc32: Checksum,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    case_description: &'a str,
    cid: CaseId,
}

/// `DocumentStore` backed by the server's REST API.
pub struct HttpStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, action: &str) -> String {
        format!("{}/case/summary/{}", self.base_url, action)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, case_id: CaseId) -> Result<T> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(case_id));
        }

        if !status.is_success() {
            // Error bodies usually carry the envelope, but proxies may not
            let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body)
                .ok()
                .and_then(|r| r.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(StoreError::Rejected(message));
        }

        let envelope: ApiResponse<T> =
            serde_json::from_str(&body).map_err(|e| StoreError::Malformed(e.to_string()))?;
        if envelope.status != "success" {
            return Err(StoreError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| format!("status {}", envelope.status)),
            ));
        }
        envelope
            .data
            .ok_or_else(|| StoreError::Malformed("missing data".to_string()))
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn fetch(&self, case_id: CaseId) -> Result<Document> {
        let request = self.client.get(self.url("fetch")).query(&[("cid", case_id)]);
        let data: SummaryData = self.send(request, case_id).await?;
        debug!("Fetched summary of case {} ({})", case_id, data.crc32);

        Ok(Document {
            content: data.case_description.unwrap_or_default(),
            checksum: data.crc32,
        })
    }

    async fn update(&self, case_id: CaseId, content: &str) -> Result<Checksum> {
        let request = self
            .client
            .post(self.url("update"))
            .query(&[("cid", case_id)])
            .json(&UpdateRequest {
                case_description: content,
                cid: case_id,
            });
        let data: SummaryData = self.send(request, case_id).await?;
        debug!("Updated summary of case {} ({})", case_id, data.crc32);
        Ok(data.crc32)
    }
}
