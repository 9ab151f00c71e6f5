//! DocumentStore trait: the server's summary endpoints.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `HttpStore` (in summary-daemon) - The REST API over reqwest

use crate::checksum::Checksum;
use crate::document::Document;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Case identifier on the server.
pub type CaseId = u64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Server rejected request: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Case not found: {0}")]
    NotFound(CaseId),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Source of truth for case summaries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the current summary and its checksum.
    async fn fetch(&self, case_id: CaseId) -> Result<Document>;

    /// Replace the summary, returning the checksum the server stored.
    async fn update(&self, case_id: CaseId, content: &str) -> Result<Checksum>;
}

/// In-memory store for testing.
///
/// Can be taken offline to simulate network failures, and counts calls so
/// tests can assert how often the server was hit.
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<CaseId, Document>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
    updates: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one case summary.
    pub fn with_case(case_id: CaseId, content: &str) -> Self {
        let store = Self::new();
        store.write_direct(case_id, content);
        store
    }

    /// Overwrite a summary without going through `update`, as another
    /// client saving would.
    pub fn write_direct(&self, case_id: CaseId, content: &str) {
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(case_id, Document::from_content(content));
    }

    pub fn get(&self, case_id: CaseId) -> Option<Document> {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&case_id)
            .cloned()
    }

    /// Make every call fail with a request error until set back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Request("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn fetch(&self, case_id: CaseId) -> Result<Document> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.get(case_id).ok_or(StoreError::NotFound(case_id))
    }

    async fn update(&self, case_id: CaseId, content: &str) -> Result<Checksum> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        if !documents.contains_key(&case_id) {
            return Err(StoreError::NotFound(case_id));
        }
        let document = Document::from_content(content);
        let checksum = document.checksum;
        documents.insert(case_id, document);
        Ok(checksum)
    }
}

// Lets several sessions share one store in tests
#[async_trait]
impl<T: DocumentStore> DocumentStore for std::sync::Arc<T> {
    async fn fetch(&self, case_id: CaseId) -> Result<Document> {
        (**self).fetch(case_id).await
    }

    async fn update(&self, case_id: CaseId, content: &str) -> Result<Checksum> {
        (**self).update(case_id, content).await
    }
}
