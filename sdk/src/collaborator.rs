//! Collaborator traits
//!
//! The engine treats document search, external actions and durable storage as
//! services with a contract. These traits are that contract; the engine only
//! ever holds them behind `Arc<dyn ...>` handles passed in explicitly.

use async_trait::async_trait;

use crate::types::{BackendError, EndpointError, RawPassage, RetrieverError, StoredRecord};

/// Searches the uploaded document collection.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Return up to `k` passages ranked by the retriever.
    ///
    /// An empty vector means "searched, found nothing". Errors are reserved
    /// for transport failures.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RawPassage>, RetrieverError>;
}

/// An external operation the agent can invoke by name.
#[async_trait]
pub trait ActionEndpoint: Send + Sync {
    /// Invoke the endpoint with already-validated parameters.
    async fn invoke(&self, parameters: &serde_json::Value)
        -> Result<serde_json::Value, EndpointError>;
}

/// Key-value store backing the memory subsystem.
///
/// Updates are conditional per key: `put` succeeds only when the stored
/// version equals `expected_version` (`None` meaning "key absent").
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>, BackendError>;

    /// Store `payload` under `key`, returning the new version.
    async fn put(
        &self,
        key: &str,
        payload: serde_json::Value,
        expected_version: Option<u64>,
    ) -> Result<u64, BackendError>;

    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}
