//! Docent SDK
//!
//! Shared contracts and types for the collaborators the Docent engine talks to:
//! knowledge retrievers, external action endpoints and the persistent store
//! behind the memory subsystem. Implementations live outside the core.

/// Collaborator traits (retriever, action endpoint, memory backend)
pub mod collaborator;

/// Error types and handling
pub mod errors;

/// Wire types exchanged with collaborators
pub mod types;

// Re-export commonly used types
pub use collaborator::{ActionEndpoint, KnowledgeRetriever, MemoryBackend};
pub use errors::{DocentErrorExt, EngineError};
pub use types::{
    BackendError, EndpointError, RawPassage, RetrieverError, SensitivityLabel, StoredRecord,
};
