pub mod http;
pub mod memory;

pub use http::HttpDocumentStore;
pub use memory::MemoryDocumentStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::ReviewAggregate;

/// Concurrency token observed when the document was fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentVersion {
    /// The store reported that no document exists yet
    Absent,
    /// The store supplied an entity tag
    Tag(String),
    /// The document exists but the store exposes no version
    Untracked,
}

/// A fetched aggregate and the version it was read at
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub aggregate: ReviewAggregate,
    pub version: DocumentVersion,
}

/// Whole-document access to the shared review list.
///
/// The document is the unit of consistency: it is always read and written
/// in full, never patched.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the document along with its version
    async fn fetch_versioned(&self) -> Result<Snapshot, StoreError>;

    /// Overwrite the document unconditionally
    async fn replace_document(&self, aggregate: &ReviewAggregate) -> Result<(), StoreError>;

    /// Overwrite the document only if it is still at `expected`.
    ///
    /// Returns `StoreError::Conflict` when another writer got there first.
    /// `DocumentVersion::Untracked` carries no condition and writes
    /// unconditionally.
    async fn replace_if_match(
        &self,
        aggregate: &ReviewAggregate,
        expected: &DocumentVersion,
    ) -> Result<(), StoreError>;

    /// Read the document. A missing document is an empty aggregate.
    async fn fetch_document(&self) -> Result<ReviewAggregate, StoreError> {
        Ok(self.fetch_versioned().await?.aggregate)
    }
}
