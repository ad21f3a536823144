use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{DocumentStore, DocumentVersion, Snapshot};
use crate::error::StoreError;
use crate::models::ReviewAggregate;

/// In-process document store with the same whole-document semantics as the
/// HTTP store. Every successful write bumps a version counter that is exposed
/// as an entity tag.
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: Mutex<Option<Stored>>,
}

struct Stored {
    aggregate: ReviewAggregate,
    version: u64,
}

impl Stored {
    fn tag(&self) -> String {
        format!("\"v{}\"", self.version)
    }
}

impl MemoryDocumentStore {
    /// A store with no document, as if the remote location were never written
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `aggregate`
    pub fn with_document(aggregate: ReviewAggregate) -> Self {
        Self {
            state: Mutex::new(Some(Stored {
                aggregate,
                version: 1,
            })),
        }
    }

    /// The stored document, bypassing the store interface
    pub async fn current(&self) -> Option<ReviewAggregate> {
        self.state.lock().await.as_ref().map(|s| s.aggregate.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn fetch_versioned(&self) -> Result<Snapshot, StoreError> {
        let state = self.state.lock().await;

        Ok(match state.as_ref() {
            Some(stored) => Snapshot {
                aggregate: stored.aggregate.clone(),
                version: DocumentVersion::Tag(stored.tag()),
            },
            None => Snapshot {
                aggregate: ReviewAggregate::default(),
                version: DocumentVersion::Absent,
            },
        })
    }

    async fn replace_document(&self, aggregate: &ReviewAggregate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let version = state.as_ref().map_or(1, |s| s.version + 1);

        *state = Some(Stored {
            aggregate: aggregate.clone(),
            version,
        });

        debug!(version, count = aggregate.len(), "Replaced in-memory document");
        Ok(())
    }

    async fn replace_if_match(
        &self,
        aggregate: &ReviewAggregate,
        expected: &DocumentVersion,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let matches = match (expected, state.as_ref()) {
            (DocumentVersion::Untracked, _) => true,
            (DocumentVersion::Absent, None) => true,
            (DocumentVersion::Tag(tag), Some(stored)) => *tag == stored.tag(),
            _ => false,
        };

        if !matches {
            return Err(StoreError::Conflict);
        }

        let version = state.as_ref().map_or(1, |s| s.version + 1);
        *state = Some(Stored {
            aggregate: aggregate.clone(),
            version,
        });

        debug!(version, count = aggregate.len(), "Conditionally replaced in-memory document");
        Ok(())
    }
}
