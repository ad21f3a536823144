use async_trait::async_trait;
use reqwest::header::{HeaderName, ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, instrument, warn};

use super::{DocumentStore, DocumentVersion, Snapshot};
use crate::error::{StoreError, StoreOperation};
use crate::models::ReviewAggregate;

/// Document store backed by a single JSON blob behind an HTTP URL.
///
/// GET reads the blob, PUT replaces it. No client-side timeout is set; the
/// transport defaults apply.
pub struct HttpDocumentStore {
    client: Client,
    url: String,
}

impl HttpDocumentStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn put(
        &self,
        aggregate: &ReviewAggregate,
        condition: Option<(HeaderName, &str)>,
    ) -> Result<(), StoreError> {
        let conditional = condition.is_some();

        let mut request = self.client.put(&self.url).json(aggregate);
        if let Some((name, value)) = condition {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::unavailable(StoreOperation::Replace, e.to_string()))?;

        let status = response.status();
        if conditional && status == StatusCode::PRECONDITION_FAILED {
            debug!("Conditional write rejected");
            return Err(StoreError::Conflict);
        }

        if !status.is_success() {
            return Err(failure(StoreOperation::Replace, response).await);
        }

        info!(count = aggregate.len(), "Replaced review document");
        Ok(())
    }
}

/// Turn a non-success response into `StoreError::Unavailable`
async fn failure(operation: StoreOperation, response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    warn!(%operation, status = %status, body = %body, "Document store returned an error");
    StoreError::unavailable(operation, format!("HTTP {}", status))
}

/// Only strong entity tags can back an `If-Match` write; a weak tag
/// never matches under strong comparison.
fn version_from_etag(etag: Option<&str>) -> DocumentVersion {
    match etag {
        Some(tag) if tag.starts_with("W/") => {
            debug!(etag = tag, "Ignoring weak entity tag");
            DocumentVersion::Untracked
        }
        Some(tag) => DocumentVersion::Tag(tag.to_string()),
        None => DocumentVersion::Untracked,
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch_versioned(&self) -> Result<Snapshot, StoreError> {
        debug!("Fetching review document");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| StoreError::unavailable(StoreOperation::Fetch, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!("Review document does not exist yet, treating it as empty");
            return Ok(Snapshot {
                aggregate: ReviewAggregate::default(),
                version: DocumentVersion::Absent,
            });
        }

        if !status.is_success() {
            return Err(failure(StoreOperation::Fetch, response).await);
        }

        let etag = response.headers().get(ETAG).and_then(|v| v.to_str().ok());
        let version = version_from_etag(etag);

        let body = response
            .text()
            .await
            .map_err(|e| StoreError::unavailable(StoreOperation::Fetch, e.to_string()))?;

        let aggregate: ReviewAggregate = serde_json::from_str(&body)?;

        debug!(count = aggregate.len(), version = ?version, "Fetched review document");

        Ok(Snapshot { aggregate, version })
    }

    #[instrument(skip(self, aggregate), fields(url = %self.url, count = aggregate.len()))]
    async fn replace_document(&self, aggregate: &ReviewAggregate) -> Result<(), StoreError> {
        self.put(aggregate, None).await
    }

    #[instrument(skip(self, aggregate), fields(url = %self.url, count = aggregate.len()))]
    async fn replace_if_match(
        &self,
        aggregate: &ReviewAggregate,
        expected: &DocumentVersion,
    ) -> Result<(), StoreError> {
        match expected {
            DocumentVersion::Tag(tag) => self.put(aggregate, Some((IF_MATCH, tag.as_str()))).await,
            DocumentVersion::Absent => self.put(aggregate, Some((IF_NONE_MATCH, "*"))).await,
            DocumentVersion::Untracked => self.put(aggregate, None).await,
        }
    }
}
