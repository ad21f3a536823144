use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, warn};

use crate::error::{BoardError, StoreError};
use crate::models::{Review, ReviewAggregate};
use crate::store::{DocumentStore, DocumentVersion, Snapshot};

/// How an append writes the mutated document back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Unconditional replace. Concurrent appenders can silently drop each
    /// other's reviews.
    #[default]
    LastWriterWins,
    /// Conditional replace against the fetched version, re-running the
    /// fetch/append/write cycle on conflict
    Optimistic { max_attempts: u32 },
}

/// The shared review board: reads the review document and appends to it
pub struct ReviewBoard<S: DocumentStore> {
    store: S,
    policy: WritePolicy,
    in_flight: AtomicBool,
}

impl<S: DocumentStore> ReviewBoard<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: WritePolicy::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether a `submit` call is currently running
    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Fetch the current document for display
    pub async fn load(&self) -> Result<ReviewAggregate, StoreError> {
        let aggregate = self.store.fetch_document().await?;
        info!(count = aggregate.len(), "Loaded reviews");
        Ok(aggregate)
    }

    /// Add one review to the shared document and return the written aggregate.
    ///
    /// A failed fetch aborts before any write. A failed write means the review
    /// may not have persisted, even though it was appended locally.
    #[instrument(skip(self, review), fields(policy = ?self.policy, rating = review.rating))]
    pub async fn append_review(&self, review: Review) -> Result<ReviewAggregate, StoreError> {
        match self.policy {
            WritePolicy::LastWriterWins => self.append_unconditional(review).await,
            WritePolicy::Optimistic { max_attempts } => {
                self.append_optimistic(review, max_attempts).await
            }
        }
    }

    async fn append_unconditional(&self, review: Review) -> Result<ReviewAggregate, StoreError> {
        let mut aggregate = self.store.fetch_document().await?;
        aggregate.reviews.push(review);

        // Overwrites anything written since the fetch above.
        self.store.replace_document(&aggregate).await?;

        info!(count = aggregate.len(), "Review appended");
        Ok(aggregate)
    }

    async fn append_optimistic(
        &self,
        review: Review,
        max_attempts: u32,
    ) -> Result<ReviewAggregate, StoreError> {
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let Snapshot {
                mut aggregate,
                version,
            } = self.store.fetch_versioned().await?;

            if version == DocumentVersion::Untracked {
                warn!("Store exposes no document version, writing unconditionally");
            }

            aggregate.reviews.push(review.clone());

            match self.store.replace_if_match(&aggregate, &version).await {
                Ok(()) => {
                    info!(count = aggregate.len(), attempt, "Review appended");
                    return Ok(aggregate);
                }
                Err(StoreError::Conflict) => {
                    debug!(attempt, "Document changed during append, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(attempts = max_attempts, "Giving up on contended append");
        Err(StoreError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    /// Validate and append a new review written now.
    ///
    /// Only one submission runs at a time per board; a second call while one
    /// is in flight fails with `BoardError::SubmissionInFlight`.
    pub async fn submit(&self, text: &str, rating: i64) -> Result<ReviewAggregate, BoardError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BoardError::EmptyReview);
        }

        let _guard =
            SubmissionGuard::acquire(&self.in_flight).ok_or(BoardError::SubmissionInFlight)?;

        let aggregate = self.append_review(Review::new(text, rating)).await?;
        Ok(aggregate)
    }
}

/// Holds the in-flight flag for the duration of a submission
struct SubmissionGuard<'a>(&'a AtomicBool);

impl<'a> SubmissionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Render the board as plain text, newest review first
pub fn render_board(aggregate: &ReviewAggregate) -> String {
    let mut out = String::new();

    if aggregate.is_empty() {
        out.push_str("Average rating: 0\n");
        out.push_str("No reviews yet\n\n");
        out.push_str("Be the first to leave a review!\n");
        return out;
    }

    let stats = aggregate.stats();
    out.push_str(&format!("Average rating: {:.1}\n", stats.average));
    out.push_str(&format!(
        "Based on {} review{}\n\n",
        stats.count,
        if stats.count == 1 { "" } else { "s" }
    ));

    for review in aggregate.newest_first() {
        out.push_str(&format!("- {}\n", review.text));
        out.push_str(&format!("  Rating: {}/100\n", review.rating));
    }

    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::{Barrier, Notify};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    use super::*;
    use crate::error::StoreOperation;
    use crate::store::{HttpDocumentStore, MemoryDocumentStore};

    fn review(text: &str, rating: i64, created_at: &str) -> Review {
        Review {
            text: text.to_string(),
            rating,
            created_at: created_at.to_string(),
        }
    }

    fn seeded() -> MemoryDocumentStore {
        MemoryDocumentStore::with_document(ReviewAggregate::new(vec![review(
            "ok",
            80,
            "2024-01-01T00:00:00Z",
        )]))
    }

    /// Holds every first fetch until both racing writers have read the document
    struct GatedStore {
        inner: Arc<MemoryDocumentStore>,
        barrier: Arc<Barrier>,
        gated: AtomicBool,
    }

    impl GatedStore {
        fn pair(inner: MemoryDocumentStore) -> (Self, Self, Arc<MemoryDocumentStore>) {
            let inner = Arc::new(inner);
            let barrier = Arc::new(Barrier::new(2));
            let make = || GatedStore {
                inner: inner.clone(),
                barrier: barrier.clone(),
                gated: AtomicBool::new(true),
            };
            (make(), make(), inner.clone())
        }
    }

    #[async_trait]
    impl DocumentStore for GatedStore {
        async fn fetch_versioned(&self) -> Result<Snapshot, StoreError> {
            let snapshot = self.inner.fetch_versioned().await?;
            if self.gated.swap(false, Ordering::AcqRel) {
                self.barrier.wait().await;
            }
            Ok(snapshot)
        }

        async fn replace_document(&self, aggregate: &ReviewAggregate) -> Result<(), StoreError> {
            self.inner.replace_document(aggregate).await
        }

        async fn replace_if_match(
            &self,
            aggregate: &ReviewAggregate,
            expected: &DocumentVersion,
        ) -> Result<(), StoreError> {
            self.inner.replace_if_match(aggregate, expected).await
        }
    }

    /// Matches requests that carry no conditional-write header
    struct Unconditional;

    impl Match for Unconditional {
        fn matches(&self, request: &Request) -> bool {
            !request.headers.contains_key("if-match")
                && !request.headers.contains_key("if-none-match")
        }
    }

    /// Blocks fetches until released
    struct HeldStore {
        inner: MemoryDocumentStore,
        release: Notify,
    }

    #[async_trait]
    impl DocumentStore for HeldStore {
        async fn fetch_versioned(&self) -> Result<Snapshot, StoreError> {
            self.release.notified().await;
            self.inner.fetch_versioned().await
        }

        async fn replace_document(&self, aggregate: &ReviewAggregate) -> Result<(), StoreError> {
            self.inner.replace_document(aggregate).await
        }

        async fn replace_if_match(
            &self,
            aggregate: &ReviewAggregate,
            expected: &DocumentVersion,
        ) -> Result<(), StoreError> {
            self.inner.replace_if_match(aggregate, expected).await
        }
    }

    #[tokio::test]
    async fn test_append_to_existing_document() {
        let board = ReviewBoard::new(seeded());

        let aggregate = board
            .append_review(review("great", 95, "2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        let stats = aggregate.stats();
        assert_eq!(stats.count, 2);
        assert!((stats.average - 87.5).abs() < f64::EPSILON);

        let stored = board.store().current().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored, aggregate);
    }

    #[tokio::test]
    async fn test_append_to_missing_document() {
        let board = ReviewBoard::new(MemoryDocumentStore::new());

        assert!(board.load().await.unwrap().is_empty());

        board
            .append_review(review("first", 70, "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(board.store().current().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_then_fetch_contains_review_unchanged() {
        let board = ReviewBoard::new(seeded());
        let before = board.load().await.unwrap();
        let new_review = review("  spaced text  ", 42, "2024-05-05T05:05:05.123Z");

        board.append_review(new_review.clone()).await.unwrap();

        let after = board.load().await.unwrap();
        assert_eq!(after.len(), before.len() + 1);
        assert!(after.reviews.contains(&new_review));
        assert_eq!(after.reviews.last(), Some(&new_review));
    }

    #[tokio::test]
    async fn test_append_writes_full_document_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "reviews": [{"text": "ok", "rating": 80, "createdAt": "2024-01-01T00:00:00Z"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/doc"))
            .and(body_json(json!({
                "reviews": [
                    {"text": "ok", "rating": 80, "createdAt": "2024-01-01T00:00:00Z"},
                    {"text": "great", "rating": 95, "createdAt": "2024-01-02T00:00:00Z"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let board = ReviewBoard::new(HttpDocumentStore::new(format!("{}/doc", server.uri())));
        let aggregate = board
            .append_review(review("great", 95, "2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(aggregate.stats().count, 2);
        assert!((aggregate.stats().average - 87.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_without_write() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let board = ReviewBoard::new(HttpDocumentStore::new(format!("{}/doc", server.uri())));
        let err = board
            .append_review(review("lost", 10, "2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert_eq!(err.operation(), StoreOperation::Fetch);
    }

    #[tokio::test]
    async fn test_replace_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let board = ReviewBoard::new(HttpDocumentStore::new(format!("{}/doc", server.uri())));
        let err = board
            .append_review(review("unsaved", 10, "2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Unavailable {
                operation: StoreOperation::Replace,
                ..
            }
        ));
    }

    // Known limitation of whole-document replace: both writers read the same
    // state, and the second write discards the first writer's review.
    #[tokio::test]
    async fn test_concurrent_appends_can_lose_an_update() {
        let (a, b, shared) = GatedStore::pair(seeded());
        let board_a = ReviewBoard::new(a);
        let board_b = ReviewBoard::new(b);

        let r1 = review("first writer", 60, "2024-02-01T00:00:00Z");
        let r2 = review("second writer", 90, "2024-02-01T00:00:01Z");

        let (res_a, res_b) = tokio::join!(
            board_a.append_review(r1.clone()),
            board_b.append_review(r2.clone())
        );
        assert!(res_a.is_ok());
        assert!(res_b.is_ok());

        let stored = shared.current().await.unwrap();
        assert_eq!(stored.len(), 2);

        let has_r1 = stored.reviews.contains(&r1);
        let has_r2 = stored.reviews.contains(&r2);
        assert!(has_r1 ^ has_r2, "exactly one concurrent review survives");
    }

    #[tokio::test]
    async fn test_optimistic_appends_keep_both_reviews() {
        let (a, b, shared) = GatedStore::pair(seeded());
        let policy = WritePolicy::Optimistic { max_attempts: 3 };
        let board_a = ReviewBoard::new(a).with_policy(policy);
        let board_b = ReviewBoard::new(b).with_policy(policy);

        let r1 = review("first writer", 60, "2024-02-01T00:00:00Z");
        let r2 = review("second writer", 90, "2024-02-01T00:00:01Z");

        let (res_a, res_b) = tokio::join!(
            board_a.append_review(r1.clone()),
            board_b.append_review(r2.clone())
        );
        assert!(res_a.is_ok());
        assert!(res_b.is_ok());

        let stored = shared.current().await.unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.reviews.contains(&r1));
        assert!(stored.reviews.contains(&r2));
    }

    #[tokio::test]
    async fn test_optimistic_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v1\"")
                    .set_body_json(json!({"reviews": []})),
            )
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(412))
            .expect(2)
            .mount(&server)
            .await;

        let board = ReviewBoard::new(HttpDocumentStore::new(format!("{}/doc", server.uri())))
            .with_policy(WritePolicy::Optimistic { max_attempts: 2 });

        let err = board
            .append_review(review("contended", 50, "2024-01-01T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::RetriesExhausted { attempts: 2 }));
    }

    #[tokio::test]
    async fn test_optimistic_without_etag_writes_unconditionally() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "reviews": [{"text": "ok", "rating": 80, "createdAt": "2024-01-01T00:00:00Z"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/doc"))
            .and(Unconditional)
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let board = ReviewBoard::new(HttpDocumentStore::new(format!("{}/doc", server.uri())))
            .with_policy(WritePolicy::Optimistic { max_attempts: 3 });

        let aggregate = board
            .append_review(review("untracked", 90, "2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(aggregate.len(), 2);
    }

    #[test]
    fn test_default_policy_is_last_writer_wins() {
        let board = ReviewBoard::new(MemoryDocumentStore::new());
        assert_eq!(board.policy(), WritePolicy::LastWriterWins);

        let board = board.with_policy(WritePolicy::Optimistic { max_attempts: 4 });
        assert_eq!(board.policy(), WritePolicy::Optimistic { max_attempts: 4 });
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_text() {
        let board = ReviewBoard::new(MemoryDocumentStore::new());

        let err = board.submit("   \n", 50).await.unwrap_err();

        assert!(matches!(err, BoardError::EmptyReview));
        assert!(board.store().current().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_trims_and_stamps() {
        let board = ReviewBoard::new(MemoryDocumentStore::new());

        let aggregate = board.submit("  lovely place  ", 88).await.unwrap();

        let stored = &aggregate.reviews[0];
        assert_eq!(stored.text, "lovely place");
        assert_eq!(stored.rating, 88);
        assert!(stored.created_at_time().is_some());
        assert!(!board.is_submitting());
    }

    #[tokio::test]
    async fn test_submit_is_not_reentrant() {
        let board = ReviewBoard::new(HeldStore {
            inner: MemoryDocumentStore::new(),
            release: Notify::new(),
        });

        let (first, second) = tokio::join!(board.submit("first", 50), async {
            assert!(board.is_submitting());
            let second = board.submit("second", 50).await;
            board.store().release.notify_one();
            second
        });

        assert_eq!(first.unwrap().len(), 1);
        assert!(matches!(second, Err(BoardError::SubmissionInFlight)));
        assert!(!board.is_submitting());
    }

    #[test]
    fn test_render_empty_board() {
        let out = render_board(&ReviewAggregate::default());
        assert!(out.contains("Average rating: 0\n"));
        assert!(out.contains("No reviews yet"));
    }

    #[test]
    fn test_render_board_newest_first() {
        let aggregate = ReviewAggregate::new(vec![
            review("ok", 80, "2024-01-01T00:00:00Z"),
            review("great", 95, "2024-01-02T00:00:00Z"),
        ]);

        let out = render_board(&aggregate);

        assert!(out.contains("Average rating: 87.5"));
        assert!(out.contains("Based on 2 reviews"));
        assert!(out.find("great").unwrap() < out.find("- ok").unwrap());
        assert!(out.contains("Rating: 95/100"));
    }
}
