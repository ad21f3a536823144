pub mod board;
pub mod config;
pub mod error;
pub mod models;
pub mod notifications;
pub mod store;

pub use board::{render_board, ReviewBoard, WritePolicy};
pub use config::Config;
pub use error::{BoardError, StoreError, StoreOperation};
pub use models::*;
pub use notifications::{Notice, NoticeKind, NotificationService};
pub use store::{DocumentStore, DocumentVersion, HttpDocumentStore, MemoryDocumentStore, Snapshot};
