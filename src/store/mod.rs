//! Comment storage.
//!
//! The HTTP layer only talks to [`CommentStore`]. [`PgCommentStore`] is the
//! production backend; [`InMemoryCommentStore`] backs tests and local runs.

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::models::{Comment, NewComment};

pub use memory::InMemoryCommentStore;
pub use postgres::{create_db_pool, DbPool, PgCommentStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("constraint violation: {0}")]
    Conflict(String),
    #[error("storage unreachable: {0}")]
    Connection(String),
    #[error("storage query failed: {0}")]
    Query(String),
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Persists a comment and returns it with its assigned id.
    async fn insert(&self, comment: NewComment) -> Result<Comment, StoreError>;

    /// Comments for `content_id`, newest (highest id) first.
    async fn list_by_content_id(&self, content_id: i32) -> Result<Vec<Comment>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
