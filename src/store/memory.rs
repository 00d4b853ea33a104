use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommentStore, StoreError};
use crate::models::{Comment, NewComment};

#[derive(Default)]
struct Table {
    last_id: i32,
    rows: Vec<Comment>,
}

/// Process-local store with SERIAL-like ids.
#[derive(Default)]
pub struct InMemoryCommentStore {
    table: Mutex<Table>,
    unavailable: AtomicBool,
}

impl InMemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with [`StoreError::Connection`] until reset.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Table>, StoreError> {
        self.table
            .lock()
            .map_err(|_| StoreError::Query("comment table lock poisoned".to_string()))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn insert(&self, comment: NewComment) -> Result<Comment, StoreError> {
        self.check_available()?;
        let mut table = self.lock()?;
        let id = table
            .last_id
            .checked_add(1)
            .ok_or_else(|| StoreError::Query("comment id sequence exhausted".to_string()))?;
        table.last_id = id;
        let row = comment.into_comment(id);
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn list_by_content_id(&self, content_id: i32) -> Result<Vec<Comment>, StoreError> {
        self.check_available()?;
        let table = self.lock()?;
        let mut rows: Vec<Comment> = table
            .rows
            .iter()
            .filter(|c| c.content_id == content_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
