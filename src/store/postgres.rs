use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::PgConnection;
use tracing::error;

use super::{CommentStore, StoreError};
use crate::config::DatabaseConfig;
use crate::models::{Comment, NewComment};
use crate::schema::comments;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

/// Builds the pool without opening connections up front so the service can
/// start (and report 503 from `/health`) while the database is down.
pub fn create_db_pool(config: &DatabaseConfig) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(&config.url);
    r2d2::Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(config.min_connections))
        .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .build_unchecked(manager)
}

#[derive(Clone)]
pub struct PgCommentStore {
    pool: DbPool,
}

impl PgCommentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Runs a diesel closure on the blocking pool with a checked-out connection.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgPooled) -> Result<T, DieselError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| {
                error!(error = %e, "Database connection error");
                StoreError::Connection(e.to_string())
            })?;
            f(&mut conn).map_err(map_diesel_error)
        })
        .await
        .map_err(|e| StoreError::Query(format!("storage task failed: {}", e)))?
    }
}

fn map_diesel_error(e: DieselError) -> StoreError {
    match e {
        DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation
            | DatabaseErrorKind::ForeignKeyViolation
            | DatabaseErrorKind::NotNullViolation
            | DatabaseErrorKind::CheckViolation,
            info,
        ) => StoreError::Conflict(info.message().to_string()),
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            StoreError::Connection(info.message().to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn insert(&self, comment: NewComment) -> Result<Comment, StoreError> {
        self.with_conn(move |conn| {
            diesel::insert_into(comments::table)
                .values(&comment)
                .returning(Comment::as_returning())
                .get_result(conn)
        })
        .await
    }

    async fn list_by_content_id(&self, content_id: i32) -> Result<Vec<Comment>, StoreError> {
        self.with_conn(move |conn| {
            comments::table
                .filter(comments::content_id.eq(content_id))
                .order(comments::id.desc())
                .select(Comment::as_select())
                .load(conn)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| diesel::sql_query("SELECT 1").execute(conn).map(|_| ()))
            .await
    }
}
