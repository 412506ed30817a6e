use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, Feed, NewPost, Post};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("record already exists")]
    Conflict,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict
            }
            other => StoreError::Database(other),
        }
    }
}

/// The store operations the poller depends on.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Up to `limit` feeds, least recently fetched first.
    async fn get_next_feeds_to_fetch(&self, limit: u32) -> Result<Vec<Feed>, StoreError>;

    async fn mark_feed_fetched(&self, feed_id: Uuid) -> Result<(), StoreError>;

    /// Fails with [`StoreError::Conflict`] when a post with the same url exists.
    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn get_next_feeds_to_fetch(&self, limit: u32) -> Result<Vec<Feed>, StoreError> {
        Database::get_next_feeds_to_fetch(self, limit).await
    }

    async fn mark_feed_fetched(&self, feed_id: Uuid) -> Result<(), StoreError> {
        Database::mark_feed_fetched(self, feed_id).await
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError> {
        Database::create_post(self, post).await
    }
}
