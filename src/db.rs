use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, SqlitePool,
};
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Feed {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub url: String,
    pub user_id: Uuid,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Follow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub feed_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub feed_id: Uuid,
}

/// A post joined with the feed it came from, as listed to followers.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PostWithFeed {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub feed_id: Uuid,
    pub feed_name: String,
    pub feed_url: String,
}

/// Candidate post built by the poller before insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub feed_id: Uuid,
}

impl From<NewPost> for Post {
    fn from(post: NewPost) -> Self {
        Post {
            id: post.id,
            created_at: post.created_at,
            updated_at: post.updated_at,
            title: post.title,
            url: post.url,
            description: post.description,
            published_at: post.published_at,
            feed_id: post.feed_id,
        }
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BLOB PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        name TEXT NOT NULL,
        api_key TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feeds (
        id BLOB PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        last_fetched_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS follows (
        id BLOB PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        feed_id BLOB NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
        UNIQUE(user_id, feed_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id BLOB PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        title TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        description TEXT,
        published_at TEXT NOT NULL,
        feed_id BLOB NOT NULL REFERENCES feeds(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_feeds_last_fetched ON feeds(last_fetched_at)",
    "CREATE INDEX IF NOT EXISTS idx_posts_feed_published ON posts(feed_id, published_at DESC)",
];

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to `:memory:` opens a separate database.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn create_user(&self, name: &str) -> Result<User, StoreError> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            name: name.to_string(),
            api_key: generate_api_key(),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, created_at, updated_at, name, api_key)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(&user.name)
        .bind(&user.api_key)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn create_feed(
        &self,
        user_id: Uuid,
        name: &str,
        url: &str,
    ) -> Result<Feed, StoreError> {
        let feed = new_feed(user_id, name, url);
        insert_feed(&self.pool, &feed).await?;
        Ok(feed)
    }

    /// Creates a feed and subscribes its creator in one transaction.
    pub async fn create_feed_with_follow(
        &self,
        user_id: Uuid,
        name: &str,
        url: &str,
    ) -> Result<(Feed, Follow), StoreError> {
        let feed = new_feed(user_id, name, url);
        let follow = new_follow(user_id, feed.id);

        let mut tx = self.pool.begin().await?;
        insert_feed(&mut *tx, &feed).await?;
        insert_follow(&mut *tx, &follow).await?;
        tx.commit().await?;

        Ok((feed, follow))
    }

    pub async fn get_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT * FROM feeds ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Least recently fetched first; feeds never fetched come before all others.
    pub async fn get_next_feeds_to_fetch(&self, limit: u32) -> Result<Vec<Feed>, StoreError> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn mark_feed_fetched(&self, feed_id: Uuid) -> Result<(), StoreError> {
        self.mark_feed_fetched_at(feed_id, Utc::now()).await
    }

    pub async fn mark_feed_fetched_at(
        &self,
        feed_id: Uuid,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(fetched_at)
        .bind(fetched_at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_follow(&self, user_id: Uuid, feed_id: Uuid) -> Result<Follow, StoreError> {
        let follow = new_follow(user_id, feed_id);
        insert_follow(&self.pool, &follow).await?;
        Ok(follow)
    }

    pub async fn get_follows(&self, user_id: Uuid) -> Result<Vec<Follow>, StoreError> {
        let follows = sqlx::query_as::<_, Follow>(
            "SELECT * FROM follows WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }

    /// Returns false when no follow with this id belongs to the user.
    pub async fn delete_follow(&self, follow_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM follows WHERE id = ? AND user_id = ?")
            .bind(follow_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_post(&self, post: NewPost) -> Result<Post, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, created_at, updated_at, title, url, description, published_at, feed_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.id)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(post.published_at)
        .bind(post.feed_id)
        .execute(&self.pool)
        .await?;

        Ok(post.into())
    }

    pub async fn get_posts_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PostWithFeed>, StoreError> {
        let posts = sqlx::query_as::<_, PostWithFeed>(
            r#"
            SELECT p.*, f.name AS feed_name, f.url AS feed_url
            FROM posts p
            INNER JOIN feeds f ON p.feed_id = f.id
            INNER JOIN follows fw ON f.id = fw.feed_id
            WHERE fw.user_id = ?
            ORDER BY p.published_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    pub async fn get_post_count_for_feed(&self, feed_id: Uuid) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

fn generate_api_key() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn new_feed(user_id: Uuid, name: &str, url: &str) -> Feed {
    let now = Utc::now();
    Feed {
        id: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
        name: name.to_string(),
        url: url.to_string(),
        user_id,
        last_fetched_at: None,
    }
}

fn new_follow(user_id: Uuid, feed_id: Uuid) -> Follow {
    let now = Utc::now();
    Follow {
        id: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
        user_id,
        feed_id,
    }
}

async fn insert_feed<'e, E>(executor: E, feed: &Feed) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO feeds (id, created_at, updated_at, name, url, user_id, last_fetched_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(feed.id)
    .bind(feed.created_at)
    .bind(feed.updated_at)
    .bind(&feed.name)
    .bind(&feed.url)
    .bind(feed.user_id)
    .bind(feed.last_fetched_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_follow<'e, E>(executor: E, follow: &Follow) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO follows (id, created_at, updated_at, user_id, feed_id)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(follow.id)
    .bind(follow.created_at)
    .bind(follow.updated_at)
    .bind(follow.user_id)
    .bind(follow.feed_id)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn create_test_db() -> Database {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    fn new_post(feed_id: Uuid, url: &str, published_at: DateTime<Utc>) -> NewPost {
        let now = Utc::now();
        NewPost {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            title: format!("Title for {}", url),
            url: url.to_string(),
            description: None,
            published_at,
            feed_id,
        }
    }

    mod initialization_tests {
        use super::*;

        #[tokio::test]
        async fn test_database_creation() {
            let db = Database::new("sqlite::memory:").await;
            assert!(db.is_ok());
        }

        #[tokio::test]
        async fn test_database_initialization() {
            let db = create_test_db().await;
            let feeds = db.get_feeds().await.unwrap();
            assert!(feeds.is_empty());
        }

        #[tokio::test]
        async fn test_double_initialization_is_safe() {
            let db = create_test_db().await;
            let result = db.initialize().await;
            assert!(result.is_ok());
        }
    }

    mod user_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_user_generates_api_key() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();

            assert_eq!(user.name, "alice");
            assert_eq!(user.api_key.len(), 64);
            assert!(user.api_key.chars().all(|c| c.is_ascii_hexdigit()));
        }

        #[tokio::test]
        async fn test_get_user_by_api_key() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();

            let found = db.get_user_by_api_key(&user.api_key).await.unwrap();
            assert_eq!(found.map(|u| u.id), Some(user.id));
        }

        #[tokio::test]
        async fn test_unknown_api_key() {
            let db = create_test_db().await;
            db.create_user("alice").await.unwrap();

            let found = db.get_user_by_api_key("nope").await.unwrap();
            assert!(found.is_none());
        }

        #[tokio::test]
        async fn test_api_keys_are_distinct() {
            let db = create_test_db().await;
            let a = db.create_user("a").await.unwrap();
            let b = db.create_user("b").await.unwrap();
            assert_ne!(a.api_key, b.api_key);
        }
    }

    mod feed_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_and_get_feed() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();

            let feed = db
                .create_feed(user.id, "Blog", "https://blog.example.com/index.xml")
                .await
                .unwrap();

            let found = db.get_feed(feed.id).await.unwrap().unwrap();
            assert_eq!(found.name, "Blog");
            assert_eq!(found.user_id, user.id);
            assert!(found.last_fetched_at.is_none());
        }

        #[tokio::test]
        async fn test_get_nonexistent_feed() {
            let db = create_test_db().await;
            let feed = db.get_feed(Uuid::new_v4()).await.unwrap();
            assert!(feed.is_none());
        }

        #[tokio::test]
        async fn test_duplicate_feed_url_is_conflict() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            db.create_feed(user.id, "One", "https://same.example.com/rss")
                .await
                .unwrap();

            let result = db
                .create_feed(user.id, "Two", "https://same.example.com/rss")
                .await;
            assert!(matches!(result, Err(StoreError::Conflict)));
        }

        #[tokio::test]
        async fn test_create_feed_with_follow() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();

            let (feed, follow) = db
                .create_feed_with_follow(user.id, "Blog", "https://blog.example.com/rss")
                .await
                .unwrap();

            assert_eq!(follow.feed_id, feed.id);
            assert_eq!(follow.user_id, user.id);
            assert_eq!(db.get_follows(user.id).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_create_feed_with_follow_rolls_back_on_conflict() {
            let db = create_test_db().await;
            let alice = db.create_user("alice").await.unwrap();
            let bob = db.create_user("bob").await.unwrap();
            db.create_feed(alice.id, "Blog", "https://blog.example.com/rss")
                .await
                .unwrap();

            let result = db
                .create_feed_with_follow(bob.id, "Copy", "https://blog.example.com/rss")
                .await;

            assert!(matches!(result, Err(StoreError::Conflict)));
            assert!(db.get_follows(bob.id).await.unwrap().is_empty());
        }
    }

    mod next_feeds_tests {
        use super::*;

        #[tokio::test]
        async fn test_never_fetched_feeds_come_first() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();

            let a = db.create_feed(user.id, "A", "https://a.example.com/rss").await.unwrap();
            let b = db.create_feed(user.id, "B", "https://b.example.com/rss").await.unwrap();
            let c = db.create_feed(user.id, "C", "https://c.example.com/rss").await.unwrap();

            let now = Utc::now();
            db.mark_feed_fetched_at(b.id, now - ChronoDuration::hours(1))
                .await
                .unwrap();
            db.mark_feed_fetched_at(c.id, now - ChronoDuration::minutes(1))
                .await
                .unwrap();

            let next = db.get_next_feeds_to_fetch(2).await.unwrap();
            let ids: Vec<Uuid> = next.iter().map(|f| f.id).collect();
            assert_eq!(ids, vec![a.id, b.id]);
        }

        #[tokio::test]
        async fn test_limit_larger_than_feed_count() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            db.create_feed(user.id, "A", "https://a.example.com/rss").await.unwrap();

            let next = db.get_next_feeds_to_fetch(10).await.unwrap();
            assert_eq!(next.len(), 1);
        }

        #[tokio::test]
        async fn test_no_feeds() {
            let db = create_test_db().await;
            let next = db.get_next_feeds_to_fetch(10).await.unwrap();
            assert!(next.is_empty());
        }

        #[tokio::test]
        async fn test_mark_feed_fetched_moves_feed_to_back() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let a = db.create_feed(user.id, "A", "https://a.example.com/rss").await.unwrap();
            let b = db.create_feed(user.id, "B", "https://b.example.com/rss").await.unwrap();

            db.mark_feed_fetched(a.id).await.unwrap();

            let next = db.get_next_feeds_to_fetch(1).await.unwrap();
            assert_eq!(next[0].id, b.id);

            let a = db.get_feed(a.id).await.unwrap().unwrap();
            assert!(a.last_fetched_at.is_some());
            assert!(a.updated_at >= a.created_at);
        }
    }

    mod follow_tests {
        use super::*;

        #[tokio::test]
        async fn test_follow_twice_is_conflict() {
            let db = create_test_db().await;
            let alice = db.create_user("alice").await.unwrap();
            let bob = db.create_user("bob").await.unwrap();
            let feed = db.create_feed(alice.id, "A", "https://a.example.com/rss").await.unwrap();

            db.create_follow(bob.id, feed.id).await.unwrap();
            let result = db.create_follow(bob.id, feed.id).await;
            assert!(matches!(result, Err(StoreError::Conflict)));
        }

        #[tokio::test]
        async fn test_delete_follow_only_by_owner() {
            let db = create_test_db().await;
            let alice = db.create_user("alice").await.unwrap();
            let bob = db.create_user("bob").await.unwrap();
            let feed = db.create_feed(alice.id, "A", "https://a.example.com/rss").await.unwrap();
            let follow = db.create_follow(bob.id, feed.id).await.unwrap();

            assert!(!db.delete_follow(follow.id, alice.id).await.unwrap());
            assert!(db.delete_follow(follow.id, bob.id).await.unwrap());
            assert!(db.get_follows(bob.id).await.unwrap().is_empty());
        }
    }

    mod post_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_post() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let feed = db.create_feed(user.id, "A", "https://a.example.com/rss").await.unwrap();

            let post = db
                .create_post(new_post(feed.id, "https://a.example.com/1", Utc::now()))
                .await
                .unwrap();

            assert_eq!(post.url, "https://a.example.com/1");
            assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_duplicate_post_url_is_conflict() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let feed = db.create_feed(user.id, "A", "https://a.example.com/rss").await.unwrap();

            db.create_post(new_post(feed.id, "http://x/1", Utc::now()))
                .await
                .unwrap();
            let result = db
                .create_post(new_post(feed.id, "http://x/1", Utc::now()))
                .await;

            assert!(matches!(result, Err(StoreError::Conflict)));
            assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_post_url_unique_across_feeds() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let a = db.create_feed(user.id, "A", "https://a.example.com/rss").await.unwrap();
            let b = db.create_feed(user.id, "B", "https://b.example.com/rss").await.unwrap();

            db.create_post(new_post(a.id, "http://x/1", Utc::now()))
                .await
                .unwrap();
            let result = db.create_post(new_post(b.id, "http://x/1", Utc::now())).await;

            assert!(matches!(result, Err(StoreError::Conflict)));
        }

        #[tokio::test]
        async fn test_posts_for_user_only_followed_newest_first() {
            let db = create_test_db().await;
            let alice = db.create_user("alice").await.unwrap();
            let (followed, _) = db
                .create_feed_with_follow(alice.id, "Followed", "https://f.example.com/rss")
                .await
                .unwrap();
            let other = db
                .create_feed(alice.id, "Other", "https://o.example.com/rss")
                .await
                .unwrap();

            let now = Utc::now();
            for i in 1..=3 {
                db.create_post(new_post(
                    followed.id,
                    &format!("https://f.example.com/{}", i),
                    now - ChronoDuration::hours(3 - i),
                ))
                .await
                .unwrap();
            }
            db.create_post(new_post(other.id, "https://o.example.com/1", now))
                .await
                .unwrap();

            let posts = db.get_posts_for_user(alice.id, 10).await.unwrap();
            assert_eq!(posts.len(), 3);
            assert_eq!(posts[0].url, "https://f.example.com/3");
            assert_eq!(posts[0].feed_name, "Followed");
            assert_eq!(posts[0].feed_url, "https://f.example.com/rss");

            let limited = db.get_posts_for_user(alice.id, 2).await.unwrap();
            assert_eq!(limited.len(), 2);
        }
    }
}
