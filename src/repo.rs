use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::*;
use crate::slug;
use crate::votable::Vote;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("identifier pool exhausted")] PoolExhausted,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[cfg(feature = "postgres-store")]
impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }
}

#[async_trait]
pub trait IdentifierRepo: Send + Sync {
    /// Claims one unused identifier, picked uniformly among the unused ones.
    async fn allocate_identifier(&self) -> RepoResult<Identifier>;
    /// Adds `values` as unused entries, skipping ones already in the pool.
    async fn insert_identifiers(&self, values: Vec<String>) -> RepoResult<usize>;
    async fn pool_stats(&self) -> RepoResult<PoolStats>;

    /// Generates and adds `count` new identifiers of `len` characters.
    async fn refill_identifiers(&self, count: usize, len: usize) -> RepoResult<usize> {
        let mut added = 0;
        for round in 0..slug::MAX_REFILL_ROUNDS {
            if added >= count { break; }
            let batch = slug::generate(count - added, len);
            let inserted = self.insert_identifiers(batch).await?;
            if inserted < count - added {
                warn!(round, collisions = count - added - inserted, "slug candidates collided with pool");
            }
            added += inserted;
        }
        if added < count {
            warn!(requested = count, added, len, "refill stopped short; slug length too small for pool?");
        }
        info!(added, "identifier pool refilled");
        Ok(added)
    }
}

#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn create_account(&self, new: NewAccount) -> RepoResult<Account>;
    async fn get_account(&self, username: &str) -> RepoResult<Account>;
    async fn update_account(&self, username: &str, upd: UpdateAccount) -> RepoResult<Account>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Creates a post and assigns it a slug from the identifier pool. Nothing
    /// is written when the pool is exhausted.
    async fn create_post(&self, author: Option<String>, new: NewPost) -> RepoResult<Post>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post>;
    /// Ordered by net votes (highest first), then oldest first.
    async fn list_posts(&self, page: PageRequest) -> RepoResult<Page<Post>>;
    async fn list_posts_by_author(&self, author: &str) -> RepoResult<Vec<Post>>;
    /// Returns the new net score.
    async fn vote_post(&self, id: Id, vote: Vote) -> RepoResult<i64>;
    async fn edit_post(&self, id: Id, statement: String) -> RepoResult<Post>;
    async fn set_post_status(&self, id: Id, upd: PostStatusUpdate) -> RepoResult<Post>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, author: Option<String>, new: NewComment) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>>;
    async fn vote_comment(&self, id: Id, vote: Vote) -> RepoResult<i64>;
    async fn edit_comment(&self, id: Id, statement: String) -> RepoResult<Comment>;
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn create_message(&self, author: Option<String>, new: NewMessage) -> RepoResult<Message>;
    async fn get_message(&self, id: Id) -> RepoResult<Message>;
    async fn list_messages(&self, author: &str) -> RepoResult<Vec<Message>>;
    async fn edit_message(&self, id: Id, body: String) -> RepoResult<Message>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    /// Files a report and marks the post as reported.
    async fn report_post(&self, post_id: Id, reason: String) -> RepoResult<Report>;
    async fn list_reports(&self) -> RepoResult<Vec<Report>>;
}

pub trait Repo: IdentifierRepo + AccountRepo + PostRepo + CommentRepo + MessageRepo + ReportRepo {}

impl<T> Repo for T where T: IdentifierRepo + AccountRepo + PostRepo + CommentRepo + MessageRepo + ReportRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem;

#[cfg(feature = "postgres-store")]
pub mod pg;
