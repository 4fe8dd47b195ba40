use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use sqlx::{PgConnection, Pool, Postgres};
use tracing::{debug, info, warn};

use super::*;

/// Claim attempts before giving up on a pool that other writers keep
/// draining under us.
const MAX_CLAIM_ATTEMPTS: usize = 8;
const CLAIM_CANDIDATE: &str =
    "SELECT id FROM identifiers WHERE NOT used ORDER BY id OFFSET $1 LIMIT 1 FOR UPDATE SKIP LOCKED";
const WAIT_CANDIDATE: &str =
    "SELECT id FROM identifiers WHERE NOT used ORDER BY id LIMIT 1 FOR UPDATE";

macro_rules! post_cols {
    () => { "id, author, title, statement, votes, upvotes, downvotes, slug, created_at, is_edited, last_edited, reported, controversial, trending" };
}
macro_rules! comment_cols {
    () => { "id, posted_to, author, statement, votes, upvotes, downvotes, created_at, is_edited, last_edited" };
}
macro_rules! message_cols {
    () => { "id, author, body, created_at, is_edited, last_edited" };
}
macro_rules! account_cols {
    () => { "username, email, motto, created_at, updated_at" };
}

#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }
}

/// Claims one unused identifier inside the caller's transaction.
///
/// The candidate is drawn uniformly by offset into the unused rows and locked
/// with `SKIP LOCKED`; the flip is conditional on `NOT used`, so a lost race
/// shows up as zero rows and we draw again. When every unused row is held by
/// other claimants we queue on the lowest one instead: once the holder
/// commits, Postgres re-checks `NOT used`, so we either get a row or learn the
/// pool is empty on the next count.
async fn claim_identifier(conn: &mut PgConnection) -> RepoResult<Identifier> {
    for attempt in 1..=MAX_CLAIM_ATTEMPTS {
        let unused: i64 = sqlx::query_scalar("SELECT count(*) FROM identifiers WHERE NOT used")
            .fetch_one(&mut *conn).await?;
        if unused == 0 {
            warn!("identifier pool exhausted");
            return Err(RepoError::PoolExhausted);
        }
        let offset = { rand::thread_rng().gen_range(0..unused) };
        let mut candidate: Option<Id> = sqlx::query_scalar(CLAIM_CANDIDATE)
            .bind(offset)
            .fetch_optional(&mut *conn).await?;
        if candidate.is_none() && offset > 0 {
            // offset ran into rows locked by concurrent claims
            debug!(attempt, offset, "candidate window locked; taking first free row");
            candidate = sqlx::query_scalar(CLAIM_CANDIDATE)
                .bind(0_i64)
                .fetch_optional(&mut *conn).await?;
        }
        if candidate.is_none() {
            debug!(attempt, "every unused identifier is locked; waiting on the first");
            candidate = sqlx::query_scalar(WAIT_CANDIDATE)
                .fetch_optional(&mut *conn).await?;
        }
        let Some(id) = candidate else { continue };
        let claimed = sqlx::query_as::<_, Identifier>(
            "UPDATE identifiers SET used = TRUE WHERE id = $1 AND NOT used RETURNING value, used"
        )
            .bind(id)
            .fetch_optional(&mut *conn).await?;
        match claimed {
            Some(ident) => return Ok(ident),
            None => debug!(attempt, id, "lost identifier claim race; retrying"),
        }
    }
    warn!(attempts = MAX_CLAIM_ATTEMPTS, "could not claim an identifier");
    Err(RepoError::Conflict)
}

#[async_trait]
impl IdentifierRepo for PgRepo {
    async fn allocate_identifier(&self) -> RepoResult<Identifier> {
        let mut tx = self.pool.begin().await?;
        let ident = claim_identifier(&mut tx).await?;
        tx.commit().await?;
        debug!(slug = %ident.value, "identifier allocated");
        Ok(ident)
    }

    async fn insert_identifiers(&self, values: Vec<String>) -> RepoResult<usize> {
        if values.is_empty() { return Ok(0); }
        let res = sqlx::query(
            "INSERT INTO identifiers (value) SELECT * FROM UNNEST($1::text[]) ON CONFLICT (value) DO NOTHING"
        )
            .bind(&values)
            .execute(&self.pool).await?;
        Ok(res.rows_affected() as usize)
    }

    async fn pool_stats(&self) -> RepoResult<PoolStats> {
        let (total, unused): (i64, i64) = sqlx::query_as(
            "SELECT count(*), count(*) FILTER (WHERE NOT used) FROM identifiers"
        ).fetch_one(&self.pool).await?;
        Ok(PoolStats { total, unused })
    }
}

#[async_trait]
impl AccountRepo for PgRepo {
    async fn create_account(&self, new: NewAccount) -> RepoResult<Account> {
        let rec = sqlx::query_as::<_, Account>(concat!(
            "INSERT INTO accounts (username, email, motto) VALUES ($1,$2,$3) RETURNING ", account_cols!()
        ))
            .bind(&new.username).bind(&new.email).bind(&new.motto)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn get_account(&self, username: &str) -> RepoResult<Account> {
        let rec = sqlx::query_as::<_, Account>(concat!(
            "SELECT ", account_cols!(), " FROM accounts WHERE username = $1"
        ))
            .bind(username)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn update_account(&self, username: &str, upd: UpdateAccount) -> RepoResult<Account> {
        let rec = sqlx::query_as::<_, Account>(concat!(
            "UPDATE accounts SET email = COALESCE($2, email), motto = COALESCE($3, motto), updated_at = now() ",
            "WHERE username = $1 RETURNING ", account_cols!()
        ))
            .bind(username)
            .bind(upd.email.as_ref())
            .bind(upd.motto.as_ref())
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }
}

#[async_trait]
impl PostRepo for PgRepo {
    async fn create_post(&self, author: Option<String>, new: NewPost) -> RepoResult<Post> {
        let mut tx = self.pool.begin().await?;
        let ident = claim_identifier(&mut tx).await?;
        let post = sqlx::query_as::<_, Post>(concat!(
            "INSERT INTO posts (author, title, statement, slug) VALUES ($1,$2,$3,$4) RETURNING ", post_cols!()
        ))
            .bind(author.as_ref())
            .bind(&new.title)
            .bind(&new.statement)
            .bind(&ident.value)
            .fetch_one(&mut *tx).await?;
        tx.commit().await?;
        info!(post_id = post.id, slug = %post.slug, "post created");
        Ok(post)
    }

    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        let rec = sqlx::query_as::<_, Post>(concat!("SELECT ", post_cols!(), " FROM posts WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post> {
        let rec = sqlx::query_as::<_, Post>(concat!("SELECT ", post_cols!(), " FROM posts WHERE slug = $1"))
            .bind(slug)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn list_posts(&self, page: PageRequest) -> RepoResult<Page<Post>> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM posts")
            .fetch_one(&self.pool).await?;
        let recs = sqlx::query_as::<_, Post>(concat!(
            "SELECT ", post_cols!(), " FROM posts ORDER BY votes DESC, created_at ASC, id ASC LIMIT $1 OFFSET $2"
        ))
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool).await?;
        Ok(Page::new(page, count, recs))
    }

    async fn list_posts_by_author(&self, author: &str) -> RepoResult<Vec<Post>> {
        let recs = sqlx::query_as::<_, Post>(concat!(
            "SELECT ", post_cols!(), " FROM posts WHERE author = $1 ORDER BY created_at DESC, id DESC"
        ))
            .bind(author)
            .fetch_all(&self.pool).await?;
        Ok(recs)
    }

    async fn vote_post(&self, id: Id, vote: Vote) -> RepoResult<i64> {
        // `votes` is a generated column, so RETURNING sees the recomputed value
        let sql = match vote {
            Vote::Up => "UPDATE posts SET upvotes = upvotes + 1 WHERE id = $1 RETURNING votes",
            Vote::Down => "UPDATE posts SET downvotes = downvotes + 1 WHERE id = $1 RETURNING votes",
        };
        let votes: Option<i64> = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_optional(&self.pool).await?;
        votes.ok_or(RepoError::NotFound)
    }

    async fn edit_post(&self, id: Id, statement: String) -> RepoResult<Post> {
        let rec = sqlx::query_as::<_, Post>(concat!(
            "UPDATE posts SET statement = $2, is_edited = TRUE, last_edited = $3 WHERE id = $1 RETURNING ", post_cols!()
        ))
            .bind(id)
            .bind(&statement)
            .bind(Utc::now())
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn set_post_status(&self, id: Id, upd: PostStatusUpdate) -> RepoResult<Post> {
        let rec = sqlx::query_as::<_, Post>(concat!(
            "UPDATE posts SET reported = COALESCE($2, reported), controversial = COALESCE($3, controversial), ",
            "trending = COALESCE($4, trending) WHERE id = $1 RETURNING ", post_cols!()
        ))
            .bind(id)
            .bind(upd.reported)
            .bind(upd.controversial)
            .bind(upd.trending)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }
}

#[async_trait]
impl CommentRepo for PgRepo {
    async fn create_comment(&self, author: Option<String>, new: NewComment) -> RepoResult<Comment> {
        let rec = sqlx::query_as::<_, Comment>(concat!(
            "INSERT INTO comments (posted_to, author, statement) VALUES ($1,$2,$3) RETURNING ", comment_cols!()
        ))
            .bind(new.posted_to)
            .bind(author.as_ref())
            .bind(&new.statement)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        let rec = sqlx::query_as::<_, Comment>(concat!("SELECT ", comment_cols!(), " FROM comments WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
            .bind(post_id)
            .fetch_one(&self.pool).await?;
        if !exists { return Err(RepoError::NotFound); }
        let recs = sqlx::query_as::<_, Comment>(concat!(
            "SELECT ", comment_cols!(), " FROM comments WHERE posted_to = $1 ORDER BY created_at ASC, id ASC"
        ))
            .bind(post_id)
            .fetch_all(&self.pool).await?;
        Ok(recs)
    }

    async fn vote_comment(&self, id: Id, vote: Vote) -> RepoResult<i64> {
        let sql = match vote {
            Vote::Up => "UPDATE comments SET upvotes = upvotes + 1 WHERE id = $1 RETURNING votes",
            Vote::Down => "UPDATE comments SET downvotes = downvotes + 1 WHERE id = $1 RETURNING votes",
        };
        let votes: Option<i64> = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_optional(&self.pool).await?;
        votes.ok_or(RepoError::NotFound)
    }

    async fn edit_comment(&self, id: Id, statement: String) -> RepoResult<Comment> {
        let rec = sqlx::query_as::<_, Comment>(concat!(
            "UPDATE comments SET statement = $2, is_edited = TRUE, last_edited = $3 WHERE id = $1 RETURNING ", comment_cols!()
        ))
            .bind(id)
            .bind(&statement)
            .bind(Utc::now())
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }
}

#[async_trait]
impl MessageRepo for PgRepo {
    async fn create_message(&self, author: Option<String>, new: NewMessage) -> RepoResult<Message> {
        let rec = sqlx::query_as::<_, Message>(concat!(
            "INSERT INTO messages (author, body) VALUES ($1,$2) RETURNING ", message_cols!()
        ))
            .bind(author.as_ref())
            .bind(&new.body)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn get_message(&self, id: Id) -> RepoResult<Message> {
        let rec = sqlx::query_as::<_, Message>(concat!("SELECT ", message_cols!(), " FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }

    async fn list_messages(&self, author: &str) -> RepoResult<Vec<Message>> {
        let recs = sqlx::query_as::<_, Message>(concat!(
            "SELECT ", message_cols!(), " FROM messages WHERE author = $1 ORDER BY created_at DESC, id DESC"
        ))
            .bind(author)
            .fetch_all(&self.pool).await?;
        Ok(recs)
    }

    async fn edit_message(&self, id: Id, body: String) -> RepoResult<Message> {
        let rec = sqlx::query_as::<_, Message>(concat!(
            "UPDATE messages SET body = $2, is_edited = TRUE, last_edited = $3 WHERE id = $1 RETURNING ", message_cols!()
        ))
            .bind(id)
            .bind(&body)
            .bind(Utc::now())
            .fetch_one(&self.pool).await?;
        Ok(rec)
    }
}

#[async_trait]
impl ReportRepo for PgRepo {
    async fn report_post(&self, post_id: Id, reason: String) -> RepoResult<Report> {
        let mut tx = self.pool.begin().await?;
        let flagged: Option<Id> = sqlx::query_scalar("UPDATE posts SET reported = TRUE WHERE id = $1 RETURNING id")
            .bind(post_id)
            .fetch_optional(&mut *tx).await?;
        if flagged.is_none() { return Err(RepoError::NotFound); }
        let report = sqlx::query_as::<_, Report>(
            "INSERT INTO reports (post_id, reason) VALUES ($1,$2) RETURNING id, post_id, reason, created_at"
        )
            .bind(post_id)
            .bind(&reason)
            .fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(report)
    }

    async fn list_reports(&self) -> RepoResult<Vec<Report>> {
        let recs = sqlx::query_as::<_, Report>(
            "SELECT id, post_id, reason, created_at FROM reports ORDER BY created_at DESC, id DESC"
        ).fetch_all(&self.pool).await?;
        Ok(recs)
    }
}
