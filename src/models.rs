use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::votable::{EditState, Tally};

pub type Id = i64;

pub const TITLE_MAX_LEN: usize = 180;
pub const MOTTO_MAX_LEN: usize = 180;

/// One entry of the pre-provisioned slug pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Identifier {
    pub value: String,
    pub used: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PoolStats {
    pub total: i64,
    pub unused: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Account {
    pub username: String,
    pub email: String,
    pub motto: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub motto: String,
}

impl NewAccount {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.username.trim().is_empty() {
            return Err("users must have a valid username");
        }
        if !self.email.contains('@') {
            return Err("users must have a valid email address");
        }
        if self.motto.chars().count() > MOTTO_MAX_LEN {
            return Err("motto is too long");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateAccount {
    pub email: Option<String>,
    pub motto: Option<String>,
}

impl UpdateAccount {
    pub fn validate(&self) -> Result<(), &'static str> {
        if matches!(&self.email, Some(e) if !e.contains('@')) {
            return Err("users must have a valid email address");
        }
        if matches!(&self.motto, Some(m) if m.chars().count() > MOTTO_MAX_LEN) {
            return Err("motto is too long");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub author: Option<String>,
    pub title: String,
    pub statement: String,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub tally: Tally,
    pub slug: String,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub edits: EditState,
    pub reported: bool,
    pub controversial: bool,
    pub trending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub title: String,
    pub statement: String,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty");
        }
        if self.title.chars().count() > TITLE_MAX_LEN {
            return Err("title is too long");
        }
        if self.statement.trim().is_empty() {
            return Err("statement must not be empty");
        }
        Ok(())
    }
}

/// Flags an admin may flip on a post; `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PostStatusUpdate {
    pub reported: Option<bool>,
    pub controversial: Option<bool>,
    pub trending: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub posted_to: Id,
    pub author: Option<String>,
    pub statement: String,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub tally: Tally,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub edits: EditState,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub posted_to: Id,
    pub statement: String,
}

/// Body of every edit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EditStatement {
    pub statement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Message {
    pub id: Id,
    pub author: Option<String>,
    pub body: String,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub edits: EditState,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewMessage {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Report {
    pub id: Id,
    pub post_id: Id,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct VoteResponse {
    pub votes: i64,
}

pub const PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 20;

/// 1-based page selector for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.page_size as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self { Self::new(None, None) }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[aliases(PostPage = Page<Post>)]
pub struct Page<T> {
    pub count: i64,
    pub page: u32,
    pub page_size: u32,
    pub next: Option<u32>,
    pub previous: Option<u32>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(req: PageRequest, count: i64, results: Vec<T>) -> Self {
        let seen = req.offset() + results.len() as i64;
        Self {
            count,
            page: req.page,
            page_size: req.page_size,
            next: (seen < count).then_some(req.page + 1),
            previous: (req.page > 1).then(|| req.page - 1),
            results,
        }
    }
}
