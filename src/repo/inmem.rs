use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::*;
use crate::votable::{EditState, Editable, Tally, Votable};

const SNAPSHOT_FILE: &str = "state.json";

/// Slug pool with a free list, so a claim is O(1) however drained the pool is.
#[derive(Clone, Default, Serialize, Deserialize)]
struct Pool {
    /// value -> used
    index: HashMap<String, bool>,
    free: Vec<String>,
}

impl Pool {
    fn insert(&mut self, value: String) -> bool {
        if self.index.contains_key(&value) {
            return false;
        }
        self.index.insert(value.clone(), false);
        self.free.push(value);
        true
    }

    fn claim(&mut self) -> Option<Identifier> {
        if self.free.is_empty() {
            return None;
        }
        let pick = rand::thread_rng().gen_range(0..self.free.len());
        let value = self.free.swap_remove(pick);
        self.index.insert(value.clone(), true);
        Some(Identifier { value, used: true })
    }

    fn stats(&self) -> PoolStats {
        PoolStats { total: self.index.len() as i64, unused: self.free.len() as i64 }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct State {
    accounts: HashMap<String, Account>,
    posts: HashMap<Id, Post>,
    /// slug -> post id, rebuilt on load
    #[serde(skip)]
    slugs: HashMap<String, Id>,
    comments: HashMap<Id, Comment>,
    messages: HashMap<Id, Message>,
    reports: HashMap<Id, Report>,
    pool: Pool,
    next_id: Id,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn reindex(&mut self) {
        self.slugs = self.posts.values().map(|p| (p.slug.clone(), p.id)).collect();
    }
}

/// Single-process store. Every mutation runs under one write lock, which is
/// what makes pool claims and counter bumps atomic here. With a snapshot
/// configured, a mutation only becomes visible once it is on disk.
#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    /// Loads (and keeps writing) `$COMMIC8_DATA_DIR/state.json`, `data/` by default.
    pub fn new() -> Self {
        let dir = std::env::var("COMMIC8_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        Self::with_snapshot(dir.join(SNAPSHOT_FILE))
    }

    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load_state_from(&path);
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Some(Arc::new(path)),
        }
    }

    /// No snapshot file; state lives only as long as the process.
    pub fn ephemeral() -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(mut s) => {
                    s.reindex();
                    info!(path = %path.display(), "loaded snapshot");
                    s
                }
                Err(e) => {
                    warn!(path = %path.display(), "failed to parse snapshot: {e}; starting empty");
                    State::default()
                }
            },
            Err(e) => {
                info!(path = %path.display(), "no snapshot ({e}); starting empty");
                State::default()
            }
        }
    }

    /// Writes the snapshot while the caller still holds the write lock, so
    /// snapshots land in mutation order.
    fn persist(&self, path: &Path, state: &State) -> RepoResult<()> {
        let bytes = serde_json::to_vec(state)
            .map_err(|e| RepoError::Internal(format!("serialise snapshot: {e}")))?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| RepoError::Internal(format!("create {}: {e}", dir.display())))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| {
                warn!(path = %path.display(), "failed to write snapshot: {e}");
                RepoError::Internal(format!("write snapshot: {e}"))
            })
    }

    /// Runs `f` against a staged copy of the state, writes the snapshot, and
    /// only then publishes the copy. Any error leaves the state untouched.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
        let mut guard = self.write()?;
        let mut staged = guard.clone();
        let out = f(&mut staged)?;
        if let Some(path) = self.snapshot_path.as_deref() {
            self.persist(path, &staged)?;
        }
        *guard = staged;
        Ok(out)
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }
}

impl Default for InMemRepo {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl IdentifierRepo for InMemRepo {
    async fn allocate_identifier(&self) -> RepoResult<Identifier> {
        let ident = self.mutate(|s| s.pool.claim().ok_or(RepoError::PoolExhausted))?;
        debug!(slug = %ident.value, "identifier allocated");
        Ok(ident)
    }

    async fn insert_identifiers(&self, values: Vec<String>) -> RepoResult<usize> {
        self.mutate(|s| Ok(values.into_iter().filter(|v| s.pool.insert(v.clone())).count()))
    }

    async fn pool_stats(&self) -> RepoResult<PoolStats> {
        Ok(self.read()?.pool.stats())
    }
}

#[async_trait]
impl AccountRepo for InMemRepo {
    async fn create_account(&self, new: NewAccount) -> RepoResult<Account> {
        self.mutate(|s| {
            if s.accounts.contains_key(&new.username) || s.accounts.values().any(|a| a.email == new.email) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let account = Account {
                username: new.username,
                email: new.email,
                motto: new.motto,
                created_at: now,
                updated_at: now,
            };
            s.accounts.insert(account.username.clone(), account.clone());
            Ok(account)
        })
    }

    async fn get_account(&self, username: &str) -> RepoResult<Account> {
        self.read()?.accounts.get(username).cloned().ok_or(RepoError::NotFound)
    }

    async fn update_account(&self, username: &str, upd: UpdateAccount) -> RepoResult<Account> {
        self.mutate(|s| {
            if let Some(ref email) = upd.email {
                if s.accounts.values().any(|a| a.email == *email && a.username != username) {
                    return Err(RepoError::Conflict);
                }
            }
            let account = s.accounts.get_mut(username).ok_or(RepoError::NotFound)?;
            if let Some(email) = upd.email { account.email = email; }
            if let Some(motto) = upd.motto { account.motto = motto; }
            account.updated_at = Utc::now();
            Ok(account.clone())
        })
    }
}

#[async_trait]
impl PostRepo for InMemRepo {
    async fn create_post(&self, author: Option<String>, new: NewPost) -> RepoResult<Post> {
        let post = self.mutate(|s| {
            // claim first: an exhausted pool must leave no trace
            let ident = s.pool.claim().ok_or(RepoError::PoolExhausted)?;
            let id = s.next_id();
            let post = Post {
                id,
                author,
                title: new.title,
                statement: new.statement,
                tally: Tally::default(),
                slug: ident.value,
                edits: EditState::new(Utc::now()),
                reported: false,
                controversial: false,
                trending: false,
            };
            s.slugs.insert(post.slug.clone(), id);
            s.posts.insert(id, post.clone());
            Ok(post)
        })?;
        info!(post_id = post.id, slug = %post.slug, "post created");
        Ok(post)
    }

    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        self.read()?.posts.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post> {
        let s = self.read()?;
        s.slugs.get(slug).and_then(|id| s.posts.get(id)).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_posts(&self, page: PageRequest) -> RepoResult<Page<Post>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.posts.values().cloned().collect();
        v.sort_by(|a, b| {
            b.tally.votes.cmp(&a.tally.votes)
                .then(a.edits.created_at.cmp(&b.edits.created_at))
                .then(a.id.cmp(&b.id))
        });
        let count = v.len() as i64;
        let results = v
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok(Page::new(page, count, results))
    }

    async fn list_posts_by_author(&self, author: &str) -> RepoResult<Vec<Post>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.posts.values()
            .filter(|p| p.author.as_deref() == Some(author))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.edits.created_at.cmp(&a.edits.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn vote_post(&self, id: Id, vote: Vote) -> RepoResult<i64> {
        self.mutate(|s| Ok(s.posts.get_mut(&id).ok_or(RepoError::NotFound)?.cast(vote)))
    }

    async fn edit_post(&self, id: Id, statement: String) -> RepoResult<Post> {
        self.mutate(|s| {
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.edit(statement, Utc::now());
            Ok(post.clone())
        })
    }

    async fn set_post_status(&self, id: Id, upd: PostStatusUpdate) -> RepoResult<Post> {
        self.mutate(|s| {
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.reported { post.reported = v; }
            if let Some(v) = upd.controversial { post.controversial = v; }
            if let Some(v) = upd.trending { post.trending = v; }
            Ok(post.clone())
        })
    }
}

#[async_trait]
impl CommentRepo for InMemRepo {
    async fn create_comment(&self, author: Option<String>, new: NewComment) -> RepoResult<Comment> {
        self.mutate(|s| {
            if !s.posts.contains_key(&new.posted_to) { return Err(RepoError::NotFound); }
            let id = s.next_id();
            let comment = Comment {
                id,
                posted_to: new.posted_to,
                author,
                statement: new.statement,
                tally: Tally::default(),
                edits: EditState::new(Utc::now()),
            };
            s.comments.insert(id, comment.clone());
            Ok(comment)
        })
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        self.read()?.comments.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        if !s.posts.contains_key(&post_id) { return Err(RepoError::NotFound); }
        let mut v: Vec<_> = s.comments.values()
            .filter(|c| c.posted_to == post_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.edits.created_at.cmp(&b.edits.created_at).then(a.id.cmp(&b.id)));
        Ok(v)
    }

    async fn vote_comment(&self, id: Id, vote: Vote) -> RepoResult<i64> {
        self.mutate(|s| Ok(s.comments.get_mut(&id).ok_or(RepoError::NotFound)?.cast(vote)))
    }

    async fn edit_comment(&self, id: Id, statement: String) -> RepoResult<Comment> {
        self.mutate(|s| {
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            comment.edit(statement, Utc::now());
            Ok(comment.clone())
        })
    }
}

#[async_trait]
impl MessageRepo for InMemRepo {
    async fn create_message(&self, author: Option<String>, new: NewMessage) -> RepoResult<Message> {
        self.mutate(|s| {
            let id = s.next_id();
            let message = Message { id, author, body: new.body, edits: EditState::new(Utc::now()) };
            s.messages.insert(id, message.clone());
            Ok(message)
        })
    }

    async fn get_message(&self, id: Id) -> RepoResult<Message> {
        self.read()?.messages.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_messages(&self, author: &str) -> RepoResult<Vec<Message>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.messages.values()
            .filter(|m| m.author.as_deref() == Some(author))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.edits.created_at.cmp(&a.edits.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn edit_message(&self, id: Id, body: String) -> RepoResult<Message> {
        self.mutate(|s| {
            let message = s.messages.get_mut(&id).ok_or(RepoError::NotFound)?;
            message.edit(body, Utc::now());
            Ok(message.clone())
        })
    }
}

#[async_trait]
impl ReportRepo for InMemRepo {
    async fn report_post(&self, post_id: Id, reason: String) -> RepoResult<Report> {
        self.mutate(|s| {
            let post = s.posts.get_mut(&post_id).ok_or(RepoError::NotFound)?;
            post.reported = true;
            let id = s.next_id();
            let report = Report { id, post_id, reason, created_at: Utc::now() };
            s.reports.insert(id, report.clone());
            Ok(report)
        })
    }

    async fn list_reports(&self) -> RepoResult<Vec<Report>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.reports.values().cloned().collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }
}
