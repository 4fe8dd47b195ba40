use std::sync::Arc;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{Auth, Role};
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::slug::DEFAULT_SLUG_LEN;
use crate::votable::Vote;

/// Largest batch an admin may request in one refill call.
pub const MAX_REFILL: usize = 100_000;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/accounts").route(web::post().to(create_account)))
            .service(
                web::resource("/accounts/{username}")
                    .route(web::get().to(get_account))
                    .route(web::patch().to(update_account)),
            )
            .service(web::resource("/accounts/{username}/posts").route(web::get().to(list_account_posts)))
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(
                web::resource("/posts/{slug}")
                    .route(web::get().to(get_post))
                    .route(web::patch().to(edit_post)),
            )
            .service(web::resource("/posts/{slug}/upvote").route(web::post().to(upvote_post)))
            .service(web::resource("/posts/{slug}/downvote").route(web::post().to(downvote_post)))
            .service(web::resource("/posts/{slug}/report").route(web::post().to(report_post)))
            .service(web::resource("/posts/{slug}/comments").route(web::get().to(list_comments)))
            .service(web::resource("/comments").route(web::post().to(create_comment)))
            .service(
                web::resource("/comments/{id}")
                    .route(web::get().to(get_comment))
                    .route(web::patch().to(edit_comment)),
            )
            .service(web::resource("/comments/{id}/upvote").route(web::post().to(upvote_comment)))
            .service(web::resource("/comments/{id}/downvote").route(web::post().to(downvote_comment)))
            .service(
                web::resource("/messages")
                    .route(web::get().to(list_messages))
                    .route(web::post().to(create_message)),
            )
            .service(web::resource("/messages/{id}").route(web::patch().to(edit_message)))
            // admin console
            .service(web::resource("/admin/posts/{slug}/status").route(web::patch().to(admin_set_post_status)))
            .service(web::resource("/admin/reports").route(web::get().to(admin_list_reports)))
            .service(web::resource("/admin/identifiers/stats").route(web::get().to(admin_pool_stats)))
            .service(web::resource("/admin/identifiers/refill").route(web::post().to(admin_refill_pool))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub rate_limiter: Option<RateLimiterFacade>,
    pub slug_length: usize,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo, rate_limiter: None, slug_length: DEFAULT_SLUG_LEN }
    }

    fn allow(&self, check: impl FnOnce(&RateLimiterFacade) -> bool) -> Result<(), ApiError> {
        match &self.rate_limiter {
            Some(rl) if !check(rl) => Err(ApiError::TooManyRequests),
            _ => Ok(()),
        }
    }
}

macro_rules! ensure_staff { ($auth:expr) => { if !$auth.0.is_staff() { return Err(ApiError::Forbidden); } }; }
macro_rules! ensure_admin { ($auth:expr) => { if !$auth.0.has_any(&[Role::Admin]) { return Err(ApiError::Forbidden); } }; }

fn non_empty(text: &str, what: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{what} must not be empty")));
    }
    Ok(())
}

// ---------------- Accounts ----------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    request_body = NewAccount,
    responses(
        (status = 201, description = "Account created", body = Account),
        (status = 400, description = "Invalid username or email"),
        (status = 409, description = "Username or email taken")
    )
)]
pub async fn create_account(data: web::Data<AppState>, payload: web::Json<NewAccount>) -> Result<HttpResponse, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.into()))?;
    let account = data.repo.create_account(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(account))
}

#[utoipa::path(
    get,
    path = "/api/v1/accounts/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "Account", body = Account),
        (status = 404, description = "No such account")
    )
)]
pub async fn get_account(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let account = data.repo.get_account(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(account))
}

pub async fn update_account(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateAccount>,
) -> Result<HttpResponse, ApiError> {
    let username = path.into_inner();
    if auth.0.sub != username && !auth.0.has_any(&[Role::Admin]) {
        return Err(ApiError::Forbidden);
    }
    payload.validate().map_err(|e| ApiError::BadRequest(e.into()))?;
    let account = data.repo.update_account(&username, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(account))
}

pub async fn list_account_posts(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_posts_by_author(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(posts))
}

// ---------------- Posts -------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/api/v1/posts",
    params(
        ("page" = Option<u32>, Query, description = "1-based page number"),
        ("page_size" = Option<u32>, Query, description = "At most 20")
    ),
    responses(
        (status = 200, description = "Posts by net votes, then age", body = PostPage),
        (status = 404, description = "Page out of range")
    )
)]
pub async fn list_posts(data: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let req = PageRequest::new(query.page, query.page_size);
    let page = data.repo.list_posts(req).await?;
    if req.page > 1 && page.results.is_empty() {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Post created with a fresh slug", body = Post),
        (status = 400, description = "Invalid title or statement"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Rate limited"),
        (status = 503, description = "Identifier pool exhausted")
    )
)]
pub async fn create_post(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewPost>) -> Result<HttpResponse, ApiError> {
    data.allow(|rl| rl.allow_post(&auth.0.sub))?;
    payload.validate().map_err(|e| ApiError::BadRequest(e.into()))?;
    let post = data.repo.create_post(Some(auth.0.sub.clone()), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(post))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{slug}",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Post", body = Post),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post_by_slug(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    patch,
    path = "/api/v1/posts/{slug}",
    request_body = EditStatement,
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Post edited", body = Post),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn edit_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<EditStatement>,
) -> Result<HttpResponse, ApiError> {
    non_empty(&payload.statement, "statement")?;
    let post = data.repo.get_post_by_slug(&path.into_inner()).await?;
    if !auth.0.may_edit(post.author.as_deref()) { return Err(ApiError::Forbidden); }
    let post = data.repo.edit_post(post.id, payload.into_inner().statement).await?;
    Ok(HttpResponse::Ok().json(post))
}

async fn vote_on_post(auth: Auth, data: web::Data<AppState>, slug: String, vote: Vote) -> Result<HttpResponse, ApiError> {
    data.allow(|rl| rl.allow_vote(&auth.0.sub))?;
    let post = data.repo.get_post_by_slug(&slug).await?;
    let votes = data.repo.vote_post(post.id, vote).await?;
    Ok(HttpResponse::Ok().json(VoteResponse { votes }))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{slug}/upvote",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "New net score", body = VoteResponse),
        (status = 404, description = "Post not found")
    )
)]
pub async fn upvote_post(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    vote_on_post(auth, data, path.into_inner(), Vote::Up).await
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{slug}/downvote",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "New net score", body = VoteResponse),
        (status = 404, description = "Post not found")
    )
)]
pub async fn downvote_post(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    vote_on_post(auth, data, path.into_inner(), Vote::Down).await
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{slug}/report",
    request_body = NewReport,
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 201, description = "Report filed", body = Report),
        (status = 404, description = "Post not found")
    )
)]
pub async fn report_post(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewReport>,
) -> Result<HttpResponse, ApiError> {
    non_empty(&payload.reason, "reason")?;
    let post = data.repo.get_post_by_slug(&path.into_inner()).await?;
    let report = data.repo.report_post(post.id, payload.into_inner().reason).await?;
    Ok(HttpResponse::Created().json(report))
}

// ---------------- Comments ----------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/posts/{slug}/comments",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Comments, oldest first", body = [Comment]),
        (status = 404, description = "Post not found")
    )
)]
pub async fn list_comments(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post_by_slug(&path.into_inner()).await?;
    let comments = data.repo.list_comments(post.id).await?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    post,
    path = "/api/v1/comments",
    request_body = NewComment,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 404, description = "Post not found")
    )
)]
pub async fn create_comment(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewComment>) -> Result<HttpResponse, ApiError> {
    data.allow(|rl| rl.allow_comment(&auth.0.sub))?;
    non_empty(&payload.statement, "statement")?;
    let comment = data.repo.create_comment(Some(auth.0.sub.clone()), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(comment))
}

pub async fn get_comment(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let comment = data.repo.get_comment(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    patch,
    path = "/api/v1/comments/{id}",
    request_body = EditStatement,
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment edited", body = Comment),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn edit_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<EditStatement>,
) -> Result<HttpResponse, ApiError> {
    non_empty(&payload.statement, "statement")?;
    let comment = data.repo.get_comment(path.into_inner()).await?;
    if !auth.0.may_edit(comment.author.as_deref()) { return Err(ApiError::Forbidden); }
    let comment = data.repo.edit_comment(comment.id, payload.into_inner().statement).await?;
    Ok(HttpResponse::Ok().json(comment))
}

pub async fn upvote_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    data.allow(|rl| rl.allow_vote(&auth.0.sub))?;
    let votes = data.repo.vote_comment(path.into_inner(), Vote::Up).await?;
    Ok(HttpResponse::Ok().json(VoteResponse { votes }))
}

pub async fn downvote_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    data.allow(|rl| rl.allow_vote(&auth.0.sub))?;
    let votes = data.repo.vote_comment(path.into_inner(), Vote::Down).await?;
    Ok(HttpResponse::Ok().json(VoteResponse { votes }))
}

// ---------------- Messages ----------------------------------------

pub async fn list_messages(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let messages = data.repo.list_messages(&auth.0.sub).await?;
    Ok(HttpResponse::Ok().json(messages))
}

pub async fn create_message(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewMessage>) -> Result<HttpResponse, ApiError> {
    non_empty(&payload.body, "body")?;
    let message = data.repo.create_message(Some(auth.0.sub.clone()), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(message))
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub body: String,
}

pub async fn edit_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<EditBody>,
) -> Result<HttpResponse, ApiError> {
    non_empty(&payload.body, "body")?;
    let message = data.repo.get_message(path.into_inner()).await?;
    // messages are private: staff cannot rewrite them either
    if message.author.as_deref() != Some(auth.0.sub.as_str()) { return Err(ApiError::Forbidden); }
    let message = data.repo.edit_message(message.id, payload.into_inner().body).await?;
    Ok(HttpResponse::Ok().json(message))
}

// ---------------- Admin console -----------------------------------

#[utoipa::path(
    patch,
    path = "/api/v1/admin/posts/{slug}/status",
    request_body = PostStatusUpdate,
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Status updated", body = Post),
        (status = 403, description = "Moderators and admins only"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn admin_set_post_status(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<PostStatusUpdate>,
) -> Result<HttpResponse, ApiError> {
    ensure_staff!(auth);
    let post = data.repo.get_post_by_slug(&path.into_inner()).await?;
    let post = data.repo.set_post_status(post.id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

pub async fn admin_list_reports(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    ensure_staff!(auth);
    let reports = data.repo.list_reports().await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/identifiers/stats",
    responses(
        (status = 200, description = "Pool size and unused count", body = PoolStats),
        (status = 403, description = "Admins only")
    )
)]
pub async fn admin_pool_stats(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let stats = data.repo.pool_stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RefillRequest {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RefillResponse {
    pub added: usize,
    pub stats: PoolStats,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/identifiers/refill",
    request_body = RefillRequest,
    responses(
        (status = 200, description = "Identifiers added", body = RefillResponse),
        (status = 400, description = "Count out of range"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn admin_refill_pool(auth: Auth, data: web::Data<AppState>, payload: web::Json<RefillRequest>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    if payload.count == 0 || payload.count > MAX_REFILL {
        return Err(ApiError::BadRequest(format!("count must be between 1 and {MAX_REFILL}")));
    }
    let added = data.repo.refill_identifiers(payload.count, data.slug_length).await?;
    let stats = data.repo.pool_stats().await?;
    log::info!("admin {} refilled identifier pool: +{added}, {} unused", auth.0.sub, stats.unused);
    Ok(HttpResponse::Ok().json(RefillResponse { added, stats }))
}
