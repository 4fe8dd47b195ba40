use crate::models::{
    Account, Comment, EditStatement, NewAccount, NewComment, NewPost, NewReport, PoolStats, Post,
    PostPage, PostStatusUpdate, Report, UpdateAccount, VoteResponse,
};
use crate::votable::{EditState, Tally};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_account,
        crate::routes::get_account,
        crate::routes::list_posts,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::edit_post,
        crate::routes::upvote_post,
        crate::routes::downvote_post,
        crate::routes::report_post,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::edit_comment,
        crate::routes::admin_set_post_status,
        crate::routes::admin_pool_stats,
        crate::routes::admin_refill_pool,
    ),
    components(schemas(
        Account, NewAccount, UpdateAccount, Post, NewPost, PostPage, Comment, NewComment,
        EditStatement, Report, NewReport, PostStatusUpdate, PoolStats, VoteResponse, Tally, EditState,
        crate::routes::RefillRequest, crate::routes::RefillResponse
    )),
    tags(
        (name = "posts", description = "Posts, slugs and votes"),
        (name = "comments", description = "Comment operations"),
        (name = "admin", description = "Moderation and identifier pool"),
    )
)]
pub struct ApiDoc;
