#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use commic8::auth::{create_jwt, Role};
use commic8::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use commic8::repo::inmem::InMemRepo;
use commic8::repo::IdentifierRepo;
use commic8::slug::DEFAULT_SLUG_LEN;
use commic8::{config, AppState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn ensure_secret() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

#[actix_web::test]
#[serial_test::serial]
async fn rate_limit_post_creation_and_votes() {
    ensure_secret();
    let repo = InMemRepo::ephemeral();
    repo.refill_identifiers(10, DEFAULT_SLUG_LEN).await.unwrap();

    // one post and two votes per large window
    let cfg = RateLimitConfig {
        post_limit: 1, post_window: Duration::from_secs(300),
        comment_limit: 100, comment_window: Duration::from_secs(60),
        vote_limit: 2, vote_window: Duration::from_secs(300),
    };
    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
    let state = AppState { repo: Arc::new(repo), rate_limiter: Some(limiter), slug_length: DEFAULT_SLUG_LEN };
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let user = create_jwt("ana", vec![Role::User]).unwrap();
    let auth = ("Authorization", format!("Bearer {user}"));

    // first post create -> 201
    let req = test::TestRequest::post().uri("/api/v1/posts").insert_header(auth.clone()).set_json(json!({"title":"S1", "statement":"B1"})).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201, "first post create allowed");
    let post: serde_json::Value = test::read_body_json(resp).await;
    let slug = post["slug"].as_str().unwrap().to_string();

    // second post create -> 429
    let req = test::TestRequest::post().uri("/api/v1/posts").insert_header(auth.clone()).set_json(json!({"title":"S2", "statement":"B2"})).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429, "second post should be rate limited");

    // votes: two allowed, third limited, and the limited one is not counted
    for expected in [200, 200, 429] {
        let req = test::TestRequest::post().uri(&format!("/api/v1/posts/{slug}/upvote")).insert_header(auth.clone()).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), expected);
    }
    let req = test::TestRequest::get().uri(&format!("/api/v1/posts/{slug}")).to_request();
    let post: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(post["upvotes"], 2);
    assert_eq!(post["votes"], 2);
}
