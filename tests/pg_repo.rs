#![cfg(feature = "postgres-store")]

use std::collections::HashSet;
use std::sync::Arc;

use commic8::models::{NewComment, NewPost, PageRequest};
use commic8::repo::pg::PgRepo;
use commic8::repo::{CommentRepo, IdentifierRepo, PostRepo, RepoError, ReportRepo};
use commic8::votable::Vote;
use sqlx::postgres::PgPoolOptions;

async fn pg_repo() -> Option<PgRepo> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await
        .ok()?;
    let repo = PgRepo::new(pool);
    repo.migrate().await.ok()?;
    Some(repo)
}

/// Uses up whatever earlier tests left in the shared pool.
async fn drain(repo: &PgRepo) {
    loop {
        match repo.allocate_identifier().await {
            Ok(_) => continue,
            Err(RepoError::PoolExhausted) => break,
            Err(e) => panic!("unexpected error while draining: {e}"),
        }
    }
}

async fn post_count(repo: &PgRepo) -> i64 {
    repo.list_posts(PageRequest::default()).await.unwrap().count
}

fn uniq(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ns = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("{prefix}{ns}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn concurrent_claims_are_distinct() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    let repo = Arc::new(repo);
    let base = uniq("c");
    let fresh: Vec<String> = (0..20).map(|i| format!("{base}-{i}")).collect();
    assert_eq!(repo.insert_identifiers(fresh.clone()).await.unwrap(), 20);
    // duplicates are skipped
    assert_eq!(repo.insert_identifiers(fresh).await.unwrap(), 0);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let r = repo.clone();
            tokio::spawn(async move { r.allocate_identifier().await })
        })
        .collect();
    let mut seen = HashSet::new();
    for h in handles {
        let ident = h.await.unwrap().unwrap();
        assert!(ident.used);
        assert!(seen.insert(ident.value), "identifier handed out twice");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn votes_are_atomic_and_derived() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    let repo = Arc::new(repo);
    repo.insert_identifiers(vec![uniq("v")]).await.unwrap();
    let id = repo.create_post(None, NewPost { title: "pg".into(), statement: "votes".into() }).await.unwrap().id;

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let r = repo.clone();
            let vote = if i % 4 == 0 { Vote::Down } else { Vote::Up };
            tokio::spawn(async move { r.vote_post(id, vote).await })
        })
        .collect();
    for h in handles { h.await.unwrap().unwrap(); }

    let t = repo.get_post(id).await.unwrap().tally;
    assert_eq!((t.upvotes, t.downvotes, t.votes), (30, 10, 20));
    assert!(matches!(repo.vote_post(-1, Vote::Up).await, Err(RepoError::NotFound)));
}

#[tokio::test]
#[serial_test::serial]
async fn edit_report_and_comments() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    repo.insert_identifiers(vec![uniq("e")]).await.unwrap();
    let post = repo.create_post(Some("ana".into()), NewPost { title: "pg".into(), statement: "before".into() }).await.unwrap();

    let edited = repo.edit_post(post.id, "after".into()).await.unwrap();
    assert!(edited.edits.is_edited);
    assert!(edited.edits.last_edited.is_some());
    assert_eq!(edited.slug, post.slug);

    repo.report_post(post.id, "spam".into()).await.unwrap();
    assert!(repo.get_post_by_slug(&post.slug).await.unwrap().reported);

    let c = repo.create_comment(None, NewComment { posted_to: post.id, statement: "hi".into() }).await.unwrap();
    assert_eq!(repo.vote_comment(c.id, Vote::Down).await.unwrap(), -1);
    assert!(matches!(
        repo.create_comment(None, NewComment { posted_to: -1, statement: "x".into() }).await,
        Err(RepoError::NotFound)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn claims_beyond_pool_size_are_exhausted() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    let repo = Arc::new(repo);
    drain(&repo).await;
    let base = uniq("x");
    repo.insert_identifiers((0..5).map(|i| format!("{base}-{i}")).collect()).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let r = repo.clone();
            tokio::spawn(async move { r.allocate_identifier().await })
        })
        .collect();
    let (mut ok, mut exhausted) = (HashSet::new(), 0);
    for h in handles {
        match h.await.unwrap() {
            Ok(ident) => assert!(ok.insert(ident.value), "identifier handed out twice"),
            Err(RepoError::PoolExhausted) => exhausted += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok.len(), exhausted), (5, 3));
}

#[tokio::test]
#[serial_test::serial]
async fn exhausted_pool_creates_no_post() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    drain(&repo).await;
    let before = post_count(&repo).await;

    let err = repo.create_post(None, NewPost { title: "none".into(), statement: "left".into() }).await;
    assert!(matches!(err, Err(RepoError::PoolExhausted)));
    assert_eq!(post_count(&repo).await, before);
}

#[tokio::test]
#[serial_test::serial]
async fn failed_insert_returns_claimed_slug() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return };
    drain(&repo).await;
    let slug = uniq("r");
    repo.insert_identifiers(vec![slug.clone()]).await.unwrap();
    let before = post_count(&repo).await;

    // title overflows its column after the slug has been claimed
    let long = NewPost { title: "t".repeat(181), statement: "body".into() };
    assert!(repo.create_post(None, long).await.is_err());
    assert_eq!(repo.pool_stats().await.unwrap().unused, 1);
    assert_eq!(post_count(&repo).await, before);

    let post = repo.create_post(None, NewPost { title: "ok".into(), statement: "body".into() }).await.unwrap();
    assert_eq!(post.slug, slug);
}
