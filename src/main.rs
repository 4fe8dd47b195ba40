use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use commic8::config::AppConfig;
use commic8::openapi::ApiDoc;
use commic8::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use commic8::repo::Repo;
use commic8::{config, AppState};

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable either the `inmem-store` or the `postgres-store` feature");

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // .env only in debug builds; production sets the environment externally
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping commic8 server");

    let repo = build_repo(&cfg).await?;
    top_up_pool(repo.as_ref(), &cfg).await?;

    let state = AppState {
        repo,
        rate_limiter: Some(RateLimiterFacade::new(InMemoryRateLimiter::new(true), RateLimitConfig::from_env())),
        slug_length: cfg.slug_length,
    };
    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_origin("http://localhost:3000")
            .allowed_origin("http://127.0.0.1:3000")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .max_age(3600);
        if let Some(front) = &frontend_url {
            cors = cors.allowed_origin(front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.bind_addr.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.bind_addr, cfg.port);
    server.run().await?;
    Ok(())
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use anyhow::Context;
    use commic8::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;

    let db_url = cfg.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("failed to connect to Postgres")?;
    let repo = PgRepo::new(pool);
    repo.migrate().await.context("failed to run migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use commic8::repo::inmem::InMemRepo;

    let dir = cfg.data_dir.clone().unwrap_or_else(|| "data".into());
    let repo = InMemRepo::with_snapshot(dir.join("state.json"));
    info!("Using in-memory repository backend (snapshot dir {})", dir.display());
    Ok(Arc::new(repo))
}

/// Refills the slug pool when it has run low, so a fresh deployment can
/// accept posts without a manual refill.
async fn top_up_pool(repo: &dyn Repo, cfg: &AppConfig) -> anyhow::Result<()> {
    let stats = repo.pool_stats().await?;
    if (stats.unused as usize) >= cfg.pool_low_watermark {
        info!(unused = stats.unused, total = stats.total, "identifier pool healthy");
        return Ok(());
    }
    let added = repo.refill_identifiers(cfg.pool_refill_batch, cfg.slug_length).await?;
    if added < cfg.pool_refill_batch {
        warn!(added, requested = cfg.pool_refill_batch, "startup refill came up short");
    }
    info!(added, unused = stats.unused as usize + added, "identifier pool topped up");
    Ok(())
}
