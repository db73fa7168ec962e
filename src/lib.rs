mod authentication;
pub mod comment_tree;
pub mod config;
mod data_formats;
mod db_helpers;
mod errors;
mod handlers;
mod models;
pub mod notifier;
mod oauth;
mod uploads;
pub mod vote;

use anyhow::Context;
pub use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::{middleware, routing::*, Extension, Json, Router};
pub use data_formats::*;
pub use errors::RequestErrorJson;
use handlers::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};
use std::{
    net::{SocketAddr, TcpListener},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use config::Config;
use notifier::Notifier;

pub type JsonResponse<T> = (StatusCode, Json<T>);

/// Multipart bodies carry images of up to 5 MB plus the text fields.
const BODY_LIMIT: usize = 6 * 1024 * 1024;

/// How long a write waits for another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a handler can reach, shared behind an `Arc` extension.
pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub notifier: Notifier,
    pub http: reqwest::Client,
}

impl AppState {
    /// Opens the database and starts the notification worker. Must be
    /// called from within a tokio runtime.
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let pool = init_db(&config.database_url).await?;
        let notifier = Notifier::spawn(pool.clone());
        let http = oauth::http_client()?;
        Ok(Arc::new(AppState {
            config,
            pool,
            notifier,
            http,
        }))
    }
}

pub async fn run_app(app: Router, address: SocketAddr) -> Result<()> {
    tracing::info!("Listening on {}", address);
    axum::Server::bind(&address)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        tracing::info!("Creating database {}", db_url);
        Sqlite::create_database(db_url)
            .await
            .context("Failed to create database")?;
    } else {
        tracing::debug!("Database already exists");
    }
    let options = SqliteConnectOptions::from_str(db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(options).await?;
    tracing::info!("Running migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations completed");
    Ok(pool)
}

pub fn get_random_free_port() -> Result<(u16, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").context("Could not bind a free port")?;
    let addr = listener.local_addr().context("Could not get a free port")?;
    Ok((addr.port(), addr))
}

pub fn make_router(state: Arc<AppState>) -> Result<Router> {
    let origin = state
        .config
        .frontend_url
        .parse::<HeaderValue>()
        .context("FRONTEND_URL is not a valid origin")?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            get(list_notifications).delete(delete_all_notifications),
        )
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", patch(mark_all_read))
        .route("/api/notifications/clean", delete(clean_read_notifications))
        .route("/api/notifications/:id", delete(delete_notification))
        .route("/api/notifications/:id/read", patch(mark_notification_read))
        .route_layer(middleware::from_fn(authentication::require_auth));

    let router = Router::new()
        .route("/api/status", get(status))
        .route("/api/categories", get(list_categories).post(create_category))
        .route("/api/articles", get(list_articles).post(create_article))
        .route("/api/articles/upload-image", post(upload_article_image))
        .route(
            "/api/articles/:slug_or_id",
            get(get_article).put(update_article).delete(delete_article),
        )
        .route("/api/auth/register", post(register_user))
        .route("/api/auth/login", post(login_user))
        .route("/api/auth/logout", post(logout_user))
        .route("/api/auth/forgot-password", post(forgot_password))
        .route("/api/auth/me", get(get_current_user))
        .route("/api/auth/upload-avatar", post(upload_avatar))
        .route("/api/comments", post(create_comment))
        .route("/api/comments/vote", post(vote_comment))
        .route(
            "/api/comments/:slug_or_id",
            get(list_comments).put(update_comment).delete(delete_comment),
        )
        .route("/api/comments/:slug_or_id/tree", get(get_comment_tree))
        .route("/api/oauth/google", get(google_login).post(google_login))
        .route("/api/oauth/github", get(github_login).post(github_login))
        .merge(notification_routes)
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(router)
}
