use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::time::Duration;
use tokio::signal;
use tower_http::{
    classify::ServerErrorsFailureClass, cors::CorsLayer, limit::RequestBodyLimitLayer,
    services::ServeDir, trace::TraceLayer,
};
use tracing::Span;

pub mod assembler;
pub mod auth;
pub mod blobs;
pub mod collector;
pub mod domain;
pub mod error;
pub mod file_reply;
mod handlers;
pub mod sqlite;

extern crate serde;

#[cfg(test)] // <-- not needed in integration tests
extern crate rstest;

use crate::assembler::ChunkAssembler;
use crate::blobs::BlobStore;
use crate::domain::Storage;
use crate::sqlite::{Mode, Sqlite};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DB_FILE: &str = "packstore.db";
const CURRENT_DIR: &str = "./";
const UPLOADS_DIR: &str = "uploads";
const TOKEN_DIR: &str = "apiToken";
const DEFAULT_STAGING_MAX_AGE_SECS: u64 = 86_400;

extern crate tokio;

/// Shared per-request context: where the records live and where the blobs
/// live. The database is opened per request, not pooled.
pub struct AppState {
    pub db: PathBuf,
    pub blobs: BlobStore,
    pub token_file: PathBuf,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_packs,
        handlers::create_template,
        handlers::update_pack,
        handlers::delete_pack,
        handlers::delete_version,
        handlers::download_main,
        handlers::upload_archive_chunk,
        handlers::upload_asset,
        handlers::get_screenshots,
        handlers::delete_screenshot,
        handlers::authenticate,
        handlers::register_username,
        handlers::get_usernames,
        handlers::check_username,
        handlers::delete_username,
    ),
    components(
        schemas(
            kernel::Pack,
            kernel::PackVersion,
            kernel::PackPatch,
            kernel::ApiMessage,
            kernel::PackResponse,
            kernel::UploadedFile,
            kernel::ChunkReceipt,
            kernel::ScreenshotList,
            kernel::UsernameList,
            kernel::UsernameRequest,
            kernel::RegisteredUsername,
        ),
        responses(crate::file_reply::FileReply)
    )
)]
struct ApiDoc;

pub async fn run() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "server=debug,packstore=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration from environment
    let data_dir = env::var("PACKSTORE_DATA_DIR").unwrap_or_else(|_| String::from(CURRENT_DIR));
    let db_file = env::var("PACKSTORE_DATA_FILE").unwrap_or_else(|_| String::from(DB_FILE));
    let uploads_dir =
        env::var("PACKSTORE_UPLOADS_DIR").unwrap_or_else(|_| String::from(UPLOADS_DIR));
    let token_dir = env::var("PACKSTORE_TOKEN_DIR").unwrap_or_else(|_| String::from(TOKEN_DIR));
    let port = env::var("PACKSTORE_PORT").unwrap_or_else(|_| String::from("3000"));

    // Start init
    let base = Path::new(&data_dir);
    let db = base.join(&db_file);
    if !db.exists() {
        Sqlite::open(db.clone(), Mode::ReadWrite)
            .expect("Database file cannot be created")
            .new_database()
            .unwrap_or_default();
    }

    let blobs = BlobStore::new(base.join(&uploads_dir));
    blobs
        .ensure_layout()
        .expect("Uploads directories cannot be created");

    let token_dir = base.join(&token_dir);
    auth::ensure_api_token(&token_dir).expect("API token file cannot be created");

    spawn_staging_sweep(&blobs);

    let socket: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    tracing::debug!("listening on {socket}");

    let app = create_routes(db, blobs, token_dir.join(auth::TOKEN_FILE));

    let listener = tokio::net::TcpListener::bind(socket).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

pub fn create_routes(db: PathBuf, blobs: BlobStore, token_file: PathBuf) -> Router {
    let serve_uploads = ServeDir::new(blobs.root().to_path_buf());
    let state = Arc::new(AppState {
        db,
        blobs,
        token_file,
    });

    let public = Router::new()
        .route("/api/", get(handlers::get_packs))
        .route("/api/screenshots", get(handlers::get_screenshots))
        .route("/api/:id/main", get(handlers::download_main))
        .route("/api/usernames", get(handlers::get_usernames))
        .route("/api/check-username", post(handlers::check_username));

    let protected = Router::new()
        .route("/api/authenticate", post(handlers::authenticate))
        .route("/api/template", post(handlers::create_template))
        .route(
            "/api/:id",
            put(handlers::update_pack).delete(handlers::delete_pack),
        )
        .route(
            "/api/:id/versions/:version_id",
            delete(handlers::delete_version),
        )
        .route("/api/upload-zip", post(handlers::upload_archive_chunk))
        .route("/api/upload", post(handlers::upload_asset))
        .route(
            "/api/screenshots/:filename",
            delete(handlers::delete_screenshot),
        )
        .route("/api/register", post(handlers::register_username))
        .route("/api/delete-username", post(handlers::delete_username))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest_service("/uploads", serve_uploads)
        // Applied as separate `.layer()` calls (innermost first) rather than a
        // single `ServiceBuilder` stack: axum re-boxes the service into a
        // `Route` (whose body is `axum::body::Body: Default`) after each call,
        // so `CorsLayer` sees a `Default` body instead of the non-`Default`
        // `ResponseBody` produced by `RequestBodyLimitLayer`. The resulting
        // outer→inner order (Trace → Cors → DefaultBodyLimit → RequestBodyLimit)
        // is identical to the original builder.
        .layer(RequestBodyLimitLayer::new(
            2 * 1024 * 1024 * 1024, /* 2GB */
        ))
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().on_failure(
            |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                tracing::error!("Server error: {error}");
            },
        ))
}

/// Periodically removes abandoned upload staging directories. Disabled by
/// default; enabled by setting `PACKSTORE_STAGING_SWEEP_SECS` to a nonzero
/// interval.
fn spawn_staging_sweep(blobs: &BlobStore) {
    let sweep_secs: u64 = env::var("PACKSTORE_STAGING_SWEEP_SECS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    if sweep_secs == 0 {
        return;
    }
    let max_age = Duration::from_secs(
        env::var("PACKSTORE_STAGING_MAX_AGE_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_STAGING_MAX_AGE_SECS),
    );

    let assembler = ChunkAssembler::new(blobs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_secs));
        loop {
            interval.tick().await;
            match assembler.sweep_stale(max_age) {
                Ok(0) => {}
                Ok(removed) => tracing::info!("removed {removed} stale upload staging dir(s)"),
                Err(e) => tracing::warn!("staging sweep failed: {e}"),
            }
        }
    });
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    println!("signal received, starting graceful shutdown");
}
