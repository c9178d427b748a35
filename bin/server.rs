// MastersCalc - Web Server
// Datastar front end over the session engine, with SSE for live updates

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderName, StatusCode,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        AppendHeaders, Html, IntoResponse, Response,
    },
    routing::{delete, get},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use masters_calc::delivery::sse::to_event;
use masters_calc::render::MAIN_PAGE;
use masters_calc::session::{cookie_value, set_cookie, SESSION_COOKIE};
use masters_calc::store::client::ROSTER_COOKIE;
use masters_calc::{
    spawn_watch, updates_for, ClientBlobStore, Config, MemoryStore, SessionEngine, SessionError,
    SessionKeys, SqliteStore, StateStore, StoreError, StoreKind, Update,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    backend: Backend,
    keys: SessionKeys,
    shutdown: watch::Receiver<bool>,
    cookie_max_age: u64,
}

/// Server-held stores share one engine; cookie mode builds one per request
#[derive(Clone)]
enum Backend {
    Server(SessionEngine),
    Client,
}

/// A session resolved from the request, plus the cookies to send back
struct Session {
    id: String,
    roster_cookie: Option<String>,
    set_cookies: Vec<(HeaderName, String)>,
}

impl AppState {
    fn session(&self, headers: &HeaderMap) -> Session {
        let cookies = headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let (id, new_cookie) = self.keys.resolve(cookie_value(cookies, SESSION_COOKIE));
        let mut set_cookies = Vec::new();
        if let Some(value) = new_cookie {
            set_cookies.push((SET_COOKIE, set_cookie(SESSION_COOKIE, &value, self.cookie_max_age)));
        }

        Session {
            id,
            roster_cookie: cookie_value(cookies, ROSTER_COOKIE).map(str::to_string),
            set_cookies,
        }
    }

    /// Engine for this request, plus the cookie store when the roster is client-held
    fn engine(&self, session: &Session) -> (SessionEngine, Option<Arc<ClientBlobStore>>) {
        match &self.backend {
            Backend::Server(engine) => (engine.clone(), None),
            Backend::Client => {
                let store = Arc::new(ClientBlobStore::from_cookie(session.roster_cookie.as_deref()));
                (SessionEngine::new(store.clone()), Some(store))
            }
        }
    }
}

/// Signals posted by the form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRowerSignals {
    #[serde(default)]
    name: String,
    #[serde(default)]
    birth_year_or_age: BirthYearOrAge,
}

/// The number input may arrive as a JSON number or a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BirthYearOrAge {
    Number(i64),
    Text(String),
}

impl Default for BirthYearOrAge {
    fn default() -> Self {
        BirthYearOrAge::Text(String::new())
    }
}

impl BirthYearOrAge {
    fn as_text(&self) -> String {
        match self {
            BirthYearOrAge::Number(n) => n.to_string(),
            BirthYearOrAge::Text(s) => s.clone(),
        }
    }
}

fn error_response(context: &str, err: SessionError) -> Response {
    let status = match &err {
        SessionError::InvalidInput(_) | SessionError::InvalidAge(_) | SessionError::TooYoung { .. } => {
            StatusCode::BAD_REQUEST
        }
        SessionError::IndexOutOfRange { .. } => StatusCode::NOT_FOUND,
        SessionError::StoreUnavailable(StoreError::ValueTooLarge { .. }) => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        SessionError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if err.is_user_error() {
        warn!(error = %err, "{}", context);
    } else {
        error!(error = %err, "{}", context);
    }
    (status, format!("{}: {}", context, err)).into_response()
}

fn sse_response<S>(set_cookies: Vec<(HeaderName, String)>, stream: S) -> Response
where
    S: Stream<Item = Update> + Send + 'static,
{
    let events = stream.map(|update| Ok::<Event, Infallible>(to_event(&update)));
    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    );
    (AppendHeaders(set_cookies), sse).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /masterscalc - Main page
async fn show_main_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    info!("Showing main page");
    let session = state.session(&headers);
    (AppendHeaders(session.set_cookies), Html(MAIN_PAGE)).into_response()
}

/// GET /masterscalc/rowers - SSE stream of roster updates
async fn watch_rowers(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = state.session(&headers);
    info!(session = %session.id, "Watching rowers");

    let (engine, _) = state.engine(&session);
    let updates = spawn_watch(engine, session.id, state.shutdown.clone());
    sse_response(session.set_cookies, UnboundedReceiverStream::new(updates))
}

/// POST /masterscalc/rowers - Add a rower
async fn create_rower(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(signals): Json<CreateRowerSignals>,
) -> Response {
    let session = state.session(&headers);
    let (engine, client_store) = state.engine(&session);

    if let Err(e) = engine
        .create(&session.id, &signals.name, &signals.birth_year_or_age.as_text())
        .await
    {
        return error_response("Error creating rower", e);
    }
    respond_after_mutation(&engine, session, client_store).await
}

/// DELETE /masterscalc/rowers/:idx - Remove a rower by position
async fn delete_rower(
    State(state): State<AppState>,
    Path(idx): Path<String>,
    headers: HeaderMap,
) -> Response {
    let index: i64 = match idx.parse() {
        Ok(i) => i,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid rower index: {}", e)).into_response()
        }
    };

    let session = state.session(&headers);
    let (engine, client_store) = state.engine(&session);

    if let Err(e) = engine.delete(&session.id, index).await {
        return error_response("Error deleting rower", e);
    }
    respond_after_mutation(&engine, session, client_store).await
}

/// Server-held rosters reach the page through open watches, so the mutation
/// itself has nothing to say. Client-held rosters have no watch to fire:
/// answer with the new state and the updated cookie.
async fn respond_after_mutation(
    engine: &SessionEngine,
    mut session: Session,
    client_store: Option<Arc<ClientBlobStore>>,
) -> Response {
    let Some(store) = client_store else {
        return (AppendHeaders(session.set_cookies), StatusCode::OK).into_response();
    };

    let state = match engine.snapshot(&session.id).await {
        Ok(state) => state,
        Err(e) => return error_response("Error reading rowers", e),
    };
    if let Some(value) = store.cookie_value() {
        // 30 days; the browser is the only copy
        session
            .set_cookies
            .push((SET_COOKIE, set_cookie(ROSTER_COOKIE, &value, 86400 * 30)));
    }
    sse_response(session.set_cookies, stream::iter(updates_for(state)))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to read configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "masters_calc=debug,masterscalc_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🚣 MastersCalc - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let backend = match config.store {
        StoreKind::Memory => {
            let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new(config.memory_store()));
            Backend::Server(SessionEngine::new(store))
        }
        StoreKind::Sqlite => {
            let store = Arc::new(
                SqliteStore::open(&config.db_path, config.ttl)
                    .with_context(|| format!("Failed to open database {:?}", config.db_path))?,
            );
            println!("✓ Database opened: {:?}", config.db_path);
            spawn_purge(store.clone(), config.ttl, shutdown_rx.clone());
            Backend::Server(SessionEngine::new(store))
        }
        StoreKind::Cookie => Backend::Client,
    };
    println!("✓ Roster store: {}", config.store.as_str());

    let keys = match &config.session_secret {
        Some(secret) => SessionKeys::new(secret),
        None => {
            warn!("SESSION_KEY not set, sessions will not survive a restart");
            SessionKeys::random()
        }
    }
    .map_err(|_| anyhow::anyhow!("Session key cannot be used to sign cookies"))?;

    let state = AppState {
        backend,
        keys,
        shutdown: shutdown_rx,
        cookie_max_age: config.ttl.as_secs(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/masterscalc", get(show_main_page))
        .route("/masterscalc/rowers", get(watch_rowers).post(create_rower))
        .route("/masterscalc/rowers/:idx", delete(delete_rower))
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://localhost:{}/masterscalc", config.port);
    println!("\n   Press Ctrl+C to stop\n");
    info!(%addr, store = config.store.as_str(), "Server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Periodically drop expired sessions from the database
fn spawn_purge(store: Arc<SqliteStore>, ttl: Duration, mut shutdown: watch::Receiver<bool>) {
    let period = ttl.clamp(Duration::from_secs(60), Duration::from_secs(15 * 60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.purge_expired() {
                        warn!(error = %e, "Failed to purge expired sessions");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    });
}
