use crate::broadcast_engine::{BroadcastEngine, Channel};
use crate::check_version::VersionChecker;
use crate::compose_cache::ComposeCache;
use crate::config::Config;
use crate::db::models::setting::SettingsCache;
use crate::db::models::ImageUpdateStore;
use crate::db::Database;
use crate::static_files::PreCompressedStaticFiles;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::Request,
    http::{header::CONTENT_TYPE, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use bollard::Docker;
use socketioxide::{extract::SocketRef, SocketIo, TransportType};
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Shared server context bundling dependencies
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<Config>,
    pub io: SocketIo,
    pub db: SqlitePool,
    pub cache: SettingsCache,
    pub version_checker: VersionChecker,
    /// Live Docker Engine API client, shared by every bollard-backed read path.
    pub docker: Arc<Docker>,
    /// Compose-file projection kept current by the file watcher.
    pub compose_cache: Arc<ComposeCache>,
    /// Coalesced view-channel broadcaster.
    pub broadcast_engine: BroadcastEngine,
    /// Derived stack-has-updates view backed by the `image_update` table.
    pub image_update_store: ImageUpdateStore,
    /// Secret used to encrypt/decrypt agent passwords at rest.
    /// Derived from the jwtSecret setting; empty until setup is complete.
    pub encryption_secret: Arc<std::sync::RwLock<String>>,
    /// One mutex per stack name, so compose/docker subprocesses for the
    /// same stack never run concurrently (a pull-then-up sequence holds
    /// its lock across both steps). Registry itself guarded by a std
    /// mutex since lookups are sub-microsecond and never held across
    /// an await point.
    pub compose_locks: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ServerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        io: SocketIo,
        db: SqlitePool,
        cache: SettingsCache,
        version_checker: VersionChecker,
        docker: Arc<Docker>,
        compose_cache: Arc<ComposeCache>,
        broadcast_engine: BroadcastEngine,
        image_update_store: ImageUpdateStore,
    ) -> Self {
        Self {
            config,
            io,
            db,
            cache,
            version_checker,
            docker,
            compose_cache,
            broadcast_engine,
            image_update_store,
            encryption_secret: Arc::new(std::sync::RwLock::new(String::new())),
            compose_locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Get (or create) the per-stack mutex serializing compose/docker
    /// subprocess invocations for `name`. See spec §5: no two compose
    /// subprocesses for the same stack may run concurrently.
    pub fn stack_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.compose_locks.lock().unwrap();
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Get the encryption secret. Returns empty string if not yet initialized
    /// (i.e. before first user setup).
    pub fn get_encryption_secret(&self) -> String {
        self.encryption_secret.read().unwrap().clone()
    }

    /// Set the encryption secret (called at startup and after initial setup).
    pub fn set_encryption_secret(&self, secret: String) {
        let mut w = self.encryption_secret.write().unwrap();
        *w = secret;
    }
}

/// Main server structure
pub struct DockgeServer {
    config: Arc<Config>,
    index_html: Option<String>,
}

impl DockgeServer {
    pub fn new(config: Config) -> Result<Self> {
        // Try to load index.html
        let index_html = match fs::read_to_string("./frontend-dist/index.html") {
            Ok(content) => Some(content),
            Err(e) => {
                // In development mode, it's okay if frontend-dist doesn't exist
                if cfg!(debug_assertions) {
                    warn!(
                        "frontend-dist/index.html not found (OK in development): {}",
                        e
                    );
                    None
                } else {
                    error!(
                        "Error: Cannot find 'frontend-dist/index.html', did you install correctly?"
                    );
                    return Err(anyhow::anyhow!("frontend-dist/index.html not found"));
                }
            }
        };

        Ok(Self {
            config: Arc::new(config),
            index_html,
        })
    }

    /// Build the router with all routes and middleware
    fn build_router(&self, socket_layer: socketioxide::layer::SocketIoLayer) -> Router {
        let mut router = Router::new();

        // Robots.txt route
        router = router.route(
            "/robots.txt",
            get(|| async {
                let txt = "User-agent: *\nDisallow: /";
                Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "text/plain")
                    .body(Body::from(txt))
                    .unwrap()
            }),
        );

        // Serve static files from frontend-dist with pre-compressed support
        // Use fallback_service instead of routes to allow socket.io layer to intercept first
        if PathBuf::from("./frontend-dist").exists() {
            let static_files = Arc::new(PreCompressedStaticFiles::new("./frontend-dist"));
            let index_html = self.index_html.clone();

            // Use fallback for SPA - handler for all unmatched routes
            router = router.fallback(move |uri: Uri, req: Request| {
                let static_files = static_files.clone();
                let index_html = index_html.clone();
                async move {
                    // Try to serve the file first
                    let response = static_files.handle(uri.clone(), req).await;

                    // If 404, serve index.html for SPA routing
                    if response.status() == StatusCode::NOT_FOUND {
                        if let Some(html) = index_html {
                            return Html(html).into_response();
                        }
                    }

                    response
                }
            });
        } else if let Some(ref html) = self.index_html {
            // Fallback: serve index.html only (development mode)
            let html_clone = html.clone();
            router = router.route("/", get(|| async move { Html(html_clone.clone()) }));

            // Fallback for all other routes in dev mode
            let html_clone = html.clone();
            router = router.fallback(move || {
                let html = html_clone.clone();
                async move { Html(html) }
            });
        }

        // Add middleware - layers are applied in reverse order (last = innermost)
        // Socket.io layer must be innermost to handle /socket.io/* paths
        let router = if cfg!(debug_assertions) {
            info!("Development mode: CORS enabled for all origins");
            router.layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive())
                    .layer(socket_layer),
            )
        } else {
            router.layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(socket_layer),
            )
        };

        router
    }

    /// Create the Socket.IO layer with transport configuration
    fn create_socketio_layer(&self) -> (SocketIo, socketioxide::layer::SocketIoLayer) {
        let (socket_layer, io) = SocketIo::builder()
            .transports([TransportType::Websocket])
            .build_layer();

        info!("Socket.IO configured with WebSocket-only transport");

        (io, socket_layer)
    }

    /// Set up Socket.IO namespace handlers (must be called after ServerContext is created)
    fn setup_socketio_handlers(io: &SocketIo, ctx: Arc<ServerContext>) {
        io.ns("/", move |socket: SocketRef| {
            info!("Socket connected: {} (transport: websocket)", socket.id);

            // Initialize socket state
            use crate::socket_handlers::{set_socket_state, SocketState};
            set_socket_state(&socket.id.to_string(), SocketState::default());

            // Mark the stacks channel dirty so the new client gets a stack list
            // on its next render pass instead of waiting for the next file change.
            ctx.broadcast_engine.mark_dirty(Channel::Stacks);

            // Send server info
            let ctx_for_info = ctx.clone();
            let socket_for_info = socket.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    crate::broadcasts::send_info(&socket_for_info, &ctx_for_info, true).await
                {
                    warn!("Failed to send info: {}", e);
                }

                // Check if setup is needed and emit "setup" event
                let user_count = crate::db::models::User::count(&ctx_for_info.db)
                    .await
                    .unwrap_or(1);
                if user_count == 0 {
                    info!("No users found, emitting 'setup' to redirect client");
                    match socket_for_info.emit("setup", ()) {
                        Ok(_) => info!(
                            "'setup' event emitted successfully to {}",
                            socket_for_info.id
                        ),
                        Err(e) => warn!("Failed to emit 'setup' event: {:?}", e),
                    }
                }
            });

            // Setup disconnect handler - single handler for all cleanup
            let socket_id_for_disconnect = socket.id.to_string();
            socket.on_disconnect(move || {
                let socket_id = socket_id_for_disconnect.clone();
                async move {
                    info!("Socket disconnected: {}", socket_id);

                    // Clean up socket state
                    use crate::socket_handlers::remove_socket_state;
                    remove_socket_state(&socket_id);

                    // Drop this connection as a writer from every terminal
                    // it had joined, tearing down any cancellable pipe
                    // terminal left with none.
                    crate::terminal::Terminal::remove_writer_from_all(&socket_id).await;
                }
            });

            // Setup all event handlers
            crate::socket_handlers::setup_all_handlers(socket.clone(), ctx.clone());
        });
    }
}

/// Start the server
pub async fn serve(config: Config) -> Result<()> {
    let server = DockgeServer::new(config)?;

    // Create data directory if it doesn't exist
    fs::create_dir_all(&server.config.data_dir).context("Failed to create data directory")?;

    // Create stacks directory if it doesn't exist
    fs::create_dir_all(&server.config.stacks_dir).context("Failed to create stacks directory")?;

    info!("Data directory: {}", server.config.data_dir.display());
    info!("Stacks directory: {}", server.config.stacks_dir.display());

    // Initialize database
    let db = Database::new(&server.config.data_dir).await?;

    // Run migrations
    db.migrate().await?;

    // Create settings cache
    let cache = SettingsCache::new();

    // Create version checker
    let version_checker = VersionChecker::new(env!("CARGO_PKG_VERSION").to_string());

    // Connect to the Docker Engine API. Every bollard-backed read (stack
    // status, container lists, networks, volumes, update checks) shares
    // this one client.
    let docker = Arc::new(
        Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?,
    );

    // Populate the compose cache from disk before anything reads it.
    let compose_cache = Arc::new(ComposeCache::new());
    compose_cache
        .populate_from_disk(&server.config.stacks_dir)
        .await;

    let broadcast_engine = BroadcastEngine::new();
    let image_update_store = ImageUpdateStore::new();
    image_update_store.refresh(db.pool()).await.ok();

    // Create Socket.IO layer first (with transport config)
    let (io, socket_layer) = server.create_socketio_layer();

    // Create server context with the real SocketIo instance
    let ctx = Arc::new(ServerContext::new(
        server.config.clone(),
        io.clone(),
        db.pool().clone(),
        cache,
        version_checker,
        docker.clone(),
        compose_cache.clone(),
        broadcast_engine.clone(),
        image_update_store,
    ));

    // Watch the stacks directory for compose file changes; this is the only
    // mechanism that keeps the compose cache current after startup.
    let _file_watcher = crate::file_watcher::FileWatcher::start(
        server.config.stacks_dir.clone(),
        compose_cache,
        broadcast_engine.clone(),
    )
    .context("Failed to start file watcher")?;

    // Initialize encryption secret from jwtSecret setting (if app has been set up)
    {
        let jwt_secret: Option<(String,)> =
            sqlx::query_as("SELECT value FROM setting WHERE key = 'jwtSecret'")
                .fetch_optional(db.pool())
                .await?;

        if let Some((secret,)) = jwt_secret {
            ctx.set_encryption_secret(secret.clone());
        }
    }

    // Now set up namespace handlers with the real context
    DockgeServer::setup_socketio_handlers(&io, ctx.clone());

    // Build router
    let app = server.build_router(socket_layer);

    // Get bind address
    let bind_addr = server.config.bind_address();

    info!("Server Type: HTTP");
    info!("Listening on {}", bind_addr);

    // Create listener
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    // Start scheduled background tasks
    start_scheduled_tasks(ctx.clone());

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            info!("Received termination signal, shutting down...");
        },
    }
}

/// Start all scheduled and reactive background tasks.
fn start_scheduled_tasks(ctx: Arc<ServerContext>) {
    info!("Starting scheduled tasks");

    // Dockge self-update check, every 48 hours.
    let ctx_clone = ctx.clone();
    tokio::spawn(async move {
        ctx_clone
            .version_checker
            .start_interval(ctx_clone.db.clone(), ctx_clone.cache.clone());
    });

    // Coalesced view-channel broadcaster. This is the only consumer of the
    // dirty flags set by the file watcher, socket handlers, and the update
    // checker below; there is no polling loop here.
    ctx.broadcast_engine.clone().spawn(ctx.clone());

    // Background image update sweep.
    let update_checker = crate::update_checker::UpdateChecker::new(
        ctx.docker.clone(),
        ctx.compose_cache.clone(),
        ctx.image_update_store.clone(),
        ctx.broadcast_engine.clone(),
    );
    update_checker.spawn(ctx.db.clone(), ctx.config.update_check_interval_hours);

    info!("All scheduled tasks started");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::sync::Mutex as AsyncMutex;

    #[test]
    fn stack_lock_is_stable_per_name() {
        let locks: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>> =
            Arc::new(StdMutex::new(HashMap::new()));

        let get = |name: &str| {
            let mut map = locks.lock().unwrap();
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let a1 = get("s1");
        let a2 = get("s1");
        let b = get("s2");

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[tokio::test]
    async fn stack_lock_serializes_same_stack() {
        let locks: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>> =
            Arc::new(StdMutex::new(HashMap::new()));
        let get = |name: &str| {
            let mut map = locks.lock().unwrap();
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let lock = get("s1");
        let _guard = lock.lock().await;

        // A second acquire for the same stack must not be grantable while
        // the first guard is held.
        let lock2 = get("s1");
        assert!(lock2.try_lock().is_err());
    }
}
