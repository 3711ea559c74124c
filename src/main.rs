mod bus;
mod cache;
mod config;
mod constants;
mod error;
mod identity;
mod policy;
mod quota;
mod routes;
mod sse;
mod store;
mod syslog;
mod usage;
mod webui;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::ServiceExt;
use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, delete, get, patch},
};
use clap::Parser;
use reqwest::Client;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tower_http::normalize_path::NormalizePath;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache::CacheLayer;
use config::RuntimeConfig;
use constants::UPSTREAM_TIMEOUT;
use error::GatewayError;
use quota::QuotaStore;
use store::AuditStore;
use webui::WebUiStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIME: &str = env!("BUILD_TIME");

pub struct AppState {
    pub audit: AuditStore,
    pub webui: WebUiStore,
    pub quota: QuotaStore,
    pub cache: CacheLayer,
    /// The live configuration; swapped wholesale on reload.
    pub runtime: RwLock<RuntimeConfig>,
    pub http_client: Client,
}

#[derive(Parser)]
#[command(name = "openrouter-gateway")]
#[command(about = "Policy-enforcing OpenRouter proxy for Open WebUI")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind to
    #[arg(short, long, env = "GATEWAY_PORT", default_value_t = 8000)]
    port: u16,

    /// Number of background drain workers
    #[arg(long, env = "GATEWAY_WORKERS", default_value_t = 2)]
    workers: usize,
}

/// Gate for `/admin/*`: the `x-admin-key` header must equal the configured
/// credential. Compared constant-time.
async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.runtime.read().await.admin_api_key().to_string();
    let provided = request
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let authorized =
        !expected.is_empty() && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()));

    if authorized {
        next.run(request).await
    } else {
        GatewayError::UnauthorizedAdmin.into_response()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Boot environment must be complete before any store is dialed.
    let env_config = RuntimeConfig::from_env();
    if let Err(e) = env_config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let audit = AuditStore::connect(env_config.database_url())
        .await
        .expect("Failed to initialize audit store");
    let webui = WebUiStore::connect_lazy(env_config.webui_database_url())
        .expect("Failed to configure Open WebUI datastore");
    let quota = QuotaStore::connect(env_config.redis_url()).expect("Failed to open quota store");

    // Persisted rows win over the environment; seed what is missing, then
    // load the effective map.
    audit
        .seed_system_config(&env_config.to_map())
        .await
        .expect("Failed to seed system config");
    let mut merged = env_config.to_map();
    merged.extend(
        audit
            .load_system_config()
            .await
            .expect("Failed to load system config"),
    );
    let runtime = RuntimeConfig::from_map(merged);
    if let Err(e) = runtime.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let http_client = Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to create HTTP client");

    let state = Arc::new(AppState {
        audit,
        webui,
        quota,
        cache: CacheLayer::new(),
        runtime: RwLock::new(runtime),
        http_client,
    });

    usage::worker::spawn_workers(state.clone(), args.workers.max(1));
    bus::spawn_config_listener(state.clone());

    let admin_routes = Router::new()
        .route("/users", get(routes::admin::users::list_users))
        .route("/users/{id}", patch(routes::admin::users::update_user))
        .route(
            "/policies",
            get(routes::admin::policies::list_policies).post(routes::admin::policies::upsert_policy),
        )
        .route(
            "/policies/{id}",
            delete(routes::admin::policies::delete_policy),
        )
        .route(
            "/group-policies",
            get(routes::admin::policies::list_group_policies)
                .post(routes::admin::policies::upsert_group_policy),
        )
        .route(
            "/group-policies/{name}",
            delete(routes::admin::policies::delete_group_policy),
        )
        .route("/openwebui-groups", get(routes::admin::openwebui_groups))
        .route("/usage", get(routes::admin::stats::usage))
        .route("/stats", get(routes::admin::stats::stats))
        .route("/performance", get(routes::admin::stats::performance))
        .route("/health", get(routes::admin::admin_health))
        .route(
            "/config",
            get(routes::admin::config::get_config).post(routes::admin::config::update_config),
        )
        .route("/system-logs", get(routes::admin::system_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    let app = NormalizePath::trim_trailing_slash(
        Router::new()
            .route("/", get(routes::health::index))
            .route("/health", get(routes::health::health))
            .nest("/admin", admin_routes)
            .route("/v1/{*path}", any(routes::proxy::proxy))
            .layer(TraceLayer::new_for_http())
            .with_state(state),
    );

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .expect("Invalid address");
    info!(
        "Starting openrouter-gateway v{}-{} (built {})",
        VERSION, GIT_HASH, BUILD_TIME
    );
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");
    axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service(app),
    )
    .await
    .expect("Server error");
}
