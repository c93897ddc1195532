mod api;
mod config;
mod response;
mod state;

use std::sync::Arc;

use axum::http::{header, Method};
use axum::routing::get;
use axum::Router;
use conclave_ai::llm::EnvApiKeyResolver;
use conclave_ai::{HttpToolsGateway, NullToolsGateway};
use conclave_core::{ArtifactStore, CheckpointManager, EventHub, Registry, RegistryPaths, WorkflowExecutor};
use conclave_traits::ToolsGateway;
use conclave_storage::paths::{resolve_registry_root, resolve_storage_root};
use conclave_storage::StorageLayout;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::state::AppState;

#[derive(serde::Serialize)]
struct Health {
    status: String,
}

async fn health() -> axum::Json<Health> {
    axum::Json(Health {
        status: "conclave is running".to_string(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,conclave_server=debug".into()),
        )
        .with_target(false)
        .init();

    tracing::info!("starting conclave gateway");

    let config = ServerConfig::load();
    let layout = Arc::new(StorageLayout::new(resolve_storage_root()));

    let registry = Arc::new(Registry::new(RegistryPaths::from_root(resolve_registry_root())));
    registry.load_all().await?;

    let events = Arc::new(EventHub::new(Arc::clone(&layout)));
    let checkpoints = Arc::new(CheckpointManager::new(Arc::clone(&layout), Arc::clone(&events) as Arc<dyn conclave_traits::EventSink>).await?);
    tokio::spawn(Arc::clone(&checkpoints).run_timeout_sweeper());

    let memory = Arc::new(conclave_core::MemoryStore::new(Arc::clone(&layout), Some(90)));
    let artifacts = Arc::new(ArtifactStore::new(Arc::clone(&layout)));

    let tools_gateway: Arc<dyn ToolsGateway> = if config.tools_gateway_enabled {
        Arc::new(HttpToolsGateway::new(Arc::clone(&registry) as Arc<dyn conclave_traits::RegistryLookup>))
    } else {
        Arc::new(NullToolsGateway)
    };

    let executor = Arc::new(
        WorkflowExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::clone(&artifacts),
            Arc::clone(&checkpoints) as Arc<dyn conclave_traits::CheckpointGateway>,
            tools_gateway,
            Arc::new(EnvApiKeyResolver),
        )
        .with_memory(Arc::clone(&memory) as Arc<dyn conclave_traits::MemoryLookup>),
    );

    let state = AppState {
        registry,
        events,
        checkpoints,
        memory,
        artifacts,
        executor,
    };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::HeaderName::from_static("last-event-id")]);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/runs", api::runs::router())
        .nest("/sessions", api::sessions::router())
        .nest("/registries", api::registries::router())
        .nest("/checkpoints", api::checkpoints::router())
        .nest("/memory", api::memory::router())
        .nest("/artifacts", api::artifacts::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

