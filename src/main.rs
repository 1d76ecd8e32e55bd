use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use flight_log_chat::config::Config;
use flight_log_chat::models;
use flight_log_chat::services::{
    AgentController, AgentLimits, ChatGateway, DocIndex, LLMClient, SafetyGate, SessionRegistry,
    SessionSweeper,
};
use flight_log_chat::utils::ScheduledExecutor;
use flight_log_chat::{AppState, handlers, services};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::chatbot::init_session,
        handlers::chatbot::chat,
        handlers::chatbot::validate_session,
        handlers::chatbot::get_schema,
        handlers::chatbot::run_query,
        handlers::chatbot::validation_history,
        handlers::chatbot::session_stats,

        handlers::docs::docs_status,
        handlers::docs::refresh_docs,
        handlers::docs::clear_docs_cache,
    ),
    components(
        schemas(
            models::InitRequest,
            models::InitResponse,
            models::ChatRequest,
            models::ChatResponse,
            models::SessionValidity,
            models::SchemaResponse,
            models::QueryRequest,
            models::QueryResponse,
            models::ValidationHistoryResponse,
            models::SessionStatsResponse,
            models::ColumnType,
            models::ColumnInfo,
            models::TableSchema,
            models::IngestReport,
            models::IngestedTable,
            models::IngestFailure,
            services::validator::ValidationSummary,
            services::validator::ValidationRecord,
            services::validator::Discrepancy,
            services::doc_index::DocSearchHit,
            services::doc_index::DocIndexStatus,
            handlers::docs::RefreshRequest,
            handlers::docs::RefreshResponse,
            handlers::docs::ClearCacheResponse,
        )
    ),
    tags(
        (name = "Chatbot", description = "Flight-log conversation endpoints"),
        (name = "Docs", description = "Documentation index management"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry_builder = tracing_subscriber::registry().with(log_filter);

    // Keep the appender guard alive for the process lifetime
    let mut _appender_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("aerolog.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _appender_guard = Some(guard);
        registry_builder
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry_builder.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Aerolog starting up");
    tracing::info!("Configuration loaded successfully");

    let gateway: Arc<dyn ChatGateway> = Arc::new(LLMClient::new(
        &config.llm.api_base,
        config.llm.api_key.clone(),
        &config.llm.embed_model,
        config.llm.timeout_seconds,
        config.llm.max_retries,
    )?);

    let doc_index = Arc::new(DocIndex::new(Arc::clone(&gateway), &config.docs));
    doc_index.init().await;

    let session_registry = Arc::new(SessionRegistry::new(
        config.session.ttl_seconds,
        config.session.history_limit,
    ));

    let safety_gate = SafetyGate::new(Arc::clone(&gateway), &config.llm.parser_model);
    let agent = Arc::new(AgentController::new(
        Arc::clone(&gateway),
        safety_gate,
        Arc::clone(&doc_index),
        &config.llm.chat_model,
        AgentLimits::from(&config.agent),
    ));
    tracing::info!("Agent pipeline initialized");

    let sweep_interval = Duration::from_secs(config.session.sweep_interval_secs);
    let executor = ScheduledExecutor::new("session-sweeper", sweep_interval);
    let sweeper = SessionSweeper::new(Arc::clone(&session_registry));
    tokio::spawn(async move {
        executor.start(sweeper).await;
    });
    tracing::info!("Session sweeper started (interval: {:?})", sweep_interval);

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        registry: Arc::clone(&session_registry),
        doc_index: Arc::clone(&doc_index),
        agent: Arc::clone(&agent),
    });

    let chatbot_routes = Router::new()
        .route("/chatbot/init", post(handlers::chatbot::init_session))
        .route("/chatbot/chat", post(handlers::chatbot::chat))
        .route("/chatbot/sessions/stats", get(handlers::chatbot::session_stats))
        .route("/chatbot/sessions/:id/validate", get(handlers::chatbot::validate_session))
        .route("/chatbot/sessions/:id/schema", get(handlers::chatbot::get_schema))
        .route("/chatbot/sessions/:id/query", post(handlers::chatbot::run_query))
        .route(
            "/chatbot/sessions/:id/validation-history",
            get(handlers::chatbot::validation_history),
        )
        .route("/chatbot/docs/status", get(handlers::docs::docs_status))
        .route("/chatbot/docs/refresh", post(handlers::docs::refresh_docs))
        .route("/chatbot/docs/clear-cache", post(handlers::docs::clear_docs_cache))
        .with_state(Arc::clone(&app_state));

    let health_routes = Router::new().route("/health", get(health_check));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(chatbot_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("Aerolog is ready to serve requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Flush the doc-embedding cache before the process exits
    doc_index.flush().await;
    tracing::info!("Aerolog stopped");

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}
