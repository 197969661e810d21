//! Main Entrypoint for the WordWeaver API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the story source and the recording backend.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use wordweaver_api::{
    config::{Config, Provider},
    router::create_router,
    state::{AppState, load_vocabulary},
};
use wordweaver_core::{
    HttpRecorder, LogRecorder, MockStreamingSource, OpenAICompatibleSource, PromptTemplates,
    Recorder, StreamingSource,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C; running until killed.");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn build_source(config: &Config, prompts: PromptTemplates) -> Arc<dyn StreamingSource> {
    match (config.provider.api_base(), config.api_key()) {
        (Some(api_base), Some(api_key)) => {
            info!(provider = ?config.provider, "Using OpenAI-compatible provider.");
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(api_base);
            Arc::new(OpenAICompatibleSource::new(
                openai_config,
                config.chat_model.clone(),
                prompts,
            ))
        }
        _ => {
            info!("Using offline mock provider.");
            Arc::new(MockStreamingSource::default())
        }
    }
}

fn build_recorder(config: &Config) -> Arc<dyn Recorder> {
    match &config.recording_url {
        Some(url) => {
            info!(%url, "Recording learning progress to backend.");
            Arc::new(HttpRecorder::new(url.clone()))
        }
        None => {
            info!("RECORDING_URL not set; learning progress will only be logged.");
            Arc::new(LogRecorder)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let prompts = if config.prompts_path.is_dir() {
        PromptTemplates::load(&config.prompts_path)?
    } else {
        warn!(path = %config.prompts_path.display(), "Prompts directory not found; using built-in prompts.");
        PromptTemplates::default()
    };
    if config.provider == Provider::Mock {
        info!("PROVIDER=mock: stories are generated offline.");
    }
    let source = build_source(&config, prompts);
    let vocabulary = load_vocabulary(&config)?;
    if let Some(path) = &config.vocabulary_path {
        info!(path = %path.display(), "Loaded custom vocabulary.");
    }
    let recorder = build_recorder(&config);
    let app_state = Arc::new(AppState::new(&config, source, vocabulary, recorder));

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        buffer_capacity = config.buffer_capacity,
        session_ceiling = config.session_ceiling,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
