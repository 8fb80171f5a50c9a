// Módulos de la aplicación
mod analysis;
mod api;
mod app_state;
mod config;
mod document;
mod error;
mod extract;
mod llm;
mod models;
mod prompts;
mod report;
mod risk;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    analysis::AnalysisEngine, app_state::AppState, config::AppConfig, extract::FileTextExtractor,
    llm::LlmManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging (RUST_LOG o, en su defecto, LOG_LEVEL)
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;
    if cfg.is_development() && !cfg.api_key_required {
        warn!("Autenticación por API key desactivada");
    }

    // 3. Inicializar gestor de LLMs y el motor de análisis
    let llm_manager = LlmManager::from_settings(&cfg.completion);
    info!(
        "Proveedor LLM: {} (modelo {})",
        cfg.completion.provider.as_str(),
        llm_manager.chat_model()
    );
    let engine = AnalysisEngine::new(
        Arc::new(llm_manager),
        Arc::new(FileTextExtractor),
        cfg.limits.clone(),
        cfg.completion.timeout,
    );

    // 4. Crear estado compartido y router
    let app_state = AppState::new(cfg.clone(), engine);
    let app = api::create_router(app_state).layer(cors_layer(&cfg.allowed_origins)?);

    // 5. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!(
        "🚀 Servidor escuchando en http://{} ({})",
        cfg.server_addr,
        cfg.environment.as_str()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins = allowed_origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>()
                    .with_context(|| format!("Origen CORS inválido: {o}"))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any))
}
