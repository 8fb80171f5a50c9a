//! Abstracción sobre Rig para pedir completions JSON a distintos proveedores de LLM.
//!
//! El resto del servicio sólo ve el trait [`Completer`]: recibe instrucciones de
//! sistema y de usuario y devuelve un único objeto JSON, o un [`UpstreamError`].

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::Prompt;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{CompletionSettings, LlmProvider};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("El proveedor LLM no respondió en {} s", .0.as_secs())]
    Timeout(Duration),

    #[error("Error del proveedor LLM: {0}")]
    Provider(String),

    #[error("La respuesta del LLM no es JSON válido: {0}")]
    InvalidJson(String),

    #[error("La respuesta del LLM no es un objeto JSON")]
    NotAnObject,
}

/// Colaborador de completion: opaco, posiblemente no determinista.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<Map<String, Value>, UpstreamError>;

    /// Nombre del modelo para informes de salud y estadísticas.
    fn model_name(&self) -> String;
}

/// Gestor de LLMs sobre Rig.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub settings: CompletionSettings,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_settings(settings: &CompletionSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    pub fn chat_model(&self) -> &str {
        if self.settings.chat_model.trim().is_empty() {
            self.settings.provider.default_chat_model()
        } else {
            self.settings.chat_model.as_str()
        }
    }

    async fn complete_with_openai(&self, system: &str, user: &str) -> Result<String, UpstreamError> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        require_env("OPENAI_API_KEY")?;
        let client = openai::Client::from_env();
        let agent = client
            .agent(self.chat_model())
            .preamble(system)
            .temperature(self.settings.temperature)
            .max_tokens(self.settings.max_tokens)
            .build();

        agent
            .prompt(user)
            .await
            .map_err(|e| UpstreamError::Provider(e.to_string()))
    }

    async fn complete_with_gemini(&self, system: &str, user: &str) -> Result<String, UpstreamError> {
        use rig::client::CompletionClient as _;
        use rig::providers::gemini;

        require_env("GEMINI_API_KEY")?;
        let client = gemini::Client::from_env();
        let agent = client
            .agent(self.chat_model())
            .preamble(system)
            .temperature(self.settings.temperature)
            .max_tokens(self.settings.max_tokens)
            .build();

        agent
            .prompt(user)
            .await
            .map_err(|e| UpstreamError::Provider(e.to_string()))
    }
}

/// `Client::from_env` de Rig hace panic si falta la clave.
fn require_env(key: &str) -> Result<(), UpstreamError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(()),
        _ => Err(UpstreamError::Provider(format!("{key} no está configurada"))),
    }
}

#[async_trait]
impl Completer for LlmManager {
    async fn complete(&self, system: &str, user: &str) -> Result<Map<String, Value>, UpstreamError> {
        debug!(
            provider = self.settings.provider.as_str(),
            model = self.chat_model(),
            prompt_len = user.len(),
            "Enviando petición de completion"
        );

        let response = match self.settings.provider {
            LlmProvider::OpenAI => self.complete_with_openai(system, user).await?,
            LlmProvider::Gemini => self.complete_with_gemini(system, user).await?,
        };

        parse_completion_object(&response)
    }

    fn model_name(&self) -> String {
        self.chat_model().to_string()
    }
}

/// Convierte el texto devuelto por el modelo en un objeto JSON.
/// Tolera que la respuesta venga envuelta en un bloque de código Markdown.
pub fn parse_completion_object(response: &str) -> Result<Map<String, Value>, UpstreamError> {
    let json_response = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match serde_json::from_str::<Value>(json_response) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(UpstreamError::NotAnObject),
        Err(e) => {
            let snippet: String = response.chars().take(200).collect();
            warn!("No se pudo parsear el JSON del LLM. Error: {}. Respuesta: '{}'", e, snippet);
            Err(UpstreamError::InvalidJson(e.to_string()))
        }
    }
}
