//! Carga y gestión de configuración de la aplicación (servidor, LLM y límites de análisis).

use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Modelo usado cuando `LLM_CHAT_MODEL` no está definido.
    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-1.5-flash",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(anyhow!(
                "ENVIRONMENT debe ser development, staging o production (recibido: {other})"
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

/// Parámetros que se envían al proveedor en cada llamada de completion.
#[derive(Clone, Debug)]
pub struct CompletionSettings {
    pub provider: LlmProvider,
    pub chat_model: String,
    pub max_tokens: u64,
    pub temperature: f64,
    pub timeout: Duration,
}

/// Umbrales del normalizador de riesgos y límites de entrada.
#[derive(Clone, Debug)]
pub struct AnalysisLimits {
    pub max_risks: usize,
    pub min_risk_score: f64,
    pub max_document_length: usize,
    pub max_upload_size: usize,
}

impl Default for AnalysisLimits {
    fn default() -> Self {
        Self {
            max_risks: 10,
            min_risk_score: 3.0,
            max_document_length: 50_000,
            max_upload_size: 10_000_000,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub environment: Environment,
    pub api_key: Option<String>,
    pub api_key_required: bool,
    pub allowed_origins: Vec<String>,

    pub completion: CompletionSettings,
    pub limits: AnalysisLimits,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server_addr = var("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:8000".to_string());
        let environment =
            Environment::from_str(&var("ENVIRONMENT").unwrap_or_else(|| "development".into()))?;

        let api_key_required = parse_or("API_KEY_REQUIRED", var("API_KEY_REQUIRED"), true)?;
        let api_key = var("API_KEY");
        if api_key_required && api_key.is_none() {
            bail!("Falta API_KEY en el entorno (o desactiva API_KEY_REQUIRED)");
        }

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["*".to_string()]);

        let provider = LlmProvider::from_str(&var("LLM_PROVIDER").unwrap_or_else(|| "openai".into()))?;
        let chat_model =
            var("LLM_CHAT_MODEL").unwrap_or_else(|| provider.default_chat_model().to_string());
        let max_tokens: u64 = parse_or("LLM_MAX_TOKENS", var("LLM_MAX_TOKENS"), 2000)?;
        let temperature: f64 = parse_or("LLM_TEMPERATURE", var("LLM_TEMPERATURE"), 0.3)?;
        let timeout_secs: u64 = parse_or("LLM_TIMEOUT_SECS", var("LLM_TIMEOUT_SECS"), 60)?;

        if max_tokens == 0 {
            bail!("LLM_MAX_TOKENS debe ser mayor que 0");
        }
        if !(0.0..=1.0).contains(&temperature) {
            bail!("LLM_TEMPERATURE debe estar entre 0.0 y 1.0 (recibido: {temperature})");
        }
        if timeout_secs == 0 {
            bail!("LLM_TIMEOUT_SECS debe ser mayor que 0");
        }

        let defaults = AnalysisLimits::default();
        let max_risks = parse_or("DEFAULT_MAX_RISKS", var("DEFAULT_MAX_RISKS"), defaults.max_risks)?;
        let min_risk_score = parse_or(
            "DEFAULT_MIN_RISK_SCORE",
            var("DEFAULT_MIN_RISK_SCORE"),
            defaults.min_risk_score,
        )?;
        let max_document_length = parse_or(
            "MAX_DOCUMENT_LENGTH",
            var("MAX_DOCUMENT_LENGTH"),
            defaults.max_document_length,
        )?;
        let max_upload_size =
            parse_or("MAX_UPLOAD_SIZE", var("MAX_UPLOAD_SIZE"), defaults.max_upload_size)?;

        if !(1..=20).contains(&max_risks) {
            bail!("DEFAULT_MAX_RISKS debe estar entre 1 y 20 (recibido: {max_risks})");
        }
        if !(0.0..=10.0).contains(&min_risk_score) {
            bail!("DEFAULT_MIN_RISK_SCORE debe estar entre 0.0 y 10.0 (recibido: {min_risk_score})");
        }

        Ok(Self {
            server_addr,
            environment,
            api_key,
            api_key_required,
            allowed_origins,
            completion: CompletionSettings {
                provider,
                chat_model,
                max_tokens,
                temperature,
                timeout: Duration::from_secs(timeout_secs),
            },
            limits: AnalysisLimits {
                max_risks,
                min_risk_score,
                max_document_length,
                max_upload_size,
            },
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: '{value}'")),
        None => Ok(default),
    }
}
