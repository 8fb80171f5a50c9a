//! Motor de análisis: encadena la resolución del documento, el prompt, la
//! llamada al LLM, la normalización de riesgos y el ensamblado del informe.

use std::{sync::Arc, time::Duration, time::Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    config::AnalysisLimits,
    document,
    error::AnalysisError,
    extract::TextExtractor,
    llm::{Completer, UpstreamError},
    models::{DocumentInput, RiskAnalysisResponse},
    prompts,
    report::{self, CompletionExtras},
    risk::{self, NormalizerConfig},
};

const HEALTH_SYSTEM_PROMPT: &str = "You are a health probe. Reply with JSON only.";
const HEALTH_USER_PROMPT: &str = r#"Return exactly {"status": "ok"}"#;

/// Estado del motor para `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub status: &'static str,
    pub llm_connection: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Colaboradores inyectados más los umbrales. No guarda estado mutable entre peticiones.
#[derive(Clone)]
pub struct AnalysisEngine {
    completer: Arc<dyn Completer>,
    extractor: Arc<dyn TextExtractor>,
    limits: AnalysisLimits,
    timeout: Duration,
}

impl AnalysisEngine {
    pub fn new(
        completer: Arc<dyn Completer>,
        extractor: Arc<dyn TextExtractor>,
        limits: AnalysisLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            completer,
            extractor,
            limits,
            timeout,
        }
    }

    pub fn extractor(&self) -> &dyn TextExtractor {
        self.extractor.as_ref()
    }

    pub fn model_name(&self) -> String {
        self.completer.model_name()
    }

    fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            max_risks: self.limits.max_risks,
            min_risk_score: self.limits.min_risk_score,
        }
    }

    async fn complete_with_timeout(
        &self,
        system: &str,
        user: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, UpstreamError> {
        tokio::time::timeout(self.timeout, self.completer.complete(system, user))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))?
    }

    /// Ejecuta el análisis completo. Cualquier fallo aborta la petición entera.
    pub async fn analyze(&self, input: DocumentInput) -> Result<RiskAnalysisResponse, AnalysisError> {
        let analysis_id = Uuid::new_v4();
        let span = info_span!("analysis", %analysis_id, document_type = input.document_type.as_str());

        async move {
            let started = Instant::now();
            info!(
                "Iniciando análisis de riesgos - Sector: {}, Escala: {}",
                input.industry.as_deref().unwrap_or("General"),
                input.company_scale.as_str()
            );

            let text = document::resolve_text(&input, self.extractor.as_ref())?;

            let config = self.normalizer_config();
            let prompt =
                prompts::build_risk_prompt(&input, &text, config.max_risks, config.min_risk_score);

            let completion = self.complete_with_timeout(&prompt.system, &prompt.user).await?;

            let risks = risk::normalize_completion(&completion, config)?;
            let extras = CompletionExtras::from_completion(&completion);
            let response = report::assemble_report(&input, &text, risks, &extras, started);

            info!(
                risks = response.risk_summary.total_risks,
                overall_score = response.risk_summary.overall_risk_score,
                "Análisis completado en {:.2}s",
                response.processing_time
            );
            Ok(response)
        }
        .instrument(span)
        .await
    }

    /// Comprueba que el proveedor LLM responde. Nunca falla: informa del estado.
    pub async fn health_check(&self) -> EngineHealth {
        let (llm_connection, error) = match self
            .complete_with_timeout(HEALTH_SYSTEM_PROMPT, HEALTH_USER_PROMPT)
            .await
        {
            Ok(_) => (true, None),
            Err(e) => {
                warn!("Health check del LLM fallido: {}", e);
                (false, Some(e.to_string()))
            }
        };

        EngineHealth {
            status: if llm_connection { "healthy" } else { "unhealthy" },
            llm_connection,
            model: self.completer.model_name(),
            error,
            timestamp: Utc::now(),
        }
    }
}
