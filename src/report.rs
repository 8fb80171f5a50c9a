//! Ensamblado del informe final a partir de los riesgos ya normalizados.

use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::{
    models::{
        DocumentAnalysis, DocumentInput, IdentifiedRisk, RiskAnalysisResponse, RiskCategory,
        RiskDistribution, RiskSeverity, RiskSummary,
    },
    risk::round_one_decimal,
};

pub const MAX_TOP_CATEGORIES: usize = 3;
pub const MAX_KEY_CONCERNS: usize = 5;
/// Títulos usados como preocupaciones cuando el modelo no aporta ninguna.
pub const FALLBACK_CONCERNS: usize = 3;

/// Campos de resumen que el propio modelo puede aportar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionExtras {
    pub key_concerns: Vec<String>,
    pub industry_insights: Option<String>,
}

impl CompletionExtras {
    pub fn from_completion(completion: &Map<String, Value>) -> Self {
        let key_concerns = match completion.get("key_concerns") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        let industry_insights = completion
            .get("industry_insights")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            key_concerns,
            industry_insights,
        }
    }
}

pub fn risk_distribution(risks: &[IdentifiedRisk]) -> RiskDistribution {
    risks
        .iter()
        .fold(RiskDistribution::default(), |mut dist, risk| {
            match risk.severity {
                RiskSeverity::Critical => dist.critical += 1,
                RiskSeverity::High => dist.high += 1,
                RiskSeverity::Medium => dist.medium += 1,
                RiskSeverity::Low => dist.low += 1,
            }
            dist
        })
}

/// Categorías más frecuentes; los empates se resuelven por orden de aparición.
pub fn top_categories(risks: &[IdentifiedRisk]) -> Vec<RiskCategory> {
    let mut counts: Vec<(RiskCategory, usize)> = Vec::new();
    for risk in risks {
        match counts.iter_mut().find(|(category, _)| *category == risk.category) {
            Some((_, count)) => *count += 1,
            None => counts.push((risk.category, 1)),
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(MAX_TOP_CATEGORIES)
        .map(|(category, _)| category)
        .collect()
}

pub fn overall_score(risks: &[IdentifiedRisk]) -> f64 {
    if risks.is_empty() {
        return 0.0;
    }
    let total: f64 = risks.iter().map(|r| r.risk_score).sum();
    round_one_decimal(total / risks.len() as f64)
}

/// Resumen recalculado sobre la lista final (filtrada y truncada).
pub fn build_summary(risks: &[IdentifiedRisk], extras: &CompletionExtras) -> RiskSummary {
    if risks.is_empty() {
        return RiskSummary::default();
    }

    let concerns: Vec<String> = if extras.key_concerns.is_empty() {
        risks
            .iter()
            .take(FALLBACK_CONCERNS)
            .map(|r| r.title.clone())
            .collect()
    } else {
        extras.key_concerns.clone()
    };

    let distribution = risk_distribution(risks);
    RiskSummary {
        total_risks: distribution.total(),
        risk_distribution: distribution,
        top_categories: top_categories(risks),
        overall_risk_score: overall_score(risks),
        key_concerns: concerns.into_iter().take(MAX_KEY_CONCERNS).collect(),
        industry_insights: extras.industry_insights.clone(),
    }
}

/// Construye la respuesta completa. `started` marca el inicio del análisis,
/// incluida la llamada al LLM.
pub fn assemble_report(
    input: &DocumentInput,
    document_text: &str,
    risks: Vec<IdentifiedRisk>,
    extras: &CompletionExtras,
    started: Instant,
) -> RiskAnalysisResponse {
    let document_analysis = DocumentAnalysis {
        document_type: input.document_type,
        industry: input.industry.clone(),
        company_scale: input.company_scale,
        analysis_timestamp: Utc::now(),
        document_length: document_text.chars().count(),
    };

    let risk_summary = build_summary(&risks, extras);

    RiskAnalysisResponse {
        document_analysis,
        identified_risks: risks,
        risk_summary,
        processing_time: started.elapsed().as_secs_f64(),
    }
}
