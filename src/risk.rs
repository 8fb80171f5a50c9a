//! Normalización de los riesgos devueltos por el LLM.
//!
//! La salida del modelo no es de fiar: cada campo se lee con accesores que
//! aplican un valor por defecto, los enums se mapean con una función total y
//! las entradas rotas se descartan una a una sin abortar el resto.
//!
//! Orden canónico: filtrar por puntuación → ordenar (estable, descendente) → truncar.

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    error::AnalysisError,
    models::{IdentifiedRisk, RiskCategory, RiskProbability, RiskSeverity},
};

pub const DEFAULT_TITLE: &str = "Unspecified Risk";
pub const DEFAULT_DESCRIPTION: &str = "No description provided";
pub const MAX_TITLE_CHARS: usize = 100;
pub const MIN_DESCRIPTION_CHARS: usize = 20;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_EVIDENCE_CHARS: usize = 200;

/// Umbrales aplicados por el normalizador.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerConfig {
    pub max_risks: usize,
    pub min_risk_score: f64,
}

/// Motivo por el que una entrada concreta se descarta.
#[derive(Debug, Error)]
enum MalformedRisk {
    #[error("la entrada no es un objeto JSON")]
    NotAnObject,
    #[error("descripción demasiado corta ({0} caracteres)")]
    DescriptionTooShort(usize),
}

/// Redondea a un decimal sobre el valor binario exacto; los empates van al par.
pub fn round_one_decimal(value: f64) -> f64 {
    let scaled = value * 10.0;
    // Error exacto de la multiplicación: decide los falsos empates.
    let residual = value.mul_add(10.0, -scaled);

    let rounded = if scaled.fract().abs() != 0.5 {
        scaled.round()
    } else if residual == 0.0 {
        scaled.round_ties_even()
    } else if (residual > 0.0) == (scaled > 0.0) {
        scaled.round()
    } else {
        scaled.trunc()
    };
    rounded / 10.0
}

fn enum_text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_lowercase)
}

pub fn parse_category(value: Option<&Value>) -> RiskCategory {
    enum_text(value)
        .and_then(|v| RiskCategory::ALL.into_iter().find(|c| c.as_str() == v))
        .unwrap_or(RiskCategory::Operational)
}

pub fn parse_severity(value: Option<&Value>) -> RiskSeverity {
    enum_text(value)
        .and_then(|v| RiskSeverity::ALL.into_iter().find(|s| s.as_str() == v))
        .unwrap_or(RiskSeverity::Medium)
}

pub fn parse_probability(value: Option<&Value>) -> RiskProbability {
    enum_text(value)
        .and_then(|v| RiskProbability::ALL.into_iter().find(|p| p.as_str() == v))
        .unwrap_or(RiskProbability::Medium)
}

/// Usa la puntuación del modelo si es un número en [0, 10]; si no, la deriva
/// de los pesos de severidad y probabilidad.
pub fn resolve_score(
    raw: Option<&Value>,
    severity: RiskSeverity,
    probability: RiskProbability,
) -> f64 {
    let provided = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match provided {
        Some(score) if score.is_finite() && (0.0..=10.0).contains(&score) => round_one_decimal(score),
        _ => round_one_decimal(severity.weight() * probability.weight()),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn text_field<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn list_field(entry: &Map<String, Value>, key: &str) -> Vec<String> {
    match entry.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => vec![single.trim().to_string()],
        _ => Vec::new(),
    }
}

fn provided_risk_id(entry: &Map<String, Value>) -> Option<String> {
    match entry.get("risk_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Normaliza una entrada. `Ok(None)` significa que no alcanza el umbral.
fn normalize_entry(
    ordinal: usize,
    raw: &Value,
    min_risk_score: f64,
) -> Result<Option<IdentifiedRisk>, MalformedRisk> {
    let entry = raw.as_object().ok_or(MalformedRisk::NotAnObject)?;

    let risk_id = provided_risk_id(entry).unwrap_or_else(|| format!("RISK_{ordinal:03}"));

    let category = parse_category(entry.get("category"));
    let severity = parse_severity(entry.get("severity"));
    let probability = parse_probability(entry.get("probability"));
    let risk_score = resolve_score(entry.get("risk_score"), severity, probability);

    if risk_score < min_risk_score {
        debug!("Riesgo {ordinal} descartado: puntuación {risk_score} < {min_risk_score}");
        return Ok(None);
    }

    let title = truncate_chars(text_field(entry, "title").unwrap_or(DEFAULT_TITLE), MAX_TITLE_CHARS);

    let description = text_field(entry, "description").unwrap_or(DEFAULT_DESCRIPTION);
    let description_len = description.chars().count();
    if description_len < MIN_DESCRIPTION_CHARS {
        return Err(MalformedRisk::DescriptionTooShort(description_len));
    }
    let description = truncate_chars(description, MAX_DESCRIPTION_CHARS);

    let context_evidence = text_field(entry, "context_evidence")
        .map(|e| truncate_chars(e, MAX_EVIDENCE_CHARS))
        .unwrap_or_default();

    Ok(Some(IdentifiedRisk {
        risk_id,
        title,
        description,
        category,
        severity,
        probability,
        risk_score,
        impact_areas: list_field(entry, "impact_areas"),
        mitigation_recommendations: list_field(entry, "mitigation_recommendations"),
        context_evidence,
    }))
}

/// Sufija un id repetido con su ordinal y, si también está ocupado, con un contador.
fn unique_id(used_ids: &mut HashSet<String>, id: &str, ordinal: usize) -> String {
    let base = format!("{id}_{ordinal:03}");
    let mut candidate = base.clone();
    let mut attempt = 2;
    while !used_ids.insert(candidate.clone()) {
        candidate = format!("{base}_{attempt}");
        attempt += 1;
    }
    candidate
}

/// Convierte la lista cruda en riesgos validados, filtrados, ordenados y acotados.
pub fn normalize_entries(entries: &[Value], config: NormalizerConfig) -> Vec<IdentifiedRisk> {
    let mut survivors: Vec<(usize, IdentifiedRisk)> = Vec::with_capacity(entries.len());
    let mut used_ids: HashSet<String> = HashSet::new();

    for (index, raw) in entries.iter().enumerate() {
        let ordinal = index + 1;
        match normalize_entry(ordinal, raw, config.min_risk_score) {
            Ok(Some(mut risk)) => {
                if !used_ids.insert(risk.risk_id.clone()) {
                    risk.risk_id = unique_id(&mut used_ids, &risk.risk_id, ordinal);
                }
                survivors.push((index, risk));
            }
            Ok(None) => {}
            Err(e) => warn!("No se pudo procesar el riesgo {ordinal}: {e}"),
        }
    }

    survivors.sort_by(|(ia, a), (ib, b)| {
        b.risk_score
            .total_cmp(&a.risk_score)
            .then_with(|| ia.cmp(ib))
    });
    survivors.truncate(config.max_risks);

    survivors.into_iter().map(|(_, risk)| risk).collect()
}

/// Lee `identified_risks` del objeto devuelto por el LLM y lo normaliza.
///
/// Ausente o `null` equivale a una lista vacía; cualquier otro valor que no sea
/// una lista es una violación del contrato y falla toda la petición.
pub fn normalize_completion(
    completion: &Map<String, Value>,
    config: NormalizerConfig,
) -> Result<Vec<IdentifiedRisk>, AnalysisError> {
    match completion.get("identified_risks") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => Ok(normalize_entries(entries, config)),
        Some(other) => Err(AnalysisError::ResponseFormat(format!(
            "identified_risks debe ser una lista, se recibió {}",
            json_type_name(other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "un booleano",
        Value::Number(_) => "un número",
        Value::String(_) => "un texto",
        Value::Array(_) => "una lista",
        Value::Object(_) => "un objeto",
    }
}
