//! Modelos de dominio: entrada del documento, riesgos identificados y el informe final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tipo de documento analizado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    MeetingTranscript,
    BusinessPlan,
}

impl DocumentType {
    pub const ALL: [DocumentType; 2] = [Self::MeetingTranscript, Self::BusinessPlan];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "meeting_transcript" => Some(Self::MeetingTranscript),
            "business_plan" => Some(Self::BusinessPlan),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MeetingTranscript => "meeting_transcript",
            Self::BusinessPlan => "business_plan",
        }
    }
}

/// Tamaño de la empresa. `sme` se acepta como alias de `small`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyScale {
    Startup,
    Small,
    #[default]
    Medium,
    Enterprise,
}

impl CompanyScale {
    pub const ALL: [CompanyScale; 4] = [Self::Startup, Self::Small, Self::Medium, Self::Enterprise];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "startup" => Some(Self::Startup),
            "small" | "sme" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Enterprise => "enterprise",
        }
    }
}

/// Formato declarado de un fichero subido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Txt,
    Docx,
    Doc,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [Self::Pdf, Self::Txt, Self::Docx, Self::Doc];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Txt),
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            _ => None,
        }
    }

    /// Deduce el formato a partir de la extensión del nombre de fichero.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, extension) = filename.rsplit_once('.')?;
        Self::parse(extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Docx => "docx",
            Self::Doc => "doc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Market,
    Operational,
    Financial,
    Regulatory,
    Strategic,
    Technology,
    Legal,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 7] = [
        Self::Market,
        Self::Operational,
        Self::Financial,
        Self::Regulatory,
        Self::Strategic,
        Self::Technology,
        Self::Legal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Operational => "operational",
            Self::Financial => "financial",
            Self::Regulatory => "regulatory",
            Self::Strategic => "strategic",
            Self::Technology => "technology",
            Self::Legal => "legal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskSeverity {
    pub const ALL: [RiskSeverity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Peso usado cuando el modelo no aporta una puntuación válida.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Low => 2.0,
            Self::Medium => 5.0,
            Self::High => 8.0,
            Self::Critical => 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProbability {
    Low,
    Medium,
    High,
}

impl RiskProbability {
    pub const ALL: [RiskProbability; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Self::Low => 0.3,
            Self::Medium => 0.6,
            Self::High => 0.9,
        }
    }
}

/// Cuerpo JSON tal y como llega por HTTP. Todos los campos son texto libre;
/// la validación tipada se hace en `document::validate_payload`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentPayload {
    #[serde(default)]
    pub document_content: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub company_scale: Option<String>,
    #[serde(default)]
    pub analysis_focus: Option<String>,
    /// Contenido del fichero en base64.
    #[serde(default)]
    pub file_data: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Fichero ya decodificado junto a su formato declarado.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePayload {
    pub bytes: Vec<u8>,
    pub kind: FileKind,
    pub filename: Option<String>,
}

/// Entrada validada de un análisis.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInput {
    pub document_content: Option<String>,
    pub file: Option<FilePayload>,
    pub document_type: DocumentType,
    pub industry: Option<String>,
    pub company_scale: CompanyScale,
    pub analysis_focus: Option<String>,
}

/// Riesgo validado y acotado, listo para el informe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifiedRisk {
    pub risk_id: String,
    pub title: String,
    pub description: String,
    pub category: RiskCategory,
    pub severity: RiskSeverity,
    pub probability: RiskProbability,
    pub risk_score: f64,
    pub impact_areas: Vec<String>,
    pub mitigation_recommendations: Vec<String>,
    pub context_evidence: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RiskDistribution {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl RiskDistribution {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskSummary {
    pub total_risks: usize,
    pub risk_distribution: RiskDistribution,
    pub top_categories: Vec<RiskCategory>,
    pub overall_risk_score: f64,
    pub key_concerns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry_insights: Option<String>,
}

/// Metadatos del documento en el momento del análisis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentAnalysis {
    pub document_type: DocumentType,
    pub industry: Option<String>,
    pub company_scale: CompanyScale,
    pub analysis_timestamp: DateTime<Utc>,
    /// Número de caracteres del texto resuelto.
    pub document_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAnalysisResponse {
    pub document_analysis: DocumentAnalysis,
    pub identified_risks: Vec<IdentifiedRisk>,
    pub risk_summary: RiskSummary,
    /// Segundos desde el inicio del análisis hasta el ensamblado del informe.
    pub processing_time: f64,
}

/// Cuerpo de las respuestas de error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}
