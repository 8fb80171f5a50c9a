//! Construcción determinista de las instrucciones enviadas al LLM.

use crate::models::{CompanyScale, DocumentInput, DocumentType};

const DEFAULT_INDUSTRY: &str = "General Business";
const DEFAULT_FOCUS: &str = "Comprehensive risk assessment";

/// Instrucción de sistema. Define el rol, la fórmula de puntuación y la forma
/// exacta del JSON esperado; el normalizador tolera desviaciones.
pub const SYSTEM_PROMPT: &str = r#"You are an expert business risk analyst with deep knowledge across multiple industries. Your task is to analyze business documents and identify potential risks with high accuracy and actionable insights.

ANALYSIS FRAMEWORK:
- Consider industry-specific risks and market dynamics
- Evaluate operational, financial, strategic, regulatory, and market risks
- Assess probability and impact based on document evidence
- Provide specific, actionable mitigation strategies

RISK SCORING METHODOLOGY:
- Risk Score = (Probability × Impact × Urgency) / 10
- Scale: 0-10 (0=negligible, 10=critical/immediate action required)
- Consider both quantitative and qualitative factors

OUTPUT REQUIREMENTS:
- Return ONLY valid JSON format
- Include specific evidence quotes from the document
- Provide concrete, implementable recommendations
- Focus on the most significant risks

RESPONSE FORMAT:
{
    "identified_risks": [
        {
            "risk_id": "RISK_001",
            "title": "Concise Risk Title",
            "description": "Detailed risk description with context",
            "category": "market|operational|financial|regulatory|strategic|technology|legal",
            "severity": "low|medium|high|critical",
            "probability": "low|medium|high",
            "risk_score": 7.5,
            "impact_areas": ["specific area 1", "specific area 2"],
            "mitigation_recommendations": ["specific action 1", "specific action 2"],
            "context_evidence": "Direct quote from document"
        }
    ],
    "key_concerns": ["primary concern 1", "primary concern 2"],
    "industry_insights": "Industry-specific risk considerations"
}"#;

/// Par de instrucciones listo para el colaborador de completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskPrompt {
    pub system: String,
    pub user: String,
}

fn document_label(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::MeetingTranscript => "Meeting Transcript",
        DocumentType::BusinessPlan => "Business Plan",
    }
}

fn scale_label(scale: CompanyScale) -> &'static str {
    match scale {
        CompanyScale::Startup => "Startup",
        CompanyScale::Small => "Small business (SME)",
        CompanyScale::Medium => "Medium-sized company",
        CompanyScale::Enterprise => "Enterprise",
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Genera las instrucciones a partir de la entrada, el texto resuelto y los umbrales.
pub fn build_risk_prompt(
    input: &DocumentInput,
    document_text: &str,
    max_risks: usize,
    min_risk_score: f64,
) -> RiskPrompt {
    let industry = non_blank(&input.industry).unwrap_or(DEFAULT_INDUSTRY);
    let focus = non_blank(&input.analysis_focus).unwrap_or(DEFAULT_FOCUS);

    let user = format!(
        "Analyze the following {document} for business risks.\n\n\
         CONTEXT:\n\
         - Document Type: {document}\n\
         - Industry: {industry}\n\
         - Company Scale: {scale}\n\
         - Analysis Focus: {focus}\n\n\
         INSTRUCTIONS:\n\
         - Identify the top {max_risks} most significant risks\n\
         - Only include risks with a minimum score of {min_risk_score:.1}\n\
         - Support every risk with evidence quoted from the document\n\
         - Return the result in the exact JSON format described in the system instructions\n\n\
         DOCUMENT CONTENT:\n\
         ---\n\
         {document_text}\n\
         ---",
        document = document_label(input.document_type),
        scale = scale_label(input.company_scale),
    );

    RiskPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(industry: Option<&str>, focus: Option<&str>) -> DocumentInput {
        DocumentInput {
            document_content: Some("irrelevant".into()),
            file: None,
            document_type: DocumentType::BusinessPlan,
            industry: industry.map(str::to_string),
            company_scale: CompanyScale::Startup,
            analysis_focus: focus.map(str::to_string),
        }
    }

    #[test]
    fn user_prompt_interpolates_context_and_limits() {
        let prompt = build_risk_prompt(
            &input(Some("Fintech"), Some("cash flow")),
            "We will burn all our cash by Q3.",
            7,
            4.5,
        );

        assert!(prompt.user.contains("- Industry: Fintech"));
        assert!(prompt.user.contains("- Company Scale: Startup"));
        assert!(prompt.user.contains("- Analysis Focus: cash flow"));
        assert!(prompt.user.contains("top 7 most significant risks"));
        assert!(prompt.user.contains("minimum score of 4.5"));
        assert!(prompt.user.contains("We will burn all our cash by Q3."));
        assert!(prompt.user.starts_with("Analyze the following Business Plan"));
    }

    #[test]
    fn missing_or_blank_context_uses_defaults() {
        let prompt = build_risk_prompt(&input(None, Some("   ")), "text", 10, 3.0);
        assert!(prompt.user.contains("- Industry: General Business"));
        assert!(prompt.user.contains("- Analysis Focus: Comprehensive risk assessment"));
        assert!(prompt.user.contains("minimum score of 3.0"));
    }

    #[test]
    fn system_prompt_declares_the_expected_contract() {
        let prompt = build_risk_prompt(&input(None, None), "text", 10, 3.0);
        for field in [
            "\"identified_risks\"",
            "\"risk_id\"",
            "\"risk_score\"",
            "\"impact_areas\"",
            "\"mitigation_recommendations\"",
            "\"context_evidence\"",
            "\"key_concerns\"",
            "\"industry_insights\"",
            "market|operational|financial|regulatory|strategic|technology|legal",
            "low|medium|high|critical",
        ] {
            assert!(prompt.system.contains(field), "falta {field}");
        }
    }

    #[test]
    fn prompt_building_is_deterministic() {
        let a = build_risk_prompt(&input(Some("Retail"), None), "same text", 5, 3.0);
        let b = build_risk_prompt(&input(Some("Retail"), None), "same text", 5, 3.0);
        assert_eq!(a, b);
    }
}
