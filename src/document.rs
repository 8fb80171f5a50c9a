//! Validación de la entrada y resolución del texto del documento.
//!
//! Todo lo que puede rechazarse se rechaza aquí, antes de la llamada al LLM.

use base64::Engine as _;
use tracing::{info, warn};

use crate::{
    config::AnalysisLimits,
    error::AnalysisError,
    extract::{ExtractionError, TextExtractor},
    models::{CompanyScale, DocumentInput, DocumentPayload, DocumentType, FileKind, FilePayload},
};

pub const MIN_CONTENT_CHARS: usize = 50;
/// Mínimo de palabras para considerar completo un texto pegado directamente.
pub const MIN_CONTENT_WORDS: usize = 11;

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decodifica base64 tolerando prefijos `data:...;base64,` y saltos de línea.
pub fn decode_file_data(encoded: &str) -> Result<Vec<u8>, ExtractionError> {
    let data = match encoded.split_once("base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

/// Valida el cuerpo recibido y lo convierte en un `DocumentInput` tipado.
pub fn validate_payload(
    payload: DocumentPayload,
    limits: &AnalysisLimits,
) -> Result<DocumentInput, AnalysisError> {
    let document_type = match present(payload.document_type) {
        Some(raw) => DocumentType::parse(&raw).ok_or_else(|| {
            AnalysisError::input(format!(
                "document_type no soportado: '{raw}'. Valores permitidos: meeting_transcript, business_plan"
            ))
        })?,
        None => return Err(AnalysisError::input("document_type es obligatorio")),
    };

    let company_scale = match present(payload.company_scale) {
        Some(raw) => CompanyScale::parse(&raw).ok_or_else(|| {
            AnalysisError::input(format!(
                "company_scale no soportado: '{raw}'. Valores permitidos: startup, small, sme, medium, enterprise"
            ))
        })?,
        None => CompanyScale::default(),
    };

    let document_content = present(payload.document_content).map(|c| c.trim().to_string());
    let file_data = present(payload.file_data);
    let file_type = present(payload.file_type);
    let filename = present(payload.filename).map(|f| f.trim().to_string());

    if document_content.is_none() && file_data.is_none() {
        return Err(AnalysisError::input(
            "Debe proporcionarse document_content o file_data",
        ));
    }

    if let Some(content) = &document_content {
        let length = content.chars().count();
        if length < MIN_CONTENT_CHARS {
            return Err(AnalysisError::input(format!(
                "El contenido del documento debe tener al menos {MIN_CONTENT_CHARS} caracteres"
            )));
        }
        if length > limits.max_document_length {
            return Err(AnalysisError::DocumentTooLarge {
                length,
                max: limits.max_document_length,
                unit: "caracteres",
            });
        }
    }

    let file = match file_data {
        Some(encoded) => {
            let raw_kind = file_type.ok_or_else(|| {
                AnalysisError::input("file_type es obligatorio cuando se envía file_data")
            })?;
            let kind = FileKind::parse(&raw_kind).ok_or_else(|| {
                AnalysisError::input(format!(
                    "Tipo de fichero no soportado: '{raw_kind}'. Permitidos: pdf, txt, docx, doc"
                ))
            })?;
            let bytes = decode_file_data(&encoded)?;
            if bytes.len() > limits.max_upload_size {
                return Err(AnalysisError::DocumentTooLarge {
                    length: bytes.len(),
                    max: limits.max_upload_size,
                    unit: "bytes",
                });
            }
            Some(FilePayload {
                bytes,
                kind,
                filename,
            })
        }
        None => None,
    };

    match (&file, &document_content) {
        (Some(_), Some(_)) => {
            warn!("Se recibieron contenido y fichero; se analizará el fichero");
        }
        (None, Some(content)) => {
            if content.split_whitespace().count() < MIN_CONTENT_WORDS {
                return Err(AnalysisError::input(
                    "El contenido del documento parece incompleto o inválido",
                ));
            }
        }
        _ => {}
    }

    Ok(DocumentInput {
        document_content,
        file,
        document_type,
        industry: present(payload.industry).map(|v| v.trim().to_string()),
        company_scale,
        analysis_focus: present(payload.analysis_focus).map(|v| v.trim().to_string()),
    })
}

/// Devuelve el texto que se analizará. Si hay fichero, su texto sustituye al contenido pegado.
pub fn resolve_text(
    input: &DocumentInput,
    extractor: &dyn TextExtractor,
) -> Result<String, AnalysisError> {
    let text = match (&input.file, &input.document_content) {
        (Some(file), _) => {
            let extracted = extractor.extract(&file.bytes, file.kind, file.filename.as_deref())?;
            extracted.trim().to_string()
        }
        (None, Some(content)) => content.trim().to_string(),
        (None, None) => {
            return Err(AnalysisError::input(
                "Debe proporcionarse document_content o file_data",
            ))
        }
    };

    if text.chars().count() < MIN_CONTENT_CHARS {
        return Err(AnalysisError::input(format!(
            "El texto del documento es demasiado corto (mínimo {MIN_CONTENT_CHARS} caracteres)"
        )));
    }

    info!(
        "Documento resuelto: {} caracteres (origen: {})",
        text.chars().count(),
        if input.file.is_some() { "fichero" } else { "texto" }
    );
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const CONTENT: &str = "The board agreed to expand into three new markets next quarter \
                           despite having only two months of cash runway left.";

    struct StubExtractor(Result<&'static str, ()>);

    impl TextExtractor for StubExtractor {
        fn extract(
            &self,
            _bytes: &[u8],
            kind: FileKind,
            _filename: Option<&str>,
        ) -> Result<String, ExtractionError> {
            self.0
                .map(str::to_string)
                .map_err(|_| ExtractionError::NoText { kind })
        }
    }

    fn payload() -> DocumentPayload {
        DocumentPayload {
            document_content: Some(CONTENT.to_string()),
            document_type: Some("meeting_transcript".into()),
            ..Default::default()
        }
    }

    fn encode(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn inline_content_is_trimmed_and_scale_defaults_to_medium() {
        let mut p = payload();
        p.document_content = Some(format!("   {CONTENT}  \n"));
        let input = assert_ok!(validate_payload(p, &AnalysisLimits::default()));
        assert_eq!(input.document_content.as_deref(), Some(CONTENT));
        assert_eq!(input.company_scale, CompanyScale::Medium);
        assert_eq!(input.document_type, DocumentType::MeetingTranscript);
        assert!(input.file.is_none());
    }

    #[test]
    fn missing_both_sources_is_an_input_error() {
        let mut p = payload();
        p.document_content = Some("   ".into());
        p.file_data = Some(String::new());
        let err = assert_err!(validate_payload(p, &AnalysisLimits::default()));
        assert!(matches!(err, AnalysisError::Input(_)));
    }

    #[test]
    fn short_or_sparse_content_is_rejected() {
        let mut p = payload();
        p.document_content = Some("Too short to analyse.".into());
        assert!(matches!(
            validate_payload(p, &AnalysisLimits::default()),
            Err(AnalysisError::Input(_))
        ));

        let mut p = payload();
        p.document_content = Some("x".repeat(80));
        assert!(matches!(
            validate_payload(p, &AnalysisLimits::default()),
            Err(AnalysisError::Input(_))
        ));
    }

    #[test]
    fn oversized_inline_content_is_too_large() {
        let limits = AnalysisLimits {
            max_document_length: 60,
            ..AnalysisLimits::default()
        };
        let err = assert_err!(validate_payload(payload(), &limits));
        assert!(matches!(err, AnalysisError::DocumentTooLarge { max: 60, .. }));
    }

    #[test]
    fn file_requires_a_supported_kind() {
        let mut p = payload();
        p.document_content = None;
        p.file_data = Some(encode(b"hello"));
        assert!(matches!(
            validate_payload(p.clone(), &AnalysisLimits::default()),
            Err(AnalysisError::Input(_))
        ));

        p.file_type = Some("xlsx".into());
        assert!(matches!(
            validate_payload(p, &AnalysisLimits::default()),
            Err(AnalysisError::Input(_))
        ));
    }

    #[test]
    fn invalid_base64_is_an_extraction_error() {
        let mut p = payload();
        p.file_data = Some("%%% not base64 %%%".into());
        p.file_type = Some("txt".into());
        let err = assert_err!(validate_payload(p, &AnalysisLimits::default()));
        assert!(matches!(err, AnalysisError::Extraction(ExtractionError::InvalidBase64(_))));
    }

    #[test]
    fn data_url_prefix_and_line_breaks_are_tolerated() {
        let encoded = encode(b"plain text payload");
        let (head, tail) = encoded.split_at(8);
        let wrapped = format!("data:text/plain;base64,{head}\n{tail}");
        assert_eq!(decode_file_data(&wrapped).unwrap(), b"plain text payload");
    }

    #[test]
    fn oversized_upload_is_too_large() {
        let limits = AnalysisLimits {
            max_upload_size: 4,
            ..AnalysisLimits::default()
        };
        let mut p = payload();
        p.file_data = Some(encode(b"0123456789"));
        p.file_type = Some("txt".into());
        let err = assert_err!(validate_payload(p, &limits));
        assert!(matches!(err, AnalysisError::DocumentTooLarge { length: 10, .. }));
    }

    #[test]
    fn unknown_enums_are_input_errors_and_sme_is_small() {
        let mut p = payload();
        p.document_type = Some("memo".into());
        assert!(matches!(
            validate_payload(p, &AnalysisLimits::default()),
            Err(AnalysisError::Input(_))
        ));

        let mut p = payload();
        p.company_scale = Some("SME".into());
        let input = validate_payload(p, &AnalysisLimits::default()).unwrap();
        assert_eq!(input.company_scale, CompanyScale::Small);

        let mut p = payload();
        p.company_scale = Some("huge".into());
        assert!(matches!(
            validate_payload(p, &AnalysisLimits::default()),
            Err(AnalysisError::Input(_))
        ));
    }

    #[test]
    fn extracted_file_text_overrides_inline_content() {
        let mut p = payload();
        p.file_data = Some(encode(b"ignored by the stub"));
        p.file_type = Some("pdf".into());
        p.filename = Some("plan.pdf".into());
        let input = validate_payload(p, &AnalysisLimits::default()).unwrap();

        let extracted = "  Supplier concentration: 90% of components come from a single vendor.  ";
        let text = resolve_text(&input, &StubExtractor(Ok(extracted))).unwrap();
        assert_eq!(text, extracted.trim());
    }

    #[test]
    fn extraction_failures_and_short_extracts_propagate() {
        let mut p = payload();
        p.document_content = None;
        p.file_data = Some(encode(b"bytes"));
        p.file_type = Some("docx".into());
        let input = validate_payload(p, &AnalysisLimits::default()).unwrap();

        let err = assert_err!(resolve_text(&input, &StubExtractor(Err(()))));
        assert!(matches!(err, AnalysisError::Extraction(_)));

        let err = assert_err!(resolve_text(&input, &StubExtractor(Ok("tiny"))));
        assert!(matches!(err, AnalysisError::Input(_)));
    }

    #[test]
    fn inline_text_is_used_when_no_file_is_present() {
        let input = validate_payload(payload(), &AnalysisLimits::default()).unwrap();
        let text = resolve_text(&input, &StubExtractor(Err(()))).unwrap();
        assert_eq!(text, CONTENT);
    }
}
