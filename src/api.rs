use std::time::Instant;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Json, Multipart, Request, State},
    http::{header, HeaderMap},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    app_state::{AppState, ServiceStats},
    document,
    error::{AnalysisError, ApiError, ApiResult},
    models::{
        CompanyScale, DocumentPayload, DocumentType, FileKind, RiskAnalysisResponse, RiskCategory,
        RiskProbability, RiskSeverity,
    },
};

// --- Payloads y Respuestas de la API ---

#[derive(Debug, Deserialize)]
pub struct FileProcessRequest {
    pub file_data: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileProcessResponse {
    pub success: bool,
    pub filename: Option<String>,
    pub file_type: FileKind,
    pub file_size_mb: f64,
    pub processing_time_ms: f64,
    pub extracted_text: String,
    pub text_length: usize,
    pub word_count: usize,
    pub line_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub document_type: DocumentType,
    pub industry: Option<String>,
    pub company_scale: CompanyScale,
    pub source: &'static str,
    pub document_length: usize,
    pub word_count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub requests: ServiceStats,
    pub configuration: Value,
    pub supported_features: Vec<&'static str>,
}

const FEATURES: [&str; 6] = [
    "document_risk_analysis",
    "meeting_transcript_analysis",
    "business_plan_analysis",
    "pdf_docx_txt_extraction",
    "risk_scoring_and_prioritization",
    "mitigation_recommendations",
];

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    // El base64 ocupa ~4/3 del fichero original.
    let body_limit = app_state.config.limits.max_upload_size.saturating_mul(2);

    let protected = Router::new()
        .route("/api/v1/info", get(info_handler))
        .route("/api/v1/analyze", post(analyze_handler))
        .route("/api/v1/validate", post(validate_handler))
        .route("/api/v1/stats", get(stats_handler))
        .route(
            "/api/v1/file-processor/process-base64",
            post(process_base64_handler),
        )
        .route(
            "/api/v1/file-processor/process-upload",
            post(process_upload_handler),
        )
        .route(
            "/api/v1/file-processor/supported-formats",
            get(supported_formats_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_http_request))
        .with_state(app_state)
}

// --- Middleware ---

async fn log_http_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();
    let response = next.run(req).await;
    info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Petición HTTP"
    );
    response
}

/// Comprueba la cabecera `Authorization: Bearer <API_KEY>`.
pub fn check_bearer(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    if !state.config.api_key_required {
        return Ok(());
    }
    let expected = state
        .config
        .api_key
        .as_deref()
        .ok_or(ApiError::Unauthorized("API key no configurada en el servidor"))?;

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(ApiError::Unauthorized("Falta la cabecera Authorization: Bearer"))?;

    if provided != expected {
        warn!("Intento de acceso con API key inválida");
        return Err(ApiError::Unauthorized("API key inválida"));
    }
    Ok(())
}

async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check_bearer(req.headers(), &state)?;
    Ok(next.run(req).await)
}

// --- Handlers ---

#[axum::debug_handler]
async fn root_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "Document Risk Analyzer",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment.as_str(),
        "endpoints": {
            "health": "/health",
            "info": "/api/v1/info",
            "analyze": "/api/v1/analyze",
            "validate": "/api/v1/validate",
            "stats": "/api/v1/stats",
            "file_processor": "/api/v1/file-processor",
        },
    }))
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let health = state.engine.health_check().await;
    let limits = &state.config.limits;
    Json(json!({
        "status": health.status,
        "timestamp": health.timestamp,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment.as_str(),
        "llm": {
            "provider": state.config.completion.provider.as_str(),
            "model": health.model,
            "connection": health.llm_connection,
            "error": health.error,
        },
        "limits": {
            "max_risks": limits.max_risks,
            "min_risk_score": limits.min_risk_score,
            "max_document_length": limits.max_document_length,
        },
    }))
}

#[axum::debug_handler]
async fn info_handler(State(state): State<AppState>) -> Json<Value> {
    let limits = &state.config.limits;
    Json(json!({
        "name": "Document Risk Analyzer API",
        "version": env!("CARGO_PKG_VERSION"),
        "features": FEATURES,
        "document_types": DocumentType::ALL.map(|t| t.as_str()),
        "company_scales": CompanyScale::ALL.map(|s| s.as_str()),
        "risk_categories": RiskCategory::ALL.map(|c| c.as_str()),
        "severity_levels": RiskSeverity::ALL.map(|s| s.as_str()),
        "probability_levels": RiskProbability::ALL.map(|p| p.as_str()),
        "file_types": FileKind::ALL.map(|k| k.as_str()),
        "limits": {
            "max_risks": limits.max_risks,
            "min_risk_score": limits.min_risk_score,
            "max_document_length": limits.max_document_length,
            "max_upload_size": limits.max_upload_size,
        },
        "model": state.engine.model_name(),
    }))
}

#[axum::debug_handler]
async fn analyze_handler(
    State(state): State<AppState>,
    payload: Result<Json<DocumentPayload>, JsonRejection>,
) -> ApiResult<Json<RiskAnalysisResponse>> {
    let Json(payload) = payload?;

    let result = match document::validate_payload(payload, &state.config.limits) {
        Ok(input) => state.engine.analyze(input).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => {
            state.record(|s| s.analyses_completed += 1);
            Ok(Json(response))
        }
        Err(e) => {
            state.record(|s| s.analyses_failed += 1);
            warn!("Análisis rechazado ({}): {}", e.kind(), e);
            Err(e.into())
        }
    }
}

#[axum::debug_handler]
async fn validate_handler(
    State(state): State<AppState>,
    payload: Result<Json<DocumentPayload>, JsonRejection>,
) -> ApiResult<Json<ValidationResponse>> {
    let Json(payload) = payload?;
    let input = document::validate_payload(payload, &state.config.limits)?;
    let text = document::resolve_text(&input, state.engine.extractor())?;

    Ok(Json(ValidationResponse {
        valid: true,
        document_type: input.document_type,
        industry: input.industry,
        company_scale: input.company_scale,
        source: if input.file.is_some() { "file" } else { "text" },
        document_length: text.chars().count(),
        word_count: text.split_whitespace().count(),
    }))
}

#[axum::debug_handler]
async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let config = &state.config;
    Json(StatsResponse {
        uptime_seconds: state.started_at.elapsed().as_secs(),
        requests: state.stats_snapshot(),
        configuration: json!({
            "environment": config.environment.as_str(),
            "llm_provider": config.completion.provider.as_str(),
            "model": state.engine.model_name(),
            "max_tokens": config.completion.max_tokens,
            "temperature": config.completion.temperature,
            "timeout_secs": config.completion.timeout.as_secs(),
            "max_risks": config.limits.max_risks,
            "min_risk_score": config.limits.min_risk_score,
            "max_document_length": config.limits.max_document_length,
            "api_key_required": config.api_key_required,
        }),
        supported_features: FEATURES.to_vec(),
    })
}

#[axum::debug_handler]
async fn process_base64_handler(
    State(state): State<AppState>,
    payload: Result<Json<FileProcessRequest>, JsonRejection>,
) -> ApiResult<Json<FileProcessResponse>> {
    let Json(request) = payload?;
    let filename = request.filename.filter(|f| !f.trim().is_empty());
    let kind = resolve_kind(request.file_type.as_deref(), filename.as_deref())?;

    let started = Instant::now();
    let bytes = match document::decode_file_data(&request.file_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Ok(Json(failed_extraction(filename, kind, 0, started, e.to_string())));
        }
    };

    process_file(&state, &bytes, kind, filename, started).map(Json)
}

#[axum::debug_handler]
async fn process_upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<FileProcessResponse>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let kind = resolve_kind(None, filename.as_deref())?;
        let started = Instant::now();
        let bytes = field.bytes().await?;
        return process_file(&state, &bytes, kind, filename, started).map(Json);
    }

    Err(ApiError::BadRequest(
        "El formulario debe incluir el campo 'file'".to_string(),
    ))
}

#[axum::debug_handler]
async fn supported_formats_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "supported_formats": [
            {"extension": "pdf", "description": "Documentos PDF con texto extraíble"},
            {"extension": "docx", "description": "Documentos de Microsoft Word (2007+)"},
            {"extension": "doc", "description": "Documentos de Word; solo los guardados en formato OOXML"},
            {"extension": "txt", "description": "Texto plano (UTF-8, UTF-16 con BOM o Latin-1)"},
        ],
        "max_file_size_mb": bytes_to_mb(state.config.limits.max_upload_size),
        "encoding": "base64 o multipart/form-data",
    }))
}

// --- Utilidades ---

fn resolve_kind(file_type: Option<&str>, filename: Option<&str>) -> Result<FileKind, ApiError> {
    let declared = file_type.map(str::trim).filter(|t| !t.is_empty());
    let kind = match declared {
        Some(raw) => FileKind::parse(raw),
        None => filename.and_then(FileKind::from_filename),
    };
    kind.ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Tipo de fichero no soportado o ausente: '{}'. Permitidos: pdf, txt, docx, doc",
            declared.or(filename).unwrap_or("")
        ))
    })
}

fn bytes_to_mb(bytes: usize) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

fn failed_extraction(
    filename: Option<String>,
    kind: FileKind,
    size: usize,
    started: Instant,
    message: String,
) -> FileProcessResponse {
    FileProcessResponse {
        success: false,
        filename,
        file_type: kind,
        file_size_mb: bytes_to_mb(size),
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        extracted_text: String::new(),
        text_length: 0,
        word_count: 0,
        line_count: 0,
        error_message: Some(message),
    }
}

/// Extrae el texto de un fichero. Los fallos de extracción se devuelven en el
/// cuerpo con `success: false`; el tamaño excesivo es un error HTTP.
fn process_file(
    state: &AppState,
    bytes: &[u8],
    kind: FileKind,
    filename: Option<String>,
    started: Instant,
) -> ApiResult<FileProcessResponse> {
    let max = state.config.limits.max_upload_size;
    if bytes.len() > max {
        return Err(AnalysisError::DocumentTooLarge {
            length: bytes.len(),
            max,
            unit: "bytes",
        }
        .into());
    }

    let extracted = state
        .engine
        .extractor()
        .extract(bytes, kind, filename.as_deref());
    state.record(|s| s.files_processed += 1);

    let text = match extracted {
        Ok(text) => text,
        Err(e) => {
            warn!("Fallo extrayendo texto de {}: {}", kind.as_str(), e);
            return Ok(failed_extraction(filename, kind, bytes.len(), started, e.to_string()));
        }
    };

    Ok(FileProcessResponse {
        success: true,
        filename,
        file_type: kind,
        file_size_mb: bytes_to_mb(bytes.len()),
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        text_length: text.chars().count(),
        word_count: text.split_whitespace().count(),
        line_count: text.lines().count(),
        extracted_text: text,
        error_message: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::tests::{engine, ScriptedCompleter, CONTENT},
        config::AppConfig,
    };
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use base64::Engine as _;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::assert_err;

    fn state_with(completer: ScriptedCompleter, key_required: bool) -> AppState {
        let config = AppConfig::from_lookup(|key| match key {
            "API_KEY" => Some("secret".to_string()),
            "API_KEY_REQUIRED" => Some(key_required.to_string()),
            _ => None,
        })
        .unwrap();
        AppState::new(config, engine(Arc::new(completer)))
    }

    fn state() -> AppState {
        state_with(
            ScriptedCompleter::replying(json!({
                "identified_risks": [
                    {"title": "Supplier concentration", "severity": "high", "probability": "high",
                     "description": "Ninety percent of components come from one vendor."}
                ]
            })),
            true,
        )
    }

    fn payload() -> DocumentPayload {
        DocumentPayload {
            document_content: Some(CONTENT.to_string()),
            document_type: Some("meeting_transcript".into()),
            ..Default::default()
        }
    }

    #[test]
    fn router_builds_without_route_conflicts() {
        let _ = create_router(state());
    }

    #[test]
    fn bearer_check_accepts_only_the_configured_key() {
        let state = state();
        let mut headers = HeaderMap::new();
        assert!(matches!(
            check_bearer(&headers, &state),
            Err(ApiError::Unauthorized(_))
        ));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert_err!(check_bearer(&headers, &state));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(check_bearer(&headers, &state).is_ok());
    }

    #[test]
    fn bearer_check_is_skipped_when_disabled() {
        let state = state_with(ScriptedCompleter::replying(json!({})), false);
        assert!(check_bearer(&HeaderMap::new(), &state).is_ok());
    }

    #[tokio::test]
    async fn analyze_returns_report_and_counts_it() {
        let state = state();
        let Json(report) = analyze_handler(State(state.clone()), Ok(Json(payload())))
            .await
            .unwrap();

        assert_eq!(report.identified_risks.len(), 1);
        assert_eq!(report.identified_risks[0].risk_id, "RISK_001");
        assert_eq!(report.identified_risks[0].risk_score, 7.2);
        assert_eq!(state.stats_snapshot().analyses_completed, 1);
    }

    #[tokio::test]
    async fn analyze_rejects_invalid_input_with_400() {
        let state = state();
        let mut p = payload();
        p.document_type = None;

        let err = analyze_handler(State(state.clone()), Ok(Json(p)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.stats_snapshot().analyses_failed, 1);
    }

    #[tokio::test]
    async fn validate_echoes_metadata_without_calling_the_model() {
        let completer = ScriptedCompleter::replying(json!({}));
        let state = state_with(completer, true);
        let mut p = payload();
        p.company_scale = Some("sme".into());
        p.industry = Some(" Retail ".into());

        let Json(validation) = validate_handler(State(state), Ok(Json(p))).await.unwrap();
        assert!(validation.valid);
        assert_eq!(validation.company_scale, CompanyScale::Small);
        assert_eq!(validation.industry.as_deref(), Some("Retail"));
        assert_eq!(validation.source, "text");
        assert_eq!(validation.document_length, CONTENT.chars().count());
    }

    #[tokio::test]
    async fn base64_processing_reports_text_stats() {
        let text = "first line of the memo\nsecond line";
        let request = FileProcessRequest {
            file_data: base64::engine::general_purpose::STANDARD.encode(text),
            file_type: None,
            filename: Some("memo.txt".into()),
        };

        let Json(response) = process_base64_handler(State(state()), Ok(Json(request)))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.file_type, FileKind::Txt);
        assert_eq!(response.word_count, 7);
        assert_eq!(response.line_count, 2);
        assert_eq!(response.text_length, text.chars().count());
        assert!(response.error_message.is_none());
    }

    #[tokio::test]
    async fn extraction_failures_are_reported_in_the_body() {
        let request = FileProcessRequest {
            file_data: base64::engine::general_purpose::STANDARD.encode(b"not a pdf"),
            file_type: Some("pdf".into()),
            filename: None,
        };

        let Json(response) = process_base64_handler(State(state()), Ok(Json(request)))
            .await
            .unwrap();
        assert!(!response.success);
        assert!(response.extracted_text.is_empty());
        assert!(response.error_message.is_some());
    }

    #[tokio::test]
    async fn unknown_file_kinds_are_bad_requests() {
        let request = FileProcessRequest {
            file_data: "aGVsbG8=".into(),
            file_type: None,
            filename: Some("sheet.xlsx".into()),
        };
        let err = process_base64_handler(State(state()), Ok(Json(request)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn health_is_reported_even_when_the_model_fails() {
        let state = state_with(
            ScriptedCompleter::failing(|| crate::llm::UpstreamError::Provider("down".into())),
            true,
        );
        let Json(body) = health_handler(State(state)).await;
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["llm"]["connection"], false);
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn sizes_are_reported_in_megabytes() {
        assert_eq!(bytes_to_mb(10 * 1024 * 1024), 10.0);
        assert_eq!(bytes_to_mb(1536 * 1024), 1.5);
    }

    /// Sirve el router en un puerto efímero y devuelve la respuesta HTTP en bruto.
    async fn send_raw(state: AppState, request: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn get_request(path: &str, authorization: Option<&str>) -> String {
        let auth = authorization
            .map(|value| format!("Authorization: {value}\r\n"))
            .unwrap_or_default();
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n{auth}Connection: close\r\n\r\n")
    }

    fn multipart_request(field: &str, filename: &str, content: &str) -> String {
        let body = format!(
            "--XBOUNDARY\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {content}\r\n\
             --XBOUNDARY--\r\n"
        );
        format!(
            "POST /api/v1/file-processor/process-upload HTTP/1.1\r\n\
             Host: localhost\r\n\
             Authorization: Bearer secret\r\n\
             Content-Type: multipart/form-data; boundary=XBOUNDARY\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn protected_routes_require_the_bearer_key() {
        let response = send_raw(state(), get_request("/api/v1/info", None)).await;
        assert!(response.starts_with("HTTP/1.1 401"), "{response}");
        assert!(response.to_lowercase().contains("www-authenticate: bearer"));
        assert!(response.contains("\"error\":\"unauthorized\""));

        let response = send_raw(state(), get_request("/api/v1/info", Some("Bearer wrong"))).await;
        assert!(response.starts_with("HTTP/1.1 401"), "{response}");

        let response = send_raw(state(), get_request("/api/v1/info", Some("Bearer secret"))).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    }

    #[tokio::test]
    async fn public_routes_skip_the_bearer_check() {
        let response = send_raw(state(), get_request("/", None)).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    }

    #[tokio::test]
    async fn multipart_upload_extracts_the_file_field() {
        let state = state();
        let request = multipart_request("file", "memo.txt", "first line of the memo\nsecond line");
        let response = send_raw(state.clone(), request).await;

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("\"success\":true"));
        assert!(response.contains("\"filename\":\"memo.txt\""));
        assert!(response.contains("\"file_type\":\"txt\""));
        assert!(response.contains("\"word_count\":7"));
        assert!(response.contains("\"line_count\":2"));
        assert_eq!(state.stats_snapshot().files_processed, 1);
    }

    #[tokio::test]
    async fn multipart_upload_without_file_field_is_a_bad_request() {
        let request = multipart_request("attachment", "memo.txt", "some text here");
        let response = send_raw(state(), request).await;

        assert!(response.starts_with("HTTP/1.1 400"), "{response}");
        assert!(response.contains("\"error\":\"bad_request\""));
    }
}
