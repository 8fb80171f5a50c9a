//! Taxonomía de errores del análisis y su traducción a respuestas HTTP.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use thiserror::Error;
use tracing::error;

use crate::{extract::ExtractionError, llm::UpstreamError, models::ErrorResponse};

/// Fallos de una petición de análisis. Todo o nada: nunca hay informe parcial.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Contenido ausente, demasiado corto o metadatos inválidos.
    #[error("{0}")]
    Input(String),

    #[error("Documento demasiado grande: {length} (máximo {max} {unit})")]
    DocumentTooLarge {
        length: usize,
        max: usize,
        unit: &'static str,
    },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// El objeto JSON llegó, pero `identified_risks` no es una lista.
    #[error("Formato de respuesta del LLM inválido: {0}")]
    ResponseFormat(String),
}

impl AnalysisError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input_error",
            Self::DocumentTooLarge { .. } => "document_too_large",
            Self::Extraction(_) => "extraction_error",
            Self::Upstream(_) => "upstream_error",
            Self::ResponseFormat(_) => "response_format_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Input(_) => StatusCode::BAD_REQUEST,
            Self::DocumentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream(UpstreamError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) | Self::ResponseFormat(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Error de la capa HTTP.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("Petición inválida: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Analysis(e) => e.status_code(),
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Analysis(e) => e.kind(),
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
        }
    }

    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.kind().to_string(),
            detail: Some(self.to_string()),
            timestamp: Utc::now(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}: {}", self.kind(), self);
        }
        let body = Json(self.body());
        match self {
            Self::Unauthorized(_) => {
                (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

/// Resultado usado por los handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn analysis_errors_map_to_client_or_server_statuses() {
        assert_eq!(AnalysisError::input("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AnalysisError::DocumentTooLarge { length: 10, max: 5, unit: "caracteres" }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AnalysisError::from(ExtractionError::Pdf("roto".into())).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AnalysisError::from(UpstreamError::Timeout(Duration::from_secs(1))).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AnalysisError::from(UpstreamError::NotAnObject).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AnalysisError::ResponseFormat("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn error_body_carries_kind_and_detail() {
        let err = ApiError::from(AnalysisError::input("Falta contenido"));
        let body = err.body();
        assert_eq!(body.error, "input_error");
        assert_eq!(body.detail.as_deref(), Some("Falta contenido"));
    }

    #[test]
    fn unauthorized_response_sets_bearer_challenge() {
        let response = ApiError::Unauthorized("API key inválida").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
