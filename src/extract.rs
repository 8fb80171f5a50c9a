//! Extracción de texto plano a partir de ficheros subidos (PDF, TXT, DOCX/DOC).
//!
//! El resultado de cada extractor se concatena con separadores visibles
//! (`--- Page N ---`, `--- Table ---`) para que el modelo conserve la estructura.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::FileKind;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Contenido base64 inválido: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Error procesando PDF: {0}")]
    Pdf(String),

    #[error("Error procesando DOCX: {0}")]
    Docx(String),

    #[error("No se encontró texto legible en el fichero {}", kind.as_str())]
    NoText { kind: FileKind },
}

/// Colaborador de extracción de texto. Síncrono y local.
pub trait TextExtractor: Send + Sync {
    fn extract(
        &self,
        bytes: &[u8],
        kind: FileKind,
        filename: Option<&str>,
    ) -> Result<String, ExtractionError>;
}

/// Extractor por defecto basado en `pdf-extract`, `zip` y `quick-xml`.
#[derive(Debug, Clone, Default)]
pub struct FileTextExtractor;

impl TextExtractor for FileTextExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        kind: FileKind,
        filename: Option<&str>,
    ) -> Result<String, ExtractionError> {
        info!(
            "Procesando fichero {} '{}' ({} bytes)",
            kind.as_str().to_uppercase(),
            filename.unwrap_or("sin nombre"),
            bytes.len()
        );

        let text = match kind {
            FileKind::Pdf => extract_pdf_text(bytes)?,
            FileKind::Txt => decode_plain_text(bytes),
            FileKind::Docx | FileKind::Doc => extract_docx_text(bytes)?,
        };

        if text.trim().is_empty() {
            return Err(ExtractionError::NoText { kind });
        }

        info!("Extraídos {} caracteres del fichero {}", text.chars().count(), kind.as_str());
        Ok(text)
    }
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    // pdf-extract puede hacer panic con PDFs corruptos.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractionError::Pdf("el fichero PDF está corrupto".to_string()))?
        .map_err(|e| ExtractionError::Pdf(e.to_string()))?;

    let sections: Vec<String> = pages
        .iter()
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(index, page)| format!("--- Page {} ---\n{}", index + 1, page.trim_end()))
        .collect();

    Ok(sections.join("\n\n"))
}

/// Codificaciones probadas en orden para ficheros de texto plano.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    Utf8,
    Utf16,
    Latin1,
}

const TEXT_ENCODINGS: [TextEncoding; 3] =
    [TextEncoding::Utf8, TextEncoding::Utf16, TextEncoding::Latin1];

impl TextEncoding {
    fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => {
                let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                std::str::from_utf8(bytes).ok().map(str::to_string)
            }
            Self::Utf16 => decode_utf16_with_bom(bytes),
            // Latin-1 asigna cada byte a su punto de código; nunca falla.
            Self::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

fn decode_utf16_with_bom(bytes: &[u8]) -> Option<String> {
    let (little_endian, body) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => return None,
    };
    if body.len() % 2 != 0 {
        return None;
    }
    let units = body.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

fn decode_plain_text(bytes: &[u8]) -> String {
    for encoding in TEXT_ENCODINGS {
        if let Some(text) = encoding.decode(bytes) {
            info!("TXT decodificado con {:?}", encoding);
            return text;
        }
    }
    // Inalcanzable: Latin-1 siempre decodifica.
    String::new()
}

fn extract_docx_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::Docx(format!("no es un paquete OOXML válido: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionError::Docx(format!("falta word/document.xml: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractionError::Docx(e.to_string()))?;

    docx_xml_to_text(&xml)
}

/// Recorre `word/document.xml` y devuelve párrafos y tablas en orden de documento.
fn docx_xml_to_text(xml: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);

    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut in_text_run = false;

    let mut table_depth = 0usize;
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ExtractionError::Docx(format!("XML inválido: {e}")))?;

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => paragraph.clear(),
                b"t" => in_text_run = true,
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        rows.clear();
                    }
                }
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" => paragraph.push('\n'),
                _ => {}
            },
            Event::Text(e) if in_text_run => {
                let text = e
                    .unescape()
                    .map_err(|e| ExtractionError::Docx(format!("texto inválido: {e}")))?;
                paragraph.push_str(&text);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        if table_depth == 0 {
                            blocks.push(text.to_string());
                        } else {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(text);
                        }
                    }
                    paragraph.clear();
                }
                b"tc" if table_depth == 1 => {
                    let text = cell.trim();
                    if !text.is_empty() {
                        row.push(text.to_string());
                    }
                    cell.clear();
                }
                b"tr" if table_depth == 1 => {
                    if !row.is_empty() {
                        rows.push(row.join(" | "));
                    }
                    row.clear();
                }
                b"tbl" => {
                    if table_depth == 1 && !rows.is_empty() {
                        blocks.push(format!("\n--- Table ---\n{}", rows.join("\n")));
                    }
                    table_depth = table_depth.saturating_sub(1);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if table_depth != 0 {
        warn!("document.xml termina con una tabla sin cerrar");
    }

    Ok(blocks.join("\n\n"))
}
