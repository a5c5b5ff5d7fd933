//! Request-side types: the immutable [`Document`] handed to the extractor
//! and the JSON payload shapes used by base64 clients.

use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical document kind produced by the format classifier.
///
/// Serialises as the `file_type` field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
    #[serde(rename = "doc")]
    LegacyDoc,
    Image,
    Unknown,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::LegacyDoc => "doc",
            DocumentKind::Image => "image",
            DocumentKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One input document. Immutable once built.
///
/// `Bytes` makes clones cheap so the content can be handed to blocking
/// worker threads without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    filename: String,
    content_type: Option<String>,
    language: Option<String>,
    bytes: Bytes,
}

impl Document {
    /// A raw upload.
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.filter(|c| !c.trim().is_empty()),
            language: None,
            bytes: bytes.into(),
        }
    }

    /// Decode a base64 payload into a document.
    ///
    /// Whitespace (including line wraps) is ignored and an optional
    /// `data:<mime>;base64,` prefix is stripped. Fails with
    /// [`ExtractError::InvalidEncoding`] before any extraction work.
    pub fn from_base64(
        filename: impl Into<String>,
        content_type: Option<String>,
        payload: &str,
    ) -> Result<Self, ExtractError> {
        let filename = filename.into();
        let bytes = decode_base64(payload).map_err(|detail| ExtractError::InvalidEncoding {
            filename: filename.clone(),
            detail,
        })?;
        Ok(Self::new(filename, content_type, bytes))
    }

    /// Attach an OCR language hint such as `"eng"` or `"eng+heb"`.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        let lang = language.into();
        self.language = if lang.trim().is_empty() {
            None
        } else {
            Some(lang)
        };
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, String> {
    let body = match payload.trim_start().strip_prefix("data:") {
        Some(rest) => match rest.split_once(";base64,") {
            Some((_, data)) => data,
            None => return Err("data URI without ';base64,' marker".to_string()),
        },
        None => payload,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err("payload is empty".to_string());
    }
    STANDARD.decode(compact.as_bytes()).map_err(|e| e.to_string())
}

/// JSON body of a single base64 extraction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base64Payload {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub base64_data: String,
    #[serde(default)]
    pub language: Option<String>,
}

impl Base64Payload {
    pub fn into_document(self) -> Result<Document, ExtractError> {
        let doc = Document::from_base64(self.filename, self.content_type, &self.base64_data)?;
        Ok(match self.language {
            Some(lang) => doc.with_language(lang),
            None => doc,
        })
    }
}

/// JSON body of a batch base64 extraction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchBase64Payload {
    pub files: Vec<Base64Payload>,
}
