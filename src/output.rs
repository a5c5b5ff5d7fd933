//! Result types: per-unit outputs, per-document results, batch results and
//! the JSON response shapes built from them.

use crate::document::DocumentKind;
use crate::error::{ErrorKind, ExtractError, UnitError};
use serde::{Deserialize, Serialize};

/// Where a unit's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSource {
    /// Embedded text read without rasterising.
    TextLayer,
    /// Optical recognition over a rendered page or an uploaded image.
    Ocr,
    /// Text read from an office converter's output.
    Converted,
}

/// One atomic extractable region: a PDF page, an image, or a converted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionUnit {
    /// 0-based position in the source document.
    pub ordinal: usize,
    pub source: UnitSource,
    /// Extracted text. Empty when `error` is set.
    pub text: String,
    /// Set when the unit failed; the document may still succeed.
    pub error: Option<UnitError>,
    /// Degradations that did not fail the unit (e.g. pre-processing skipped).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ExtractionUnit {
    pub fn ok(ordinal: usize, source: UnitSource, text: impl Into<String>) -> Self {
        Self {
            ordinal,
            source,
            text: text.into(),
            error: None,
            notes: Vec::new(),
        }
    }

    pub fn failed(ordinal: usize, source: UnitSource, error: UnitError) -> Self {
        Self {
            ordinal,
            source,
            text: String::new(),
            error: Some(error),
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Overall outcome of a document that produced text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Every unit succeeded.
    Success,
    /// At least one unit failed; the text holds the rest.
    Partial,
}

/// Unit counts for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_units: usize,
    pub text_layer_units: usize,
    pub ocr_units: usize,
    pub failed_units: usize,
}

/// Aggregated output for one document.
///
/// Carries no timing data so two runs over the same bytes compare equal;
/// durations are reported through `tracing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub filename: String,
    pub kind: DocumentKind,
    /// Unit texts joined in ordinal order.
    pub text: String,
    /// Ordered by `ordinal`.
    pub units: Vec<ExtractionUnit>,
    /// One line per failed unit plus any document-level degradations.
    pub warnings: Vec<String>,
    pub status: ExtractionStatus,
    pub stats: ExtractionStats,
}

impl ExtractionResult {
    /// The `{filename, text, file_type}` response shape.
    pub fn to_response(&self) -> ExtractionResponse {
        ExtractionResponse::Success(SuccessResponse {
            filename: self.filename.clone(),
            text: self.text.clone(),
            file_type: self.kind,
            status: self.status,
            warnings: self.warnings.clone(),
        })
    }
}

/// Error descriptor stored in a failed batch slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub filename: String,
    pub error_kind: ErrorKind,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(filename: impl Into<String>, err: &ExtractError) -> Self {
        Self {
            filename: filename.into(),
            error_kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Successful single-document response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub filename: String,
    pub text: String,
    pub file_type: DocumentKind,
    pub status: ExtractionStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Either response shape, serialised without a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractionResponse {
    Success(SuccessResponse),
    Failure(ErrorDescriptor),
}

impl ExtractionResponse {
    pub fn from_outcome(filename: &str, outcome: &Result<ExtractionResult, ExtractError>) -> Self {
        match outcome {
            Ok(result) => result.to_response(),
            Err(e) => ExtractionResponse::Failure(ErrorDescriptor::new(filename, e)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionResponse::Success(_))
    }
}

/// One slot of a batch, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// 0-based submission index.
    pub index: usize,
    pub filename: String,
    pub outcome: Result<ExtractionResult, ErrorDescriptor>,
}

/// Ordered per-document outcomes of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// The `{"results": [...]}` response shape.
    pub fn to_response(&self) -> BatchResponse {
        BatchResponse {
            results: self
                .entries
                .iter()
                .map(|e| match &e.outcome {
                    Ok(result) => result.to_response(),
                    Err(desc) => ExtractionResponse::Failure(desc.clone()),
                })
                .collect(),
        }
    }
}

/// Batch response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<ExtractionResponse>,
}
