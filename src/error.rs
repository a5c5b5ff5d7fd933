//! Error types for the edgequake-doc2text library.
//!
//! Three layers of failure, from widest to narrowest:
//!
//! * [`ExtractError`]: **Fatal** for one document (or for a whole call when
//!   the request itself is malformed). Returned as `Err(ExtractError)` from
//!   [`crate::Extractor::extract`] and stored per slot by the batch
//!   coordinator.
//!
//! * [`UnitError`]: **Non-fatal**: one page or image failed but the rest
//!   of the document is fine. Stored inside [`crate::output::ExtractionUnit`]
//!   and surfaced as a warning. The document only fails when every unit
//!   fails.
//!
//! * [`EngineError`] / [`ConversionError`]: what an external capability
//!   provider (OCR engine, office converter) reports. The orchestrator maps
//!   them onto the two layers above.
//!
//! Every failure maps onto a stable [`ErrorKind`] so API consumers can match
//! on a name rather than parse messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable, serialisable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    UnsupportedLanguage,
    InvalidEncoding,
    /// OCR or conversion backend unreachable. Retryable infrastructure
    /// condition, distinct from content errors.
    EngineUnavailable,
    ConversionTimeout,
    ConversionFailed,
    RecognitionFailed,
    ExtractionFailed,
    /// The request as a whole is malformed (empty batch, oversized payload).
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    /// The name used in JSON responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::UnsupportedLanguage => "UnsupportedLanguage",
            ErrorKind::InvalidEncoding => "InvalidEncoding",
            ErrorKind::EngineUnavailable => "EngineUnavailable",
            ErrorKind::ConversionTimeout => "ConversionTimeout",
            ErrorKind::ConversionFailed => "ConversionFailed",
            ErrorKind::RecognitionFailed => "RecognitionFailed",
            ErrorKind::ExtractionFailed => "ExtractionFailed",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::EngineUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All fatal errors returned by the edgequake-doc2text library.
///
/// Page-level failures use [`UnitError`] and are stored in
/// [`crate::output::ExtractionUnit`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The classifier could not map the document onto a supported kind.
    #[error("Unsupported file type: '{filename}' (declared: {declared})")]
    UnsupportedFormat { filename: String, declared: String },

    /// A requested OCR language is malformed or its pack is not installed.
    #[error("Unsupported OCR language '{language}': {reason}")]
    UnsupportedLanguage { language: String, reason: String },

    /// Base64 payload could not be decoded.
    #[error("Invalid base64 payload for '{filename}': {detail}")]
    InvalidEncoding { filename: String, detail: String },

    /// Malformed request: empty batch, too many documents, oversized payload.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Engine errors ─────────────────────────────────────────────────────
    /// OCR / conversion / rasterisation backend could not be reached.
    #[error("{engine} engine unavailable: {detail}")]
    EngineUnavailable { engine: String, detail: String },

    // ── Content errors ────────────────────────────────────────────────────
    /// Extraction ran but produced nothing usable.
    ///
    /// `stage` names the pipeline step that failed (`text-layer`,
    /// `conversion`, `ocr`, ...) and `kind` carries the stage-level
    /// classification when one exists (e.g. `ConversionTimeout`).
    #[error("Extraction failed for '{filename}' at {stage} stage: {detail}")]
    ExtractionFailed {
        filename: String,
        stage: &'static str,
        detail: String,
        cause: Option<ErrorKind>,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, runtime failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Stable classification for API responses.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ExtractError::UnsupportedLanguage { .. } => ErrorKind::UnsupportedLanguage,
            ExtractError::InvalidEncoding { .. } => ErrorKind::InvalidEncoding,
            ExtractError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ExtractError::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
            ExtractError::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            ExtractError::InvalidConfig(_) | ExtractError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stage-level cause of an `ExtractionFailed`, if any.
    pub fn cause_kind(&self) -> Option<ErrorKind> {
        match self {
            ExtractError::ExtractionFailed { cause, .. } => *cause,
            _ => None,
        }
    }
}

/// A non-fatal error for a single extraction unit.
///
/// The overall extraction continues unless ALL units fail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UnitError {
    /// Page rasterisation failed.
    #[error("Unit {ordinal}: rasterisation failed: {detail}")]
    RenderFailed { ordinal: usize, detail: String },

    /// The OCR engine ran but failed on this input.
    #[error("Unit {ordinal}: recognition failed: {detail}")]
    OcrFailed { ordinal: usize, detail: String },

    /// The OCR call exceeded its deadline and was killed.
    #[error("Unit {ordinal}: OCR timed out after {secs}s")]
    Timeout { ordinal: usize, secs: u64 },

    /// The OCR engine could not be reached for this unit.
    #[error("Unit {ordinal}: OCR engine unavailable: {detail}")]
    EngineUnavailable { ordinal: usize, detail: String },
}

impl UnitError {
    /// Build a unit error from what the OCR adapter reported.
    pub fn from_engine(ordinal: usize, err: EngineError) -> Self {
        match err {
            EngineError::Unavailable(detail) => UnitError::EngineUnavailable { ordinal, detail },
            EngineError::RecognitionFailed(detail) => UnitError::OcrFailed { ordinal, detail },
            EngineError::Timeout { secs } => UnitError::Timeout { ordinal, secs },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UnitError::RenderFailed { .. } => ErrorKind::ExtractionFailed,
            UnitError::OcrFailed { .. } | UnitError::Timeout { .. } => {
                ErrorKind::RecognitionFailed
            }
            UnitError::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
        }
    }
}

/// Failure reported by an OCR engine or the rasteriser backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Engine process/library not reachable (binary missing, library not bound).
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// Engine ran but errored on this input.
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    /// Engine call exceeded the configured deadline.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Failure reported by an office-document converter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The external converter did not finish in time and was killed.
    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The converter ran but did not produce a usable output.
    #[error("conversion failed: {0}")]
    Failed(String),

    /// The converter executable could not be started.
    #[error("converter unavailable: {0}")]
    Unavailable(String),
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::Timeout { .. } => ErrorKind::ConversionTimeout,
            ConversionError::Failed(_) => ErrorKind::ConversionFailed,
            ConversionError::Unavailable(_) => ErrorKind::EngineUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_display() {
        let e = ExtractError::UnsupportedFormat {
            filename: "notes.xyz".into(),
            declared: "application/octet-stream".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.xyz"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn extraction_failed_keeps_stage_cause() {
        let e = ExtractError::ExtractionFailed {
            filename: "old.doc".into(),
            stage: "conversion",
            detail: ConversionError::Timeout { secs: 30 }.to_string(),
            cause: Some(ErrorKind::ConversionTimeout),
        };
        assert_eq!(e.kind(), ErrorKind::ExtractionFailed);
        assert_eq!(e.cause_kind(), Some(ErrorKind::ConversionTimeout));
        assert!(e.to_string().contains("30s"));
        assert!(e.to_string().contains("conversion stage"));
    }

    #[test]
    fn unit_error_from_engine_timeout() {
        let e = UnitError::from_engine(2, EngineError::Timeout { secs: 60 });
        assert_eq!(e, UnitError::Timeout { ordinal: 2, secs: 60 });
        assert_eq!(e.kind(), ErrorKind::RecognitionFailed);
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn only_engine_outages_are_retryable() {
        assert!(ErrorKind::EngineUnavailable.is_retryable());
        assert!(!ErrorKind::ExtractionFailed.is_retryable());
        assert!(!ErrorKind::UnsupportedLanguage.is_retryable());
    }

    #[test]
    fn error_kind_serialises_as_stable_name() {
        let json = serde_json::to_string(&ErrorKind::ConversionTimeout).unwrap();
        assert_eq!(json, "\"ConversionTimeout\"");
        assert_eq!(ErrorKind::InvalidEncoding.to_string(), "InvalidEncoding");
    }

    #[test]
    fn conversion_error_kinds() {
        assert_eq!(
            ConversionError::Failed("exit 1".into()).kind(),
            ErrorKind::ConversionFailed
        );
        assert_eq!(
            ConversionError::Unavailable("not found".into()).kind(),
            ErrorKind::EngineUnavailable
        );
    }
}
