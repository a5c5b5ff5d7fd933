//! Aggregation: ordered units → one [`ExtractionResult`], or the document
//! error when nothing survived.

use crate::document::DocumentKind;
use crate::error::{ExtractError, UnitError};
use crate::output::{ExtractionResult, ExtractionStats, ExtractionStatus, ExtractionUnit, UnitSource};

/// Join unit texts and derive status, warnings and counts.
///
/// Units are sorted by ordinal first, so callers may hand them over in
/// completion order. Units with no text contribute nothing to `text`
/// (no doubled separators). Fails when there are no units at all or when
/// every unit failed; a document whose every failure was an engine outage
/// reports `EngineUnavailable` instead of `ExtractionFailed`.
pub fn assemble(
    filename: &str,
    kind: DocumentKind,
    mut units: Vec<ExtractionUnit>,
    separator: &str,
    mut warnings: Vec<String>,
) -> Result<ExtractionResult, ExtractError> {
    units.sort_by_key(|u| u.ordinal);

    if units.is_empty() {
        return Err(ExtractError::ExtractionFailed {
            filename: filename.to_string(),
            stage: "text-layer",
            detail: "document has no pages or content".to_string(),
            cause: None,
        });
    }

    let failures: Vec<&UnitError> = units.iter().filter_map(|u| u.error.as_ref()).collect();
    if failures.len() == units.len() {
        return Err(all_failed(filename, &failures));
    }

    for unit in &units {
        if let Some(ref e) = unit.error {
            warnings.push(e.to_string());
        }
        for note in &unit.notes {
            warnings.push(format!("Unit {}: {}", unit.ordinal, note));
        }
    }

    let text = units
        .iter()
        .filter(|u| !u.text.trim().is_empty())
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join(separator);

    let stats = ExtractionStats {
        total_units: units.len(),
        text_layer_units: count(&units, UnitSource::TextLayer),
        ocr_units: count(&units, UnitSource::Ocr),
        failed_units: failures.len(),
    };
    let status = if failures.is_empty() {
        ExtractionStatus::Success
    } else {
        ExtractionStatus::Partial
    };

    Ok(ExtractionResult {
        filename: filename.to_string(),
        kind,
        text,
        units,
        warnings,
        status,
        stats,
    })
}

fn count(units: &[ExtractionUnit], source: UnitSource) -> usize {
    units
        .iter()
        .filter(|u| u.source == source && u.is_ok())
        .count()
}

fn all_failed(filename: &str, failures: &[&UnitError]) -> ExtractError {
    let first = failures[0];
    if failures
        .iter()
        .all(|e| matches!(e, UnitError::EngineUnavailable { .. }))
    {
        return ExtractError::EngineUnavailable {
            engine: "ocr".to_string(),
            detail: first.to_string(),
        };
    }

    let stage = match first {
        UnitError::RenderFailed { .. } => "rasterisation",
        _ => "ocr",
    };
    let cause = first.kind();
    let same_cause = failures.iter().all(|e| e.kind() == cause);
    ExtractError::ExtractionFailed {
        filename: filename.to_string(),
        stage,
        detail: format!("all {} units failed; first: {}", failures.len(), first),
        cause: same_cause.then_some(cause),
    }
}
