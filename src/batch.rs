//! Batch coordinator: bounded fan-out over independent documents.
//!
//! Each document runs as its own task on a [`JoinSet`], gated by a
//! per-call semaphore. Failures and panics are captured into the
//! document's slot, so one bad upload never takes the batch down. Results
//! are reassembled by submission index.

use crate::document::{BatchBase64Payload, Document};
use crate::error::ExtractError;
use crate::extract::Extractor;
use crate::output::{BatchEntry, BatchResult, ErrorDescriptor, ExtractionResult};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// An ordered set of documents extracted together.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub documents: Vec<Document>,
}

impl BatchRequest {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.documents.iter().map(Document::len).sum()
    }
}

impl From<Vec<Document>> for BatchRequest {
    fn from(documents: Vec<Document>) -> Self {
        Self::new(documents)
    }
}

impl Extractor {
    /// Extract every document of a batch, at most `max_concurrency` at a
    /// time (0 uses the configured `batch_concurrency`).
    ///
    /// Fails as a whole only when the request is malformed; per-document
    /// failures are stored in their slot.
    pub async fn extract_batch(
        &self,
        request: impl Into<BatchRequest>,
        max_concurrency: usize,
    ) -> Result<BatchResult, ExtractError> {
        self.extract_batch_with_progress(request, max_concurrency, Arc::new(NoopProgressCallback))
            .await
    }

    /// [`Extractor::extract_batch`] reporting per-document events.
    pub async fn extract_batch_with_progress(
        &self,
        request: impl Into<BatchRequest>,
        max_concurrency: usize,
        progress: ProgressCallback,
    ) -> Result<BatchResult, ExtractError> {
        let request = request.into();
        self.validate_batch(request.len(), Some(request.total_bytes()))?;

        let start = Instant::now();
        let total = request.len();
        let concurrency = match max_concurrency {
            0 => self.config().batch_concurrency.max(1),
            n => n,
        };
        info!("Extracting batch of {} documents, {} at a time", total, concurrency);
        progress.on_batch_start(total);

        let filenames: Vec<String> = request
            .documents
            .iter()
            .map(|d| d.filename().to_string())
            .collect();
        let slots_gate = Arc::new(Semaphore::new(concurrency));
        let mut set = JoinSet::new();

        for (index, doc) in request.documents.into_iter().enumerate() {
            let extractor = self.clone();
            let gate = Arc::clone(&slots_gate);
            let progress = Arc::clone(&progress);
            set.spawn(async move {
                let _permit = match gate.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (index, Err(ExtractError::Internal("batch gate closed".into())))
                    }
                };
                progress.on_document_start(index, total, doc.filename());

                let outcome = AssertUnwindSafe(extractor.extract(doc))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(ExtractError::Internal(format!(
                            "extraction panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    });

                match &outcome {
                    Ok(r) => progress.on_document_complete(index, total, r.text.len()),
                    Err(e) => progress.on_document_error(index, total, &e.to_string()),
                }
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Result<ExtractionResult, ExtractError>>> =
            (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!("Batch task failed to join: {}", e),
            }
        }

        let entries: Vec<BatchEntry> = slots
            .into_iter()
            .zip(filenames)
            .enumerate()
            .map(|(index, (slot, filename))| {
                let outcome = slot
                    .unwrap_or_else(|| Err(ExtractError::Internal("batch task lost".into())))
                    .map_err(|e| ErrorDescriptor::new(filename.clone(), &e));
                BatchEntry {
                    index,
                    filename,
                    outcome,
                }
            })
            .collect();

        let result = BatchResult { entries };
        progress.on_batch_complete(total, result.succeeded());
        info!(
            "Batch complete: {}/{} succeeded in {}ms",
            result.succeeded(),
            total,
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    /// Decode every member of a base64 batch, then extract it.
    ///
    /// Decoding happens up front: one malformed member rejects the whole
    /// call with `InvalidEncoding` before any extraction starts.
    pub async fn extract_base64_batch(
        &self,
        payload: BatchBase64Payload,
        max_concurrency: usize,
    ) -> Result<BatchResult, ExtractError> {
        self.extract_base64_batch_with_progress(payload, max_concurrency, Arc::new(NoopProgressCallback))
            .await
    }

    /// [`Extractor::extract_base64_batch`] reporting per-document events.
    pub async fn extract_base64_batch_with_progress(
        &self,
        payload: BatchBase64Payload,
        max_concurrency: usize,
        progress: ProgressCallback,
    ) -> Result<BatchResult, ExtractError> {
        self.validate_batch(payload.files.len(), None)?;
        let documents = payload
            .files
            .into_iter()
            .map(|p| p.into_document())
            .collect::<Result<Vec<_>, _>>()?;
        self.extract_batch_with_progress(documents, max_concurrency, progress)
            .await
    }

    fn validate_batch(&self, count: usize, total_bytes: Option<usize>) -> Result<(), ExtractError> {
        let cfg = self.config();
        if count == 0 {
            return Err(ExtractError::InvalidRequest("batch is empty".into()));
        }
        if count > cfg.max_batch_documents {
            return Err(ExtractError::InvalidRequest(format!(
                "batch has {} documents, limit is {}",
                count, cfg.max_batch_documents
            )));
        }
        if let Some(bytes) = total_bytes {
            if bytes > cfg.max_batch_bytes {
                return Err(ExtractError::InvalidRequest(format!(
                    "batch payload is {} bytes, limit is {}",
                    bytes, cfg.max_batch_bytes
                )));
            }
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::error::ErrorKind;
    use crate::test_support::docx_bytes;

    fn extractor(max_docs: usize) -> Extractor {
        Extractor::new(
            ExtractionConfig::builder()
                .max_batch_documents(max_docs)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn empty_batch_rejected() {
        let err = extractor(4).extract_batch(Vec::<Document>::new(), 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn too_many_documents_rejected() {
        let docs: Vec<Document> = (0..3)
            .map(|i| Document::new(format!("{i}.docx"), None, docx_bytes(&["x"])))
            .collect();
        let err = extractor(2).extract_batch(docs, 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn bad_member_fails_only_its_slot() {
        let docs = vec![
            Document::new("a.docx", None, docx_bytes(&["first"])),
            Document::new("b.bin", None, b"\x00\x01\x02".to_vec()),
            Document::new("c.docx", None, docx_bytes(&["third"])),
        ];
        let r = extractor(8).extract_batch(docs, 0).await.unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r.succeeded(), 2);
        let slot = r.entries[1].outcome.as_ref().unwrap_err();
        assert_eq!(slot.error_kind, ErrorKind::UnsupportedFormat);
        assert_eq!(r.entries[2].outcome.as_ref().unwrap().text, "third");
    }

    #[test]
    fn panic_messages_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
