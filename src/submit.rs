//! Batch submission entry points.
//!
//! [`submit`] is the primary API: a bounded batch of PDFs in, one result
//! slot per PDF out, in the caller's order. The batch-level phases (slot
//! request, upload, poll) run once; everything after resolution is
//! per-document and fans out concurrently.
//!
//! ## Ordering & correlation
//!
//! The extraction service does not guarantee that its result list matches
//! submission order, so nothing here trusts position: each document gets a
//! random correlation token at submission, results are re-keyed by token
//! (falling back to file name), and per-document futures carry their input
//! index so the output list can be re-sorted regardless of completion
//! order.

use crate::config::PipelineConfig;
use crate::error::{DocumentError, PipelineError};
use crate::pipeline::bundle::BundleFetcher;
use crate::pipeline::extract::{
    BatchStatus, EntryState, ExtractEntry, ExtractionClient, SlotFile,
};
use crate::pipeline::structure::StructuringClient;
use crate::schema::{DocumentResult, InputDocument, SubmitOutput, SubmitStats};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

/// Submit a batch of invoice PDFs and wait for every document to resolve.
///
/// # Arguments
/// * `documents` — the batch, each a `(file name, bytes)` pair
/// * `config` — endpoints, credentials, and timing policy
///
/// # Returns
/// `Ok(SubmitOutput)` once every document has either a structured record
/// or a per-document error — one result slot per input, in input order.
///
/// # Errors
/// Returns `Err(PipelineError)` only for batch-fatal conditions: invalid
/// input (checked before any network call), a rejected slot request, a
/// failed upload, or the poll deadline elapsing. A batch-fatal error never
/// carries partial results — without full resolution, correlation cannot
/// be trusted.
pub async fn submit(
    documents: Vec<InputDocument>,
    config: &PipelineConfig,
) -> Result<SubmitOutput, PipelineError> {
    let total_start = Instant::now();

    // ── Step 1: Validate every input before any side effect ──────────────
    validate_documents(&documents)?;
    info!(count = documents.len(), "starting batch submission");

    let client = ExtractionClient::new(config)?;
    let fetcher = BundleFetcher::new(config)?;
    let structurer = StructuringClient::new(config)?;

    // ── Step 2: Slot request with per-document correlation tokens ────────
    let files: Vec<SlotFile> = documents
        .iter()
        .map(|d| SlotFile {
            name: d.file_name.clone(),
            data_id: uuid::Uuid::new_v4().to_string(),
        })
        .collect();
    let slots = client.request_slots(&files).await?;
    info!(batch_id = %slots.batch_id, "upload slots allocated");

    // ── Step 3: Upload raw bytes, bounded fan-out, fail-fast ─────────────
    stream::iter(
        documents
            .iter()
            .zip(&slots.file_urls)
            .map(|(doc, url)| client.upload(&doc.file_name, url, doc.bytes.clone())),
    )
    .buffer_unordered(config.concurrency)
    .try_collect::<Vec<()>>()
    .await?;
    info!(batch_id = %slots.batch_id, "all documents uploaded");

    // ── Step 4: Poll until every entry is terminal ───────────────────────
    let status = client
        .wait_for_batch(
            &slots.batch_id,
            config.poll_interval(),
            config.poll_deadline(),
        )
        .await?;
    let extract_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        batch_id = %slots.batch_id,
        entries = status.entries.len(),
        elapsed_ms = extract_duration_ms,
        "batch resolved"
    );

    // ── Step 5: Re-key results and fan out per-document work ─────────────
    let entries = correlate_entries(&status, &files);
    if entries.iter().any(Option::is_none) {
        warn!(batch_id = %slots.batch_id, "batch status is missing entries for some documents");
    }

    let structure_start = Instant::now();
    let mut indexed: Vec<(usize, DocumentResult)> = stream::iter(
        documents
            .iter()
            .zip(entries)
            .enumerate()
            .map(|(idx, (doc, entry))| {
                let fetcher = &fetcher;
                let structurer = &structurer;
                let status = &status;
                async move {
                    (
                        idx,
                        process_document(&doc.file_name, entry, status, fetcher, structurer)
                            .await,
                    )
                }
            }),
    )
    .buffer_unordered(config.concurrency)
    .collect()
    .await;
    let structure_duration_ms = structure_start.elapsed().as_millis() as u64;

    // Completion order is arbitrary; the caller's order is the contract.
    indexed.sort_by_key(|(idx, _)| *idx);
    let results: Vec<DocumentResult> = indexed.into_iter().map(|(_, r)| r).collect();

    let structured = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - structured;
    let stats = SubmitStats {
        total_documents: results.len(),
        structured,
        failed,
        extract_duration_ms,
        structure_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        structured,
        failed,
        total_ms = stats.total_duration_ms,
        "batch submission complete"
    );

    Ok(SubmitOutput { results, stats })
}

/// Synchronous wrapper around [`submit`].
///
/// Creates a temporary tokio runtime internally.
pub fn submit_sync(
    documents: Vec<InputDocument>,
    config: &PipelineConfig,
) -> Result<SubmitOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(submit(documents, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Pre-flight validation. Rejecting here means no network call has been
/// issued yet — an invalid batch has zero side effects.
fn validate_documents(documents: &[InputDocument]) -> Result<(), PipelineError> {
    if documents.is_empty() {
        return Err(PipelineError::EmptyBatch);
    }
    for doc in documents {
        if doc.file_name.trim().is_empty() {
            return Err(PipelineError::InvalidDocument {
                name: doc.file_name.clone(),
                reason: "empty file name".into(),
            });
        }
        if !doc.file_name.to_ascii_lowercase().ends_with(".pdf") {
            return Err(PipelineError::InvalidDocument {
                name: doc.file_name.clone(),
                reason: "not a .pdf file".into(),
            });
        }
        if doc.bytes.len() < 4 || &doc.bytes[..4] != b"%PDF" {
            return Err(PipelineError::InvalidDocument {
                name: doc.file_name.clone(),
                reason: "missing %PDF magic bytes".into(),
            });
        }
    }
    Ok(())
}

/// Map each submitted file to its batch entry: correlation token first,
/// file name as the fallback, never position.
fn correlate_entries<'a>(
    status: &'a BatchStatus,
    files: &[SlotFile],
) -> Vec<Option<&'a ExtractEntry>> {
    let by_token: HashMap<&str, &ExtractEntry> = status
        .entries
        .iter()
        .filter_map(|e| e.data_id.as_deref().map(|id| (id, e)))
        .collect();
    let mut by_name: HashMap<&str, &ExtractEntry> = HashMap::new();
    for e in &status.entries {
        by_name.entry(e.file_name.as_str()).or_insert(e);
    }

    files
        .iter()
        .map(|f| {
            by_token
                .get(f.data_id.as_str())
                .or_else(|| by_name.get(f.name.as_str()))
                .copied()
        })
        .collect()
}

/// Run one document through decode + structure, or short-circuit to its
/// error slot. Always returns a result — per-document failures never
/// propagate upward.
async fn process_document(
    name: &str,
    entry: Option<&ExtractEntry>,
    status: &BatchStatus,
    fetcher: &BundleFetcher,
    structurer: &StructuringClient,
) -> DocumentResult {
    let start = Instant::now();
    let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

    let Some(entry) = entry else {
        return DocumentResult::err(
            name.to_string(),
            DocumentError::ExtractionFailed {
                name: name.to_string(),
                message: "batch status has no entry for this document".into(),
            },
            elapsed(start),
        );
    };

    match status.entry_state(entry) {
        EntryState::Done => {}
        EntryState::Failed => {
            return DocumentResult::err(
                name.to_string(),
                DocumentError::ExtractionFailed {
                    name: name.to_string(),
                    message: entry
                        .err_msg
                        .clone()
                        .unwrap_or_else(|| "no error detail reported".into()),
                },
                elapsed(start),
            );
        }
        other => {
            // Unreachable after a resolved poll; recorded rather than trusted.
            return DocumentResult::err(
                name.to_string(),
                DocumentError::ExtractionFailed {
                    name: name.to_string(),
                    message: format!("entry is non-terminal ({other:?}) after batch resolution"),
                },
                elapsed(start),
            );
        }
    }

    let text = match fetcher.resolve(entry).await {
        Ok(text) => text,
        Err(e) => return DocumentResult::err(name.to_string(), e, elapsed(start)),
    };

    match structurer.structure(name, &text).await {
        Ok(invoice) => DocumentResult::ok(name.to_string(), invoice, elapsed(start)),
        Err(e) => DocumentResult::err(name.to_string(), e, elapsed(start)),
    }
}
