//! Error types for the pdf2invoice library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the whole batch submission cannot
//!   proceed (an input failed validation, the slot request was rejected, an
//!   upload transfer failed, the poll deadline elapsed). Returned as
//!   `Err(PipelineError)` from [`crate::submit`].
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (its remote
//!   extraction reported `failed`, its result bundle was unusable, the model
//!   reply did not parse) but sibling documents are fine. Stored inside
//!   [`crate::schema::DocumentResult`] so callers get partial success rather
//!   than losing the whole batch to one bad scan.
//!
//! Batch-level failures are never softened into partial results: until every
//! entry is terminal, result-to-document correlation cannot be trusted.

use thiserror::Error;

/// All fatal errors returned by the pdf2invoice library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// [`crate::schema::DocumentResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// An input document failed pre-flight validation. No network calls
    /// have been issued when this is returned.
    #[error("Invalid input document '{name}': {reason}")]
    InvalidDocument { name: String, reason: String },

    /// The batch contained no documents.
    #[error("Empty batch: at least one document is required")]
    EmptyBatch,

    // ── Extraction-service errors ─────────────────────────────────────────
    /// The upload-slot request was rejected or returned a malformed body.
    #[error("Upload slot request failed: {message}")]
    SlotRequest { message: String },

    /// A raw byte upload to a pre-signed URL failed.
    ///
    /// Uploads abort the batch on the first failure; the service has
    /// already begun processing whatever was transferred, but without a
    /// complete batch the result set cannot be correlated.
    #[error("Upload failed for '{name}': {message}")]
    Transfer { name: String, message: String },

    /// The poll deadline elapsed before every batch entry reached a
    /// terminal state. No partial result is surfaced — unresolved entries
    /// cannot be distinguished from future successes.
    #[error("Batch '{batch_id}' did not resolve within {secs}s")]
    PollTimeout { batch_id: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document within a batch.
///
/// Stored in [`crate::schema::DocumentResult`] when a document fails.
/// The overall submission continues for sibling documents.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The extraction service reported `failed` for this document.
    #[error("Extraction failed for '{name}': {message}")]
    ExtractionFailed { name: String, message: String },

    /// The result bundle could not be downloaded.
    #[error("Bundle download failed for '{name}': {message}")]
    BundleDownload { name: String, message: String },

    /// The result bundle was unreadable or contained no extractable content.
    #[error("Unusable result bundle for '{name}': {message}")]
    BundleFormat { name: String, message: String },

    /// The language-model request itself failed.
    #[error("Structuring call failed for '{name}': {message}")]
    StructuringCall { name: String, message: String },

    /// The model reply was not valid JSON after fence-stripping.
    ///
    /// Carries the raw reply for diagnostics; the reply is never guessed at
    /// or partially repaired.
    #[error("Model reply is not valid JSON for '{name}': {message}\nRaw reply: {raw}")]
    ResponseParse {
        name: String,
        message: String,
        raw: String,
    },

    /// The reply parsed as JSON but does not conform to the invoice schema
    /// (e.g. a string where a number is expected). Values are never coerced.
    #[error("Model reply does not match the invoice schema for '{name}': {message}\nParsed reply: {raw}")]
    SchemaValidation {
        name: String,
        message: String,
        raw: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_timeout_display() {
        let e = PipelineError::PollTimeout {
            batch_id: "b-123".into(),
            secs: 300,
        };
        let msg = e.to_string();
        assert!(msg.contains("b-123"), "got: {msg}");
        assert!(msg.contains("300s"), "got: {msg}");
    }

    #[test]
    fn transfer_display() {
        let e = PipelineError::Transfer {
            name: "a.pdf".into(),
            message: "HTTP 403".into(),
        };
        assert!(e.to_string().contains("a.pdf"));
        assert!(e.to_string().contains("HTTP 403"));
    }

    #[test]
    fn response_parse_keeps_raw_reply() {
        let e = DocumentError::ResponseParse {
            name: "a.pdf".into(),
            message: "expected value at line 1".into(),
            raw: "sorry, I cannot".into(),
        };
        assert!(e.to_string().contains("sorry, I cannot"));
    }

    #[test]
    fn document_error_serialises() {
        let e = DocumentError::ExtractionFailed {
            name: "a.pdf".into(),
            message: "corrupt file".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("corrupt file"));
    }
}
