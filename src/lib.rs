//! # pdf2invoice
//!
//! Structure Chinese medical e-invoice PDFs (医疗电子票据) into typed
//! records by chaining two remote services: a document-extraction service
//! and a language model.
//!
//! ## Why this crate?
//!
//! Scanned invoices defeat local text extraction — the numbers live in
//! stamped tables and footer regions that come out garbled or missing.
//! The hard part is not reading one PDF, it is driving two slow,
//! partially-unreliable remote services to a deterministic result: batch
//! upload with correlation tokens, bounded polling for asynchronous
//! completion, multi-format fallback decoding of zip result bundles, and
//! strict parsing of a free-text model reply into a fixed schema.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs
//!  │
//!  ├─ 1. Validate  names, %PDF magic — before any network call
//!  ├─ 2. Slots     one batch request, one upload URL per document
//!  ├─ 3. Upload    raw bytes, no content type, bounded fan-out
//!  ├─ 4. Poll      fixed interval, hard wall-clock deadline
//!  ├─ 5. Decode    per document: inline text or zip bundle → flat text
//!  ├─ 6. Structure per document: prompted LLM call → StructuredInvoice
//!  └─ 7. Output    one result slot per input, in input order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2invoice::{submit, InputDocument, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads MINERU_API_TOKEN / ZHIPU_API_KEY from the environment.
//!     let config = PipelineConfig::from_env()?;
//!     let docs = vec![InputDocument::new(
//!         "invoice.pdf",
//!         std::fs::read("invoice.pdf")?,
//!     )];
//!     let output = submit(docs, &config).await?;
//!     for result in &output.results {
//!         match &result.invoice {
//!             Some(inv) => println!("{}: {:?}", result.file_name, inv.total_amount),
//!             None => eprintln!("{}: {}", result.file_name, result.error.as_ref().unwrap()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error model
//!
//! Batch-fatal conditions (bad input, rejected slot request, failed
//! upload, poll deadline) return [`PipelineError`] and no partial results.
//! Per-document failures ([`DocumentError`]) ride in the document's result
//! slot next to its successful siblings — one bad scan never fails the
//! batch.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod submit;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{DocumentError, PipelineError};
pub use schema::{DocumentResult, InputDocument, StructuredInvoice, SubmitOutput, SubmitStats};
pub use submit::{submit, submit_sync};
