//! Remote extraction client: slot request, byte upload, status polling.
//!
//! The extraction service exposes a three-phase protocol:
//!
//! 1. `POST /file-urls/batch` — name every document in the batch (plus a
//!    per-document correlation token) and receive a batch id and one
//!    pre-signed upload URL per document, positionally aligned to the
//!    request list.
//! 2. `PUT {pre-signed-url}` — transfer raw bytes. No `Content-Type`
//!    header and no auth: the service detects the format on receipt and
//!    starts processing immediately.
//! 3. `GET /extract-results/batch/{id}` — poll at a fixed interval until
//!    every entry is terminal or the wall-clock deadline elapses.
//!
//! Phases 1 and 3 carry the bearer token; phase 2 must not (the URL itself
//! is the credential).
//!
//! ## Termination
//!
//! A batch is resolved only when *every* entry is terminal. Detection goes
//! through [`BatchStatus::entry_state`], which prefers the entry's own
//! `state` field and falls back to the response's batch-level `state` —
//! older API versions expose only the latter, and checking just one shape
//! makes the poll loop spin until the deadline on the other.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

// ── Wire types ───────────────────────────────────────────────────────────

/// Response envelope used by every extraction-service JSON endpoint.
///
/// `code == 0` means success; anything else is a service-level rejection
/// with a human-readable `msg`, regardless of the HTTP status.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    fn into_data(self, context: &str) -> Result<T, PipelineError> {
        if self.code != 0 {
            return Err(PipelineError::SlotRequest {
                message: format!(
                    "{context}: service returned code {} ({})",
                    self.code,
                    self.msg.as_deref().unwrap_or("no message")
                ),
            });
        }
        self.data.ok_or_else(|| PipelineError::SlotRequest {
            message: format!("{context}: response body has no data"),
        })
    }
}

/// One file in a slot request: the display name plus the random
/// correlation token results are re-keyed by.
#[derive(Debug, Clone, Serialize)]
pub struct SlotFile {
    pub name: String,
    pub data_id: String,
}

#[derive(Debug, Serialize)]
struct SlotRequest<'a> {
    files: &'a [SlotFile],
}

/// Slot-request result: the batch id and one upload URL per requested
/// file, in request order.
#[derive(Debug, Deserialize)]
pub struct BatchSlots {
    pub batch_id: String,
    pub file_urls: Vec<String>,
}

/// Lifecycle state of one batch entry.
///
/// `done` and `failed` are terminal. Wire values outside the known set
/// parse as [`EntryState::Unknown`] so a new intermediate state added by
/// the service degrades to "keep polling" instead of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    #[serde(alias = "pending", alias = "waiting-file")]
    Queued,
    #[serde(alias = "converting")]
    Running,
    Done,
    Failed,
    #[serde(other)]
    Unknown,
}

impl EntryState {
    /// True for `done` / `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryState::Done | EntryState::Failed)
    }
}

/// Per-document status record within a batch, as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractEntry {
    pub file_name: String,

    /// Correlation token echoed from the slot request. Not all API
    /// versions echo it; correlation falls back to `file_name`.
    #[serde(default)]
    pub data_id: Option<String>,

    #[serde(default)]
    pub state: Option<EntryState>,

    /// Failure detail when `state == failed`.
    #[serde(default)]
    pub err_msg: Option<String>,

    /// Inline extracted text, when the service embeds it directly.
    #[serde(default)]
    pub markdown: Option<String>,

    /// Inline content items, an alternative inline shape.
    #[serde(default)]
    pub content: Option<Vec<InlineItem>>,

    /// Pointer to the downloadable result bundle.
    #[serde(default)]
    pub full_zip_url: Option<String>,
}

/// One inline content item; the text may live under `text` or `content`.
#[derive(Debug, Clone, Deserialize)]
pub struct InlineItem {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl InlineItem {
    pub fn value(&self) -> Option<&str> {
        self.text.as_deref().or(self.content.as_deref())
    }
}

/// One batch status response.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchStatus {
    #[serde(default)]
    pub batch_id: String,

    /// Batch-level state, present on older API versions that do not
    /// report per-entry states.
    #[serde(default)]
    pub state: Option<EntryState>,

    #[serde(default, alias = "extract_result")]
    pub entries: Vec<ExtractEntry>,
}

impl BatchStatus {
    /// Effective state of one entry: its own state, else the batch-level
    /// state, else `Unknown`.
    pub fn entry_state(&self, entry: &ExtractEntry) -> EntryState {
        entry.state.or(self.state).unwrap_or(EntryState::Unknown)
    }

    /// True when every entry is terminal. An empty entry list is not
    /// resolved — the service has not acknowledged the documents yet.
    pub fn is_resolved(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|e| self.entry_state(e).is_terminal())
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// HTTP client for the extraction service.
///
/// Owns the request-level timeout policy; the batch poll deadline lives in
/// [`crate::submit`] via [`wait_for_batch`].
pub struct ExtractionClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ExtractionClient {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.extraction_base_url.clone(),
            token: config.extraction_token.clone(),
        })
    }

    /// Phase 1: request one upload slot per document.
    ///
    /// Fatal for the whole batch on any failure — partial slot allocation
    /// is never attempted.
    pub async fn request_slots(&self, files: &[SlotFile]) -> Result<BatchSlots, PipelineError> {
        let url = format!("{}/file-urls/batch", self.base_url);
        debug!(count = files.len(), "requesting upload slots");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&SlotRequest { files })
            .send()
            .await
            .map_err(|e| PipelineError::SlotRequest {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::SlotRequest {
                message: format!("HTTP {status}: {body}"),
            });
        }

        let envelope: ApiEnvelope<BatchSlots> =
            response
                .json()
                .await
                .map_err(|e| PipelineError::SlotRequest {
                    message: format!("malformed response body: {e}"),
                })?;
        let slots = envelope.into_data("slot request")?;

        if slots.file_urls.len() != files.len() {
            return Err(PipelineError::SlotRequest {
                message: format!(
                    "requested {} slots, service returned {}",
                    files.len(),
                    slots.file_urls.len()
                ),
            });
        }

        debug!(batch_id = %slots.batch_id, "slots allocated");
        Ok(slots)
    }

    /// Phase 2: transfer raw bytes to a pre-signed upload URL.
    ///
    /// No `Content-Type` header — the service auto-detects the format and
    /// starts processing on receipt — and no bearer token.
    pub async fn upload(
        &self,
        name: &str,
        url: &str,
        bytes: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let response =
            self.http
                .put(url)
                .body(bytes)
                .send()
                .await
                .map_err(|e| PipelineError::Transfer {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Transfer {
                name: name.to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }
        debug!(name, "uploaded");
        Ok(())
    }

    /// Phase 3, one tick: fetch the current batch status.
    pub async fn fetch_status(&self, batch_id: &str) -> Result<BatchStatus, PipelineError> {
        let url = format!("{}/extract-results/batch/{}", self.base_url, batch_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PipelineError::SlotRequest {
                message: format!("status fetch: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::SlotRequest {
                message: format!("status fetch: HTTP {status}: {body}"),
            });
        }

        let envelope: ApiEnvelope<BatchStatus> =
            response
                .json()
                .await
                .map_err(|e| PipelineError::SlotRequest {
                    message: format!("status fetch: malformed body: {e}"),
                })?;
        envelope.into_data("status fetch")
    }

    /// Phase 3: poll until the batch resolves or the deadline elapses.
    pub async fn wait_for_batch(
        &self,
        batch_id: &str,
        interval: Duration,
        deadline: Duration,
    ) -> Result<BatchStatus, PipelineError> {
        poll_until(
            || self.fetch_status(batch_id),
            batch_id,
            interval,
            deadline,
        )
        .await
    }
}

/// Poll `fetch` every `interval` until the returned status is resolved or
/// `deadline` of wall-clock time has elapsed.
///
/// A failed fetch is logged and retried on the next tick — transient status
/// hiccups should not kill a batch that is still within its deadline. The
/// sleep between ticks yields the scheduler; nothing busy-waits.
///
/// Generic over the fetch closure so tests can drive it with scripted
/// status sequences and millisecond durations.
pub(crate) async fn poll_until<F, Fut>(
    mut fetch: F,
    batch_id: &str,
    interval: Duration,
    deadline: Duration,
) -> Result<BatchStatus, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<BatchStatus, PipelineError>>,
{
    let start = Instant::now();
    loop {
        match fetch().await {
            Ok(status) => {
                let terminal = status
                    .entries
                    .iter()
                    .filter(|e| status.entry_state(e).is_terminal())
                    .count();
                debug!(
                    batch_id,
                    terminal,
                    total = status.entries.len(),
                    "poll tick"
                );
                if status.is_resolved() {
                    return Ok(status);
                }
            }
            Err(e) => warn!(batch_id, error = %e, "status fetch failed; will retry"),
        }

        if start.elapsed() >= deadline {
            return Err(PipelineError::PollTimeout {
                batch_id: batch_id.to_string(),
                secs: deadline.as_secs(),
            });
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(name: &str, state: Option<EntryState>) -> ExtractEntry {
        ExtractEntry {
            file_name: name.to_string(),
            data_id: None,
            state,
            err_msg: None,
            markdown: None,
            content: None,
            full_zip_url: None,
        }
    }

    fn status(entries: Vec<ExtractEntry>, batch_state: Option<EntryState>) -> BatchStatus {
        BatchStatus {
            batch_id: "b".into(),
            state: batch_state,
            entries,
        }
    }

    #[test]
    fn entry_state_parses_wire_aliases() {
        for (wire, expected) in [
            ("\"queued\"", EntryState::Queued),
            ("\"pending\"", EntryState::Queued),
            ("\"waiting-file\"", EntryState::Queued),
            ("\"running\"", EntryState::Running),
            ("\"converting\"", EntryState::Running),
            ("\"done\"", EntryState::Done),
            ("\"failed\"", EntryState::Failed),
            ("\"some-new-state\"", EntryState::Unknown),
        ] {
            let parsed: EntryState = serde_json::from_str(wire).unwrap();
            assert_eq!(parsed, expected, "wire value {wire}");
        }
    }

    #[test]
    fn resolved_only_when_every_entry_terminal() {
        let s = status(
            vec![
                entry("a.pdf", Some(EntryState::Done)),
                entry("b.pdf", Some(EntryState::Running)),
            ],
            None,
        );
        assert!(!s.is_resolved());

        let s = status(
            vec![
                entry("a.pdf", Some(EntryState::Done)),
                entry("b.pdf", Some(EntryState::Failed)),
            ],
            None,
        );
        assert!(s.is_resolved());
    }

    #[test]
    fn batch_level_state_is_the_per_entry_fallback() {
        // Older API shape: entries carry no state of their own.
        let s = status(
            vec![entry("a.pdf", None), entry("b.pdf", None)],
            Some(EntryState::Done),
        );
        assert!(s.is_resolved());

        let s = status(vec![entry("a.pdf", None)], Some(EntryState::Running));
        assert!(!s.is_resolved());

        // No state anywhere: Unknown, not terminal.
        let s = status(vec![entry("a.pdf", None)], None);
        assert!(!s.is_resolved());
    }

    #[test]
    fn empty_entry_list_is_not_resolved() {
        assert!(!status(vec![], Some(EntryState::Done)).is_resolved());
    }

    #[test]
    fn status_response_parses_service_shape() {
        let body = r#"{
            "batch_id": "b-1",
            "extract_result": [
                {"file_name": "a.pdf", "data_id": "d1", "state": "done",
                 "full_zip_url": "https://cdn.example.com/a.zip"},
                {"file_name": "b.pdf", "state": "failed", "err_msg": "corrupt file"}
            ]
        }"#;
        let s: BatchStatus = serde_json::from_str(body).unwrap();
        assert_eq!(s.entries.len(), 2);
        assert_eq!(s.entry_state(&s.entries[0]), EntryState::Done);
        assert_eq!(s.entries[1].err_msg.as_deref(), Some("corrupt file"));
        assert!(s.is_resolved());
    }

    #[tokio::test]
    async fn poll_returns_once_resolved() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let st = if n < 2 {
                        Some(EntryState::Running)
                    } else {
                        Some(EntryState::Done)
                    };
                    Ok(status(vec![entry("a.pdf", st)], None))
                }
            },
            "b",
            Duration::from_millis(5),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
        assert!(result.is_resolved());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_times_out_at_the_deadline_not_earlier() {
        let started = std::time::Instant::now();
        let result = poll_until(
            || async { Ok(status(vec![entry("a.pdf", Some(EntryState::Running))], None)) },
            "b",
            Duration::from_millis(10),
            Duration::from_millis(60),
        )
        .await;
        let elapsed = started.elapsed();
        assert!(matches!(
            result,
            Err(PipelineError::PollTimeout { .. })
        ));
        assert!(elapsed >= Duration::from_millis(60), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn poll_survives_transient_fetch_failures() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(PipelineError::SlotRequest {
                            message: "connection reset".into(),
                        })
                    } else {
                        Ok(status(vec![entry("a.pdf", Some(EntryState::Done))], None))
                    }
                }
            },
            "b",
            Duration::from_millis(5),
            Duration::from_millis(500),
        )
        .await;
        assert!(result.is_ok());
    }

    #[test]
    fn envelope_rejects_nonzero_code() {
        let env: ApiEnvelope<BatchSlots> = serde_json::from_str(
            r#"{"code": -60012, "msg": "quota exceeded"}"#,
        )
        .unwrap();
        let err = env.into_data("slot request").unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
