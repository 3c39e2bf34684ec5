//! Result-bundle decoding: turn a terminal-`done` entry into flattened text.
//!
//! An entry's content can arrive three ways, resolved in order:
//!
//! 1. inline markdown on the entry itself — used verbatim;
//! 2. an inline list of content items — their text joined with newlines;
//! 3. a URL to a zip bundle — downloaded and decoded here.
//!
//! Inside a bundle, the structured content-block listing takes precedence
//! over the flattened markdown rendering. This is load-bearing, not taste:
//! the markdown rendering drops page-header/page-footer regions, and on
//! these invoices the payee (hospital) name lives in the footer. Only the
//! block listing keeps it.
//!
//! Decoding is deterministic: member names are sorted before any "first
//! file" selection, so the same archive always flattens to the same text.

use crate::config::PipelineConfig;
use crate::error::{DocumentError, PipelineError};
use crate::pipeline::extract::{ExtractEntry, InlineItem};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::{debug, warn};

/// One semantic unit inside a structured content-block listing.
///
/// A closed set: adding a block kind the service does not emit is a
/// compile-time affair, and an unhandled kind here is a compile error in
/// [`flatten_blocks`], not a silently skipped string comparison.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Title {
        #[serde(default)]
        content: Vec<InlineItem>,
    },
    Paragraph {
        #[serde(default)]
        content: Vec<InlineItem>,
    },
    /// Tables keep their HTML fragment verbatim; the structuring model is
    /// expected to read embedded HTML.
    Table {
        #[serde(default, alias = "table_body")]
        html: String,
    },
    PageHeader {
        #[serde(default)]
        content: Vec<InlineItem>,
    },
    PageFooter {
        #[serde(default)]
        content: Vec<InlineItem>,
    },
    /// Images carry no extractable text.
    Image {},
}

/// Structured listing layout: outer sequence of pages, each an ordered
/// sequence of blocks.
pub type ContentPages = Vec<Vec<ContentBlock>>;

/// Flatten a structured listing into plain text: pages in order, blocks in
/// order, one line per text item, tables as their raw HTML fragment,
/// images skipped.
pub fn flatten_blocks(pages: &[Vec<ContentBlock>]) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for page in pages {
        for block in page {
            match block {
                ContentBlock::Title { content }
                | ContentBlock::Paragraph { content }
                | ContentBlock::PageHeader { content }
                | ContentBlock::PageFooter { content } => {
                    for item in content {
                        if let Some(text) = item.value() {
                            lines.push(text);
                        }
                    }
                }
                ContentBlock::Table { html } => {
                    if !html.is_empty() {
                        lines.push(html);
                    }
                }
                ContentBlock::Image {} => {}
            }
        }
    }
    lines.join("\n")
}

// ── Archive decoding ─────────────────────────────────────────────────────

static RE_VERSIONED_LISTING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"content_list_v(\d+)\.json$").unwrap());

/// Pick the content-listing members to try, best first: the
/// highest-versioned `*content_list_v<N>.json`, then the legacy
/// `*content_list.json`.
fn listing_candidates(names: &[String]) -> Vec<&String> {
    let mut versioned: Vec<(u32, &String)> = names
        .iter()
        .filter_map(|n| {
            RE_VERSIONED_LISTING
                .captures(n)
                .and_then(|c| c[1].parse::<u32>().ok())
                .map(|v| (v, n))
        })
        .collect();
    versioned.sort_by(|a, b| b.0.cmp(&a.0));

    let mut candidates: Vec<&String> = versioned.into_iter().map(|(_, n)| n).collect();
    candidates.extend(
        names
            .iter()
            .filter(|n| n.ends_with("content_list.json")),
    );
    candidates
}

/// Decode a fetched zip bundle into flattened text.
///
/// Fallback precedence, first usable wins:
/// 1. highest-versioned structured content listing;
/// 2. legacy content listing;
/// 3. first markdown member (UTF-8, invalid sequences replaced);
/// 4. first member of any kind, best-effort text;
/// 5. empty archive → [`DocumentError::BundleFormat`].
pub fn flatten_bundle(name: &str, bytes: &[u8]) -> Result<String, DocumentError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| DocumentError::BundleFormat {
            name: name.to_string(),
            message: format!("not a readable zip archive: {e}"),
        })?;

    let mut members: Vec<String> = archive
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .map(String::from)
        .collect();
    members.sort();

    if members.is_empty() {
        return Err(DocumentError::BundleFormat {
            name: name.to_string(),
            message: "archive contains no files".into(),
        });
    }

    for candidate in listing_candidates(&members) {
        let raw = read_member(&mut archive, candidate, name)?;
        match serde_json::from_slice::<ContentPages>(&raw) {
            Ok(pages) => {
                debug!(name, member = %candidate, "flattened structured listing");
                return Ok(flatten_blocks(&pages));
            }
            Err(e) => {
                warn!(name, member = %candidate, error = %e, "unparseable content listing; trying next representation");
            }
        }
    }

    if let Some(md) = members.iter().find(|n| n.ends_with(".md")) {
        let raw = read_member(&mut archive, md, name)?;
        debug!(name, member = %md, "using markdown fallback");
        return Ok(String::from_utf8_lossy(&raw).into_owned());
    }

    let first = &members[0];
    warn!(name, member = %first, "no listing or markdown in bundle; decoding first member as text");
    let raw = read_member(&mut archive, first, name)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn read_member(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    member: &str,
    name: &str,
) -> Result<Vec<u8>, DocumentError> {
    let mut file = archive
        .by_name(member)
        .map_err(|e| DocumentError::BundleFormat {
            name: name.to_string(),
            message: format!("cannot open archive member '{member}': {e}"),
        })?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)
        .map_err(|e| DocumentError::BundleFormat {
            name: name.to_string(),
            message: format!("cannot read archive member '{member}': {e}"),
        })?;
    Ok(buf)
}

// ── Entry resolution ─────────────────────────────────────────────────────

/// Inline text carried directly on the entry, if any: the markdown field,
/// else the joined inline content items.
pub fn inline_text(entry: &ExtractEntry) -> Option<String> {
    if let Some(md) = &entry.markdown {
        return Some(md.clone());
    }
    entry.content.as_ref().map(|items| {
        items
            .iter()
            .filter_map(InlineItem::value)
            .collect::<Vec<_>>()
            .join("\n")
    })
}

/// Downloads and decodes result bundles.
pub struct BundleFetcher {
    http: reqwest::Client,
}

impl BundleFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Internal(format!("http client: {e}")))?;
        Ok(Self { http })
    }

    /// Resolve one `done` entry to flattened text: inline content if the
    /// service embedded it, otherwise fetch and decode the bundle.
    pub async fn resolve(&self, entry: &ExtractEntry) -> Result<String, DocumentError> {
        if let Some(text) = inline_text(entry) {
            debug!(name = %entry.file_name, "entry carries inline content");
            return Ok(text);
        }

        let url = entry
            .full_zip_url
            .as_deref()
            .ok_or_else(|| DocumentError::BundleFormat {
                name: entry.file_name.clone(),
                message: "entry has neither inline content nor a bundle URL".into(),
            })?;

        let response =
            self.http
                .get(url)
                .send()
                .await
                .map_err(|e| DocumentError::BundleDownload {
                    name: entry.file_name.clone(),
                    message: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocumentError::BundleDownload {
                name: entry.file_name.clone(),
                message: format!("HTTP {status}"),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DocumentError::BundleDownload {
                name: entry.file_name.clone(),
                message: e.to_string(),
            })?;

        debug!(name = %entry.file_name, size = bytes.len(), "bundle downloaded");
        flatten_bundle(&entry.file_name, &bytes)
    }
}
