//! Invoice schema and pipeline result types.
//!
//! [`StructuredInvoice`] is the fixed output contract: seven independently
//! optional fields. Field names are English in code; on the wire each field
//! serialises under its native Chinese name — the names the structuring
//! model is instructed to emit — and deserialises from either name.
//! `#[serde(rename = ..., alias = ...)]` carries the whole mapping, so the
//! round trip "serialise with native names, re-parse" is the identity.
//!
//! Absence means "not found on the invoice", never zero: a scan with no
//! legible insurance line yields `insurance_payment: None`, not `Some(0.0)`.

use crate::error::DocumentError;
use serde::{Deserialize, Serialize};

/// Structured data extracted from one medical invoice.
///
/// Example wire form (native field names, as emitted by the model and as
/// serialised for the caller):
///
/// ```json
/// {
///   "总金额": 124.56,
///   "收款单位": "XX医院",
///   "就诊日期": "2024-01-15",
///   "医保基金支付金额": 80.00,
///   "个人支付": 44.56,
///   "个人账户支付": 30.00,
///   "个人现金支付": 14.56
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredInvoice {
    /// Total amount on the invoice.
    #[serde(rename = "总金额", alias = "total_amount")]
    pub total_amount: Option<f64>,

    /// Hospital / receiving institution name. Often lives in the footer
    /// region of the scan, which is why the structured content-listing
    /// extraction path matters.
    #[serde(rename = "收款单位", alias = "payee")]
    pub payee: Option<String>,

    /// Date of the medical visit, normalised to `YYYY-MM-DD`.
    #[serde(rename = "就诊日期", alias = "visit_date")]
    pub visit_date: Option<String>,

    /// Amount paid by the medical-insurance pooled fund.
    #[serde(rename = "医保基金支付金额", alias = "insurance_payment")]
    pub insurance_payment: Option<f64>,

    /// Personal payment total.
    #[serde(rename = "个人支付", alias = "personal_payment")]
    pub personal_payment: Option<f64>,

    /// Payment from the personal medical-insurance account.
    #[serde(rename = "个人账户支付", alias = "personal_account_payment")]
    pub personal_account_payment: Option<f64>,

    /// Out-of-pocket cash payment.
    #[serde(rename = "个人现金支付", alias = "personal_cash_payment")]
    pub personal_cash_payment: Option<f64>,
}

impl StructuredInvoice {
    /// True when no field was found at all.
    pub fn is_empty(&self) -> bool {
        self.total_amount.is_none()
            && self.payee.is_none()
            && self.visit_date.is_none()
            && self.insurance_payment.is_none()
            && self.personal_payment.is_none()
            && self.personal_account_payment.is_none()
            && self.personal_cash_payment.is_none()
    }
}

/// One input file for a batch submission.
#[derive(Debug, Clone)]
pub struct InputDocument {
    /// Display name, used for correlation fallback and in every error.
    pub file_name: String,
    /// Raw PDF bytes.
    pub bytes: Vec<u8>,
}

impl InputDocument {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// The outcome for a single document in a batch.
///
/// Exactly one of `invoice` / `error` is set. Results are returned in the
/// caller's submission order regardless of the order the remote service
/// resolved them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    /// Original file name of the submitted document.
    pub file_name: String,

    /// The structured record, when the document made it through both stages.
    pub invoice: Option<StructuredInvoice>,

    /// The per-document failure, when it did not.
    pub error: Option<DocumentError>,

    /// Wall-clock time spent on this document after batch resolution
    /// (bundle decode + structuring), in milliseconds.
    pub duration_ms: u64,
}

impl DocumentResult {
    pub fn ok(file_name: String, invoice: StructuredInvoice, duration_ms: u64) -> Self {
        Self {
            file_name,
            invoice: Some(invoice),
            error: None,
            duration_ms,
        }
    }

    pub fn err(file_name: String, error: DocumentError, duration_ms: u64) -> Self {
        Self {
            file_name,
            invoice: None,
            error: Some(error),
            duration_ms,
        }
    }

    /// True when this slot holds a structured record.
    pub fn is_ok(&self) -> bool {
        self.invoice.is_some()
    }
}

/// Everything a batch submission produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutput {
    /// One result per input document, in input order.
    pub results: Vec<DocumentResult>,
    /// Aggregate timing and counts.
    pub stats: SubmitStats,
}

/// Aggregate statistics for one batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitStats {
    /// Documents submitted.
    pub total_documents: usize,
    /// Documents that produced a structured record.
    pub structured: usize,
    /// Documents that produced an error slot.
    pub failed: usize,
    /// Time from slot request to batch resolution, in milliseconds.
    pub extract_duration_ms: u64,
    /// Time spent decoding bundles and structuring, in milliseconds.
    pub structure_duration_ms: u64,
    /// End-to-end submission time, in milliseconds.
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StructuredInvoice {
        StructuredInvoice {
            total_amount: Some(80.0),
            payee: Some("北京协和医院".to_string()),
            visit_date: Some("2025-06-05".to_string()),
            insurance_payment: Some(14.0),
            personal_payment: Some(66.0),
            personal_account_payment: Some(66.0),
            personal_cash_payment: Some(0.0),
        }
    }

    #[test]
    fn serialises_with_native_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["总金额"], 80.0);
        assert_eq!(json["收款单位"], "北京协和医院");
        assert!(json.get("total_amount").is_none());
    }

    #[test]
    fn alias_round_trip_is_identity() {
        let original = sample();
        let native = serde_json::to_string(&original).unwrap();
        let reparsed: StructuredInvoice = serde_json::from_str(&native).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn accepts_canonical_names_too() {
        let parsed: StructuredInvoice =
            serde_json::from_str(r#"{"total_amount": 42.5, "payee": "某医院"}"#).unwrap();
        assert_eq!(parsed.total_amount, Some(42.5));
        assert_eq!(parsed.payee.as_deref(), Some("某医院"));
        assert!(parsed.visit_date.is_none());
    }

    #[test]
    fn missing_and_null_fields_are_absent() {
        let parsed: StructuredInvoice =
            serde_json::from_str(r#"{"总金额": 80.00, "收款单位": null}"#).unwrap();
        assert_eq!(parsed.total_amount, Some(80.0));
        assert!(parsed.payee.is_none());
        assert!(parsed.insurance_payment.is_none());
    }

    #[test]
    fn unrecognised_keys_are_ignored_not_fatal() {
        // "总金额度" is not an alias of anything; the amount stays absent.
        let parsed: StructuredInvoice = serde_json::from_str(r#"{"总金额度": 80}"#).unwrap();
        assert!(parsed.total_amount.is_none());
        assert!(parsed.is_empty());
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let res = serde_json::from_str::<StructuredInvoice>(r#"{"总金额": "八十元"}"#);
        assert!(res.is_err());
    }
}
