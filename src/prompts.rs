//! The extraction prompt for the structuring model.
//!
//! Centralising the prompt here serves two purposes:
//!
//! 1. **Single source of truth** — field-name or format changes touch
//!    exactly one place, next to the schema they must stay in sync with.
//!
//! 2. **Testability** — unit tests inspect the rendered prompt directly
//!    without calling a model, so prompt regressions are cheap to catch.
//!
//! The wording reflects what real extraction output looks like: invoices
//! label the pooled-fund line "医保统筹基金支付" while the schema says
//! "医保基金支付金额", "个人自付" appears for "个人支付", and visit dates
//! often come through as compact digits ("20250605"). The prompt instructs
//! the model to bridge those gaps rather than leaving the fields null.

/// Fixed instruction for structuring flattened invoice text.
///
/// The `{text}` placeholder is substituted by [`render_extraction_prompt`].
/// The model is told to answer with exactly one JSON object using the
/// native field names of [`crate::schema::StructuredInvoice`], `null` for
/// anything it cannot find, two-decimal currency values, `YYYY-MM-DD`
/// dates, and no code fences — the fence stripper in
/// [`crate::pipeline::structure`] exists because models disobey that last
/// instruction anyway.
pub const EXTRACTION_PROMPT: &str = "\
你是一个专业的医疗电子票据信息提取助手。请从以下文本中提取医疗电子票据的关键信息，
并严格按照指定的JSON格式输出。

需要提取的字段（注意：票据中的字段名称可能与下面的名称略有不同，请根据语义匹配）：
- 总金额：票据上的金额合计（小写），数值，保留2位小数
- 收款单位：医院/医疗机构名称，文本。可能出现在票据标题或抬头中
- 就诊日期：格式必须为 YYYY-MM-DD（如原文为 20250605，请转为 2025-06-05）
- 医保基金支付金额：医保统筹基金支付的金额，数值，保留2位小数（票据中可能标注为\"医保统筹基金支付\"）
- 个人支付：个人支付总额，数值，保留2位小数（票据中可能标注为\"个人自付\"）
- 个人账户支付：从个人医保账户支付的金额，数值，保留2位小数
- 个人现金支付：个人现金支付金额，数值，保留2位小数

输出示例：
{\"总金额\": 80.00, \"收款单位\": \"XX医院\", \"就诊日期\": \"2025-06-05\", \"医保基金支付金额\": 14.00, \"个人支付\": 66.00, \"个人账户支付\": 66.00, \"个人现金支付\": 0.00}

如果某个字段在文本中确实找不到，请将其值设为 null。

请只输出纯JSON，不要输出```json标记或其他任何内容。

以下是票据文本内容：
---
{text}
---";

/// Render the extraction prompt for one document's flattened text.
pub fn render_extraction_prompt(text: &str) -> String {
    EXTRACTION_PROMPT.replace("{text}", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_the_document_text() {
        let p = render_extraction_prompt("总金额: 80.00");
        assert!(p.contains("总金额: 80.00"));
        assert!(!p.contains("{text}"));
    }

    #[test]
    fn names_every_schema_field() {
        for field in [
            "总金额",
            "收款单位",
            "就诊日期",
            "医保基金支付金额",
            "个人支付",
            "个人账户支付",
            "个人现金支付",
        ] {
            assert!(EXTRACTION_PROMPT.contains(field), "missing {field}");
        }
    }
}
