//! 抽取服务返回结果的边界类型
//!
//! `ExtractionPayload` 是抽取服务的宽松 JSON 形态 (金额可能是数字也可能是
//! `"$1,234.50"` 这样的字符串); 进入业务逻辑前必须转换为强类型的
//! `ExtractionResult`, 任何无法解释的字段都视为 malformed payload。

use crate::error::PipelineError;
use crate::models::{LineItemFields, LineType, NewLineItem, QuoteFields, SupplierInfo};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub supplier: Option<SupplierPayload>,
    #[serde(default)]
    pub quote: Option<QuotePayload>,
    #[serde(default)]
    pub line_items: Vec<LineItemPayload>,
    #[serde(default)]
    pub confidence: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotePayload {
    #[serde(default)]
    pub quote_number: Option<Value>,
    #[serde(default)]
    pub quote_date: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub subtotal: Option<Value>,
    #[serde(default)]
    pub delivery_cost: Option<Value>,
    #[serde(default)]
    pub tax_amount: Option<Value>,
    #[serde(default)]
    pub tax_rate: Option<Value>,
    #[serde(default)]
    pub total_amount: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub valid_until: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItemPayload {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<Value>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub unit_price: Option<Value>,
    #[serde(default)]
    pub line_total: Option<Value>,
    #[serde(default)]
    pub line_type: Option<String>,
    #[serde(default)]
    pub discount_pct: Option<Value>,
    #[serde(default)]
    pub discount_amount: Option<Value>,
    #[serde(default, alias = "category_hint")]
    pub category: Option<String>,
    #[serde(default)]
    pub confidence: Option<Value>,
}

/// 强类型抽取结果
#[derive(Debug, Clone)]
pub enum ExtractionResult {
    Extracted(ExtractedQuote),
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct ExtractedQuote {
    pub supplier: Option<SupplierInfo>,
    pub fields: QuoteFields,
    pub line_items: Vec<NewLineItem>,
    pub field_confidence: BTreeMap<String, f64>,
    pub model: Option<String>,
    pub dropped_fields: Vec<String>,
}

impl ExtractionResult {
    /// 从抽取服务的原始 JSON 字节解析
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PipelineError> {
        let payload: ExtractionPayload = serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::MalformedPayload(e.to_string()))?;
        Self::try_from(payload)
    }
}

impl TryFrom<ExtractionPayload> for ExtractionResult {
    type Error = PipelineError;

    fn try_from(payload: ExtractionPayload) -> Result<Self, Self::Error> {
        match payload.status.as_deref().map(str::trim) {
            None | Some("ok") | Some("success") | Some("completed") => {}
            Some("error") | Some("failed") => {
                let message = payload
                    .error
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "extraction service reported failure".to_string());
                return Ok(Self::Failed { message });
            }
            Some(other) => {
                return Err(malformed(format!("unknown status '{}'", other)));
            }
        }

        let mut dropped_fields = Vec::new();

        let supplier = payload.supplier.and_then(|s| {
            let name = s.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
            Some(SupplierInfo {
                name,
                email: non_empty(s.email),
                phone: non_empty(s.phone),
                address: non_empty(s.address),
            })
        });

        let q = payload.quote.unwrap_or_default();
        let fields = QuoteFields {
            quote_number: q.quote_number.as_ref().and_then(text_value),
            quote_date: parse_date("quote_date", q.quote_date, &mut dropped_fields),
            project_name: non_empty(q.project_name),
            subtotal: parse_amount("subtotal", q.subtotal.as_ref())?,
            delivery_cost: parse_amount("delivery_cost", q.delivery_cost.as_ref())?,
            tax_amount: parse_amount("tax_amount", q.tax_amount.as_ref())?,
            tax_rate: parse_amount("tax_rate", q.tax_rate.as_ref())?,
            total_amount: parse_amount("total_amount", q.total_amount.as_ref())?,
            currency: non_empty(q.currency).map(|c| c.to_uppercase()),
            payment_terms: non_empty(q.payment_terms),
            valid_until: parse_date("valid_until", q.valid_until, &mut dropped_fields),
            notes: non_empty(q.notes),
        };

        let mut line_items = Vec::with_capacity(payload.line_items.len());
        for (idx, li) in payload.line_items.into_iter().enumerate() {
            line_items.push(parse_line_item(idx, li)?);
        }

        let mut field_confidence = BTreeMap::new();
        for (field, value) in &payload.confidence {
            let score = parse_confidence(&format!("confidence.{}", field), Some(value))?;
            if let Some(score) = score {
                field_confidence.insert(field.clone(), score);
            }
        }

        Ok(Self::Extracted(ExtractedQuote {
            supplier,
            fields,
            line_items,
            field_confidence,
            model: non_empty(payload.model),
            dropped_fields,
        }))
    }
}

fn parse_line_item(idx: usize, li: LineItemPayload) -> Result<NewLineItem, PipelineError> {
    let field = |name: &str| format!("line_items[{}].{}", idx, name);

    let line_type = match li.line_type.as_deref().map(str::trim) {
        None | Some("") => LineType::Material,
        Some(raw) => raw
            .parse::<LineType>()
            .map_err(|e| malformed(format!("{}: {}", field("line_type"), e)))?,
    };

    let fields = LineItemFields {
        description: li.description.map(|d| d.trim().to_string()).unwrap_or_default(),
        quantity: parse_amount(&field("quantity"), li.quantity.as_ref())?,
        unit: non_empty(li.unit),
        unit_price: parse_amount(&field("unit_price"), li.unit_price.as_ref())?,
        line_total: parse_amount(&field("line_total"), li.line_total.as_ref())?,
        line_type,
        discount_pct: parse_amount(&field("discount_pct"), li.discount_pct.as_ref())?,
        discount_amount: parse_amount(&field("discount_amount"), li.discount_amount.as_ref())?,
        category_hint: non_empty(li.category),
        sort_order: idx as i32,
    };
    let confidence = parse_confidence(&field("confidence"), li.confidence.as_ref())?;

    Ok(NewLineItem::new(fields, confidence))
}

fn malformed(message: String) -> PipelineError {
    PipelineError::MalformedPayload(message)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(Some(s.clone())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 解析金额/数量: 数字, 或带货币符号、千分位、百分号、括号负数的字符串
pub fn parse_amount(field: &str, value: Option<&Value>) -> Result<Option<BigDecimal>, PipelineError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => BigDecimal::from_str(&n.to_string())
            .map(Some)
            .map_err(|e| malformed(format!("{}: {}", field, e))),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
            let cleaned: String = trimmed
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if cleaned.is_empty() {
                return Err(malformed(format!("{}: not a number '{}'", field, raw)));
            }
            let amount = BigDecimal::from_str(&cleaned)
                .map_err(|_| malformed(format!("{}: not a number '{}'", field, raw)))?;
            Ok(Some(if negative { -amount } else { amount }))
        }
        Some(other) => Err(malformed(format!("{}: unexpected value {}", field, other))),
    }
}

fn parse_confidence(field: &str, value: Option<&Value>) -> Result<Option<f64>, PipelineError> {
    let score = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match score {
        Some(s) if (0.0..=1.0).contains(&s) => Ok(Some(s)),
        _ => Err(malformed(format!("{}: confidence must be within [0, 1]", field))),
    }
}

/// 日期无法识别时丢弃该字段并记录, 不使整份抽取失败
fn parse_date(field: &str, value: Option<String>, dropped: &mut Vec<String>) -> Option<NaiveDate> {
    let raw = non_empty(value)?;
    const FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%B %d, %Y"];
    let parsed = FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&raw, fmt).ok());
    if parsed.is_none() {
        dropped.push(format!("{}={}", field, raw));
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn extracted(value: Value) -> ExtractedQuote {
        match ExtractionResult::from_slice(value.to_string().as_bytes()).unwrap() {
            ExtractionResult::Extracted(q) => q,
            other => panic!("expected extracted quote, got {:?}", other),
        }
    }

    #[test]
    fn parses_formatted_amounts() {
        assert_eq!(parse_amount("x", Some(&json!("$1,234.50"))).unwrap(), Some(dec("1234.50")));
        assert_eq!(parse_amount("x", Some(&json!("(12.00)"))).unwrap(), Some(dec("-12.00")));
        assert_eq!(parse_amount("x", Some(&json!("10%"))).unwrap(), Some(dec("10")));
        assert_eq!(parse_amount("x", Some(&json!(42.5))).unwrap(), Some(dec("42.5")));
        assert_eq!(parse_amount("x", Some(&json!(""))).unwrap(), None);
        assert_eq!(parse_amount("x", None).unwrap(), None);
        assert!(parse_amount("x", Some(&json!("n/a"))).is_err());
        assert!(parse_amount("x", Some(&json!([1]))).is_err());
    }

    #[test]
    fn converts_full_payload() {
        let quote = extracted(json!({
            "status": "ok",
            "model": "extractor-v2",
            "supplier": { "name": "  Acme Lumber ", "email": "sales@acme.test" },
            "quote": {
                "quote_number": 4471,
                "quote_date": "2024-03-01",
                "subtotal": "1,000.00",
                "delivery_cost": 50,
                "tax_amount": "70",
                "total_amount": "$1,120.00",
                "currency": "usd",
                "valid_until": "sometime soon"
            },
            "line_items": [
                { "description": "2x4 SPF stud 8'", "quantity": 100, "unit": "ea", "unit_price": "5.00", "line_total": 500 },
                { "description": "Contractor discount", "line_type": "discount", "line_total": -25, "confidence": 0.4 }
            ],
            "confidence": { "total_amount": 0.95, "supplier": "0.8" }
        }));

        assert_eq!(quote.supplier.as_ref().unwrap().name, "Acme Lumber");
        assert_eq!(quote.fields.quote_number.as_deref(), Some("4471"));
        assert_eq!(quote.fields.subtotal, Some(dec("1000")));
        assert_eq!(quote.fields.total_amount, Some(dec("1120")));
        assert_eq!(quote.fields.currency.as_deref(), Some("USD"));
        assert_eq!(quote.fields.valid_until, None);
        assert_eq!(quote.dropped_fields, vec!["valid_until=sometime soon".to_string()]);
        assert_eq!(quote.field_confidence.get("supplier"), Some(&0.8));

        assert_eq!(quote.line_items.len(), 2);
        assert_eq!(quote.line_items[0].effective_unit_price, Some(dec("5")));
        assert_eq!(quote.line_items[1].fields.line_type, LineType::Discount);
        assert_eq!(quote.line_items[1].effective_unit_price, None);
        assert_eq!(quote.line_items[1].extraction_confidence, Some(0.4));
        assert_eq!(quote.line_items[1].fields.sort_order, 1);
    }

    #[test]
    fn missing_totals_is_partial_not_malformed() {
        let quote = extracted(json!({
            "line_items": [{ "description": "OSB 7/16", "quantity": 3, "unit_price": 18 }]
        }));
        assert!(quote.supplier.is_none());
        assert!(quote.fields.total_amount.is_none());
        assert_eq!(quote.line_items.len(), 1);
    }

    #[test]
    fn service_failure_becomes_failed_result() {
        let result = ExtractionResult::from_slice(br#"{"status":"error","error":"quota exceeded"}"#).unwrap();
        match result {
            ExtractionResult::Failed { message } => assert_eq!(message, "quota exceeded"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_payloads() {
        for bad in [
            json!({ "line_items": [{ "description": "x", "line_type": "mystery" }] }),
            json!({ "confidence": { "total_amount": 1.5 } }),
            json!({ "quote": { "subtotal": "about a thousand" } }),
            json!({ "status": "thinking" }),
        ] {
            let err = ExtractionResult::from_slice(bad.to_string().as_bytes()).unwrap_err();
            assert!(matches!(err, PipelineError::MalformedPayload(_)), "{}", bad);
        }
        assert!(ExtractionResult::from_slice(b"<html>").is_err());
    }
}
