use crate::models::{Document, LineItem, SupplierInfo, Warning};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

/// 报价头字段 (抽取结果与人工修改共用)
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize, Deserialize)]
pub struct QuoteFields {
    pub quote_number: Option<String>,
    pub quote_date: Option<NaiveDate>,
    pub project_name: Option<String>,
    pub subtotal: Option<BigDecimal>,
    pub delivery_cost: Option<BigDecimal>,
    pub tax_amount: Option<BigDecimal>,
    /// 百分比, 例如 7.5 表示 7.5%
    pub tax_rate: Option<BigDecimal>,
    pub total_amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub payment_terms: Option<String>,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// 抽取原始记录: 抽取服务自报的字段置信度 + 校验告警
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub field_confidence: BTreeMap<String, f64>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// 边界解析时丢弃的字段 (例如无法识别的日期)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_fields: Vec<String>,
}

/// 一份文档抽取出的结构化报价
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quote {
    pub id: i64,
    pub document_id: i64,
    pub supplier_id: Option<i64>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub fields: QuoteFields,
    pub extraction_confidence: f64,
    pub raw_extraction: Json<RawExtraction>,
    /// 是否计入价格分析的唯一依据, 只在审批时置为 true
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    /// 审批后物料匹配已写回全部 material 行
    pub matched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待写入的草稿报价
#[derive(Debug, Clone)]
pub struct NewQuote {
    /// 写入时在同一事务内按名称解析为 supplier_id
    pub supplier: Option<SupplierInfo>,
    pub fields: QuoteFields,
    pub extraction_confidence: f64,
    pub raw_extraction: RawExtraction,
}

/// 复核保存后的报价头
#[derive(Debug, Clone)]
pub struct QuoteUpdate {
    pub fields: QuoteFields,
    pub extraction_confidence: f64,
    pub raw_extraction: RawExtraction,
}

/// 复核页面所需的完整视图
#[derive(Debug, Clone, Serialize)]
pub struct QuoteDetail {
    pub document: Document,
    pub quote: Quote,
    pub line_items: Vec<LineItem>,
}

/// 审批结果
#[derive(Debug, Clone)]
pub enum ApprovalOutcome {
    Approved(Document),
    AlreadyApproved,
    NotReviewable(Document),
}
