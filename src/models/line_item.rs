use crate::service::pricing;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// 明细行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "line_type", rename_all = "snake_case")]
pub enum LineType {
    #[default]
    Material,
    Discount,
    Fee,
    SubtotalLine,
    Note,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Material => "material",
            Self::Discount => "discount",
            Self::Fee => "fee",
            Self::SubtotalLine => "subtotal_line",
            Self::Note => "note",
        }
    }
}

impl fmt::Display for LineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "material" | "item" | "product" => Ok(Self::Material),
            "discount" => Ok(Self::Discount),
            "fee" | "charge" => Ok(Self::Fee),
            "subtotal_line" | "subtotal" => Ok(Self::SubtotalLine),
            "note" | "comment" => Ok(Self::Note),
            other => Err(format!("unknown line type '{}'", other)),
        }
    }
}

/// 明细行的可编辑字段 (抽取结果与人工修改共用)
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LineItemFields {
    pub description: String,
    pub quantity: Option<BigDecimal>,
    pub unit: Option<String>,
    pub unit_price: Option<BigDecimal>,
    pub line_total: Option<BigDecimal>,
    #[serde(default)]
    pub line_type: LineType,
    pub discount_pct: Option<BigDecimal>,
    pub discount_amount: Option<BigDecimal>,
    pub category_hint: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

impl LineItemFields {
    pub fn is_material(&self) -> bool {
        self.line_type == LineType::Material
    }

    /// 折后单价, 非 material 行恒为 None
    pub fn effective_unit_price(&self) -> Option<BigDecimal> {
        if !self.is_material() {
            return None;
        }
        pricing::effective_unit_price(
            self.unit_price.as_ref(),
            self.discount_pct.as_ref(),
            self.discount_amount.as_ref(),
            self.quantity.as_ref(),
        )
    }

    /// 行金额: 优先取 line_total, 否则用 数量 × 单价 推算
    pub fn computed_total(&self) -> Option<BigDecimal> {
        match (&self.line_total, &self.quantity, &self.unit_price) {
            (Some(total), _, _) => Some(total.clone()),
            (None, Some(qty), Some(price)) => Some(qty * price),
            _ => None,
        }
    }
}

impl AsRef<LineItemFields> for LineItemFields {
    fn as_ref(&self) -> &LineItemFields {
        self
    }
}

/// 待写入的明细行, 折后单价已按当前字段推导
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLineItem {
    #[serde(flatten)]
    pub fields: LineItemFields,
    pub effective_unit_price: Option<BigDecimal>,
    pub extraction_confidence: Option<f64>,
}

impl NewLineItem {
    pub fn new(fields: LineItemFields, extraction_confidence: Option<f64>) -> Self {
        let effective_unit_price = fields.effective_unit_price();
        Self {
            fields,
            effective_unit_price,
            extraction_confidence,
        }
    }
}

impl AsRef<LineItemFields> for NewLineItem {
    fn as_ref(&self) -> &LineItemFields {
        &self.fields
    }
}

/// 报价明细行
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub quote_id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub fields: LineItemFields,
    pub effective_unit_price: Option<BigDecimal>,
    pub extraction_confidence: Option<f64>,
    pub material_id: Option<i64>,
    pub match_confidence: Option<f64>,
}

impl AsRef<LineItemFields> for LineItem {
    fn as_ref(&self) -> &LineItemFields {
        &self.fields
    }
}

/// 复核时提交的一行: 带 id 为修改, 不带 id 为新增
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemEdit {
    pub id: Option<i64>,
    #[serde(flatten)]
    pub fields: LineItemFields,
}

/// 复核保存时交给存储层的一行 (id 已校验属于该报价)
#[derive(Debug, Clone)]
pub struct ReviewLine {
    pub id: Option<i64>,
    pub item: NewLineItem,
}
