use crate::db::Store;
use crate::error::Result;
use crate::models::{CategorySummary, LineItem, PriceFilter, PricePoint, PriceRow, SupplierPriceSummary};
use bigdecimal::BigDecimal;
use std::io::Write;
use std::sync::Arc;

/// 已审批价格查询 (只读)
///
/// 搜索结果受 `PriceFilter::limit` 限制; 走势与汇总在存储层基于全部已审批行计算。
pub struct PriceQueryService {
    store: Arc<dyn Store>,
}

impl PriceQueryService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn search_verified_prices(&self, filter: &PriceFilter) -> Result<Vec<PriceRow>> {
        self.store.verified_prices(filter).await
    }

    /// 某物料的价格走势, 按报价日期升序 (无日期的排最后)
    pub async fn price_history(&self, material_id: i64) -> Result<Vec<PricePoint>> {
        self.store.price_history(material_id).await
    }

    /// 按供应商汇总某物料的折后单价, 最低均价在前
    pub async fn supplier_summary(&self, material_id: i64) -> Result<Vec<SupplierPriceSummary>> {
        self.store.supplier_price_summary(material_id).await
    }

    /// 按物料分类汇总
    pub async fn category_summary(&self) -> Result<Vec<CategorySummary>> {
        self.store.category_price_summary().await
    }

    pub async fn unmatched_line_items(&self, limit: Option<i64>) -> Result<Vec<LineItem>> {
        self.store
            .unmatched_line_items(limit.unwrap_or(100).clamp(1, 1_000))
            .await
    }
}

/// 将 Option<BigDecimal> 转换为 CSV 字符串
fn option_to_csv(val: &Option<BigDecimal>) -> String {
    val.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn option_id_to_csv(val: Option<i64>) -> String {
    val.map(|v| v.to_string()).unwrap_or_default()
}

/// 导出价格行到 CSV
pub fn export_csv<W: Write>(rows: &[PriceRow], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);

    writer.write_record([
        "line_item_id",
        "quote_id",
        "document_id",
        "supplier_id",
        "supplier_name",
        "material_id",
        "material_name",
        "category",
        "description",
        "quantity",
        "unit",
        "unit_price",
        "effective_unit_price",
        "quote_date",
        "verified_at",
    ])?;
    for row in rows {
        writer.write_record(&[
            row.line_item_id.to_string(),
            row.quote_id.to_string(),
            row.document_id.to_string(),
            option_id_to_csv(row.supplier_id),
            row.supplier_name.clone().unwrap_or_default(),
            option_id_to_csv(row.material_id),
            row.material_name.clone().unwrap_or_default(),
            row.category.clone().unwrap_or_default(),
            row.description.clone(),
            option_to_csv(&row.quantity),
            row.unit.clone().unwrap_or_default(),
            option_to_csv(&row.unit_price),
            option_to_csv(&row.effective_unit_price),
            row.quote_date.map(|d| d.to_string()).unwrap_or_default(),
            row.verified_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn row(id: i64, supplier: i64, price: &str, date: (i32, u32, u32), category: Option<&str>) -> PriceRow {
        PriceRow {
            line_item_id: id,
            quote_id: id * 10,
            document_id: id * 100,
            supplier_id: Some(supplier),
            supplier_name: Some(format!("Supplier {}", supplier)),
            material_id: Some(1),
            material_name: Some("CDX Plywood".to_string()),
            category: category.map(str::to_string),
            description: "Plywood, CDX".to_string(),
            quantity: Some(dec("10")),
            unit: Some("sht".to_string()),
            unit_price: Some(dec(price)),
            effective_unit_price: Some(dec(price)),
            quote_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            verified_at: None,
        }
    }

    #[test]
    fn csv_export_writes_header_and_blank_nulls() {
        let mut r = row(1, 7, "9.5", (2024, 5, 2), Some("Lumber"));
        r.quantity = None;
        let mut out = Vec::new();
        export_csv(&[r], &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("line_item_id,quote_id,document_id"));
        assert_eq!(
            lines.next().unwrap(),
            "1,10,100,7,Supplier 7,1,CDX Plywood,Lumber,\"Plywood, CDX\",,sht,9.5,9.5,2024-05-02,"
        );
        assert_eq!(lines.next(), None);
    }
}
