use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashSet;

/// 未匹配到分类的明细归入此组
pub const UNCATEGORIZED: &str = "uncategorized";

/// 已审批价格查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceFilter {
    pub material_id: Option<i64>,
    pub supplier_id: Option<i64>,
    pub category: Option<String>,
    /// 描述子串, 忽略大小写
    pub description: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub matched_only: bool,
    pub limit: Option<i64>,
}

impl PriceFilter {
    pub const DEFAULT_LIMIT: i64 = 500;

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 10_000)
    }

    pub fn for_material(material_id: i64) -> Self {
        Self {
            material_id: Some(material_id),
            ..Default::default()
        }
    }
}

/// 一条已审批的 material 明细价格
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PriceRow {
    pub line_item_id: i64,
    pub quote_id: i64,
    pub document_id: i64,
    pub supplier_id: Option<i64>,
    pub supplier_name: Option<String>,
    pub material_id: Option<i64>,
    pub material_name: Option<String>,
    pub category: Option<String>,
    pub description: String,
    pub quantity: Option<BigDecimal>,
    pub unit: Option<String>,
    pub unit_price: Option<BigDecimal>,
    pub effective_unit_price: Option<BigDecimal>,
    pub quote_date: Option<NaiveDate>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// 价格走势上的一个点
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: Option<NaiveDate>,
    pub supplier_id: Option<i64>,
    pub supplier_name: Option<String>,
    pub effective_unit_price: BigDecimal,
    pub unit: Option<String>,
    pub quote_id: i64,
}

impl PricePoint {
    /// 有折后单价的行按报价日期升序 (无日期的排最后)
    pub fn history(rows: Vec<PriceRow>) -> Vec<PricePoint> {
        let mut points: Vec<PricePoint> = rows
            .into_iter()
            .filter_map(|row| {
                Some(PricePoint {
                    effective_unit_price: row.effective_unit_price?,
                    date: row.quote_date,
                    supplier_id: row.supplier_id,
                    supplier_name: row.supplier_name,
                    unit: row.unit,
                    quote_id: row.quote_id,
                })
            })
            .collect();
        points.sort_by_key(|p| (p.date.is_none(), p.date, p.quote_id));
        points
    }
}

/// 某物料在单个供应商处的价格汇总
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SupplierPriceSummary {
    pub supplier_id: Option<i64>,
    pub supplier_name: Option<String>,
    pub observations: i64,
    pub min_price: BigDecimal,
    pub avg_price: BigDecimal,
    pub max_price: BigDecimal,
    pub latest_price: BigDecimal,
    pub latest_date: Option<NaiveDate>,
}

impl SupplierPriceSummary {
    /// 输入行需按报价日期降序, 每组第一行即最新价格; 结果最低均价在前
    pub fn summarize(rows: &[PriceRow]) -> Vec<SupplierPriceSummary> {
        let mut groups: IndexMap<Option<i64>, Vec<(&PriceRow, &BigDecimal)>> = IndexMap::new();
        for row in rows {
            if let Some(price) = &row.effective_unit_price {
                groups.entry(row.supplier_id).or_default().push((row, price));
            }
        }

        let mut summaries: Vec<SupplierPriceSummary> = groups
            .into_iter()
            .filter_map(|(supplier_id, points)| {
                let (latest, latest_price) = *points.first()?;
                let mut min = latest_price;
                let mut max = latest_price;
                let mut sum = BigDecimal::zero();
                for (_, price) in &points {
                    if *price < min {
                        min = *price;
                    }
                    if *price > max {
                        max = *price;
                    }
                    sum += *price;
                }
                let avg = (sum / BigDecimal::from(points.len() as i64)).round(4);
                Some(SupplierPriceSummary {
                    supplier_id,
                    supplier_name: latest.supplier_name.clone(),
                    observations: points.len() as i64,
                    min_price: min.clone(),
                    avg_price: avg,
                    max_price: max.clone(),
                    latest_price: latest_price.clone(),
                    latest_date: latest.quote_date,
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.avg_price.cmp(&b.avg_price).then(a.supplier_id.cmp(&b.supplier_id)));
        summaries
    }
}

/// 按物料类别的汇总
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: String,
    pub line_items: i64,
    pub materials: i64,
    pub suppliers: i64,
    pub avg_effective_price: Option<BigDecimal>,
}

impl CategorySummary {
    pub fn summarize(rows: &[PriceRow]) -> Vec<CategorySummary> {
        struct Acc {
            line_items: i64,
            materials: HashSet<i64>,
            suppliers: HashSet<i64>,
            price_sum: BigDecimal,
            priced: i64,
        }

        let mut groups: IndexMap<&str, Acc> = IndexMap::new();
        for row in rows {
            let key = row.category.as_deref().unwrap_or(UNCATEGORIZED);
            let acc = groups.entry(key).or_insert_with(|| Acc {
                line_items: 0,
                materials: HashSet::new(),
                suppliers: HashSet::new(),
                price_sum: BigDecimal::zero(),
                priced: 0,
            });
            acc.line_items += 1;
            if let Some(id) = row.material_id {
                acc.materials.insert(id);
            }
            if let Some(id) = row.supplier_id {
                acc.suppliers.insert(id);
            }
            if let Some(price) = &row.effective_unit_price {
                acc.price_sum += price;
                acc.priced += 1;
            }
        }

        let mut summaries: Vec<CategorySummary> = groups
            .into_iter()
            .map(|(category, acc)| CategorySummary {
                category: category.to_string(),
                line_items: acc.line_items,
                materials: acc.materials.len() as i64,
                suppliers: acc.suppliers.len() as i64,
                avg_effective_price: (acc.priced > 0)
                    .then(|| (acc.price_sum / BigDecimal::from(acc.priced)).round(4)),
            })
            .collect();
        summaries.sort_by(|a, b| a.category.cmp(&b.category));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn supplier_summary_uses_first_row_as_latest() {
        // 存储层按日期降序返回
        let rows = vec![
            row(1, 7, "30", (2024, 3, 1), None),
            row(2, 8, "20", (2024, 2, 1), None),
            row(3, 7, "40", (2024, 1, 1), None),
            row(4, 7, "35", (2023, 12, 1), None),
        ];
        let summary = SupplierPriceSummary::summarize(&rows);
        assert_eq!(summary.len(), 2);

        assert_eq!(summary[0].supplier_id, Some(8));
        assert_eq!(summary[0].observations, 1);

        let s7 = &summary[1];
        assert_eq!(s7.observations, 3);
        assert_eq!(s7.min_price, dec("30"));
        assert_eq!(s7.max_price, dec("40"));
        assert_eq!(s7.avg_price, dec("35"));
        assert_eq!(s7.latest_price, dec("30"));
        assert_eq!(s7.latest_date, NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn category_summary_groups_uncategorized() {
        let mut unmatched = row(3, 9, "5", (2024, 1, 1), None);
        unmatched.material_id = None;
        let rows = vec![
            row(1, 7, "10", (2024, 1, 1), Some("Lumber")),
            row(2, 8, "20", (2024, 1, 1), Some("Lumber")),
            unmatched,
        ];
        let summary = CategorySummary::summarize(&rows);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].category, "Lumber");
        assert_eq!(summary[0].line_items, 2);
        assert_eq!(summary[0].materials, 1);
        assert_eq!(summary[0].suppliers, 2);
        assert_eq!(summary[0].avg_effective_price, Some(dec("15")));
        assert_eq!(summary[1].category, UNCATEGORIZED);
        assert_eq!(summary[1].materials, 0);
    }

    #[test]
    fn history_is_chronological_with_undated_last() {
        let mut undated = row(1, 7, "12", (2024, 1, 1), None);
        undated.quote_date = None;
        let mut unpriced = row(4, 7, "1", (2024, 1, 1), None);
        unpriced.effective_unit_price = None;
        let rows = vec![
            undated,
            row(2, 7, "11", (2024, 5, 1), None),
            row(3, 8, "10", (2024, 2, 1), None),
            unpriced,
        ];
        let points = PricePoint::history(rows);
        let prices: Vec<BigDecimal> = points.iter().map(|p| p.effective_unit_price.clone()).collect();
        assert_eq!(prices, vec![dec("10"), dec("11"), dec("12")]);
        assert_eq!(points[2].date, None);
    }
}
