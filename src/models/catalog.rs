use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 标准物料 (目录由外部维护, 本系统只读)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Material {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    pub active: bool,
}

/// 目录快照中的一条: 物料 + 已匹配明细数 (热度先验)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub material: Material,
    pub match_count: i64,
}

/// 物料匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialMatch {
    pub material_id: i64,
    pub confidence: f64,
}

/// 供应商
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 抽取出的供应商信息, 按名称 (忽略大小写) 查找或创建
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupplierInfo {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl SupplierInfo {
    pub fn lookup_key(&self) -> String {
        self.name.trim().to_lowercase()
    }
}
