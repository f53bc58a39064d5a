use crate::error::Result;
use crate::models::{
    ApprovalOutcome, CatalogEntry, CategorySummary, Document, DocumentStatus, LineItem, MaterialMatch,
    NewDocument, NewLineItem, NewQuote, PriceFilter, PricePoint, PriceRow, Quote, QuoteUpdate,
    ReviewLine, StatusChange, SupplierPriceSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 物料目录只读接口, 注入到物料匹配器
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// 当前目录快照 (仅 active 物料), 附带每个物料已匹配的明细数
    async fn catalog_snapshot(&self) -> Result<Vec<CatalogEntry>>;
}

/// 流水线持久化接口
///
/// 所有带前置条件的写操作都是原子的比较并设置: 前置条件不满足时不写入任何数据。
#[async_trait]
pub trait Store: CatalogReader + Send + Sync {
    async fn insert_document(&self, document: NewDocument) -> Result<Document>;

    async fn get_document(&self, id: i64) -> Result<Option<Document>>;

    /// 仅当当前状态属于 `from` 时执行变更, 否则返回 None
    ///
    /// `from` 中任一状态按转移表不能到达目标状态时返回 InvalidTransition。
    async fn transition_document(
        &self,
        id: i64,
        from: &[DocumentStatus],
        change: StatusChange,
    ) -> Result<Option<Document>>;

    /// 指定状态下 `started_at` 早于 `before` 的文档
    async fn documents_started_before(
        &self,
        status: DocumentStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Document>>;

    /// 指定状态下 `created_at` 早于 `before` 的文档
    async fn documents_created_before(
        &self,
        status: DocumentStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Document>>;

    /// 写入草稿报价与明细 (含按名称解析供应商), 并把 processing 中的文档推进到 `next`
    ///
    /// 文档不在 processing 时返回 None, 不写入报价也不创建供应商。
    async fn attach_quote(
        &self,
        document_id: i64,
        next: DocumentStatus,
        completed_at: DateTime<Utc>,
        quote: NewQuote,
        line_items: Vec<NewLineItem>,
    ) -> Result<Option<(Document, Quote)>>;

    async fn get_quote(&self, id: i64) -> Result<Option<Quote>>;

    /// 按 sort_order 排列
    async fn list_line_items(&self, quote_id: i64) -> Result<Vec<LineItem>>;

    /// 保存复核修改: 更新报价头, 按 id 更新/新增明细, 删除未提交的明细
    ///
    /// 报价已审批时返回 false 且不写入任何数据。
    async fn save_review(&self, quote_id: i64, update: QuoteUpdate, lines: Vec<ReviewLine>) -> Result<bool>;

    /// 审批: verified = true, 文档推进到 approved
    async fn approve_quote(&self, quote_id: i64, at: DateTime<Utc>) -> Result<ApprovalOutcome>;

    /// 一次性写回整张报价的匹配结果 (含未匹配) 并设置 matched_at
    async fn record_matches(
        &self,
        quote_id: i64,
        results: &[(i64, Option<MaterialMatch>)],
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// 在 `before` 之前审批但尚未写回匹配结果的报价 id
    async fn unmatched_quotes_before(&self, before: DateTime<Utc>) -> Result<Vec<i64>>;

    /// 已审批报价中的 material 明细, 最多 `filter.limit()` 行
    async fn verified_prices(&self, filter: &PriceFilter) -> Result<Vec<PriceRow>>;

    /// 某物料全部已审批价格, 按报价日期升序
    async fn price_history(&self, material_id: i64) -> Result<Vec<PricePoint>>;

    /// 某物料按供应商聚合的价格 (基于全部已审批行)
    async fn supplier_price_summary(&self, material_id: i64) -> Result<Vec<SupplierPriceSummary>>;

    /// 按物料分类聚合 (基于全部已审批行)
    async fn category_price_summary(&self) -> Result<Vec<CategorySummary>>;

    /// 已审批但未匹配到物料的 material 明细
    async fn unmatched_line_items(&self, limit: i64) -> Result<Vec<LineItem>>;
}
