//! 内存存储, 用于测试和无数据库的本地开发; 重启后数据丢失。
//!
//! 各表是独立的 DashMap: 持有一张表的条目引用时不访问另一张表, 否则读写两侧会以相反顺序
//! 等待分片锁。跨表写操作由 `write_lock` 串行化。

use crate::db::store::{CatalogReader, Store};
use crate::error::{PipelineError, Result};
use crate::models::{
    ApprovalOutcome, CatalogEntry, CategorySummary, Document, DocumentStatus, LineItem, LineType,
    Material, MaterialMatch, NewDocument, NewLineItem, NewQuote, PriceFilter, PricePoint, PriceRow,
    Quote, QuoteUpdate, ReviewLine, StatusChange, Supplier, SupplierInfo, SupplierPriceSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::types::Json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

pub struct MemoryStore {
    documents: DashMap<i64, Document>,
    quotes: DashMap<i64, Quote>,
    line_items: DashMap<i64, LineItem>,
    suppliers: DashMap<i64, Supplier>,
    materials: DashMap<i64, Material>,
    next_id: AtomicI64,
    /// 跨表写操作的互斥锁, 保证复合写入原子
    write_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            quotes: DashMap::new(),
            line_items: DashMap::new(),
            suppliers: DashMap::new(),
            materials: DashMap::new(),
            next_id: AtomicI64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 写入一条目录物料 (目录维护属于外部系统, 这里供测试和本地开发预置数据)
    pub fn add_material(&self, name: &str, category: Option<&str>, synonyms: &[&str]) -> Material {
        let material = Material {
            id: self.next_id(),
            name: name.to_string(),
            category: category.map(str::to_string),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            active: true,
        };
        self.materials.insert(material.id, material.clone());
        material
    }

    pub fn set_material_active(&self, material_id: i64, active: bool) {
        if let Some(mut m) = self.materials.get_mut(&material_id) {
            m.active = active;
        }
    }

    /// 全部文档, 按 id 排序
    pub fn documents(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self.documents.iter().map(|d| d.clone()).collect();
        docs.sort_by_key(|d| d.id);
        docs
    }

    pub fn quote_count(&self) -> usize {
        self.quotes.len()
    }

    pub fn supplier_count(&self) -> usize {
        self.suppliers.len()
    }

    fn items_of(&self, quote_id: i64) -> Vec<LineItem> {
        let mut items: Vec<LineItem> = self
            .line_items
            .iter()
            .filter(|li| li.quote_id == quote_id)
            .map(|li| li.clone())
            .collect();
        items.sort_by_key(|li| (li.fields.sort_order, li.id));
        items
    }

    fn build_line_item(&self, id: i64, quote_id: i64, item: NewLineItem) -> LineItem {
        LineItem {
            id,
            quote_id,
            fields: item.fields,
            effective_unit_price: item.effective_unit_price,
            extraction_confidence: item.extraction_confidence,
            material_id: None,
            match_confidence: None,
        }
    }

    /// 按名称 (忽略大小写与首尾空白) 查找或创建, 调用方须持有写锁
    fn upsert_supplier_locked(&self, info: &SupplierInfo) -> Supplier {
        let key = info.lookup_key();
        let existing = self
            .suppliers
            .iter()
            .find(|s| s.name.trim().to_lowercase() == key)
            .map(|s| s.clone());
        if let Some(existing) = existing {
            return existing;
        }
        let supplier = Supplier {
            id: self.next_id(),
            name: info.name.trim().to_string(),
            email: info.email.clone(),
            phone: info.phone.clone(),
            address: info.address.clone(),
            created_at: Utc::now(),
        };
        self.suppliers.insert(supplier.id, supplier.clone());
        supplier
    }

    /// 已审批 material 明细, 按报价日期降序 (空值在后) 再按明细 id, 不截断
    fn verified_rows(&self, filter: &PriceFilter) -> Vec<PriceRow> {
        let needle = filter.description.as_ref().map(|d| d.to_lowercase());
        let category = filter.category.as_ref().map(|c| c.to_lowercase());

        let items: Vec<LineItem> = self
            .line_items
            .iter()
            .filter(|li| li.fields.line_type == LineType::Material)
            .map(|li| li.clone())
            .collect();

        let mut rows: Vec<PriceRow> = Vec::new();
        for li in items {
            let Some(quote) = self.quotes.get(&li.quote_id).map(|q| q.clone()) else {
                continue;
            };
            if !quote.verified {
                continue;
            }
            if filter.matched_only && li.material_id.is_none() {
                continue;
            }
            if filter.material_id.is_some() && filter.material_id != li.material_id {
                continue;
            }
            if filter.supplier_id.is_some() && filter.supplier_id != quote.supplier_id {
                continue;
            }
            let material = li.material_id.and_then(|id| self.materials.get(&id).map(|m| m.clone()));
            if let Some(category) = &category {
                let matches = material
                    .as_ref()
                    .and_then(|m| m.category.as_ref())
                    .map_or(false, |c| c.to_lowercase() == *category);
                if !matches {
                    continue;
                }
            }
            if let Some(needle) = &needle {
                if !li.fields.description.to_lowercase().contains(needle.as_str()) {
                    continue;
                }
            }
            let date = quote.fields.quote_date;
            if filter.from.is_some() && (date.is_none() || date < filter.from) {
                continue;
            }
            if filter.to.is_some() && (date.is_none() || date > filter.to) {
                continue;
            }
            let supplier = quote.supplier_id.and_then(|id| self.suppliers.get(&id).map(|s| s.clone()));

            rows.push(PriceRow {
                line_item_id: li.id,
                quote_id: quote.id,
                document_id: quote.document_id,
                supplier_id: quote.supplier_id,
                supplier_name: supplier.map(|s| s.name),
                material_id: li.material_id,
                material_name: material.as_ref().map(|m| m.name.clone()),
                category: material.and_then(|m| m.category),
                description: li.fields.description,
                quantity: li.fields.quantity,
                unit: li.fields.unit,
                unit_price: li.fields.unit_price,
                effective_unit_price: li.effective_unit_price,
                quote_date: date,
                verified_at: quote.verified_at,
            });
        }

        // 与 Postgres 查询一致
        rows.sort_by(|a, b| {
            b.quote_date
                .is_some()
                .cmp(&a.quote_date.is_some())
                .then_with(|| b.quote_date.cmp(&a.quote_date))
                .then_with(|| a.line_item_id.cmp(&b.line_item_id))
        });
        rows
    }
}

fn apply_change(doc: &mut Document, change: StatusChange) {
    doc.status = change.to;
    if change.error_message.is_some() {
        doc.error_message = change.error_message;
    }
    if change.started_at.is_some() {
        doc.started_at = change.started_at;
    }
    if change.completed_at.is_some() {
        doc.completed_at = change.completed_at;
    }
}

#[async_trait]
impl CatalogReader for MemoryStore {
    async fn catalog_snapshot(&self) -> Result<Vec<CatalogEntry>> {
        let mut usage: HashMap<i64, i64> = HashMap::new();
        for li in self.line_items.iter() {
            if let Some(material_id) = li.material_id {
                *usage.entry(material_id).or_insert(0) += 1;
            }
        }

        let mut entries: Vec<CatalogEntry> = self
            .materials
            .iter()
            .filter(|m| m.active)
            .map(|m| CatalogEntry {
                match_count: usage.get(&m.id).copied().unwrap_or(0),
                material: m.clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.material.id);
        Ok(entries)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_document(&self, document: NewDocument) -> Result<Document> {
        let doc = Document {
            id: self.next_id(),
            organization_id: document.organization_id,
            storage_path: document.storage_path,
            file_name: document.file_name,
            status: DocumentStatus::Pending,
            error_message: None,
            quote_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.documents.insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        Ok(self.documents.get(&id).map(|d| d.clone()))
    }

    async fn transition_document(
        &self,
        id: i64,
        from: &[DocumentStatus],
        change: StatusChange,
    ) -> Result<Option<Document>> {
        change.check_sources(id, from)?;
        let _guard = self.lock();
        let Some(mut doc) = self.documents.get_mut(&id) else {
            return Err(PipelineError::not_found("document", id));
        };
        if !from.contains(&doc.status) {
            return Ok(None);
        }
        apply_change(&mut doc, change);
        Ok(Some(doc.clone()))
    }

    async fn documents_started_before(
        &self,
        status: DocumentStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| d.status == status && d.started_at.map_or(false, |s| s < before))
            .map(|d| d.clone())
            .collect();
        docs.sort_by_key(|d| d.id);
        Ok(docs)
    }

    async fn documents_created_before(
        &self,
        status: DocumentStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| d.status == status && d.created_at < before)
            .map(|d| d.clone())
            .collect();
        docs.sort_by_key(|d| d.id);
        Ok(docs)
    }

    async fn attach_quote(
        &self,
        document_id: i64,
        next: DocumentStatus,
        completed_at: DateTime<Utc>,
        quote: NewQuote,
        line_items: Vec<NewLineItem>,
    ) -> Result<Option<(Document, Quote)>> {
        if !DocumentStatus::Processing.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                document_id,
                from: DocumentStatus::Processing,
                to: next,
            });
        }
        let _guard = self.lock();
        let Some(status) = self.documents.get(&document_id).map(|d| d.status) else {
            return Err(PipelineError::not_found("document", document_id));
        };
        if status != DocumentStatus::Processing {
            return Ok(None);
        }

        let supplier_id = quote.supplier.as_ref().map(|info| self.upsert_supplier_locked(info).id);
        let now = Utc::now();
        let stored = Quote {
            id: self.next_id(),
            document_id,
            supplier_id,
            fields: quote.fields,
            extraction_confidence: quote.extraction_confidence,
            raw_extraction: Json(quote.raw_extraction),
            verified: false,
            verified_at: None,
            matched_at: None,
            created_at: now,
            updated_at: now,
        };
        for item in line_items {
            let id = self.next_id();
            self.line_items.insert(id, self.build_line_item(id, stored.id, item));
        }
        self.quotes.insert(stored.id, stored.clone());

        let Some(mut doc) = self.documents.get_mut(&document_id) else {
            return Err(PipelineError::not_found("document", document_id));
        };
        doc.status = next;
        doc.quote_id = Some(stored.id);
        doc.completed_at = Some(completed_at);
        Ok(Some((doc.clone(), stored)))
    }

    async fn get_quote(&self, id: i64) -> Result<Option<Quote>> {
        Ok(self.quotes.get(&id).map(|q| q.clone()))
    }

    async fn list_line_items(&self, quote_id: i64) -> Result<Vec<LineItem>> {
        Ok(self.items_of(quote_id))
    }

    async fn save_review(&self, quote_id: i64, update: QuoteUpdate, lines: Vec<ReviewLine>) -> Result<bool> {
        let _guard = self.lock();
        let Some(verified) = self.quotes.get(&quote_id).map(|q| q.verified) else {
            return Err(PipelineError::not_found("quote", quote_id));
        };
        if verified {
            return Ok(false);
        }

        let existing: HashSet<i64> = self
            .line_items
            .iter()
            .filter(|li| li.quote_id == quote_id)
            .map(|li| li.id)
            .collect();
        if let Some(foreign) = lines.iter().filter_map(|l| l.id).find(|id| !existing.contains(id)) {
            return Err(PipelineError::InvalidInput(format!(
                "line item {} does not belong to quote {}",
                foreign, quote_id
            )));
        }

        let kept: HashSet<i64> = lines.iter().filter_map(|l| l.id).collect();
        for id in existing.difference(&kept) {
            self.line_items.remove(id);
        }
        for line in lines {
            let id = line.id.unwrap_or_else(|| self.next_id());
            self.line_items.insert(id, self.build_line_item(id, quote_id, line.item));
        }

        if let Some(mut quote) = self.quotes.get_mut(&quote_id) {
            quote.fields = update.fields;
            quote.extraction_confidence = update.extraction_confidence;
            quote.raw_extraction = Json(update.raw_extraction);
            quote.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn approve_quote(&self, quote_id: i64, at: DateTime<Utc>) -> Result<ApprovalOutcome> {
        let _guard = self.lock();
        let Some((verified, document_id)) = self.quotes.get(&quote_id).map(|q| (q.verified, q.document_id)) else {
            return Err(PipelineError::not_found("quote", quote_id));
        };
        if verified {
            return Ok(ApprovalOutcome::AlreadyApproved);
        }
        let Some(mut doc) = self.documents.get_mut(&document_id) else {
            return Err(PipelineError::not_found("document", document_id));
        };
        if !doc.status.can_transition_to(DocumentStatus::Approved) {
            return Ok(ApprovalOutcome::NotReviewable(doc.clone()));
        }
        apply_change(&mut doc, StatusChange::approved());
        let approved = doc.clone();
        drop(doc);

        if let Some(mut quote) = self.quotes.get_mut(&quote_id) {
            quote.verified = true;
            quote.verified_at = Some(at);
            quote.updated_at = at;
        }
        Ok(ApprovalOutcome::Approved(approved))
    }

    async fn record_matches(
        &self,
        quote_id: i64,
        results: &[(i64, Option<MaterialMatch>)],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.lock();
        if !self.quotes.contains_key(&quote_id) {
            return Err(PipelineError::not_found("quote", quote_id));
        }
        for (line_item_id, result) in results {
            if let Some(mut li) = self.line_items.get_mut(line_item_id) {
                if li.quote_id != quote_id || li.fields.line_type != LineType::Material {
                    continue;
                }
                li.material_id = result.map(|m| m.material_id);
                li.match_confidence = result.map(|m| m.confidence);
            }
        }
        if let Some(mut quote) = self.quotes.get_mut(&quote_id) {
            quote.matched_at = Some(at);
        }
        Ok(())
    }

    async fn unmatched_quotes_before(&self, before: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .quotes
            .iter()
            .filter(|q| q.verified && q.matched_at.is_none() && q.verified_at.map_or(false, |v| v < before))
            .map(|q| q.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn verified_prices(&self, filter: &PriceFilter) -> Result<Vec<PriceRow>> {
        let mut rows = self.verified_rows(filter);
        rows.truncate(filter.limit() as usize);
        Ok(rows)
    }

    async fn price_history(&self, material_id: i64) -> Result<Vec<PricePoint>> {
        Ok(PricePoint::history(self.verified_rows(&PriceFilter::for_material(material_id))))
    }

    async fn supplier_price_summary(&self, material_id: i64) -> Result<Vec<SupplierPriceSummary>> {
        let rows = self.verified_rows(&PriceFilter::for_material(material_id));
        Ok(SupplierPriceSummary::summarize(&rows))
    }

    async fn category_price_summary(&self) -> Result<Vec<CategorySummary>> {
        Ok(CategorySummary::summarize(&self.verified_rows(&PriceFilter::default())))
    }

    async fn unmatched_line_items(&self, limit: i64) -> Result<Vec<LineItem>> {
        let candidates: Vec<LineItem> = self
            .line_items
            .iter()
            .filter(|li| li.fields.line_type == LineType::Material && li.material_id.is_none())
            .map(|li| li.clone())
            .collect();
        let mut items: Vec<LineItem> = candidates
            .into_iter()
            .filter(|li| {
                self.quotes
                    .get(&li.quote_id)
                    .map_or(false, |q| q.verified && q.matched_at.is_some())
            })
            .collect();
        items.sort_by_key(|li| li.id);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineItemFields, QuoteFields};
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    fn new_doc() -> NewDocument {
        NewDocument {
            organization_id: 1,
            storage_path: "org-1/quote.pdf".to_string(),
            file_name: "quote.pdf".to_string(),
        }
    }

    fn new_quote(supplier: Option<&str>) -> NewQuote {
        NewQuote {
            supplier: supplier.map(|name| SupplierInfo {
                name: name.to_string(),
                ..Default::default()
            }),
            fields: QuoteFields {
                quote_date: NaiveDate::from_ymd_opt(2024, 3, 1),
                ..Default::default()
            },
            extraction_confidence: 0.9,
            raw_extraction: Default::default(),
        }
    }

    fn material_line(description: &str, price: i64, sort_order: i32) -> NewLineItem {
        NewLineItem::new(
            LineItemFields {
                description: description.to_string(),
                quantity: Some(BigDecimal::from(1)),
                unit_price: Some(BigDecimal::from(price)),
                sort_order,
                ..Default::default()
            },
            Some(0.9),
        )
    }

    async fn processing_doc(store: &MemoryStore) -> Document {
        let doc = store.insert_document(new_doc()).await.unwrap();
        store
            .transition_document(doc.id, &[DocumentStatus::Pending], StatusChange::started(Utc::now()))
            .await
            .unwrap()
            .unwrap()
    }

    /// 一张已审批报价, 每行价格为 1..=lines
    async fn verified_quote(store: &MemoryStore, supplier: &str, lines: usize) -> Quote {
        let doc = processing_doc(store).await;
        let items = (0..lines)
            .map(|i| material_line("Plywood sheet", i as i64 + 1, i as i32))
            .collect();
        let (_, quote) = store
            .attach_quote(doc.id, DocumentStatus::Completed, Utc::now(), new_quote(Some(supplier)), items)
            .await
            .unwrap()
            .unwrap();
        store.approve_quote(quote.id, Utc::now()).await.unwrap();
        quote
    }

    #[tokio::test]
    async fn transition_respects_precondition() {
        let store = MemoryStore::new();
        let doc = store.insert_document(new_doc()).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);

        let started = store
            .transition_document(doc.id, &[DocumentStatus::Pending], StatusChange::started(Utc::now()))
            .await
            .unwrap();
        assert_eq!(started.unwrap().status, DocumentStatus::Processing);

        // 重复投递: 已不在 pending
        let again = store
            .transition_document(doc.id, &[DocumentStatus::Pending], StatusChange::started(Utc::now()))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn transition_outside_the_table_is_rejected() {
        let store = MemoryStore::new();
        let doc = store.insert_document(new_doc()).await.unwrap();

        // pending → failed 不在转移表中, 即使当前状态满足前置条件也不写入
        let err = store
            .transition_document(doc.id, &[DocumentStatus::Pending], StatusChange::failed("x", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: DocumentStatus::Pending,
                to: DocumentStatus::Failed,
                ..
            }
        ));
        let doc = store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.error_message, None);

        let doc = processing_doc(&store).await;
        let err = store
            .attach_quote(doc.id, DocumentStatus::Approved, Utc::now(), new_quote(None), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(store.quote_count(), 0);
    }

    #[tokio::test]
    async fn attach_quote_requires_processing() {
        let store = MemoryStore::new();
        let doc = store.insert_document(new_doc()).await.unwrap();

        let attached = store
            .attach_quote(
                doc.id,
                DocumentStatus::Completed,
                Utc::now(),
                new_quote(Some("Acme Lumber")),
                vec![material_line("Plywood", 10, 0)],
            )
            .await
            .unwrap();
        assert!(attached.is_none());
        assert_eq!(store.quote_count(), 0);
        // 前置条件不满足时也不创建供应商
        assert_eq!(store.supplier_count(), 0);
    }

    #[tokio::test]
    async fn suppliers_resolve_case_insensitively() {
        let store = MemoryStore::new();
        let first = processing_doc(&store).await;
        let second = processing_doc(&store).await;

        let (_, a) = store
            .attach_quote(first.id, DocumentStatus::Completed, Utc::now(), new_quote(Some("Acme Lumber")), Vec::new())
            .await
            .unwrap()
            .unwrap();
        let (_, b) = store
            .attach_quote(second.id, DocumentStatus::Completed, Utc::now(), new_quote(Some(" ACME lumber ")), Vec::new())
            .await
            .unwrap()
            .unwrap();
        assert!(a.supplier_id.is_some());
        assert_eq!(a.supplier_id, b.supplier_id);
        assert_eq!(store.supplier_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_skips_inactive_materials() {
        let store = MemoryStore::new();
        let plywood = store.add_material("Plywood 3/4", Some("Sheet Goods"), &[]);
        let osb = store.add_material("OSB 7/16", Some("Sheet Goods"), &[]);
        store.set_material_active(osb.id, false);

        let snapshot = store.catalog_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].material.id, plywood.id);
        assert_eq!(snapshot[0].match_count, 0);
    }

    #[tokio::test]
    async fn aggregates_cover_rows_beyond_the_search_limit() {
        let store = MemoryStore::new();
        let plywood = store.add_material("CDX Plywood", Some("Lumber"), &[]);
        let quote = verified_quote(&store, "Acme Lumber", 10_050).await;
        let results: Vec<(i64, Option<MaterialMatch>)> = store
            .list_line_items(quote.id)
            .await
            .unwrap()
            .into_iter()
            .map(|li| {
                let found = MaterialMatch {
                    material_id: plywood.id,
                    confidence: 1.0,
                };
                (li.id, Some(found))
            })
            .collect();
        store.record_matches(quote.id, &results, Utc::now()).await.unwrap();

        let search = PriceFilter {
            limit: Some(100_000),
            ..Default::default()
        };
        assert_eq!(store.verified_prices(&search).await.unwrap().len(), 10_000);

        assert_eq!(store.price_history(plywood.id).await.unwrap().len(), 10_050);

        let suppliers = store.supplier_price_summary(plywood.id).await.unwrap();
        assert_eq!(suppliers.len(), 1);
        assert_eq!(suppliers[0].observations, 10_050);
        assert_eq!(suppliers[0].max_price, BigDecimal::from(10_050));
        // (1 + 10050) / 2
        assert_eq!(suppliers[0].avg_price, "5025.5".parse::<BigDecimal>().unwrap());

        let categories = store.category_price_summary().await.unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].category, "Lumber");
        assert_eq!(categories[0].line_items, 10_050);
    }

    #[tokio::test]
    async fn unmatched_quotes_wait_for_the_grace_period() {
        let store = MemoryStore::new();
        let quote = verified_quote(&store, "Acme Lumber", 1).await;
        let later = Utc::now() + chrono::Duration::seconds(1);

        assert!(store.unmatched_quotes_before(quote.created_at).await.unwrap().is_empty());
        assert_eq!(store.unmatched_quotes_before(later).await.unwrap(), vec![quote.id]);

        store.record_matches(quote.id, &[], Utc::now()).await.unwrap();
        assert!(store.unmatched_quotes_before(later).await.unwrap().is_empty());
    }

    #[test]
    fn readers_and_match_writers_do_not_block_each_other() {
        let store = Arc::new(MemoryStore::new());
        let plywood = store.add_material("CDX Plywood", Some("Lumber"), &[]);
        let quotes: Vec<i64> = futures::executor::block_on(async {
            let mut ids = Vec::new();
            for i in 0..64 {
                ids.push(verified_quote(&store, &format!("Supplier {}", i % 4), 50).await.id);
            }
            ids
        });

        let (done, finished) = mpsc::channel();
        for worker in 0..4 {
            let store = store.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    let rows = futures::executor::block_on(store.verified_prices(&PriceFilter::default())).unwrap();
                    assert_eq!(rows.len(), PriceFilter::DEFAULT_LIMIT as usize);
                    futures::executor::block_on(store.unmatched_line_items(100)).unwrap();
                }
                done.send(format!("reader {}", worker)).unwrap();
            });
        }
        for worker in 0..4 {
            let store = store.clone();
            let quotes = quotes.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for quote_id in quotes.iter().skip(worker).step_by(4) {
                    let items = futures::executor::block_on(store.list_line_items(*quote_id)).unwrap();
                    let results: Vec<(i64, Option<MaterialMatch>)> = items
                        .iter()
                        .map(|li| {
                            let found = MaterialMatch {
                                material_id: plywood.id,
                                confidence: 0.9,
                            };
                            (li.id, Some(found))
                        })
                        .collect();
                    futures::executor::block_on(store.record_matches(*quote_id, &results, Utc::now())).unwrap();
                }
                done.send(format!("writer {}", worker)).unwrap();
            });
        }
        drop(done);

        for _ in 0..8 {
            finished
                .recv_timeout(Duration::from_secs(30))
                .expect("store operations stalled");
        }
    }
}
