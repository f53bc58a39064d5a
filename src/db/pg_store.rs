use crate::db::queries;
use crate::db::store::{CatalogReader, Store};
use crate::error::{PipelineError, Result};
use crate::models::{
    ApprovalOutcome, CatalogEntry, CategorySummary, Document, DocumentStatus, LineItem, MaterialMatch,
    NewDocument, NewLineItem, NewQuote, PriceFilter, PricePoint, PriceRow, Quote, QuoteUpdate,
    ReviewLine, StatusChange, SupplierPriceSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use std::time::Duration;

/// 单个写事务的超时
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres 存储
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 为写事务加超时控制
async fn with_timeout<T>(what: &str, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(WRITE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("✗ {} timed out (>{}s)", what, WRITE_TIMEOUT.as_secs());
            Err(PipelineError::Database(sqlx::Error::PoolTimedOut))
        }
    }
}

#[async_trait]
impl CatalogReader for PgStore {
    async fn catalog_snapshot(&self) -> Result<Vec<CatalogEntry>> {
        Ok(queries::catalog_snapshot(&self.pool).await?)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_document(&self, document: NewDocument) -> Result<Document> {
        Ok(queries::insert_document(&self.pool, &document).await?)
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        Ok(queries::get_document(&self.pool, id).await?)
    }

    async fn transition_document(
        &self,
        id: i64,
        from: &[DocumentStatus],
        change: StatusChange,
    ) -> Result<Option<Document>> {
        change.check_sources(id, from)?;
        if let Some(doc) = queries::transition_document(&self.pool, id, from, &change).await? {
            return Ok(Some(doc));
        }
        match queries::get_document(&self.pool, id).await? {
            Some(_) => Ok(None),
            None => Err(PipelineError::not_found("document", id)),
        }
    }

    async fn documents_started_before(
        &self,
        status: DocumentStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        Ok(queries::documents_started_before(&self.pool, status, before).await?)
    }

    async fn documents_created_before(
        &self,
        status: DocumentStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        Ok(queries::documents_created_before(&self.pool, status, before).await?)
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
        with_timeout("attach quote", async {
            let mut tx = self.pool.begin().await?;

            let Some(doc) = queries::lock_document(&mut *tx, document_id).await? else {
                return Err(PipelineError::not_found("document", document_id));
            };
            if doc.status != DocumentStatus::Processing {
                tx.rollback().await?;
                return Ok(None);
            }

            let supplier_id = match &quote.supplier {
                Some(info) => Some(queries::upsert_supplier(&mut *tx, info).await?.id),
                None => None,
            };
            let stored = queries::insert_quote(&mut *tx, document_id, supplier_id, &quote).await?;
            for chunk in line_items.chunks(1000) {
                queries::insert_line_items(&mut *tx, stored.id, chunk).await?;
            }
            let doc = queries::complete_document(&mut *tx, document_id, next, stored.id, completed_at).await?;

            tx.commit().await?;
            Ok(Some((doc, stored)))
        })
        .await
    }

    async fn get_quote(&self, id: i64) -> Result<Option<Quote>> {
        Ok(queries::get_quote(&self.pool, id).await?)
    }

    async fn list_line_items(&self, quote_id: i64) -> Result<Vec<LineItem>> {
        Ok(queries::list_line_items(&self.pool, quote_id).await?)
    }

    async fn save_review(&self, quote_id: i64, update: QuoteUpdate, lines: Vec<ReviewLine>) -> Result<bool> {
        with_timeout("save review", async {
            let mut tx = self.pool.begin().await?;

            let Some(quote) = queries::lock_quote(&mut *tx, quote_id).await? else {
                return Err(PipelineError::not_found("quote", quote_id));
            };
            if quote.verified {
                tx.rollback().await?;
                return Ok(false);
            }

            let existing: HashSet<i64> = queries::list_line_items(&mut *tx, quote_id)
                .await?
                .into_iter()
                .map(|li| li.id)
                .collect();
            if let Some(foreign) = lines.iter().filter_map(|l| l.id).find(|id| !existing.contains(id)) {
                tx.rollback().await?;
                return Err(PipelineError::InvalidInput(format!(
                    "line item {} does not belong to quote {}",
                    foreign, quote_id
                )));
            }

            let keep: Vec<i64> = lines.iter().filter_map(|l| l.id).collect();
            let removed = queries::delete_line_items_except(&mut *tx, quote_id, &keep).await?;

            let mut added = Vec::new();
            for line in lines {
                match line.id {
                    Some(id) => {
                        queries::update_line_item(&mut *tx, id, quote_id, &line.item).await?;
                    }
                    None => added.push(line.item),
                }
            }
            queries::insert_line_items(&mut *tx, quote_id, &added).await?;
            queries::update_quote(&mut *tx, quote_id, &update).await?;

            tx.commit().await?;
            tracing::debug!(
                "quote {} review saved: {} kept, {} added, {} removed",
                quote_id,
                keep.len(),
                added.len(),
                removed
            );
            Ok(true)
        })
        .await
    }

    async fn approve_quote(&self, quote_id: i64, at: DateTime<Utc>) -> Result<ApprovalOutcome> {
        with_timeout("approve quote", async {
            let mut tx = self.pool.begin().await?;

            let Some(quote) = queries::lock_quote(&mut *tx, quote_id).await? else {
                return Err(PipelineError::not_found("quote", quote_id));
            };
            if quote.verified {
                tx.rollback().await?;
                return Ok(ApprovalOutcome::AlreadyApproved);
            }
            let Some(doc) = queries::lock_document(&mut *tx, quote.document_id).await? else {
                return Err(PipelineError::not_found("document", quote.document_id));
            };
            if !doc.status.can_transition_to(DocumentStatus::Approved) {
                tx.rollback().await?;
                return Ok(ApprovalOutcome::NotReviewable(doc));
            }

            queries::mark_quote_verified(&mut *tx, quote_id, at).await?;
            let change = StatusChange::approved();
            let approved = queries::transition_document(&mut *tx, doc.id, &[doc.status], &change)
                .await?
                .ok_or(PipelineError::InvalidTransition {
                    document_id: doc.id,
                    from: doc.status,
                    to: DocumentStatus::Approved,
                })?;

            tx.commit().await?;
            Ok(ApprovalOutcome::Approved(approved))
        })
        .await
    }

    async fn record_matches(
        &self,
        quote_id: i64,
        results: &[(i64, Option<MaterialMatch>)],
        at: DateTime<Utc>,
    ) -> Result<()> {
        with_timeout("record matches", async {
            let mut tx = self.pool.begin().await?;
            for (line_item_id, result) in results {
                queries::set_line_item_match(
                    &mut *tx,
                    quote_id,
                    *line_item_id,
                    result.map(|m| m.material_id),
                    result.map(|m| m.confidence),
                )
                .await?;
            }
            queries::mark_quote_matched(&mut *tx, quote_id, at).await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn unmatched_quotes_before(&self, before: DateTime<Utc>) -> Result<Vec<i64>> {
        Ok(queries::unmatched_quotes_before(&self.pool, before).await?)
    }

    async fn verified_prices(&self, filter: &PriceFilter) -> Result<Vec<PriceRow>> {
        Ok(queries::verified_prices(&self.pool, filter).await?)
    }

    async fn price_history(&self, material_id: i64) -> Result<Vec<PricePoint>> {
        Ok(queries::price_history(&self.pool, material_id).await?)
    }

    async fn supplier_price_summary(&self, material_id: i64) -> Result<Vec<SupplierPriceSummary>> {
        Ok(queries::supplier_price_summary(&self.pool, material_id).await?)
    }

    async fn category_price_summary(&self) -> Result<Vec<CategorySummary>> {
        Ok(queries::category_price_summary(&self.pool).await?)
    }

    async fn unmatched_line_items(&self, limit: i64) -> Result<Vec<LineItem>> {
        Ok(queries::unmatched_line_items(&self.pool, limit).await?)
    }
}
