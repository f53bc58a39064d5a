use crate::db::Store;
use crate::error::{PipelineError, Result};
use crate::models::{
    ApprovalOutcome, Document, DocumentStatus, LineItemEdit, NewLineItem, Quote, QuoteDetail,
    QuoteFields, QuoteUpdate, RawExtraction, ReviewLine,
};
use crate::service::dispatch::{Task, TaskQueue};
use crate::service::notify::{PipelineEvent, StatusNotifier};
use crate::service::validation::Validator;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// 人工复核与审批
pub struct ReviewService {
    store: Arc<dyn Store>,
    queue: TaskQueue,
    notifier: StatusNotifier,
    validator: Validator,
}

impl ReviewService {
    pub fn new(store: Arc<dyn Store>, queue: TaskQueue, notifier: StatusNotifier, validator: Validator) -> Self {
        Self {
            store,
            queue,
            notifier,
            validator,
        }
    }

    pub async fn get_draft(&self, quote_id: i64) -> Result<QuoteDetail> {
        let quote = self.require_quote(quote_id).await?;
        let document = self.require_document(quote.document_id).await?;
        let line_items = self.store.list_line_items(quote_id).await?;
        Ok(QuoteDetail {
            document,
            quote,
            line_items,
        })
    }

    /// 保存复核修改: 提交的明细即为完整行集合 (带 id 更新, 不带 id 新增, 未提交的删除)
    ///
    /// 折后单价和校验结果全部重新计算。
    pub async fn save(&self, quote_id: i64, fields: QuoteFields, edits: Vec<LineItemEdit>) -> Result<QuoteDetail> {
        let quote = self.require_quote(quote_id).await?;
        if quote.verified {
            return Err(PipelineError::QuoteImmutable(quote_id));
        }
        let document = self.require_document(quote.document_id).await?;
        if !document.status.is_reviewable() {
            return Err(PipelineError::InvalidTransition {
                document_id: document.id,
                from: document.status,
                to: DocumentStatus::ReviewNeeded,
            });
        }

        // 已有行保留抽取置信度
        let confidences: HashMap<i64, Option<f64>> = self
            .store
            .list_line_items(quote_id)
            .await?
            .into_iter()
            .map(|li| (li.id, li.extraction_confidence))
            .collect();

        let lines: Vec<ReviewLine> = edits
            .into_iter()
            .enumerate()
            .map(|(idx, edit)| {
                let mut fields = edit.fields;
                fields.description = fields.description.trim().to_string();
                fields.sort_order = idx as i32;
                let confidence = edit.id.and_then(|id| confidences.get(&id).copied().flatten());
                ReviewLine {
                    id: edit.id,
                    item: NewLineItem::new(fields, confidence),
                }
            })
            .collect();

        let raw = quote.raw_extraction.0;
        let reported: Vec<f64> = raw
            .field_confidence
            .values()
            .copied()
            .chain(lines.iter().filter_map(|l| l.item.extraction_confidence))
            .collect();
        let items: Vec<&NewLineItem> = lines.iter().map(|l| &l.item).collect();
        let report = self
            .validator
            .validate(&fields, quote.supplier_id.is_some(), &items, &reported);

        let blocking = report.warnings.iter().filter(|w| w.is_blocking()).count();
        let update = QuoteUpdate {
            fields,
            extraction_confidence: report.overall_confidence,
            raw_extraction: RawExtraction {
                warnings: report.warnings,
                ..raw
            },
        };

        if !self.store.save_review(quote_id, update, lines).await? {
            // 与审批并发时以审批为准
            return Err(PipelineError::QuoteImmutable(quote_id));
        }
        tracing::info!(
            "Quote {} review saved: {} blocking warnings, confidence {:.4}",
            quote_id,
            blocking,
            report.overall_confidence
        );

        self.get_draft(quote_id).await
    }

    /// 审批并提交一次匹配任务; 已审批的报价直接返回 AlreadyApproved
    pub async fn approve(&self, quote_id: i64) -> Result<ApprovalOutcome> {
        let outcome = self.store.approve_quote(quote_id, Utc::now()).await?;
        match &outcome {
            ApprovalOutcome::Approved(doc) => {
                tracing::info!("Quote {} approved, document {} → {}", quote_id, doc.id, doc.status);
                self.notifier.publish(PipelineEvent::StatusChanged {
                    document_id: doc.id,
                    quote_id: Some(quote_id),
                    status: doc.status,
                    at: Utc::now(),
                });
                self.queue.submit(Task::MatchQuote { quote_id })?;
            }
            ApprovalOutcome::AlreadyApproved => {
                tracing::info!("Quote {} already approved, nothing to do", quote_id);
            }
            ApprovalOutcome::NotReviewable(doc) => {
                return Err(PipelineError::InvalidTransition {
                    document_id: doc.id,
                    from: doc.status,
                    to: DocumentStatus::Approved,
                });
            }
        }
        Ok(outcome)
    }

    /// 目录更新后重新匹配已审批报价
    pub async fn rematch(&self, quote_id: i64) -> Result<()> {
        let quote = self.require_quote(quote_id).await?;
        if !quote.verified {
            return Err(PipelineError::InvalidInput(format!(
                "quote {} is not approved yet",
                quote_id
            )));
        }
        self.queue.submit(Task::MatchQuote { quote_id })?;
        tracing::info!("Quote {} queued for rematch", quote_id);
        Ok(())
    }

    /// 重新提交 `before` 之前审批但仍未写回匹配结果的报价
    pub async fn requeue_unmatched(&self, before: DateTime<Utc>) -> Result<usize> {
        let quote_ids = self.store.unmatched_quotes_before(before).await?;
        for quote_id in &quote_ids {
            self.queue.submit(Task::MatchQuote { quote_id: *quote_id })?;
        }
        if !quote_ids.is_empty() {
            tracing::info!("Requeued {} approved quotes for matching", quote_ids.len());
        }
        Ok(quote_ids.len())
    }

    async fn require_quote(&self, quote_id: i64) -> Result<Quote> {
        self.store
            .get_quote(quote_id)
            .await?
            .ok_or(PipelineError::not_found("quote", quote_id))
    }

    async fn require_document(&self, document_id: i64) -> Result<Document> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or(PipelineError::not_found("document", document_id))
    }
}
