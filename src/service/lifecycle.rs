use crate::db::Store;
use crate::error::{PipelineError, Result};
use crate::models::{
    Document, DocumentStatus, ExtractedQuote, ExtractionResult, NewDocument,
    NewLineItem, NewQuote, RawExtraction, StatusChange,
};
use crate::service::dispatch::{Task, TaskQueue};
use crate::service::extraction::ExtractionClient;
use crate::service::notify::{PipelineEvent, StatusNotifier};
use crate::service::storage::ObjectStorage;
use crate::service::validation::{Validator, Verdict};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 上传文件名序号, 同一毫秒内的上传也不会撞路径
static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// 一次状态推进请求的结果
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Document),
    /// 前置状态不满足 (重复投递或竞争), 未写入
    Ignored { current: DocumentStatus },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// 文档生命周期控制器
///
/// 状态机: pending → processing → {completed | review_needed | failed}。
/// 每个推进都是存储层的比较并设置, 重复或过期的事件只会被记录并忽略。
pub struct DocumentLifecycle {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStorage>,
    extraction: Arc<dyn ExtractionClient>,
    queue: TaskQueue,
    notifier: StatusNotifier,
    validator: Validator,
    extraction_timeout: Duration,
}

impl DocumentLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        extraction: Arc<dyn ExtractionClient>,
        queue: TaskQueue,
        notifier: StatusNotifier,
        validator: Validator,
        extraction_timeout: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            extraction,
            queue,
            notifier,
            validator,
            extraction_timeout,
        }
    }

    /// 保存原始文件并创建文档
    pub async fn upload(&self, organization_id: i64, file_name: &str, bytes: &[u8]) -> Result<Document> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(PipelineError::InvalidInput("file_name is required".to_string()));
        }
        if bytes.is_empty() {
            return Err(PipelineError::InvalidInput("uploaded document is empty".to_string()));
        }

        let storage_path = format!(
            "{}/{}-{}-{}",
            organization_id,
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed),
            storage_name(file_name)
        );
        self.storage
            .put(&storage_path, bytes)
            .await
            .map_err(|e| PipelineError::Dispatch(format!("failed to store upload: {}", e)))?;

        self.create(NewDocument {
            organization_id,
            storage_path,
            file_name: file_name.to_string(),
        })
        .await
    }

    /// 写入 pending 文档并提交一次抽取任务
    ///
    /// 提交失败时文档保持 pending, 调用方收到 Dispatch 错误。
    pub async fn create(&self, document: NewDocument) -> Result<Document> {
        let doc = self.store.insert_document(document).await?;
        if let Err(e) = self.queue.submit(Task::Extract { document_id: doc.id }) {
            tracing::error!("Document {} stays pending: {}", doc.id, e);
            return Err(e);
        }
        tracing::info!("Document {} created ({}), extraction queued", doc.id, doc.file_name);
        Ok(doc)
    }

    /// pending → processing
    pub async fn on_extraction_started(&self, document_id: i64) -> Result<Transition> {
        let change = StatusChange::started(Utc::now());
        match self
            .store
            .transition_document(document_id, &[DocumentStatus::Pending], change)
            .await?
        {
            Some(doc) => Ok(self.applied(doc)),
            None => self.ignored(document_id, "extraction start").await,
        }
    }

    /// processing → completed | review_needed, 报价草稿与状态在同一步写入
    pub async fn on_extraction_result(&self, document_id: i64, result: ExtractionResult) -> Result<Transition> {
        let extracted = match result {
            ExtractionResult::Extracted(extracted) => extracted,
            ExtractionResult::Failed { message } => return self.on_extraction_error(document_id, &message).await,
        };

        let doc = self.require_document(document_id).await?;
        if doc.status != DocumentStatus::Processing {
            tracing::warn!(
                "Document {} is {}, ignoring extraction result",
                document_id,
                doc.status
            );
            return Ok(Transition::Ignored { current: doc.status });
        }

        let (quote, line_items, next) = self.build_draft(extracted);
        match self
            .store
            .attach_quote(document_id, next, Utc::now(), quote, line_items)
            .await?
        {
            Some((doc, quote)) => {
                tracing::info!(
                    "Quote {} drafted for document {}: {} warnings, confidence {:.4}",
                    quote.id,
                    document_id,
                    quote.raw_extraction.warnings.len(),
                    quote.extraction_confidence
                );
                Ok(self.applied(doc))
            }
            None => self.ignored(document_id, "extraction result").await,
        }
    }

    /// processing → failed
    pub async fn on_extraction_error(&self, document_id: i64, message: &str) -> Result<Transition> {
        let change = StatusChange::failed(message, Utc::now());
        match self
            .store
            .transition_document(document_id, &[DocumentStatus::Processing], change)
            .await?
        {
            Some(doc) => {
                tracing::error!("Document {} failed: {}", document_id, message);
                Ok(self.applied(doc))
            }
            None => self.ignored(document_id, "extraction error").await,
        }
    }

    /// 推送回调: 在边界上解析原始 JSON, 非法负载按抽取失败处理后返回 MalformedPayload
    pub async fn deliver_payload(&self, document_id: i64, body: &[u8]) -> Result<Transition> {
        match ExtractionResult::from_slice(body) {
            Ok(result) => self.on_extraction_result(document_id, result).await,
            Err(e) => {
                self.on_extraction_error(document_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Worker 执行的完整抽取流程
    pub async fn run_extraction(&self, document_id: i64) -> Result<Transition> {
        let doc = match self.on_extraction_started(document_id).await? {
            Transition::Applied(doc) => doc,
            ignored => return Ok(ignored),
        };

        match self.fetch_extraction(&doc).await {
            Ok(result) => self.on_extraction_result(document_id, result).await,
            Err(e) if e.is_infrastructural() => self.on_extraction_error(document_id, &e.to_string()).await,
            // 其余错误 (数据库) 留给超时清扫
            Err(e) => Err(e),
        }
    }

    async fn fetch_extraction(&self, doc: &Document) -> Result<ExtractionResult> {
        let bytes = self.storage.get(&doc.storage_path).await?;
        let payload = tokio::time::timeout(
            self.extraction_timeout,
            self.extraction.extract(&doc.file_name, bytes),
        )
        .await
        .map_err(|_| PipelineError::Timeout(self.extraction_timeout.as_secs()))??;
        ExtractionResult::try_from(payload)
    }

    /// 超过抽取时限仍在 processing 的文档置为 failed
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<Document>> {
        let deadline = ChronoDuration::from_std(self.extraction_timeout)
            .map_err(|e| PipelineError::InvalidInput(format!("invalid extraction timeout: {}", e)))?;
        let stale = self
            .store
            .documents_started_before(DocumentStatus::Processing, now - deadline)
            .await?;
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let message = PipelineError::Timeout(self.extraction_timeout.as_secs()).to_string();
        let outcomes = join_all(stale.iter().map(|doc| {
            self.store.transition_document(
                doc.id,
                &[DocumentStatus::Processing],
                StatusChange::failed(message.as_str(), now),
            )
        }))
        .await;

        let mut expired = Vec::new();
        for outcome in outcomes {
            if let Some(doc) = outcome? {
                tracing::error!("Document {} failed: {}", doc.id, message);
                self.applied(doc.clone());
                expired.push(doc);
            }
        }
        tracing::info!("Expired {} stale documents", expired.len());
        Ok(expired)
    }

    /// 重新提交 `before` 之前创建且仍在 pending 的文档 (进程重启或提交失败后恢复)
    ///
    /// 重复提交是安全的: 抽取任务先以 pending → processing 抢占。
    pub async fn requeue_pending(&self, before: DateTime<Utc>) -> Result<usize> {
        let pending = self
            .store
            .documents_created_before(DocumentStatus::Pending, before)
            .await?;
        for doc in &pending {
            self.queue.submit(Task::Extract { document_id: doc.id })?;
        }
        if !pending.is_empty() {
            tracing::info!("Requeued {} pending documents", pending.len());
        }
        Ok(pending.len())
    }

    /// 轮询读取
    pub async fn status(&self, document_id: i64) -> Result<Document> {
        self.require_document(document_id).await
    }

    /// 供应商按名称解析放在 attach_quote 的同一原子步骤内
    fn build_draft(&self, extracted: ExtractedQuote) -> (NewQuote, Vec<NewLineItem>, DocumentStatus) {
        let reported: Vec<f64> = extracted
            .field_confidence
            .values()
            .copied()
            .chain(extracted.line_items.iter().filter_map(|li| li.extraction_confidence))
            .collect();
        let report = self
            .validator
            .validate(&extracted.fields, extracted.supplier.is_some(), &extracted.line_items, &reported);
        let next = match self.validator.verdict(&report) {
            Verdict::Clean => DocumentStatus::Completed,
            Verdict::NeedsReview => DocumentStatus::ReviewNeeded,
        };

        let quote = NewQuote {
            supplier: extracted.supplier,
            fields: extracted.fields,
            extraction_confidence: report.overall_confidence,
            raw_extraction: RawExtraction {
                field_confidence: extracted.field_confidence,
                warnings: report.warnings,
                model: extracted.model,
                dropped_fields: extracted.dropped_fields,
            },
        };
        (quote, extracted.line_items, next)
    }

    async fn require_document(&self, document_id: i64) -> Result<Document> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or(PipelineError::not_found("document", document_id))
    }

    fn applied(&self, doc: Document) -> Transition {
        tracing::info!("Document {} → {}", doc.id, doc.status);
        self.notifier.publish(PipelineEvent::StatusChanged {
            document_id: doc.id,
            quote_id: doc.quote_id,
            status: doc.status,
            at: Utc::now(),
        });
        Transition::Applied(doc)
    }

    async fn ignored(&self, document_id: i64, event: &str) -> Result<Transition> {
        let current = self.require_document(document_id).await?.status;
        tracing::warn!("Document {} is {}, ignoring {}", document_id, current, event);
        Ok(Transition::Ignored { current })
    }
}

/// 存储路径里只保留安全字符
fn storage_name(file_name: &str) -> String {
    let base = file_name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(file_name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}
