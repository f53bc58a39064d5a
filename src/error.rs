use crate::models::DocumentStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// 流水线错误
///
/// 校验告警和物料未匹配不属于错误, 它们以数据形式返回 (告警列表 / `None`)。
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 无法派发抽取任务 (队列关闭, 存储不可写), 文档保持 pending
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// 抽取服务返回错误
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// 抽取结果无法解析或字段非法
    #[error("malformed extraction payload: {0}")]
    MalformedPayload(String),

    /// 抽取服务超时
    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    /// 报价已审批, 不再接受修改
    #[error("quote {0} is immutable after approval")]
    QuoteImmutable(i64),

    #[error("invalid transition for document {document_id}: {from} -> {to}")]
    InvalidTransition {
        document_id: i64,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("csv export error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// 基础设施类错误: 会让文档进入 failed 并原样展示给用户
    pub fn is_infrastructural(&self) -> bool {
        matches!(
            self,
            Self::Extraction(_) | Self::MalformedPayload(_) | Self::Timeout(_) | Self::Storage(_)
        )
    }
}
