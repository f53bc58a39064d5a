use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// 文档状态
///
/// `pending → processing → {completed | review_needed | failed}`,
/// `completed | review_needed → approved`。`approved` 与 `failed` 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "document_status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    ReviewNeeded,
    Approved,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::ReviewNeeded => "review_needed",
            Self::Approved => "approved",
            Self::Failed => "failed",
        }
    }

    /// 可进入人工复核/审批的状态
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::Completed | Self::ReviewNeeded)
    }

    /// 状态机的唯一合法转移表
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, ReviewNeeded)
                | (Processing, Failed)
                | (Completed, Approved)
                | (ReviewNeeded, Approved)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 上传的源文件及其处理状态
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub organization_id: i64,
    pub storage_path: String,
    pub file_name: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub quote_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub organization_id: i64,
    pub storage_path: String,
    pub file_name: String,
}

/// 一次状态变更 (连同需要一并写入的时间戳/错误信息)
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub to: DocumentStatus,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            to: DocumentStatus::Processing,
            error_message: None,
            started_at: Some(at),
            completed_at: None,
        }
    }

    pub fn failed(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            to: DocumentStatus::Failed,
            error_message: Some(message.into()),
            started_at: None,
            completed_at: Some(at),
        }
    }

    pub fn approved() -> Self {
        Self {
            to: DocumentStatus::Approved,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// 每个前置状态都必须能按转移表到达目标状态
    pub fn check_sources(&self, document_id: i64, from: &[DocumentStatus]) -> Result<(), PipelineError> {
        match from.iter().find(|s| !s.can_transition_to(self.to)) {
            Some(source) => Err(PipelineError::InvalidTransition {
                document_id,
                from: *source,
                to: self.to,
            }),
            None => Ok(()),
        }
    }
}
