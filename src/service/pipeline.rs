use crate::config::PipelineConfig;
use crate::db::Store;
use crate::error::Result;
use crate::service::dispatch::{TaskQueue, TaskReceiver};
use crate::service::extraction::ExtractionClient;
use crate::service::lifecycle::DocumentLifecycle;
use crate::service::matcher::{MaterialMatcher, MatcherService};
use crate::service::notify::StatusNotifier;
use crate::service::query::PriceQueryService;
use crate::service::review::ReviewService;
use crate::service::storage::ObjectStorage;
use crate::service::validation::{ValidationPolicy, Validator};
use crate::service::worker::{self, Worker};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 组装好的流水线服务
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub lifecycle: Arc<DocumentLifecycle>,
    pub review: Arc<ReviewService>,
    pub matcher: Arc<MatcherService>,
    pub prices: Arc<PriceQueryService>,
    pub notifier: StatusNotifier,
    pub queue: TaskQueue,
    config: PipelineConfig,
}

impl Pipeline {
    /// 返回流水线和任务队列的接收端 (交给 Worker)
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        extraction: Arc<dyn ExtractionClient>,
        config: &PipelineConfig,
    ) -> (Self, TaskReceiver) {
        let (queue, rx) = TaskQueue::channel();
        let notifier = StatusNotifier::default();
        let validator = Validator::new(ValidationPolicy::from_config(config));

        let lifecycle = Arc::new(DocumentLifecycle::new(
            store.clone(),
            storage,
            extraction,
            queue.clone(),
            notifier.clone(),
            validator.clone(),
            Duration::from_secs(config.extraction_timeout_secs),
        ));
        let review = Arc::new(ReviewService::new(
            store.clone(),
            queue.clone(),
            notifier.clone(),
            validator,
        ));
        let matcher = Arc::new(MatcherService::new(
            store.clone(),
            MaterialMatcher::from_config(config),
            notifier.clone(),
        ));
        let prices = Arc::new(PriceQueryService::new(store.clone()));

        let pipeline = Self {
            store,
            lifecycle,
            review,
            matcher,
            prices,
            notifier,
            queue,
            config: config.clone(),
        };
        (pipeline, rx)
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            self.lifecycle.clone(),
            self.matcher.clone(),
            self.config.worker_concurrency,
        )
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        worker::spawn_sweeper(
            self.lifecycle.clone(),
            self.review.clone(),
            Duration::from_secs(self.config.sweep_interval_secs),
        )
    }

    /// 重新提交 `before` 之前留下的未完成工作 (pending 文档, 已审批未匹配报价), 返回提交数
    pub async fn requeue_unfinished(&self, before: DateTime<Utc>) -> Result<usize> {
        let documents = self.lifecycle.requeue_pending(before).await?;
        let quotes = self.review.requeue_unmatched(before).await?;
        Ok(documents + quotes)
    }
}
