use crate::error::Result;
use crate::service::dispatch::{Task, TaskReceiver};
use crate::service::lifecycle::DocumentLifecycle;
use crate::service::matcher::MatcherService;
use crate::service::review::ReviewService;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// 后台任务执行器
#[derive(Clone)]
pub struct Worker {
    lifecycle: Arc<DocumentLifecycle>,
    matcher: Arc<MatcherService>,
    concurrency: usize,
}

impl Worker {
    pub fn new(lifecycle: Arc<DocumentLifecycle>, matcher: Arc<MatcherService>, concurrency: usize) -> Self {
        Self {
            lifecycle,
            matcher,
            concurrency: concurrency.max(1),
        }
    }

    /// 执行单个任务; 处理方自身幂等, 重复投递无副作用
    pub async fn handle(&self, task: Task) -> Result<()> {
        match task {
            Task::Extract { document_id } => {
                self.lifecycle.run_extraction(document_id).await?;
            }
            Task::MatchQuote { quote_id } => {
                self.matcher.run_for_quote(quote_id).await?;
            }
        }
        Ok(())
    }

    /// 消费队列直到发送端全部关闭, 并发数受信号量限制
    pub async fn run(self, mut rx: TaskReceiver) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        tracing::info!("Worker started (concurrency {})", self.concurrency);

        while let Some(task) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker = self.clone();
            tokio::spawn(async move {
                if let Err(e) = worker.handle(task).await {
                    tracing::error!("Task {:?} failed: {}", task, e);
                }
                drop(permit);
            });
        }

        tracing::info!("Task queue closed, worker stopped");
    }

    /// 顺序执行所有已入队任务 (包括执行过程中新入队的), 返回执行数
    pub async fn drain(&self, rx: &mut TaskReceiver) -> usize {
        let mut handled = 0;
        while let Some(task) = rx.try_recv() {
            if let Err(e) = self.handle(task).await {
                tracing::error!("Task {:?} failed: {}", task, e);
            }
            handled += 1;
        }
        handled
    }
}

/// 周期性清扫: 超时的 processing 文档置为 failed, 滞留的 pending 文档与未匹配报价重新入队
///
/// 只重新提交至少滞留一个周期的工作, 刚入队的任务不会被重复提交。
pub fn spawn_sweeper(
    lifecycle: Arc<DocumentLifecycle>,
    review: Arc<ReviewService>,
    every: Duration,
) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    let grace = ChronoDuration::from_std(every).unwrap_or_else(|_| ChronoDuration::seconds(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let now = Utc::now();
            if let Err(e) = lifecycle.expire_stale(now).await {
                tracing::error!("Stale document sweep failed: {}", e);
            }
            if let Err(e) = lifecycle.requeue_pending(now - grace).await {
                tracing::error!("Pending document requeue failed: {}", e);
            }
            if let Err(e) = review.requeue_unmatched(now - grace).await {
                tracing::error!("Unmatched quote requeue failed: {}", e);
            }
        }
    })
}
