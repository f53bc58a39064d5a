use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 后台任务
///
/// 投递语义为至少一次, 处理方依靠文档/报价的状态检查保证幂等。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    Extract { document_id: i64 },
    MatchQuote { quote_id: i64 },
}

/// 任务队列的发送端
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

/// 任务队列的接收端, 由 Worker 独占
#[derive(Debug)]
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl TaskQueue {
    pub fn channel() -> (TaskQueue, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TaskQueue { tx }, TaskReceiver { rx })
    }

    pub fn submit(&self, task: Task) -> Result<()> {
        self.tx
            .send(task)
            .map_err(|e| PipelineError::Dispatch(format!("task queue closed, dropped {:?}", e.0)))?;
        tracing::debug!("queued {:?}", task);
        Ok(())
    }
}

impl TaskReceiver {
    pub async fn recv(&mut self) -> Option<Task> {
        self.rx.recv().await
    }

    /// 非阻塞取一个已入队任务
    pub fn try_recv(&mut self) -> Option<Task> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_fails_once_receiver_is_gone() {
        let (queue, rx) = TaskQueue::channel();
        drop(rx);
        let err = queue.submit(Task::Extract { document_id: 7 }).unwrap_err();
        assert!(matches!(err, PipelineError::Dispatch(_)));
    }

    #[test]
    fn tasks_arrive_in_order() {
        let (queue, mut rx) = TaskQueue::channel();
        queue.submit(Task::Extract { document_id: 1 }).unwrap();
        queue.submit(Task::MatchQuote { quote_id: 2 }).unwrap();
        assert_eq!(rx.try_recv(), Some(Task::Extract { document_id: 1 }));
        assert_eq!(rx.try_recv(), Some(Task::MatchQuote { quote_id: 2 }));
        assert_eq!(rx.try_recv(), None);
    }
}
