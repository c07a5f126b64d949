//! 串行任务队列：同步调用方提交的异步存储操作在此排队执行。
//!
//! 任务在单个 worker 上按入队顺序依次执行。同步读取不会等待队列，
//! 入队后尚未完成的修改对其不可见。

use crate::error::{StoreError, StoreResult};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum Message {
    Run {
        label: &'static str,
        job: BoxFuture<'static, StoreResult<()>>,
    },
    Settle(oneshot::Sender<()>),
}

struct QueueInner {
    tx: mpsc::UnboundedSender<Message>,
    /// Taken when the worker is spawned.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    failure: Arc<Mutex<Option<StoreError>>>,
}

#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                tx,
                rx: Mutex::new(Some(rx)),
                failure: Arc::new(Mutex::new(None)),
            }),
        }
    }

    /// Queue `job` behind every previously queued job and return without
    /// waiting. Fails only when no Tokio runtime is available to drive it.
    pub fn enqueue<F>(&self, label: &'static str, job: F) -> StoreResult<()>
    where
        F: Future<Output = StoreResult<()>> + Send + 'static,
    {
        self.ensure_worker()?;
        self.inner
            .tx
            .send(Message::Run {
                label,
                job: Box::pin(job),
            })
            .map_err(|_| StoreError::io("store task queue worker has stopped"))?;
        debug!(op = label, "queued store operation");
        Ok(())
    }

    /// Wait until every job queued so far has finished. Recorded failures
    /// stay in place for [`TaskQueue::settled`].
    pub async fn idle(&self) {
        let started = self.inner.rx.lock().is_none();
        if started {
            let (done_tx, done_rx) = oneshot::channel();
            if self.inner.tx.send(Message::Settle(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    /// Wait until every job queued so far has finished.
    ///
    /// Returns the first failure recorded since the previous call, if any.
    pub async fn settled(&self) -> StoreResult<()> {
        self.idle().await;
        match self.inner.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn ensure_worker(&self) -> StoreResult<()> {
        let mut slot = self.inner.rx.lock();
        if let Some(rx) = slot.take() {
            let handle = match Handle::try_current() {
                Ok(handle) => handle,
                Err(e) => {
                    *slot = Some(rx);
                    return Err(StoreError::io(format!(
                        "no async runtime to run queued store operations: {e}"
                    )));
                }
            };
            handle.spawn(run_worker(rx, self.inner.failure.clone()));
        }
        Ok(())
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Message>,
    failure: Arc<Mutex<Option<StoreError>>>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Run { label, job } => {
                if let Err(err) = job.await {
                    warn!(op = label, error = %err, "queued store operation failed");
                    failure.lock().get_or_insert(err);
                }
            }
            Message::Settle(done) => {
                let _ = done.send(());
            }
        }
    }
}
