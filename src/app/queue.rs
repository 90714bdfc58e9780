use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::model::WorkItem;

/// Creates the unbounded handoff between discovery and the worker pool.
///
/// The queue closes once every [`WorkQueue`] handle is dropped; consumers then
/// drain what is left and observe `None`.
pub fn work_queue() -> (WorkQueue, WorkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        WorkQueue { tx },
        WorkReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl WorkQueue {
    /// Never blocks. Fails only when no consumer is left.
    pub fn push(&self, item: WorkItem) -> anyhow::Result<()> {
        let chapter = item.chapter;
        self.tx
            .send(item)
            .map_err(|_| anyhow::anyhow!("work queue has no consumers (chapter {chapter})"))
    }

    /// Drops this producer handle.
    pub fn close(self) {}
}

#[derive(Debug, Clone)]
pub struct WorkReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
}

impl WorkReceiver {
    /// Waits for the next item; `None` means closed and empty.
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn take(&self) -> Option<WorkItem> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}
