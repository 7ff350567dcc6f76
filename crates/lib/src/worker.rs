//! Outbound task queue drained by a fixed pool of workers.
//!
//! Handlers enqueue [`OutboundTask`]s (a Web API method plus a form) and return immediately.
//! Each worker takes one task at a time and performs exactly one call for it. A failed call is
//! logged together with its payload and the task is dropped; nothing is retried.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::slack::api::CHAT_POST_MESSAGE;

/// Flat string-keyed form payload.
pub type Form = BTreeMap<String, String>;

/// Performs one outbound API call. Implemented by the Slack client; tests substitute a recorder.
#[async_trait]
pub trait ApiCaller: Send + Sync {
    async fn call(&self, method: &str, form: &Form) -> Result<(), String>;
}

/// Where a task came from; carried along so failures can be traced back to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub request_id: String,
}

impl TaskContext {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One queued outbound call.
#[derive(Debug, Clone)]
pub struct OutboundTask {
    pub method: String,
    pub form: Form,
    pub context: TaskContext,
}

impl OutboundTask {
    /// chat.postMessage to `channel` as the bot user.
    pub fn post_message(context: &TaskContext, channel: &str, text: &str) -> Self {
        let mut form = Form::new();
        form.insert("channel".to_string(), channel.to_string());
        form.insert("text".to_string(), text.to_string());
        Self {
            method: CHAT_POST_MESSAGE.to_string(),
            form,
            context: context.clone(),
        }
    }

    /// Post as the app integration rather than the bot user (`as_user=false`).
    pub fn not_as_user(mut self) -> Self {
        self.form.insert("as_user".to_string(), "false".to_string());
        self
    }
}

/// Producer side of the task queue. Cheap to clone; the queue is unbounded.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<OutboundTask>,
}

impl TaskQueue {
    /// Enqueue a task. Returns false when the pool has shut down.
    pub fn push(&self, task: OutboundTask) -> bool {
        match self.tx.send(task) {
            Ok(()) => true,
            Err(mpsc::error::SendError(task)) => {
                log::warn!(
                    "[{}] worker pool stopped, dropping {} {:?}",
                    task.context.request_id,
                    task.method,
                    task.form
                );
                false
            }
        }
    }
}

/// Handles to the running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) sharing one queue. Workers stop when `shutdown` is
    /// cancelled or when every [`TaskQueue`] handle is dropped and the queue is empty.
    pub fn spawn(
        size: usize,
        caller: Arc<dyn ApiCaller>,
        shutdown: CancellationToken,
    ) -> (TaskQueue, WorkerPool) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let size = size.max(1);
        let handles = (0..size)
            .map(|id| {
                let rx = rx.clone();
                let caller = caller.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { run_worker(id, rx, caller, shutdown).await })
            })
            .collect();
        log::info!("worker pool started with {} worker(s)", size);
        (TaskQueue { tx }, WorkerPool { handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for h in self.handles {
            let _ = h.await;
        }
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<OutboundTask>>>,
    caller: Arc<dyn ApiCaller>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            task = async { rx.lock().await.recv().await } => task,
        };
        let Some(task) = next else { break };
        log::debug!("worker {}: [{}] {}", id, task.context.request_id, task.method);
        if let Err(e) = caller.call(&task.method, &task.form).await {
            log::warn!(
                "worker {}: [{}] {} failed: {}\n{:?}",
                id,
                task.context.request_id,
                task.method,
                e,
                task.form
            );
        }
    }
    log::debug!("worker {} stopped", id);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A queue with no workers behind it; tasks stay in the returned receiver.
    pub fn queue() -> (TaskQueue, mpsc::UnboundedReceiver<OutboundTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TaskQueue { tx }, rx)
    }

    /// Records every call; fails calls whose text equals `fail_text`.
    #[derive(Default)]
    pub struct RecordingCaller {
        pub calls: std::sync::Mutex<Vec<(String, Form)>>,
        pub fail_text: Option<String>,
    }

    impl RecordingCaller {
        pub fn texts(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(_, f)| f.get("text").cloned())
                .collect()
        }
    }

    #[async_trait]
    impl ApiCaller for RecordingCaller {
        async fn call(&self, method: &str, form: &Form) -> Result<(), String> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), form.clone()));
            if self.fail_text.is_some() && form.get("text") == self.fail_text.as_ref() {
                return Err("channel_not_found".to_string());
            }
            Ok(())
        }
    }
}
