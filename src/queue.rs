//! Conversation queue: the central scheduler
//!
//! Admission is a lock-free channel send callable from any concurrent
//! context; processing is one dedicated worker task draining the channel in
//! FIFO order. The single-consumer shape is what guarantees at most one
//! task ever drives the browser page at a time — the page has no internal
//! concurrency control and corrupts state under concurrent navigation or
//! typing.

#[cfg(test)]
pub mod testing;


use crate::browser::BrowserError;
use crate::chat::Message;
use crate::oracle::{ReplyDecision, ReplyOracle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the queue needs from the page. `WebChatPage` is the production
/// implementation; tests substitute mocks.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Bring the named conversation into view. Returns false when its title
    /// element is not present in the current view — the task is then
    /// abandoned without retry.
    async fn open_conversation(&self, title: &str) -> Result<bool, BrowserError>;

    /// Full transcript of the open conversation, oldest first.
    async fn extract_transcript(&self) -> Result<Vec<Message>, BrowserError>;

    /// Type and submit a reply into the open conversation. Fails with
    /// `ElementNotFound` when the composer never appears within its bound.
    async fn send_reply(&self, text: &str) -> Result<(), BrowserError>;
}

/// One admitted unit of work. Created on `enqueue`, destroyed when
/// processing completes or fails.
#[derive(Debug)]
pub struct ConversationTask {
    pub conversation_id: String,
    pub is_group: bool,
    pub enqueued_at: DateTime<Utc>,
}

/// How a task ended, for the log.
#[derive(Debug, PartialEq, Eq)]
enum TaskOutcome {
    Replied,
    Skipped,
    Abandoned(&'static str),
}

/// Handle to the scheduler. Dropping it closes admission; the worker then
/// drains what remains and stops.
pub struct ConversationQueue {
    tx: mpsc::UnboundedSender<ConversationTask>,
    worker: JoinHandle<()>,
}

impl ConversationQueue {
    /// Spawn the worker over the given surface and oracle.
    pub fn spawn<C, O>(surface: Arc<C>, oracle: Arc<O>) -> Self
    where
        C: ChatSurface + 'static,
        O: ReplyOracle + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConversationTask>();

        let worker = tokio::spawn(async move {
            // Errors are contained per task: nothing that happens in here
            // may stop the loop.
            while let Some(task) = rx.recv().await {
                let outcome = process_task(surface.as_ref(), oracle.as_ref(), &task).await;
                let waited_ms = Utc::now()
                    .signed_duration_since(task.enqueued_at)
                    .num_milliseconds();
                match outcome {
                    Ok(TaskOutcome::Replied) => {
                        tracing::info!(conversation = %task.conversation_id, waited_ms, "reply sent");
                    }
                    Ok(TaskOutcome::Skipped) => {
                        tracing::info!(conversation = %task.conversation_id, "skipped");
                    }
                    Ok(TaskOutcome::Abandoned(reason)) => {
                        tracing::warn!(conversation = %task.conversation_id, reason, "task abandoned");
                    }
                    Err(e) => {
                        tracing::warn!(conversation = %task.conversation_id, error = %e, "task failed");
                    }
                }
            }
            tracing::debug!("conversation worker stopped");
        });

        Self { tx, worker }
    }

    /// Admit a conversation for processing. Non-blocking; callable from any
    /// concurrent context. Tasks run strictly in admission order.
    pub fn enqueue(&self, conversation_id: impl Into<String>, is_group: bool) {
        let task = ConversationTask {
            conversation_id: conversation_id.into(),
            is_group,
            enqueued_at: Utc::now(),
        };
        tracing::debug!(conversation = %task.conversation_id, "task enqueued");
        if self.tx.send(task).is_err() {
            tracing::error!("conversation worker is gone; dropping task");
        }
    }

    /// Close admission and wait for the worker to drain every remaining
    /// task. The service never calls this; tests do.
    #[allow(dead_code)] // API completeness
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}

async fn process_task<C, O>(
    surface: &C,
    oracle: &O,
    task: &ConversationTask,
) -> Result<TaskOutcome, BrowserError>
where
    C: ChatSurface + ?Sized,
    O: ReplyOracle + ?Sized,
{
    if !surface.open_conversation(&task.conversation_id).await? {
        return Ok(TaskOutcome::Abandoned("conversation not found in current view"));
    }

    let transcript = surface.extract_transcript().await?;

    // Oracle failure is silence, never a crash and never a garbage send.
    let decision = match oracle.reply(&transcript, task.is_group).await {
        Ok(text) => ReplyDecision::parse(&text),
        Err(e) => {
            tracing::warn!(conversation = %task.conversation_id, kind = ?e.kind, error = %e,
                "oracle failed; treating as skip");
            ReplyDecision::Skip
        }
    };

    let text = match decision {
        ReplyDecision::Skip => return Ok(TaskOutcome::Skipped),
        ReplyDecision::Send(text) => text,
    };

    match surface.send_reply(&text).await {
        Ok(()) => Ok(TaskOutcome::Replied),
        Err(BrowserError::ElementNotFound(selector)) => {
            tracing::warn!(conversation = %task.conversation_id, %selector,
                "message input not found");
            Ok(TaskOutcome::Abandoned("message input not found"))
        }
        Err(e) => Err(e),
    }
}
