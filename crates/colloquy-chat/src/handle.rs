//! A cloneable handle on one in-flight generation.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A cloneable handle for stopping or awaiting a generation.
///
/// All fields are `Arc`-wrapped, so cloning is cheap. The handle outlives
/// the task; once the task finishes `is_running` is false and `wait`
/// returns immediately.
#[derive(Clone)]
pub struct GenerationHandle {
    id: Uuid,
    conversation_id: Uuid,
    turn_id: Uuid,
    cancel: CancellationToken,
    is_running: Arc<AtomicBool>,
    idle_notify: Arc<Notify>,
}

impl GenerationHandle {
    pub(crate) fn new(conversation_id: Uuid, turn_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            turn_id,
            cancel: CancellationToken::new(),
            is_running: Arc::new(AtomicBool::new(true)),
            idle_notify: Arc::new(Notify::new()),
        }
    }

    /// Unique per generation, so a finished task never clears a newer one.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// The assistant turn being written to
    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    /// Request cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the generation task is still running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Mark the task done and wake everyone in `wait`.
    pub(crate) fn mark_finished(&self) {
        self.is_running.store(false, Ordering::Release);
        self.idle_notify.notify_waiters();
    }

    /// Wait until the generation reaches a terminal status.
    pub async fn wait(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_running() {
            return;
        }
        notified.await;
    }

    /// Wait with a timeout.
    /// Returns `true` if the generation finished, `false` on timeout.
    pub async fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        if !self.is_running() {
            return true;
        }
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl std::fmt::Debug for GenerationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationHandle")
            .field("id", &self.id)
            .field("conversation_id", &self.conversation_id)
            .field("turn_id", &self.turn_id)
            .field("cancelled", &self.is_cancelled())
            .field("running", &self.is_running())
            .finish()
    }
}
