//! Request-scoped call context: a deadline, a cancellation signal linked to an
//! optional parent, timeout overrides for child operations and an optional
//! connection-manager override.

use crate::net::conn::ConnectionManager;
use crate::timeouts::TimeoutType;
use crate::util::PinFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("context cancelled")]
    Cancelled,
}

/// Children are tracked weakly; a child keeps its parent alive instead, so a
/// live grandchild stays reachable from the root.
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelState>>>,
    _parent: Option<Arc<CancelState>>,
}

impl CancelState {
    fn new(parent: Option<Arc<CancelState>>) -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
            _parent: parent,
        })
    }

    fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = CancelState::new(Some(self.clone()));
        let mut children = self.children.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            child.cancelled.store(true, Ordering::SeqCst);
        } else {
            children.retain(|existing| {
                existing
                    .upgrade()
                    .is_some_and(|state| !state.is_cancelled())
            });
            children.push(Arc::downgrade(&child));
        }
        child
    }

    fn cancel(&self) {
        let children = {
            let mut children = self.children.lock();
            if self.cancelled.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *children)
        };
        self.notify.notify_waiters();
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Deadline and cancellation scope threaded through every suspension point
/// of an invocation.
#[derive(Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Arc<CancelState>,
    timeouts: Arc<HashMap<TimeoutType, Duration>>,
    comm_manager: Option<Arc<dyn ConnectionManager>>,
}

impl CallContext {
    /// A context without deadline that is only cancelled explicitly.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: CancelState::new(None),
            timeouts: Arc::new(HashMap::new()),
            comm_manager: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    /// Derives a child whose deadline never exceeds this context's deadline
    /// and which is cancelled together with this context.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (Some(parent), None) => Some(parent),
            (None, own) => own,
        };
        Self {
            deadline,
            cancel: self.cancel.child(),
            timeouts: self.timeouts.clone(),
            comm_manager: self.comm_manager.clone(),
        }
    }

    /// Derives a child that shares this context's deadline.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child(),
            timeouts: self.timeouts.clone(),
            comm_manager: self.comm_manager.clone(),
        }
    }

    pub fn with_timeout_overrides(mut self, timeouts: HashMap<TimeoutType, Duration>) -> Self {
        self.timeouts = Arc::new(timeouts);
        self
    }

    pub fn with_comm_manager(mut self, manager: Arc<dyn ConnectionManager>) -> Self {
        self.comm_manager = Some(manager);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn timeout_override(&self, kind: TimeoutType) -> Option<Duration> {
        self.timeouts.get(&kind).copied()
    }

    pub fn comm_manager(&self) -> Option<&Arc<dyn ConnectionManager>> {
        self.comm_manager.as_ref()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn tracked_children(&self) -> usize {
        self.cancel.children.lock().len()
    }

    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the deadline passes or the context is cancelled.
    pub fn done(&self) -> PinFuture<'_, ContextError> {
        Box::pin(async move {
            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                            ContextError::DeadlineExceeded
                        }
                        _ = self.cancel.cancelled() => ContextError::Cancelled,
                    }
                }
                None => {
                    self.cancel.cancelled().await;
                    ContextError::Cancelled
                }
            }
        })
    }

    /// Races `fut` against the deadline and cancellation of this context.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            output = fut => Ok(output),
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("remaining", &self.remaining())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_deadline_never_exceeds_parent() {
        let parent = CallContext::with_timeout(Duration::from_millis(50));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert!(child.deadline().unwrap() <= parent.deadline().unwrap());
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_children() {
        let parent = CallContext::background();
        let child = parent.child_with_timeout(Duration::from_secs(60));
        let grandchild = child.child();
        parent.cancel();
        assert_eq!(grandchild.err(), Some(ContextError::Cancelled));
        let result = grandchild.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn run_reports_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn finished_children_are_not_retained_by_long_lived_parent() {
        let parent = CallContext::background();
        for _ in 0..1000 {
            drop(parent.child_with_timeout(Duration::from_secs(10)));
        }
        for _ in 0..1000 {
            let child = parent.child();
            child.cancel();
        }
        let live = parent.child();
        assert_eq!(parent.tracked_children(), 1);

        // a grandchild outliving its parent context is still reached
        let grandchild = live.child().child();
        drop(live);
        parent.cancel();
        assert_eq!(grandchild.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn child_of_cancelled_parent_starts_cancelled() {
        let parent = CallContext::background();
        parent.cancel();
        assert!(parent.child().is_done());
    }
}
