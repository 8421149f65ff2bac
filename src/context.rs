//! Cooperative cancellation contexts.
//!
//! A [`Context`] is handed to every work function and consulted by every
//! waiter. Contexts form a tree: cancelling a context cancels all contexts
//! derived from it, with the same reason.
//!
use crate::latch::{Done, Latch};
use crate::{lock, ContextError};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// A cancellation signal with an optional deadline.
///
/// # Examples
///
/// ```
/// use promise_cell::{Context, ContextError};
///
/// let parent = Context::with_cancel(&Context::background());
/// let child = Context::with_cancel(&parent);
/// parent.cancel();
/// child.done().wait();
/// assert_eq!(child.err(), Some(ContextError::Canceled));
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancellable: bool,
    deadline: Option<Instant>,
    reason: Mutex<Option<ContextError>>,
    children: Mutex<Vec<Weak<Inner>>>,
    latch: Latch,
}

impl Inner {
    fn new(cancellable: bool, deadline: Option<Instant>) -> Self {
        Self {
            cancellable,
            deadline,
            reason: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            latch: Latch::new(),
        }
    }

    fn cancel(&self, reason: ContextError) {
        {
            let mut current = lock(&self.reason);
            if current.is_some() {
                return;
            }
            *current = Some(reason);
        }
        self.latch.open();
        let children = std::mem::take(&mut *lock(&self.children));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason);
        }
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner::new(false, None)),
        }
    }

    /// Derives a context that is cancelled by [`Context::cancel`] or when
    /// `parent` is cancelled.
    pub fn with_cancel(parent: &Context) -> Self {
        Self::derive(parent, parent.deadline())
    }

    /// Derives a context that cancels itself with
    /// [`ContextError::DeadlineExceeded`] once `timeout` has elapsed.
    pub fn with_timeout(parent: &Context, timeout: Duration) -> Self {
        Self::with_deadline(parent, Instant::now() + timeout)
    }

    /// Derives a context that cancels itself with
    /// [`ContextError::DeadlineExceeded`] at `deadline`. A parent deadline
    /// that comes earlier takes precedence.
    pub fn with_deadline(parent: &Context, deadline: Instant) -> Self {
        let deadline = parent.deadline().map_or(deadline, |inherited| inherited.min(deadline));
        let context = Self::derive(parent, Some(deadline));
        if context.is_cancelled() {
            return context;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            context.inner.cancel(ContextError::DeadlineExceeded);
            return context;
        }

        // The timer only holds a weak reference, so it never keeps the
        // context alive; it exits early once the context is cancelled.
        let timer = Arc::downgrade(&context.inner);
        let done = context.done();
        let spawned = thread::Builder::new()
            .name("promise-cell-deadline".into())
            .spawn(move || {
                if !done.wait_timeout(remaining) {
                    if let Some(inner) = timer.upgrade() {
                        inner.cancel(ContextError::DeadlineExceeded);
                    }
                }
            });
        if let Err(err) = spawned {
            log::warn!("failed to spawn deadline timer, expiring context now: {}", err);
            context.inner.cancel(ContextError::DeadlineExceeded);
        }
        context
    }

    fn derive(parent: &Context, deadline: Option<Instant>) -> Self {
        let context = Self {
            inner: Arc::new(Inner::new(true, deadline)),
        };
        if parent.inner.cancellable {
            let mut children = lock(&parent.inner.children);
            children.retain(|child| child.strong_count() > 0);
            children.push(Arc::downgrade(&context.inner));
            drop(children);
            // The parent may have been cancelled before the child was registered.
            if let Some(reason) = parent.err() {
                context.inner.cancel(reason);
            }
        }
        context
    }

    /// Cancels this context and every context derived from it. Idempotent;
    /// a no-op on [`Context::background`].
    pub fn cancel(&self) {
        if self.inner.cancellable {
            self.inner.cancel(ContextError::Canceled);
        }
    }

    /// Whether this context can ever be cancelled; `false` only for
    /// [`Context::background`].
    pub fn can_cancel(&self) -> bool {
        self.inner.cancellable
    }

    /// Whether the context has been cancelled, by hand, by a parent or by its
    /// deadline.
    pub fn is_cancelled(&self) -> bool {
        self.inner.latch.is_open()
    }

    /// Why the context was cancelled, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        *lock(&self.inner.reason)
    }

    /// When the context expires on its own, if ever.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// A handle that resolves once the context is cancelled.
    pub fn done(&self) -> Done {
        self.inner.latch.done()
    }

    /// Number of wakers waiting for this context.
    #[cfg(test)]
    pub(crate) fn waiters(&self) -> usize {
        self.inner.latch.waiters()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
