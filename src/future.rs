//! The single-assignment future.
//!
//! A [`Future`] owns one work function. The first caller to claim the start
//! gate runs it on its own thread; its outcome, or the abort that beat it, is
//! written once into the result cell, and the completion latch opens. Every
//! observer then reads the same shared [`Outcome`].
//!
use crate::builder::Builder;
use crate::context::Context;
use crate::latch::{block_on_timeout, Done, Latch};
use crate::{lock, ContextError, Error};
use futures::executor::block_on;
use futures::future::{self, Either};
use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

/// The result of a [`Future`], shared by all of its observers.
pub type Outcome<T, E> = Arc<Result<T, Error<E>>>;

pub(crate) type Work<T, E> = Box<dyn FnOnce(Context) -> Result<T, E> + Send>;

/// A handle to a value-or-error produced by a work function running on its
/// own thread.
///
/// Handles are cheap to clone; every clone observes the same outcome.
///
/// # Examples
///
/// ```
/// use promise_cell::{Context, Error, Future};
/// use std::{thread, time::Duration};
///
/// let future = Future::spawn(&Context::background(), |ctx: Context| -> Result<u8, String> {
///     if ctx.done().wait_timeout(Duration::from_secs(5)) {
///         return Err("stopped".into());
///     }
///     Ok(7)
/// });
/// thread::sleep(Duration::from_millis(10));
/// future.abort();
/// assert!(matches!(*future.result(), Err(Error::Aborted)));
/// ```
pub struct Future<T, E> {
    inner: Arc<Inner<T, E>>,
}

struct Inner<T, E> {
    name: Option<String>,
    lazy: bool,
    /// The context supplied by the creator; bounds every wait.
    ambient: Context,
    /// Derived from `ambient`; handed to the work function and cancelled by abort.
    cancel: Context,
    started: AtomicBool,
    work: Mutex<Option<Work<T, E>>>,
    slot: Mutex<Option<Outcome<T, E>>>,
    latch: Latch,
}

impl<T, E> Inner<T, E> {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Writes the outcome and opens the latch, unless another outcome got
    /// there first. Returns whether this outcome was stored.
    fn publish(&self, outcome: Result<T, Error<E>>) -> bool {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            // Release the cell before the losing outcome is dropped.
            drop(slot);
            drop(outcome);
            return false;
        }
        *slot = Some(Arc::new(outcome));
        self.latch.open();
        true
    }

    fn run(&self, work: Work<T, E>) {
        log::trace!("{}: worker started", self.label());
        let outcome = match catch_unwind(AssertUnwindSafe(|| work(self.cancel.clone()))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::Failed(err)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::warn!("{}: work function panicked: {}", self.label(), message);
                Err(Error::Panicked(message))
            }
        };
        if !self.publish(outcome) {
            log::debug!("{}: future already completed, outcome discarded", self.label());
        }
        log::trace!("{}: worker exiting", self.label());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

impl<T, E> Future<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub(crate) fn new(name: Option<String>, lazy: bool, ambient: Context, work: Work<T, E>) -> Self {
        let future = Self {
            inner: Arc::new(Inner {
                name,
                lazy,
                cancel: Context::with_cancel(&ambient),
                ambient,
                started: AtomicBool::new(false),
                work: Mutex::new(Some(work)),
                slot: Mutex::new(None),
                latch: Latch::new(),
            }),
        };
        if !lazy {
            future.start();
        }
        future
    }

    /// Creates a future and starts its work function right away.
    pub fn spawn<F>(context: &Context, work: F) -> Self
    where
        F: FnOnce(Context) -> Result<T, E> + Send + 'static,
    {
        Builder::new().context(context).spawn(work)
    }

    /// Creates a future whose work function only starts once its result is
    /// demanded.
    pub fn lazy<F>(context: &Context, work: F) -> Self
    where
        F: FnOnce(Context) -> Result<T, E> + Send + 'static,
    {
        Builder::new().context(context).lazy(true).spawn(work)
    }

    /// Claims the start gate. Only the first caller ever gets `true`.
    fn claim(&self) -> bool {
        self.inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Starts the work function on its own thread, unless it has already been
    /// started or aborted. Does not wait for it.
    pub fn start(&self) {
        if !self.claim() {
            return;
        }
        let Some(work) = lock(&self.inner.work).take() else {
            return;
        };

        let mut builder = thread::Builder::new();
        if let Some(name) = &self.inner.name {
            builder = builder.name(name.clone());
        }
        log::trace!("{}: spawning worker", self.inner.label());
        let inner = self.inner.clone();
        if let Err(err) = builder.spawn(move || inner.run(work)) {
            log::warn!("{}: failed to spawn worker: {}", self.inner.label(), err);
            self.inner.publish(Err(Error::Spawn(err)));
        }
    }

    /// Cancels the future.
    ///
    /// The work function's context is cancelled. If the future has not
    /// completed yet it completes now with [`Error::Aborted`]; a work function
    /// that was never started never will be. After completion this does not
    /// touch the stored outcome. Safe to call any number of times.
    pub fn abort(&self) {
        self.inner.cancel.cancel();
        if self.claim() {
            let work = lock(&self.inner.work).take();
            drop(work);
            log::debug!("{}: aborted before start", self.inner.label());
        }
        if self.inner.publish(Err(Error::Aborted)) {
            log::debug!("{}: aborted", self.inner.label());
        }
    }

    /// Waits for the outcome, starting a lazy future first.
    ///
    /// Gives up with [`Error::Context`] if the ambient context is cancelled
    /// first; the future itself keeps running and its outcome stays
    /// available to later calls.
    pub async fn wait(&self) -> Outcome<T, E> {
        self.start();
        let ambient = &self.inner.ambient;
        if !ambient.can_cancel() {
            self.done().await;
        } else if let Either::Right(_) = future::select(self.done(), ambient.done()).await {
            // `select` polls the future's own latch first, so a stored outcome
            // wins over a context that expired at the same time.
            log::debug!("{}: context expired while waiting", self.inner.label());
        }
        match self.try_result() {
            Some(outcome) => outcome,
            None => {
                let reason = ambient.err().unwrap_or(ContextError::Canceled);
                Arc::new(Err(Error::Context(reason)))
            }
        }
    }

    /// Blocks the calling thread until [`Future::wait`] returns.
    ///
    /// Do not call this from inside an async task; await [`Future::wait`]
    /// instead.
    pub fn result(&self) -> Outcome<T, E> {
        block_on(self.wait())
    }

    /// Like [`Future::result`], but gives up with
    /// [`ContextError::DeadlineExceeded`] after `timeout`.
    pub fn result_timeout(&self, timeout: Duration) -> Outcome<T, E> {
        let waiting = self.wait();
        futures::pin_mut!(waiting);
        match block_on_timeout(waiting, timeout).or_else(|| self.try_result()) {
            Some(outcome) => outcome,
            None => Arc::new(Err(Error::Context(ContextError::DeadlineExceeded))),
        }
    }
}

impl<T, E> Future<T, E> {
    /// Whether the outcome is available.
    pub fn is_ready(&self) -> bool {
        self.inner.latch.is_open()
    }

    /// A handle that resolves once the outcome is available. It never starts
    /// a lazy future.
    pub fn done(&self) -> Done {
        self.inner.latch.done()
    }

    /// The outcome, if it is available, without blocking or starting the
    /// future.
    pub fn try_result(&self) -> Option<Outcome<T, E>> {
        if !self.is_ready() {
            return None;
        }
        lock(&self.inner.slot).clone()
    }

    /// Whether the start gate has been claimed, by a run or by an abort.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Whether the work function waits for its result to be demanded.
    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    /// The worker thread name given to the builder.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// The context handed to the work function.
    pub fn context(&self) -> &Context {
        &self.inner.cancel
    }
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Debug for Future<T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("name", &self.inner.name)
            .field("lazy", &self.inner.lazy)
            .field("started", &self.is_started())
            .field("ready", &self.is_ready())
            .finish()
    }
}
