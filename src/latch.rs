//! A one-shot completion latch. It opens exactly once and every waiter, past
//! or future, observes it open from then on.
//!
use crate::lock;
use futures::executor::block_on;
use slab::Slab;
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};
use std::{
    future::Future,
    pin::Pin,
    task::{Poll, Wake, Waker},
};

#[derive(Debug, Default)]
struct Inner {
    open: bool,
    /// One entry per pending `Done`, keyed so a dropped handle can take its
    /// waker back out.
    waker: Slab<Waker>,
}

/// The signalling side of a latch.
#[derive(Debug, Clone, Default)]
pub(crate) struct Latch {
    inner: Arc<Mutex<Inner>>,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Opens the latch and wakes every waiter. Only the first call returns
    /// `true`.
    pub(crate) fn open(&self) -> bool {
        let wakers = {
            let mut latch = lock(&self.inner);
            if latch.open {
                return false;
            }
            latch.open = true;
            std::mem::take(&mut latch.waker)
        };
        for (_, waker) in wakers {
            waker.wake()
        }
        true
    }

    pub(crate) fn is_open(&self) -> bool {
        lock(&self.inner).open
    }

    pub(crate) fn done(&self) -> Done {
        Done {
            inner: self.inner.clone(),
            key: None,
        }
    }

    /// Number of wakers currently registered.
    #[cfg(test)]
    pub(crate) fn waiters(&self) -> usize {
        lock(&self.inner).waker.len()
    }
}

/// A passive wait handle that resolves once its latch has opened.
///
/// `Done` can be cloned freely, awaited from any executor or waited on from a
/// plain thread. A pending `Done` that is dropped unregisters itself.
///
/// # Examples
///
/// ```
/// use promise_cell::{Context, Future};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let future = Future::spawn(&Context::background(), |_ctx| Ok::<_, ()>("🍓"));
/// let done = future.done();
/// let task1 = thread::spawn(move || block_on(done));
/// task1.join().expect("The task1 thread has panicked");
/// assert!(future.is_ready());
/// ```
#[derive(Debug)]
pub struct Done {
    inner: Arc<Mutex<Inner>>,
    key: Option<usize>,
}

impl Done {
    /// Whether the latch has opened.
    pub fn is_open(&self) -> bool {
        lock(&self.inner).open
    }

    /// Blocks the calling thread until the latch opens.
    pub fn wait(&self) {
        block_on(self.clone())
    }

    /// Blocks the calling thread until the latch opens or `timeout` elapses.
    /// Returns whether the latch is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        block_on_timeout(self.clone(), timeout).is_some()
    }
}

impl Clone for Done {
    /// The clone has no registration of its own until it is polled.
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            key: None,
        }
    }
}

impl Future for Done {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.get_mut();
        let mut latch = lock(&this.inner);
        if latch.open {
            // `open` already drained the slab.
            this.key = None;
            return Poll::Ready(());
        }
        let registered = match this.key {
            Some(key) => latch.waker.get_mut(key),
            None => None,
        };
        match registered {
            Some(waker) => {
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
            }
            None => this.key = Some(latch.waker.insert(cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut latch = lock(&self.inner);
            if !latch.open && latch.waker.contains(key) {
                latch.waker.remove(key);
            }
        }
    }
}

/// Drives `future` on the calling thread until it completes or `timeout`
/// elapses.
pub(crate) fn block_on_timeout<F>(mut future: F, timeout: Duration) -> Option<F::Output>
where
    F: Future + Unpin,
{
    let deadline = Instant::now() + timeout;
    let waker = Waker::from(Arc::new(Unpark(thread::current())));
    let mut cx = std::task::Context::from_waker(&waker);
    loop {
        if let Poll::Ready(output) = Pin::new(&mut future).poll(&mut cx) {
            return Some(output);
        }
        match deadline.checked_duration_since(Instant::now()) {
            Some(remaining) if !remaining.is_zero() => thread::park_timeout(remaining),
            _ => return None,
        }
    }
}

/// Wakes a parked thread.
struct Unpark(Thread);

impl Wake for Unpark {
    fn wake(self: Arc<Self>) {
        self.0.unpark()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark()
    }
}

#[cfg(test)]
mod tests {
    use super::Latch;
    use futures::executor::block_on;
    use std::{future::Future, pin::Pin, thread, time::Duration};

    #[test]
    fn test_latch_opens_once() {
        let latch = Latch::new();
        assert!(!latch.is_open());
        assert!(latch.open());
        assert!(!latch.open());
        assert!(latch.is_open());
    }

    #[test]
    fn test_two_waiters_woken() {
        let latch = Latch::new();
        let (done_a, done_b) = (latch.done(), latch.done());
        let task1 = thread::spawn(move || block_on(done_a));
        let task2 = thread::spawn(move || done_b.wait());
        thread::sleep(Duration::from_millis(50));
        latch.open();
        task1.join().expect("The task1 thread has panicked");
        task2.join().expect("The task2 thread has panicked");
    }

    #[test]
    fn test_done_after_open() {
        let latch = Latch::new();
        latch.open();
        let done = latch.done();
        assert!(done.is_open());
        block_on(done.clone());
        assert!(done.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_wait_timeout() {
        let latch = Latch::new();
        let done = latch.done();
        assert!(!done.wait_timeout(Duration::from_millis(50)));

        let opener = latch.clone();
        let task1 = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            opener.open();
        });
        assert!(done.wait_timeout(Duration::from_secs(5)));
        task1.join().expect("The task1 thread has panicked");
    }

    #[test]
    fn test_dropped_waiters_unregister() {
        let latch = Latch::new();
        for _ in 0..50 {
            let done = latch.done();
            thread::spawn(move || done.wait_timeout(Duration::from_millis(1)))
                .join()
                .expect("The task thread has panicked");
        }
        assert_eq!(latch.waiters(), 0);

        let mut pending = latch.done();
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        assert!(Pin::new(&mut pending).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut pending).poll(&mut cx).is_pending());
        assert_eq!(latch.waiters(), 1);
        drop(pending);
        assert_eq!(latch.waiters(), 0);
    }

    #[test]
    fn test_clone_registers_separately() {
        let latch = Latch::new();
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        let mut first = latch.done();
        assert!(Pin::new(&mut first).poll(&mut cx).is_pending());
        let mut second = first.clone();
        assert!(Pin::new(&mut second).poll(&mut cx).is_pending());
        assert_eq!(latch.waiters(), 2);

        latch.open();
        assert_eq!(latch.waiters(), 0);
        assert!(Pin::new(&mut first).poll(&mut cx).is_ready());
        drop(second);
    }
}
