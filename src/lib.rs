//! A single-assignment future: a unit of work that produces exactly one
//! value-or-error, started eagerly or on first demand, observed by any number
//! of threads or tasks and cancellable at any time.
//!
//! # Examples
//!
//! ```
//! use promise_cell::{Context, Future};
//! use std::thread;
//!
//! let future = Future::spawn(&Context::background(), |_ctx| Ok::<_, String>(6 * 7));
//! let observer = future.clone();
//! let task1 = thread::spawn(move || matches!(*observer.result(), Ok(42)));
//!
//! assert!(matches!(*future.result(), Ok(42)));
//! assert!(task1.join().expect("The task1 thread has panicked"));
//! ```
//!
//! A lazy future does nothing until someone asks for its result:
//!
//! ```
//! use promise_cell::{Builder, Context, Error};
//!
//! let future = Builder::new()
//!     .lazy(true)
//!     .spawn(|ctx: Context| -> Result<(), String> {
//!         ctx.done().wait();
//!         Ok(())
//!     });
//! assert!(!future.is_started());
//!
//! future.abort();
//! assert!(matches!(*future.result(), Err(Error::Aborted)));
//! ```
pub mod builder;
pub mod context;
pub mod future;
pub mod latch;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use builder::Builder;
pub use context::Context;
pub use future::{Future, Outcome};
pub use latch::Done;

/// Why a [`Context`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// The error side of an [`Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    /// The work function returned its own error.
    #[error("{0}")]
    Failed(E),
    /// The work function panicked; holds the panic message.
    #[error("panic occurred: {0}")]
    Panicked(String),
    /// [`Future::abort`] completed the future before the work function did.
    #[error("future aborted")]
    Aborted,
    /// The ambient context expired while waiting. Never stored in the future.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl<E> Error<E> {
    /// Whether this error comes from an abort or an expired context rather
    /// than from the work itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Aborted | Error::Context(_))
    }
}

/// No user code runs while these locks are held, so a poisoned lock still
/// guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{ContextError, Error};

    #[test]
    fn test_error_messages() {
        let panicked: Error<String> = Error::Panicked("unexpected error".into());
        assert_eq!(panicked.to_string(), "panic occurred: unexpected error");

        let failed: Error<String> = Error::Failed("boom".into());
        assert_eq!(failed.to_string(), "boom");

        let canceled: Error<String> = ContextError::Canceled.into();
        assert_eq!(canceled.to_string(), "context canceled");
        assert_eq!(
            Error::<String>::from(ContextError::DeadlineExceeded).to_string(),
            "context deadline exceeded"
        );
    }

    #[test]
    fn test_cancellation_kinds() {
        assert!(Error::<()>::Aborted.is_cancellation());
        assert!(Error::<()>::Context(ContextError::Canceled).is_cancellation());
        assert!(!Error::<()>::Panicked("x".into()).is_cancellation());
        assert!(!Error::Failed(()).is_cancellation());
    }
}
