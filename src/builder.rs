use crate::{Context, Future};

/// A builder object that can be used to configure and spawn a [`Future`].
///
/// # Examples
///
/// ```
/// use promise_cell::{Builder, Context};
///
/// let future = Builder::new()
///     .name("answer")
///     .lazy(true)
///     .context(&Context::background())
///     .spawn(|_ctx| Ok::<u8, String>(42));
/// assert!(!future.is_started());
/// assert!(matches!(*future.result(), Ok(42)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    name: Option<String>,
    lazy: bool,
    context: Option<Context>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the worker thread. The name also tags log lines.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Defers running the work function until its result is first demanded.
    ///
    /// By default the work function is started as soon as the future is
    /// spawned.
    #[inline]
    pub fn lazy(self, lazy: bool) -> Self {
        Self { lazy, ..self }
    }

    /// Sets the ambient context. The work function receives a context derived
    /// from it, and waiting for the result gives up once it is cancelled.
    ///
    /// Defaults to [`Context::background`].
    pub fn context(self, context: &Context) -> Self {
        Self {
            context: Some(context.clone()),
            ..self
        }
    }

    /// Creates the future, starting its work function unless it is lazy.
    pub fn spawn<T, E, F>(self, work: F) -> Future<T, E>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: FnOnce(Context) -> Result<T, E> + Send + 'static,
    {
        let context = self.context.unwrap_or_default();
        Future::new(self.name, self.lazy, context, Box::new(work))
    }
}
