//! Injected logging capability.
//!
//! Components never log through the process-wide subscriber. Each one holds a
//! [`Logger`] handed to it at construction and emits `tracing` events inside
//! [`Logger::scope`], which routes them to that logger's dispatcher only.

use tracing::{dispatcher, Dispatch, Subscriber};

/// Handle to a `tracing` dispatcher. Defaults to discarding everything.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    /// A logger that drops every event.
    pub fn noop() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    pub fn from_subscriber<S>(subscriber: S) -> Self
    where
        S: Subscriber + Send + Sync + 'static,
    {
        Self::new(Dispatch::new(subscriber))
    }

    /// Run `f` with this logger as the active dispatcher.
    pub fn scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod capture {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::Logger;

    /// Logger writing formatted events into a shared buffer.
    pub(crate) fn logger() -> (Logger, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || Writer(sink.clone()))
            .finish();
        (Logger::from_subscriber(subscriber), buf)
    }

    pub(crate) fn text(buf: &Mutex<Vec<u8>>) -> String {
        String::from_utf8_lossy(&buf.lock()).into_owned()
    }

    struct Writer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Writer {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
