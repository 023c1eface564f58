use std::future::Future;
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use super::Multiplexer;
use crate::errors::{ErrorKind, RedisError};
use crate::types::RedisResult;

fn timeout_error(timeout: Duration) -> RedisError {
    RedisError::from((
        ErrorKind::Timeout,
        "Timed out waiting for the operation",
        format!("sync timeout is {timeout:?}"),
    ))
}

fn dropped_error() -> RedisError {
    RedisError::from((
        ErrorKind::ClientError,
        "The operation was dropped before it completed",
    ))
}

impl Multiplexer {
    fn blocking_handle(&self) -> RedisResult<Handle> {
        if Handle::try_current().is_ok() {
            return Err(RedisError::from((
                ErrorKind::ClientError,
                "Blocking waits cannot be used from within the runtime, await the operation instead",
            )));
        }
        match self.0.topology.get() {
            Some(topology) => Ok(topology.runtime.clone()),
            None => Err(RedisError::from((
                ErrorKind::ClientError,
                "The multiplexer is not connected",
            ))),
        }
    }

    /// Runs `future` on the multiplexer's runtime and blocks the calling thread until it
    /// completes, or until the configured sync timeout passes.
    ///
    /// The error of the operation is returned as is. Must not be called from within the
    /// runtime.
    ///
    /// ```rust,no_run
    /// # fn run(mux: redis_mux::Multiplexer) -> redis_mux::RedisResult<()> {
    /// let db = mux.database(0);
    /// let value = mux.wait(async move { db.execute(redis_mux::cmd("PING")).await })?;
    /// # Ok(()) }
    /// ```
    pub fn wait<T, F>(&self, future: F) -> RedisResult<T>
    where
        T: Send + 'static,
        F: Future<Output = RedisResult<T>> + Send + 'static,
    {
        let handle = self.blocking_handle()?;
        let timeout = self.sync_timeout();
        let (tx, rx) = sync_channel(1);
        handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(timeout_error(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(dropped_error()),
        }
    }

    /// Like [`Multiplexer::wait`], but reports whether the operation succeeded in time
    /// instead of returning its outcome.
    pub fn try_wait<T, F>(&self, future: F) -> bool
    where
        T: Send + 'static,
        F: Future<Output = RedisResult<T>> + Send + 'static,
    {
        match self.wait(future) {
            Ok(_) => true,
            Err(err) => {
                log::debug!("try_wait: {err}");
                false
            }
        }
    }

    /// Runs every future on the multiplexer's runtime and blocks until all completed, or
    /// until the sync timeout passes.
    ///
    /// Returns `Ok(true)` if all completed successfully, `Ok(false)` if the timeout passed
    /// first, and the first error otherwise.
    pub fn wait_all<T, F>(&self, futures: impl IntoIterator<Item = F>) -> RedisResult<bool>
    where
        T: Send + 'static,
        F: Future<Output = RedisResult<T>> + Send + 'static,
    {
        let handle = self.blocking_handle()?;
        let timeout = self.sync_timeout();
        let deadline = Instant::now() + timeout;

        let receivers: Vec<_> = futures
            .into_iter()
            .map(|future| {
                let (tx, rx) = sync_channel(1);
                handle.spawn(async move {
                    let _ = tx.send(future.await);
                });
                rx
            })
            .collect();

        let mut first_error = None;
        for rx in receivers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    first_error.get_or_insert_with(dropped_error);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }
}
