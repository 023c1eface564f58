//! A bounded queue of failed commands waiting to be resent or failed.
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use log::{debug, trace};
use tokio::sync::oneshot;

use crate::endpoint::Endpoint;
use crate::errors::{ConnectionFailureType, ErrorKind, RedisError};
use crate::message::Message;
use crate::types::{RedisResult, Value};

mod policy;

pub use policy::RetryPolicy;

/// Why a command ended up in the retry queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The write to the connection failed.
    WriteFailure,
    /// The command did not complete in time.
    Timeout,
    /// The connection was disposed while the command was pending.
    ConnectionDisposed,
}

/// A command that failed, together with what went wrong and whoever waits for it.
///
/// A failed command is consumed exactly once: by a resend, or by completing it.
pub struct FailedCommand {
    message: Arc<Message>,
    reason: FailureReason,
    error: RedisError,
    endpoint: Option<Endpoint>,
    completion: Option<oneshot::Sender<RedisResult<Value>>>,
}

impl fmt::Debug for FailedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailedCommand")
            .field("cmd", self.message.cmd())
            .field("reason", &self.reason)
            .field("error", &self.error)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl FailedCommand {
    /// Wraps a message that failed with `error`.
    pub fn new(message: Arc<Message>, reason: FailureReason, error: RedisError) -> Self {
        Self {
            message,
            reason,
            error,
            endpoint: None,
            completion: None,
        }
    }

    /// Records the endpoint the message was written to.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Attaches the channel the final outcome is delivered to.
    pub fn with_completion(mut self, completion: oneshot::Sender<RedisResult<Value>>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// The failed message.
    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    /// Why it failed.
    pub fn reason(&self) -> FailureReason {
        self.reason
    }

    /// The error it failed with.
    pub fn error(&self) -> &RedisError {
        &self.error
    }

    /// The endpoint the message was written to, if known.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Delivers the final outcome to whoever waits for it.
    pub fn complete(self, result: RedisResult<Value>) {
        if let Some(completion) = self.completion {
            // the caller may have stopped waiting
            let _ = completion.send(result);
        }
    }

    /// Completes the command with the error it failed with.
    pub fn fail(mut self) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Err(self.error));
        }
    }

    /// The same command, after failing again with `error`.
    pub(crate) fn refail(self, reason: FailureReason, error: RedisError) -> Self {
        Self {
            reason,
            error,
            ..self
        }
    }
}

/// The owner of the connections, as seen by the retry queue.
///
/// The probes are called while the queue is locked and must not call back into it.
pub trait RetryHandler: Send + Sync + 'static {
    /// Whether the command could be written right now. An error abandons the command.
    fn is_endpoint_available(&self, command: &FailedCommand) -> RedisResult<bool>;

    /// Whether the command waited too long.
    fn has_timed_out(&self, command: &FailedCommand) -> bool;

    /// The error a timed out command is completed with.
    fn timeout_error(&self, command: &FailedCommand) -> RedisError;

    /// Writes the command again. The handler completes it.
    fn try_resend(&self, command: FailedCommand) -> BoxFuture<'_, ()>;

    /// Completes the command with `error`.
    fn complete_with_error(&self, command: FailedCommand, error: RedisError);
}

fn disposed_error() -> RedisError {
    RedisError::from((
        ErrorKind::ConnectionFailure(ConnectionFailureType::ConnectionDisposed),
        "The retry queue was disposed",
    ))
}

/// A FIFO queue of failed commands, bounded by a maximum length.
///
/// Entries enter only through [`RetryQueue::admit`], and leave only through a drain pass,
/// a timeout sweep or disposal. Every entry that leaves is either resent or completed.
pub struct RetryQueue<H: RetryHandler> {
    handler: H,
    max_length: usize,
    queue: Mutex<VecDeque<FailedCommand>>,
    length: AtomicUsize,
    draining: AtomicBool,
    rerun: AtomicBool,
    disposed: AtomicBool,
}

impl<H: RetryHandler> fmt::Debug for RetryQueue<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryQueue")
            .field("max_length", &self.max_length)
            .field("length", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<H: RetryHandler> RetryQueue<H> {
    /// Creates an empty queue holding at most `max_length` commands.
    pub fn new(handler: H, max_length: usize) -> Self {
        Self {
            handler,
            max_length,
            queue: Mutex::new(VecDeque::new()),
            length: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// The handler the queue was created with.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The number of queued commands.
    pub fn len(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the queue was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FailedCommand>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `command` to the queue.
    ///
    /// A full or disposed queue hands the command back, and the caller has to fail it.
    pub fn admit(&self, command: FailedCommand) -> Result<(), FailedCommand> {
        let mut current = self.length.load(Ordering::Acquire);
        loop {
            if current >= self.max_length {
                trace!("Retry queue is full, rejecting {:?}", command.message.cmd());
                return Err(command);
            }
            match self.length.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut queue = self.lock();
        if self.is_disposed() {
            self.length.fetch_sub(1, Ordering::AcqRel);
            return Err(command);
        }
        trace!("Queued {:?} for retry ({:?})", command.message.cmd(), command.reason);
        queue.push_back(command);
        Ok(())
    }

    fn pop_front(&self) -> Option<FailedCommand> {
        let command = self.lock().pop_front()?;
        self.length.fetch_sub(1, Ordering::AcqRel);
        Some(command)
    }

    fn push_front(&self, command: FailedCommand) {
        let mut queue = self.lock();
        if self.is_disposed() {
            drop(queue);
            self.handler.complete_with_error(command, disposed_error());
            return;
        }
        self.length.fetch_add(1, Ordering::AcqRel);
        queue.push_front(command);
    }

    /// Processes the queue from its head.
    ///
    /// Each entry whose endpoint is available is resent, or completed with the timeout
    /// error if it waited too long. The pass stops at the first entry whose endpoint is not
    /// available, so no entry overtakes an older one. A failing availability probe
    /// abandons the entry with the probe's error. Entries queued during the pass wait for
    /// the next one. Only one pass runs at a time; a call made while another pass runs
    /// returns immediately and makes the running call do one more pass.
    ///
    /// Returns the number of entries removed.
    pub async fn drain_tick(&self) -> usize {
        self.rerun.store(true, Ordering::SeqCst);
        if self.draining.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let mut removed = 0;
        loop {
            self.rerun.store(false, Ordering::SeqCst);
            {
                let _guard = DrainGuard(&self.draining);
                removed += self.drain_pass().await;
            }
            if !self.rerun.load(Ordering::SeqCst) || self.draining.swap(true, Ordering::SeqCst) {
                break;
            }
        }
        removed
    }

    async fn drain_pass(&self) -> usize {
        let mut removed = 0;
        let budget = self.len();
        while removed < budget {
            let Some(command) = self.pop_front() else {
                break;
            };
            match self.handler.is_endpoint_available(&command) {
                Err(err) => {
                    debug!("Availability probe failed for {:?}: {err}", command.message.cmd());
                    self.handler.complete_with_error(command, err);
                }
                Ok(false) => {
                    self.push_front(command);
                    break;
                }
                Ok(true) if self.handler.has_timed_out(&command) => {
                    let err = self.handler.timeout_error(&command);
                    self.handler.complete_with_error(command, err);
                }
                Ok(true) => {
                    trace!("Resending {:?}", command.message.cmd());
                    self.handler.try_resend(command).await;
                }
            }
            removed += 1;
        }
        removed
    }

    /// Fails every entry that waited too long, whether its endpoint is available or not.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_timeouts(&self) -> usize {
        let expired: Vec<FailedCommand> = {
            let mut queue = self.lock();
            let mut expired = Vec::new();
            let mut kept = VecDeque::with_capacity(queue.len());
            for command in queue.drain(..) {
                if self.handler.has_timed_out(&command) {
                    expired.push(command);
                } else {
                    kept.push_back(command);
                }
            }
            *queue = kept;
            self.length.fetch_sub(expired.len(), Ordering::AcqRel);
            expired
        };

        let removed = expired.len();
        if removed > 0 {
            debug!("{removed} queued commands timed out");
        }
        for command in expired {
            let err = self.handler.timeout_error(&command);
            self.handler.complete_with_error(command, err);
        }
        removed
    }

    /// Completes every entry with a disposal error and closes the queue; later admissions
    /// are rejected.
    ///
    /// Returns the number of entries removed.
    pub fn dispose(&self) -> usize {
        let drained: Vec<FailedCommand> = {
            let mut queue = self.lock();
            self.disposed.store(true, Ordering::Release);
            let drained: Vec<_> = queue.drain(..).collect();
            self.length.fetch_sub(drained.len(), Ordering::AcqRel);
            drained
        };

        let removed = drained.len();
        if removed > 0 {
            debug!("Failing {removed} queued commands, the retry queue was disposed");
        }
        for command in drained {
            self.handler.complete_with_error(command, disposed_error());
        }
        removed
    }
}
