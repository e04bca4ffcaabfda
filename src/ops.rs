//! Asynchronous completion primitive and cancellation tokens.
//!
//! Every asynchronous device operation hands the caller an [`Operation`]
//! and keeps the matching [`Completer`] in a pending slot. Whoever takes
//! the completer out of its slot (dispatcher, canceller, or teardown) is
//! the one party that completes the operation; move semantics make a
//! second completion unrepresentable.

use crate::types::StreamKind;
use crate::SensorError;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Identifier of an asynchronous operation, echoed back through
/// `DeviceEvent::OperationComplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u64);

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

fn next_op_id() -> OpId {
    OpId(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
}

/// Internal wakeup messages posted to the consumer's event queue.
pub(crate) enum Wakeup {
    Frame(StreamKind),
    Op(OpId),
}

enum OpState<T> {
    Pending,
    Done(Result<T, SensorError>),
    Taken,
}

struct OpInner<T> {
    state: Mutex<OpState<T>>,
    cond: Condvar,
}

/// Consumer-side handle to an in-flight asynchronous operation.
///
/// The result can be claimed exactly once, either by blocking
/// ([`wait`](Operation::wait)) or, event-loop style, by calling
/// [`try_take`](Operation::try_take) after the matching
/// `OperationComplete` event arrives.
pub struct Operation<T> {
    inner: Arc<OpInner<T>>,
    id: OpId,
}

impl<T> Operation<T> {
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Whether the operation has completed (result possibly already taken).
    pub fn is_done(&self) -> bool {
        !matches!(*self.inner.state.lock().unwrap(), OpState::Pending)
    }

    /// Claim the result if the operation has completed. Returns `None`
    /// while pending or if the result was already taken.
    pub fn try_take(&self) -> Option<Result<T, SensorError>> {
        let mut state = self.inner.state.lock().unwrap();
        match std::mem::replace(&mut *state, OpState::Taken) {
            OpState::Done(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Block until the operation completes and claim its result.
    pub fn wait(self) -> Result<T, SensorError> {
        let mut state = self.inner.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, OpState::Taken) {
                OpState::Done(result) => return result,
                OpState::Taken => return Err(SensorError::InvalidArgument(
                    "operation result already taken".into(),
                )),
                OpState::Pending => {
                    *state = OpState::Pending;
                    state = self.inner.cond.wait(state).unwrap();
                }
            }
        }
    }

    /// Block up to `timeout` for completion. Gives the handle back on
    /// timeout so the caller can keep waiting or cancel.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<T, SensorError>, Operation<T>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, OpState::Taken) {
                OpState::Done(result) => return Ok(result),
                OpState::Taken => {
                    return Ok(Err(SensorError::InvalidArgument(
                        "operation result already taken".into(),
                    )))
                }
                OpState::Pending => {
                    *state = OpState::Pending;
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        drop(state);
                        return Err(self);
                    }
                    let (guard, _timeout) =
                        self.inner.cond.wait_timeout(state, deadline - now).unwrap();
                    state = guard;
                }
            }
        }
    }
}

/// Producer-side handle; completes its [`Operation`] exactly once.
pub(crate) struct Completer<T> {
    inner: Arc<OpInner<T>>,
    id: OpId,
    wakeup: Option<Sender<Wakeup>>,
}

impl<T> Completer<T> {
    pub(crate) fn id(&self) -> OpId {
        self.id
    }

    /// Complete the operation and post the wakeup to the consumer queue.
    pub(crate) fn complete(self, result: Result<T, SensorError>) {
        {
            let mut state = self.inner.state.lock().unwrap();
            *state = OpState::Done(result);
        }
        self.inner.cond.notify_all();
        if let Some(tx) = self.wakeup {
            let _ = tx.send(Wakeup::Op(self.id));
        }
    }
}

/// Create a linked operation/completer pair. `wakeup`, when set, receives
/// one `Wakeup::Op` message at completion time.
pub(crate) fn pair<T>(wakeup: Option<Sender<Wakeup>>) -> (Operation<T>, Completer<T>) {
    let inner = Arc::new(OpInner {
        state: Mutex::new(OpState::Pending),
        cond: Condvar::new(),
    });
    let id = next_op_id();
    (
        Operation {
            inner: inner.clone(),
            id,
        },
        Completer { inner, id, wakeup },
    )
}

/// Convenience for operations that fail or succeed at call time.
pub(crate) fn completed<T>(
    wakeup: Option<Sender<Wakeup>>,
    result: Result<T, SensorError>,
) -> Operation<T> {
    let (op, completer) = pair(wakeup);
    completer.complete(result);
    op
}

struct CancelInner {
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// Cooperative cancellation token.
///
/// Cloning yields handles to the same token. Cancelling fires every
/// registered callback once; callbacks registered after cancellation run
/// immediately on the registering thread.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fire the token. Safe to call more than once; later calls are no-ops.
    pub fn cancel(&self) {
        let callbacks = {
            let mut callbacks = self.inner.callbacks.lock().unwrap();
            self.inner.cancelled.store(true, Ordering::SeqCst);
            std::mem::take(&mut *callbacks)
        };
        for cb in callbacks {
            cb();
        }
    }

    pub(crate) fn on_cancel(&self, cb: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.inner.callbacks.lock().unwrap();
        if self.inner.cancelled.load(Ordering::SeqCst) {
            drop(callbacks);
            cb();
        } else {
            callbacks.push(Box::new(cb));
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}
