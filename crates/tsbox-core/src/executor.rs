//! Coroutine driver (components C9/C10).
//!
//! Hand-building a CPS continuation interpreter would let the evaluator
//! suspend and resume at arbitrary points, but Rust's `async fn` already
//! compiles a function into exactly that kind of resumable state machine,
//! so the evaluator is written as ordinary `async fn`s and this module
//! supplies the two drivers it needs:
//!
//! - a synchronous driver that polls the evaluation future exactly once
//! with a no-op waker — if it's still `Pending` after that poll, the
//! program tried to suspend (`await`, or a host call that returned
//! `HostCallOutcome::Pending`) while running in sync mode, which is a
//! runtime error;
//! - an asynchronous driver that polls repeatedly, handing `Pending` back to
//! the embedder as a resumable `RunProgress` value instead of looping
//! internally, so the *caller* controls when the next poll happens rather
//! than relying on host-language coroutines.
//!
//! Neither driver spawns a thread or uses `tokio`: this is a single
//! future, polled from one place, by one caller, ever.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::error::TsError;
use crate::value::Value;

fn noop_raw_waker() -> RawWaker {
    fn clone(_: *const ()) -> RawWaker {
        noop_raw_waker()
    }
    fn no_op(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
    RawWaker::new(std::ptr::null(), &VTABLE)
}

fn noop_waker() -> Waker {
    unsafe { Waker::from_raw(noop_raw_waker()) }
}

/// Polls `future` exactly once. Used for synchronous evaluation: any
/// `Pending` result is translated to a suspension error by the caller,
/// since there is no second poll coming.
pub fn poll_once<F>(future: Pin<&mut F>) -> Poll<F::Output>
where
F: Future,
{
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    future.poll(&mut cx)
}

/// Runs `future` to completion synchronously, erroring out if it ever
/// suspends.
pub fn run_sync<F>(future: F) -> Result<Value, TsError>
where
F: Future<Output = Result<Value, TsError>>,
{
    let mut future = Box::pin(future);
    match poll_once(future.as_mut()) {
        Poll::Ready(result) => result,
        Poll::Pending => Err(TsError::security(
                "synchronous evaluation attempted to suspend (await or a pending host call)",
        )),
    }
}

/// A handle to an in-flight asynchronous evaluation, resumed by repeated
/// calls to `poll`. Each poll either completes the program or reports that
/// it is still waiting on an outstanding host task.
pub struct AsyncRun {
    future: Pin<Box<dyn Future<Output = Result<Value, TsError>>>>,
}

/// What one `AsyncRun::poll` call produced.
pub enum RunProgress {
    Done(Result<Value, TsError>),
    Suspended,
}

impl AsyncRun {
    pub fn new(future: impl Future<Output = Result<Value, TsError>> + 'static) -> Self {
        Self { future: Box::pin(future) }
    }

    /// Advances the evaluation by one poll. The embedder is expected to
    /// call this again once whatever host task the program is waiting on
    /// has settled; this crate does not track *which* task that is or wake
    /// itself automatically, since it has no I/O reactor or `tokio`
    /// dependency of its own.
    pub fn poll(&mut self) -> RunProgress {
        match poll_once(self.future.as_mut()) {
            Poll::Ready(result) => RunProgress::Done(result),
            Poll::Pending => RunProgress::Suspended,
        }
    }
}

/// A minimal single-threaded task queue, used only to drive promise
/// microtask-style callbacks (`.then`) to completion within one evaluation,
/// not to schedule real concurrency. Grounded on the same "no external
/// runtime" constraint as `AsyncRun`.
#[derive(Default)]
pub struct MicrotaskQueue {
    tasks: Vec<Box<dyn FnOnce()>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: Box<dyn FnOnce()>) {
        self.tasks.push(task);
    }

    /// Drains every currently queued microtask, including ones enqueued by
    /// tasks that ran during this very drain (settling one promise often
    /// schedules another `.then` callback).
    pub fn drain(&mut self) {
        while !self.tasks.is_empty() {
            let batch = std::mem::take(&mut self.tasks);
            for task in batch {
                task();
            }
        }
    }
}

/// Wraps a `Waker` so host futures that need to signal readiness (real
/// embeddings plugging in actual I/O) have something concrete to hold;
/// within this crate's own executor it is always the no-op waker, since
/// nothing here actually parks a thread.
pub fn shared_noop_waker() -> Arc<Waker> {
    Arc::new(noop_waker())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn immediate() -> Result<Value, TsError> {
        Ok(Value::Number(42.0))
    }

    #[test]
    fn run_sync_completes_non_suspending_future() {
        let result = run_sync(immediate()).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    struct NeverReady;
    impl Future for NeverReady {
        type Output = Result<Value, TsError>;
        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
            Poll::Pending
        }
    }

    #[test]
    fn run_sync_errors_on_suspension() {
        assert!(run_sync(NeverReady).is_err());
    }

    #[test]
    fn async_run_reports_suspension_then_completes() {
        let mut polls = 0u32;
        let fut = async move {
            polls += 1;
            std::future::pending::<()>().await;
            Ok(Value::Undefined)
        };
        let mut run = AsyncRun::new(fut);
        assert!(matches!(run.poll(), RunProgress::Suspended));
    }

    #[test]
    fn microtask_queue_drains_nested_enqueues() {
        let count = std::rc::Rc::new(std::cell::RefCell::new(0));
        let mut queue = MicrotaskQueue::new();
        let c1 = count.clone();
        queue.enqueue(Box::new(move || {
                    *c1.borrow_mut() += 1;
        }));
        queue.drain();
        assert_eq!(*count.borrow(), 1);
    }
}
