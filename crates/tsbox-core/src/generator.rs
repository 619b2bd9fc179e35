//! Generator and `await` suspension machinery (component C10).
//!
//! `yield` and `await` are both plain `.await` points on purpose-built
//! futures; the interesting part lives in `evaluator.rs`'s boxed-recursive
//! `async fn`s, which already give every generator/async function body a
//! resumable state machine for free. This module supplies the three pieces
//! that glue that state machine to the outside world:
//!
//! - [`make_generator`] builds a generator's body as an `async move` block
//!   that owns its own private `Evaluator`, so the resulting future is
//!   `'static` and self-contained rather than borrowing from the call that
//!   created it (the same trick any ordinary `async fn` uses to hold local
//!   state across `.await`).
//! - [`yield_value`]/[`YieldFuture`] suspend that body out to whatever is
//!   driving it, through a small shared channel (`evaluator::GeneratorChannel`).
//! - [`await_value`]/[`await_host_future`] suspend on a promise or a host
//!   task, for use both inside and outside generator bodies.
//!
//! Each generator body runs against its own `ResourceTracker`, independent of
//! the evaluator that called it; only the feature gate is carried over. A
//! generator never shares call-depth or loop-iteration accounting with its
//! caller, a simplification worth the independence it buys.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::ast::FunctionBody;
use crate::environment::Environment;
use crate::error::TsError;
use crate::evaluator::{self, Evaluator, GeneratorChannel};
use crate::executor;
use crate::feature_gate::FeatureGate;
use crate::proxy::HostValue;
use crate::resource::ResourceTracker;
use crate::tracer::NoopTracer;
use crate::value::{Closure, GeneratorDriver, GeneratorHandle, GeneratorResume, IterStep, PromiseHandle, PromiseState, Value};

/// Suspends a generator body out to its driver, carrying `value` as the
/// yielded result, and resolves to whatever the driver resumes it with next
/// (`.next(v)` -> `Ok(v)`, `.throw(e)` -> `Err(Runtime)`, `.return(v)` ->
/// `Err(GeneratorReturn)`, unwound like any other error so `finally` blocks
/// still run on the way out).
pub async fn yield_value(ev: &mut Evaluator, value: Value, delegate: bool) -> Result<Value, TsError> {
    if delegate {
        let items = crate::function::iterate_to_vec(&value)?;
        let mut last = Value::Undefined;
        for item in items {
            last = do_yield(ev, item).await?;
        }
        Ok(last)
    } else {
        do_yield(ev, value).await
    }
}

async fn do_yield(ev: &mut Evaluator, value: Value) -> Result<Value, TsError> {
    let channel = ev
        .gen_channel
        .clone()
        .ok_or_else(|| TsError::security("yield used outside a generator body"))?;
    YieldFuture { channel, value: Some(value) }.await
}

/// First poll deposits the yielded value and suspends; the generator driver
/// reads it back out of the channel and reports it to the consumer. The next
/// poll (after the driver has stashed a resume request) consumes that
/// request and resolves.
struct YieldFuture {
    channel: Rc<RefCell<GeneratorChannel>>,
    value: Option<Value>,
}

impl Future for YieldFuture {
    type Output = Result<Value, TsError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(value) = this.value.take() {
            this.channel.borrow_mut().outgoing = Some(value);
            return Poll::Pending;
        }
        match this.channel.borrow_mut().incoming.take() {
            Some(GeneratorResume::Next(v)) => Poll::Ready(Ok(v)),
            Some(GeneratorResume::Throw(v)) => Poll::Ready(Err(TsError::runtime(v))),
            Some(GeneratorResume::Return(v)) => Poll::Ready(Err(TsError::GeneratorReturn(v))),
            None => Poll::Pending,
        }
    }
}

/// Suspends on a promise: resolves immediately if it has already settled
/// (the common case for a synchronous run, where the whole body ran to
/// completion before any real I/O had a chance to happen), otherwise keeps
/// returning `Pending` across repeated polls until it does.
pub async fn await_value(ev: &mut Evaluator, value: Value) -> Result<Value, TsError> {
    let Value::Promise(handle) = value else {
        return Ok(value);
    };
    ev.tracer.on_suspend("await");
    let result = AwaitPromiseFuture { handle }.await;
    ev.tracer.on_resume();
    result
}

struct AwaitPromiseFuture {
    handle: PromiseHandle,
}

impl Future for AwaitPromiseFuture {
    type Output = Result<Value, TsError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let state = self.handle.0.borrow();
        match &*state {
            PromiseState::Fulfilled(v) => Poll::Ready(Ok(v.clone())),
            PromiseState::Rejected(v) => Poll::Ready(Err(TsError::runtime(v.clone()))),
            PromiseState::Pending(_) => Poll::Pending,
        }
    }
}

/// Suspends on a host-supplied future (a host function call that returned
/// `HostCallOutcome::Pending`), forwarding genuine suspension through to the
/// caller's executor rather than blocking.
pub async fn await_host_future(
    ev: &mut Evaluator,
    fut: Pin<Box<dyn Future<Output = Result<HostValue, String>>>>,
) -> Result<HostValue, TsError> {
    ev.tracer.on_suspend("host-call");
    let result = AwaitHostFuture { fut }.await;
    ev.tracer.on_resume();
    result.map_err(TsError::security)
}

struct AwaitHostFuture {
    fut: Pin<Box<dyn Future<Output = Result<HostValue, String>>>>,
}

impl Future for AwaitHostFuture {
    type Output = Result<HostValue, String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.fut.as_mut().poll(cx)
    }
}

/// Builds a generator value for a call to a `function*` closure. The body
/// future owns a freshly constructed `Evaluator`/`Environment` clone and the
/// closure itself, so it is `'static` and does not borrow from the call that
/// produced it.
pub fn make_generator(closure: Rc<Closure>, call_env: Environment, features: FeatureGate) -> Value {
    let channel = Rc::new(RefCell::new(GeneratorChannel {
        outgoing: None,
        incoming: None,
    }));
    let body_channel = channel.clone();

    let body = async move {
        let mut gen_ev = Evaluator::new(features, ResourceTracker::unlimited(), Box::new(NoopTracer));
        gen_ev.gen_channel = Some(body_channel);
        let FunctionBody::Block(stmts) = &closure.def.body else {
            return Err(TsError::security("generator body must be a block"));
        };
        match evaluator::eval_block(&mut gen_ev, &call_env, stmts).await? {
            evaluator::Completion::Return(v) => Ok(v),
            _ => Ok(Value::Undefined),
        }
    };

    let driver = GeneratorDriverImpl {
        channel,
        body: Some(Box::pin(body)),
        started: false,
        done: false,
    };
    Value::Generator(GeneratorHandle(Rc::new(RefCell::new(
        Box::new(driver) as Box<dyn GeneratorDriver>
    ))))
}

struct GeneratorDriverImpl {
    channel: Rc<RefCell<GeneratorChannel>>,
    body: Option<Pin<Box<dyn Future<Output = Result<Value, TsError>>>>>,
    started: bool,
    done: bool,
}

impl GeneratorDriver for GeneratorDriverImpl {
    fn resume(&mut self, input: GeneratorResume) -> Result<IterStep, TsError> {
        if self.done {
            return match input {
                GeneratorResume::Return(v) => Ok(IterStep { value: v, done: true }),
                GeneratorResume::Throw(v) => Err(TsError::runtime(v)),
                GeneratorResume::Next(_) => Ok(IterStep { value: Value::Undefined, done: true }),
            };
        }

        if !self.started {
            match input {
                GeneratorResume::Return(v) => {
                    self.done = true;
                    self.body = None;
                    return Ok(IterStep { value: v, done: true });
                }
                GeneratorResume::Throw(v) => {
                    self.done = true;
                    self.body = None;
                    return Err(TsError::runtime(v));
                }
                GeneratorResume::Next(_) => {
                    self.started = true;
                }
            }
        } else {
            self.channel.borrow_mut().incoming = Some(input);
        }

        self.poll_body()
    }
}

impl GeneratorDriverImpl {
    fn poll_body(&mut self) -> Result<IterStep, TsError> {
        let Some(body) = self.body.as_mut() else {
            self.done = true;
            return Ok(IterStep { value: Value::Undefined, done: true });
        };
        match executor::poll_once(body.as_mut()) {
            Poll::Ready(result) => {
                self.done = true;
                self.body = None;
                match result {
                    Ok(v) => Ok(IterStep { value: v, done: true }),
                    Err(TsError::GeneratorReturn(v)) => Ok(IterStep { value: v, done: true }),
                    Err(e) => Err(e),
                }
            }
            Poll::Pending => match self.channel.borrow_mut().outgoing.take() {
                Some(v) => Ok(IterStep { value: v, done: false }),
                None => Err(TsError::security(
                    "generator suspended on an unsupported await point; generator bodies cannot await",
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDef, Param, Stmt};

    fn simple_generator_closure(body: Vec<Stmt>) -> Rc<Closure> {
        Rc::new(Closure {
            def: Rc::new(FunctionDef {
                name: None,
                params: Vec::<Param>::new(),
                body: FunctionBody::Block(body),
                is_async: false,
                is_generator: true,
                is_arrow: false,
            }),
            env: Environment::root(),
            bound_this: None,
            home_class: None,
            name: None,
        })
    }

    #[test]
    fn generator_yields_then_completes() {
        let body = vec![
            Stmt::Expression(crate::ast::Expr::Yield {
                argument: Some(Box::new(crate::ast::Expr::Literal(crate::ast::Literal::Number(1.0)))),
                delegate: false,
            }),
            Stmt::Expression(crate::ast::Expr::Yield {
                argument: Some(Box::new(crate::ast::Expr::Literal(crate::ast::Literal::Number(2.0)))),
                delegate: false,
            }),
        ];
        let closure = simple_generator_closure(body);
        let env = Environment::root();
        let value = make_generator(closure, env, FeatureGate::allow_all());
        let Value::Generator(handle) = value else { panic!("expected generator") };

        let step1 = handle.0.borrow_mut().resume(GeneratorResume::Next(Value::Undefined)).unwrap();
        assert_eq!(step1.value, Value::Number(1.0));
        assert!(!step1.done);

        let step2 = handle.0.borrow_mut().resume(GeneratorResume::Next(Value::Undefined)).unwrap();
        assert_eq!(step2.value, Value::Number(2.0));
        assert!(!step2.done);

        let step3 = handle.0.borrow_mut().resume(GeneratorResume::Next(Value::Undefined)).unwrap();
        assert!(step3.done);
    }

    #[test]
    fn generator_return_before_start_skips_body() {
        let body = vec![Stmt::Expression(crate::ast::Expr::Yield {
            argument: Some(Box::new(crate::ast::Expr::Literal(crate::ast::Literal::Number(1.0)))),
            delegate: false,
        })];
        let closure = simple_generator_closure(body);
        let env = Environment::root();
        let value = make_generator(closure, env, FeatureGate::allow_all());
        let Value::Generator(handle) = value else { panic!("expected generator") };

        let step = handle
            .0
            .borrow_mut()
            .resume(GeneratorResume::Return(Value::Number(9.0)))
            .unwrap();
        assert_eq!(step.value, Value::Number(9.0));
        assert!(step.done);
    }
}
