//! Execution tracing infrastructure.
//!
//! No hard dependency on a logging crate: instrumentation is a zero-cost
//! pluggable trait instead, so callers only pay for what they ask for.
//! [`Tracer`] has default no-op methods, [`NoopTracer`] compiles away
//! entirely, [`StderrTracer`] prints a human-readable log, and
//! [`RecordingTracer`] captures events for tests and debugging.

/// One traced execution event.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    Statement { depth: usize },
    Call { name: Option<String>, depth: usize },
    Return { depth: usize },
    Suspend { reason: &'static str },
    Resume,
    Error { message: String },
}

/// Hook points the evaluator calls into during execution. All methods have
/// no-op default bodies, so [`NoopTracer`] (the production default) compiles
/// to nothing via monomorphization.
pub trait Tracer: std::fmt::Debug {
    #[inline(always)]
    fn on_statement(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_call(&mut self, _name: Option<&str>, _depth: usize) {}

    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_suspend(&mut self, _reason: &'static str) {}

    #[inline(always)]
    fn on_resume(&mut self) {}

    #[inline(always)]
    fn on_error(&mut self, _message: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Prints a short line to stderr for every hook, useful while debugging a
/// host integration interactively.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn on_call(&mut self, name: Option<&str>, depth: usize) {
        eprintln!("call  depth={depth} fn={}", name.unwrap_or("<anonymous>"));
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("ret   depth={depth}");
    }

    fn on_suspend(&mut self, reason: &'static str) {
        eprintln!("susp  reason={reason}");
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("error {message}");
    }
}

/// Records every event for later inspection; used by tests that assert on
/// the shape of an execution rather than just its final value.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl Tracer for RecordingTracer {
    fn on_statement(&mut self, depth: usize) {
        self.events.push(TraceEvent::Statement { depth });
    }

    fn on_call(&mut self, name: Option<&str>, depth: usize) {
        self.events.push(TraceEvent::Call {
            name: name.map(str::to_owned),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }

    fn on_suspend(&mut self, reason: &'static str) {
        self.events.push(TraceEvent::Suspend { reason });
    }

    fn on_resume(&mut self) {
        self.events.push(TraceEvent::Resume);
    }

    fn on_error(&mut self, message: &str) {
        self.events.push(TraceEvent::Error {
            message: message.to_owned(),
        });
    }
}
