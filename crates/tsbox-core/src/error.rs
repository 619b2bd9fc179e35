//! Structured error taxonomy for the interpreter (component C13).
//!
//! Five kinds, distinguished by tag: parse, runtime, security, feature,
//! resource. Parse and feature errors surface during parse/validate; the
//! rest surface during evaluation. Shape follows a split between a type tag
//! (`ExcType`) and the carried payload (`Exception`), plus a dedicated
//! `ResourceError`.

use std::fmt;

use crate::ast::Span;
use crate::value::Value;

/// One stack frame recorded for diagnostics. Function name only — no file
/// paths are stored here, so there is nothing for sanitization to scrub
/// except the free-text message.
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    pub function_name: Option<String>,
}

/// Top level error type returned by parsing and evaluation.
#[derive(Debug, Clone)]
pub enum TsError {
    /// A syntax error raised by the lexer or parser, or an external
    /// validator that rejected the parsed AST.
    Parse { message: String, span: Span },
    /// A value was thrown by sandbox code (or propagated from a host
    /// function). Catchable by sandbox `try`/`catch`.
    Runtime {
        value: Value,
        stack: Vec<StackFrame>,
        /// Set when this runtime error originated inside a host function call;
        /// names the host function for diagnostics even when the message
        /// itself has been replaced by sanitization.
        host_function: Option<String>,
    },
    /// A forbidden property was read/written on a host proxy, or some other
    /// host-side security violation occurred. Never catchable.
    Security { message: String },
    /// A disabled AST form was used.
    Feature { token: String, message: String },
    /// A per-run or cumulative resource limit was exceeded, or the run was
    /// aborted via the caller's abort signal. Never catchable.
    Resource(ResourceError),
    /// Internal control-flow marker used to unwind a generator body up to
    /// its driver when the consumer calls `.return(value)`. Runs `finally`
    /// blocks on the way out like any other unwind, but is intercepted by
    /// `generator.rs` before it could ever reach sandbox code or an
    /// embedder — never constructed or observed outside this crate.
    GeneratorReturn(Value),
}

impl fmt::Display for TsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { message, .. } => write!(f, "SyntaxError: {message}"),
            Self::Runtime { value, .. } => write!(f, "{}", crate::format::display_value(value)),
            Self::Security { message } => write!(f, "SecurityError: {message}"),
            Self::Feature { token, message } => write!(f, "FeatureError: {message} ({token})"),
            Self::Resource(err) => write!(f, "{err}"),
            Self::GeneratorReturn(_) => write!(f, "<internal: generator return>"),
        }
    }
}

impl std::error::Error for TsError {}

impl TsError {
    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::Parse {
            message: message.into(),
            span,
        }
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::Security {
            message: message.into(),
        }
    }

    pub fn feature(token: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Feature {
            token: token.into(),
            message: message.into(),
        }
    }

    pub fn runtime(value: Value) -> Self {
        Self::Runtime {
            value,
            stack: Vec::new(),
            host_function: None,
        }
    }

    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Runtime { .. })
    }

    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        if let Self::Runtime { stack, .. } = &mut self {
            stack.push(frame);
        }
        self
    }

    /// Applies the sandbox's error-sanitization policy: scrubs host file
    /// paths from any free-text message and optionally replaces the message
    /// of errors raised inside host functions with a fixed placeholder.
    pub fn sanitize(mut self, sanitize_paths: bool, hide_host_messages: bool) -> Self {
        if let Self::Runtime {
            value,
            host_function,
            ..
        } = &mut self
        {
            if sanitize_paths {
                scrub_paths_in_value(value);
            }
            if hide_host_messages && host_function.is_some() {
                if let Value::Object(obj) = value {
                    obj.borrow_mut().set("message", Value::from_str("[host error]"));
                }
            }
        }
        self
    }
}

fn scrub_paths_in_value(value: &mut Value) {
    if let Value::Object(obj) = value {
        let mut obj = obj.borrow_mut();
        if let Some(Value::String(msg)) = obj.get("message").cloned() {
            let scrubbed = scrub_paths(&msg);
            obj.set("message", Value::from_str(&scrubbed));
        }
        if let Some(Value::String(stack)) = obj.get("stack").cloned() {
            let scrubbed = scrub_paths(&stack);
            obj.set("stack", Value::from_str(&scrubbed));
        }
    }
}

fn scrub_paths(text: &str) -> String {
    text.split_whitespace()
    .map(|word| if looks_like_path(word) { "<path>" } else { word })
    .collect::<Vec<_>>()
    .join(" ")
}

fn looks_like_path(word: &str) -> bool {
    word.contains('/') && (word.starts_with('/') || word.starts_with("./") || word.contains("://"))
}

/// Resource-kind errors (component C8), mirroring `resource.rs::ResourceError`
/// adapted to the tree-walking call-depth/loop-iteration/memory-estimate model.
#[derive(Debug, Clone)]
pub enum ResourceError {
    CallDepth { limit: usize, depth: usize },
    LoopIterations { limit: usize, count: usize },
    Memory { limit: usize, used: usize },
    CumulativeExhausted { kind: &'static str },
    Aborted,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallDepth { limit, depth } => {
                write!(f, "RangeError: call stack depth exceeded: {depth} > {limit}")
            }
            Self::LoopIterations { limit, count } => {
                write!(f, "RangeError: loop iteration limit exceeded: {count} > {limit}")
            }
            Self::Memory { limit, used } => {
                write!(f, "RangeError: memory limit exceeded: {used} bytes > {limit} bytes")
            }
            Self::CumulativeExhausted { kind } => {
                write!(f, "RangeError: cumulative resource limit exceeded: {kind}")
            }
            Self::Aborted => write!(f, "AbortError: evaluation aborted"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for TsError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}
