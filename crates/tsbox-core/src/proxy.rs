//! Host proxy: the read-only wrapper interposed between sandbox code and
//! any value owned by the embedding application (component C6).
//!
//! Grounded on `proxy.rs`'s `ProxyId` pattern: the sandbox never holds a
//! direct pointer into host memory, only an opaque, checked handle. Here the
//! handle is a trait object (`Rc<dyn HostObject>` / `Rc<dyn HostCallable>`)
//! supplied by the embedder, and every read through it is checked against
//! the dangerous-property set before the host is ever consulted.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::error::TsError;

/// Property names that fail with a security error on every proxied read,
/// regardless of whether the underlying host object actually defines them
///.
pub const DANGEROUS_PROPS: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// Additional dangerous names checked only on callable host values.
pub const DANGEROUS_FUNCTION_PROPS: &[&str] = &["apply", "call", "bind", "arguments", "caller"];

/// Identifiers that can never be registered as globals, under any surface
/// (constructor `globals`, per-call `globals`, or module externals).
pub const FORBIDDEN_GLOBAL_NAMES: &[&str] = &[
    "Function",
    "eval",
    "globalThis",
    "window",
    "global",
    "Proxy",
    "Reflect",
    "AsyncFunction",
    "GeneratorFunction",
    "AsyncGeneratorFunction",
];

pub fn is_dangerous_property(name: &str, callable: bool) -> bool {
    DANGEROUS_PROPS.contains(&name) || (callable && DANGEROUS_FUNCTION_PROPS.contains(&name))
}

pub fn is_forbidden_global(name: &str) -> bool {
    FORBIDDEN_GLOBAL_NAMES.contains(&name)
}

/// A value crossing the host/sandbox boundary, either as an argument to a
/// sandbox call into the host or as a value the host hands back to the
/// sandbox (a global, a call return value, a nested property read).
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Rc<dyn HostObject>),
    Function(Rc<dyn HostCallable>),
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(_) => write!(f, "<host object>"),
            Self::Function(_) => write!(f, "<host function>"),
        }
    }
}

/// A plain (non-callable) object owned by the host application.
///
/// Implementors back every read through `proxy::read_property`'s
/// dangerous-name check; the trait itself has no notion of security, only
/// data access, keeping the VM-facing wrapper thin.
pub trait HostObject: fmt::Debug {
    /// Reads a property by name. `None` means "no such property" (the
    /// sandbox sees `undefined`), distinct from a security-denied read.
    fn get(&self, name: &str) -> Option<HostValue>;

    /// Enumerable own property names, for `for..in` and similar reflection.
    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A callable value owned by the host application.
pub trait HostCallable: fmt::Debug {
    /// Invokes the host function. `this` is the sandbox value the call was
    /// made through (e.g. `obj.method()` passes the proxy for `obj`).
    fn call(&self, this: Option<HostValue>, args: Vec<HostValue>) -> Result<HostCallOutcome, String>;

    /// Same dangerous-name check as [`HostObject::get`], but for the small
    /// set of function-specific forbidden properties (`apply`, `call`, ...).
    fn get(&self, _name: &str) -> Option<HostValue> {
        None
    }
}

/// The result of invoking a host function: either an immediately available
/// value, or a pending task the async evaluator suspends on.
pub enum HostCallOutcome {
    Ready(HostValue),
    Pending(Pin<Box<dyn Future<Output = Result<HostValue, String>>>>),
}

/// Distinguishes a proxy wrapping a plain object from one wrapping a
/// callable, so the evaluator knows whether `typeof` should report
/// `"object"` or `"function"` without re-probing the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Object,
    Function,
}

/// Checks a proxied property read against the dangerous-name set before
/// consulting the host at all. Returns `Err` with a security message naming
/// the offending property: attempting `H.p` on a dangerous name from sandbox
/// code fails with a security error rather than reaching the host.
pub fn check_readable(name: &str, kind: ProxyKind) -> Result<(), TsError> {
    if is_dangerous_property(name, kind == ProxyKind::Function) {
        return Err(TsError::security(format!(
                    "access to '{name}' is not permitted on host values"
        )));
    }
    Ok(())
}

/// Writes, defines, deletes, or re-parents on a proxied object are always
/// rejected. Plain objects reject silently (the write is simply dropped,
/// leaving the host object bit-identical); calling this for a function
/// handle should instead raise (see `check_writable_function`).
pub fn reject_write_silently() {}

pub fn check_writable_function(property: &str) -> TsError {
    TsError::security(format!("cannot modify host function property '{property}'"))
}

/// Awaiting a host function handle directly (without calling it first) is
/// rejected.
pub fn check_not_awaiting_handle() -> TsError {
    TsError::security("cannot await a host function handle directly; call it first".to_owned())
}
