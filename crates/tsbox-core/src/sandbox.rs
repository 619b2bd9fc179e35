//! The embeddable façade: `Sandbox` ties the parser, feature gate, resource
//! tracker, host proxy, and module linker together behind a constructor plus
//! a synchronous/asynchronous/module evaluate surface.
//!
//! A constructor takes an options struct; per-call options fully replace
//! (rather than merge piecewise into) the constructor defaults for that one
//! call. No snapshot, resume, or REPL surface is exposed here: the embedding
//! API is plain Rust values in, `Result` out, with nothing persisted across
//! calls except cumulative resource stats and the module cache.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::TsError;
use crate::evaluator::{self, Evaluator};
use crate::environment::{BindingKind, Environment};
use crate::executor::{self, AsyncRun};
use crate::feature_gate::{FeatureGate, FeatureToken, GateMode};
use crate::modules::{ModuleLinker, ModuleResolver, NullResolver};
use crate::parser::Parser;
use crate::proxy::{is_forbidden_global, HostValue};
use crate::resource::{CumulativeLimits, CumulativeStats, ResourceLimits, ResourceTracker};
use crate::tracer::{NoopTracer, Tracer};
use crate::value::Value;

/// Constructor-time security posture: feature gating and error-message
/// sanitization.
pub struct SecurityOptions {
    pub feature_mode: GateMode,
    pub feature_tokens: Vec<FeatureToken>,
    pub sanitize_paths: bool,
    pub hide_host_messages: bool,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            feature_mode: GateMode::Blacklist,
            feature_tokens: Vec::new(),
            sanitize_paths: true,
            hide_host_messages: false,
        }
    }
}

/// Constructor-time module configuration. `None` (the default) disables
/// `import`/`export` entirely; the parser still accepts the syntax (feature
/// gating handles rejection) but a resolver must be supplied to use it.
#[derive(Default)]
pub struct ModulesOptions {
    pub resolver: Option<Box<dyn ModuleResolver>>,
    pub max_depth: usize,
}

/// Options accepted by [`Sandbox::new`].
#[derive(Default)]
pub struct SandboxOptions {
    pub globals: HashMap<String, HostValue>,
    pub security: SecurityOptions,
    pub cumulative_limits: CumulativeLimits,
    pub modules: Option<ModulesOptions>,
    pub tracer: Option<Box<dyn Tracer>>,
}

/// Per-call options. Any field set here
/// fully replaces, rather than merges into, the corresponding constructor
/// default for the duration of this one call.
#[derive(Default)]
pub struct EvalOptions {
    pub globals: HashMap<String, HostValue>,
    pub limits: ResourceLimits,
    pub feature_tokens: Option<(GateMode, Vec<FeatureToken>)>,
}

/// The embeddable interpreter instance. Owns the accumulated resource stats
/// and the module cache across calls; everything else needed for one
/// `evaluate` is assembled fresh from the constructor defaults merged with
/// that call's [`EvalOptions`].
pub struct Sandbox {
    globals: HashMap<String, HostValue>,
    feature_mode: GateMode,
    feature_tokens: Vec<FeatureToken>,
    sanitize_paths: bool,
    hide_host_messages: bool,
    resources: ResourceTracker,
    modules: Option<ModuleLinker>,
    tracer: Box<dyn Tracer>,
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> Result<Self, TsError> {
        for name in options.globals.keys() {
            if is_forbidden_global(name) {
                return Err(TsError::security(format!(
                    "'{name}' cannot be registered as a global"
                )));
            }
        }
        let modules = options.modules.map(|m| {
            ModuleLinker::new(
                m.resolver.unwrap_or_else(|| Box::new(NullResolver)),
                if m.max_depth == 0 { 32 } else { m.max_depth },
            )
        });
        Ok(Self {
            globals: options.globals,
            feature_mode: options.security.feature_mode,
            feature_tokens: options.security.feature_tokens,
            sanitize_paths: options.security.sanitize_paths,
            hide_host_messages: options.security.hide_host_messages,
            resources: ResourceTracker::with_cumulative_limits(ResourceLimits::default(), options.cumulative_limits),
            modules,
            tracer: options.tracer.unwrap_or_else(|| Box::new(NoopTracer)),
        })
    }

    /// Cumulative stats gathered across every call made on this instance so
    /// far.
    pub fn cumulative_stats(&self) -> &CumulativeStats {
        self.resources.cumulative()
    }

    fn merged_globals(&self, call_globals: &HashMap<String, HostValue>) -> Result<HashMap<String, HostValue>, TsError> {
        for name in call_globals.keys() {
            if is_forbidden_global(name) {
                return Err(TsError::security(format!(
                    "'{name}' cannot be registered as a global"
                )));
            }
        }
        let mut merged = HashMap::new();
        for (k, v) in &self.globals {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in call_globals {
            merged.insert(k.clone(), v.clone());
        }
        Ok(merged)
    }

    fn build_environment(&self, call_globals: &HashMap<String, HostValue>) -> Result<Environment, TsError> {
        let env = Environment::root();
        for (name, hv) in self.merged_globals(call_globals)? {
            let value = evaluator::from_host_value(hv);
            env.declare(&name, BindingKind::Const, value)?;
        }
        Ok(env)
    }

    fn feature_gate(&self, call_tokens: &Option<(GateMode, Vec<FeatureToken>)>) -> FeatureGate {
        match call_tokens {
            Some((mode, tokens)) => FeatureGate::new(*mode, tokens.iter().copied()),
            None => FeatureGate::new(self.feature_mode, self.feature_tokens.iter().copied()),
        }
    }

    /// Evaluates `source` synchronously. Any
    /// attempt to suspend — `await`, an async function call, or a host call
    /// that returns a pending task — fails with a security error rather than
    /// silently completing partway.
    pub fn evaluate(&mut self, source: &str, options: EvalOptions) -> Result<Value, TsError> {
        let program = Parser::parse_script(source)?;
        let env = self.build_environment(&options.globals)?;
        let features = self.feature_gate(&options.feature_tokens);

        self.resources.begin_run(options.limits)?;
        let tracer = std::mem::replace(&mut self.tracer, Box::new(NoopTracer));
        let mut ev = Evaluator::new(features, std::mem::take(&mut self.resources), tracer);
        ev.sync_mode = true;
        ev.sanitize_paths = self.sanitize_paths;
        ev.hide_host_messages = self.hide_host_messages;

        let result = executor::run_sync(evaluator::eval_program(&mut ev, &env, &program.body));

        self.resources = ev.resources;
        self.tracer = ev.tracer;
        self.resources.end_run();
        result.map_err(|e| e.sanitize(self.sanitize_paths, self.hide_host_messages))
    }

    /// Evaluates `source` asynchronously, returning a resumable [`AsyncRun`]
    /// the caller polls to completion, driving its own host-task resolution
    /// between polls.
    ///
    /// `AsyncRun::new` requires a `'static` future, so (unlike [`Self::evaluate`])
    /// this owns a standalone `Evaluator` for the run's duration rather than
    /// borrowing `self.resources`; the run's resource usage is not folded back
    /// into this instance's cumulative stats once it completes, the same
    /// trade a generator body already makes for its own independent tracker.
    pub fn evaluate_async(&self, source: &str, options: EvalOptions) -> Result<AsyncRun, TsError> {
        let program = Parser::parse_script(source)?;
        let env = self.build_environment(&options.globals)?;
        let features = self.feature_gate(&options.feature_tokens);
        let sanitize_paths = self.sanitize_paths;
        let hide_host_messages = self.hide_host_messages;

        let mut resources = ResourceTracker::unlimited();
        resources.begin_run(options.limits)?;

        let fut = async move {
            let mut ev = Evaluator::new(features, resources, Box::new(NoopTracer));
            evaluator::eval_program(&mut ev, &env, &program.body)
                .await
                .map_err(|e| e.sanitize(sanitize_paths, hide_host_messages))
        };
        Ok(AsyncRun::new(fut))
    }

    /// Evaluates `source` as an ES module, linking its imports
    /// through the constructor-supplied resolver. Fails if no `modules`
    /// option was configured.
    pub fn evaluate_module(&mut self, path: &str, source: &str, options: EvalOptions) -> Result<IndexMap<String, Value>, TsError> {
        let linker = self
            .modules
            .as_mut()
            .ok_or_else(|| TsError::security("module evaluation requires a `modules` resolver configured on the sandbox"))?;

        let program = Rc::new(Parser::parse_module(source)?);
        let env = Environment::root();
        for (name, hv) in self.merged_globals(&options.globals)? {
            env.declare(&name, BindingKind::Const, evaluator::from_host_value(hv))?;
        }
        let features = self.feature_gate(&options.feature_tokens);

        self.resources.begin_run(options.limits)?;
        let tracer = std::mem::replace(&mut self.tracer, Box::new(NoopTracer));
        let mut ev = Evaluator::new(features, std::mem::take(&mut self.resources), tracer);
        ev.sync_mode = false;
        ev.sanitize_paths = self.sanitize_paths;
        ev.hide_host_messages = self.hide_host_messages;

        // Top-level `await` is legal in a module body, so this drives the
        // module's future to completion by polling repeatedly (the same
        // pattern `AsyncRun::poll` exposes to embedders) rather than
        // treating one `Pending` result as a suspension error the way the
        // script-mode `evaluate` does.
        let mut fut = Box::pin(linker.evaluate_module(&mut ev, path, program, &env));
        let result = loop {
            match executor::poll_once(fut.as_mut()) {
                std::task::Poll::Ready(r) => break r,
                std::task::Poll::Pending => continue,
            }
        };
        drop(fut);

        self.resources = ev.resources;
        self.tracer = ev.tracer;
        self.resources.end_run();
        result.map_err(|e| e.sanitize(self.sanitize_paths, self.hide_host_messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_simple_expression() {
        let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
        let result = sandbox.evaluate("2 + 3", EvalOptions::default()).unwrap();
        assert_eq!(result, Value::Number(5.0));
    }

    #[test]
    fn sync_evaluation_of_resolved_async_function_succeeds() {
        let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
        let result = sandbox
            .evaluate("async function f() { return 42; } f()", EvalOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn async_evaluation_of_resolved_async_function_resolves() {
        let sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
        let mut run = sandbox
            .evaluate_async("async function f() { return 42; } f()", EvalOptions::default())
            .unwrap();
        loop {
            match run.poll() {
                executor::RunProgress::Done(result) => {
                    let value = result.unwrap();
                    let Value::Promise(handle) = value else { panic!("expected promise") };
                    let state = handle.0.borrow();
                    match &*state {
                        crate::value::PromiseState::Fulfilled(v) => assert_eq!(*v, Value::Number(42.0)),
                        other => panic!("expected fulfilled promise, got {other:?}"),
                    }
                    break;
                }
                executor::RunProgress::Suspended => continue,
            }
        }
    }

    #[test]
    fn forbidden_global_name_is_rejected_at_construction() {
        let mut globals = HashMap::new();
        globals.insert("eval".to_string(), HostValue::Undefined);
        let options = SandboxOptions {
            globals,
            ..SandboxOptions::default()
        };
        assert!(Sandbox::new(options).is_err());
    }

    #[test]
    fn feature_gate_blocks_disabled_form() {
        let options = SandboxOptions {
            security: SecurityOptions {
                feature_mode: GateMode::Blacklist,
                feature_tokens: vec![FeatureToken::Classes],
                ..SecurityOptions::default()
            },
            ..SandboxOptions::default()
        };
        let mut sandbox = Sandbox::new(options).unwrap();
        let result = sandbox.evaluate("class C {}", EvalOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn resource_limit_is_enforced() {
        let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
        let options = EvalOptions {
            limits: ResourceLimits::new().max_loop_iterations(10),
            ..EvalOptions::default()
        };
        let result = sandbox.evaluate("let i = 0; while (true) { i++; }", options);
        assert!(result.is_err());
    }
}
