//! Tree-walking evaluator (components C9/C10).
//!
//! Every statement/expression dispatch function is `async`; recursive calls
//! box their child call's future (`Box::pin`) rather than relying on plain
//! recursion, since an `async fn` compiles to a state machine whose size
//! would otherwise need to hold every recursive call inline — an infinite
//! type. Boxing each recursive step is the standard way to give recursive
//! async functions a finite, uniform size, and it costs one heap allocation
//! per AST node visited rather than per suspension — a trade worth making
//! in exchange for getting suspend/resume "for free" from the language
//! instead of hand-building a CPS interpreter.
//!
//! `await` and `yield` are both implemented as ordinary `.await` points on
//! purpose-built futures (see `generator.rs`); the synchronous driver in
//! `executor.rs` rejects any evaluation that actually suspends, and the
//! asynchronous driver lets them suspend across `AsyncRun::poll` calls.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::ast::*;
use crate::class;
use crate::coerce;
use crate::environment::{BindingKind, Environment};
use crate::error::TsError;
use crate::feature_gate::{FeatureGate, FeatureToken};
use crate::executor::MicrotaskQueue;
use crate::function::{self, BindTarget};
use crate::proxy::{self, HostCallOutcome, HostValue, ProxyKind};
use crate::resource::ResourceTracker;
use crate::tracer::Tracer;
use crate::value::{ClassValue, Closure, PlainObject, PrivateKey, PromiseHandle, PropertySlot, StaticInit, Value};

/// Outcome of evaluating one statement: either it ran normally, or it
/// produced a non-local control transfer that the enclosing construct
/// (loop, switch, function body) must interpret. A thrown value is
/// represented as `Err(TsError::Runtime)` instead of a `Completion` variant,
/// since Rust's `?` operator already gives us exactly the unwind behavior a
/// `Throw` completion needs.
pub enum Completion {
    Normal,
    Return(Value),
    Break(Option<String>),
    Continue(Option<String>),
}

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

fn boxed<'a, T: 'a>(fut: impl Future<Output = T> + 'a) -> BoxFut<'a, T> {
    Box::pin(fut)
}

/// Per-evaluation generator context: shared with the `Yield` future so a
/// `yield` expression deep in a call can hand a value out to whatever is
/// driving the generator, and receive the next resume input.
pub struct GeneratorChannel {
    pub outgoing: Option<Value>,
    pub incoming: Option<crate::value::GeneratorResume>,
}

pub struct Evaluator {
    pub resources: ResourceTracker,
    pub features: FeatureGate,
    pub tracer: Box<dyn Tracer>,
    pub microtasks: MicrotaskQueue,
    pub sanitize_paths: bool,
    pub hide_host_messages: bool,
    /// Set while running inside a generator/async-generator body so `yield`
    /// expressions know which channel to suspend through. `None` at the
    /// top level and inside ordinary function calls.
    pub gen_channel: Option<Rc<RefCell<GeneratorChannel>>>,
    /// Set by the façade when this evaluation is driven by the synchronous
    /// driver (`executor::run_sync`) rather than `AsyncRun`. Calling an async
    /// closure, evaluating `await`, or invoking a host function that returns
    /// a pending task are structural suspension points regardless of whether
    /// they would resolve immediately, so they are rejected up front here
    /// instead of relying on the driver to notice a `Pending` poll.
    pub sync_mode: bool,
}

impl Evaluator {
    pub fn new(features: FeatureGate, resources: ResourceTracker, tracer: Box<dyn Tracer>) -> Self {
        Self {
            resources,
            features,
            tracer,
            microtasks: MicrotaskQueue::new(),
            sanitize_paths: true,
            hide_host_messages: false,
            gen_channel: None,
            sync_mode: false,
        }
    }

    fn reject_if_sync(&self) -> Result<(), TsError> {
        if self.sync_mode {
            return Err(TsError::security(
                    "synchronous evaluation attempted to suspend (async function, await, or a pending host call)",
            ));
        }
        Ok(())
    }

    fn check_feature(&self, token: FeatureToken) -> Result<(), TsError> {
        self.features
        .check(token)
        .map_err(|t| TsError::feature(t.to_string(), format!("'{t}' is disabled by the sandbox's feature gate")))
    }
}

// ---- hoisting ------------------------------------------------------------

/// Declares every `var` and top-level function-declaration name in `stmts`
/// before the block runs, matching the language's hoisting semantics
///. Recurses into nested control-flow bodies but
/// not into nested function/arrow bodies, which introduce their own scope.
pub fn hoist(env: &Environment, stmts: &[Stmt]) {
    let func_frame = env.nearest_function_frame();
    for stmt in stmts {
        hoist_stmt(&func_frame, stmt);
    }
    for stmt in stmts {
        if let Stmt::FunctionDeclaration(def) = stmt {
            if let Some(name) = &def.name {
                let closure = Value::Closure(Rc::new(Closure {
                            def: def.clone(),
                            env: env.clone(),
                            bound_this: None,
                            home_class: None,
                            name: Some(Rc::from(name.as_str())),
                }));
                let _ = env.declare(name, BindingKind::Function, closure);
            }
        }
    }
}

fn hoist_stmt(func_frame: &Environment, stmt: &Stmt) {
    match stmt {
        Stmt::VariableDeclaration { kind: VarKind::Var, declarations } => {
            for d in declarations {
                hoist_pattern(func_frame, &d.id);
            }
        }
        Stmt::Block(inner) => {
            for s in inner {
                hoist_stmt(func_frame, s);
            }
        }
        Stmt::If { consequent, alternate, .. } => {
            hoist_stmt(func_frame, consequent);
            if let Some(alt) = alternate {
                hoist_stmt(func_frame, alt);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => hoist_stmt(func_frame, body),
        Stmt::For { body, init, .. } => {
            if let Some(init) = init {
                if let ForInit::VarDecl { kind: VarKind::Var, declarations } = init.as_ref() {
                    for d in declarations {
                        hoist_pattern(func_frame, &d.id);
                    }
                }
            }
            hoist_stmt(func_frame, body);
        }
        Stmt::ForOf { left, body, .. } | Stmt::ForIn { left, body, .. } => {
            if let ForInit::VarDecl { kind: VarKind::Var, declarations } = left.as_ref() {
                for d in declarations {
                    hoist_pattern(func_frame, &d.id);
                }
            }
            hoist_stmt(func_frame, body);
        }
        Stmt::Switch { cases, .. } => {
            for case in cases {
                for s in &case.consequent {
                    hoist_stmt(func_frame, s);
                }
            }
        }
        Stmt::Try { block, handler, finalizer } => {
            for s in block {
                hoist_stmt(func_frame, s);
            }
            if let Some(h) = handler {
                for s in &h.body {
                    hoist_stmt(func_frame, s);
                }
            }
            if let Some(f) = finalizer {
                for s in f {
                    hoist_stmt(func_frame, s);
                }
            }
        }
        Stmt::Labeled { body, .. } => hoist_stmt(func_frame, body),
        _ => {}
    }
}

fn hoist_pattern(func_frame: &Environment, pattern: &Pattern) {
    match pattern {
        Pattern::Identifier(name) => func_frame.hoist_var(name),
        Pattern::Assignment { left, .. } => hoist_pattern(func_frame, left),
        Pattern::Array { elements, rest } => {
            for e in elements.iter().flatten() {
                hoist_pattern(func_frame, e);
            }
            if let Some(r) = rest {
                hoist_pattern(func_frame, r);
            }
        }
        Pattern::Object { properties, rest } => {
            for p in properties {
                hoist_pattern(func_frame, &p.value);
            }
            if let Some(r) = rest {
                hoist_pattern(func_frame, r);
            }
        }
        Pattern::Member(_) => {}
    }
}

// ---- statement evaluation -------------------------------------------------

pub fn eval_block<'a>(ev: &'a mut Evaluator, env: &'a Environment, stmts: &'a [Stmt]) -> BoxFut<'a, Result<Completion, TsError>> {
    boxed(async move {
        let mut hoisted_fns = 0usize;
        for stmt in stmts {
            if matches!(stmt, Stmt::FunctionDeclaration(_)) {
                ev.check_feature(FeatureToken::FunctionDeclarations)?;
                hoisted_fns += 1;
            }
        }
        hoist(env, stmts);
        ev.resources.allocate(hoisted_fns * crate::resource::alloc_cost::CLOSURE_CAPTURE)?;
        for stmt in stmts {
            match eval_stmt(ev, env, stmt).await? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    })
}

/// Runs a top-level script or module body and resolves to the value of its
/// last top-level expression statement, or to an explicit `return`'s value if one is hit at the top level.
/// A bare `Stmt::Expression` is evaluated directly here rather than through
/// `eval_stmt`, since `Completion::Normal` carries no value of its own.
pub fn eval_program<'a>(ev: &'a mut Evaluator, env: &'a Environment, stmts: &'a [Stmt]) -> BoxFut<'a, Result<Value, TsError>> {
    boxed(async move {
        let mut hoisted_fns = 0usize;
        for stmt in stmts {
            if matches!(stmt, Stmt::FunctionDeclaration(_)) {
                ev.check_feature(FeatureToken::FunctionDeclarations)?;
                hoisted_fns += 1;
            }
        }
        hoist(env, stmts);
        ev.resources.allocate(hoisted_fns * crate::resource::alloc_cost::CLOSURE_CAPTURE)?;
        let mut last = Value::Undefined;
        for stmt in stmts {
            if let Stmt::Expression(expr) = stmt {
                last = eval_expr(ev, env, expr).await?;
                continue;
            }
            if let Completion::Return(v) = eval_stmt(ev, env, stmt).await? {
                return Ok(v);
            }
        }
        Ok(last)
    })
}

pub fn eval_stmt<'a>(ev: &'a mut Evaluator, env: &'a Environment, stmt: &'a Stmt) -> BoxFut<'a, Result<Completion, TsError>> {
    boxed(async move {
        ev.resources.check_abort()?;
        ev.tracer.on_statement(ev.resources.call_depth());
        match stmt {
            Stmt::Empty | Stmt::FunctionDeclaration(_) => Ok(Completion::Normal),
            Stmt::Block(stmts) => {
                let child = Environment::child_block(env);
                eval_block(ev, &child, stmts).await
            }
            Stmt::Expression(expr) => {
                eval_expr(ev, env, expr).await?;
                Ok(Completion::Normal)
            }
            Stmt::VariableDeclaration { kind, declarations } => {
                ev.check_feature(match kind {
                        VarKind::Var => FeatureToken::VariableDeclarations,
                        VarKind::Let | VarKind::Const => FeatureToken::LetConst,
                })?;
                for decl in declarations {
                    let value = match &decl.init {
                        Some(e) => eval_expr(ev, env, e).await?,
                        None => Value::Undefined,
                    };
                    let binding_kind = match kind {
                        VarKind::Var => BindingKind::Var,
                        VarKind::Let => BindingKind::Let,
                        VarKind::Const => BindingKind::Const,
                    };
                    let target = if *kind == VarKind::Var {
                        BindTarget::Assign { env }
                    } else {
                        BindTarget::Declare { env, kind: binding_kind }
                    };
                    bind_with_defaults(ev, env, &decl.id, value, &target).await?;
                }
                Ok(Completion::Normal)
            }
            Stmt::If { test, consequent, alternate } => {
                ev.check_feature(FeatureToken::IfStatement)?;
                if eval_expr(ev, env, test).await?.is_truthy() {
                    eval_stmt(ev, env, consequent).await
                } else if let Some(alt) = alternate {
                    eval_stmt(ev, env, alt).await
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::While { test, body } => {
                ev.check_feature(FeatureToken::WhileStatement)?;
                ev.resources.enter_loop();
                loop {
                    if !eval_expr(ev, env, test).await?.is_truthy() {
                        break;
                    }
                    ev.resources.tick_loop()?;
                    match eval_stmt(ev, env, body).await? {
                        Completion::Break(None) => break,
                        Completion::Continue(None) => continue,
                        Completion::Normal => {}
                        other @ (Completion::Return(_) | Completion::Break(_) | Completion::Continue(_)) => {
                            ev.resources.leave_loop();
                            return Ok(other);
                        }
                    }
                }
                ev.resources.leave_loop();
                Ok(Completion::Normal)
            }
            Stmt::DoWhile { body, test } => {
                ev.check_feature(FeatureToken::DoWhileStatement)?;
                ev.resources.enter_loop();
                loop {
                    ev.resources.tick_loop()?;
                    match eval_stmt(ev, env, body).await? {
                        Completion::Break(None) => break,
                        Completion::Continue(None) => {}
                        Completion::Normal => {}
                        other @ (Completion::Return(_) | Completion::Break(_) | Completion::Continue(_)) => {
                            ev.resources.leave_loop();
                            return Ok(other);
                        }
                    }
                    if !eval_expr(ev, env, test).await?.is_truthy() {
                        break;
                    }
                }
                ev.resources.leave_loop();
                Ok(Completion::Normal)
            }
            Stmt::For { init, test, update, body } => {
                ev.check_feature(FeatureToken::ForStatement)?;
                let loop_env = Environment::child_block(env);
                if let Some(init) = init {
                    eval_for_init(ev, &loop_env, init).await?;
                }
                ev.resources.enter_loop();
                loop {
                    if let Some(test) = test {
                        if !eval_expr(ev, &loop_env, test).await?.is_truthy() {
                            break;
                        }
                    }
                    ev.resources.tick_loop()?;
                    match eval_stmt(ev, &loop_env, body).await? {
                        Completion::Break(None) => break,
                        Completion::Continue(None) => {}
                        Completion::Normal => {}
                        other @ (Completion::Return(_) | Completion::Break(_) | Completion::Continue(_)) => {
                            ev.resources.leave_loop();
                            return Ok(other);
                        }
                    }
                    if let Some(update) = update {
                        eval_expr(ev, &loop_env, update).await?;
                    }
                }
                ev.resources.leave_loop();
                Ok(Completion::Normal)
            }
            Stmt::ForOf { left, right, body, is_await: _ } => {
                ev.check_feature(FeatureToken::ForOfStatement)?;
                let iterable = eval_expr(ev, env, right).await?;
                let items = function::iterate_to_vec(&iterable)?;
                ev.resources.enter_loop();
                for item in items {
                    ev.resources.tick_loop()?;
                    let iter_env = Environment::child_block(env);
                    bind_for_target(ev, &iter_env, left, item).await?;
                    match eval_stmt(ev, &iter_env, body).await? {
                        Completion::Break(None) => break,
                        Completion::Continue(None) => continue,
                        Completion::Normal => {}
                        other @ (Completion::Return(_) | Completion::Break(_) | Completion::Continue(_)) => {
                            ev.resources.leave_loop();
                            return Ok(other);
                        }
                    }
                }
                ev.resources.leave_loop();
                Ok(Completion::Normal)
            }
            Stmt::ForIn { left, right, body } => {
                ev.check_feature(FeatureToken::ForInStatement)?;
                let obj = eval_expr(ev, env, right).await?;
                let keys = match &obj {
                    Value::Object(o) => o.borrow().properties.keys().map(|k| k.to_string()).collect::<Vec<_>>(),
                    Value::Array(a) => (0..a.borrow().len()).map(|i| i.to_string()).collect(),
                    _ => Vec::new(),
                };
                ev.resources.enter_loop();
                for key in keys {
                    ev.resources.tick_loop()?;
                    let iter_env = Environment::child_block(env);
                    bind_for_target(ev, &iter_env, left, Value::from_str(&key)).await?;
                    match eval_stmt(ev, &iter_env, body).await? {
                        Completion::Break(None) => break,
                        Completion::Continue(None) => continue,
                        Completion::Normal => {}
                        other @ (Completion::Return(_) | Completion::Break(_) | Completion::Continue(_)) => {
                            ev.resources.leave_loop();
                            return Ok(other);
                        }
                    }
                }
                ev.resources.leave_loop();
                Ok(Completion::Normal)
            }
            Stmt::Switch { discriminant, cases } => {
                ev.check_feature(FeatureToken::SwitchStatement)?;
                let disc = eval_expr(ev, env, discriminant).await?;
                let switch_env = Environment::child_block(env);
                let mut matched = false;
                let mut default_idx = None;
                for (i, case) in cases.iter().enumerate() {
                    match &case.test {
                        Some(test) => {
                            if !matched {
                                let v = eval_expr(ev, &switch_env, test).await?;
                                if v == disc {
                                    matched = true;
                                }
                            }
                        }
                        None => default_idx = Some(i),
                    }
                    if matched {
                        for s in &case.consequent {
                            match eval_stmt(ev, &switch_env, s).await? {
                                Completion::Break(None) => return Ok(Completion::Normal),
                                Completion::Normal => {}
                                other => return Ok(other),
                            }
                        }
                    }
                }
                if !matched {
                    if let Some(start) = default_idx {
                        for case in &cases[start..] {
                            for s in &case.consequent {
                                match eval_stmt(ev, &switch_env, s).await? {
                                    Completion::Break(None) => return Ok(Completion::Normal),
                                    Completion::Normal => {}
                                    other => return Ok(other),
                                }
                            }
                        }
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Return(expr) => {
                ev.check_feature(FeatureToken::ReturnStatement)?;
                let value = match expr {
                    Some(e) => eval_expr(ev, env, e).await?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::Break(label) => {
                ev.check_feature(FeatureToken::BreakStatement)?;
                Ok(Completion::Break(label.clone()))
            }
            Stmt::Continue(label) => {
                ev.check_feature(FeatureToken::ContinueStatement)?;
                Ok(Completion::Continue(label.clone()))
            }
            Stmt::Throw(expr) => {
                ev.check_feature(FeatureToken::ThrowStatement)?;
                let value = eval_expr(ev, env, expr).await?;
                Err(TsError::runtime(value))
            }
            Stmt::Try { block, handler, finalizer } => {
                ev.check_feature(FeatureToken::TryCatchStatement)?;
                let try_env = Environment::child_block(env);
                let result = eval_block(ev, &try_env, block).await;
                let result = match result {
                    Err(TsError::Runtime { value, .. }) => {
                        if let Some(h) = handler {
                            let catch_env = Environment::child_block(env);
                            if let Some(param) = &h.param {
                                bind_with_defaults(ev, &catch_env, param, value, &BindTarget::Declare { env: &catch_env, kind: BindingKind::Let }).await?;
                            }
                            eval_block(ev, &catch_env, &h.body).await
                        } else {
                            Err(TsError::runtime(value))
                        }
                    }
                    other => other,
                };
                // `finally` always runs, and its own completion (including a
                // throw or a return) overrides the try/catch's outcome.
                if let Some(fin) = finalizer {
                    let fin_env = Environment::child_block(env);
                    match eval_block(ev, &fin_env, fin).await? {
                        Completion::Normal => result,
                        other => Ok(other),
                    }
                } else {
                    result
                }
            }
            Stmt::ClassDeclaration(def) => {
                ev.check_feature(FeatureToken::Classes)?;
                let class = eval_class_def(ev, env, def).await?;
                if let Some(name) = &def.name {
                    env.declare(name, BindingKind::Let, Value::Class(class))?;
                }
                Ok(Completion::Normal)
            }
            Stmt::Labeled { label, body } => match eval_stmt(ev, env, body).await? {
                Completion::Break(Some(l)) if l == *label => Ok(Completion::Normal),
                Completion::Continue(Some(l)) if l == *label => Ok(Completion::Normal),
                other => Ok(other),
            },
            Stmt::ImportDeclaration(_) | Stmt::ExportAllDeclaration { .. } => {
                // Specifier resolution and export bookkeeping both happen in
                // `modules.rs` before/after the body runs; by the time the
                // body reaches the evaluator, import bindings are already
                // declared into `env` and a bare `export * from "m"` carries
                // no executable statement of its own.
                ev.check_feature(FeatureToken::Modules)?;
                Ok(Completion::Normal)
            }
            Stmt::ExportNamedDeclaration { declaration, .. } => {
                ev.check_feature(FeatureToken::Modules)?;
                // `export const x =...`/`export function f() {}` still has
                // to run its wrapped declaration; `export { a, b as c }` with
                // no declaration is pure bookkeeping the linker handles.
                if let Some(decl) = declaration {
                    eval_stmt(ev, env, decl).await?;
                }
                Ok(Completion::Normal)
            }
            Stmt::ExportDefaultDeclaration(expr) => {
                ev.check_feature(FeatureToken::Modules)?;
                eval_expr(ev, env, expr).await?;
                Ok(Completion::Normal)
            }
        }
    })
}

fn eval_for_init<'a>(ev: &'a mut Evaluator, env: &'a Environment, init: &'a ForInit) -> BoxFut<'a, Result<(), TsError>> {
    boxed(async move {
        match init {
            ForInit::VarDecl { kind, declarations } => {
                for d in declarations {
                    let value = match &d.init {
                        Some(e) => eval_expr(ev, env, e).await?,
                        None => Value::Undefined,
                    };
                    let binding_kind = match kind {
                        VarKind::Var => BindingKind::Var,
                        VarKind::Let => BindingKind::Let,
                        VarKind::Const => BindingKind::Const,
                    };
                    bind_with_defaults(ev, env, &d.id, value, &BindTarget::Declare { env, kind: binding_kind }).await?;
                }
                Ok(())
            }
            ForInit::Expr(e) => {
                eval_expr(ev, env, e).await?;
                Ok(())
            }
            ForInit::Pattern(_) => Ok(()),
        }
    })
}

fn bind_for_target<'a>(ev: &'a mut Evaluator, env: &'a Environment, left: &'a ForInit, value: Value) -> BoxFut<'a, Result<(), TsError>> {
    boxed(async move {
        match left {
            ForInit::VarDecl { kind, declarations } => {
                let binding_kind = match kind {
                    VarKind::Var => BindingKind::Var,
                    VarKind::Let => BindingKind::Let,
                    VarKind::Const => BindingKind::Const,
                };
                bind_with_defaults(ev, env, &declarations[0].id, value, &BindTarget::Declare { env, kind: binding_kind }).await
            }
            ForInit::Pattern(pattern) => bind_with_defaults(ev, env, pattern, value, &BindTarget::Assign { env }).await,
            ForInit::Expr(_) => Ok(()),
        }
    })
}

/// Binds a pattern, evaluating any `= default` expressions along the way
/// (this needs the evaluator, unlike `function::bind_pattern`'s pure leaf
/// binding, so defaults live here rather than in `function.rs`).
fn bind_with_defaults<'a>(
    ev: &'a mut Evaluator,
    env: &'a Environment,
    pattern: &'a Pattern,
    value: Value,
    target: &'a BindTarget<'a>,
) -> BoxFut<'a, Result<(), TsError>> {
    boxed(async move {
        match pattern {
            Pattern::Identifier(name) => match target {
                BindTarget::Declare { env: e, kind } => e.declare(name, *kind, value),
                BindTarget::Assign { env: e } => {
                    if e.assign(name, value.clone()).is_err() {
                        e.declare_implicit_global(name, value);
                    }
                    Ok(())
                }
            },
            Pattern::Member(expr) => match target {
                BindTarget::Assign { env: e } => assign_to_target(ev, e, expr, value).await,
                BindTarget::Declare { .. } => Err(TsError::security(
                        "a member expression cannot be used as a declaration target",
                )),
            },
            Pattern::Assignment { left, right } => {
                let value = if value.is_undefined() { eval_expr(ev, env, right).await? } else { value };
                bind_with_defaults(ev, env, left, value, target).await
            }
            Pattern::Array { elements, rest } => {
                let items = function::iterate_to_vec(&value)?;
                for (i, elem) in elements.iter().enumerate() {
                    if let Some(pat) = elem {
                        let v = items.get(i).cloned().unwrap_or(Value::Undefined);
                        bind_with_defaults(ev, env, pat, v, target).await?;
                    }
                }
                if let Some(rest_pat) = rest {
                    let tail: Vec<Value> = items.into_iter().skip(elements.len()).collect();
                    bind_with_defaults(ev, env, rest_pat, Value::new_array(tail), target).await?;
                }
                Ok(())
            }
            Pattern::Object { properties, rest } => {
                let mut taken = Vec::new();
                for prop in properties {
                    let key = match &prop.key {
                        PropertyKey::Identifier(s) | PropertyKey::String(s) => s.clone(),
                        PropertyKey::Number(n) => crate::format::format_number(*n),
                        PropertyKey::Computed(e) => coerce::to_js_string(&eval_expr(ev, env, e).await?).to_string(),
                        PropertyKey::Private(_) => {
                            return Err(TsError::security("private names cannot appear in destructuring patterns"));
                        }
                    };
                    taken.push(key.clone());
                    let v = read_member_value(&value, &key)?;
                    bind_with_defaults(ev, env, &prop.value, v, target).await?;
                }
                if let Some(rest_pat) = rest {
                    let remaining = object_entries_excluding(&value, &taken);
                    bind_with_defaults(ev, env, rest_pat, remaining, target).await?;
                }
                Ok(())
            }
        }
    })
}

fn read_member_value(value: &Value, key: &str) -> Result<Value, TsError> {
    match value {
        Value::Object(obj) => Ok(obj.borrow().get(key).cloned().unwrap_or(Value::Undefined)),
        Value::Array(arr) => Ok(key.parse::<usize>().map(|i| arr.borrow().get(i)).unwrap_or(Value::Undefined)),
        Value::Undefined | Value::Null => Err(TsError::runtime(Value::from_str(&format!(
                        "TypeError: Cannot destructure '{key}' of null or undefined"
        )))),
        _ => Ok(Value::Undefined),
    }
}

fn object_entries_excluding(value: &Value, exclude: &[String]) -> Value {
    let rest = Value::new_object();
    if let (Value::Object(obj), Value::Object(rest_obj)) = (value, &rest) {
        for (k, slot) in obj.borrow().properties.iter() {
            if exclude.iter().any(|e| e == k.as_ref()) {
                continue;
            }
            if let PropertySlot::Value(v) = slot {
                rest_obj.borrow_mut().set(k, v.clone());
            }
        }
    }
    rest
}

// ---- expression evaluation -------------------------------------------------

pub fn eval_expr<'a>(ev: &'a mut Evaluator, env: &'a Environment, expr: &'a Expr) -> BoxFut<'a, Result<Value, TsError>> {
    boxed(async move {
        ev.resources.check_abort()?;
        match expr {
            Expr::Identifier(name) => match env.get(name) {
                Some(v) => Ok(v),
                None => Err(TsError::runtime(Value::from_str(&format!("ReferenceError: {name} is not defined")))),
            },
            Expr::Literal(lit) => Ok(eval_literal(lit)),
            Expr::This => {
                ev.check_feature(FeatureToken::ThisExpression)?;
                Ok(env.this())
            }
            Expr::Super => Ok(env.this()),
            Expr::TemplateLiteral { quasis, expressions } => {
                ev.check_feature(FeatureToken::TemplateLiterals)?;
                let mut out = String::new();
                for (i, quasi) in quasis.iter().enumerate() {
                    out.push_str(&quasi.cooked);
                    if let Some(e) = expressions.get(i) {
                        let v = eval_expr(ev, env, e).await?;
                        out.push_str(&coerce::to_js_string(&v));
                    }
                }
                ev.resources.allocate(out.len() * crate::resource::alloc_cost::STRING_BYTE)?;
                Ok(Value::from_str(&out))
            }
            Expr::Array(elements) => {
                ev.check_feature(FeatureToken::ArrayLiterals)?;
                let mut items = Vec::new();
                for elem in elements {
                    match elem {
                        None => items.push(Value::Undefined),
                        Some(ArrayElement::Item(e)) => items.push(eval_expr(ev, env, e).await?),
                        Some(ArrayElement::Spread(e)) => {
                            ev.check_feature(FeatureToken::SpreadOperator)?;
                            let v = eval_expr(ev, env, e).await?;
                            items.extend(function::iterate_to_vec(&v)?);
                        }
                    }
                }
                ev.resources.allocate(items.len() * crate::resource::alloc_cost::ARRAY_ELEMENT)?;
                Ok(Value::new_array(items))
            }
            Expr::Object(properties) => {
                ev.check_feature(FeatureToken::ObjectLiterals)?;
                let result = Value::new_object();
                let Value::Object(obj) = &result else { unreachable!() };
                for prop in properties {
                    match &prop.kind {
                        PropertyKind::Spread(e) => {
                            ev.check_feature(FeatureToken::SpreadOperator)?;
                            let v = eval_expr(ev, env, e).await?;
                            if let Value::Object(src) = &v {
                                for (k, slot) in src.borrow().properties.iter() {
                                    if let PropertySlot::Value(val) = slot {
                                        obj.borrow_mut().set(k, val.clone());
                                    }
                                }
                            }
                        }
                        PropertyKind::Init(value_expr) => {
                            let key = eval_property_key(ev, env, &prop.key).await?;
                            let value = eval_expr(ev, env, value_expr).await?;
                            obj.borrow_mut().set(&key, value);
                        }
                        PropertyKind::Get(def) => {
                            let key = eval_property_key(ev, env, &prop.key).await?;
                            let closure = Value::Closure(Rc::new(Closure {
                                        def: def.clone(),
                                        env: env.clone(),
                                        bound_this: None,
                                        home_class: None,
                                        name: Some(Rc::from(key.as_str())),
                            }));
                            ev.resources.allocate(crate::resource::alloc_cost::CLOSURE_CAPTURE)?;
                            upsert_accessor(&mut obj.borrow_mut(), &key, Some(closure), None);
                        }
                        PropertyKind::Set(def) => {
                            let key = eval_property_key(ev, env, &prop.key).await?;
                            let closure = Value::Closure(Rc::new(Closure {
                                        def: def.clone(),
                                        env: env.clone(),
                                        bound_this: None,
                                        home_class: None,
                                        name: Some(Rc::from(key.as_str())),
                            }));
                            ev.resources.allocate(crate::resource::alloc_cost::CLOSURE_CAPTURE)?;
                            upsert_accessor(&mut obj.borrow_mut(), &key, None, Some(closure));
                        }
                    }
                }
                ev.resources.allocate(result.approx_size())?;
                Ok(result)
            }
            Expr::Function(def) => {
                ev.check_feature(if def.is_arrow { FeatureToken::ArrowFunctions } else { FeatureToken::FunctionExpressions })?;
                ev.resources.allocate(crate::resource::alloc_cost::CLOSURE_CAPTURE)?;
                Ok(Value::Closure(Rc::new(Closure {
                                def: def.clone(),
                                env: env.clone(),
                                bound_this: None,
                                home_class: None,
                                name: def.name.as_deref().map(Rc::from),
                })))
            }
            Expr::Arrow(def) => {
                ev.check_feature(FeatureToken::ArrowFunctions)?;
                ev.resources.allocate(crate::resource::alloc_cost::CLOSURE_CAPTURE)?;
                Ok(Value::Closure(Rc::new(Closure {
                                def: def.clone(),
                                env: env.clone(),
                                bound_this: Some(env.this()),
                                home_class: None,
                                name: None,
                })))
            }
            Expr::Class(def) => {
                ev.check_feature(FeatureToken::Classes)?;
                Ok(Value::Class(eval_class_def(ev, env, def).await?))
            }
            Expr::Unary { op, argument } => eval_unary(ev, env, *op, argument).await,
            Expr::Update { op, argument, prefix } => eval_update(ev, env, *op, argument, *prefix).await,
            Expr::Binary { op, left, right } => eval_binary(ev, env, *op, left, right).await,
            Expr::Logical { op, left, right } => eval_logical(ev, env, *op, left, right).await,
            Expr::Assignment { op, left, right } => eval_assignment(ev, env, *op, left, right).await,
            Expr::Conditional { test, consequent, alternate } => {
                ev.check_feature(FeatureToken::ConditionalExpression)?;
                if eval_expr(ev, env, test).await?.is_truthy() {
                    eval_expr(ev, env, consequent).await
                } else {
                    eval_expr(ev, env, alternate).await
                }
            }
            Expr::Call { callee, arguments, optional } => eval_call(ev, env, callee, arguments, *optional).await,
            Expr::New { callee, arguments } => eval_new(ev, env, callee, arguments).await,
            Expr::Member { object, property, optional } => {
                let (value, short_circuited) = eval_member_base(ev, env, object, *optional).await?;
                if short_circuited {
                    return Ok(Value::Undefined);
                }
                eval_member_read(ev, env, &value, property).await
            }
            Expr::Chain(inner) => eval_expr(ev, env, inner).await,
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for e in exprs {
                    last = eval_expr(ev, env, e).await?;
                }
                Ok(last)
            }
            Expr::Await(inner) => {
                ev.check_feature(FeatureToken::AsyncAwait)?;
                ev.reject_if_sync()?;
                let value = eval_expr(ev, env, inner).await?;
                crate::generator::await_value(ev, value).await
            }
            Expr::Yield { argument, delegate } => {
                let value = match argument {
                    Some(e) => eval_expr(ev, env, e).await?,
                    None => Value::Undefined,
                };
                crate::generator::yield_value(ev, value, *delegate).await
            }
        }
    })
}

fn eval_literal(lit: &Literal) -> Value {
    match lit {
        Literal::String(s) => Value::from_str(s),
        Literal::Number(n) => Value::Number(*n),
        Literal::BigInt(digits) => Value::BigInt(Rc::new(digits.parse().unwrap_or_default())),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

fn eval_property_key<'a>(ev: &'a mut Evaluator, env: &'a Environment, key: &'a PropertyKey) -> BoxFut<'a, Result<String, TsError>> {
    boxed(async move {
        match key {
            PropertyKey::Identifier(s) | PropertyKey::String(s) => Ok(s.clone()),
            PropertyKey::Number(n) => Ok(crate::format::format_number(*n)),
            PropertyKey::Private(s) => Ok(s.clone()),
            PropertyKey::Computed(e) => Ok(coerce::to_js_string(&eval_expr(ev, env, e).await?).to_string()),
        }
    })
}

fn upsert_accessor(obj: &mut PlainObject, key: &str, get: Option<Value>, set: Option<Value>) {
    let entry = obj
    .properties
    .entry(Rc::from(key))
    .or_insert_with(|| PropertySlot::Accessor { get: None, set: None });
    if let PropertySlot::Accessor { get: g, set: s } = entry {
        if get.is_some() {
            *g = get;
        }
        if set.is_some() {
            *s = set;
        }
    } else {
        *entry = PropertySlot::Accessor { get, set };
    }
}

async fn eval_unary(ev: &mut Evaluator, env: &Environment, op: UnaryOp, argument: &Expr) -> Result<Value, TsError> {
    ev.check_feature(FeatureToken::UnaryOperators)?;
    if op == UnaryOp::Typeof {
        if let Expr::Identifier(name) = argument {
            if env.get(name).is_none() {
                return Ok(Value::from_str("undefined"));
            }
        }
    }
    if op == UnaryOp::Delete {
        if let Expr::Member { object, property, .. } = argument {
            let obj = eval_expr(ev, env, object).await?;
            let key = member_property_key(ev, env, property).await?;
            if let Value::Object(o) = &obj {
                return Ok(Value::Bool(o.borrow_mut().delete(&key)));
            }
            return Ok(Value::Bool(true));
        }
        return Ok(Value::Bool(true));
    }
    let value = eval_expr(ev, env, argument).await?;
    Ok(match op {
            UnaryOp::Minus => Value::Number(-coerce::to_number(&value)),
            UnaryOp::Plus => Value::Number(coerce::to_number(&value)),
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::BitNot => Value::Number(!(coerce::to_number(&value) as i64 as i32) as f64),
            UnaryOp::Typeof => Value::from_str(value.type_of()),
            UnaryOp::Void => Value::Undefined,
            UnaryOp::Delete => unreachable!(),
    })
}

fn member_property_key<'a>(ev: &'a mut Evaluator, env: &'a Environment, property: &'a MemberProperty) -> BoxFut<'a, Result<String, TsError>> {
    boxed(async move {
        match property {
            MemberProperty::Identifier(s) => Ok(s.clone()),
            MemberProperty::Private(s) => Ok(s.clone()),
            MemberProperty::Computed(e) => Ok(coerce::to_js_string(&eval_expr(ev, env, e).await?).to_string()),
        }
    })
}

async fn eval_update(ev: &mut Evaluator, env: &Environment, op: UpdateOp, argument: &Expr, prefix: bool) -> Result<Value, TsError> {
    ev.check_feature(FeatureToken::UpdateExpression)?;
    let old = eval_expr(ev, env, argument).await?;
    let old_num = coerce::to_number(&old);
    let new_num = match op {
        UpdateOp::Increment => old_num + 1.0,
        UpdateOp::Decrement => old_num - 1.0,
    };
    assign_to_target(ev, env, argument, Value::Number(new_num)).await?;
    Ok(Value::Number(if prefix { new_num } else { old_num }))
}

async fn eval_binary(ev: &mut Evaluator, env: &Environment, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, TsError> {
    ev.check_feature(FeatureToken::BinaryOperators)?;
    let l = eval_expr(ev, env, left).await?;
    let r = eval_expr(ev, env, right).await?;
    Ok(match op {
            BinaryOp::Add => {
                if coerce::plus_is_concat(&l, &r) {
                    let s = format!("{}{}", coerce::to_js_string(&l), coerce::to_js_string(&r));
                    ev.resources.allocate(s.len() * crate::resource::alloc_cost::STRING_BYTE)?;
                    Value::from_str(&s)
                } else if let (Value::BigInt(a), Value::BigInt(b)) = (&l, &r) {
                    Value::BigInt(Rc::new(&**a + &**b))
                } else {
                    Value::Number(coerce::to_number(&l) + coerce::to_number(&r))
                }
            }
            BinaryOp::Sub => Value::Number(coerce::to_number(&l) - coerce::to_number(&r)),
            BinaryOp::Mul => Value::Number(coerce::to_number(&l) * coerce::to_number(&r)),
            BinaryOp::Div => Value::Number(coerce::to_number(&l) / coerce::to_number(&r)),
            BinaryOp::Mod => Value::Number(coerce::to_number(&l) % coerce::to_number(&r)),
            BinaryOp::Exponent => {
                ev.check_feature(FeatureToken::ExponentiationOperator)?;
                Value::Number(coerce::to_number(&l).powf(coerce::to_number(&r)))
            }
            BinaryOp::Equal => Value::Bool(coerce::loose_equals(&l, &r)),
            BinaryOp::NotEqual => Value::Bool(!coerce::loose_equals(&l, &r)),
            BinaryOp::StrictEqual => Value::Bool(l == r),
            BinaryOp::StrictNotEqual => Value::Bool(l != r),
            BinaryOp::Less => compare_values(&l, &r, |o| o == std::cmp::Ordering::Less),
            BinaryOp::LessEqual => compare_values(&l, &r, |o| o != std::cmp::Ordering::Greater),
            BinaryOp::Greater => compare_values(&l, &r, |o| o == std::cmp::Ordering::Greater),
            BinaryOp::GreaterEqual => compare_values(&l, &r, |o| o != std::cmp::Ordering::Less),
            BinaryOp::ShiftLeft => int_op(&l, &r, |a, b| a.wrapping_shl(b as u32 & 31)),
            BinaryOp::ShiftRight => int_op(&l, &r, |a, b| a.wrapping_shr(b as u32 & 31)),
            BinaryOp::UnsignedShiftRight => {
                Value::Number(((coerce::to_number(&l) as i64 as u32).wrapping_shr(coerce::to_number(&r) as u32 & 31)) as f64)
            }
            BinaryOp::BitAnd => int_op(&l, &r, |a, b| a & b),
            BinaryOp::BitOr => int_op(&l, &r, |a, b| a | b),
            BinaryOp::BitXor => int_op(&l, &r, |a, b| a ^ b),
            BinaryOp::In => {
                let key = coerce::to_js_string(&l);
                match &r {
                    Value::Object(o) => Value::Bool(o.borrow().properties.contains_key(key.as_ref())),
                    Value::Array(a) => Value::Bool(key.parse::<usize>().is_ok_and(|i| i < a.borrow().len())),
                    _ => Value::Bool(false),
                }
            }
            BinaryOp::Instanceof => {
                ev.check_feature(FeatureToken::BinaryOperators)?;
                match (&l, &r) {
                    (Value::Object(o), Value::Class(c)) => {
                        let obj_class = o.borrow().class.clone();
                        Value::Bool(obj_class.is_some_and(|oc| oc.is_subclass_of(c)))
                    }
                    _ => Value::Bool(false),
                }
            }
    })
}

fn compare_values(l: &Value, r: &Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return Value::Bool(pred(a.as_ref().cmp(b.as_ref())));
    }
    let a = coerce::to_number(l);
    let b = coerce::to_number(r);
    match a.partial_cmp(&b) {
        Some(ord) => Value::Bool(pred(ord)),
        None => Value::Bool(false),
    }
}

fn int_op(l: &Value, r: &Value, f: impl Fn(i32, i32) -> i32) -> Value {
    let a = coerce::to_number(l) as i64 as i32;
    let b = coerce::to_number(r) as i64 as i32;
    Value::Number(f(a, b) as f64)
}

async fn eval_logical(ev: &mut Evaluator, env: &Environment, op: LogicalOp, left: &Expr, right: &Expr) -> Result<Value, TsError> {
    ev.check_feature(FeatureToken::LogicalOperators)?;
    let l = eval_expr(ev, env, left).await?;
    match op {
        LogicalOp::And => {
            if !l.is_truthy() {
                return Ok(l);
            }
        }
        LogicalOp::Or => {
            if l.is_truthy() {
                return Ok(l);
            }
        }
        LogicalOp::NullishCoalescing => {
            ev.check_feature(FeatureToken::NullishCoalescing)?;
            if !l.is_nullish() {
                return Ok(l);
            }
        }
    }
    eval_expr(ev, env, right).await
}

async fn eval_assignment(ev: &mut Evaluator, env: &Environment, op: AssignOp, left: &Pattern, right: &Expr) -> Result<Value, TsError> {
    ev.check_feature(FeatureToken::AssignmentOperators)?;
    if op == AssignOp::Assign {
        if !matches!(left, Pattern::Identifier(_) | Pattern::Member(_)) {
            ev.check_feature(FeatureToken::Destructuring)?;
        }
        let value = eval_expr(ev, env, right).await?;
        bind_with_defaults(ev, env, left, value.clone(), &BindTarget::Assign { env }).await?;
        return Ok(value);
    }
    let Pattern::Identifier(_) | Pattern::Member(_) = left else {
        return Err(TsError::security("compound assignment to a destructuring pattern is not supported"));
    };
    let target_expr = pattern_to_expr(left);
    let current = eval_expr(ev, env, &target_expr).await?;

    if matches!(op, AssignOp::LogicalAndAssign | AssignOp::LogicalOrAssign | AssignOp::NullishAssign) {
        ev.check_feature(FeatureToken::LogicalAssignment)?;
        let should_eval_rhs = match op {
            AssignOp::LogicalAndAssign => current.is_truthy(),
            AssignOp::LogicalOrAssign => !current.is_truthy(),
            AssignOp::NullishAssign => current.is_nullish(),
            _ => unreachable!(),
        };
        if !should_eval_rhs {
            return Ok(current);
        }
        let value = eval_expr(ev, env, right).await?;
        assign_to_target(ev, env, &target_expr, value.clone()).await?;
        return Ok(value);
    }

    let rhs = eval_expr(ev, env, right).await?;
    let new_value = match op {
        AssignOp::AddAssign => {
            if coerce::plus_is_concat(&current, &rhs) {
                let s = format!("{}{}", coerce::to_js_string(&current), coerce::to_js_string(&rhs));
                ev.resources.allocate(s.len() * crate::resource::alloc_cost::STRING_BYTE)?;
                Value::from_str(&s)
            } else {
                Value::Number(coerce::to_number(&current) + coerce::to_number(&rhs))
            }
        }
        AssignOp::SubAssign => Value::Number(coerce::to_number(&current) - coerce::to_number(&rhs)),
        AssignOp::MulAssign => Value::Number(coerce::to_number(&current) * coerce::to_number(&rhs)),
        AssignOp::DivAssign => Value::Number(coerce::to_number(&current) / coerce::to_number(&rhs)),
        AssignOp::ModAssign => Value::Number(coerce::to_number(&current) % coerce::to_number(&rhs)),
        AssignOp::ExponentAssign => Value::Number(coerce::to_number(&current).powf(coerce::to_number(&rhs))),
        AssignOp::ShiftLeftAssign => int_op(&current, &rhs, |a, b| a.wrapping_shl(b as u32 & 31)),
        AssignOp::ShiftRightAssign => int_op(&current, &rhs, |a, b| a.wrapping_shr(b as u32 & 31)),
        AssignOp::UnsignedShiftRightAssign => {
            Value::Number(((coerce::to_number(&current) as i64 as u32).wrapping_shr(coerce::to_number(&rhs) as u32 & 31)) as f64)
        }
        AssignOp::BitAndAssign => int_op(&current, &rhs, |a, b| a & b),
        AssignOp::BitOrAssign => int_op(&current, &rhs, |a, b| a | b),
        AssignOp::BitXorAssign => int_op(&current, &rhs, |a, b| a ^ b),
        AssignOp::Assign | AssignOp::LogicalAndAssign | AssignOp::LogicalOrAssign | AssignOp::NullishAssign => unreachable!(),
    };
    assign_to_target(ev, env, &target_expr, new_value.clone()).await?;
    Ok(new_value)
}

fn pattern_to_expr(pattern: &Pattern) -> Expr {
    match pattern {
        Pattern::Identifier(name) => Expr::Identifier(name.clone()),
        Pattern::Member(expr) => (**expr).clone(),
        _ => unreachable!("compound assignment targets are restricted to identifiers and member expressions"),
    }
}

fn assign_to_target<'a>(ev: &'a mut Evaluator, env: &'a Environment, target: &'a Expr, value: Value) -> BoxFut<'a, Result<(), TsError>> {
    boxed(async move {
        match target {
            Expr::Identifier(name) => {
                if env.assign(name, value.clone()).is_err() {
                    env.declare_implicit_global(name, value);
                }
                Ok(())
            }
            Expr::Member { object, property, .. } => {
                let base = eval_expr(ev, env, object).await?;
                let key = member_property_key(ev, env, property).await?;
                write_member(ev, env, &base, &key, value, object).await
            }
            _ => Err(TsError::security("invalid assignment target")),
        }
    })
}

async fn write_member(ev: &mut Evaluator, env: &Environment, base: &Value, key: &str, value: Value, object_expr: &Expr) -> Result<(), TsError> {
    match base {
        Value::Object(obj) => {
            if matches!(object_expr, Expr::This) {
                if let Some(class) = current_home_class(env) {
                    if class.declares_private(key) {
                        let pkey = PrivateKey { class_id: class.id, name: Rc::from(key) };
                        obj.borrow_mut().private.insert(pkey, value);
                        return Ok(());
                    }
                }
            }
            let setter = match obj.borrow().properties.get(key) {
                Some(PropertySlot::Accessor { set: Some(s), .. }) => Some(s.clone()),
                _ => None,
            };
            if let Some(setter) = setter {
                call_value(ev, env, &setter, Some(base.clone()), vec![value]).await?;
                return Ok(());
            }
            obj.borrow_mut().set(key, value);
            Ok(())
        }
        Value::Array(arr) => {
            if key == "length" {
                let len = coerce::to_number(&value) as usize;
                arr.borrow_mut().items.resize_with(len, || crate::value::ArraySlot::Hole);
                return Ok(());
            }
            if let Ok(idx) = key.parse::<usize>() {
                arr.borrow_mut().set(idx, value);
            }
            Ok(())
        }
        Value::HostProxy(_, ProxyKind::Object) => {
            proxy::reject_write_silently();
            Ok(())
        }
        Value::HostProxy(_, ProxyKind::Function) => Err(proxy::check_writable_function(key)),
        _ => Ok(()),
    }
}

/// The `ClassValue` a method body is currently executing under, used for
/// private-field access checks and `super`. Resolved from the environment's
/// function frame rather than threaded as an explicit parameter, since only
/// class-method calls set it (see `call_closure`).
fn current_home_class(env: &Environment) -> Option<Rc<ClassValue>> {
    env.current_home_class()
}

async fn eval_member_base(ev: &mut Evaluator, env: &Environment, object: &Expr, optional: bool) -> Result<(Value, bool), TsError> {
    let value = eval_expr(ev, env, object).await?;
    if optional && value.is_nullish() {
        return Ok((value, true));
    }
    Ok((value, false))
}

async fn eval_member_read(ev: &mut Evaluator, env: &Environment, base: &Value, property: &MemberProperty) -> Result<Value, TsError> {
    ev.check_feature(FeatureToken::MemberExpression)?;
    match property {
        MemberProperty::Private(name) => {
            let Value::Object(obj) = base else {
                return Err(TsError::runtime(Value::from_str("TypeError: private field access on non-object")));
            };
            let class = current_home_class(env).ok_or_else(|| TsError::security("private field accessed outside its class"))?;
            if !class.declares_private(name) {
                return Err(TsError::security(format!("'#{name}' is not declared in the current class")));
            }
            let pkey = PrivateKey { class_id: class.id, name: Rc::from(name.as_str()) };
            Ok(obj.borrow().private.get(&pkey).cloned().unwrap_or(Value::Undefined))
        }
        MemberProperty::Identifier(name) => read_member(ev, env, base, name).await,
        MemberProperty::Computed(e) => {
            let key = coerce::to_js_string(&eval_expr(ev, env, e).await?);
            read_member(ev, env, base, &key).await
        }
    }
}

fn read_member<'a>(ev: &'a mut Evaluator, env: &'a Environment, base: &'a Value, key: &'a str) -> BoxFut<'a, Result<Value, TsError>> {
    boxed(async move {
        match base {
            Value::Object(obj) => {
                let slot = obj.borrow().lookup_in_chain(key);
                match slot {
                    Some(PropertySlot::Value(v)) => Ok(v),
                    Some(PropertySlot::Accessor { get: Some(g), .. }) => {
                        call_value(ev, env, &g, Some(base.clone()), vec![]).await
                    }
                    Some(PropertySlot::Accessor { get: None, .. }) | None => Ok(Value::Undefined),
                }
            }
            Value::Array(arr) => {
                if key == "length" {
                    return Ok(Value::Number(arr.borrow().len() as f64));
                }
                if let Ok(idx) = key.parse::<usize>() {
                    return Ok(arr.borrow().get(idx));
                }
                Ok(Value::Undefined)
            }
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                if let Ok(idx) = key.parse::<usize>() {
                    return Ok(s.chars().nth(idx).map(|c| Value::from_str(&c.to_string())).unwrap_or(Value::Undefined));
                }
                Ok(Value::Undefined)
            }
            Value::Class(class) => {
                let slot = class.static_table.borrow().properties.get(key).cloned();
                match slot {
                    Some(PropertySlot::Value(v)) => Ok(v),
                    Some(PropertySlot::Accessor { get: Some(g), .. }) => call_value(ev, env, &g, Some(base.clone()), vec![]).await,
                    _ => Ok(Value::Undefined),
                }
            }
            Value::HostProxy(host, kind) => {
                proxy::check_readable(key, *kind)?;
                match host.get(key) {
                    Some(hv) => Ok(from_host_value(hv)),
                    None => Ok(Value::Undefined),
                }
            }
            Value::HostFunction(host) => {
                proxy::check_readable(key, ProxyKind::Function)?;
                match host.get(key) {
                    Some(hv) => Ok(from_host_value(hv)),
                    None => Ok(Value::Undefined),
                }
            }
            _ => Ok(Value::Undefined),
        }
    })
}

pub(crate) fn from_host_value(hv: HostValue) -> Value {
    match hv {
        HostValue::Undefined => Value::Undefined,
        HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(b),
        HostValue::Number(n) => Value::Number(n),
        HostValue::String(s) => Value::from_str(&s),
        HostValue::Object(o) => Value::HostProxy(o, ProxyKind::Object),
        HostValue::Function(f) => Value::HostFunction(f),
    }
}

pub(crate) fn to_host_value(v: &Value) -> HostValue {
    match v {
        Value::Undefined => HostValue::Undefined,
        Value::Null => HostValue::Null,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Number(n) => HostValue::Number(*n),
        Value::String(s) => HostValue::String(s.to_string()),
        other => HostValue::String(coerce::to_js_string(other).to_string()),
    }
}

async fn eval_call(ev: &mut Evaluator, env: &Environment, callee: &Expr, arguments: &[Argument], optional: bool) -> Result<Value, TsError> {
    ev.check_feature(FeatureToken::CallExpression)?;
    if matches!(callee, Expr::Super) {
        return eval_super_call(ev, env, arguments).await;
    }
    let (this_val, callee_val, short_circuited) = eval_callee(ev, env, callee, optional).await?;
    if short_circuited {
        return Ok(Value::Undefined);
    }
    if optional && callee_val.is_nullish() {
        return Ok(Value::Undefined);
    }
    let args = eval_arguments(ev, env, arguments).await?;
    call_value(ev, env, &callee_val, this_val, args).await
}

async fn eval_callee(ev: &mut Evaluator, env: &Environment, callee: &Expr, optional_chain: bool) -> Result<(Option<Value>, Value, bool), TsError> {
    match callee {
        Expr::Member { object, property, optional } => {
            if matches!(**object, Expr::Super) {
                let this_val = env.this();
                let class = current_home_class(env).and_then(|c| c.super_class.clone());
                let name = match property {
                    MemberProperty::Identifier(n) => n.clone(),
                    MemberProperty::Private(n) => n.clone(),
                    MemberProperty::Computed(_) => return Err(TsError::security("computed super member calls are not supported")),
                };
                let method = class
                .and_then(|c| c.prototype.borrow().properties.get(&name).cloned())
                .and_then(|slot| match slot {
                        PropertySlot::Value(v) => Some(v),
                        _ => None,
                })
                .unwrap_or(Value::Undefined);
                return Ok((Some(this_val), method, false));
            }
            let (base, short_circuited) = eval_member_base(ev, env, object, *optional || optional_chain).await?;
            if short_circuited {
                return Ok((None, Value::Undefined, true));
            }
            let value = eval_member_read(ev, env, &base, property).await?;
            Ok((Some(base), value, false))
        }
        // A bare `super(...)` call is intercepted in `eval_call` before this
        // function ever runs, since it needs to drive the constructor chain
        // rather than just resolve to a callable value.
        other => {
            let value = eval_expr(ev, env, other).await?;
            Ok((None, value, false))
        }
    }
}

/// Runs a bare `super(...)` call: the base constructor chain first, then
/// this class's own instance fields, immediately after the
/// superclass returns rather than at constructor entry.
async fn eval_super_call(ev: &mut Evaluator, env: &Environment, arguments: &[Argument]) -> Result<Value, TsError> {
    let class = current_home_class(env)
    .ok_or_else(|| TsError::security("super() used outside a derived constructor"))?;
    let super_class = class
    .super_class
    .clone()
    .ok_or_else(|| TsError::security("super() called but class has no superclass"))?;
    let this_val = env.this();
    let args = eval_arguments(ev, env, arguments).await?;
    run_constructor_chain(ev, env, &super_class, this_val.clone(), args).await?;
    env.mark_super_called();
    run_instance_fields(ev, env, &class, &this_val).await?;
    Ok(Value::Undefined)
}

async fn eval_arguments(ev: &mut Evaluator, env: &Environment, arguments: &[Argument]) -> Result<Vec<Value>, TsError> {
    let mut out = Vec::with_capacity(arguments.len());
    for arg in arguments {
        match arg {
            Argument::Normal(e) => out.push(eval_expr(ev, env, e).await?),
            Argument::Spread(e) => {
                ev.check_feature(FeatureToken::SpreadOperator)?;
                let v = eval_expr(ev, env, e).await?;
                out.extend(function::iterate_to_vec(&v)?);
            }
        }
    }
    Ok(out)
}

pub fn call_value<'a>(ev: &'a mut Evaluator, env: &'a Environment, callee: &'a Value, this_val: Option<Value>, args: Vec<Value>) -> BoxFut<'a, Result<Value, TsError>> {
    boxed(async move {
        match callee {
            Value::Closure(closure) => call_closure(ev, closure.clone(), this_val, args, None).await,
            Value::BoundMethod(closure, bound_this) => call_closure(ev, closure.clone(), Some((**bound_this).clone()), args, None).await,
            Value::Class(class) => construct_class(ev, env, class.clone(), args).await,
            Value::HostFunction(host) => {
                let host_this = this_val.as_ref().map(to_host_value);
                let host_args: Vec<HostValue> = args.iter().map(to_host_value).collect();
                match host.call(host_this, host_args).map_err(TsError::security)? {
                    HostCallOutcome::Ready(v) => Ok(from_host_value(v)),
                    HostCallOutcome::Pending(fut) => {
                        ev.reject_if_sync()?;
                        let result = crate::generator::await_host_future(ev, fut).await?;
                        Ok(from_host_value(result))
                    }
                }
            }
            Value::HostProxy(_, ProxyKind::Function) => Err(proxy::check_not_awaiting_handle()),
            _ => Err(TsError::runtime(Value::from_str("TypeError: value is not callable"))),
        }
    })
}

async fn eval_new(ev: &mut Evaluator, env: &Environment, callee: &Expr, arguments: &[Argument]) -> Result<Value, TsError> {
    ev.check_feature(FeatureToken::NewExpression)?;
    let callee_val = eval_expr(ev, env, callee).await?;
    let args = eval_arguments(ev, env, arguments).await?;
    match callee_val {
        Value::Class(class) => construct_class(ev, env, class, args).await,
        _ => Err(TsError::runtime(Value::from_str("TypeError: value is not a constructor"))),
    }
}

/// Calls a user-defined closure. `derived_ctor_super_target` is `Some` when
/// this call is a derived class's implicit/explicit `super(...)`, in which
/// case the new frame starts with `this` unset until `super_called` flips.
fn check_param_features(ev: &Evaluator, params: &[Param]) -> Result<(), TsError> {
    for param in params {
        if param.rest {
            ev.check_feature(FeatureToken::RestParameters)?;
        }
        if param.default.is_some() {
            ev.check_feature(FeatureToken::DefaultParameters)?;
        }
    }
    Ok(())
}

async fn call_closure(ev: &mut Evaluator, closure: Rc<Closure>, this_val: Option<Value>, args: Vec<Value>, home_class_override: Option<Rc<ClassValue>>) -> Result<Value, TsError> {
    ev.resources.enter_call()?;
    ev.tracer.on_call(closure.name.as_deref(), ev.resources.call_depth());
    let result = call_closure_inner(ev, closure.clone(), this_val, args, home_class_override).await;
    ev.resources.leave_call();
    ev.tracer.on_return(ev.resources.call_depth());
    result
}

async fn call_closure_inner(ev: &mut Evaluator, closure: Rc<Closure>, this_val: Option<Value>, args: Vec<Value>, home_class_override: Option<Rc<ClassValue>>) -> Result<Value, TsError> {
    let this_for_frame = closure.bound_this.clone().or(this_val);
    let call_env = Environment::child_function(&closure.env, this_for_frame, false);
    let home_class = home_class_override.or_else(|| closure.home_class.as_ref().and_then(|w| w.upgrade()));
    if let Some(class) = home_class {
        call_env.set_home_class(class);
    }

    check_param_features(ev, &closure.def.params)?;
    let bound = function::split_params_and_args(&closure.def.params, &args);
    for (param, value) in bound {
        let value = if value.is_undefined() {
            match &param.default {
                Some(default) => eval_expr(ev, &call_env, default).await?,
                None => value,
            }
        } else {
            value
        };
        bind_with_defaults(ev, &call_env, &param.pattern, value, &BindTarget::Declare { env: &call_env, kind: BindingKind::Param }).await?;
    }

    let arguments_array = Value::new_array(args.clone());
    let _ = call_env.declare("arguments", BindingKind::Var, arguments_array);

    if closure.def.is_generator {
        return Ok(crate::generator::make_generator(closure, call_env, ev.features.clone()));
    }

    if closure.def.is_async {
        ev.reject_if_sync()?;
    }

    let body_result = match &closure.def.body {
        FunctionBody::Expression(expr) => eval_expr(ev, &call_env, expr).await,
        FunctionBody::Block(stmts) => match eval_block(ev, &call_env, stmts).await? {
            Completion::Return(v) => Ok(v),
            _ => Ok(Value::Undefined),
        },
    };

    if closure.def.is_async {
        return match body_result {
            Ok(v) => Ok(Value::Promise(PromiseHandle::resolved(v))),
            Err(TsError::Runtime { value, .. }) => Ok(Value::Promise(PromiseHandle::rejected(value))),
            Err(other) => Err(other),
        };
    }
    body_result
}

/// Builds an instance of `class`: allocates the object, walks up the
/// super-chain running each constructor in order (so a derived
/// constructor's explicit or implicit `super(...)` call runs the base
/// constructor before the derived body continues), running instance field
/// initializers immediately after `super(...)` returns.
async fn construct_class(ev: &mut Evaluator, env: &Environment, class: Rc<ClassValue>, args: Vec<Value>) -> Result<Value, TsError> {
    let instance = Rc::new(RefCell::new(PlainObject::new()));
    instance.borrow_mut().class = Some(class.clone());
    let this_val = Value::Object(instance.clone());
    run_constructor_chain(ev, env, &class, this_val.clone(), args).await?;
    Ok(this_val)
}

fn run_constructor_chain<'a>(
    ev: &'a mut Evaluator,
    env: &'a Environment,
    class: &'a Rc<ClassValue>,
    this_val: Value,
    args: Vec<Value>,
) -> BoxFut<'a, Result<(), TsError>> {
    boxed(async move {
        match &class.constructor {
            Some(ctor) => {
                let call_env = Environment::child_function(&ctor.env, Some(this_val.clone()), class.super_class.is_some());
                call_env.set_home_class(class.clone());
                check_param_features(ev, &ctor.def.params)?;
                let bound = function::split_params_and_args(&ctor.def.params, &args);
                for (param, value) in bound {
                    let value = if value.is_undefined() {
                        match &param.default {
                            Some(default) => eval_expr(ev, &call_env, default).await?,
                            None => value,
                        }
                    } else {
                        value
                    };
                    bind_with_defaults(ev, &call_env, &param.pattern, value, &BindTarget::Declare { env: &call_env, kind: BindingKind::Param }).await?;
                }
                if class.super_class.is_none() {
                    run_instance_fields(ev, &call_env, class, &this_val).await?;
                }
                let FunctionBody::Block(stmts) = &ctor.def.body else {
                    return Err(TsError::security("constructor body must be a block"));
                };
                match eval_block(ev, &call_env, stmts).await? {
                    Completion::Return(_) | Completion::Normal => Ok(()),
                    _ => Ok(()),
                }
            }
            None => {
                if let Some(super_class) = &class.super_class {
                    run_constructor_chain(ev, env, super_class, this_val.clone(), args).await?;
                }
                run_instance_fields(ev, env, class, &this_val).await
            }
        }
    })
}

async fn run_instance_fields(ev: &mut Evaluator, env: &Environment, class: &Rc<ClassValue>, this_val: &Value) -> Result<(), TsError> {
    let field_env = Environment::child_function(env, Some(this_val.clone()), false);
    field_env.set_home_class(class.clone());
    let Value::Object(obj) = this_val else { return Ok(()) };
    for field in &class.instance_fields {
        let value = match &field.value {
            Some(e) => eval_expr(ev, &field_env, e).await?,
            None => Value::Undefined,
        };
        if field.is_private {
            let pkey = PrivateKey { class_id: class.id, name: field.name.clone() };
            obj.borrow_mut().private.insert(pkey, value);
        } else {
            obj.borrow_mut().set(&field.name, value);
        }
    }
    Ok(())
}

/// Runs a class's static field initializers and static blocks once, in
/// declaration order, immediately after the class value is built.
async fn run_static_initializers(ev: &mut Evaluator, class: &Rc<ClassValue>) -> Result<(), TsError> {
    let static_this = Value::Class(class.clone());
    let static_env = Environment::child_function(&class.env, Some(static_this), false);
    static_env.set_home_class(class.clone());
    for init in &class.static_initializers {
        match init {
            StaticInit::Field(field) => {
                let value = match &field.value {
                    Some(e) => eval_expr(ev, &static_env, e).await?,
                    None => Value::Undefined,
                };
                if field.is_private {
                    let pkey = PrivateKey { class_id: class.id, name: field.name.clone() };
                    class.static_table.borrow_mut().private.insert(pkey, value);
                } else {
                    class.static_table.borrow_mut().set(&field.name, value);
                }
            }
            StaticInit::Block(stmts) => {
                eval_block(ev, &static_env, stmts).await?;
            }
        }
    }
    Ok(())
}

async fn eval_class_def(ev: &mut Evaluator, env: &Environment, def: &ClassDef) -> Result<Rc<ClassValue>, TsError> {
    let super_class = match &def.super_class {
        Some(expr) => match eval_expr(ev, env, expr).await? {
            Value::Class(c) => Some(c),
            _ => return Err(TsError::runtime(Value::from_str("TypeError: class extends value is not a constructor"))),
        },
        None => None,
    };
    let class = class::build_class(def, env.clone(), super_class)?;
    ev.resources.allocate(def.body.len() * crate::resource::alloc_cost::CLOSURE_CAPTURE)?;
    run_static_initializers(ev, &class).await?;
    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::run_sync;
    use crate::feature_gate::FeatureGate;
    use crate::resource::ResourceTracker;
    use crate::tracer::NoopTracer;

    fn run(src: &str) -> Result<Value, TsError> {
        let program = crate::parser::Parser::parse_script(src).unwrap();
        let env = Environment::root();
        let mut ev = Evaluator::new(FeatureGate::allow_all(), ResourceTracker::default(), Box::new(NoopTracer));
        run_sync(async move {
            hoist(&env, &program.body);
            let mut last = Value::Undefined;
            for stmt in &program.body {
                match eval_stmt(&mut ev, &env, stmt).await? {
                    Completion::Return(v) => return Ok(v),
                    _ => {}
                }
                if let Stmt::Expression(e) = stmt {
                    last = eval_expr(&mut ev, &env, e).await?;
                }
            }
            Ok(last)
        })
    }

    #[test]
    fn evaluates_arithmetic() {
        assert_eq!(run("1 + 2 * 3;").unwrap(), Value::Number(7.0));
    }

    #[test]
    fn evaluates_string_concat() {
        assert_eq!(run("'a' + 'b';").unwrap(), Value::from_str("ab"));
    }

    #[test]
    fn evaluates_function_call() {
        assert_eq!(run("function add(a, b) { return a + b; } add(2, 3);").unwrap(), Value::Number(5.0));
    }

    #[test]
    fn evaluates_closures() {
        let result = run("function counter() { let n = 0; return () => ++n; } const c = counter(); c(); c();").unwrap();
        assert_eq!(result, Value::Number(2.0));
    }

    #[test]
    fn evaluates_classes_and_inheritance() {
        let result = run(
            "class Animal { constructor(name) { this.name = name; } speak() { return this.name + ' makes a sound'; } }
class Dog extends Animal { speak() { return this.name + ' barks'; } }
new Dog('Rex').speak();",
        )
        .unwrap();
        assert_eq!(result, Value::from_str("Rex barks"));
    }

    #[test]
    fn evaluates_private_fields() {
        let result = run(
            "class Counter { #count = 0; inc() { this.#count++; return this.#count; } }
const c = new Counter(); c.inc(); c.inc();",
        )
        .unwrap();
        assert_eq!(result, Value::Number(2.0));
    }

    #[test]
    fn optional_chaining_short_circuits() {
        assert_eq!(run("let a = null; a?.b;").unwrap(), Value::Undefined);
    }

    #[test]
    fn try_finally_runs_finally_even_on_throw() {
        let result = run(
            "let log = []; try { try { throw 1; } finally { log.push('f'); } } catch (e) { log.push('c'); } log.length;",
        )
        .unwrap();
        assert_eq!(result, Value::Number(2.0));
    }

    #[test]
    fn destructuring_array_pattern() {
        assert_eq!(run("const [a, b] = [1, 2]; a + b;").unwrap(), Value::Number(3.0));
    }

    #[test]
    fn for_of_iterates_array() {
        assert_eq!(run("let sum = 0; for (const x of [1,2,3]) { sum += x; } sum;").unwrap(), Value::Number(6.0));
    }
}
