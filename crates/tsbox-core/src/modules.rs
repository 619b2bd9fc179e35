//! ES module linker (component C11).
//!
//! Mirrors the evaluator's own shape: every linking step is an ordinary
//! `async fn` whose recursive calls are boxed, so resolving a deep
//! import graph suspends exactly like any other `await` point when the
//! resolver itself needs to do real I/O.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{ClassDef, FunctionDef, Pattern, Program, Stmt};
use crate::environment::{BindingKind, Environment};
use crate::error::TsError;
use crate::evaluator::{self, Evaluator};
use crate::parser::Parser;
use crate::value::Value;

/// A module record's lifecycle: initializing → initialized, or → failed,
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Initializing,
    Initialized,
    Failed,
}

/// `exports` is a shared cell rather than an owned map so that a module
/// still `Initializing` (i.e. participating in an import cycle) hands
/// importers a live view: as `instantiate` writes each top-level export in
/// turn, anyone already holding this `Rc` sees the bindings appear, instead
/// of a permanently-empty snapshot taken when the placeholder was inserted.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub path: String,
    pub status: ModuleStatus,
    pub exports: Rc<RefCell<IndexMap<String, Value>>>,
    pub error: Option<String>,
}

/// What a resolver hands back for one specifier.
pub enum ModuleSource {
    Source { code: String, path: String },
    Ast { program: Rc<Program>, path: String },
    Namespace { exports: IndexMap<String, Value>, path: String },
}

pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Option<ModuleSource>> + 'a>>;

/// Caller-supplied module resolver. `None` fails the host import.
pub trait ModuleResolver {
    /// Synchronous resolution path; most embedders that read from an
    /// in-memory map or the filesystem synchronously only need this one.
    fn resolve(&mut self, specifier: &str, importer: &str) -> Option<ModuleSource> {
        let _ = (specifier, importer);
        None
    }

    /// Asynchronous resolution path, for resolvers that themselves need to
    /// suspend (e.g. a real network fetch). Default wraps `resolve` in an
    /// already-ready future.
    fn resolve_async<'a>(&'a mut self, specifier: &'a str, importer: &'a str) -> ResolveFuture<'a> {
        Box::pin(std::future::ready(self.resolve(specifier, importer)))
    }

    fn on_load(&mut self, _specifier: &str, _path: &str, _exports: &IndexMap<String, Value>) {}
    fn on_error(&mut self, _specifier: &str, _importer: &str, _error: &TsError) {}
}

/// A resolver that never finds anything; used when the sandbox's `modules`
/// option is disabled but code still contains (unreachable at runtime,
/// feature-gated off) import declarations.
pub struct NullResolver;

impl ModuleResolver for NullResolver {}

pub struct ModuleLinker {
    records: IndexMap<String, Rc<ModuleRecord>>,
    resolver: Box<dyn ModuleResolver>,
    max_depth: usize,
}

impl ModuleLinker {
    pub fn new(resolver: Box<dyn ModuleResolver>, max_depth: usize) -> Self {
        Self {
            records: IndexMap::new(),
            resolver,
            max_depth,
        }
    }

    pub fn records(&self) -> &IndexMap<String, Rc<ModuleRecord>> {
        &self.records
    }

    /// Entry point : links and evaluates the root module whose
    /// source/AST the caller already has in hand (it is the program passed
    /// to `Sandbox::evaluate_module`, not something the resolver produces).
    pub async fn evaluate_module(
        &mut self,
        ev: &mut Evaluator,
        path: &str,
        program: Rc<Program>,
        env: &Environment,
    ) -> Result<IndexMap<String, Value>, TsError> {
        if let Some(record) = self.records.get(path) {
            return match record.status {
                ModuleStatus::Initialized | ModuleStatus::Initializing => {
                    Ok(record.exports.borrow().clone())
                }
                ModuleStatus::Failed => Err(TsError::runtime(Value::from_str(&format!(
                                "Error: module '{path}' previously failed: {}",
                                record.error.as_deref().unwrap_or("unknown error")
                )))),
            };
        }
        let exports = Rc::new(RefCell::new(IndexMap::new()));
        self.records.insert(
            path.to_string(),
            Rc::new(ModuleRecord {
                    path: path.to_string(),
                    status: ModuleStatus::Initializing,
                    exports: Rc::clone(&exports),
                    error: None,
            }),
        );
        match self.instantiate(ev, path, &program, env, 0, &exports).await {
            Ok(()) => {
                self.set_record(path, ModuleStatus::Initialized, Rc::clone(&exports), None);
                Ok(exports.borrow().clone())
            }
            Err(err) => {
                self.set_record(path, ModuleStatus::Failed, Rc::clone(&exports), Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Resolves and links `specifier` as imported from `importer`, returning
    /// its exports. Cycle-safe: a module already `Initializing` returns
    /// whatever it has exported so far rather than recursing again.
    fn link<'a>(
        &'a mut self,
        ev: &'a mut Evaluator,
        specifier: &'a str,
        importer: &'a str,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<IndexMap<String, Value>, TsError>> + 'a>> {
        Box::pin(async move {
            if let Some(record) = self.records.get(specifier) {
                return match record.status {
                    ModuleStatus::Initialized | ModuleStatus::Initializing => {
                        Ok(record.exports.borrow().clone())
                    }
                    ModuleStatus::Failed => Err(TsError::runtime(Value::from_str(&format!(
                                    "Error: module '{specifier}' previously failed: {}",
                                    record.error.as_deref().unwrap_or("unknown error")
                    )))),
                };
            }
            if depth > self.max_depth {
                return Err(TsError::security(format!(
                            "module graph depth exceeded resolving '{specifier}'"
                )));
            }

            let source = self.resolver.resolve_async(specifier, importer).await;
            let source = match source {
                Some(s) => s,
                None => {
                    let err = TsError::runtime(Value::from_str(&format!(
                                "Error: module '{specifier}' could not be resolved"
                    )));
                    self.resolver.on_error(specifier, importer, &err);
                    return Err(err);
                }
            };

            // Insert the `initializing` placeholder, with its shared (empty)
            // exports cell, before recursing into this module's own imports,
            // so a cycle back to `specifier` finds it here instead of
            // resolving it a second time, and sees the cell fill in live as
            // `instantiate` below writes to the same `Rc`.
            let exports = Rc::new(RefCell::new(IndexMap::new()));
            self.records.insert(
                specifier.to_string(),
                Rc::new(ModuleRecord {
                        path: specifier.to_string(),
                        status: ModuleStatus::Initializing,
                        exports: Rc::clone(&exports),
                        error: None,
                }),
            );

            let result = match source {
                ModuleSource::Namespace { exports: ns_exports, .. } => {
                    *exports.borrow_mut() = ns_exports;
                    Ok(())
                }
                ModuleSource::Source { code, path } => match Parser::parse_module(&code) {
                    Ok(program) => {
                        let module_env = Environment::root();
                        self.instantiate(ev, &path, &program, &module_env, depth + 1, &exports).await
                    }
                    Err(err) => Err(err),
                },
                ModuleSource::Ast { program, path } => {
                    let module_env = Environment::root();
                    self.instantiate(ev, &path, &program, &module_env, depth + 1, &exports).await
                }
            };

            match result {
                Ok(()) => {
                    self.set_record(specifier, ModuleStatus::Initialized, Rc::clone(&exports), None);
                    let snapshot = exports.borrow().clone();
                    self.resolver.on_load(specifier, specifier, &snapshot);
                    Ok(snapshot)
                }
                Err(err) => {
                    self.set_record(specifier, ModuleStatus::Failed, Rc::clone(&exports), Some(err.to_string()));
                    self.resolver.on_error(specifier, importer, &err);
                    Err(err)
                }
            }
        })
    }

    fn set_record(
        &mut self,
        specifier: &str,
        status: ModuleStatus,
        exports: Rc<RefCell<IndexMap<String, Value>>>,
        error: Option<String>,
    ) {
        self.records.insert(
            specifier.to_string(),
            Rc::new(ModuleRecord {
                    path: specifier.to_string(),
                    status,
                    exports,
                    error,
            }),
        );
    }

    /// Links every import in `program`, binds the imported names into `env`,
    /// then evaluates the body, writing each export directly into the
    /// caller's shared `exports` cell as the declaration that produces it
    /// runs (rather than into a private map collected only at the end), so
    /// an importer already holding this `Rc` via a cycle sees bindings
    /// appear one by one. This is the recursive step: a module's own
    /// imports call back into `link`.
    fn instantiate<'a>(
        &'a mut self,
        ev: &'a mut Evaluator,
        path: &'a str,
        program: &'a Program,
        env: &'a Environment,
        depth: usize,
        exports: &'a Rc<RefCell<IndexMap<String, Value>>>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TsError>> + 'a>> {
        Box::pin(async move {
            for stmt in &program.body {
                if let Stmt::ImportDeclaration(decl) = stmt {
                    let imported = self.link(ev, &decl.source, path, depth + 1).await?;
                    bind_import_specifiers(env, decl, &imported)?;
                }
            }

            evaluator::hoist(env, &program.body);
            for stmt in &program.body {
                self.run_module_statement(ev, path, env, stmt, depth, exports).await?;
            }
            Ok(())
        })
    }

    fn run_module_statement<'a>(
        &'a mut self,
        ev: &'a mut Evaluator,
        path: &'a str,
        env: &'a Environment,
        stmt: &'a Stmt,
        depth: usize,
        exports: &'a Rc<RefCell<IndexMap<String, Value>>>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TsError>> + 'a>> {
        Box::pin(async move {
            match stmt {
                Stmt::ImportDeclaration(_) => {}
                Stmt::ExportDefaultDeclaration(expr) => {
                    let value = evaluator::eval_expr(ev, env, expr).await?;
                    exports.borrow_mut().insert("default".to_string(), value);
                }
                Stmt::ExportNamedDeclaration { declaration, specifiers, source } => {
                    if let Some(decl) = declaration {
                        evaluator::eval_stmt(ev, env, decl).await?;
                        for name in declared_names(decl) {
                            if let Some(v) = env.get(&name) {
                                exports.borrow_mut().insert(name, v);
                            }
                        }
                    }
                    match source {
                        Some(src) => {
                            let reexported = self.link(ev, src, path, depth + 1).await?;
                            for spec in specifiers {
                                let v = reexported.get(&spec.local).cloned().unwrap_or(Value::Undefined);
                                exports.borrow_mut().insert(spec.exported.clone(), v);
                            }
                        }
                        None => {
                            for spec in specifiers {
                                if let Some(v) = env.get(&spec.local) {
                                    exports.borrow_mut().insert(spec.exported.clone(), v);
                                }
                            }
                        }
                    }
                }
                Stmt::ExportAllDeclaration { source, exported } => {
                    let reexported = self.link(ev, source, path, depth + 1).await?;
                    match exported {
                        Some(ns) => {
                            let ns_obj = Value::new_object();
                            if let Value::Object(obj) = &ns_obj {
                                for (k, v) in &reexported {
                                    obj.borrow_mut().set(k, v.clone());
                                }
                            }
                            exports.borrow_mut().insert(ns.clone(), ns_obj);
                        }
                        None => {
                            for (k, v) in &reexported {
                                exports.borrow_mut().insert(k.clone(), v.clone());
                            }
                        }
                    }
                }
                other => {
                    evaluator::eval_stmt(ev, env, other).await?;
                }
            }
            Ok(())
        })
    }
}

/// Declares each of an `import` declaration's local bindings, wrapping the
/// namespace form as a read-only object so sandbox code cannot mutate
/// another module's exports.
fn bind_import_specifiers(
    env: &Environment,
    decl: &crate::ast::ImportDecl,
    exports: &IndexMap<String, Value>,
) -> Result<(), TsError> {
    use crate::ast::ImportSpecifier;

    for spec in &decl.specifiers {
        match spec {
            ImportSpecifier::Named { imported, local } => {
                let value = exports.get(imported).cloned().unwrap_or(Value::Undefined);
                env.declare(local, BindingKind::Const, value)?;
            }
            ImportSpecifier::Default { local } => {
                let value = exports.get("default").cloned().unwrap_or(Value::Undefined);
                env.declare(local, BindingKind::Const, value)?;
            }
            ImportSpecifier::Namespace { local } => {
                let ns = Value::new_object();
                if let Value::Object(obj) = &ns {
                    for (k, v) in exports {
                        obj.borrow_mut().set(k, v.clone());
                    }
                }
                env.declare(local, BindingKind::Const, ns)?;
            }
        }
    }
    Ok(())
}

/// Names a declaration statement binds, for collecting `export const x =..`
/// / `export function f() {}` / `export class C {}` into the exports map.
/// Destructured export declarations (`export const { a, b } = obj;`) are not
/// walked recursively here; only the common single-identifier case is
/// captured automatically — destructured exports should use a named
/// re-export (`export { a, b }`) instead.
fn declared_names(stmt: &Stmt) -> Vec<String> {
    match stmt {
        Stmt::VariableDeclaration { declarations, .. } => declarations
        .iter()
        .filter_map(|d| pattern_identifier(&d.id))
        .collect(),
        Stmt::FunctionDeclaration(def) => function_name(def),
        Stmt::ClassDeclaration(def) => class_name(def),
        _ => Vec::new(),
    }
}

fn pattern_identifier(pattern: &Pattern) -> Option<String> {
    match pattern {
        Pattern::Identifier(name) => Some(name.clone()),
        _ => None,
    }
}

fn function_name(def: &Rc<FunctionDef>) -> Vec<String> {
    def.name.clone().into_iter().collect()
}

fn class_name(def: &Rc<ClassDef>) -> Vec<String> {
    def.name.clone().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_gate::FeatureGate;
    use crate::resource::ResourceTracker;
    use crate::tracer::NoopTracer;

    struct MapResolver(IndexMap<String, String>);

    impl ModuleResolver for MapResolver {
        fn resolve(&mut self, specifier: &str, _importer: &str) -> Option<ModuleSource> {
            self.0.get(specifier).map(|code| ModuleSource::Source {
                    code: code.clone(),
                    path: specifier.to_string(),
            })
        }
    }

    fn new_evaluator() -> Evaluator {
        Evaluator::new(FeatureGate::allow_all(), ResourceTracker::unlimited(), Box::new(NoopTracer))
    }

    #[test]
    fn links_two_module_graph() {
        let mut resolver = IndexMap::new();
        resolver.insert("math".to_string(), "export const add = (a, b) => a + b;".to_string());
        let mut linker = ModuleLinker::new(Box::new(MapResolver(resolver)), 16);
        let mut ev = new_evaluator();
        let env = Environment::root();
        let program = Rc::new(Parser::parse_module(
                "import { add } from \"math\"; export const r = add(2, 3);",
            ).unwrap());

        let exports = crate::executor::run_sync(async move {
            linker.evaluate_module(&mut ev, "main", program, &env).await.map(|m| {
                    let r = m.get("r").cloned().unwrap_or(Value::Undefined);
                    r
            })
        })
        .unwrap();
        assert_eq!(exports, Value::Number(5.0));
    }

    #[test]
    fn unresolved_specifier_fails_the_import() {
        let mut linker = ModuleLinker::new(Box::new(MapResolver(IndexMap::new())), 16);
        let mut ev = new_evaluator();
        let env = Environment::root();
        let program = Rc::new(Parser::parse_module("import { x } from \"missing\";").unwrap());

        let result = crate::executor::run_sync(async move {
            linker.evaluate_module(&mut ev, "main", program, &env).await.map(|_| Value::Undefined)
        });
        assert!(result.is_err());
    }

    #[test]
    fn caches_specifier_and_calls_resolver_once() {
        let mut resolver = IndexMap::new();
        resolver.insert("m".to_string(), "export const v = 1;".to_string());
        let mut linker = ModuleLinker::new(Box::new(MapResolver(resolver)), 16);
        let mut ev = new_evaluator();
        let env = Environment::root();
        let program = Rc::new(
            Parser::parse_module("import { v as a } from \"m\"; import { v as b } from \"m\"; export const sum = a + b;")
            .unwrap(),
        );

        let exports = crate::executor::run_sync(async move {
            linker.evaluate_module(&mut ev, "main", program, &env).await.map(|m| {
                    m.get("sum").cloned().unwrap_or(Value::Undefined)
            })
        })
        .unwrap();
        assert_eq!(exports, Value::Number(2.0));
        assert_eq!(linker.records().get("m").unwrap().status, ModuleStatus::Initialized);
    }
}
