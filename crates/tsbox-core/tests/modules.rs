//! Black-box module-linking checks driven entirely through [`Sandbox`].

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use tsbox_core::modules::{ModuleResolver, ModuleSource};
use tsbox_core::sandbox::{EvalOptions, ModulesOptions, Sandbox, SandboxOptions};
use tsbox_core::value::Value;

struct CountingResolver {
    sources: IndexMap<String, String>,
    calls: Rc<RefCell<Vec<String>>>,
}

impl ModuleResolver for CountingResolver {
    fn resolve(&mut self, specifier: &str, _importer: &str) -> Option<ModuleSource> {
        self.calls.borrow_mut().push(specifier.to_string());
        self.sources.get(specifier).map(|code| ModuleSource::Source {
            code: code.clone(),
            path: specifier.to_string(),
        })
    }
}

#[test]
fn two_module_graph_resolves_once_per_specifier() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut sources = IndexMap::new();
    sources.insert("math".to_string(), "export const add = (a, b) => a + b;".to_string());

    let options = SandboxOptions {
        modules: Some(ModulesOptions {
            resolver: Some(Box::new(CountingResolver {
                sources,
                calls: calls.clone(),
            })),
            max_depth: 16,
        }),
        ..SandboxOptions::default()
    };
    let mut sandbox = Sandbox::new(options).unwrap();

    let exports = sandbox
        .evaluate_module(
            "main",
            "import { add } from \"math\"; export const r = add(2, 3);",
            EvalOptions::default(),
        )
        .unwrap();

    assert_eq!(exports.get("r"), Some(&Value::Number(5.0)));
    assert_eq!(calls.borrow().as_slice(), &["math".to_string()]);
}

#[test]
fn missing_module_fails_the_import() {
    let options = SandboxOptions {
        modules: Some(ModulesOptions {
            resolver: Some(Box::new(CountingResolver {
                sources: IndexMap::new(),
                calls: Rc::new(RefCell::new(Vec::new())),
            })),
            max_depth: 16,
        }),
        ..SandboxOptions::default()
    };
    let mut sandbox = Sandbox::new(options).unwrap();
    let result = sandbox.evaluate_module("main", "import { x } from \"missing\";", EvalOptions::default());
    assert!(result.is_err());
}

#[test]
fn module_evaluation_without_a_resolver_is_rejected() {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    let result = sandbox.evaluate_module("main", "export const r = 1;", EvalOptions::default());
    assert!(result.is_err());
}

#[test]
fn importing_same_specifier_twice_shares_one_resolution() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut sources = IndexMap::new();
    sources.insert("m".to_string(), "export const v = 1;".to_string());

    let options = SandboxOptions {
        modules: Some(ModulesOptions {
            resolver: Some(Box::new(CountingResolver {
                sources,
                calls: calls.clone(),
            })),
            max_depth: 16,
        }),
        ..SandboxOptions::default()
    };
    let mut sandbox = Sandbox::new(options).unwrap();

    let exports = sandbox
        .evaluate_module(
            "main",
            "import { v as a } from \"m\"; import { v as b } from \"m\"; export const sum = a + b;",
            EvalOptions::default(),
        )
        .unwrap();

    assert_eq!(exports.get("sum"), Some(&Value::Number(2.0)));
    assert_eq!(calls.borrow().len(), 1);
}
