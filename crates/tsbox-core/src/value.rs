//! The dynamic value model (component C4).
//!
//! `Value` is a tagged union over primitives, arrays, plain objects,
//! closures, classes, host-proxied values, and the generator/promise control
//! objects. Strings are `Rc<str>` and arrays/objects are `Rc<RefCell<_>>` so
//! that cloning a `Value` is always a cheap reference-count bump, since
//! strings and large allocations should share ownership rather than copy.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use num_bigint::BigInt;

use crate::ast::FunctionDef;
use crate::environment::Environment;
use crate::proxy::{HostCallable, HostObject, ProxyKind};

/// One slot of a `Value::Array`'s backing storage. Sparse holes are an
/// explicit marker rather than a `Value` variant, so ordinary value code
/// never has to special-case them.
#[derive(Debug, Clone)]
pub enum ArraySlot {
    Hole,
    Value(Value),
}

impl ArraySlot {
    pub fn as_value(&self) -> Value {
        match self {
            Self::Hole => Value::Undefined,
            Self::Value(v) => v.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct JsArray {
    pub items: Vec<ArraySlot>,
}

impl JsArray {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            items: values.into_iter().map(ArraySlot::Value).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Value {
        self.items.get(index).map_or(Value::Undefined, ArraySlot::as_value)
    }

    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.items.len() {
            self.items.resize(index + 1, ArraySlot::Hole);
        }
        self.items[index] = ArraySlot::Value(value);
    }
}

/// A regular (non-accessor) property, or a getter/setter pair. Object
/// literals and class bodies can both declare accessor properties.
#[derive(Debug, Clone)]
pub enum PropertySlot {
    Value(Value),
    Accessor { get: Option<Value>, set: Option<Value> },
}

/// Insertion-ordered plain object. Private fields live in a side table keyed
/// by `(owning class id, field name)` so identically-named `#x` fields in
/// unrelated classes never collide.
#[derive(Debug, Default)]
pub struct PlainObject {
    pub properties: IndexMap<Rc<str>, PropertySlot>,
    pub private: AHashMap<PrivateKey, Value>,
    /// The class this instance was constructed from, used for method lookup
    /// fallback (a prototype chain: a linked list of per-class prototypes)
    /// and for `instanceof`.
    pub class: Option<Rc<ClassValue>>,
}

impl PlainObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.properties.get(name)? {
            PropertySlot::Value(v) => Some(v),
            PropertySlot::Accessor { .. } => None,
        }
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.properties.insert(Rc::from(name), PropertySlot::Value(value));
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.properties.shift_remove(name).is_some()
    }

    /// Looks up an own-or-inherited method/accessor by walking the class
    /// prototype chain starting at `self.class`.
    pub fn lookup_in_chain(&self, name: &str) -> Option<PropertySlot> {
        if let Some(slot) = self.properties.get(name) {
            return Some(slot.clone());
        }
        let mut class = self.class.clone();
        while let Some(c) = class {
            if let Some(slot) = c.prototype.borrow().properties.get(name) {
                return Some(slot.clone());
            }
            class = c.super_class.clone();
        }
        None
    }
}

/// Identity key for a private class field/method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrivateKey {
    pub class_id: u64,
    pub name: Rc<str>,
}

/// A user-defined function's captured state (component C4 `Closure`).
#[derive(Debug, Clone)]
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Environment,
    /// Arrow functions capture the enclosing `this`; ordinary functions
    /// resolve `this` dynamically at call time (`None` here).
    pub bound_this: Option<Value>,
    /// The class a method was declared in, used to resolve `super` and
    /// private-field identity while the method body runs. A weak link:
    /// the class's prototype owns this closure, so a strong back-reference
    /// would form a reference cycle that never frees.
    pub home_class: Option<std::rc::Weak<ClassValue>>,
    pub name: Option<Rc<str>>,
}

/// One declared instance field, evaluated at the top of every constructor
/// call in declaration order.
#[derive(Debug, Clone)]
pub struct FieldInit {
    pub name: Rc<str>,
    pub is_private: bool,
    pub computed_key: Option<crate::ast::Expr>,
    pub value: Option<crate::ast::Expr>,
}

/// One element of a class's static-initialization sequence, preserving
/// declaration order between static fields and static blocks.
#[derive(Debug, Clone)]
pub enum StaticInit {
    Field(FieldInit),
    Block(Vec<crate::ast::Stmt>),
}

/// A class object: constructor, prototype (instance methods/accessors),
/// static table, superclass pointer, and the declared private-name set used
/// for identity checks.
#[derive(Debug)]
pub struct ClassValue {
    pub id: u64,
    pub name: Option<Rc<str>>,
    pub constructor: Option<Rc<Closure>>,
    pub prototype: Rc<RefCell<PlainObject>>,
    pub static_table: Rc<RefCell<PlainObject>>,
    pub super_class: Option<Rc<ClassValue>>,
    pub instance_fields: Vec<FieldInit>,
    /// Static fields and static blocks, run once at class-definition time in
    /// declaration order.
    pub static_initializers: Vec<StaticInit>,
    pub private_names: std::collections::HashSet<Rc<str>>,
    /// Captured defining environment, used to evaluate static/instance
    /// field initializers and static blocks with the right lexical scope.
    pub env: Environment,
}

impl ClassValue {
    /// Returns true if `name` is declared private somewhere in this class's
    /// own chain link (not superclasses — each class checks its own names).
    pub fn declares_private(&self, name: &str) -> bool {
        self.private_names.contains(name)
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<ClassValue>) -> bool {
        let mut cur = Some(Rc::clone(self));
        while let Some(c) = cur {
            if Rc::ptr_eq(&c, other) {
                return true;
            }
            cur = c.super_class.clone();
        }
        false
    }
}

/// Resumption request sent into a generator/async-generator's driver.
pub enum GeneratorResume {
    Next(Value),
    Throw(Value),
    Return(Value),
}

/// One step of generator iteration.
pub struct IterStep {
    pub value: Value,
    pub done: bool,
}

/// Implemented by the generator-driving machinery in `evaluator.rs`. Kept as
/// a trait here (rather than a concrete struct) so `value.rs` doesn't need
/// to know about the evaluator's internal continuation representation.
pub trait GeneratorDriver {
    fn resume(&mut self, input: GeneratorResume) -> Result<IterStep, crate::error::TsError>;
}

impl fmt::Debug for dyn GeneratorDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<generator driver>")
    }
}

#[derive(Clone)]
pub struct GeneratorHandle(pub Rc<RefCell<Box<dyn GeneratorDriver>>>);

impl fmt::Debug for GeneratorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<generator>")
    }
}

/// Internal promise state.
pub enum PromiseState {
    Pending(Vec<Box<dyn FnOnce(Result<Value, Value>)>>),
    Fulfilled(Value),
    Rejected(Value),
}

impl fmt::Debug for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(cbs) => write!(f, "Pending({} waiters)", cbs.len()),
            Self::Fulfilled(v) => write!(f, "Fulfilled({v:?})"),
            Self::Rejected(v) => write!(f, "Rejected({v:?})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromiseHandle(pub Rc<RefCell<PromiseState>>);

impl PromiseHandle {
    pub fn pending() -> Self {
        Self(Rc::new(RefCell::new(PromiseState::Pending(Vec::new()))))
    }

    pub fn resolved(value: Value) -> Self {
        Self(Rc::new(RefCell::new(PromiseState::Fulfilled(value))))
    }

    pub fn rejected(value: Value) -> Self {
        Self(Rc::new(RefCell::new(PromiseState::Rejected(value))))
    }

    /// Settles the promise, waking every registered waiter exactly once.
    pub fn settle(&self, result: Result<Value, Value>) {
        let waiters = {
            let mut state = self.0.borrow_mut();
            match &*state {
                PromiseState::Pending(_) => {
                    let prev = std::mem::replace(
                        &mut *state,
                        match &result {
                            Ok(v) => PromiseState::Fulfilled(v.clone()),
                            Err(v) => PromiseState::Rejected(v.clone()),
                        },
                    );
                    match prev {
                        PromiseState::Pending(waiters) => waiters,
                        _ => Vec::new(),
                    }
                }
                _ => return,
            }
        };
        for waiter in waiters {
            waiter(result.clone());
        }
    }

    /// Registers a continuation to run when the promise settles, or
    /// immediately if it already has.
    pub fn on_settle(&self, callback: Box<dyn FnOnce(Result<Value, Value>)>) {
        let mut state = self.0.borrow_mut();
        match &mut *state {
            PromiseState::Pending(waiters) => waiters.push(callback),
            PromiseState::Fulfilled(v) => {
                let v = v.clone();
                drop(state);
                callback(Ok(v));
            }
            PromiseState::Rejected(v) => {
                let v = v.clone();
                drop(state);
                callback(Err(v));
            }
        }
    }
}

/// The dynamic value model.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    BigInt(Rc<BigInt>),
    Array(Rc<RefCell<JsArray>>),
    Object(Rc<RefCell<PlainObject>>),
    Closure(Rc<Closure>),
    BoundMethod(Rc<Closure>, Box<Value>),
    Class(Rc<ClassValue>),
    HostFunction(Rc<dyn HostCallable>),
    HostProxy(Rc<dyn HostObject>, ProxyKind),
    Generator(GeneratorHandle),
    Promise(PromiseHandle),
}

impl Value {
    pub fn from_str(s: &str) -> Self {
        Self::String(Rc::from(s))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn new_object() -> Self {
        Self::Object(Rc::new(RefCell::new(PlainObject::new())))
    }

    pub fn new_array(values: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(JsArray::from_values(values))))
    }

    /// Truthiness: false for `false, null, undefined, 0, NaN, ""`; true
    /// otherwise.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::BigInt(b) => **b != BigInt::from(0),
            _ => true,
        }
    }

    /// `typeof` result for this value.
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::BigInt(_) => "bigint",
            Self::Array(_) | Self::Object(_) => "object",
            Self::Closure(_) | Self::BoundMethod(..) | Self::Class(_) | Self::HostFunction(_) => "function",
            Self::HostProxy(_, ProxyKind::Function) => "function",
            Self::HostProxy(_, ProxyKind::Object) => "object",
            Self::Generator(_) | Self::Promise(_) => "object",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Self::Closure(_) | Self::BoundMethod(..) | Self::Class(_) | Self::HostFunction(_)
        ) || matches!(self, Self::HostProxy(_, ProxyKind::Function))
    }

    /// Approximate heap-allocation size in bytes, used by the resource
    /// tracker's memory estimate. Deliberately rough; see
    /// `resource::alloc_cost`.
    pub fn approx_size(&self) -> usize {
        use crate::resource::alloc_cost;
        match self {
            Self::String(s) => s.len() * alloc_cost::STRING_BYTE,
            Self::Array(a) => a.borrow().len() * alloc_cost::ARRAY_ELEMENT,
            Self::Object(o) => o.borrow().properties.len() * alloc_cost::OBJECT_PROPERTY,
            _ => 8,
        }
    }
}

impl PartialEq for Value {
    /// Structural `===` comparison. Host proxies, closures,
    /// classes, generators, and promises compare by reference identity;
    /// this gives no guarantee of value identity equality for host objects
    /// observed multiple times.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::HostFunction(a), Self::HostFunction(b)) => Rc::ptr_eq(a, b),
            (Self::HostProxy(a, _), Self::HostProxy(b, _)) => Rc::ptr_eq(a, b),
            (Self::Generator(a), Self::Generator(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Promise(a), Self::Promise(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::BoundMethod(a1, a2), Self::BoundMethod(b1, b2)) => Rc::ptr_eq(a1, b1) && a2 == b2,
            _ => false,
        }
    }
}
