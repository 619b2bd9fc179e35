//! Lexical scope chain (component C5).
//!
//! A frame is a mapping from identifier to binding record. Frames form a
//! singly-linked chain via `Rc`/strong parent links; the one place a cycle
//! would otherwise form —
//! a class's methods closing back over the class's own defining
//! environment — is broken by the class referring to its prototype object
//! separately from any environment cell, so no frame ever needs a `Weak`
//! parent link back to itself.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::error::TsError;
use crate::value::{ClassValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Let,
    Const,
    Var,
    Param,
    Function,
}

#[derive(Debug, Clone)]
struct Binding {
    kind: BindingKind,
    value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Block,
    Function,
    Module,
}

#[derive(Debug)]
struct Frame {
    bindings: AHashMap<Rc<str>, Binding>,
    parent: Option<Environment>,
    kind: FrameKind,
    /// `this` binding for function frames; arrow functions don't introduce
    /// a new frame kind but capture the enclosing value directly on the
    /// closure (see `value::Closure::bound_this`).
    this_val: Option<Value>,
    /// True once a derived-class constructor has run `super(...)`, enabling
    /// `this` access for the remainder of the body.
    super_called: bool,
    /// The class a method/constructor/field-initializer body is running
    /// under, for `super` and private-field resolution. Inherited by arrow
    /// functions and block frames the same way `this_val` is, by walking
    /// up the chain.
    home_class: Option<Rc<ClassValue>>,
}

/// Reference-counted handle to one scope frame. Cloning an `Environment` is
/// a cheap `Rc` clone; closures keep a strong reference to the frame they
/// captured.
#[derive(Debug, Clone)]
pub struct Environment(Rc<RefCell<Frame>>);

impl Environment {
    pub fn root() -> Self {
        Self(Rc::new(RefCell::new(Frame {
                        bindings: AHashMap::default(),
                        parent: None,
                        kind: FrameKind::Module,
                        this_val: Some(Value::Undefined),
                        super_called: true,
                        home_class: None,
        })))
    }

    pub fn child_block(parent: &Self) -> Self {
        Self(Rc::new(RefCell::new(Frame {
                        bindings: AHashMap::default(),
                        parent: Some(parent.clone()),
                        kind: FrameKind::Block,
                        this_val: None,
                        super_called: true,
                        home_class: None,
        })))
    }

    pub fn child_function(parent: &Self, this_val: Option<Value>, derived_ctor: bool) -> Self {
        Self(Rc::new(RefCell::new(Frame {
                        bindings: AHashMap::default(),
                        parent: Some(parent.clone()),
                        kind: FrameKind::Function,
                        this_val,
                        super_called: !derived_ctor,
                        home_class: None,
        })))
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Declares a new binding in *this* frame directly (used for block-scoped
    /// `let`/`const`, function parameters, and the hoisting pass's `var`
    /// declarations once it has found the right function/module frame).
    pub fn declare(&self, name: &str, kind: BindingKind, value: Value) -> Result<(), TsError> {
        let mut frame = self.0.borrow_mut();
        if let Some(existing) = frame.bindings.get(name) {
            if matches!(existing.kind, BindingKind::Let | BindingKind::Const)
            && matches!(kind, BindingKind::Let | BindingKind::Const)
            {
                return Err(TsError::runtime(Value::from_str(&format!(
                                "SyntaxError: Identifier '{name}' has already been declared"
                ))));
            }
        }
        frame.bindings.insert(Rc::from(name), Binding { kind, value });
        Ok(())
    }

    /// Hoisting variant of `declare`: `var`/function declarations initialize
    /// to `undefined` if not already present, and re-declaring is allowed.
    pub fn hoist_var(&self, name: &str) {
        let mut frame = self.0.borrow_mut();
        frame
        .bindings
        .entry(Rc::from(name))
        .or_insert(Binding {
                kind: BindingKind::Var,
                value: Value::Undefined,
        });
    }

    /// Walks up to the nearest enclosing function/module frame, the target
    /// for `var` and function-declaration hoisting.
    pub fn nearest_function_frame(&self) -> Self {
        let mut cur = self.clone();
        loop {
            let is_target = matches!(cur.0.borrow().kind, FrameKind::Function | FrameKind::Module);
            if is_target {
                return cur;
            }
            let parent = cur.0.borrow().parent.clone();
            match parent {
                Some(p) => cur = p,
                None => return cur,
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let frame = self.0.borrow();
        if let Some(b) = frame.bindings.get(name) {
            return Some(b.value.clone());
        }
        frame.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    pub fn has(&self, name: &str) -> bool {
        if self.has_own(name) {
            return true;
        }
        let parent = self.0.borrow().parent.clone();
        parent.is_some_and(|p| p.has(name))
    }

    /// Assigns to an existing binding, walking the chain. Fails with a
    /// runtime `TypeError`-shaped value if the binding is `const`, or a
    /// `ReferenceError`-shaped value if no such binding exists.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), TsError> {
        {
            let mut frame = self.0.borrow_mut();
            if let Some(binding) = frame.bindings.get_mut(name) {
                if binding.kind == BindingKind::Const {
                    return Err(TsError::runtime(Value::from_str(&format!(
                                    "TypeError: Assignment to constant variable '{name}'."
                    ))));
                }
                binding.value = value;
                return Ok(());
            }
        }
        let parent = self.0.borrow().parent.clone();
        match parent {
            Some(p) => p.assign(name, value),
            None => Err(TsError::runtime(Value::from_str(&format!(
                            "ReferenceError: {name} is not defined"
            )))),
        }
    }

    /// Implicit global assignment for plain (non-strict) bare-word
    /// assignment to an undeclared name: creates a `var`-like binding at the
    /// module root. Used only when an identifier truly resolves to nothing
    /// in the chain; most evaluated programs should prefer `assign`.
    pub fn declare_implicit_global(&self, name: &str, value: Value) {
        let mut root = self.clone();
        loop {
            let parent = root.0.borrow().parent.clone();
            match parent {
                Some(p) => root = p,
                None => break,
            }
        }
        root.0.borrow_mut().bindings.insert(
            Rc::from(name),
            Binding {
                kind: BindingKind::Var,
                value,
            },
        );
    }

    pub fn this(&self) -> Value {
        let frame = self.0.borrow();
        if let Some(v) = &frame.this_val {
            return v.clone();
        }
        match &frame.parent {
            Some(p) => p.this(),
            None => Value::Undefined,
        }
    }

    pub fn set_this(&self, value: Value) {
        self.0.borrow_mut().this_val = Some(value);
    }

    pub fn mark_super_called(&self) {
        self.nearest_function_frame().0.borrow_mut().super_called = true;
    }

    pub fn is_super_called(&self) -> bool {
        self.nearest_function_frame().0.borrow().super_called
    }

    /// Sets the home class for this frame (called once, on the frame a
    /// method/constructor/field-initializer body runs in).
    pub fn set_home_class(&self, class: Rc<ClassValue>) {
        self.0.borrow_mut().home_class = Some(class);
    }

    /// Resolves the nearest home class, walking up through arrow-function and
    /// block frames exactly like `this()` does, since arrow functions share
    /// their enclosing method's `super`/private-field context.
    pub fn current_home_class(&self) -> Option<Rc<ClassValue>> {
        let frame = self.0.borrow();
        if let Some(c) = &frame.home_class {
            return Some(c.clone());
        }
        let parent = frame.parent.clone();
        drop(frame);
        parent.and_then(|p| p.current_home_class())
    }
}
