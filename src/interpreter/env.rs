use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::value::Value;

pub type EnvRef = Rc<RefCell<Environment>>;

struct EnvEntry {
    name: String,
    value: Value,
    is_override: bool,
}

/// A lexical scope: named slots, a parent pointer, and a short-circuit
/// pointer to the root scope for `override`.
pub struct Environment {
    entries: Vec<EnvEntry>,
    parent: Option<EnvRef>,
    global: Weak<RefCell<Environment>>,
}

impl Environment {
    /// A fresh root scope. Its global pointer refers to itself.
    pub fn root() -> EnvRef {
        Rc::new_cyclic(|weak| {
            RefCell::new(Environment {
                entries: Vec::new(),
                parent: None,
                global: weak.clone(),
            })
        })
    }

    /// A child scope of `parent`, sharing the same root.
    pub fn child(parent: EnvRef) -> EnvRef {
        let global = parent.borrow().global.clone();
        Rc::new(RefCell::new(Environment {
            entries: Vec::new(),
            parent: Some(parent),
            global,
        }))
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut EnvEntry> {
        self.entries.iter_mut().rev().find(|e| e.name == name)
    }

    /// Bind `name` in this scope, shadowing any outer binding.
    pub fn define(&mut self, name: &str, value: Value) {
        if let Some(entry) = self.slot_mut(name) {
            entry.value = value;
            return;
        }
        self.entries.push(EnvEntry {
            name: name.to_string(),
            value,
            is_override: false,
        });
    }

    fn get_local(&self, name: &str) -> Option<Value> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.name == name)
            .map(|e| e.value.clone())
    }

    fn set_local(&mut self, name: &str, value: Value) -> bool {
        if let Some(entry) = self.slot_mut(name) {
            entry.value = value;
            true
        } else {
            false
        }
    }
}

/// Look `name` up along the scope chain.
pub fn env_get(env: &EnvRef, name: &str) -> Option<Value> {
    let mut current = Some(env.clone());
    while let Some(scope) = current {
        if let Some(value) = scope.borrow().get_local(name) {
            return Some(value);
        }
        current = scope.borrow().parent.clone();
    }
    None
}

/// Assign in the nearest scope that already binds `name`; define in the
/// current scope if no binding exists anywhere on the chain.
pub fn env_set(env: &EnvRef, name: &str, value: Value) {
    let mut current = Some(env.clone());
    while let Some(scope) = current {
        if scope.borrow_mut().set_local(name, value.clone()) {
            return;
        }
        current = scope.borrow().parent.clone();
    }
    env.borrow_mut().define(name, value);
}

pub fn env_define(env: &EnvRef, name: &str, value: Value) {
    env.borrow_mut().define(name, value);
}

/// Duplicate a scope: same parent and root, entries copied by value.
/// Used when a generator is deep-copied.
pub fn duplicate(env: &EnvRef) -> EnvRef {
    let src = env.borrow();
    Rc::new(RefCell::new(Environment {
        entries: src
            .entries
            .iter()
            .map(|e| EnvEntry {
                name: e.name.clone(),
                value: e.value.clone(),
                is_override: e.is_override,
            })
            .collect(),
        parent: src.parent.clone(),
        global: src.global.clone(),
    }))
}

/// Write at the root scope, marking the entry as overridden.
pub fn env_force_set_global(env: &EnvRef, name: &str, value: Value) {
    let global = env
        .borrow()
        .global
        .upgrade()
        .expect("global scope outlives all children");
    let mut global = global.borrow_mut();
    if let Some(entry) = global.slot_mut(name) {
        entry.value = value;
        entry.is_override = true;
    } else {
        global.entries.push(EnvEntry {
            name: name.to_string(),
            value,
            is_override: true,
        });
    }
}
