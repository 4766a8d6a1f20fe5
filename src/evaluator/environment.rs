use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::value::Value;

/// Lexical environment: a shared handle to a chain of binding frames.
///
/// Cloning the handle does not copy bindings. A closure holding a clone sees every later
/// `define` or `set!` made through any other clone of the same frame, which is what makes
/// recursive definitions and shared mutable state work.
#[derive(Clone, Default)]
pub struct Environment(Rc<Frame>);

#[derive(Default)]
struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
}

impl Environment {
    /// Empty root environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty frame whose lookups fall back to `parent`
    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        }))
    }

    /// New child frame holding exactly one binding; outer frames are untouched
    pub fn extend<S: Into<String>>(&self, name: S, value: Value) -> Self {
        let child = Self::with_parent(self);
        child.define(name, value);
        child
    }

    /// Inserts or overwrites a binding in this frame only
    pub fn define<S: Into<String>>(&self, name: S, value: Value) {
        let _previous = self.0.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Looks a name up, innermost frame first
    pub fn find(&self, name: &str) -> Option<Value> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.0.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            frame = frame.0.parent.as_ref()?;
        }
    }

    /// Whether the name is bound anywhere in the chain
    pub fn contains(&self, name: &str) -> bool {
        let mut frame = self;
        loop {
            if frame.0.bindings.borrow().contains_key(name) {
                return true;
            }
            match frame.0.parent.as_ref() {
                Some(parent) => frame = parent,
                None => return false,
            }
        }
    }

    /// Whether the name is bound in this frame itself
    pub fn contains_local(&self, name: &str) -> bool {
        self.0.bindings.borrow().contains_key(name)
    }

    /// Replaces the value of the innermost existing binding of `name`
    pub fn modify(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut frame = self;
        loop {
            {
                let mut bindings = frame.0.bindings.borrow_mut();
                if let Some(slot) = bindings.get_mut(name) {
                    let _previous = std::mem::replace(slot, value);
                    return Ok(());
                }
            }
            match frame.0.parent.as_ref() {
                Some(parent) => frame = parent,
                None => return Err(Error::UnboundVariable(name.to_owned())),
            }
        }
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        // Start with parent bindings (so they can be overridden by local bindings)
        if let Some(parent) = &self.0.parent {
            for (name, value) in parent.get_all_bindings() {
                bindings.insert(name, value);
            }
        }

        for (name, value) in self.0.bindings.borrow().iter() {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl fmt::Debug for Environment {
    /// Lists binding names per frame, innermost first; values are omitted because
    /// closures refer back to their own frames.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut frames = Vec::new();
        let mut frame = Some(self);
        while let Some(env) = frame {
            let mut names: Vec<String> = env.0.bindings.borrow().keys().cloned().collect();
            names.sort();
            frames.push(names);
            frame = env.0.parent.as_ref();
        }
        f.debug_struct("Environment").field("frames", &frames).finish()
    }
}
