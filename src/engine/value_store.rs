//! Value Store
//!
//! The three variable namespaces (persistent, global, local) plus the local
//! frame stack that tracks function scope across indent changes. Keys are
//! canonicalized (trimmed, interior whitespace collapsed, case-folded) for
//! lookup; each entry keeps a case-preserving display name so the expression
//! evaluator can materialize identifiers.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::model::types::Value;

/// Which namespace an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Persistent,
    Global,
    Local,
}

/// One stored variable: case-preserving name plus its value.
#[derive(Debug, Clone)]
pub struct VarEntry {
    pub display: String,
    pub value: Value,
}

/// Canonical lookup key: trimmed, interior whitespace collapsed, case-folded.
pub fn canonicalize(name: &str) -> String {
    display_name(name).to_lowercase()
}

/// Case-preserving canonical form: trimmed, interior whitespace collapsed.
pub fn display_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A single namespace, keyed by canonical name. Insertion order is kept so
/// expression-block bindings materialize deterministically.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    entries: IndexMap<String, VarEntry>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(&canonicalize(name)).map(|e| &e.value)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        let key = canonicalize(name);
        let display = display_name(name);
        self.entries.insert(key, VarEntry { display, value });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&canonicalize(name))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate `(display_name, value)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.values().map(|e| (e.display.as_str(), &e.value))
    }
}

/// Shared handle to the persistent namespace. The Runner owns one and hands
/// it to every instance; writers take the exclusive lock, readers the shared
/// one.
pub type SharedNamespace = Arc<RwLock<Namespace>>;

pub fn shared_namespace() -> SharedNamespace {
    Arc::new(RwLock::new(Namespace::new()))
}

/// The per-instance variable environment.
#[derive(Debug)]
pub struct ValueStore {
    pub persistent: SharedNamespace,
    pub global: Namespace,
    pub local: Namespace,
    pub local_stack: Vec<Namespace>,
    /// Local bindings staged by an upcoming function call; consumed by the
    /// next pushed frame and cleared at every step boundary.
    pub locals_passed_into_func: Namespace,
}

impl ValueStore {
    pub fn new(persistent: SharedNamespace) -> Self {
        Self {
            persistent,
            global: Namespace::new(),
            local: Namespace::new(),
            local_stack: Vec::new(),
            locals_passed_into_func: Namespace::new(),
        }
    }

    pub fn get(&self, scope: Scope, name: &str) -> Option<Value> {
        match scope {
            Scope::Persistent => self.persistent.read().unwrap().get(name).cloned(),
            Scope::Global => self.global.get(name).cloned(),
            Scope::Local => self
                .locals_passed_into_func
                .get(name)
                .or_else(|| self.local.get(name))
                .cloned(),
        }
    }

    pub fn set(&mut self, scope: Scope, name: &str, value: Value) {
        match scope {
            Scope::Persistent => self.persistent.write().unwrap().set(name, value),
            Scope::Global => self.global.set(name, value),
            Scope::Local => self.local.set(name, value),
        }
    }

    /// Save the current local frame and start a fresh one seeded from
    /// `locals_passed_into_func`.
    pub fn push_local_frame(&mut self) {
        let staged = std::mem::take(&mut self.locals_passed_into_func);
        let saved = std::mem::replace(&mut self.local, staged);
        self.local_stack.push(saved);
    }

    /// Restore the previous local frame. Popping with an empty stack is a
    /// programmer error; the engine keeps use balanced.
    pub fn pop_local_frame(&mut self) {
        debug_assert!(!self.local_stack.is_empty(), "local stack underflow");
        if let Some(frame) = self.local_stack.pop() {
            self.local = frame;
        }
    }

    pub fn local_depth(&self) -> usize {
        self.local_stack.len()
    }

    /// Branch boundary: reset `global` from the given seeds and drop all
    /// local state. Persistent survives.
    pub fn reset_branch_scope(&mut self, seeds: &IndexMap<String, Value>) {
        self.global.clear();
        for (name, value) in seeds {
            self.global.set(name, value.clone());
        }
        self.local.clear();
        self.local_stack.clear();
        self.locals_passed_into_func.clear();
    }

    /// Snapshot of every visible variable as `display_name -> value`, in
    /// persistent, global, local, staged order so later namespaces shadow
    /// earlier ones. Used to materialize expression-block bindings.
    pub fn bindings_snapshot(&self) -> IndexMap<String, Value> {
        let mut out = IndexMap::new();
        for (name, value) in self.persistent.read().unwrap().iter() {
            out.insert(name.to_string(), value.clone());
        }
        for (name, value) in self.global.iter() {
            out.insert(name.to_string(), value.clone());
        }
        for (name, value) in self.local.iter() {
            out.insert(name.to_string(), value.clone());
        }
        for (name, value) in self.locals_passed_into_func.iter() {
            out.insert(name.to_string(), value.clone());
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ValueStore {
        ValueStore::new(shared_namespace())
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("  My   Var "), "my var");
        assert_eq!(display_name("  My   Var "), "My Var");
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut s = store();
        s.set(Scope::Global, "UserName", Value::Str("ada".into()));
        assert_eq!(s.get(Scope::Global, "username"), Some(Value::Str("ada".into())));
        assert_eq!(s.get(Scope::Global, "USER NAME"), None);
    }

    #[test]
    fn test_display_name_preserved() {
        let mut s = store();
        s.set(Scope::Global, "  User   Name ", Value::Num(1.0));
        let snapshot = s.bindings_snapshot();
        assert!(snapshot.contains_key("User Name"));
    }

    #[test]
    fn test_local_falls_through_to_staged() {
        let mut s = store();
        s.local.set("x", Value::Str("frame".into()));
        s.locals_passed_into_func.set("x", Value::Str("staged".into()));
        assert_eq!(s.get(Scope::Local, "x"), Some(Value::Str("staged".into())));
    }

    #[test]
    fn test_push_consumes_staged_locals() {
        let mut s = store();
        s.local.set("a", Value::Num(1.0));
        s.locals_passed_into_func.set("b", Value::Num(2.0));

        s.push_local_frame();
        assert!(s.locals_passed_into_func.is_empty());
        assert_eq!(s.get(Scope::Local, "b"), Some(Value::Num(2.0)));
        assert_eq!(s.get(Scope::Local, "a"), None);
        assert_eq!(s.local_depth(), 1);

        s.pop_local_frame();
        assert_eq!(s.get(Scope::Local, "a"), Some(Value::Num(1.0)));
        assert_eq!(s.get(Scope::Local, "b"), None);
        assert_eq!(s.local_depth(), 0);
    }

    #[test]
    fn test_persistent_shared_between_stores() {
        let shared = shared_namespace();
        let mut a = ValueStore::new(shared.clone());
        let b = ValueStore::new(shared);
        a.set(Scope::Persistent, "token", Value::Str("t".into()));
        assert_eq!(b.get(Scope::Persistent, "token"), Some(Value::Str("t".into())));
    }

    #[test]
    fn test_reset_branch_scope() {
        let mut s = store();
        s.set(Scope::Persistent, "p", Value::Num(1.0));
        s.set(Scope::Global, "g", Value::Num(2.0));
        s.set(Scope::Local, "l", Value::Num(3.0));
        s.push_local_frame();

        let mut seeds = IndexMap::new();
        seeds.insert("seeded".to_string(), Value::Bool(true));
        s.reset_branch_scope(&seeds);

        assert_eq!(s.get(Scope::Persistent, "p"), Some(Value::Num(1.0)));
        assert_eq!(s.get(Scope::Global, "g"), None);
        assert_eq!(s.get(Scope::Global, "seeded"), Some(Value::Bool(true)));
        assert_eq!(s.get(Scope::Local, "l"), None);
        assert_eq!(s.local_depth(), 0);
    }

    #[test]
    fn test_bindings_snapshot_shadowing() {
        let mut s = store();
        s.set(Scope::Persistent, "x", Value::Num(1.0));
        s.set(Scope::Global, "x", Value::Num(2.0));
        s.set(Scope::Local, "x", Value::Num(3.0));
        let snap = s.bindings_snapshot();
        assert_eq!(snap.get("x"), Some(&Value::Num(3.0)));
    }
}
