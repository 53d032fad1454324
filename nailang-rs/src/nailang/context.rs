//! Variable scopes.
//!
//! A scope stores variables and local functions through the
//! [`EvaluateContext`] interface.  Two storage strategies exist:
//!
//! | Strategy | Storage | Lookup |
//! |----------|---------|--------|
//! | `Compact` | parallel vectors, names interned in a [`MemoryPool`] | linear |
//! | `Large` | `BTreeMap` keyed by name | logarithmic |
//!
//! Scopes chain to a parent.  Name resolution depends on the variable's
//! prefix: none walks from the innermost scope to the root, `` ` `` goes to
//! the root, `:` stays in the current scope.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use super::arena::{MemoryPool, StrSpan};
use super::ast::{Ast, BlockId};
use super::name::{QualifiedName, VarScope};
use super::value::Arg;

/// A function defined by a script (`@DefFunc`), with captured values.
#[derive(Debug, Clone)]
pub struct LocalFunc {
    pub name: String,
    pub ast: Rc<Ast>,
    pub body: BlockId,
    pub params: Vec<String>,
    pub captures: Vec<(String, Arg)>,
    /// The scope the function was defined in; calls run in a child of it.
    /// Weak, since that scope stores the function.
    pub scope: Weak<RefCell<Scope>>,
}

pub trait EvaluateContext {
    /// The slot for `name`, creating an empty one when asked.
    fn locate_arg(&mut self, name: &str, create: bool) -> Option<&mut Arg>;
    fn lookup_func(&self, name: &str) -> Option<Rc<LocalFunc>>;
    fn set_func(&mut self, name: &str, func: Rc<LocalFunc>);
    fn arg_count(&self) -> usize;
    fn func_count(&self) -> usize;
}

// ── Compact ───────────────────────────────────────────────────────────────────

/// Few-bindings storage: linear search over interned names.
#[derive(Debug, Default)]
pub struct CompactContext {
    names: MemoryPool,
    keys: Vec<StrSpan>,
    args: Vec<Arg>,
    funcs: Vec<(StrSpan, Rc<LocalFunc>)>,
}

impl CompactContext {
    pub fn new() -> Self {
        CompactContext { names: MemoryPool::new(256), ..Self::default() }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|k| self.names.get_str(*k) == name)
    }
}

impl EvaluateContext for CompactContext {
    fn locate_arg(&mut self, name: &str, create: bool) -> Option<&mut Arg> {
        let idx = match self.find(name) {
            Some(idx) => idx,
            None if create => {
                let key = self.names.alloc_str(name);
                self.keys.push(key);
                self.args.push(Arg::Empty);
                self.args.len() - 1
            }
            None => return None,
        };
        self.args.get_mut(idx)
    }

    fn lookup_func(&self, name: &str) -> Option<Rc<LocalFunc>> {
        self.funcs.iter().find(|(k, _)| self.names.get_str(*k) == name).map(|(_, f)| f.clone())
    }

    fn set_func(&mut self, name: &str, func: Rc<LocalFunc>) {
        if let Some(entry) = self.funcs.iter_mut().find(|(k, _)| self.names.get_str(*k) == name) {
            entry.1 = func;
            return;
        }
        let key = self.names.alloc_str(name);
        self.funcs.push((key, func));
    }

    fn arg_count(&self) -> usize {
        self.args.iter().filter(|a| !a.is_empty()).count()
    }

    fn func_count(&self) -> usize {
        self.funcs.len()
    }
}

// ── Large ─────────────────────────────────────────────────────────────────────

/// Many-bindings storage: ordered maps.
#[derive(Debug, Default)]
pub struct LargeContext {
    args: BTreeMap<String, Arg>,
    funcs: BTreeMap<String, Rc<LocalFunc>>,
}

impl LargeContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvaluateContext for LargeContext {
    fn locate_arg(&mut self, name: &str, create: bool) -> Option<&mut Arg> {
        if create {
            return Some(self.args.entry(name.to_owned()).or_default());
        }
        self.args.get_mut(name)
    }

    fn lookup_func(&self, name: &str) -> Option<Rc<LocalFunc>> {
        self.funcs.get(name).cloned()
    }

    fn set_func(&mut self, name: &str, func: Rc<LocalFunc>) {
        self.funcs.insert(name.to_owned(), func);
    }

    fn arg_count(&self) -> usize {
        self.args.values().filter(|a| !a.is_empty()).count()
    }

    fn func_count(&self) -> usize {
        self.funcs.len()
    }
}

// ── Strategy selection ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextKind {
    #[default]
    Compact,
    Large,
}

#[derive(Debug)]
pub enum ContextStore {
    Compact(CompactContext),
    Large(LargeContext),
}

impl ContextStore {
    pub fn new(kind: ContextKind) -> Self {
        match kind {
            ContextKind::Compact => ContextStore::Compact(CompactContext::new()),
            ContextKind::Large => ContextStore::Large(LargeContext::new()),
        }
    }

    fn inner(&self) -> &dyn EvaluateContext {
        match self {
            ContextStore::Compact(c) => c,
            ContextStore::Large(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn EvaluateContext {
        match self {
            ContextStore::Compact(c) => c,
            ContextStore::Large(c) => c,
        }
    }
}

impl EvaluateContext for ContextStore {
    fn locate_arg(&mut self, name: &str, create: bool) -> Option<&mut Arg> {
        self.inner_mut().locate_arg(name, create)
    }

    fn lookup_func(&self, name: &str) -> Option<Rc<LocalFunc>> {
        self.inner().lookup_func(name)
    }

    fn set_func(&mut self, name: &str, func: Rc<LocalFunc>) {
        self.inner_mut().set_func(name, func)
    }

    fn arg_count(&self) -> usize {
        self.inner().arg_count()
    }

    fn func_count(&self) -> usize {
        self.inner().func_count()
    }
}

// ── Scope chain ───────────────────────────────────────────────────────────────

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug)]
pub struct Scope {
    pub store: ContextStore,
    parent: Option<ScopeRef>,
}

impl Scope {
    pub fn root(kind: ContextKind) -> ScopeRef {
        Rc::new(RefCell::new(Scope { store: ContextStore::new(kind), parent: None }))
    }

    pub fn child(parent: &ScopeRef, kind: ContextKind) -> ScopeRef {
        Rc::new(RefCell::new(Scope { store: ContextStore::new(kind), parent: Some(parent.clone()) }))
    }

    pub fn parent(&self) -> Option<ScopeRef> {
        self.parent.clone()
    }

    fn has_arg(&mut self, name: &str) -> bool {
        self.store.locate_arg(name, false).is_some()
    }
}

pub fn root_of(scope: &ScopeRef) -> ScopeRef {
    let mut cur = scope.clone();
    loop {
        let parent = cur.borrow().parent();
        match parent {
            Some(p) => cur = p,
            None => return cur,
        }
    }
}

/// The scope currently holding `name`, following its prefix rule.
fn resolve(scope: &ScopeRef, name: &QualifiedName) -> Option<ScopeRef> {
    let key = name.as_str();
    match name.scope() {
        VarScope::Root => {
            let root = root_of(scope);
            let found = root.borrow_mut().has_arg(key);
            found.then_some(root)
        }
        VarScope::Local => {
            let found = scope.borrow_mut().has_arg(key);
            found.then(|| scope.clone())
        }
        VarScope::Any => {
            let mut cur = Some(scope.clone());
            while let Some(s) = cur {
                if s.borrow_mut().has_arg(key) {
                    return Some(s);
                }
                cur = s.borrow().parent();
            }
            None
        }
    }
}

/// Run `f` on the slot of `name`.  With `create`, a missing variable is
/// created in the targeted scope (root for `` ` ``, otherwise the current one).
pub fn with_slot<R>(
    scope: &ScopeRef,
    name: &QualifiedName,
    create: bool,
    f: impl FnOnce(&mut Arg) -> R,
) -> Option<R> {
    let holder = match resolve(scope, name) {
        Some(holder) => holder,
        None if create => match name.scope() {
            VarScope::Root => root_of(scope),
            _ => scope.clone(),
        },
        None => return None,
    };
    let mut holder = holder.borrow_mut();
    holder.store.locate_arg(name.as_str(), create).map(f)
}

/// The current value of `name`, if it exists.
pub fn lookup_arg(scope: &ScopeRef, name: &QualifiedName) -> Option<Arg> {
    with_slot(scope, name, false, |slot| slot.clone())
}

/// Set `name`, creating it when absent.
pub fn assign_arg(scope: &ScopeRef, name: &QualifiedName, value: Arg) {
    with_slot(scope, name, true, |slot| *slot = value);
}

/// Find a local function, innermost scope first.
pub fn lookup_func(scope: &ScopeRef, name: &str) -> Option<Rc<LocalFunc>> {
    let mut cur = Some(scope.clone());
    while let Some(s) = cur {
        if let Some(func) = s.borrow().store.lookup_func(name) {
            return Some(func);
        }
        cur = s.borrow().parent();
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> QualifiedName {
        QualifiedName::var(text).unwrap()
    }

    fn both_kinds() -> [ContextStore; 2] {
        [ContextStore::new(ContextKind::Compact), ContextStore::new(ContextKind::Large)]
    }

    #[test]
    fn strategies_share_semantics() {
        for mut store in both_kinds() {
            assert!(store.locate_arg("a", false).is_none());
            *store.locate_arg("a", true).unwrap() = Arg::Uint(1);
            *store.locate_arg("b.c", true).unwrap() = Arg::from("x");
            assert_eq!(store.locate_arg("a", false).cloned(), Some(Arg::Uint(1)));
            assert_eq!(store.arg_count(), 2);
            store.locate_arg("unset", true);
            assert_eq!(store.arg_count(), 2);
            assert_eq!(store.func_count(), 0);
        }
    }

    #[test]
    fn functions_replace_by_name() {
        let mut block_ast = Ast::new();
        let info = crate::nailang::ast::RawBlock {
            ty: block_ast.push_str("Func"),
            name: block_ast.push_str("f"),
            source: block_ast.push_str(""),
            file: block_ast.push_str(""),
            pos: (0, 0),
        };
        let body = block_ast
            .push_block(crate::nailang::ast::Block { info, items: crate::nailang::arena::Span::EMPTY });
        let ast = Rc::new(block_ast);
        let make = |params: Vec<String>| {
            Rc::new(LocalFunc { name: "f".into(), ast: ast.clone(), body, params, captures: vec![], scope: Weak::new() })
        };
        for mut store in both_kinds() {
            store.set_func("f", make(vec![]));
            store.set_func("f", make(vec!["x".into()]));
            assert_eq!(store.func_count(), 1);
            assert_eq!(store.lookup_func("f").unwrap().params, ["x"]);
            assert!(store.lookup_func("g").is_none());
        }
    }

    #[test]
    fn unprefixed_lookup_walks_to_root() {
        let root = Scope::root(ContextKind::Large);
        assign_arg(&root, &name("g"), Arg::Uint(1));
        let child = Scope::child(&root, ContextKind::Compact);
        let grandchild = Scope::child(&child, ContextKind::Compact);
        assert_eq!(lookup_arg(&grandchild, &name("g")), Some(Arg::Uint(1)));

        // existing variables are updated where they live
        assign_arg(&grandchild, &name("g"), Arg::Uint(2));
        assert_eq!(lookup_arg(&root, &name("g")), Some(Arg::Uint(2)));

        // new ones land in the innermost scope
        assign_arg(&grandchild, &name("fresh"), Arg::Bool(true));
        assert_eq!(lookup_arg(&child, &name("fresh")), None);
        assert_eq!(lookup_arg(&grandchild, &name("fresh")), Some(Arg::Bool(true)));
    }

    #[test]
    fn prefixes_select_scope() {
        let root = Scope::root(ContextKind::Large);
        let child = Scope::child(&root, ContextKind::Compact);
        assign_arg(&root, &name("v"), Arg::Uint(1));

        // `:v` only sees the current scope
        assert_eq!(lookup_arg(&child, &name(":v")), None);
        assign_arg(&child, &name(":v"), Arg::Uint(5));
        assert_eq!(lookup_arg(&child, &name("v")), Some(Arg::Uint(5)));
        assert_eq!(lookup_arg(&root, &name("v")), Some(Arg::Uint(1)));

        // `` `v `` always means the root
        assert_eq!(lookup_arg(&child, &name("`v")), Some(Arg::Uint(1)));
        assign_arg(&child, &name("`created"), Arg::Int(-1));
        assert_eq!(lookup_arg(&root, &name("created")), Some(Arg::Int(-1)));
    }
}
