//! Parsed program representation.
//!
//! All nodes live in arenas owned by one [`Ast`] and refer to each other by
//! index.  Terms ([`RawArg`]) are `Copy`; compound terms hold the indices of
//! their operands.  Texts (string literals, block names and bodies) live in
//! the ast's [`MemoryPool`].

use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::arena::{Arena, Idx, MemoryPool, Span, StrSpan};
use super::name::{FuncKind, NameError, QualifiedName};
use super::token::EmbedOp;

pub type ExprId = Idx<RawArg>;
pub type NameId = Idx<QualifiedName>;
pub type CallId = Idx<FuncCall>;
pub type AssignId = Idx<Assignment>;
pub type RawBlockId = Idx<RawBlock>;
pub type BlockId = Idx<Block>;

/// An unevaluated expression term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawArg {
    Empty,
    Func(CallId),
    Unary { op: EmbedOp, operand: ExprId },
    Binary { op: EmbedOp, left: ExprId, right: ExprId },
    Ternary { cond: ExprId, left: ExprId, right: ExprId },
    /// A base term followed by index/subfield steps, applied in order.
    Query { target: ExprId, queries: Span<SubQuery> },
    Var(NameId),
    Str(StrSpan),
    Uint(u64),
    Int(i64),
    FP(f64),
    Bool(bool),
}

impl RawArg {
    pub fn type_name(&self) -> &'static str {
        match self {
            RawArg::Empty => "empty",
            RawArg::Func(_) => "func-call",
            RawArg::Unary { .. } => "unary-expr",
            RawArg::Binary { .. } => "binary-expr",
            RawArg::Ternary { .. } => "ternary-expr",
            RawArg::Query { .. } => "query-expr",
            RawArg::Var(_) => "variable",
            RawArg::Str(_) => "string",
            RawArg::Uint(_) => "uint",
            RawArg::Int(_) => "int",
            RawArg::FP(_) => "fp",
            RawArg::Bool(_) => "bool",
        }
    }
}

/// One step of a query chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubQuery {
    /// `[expr]`
    Index(ExprId),
    /// `.name`
    Sub(StrSpan),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuncCall {
    pub name: NameId,
    pub args: Span<RawArg>,
    /// Row and column of the call.
    pub pos: (u32, u32),
}

/// How an assignment treats the current value of its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NilCheck {
    /// `=`: no requirement.
    Ignore,
    /// `:=`: the target must not exist.
    RequireNull,
    /// `?=`: skip when the target already holds a value.
    SkipNonNull,
    /// compound operators: the target must exist.
    RequireNonNull,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    pub target: NameId,
    pub queries: Span<SubQuery>,
    /// Right-hand side; compound operators are already folded into a
    /// binary expression reading the target.
    pub expr: ExprId,
    pub check: NilCheck,
    pub pos: (u32, u32),
}

/// A named block whose body is kept as text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBlock {
    pub ty: StrSpan,
    pub name: StrSpan,
    pub source: StrSpan,
    pub file: StrSpan,
    /// Row and column where the body starts.
    pub pos: (u32, u32),
}

/// A named block of statements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    pub info: RawBlock,
    pub items: Span<BlockItem>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statement {
    Assignment(AssignId),
    FuncCall(CallId),
    RawBlock(RawBlockId),
    Block(BlockId),
}

/// A statement with the meta calls written in front of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockItem {
    pub stmt: Statement,
    /// `@name(...)`, run before the statement.
    pub metas: Span<FuncCall>,
    /// `@@name(...)`, run after the statement.
    pub post_metas: Span<FuncCall>,
}

/// Arena-backed storage for one parsed source.
#[derive(Default)]
pub struct Ast {
    exprs: Arena<RawArg>,
    queries: Arena<SubQuery>,
    calls: Arena<FuncCall>,
    names: Arena<QualifiedName>,
    name_lookup: FxHashMap<(u8, Box<str>), NameId>,
    assigns: Arena<Assignment>,
    raw_blocks: Arena<RawBlock>,
    blocks: Arena<Block>,
    items: Arena<BlockItem>,
    pool: MemoryPool,
}

impl std::fmt::Debug for Ast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ast")
            .field("exprs", &self.exprs.len())
            .field("calls", &self.calls.len())
            .field("names", &self.names.len())
            .field("blocks", &self.blocks.len())
            .field("pool", &self.pool)
            .finish()
    }
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trunk_size(trunk_size: usize) -> Self {
        Ast { pool: MemoryPool::new(trunk_size), ..Self::default() }
    }

    // ── Building ──────────────────────────────────────────────────────────────

    pub fn push_expr(&mut self, arg: RawArg) -> ExprId {
        self.exprs.alloc(arg)
    }

    pub fn push_exprs(&mut self, args: impl IntoIterator<Item = RawArg>) -> Span<RawArg> {
        self.exprs.alloc_slice(args)
    }

    pub fn push_queries(&mut self, queries: impl IntoIterator<Item = SubQuery>) -> Span<SubQuery> {
        self.queries.alloc_slice(queries)
    }

    pub fn push_call(&mut self, call: FuncCall) -> CallId {
        self.calls.alloc(call)
    }

    pub fn push_calls(&mut self, calls: impl IntoIterator<Item = FuncCall>) -> Span<FuncCall> {
        self.calls.alloc_slice(calls)
    }

    pub fn push_str(&mut self, s: &str) -> StrSpan {
        self.pool.alloc_str(s)
    }

    pub fn push_assign(&mut self, assign: Assignment) -> AssignId {
        self.assigns.alloc(assign)
    }

    pub fn push_raw_block(&mut self, block: RawBlock) -> RawBlockId {
        self.raw_blocks.alloc(block)
    }

    pub fn push_block(&mut self, block: Block) -> BlockId {
        self.blocks.alloc(block)
    }

    pub fn push_items(&mut self, items: impl IntoIterator<Item = BlockItem>) -> Span<BlockItem> {
        self.items.alloc_slice(items)
    }

    /// Intern a variable reference written in source (scope prefix included).
    pub fn intern_var(&mut self, text: &str) -> Result<NameId, NameError> {
        self.intern(0, text, || QualifiedName::var(text))
    }

    pub fn intern_func(&mut self, text: &str, kind: FuncKind) -> Result<NameId, NameError> {
        let tag = match kind {
            FuncKind::Plain => 1,
            FuncKind::Meta => 2,
            FuncKind::ExprPart => 3,
        };
        self.intern(tag, text, || QualifiedName::func(text, kind))
    }

    fn intern(
        &mut self,
        tag: u8,
        text: &str,
        make: impl FnOnce() -> Result<QualifiedName, NameError>,
    ) -> Result<NameId, NameError> {
        let key = (tag, Box::from(text));
        if let Some(id) = self.name_lookup.get(&key) {
            return Ok(*id);
        }
        let id = self.names.alloc(make()?);
        self.name_lookup.insert(key, id);
        Ok(id)
    }

    // ── Reading ───────────────────────────────────────────────────────────────

    pub fn expr(&self, id: ExprId) -> RawArg {
        *self.exprs.get(id)
    }

    pub fn exprs(&self, span: Span<RawArg>) -> &[RawArg] {
        self.exprs.slice(span)
    }

    pub fn queries(&self, span: Span<SubQuery>) -> &[SubQuery] {
        self.queries.slice(span)
    }

    pub fn call(&self, id: CallId) -> &FuncCall {
        self.calls.get(id)
    }

    pub fn calls(&self, span: Span<FuncCall>) -> &[FuncCall] {
        self.calls.slice(span)
    }

    pub fn name(&self, id: NameId) -> &QualifiedName {
        self.names.get(id)
    }

    pub fn text(&self, span: StrSpan) -> &str {
        self.pool.get_str(span)
    }

    pub fn assignment(&self, id: AssignId) -> &Assignment {
        self.assigns.get(id)
    }

    pub fn raw_block(&self, id: RawBlockId) -> &RawBlock {
        self.raw_blocks.get(id)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        self.blocks.get(id)
    }

    pub fn items(&self, span: Span<BlockItem>) -> &[BlockItem] {
        self.items.slice(span)
    }

    /// `(used, total)` bytes of the text pool.
    pub fn pool_usage(&self) -> (usize, usize) {
        self.pool.usage()
    }

    /// Name of the block or raw block a statement introduces, for diagnostics.
    pub fn describe_statement(&self, stmt: Statement) -> String {
        match stmt {
            Statement::Assignment(id) => self.name(self.assignment(id).target).var_source(),
            Statement::FuncCall(id) => self.name(self.call(id).name).to_string(),
            Statement::RawBlock(id) => self.text(self.raw_block(id).name).to_owned(),
            Statement::Block(id) => self.text(self.block(id).info.name).to_owned(),
        }
    }
}

/// A parsed program: its ast plus the root block.
#[derive(Debug, Clone)]
pub struct Program {
    pub ast: Rc<Ast>,
    pub root: BlockId,
}

impl Program {
    pub fn root_block(&self) -> &Block {
        self.ast.block(self.root)
    }

    /// The top-level statements.
    pub fn items(&self) -> &[BlockItem] {
        self.ast.items(self.root_block().items)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nailang::name::VarScope;

    #[test]
    fn names_are_interned_per_role() {
        let mut ast = Ast::new();
        let a = ast.intern_var("a.b").unwrap();
        let b = ast.intern_var("a.b").unwrap();
        let root = ast.intern_var("`a.b").unwrap();
        let func = ast.intern_func("a.b", FuncKind::Plain).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, root);
        assert_ne!(a, func);
        assert_eq!(ast.name(root).scope(), VarScope::Root);
        assert_eq!(ast.name(root).as_str(), "a.b");
        assert!(ast.intern_var("a..b").is_err());
    }

    #[test]
    fn compound_nodes_refer_by_index() {
        let mut ast = Ast::new();
        let one = ast.push_expr(RawArg::Uint(1));
        let two = ast.push_expr(RawArg::Uint(2));
        let sum = ast.push_expr(RawArg::Binary { op: EmbedOp::Add, left: one, right: two });
        match ast.expr(sum) {
            RawArg::Binary { left, right, .. } => {
                assert_eq!(ast.expr(left), RawArg::Uint(1));
                assert_eq!(ast.expr(right), RawArg::Uint(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn texts_live_in_the_pool() {
        let mut ast = Ast::with_trunk_size(16);
        let s = ast.push_str("a string longer than one trunk");
        assert_eq!(ast.text(s), "a string longer than one trunk");
        let (used, total) = ast.pool_usage();
        assert!(used <= total);
    }
}
