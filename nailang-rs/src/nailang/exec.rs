//! Statement executor and expression evaluator.
//!
//! [`NailangRuntime`] owns the root scope and the frame stack.  A host plugs
//! in through [`RuntimeHost`]: unknown variables, unknown functions, unknown
//! meta functions and raw blocks are forwarded to it.
//!
//! Function calls resolve in this order: script-defined functions, engine
//! built-ins, the host, the `Math.*` extension.  Anything left is an error.

use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use super::ast::{Assignment, Ast, BlockId, BlockItem, FuncCall, NilCheck, Program, RawArg, RawBlock, Statement, SubQuery};
use super::arena::Span;
use super::builtins::{call_builtin, call_math};
use super::context::{self, ContextKind, EvaluateContext, LocalFunc, Scope, ScopeRef};
use super::error::{ExceptionTarget, NailangError, RuntimeError};
use super::frame::{Frame, FrameFlags, FrameStack, ProgramStatus};
use super::name::QualifiedName;
use super::parser::parse_expression;
use super::serialize::{stringify, stringify_call};
use super::token::EmbedOp;
use super::value::{Arg, ArenaStr};

/// Answer of a meta function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaResult {
    /// Not recognized; execution continues.
    Unhandled,
    Next,
    /// Do not execute the annotated statement.
    Skip,
    /// Stop the enclosing block.
    Return,
}

/// Hooks through which a host extends the language.
pub trait RuntimeHost {
    /// Called for variables not found in any scope.
    fn lookup_var(&mut self, _name: &QualifiedName) -> Option<Arg> {
        None
    }

    /// Called for functions the engine does not know.  `Ok(None)` means "not
    /// mine either".
    fn call_func(
        &mut self,
        _rt: &mut NailangRuntime,
        _name: &QualifiedName,
        _args: &[Arg],
    ) -> Result<Option<Arg>, RuntimeError> {
        Ok(None)
    }

    /// Called for meta functions the engine does not know.  `post` is set for
    /// `@@name(...)` metas, which run after the statement.
    fn handle_meta(
        &mut self,
        _rt: &mut NailangRuntime,
        _meta: &FuncCall,
        _item: &BlockItem,
        _post: bool,
    ) -> Result<MetaResult, RuntimeError> {
        Ok(MetaResult::Unhandled)
    }

    /// Called for each raw block statement, with the metas written before it.
    fn on_raw_block(
        &mut self,
        _rt: &mut NailangRuntime,
        _block: &RawBlock,
        _metas: &[FuncCall],
    ) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// A host that adds nothing.
#[derive(Debug, Default)]
pub struct NoHost;

impl RuntimeHost for NoHost {}

/// Scope storage used by a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub root_context: ContextKind,
    pub child_context: ContextKind,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions { root_context: ContextKind::Large, child_context: ContextKind::Compact }
    }
}

/// A resolved query step.
enum QueryKey<'a> {
    Index(Arg),
    Field(&'a str),
}

pub struct NailangRuntime {
    /// Program whose nodes are currently being executed.
    ast: Rc<Ast>,
    frames: FrameStack,
    root: ScopeRef,
    options: RuntimeOptions,
}

impl Default for NailangRuntime {
    fn default() -> Self {
        Self::new(RuntimeOptions::default())
    }
}

impl NailangRuntime {
    pub fn new(options: RuntimeOptions) -> Self {
        NailangRuntime {
            ast: Rc::new(Ast::new()),
            frames: FrameStack::new(),
            root: Scope::root(options.root_context),
            options,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// The program currently executing; hosts read meta arguments from it.
    pub fn ast(&self) -> &Rc<Ast> {
        &self.ast
    }

    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    pub fn root_scope(&self) -> &ScopeRef {
        &self.root
    }

    pub fn current_scope(&self) -> ScopeRef {
        self.frames.current().map_or_else(|| self.root.clone(), |f| f.scope.clone())
    }

    /// Read a variable by its source name (`x`, `` `x ``, `:x`).
    pub fn get_var(&self, name: &str) -> Option<Arg> {
        let name = QualifiedName::var(name).ok()?;
        context::lookup_arg(&self.current_scope(), &name).filter(|a| !a.is_empty())
    }

    /// Set a variable by its source name, creating it when absent.
    pub fn set_var(&mut self, name: &str, value: Arg) -> Result<(), RuntimeError> {
        let name = QualifiedName::var(name).map_err(|e| RuntimeError::new(e.to_string()))?;
        context::assign_arg(&self.current_scope(), &name, value);
        Ok(())
    }

    /// Run `f` inside a call frame with a fresh child of the current scope.
    pub fn with_child_scope<R>(&mut self, label: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        let scope = Scope::child(&self.current_scope(), self.options.child_context);
        self.frames.push(Frame::new(FrameFlags::FUNC_CALL, scope, label));
        let result = f(self);
        self.frames.pop();
        result
    }

    // ── Programs and blocks ───────────────────────────────────────────────────

    /// Run every top-level item of `program`.  Top-level blocks share the root
    /// scope; nested blocks get their own.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn execute_program(&mut self, host: &mut dyn RuntimeHost, program: &Program) -> Result<(), RuntimeError> {
        let prev = mem::replace(&mut self.ast, program.ast.clone());
        self.frames.push(Frame::new(FrameFlags::FUNC_CALL, self.root.clone(), "program"));
        let result = self.execute_items(host, &program.ast, program.root_block().items);
        self.frames.pop();
        self.ast = prev;
        result
    }

    /// Run a block of the current program.  `inner_scope` gives it a child
    /// scope; otherwise it writes into the enclosing scope and `$Return`
    /// stops at it.
    pub fn execute_block(
        &mut self,
        host: &mut dyn RuntimeHost,
        block: BlockId,
        inner_scope: bool,
    ) -> Result<(), RuntimeError> {
        let ast = self.ast.clone();
        let info = ast.block(block);
        let label = format!("{} [{}]", ast.text(info.info.ty), ast.text(info.info.name));
        let frame = if inner_scope {
            let scope = Scope::child(&self.current_scope(), self.options.child_context);
            Frame::new(FrameFlags::VAR_SCOPE, scope, label)
        } else {
            Frame::new(FrameFlags::FLOW_SCOPE, self.current_scope(), label)
        };
        self.frames.push(frame);
        let result = self.execute_items(host, &ast, info.items);
        self.frames.pop();
        result
    }

    fn execute_items(
        &mut self,
        host: &mut dyn RuntimeHost,
        ast: &Rc<Ast>,
        items: Span<BlockItem>,
    ) -> Result<(), RuntimeError> {
        for item in ast.items(items) {
            self.execute_item(host, ast, item).map_err(|e| self.decorate(e))?;
            if self.frames.status() != ProgramStatus::Next {
                break;
            }
        }
        Ok(())
    }

    /// Fill in the frame chain of an error raised in the current frame.
    fn decorate(&self, mut err: RuntimeError) -> RuntimeError {
        if err.stack.is_empty() {
            err.stack = self.frames.collect_stacks();
        }
        if err.scope.is_empty() {
            if let Some(frame) = self.frames.current() {
                err.scope = ExceptionTarget::Block(frame.label.clone());
            }
        }
        err
    }

    fn execute_item(&mut self, host: &mut dyn RuntimeHost, ast: &Rc<Ast>, item: &BlockItem) -> Result<(), RuntimeError> {
        self.run_with_metas(host, ast, item, ast.calls(item.metas))
    }

    /// Apply `metas` in order, then the statement and its post metas.
    fn run_with_metas(
        &mut self,
        host: &mut dyn RuntimeHost,
        ast: &Rc<Ast>,
        item: &BlockItem,
        metas: &[FuncCall],
    ) -> Result<(), RuntimeError> {
        for (i, meta) in metas.iter().enumerate() {
            if ast.name(meta.name).as_str() == "While" {
                return self.run_while(host, ast, item, meta, &metas[i + 1..]);
            }
            let result = self
                .apply_meta(host, ast, meta, item)
                .map_err(|e| e.or_target(|| ExceptionTarget::FuncCall(stringify_call(ast, meta))))?;
            match result {
                MetaResult::Unhandled => debug!(meta = %ast.name(meta.name), "unhandled meta function"),
                MetaResult::Next => {}
                MetaResult::Skip => {
                    trace!(statement = %ast.describe_statement(item.stmt), "statement skipped");
                    return Ok(());
                }
                MetaResult::Return => {
                    self.frames.set_block_end();
                    return Ok(());
                }
            }
        }

        self.execute_statement(host, ast, item)?;

        for meta in ast.calls(item.post_metas) {
            if self.frames.status() != ProgramStatus::Next {
                break;
            }
            match host.handle_meta(self, meta, item, true)? {
                MetaResult::Return => self.frames.set_block_end(),
                MetaResult::Unhandled => debug!(meta = %ast.name(meta.name), "unhandled post meta function"),
                MetaResult::Next | MetaResult::Skip => {}
            }
        }
        Ok(())
    }

    fn execute_statement(&mut self, host: &mut dyn RuntimeHost, ast: &Rc<Ast>, item: &BlockItem) -> Result<(), RuntimeError> {
        trace!(statement = %ast.describe_statement(item.stmt), "execute");
        match item.stmt {
            Statement::Assignment(id) => {
                let assign = *ast.assignment(id);
                self.execute_assign(host, ast, &assign).map_err(|e| {
                    e.or_target(|| ExceptionTarget::Assignment(ast.name(assign.target).var_source()))
                })
            }
            Statement::FuncCall(id) => self.call_function(host, ast.call(id)).map(|_| ()),
            Statement::RawBlock(id) => {
                let block = *ast.raw_block(id);
                host.on_raw_block(self, &block, ast.calls(item.metas))
                    .map_err(|e| e.or_target(|| ExceptionTarget::RawBlock(ast.text(block.name).to_owned())))
            }
            Statement::Block(id) => {
                let inner_scope = self.frames.len() > 1;
                self.execute_block(host, id, inner_scope)
            }
        }
    }

    // ── Meta functions ────────────────────────────────────────────────────────

    fn apply_meta(
        &mut self,
        host: &mut dyn RuntimeHost,
        ast: &Rc<Ast>,
        meta: &FuncCall,
        item: &BlockItem,
    ) -> Result<MetaResult, RuntimeError> {
        let name = ast.name(meta.name);
        let args = ast.exprs(meta.args);
        Ok(match name.as_str() {
            "If" => {
                expect_args(name, args, 1, 1)?;
                let cond = self.evaluate_bool(host, args[0])?;
                if let Some(frame) = self.frames.current_mut() {
                    frame.if_record = Some(cond);
                }
                if cond { MetaResult::Next } else { MetaResult::Skip }
            }
            "Else" => {
                expect_args(name, args, 0, 0)?;
                let record = self
                    .frames
                    .current_mut()
                    .and_then(|f| f.if_record.take())
                    .ok_or_else(|| RuntimeError::new("@Else without a preceding @If"))?;
                if record { MetaResult::Skip } else { MetaResult::Next }
            }
            "Skip" => {
                expect_args(name, args, 0, 1)?;
                let skip = match args.first() {
                    Some(arg) => self.evaluate_bool(host, *arg)?,
                    None => true,
                };
                if skip { MetaResult::Skip } else { MetaResult::Next }
            }
            "DefFunc" => {
                self.define_func(host, ast, meta, item)?;
                MetaResult::Skip
            }
            "Capture" => MetaResult::Next,
            _ => host.handle_meta(self, meta, item, false)?,
        })
    }

    /// `@DefFunc(params...)` turns the annotated block into a function named
    /// after the block.  `@Capture(vars...)` on the same statement binds
    /// current values into it.
    fn define_func(
        &mut self,
        host: &mut dyn RuntimeHost,
        ast: &Rc<Ast>,
        meta: &FuncCall,
        item: &BlockItem,
    ) -> Result<(), RuntimeError> {
        let Statement::Block(body) = item.stmt else {
            return Err(RuntimeError::new("@DefFunc can only be applied to a block"));
        };
        let params = ast
            .exprs(meta.args)
            .iter()
            .map(|arg| match arg {
                RawArg::Var(id) => Ok(ast.name(*id).as_str().to_owned()),
                other => Err(RuntimeError::new(format!(
                    "@DefFunc parameters must be variable names, got {}",
                    other.type_name()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut captures = Vec::new();
        for capture in ast.calls(item.metas).iter().filter(|m| ast.name(m.name).as_str() == "Capture") {
            for arg in ast.exprs(capture.args) {
                let RawArg::Var(id) = arg else {
                    return Err(RuntimeError::new("@Capture only accepts variables"));
                };
                let var = ast.name(*id);
                let value = self.lookup_var(host, var)?;
                captures.push((var.as_str().to_owned(), value));
            }
        }

        let name = ast.text(ast.block(body).info.name).to_owned();
        debug!(func = %name, params = params.len(), captures = captures.len(), "define function");
        let scope = self.current_scope();
        let func = LocalFunc { name: name.clone(), ast: ast.clone(), body, params, captures, scope: Rc::downgrade(&scope) };
        scope.borrow_mut().store.set_func(&name, Rc::new(func));
        Ok(())
    }

    /// `@While(cond)`: repeat the remaining metas and the statement while
    /// `cond` holds.
    fn run_while(
        &mut self,
        host: &mut dyn RuntimeHost,
        ast: &Rc<Ast>,
        item: &BlockItem,
        meta: &FuncCall,
        rest: &[FuncCall],
    ) -> Result<(), RuntimeError> {
        let args = ast.exprs(meta.args);
        expect_args(ast.name(meta.name), args, 1, 1)?;
        let cond = args[0];
        let label = format!("loop {}", ast.describe_statement(item.stmt));
        self.frames.push(Frame::new(FrameFlags::LOOP_SCOPE, self.current_scope(), label));
        let result = self.drive_loop(host, ast, item, cond, rest);
        self.frames.pop();
        result
    }

    fn drive_loop(
        &mut self,
        host: &mut dyn RuntimeHost,
        ast: &Rc<Ast>,
        item: &BlockItem,
        cond: RawArg,
        rest: &[FuncCall],
    ) -> Result<(), RuntimeError> {
        let mut rounds = 0u64;
        while self.evaluate_bool(host, cond)? {
            rounds += 1;
            self.run_with_metas(host, ast, item, rest)?;
            match self.frames.status() {
                ProgramStatus::Next => {}
                ProgramStatus::LoopEnd => break,
                ProgramStatus::End => {
                    // `$Continue` ends only the loop frame; a return also ends its parent
                    if self.frames.parent_status() != ProgramStatus::Next {
                        break;
                    }
                    if let Some(frame) = self.frames.current_mut() {
                        frame.status = ProgramStatus::Next;
                    }
                }
            }
        }
        trace!(rounds, "loop finished");
        Ok(())
    }

    // ── Assignment ────────────────────────────────────────────────────────────

    fn execute_assign(&mut self, host: &mut dyn RuntimeHost, ast: &Rc<Ast>, assign: &Assignment) -> Result<(), RuntimeError> {
        let name = ast.name(assign.target);
        if !assign.queries.is_empty() {
            return self.assign_query(host, ast, assign);
        }
        let scope = self.current_scope();
        let exists = context::lookup_arg(&scope, name).is_some_and(|a| !a.is_empty());
        match assign.check {
            NilCheck::RequireNull if exists => {
                return Err(RuntimeError::new(format!("variable [{}] already exists", name.var_source())));
            }
            NilCheck::SkipNonNull if exists => {
                trace!(var = %name.var_source(), "already set, assignment skipped");
                return Ok(());
            }
            NilCheck::RequireNonNull if !exists => {
                return Err(RuntimeError::new(format!("variable [{}] not found", name.var_source())));
            }
            _ => {}
        }
        let value = self.evaluate(host, ast.expr(assign.expr))?;
        context::assign_arg(&scope, name, value);
        Ok(())
    }

    /// `var[q1]...[qn] = value`: walk to the last step, then let the owning
    /// custom value store it.
    fn assign_query(&mut self, host: &mut dyn RuntimeHost, ast: &Rc<Ast>, assign: &Assignment) -> Result<(), RuntimeError> {
        let name = ast.name(assign.target);
        let queries = ast.queries(assign.queries);
        let Some((last, path)) = queries.split_last() else {
            return Ok(());
        };
        let mut base = self.lookup_var(host, name)?;
        for query in path {
            base = self
                .query_step(host, ast, &base, *query)?
                .ok_or_else(|| RuntimeError::new(format!("query on [{}] found nothing", name.var_source())))?;
        }
        let key = self.resolve_key(host, ast, *last)?;
        let current = get_by_key(&base, &key)?.filter(|a| !a.is_empty());
        let exists = current.is_some();
        match assign.check {
            NilCheck::RequireNull if exists => return Err(RuntimeError::new("query target already has a value")),
            NilCheck::SkipNonNull if exists => return Ok(()),
            NilCheck::RequireNonNull if !exists => return Err(RuntimeError::new("query target has no value")),
            _ => {}
        }
        let value = match (assign.check, ast.expr(assign.expr)) {
            // `t[k] op= v` folds to `t[k] op v`; reuse the slot found above so
            // the query is evaluated once
            (NilCheck::RequireNonNull, RawArg::Binary { op, right, .. }) => {
                self.combine(host, op, current.unwrap_or_default(), ast.expr(right))?
            }
            (_, rhs) => self.evaluate(host, rhs)?,
        };
        let Arg::Custom(var) = &base else {
            return Err(RuntimeError::new(format!("cannot assign through a query on {}", base.type_name())));
        };
        let stored = match key {
            QueryKey::Index(index) => var.handler.indexer_setter(var, &index, value)?,
            QueryKey::Field(field) => var.handler.subfield_setter(var, field, value)?,
        };
        if !stored {
            return Err(RuntimeError::new(format!("{} rejected the assignment", var.handler.type_name())));
        }
        Ok(())
    }

    /// `current op right`, short-circuiting `&&` and `||`.
    fn combine(
        &mut self,
        host: &mut dyn RuntimeHost,
        op: EmbedOp,
        current: Arg,
        right: RawArg,
    ) -> Result<Arg, RuntimeError> {
        if matches!(op, EmbedOp::And | EmbedOp::Or) {
            let lhs = current
                .get_bool()
                .ok_or_else(|| RuntimeError::new(format!("expect a condition, got {}", current.type_name())))?;
            if (op == EmbedOp::And) != lhs {
                return Ok(Arg::Bool(lhs));
            }
            return Ok(Arg::Bool(self.evaluate_bool(host, right)?));
        }
        let rhs = self.evaluate(host, right)?;
        current.binary(op, &rhs).map_err(RuntimeError::new)
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    /// Evaluate an expression of the current program.
    pub fn evaluate(&mut self, host: &mut dyn RuntimeHost, arg: RawArg) -> Result<Arg, RuntimeError> {
        let ast = self.ast.clone();
        self.eval(host, &ast, arg)
            .map_err(|e| e.or_target(|| ExceptionTarget::Expr(stringify(&ast, arg))))
    }

    /// Evaluate every argument of a call.
    pub fn evaluate_args(&mut self, host: &mut dyn RuntimeHost, call: &FuncCall) -> Result<Vec<Arg>, RuntimeError> {
        let ast = self.ast.clone();
        ast.exprs(call.args).iter().map(|arg| self.evaluate(host, *arg)).collect()
    }

    fn evaluate_bool(&mut self, host: &mut dyn RuntimeHost, arg: RawArg) -> Result<bool, RuntimeError> {
        let value = self.evaluate(host, arg)?;
        value
            .get_bool()
            .ok_or_else(|| RuntimeError::new(format!("expect a condition, got {}", value.type_name())))
    }

    fn eval(&mut self, host: &mut dyn RuntimeHost, ast: &Rc<Ast>, arg: RawArg) -> Result<Arg, RuntimeError> {
        Ok(match arg {
            RawArg::Empty => Arg::Empty,
            RawArg::Uint(v) => Arg::Uint(v),
            RawArg::Int(v) => Arg::Int(v),
            RawArg::FP(v) => Arg::FP(v),
            RawArg::Bool(v) => Arg::Bool(v),
            RawArg::Str(span) => Arg::View(ArenaStr::new(ast.clone(), span)),
            RawArg::Var(id) => self.lookup_var(host, ast.name(id))?,
            RawArg::Func(id) => self.call_function(host, ast.call(id))?,
            RawArg::Unary { op: EmbedOp::CheckExist, operand } => {
                let operand = ast.expr(operand);
                if !matches!(operand, RawArg::Var(_) | RawArg::Query { .. }) {
                    return Err(RuntimeError::new("'?' needs a variable or query"));
                }
                Arg::Bool(self.try_evaluate(host, ast, operand)?.is_some())
            }
            RawArg::Unary { op, operand } => {
                let value = self.evaluate(host, ast.expr(operand))?;
                value.unary(op).map_err(RuntimeError::new)?
            }
            RawArg::Binary { op: op @ (EmbedOp::And | EmbedOp::Or), left, right } => {
                let lhs = self.evaluate_bool(host, ast.expr(left))?;
                if (op == EmbedOp::And) != lhs {
                    return Ok(Arg::Bool(lhs));
                }
                Arg::Bool(self.evaluate_bool(host, ast.expr(right))?)
            }
            RawArg::Binary { op: EmbedOp::ValueOr, left, right } => match self.try_evaluate(host, ast, ast.expr(left))? {
                Some(value) => value,
                None => self.evaluate(host, ast.expr(right))?,
            },
            RawArg::Binary { op, left, right } => {
                let lhs = self.evaluate(host, ast.expr(left))?;
                let rhs = self.evaluate(host, ast.expr(right))?;
                lhs.binary(op, &rhs).map_err(RuntimeError::new)?
            }
            RawArg::Ternary { cond, left, right } => {
                let branch = if self.evaluate_bool(host, ast.expr(cond))? { left } else { right };
                self.evaluate(host, ast.expr(branch))?
            }
            RawArg::Query { target, queries } => {
                let mut value = self.evaluate(host, ast.expr(target))?;
                for query in ast.queries(queries) {
                    value = self.query_step(host, ast, &value, *query)?.ok_or_else(|| {
                        RuntimeError::new(format!("query [{}] found nothing on {}", describe_query(ast, query), value.type_name()))
                    })?;
                }
                value
            }
        })
    }

    /// Like [`Self::eval`], but a missing variable or query result gives
    /// `None` instead of an error.
    fn try_evaluate(&mut self, host: &mut dyn RuntimeHost, ast: &Rc<Ast>, arg: RawArg) -> Result<Option<Arg>, RuntimeError> {
        let value = match arg {
            RawArg::Var(id) => self.try_lookup_var(host, ast.name(id)),
            RawArg::Query { target, queries } => {
                let Some(mut value) = self.try_evaluate(host, ast, ast.expr(target))? else {
                    return Ok(None);
                };
                for query in ast.queries(queries) {
                    match self.query_step(host, ast, &value, *query)? {
                        Some(next) => value = next,
                        None => return Ok(None),
                    }
                }
                Some(value)
            }
            other => Some(self.evaluate(host, other)?),
        };
        Ok(value.filter(|v| !v.is_empty()))
    }

    fn try_lookup_var(&mut self, host: &mut dyn RuntimeHost, name: &QualifiedName) -> Option<Arg> {
        context::lookup_arg(&self.current_scope(), name)
            .filter(|a| !a.is_empty())
            .or_else(|| host.lookup_var(name))
    }

    fn lookup_var(&mut self, host: &mut dyn RuntimeHost, name: &QualifiedName) -> Result<Arg, RuntimeError> {
        self.try_lookup_var(host, name)
            .ok_or_else(|| RuntimeError::new(format!("variable [{}] not found", name.var_source())))
    }

    fn resolve_key<'a>(&mut self, host: &mut dyn RuntimeHost, ast: &'a Ast, query: SubQuery) -> Result<QueryKey<'a>, RuntimeError> {
        Ok(match query {
            SubQuery::Index(expr) => QueryKey::Index(self.evaluate(host, ast.expr(expr))?),
            SubQuery::Sub(field) => QueryKey::Field(ast.text(field)),
        })
    }

    fn query_step(
        &mut self,
        host: &mut dyn RuntimeHost,
        ast: &Rc<Ast>,
        base: &Arg,
        query: SubQuery,
    ) -> Result<Option<Arg>, RuntimeError> {
        let key = self.resolve_key(host, ast, query)?;
        get_by_key(base, &key)
    }

    // ── Function calls ────────────────────────────────────────────────────────

    fn call_function(&mut self, host: &mut dyn RuntimeHost, call: &FuncCall) -> Result<Arg, RuntimeError> {
        let ast = self.ast.clone();
        self.dispatch_call(host, &ast, call)
            .map_err(|e| e.or_target(|| ExceptionTarget::FuncCall(stringify_call(&ast, call))))
    }

    fn dispatch_call(&mut self, host: &mut dyn RuntimeHost, ast: &Rc<Ast>, call: &FuncCall) -> Result<Arg, RuntimeError> {
        let name = ast.name(call.name);
        let raw_args = ast.exprs(call.args);

        if let Some(func) = context::lookup_func(&self.current_scope(), name.as_str()) {
            let args = self.evaluate_args(host, call)?;
            return self.call_local(host, func, args);
        }

        // built-ins that look at their arguments unevaluated
        match name.as_str() {
            "Exists" => {
                expect_args(name, raw_args, 1, 1)?;
                return Ok(Arg::Bool(self.try_evaluate(host, ast, raw_args[0])?.is_some()));
            }
            "ValueOr" => {
                expect_args(name, raw_args, 2, 2)?;
                return match self.try_evaluate(host, ast, raw_args[0])? {
                    Some(value) => Ok(value),
                    None => self.evaluate(host, raw_args[1]),
                };
            }
            _ => {}
        }

        let args = self.evaluate_args(host, call)?;
        match name.as_str() {
            "Return" => {
                expect_args(name, raw_args, 0, 1)?;
                self.frames.set_return(args.into_iter().next());
                return Ok(Arg::Empty);
            }
            "Break" => {
                expect_args(name, raw_args, 0, 0)?;
                self.frames.set_break().map_err(RuntimeError::new)?;
                return Ok(Arg::Empty);
            }
            "Continue" => {
                expect_args(name, raw_args, 0, 0)?;
                self.frames.set_continue().map_err(RuntimeError::new)?;
                return Ok(Arg::Empty);
            }
            "Throw" => {
                expect_args(name, raw_args, 1, 1)?;
                let message = args[0].to_string();
                return Err(RuntimeError::new(message.clone()).with_target(ExceptionTarget::Arg(message)));
            }
            _ => {}
        }
        if let Some(result) = call_builtin(name.as_str(), &args) {
            return result.map_err(RuntimeError::new);
        }
        if let Some(value) = host.call_func(self, name, &args)? {
            return Ok(value);
        }
        if let Some(result) = call_math(name.as_str(), &args) {
            return result.map_err(RuntimeError::new);
        }
        Err(RuntimeError::new(format!("unknown function [{name}]")))
    }

    fn call_local(&mut self, host: &mut dyn RuntimeHost, func: Rc<LocalFunc>, args: Vec<Arg>) -> Result<Arg, RuntimeError> {
        if args.len() != func.params.len() {
            return Err(RuntimeError::new(format!(
                "function [{}] expects {} args, got {}",
                func.name,
                func.params.len(),
                args.len()
            )));
        }
        let parent = func.scope.upgrade().unwrap_or_else(|| self.root.clone());
        let scope = Scope::child(&parent, self.options.child_context);
        {
            let mut scope = scope.borrow_mut();
            let bindings = func.captures.iter().cloned().chain(func.params.iter().cloned().zip(args));
            for (name, value) in bindings {
                if let Some(slot) = scope.store.locate_arg(&name, true) {
                    *slot = value;
                }
            }
        }

        let prev = mem::replace(&mut self.ast, func.ast.clone());
        self.frames.push(Frame::new(FrameFlags::FUNC_CALL, scope, format!("call {}", func.name)));
        let items = func.ast.block(func.body).items;
        let result = self.execute_items(host, &func.ast, items);
        let frame = self.frames.pop();
        self.ast = prev;
        result?;
        Ok(frame.and_then(|f| f.return_arg).unwrap_or_default())
    }

    // ── Raw statements ────────────────────────────────────────────────────────

    /// Parse and evaluate a single `expr;` in the current scope.
    pub fn evaluate_raw_statement(&mut self, host: &mut dyn RuntimeHost, src: &str) -> Result<Arg, NailangError> {
        let mut ast = Ast::new();
        let arg = parse_expression(src, &mut ast)?;
        let ast = Rc::new(ast);
        let prev = mem::replace(&mut self.ast, ast);
        let result = match arg {
            Some(arg) => self.evaluate(host, arg).map(Arg::into_owned),
            None => Ok(Arg::Empty),
        };
        self.ast = prev;
        Ok(result?)
    }
}

fn expect_args(name: &QualifiedName, args: &[RawArg], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { format!("{min}") } else { format!("{min} to {max}") };
        return Err(RuntimeError::new(format!("[{name}] expects {expected} args, got {}", args.len())));
    }
    Ok(())
}

fn get_by_key(base: &Arg, key: &QueryKey<'_>) -> Result<Option<Arg>, RuntimeError> {
    match (base, key) {
        (Arg::Custom(var), QueryKey::Index(index)) => var.handler.indexer_getter(var, index),
        (Arg::Custom(var), QueryKey::Field(field)) => var.handler.subfield_getter(var, field),
        (_, QueryKey::Index(index)) if base.is_str() => base.index_str(index).map(Some).map_err(RuntimeError::new),
        (_, QueryKey::Index(_)) => Err(RuntimeError::new(format!("cannot index into {}", base.type_name()))),
        (_, QueryKey::Field(field)) => Ok(base.subfield(field)),
    }
}

fn describe_query(ast: &Ast, query: &SubQuery) -> String {
    match query {
        SubQuery::Index(expr) => format!("[{}]", stringify(ast, ast.expr(*expr))),
        SubQuery::Sub(field) => format!(".{}", ast.text(*field)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::nailang::custom::{CustomHandler, CustomVar};
    use crate::nailang::parser::{parse_program, parse_statements};

    fn run(src: &str) -> NailangRuntime {
        let mut rt = NailangRuntime::default();
        let prog = parse_program(src, "test.nl").unwrap();
        rt.execute_program(&mut NoHost, &prog).unwrap();
        rt
    }

    fn run_err(src: &str) -> RuntimeError {
        let mut rt = NailangRuntime::default();
        let prog = parse_program(src, "test.nl").unwrap();
        rt.execute_program(&mut NoHost, &prog).unwrap_err()
    }

    fn eval(rt: &mut NailangRuntime, src: &str) -> Arg {
        rt.evaluate_raw_statement(&mut NoHost, src).unwrap()
    }

    #[test]
    fn expressions() {
        let mut rt = NailangRuntime::default();
        assert_eq!(eval(&mut rt, "1 + 2;"), Arg::Uint(3));
        assert_eq!(eval(&mut rt, "(1 + 2) * -3;"), Arg::Int(-9));
        assert_eq!(eval(&mut rt, "\"ab\" + 1;"), Arg::from("ab1"));
        assert_eq!(eval(&mut rt, "1 < 2 ? \"yes\" : \"no\";"), Arg::from("yes"));
        assert_eq!(eval(&mut rt, "\"hello\"[1];"), Arg::from("e"));
        assert_eq!(eval(&mut rt, "\"hello\".Length;"), Arg::Uint(5));
        assert_eq!(eval(&mut rt, "missing ?? 7;"), Arg::Uint(7));
        assert_eq!(eval(&mut rt, "?missing;"), Arg::Bool(false));
        assert_eq!(eval(&mut rt, "$Math.Max(1, 9, 4);"), Arg::Uint(9));
        assert_eq!(eval(&mut rt, "$Format(\"{}-{}\", 1, true);"), Arg::from("1-true"));
    }

    #[test]
    fn logic_short_circuits() {
        let mut rt = NailangRuntime::default();
        // the right side would fail if evaluated
        assert_eq!(eval(&mut rt, "false && missing;"), Arg::Bool(false));
        assert_eq!(eval(&mut rt, "true || missing;"), Arg::Bool(true));
        let err = rt.evaluate_raw_statement(&mut NoHost, "true && missing;").unwrap_err();
        let NailangError::Runtime(err) = err else { panic!("{err:?}") };
        assert_eq!(err.message, "variable [missing] not found");
        assert_eq!(err.target, ExceptionTarget::Expr("missing".into()));
    }

    #[test]
    fn assignments_and_nil_checks() {
        let rt = run(
            "#Block.Main(\"m\"){
                x = 1;
                y = x + 2;
                y += 10;
                z ?= 5;
                z ?= 6;
                w := \"new\";
            }",
        );
        assert_eq!(rt.get_var("x"), Some(Arg::Uint(1)));
        assert_eq!(rt.get_var("y"), Some(Arg::Uint(13)));
        assert_eq!(rt.get_var("z"), Some(Arg::Uint(5)));
        assert_eq!(rt.get_var("w"), Some(Arg::from("new")));

        let err = run_err("#Block.Main(\"m\"){ a = 1; a := 2; }");
        assert_eq!(err.message, "variable [a] already exists");
        assert_eq!(err.target, ExceptionTarget::Assignment("a".into()));
        assert_eq!(err.scope, ExceptionTarget::Block("Main [m]".into()));

        let err = run_err("#Block.Main(\"m\"){ b += 1; }");
        assert_eq!(err.message, "variable [b] not found");
    }

    #[test]
    fn skip_if_else() {
        let rt = run(
            "#Block.Main(\"m\"){
                @Skip()
                a = 1;
                @Skip(false)
                b = 1;
                @If(b == 1)
                c = 1;
                @Else()
                c = 2;
                @If(b == 2)
                d = 1;
                @Else()
                d = 2;
            }",
        );
        assert_eq!(rt.get_var("a"), None);
        assert_eq!(rt.get_var("b"), Some(Arg::Uint(1)));
        assert_eq!(rt.get_var("c"), Some(Arg::Uint(1)));
        assert_eq!(rt.get_var("d"), Some(Arg::Uint(2)));

        let err = run_err("#Block.Main(\"m\"){ @Else() a = 1; }");
        assert!(err.message.contains("@Else"));
    }

    #[test]
    fn while_loop_with_break_and_continue() {
        let rt = run(
            "#Block.Main(\"m\"){
                i = 0;
                sum = 0;
                @While(true)
                #Block.Body(\"body\"){
                    i += 1;
                    @If(i == 3)
                    $Continue();
                    @If(i > 5)
                    #Block.Exit(\"exit\"){
                        $Break();
                    }
                    sum += i;
                }
                done = true;
            }",
        );
        assert_eq!(rt.get_var("i"), Some(Arg::Uint(6)));
        assert_eq!(rt.get_var("sum"), Some(Arg::Uint(1 + 2 + 4 + 5)));
        assert_eq!(rt.get_var("done"), Some(Arg::Bool(true)));
    }

    #[test]
    fn break_outside_loop_fails() {
        let err = run_err("#Block.Main(\"m\"){ $Break(); }");
        assert_eq!(err.message, "Break outside of a loop");
        assert_eq!(err.target, ExceptionTarget::FuncCall("Break()".into()));
    }

    #[test]
    fn return_ends_block() {
        let rt = run(
            "#Block.Main(\"m\"){
                a = 1;
                $Return();
                a = 2;
            }
            #Block.Next(\"n\"){
                b = a;
            }",
        );
        assert_eq!(rt.get_var("a"), Some(Arg::Uint(1)));
        assert_eq!(rt.get_var("b"), Some(Arg::Uint(1)));
    }

    #[test]
    fn local_functions() {
        let mut rt = NailangRuntime::default();
        let prog = parse_program(
            "#Block.Main(\"m\"){
                base = 100;
                @DefFunc(a, b)
                @Capture(base)
                #Block.Func(\"Add\"){
                    $Return((a + b) + base);
                }
                base = 0;
                r = $Add(1, 2);
                @DefFunc(n)
                #Block.Func(\"Fact\"){
                    @If(n <= 1)
                    $Return(1);
                    $Return(n * $Fact(n - 1));
                }
                f = $Fact(5);
            }",
            "f.nl",
        )
        .unwrap();
        rt.execute_program(&mut NoHost, &prog).unwrap();
        assert_eq!(rt.get_var("r"), Some(Arg::Uint(103)));
        assert_eq!(rt.get_var("f"), Some(Arg::Uint(120)));
        // parameters stay inside the call
        assert_eq!(rt.get_var("a"), None);

        let err = rt.evaluate_raw_statement(&mut NoHost, "$Add(1);").unwrap_err();
        assert!(err.to_string().contains("expects 2 args"), "{err}");
    }

    #[test]
    fn functions_see_their_defining_block() {
        let mut rt = run(
            "#Block.Main(\"m\"){
                #Block.Inner(\"i\"){
                    step = 10;
                    @DefFunc(n)
                    #Block.Func(\"Fact\"){
                        @If(n <= 1)
                        $Return(1);
                        $Return(n * $Fact(n - 1));
                    }
                    @DefFunc(n)
                    #Block.Func(\"Bump\"){
                        $Return($Fact(n) + step);
                    }
                    step = 20;
                    `f = $Fact(3);
                    `g = $Bump(3);
                }
            }",
        );
        assert_eq!(rt.get_var("f"), Some(Arg::Uint(6)));
        assert_eq!(rt.get_var("g"), Some(Arg::Uint(26)));
        // gone with the block that defined it
        assert!(rt.evaluate_raw_statement(&mut NoHost, "$Fact(2);").is_err());
    }

    #[test]
    fn break_inside_function_stays_in_the_call() {
        let err = run_err(
            "#Block.Main(\"m\"){
                @DefFunc()
                #Block.Func(\"Stop\"){
                    $Break();
                }
                i = 0;
                @While(i < 3)
                #Block.Body(\"b\"){
                    i += 1;
                    $Stop();
                }
            }",
        );
        assert_eq!(err.message, "Break outside of a loop");

        let rt = run(
            "#Block.Main(\"m\"){
                @DefFunc(n)
                #Block.Func(\"Twice\"){
                    $Return(n * 2);
                }
                i = 0;
                sum = 0;
                @While(i < 3)
                #Block.Body(\"b\"){
                    i += 1;
                    sum += $Twice(i);
                }
            }",
        );
        assert_eq!(rt.get_var("sum"), Some(Arg::Uint(12)));
    }

    #[test]
    fn nested_blocks_get_own_scope() {
        let rt = run(
            "#Block.Main(\"m\"){
                outer = 1;
                #Block.Inner(\"i\"){
                    outer = 2;
                    inner = 1;
                }
            }",
        );
        assert_eq!(rt.get_var("outer"), Some(Arg::Uint(2)));
        assert_eq!(rt.get_var("inner"), None);
    }

    #[test]
    fn throw_and_unknown_function() {
        let err = run_err("#Block.Main(\"m\"){ $Throw(\"boom\"); }");
        assert_eq!(err.message, "boom");
        assert_eq!(err.stack, ["Main [m] [flow]", "program [call]"]);

        let err = run_err("#Block.Main(\"m\"){ x = $Nope(1); }");
        assert_eq!(err.message, "unknown function [Nope]");
        assert_eq!(err.target, ExceptionTarget::FuncCall("Nope(1)".into()));
    }

    #[test]
    fn exists_and_value_or() {
        let mut rt = NailangRuntime::default();
        rt.set_var("present", Arg::Uint(3)).unwrap();
        assert_eq!(eval(&mut rt, "$Exists(present);"), Arg::Bool(true));
        assert_eq!(eval(&mut rt, "$Exists(absent);"), Arg::Bool(false));
        assert_eq!(eval(&mut rt, "$ValueOr(absent, \"dflt\");"), Arg::from("dflt"));
        assert_eq!(eval(&mut rt, "$ValueOr(present, 0);"), Arg::Uint(3));
    }

    struct Host {
        calls: Vec<String>,
        raw: Vec<String>,
    }

    impl RuntimeHost for Host {
        fn lookup_var(&mut self, name: &QualifiedName) -> Option<Arg> {
            (name.as_str() == "host.value").then_some(Arg::Int(-1))
        }

        fn call_func(
            &mut self,
            _rt: &mut NailangRuntime,
            name: &QualifiedName,
            args: &[Arg],
        ) -> Result<Option<Arg>, RuntimeError> {
            self.calls.push(name.to_string());
            Ok(match name.as_str() {
                "Twice" => Some(Arg::Uint(args[0].get_uint().unwrap_or(0) * 2)),
                "Fail" => return Err(RuntimeError::host("host failure")),
                _ => None,
            })
        }

        fn handle_meta(
            &mut self,
            rt: &mut NailangRuntime,
            meta: &FuncCall,
            _item: &BlockItem,
            post: bool,
        ) -> Result<MetaResult, RuntimeError> {
            let ast = rt.ast().clone();
            let name = ast.name(meta.name).as_str().to_owned();
            let args = rt.evaluate_args(self, meta)?;
            self.calls.push(format!("{}{name}{args:?}", if post { "@@" } else { "@" }));
            Ok(match name.as_str() {
                "Stop" => MetaResult::Return,
                "Mark" => MetaResult::Next,
                _ => MetaResult::Unhandled,
            })
        }

        fn on_raw_block(
            &mut self,
            rt: &mut NailangRuntime,
            block: &RawBlock,
            _metas: &[FuncCall],
        ) -> Result<(), RuntimeError> {
            let text = rt.ast().text(block.source).trim().to_owned();
            self.raw.push(text);
            Ok(())
        }
    }

    #[test]
    fn host_hooks() {
        let mut host = Host { calls: vec![], raw: vec![] };
        let mut rt = NailangRuntime::default();
        let prog = parse_program(
            "#Block.Main(\"m\"){
                a = $Twice(21) + host.value;
                @Mark(1)
                @@Mark(2)
                b = 1;
                @Other()
                c = 1;
                @Stop()
                d = 1;
                e = 1;
            }\n#Text(\"t\"){\nraw text\n}",
            "h.nl",
        )
        .unwrap();
        rt.execute_program(&mut host, &prog).unwrap();
        assert_eq!(rt.get_var("a"), Some(Arg::Int(41)));
        assert_eq!(rt.get_var("c"), Some(Arg::Uint(1)));
        assert_eq!(rt.get_var("d"), None);
        assert_eq!(rt.get_var("e"), None);
        assert_eq!(host.calls, ["Twice", "@Mark[Uint(1)]", "@@Mark[Uint(2)]", "@Other[]", "@Stop[]"]);
        assert_eq!(host.raw, ["raw text"]);

        // host functions come after built-ins but before the math extension
        assert_eq!(rt.evaluate_raw_statement(&mut host, "$Len(\"abc\");").unwrap(), Arg::Uint(3));
        let err = rt.evaluate_raw_statement(&mut host, "$Fail();").unwrap_err();
        let NailangError::Runtime(err) = err else { panic!() };
        assert_eq!(err.origin, crate::nailang::error::ErrorOrigin::Host);
        assert_eq!(err.target, ExceptionTarget::FuncCall("Fail()".into()));
    }

    /// A fixed-size table writable through `t[i] = v`.
    struct Table;

    impl CustomHandler for Table {
        fn type_name(&self) -> &str {
            "table"
        }
        fn indexer_getter(&self, var: &CustomVar, index: &Arg) -> Result<Option<Arg>, RuntimeError> {
            let cells = var.data_as::<RefCell<Vec<Arg>>>().ok_or_else(|| RuntimeError::host("bad table"))?;
            Ok(index.get_uint().and_then(|i| cells.borrow().get(i as usize).cloned()))
        }
        fn subfield_getter(&self, var: &CustomVar, field: &str) -> Result<Option<Arg>, RuntimeError> {
            let cells = var.data_as::<RefCell<Vec<Arg>>>().ok_or_else(|| RuntimeError::host("bad table"))?;
            Ok((field == "Size").then(|| Arg::Uint(cells.borrow().len() as u64)))
        }
        fn indexer_setter(&self, var: &CustomVar, index: &Arg, value: Arg) -> Result<bool, RuntimeError> {
            let Some(cells) = var.data_as::<RefCell<Vec<Arg>>>() else { return Ok(false) };
            let mut cells = cells.borrow_mut();
            match index.get_uint().and_then(|i| cells.get_mut(i as usize)) {
                Some(cell) => {
                    *cell = value;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[test]
    fn custom_values_through_queries() {
        let mut rt = NailangRuntime::default();
        let table = CustomVar::new(Rc::new(Table), RefCell::new(vec![Arg::Empty; 3]));
        rt.set_var("t", Arg::Custom(table.clone())).unwrap();
        let prog = parse_statements(
            "t[0] = 5;
            t[1] ?= 6;
            t[1] ?= 7;
            t[2] = t[0] + t[1];
            n = (t).Size;",
            "c.nl",
        )
        .unwrap();
        rt.execute_program(&mut NoHost, &prog).unwrap();
        assert_eq!(eval(&mut rt, "t[2];"), Arg::Uint(11));
        assert_eq!(rt.get_var("n"), Some(Arg::Uint(3)));
        assert_eq!(eval(&mut rt, "?t[9];"), Arg::Bool(false));

        let prog = parse_statements("t[5] = 1;", "c.nl").unwrap();
        let err = rt.execute_program(&mut NoHost, &prog).unwrap_err();
        assert_eq!(err.message, "table rejected the assignment");

        let prog = parse_statements("s = \"x\"; s[0] = 1;", "c.nl").unwrap();
        assert!(rt.execute_program(&mut NoHost, &prog).is_err());
    }

    /// `$Next()` returns 0, 1, 2... and counts its calls.
    #[derive(Default)]
    struct Counter {
        calls: u64,
    }

    impl RuntimeHost for Counter {
        fn call_func(
            &mut self,
            _rt: &mut NailangRuntime,
            name: &QualifiedName,
            _args: &[Arg],
        ) -> Result<Option<Arg>, RuntimeError> {
            if name.as_str() != "Next" {
                return Ok(None);
            }
            self.calls += 1;
            Ok(Some(Arg::Uint(self.calls - 1)))
        }
    }

    #[test]
    fn compound_query_assignment_evaluates_key_once() {
        let mut rt = NailangRuntime::default();
        let table = CustomVar::new(Rc::new(Table), RefCell::new(vec![Arg::Uint(10), Arg::Uint(20), Arg::Bool(true)]));
        rt.set_var("t", Arg::Custom(table)).unwrap();
        let mut host = Counter::default();
        let prog = parse_statements("t[$Next()] += 5;", "c.nl").unwrap();
        rt.execute_program(&mut host, &prog).unwrap();
        assert_eq!(host.calls, 1);
        assert_eq!(eval(&mut rt, "t[0];"), Arg::Uint(15));
        assert_eq!(eval(&mut rt, "t[1];"), Arg::Uint(20));

        // the right side of `&&=` is skipped once the slot is false
        let prog = parse_statements("t[2] &&= false; t[2] &&= missing;", "c.nl").unwrap();
        rt.execute_program(&mut host, &prog).unwrap();
        assert_eq!(eval(&mut rt, "t[2];"), Arg::Bool(false));
    }
}
