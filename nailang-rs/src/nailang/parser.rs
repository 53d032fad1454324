//! Recursive-descent parser producing an [`Ast`].
//!
//! Expressions use a flat slot machine instead of precedence climbing: at
//! most one operator per level, with up to two operands (three for the
//! ternary form).  Anything more complex needs parentheses, which keeps the
//! serialized form unambiguous.
//!
//! ```text
//! program   := { meta* ( raw-block | block ) }
//! block     := "#Block." Type "(" string ")" "{" { meta* statement } "}"
//! raw-block := "#" Type "(" string ")" "{" <text up to guard> "}"
//! statement := block | raw-block | "$" name call-args ";" | var query* assign-op expr ";"
//! meta      := "@" name call-args | "@@" name call-args
//! ```

use std::rc::Rc;

use tracing::{debug, trace};

use super::arena::Span;
use super::ast::{
    Assignment, Ast, Block, BlockId, BlockItem, ExprId, FuncCall, NilCheck, Program, RawArg,
    RawBlock, Statement, SubQuery,
};
use super::error::ParseError;
use super::name::FuncKind;
use super::token::{AssignOp, EmbedOp, LexMode, Lexer, Token, TokenKind};

const FUNC_END: &str = ",)";
const GROUP_END: &str = ")";
const INDEX_END: &str = "]";
const STATEMENT_END: &str = ";";

type PResult<T> = Result<T, ParseError>;

/// Pending operator of the slot machine.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    None,
    Op(EmbedOp),
    /// After `?`: collecting the true branch.
    TernaryLeft,
    /// After `:`: collecting the false branch.
    TernaryRight,
}

pub struct Parser<'s, 'a> {
    lexer: Lexer<'s>,
    ast: &'a mut Ast,
    file: String,
}

impl<'s, 'a> Parser<'s, 'a> {
    pub fn new(src: &'s str, file: &str, ast: &'a mut Ast) -> Self {
        Parser { lexer: Lexer::new(src), ast, file: file.to_owned() }
    }

    /// Parser over a fragment that starts at `row`/`col` of `file`.
    pub fn with_position(src: &'s str, file: &str, row: u32, col: u32, ast: &'a mut Ast) -> Self {
        Parser { lexer: Lexer::with_position(src, row, col), ast, file: file.to_owned() }
    }

    // ── Errors ────────────────────────────────────────────────────────────────

    fn error(&self, message: impl Into<String>) -> ParseError {
        let (row, col) = self.lexer.position();
        ParseError { file: self.file.clone(), row, col, message: message.into(), token: None }
    }

    fn unexpected(&self, token: &Token, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.file.clone(),
            row: token.row,
            col: token.col,
            message: message.into(),
            token: Some(token.kind.describe()),
        }
    }

    fn next(&mut self, mode: LexMode, stops: &str) -> Token {
        let tok = self.lexer.next_token(mode, stops);
        trace!(token = %tok, row = tok.row, col = tok.col, "lex");
        tok
    }

    fn expect_char(&mut self, ch: u8, what: &str) -> PResult<()> {
        self.lexer.expect_char(ch).map_err(|tok| self.unexpected(&tok, format!("expect '{what}'")))
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    /// Parse one expression up to a delimiter from `stops` or end of input.
    ///
    /// Returns the expression (if any) and the delimiter that ended it
    /// (`None` at end of input).
    pub fn parse_arg(&mut self, stops: &str) -> PResult<(Option<RawArg>, Option<char>)> {
        let mut slots: [Option<RawArg>; 3] = [None, None, None];
        let mut pending = Pending::None;
        let mut queries: Vec<SubQuery> = Vec::new();

        let stop = loop {
            let target = match pending {
                Pending::None => 0,
                Pending::Op(_) | Pending::TernaryLeft => 1,
                Pending::TernaryRight => 2,
            };
            let filled = slots[target].is_some();
            let mode = if filled { LexMode::Operator } else { LexMode::Operand };
            let token = self.next(mode, stops);

            match &token.kind {
                TokenKind::Delim(ch) => {
                    self.flush_queries(&mut slots[target], &mut queries);
                    break Some(*ch);
                }
                TokenKind::End => {
                    self.flush_queries(&mut slots[target], &mut queries);
                    break None;
                }
                TokenKind::Unknown(_) | TokenKind::Error(_) => {
                    let msg = if filled { "expect an operator" } else { "unknown or error token" };
                    return Err(self.unexpected(&token, msg));
                }
                TokenKind::Bracket('[') if filled => {
                    let index = self.parse_index(&token)?;
                    queries.push(SubQuery::Index(index));
                }
                TokenKind::SubField(name) if filled => {
                    let span = self.ast.push_str(name);
                    queries.push(SubQuery::Sub(span));
                }
                TokenKind::Op(op) => {
                    let op = *op;
                    if !filled && matches!(op, EmbedOp::Sub | EmbedOp::Add) && self.lexer.at_digit() {
                        let number = self.next(LexMode::Operand, stops);
                        slots[target] = Some(self.signed_literal(op, &number)?);
                        continue;
                    }
                    self.flush_queries(&mut slots[target], &mut queries);
                    if pending != Pending::None {
                        return Err(self.unexpected(&token, "already has op"));
                    }
                    if op.is_unary() && slots[0].is_some() {
                        return Err(self.unexpected(&token, "expect no operand before unary operator"));
                    }
                    if !op.is_unary() && slots[0].is_none() {
                        return Err(self.unexpected(&token, "expect operand before binary operator"));
                    }
                    pending = Pending::Op(op);
                }
                TokenKind::Quest if !filled => {
                    // `?var` in operand position
                    if pending != Pending::None || slots[0].is_some() {
                        return Err(self.unexpected(&token, "already has op"));
                    }
                    pending = Pending::Op(EmbedOp::CheckExist);
                }
                TokenKind::Quest => {
                    self.flush_queries(&mut slots[target], &mut queries);
                    if pending != Pending::None {
                        return Err(self.unexpected(&token, "already has op"));
                    }
                    pending = Pending::TernaryLeft;
                }
                TokenKind::Colon => {
                    self.flush_queries(&mut slots[target], &mut queries);
                    if pending != Pending::TernaryLeft || slots[1].is_none() {
                        return Err(self.unexpected(&token, "unexpected ':' outside ternary operator"));
                    }
                    pending = Pending::TernaryRight;
                }
                _ if filled => {
                    return Err(self.unexpected(&token, "already has oprend"));
                }
                _ => {
                    slots[target] = Some(self.parse_operand(&token)?);
                }
            }
        };

        let [first, second, third] = slots;
        let arg = match pending {
            Pending::None => first,
            Pending::Op(op) if op.is_unary() => {
                let operand = second.ok_or_else(|| self.error("Lack oprend for unary operator"))?;
                let operand = self.ast.push_expr(operand);
                Some(RawArg::Unary { op, operand })
            }
            Pending::Op(op) => {
                let right = second.ok_or_else(|| self.error("Lack 2nd oprend for binary operator"))?;
                let (left, right) = self.push_pair(first, right);
                Some(RawArg::Binary { op, left, right })
            }
            Pending::TernaryLeft => return Err(self.error("expect ':' for ternary operator")),
            Pending::TernaryRight => {
                let right = third.ok_or_else(|| self.error("Lack 3rd oprend for ternary operator"))?;
                let cond = self.ast.push_expr(first.unwrap_or(RawArg::Empty));
                let left = self.ast.push_expr(second.unwrap_or(RawArg::Empty));
                let right = self.ast.push_expr(right);
                Some(RawArg::Ternary { cond, left, right })
            }
        };
        Ok((arg, stop))
    }

    fn push_pair(&mut self, left: Option<RawArg>, right: RawArg) -> (ExprId, ExprId) {
        let left = self.ast.push_expr(left.unwrap_or(RawArg::Empty));
        let right = self.ast.push_expr(right);
        (left, right)
    }

    /// Parse `expr]` after an opening bracket.
    fn parse_index(&mut self, open: &Token) -> PResult<ExprId> {
        let (index, delim) = self.parse_arg(INDEX_END)?;
        if delim != Some(']') {
            return Err(self.error("expect ']' to close the indexer"));
        }
        let index = index.ok_or_else(|| self.unexpected(open, "empty indexer"))?;
        Ok(self.ast.push_expr(index))
    }

    fn flush_queries(&mut self, slot: &mut Option<RawArg>, queries: &mut Vec<SubQuery>) {
        if queries.is_empty() {
            return;
        }
        if let Some(base) = slot.take() {
            let target = self.ast.push_expr(base);
            let span = self.ast.push_queries(queries.drain(..));
            *slot = Some(RawArg::Query { target, queries: span });
        }
    }

    fn signed_literal(&self, sign: EmbedOp, number: &Token) -> PResult<RawArg> {
        let negative = sign == EmbedOp::Sub;
        match number.kind {
            TokenKind::Uint(v) => {
                let value = if negative { 0i128 - v as i128 } else { v as i128 };
                i64::try_from(value)
                    .map(RawArg::Int)
                    .map_err(|_| self.unexpected(number, "integer literal out of range"))
            }
            TokenKind::FP(v) => Ok(RawArg::FP(if negative { -v } else { v })),
            _ => Err(self.unexpected(number, "expect a number after sign")),
        }
    }

    fn parse_operand(&mut self, token: &Token) -> PResult<RawArg> {
        Ok(match &token.kind {
            TokenKind::Uint(v) => RawArg::Uint(*v),
            TokenKind::FP(v) => RawArg::FP(*v),
            TokenKind::Bool(v) => RawArg::Bool(*v),
            TokenKind::Str(s) => RawArg::Str(self.ast.push_str(s)),
            TokenKind::Var(name) => {
                let id = self.ast.intern_var(name).map_err(|e| self.unexpected(token, e.to_string()))?;
                RawArg::Var(id)
            }
            TokenKind::Func(name) => {
                let call = self.parse_func_body(name, FuncKind::ExprPart, token)?;
                RawArg::Func(self.ast.push_call(call))
            }
            TokenKind::Paren('(') => {
                let (inner, delim) = self.parse_arg(GROUP_END)?;
                if delim != Some(')') {
                    return Err(self.error("Expect ')' before reaching end"));
                }
                inner.ok_or_else(|| self.unexpected(token, "empty parenthese group"))?
            }
            TokenKind::Paren(_) => return Err(self.unexpected(token, "Unexpected right parenthese")),
            _ => return Err(self.unexpected(token, "Unexpected token")),
        })
    }

    /// Parse `( arg, arg, ... )` after a function name.
    pub fn parse_func_body(&mut self, name: &str, kind: FuncKind, token: &Token) -> PResult<FuncCall> {
        let name_id =
            self.ast.intern_func(name, kind).map_err(|e| self.unexpected(token, e.to_string()))?;
        self.expect_char(b'(', "(")?;
        let mut args = Vec::new();
        loop {
            let (arg, delim) = self.parse_arg(FUNC_END)?;
            match arg {
                Some(arg) => args.push(arg),
                None if delim == Some(')') && args.is_empty() => {}
                None => return Err(self.error("Does not allow empty argument")),
            }
            match delim {
                Some(')') => break,
                Some(_) => {}
                None => return Err(self.error("Expect ')' before reaching end")),
            }
        }
        let args = self.ast.push_exprs(args);
        Ok(FuncCall { name: name_id, args, pos: (token.row, token.col) })
    }

    /// Parse `expr;`.
    pub fn parse_single_statement(&mut self) -> PResult<Option<RawArg>> {
        let (arg, delim) = self.parse_arg(STATEMENT_END)?;
        if delim != Some(';') {
            return Err(self.error("Expected end with ';'"));
        }
        Ok(arg)
    }

    // ── Statements ────────────────────────────────────────────────────────────

    fn parse_assignment(&mut self, var: &str, token: &Token) -> PResult<Assignment> {
        let target =
            self.ast.intern_var(var).map_err(|e| self.unexpected(token, e.to_string()))?;
        let mut queries = Vec::new();
        let op = loop {
            let tok = self.next(LexMode::Operator, "");
            match &tok.kind {
                TokenKind::Bracket('[') => {
                    let index = self.parse_index(&tok)?;
                    queries.push(SubQuery::Index(index));
                }
                TokenKind::SubField(name) => {
                    let span = self.ast.push_str(name);
                    queries.push(SubQuery::Sub(span));
                }
                TokenKind::Assign(op) => break *op,
                _ => return Err(self.unexpected(&tok, "expect assign op")),
            }
        };
        let queries = self.ast.push_queries(queries);

        let rhs = self.parse_single_statement()?.ok_or_else(|| self.error("expect statement"))?;
        let check = match op {
            AssignOp::Assign => NilCheck::Ignore,
            AssignOp::NewCreate => NilCheck::RequireNull,
            AssignOp::NilAssign => NilCheck::SkipNonNull,
            _ => NilCheck::RequireNonNull,
        };
        let expr = match op.self_op() {
            None => self.ast.push_expr(rhs),
            Some(self_op) => {
                let var = RawArg::Var(target);
                let current = if queries.is_empty() {
                    var
                } else {
                    RawArg::Query { target: self.ast.push_expr(var), queries }
                };
                let left = self.ast.push_expr(current);
                let right = self.ast.push_expr(rhs);
                self.ast.push_expr(RawArg::Binary { op: self_op, left, right })
            }
        };
        Ok(Assignment { target, queries, expr, check, pos: (token.row, token.col) })
    }

    /// `("name")` after a block type.
    fn parse_block_name(&mut self) -> PResult<String> {
        self.expect_char(b'(', "(")?;
        let tok = self.next(LexMode::Operand, "");
        let name = match &tok.kind {
            TokenKind::Str(name) => name.clone(),
            _ => return Err(self.unexpected(&tok, "expect block name string")),
        };
        self.expect_char(b')', ")")?;
        Ok(name)
    }

    fn block_info(&mut self, ty: &str, name: &str) -> RawBlock {
        let ty = self.ast.push_str(ty);
        let name = self.ast.push_str(name);
        let file = self.ast.push_str(&self.file);
        let source = self.ast.push_str("");
        RawBlock { ty, name, source, file, pos: self.lexer.position() }
    }

    fn parse_raw_block(&mut self, ty: &str) -> PResult<RawBlock> {
        let name = self.parse_block_name()?;
        self.expect_char(b'{', "{")?;
        let header_start = self.lexer.offset();
        self.lexer.read_line();
        let src = self.lexer.source();
        // The rest of the header line followed by `}` closes the body.
        let header_rest = &src[header_start..self.lexer.offset()];
        let guard = format!("{header_rest}}}");
        let mut info = self.block_info(ty, &name);
        let body = self.lexer.read_until(&guard).ok_or_else(|| {
            let trailer = header_rest.trim();
            if trailer.is_empty() || trailer.starts_with("//") {
                self.error(format!("raw block [{name}] is not closed"))
            } else {
                self.error(format!("raw block [{name}] must start its body on the line after '{{'"))
            }
        })?;
        info.source = self.ast.push_str(body);
        debug!(ty, name = %name, len = body.len(), "parsed raw block");
        Ok(info)
    }

    fn parse_nested_block(&mut self, ty: &str) -> PResult<Block> {
        let name = self.parse_block_name()?;
        self.expect_char(b'{', "{")?;
        let mut info = self.block_info(ty, &name);
        let begin = self.lexer.offset();
        let items = self.parse_block_content(false, true)?;
        let end = self.lexer.offset().saturating_sub(1);
        let src = self.lexer.source();
        info.source = self.ast.push_str(&src[begin..end.max(begin)]);
        debug!(ty, name = %name, statements = items.len(), "parsed block");
        Ok(Block { info, items })
    }

    /// Parse statements until `}` (nested) or end of input (`till_end`).
    fn parse_block_content(&mut self, till_end: bool, allow_statements: bool) -> PResult<Span<BlockItem>> {
        let mut items = Vec::new();
        let mut metas: Vec<FuncCall> = Vec::new();
        let mut post_metas: Vec<FuncCall> = Vec::new();
        loop {
            let token = self.next(LexMode::Statement, "");
            let stmt = match &token.kind {
                TokenKind::Meta { name, post } => {
                    let call = self.parse_func_body(name, FuncKind::Meta, &token)?;
                    if *post {
                        post_metas.push(call);
                    } else {
                        metas.push(call);
                    }
                    continue;
                }
                TokenKind::Raw(ty) => {
                    let block = self.parse_raw_block(ty)?;
                    Statement::RawBlock(self.ast.push_raw_block(block))
                }
                TokenKind::Block(ty) => {
                    let block = self.parse_nested_block(ty)?;
                    Statement::Block(self.ast.push_block(block))
                }
                TokenKind::Func(name) => {
                    if !allow_statements {
                        return Err(self.unexpected(&token, "Function call not supported here"));
                    }
                    let call = self.parse_func_body(name, FuncKind::Plain, &token)?;
                    self.expect_char(b';', ";")?;
                    Statement::FuncCall(self.ast.push_call(call))
                }
                TokenKind::Var(name) => {
                    if !allow_statements {
                        return Err(self.unexpected(&token, "Variable assignment not supported here"));
                    }
                    let assign = self.parse_assignment(name, &token)?;
                    Statement::Assignment(self.ast.push_assign(assign))
                }
                TokenKind::Brace('}') if !till_end => {
                    if !metas.is_empty() || !post_metas.is_empty() {
                        return Err(self.unexpected(&token, "expect block/assignment/funccall after metafuncs"));
                    }
                    break;
                }
                TokenKind::End => {
                    if !metas.is_empty() || !post_metas.is_empty() {
                        return Err(self.unexpected(&token, "expect block/assignment/funccall after metafuncs"));
                    }
                    if !till_end {
                        return Err(self.unexpected(&token, "expect '}' to close the scope"));
                    }
                    break;
                }
                _ => return Err(self.unexpected(&token, "when parsing block contents")),
            };
            let metas = self.ast.push_calls(metas.drain(..));
            let post_metas = self.ast.push_calls(post_metas.drain(..));
            items.push(BlockItem { stmt, metas, post_metas });
        }
        Ok(self.ast.push_items(items))
    }

    fn finish_root(&mut self, ty: &str, allow_statements: bool) -> PResult<BlockId> {
        let mut info = self.block_info(ty, &self.file.clone());
        let items = self.parse_block_content(true, allow_statements)?;
        info.source = self.ast.push_str(self.lexer.source());
        Ok(self.ast.push_block(Block { info, items }))
    }
}

/// Parse a whole source file: top level holds blocks, raw blocks and metas.
#[tracing::instrument(level = "debug", skip_all, fields(file = file))]
pub fn parse_program(src: &str, file: &str) -> Result<Program, ParseError> {
    parse_program_with(src, file, Ast::new())
}

/// Like [`parse_program`] but into a caller-configured [`Ast`].
pub fn parse_program_with(src: &str, file: &str, mut ast: Ast) -> Result<Program, ParseError> {
    let root = Parser::new(src, file, &mut ast).finish_root("", false)?;
    Ok(Program { ast: Rc::new(ast), root })
}

/// Parse a list of statements, as found inside a block body.
pub fn parse_statements(src: &str, file: &str) -> Result<Program, ParseError> {
    let mut ast = Ast::new();
    let root = Parser::new(src, file, &mut ast).finish_root("", true)?;
    Ok(Program { ast: Rc::new(ast), root })
}

/// Parse the body of a raw block as statements, keeping its source position.
pub fn parse_raw_block_as_block(ast: &Ast, raw: &RawBlock) -> Result<Program, ParseError> {
    let mut out = Ast::new();
    let file = ast.text(raw.file).to_owned();
    let (row, col) = raw.pos;
    let body = ast.text(raw.source);
    let mut parser = Parser::with_position(body, &file, row, col, &mut out);
    let items = parser.parse_block_content(true, true)?;
    let info = RawBlock {
        ty: out.push_str(ast.text(raw.ty)),
        name: out.push_str(ast.text(raw.name)),
        source: out.push_str(body),
        file: out.push_str(&file),
        pos: raw.pos,
    };
    let root = out.push_block(Block { info, items });
    Ok(Program { ast: Rc::new(out), root })
}

/// Parse a single expression statement terminated by `;`.
pub fn parse_expression(src: &str, ast: &mut Ast) -> Result<Option<RawArg>, ParseError> {
    Parser::new(src, "<expr>", ast).parse_single_statement()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> (Ast, RawArg) {
        let mut ast = Ast::new();
        let arg = parse_expression(src, &mut ast).unwrap().unwrap();
        (ast, arg)
    }

    fn expr_err(src: &str) -> ParseError {
        let mut ast = Ast::new();
        parse_expression(src, &mut ast).unwrap_err()
    }

    #[test]
    fn binary_and_unary() {
        let (ast, arg) = expr("1 + 2;");
        let RawArg::Binary { op, left, right } = arg else { panic!("{arg:?}") };
        assert_eq!(op, EmbedOp::Add);
        assert_eq!(ast.expr(left), RawArg::Uint(1));
        assert_eq!(ast.expr(right), RawArg::Uint(2));

        let (ast, arg) = expr("!true;");
        let RawArg::Unary { op, operand } = arg else { panic!("{arg:?}") };
        assert_eq!(op, EmbedOp::Not);
        assert_eq!(ast.expr(operand), RawArg::Bool(true));
    }

    #[test]
    fn sign_folds_into_literal() {
        assert_eq!(expr("-5678;").1, RawArg::Int(-5678));
        assert_eq!(expr("+12;").1, RawArg::Int(12));
        assert_eq!(expr("-1.5;").1, RawArg::FP(-1.5));
        let (ast, arg) = expr("3 - -2;");
        let RawArg::Binary { op, right, .. } = arg else { panic!("{arg:?}") };
        assert_eq!(op, EmbedOp::Sub);
        assert_eq!(ast.expr(right), RawArg::Int(-2));
    }

    #[test]
    fn missing_operands() {
        assert_eq!(expr_err("1 +;").message, "Lack 2nd oprend for binary operator");
        assert_eq!(expr_err("!;").message, "Lack oprend for unary operator");
        assert_eq!(expr_err("* 2;").message, "expect operand before binary operator");
        assert_eq!(expr_err("1 2;").message, "expect an operator");
        assert_eq!(expr_err("1 + 2 + 3;").message, "already has op");
        assert_eq!(expr_err("1 + 2").message, "Expected end with ';'");
        assert_eq!(expr_err("();").message, "empty parenthese group");
    }

    #[test]
    fn query_chain_is_one_node() {
        let (ast, arg) = expr("a[1][2];");
        let RawArg::Query { target, queries } = arg else { panic!("{arg:?}") };
        assert!(matches!(ast.expr(target), RawArg::Var(_)));
        let steps = ast.queries(queries);
        assert_eq!(steps.len(), 2);
        let SubQuery::Index(first) = steps[0] else { panic!() };
        let SubQuery::Index(second) = steps[1] else { panic!() };
        assert_eq!(ast.expr(first), RawArg::Uint(1));
        assert_eq!(ast.expr(second), RawArg::Uint(2));
    }

    #[test]
    fn subfield_after_index() {
        let (ast, arg) = expr("a.b[0].c + 1;");
        let RawArg::Binary { left, .. } = arg else { panic!("{arg:?}") };
        let RawArg::Query { target, queries } = ast.expr(left) else { panic!() };
        let RawArg::Var(name) = ast.expr(target) else { panic!() };
        assert_eq!(ast.name(name).as_str(), "a.b");
        let steps = ast.queries(queries);
        let SubQuery::Sub(field) = steps[1] else { panic!() };
        assert_eq!(ast.text(field), "c");
    }

    #[test]
    fn ternary_and_check_exist() {
        let (ast, arg) = expr("x ? 2 : 3;");
        let RawArg::Ternary { cond, left, right } = arg else { panic!("{arg:?}") };
        assert!(matches!(ast.expr(cond), RawArg::Var(_)));
        assert_eq!(ast.expr(left), RawArg::Uint(2));
        assert_eq!(ast.expr(right), RawArg::Uint(3));

        let (_, arg) = expr("?x;");
        assert!(matches!(arg, RawArg::Unary { op: EmbedOp::CheckExist, .. }));
        let (_, arg) = expr("x ?? 4;");
        assert!(matches!(arg, RawArg::Binary { op: EmbedOp::ValueOr, .. }));
        assert_eq!(expr_err("x ? 2;").message, "expect ':' for ternary operator");
    }

    #[test]
    fn function_arguments() {
        let (ast, arg) = expr("$Max(1, (2 + 3), \"s\");");
        let RawArg::Func(id) = arg else { panic!("{arg:?}") };
        let call = ast.call(id);
        assert_eq!(ast.name(call.name).as_str(), "Max");
        assert_eq!(ast.exprs(call.args).len(), 3);
        let (ast, arg) = expr("$Empty();");
        let RawArg::Func(id) = arg else { panic!() };
        assert!(ast.call(id).args.is_empty());
        assert_eq!(expr_err("$F(1,,2);").message, "Does not allow empty argument");
        assert_eq!(expr_err("$F(1, 2").message, "Expect ')' before reaching end");
    }

    #[test]
    fn program_with_blocks() {
        let src = "\
@Meta(1)
#Block.Main(\"main\"){
    x = 1;
    @If(x == 1)
    y += 2;
    $Print(x);
    #Block.Inner(\"inner\"){
        z := 3;
    }
}
#Text(\"raw\"){
line one { }
}
";
        let prog = parse_program(src, "test.nl").unwrap();
        let ast = &prog.ast;
        let items = prog.items();
        assert_eq!(items.len(), 2);
        assert_eq!(ast.calls(items[0].metas).len(), 1);

        let Statement::Block(main) = items[0].stmt else { panic!() };
        let main = ast.block(main);
        assert_eq!(ast.text(main.info.ty), "Main");
        assert_eq!(ast.text(main.info.name), "main");
        let inner = ast.items(main.items);
        assert_eq!(inner.len(), 4);
        assert_eq!(ast.calls(inner[1].metas).len(), 1);
        let Statement::Assignment(add) = inner[1].stmt else { panic!() };
        assert_eq!(ast.assignment(add).check, NilCheck::RequireNonNull);

        let Statement::RawBlock(raw) = items[1].stmt else { panic!() };
        assert_eq!(ast.text(ast.raw_block(raw).source), "line one { }");
    }

    #[test]
    fn raw_block_guard_uses_header_line() {
        let src = "#Text(\"t\"){ //end\nbody }\n //end\n}";
        let prog = parse_program(src, "t").unwrap();
        let Statement::RawBlock(raw) = prog.items()[0].stmt else { panic!() };
        assert_eq!(prog.ast.text(prog.ast.raw_block(raw).source), "body }\n");
    }

    #[test]
    fn block_errors() {
        let err = parse_program("@If(1)\n", "t").unwrap_err();
        assert_eq!(err.message, "expect block/assignment/funccall after metafuncs");
        let err = parse_program("#Block.A(\"a\"){\n x = 1;\n", "t").unwrap_err();
        assert_eq!(err.message, "expect '}' to close the scope");
        let err = parse_program("x = 1;", "t").unwrap_err();
        assert_eq!(err.message, "Variable assignment not supported here");
        assert_eq!((err.row, err.col), (0, 0));
        let err = parse_program("#Text(\"t\"){\nbody", "t").unwrap_err();
        assert_eq!(err.message, "raw block [t] is not closed");
        let err = parse_program("#Text(\"t\"){ //c\nbody", "t").unwrap_err();
        assert_eq!(err.message, "raw block [t] is not closed");
    }

    #[test]
    fn raw_block_body_on_header_line() {
        let err = parse_program("#Text(\"t\"){ body }\n#Text(\"u\"){\nmore\n}\n", "t").unwrap_err();
        assert_eq!(err.message, "raw block [t] must start its body on the line after '{'");
    }

    #[test]
    fn statements_allow_assignments() {
        let prog = parse_statements("a = 1;\n$F(a);\nb ?= 2;", "s").unwrap();
        assert_eq!(prog.items().len(), 3);
        let Statement::Assignment(id) = prog.items()[2].stmt else { panic!() };
        assert_eq!(prog.ast.assignment(id).check, NilCheck::SkipNonNull);
    }

    #[test]
    fn raw_block_body_reparsed_with_position() {
        let prog = parse_program("#Text(\"t\"){\n  x = 1;\n  y x;\n}", "f.nl").unwrap();
        let Statement::RawBlock(raw) = prog.items()[0].stmt else { panic!() };
        let err = parse_raw_block_as_block(&prog.ast, prog.ast.raw_block(raw)).unwrap_err();
        assert_eq!(err.file, "f.nl");
        assert_eq!(err.row, 2);
    }
}
