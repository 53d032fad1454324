//! Nailang lexer.
//!
//! The lexer is mode driven: the parser asks for the next token in a
//! [`LexMode`] that selects which matchers are tried, and passes the set of
//! delimiter characters that end the current construct.
//!
//! | Mode | Matchers |
//! |------|----------|
//! | `Operand` | comment, delimiter, `(` `)`, `$func`, string, number, bool, variable, operator |
//! | `Operator` | comment, delimiter, operator, `[`, `.field` |
//! | `Statement` | comment, `@meta`, `#Type`, `#Block.Type`, `$func`, variable, `{` `}` |
//!
//! Numbers never carry a sign; the parser folds a leading `-`/`+` into a
//! signed literal.

use std::fmt;

// ── Operators ─────────────────────────────────────────────────────────────────

/// Operators usable inside expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    BitNot,
    /// `?var`: whether the variable exists.
    CheckExist,
    /// `var ?? fallback`
    ValueOr,
}

impl EmbedOp {
    pub fn is_unary(self) -> bool {
        matches!(self, EmbedOp::Not | EmbedOp::BitNot | EmbedOp::CheckExist)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            EmbedOp::Equal => "==",
            EmbedOp::NotEqual => "!=",
            EmbedOp::Less => "<",
            EmbedOp::LessEqual => "<=",
            EmbedOp::Greater => ">",
            EmbedOp::GreaterEqual => ">=",
            EmbedOp::And => "&&",
            EmbedOp::Or => "||",
            EmbedOp::Not => "!",
            EmbedOp::Add => "+",
            EmbedOp::Sub => "-",
            EmbedOp::Mul => "*",
            EmbedOp::Div => "/",
            EmbedOp::Rem => "%",
            EmbedOp::BitAnd => "&",
            EmbedOp::BitOr => "|",
            EmbedOp::BitXor => "^",
            EmbedOp::ShiftLeft => "<<",
            EmbedOp::ShiftRight => ">>",
            EmbedOp::BitNot => "~",
            EmbedOp::CheckExist => "?",
            EmbedOp::ValueOr => "??",
        }
    }
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `:=` (variable must not exist yet)
    NewCreate,
    /// `?=` (assign only when currently null)
    NilAssign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    RemAssign,
    AndAssign,
    OrAssign,
    BitAndAssign,
    BitOrAssign,
    BitXorAssign,
    ShiftLeftAssign,
    ShiftRightAssign,
}

impl AssignOp {
    /// The binary operator a compound assignment folds into.
    pub fn self_op(self) -> Option<EmbedOp> {
        Some(match self {
            AssignOp::Assign | AssignOp::NewCreate | AssignOp::NilAssign => return None,
            AssignOp::AddAssign => EmbedOp::Add,
            AssignOp::SubAssign => EmbedOp::Sub,
            AssignOp::MulAssign => EmbedOp::Mul,
            AssignOp::DivAssign => EmbedOp::Div,
            AssignOp::RemAssign => EmbedOp::Rem,
            AssignOp::AndAssign => EmbedOp::And,
            AssignOp::OrAssign => EmbedOp::Or,
            AssignOp::BitAndAssign => EmbedOp::BitAnd,
            AssignOp::BitOrAssign => EmbedOp::BitOr,
            AssignOp::BitXorAssign => EmbedOp::BitXor,
            AssignOp::ShiftLeftAssign => EmbedOp::ShiftLeft,
            AssignOp::ShiftRightAssign => EmbedOp::ShiftRight,
        })
    }
}

/// Symbols recognised by the operator matcher, longest first.
const SYMBOLS: &[(&str, Symbol)] = &[
    ("<<=", Symbol::Assign(AssignOp::ShiftLeftAssign)),
    (">>=", Symbol::Assign(AssignOp::ShiftRightAssign)),
    ("&&=", Symbol::Assign(AssignOp::AndAssign)),
    ("||=", Symbol::Assign(AssignOp::OrAssign)),
    ("??", Symbol::Op(EmbedOp::ValueOr)),
    ("==", Symbol::Op(EmbedOp::Equal)),
    ("!=", Symbol::Op(EmbedOp::NotEqual)),
    ("<=", Symbol::Op(EmbedOp::LessEqual)),
    (">=", Symbol::Op(EmbedOp::GreaterEqual)),
    ("&&", Symbol::Op(EmbedOp::And)),
    ("||", Symbol::Op(EmbedOp::Or)),
    ("<<", Symbol::Op(EmbedOp::ShiftLeft)),
    (">>", Symbol::Op(EmbedOp::ShiftRight)),
    (":=", Symbol::Assign(AssignOp::NewCreate)),
    ("?=", Symbol::Assign(AssignOp::NilAssign)),
    ("+=", Symbol::Assign(AssignOp::AddAssign)),
    ("-=", Symbol::Assign(AssignOp::SubAssign)),
    ("*=", Symbol::Assign(AssignOp::MulAssign)),
    ("/=", Symbol::Assign(AssignOp::DivAssign)),
    ("%=", Symbol::Assign(AssignOp::RemAssign)),
    ("&=", Symbol::Assign(AssignOp::BitAndAssign)),
    ("|=", Symbol::Assign(AssignOp::BitOrAssign)),
    ("^=", Symbol::Assign(AssignOp::BitXorAssign)),
    ("=", Symbol::Assign(AssignOp::Assign)),
    ("<", Symbol::Op(EmbedOp::Less)),
    (">", Symbol::Op(EmbedOp::Greater)),
    ("!", Symbol::Op(EmbedOp::Not)),
    ("~", Symbol::Op(EmbedOp::BitNot)),
    ("+", Symbol::Op(EmbedOp::Add)),
    ("-", Symbol::Op(EmbedOp::Sub)),
    ("*", Symbol::Op(EmbedOp::Mul)),
    ("/", Symbol::Op(EmbedOp::Div)),
    ("%", Symbol::Op(EmbedOp::Rem)),
    ("&", Symbol::Op(EmbedOp::BitAnd)),
    ("|", Symbol::Op(EmbedOp::BitOr)),
    ("^", Symbol::Op(EmbedOp::BitXor)),
    ("?", Symbol::Quest),
    (":", Symbol::Colon),
];

#[derive(Debug, Clone, Copy)]
enum Symbol {
    Op(EmbedOp),
    Assign(AssignOp),
    Quest,
    Colon,
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    End,
    /// Nothing in the current mode matched.
    Unknown(String),
    /// A matcher started but the text is malformed.
    Error(String),
    Delim(char),
    Comment(String),

    Uint(u64),
    FP(f64),
    Bool(bool),
    /// String literal with escapes already processed.
    Str(String),

    /// Variable reference, scope prefix included.
    Var(String),
    /// `$name`
    Func(String),
    /// `@name`; `post` for the `@@name` form.
    Meta { name: String, post: bool },
    /// `#Block.Type`
    Block(String),
    /// `#Type`
    Raw(String),

    Op(EmbedOp),
    Assign(AssignOp),
    /// `?` in operator position (ternary).
    Quest,
    /// `:` in operator position (ternary).
    Colon,

    Paren(char),
    Brace(char),
    Bracket(char),
    /// `.name` after a query-able operand.
    SubField(String),
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::End => "End".into(),
            TokenKind::Unknown(s) => format!("Unknown[{s}]"),
            TokenKind::Error(s) => format!("Error[{s}]"),
            TokenKind::Delim(c) => format!("Delim[{}]", c.escape_default()),
            TokenKind::Comment(_) => "Comment".into(),
            TokenKind::Uint(v) => format!("Uint[{v}]"),
            TokenKind::FP(v) => format!("FP[{v}]"),
            TokenKind::Bool(v) => format!("Bool[{v}]"),
            TokenKind::Str(s) => format!("String[{s}]"),
            TokenKind::Var(s) => format!("Var[{s}]"),
            TokenKind::Func(s) => format!("Func[{s}]"),
            TokenKind::Meta { name, .. } => format!("MetaFunc[{name}]"),
            TokenKind::Block(s) => format!("Block[{s}]"),
            TokenKind::Raw(s) => format!("Raw[{s}]"),
            TokenKind::Op(op) => format!("EmbedOp[{}]", op.symbol()),
            TokenKind::Assign(op) => format!("Assign[{op:?}]"),
            TokenKind::Quest => "Quest".into(),
            TokenKind::Colon => "Colon".into(),
            TokenKind::Paren(c) => format!("Parenthese[{c}]"),
            TokenKind::Brace(c) => format!("CurlyBrace[{c}]"),
            TokenKind::Bracket(c) => format!("SquareBracket[{c}]"),
            TokenKind::SubField(s) => format!("SubField[{s}]"),
        }
    }
}

/// A token and the row/column (both 0-based) where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub row: u32,
    pub col: u32,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind.describe())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    Operand,
    Operator,
    Statement,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

/// Cursor over source text with row/column tracking.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    row: u32,
    col: u32,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

fn is_blank(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x0b)
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0, row: 0, col: 0 }
    }

    /// Start lexing `src` as if it began at `row`/`col` of a larger file.
    pub fn with_position(src: &'a str, row: u32, col: u32) -> Self {
        Lexer { src, pos: 0, row, col }
    }

    pub fn position(&self) -> (u32, u32) {
        (self.row, self.col)
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    pub fn is_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes().get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.row += 1;
            self.col = 0;
        } else if ch & 0xC0 != 0x80 {
            // count characters, not UTF-8 continuation bytes
            self.col += 1;
        }
        Some(ch)
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn skip_blank(&mut self) {
        while self.peek().is_some_and(is_blank) {
            self.advance();
        }
    }

    /// Whether a decimal digit sits directly at the cursor.
    pub fn at_digit(&self) -> bool {
        self.peek().is_some_and(|c| c.is_ascii_digit())
    }

    /// Peek the next non-blank character without consuming anything.
    pub fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().find(|c| !c.is_ascii_whitespace())
    }

    /// Consume the rest of the current line, including its newline.
    pub fn read_line(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'\n' {
                let line = &self.src[start..self.pos];
                self.advance();
                return line.strip_suffix('\r').unwrap_or(line);
            }
            self.advance();
        }
        &self.src[start..self.pos]
    }

    /// Consume text up to and including `guard`, returning what came before it.
    /// Leaves the cursor untouched when `guard` never appears.
    pub fn read_until(&mut self, guard: &str) -> Option<&'a str> {
        let start = self.pos;
        let found = self.src[start..].find(guard)?;
        self.advance_by(found + guard.len());
        Some(&self.src[start..start + found])
    }

    // ── Matchers ──────────────────────────────────────────────────────────────

    fn read_comment(&mut self) -> Option<TokenKind> {
        match (self.peek(), self.peek2()) {
            (Some(b'/'), Some(b'/')) => {
                let line = self.read_line();
                Some(TokenKind::Comment(line[2..].to_owned()))
            }
            (Some(b'/'), Some(b'*')) => {
                self.advance_by(2);
                match self.read_until("*/") {
                    Some(body) => Some(TokenKind::Comment(body.to_owned())),
                    None => {
                        let rest = &self.src[self.pos..];
                        self.advance_by(rest.len());
                        Some(TokenKind::Error("unterminated comment".into()))
                    }
                }
            }
            _ => None,
        }
    }

    fn read_number(&mut self) -> TokenKind {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek2(), Some(b'x' | b'X')) {
            self.advance_by(2);
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let hex = &self.src[start + 2..self.pos];
            return match u64::from_str_radix(hex, 16) {
                Ok(v) => TokenKind::Uint(v),
                Err(_) => TokenKind::Error(self.src[start..self.pos].to_owned()),
            };
        }
        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.clone();
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                *self = save;
            }
        }
        let text = &self.src[start..self.pos];
        if self.peek().is_some_and(is_ident_start) {
            // `12ab` is neither a number nor a name
            while self.peek().is_some_and(is_ident_char) {
                self.advance();
            }
            return TokenKind::Error(self.src[start..self.pos].to_owned());
        }
        if is_float {
            text.parse().map(TokenKind::FP).unwrap_or_else(|_| TokenKind::Error(text.to_owned()))
        } else {
            text.parse().map(TokenKind::Uint).unwrap_or_else(|_| TokenKind::Error(text.to_owned()))
        }
    }

    fn read_string(&mut self) -> TokenKind {
        let start = self.pos;
        self.advance(); // opening quote
        let mut out: Vec<u8> = Vec::new();
        loop {
            match self.advance() {
                None => {
                    return TokenKind::Error(self.src[start..self.pos].to_owned());
                }
                Some(b'\\') => match self.advance() {
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'0') => out.push(0),
                    Some(b'r') => out.push(b'\r'),
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'"') => out.push(b'"'),
                    Some(c) => out.push(c),
                    None => return TokenKind::Error(self.src[start..self.pos].to_owned()),
                },
                Some(b'"') => break,
                Some(c) => out.push(c),
            }
        }
        match String::from_utf8(out) {
            Ok(s) => TokenKind::Str(s),
            Err(_) => TokenKind::Error(self.src[start..self.pos].to_owned()),
        }
    }

    fn read_ident(&mut self) -> &'a str {
        let start = self.pos;
        if matches!(self.peek(), Some(b'`' | b':')) {
            self.advance();
        }
        while self.peek().is_some_and(is_ident_char) {
            self.advance();
        }
        &self.src[start..self.pos]
    }

    fn at_var(&self) -> bool {
        match self.peek() {
            Some(b'`' | b':') => self.peek2().is_some_and(is_ident_start),
            Some(c) => is_ident_start(c),
            None => false,
        }
    }

    fn read_var(&mut self) -> TokenKind {
        let text = self.read_ident();
        match text {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            _ => TokenKind::Var(text.to_owned()),
        }
    }

    /// Name after a `$`, `@` or `#` prefix: everything up to blank or `(`.
    fn read_full_name(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|c| !is_blank(c) && c != b'(') {
            self.advance();
        }
        &self.src[start..self.pos]
    }

    fn read_symbol(&mut self) -> Option<TokenKind> {
        let rest = &self.src[self.pos..];
        let (text, sym) = SYMBOLS.iter().find(|(text, _)| rest.starts_with(text))?;
        self.advance_by(text.len());
        Some(match sym {
            Symbol::Op(op) => TokenKind::Op(*op),
            Symbol::Assign(op) => TokenKind::Assign(*op),
            Symbol::Quest => TokenKind::Quest,
            Symbol::Colon => TokenKind::Colon,
        })
    }

    fn read_prefixed(&mut self, prefix: u8) -> TokenKind {
        self.advance();
        let name = self.read_full_name();
        if name.is_empty() {
            return TokenKind::Error((prefix as char).to_string());
        }
        match prefix {
            b'$' => TokenKind::Func(name.to_owned()),
            b'@' => match name.strip_prefix('@') {
                Some("") => TokenKind::Error(format!("@{name}")),
                Some(post) => TokenKind::Meta { name: post.to_owned(), post: true },
                None => TokenKind::Meta { name: name.to_owned(), post: false },
            },
            _ => match name.strip_prefix("Block.") {
                Some("") => TokenKind::Error(format!("#{name}")),
                Some(ty) => TokenKind::Block(ty.to_owned()),
                None => TokenKind::Raw(name.to_owned()),
            },
        }
    }

    /// Produce the next token, skipping blanks and comments.
    pub fn next_token(&mut self, mode: LexMode, stops: &str) -> Token {
        loop {
            let tok = self.next_raw(mode, stops);
            if !matches!(tok.kind, TokenKind::Comment(_)) {
                return tok;
            }
        }
    }

    /// Produce the next token, skipping blanks but keeping comments.
    pub fn next_raw(&mut self, mode: LexMode, stops: &str) -> Token {
        self.skip_blank();
        let (row, col) = self.position();
        let kind = self.match_token(mode, stops);
        Token { kind, row, col }
    }

    fn match_token(&mut self, mode: LexMode, stops: &str) -> TokenKind {
        let Some(ch) = self.peek() else {
            return TokenKind::End;
        };
        if let Some(comment) = self.read_comment() {
            return comment;
        }
        if stops.as_bytes().contains(&ch) {
            self.advance();
            return TokenKind::Delim(ch as char);
        }
        match mode {
            LexMode::Operand => match ch {
                b'(' | b')' => {
                    self.advance();
                    TokenKind::Paren(ch as char)
                }
                b'$' => self.read_prefixed(b'$'),
                b'"' => self.read_string(),
                b'0'..=b'9' => self.read_number(),
                _ if self.at_var() => self.read_var(),
                _ => self.read_symbol().unwrap_or_else(|| self.unknown()),
            },
            LexMode::Operator => match ch {
                b'[' | b']' => {
                    self.advance();
                    TokenKind::Bracket(ch as char)
                }
                b'.' if self.peek2().is_some_and(is_ident_start) => {
                    self.advance();
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                        self.advance();
                    }
                    TokenKind::SubField(self.src[start..self.pos].to_owned())
                }
                _ => self.read_symbol().unwrap_or_else(|| self.unknown()),
            },
            LexMode::Statement => match ch {
                b'{' | b'}' => {
                    self.advance();
                    TokenKind::Brace(ch as char)
                }
                b'@' | b'#' | b'$' => self.read_prefixed(ch),
                _ if self.at_var() => self.read_var(),
                _ => self.unknown(),
            },
        }
    }

    fn unknown(&mut self) -> TokenKind {
        let rest = &self.src[self.pos..];
        let text: String = rest.chars().take_while(|c| !c.is_whitespace()).take(16).collect();
        TokenKind::Unknown(text)
    }

    /// Consume exactly `ch` (after blanks), reporting what was found otherwise.
    pub fn expect_char(&mut self, ch: u8) -> Result<(), Token> {
        self.skip_blank();
        let (row, col) = self.position();
        if self.eat(ch) {
            return Ok(());
        }
        let kind = match self.peek() {
            None => TokenKind::End,
            Some(_) => self.unknown(),
        };
        Err(Token { kind, row, col })
    }
}

/// Split an expression into tokens, alternating operand and operator
/// positions the way the expression parser does.
pub fn tokenize_expr(src: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    let mut mode = LexMode::Operand;
    loop {
        let tok = lexer.next_token(mode, "");
        mode = match &tok.kind {
            TokenKind::End | TokenKind::Unknown(_) | TokenKind::Error(_) => {
                tokens.push(tok);
                break;
            }
            TokenKind::Uint(_)
            | TokenKind::FP(_)
            | TokenKind::Bool(_)
            | TokenKind::Str(_)
            | TokenKind::Var(_)
            | TokenKind::SubField(_)
            | TokenKind::Paren(')')
            | TokenKind::Bracket(']') => LexMode::Operator,
            _ => LexMode::Operand,
        };
        tokens.push(tok);
    }
    tokens
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize_expr(src).into_iter().map(|t| t.kind).collect()
    }

    fn bin(src: &str, op: TokenKind) {
        assert_eq!(
            kinds(src),
            vec![TokenKind::Uint(1), op, TokenKind::Uint(2), TokenKind::End],
            "{src}"
        );
    }

    #[test]
    fn binary_operators() {
        bin("1==2", TokenKind::Op(EmbedOp::Equal));
        bin("1 == 2", TokenKind::Op(EmbedOp::Equal));
        bin("1 != 2", TokenKind::Op(EmbedOp::NotEqual));
        bin("1 < 2", TokenKind::Op(EmbedOp::Less));
        bin("1 <= 2", TokenKind::Op(EmbedOp::LessEqual));
        bin("1 > 2", TokenKind::Op(EmbedOp::Greater));
        bin("1 >= 2", TokenKind::Op(EmbedOp::GreaterEqual));
        bin("1 && 2", TokenKind::Op(EmbedOp::And));
        bin("1 || 2", TokenKind::Op(EmbedOp::Or));
        bin("1 + 2", TokenKind::Op(EmbedOp::Add));
        bin("1 - 2", TokenKind::Op(EmbedOp::Sub));
        bin("1 * 2", TokenKind::Op(EmbedOp::Mul));
        bin("1 / 2", TokenKind::Op(EmbedOp::Div));
        bin("1 % 2", TokenKind::Op(EmbedOp::Rem));
        bin("1 & 2", TokenKind::Op(EmbedOp::BitAnd));
        bin("1 | 2", TokenKind::Op(EmbedOp::BitOr));
        bin("1 ^ 2", TokenKind::Op(EmbedOp::BitXor));
        bin("1 << 2", TokenKind::Op(EmbedOp::ShiftLeft));
        bin("1 >> 2", TokenKind::Op(EmbedOp::ShiftRight));
        bin("1 ?? 2", TokenKind::Op(EmbedOp::ValueOr));
    }

    #[test]
    fn assignment_operators() {
        bin("1 = 2", TokenKind::Assign(AssignOp::Assign));
        bin("1 := 2", TokenKind::Assign(AssignOp::NewCreate));
        bin("1 ?= 2", TokenKind::Assign(AssignOp::NilAssign));
        bin("1 += 2", TokenKind::Assign(AssignOp::AddAssign));
        bin("1 -= 2", TokenKind::Assign(AssignOp::SubAssign));
        bin("1 *= 2", TokenKind::Assign(AssignOp::MulAssign));
        bin("1 /= 2", TokenKind::Assign(AssignOp::DivAssign));
        bin("1 %= 2", TokenKind::Assign(AssignOp::RemAssign));
        bin("1 &&= 2", TokenKind::Assign(AssignOp::AndAssign));
        bin("1 ||= 2", TokenKind::Assign(AssignOp::OrAssign));
        bin("1 <<= 2", TokenKind::Assign(AssignOp::ShiftLeftAssign));
        bin("1 >>= 2", TokenKind::Assign(AssignOp::ShiftRightAssign));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(kinds("!1"), vec![TokenKind::Op(EmbedOp::Not), TokenKind::Uint(1), TokenKind::End]);
        assert_eq!(kinds("~1"), vec![TokenKind::Op(EmbedOp::BitNot), TokenKind::Uint(1), TokenKind::End]);
        assert_eq!(kinds("?1"), vec![TokenKind::Quest, TokenKind::Uint(1), TokenKind::End]);
    }

    #[test]
    fn ternary_sequence() {
        assert_eq!(
            kinds("1? 2 : 3"),
            vec![
                TokenKind::Uint(1),
                TokenKind::Quest,
                TokenKind::Uint(2),
                TokenKind::Colon,
                TokenKind::Uint(3),
                TokenKind::End
            ]
        );
    }

    #[test]
    fn literals() {
        assert_eq!(kinds("1.5"), vec![TokenKind::FP(1.5), TokenKind::End]);
        assert_eq!(kinds("2e3"), vec![TokenKind::FP(2000.0), TokenKind::End]);
        assert_eq!(kinds("0x1F"), vec![TokenKind::Uint(31), TokenKind::End]);
        assert_eq!(kinds("true"), vec![TokenKind::Bool(true), TokenKind::End]);
        assert_eq!(kinds("trueish"), vec![TokenKind::Var("trueish".into()), TokenKind::End]);
        assert!(matches!(kinds("12ab")[0], TokenKind::Error(_)));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\\b\0\r\n\t\"c\q""#)[0],
            TokenKind::Str("a\\b\0\r\n\t\"cq".into())
        );
        assert!(matches!(kinds(r#""abc\"#)[0], TokenKind::Error(_)));
        assert!(matches!(kinds(r#""abc"#)[0], TokenKind::Error(_)));
    }

    #[test]
    fn variables_with_prefix() {
        assert_eq!(kinds("`a.b")[0], TokenKind::Var("`a.b".into()));
        assert_eq!(kinds(":tmp")[0], TokenKind::Var(":tmp".into()));
        assert_eq!(
            kinds("a[1].x"),
            vec![
                TokenKind::Var("a".into()),
                TokenKind::Bracket('['),
                TokenKind::Uint(1),
                TokenKind::Bracket(']'),
                TokenKind::SubField("x".into()),
                TokenKind::End
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("1 /* two */ + // three\n 2").len(), 4);
    }

    #[test]
    fn statement_prefixes() {
        let mut lexer = Lexer::new("@If @@Log #Block.Main #glsl $Func x }");
        let mut next = || lexer.next_token(LexMode::Statement, "").kind;
        assert_eq!(next(), TokenKind::Meta { name: "If".into(), post: false });
        assert_eq!(next(), TokenKind::Meta { name: "Log".into(), post: true });
        assert_eq!(next(), TokenKind::Block("Main".into()));
        assert_eq!(next(), TokenKind::Raw("glsl".into()));
        assert_eq!(next(), TokenKind::Func("Func".into()));
        assert_eq!(next(), TokenKind::Var("x".into()));
        assert_eq!(next(), TokenKind::Brace('}'));
        assert_eq!(next(), TokenKind::End);
    }

    #[test]
    fn positions_track_rows() {
        let mut lexer = Lexer::new("a\n  b");
        let a = lexer.next_token(LexMode::Operand, "");
        let b = lexer.next_token(LexMode::Operand, "");
        assert_eq!((a.row, a.col), (0, 0));
        assert_eq!((b.row, b.col), (1, 2));
    }

    #[test]
    fn read_until_guard() {
        let mut lexer = Lexer::new("body text\n}rest");
        assert_eq!(lexer.read_until("\n}"), Some("body text"));
        assert_eq!(lexer.read_until("zzz"), None);
        assert_eq!(lexer.read_line(), "rest");
        assert!(lexer.is_end());
    }

    #[test]
    fn stop_delimiters_win() {
        let mut lexer = Lexer::new(", )");
        assert_eq!(lexer.next_token(LexMode::Operand, ",)").kind, TokenKind::Delim(','));
        assert_eq!(lexer.next_token(LexMode::Operand, ",)").kind, TokenKind::Delim(')'));
    }
}
