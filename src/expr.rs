use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// Reference-counted expression handle; subterms may be shared.
pub type ExprRef = Rc<BoolExpr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "!=",
            CmpOp::Less => "<",
            CmpOp::LessEq => "<=",
            CmpOp::Greater => ">",
            CmpOp::GreaterEq => ">=",
        }
    }
}

/// Propositional formula over configuration symbols.
///
/// Comparisons are carried as opaque subterms: the solver treats each
/// structurally distinct comparison as a free variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolExpr {
    Const(bool),
    Symbol(String),
    Not(ExprRef),
    And(ExprRef, ExprRef),
    Or(ExprRef, ExprRef),
    Implies(ExprRef, ExprRef),
    Iff(ExprRef, ExprRef),
    Cmp(CmpOp, ExprRef, ExprRef),
}

impl BoolExpr {
    pub fn symbol(name: impl Into<String>) -> ExprRef {
        Rc::new(BoolExpr::Symbol(name.into()))
    }

    pub fn not(e: ExprRef) -> ExprRef {
        Rc::new(BoolExpr::Not(e))
    }

    pub fn and(a: ExprRef, b: ExprRef) -> ExprRef {
        Rc::new(BoolExpr::And(a, b))
    }

    pub fn or(a: ExprRef, b: ExprRef) -> ExprRef {
        Rc::new(BoolExpr::Or(a, b))
    }

    /// Collect all identifier leaves of this expression.
    pub fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            BoolExpr::Const(_) => {}
            BoolExpr::Symbol(name) => {
                out.insert(name.clone());
            }
            BoolExpr::Not(e) => e.collect_symbols(out),
            BoolExpr::And(a, b)
            | BoolExpr::Or(a, b)
            | BoolExpr::Implies(a, b)
            | BoolExpr::Iff(a, b)
            | BoolExpr::Cmp(_, a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }
}

impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolExpr::Const(true) => write!(f, "1"),
            BoolExpr::Const(false) => write!(f, "0"),
            BoolExpr::Symbol(name) => write!(f, "{}", name),
            BoolExpr::Not(e) => write!(f, "!{}", e),
            BoolExpr::And(a, b) => write!(f, "({} && {})", a, b),
            BoolExpr::Or(a, b) => write!(f, "({} || {})", a, b),
            BoolExpr::Implies(a, b) => write!(f, "({} -> {})", a, b),
            BoolExpr::Iff(a, b) => write!(f, "({} <-> {})", a, b),
            BoolExpr::Cmp(op, a, b) => write!(f, "({} {} {})", a, op.as_str(), b),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected character `{ch}` at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unexpected `{token}` at byte {pos}")]
    UnexpectedToken { token: String, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

/// Parse a formula string into an expression tree.
pub fn parse_string(input: &str) -> Result<ExprRef, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut p = Parser { tokens, pos: 0 };
    let expr = p.parse_iff()?;
    match p.peek() {
        (TokenKind::Eof, _) => Ok(expr),
        (tok, pos) => Err(ParseError::UnexpectedToken {
            token: format!("{:?}", tok),
            pos,
        }),
    }
}

/// Identifier leaves of a formula string, sorted and deduplicated.
pub fn symbols_of_string(input: &str) -> Result<BTreeSet<String>, ParseError> {
    Ok(parse_string(input)?.symbols())
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Const(bool),
    Not,
    And,
    Or,
    Implies,
    Iff,
    Cmp(CmpOp),
    OpenParen,
    CloseParen,
    Eof,
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn tokenize(mut self) -> Result<Vec<(TokenKind, usize)>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
                self.pos += 1;
            }
            let start = self.pos;
            let Some(ch) = self.peek() else {
                tokens.push((TokenKind::Eof, start));
                return Ok(tokens);
            };
            let kind = match ch {
                b'(' => {
                    self.pos += 1;
                    TokenKind::OpenParen
                }
                b')' => {
                    self.pos += 1;
                    TokenKind::CloseParen
                }
                b'!' if self.peek2() == Some(b'=') => {
                    self.pos += 2;
                    TokenKind::Cmp(CmpOp::NotEq)
                }
                b'!' => {
                    self.pos += 1;
                    TokenKind::Not
                }
                b'&' if self.peek2() == Some(b'&') => {
                    self.pos += 2;
                    TokenKind::And
                }
                b'|' if self.peek2() == Some(b'|') => {
                    self.pos += 2;
                    TokenKind::Or
                }
                b'-' if self.peek2() == Some(b'>') => {
                    self.pos += 2;
                    TokenKind::Implies
                }
                b'<' if self.peek2() == Some(b'-') && self.bytes.get(self.pos + 2) == Some(&b'>') =>
                {
                    self.pos += 3;
                    TokenKind::Iff
                }
                b'<' if self.peek2() == Some(b'=') => {
                    self.pos += 2;
                    TokenKind::Cmp(CmpOp::LessEq)
                }
                b'<' => {
                    self.pos += 1;
                    TokenKind::Cmp(CmpOp::Less)
                }
                b'>' if self.peek2() == Some(b'=') => {
                    self.pos += 2;
                    TokenKind::Cmp(CmpOp::GreaterEq)
                }
                b'>' => {
                    self.pos += 1;
                    TokenKind::Cmp(CmpOp::Greater)
                }
                b'=' => {
                    // accept both `=` and C-style `==`
                    self.pos += if self.peek2() == Some(b'=') { 2 } else { 1 };
                    TokenKind::Cmp(CmpOp::Eq)
                }
                _ if is_ident_start(ch) => self.lex_ident(start),
                _ => {
                    return Err(ParseError::UnexpectedChar {
                        ch: ch as char,
                        pos: start,
                    });
                }
            };
            tokens.push((kind, start));
        }
    }

    fn lex_ident(&mut self, start: usize) -> TokenKind {
        while let Some(b) = self.peek() {
            // a `-` only continues an identifier when it is not the start
            // of `->`
            if is_ident_cont(b) && !(b == b'-' && self.peek2() == Some(b'>')) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .unwrap_or_default()
            .to_string();
        match text.as_str() {
            "0" => TokenKind::Const(false),
            "1" => TokenKind::Const(true),
            _ => TokenKind::Ident(text),
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

fn is_ident_cont(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-'
}

// ---------------------------------------------------------------------------
// Parser – precedence climbing
//
// Precedence (highest to lowest):
//   1. primary: symbol, constant, '(' expr ')', '!' expr
//   2. comparison: =, !=, <, >, <=, >=
//   3. AND: &&
//   4. OR:  ||
//   5. implication: ->   (right associative)
//   6. equivalence: <->
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(TokenKind, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> (TokenKind, usize) {
        self.tokens
            .get(self.pos)
            .cloned()
            .unwrap_or((TokenKind::Eof, 0))
    }

    fn parse_iff(&mut self) -> Result<ExprRef, ParseError> {
        let mut left = self.parse_implies()?;
        while self.peek().0 == TokenKind::Iff {
            self.pos += 1;
            let right = self.parse_implies()?;
            left = Rc::new(BoolExpr::Iff(left, right));
        }
        Ok(left)
    }

    fn parse_implies(&mut self) -> Result<ExprRef, ParseError> {
        let left = self.parse_or()?;
        if self.peek().0 == TokenKind::Implies {
            self.pos += 1;
            let right = self.parse_implies()?;
            return Ok(Rc::new(BoolExpr::Implies(left, right)));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<ExprRef, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek().0 == TokenKind::Or {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Rc::new(BoolExpr::Or(left, right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ExprRef, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.peek().0 == TokenKind::And {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Rc::new(BoolExpr::And(left, right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<ExprRef, ParseError> {
        let left = self.parse_unary()?;
        if let (TokenKind::Cmp(op), _) = self.peek() {
            self.pos += 1;
            let right = self.parse_unary()?;
            return Ok(Rc::new(BoolExpr::Cmp(op, left, right)));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ExprRef, ParseError> {
        if self.peek().0 == TokenKind::Not {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Rc::new(BoolExpr::Not(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ExprRef, ParseError> {
        let (tok, pos) = self.peek();
        match tok {
            TokenKind::Ident(name) => {
                self.pos += 1;
                Ok(Rc::new(BoolExpr::Symbol(name)))
            }
            TokenKind::Const(b) => {
                self.pos += 1;
                Ok(Rc::new(BoolExpr::Const(b)))
            }
            TokenKind::OpenParen => {
                self.pos += 1;
                let inner = self.parse_iff()?;
                match self.peek() {
                    (TokenKind::CloseParen, _) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    (TokenKind::Eof, _) => Err(ParseError::UnexpectedEnd),
                    (other, pos) => Err(ParseError::UnexpectedToken {
                        token: format!("{:?}", other),
                        pos,
                    }),
                }
            }
            TokenKind::Eof => Err(ParseError::UnexpectedEnd),
            other => Err(ParseError::UnexpectedToken {
                token: format!("{:?}", other),
                pos,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_or_binds_looser_than_and() {
        let e = parse_string("a || b && c").unwrap();
        assert_eq!(e.to_string(), "(a || (b && c))");
    }

    #[test]
    fn implication_is_right_associative() {
        let e = parse_string("a -> b -> c").unwrap();
        assert_eq!(e.to_string(), "(a -> (b -> c))");
    }

    #[test]
    fn not_binds_tighter_than_comparison() {
        let e = parse_string("!CONFIG_A = y").unwrap();
        assert_eq!(e.to_string(), "(!CONFIG_A = y)");
    }

    #[test]
    fn iff_is_lowest() {
        let e = parse_string("B0 <-> FOO && !BAR").unwrap();
        assert_eq!(e.to_string(), "(B0 <-> (FOO && !BAR))");
    }

    #[test]
    fn mangled_and_marker_identifiers() {
        let e = parse_string("BAR. && ._.x86._.").unwrap();
        let syms = e.symbols();
        assert!(syms.contains("BAR."));
        assert!(syms.contains("._.x86._."));
    }

    #[test]
    fn constants_and_symbols_are_distinct() {
        let e = parse_string("(x || 0) && (y && 1)").unwrap();
        let syms = e.symbols();
        assert_eq!(
            syms.into_iter().collect::<Vec<_>>(),
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn multiline_conjunction_parses() {
        let e = parse_string("B0\n&& ( B0 <-> A && ! A )\n&& B00").unwrap();
        assert!(e.symbols().contains("B00"));
    }

    #[test]
    fn stray_character_is_an_error() {
        assert!(parse_string("a # b").is_err());
        assert!(parse_string("a &&").is_err());
    }
}
