//! Recursive-descent parser for the snippet language
//!
//! Grammar:
//! ```text
//! program := stmt (SEP stmt)*
//! stmt    := "import" IDENT | "let" IDENT "=" expr | expr
//! expr    := or
//! or      := and ("or" and)*
//! and     := not ("and" not)*
//! not     := "not" not | cmp
//! cmp     := sum (("=="|"!="|"<"|"<="|">"|">=") sum)?
//! sum     := term (("+"|"-") term)*
//! term    := unary (("*"|"/"|"%") unary)*
//! unary   := "-" unary | postfix
//! postfix := primary ("[" expr "]")*
//! primary := literal | IDENT | IDENT "." IDENT "(" args ")" | "[" args "]"
//!          | "{" (STR ":" expr),* "}" | "(" expr ")"
//! ```
//! There are no loops, user functions or general attribute access.

use crate::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::lexer::{Spanned, Token};
use dpo_types::Scalar;

/// Nesting bound for expressions
const MAX_DEPTH: usize = 64;

/// Grammar failure with the line it was detected on
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line
    pub line: usize,
    /// What was wrong
    pub message: String,
}

/// Parse a token stream into a program
///
/// # Errors
/// Returns [`ParseError`] on the first grammar violation, or when the
/// program has no statement that produces a result.
pub fn parse(tokens: &[Spanned]) -> Result<Program, ParseError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut statements = Vec::new();
    loop {
        parser.skip_separators();
        if parser.at_end() {
            break;
        }
        statements.push(parser.statement()?);
        if !parser.at_end() && !parser.eat(&Token::Separator) {
            return Err(parser.error("expected end of statement"));
        }
    }

    if !statements
        .iter()
        .any(|s| matches!(s, Stmt::Let { .. } | Stmt::Expr { .. }))
    {
        return Err(ParseError {
            line: tokens.last().map_or(1, |t| t.line),
            message: "snippet produces no result".to_string(),
        });
    }
    Ok(Program { statements })
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn skip_separators(&mut self) {
        while self.eat(&Token::Separator) {}
    }

    fn error(&self, message: &str) -> ParseError {
        let found = match self.peek() {
            Some(Token::Unknown(c)) => format!("unexpected character '{c}'"),
            Some(Token::Unterminated) => "unterminated string".to_string(),
            Some(t) => format!("{message}, found {t:?}"),
            None => format!("{message}, found end of input"),
        };
        ParseError {
            line: self.line(),
            message: found,
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(&format!("expected {what}"))),
        }
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Import) => {
                self.pos += 1;
                let module = self.ident("module name")?;
                Ok(Stmt::Import { module, line })
            }
            Some(Token::Let) => {
                self.pos += 1;
                let name = self.ident("variable name")?;
                self.expect(&Token::Assign, "'='")?;
                let value = self.expr()?;
                Ok(Stmt::Let { name, value, line })
            }
            _ => Ok(Stmt::Expr {
                value: self.expr()?,
                line,
            }),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        let result = self.or();
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not()?;
        while self.eat(&Token::And) {
            let right = self.not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Not) {
            let operand = self.nested(Self::not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.sum()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.sum()?;
        Ok(binary(op, left, right))
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn nested(&mut self, f: fn(&mut Self) -> Result<Expr, ParseError>) -> Result<Expr, ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut target = self.primary()?;
        while self.eat(&Token::LBracket) {
            let index = self.expr()?;
            self.expect(&Token::RBracket, "']'")?;
            target = Expr::Index {
                target: Box::new(target),
                index: Box::new(index),
            };
        }
        Ok(target)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.error("expected expression")),
        };
        match token {
            Token::Int(i) => {
                self.pos += 1;
                Ok(Expr::Literal(Scalar::Int(i)))
            }
            Token::Float(f) => {
                self.pos += 1;
                Ok(Expr::Literal(Scalar::Float(f)))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Literal(Scalar::Str(s)))
            }
            Token::True => {
                self.pos += 1;
                Ok(Expr::Literal(Scalar::Bool(true)))
            }
            Token::False => {
                self.pos += 1;
                Ok(Expr::Literal(Scalar::Bool(false)))
            }
            Token::Null => {
                self.pos += 1;
                Ok(Expr::Literal(Scalar::Null))
            }
            Token::Ident(name) => {
                if self.peek_at(1) == Some(&Token::Dot) {
                    self.pos += 2;
                    let function = self.ident("function name after '.'")?;
                    if self.peek() != Some(&Token::LParen) {
                        return Err(self.error("attribute access is only allowed as a module call"));
                    }
                    self.pos += 1;
                    let args = self.arguments(&Token::RParen, "')'")?;
                    return Ok(Expr::Call {
                        module: name,
                        function,
                        args,
                    });
                }
                if self.peek_at(1) == Some(&Token::LParen) {
                    return Err(self.error("bare function calls are not allowed"));
                }
                self.pos += 1;
                Ok(Expr::Var(name))
            }
            Token::LBracket => {
                self.pos += 1;
                Ok(Expr::List(self.arguments(&Token::RBracket, "']'")?))
            }
            Token::LBrace => {
                self.pos += 1;
                let mut entries = Vec::new();
                loop {
                    if self.eat(&Token::RBrace) {
                        break;
                    }
                    let key = match self.peek() {
                        Some(Token::Str(k)) | Some(Token::Ident(k)) => k.clone(),
                        _ => return Err(self.error("expected map key")),
                    };
                    self.pos += 1;
                    self.expect(&Token::Colon, "':'")?;
                    entries.push((key, self.expr()?));
                    if !self.eat(&Token::Comma) {
                        self.expect(&Token::RBrace, "'}'")?;
                        break;
                    }
                }
                Ok(Expr::Map(entries))
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(self.error("expected expression")),
        }
    }

    fn arguments(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(args);
            }
            args.push(self.expr()?);
            if !self.eat(&Token::Comma) {
                self.expect(close, what)?;
                return Ok(args);
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
