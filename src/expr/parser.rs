//! Expression Block Parser
//!
//! Recursive-descent parser producing a statement list. Precedence, loosest
//! to tightest: `||`, `&&`, equality, comparison, additive, multiplicative,
//! unary, primary.

use crate::expr::lexer::{lex, Tok, Token};
use crate::expr::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Str(String),
    Num(f64),
    Bool(bool),
    Var { name: String, line: u32 },
    Call { name: String, args: Vec<Expr>, line: u32 },
    Unary { op: UnOp, expr: Box<Expr>, line: u32 },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, line: u32 },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Assign { name: String, expr: Expr },
    Return { expr: Expr },
    Throw { expr: Expr, continue_: bool, line: u32 },
}

/// Parse an expression block into statements. `base_line` is the absolute
/// line of the block's first line in its source file.
pub fn parse(code: &str, base_line: u32) -> Result<Vec<Stmt>, EvalError> {
    let tokens = lex(code, base_line)?;
    let mut parser = Parser { tokens, pos: 0, last_line: base_line };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    last_line: u32,
}

impl Parser {
    fn parse_program(&mut self) -> Result<Vec<Stmt>, EvalError> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_end() {
                break;
            }
            stmts.push(self.parse_stmt()?);
            if !self.at_end() {
                self.expect_separator()?;
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, EvalError> {
        match self.peek() {
            Some(Tok::Return) => {
                self.advance();
                let expr = self.parse_expr()?;
                Ok(Stmt::Return { expr })
            }
            Some(Tok::Throw) => {
                let line = self.line();
                self.advance();
                let continue_ = if self.peek() == Some(&Tok::Continue) {
                    self.advance();
                    true
                } else {
                    false
                };
                let expr = self.parse_expr()?;
                Ok(Stmt::Throw { expr, continue_, line })
            }
            Some(Tok::Ident(_)) if self.peek_at(1) == Some(&Tok::Assign) => {
                let name = match self.advance() {
                    Some(Token { tok: Tok::Ident(name), .. }) => name,
                    _ => unreachable!(),
                };
                self.advance(); // `=`
                let expr = self.parse_expr()?;
                Ok(Stmt::Assign { name, expr })
            }
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Tok::OrOr) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_equality()?;
        while self.peek() == Some(&Tok::AndAnd) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Tok::EqEq) => BinOp::Eq,
                Some(Tok::NotEq) => BinOp::Ne,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Mod,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Tok::Not) => {
                let line = self.line();
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary { op: UnOp::Not, expr: Box::new(expr), line })
            }
            Some(Tok::Minus) => {
                let line = self.line();
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary { op: UnOp::Neg, expr: Box::new(expr), line })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let line = self.line();
        match self.advance() {
            Some(Token { tok: Tok::Str(s), .. }) => Ok(Expr::Str(s)),
            Some(Token { tok: Tok::Num(n), .. }) => Ok(Expr::Num(n)),
            Some(Token { tok: Tok::True, .. }) => Ok(Expr::Bool(true)),
            Some(Token { tok: Tok::False, .. }) => Ok(Expr::Bool(false)),
            Some(Token { tok: Tok::Ident(name), .. }) => {
                if self.peek() == Some(&Tok::LParen) {
                    self.advance();
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args, line })
                } else {
                    Ok(Expr::Var { name, line })
                }
            }
            Some(Token { tok: Tok::LParen, .. }) => {
                let expr = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(expr)
            }
            Some(Token { tok, line }) => {
                Err(EvalError::new(format!("unexpected token {:?}", tok), line))
            }
            None => Err(EvalError::new("unexpected end of code block", self.last_line)),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Some(Token { tok: Tok::Comma, .. }) => continue,
                Some(Token { tok: Tok::RParen, .. }) => break,
                Some(Token { tok, line }) => {
                    return Err(EvalError::new(
                        format!("expected `,` or `)`, found {:?}", tok),
                        line,
                    ));
                }
                None => {
                    return Err(EvalError::new("unterminated argument list", self.last_line));
                }
            }
        }
        Ok(args)
    }

    fn skip_newlines(&mut self) {
        while self.peek() == Some(&Tok::Newline) {
            self.advance();
        }
    }

    fn expect_separator(&mut self) -> Result<(), EvalError> {
        match self.peek() {
            Some(Tok::Newline) => {
                self.advance();
                Ok(())
            }
            None => Ok(()),
            Some(tok) => {
                Err(EvalError::new(format!("expected end of statement, found {:?}", tok), self.line()))
            }
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), EvalError> {
        match self.advance() {
            Some(t) if t.tok == tok => Ok(()),
            Some(t) => Err(EvalError::new(format!("expected {:?}, found {:?}", tok, t.tok), t.line)),
            None => Err(EvalError::new(format!("expected {:?}", tok), self.last_line)),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|t| &t.tok)
    }

    fn line(&self) -> u32 {
        self.tokens.get(self.pos).map(|t| t.line).unwrap_or(self.last_line)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if let Some(t) = &tok {
            self.last_line = t.line;
            self.pos += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
