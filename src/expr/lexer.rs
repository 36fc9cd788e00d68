//! Expression Block Lexer
//!
//! Tokenizes an expression block. Lines are counted from the block's base
//! line number so token positions map directly to the user's source file.

use std::collections::HashMap;

use crate::expr::EvalError;

/// Token kinds of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Str(String),
    Num(f64),
    Ident(String),
    True,
    False,
    Return,
    Throw,
    Continue,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Assign,
    LParen,
    RParen,
    Comma,
    Newline,
}

/// A token with the absolute source line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

lazy_static::lazy_static! {
    /// Keywords of the expression language.
    static ref KEYWORDS: HashMap<&'static str, Tok> = {
        let mut m = HashMap::new();
        m.insert("true", Tok::True);
        m.insert("false", Tok::False);
        m.insert("return", Tok::Return);
        m.insert("throw", Tok::Throw);
        m.insert("continue", Tok::Continue);
        m
    };
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Tokenize `code`, counting lines from `base_line`.
pub fn lex(code: &str, base_line: u32) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();
    let mut line = base_line;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                chars.next();
                tokens.push(Token { tok: Tok::Newline, line });
                line += 1;
            }
            ';' => {
                chars.next();
                tokens.push(Token { tok: Tok::Newline, line });
            }
            c if c == ' ' || c == '\t' || c == '\r' => {
                chars.next();
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    // Line comment
                    while let Some(&c) = chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    tokens.push(Token { tok: Tok::Slash, line });
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let start_line = line;
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('r') => s.push('\r'),
                            Some('0') => s.push('\0'),
                            Some('\\') => s.push('\\'),
                            Some('\'') => s.push('\''),
                            Some('"') => s.push('"'),
                            Some(other) => {
                                s.push('\\');
                                s.push(other);
                            }
                            None => {
                                return Err(EvalError::new("unterminated string", start_line));
                            }
                        },
                        Some(c) if c == quote => break,
                        Some('\n') => {
                            return Err(EvalError::new("unterminated string", start_line));
                        }
                        Some(c) => s.push(c),
                        None => {
                            return Err(EvalError::new("unterminated string", start_line));
                        }
                    }
                }
                tokens.push(Token { tok: Tok::Str(s), line: start_line });
            }
            c if c.is_ascii_digit() => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = s
                    .parse()
                    .map_err(|_| EvalError::new(format!("invalid number `{}`", s), line))?;
                tokens.push(Token { tok: Tok::Num(n), line });
            }
            c if is_ident_start(c) => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if is_ident_continue(c) {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let tok = match KEYWORDS.get(s.as_str()) {
                    Some(t) => t.clone(),
                    None => Tok::Ident(s),
                };
                tokens.push(Token { tok, line });
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token { tok: Tok::EqEq, line });
                } else {
                    tokens.push(Token { tok: Tok::Assign, line });
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token { tok: Tok::NotEq, line });
                } else {
                    tokens.push(Token { tok: Tok::Not, line });
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token { tok: Tok::Le, line });
                } else {
                    tokens.push(Token { tok: Tok::Lt, line });
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token { tok: Tok::Ge, line });
                } else {
                    tokens.push(Token { tok: Tok::Gt, line });
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token { tok: Tok::AndAnd, line });
                } else {
                    return Err(EvalError::new("unexpected `&`", line));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token { tok: Tok::OrOr, line });
                } else {
                    return Err(EvalError::new("unexpected `|`", line));
                }
            }
            '+' => {
                chars.next();
                tokens.push(Token { tok: Tok::Plus, line });
            }
            '-' => {
                chars.next();
                tokens.push(Token { tok: Tok::Minus, line });
            }
            '*' => {
                chars.next();
                tokens.push(Token { tok: Tok::Star, line });
            }
            '%' => {
                chars.next();
                tokens.push(Token { tok: Tok::Percent, line });
            }
            '(' => {
                chars.next();
                tokens.push(Token { tok: Tok::LParen, line });
            }
            ')' => {
                chars.next();
                tokens.push(Token { tok: Tok::RParen, line });
            }
            ',' => {
                chars.next();
                tokens.push(Token { tok: Tok::Comma, line });
            }
            other => {
                return Err(EvalError::new(format!("unexpected character `{}`", other), line));
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Tests
// ============================================================================
