//! The lexer.
//!
//! Hand-written scanner producing a token stream with source positions.
//! Newlines are statement separators except inside bracketed constructs,
//! where they are suppressed.

use std::fmt::{self, Display};

use crate::error::{CompileError, CompileResult, SourceLoc};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    // keywords
    KwImport,
    KwClass,
    KwDef,
    KwAttr,
    KwIf,
    KwThen,
    KwElse,
    KwEnd,
    KwFor,
    KwIn,
    KwReturn,
    KwSelf,
    KwSuper,
    KwTrue,
    KwFalse,

    // punctuation and operators
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    DoubleColon,
    Semi,
    Newline,
    Assign,
    Subtype, // <:
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    BitNot,
    Amp,
    Pipe,
    Caret,
    AndAnd,
    OrOr,
    Shl,
    Shr,

    Eof,
}

impl Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Ident(s) => write!(f, "{s}"),
            Self::Newline => write!(f, "<newline>"),
            Self::Eof => write!(f, "<eof>"),
            other => {
                let s = match other {
                    Self::KwImport => "import",
                    Self::KwClass => "class",
                    Self::KwDef => "def",
                    Self::KwAttr => "attr",
                    Self::KwIf => "if",
                    Self::KwThen => "then",
                    Self::KwElse => "else",
                    Self::KwEnd => "end",
                    Self::KwFor => "for",
                    Self::KwIn => "in",
                    Self::KwReturn => "return",
                    Self::KwSelf => "self",
                    Self::KwSuper => "super",
                    Self::KwTrue => "true",
                    Self::KwFalse => "false",
                    Self::LParen => "(",
                    Self::RParen => ")",
                    Self::LBracket => "[",
                    Self::RBracket => "]",
                    Self::LBrace => "{",
                    Self::RBrace => "}",
                    Self::Comma => ",",
                    Self::Dot => ".",
                    Self::Colon => ":",
                    Self::DoubleColon => "::",
                    Self::Semi => ";",
                    Self::Assign => "=",
                    Self::Subtype => "<:",
                    Self::Eq => "==",
                    Self::Neq => "!=",
                    Self::Lt => "<",
                    Self::Le => "<=",
                    Self::Gt => ">",
                    Self::Ge => ">=",
                    Self::Plus => "+",
                    Self::Minus => "-",
                    Self::Star => "*",
                    Self::Slash => "/",
                    Self::Percent => "%",
                    Self::Not => "!",
                    Self::BitNot => "~",
                    Self::Amp => "&",
                    Self::Pipe => "|",
                    Self::Caret => "^",
                    Self::AndAnd => "&&",
                    Self::OrOr => "||",
                    Self::Shl => "<<",
                    Self::Shr => ">>",
                    _ => unreachable!(),
                };
                write!(f, "{s}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub loc: SourceLoc,
}

fn keyword(ident: &str) -> Option<Tok> {
    Some(match ident {
        "import" => Tok::KwImport,
        "class" => Tok::KwClass,
        "def" => Tok::KwDef,
        "attr" => Tok::KwAttr,
        "if" => Tok::KwIf,
        "then" => Tok::KwThen,
        "else" => Tok::KwElse,
        "end" => Tok::KwEnd,
        "for" => Tok::KwFor,
        "in" => Tok::KwIn,
        "return" => Tok::KwReturn,
        "self" => Tok::KwSelf,
        "super" => Tok::KwSuper,
        "true" => Tok::KwTrue,
        "false" => Tok::KwFalse,
        _ => return None,
    })
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    /// Depth of open `(`/`[` pairs; newlines inside are suppressed.
    paren_depth: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            paren_depth: 0,
        }
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.line, self.col)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn next_token(&mut self) -> CompileResult<Token> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.bump();
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'\n') if self.paren_depth > 0 => {
                    self.bump();
                }
                _ => break,
            }
        }

        let loc = self.loc();
        let Some(c) = self.peek() else {
            return Ok(Token { tok: Tok::Eof, loc });
        };

        let tok = match c {
            b'\n' => {
                self.bump();
                Tok::Newline
            }
            b'0'..=b'9' => return self.lex_number(loc),
            b'"' => return self.lex_string(loc),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return Ok(self.lex_ident(loc)),
            b'(' => {
                self.bump();
                self.paren_depth += 1;
                Tok::LParen
            }
            b')' => {
                self.bump();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RParen
            }
            b'[' => {
                self.bump();
                self.paren_depth += 1;
                Tok::LBracket
            }
            b']' => {
                self.bump();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RBracket
            }
            b'{' => {
                self.bump();
                Tok::LBrace
            }
            b'}' => {
                self.bump();
                Tok::RBrace
            }
            b',' => {
                self.bump();
                Tok::Comma
            }
            b'.' => {
                self.bump();
                Tok::Dot
            }
            b';' => {
                self.bump();
                Tok::Semi
            }
            b':' => {
                self.bump();
                if self.peek() == Some(b':') {
                    self.bump();
                    Tok::DoubleColon
                } else {
                    Tok::Colon
                }
            }
            b'=' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Tok::Eq
                } else {
                    Tok::Assign
                }
            }
            b'!' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Tok::Neq
                } else {
                    Tok::Not
                }
            }
            b'<' => {
                self.bump();
                match self.peek() {
                    Some(b':') => {
                        self.bump();
                        Tok::Subtype
                    }
                    Some(b'=') => {
                        self.bump();
                        Tok::Le
                    }
                    Some(b'<') => {
                        self.bump();
                        Tok::Shl
                    }
                    _ => Tok::Lt,
                }
            }
            b'>' => {
                self.bump();
                match self.peek() {
                    Some(b'=') => {
                        self.bump();
                        Tok::Ge
                    }
                    Some(b'>') => {
                        self.bump();
                        Tok::Shr
                    }
                    _ => Tok::Gt,
                }
            }
            b'+' => {
                self.bump();
                Tok::Plus
            }
            b'-' => {
                self.bump();
                Tok::Minus
            }
            b'*' => {
                self.bump();
                Tok::Star
            }
            b'/' => {
                self.bump();
                Tok::Slash
            }
            b'%' => {
                self.bump();
                Tok::Percent
            }
            b'~' => {
                self.bump();
                Tok::BitNot
            }
            b'&' => {
                self.bump();
                if self.peek() == Some(b'&') {
                    self.bump();
                    Tok::AndAnd
                } else {
                    Tok::Amp
                }
            }
            b'|' => {
                self.bump();
                if self.peek() == Some(b'|') {
                    self.bump();
                    Tok::OrOr
                } else {
                    Tok::Pipe
                }
            }
            b'^' => {
                self.bump();
                Tok::Caret
            }
            other => {
                return Err(CompileError::parse(
                    format!("Unexpected character {:?}", char::from(other)),
                    loc,
                ));
            }
        };
        Ok(Token { tok, loc })
    }

    fn lex_number(&mut self, loc: SourceLoc) -> CompileResult<Token> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek2(), Some(b'0'..=b'9')) {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.bump();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii digits");
        let tok = if is_float {
            let v = text
                .parse::<f64>()
                .map_err(|e| CompileError::parse(format!("Bad float literal: {e}"), loc))?;
            Tok::Float(v)
        } else {
            let v = text
                .parse::<i64>()
                .map_err(|e| CompileError::parse(format!("Bad int literal: {e}"), loc))?;
            Tok::Int(v)
        };
        Ok(Token { tok, loc })
    }

    fn lex_string(&mut self, loc: SourceLoc) -> CompileResult<Token> {
        self.bump(); // opening quote
        let mut buf = String::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => {
                    return Err(CompileError::parse("Unterminated string literal", loc));
                }
                Some(b'"') => break,
                Some(b'\\') => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| CompileError::parse("Unterminated escape", loc))?;
                    match esc {
                        b'n' => buf.push('\n'),
                        b't' => buf.push('\t'),
                        b'\\' => buf.push('\\'),
                        b'"' => buf.push('"'),
                        b'0' => buf.push('\0'),
                        other => {
                            return Err(CompileError::parse(
                                format!("Unknown escape \\{}", char::from(other)),
                                loc,
                            ));
                        }
                    }
                }
                Some(other) => buf.push(char::from(other)),
            }
        }
        Ok(Token {
            tok: Tok::Str(buf),
            loc,
        })
    }

    fn lex_ident(&mut self, loc: SourceLoc) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')) {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .expect("ascii identifier")
            .to_owned();
        let tok = keyword(&text).unwrap_or(Tok::Ident(text));
        Token { tok, loc }
    }
}

/// Lexes an entire source buffer.
pub fn lex(src: &str) -> CompileResult<Vec<Token>> {
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    loop {
        let t = lexer.next_token()?;
        let eof = t.tok == Tok::Eof;
        out.push(t);
        if eof {
            return Ok(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        lex(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            toks("x = 1 + 2.5 <= y"),
            vec![
                Tok::Ident("x".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::Plus,
                Tok::Float(2.5),
                Tok::Le,
                Tok::Ident("y".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_subtype() {
        assert_eq!(
            toks("class B <: A"),
            vec![
                Tok::KwClass,
                Tok::Ident("B".into()),
                Tok::Subtype,
                Tok::Ident("A".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_suppressed_in_parens() {
        assert_eq!(
            toks("f(1,\n2)"),
            vec![
                Tok::Ident("f".into()),
                Tok::LParen,
                Tok::Int(1),
                Tok::Comma,
                Tok::Int(2),
                Tok::RParen,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes_and_comments() {
        assert_eq!(
            toks("\"a\\nb\" # trailing"),
            vec![Tok::Str("a\nb".into()), Tok::Eof]
        );
    }
}
