//! Lexer for nibble source text.
//!
//! Tokens are produced lazily, one per [`Lexer::next_token`] call. Once the
//! input is exhausted every further call returns [`TokenKind::Eof`]; to scan
//! again the lexer has to be re-initialised with [`Lexer::init`].

use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Punctuation
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }
    Comma,    // ,
    Dot,      // .
    Semi,     // ;

    // Operators
    Minus,        // -
    Plus,         // +
    Star,         // *
    Slash,        // /
    Bang,         // !
    BangEqual,    // !=
    Equal,        // =
    EqualEqual,   // ==
    Greater,      // >
    GreaterEqual, // >=
    Less,         // <
    LessEqual,    // <=
    PlusEqual,    // +=
    MinusEqual,   // -=
    StarEqual,    // *=
    SlashEqual,   // /=
    Amp,          // &
    Pipe,         // |
    Caret,        // ^

    // Literals
    Ident,
    IntLiteral,
    FloatLiteral,
    StringLiteral,

    // Keywords
    Let,
    If,
    Else,
    While,
    Func,
    Return,

    Error(LexErrorKind),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    UnexpectedChar,
    UnterminatedString,
}

impl LexErrorKind {
    pub fn message(self) -> &'static str {
        match self {
            LexErrorKind::UnexpectedChar => "unexpected character",
            LexErrorKind::UnterminatedString => "unterminated string literal",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            LexErrorKind::UnexpectedChar => "E0001",
            LexErrorKind::UnterminatedString => "E0002",
        }
    }
}

/// A single token with its kind and span.
///
/// The span refers to the original source string; the caller keeps the
/// source alive for as long as token text is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn line(&self) -> u32 {
        self.span.line
    }

    pub fn text<'src>(&self, source: &'src str) -> &'src str {
        self.span.text(source)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, TokenKind::Error(_))
    }

    /// The diagnostic carried by an error token.
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        match self.kind {
            TokenKind::Error(kind) => {
                Some(Diagnostic::error(kind.message(), self.span).with_code(kind.code()))
            }
            _ => None,
        }
    }
}

pub struct Lexer<'src> {
    source: &'src str,
    chars: &'src [u8],
    start: usize,
    index: usize,
    line: u32,
    done: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            source,
            chars: source.as_bytes(),
            start: 0,
            index: 0,
            line: 1,
            done: false,
        }
    }

    /// Reset to the beginning of `source`.
    pub fn init(&mut self, source: &'src str) {
        self.source = source;
        self.chars = source.as_bytes();
        self.start = 0;
        self.index = 0;
        self.line = 1;
        self.done = false;
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();
        self.start = self.index;

        let Some(ch) = self.consume_char() else {
            return self.make_token(TokenKind::Eof);
        };

        let kind = match ch {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b';' => TokenKind::Semi,
            b'&' => TokenKind::Amp,
            b'|' => TokenKind::Pipe,
            b'^' => TokenKind::Caret,
            b'-' => self.either(b'=', TokenKind::MinusEqual, TokenKind::Minus),
            b'+' => self.either(b'=', TokenKind::PlusEqual, TokenKind::Plus),
            b'*' => self.either(b'=', TokenKind::StarEqual, TokenKind::Star),
            b'/' => self.either(b'=', TokenKind::SlashEqual, TokenKind::Slash),
            b'!' => self.either(b'=', TokenKind::BangEqual, TokenKind::Bang),
            b'=' => self.either(b'=', TokenKind::EqualEqual, TokenKind::Equal),
            b'>' => self.either(b'=', TokenKind::GreaterEqual, TokenKind::Greater),
            b'<' => self.either(b'=', TokenKind::LessEqual, TokenKind::Less),
            b'"' => self.lex_string(),
            b'0'..=b'9' => self.lex_number(),
            _ if is_ident_start(ch) => self.lex_ident_or_keyword(),
            _ => {
                // Swallow the rest of a multi-byte character so spans stay
                // on char boundaries.
                while self.peek_char().is_some_and(|b| b & 0xC0 == 0x80) {
                    self.consume_char();
                }
                TokenKind::Error(LexErrorKind::UnexpectedChar)
            }
        };
        self.make_token(kind)
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            span: Span::new(self.start, self.index - self.start, self.line),
        }
    }

    fn either(&mut self, next: u8, matched: TokenKind, single: TokenKind) -> TokenKind {
        if self.peek_char() == Some(next) {
            self.consume_char();
            matched
        } else {
            single
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek_char() {
            match ch {
                b' ' | b'\t' | b'\r' => {
                    self.consume_char();
                }
                b'\n' => {
                    self.consume_char();
                    self.line += 1;
                }
                b'/' if self.peek_next() == Some(b'/') => {
                    while self.peek_char().is_some_and(|b| b != b'\n') {
                        self.consume_char();
                    }
                }
                b'/' if self.peek_next() == Some(b'*') => {
                    self.consume_char();
                    self.consume_char();
                    // An unterminated block comment runs to end of input.
                    loop {
                        match self.peek_char() {
                            None => break,
                            Some(b'*') if self.peek_next() == Some(b'/') => {
                                self.consume_char();
                                self.consume_char();
                                break;
                            }
                            Some(b'\n') => {
                                self.consume_char();
                                self.line += 1;
                            }
                            Some(_) => {
                                self.consume_char();
                            }
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn lex_string(&mut self) -> TokenKind {
        // Opening quote already consumed.
        while let Some(ch) = self.peek_char() {
            match ch {
                b'"' => {
                    self.consume_char();
                    return TokenKind::StringLiteral;
                }
                b'\n' => break,
                b'\\' => {
                    // The escaped character is kept verbatim.
                    self.consume_char();
                    match self.peek_char() {
                        Some(b'\n') | None => break,
                        Some(_) => {
                            self.consume_char();
                        }
                    }
                }
                _ => {
                    self.consume_char();
                }
            }
        }
        TokenKind::Error(LexErrorKind::UnterminatedString)
    }

    fn lex_number(&mut self) -> TokenKind {
        while self.peek_char().is_some_and(|b| b.is_ascii_digit()) {
            self.consume_char();
        }

        // A '.' only belongs to the number when a digit follows it.
        if self.peek_char() == Some(b'.') && self.peek_next().is_some_and(|b| b.is_ascii_digit()) {
            self.consume_char();
            while self.peek_char().is_some_and(|b| b.is_ascii_digit()) {
                self.consume_char();
            }
            return TokenKind::FloatLiteral;
        }
        TokenKind::IntLiteral
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        while self.peek_char().is_some_and(is_ident_continue) {
            self.consume_char();
        }
        keyword_or_ident(&self.source[self.start..self.index])
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) -> Option<u8> {
        let ch = self.peek_char()?;
        self.index += 1;
        Some(ch)
    }
}

/// Yields every token up to and including end-of-input, then stops.
impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        let token = self.next_token();
        self.done = token.kind == TokenKind::Eof;
        Some(token)
    }
}

/// Lex all of `source` eagerly.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).collect()
}

/// Dispatch on the first character, then compare the remaining suffix.
fn keyword_or_ident(text: &str) -> TokenKind {
    let (first, rest) = match text.as_bytes().split_first() {
        Some((first, _)) => (*first, &text[1..]),
        None => return TokenKind::Ident,
    };
    let (suffix, kind) = match first {
        b'l' => ("et", TokenKind::Let),
        b'i' => ("f", TokenKind::If),
        b'e' => ("lse", TokenKind::Else),
        b'w' => ("hile", TokenKind::While),
        b'f' => ("unc", TokenKind::Func),
        b'r' => ("eturn", TokenKind::Return),
        _ => return TokenKind::Ident,
    };
    if rest == suffix { kind } else { TokenKind::Ident }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}
