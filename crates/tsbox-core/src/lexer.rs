//! Byte-indexed single-pass tokenizer (component C1).
//!
//! Produces a stream of typed tokens with one-token lookahead and
//! snapshot/restore for backtracking, used by the parser to try and discard
//! an arrow-function-head parse. Comments and whitespace are skipped inline;
//! the lexer records whether a newline was crossed since the previous
//! produced token, which the parser uses both for automatic semicolon
//! insertion and for the no-line-terminator restriction on `return`,
//! `break`, `continue`, `throw`, and postfix `++`/`--`.

use crate::ast::Span;
use crate::error::TsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Identifier,
    Keyword,
    Number,
    String,
    Punctuator,
    PrivateIdentifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line_break_before: bool,
    pub span: Span,
}

impl Token {
    fn eof(pos: u32) -> Self {
        Self {
            kind: TokenKind::Eof,
            text: String::new(),
            line_break_before: true,
            span: Span::new(pos, pos),
        }
    }

    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn is_kind(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

pub const KEYWORDS: &[&str] = &[
    "var", "let", "const", "function", "return", "if", "else", "for", "while", "do", "break", "continue",
    "switch", "case", "default", "throw", "try", "catch", "finally", "class", "extends", "super", "this",
    "new", "typeof", "void", "delete", "instanceof", "in", "of", "true", "false", "null", "undefined",
    "async", "await", "yield", "static", "get", "set", "import", "export", "from", "as", "type", "interface",
];

fn is_keyword(text: &str) -> bool {
    KEYWORDS.contains(&text)
}

#[derive(Debug, Clone, Copy)]
pub struct LexerSnapshot {
    pos: usize,
    line_break_pending: bool,
}

/// Template literal chunk: either a "head"/"middle" piece followed by an
/// interpolated expression, or a "tail" piece that closes the template.
pub struct TemplateChunk {
    pub cooked: String,
    pub raw: String,
    pub tail: bool,
    pub span: Span,
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line_break_pending: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line_break_pending: false,
        }
    }

    pub fn snapshot(&self) -> LexerSnapshot {
        LexerSnapshot {
            pos: self.pos,
            line_break_pending: self.line_break_pending,
        }
    }

    pub fn restore(&mut self, snap: LexerSnapshot) {
        self.pos = snap.pos;
        self.line_break_pending = snap.line_break_pending;
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let rest = &self.src[self.pos..];
        let ch = rest.chars().next()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_byte() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.pos += 1;
                }
                Some(b'\n') => {
                    self.line_break_pending = true;
                    self.pos += 1;
                }
                Some(b'/') if self.peek_byte_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_byte_at(1) == Some(b'*') => {
                    self.pos += 2;
                    while self.pos < self.bytes.len() {
                        if self.peek_byte() == Some(b'*') && self.peek_byte_at(1) == Some(b'/') {
                            self.pos += 2;
                            break;
                        }
                        if self.peek_byte() == Some(b'\n') {
                            self.line_break_pending = true;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    /// Produces the next token. Panics never; lexical errors (unterminated
    /// strings) are reported as `TsError::Parse`.
    pub fn next_token(&mut self) -> Result<Token, TsError> {
        self.skip_trivia();
        let line_break_before = std::mem::take(&mut self.line_break_pending);
        let start = self.pos as u32;

        let Some(c) = self.peek_char() else {
            return Ok(Token::eof(start));
        };

        if c == '"' || c == '\'' {
            return self.read_string(c, start, line_break_before);
        }
        if c == '#' {
            return self.read_private_identifier(start, line_break_before);
        }
        if c.is_ascii_digit() || (c == '.' && self.peek_char_at(1).is_some_and(|d| d.is_ascii_digit())) {
            return self.read_number(start, line_break_before);
        }
        if is_ident_start(c) {
            return self.read_identifier(start, line_break_before);
        }
        self.read_punctuator(start, line_break_before)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_char_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn read_identifier(&mut self, start: u32, line_break_before: bool) -> Result<Token, TsError> {
        let begin = self.pos;
        while let Some(c) = self.peek_char() {
            if is_ident_continue(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let text = self.src[begin..self.pos].to_owned();
        let kind = if is_keyword(&text) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        Ok(Token {
            kind,
            text,
            line_break_before,
            span: Span::new(start, self.pos as u32),
        })
    }

    fn read_private_identifier(&mut self, start: u32, line_break_before: bool) -> Result<Token, TsError> {
        self.pos += 1; // '#'
        let begin = self.pos;
        while let Some(c) = self.peek_char() {
            if is_ident_continue(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if self.pos == begin {
            return Err(TsError::parse(
                "expected identifier after '#'",
                Span::new(start, self.pos as u32),
            ));
        }
        Ok(Token {
            kind: TokenKind::PrivateIdentifier,
            text: self.src[begin..self.pos].to_owned(),
            line_break_before,
            span: Span::new(start, self.pos as u32),
        })
    }

    fn read_number(&mut self, start: u32, line_break_before: bool) -> Result<Token, TsError> {
        let begin = self.pos;
        if self.peek_byte() == Some(b'0')
            && matches!(self.peek_byte_at(1), Some(b'x' | b'X' | b'b' | b'B' | b'o' | b'O'))
        {
            self.pos += 2;
            while self.peek_byte().is_some_and(|b| b.is_ascii_alphanumeric()) {
                self.pos += 1;
            }
        } else {
            while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
            if self.peek_byte() == Some(b'.') {
                self.pos += 1;
                while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
            if matches!(self.peek_byte(), Some(b'e' | b'E')) {
                let save = self.pos;
                self.pos += 1;
                if matches!(self.peek_byte(), Some(b'+' | b'-')) {
                    self.pos += 1;
                }
                if self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                    while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                        self.pos += 1;
                    }
                } else {
                    self.pos = save;
                }
            }
        }
        // optional BigInt suffix `n` — kept in the token text, stripped by the parser.
        if self.peek_byte() == Some(b'n') {
            self.pos += 1;
        }
        Ok(Token {
            kind: TokenKind::Number,
            text: self.src[begin..self.pos].to_owned(),
            line_break_before,
            span: Span::new(start, self.pos as u32),
        })
    }

    fn read_string(&mut self, quote: char, start: u32, line_break_before: bool) -> Result<Token, TsError> {
        self.pos += 1;
        let content_start = self.pos;
        // fast path: scan for the closing quote with no backslash in between.
        let mut has_escape = false;
        let mut idx = self.pos;
        loop {
            match self.bytes.get(idx) {
                None => return Err(TsError::parse("unterminated string literal", Span::new(start, idx as u32))),
                Some(b) if *b as char == quote => break,
                Some(b'\n') => return Err(TsError::parse("unterminated string literal", Span::new(start, idx as u32))),
                Some(b'\\') => {
                    has_escape = true;
                    idx += 2;
                }
                _ => idx += 1,
            }
        }
        let text = if has_escape {
            self.pos = content_start;
            self.read_escaped_string(quote, start)?
        } else {
            let s = self.src[content_start..idx].to_owned();
            self.pos = idx + 1;
            s
        };
        Ok(Token {
            kind: TokenKind::String,
            text,
            line_break_before,
            span: Span::new(start, self.pos as u32),
        })
    }

    fn read_escaped_string(&mut self, quote: char, start: u32) -> Result<String, TsError> {
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(TsError::parse("unterminated string literal", Span::new(start, self.pos as u32)));
            };
            if c == quote {
                break;
            }
            if c == '\n' {
                return Err(TsError::parse("unterminated string literal", Span::new(start, self.pos as u32)));
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            match self.bump() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some('`') => out.push('`'),
                Some('$') => out.push('$'),
                Some('\n') => {}
                Some(other) => out.push(other),
                None => {
                    return Err(TsError::parse(
                        "unterminated string literal",
                        Span::new(start, self.pos as u32),
                    ));
                }
            }
        }
        Ok(out)
    }

    /// Reads one template literal chunk, starting either right after the
    /// opening backtick or right after a `}` that closed an interpolation.
    /// Stops at the next `${` (non-tail) or closing backtick (tail).
    pub fn read_template_chunk(&mut self) -> Result<TemplateChunk, TsError> {
        let start = self.pos as u32;
        let raw_start = self.pos;
        let mut cooked = String::new();
        loop {
            match self.peek_char() {
                None => {
                    return Err(TsError::parse(
                        "unterminated template literal",
                        Span::new(start, self.pos as u32),
                    ));
                }
                Some('`') => {
                    let raw = self.src[raw_start..self.pos].to_owned();
                    self.pos += 1;
                    return Ok(TemplateChunk {
                        cooked,
                        raw,
                        tail: true,
                        span: Span::new(start, self.pos as u32),
                    });
                }
                Some('$') if self.peek_char_at(1) == Some('{') => {
                    let raw = self.src[raw_start..self.pos].to_owned();
                    self.pos += 2;
                    return Ok(TemplateChunk {
                        cooked,
                        raw,
                        tail: false,
                        span: Span::new(start, self.pos as u32),
                    });
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.bump() {
                        Some('n') => cooked.push('\n'),
                        Some('r') => cooked.push('\r'),
                        Some('t') => cooked.push('\t'),
                        Some('\\') => cooked.push('\\'),
                        Some('`') => cooked.push('`'),
                        Some('$') => cooked.push('$'),
                        Some(other) => cooked.push(other),
                        None => {
                            return Err(TsError::parse(
                                "unterminated template literal",
                                Span::new(start, self.pos as u32),
                            ));
                        }
                    }
                }
                Some(c) => {
                    cooked.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn read_punctuator(&mut self, start: u32, line_break_before: bool) -> Result<Token, TsError> {
        const THREE: &[&str] = &["...", "===", "!==", "**=", "<<=", ">>=", "&&=", "||=", "??=", ">>>"];
        const FOUR: &[&str] = &[">>>="];
        const TWO: &[&str] = &[
            "?.", "??", "||", "&&", "==", "!=", "<=", ">=", "<<", ">>", "**", "*=", "/=", "%=", "+=", "-=",
            "++", "--", "=>",
        ];
        let rest = &self.src[self.pos..];
        for len4 in FOUR {
            if rest.starts_with(len4) {
                self.pos += len4.len();
                return Ok(self.punct_token(*len4, start, line_break_before));
            }
        }
        for len3 in THREE {
            if rest.starts_with(len3) {
                self.pos += 3;
                return Ok(self.punct_token(*len3, start, line_break_before));
            }
        }
        for len2 in TWO {
            if rest.starts_with(len2) {
                self.pos += 2;
                return Ok(self.punct_token(*len2, start, line_break_before));
            }
        }
        let Some(c) = self.bump() else {
            return Ok(Token::eof(start));
        };
        Ok(Token {
            kind: TokenKind::Punctuator,
            text: c.to_string(),
            line_break_before,
            span: Span::new(start, self.pos as u32),
        })
    }

    fn punct_token(&self, text: &str, start: u32, line_break_before: bool) -> Token {
        Token {
            kind: TokenKind::Punctuator,
            text: text.to_owned(),
            line_break_before,
            span: Span::new(start, self.pos as u32),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_simple_arithmetic() {
        let toks = tokens("1 + 2");
        assert_eq!(toks[0].text, "1");
        assert_eq!(toks[1].text, "+");
        assert_eq!(toks[2].text, "2");
    }

    #[test]
    fn lexes_multi_char_punctuators() {
        let toks = tokens("a ?. b ??= c >>>= d");
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert!(texts.contains(&"?."));
        assert!(texts.contains(&"??="));
        assert!(texts.contains(&">>>="));
    }

    #[test]
    fn fast_path_string_has_no_escapes() {
        let toks = tokens(r#""hello world""#);
        assert_eq!(toks[0].text, "hello world");
    }

    #[test]
    fn slow_path_string_expands_escapes() {
        let toks = tokens(r#""a\nb""#);
        assert_eq!(toks[0].text, "a\nb");
    }

    #[test]
    fn unterminated_string_is_a_parse_error() {
        let mut lexer = Lexer::new("\"abc");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn tracks_line_break_before_token() {
        let toks = tokens("a\nb");
        assert!(!toks[0].line_break_before);
        assert!(toks[1].line_break_before);
    }

    #[test]
    fn private_identifier() {
        let toks = tokens("#x");
        assert_eq!(toks[0].kind, TokenKind::PrivateIdentifier);
        assert_eq!(toks[0].text, "x");
    }
}
