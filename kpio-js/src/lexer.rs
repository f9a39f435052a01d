//! Lexer (tokenizer).

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::ParseError;
use crate::token::{Span, Token, TokenKind};

type LexResult<T> = Result<T, ParseError>;

/// Source tokenizer.
pub struct Lexer {
    /// Source characters.
    chars: Vec<char>,
    /// Current position.
    pos: usize,
    /// Current line (1-based).
    line: usize,
    /// Start of current token.
    token_start: usize,
    /// Start line of current token.
    token_line: usize,
    /// Whether a line terminator was skipped before the current token.
    newline_before: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            token_start: 0,
            token_line: 1,
            newline_before: false,
        }
    }

    /// Tokenize the entire source.
    pub fn tokenize(&mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> LexResult<Token> {
        self.newline_before = false;
        self.skip_whitespace_and_comments()?;

        self.token_start = self.pos;
        self.token_line = self.line;

        if self.is_eof() {
            return Ok(self.make_token(TokenKind::Eof));
        }

        let ch = self.current();
        if ch.is_ascii_digit() || (ch == '.' && self.peek().is_ascii_digit()) {
            return self.scan_number();
        }
        if ch == '"' || ch == '\'' {
            return self.scan_string(ch);
        }
        if is_id_start(ch) {
            return Ok(self.scan_identifier());
        }
        self.scan_punctuator()
    }

    fn skip_whitespace_and_comments(&mut self) -> LexResult<()> {
        loop {
            while !self.is_eof() && is_whitespace(self.current()) {
                if is_line_terminator(self.current()) {
                    self.newline_before = true;
                    if !(self.current() == '\r' && self.peek() == '\n') {
                        self.line += 1;
                    }
                }
                self.pos += 1;
            }

            if self.current() == '/' && self.peek() == '/' {
                while !self.is_eof() && !is_line_terminator(self.current()) {
                    self.pos += 1;
                }
                continue;
            }

            if self.current() == '/' && self.peek() == '*' {
                let start_line = self.line;
                self.pos += 2;
                loop {
                    if self.is_eof() {
                        return Err(ParseError::new("unterminated comment", start_line));
                    }
                    if self.current() == '*' && self.peek() == '/' {
                        self.pos += 2;
                        break;
                    }
                    if is_line_terminator(self.current()) {
                        self.line += 1;
                        self.newline_before = true;
                    }
                    self.pos += 1;
                }
                continue;
            }

            return Ok(());
        }
    }

    fn scan_number(&mut self) -> LexResult<Token> {
        let start = self.pos;

        if self.current() == '0' && matches!(self.peek(), 'x' | 'X') {
            self.pos += 2;
            let digits_start = self.pos;
            while self.current().is_ascii_hexdigit() {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            let value = crate::value::parse_radix_digits(&digits, 16)
                .ok_or_else(|| ParseError::new("invalid number literal", self.line))?;
            return self.finish_number(value);
        }

        while self.current().is_ascii_digit() {
            self.pos += 1;
        }
        if self.current() == '.' {
            self.pos += 1;
            while self.current().is_ascii_digit() {
                self.pos += 1;
            }
        }
        if matches!(self.current(), 'e' | 'E') {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.current(), '+' | '-') {
                self.pos += 1;
            }
            if !self.current().is_ascii_digit() {
                self.pos = mark;
                return Err(ParseError::new("invalid number literal", self.line));
            }
            while self.current().is_ascii_digit() {
                self.pos += 1;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        let value = text
            .parse::<f64>()
            .map_err(|_| ParseError::new("invalid number literal", self.line))?;
        self.finish_number(value)
    }

    fn finish_number(&mut self, value: f64) -> LexResult<Token> {
        // `3in` or `1x` are not numbers.
        if is_id_start(self.current()) {
            return Err(ParseError::new("invalid number literal", self.line));
        }
        Ok(self.make_token(TokenKind::Number(value)))
    }

    fn scan_string(&mut self, quote: char) -> LexResult<Token> {
        self.pos += 1;
        let mut units: Vec<u16> = Vec::new();
        let mut buf = [0u16; 2];

        loop {
            if self.is_eof() || is_line_terminator(self.current()) {
                return Err(ParseError::new("unterminated string", self.token_line));
            }
            let ch = self.current();
            if ch == quote {
                self.pos += 1;
                break;
            }
            if ch != '\\' {
                units.extend_from_slice(ch.encode_utf16(&mut buf));
                self.pos += 1;
                continue;
            }

            self.pos += 1;
            let esc = self.current();
            self.pos += 1;
            match esc {
                'n' => units.push(0x0A),
                't' => units.push(0x09),
                'r' => units.push(0x0D),
                'b' => units.push(0x08),
                'f' => units.push(0x0C),
                'v' => units.push(0x0B),
                '0' if !self.current().is_ascii_digit() => units.push(0),
                'x' => {
                    let unit = self.scan_hex(2)?;
                    units.push(unit);
                }
                'u' => {
                    let unit = self.scan_hex(4)?;
                    units.push(unit);
                }
                '\r' => {
                    if self.current() == '\n' {
                        self.pos += 1;
                    }
                    self.line += 1;
                }
                '\n' | '\u{2028}' | '\u{2029}' => self.line += 1,
                '\0' if self.is_eof() => {
                    return Err(ParseError::new("unterminated string", self.token_line));
                }
                other => units.extend_from_slice(other.encode_utf16(&mut buf)),
            }
        }

        Ok(self.make_token(TokenKind::String(units)))
    }

    fn scan_hex(&mut self, count: usize) -> LexResult<u16> {
        let mut value: u16 = 0;
        for _ in 0..count {
            let digit = self
                .current()
                .to_digit(16)
                .ok_or_else(|| ParseError::new("invalid escape", self.line))?;
            value = value * 16 + digit as u16;
            self.pos += 1;
        }
        Ok(value)
    }

    fn scan_identifier(&mut self) -> Token {
        let start = self.pos;
        while !self.is_eof() && is_id_continue(self.current()) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        let kind = TokenKind::keyword(&name).unwrap_or(TokenKind::Identifier(name));
        self.make_token(kind)
    }

    fn scan_punctuator(&mut self) -> LexResult<Token> {
        let ch = self.current();
        self.pos += 1;

        let kind = match ch {
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            '~' => TokenKind::Tilde,
            '+' => {
                if self.eat('+') {
                    TokenKind::PlusPlus
                } else if self.eat('=') {
                    TokenKind::PlusEqual
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    TokenKind::MinusMinus
                } else if self.eat('=') {
                    TokenKind::MinusEqual
                } else {
                    TokenKind::Minus
                }
            }
            '*' => self.with_assign(TokenKind::Star, TokenKind::StarEqual),
            '/' => self.with_assign(TokenKind::Slash, TokenKind::SlashEqual),
            '%' => self.with_assign(TokenKind::Percent, TokenKind::PercentEqual),
            '^' => self.with_assign(TokenKind::Caret, TokenKind::CaretEqual),
            '&' => {
                if self.eat('&') {
                    TokenKind::AmpersandAmpersand
                } else {
                    self.with_assign(TokenKind::Ampersand, TokenKind::AmpersandEqual)
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::PipePipe
                } else {
                    self.with_assign(TokenKind::Pipe, TokenKind::PipeEqual)
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::NotEqualEqual
                    } else {
                        TokenKind::NotEqual
                    }
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::EqualEqualEqual
                    } else {
                        TokenKind::EqualEqual
                    }
                } else {
                    TokenKind::Equal
                }
            }
            '<' => {
                if self.eat('<') {
                    self.with_assign(TokenKind::LessLess, TokenKind::LessLessEqual)
                } else {
                    self.with_assign(TokenKind::Less, TokenKind::LessEqual)
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('>') {
                        self.with_assign(
                            TokenKind::GreaterGreaterGreater,
                            TokenKind::GreaterGreaterGreaterEqual,
                        )
                    } else {
                        self.with_assign(TokenKind::GreaterGreater, TokenKind::GreaterGreaterEqual)
                    }
                } else {
                    self.with_assign(TokenKind::Greater, TokenKind::GreaterEqual)
                }
            }
            _ => return Err(ParseError::new("invalid token", self.token_line)),
        };

        Ok(self.make_token(kind))
    }

    fn with_assign(&mut self, plain: TokenKind, assign: TokenKind) -> TokenKind {
        if self.eat('=') {
            assign
        } else {
            plain
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.current() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn current(&self) -> char {
        self.chars.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek(&self) -> char {
        self.chars.get(self.pos + 1).copied().unwrap_or('\0')
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            Span::new(self.token_start, self.pos, self.token_line),
            self.newline_before,
        )
    }
}

fn is_line_terminator(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\x0B' | '\x0C' | '\u{A0}' | '\u{FEFF}')
        || is_line_terminator(ch)
        || (ch as u32 > 0x7F && ch.is_whitespace())
}

fn is_id_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_id_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("42 3.5 .5 1e3 0xFF"),
            alloc::vec![
                TokenKind::Number(42.0),
                TokenKind::Number(3.5),
                TokenKind::Number(0.5),
                TokenKind::Number(1000.0),
                TokenKind::Number(255.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = kinds(r#"'a\n' "é\uD83D""#);
        assert_eq!(tokens[0], TokenKind::String(alloc::vec![0x61, 0x0A]));
        assert_eq!(tokens[1], TokenKind::String(alloc::vec![0xE9, 0xD83D]));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a >>>= b !== c"),
            alloc::vec![
                TokenKind::Identifier("a".into()),
                TokenKind::GreaterGreaterGreaterEqual,
                TokenKind::Identifier("b".into()),
                TokenKind::NotEqualEqual,
                TokenKind::Identifier("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_newline_tracking() {
        let tokens = Lexer::new("a\n/* x\n */ b").tokenize().unwrap();
        assert!(!tokens[0].newline_before);
        assert!(tokens[1].newline_before);
        assert_eq!(tokens[1].span.line, 3);
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("\n'abc").tokenize().unwrap_err();
        assert_eq!(err.line, 2);
    }
}
