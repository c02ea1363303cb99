use crate::error::CompileError;
use crate::frontend::cursor::Cursor;
use crate::frontend::token::{Token, TokenKind, TokenValue};

/// Produces one token per call. The analyzer pulls tokens on demand through
/// a [`TokenBuffer`]; nothing is lexed ahead of the single lookahead slot.
pub struct Lexer {
    cursor: Cursor,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            cursor: Cursor::new(source),
        }
    }

    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_trivia();

        let start = self.cursor.pos();
        let ch = match self.cursor.peek_char() {
            Some(ch) => ch,
            None => return Ok(Token::new(TokenKind::Eof, TokenValue::None, start, start)),
        };

        if ch.is_ascii_digit() {
            self.lex_number()
        } else if ch.is_alphabetic() || ch == '_' {
            Ok(self.lex_ident_or_keyword())
        } else if ch == '"' {
            self.lex_string()
        } else if ch == '\'' {
            self.lex_char()
        } else {
            self.lex_operator()
        }
    }

    /// Whitespace and `//` line comments carry no tokens.
    fn skip_trivia(&mut self) {
        loop {
            match self.cursor.peek_char() {
                Some(ch) if ch.is_whitespace() => {
                    self.cursor.next_char();
                }
                Some('/') if self.cursor.peek_second() == Some('/') => {
                    while let Some(ch) = self.cursor.peek_char() {
                        if ch == '\n' {
                            break;
                        }
                        self.cursor.next_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self) -> Result<Token, CompileError> {
        let start = self.cursor.pos();
        let mut digits = String::new();

        while let Some(ch) = self.cursor.peek_char() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.cursor.next_char();
            } else {
                break;
            }
        }

        if self.cursor.peek_char() != Some('.') {
            let value: u64 = digits
                .parse()
                .map_err(|_| CompileError::InvalidInput(start))?;
            return Ok(Token::new(
                TokenKind::UintLiteral,
                TokenValue::Int(value),
                start,
                self.cursor.pos(),
            ));
        }

        digits.push('.');
        self.cursor.next_char();

        // At least one digit after the point.
        if !matches!(self.cursor.peek_char(), Some(ch) if ch.is_ascii_digit()) {
            return Err(CompileError::InvalidInput(start));
        }
        while let Some(ch) = self.cursor.peek_char() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.cursor.next_char();
            } else {
                break;
            }
        }

        if matches!(self.cursor.peek_char(), Some('e') | Some('E')) {
            digits.push('e');
            self.cursor.next_char();
            if let Some(sign @ ('+' | '-')) = self.cursor.peek_char() {
                digits.push(sign);
                self.cursor.next_char();
            }
            if !matches!(self.cursor.peek_char(), Some(ch) if ch.is_ascii_digit()) {
                return Err(CompileError::InvalidInput(start));
            }
            while let Some(ch) = self.cursor.peek_char() {
                if ch.is_ascii_digit() {
                    digits.push(ch);
                    self.cursor.next_char();
                } else {
                    break;
                }
            }
        }

        let value: f64 = digits
            .parse()
            .map_err(|_| CompileError::InvalidInput(start))?;
        Ok(Token::new(
            TokenKind::DoubleLiteral,
            TokenValue::Int(value.to_bits()),
            start,
            self.cursor.pos(),
        ))
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let start = self.cursor.pos();
        let mut ident = String::new();

        while let Some(ch) = self.cursor.peek_char() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.cursor.next_char();
            } else {
                break;
            }
        }

        let end = self.cursor.pos();
        match TokenKind::keyword(&ident) {
            Some(kind) => Token::new(kind, TokenValue::None, start, end),
            None => Token::new(TokenKind::Ident, TokenValue::Str(ident), start, end),
        }
    }

    fn escape(&mut self, allow_quote: bool) -> Result<char, CompileError> {
        self.cursor.next_char();
        let ch = match self.cursor.peek_char() {
            Some('\\') => '\\',
            Some('\'') => '\'',
            Some('"') if allow_quote => '"',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            _ => return Err(CompileError::InvalidInput(self.cursor.pos())),
        };
        self.cursor.next_char();
        Ok(ch)
    }

    fn lex_string(&mut self) -> Result<Token, CompileError> {
        let start = self.cursor.pos();
        self.cursor.next_char();

        let mut value = String::new();
        loop {
            match self.cursor.peek_char() {
                Some('"') => {
                    self.cursor.next_char();
                    return Ok(Token::new(
                        TokenKind::StringLiteral,
                        TokenValue::Str(value),
                        start,
                        self.cursor.pos(),
                    ));
                }
                Some('\\') => value.push(self.escape(true)?),
                Some(ch) => {
                    value.push(ch);
                    self.cursor.next_char();
                }
                None => return Err(CompileError::InvalidInput(self.cursor.pos())),
            }
        }
    }

    fn lex_char(&mut self) -> Result<Token, CompileError> {
        let start = self.cursor.pos();
        self.cursor.next_char();

        let ch = match self.cursor.peek_char() {
            // `\"` is not a char escape; a bare `"` is an ordinary character.
            Some('\\') => self.escape(false)?,
            Some('\'') | None => return Err(CompileError::InvalidInput(self.cursor.pos())),
            Some(ch) => {
                self.cursor.next_char();
                ch
            }
        };

        if self.cursor.peek_char() != Some('\'') {
            return Err(CompileError::InvalidInput(self.cursor.pos()));
        }
        self.cursor.next_char();

        Ok(Token::new(
            TokenKind::CharLiteral,
            TokenValue::Int(ch as u64),
            start,
            self.cursor.pos(),
        ))
    }

    fn lex_operator(&mut self) -> Result<Token, CompileError> {
        let start = self.cursor.pos();
        let ch = self.cursor.next_char().ok_or(CompileError::InvalidInput(start))?;

        let kind = match (ch, self.cursor.peek_char()) {
            ('-', Some('>')) => {
                self.cursor.next_char();
                TokenKind::Arrow
            }
            ('=', Some('=')) => {
                self.cursor.next_char();
                TokenKind::Eq
            }
            ('!', Some('=')) => {
                self.cursor.next_char();
                TokenKind::Neq
            }
            ('<', Some('=')) => {
                self.cursor.next_char();
                TokenKind::Le
            }
            ('>', Some('=')) => {
                self.cursor.next_char();
                TokenKind::Ge
            }
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('=', _) => TokenKind::Assign,
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            ('{', _) => TokenKind::LBrace,
            ('}', _) => TokenKind::RBrace,
            (',', _) => TokenKind::Comma,
            (':', _) => TokenKind::Colon,
            (';', _) => TokenKind::Semicolon,
            _ => return Err(CompileError::InvalidInput(start)),
        };

        Ok(Token::new(kind, TokenValue::None, start, self.cursor.pos()))
    }
}

/// One-token lookahead over the lexer.
pub struct TokenBuffer {
    lexer: Lexer,
    peeked: Option<Token>,
}

impl TokenBuffer {
    pub fn new(lexer: Lexer) -> Self {
        TokenBuffer {
            lexer,
            peeked: None,
        }
    }

    pub fn peek(&mut self) -> Result<&Token, CompileError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        // The slot was just filled above.
        match &self.peeked {
            Some(token) => Ok(token),
            None => unreachable!("peek slot filled above"),
        }
    }

    pub fn next(&mut self) -> Result<Token, CompileError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.lexer.next_token(),
        }
    }

    pub fn check(&mut self, kind: TokenKind) -> Result<bool, CompileError> {
        Ok(self.peek()?.kind == kind)
    }

    /// Consumes and returns the next token iff it has the given kind.
    pub fn accept(&mut self, kind: TokenKind) -> Result<Option<Token>, CompileError> {
        if self.check(kind)? {
            Ok(Some(self.next()?))
        } else {
            Ok(None)
        }
    }

    pub fn expect(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        let token = self.peek()?;
        if token.kind == kind {
            self.next()
        } else {
            Err(CompileError::ExpectedToken {
                expected: kind,
                got: token.kind,
                pos: token.start,
            })
        }
    }
}
