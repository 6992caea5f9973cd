use crate::compiler::errors::SyntaxError;

/// Token kinds for the shale language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    Struct,
    Protocol,
    Operator,
    If,
    Else,
    While,
    Break,
    Continue,
    Return,
    True,
    False,
    Null,
    Thread,
    Threadgroup,
    Device,
    Constant,

    // Literals
    Int(i64),
    Uint(u64),
    Float(f64),
    Double(f64),
    Ident(String),

    // Operators
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
    Bang,
    Eq,
    Dot,
    Caret, // ^ (pointer type suffix and dereference)
    Amp,   // & (address-of)

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,

    // Special
    Eof,
}

/// Source location information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A token with its kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// The lexer for shale source code.
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            let span = Span::new(self.line, self.column);

            let Some((_, ch)) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, span));
                break;
            };

            let kind = match ch {
                '(' => {
                    self.advance();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance();
                    TokenKind::RParen
                }
                '{' => {
                    self.advance();
                    TokenKind::LBrace
                }
                '}' => {
                    self.advance();
                    TokenKind::RBrace
                }
                '[' => {
                    self.advance();
                    TokenKind::LBracket
                }
                ']' => {
                    self.advance();
                    TokenKind::RBracket
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                ';' => {
                    self.advance();
                    TokenKind::Semi
                }
                ':' => {
                    self.advance();
                    TokenKind::Colon
                }
                '.' => {
                    self.advance();
                    TokenKind::Dot
                }
                '+' => {
                    self.advance();
                    TokenKind::Plus
                }
                '-' => {
                    self.advance();
                    TokenKind::Minus
                }
                '*' => {
                    self.advance();
                    TokenKind::Star
                }
                '/' => {
                    self.advance();
                    TokenKind::Slash
                }
                '%' => {
                    self.advance();
                    TokenKind::Percent
                }
                '^' => {
                    self.advance();
                    TokenKind::Caret
                }
                '!' => {
                    self.advance();
                    if self.match_char('=') {
                        TokenKind::NotEq
                    } else {
                        TokenKind::Bang
                    }
                }
                '=' => {
                    self.advance();
                    if self.match_char('=') {
                        TokenKind::EqEq
                    } else {
                        TokenKind::Eq
                    }
                }
                '<' => {
                    self.advance();
                    if self.match_char('=') {
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    self.advance();
                    if self.match_char('=') {
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                '&' => {
                    self.advance();
                    if self.match_char('&') {
                        TokenKind::AndAnd
                    } else {
                        TokenKind::Amp
                    }
                }
                '|' => {
                    self.advance();
                    if self.match_char('|') {
                        TokenKind::OrOr
                    } else {
                        return Err(self.error("expected '||'"));
                    }
                }
                '0'..='9' => self.scan_number()?,
                'a'..='z' | 'A'..='Z' | '_' => self.scan_identifier(),
                _ => return Err(self.error(&format!("unexpected character '{}'", ch))),
            };

            tokens.push(Token::new(kind, span));
        }

        Ok(tokens)
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((_, ch)) = result {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek().map(|(_, c)| c) == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some((_, ' ' | '\t' | '\r' | '\n')) => {
                    self.advance();
                }
                Some((_, '/')) => {
                    let mut chars = self.chars.clone();
                    chars.next(); // consume '/'
                    match chars.peek().map(|(_, c)| *c) {
                        Some('/') => {
                            // Line comment
                            self.advance();
                            self.advance();
                            while let Some((_, ch)) = self.peek() {
                                if ch == '\n' {
                                    break;
                                }
                                self.advance();
                            }
                        }
                        Some('*') => {
                            // Block comment
                            let span = Span::new(self.line, self.column);
                            self.advance();
                            self.advance();
                            loop {
                                match self.advance() {
                                    Some((_, '*')) if self.match_char('/') => break,
                                    Some(_) => {}
                                    None => {
                                        return Err(SyntaxError::new(
                                            "unterminated block comment",
                                            span,
                                        ));
                                    }
                                }
                            }
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn scan_number(&mut self) -> Result<TokenKind, SyntaxError> {
        let start = self.peek().map(|(i, _)| i).unwrap_or(0);
        let mut is_decimal = false;

        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        // Check for decimal point followed by a digit
        if let Some((_, '.')) = self.peek() {
            let mut chars = self.chars.clone();
            chars.next(); // consume '.'
            if let Some((_, ch)) = chars.peek()
                && ch.is_ascii_digit()
            {
                is_decimal = true;
                self.advance(); // consume '.'
                while let Some((_, ch)) = self.peek() {
                    if ch.is_ascii_digit() {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        let end = self.peek().map(|(i, _)| i).unwrap_or(self.source.len());
        let num_str = &self.source[start..end];

        if is_decimal {
            let value: f64 = num_str
                .parse()
                .map_err(|_| self.error(&format!("invalid float '{}'", num_str)))?;
            // An 'f' suffix selects float; unsuffixed decimal literals are double.
            if self.match_char('f') {
                Ok(TokenKind::Float(value))
            } else {
                Ok(TokenKind::Double(value))
            }
        } else if self.match_char('u') {
            let value: u64 = num_str
                .parse()
                .map_err(|_| self.error(&format!("invalid number '{}'", num_str)))?;
            Ok(TokenKind::Uint(value))
        } else if self.match_char('f') {
            let value: f64 = num_str
                .parse()
                .map_err(|_| self.error(&format!("invalid number '{}'", num_str)))?;
            Ok(TokenKind::Float(value))
        } else {
            let value: i64 = num_str
                .parse()
                .map_err(|_| self.error(&format!("invalid number '{}'", num_str)))?;
            Ok(TokenKind::Int(value))
        }
    }

    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.peek().map(|(i, _)| i).unwrap_or(0);

        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let end = self.peek().map(|(i, _)| i).unwrap_or(self.source.len());
        let ident = &self.source[start..end];

        match ident {
            "struct" => TokenKind::Struct,
            "protocol" => TokenKind::Protocol,
            "operator" => TokenKind::Operator,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "thread" => TokenKind::Thread,
            "threadgroup" => TokenKind::Threadgroup,
            "device" => TokenKind::Device,
            "constant" => TokenKind::Constant,
            _ => TokenKind::Ident(ident.to_string()),
        }
    }

    fn error(&self, message: &str) -> SyntaxError {
        SyntaxError::new(message, Span::new(self.line, self.column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_tokens() {
        let source = "int32 x = 42;";
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens().unwrap();

        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens[0].kind, TokenKind::Ident("int32".to_string()));
        assert_eq!(tokens[1].kind, TokenKind::Ident("x".to_string()));
        assert_eq!(tokens[2].kind, TokenKind::Eq);
        assert_eq!(tokens[3].kind, TokenKind::Int(42));
        assert_eq!(tokens[4].kind, TokenKind::Semi);
        assert_eq!(tokens[5].kind, TokenKind::Eof);
    }

    #[test]
    fn test_operators() {
        let source = "+ - * / % == != < <= > >= && || ! ^ &";
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens().unwrap();

        let expected = vec![
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Star,
            TokenKind::Slash,
            TokenKind::Percent,
            TokenKind::EqEq,
            TokenKind::NotEq,
            TokenKind::Lt,
            TokenKind::Le,
            TokenKind::Gt,
            TokenKind::Ge,
            TokenKind::AndAnd,
            TokenKind::OrOr,
            TokenKind::Bang,
            TokenKind::Caret,
            TokenKind::Amp,
            TokenKind::Eof,
        ];

        for (i, exp) in expected.iter().enumerate() {
            assert_eq!(&tokens[i].kind, exp, "mismatch at index {}", i);
        }
    }

    #[test]
    fn test_keywords() {
        let source = "struct protocol if else while return null thread device";
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens().unwrap();

        let expected = vec![
            TokenKind::Struct,
            TokenKind::Protocol,
            TokenKind::If,
            TokenKind::Else,
            TokenKind::While,
            TokenKind::Return,
            TokenKind::Null,
            TokenKind::Thread,
            TokenKind::Device,
            TokenKind::Eof,
        ];

        for (i, exp) in expected.iter().enumerate() {
            assert_eq!(&tokens[i].kind, exp, "mismatch at index {}", i);
        }
    }

    #[test]
    fn test_numeric_literals() {
        let source = "42 42u 1.5 1.5f 2f";
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::Int(42));
        assert_eq!(tokens[1].kind, TokenKind::Uint(42));
        assert_eq!(tokens[2].kind, TokenKind::Double(1.5));
        assert_eq!(tokens[3].kind, TokenKind::Float(1.5));
        assert_eq!(tokens[4].kind, TokenKind::Float(2.0));
    }

    #[test]
    fn test_pointer_syntax() {
        let source = "thread int32^ p = &x; ^p = 42;";
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::Thread);
        assert_eq!(tokens[1].kind, TokenKind::Ident("int32".to_string()));
        assert_eq!(tokens[2].kind, TokenKind::Caret);
        assert_eq!(tokens[3].kind, TokenKind::Ident("p".to_string()));
        assert_eq!(tokens[4].kind, TokenKind::Eq);
        assert_eq!(tokens[5].kind, TokenKind::Amp);
        assert_eq!(tokens[6].kind, TokenKind::Ident("x".to_string()));
        assert_eq!(tokens[7].kind, TokenKind::Semi);
        assert_eq!(tokens[8].kind, TokenKind::Caret);
    }

    #[test]
    fn test_comments() {
        let source = "int32 x; // trailing\n/* block\ncomment */ int32 y;";
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::Ident("int32".to_string()));
        assert_eq!(tokens[1].kind, TokenKind::Ident("x".to_string()));
        assert_eq!(tokens[2].kind, TokenKind::Semi);
        assert_eq!(tokens[3].kind, TokenKind::Ident("int32".to_string()));
        assert_eq!(tokens[4].kind, TokenKind::Ident("y".to_string()));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let source = "/* never closed";
        let mut lexer = Lexer::new(source);
        assert!(lexer.scan_tokens().is_err());
    }

    #[test]
    fn test_generic_call_tokens() {
        let source = "id<int32>(x)";
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::Ident("id".to_string()));
        assert_eq!(tokens[1].kind, TokenKind::Lt);
        assert_eq!(tokens[2].kind, TokenKind::Ident("int32".to_string()));
        assert_eq!(tokens[3].kind, TokenKind::Gt);
        assert_eq!(tokens[4].kind, TokenKind::LParen);
    }
}
