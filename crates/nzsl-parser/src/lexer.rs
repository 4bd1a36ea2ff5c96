//! Tokenizer for NZSL source text.
//!
//! Produces a flat token list terminated by [`TokenKind::EndOfStream`]. Every
//! token carries the span it was read from; lexing errors are reported with
//! the span accumulated so far, which is what the error tests pin down.

use std::fmt;
use std::sync::Arc;

use nzsl_ast::{Error, LexerError, SourceLocation};

/// A lexed token.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

/// Token variants.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    IntValue(i32),
    FloatValue(f32),
    StringValue(String),
    BoolTrue,
    BoolFalse,

    Alias,
    Break,
    Const,
    Continue,
    Discard,
    Else,
    External,
    For,
    From,
    FunctionDeclaration,
    If,
    Import,
    In,
    Let,
    Module,
    Option,
    Return,
    Struct,
    While,
    As,

    OpenCurlyBracket,
    ClosingCurlyBracket,
    OpenSquareBracket,
    ClosingSquareBracket,
    OpenParenthesis,
    ClosingParenthesis,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Arrow,

    Assign,
    PlusAssign,
    MinusAssign,
    MultiplyAssign,
    DivideAssign,
    LogicalAndAssign,
    LogicalOrAssign,

    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    LogicalAnd,
    LogicalOr,
    Not,

    EndOfStream,
}

impl TokenKind {
    /// Name used in `PUnexpectedToken` messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identifier(_) => "Identifier",
            Self::IntValue(_) => "IntegerValue",
            Self::FloatValue(_) => "FloatingPointValue",
            Self::StringValue(_) => "StringValue",
            Self::BoolTrue => "BoolTrue",
            Self::BoolFalse => "BoolFalse",
            Self::Alias => "Alias",
            Self::Break => "Break",
            Self::Const => "Const",
            Self::Continue => "Continue",
            Self::Discard => "Discard",
            Self::Else => "Else",
            Self::External => "External",
            Self::For => "For",
            Self::From => "From",
            Self::FunctionDeclaration => "FunctionDeclaration",
            Self::If => "If",
            Self::Import => "Import",
            Self::In => "In",
            Self::Let => "Let",
            Self::Module => "Module",
            Self::Option => "Option",
            Self::Return => "Return",
            Self::Struct => "Struct",
            Self::While => "While",
            Self::As => "As",
            Self::OpenCurlyBracket => "OpenCurlyBracket",
            Self::ClosingCurlyBracket => "ClosingCurlyBracket",
            Self::OpenSquareBracket => "OpenSquareBracket",
            Self::ClosingSquareBracket => "ClosingSquareBracket",
            Self::OpenParenthesis => "OpenParenthesis",
            Self::ClosingParenthesis => "ClosingParenthesis",
            Self::Comma => "Comma",
            Self::Colon => "Colon",
            Self::Semicolon => "Semicolon",
            Self::Dot => "Dot",
            Self::Arrow => "Arrow",
            Self::Assign => "Assign",
            Self::PlusAssign => "PlusAssign",
            Self::MinusAssign => "MinusAssign",
            Self::MultiplyAssign => "MultiplyAssign",
            Self::DivideAssign => "DivideAssign",
            Self::LogicalAndAssign => "LogicalAndAssign",
            Self::LogicalOrAssign => "LogicalOrAssign",
            Self::Plus => "Plus",
            Self::Minus => "Minus",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::Modulo => "Modulo",
            Self::Equal => "Equal",
            Self::NotEqual => "NotEqual",
            Self::LessThan => "LessThan",
            Self::LessThanEqual => "LessThanEqual",
            Self::GreaterThan => "GreaterThan",
            Self::GreaterThanEqual => "GreaterThanEqual",
            Self::LogicalAnd => "LogicalAnd",
            Self::LogicalOr => "LogicalOr",
            Self::Not => "Not",
            Self::EndOfStream => "EndOfStream",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    file: Option<Arc<str>>,
}

/// Tokenizes NZSL source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Error> {
    tokenize_with_file(source, None)
}

/// Tokenizes NZSL source text, attaching a file name to every span.
pub fn tokenize_with_file(source: &str, file: Option<&str>) -> Result<Vec<Token>, Error> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        file: file.map(Arc::from),
    };
    lexer.run()
}

impl Lexer {
    fn run(&mut self) -> Result<Vec<Token>, Error> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let start = (self.line, self.column);
            let Some(ch) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::EndOfStream,
                    location: self.span_from(start),
                });
                return Ok(tokens);
            };

            let kind = match ch {
                'a'..='z' | 'A'..='Z' | '_' => self.identifier_or_keyword(),
                '0'..='9' => self.number(start)?,
                '"' => self.string(start)?,
                _ => self.symbol(start)?,
            };
            tokens.push(Token {
                kind,
                location: self.span_from(start),
            });
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn span_from(&self, start: (u32, u32)) -> SourceLocation {
        // spans are inclusive: end column is the last consumed character
        let end_column = if self.column > 1 { self.column - 1 } else { self.column };
        SourceLocation {
            file: self.file.clone(),
            start_line: start.0,
            start_column: start.1,
            end_line: self.line,
            end_column: if self.line == start.0 && end_column < start.1 {
                start.1
            } else {
                end_column
            },
        }
    }

    /// Span ending at the current (not yet consumed) position.
    fn open_span_from(&self, start: (u32, u32)) -> SourceLocation {
        SourceLocation {
            file: self.file.clone(),
            start_line: start.0,
            start_column: start.1,
            end_line: self.line,
            end_column: self.column,
        }
    }

    fn skip_trivia(&mut self) -> Result<(), Error> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    let mut depth = 1u32;
                    while depth > 0 {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('/'), Some('*')) => {
                                self.advance();
                                self.advance();
                                depth += 1;
                            }
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                depth -= 1;
                            }
                            (Some(_), _) => {
                                self.advance();
                            }
                            (None, _) => return Ok(()),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn identifier_or_keyword(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match text.as_str() {
            "alias" => TokenKind::Alias,
            "as" => TokenKind::As,
            "break" => TokenKind::Break,
            "const" => TokenKind::Const,
            "continue" => TokenKind::Continue,
            "discard" => TokenKind::Discard,
            "else" => TokenKind::Else,
            "external" => TokenKind::External,
            "false" => TokenKind::BoolFalse,
            "fn" => TokenKind::FunctionDeclaration,
            "for" => TokenKind::For,
            "from" => TokenKind::From,
            "if" => TokenKind::If,
            "import" => TokenKind::Import,
            "in" => TokenKind::In,
            "let" => TokenKind::Let,
            "module" => TokenKind::Module,
            "option" => TokenKind::Option,
            "return" => TokenKind::Return,
            "struct" => TokenKind::Struct,
            "true" => TokenKind::BoolTrue,
            "while" => TokenKind::While,
            _ => TokenKind::Identifier(text),
        }
    }

    fn number(&mut self, start: (u32, u32)) -> Result<TokenKind, Error> {
        let mut digits = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            digits.push('.');
            self.advance();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    digits.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        // a number immediately followed by identifier characters is malformed
        if self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            while let Some(ch) = self.peek() {
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    self.advance();
                } else {
                    break;
                }
            }
            return Err(LexerError::BadNumber.at(self.span_from(start)));
        }

        if is_float {
            let value: f32 = digits
                .parse()
                .map_err(|_| LexerError::BadNumber.at(self.span_from(start)))?;
            Ok(TokenKind::FloatValue(value))
        } else {
            let value: i64 = digits
                .parse()
                .map_err(|_| LexerError::NumberOutOfRange.at(self.span_from(start)))?;
            if value > i64::from(i32::MAX) {
                return Err(LexerError::NumberOutOfRange.at(self.span_from(start)));
            }
            Ok(TokenKind::IntValue(value as i32))
        }
    }

    fn string(&mut self, start: (u32, u32)) -> Result<TokenKind, Error> {
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexerError::UnfinishedString.at(self.open_span_from(start)))
                }
                Some('"') => {
                    self.advance();
                    return Ok(TokenKind::StringValue(text));
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.peek() {
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        _ => {
                            self.advance();
                            return Err(LexerError::UnrecognizedChar.at(self.span_from(start)));
                        }
                    };
                    self.advance();
                    text.push(escaped);
                }
                Some(ch) => {
                    self.advance();
                    text.push(ch);
                }
            }
        }
    }

    fn symbol(&mut self, start: (u32, u32)) -> Result<TokenKind, Error> {
        let ch = self.advance().expect("symbol() called at end of stream");
        let kind = match ch {
            '{' => TokenKind::OpenCurlyBracket,
            '}' => TokenKind::ClosingCurlyBracket,
            '[' => TokenKind::OpenSquareBracket,
            ']' => TokenKind::ClosingSquareBracket,
            '(' => TokenKind::OpenParenthesis,
            ')' => TokenKind::ClosingParenthesis,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            '+' => self.with_assign(TokenKind::Plus, TokenKind::PlusAssign),
            '-' => {
                if self.peek() == Some('>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    self.with_assign(TokenKind::Minus, TokenKind::MinusAssign)
                }
            }
            '*' => self.with_assign(TokenKind::Multiply, TokenKind::MultiplyAssign),
            '/' => self.with_assign(TokenKind::Divide, TokenKind::DivideAssign),
            '%' => TokenKind::Modulo,
            '=' => self.with_assign(TokenKind::Assign, TokenKind::Equal),
            '!' => self.with_assign(TokenKind::Not, TokenKind::NotEqual),
            '<' => self.with_assign(TokenKind::LessThan, TokenKind::LessThanEqual),
            '>' => self.with_assign(TokenKind::GreaterThan, TokenKind::GreaterThanEqual),
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    self.with_assign(TokenKind::LogicalAnd, TokenKind::LogicalAndAssign)
                } else {
                    return Err(LexerError::UnrecognizedToken.at(self.span_from(start)));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.advance();
                    self.with_assign(TokenKind::LogicalOr, TokenKind::LogicalOrAssign)
                } else {
                    return Err(LexerError::UnrecognizedToken.at(self.span_from(start)));
                }
            }
            _ => return Err(LexerError::UnrecognizedToken.at(self.span_from(start))),
        };
        Ok(kind)
    }

    fn with_assign(&mut self, plain: TokenKind, assigned: TokenKind) -> TokenKind {
        if self.peek() == Some('=') {
            self.advance();
            assigned
        } else {
            plain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_declaration() {
        assert_eq!(
            kinds("let x: f32 = 1.5;"),
            vec![
                TokenKind::Let,
                TokenKind::Identifier("x".into()),
                TokenKind::Colon,
                TokenKind::Identifier("f32".into()),
                TokenKind::Assign,
                TokenKind::FloatValue(1.5),
                TokenKind::Semicolon,
                TokenKind::EndOfStream,
            ]
        );
    }

    #[test]
    fn lexes_compound_operators() {
        assert_eq!(
            kinds("a += b -> c &&= d"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::PlusAssign,
                TokenKind::Identifier("b".into()),
                TokenKind::Arrow,
                TokenKind::Identifier("c".into()),
                TokenKind::LogicalAndAssign,
                TokenKind::Identifier("d".into()),
                TokenKind::EndOfStream,
            ]
        );
    }

    #[test]
    fn skips_comments() {
        assert_eq!(
            kinds("1 // line\n/* block /* nested */ */ 2"),
            vec![
                TokenKind::IntValue(1),
                TokenKind::IntValue(2),
                TokenKind::EndOfStream
            ]
        );
    }

    #[test]
    fn bad_number() {
        let err = tokenize("1x42").unwrap_err();
        assert_eq!(err.to_string(), "(1,1 -> 4): LBadNumber error: bad number");
    }

    #[test]
    fn number_out_of_range() {
        let err = tokenize("123456789876543210123456789").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1,1 -> 27): LNumberOutOfRange error: number is out of range"
        );
    }

    #[test]
    fn unfinished_string() {
        let err = tokenize("\"Hello world").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1,1 -> 13): LUnfinishedString error: unfinished string"
        );
    }

    #[test]
    fn unrecognized_escape() {
        let err = tokenize(r#""hello \p""#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1,1 -> 9): LUnrecognizedChar error: unrecognized character"
        );
    }

    #[test]
    fn unrecognized_token() {
        let err = tokenize("$").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1, 1): LUnrecognizedToken error: unrecognized token"
        );
    }

    #[test]
    fn int_max_is_accepted() {
        assert_eq!(
            kinds("2147483647"),
            vec![TokenKind::IntValue(i32::MAX), TokenKind::EndOfStream]
        );
        assert!(tokenize("2147483648").is_err());
    }

    #[test]
    fn spans_track_lines() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!(tokens[1].location.start_line, 2);
        assert_eq!(tokens[1].location.start_column, 3);
    }
}
