//! Tokenizer for the MySQL/MariaDB statement dialect.
//!
//! Only enough of the grammar is recognised to normalise statements and to
//! find predicate and ordering clauses. Anything surprising is an error so the
//! caller can fall back to lexical normalisation.

use lazy_static::lazy_static;
use std::collections::HashSet;
use thiserror::Error;

lazy_static! {
    static ref KEYWORDS: HashSet<&'static str> = [
        "ALL", "ALTER", "AND", "AS", "ASC", "BEGIN", "BETWEEN", "BY", "CASE", "COMMIT",
        "CREATE", "CROSS", "DELETE", "DESC", "DESCRIBE", "DISTINCT", "DIV", "DROP", "DUPLICATE",
        "ELSE", "END", "ESCAPE", "EXISTS", "EXPLAIN", "FOR", "FORCE", "FROM", "FULL", "GROUP",
        "HAVING", "IGNORE", "IN", "INDEX", "INNER", "INSERT", "INTERVAL", "INTO", "IS", "JOIN",
        "KEY", "LEFT", "LIKE", "LIMIT", "LOCK", "MOD", "MODE", "NATURAL", "NOT", "NULL",
        "OFFSET", "ON", "OR", "ORDER", "OUTER", "REGEXP", "REPLACE", "RIGHT", "RLIKE",
        "ROLLBACK", "SELECT", "SET", "SHARE", "SHOW", "START", "STRAIGHT_JOIN", "TABLE",
        "THEN", "TRANSACTION", "TRUNCATE", "UNION", "UPDATE", "USE", "USING", "VALUE",
        "VALUES", "WHEN", "WHERE", "WITH", "XOR",
    ]
    .into_iter()
    .collect();
}

/// Whether an upper-cased word is reserved.
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(word)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("Unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("Unterminated quoted identifier starting at position {0}")]
    UnterminatedIdentifier(usize),

    #[error("Unterminated comment starting at position {0}")]
    UnterminatedComment(usize),
}

pub type LexResult<T> = Result<T, LexError>;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Reserved word, stored upper-cased
    Keyword(String),
    /// Bare or backtick-quoted identifier, quotes removed
    Identifier(String),
    Number(String),
    StringLiteral(String),
    /// `TRUE` / `FALSE`
    BooleanLiteral(bool),
    /// Driver placeholder: `?`, `%s`, `%(name)s`, `:name`, `$1`
    Placeholder(String),
    /// `@user_var` or `@@system_var`
    Variable(String),
    Operator(&'static str),
    LeftParen,
    RightParen,
    Comma,
    Dot,
    Semicolon,
    Star,
}

impl Token {
    pub fn is_keyword(&self, word: &str) -> bool {
        matches!(self, Token::Keyword(k) if k == word)
    }

    /// Literal values and placeholders, the parts a fingerprint erases.
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            Token::Number(_) | Token::StringLiteral(_) | Token::BooleanLiteral(_) | Token::Placeholder(_)
        )
    }
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();
        Self {
            input,
            chars,
            position: 0,
            current_char,
        }
    }

    pub fn source(&self) -> &'a str {
        self.input
    }

    /// Tokenize the whole input, comments and whitespace dropped.
    pub fn tokenize(mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> LexResult<Option<Token>> {
        self.skip_trivia()?;

        let Some(ch) = self.current_char else {
            return Ok(None);
        };

        let token = match ch {
            '(' => self.single(Token::LeftParen),
            ')' => self.single(Token::RightParen),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semicolon),
            '*' => self.single(Token::Star),
            '.' if !self.peek().is_some_and(|c| c.is_ascii_digit()) => self.single(Token::Dot),
            '?' => self.single(Token::Placeholder("?".into())),
            '=' => self.single(Token::Operator("=")),
            '+' => self.single(Token::Operator("+")),
            '/' => self.single(Token::Operator("/")),
            '^' => self.single(Token::Operator("^")),
            '~' => self.single(Token::Operator("~")),
            '-' => {
                self.advance();
                if self.current_char == Some('>') {
                    self.advance();
                    if self.current_char == Some('>') {
                        self.advance();
                        Token::Operator("->>")
                    } else {
                        Token::Operator("->")
                    }
                } else {
                    Token::Operator("-")
                }
            }
            '<' => {
                self.advance();
                match self.current_char {
                    Some('=') => {
                        self.advance();
                        if self.current_char == Some('>') {
                            self.advance();
                            Token::Operator("<=>")
                        } else {
                            Token::Operator("<=")
                        }
                    }
                    Some('>') => {
                        self.advance();
                        Token::Operator("<>")
                    }
                    Some('<') => {
                        self.advance();
                        Token::Operator("<<")
                    }
                    _ => Token::Operator("<"),
                }
            }
            '>' => {
                self.advance();
                match self.current_char {
                    Some('=') => {
                        self.advance();
                        Token::Operator(">=")
                    }
                    Some('>') => {
                        self.advance();
                        Token::Operator(">>")
                    }
                    _ => Token::Operator(">"),
                }
            }
            '!' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::Operator("!=")
                } else {
                    Token::Operator("!")
                }
            }
            '|' => {
                self.advance();
                if self.current_char == Some('|') {
                    self.advance();
                    Token::Operator("||")
                } else {
                    Token::Operator("|")
                }
            }
            '&' => {
                self.advance();
                if self.current_char == Some('&') {
                    self.advance();
                    Token::Operator("&&")
                } else {
                    Token::Operator("&")
                }
            }
            ':' => {
                self.advance();
                match self.current_char {
                    Some('=') => {
                        self.advance();
                        Token::Operator(":=")
                    }
                    Some(c) if c.is_alphabetic() || c == '_' => {
                        let name = self.read_word();
                        Token::Placeholder(format!(":{name}"))
                    }
                    _ => return Err(LexError::UnexpectedChar(':', self.position - 1)),
                }
            }
            '%' => self.read_percent(),
            '$' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                self.advance();
                let digits = self.read_digits();
                Token::Placeholder(format!("${digits}"))
            }
            '@' => self.read_variable(),
            '\'' | '"' => Token::StringLiteral(self.read_string(ch)?),
            '`' => Token::Identifier(self.read_quoted_identifier()?),
            '0'..='9' | '.' => self.read_number(),
            c if c.is_alphabetic() || c == '_' => self.read_identifier()?,
            other => return Err(LexError::UnexpectedChar(other, self.position)),
        };

        Ok(Some(token))
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.chars.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn skip_trivia(&mut self) -> LexResult<()> {
        loop {
            match self.current_char {
                Some(ch) if ch.is_whitespace() => self.advance(),
                Some('#') => self.skip_line(),
                Some('-')
                    if self.peek() == Some('-')
                        && self
                            .chars
                            .get(self.position + 2)
                            .is_none_or(|c| c.is_whitespace()) =>
                {
                    self.skip_line()
                }
                Some('/') if self.peek() == Some('*') => {
                    let start = self.position;
                    self.advance();
                    self.advance();
                    loop {
                        match self.current_char {
                            None => return Err(LexError::UnterminatedComment(start)),
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.current_char {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_string(&mut self, quote: char) -> LexResult<String> {
        let start = self.position;
        self.advance(); // skip opening quote

        let mut value = String::new();
        loop {
            match self.current_char {
                None => return Err(LexError::UnterminatedString(start)),
                Some('\\') => {
                    self.advance();
                    match self.current_char {
                        Some(c) => value.push(c),
                        None => return Err(LexError::UnterminatedString(start)),
                    }
                    self.advance();
                }
                Some(c) if c == quote => {
                    // doubled quote is an escaped quote
                    if self.peek() == Some(quote) {
                        value.push(quote);
                        self.advance();
                        self.advance();
                    } else {
                        self.advance();
                        return Ok(value);
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn read_quoted_identifier(&mut self) -> LexResult<String> {
        let start = self.position;
        self.advance();

        let mut value = String::new();
        loop {
            match self.current_char {
                None => return Err(LexError::UnterminatedIdentifier(start)),
                Some('`') if self.peek() == Some('`') => {
                    value.push('`');
                    self.advance();
                    self.advance();
                }
                Some('`') => {
                    self.advance();
                    return Ok(value);
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn read_digits(&mut self) -> String {
        let mut digits = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        digits
    }

    fn read_number(&mut self) -> Token {
        let mut text = String::new();

        if self.current_char == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            text.push_str("0x");
            self.advance();
            self.advance();
            while let Some(ch) = self.current_char {
                if ch.is_ascii_hexdigit() {
                    text.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            return Token::Number(text);
        }

        text.push_str(&self.read_digits());
        if self.current_char == Some('.') {
            text.push('.');
            self.advance();
            text.push_str(&self.read_digits());
        }
        if matches!(self.current_char, Some('e') | Some('E'))
            && self
                .peek()
                .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+')
        {
            text.push('e');
            self.advance();
            if let Some(sign @ ('-' | '+')) = self.current_char {
                text.push(sign);
                self.advance();
            }
            text.push_str(&self.read_digits());
        }

        Token::Number(text)
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn read_identifier(&mut self) -> LexResult<Token> {
        // X'0A' and B'01' literals
        if matches!(self.current_char, Some('x' | 'X' | 'b' | 'B')) && self.peek() == Some('\'') {
            self.advance();
            return Ok(Token::StringLiteral(self.read_string('\'')?));
        }

        let word = self.read_word();
        Ok(self.classify_identifier(word))
    }

    fn classify_identifier(&self, text: String) -> Token {
        let upper = text.to_ascii_uppercase();
        match upper.as_str() {
            "TRUE" => Token::BooleanLiteral(true),
            "FALSE" => Token::BooleanLiteral(false),
            _ if KEYWORDS.contains(upper.as_str()) => Token::Keyword(upper),
            _ => Token::Identifier(text),
        }
    }

    fn read_percent(&mut self) -> Token {
        self.advance();
        match self.current_char {
            Some('s') => {
                self.advance();
                Token::Placeholder("%s".into())
            }
            Some('(') => {
                // %(name)s, otherwise a modulo followed by a parenthesis
                let save = self.position;
                self.advance();
                let name = self.read_word();
                if self.current_char == Some(')') && self.peek() == Some('s') {
                    self.advance();
                    self.advance();
                    Token::Placeholder(format!("%({name})s"))
                } else {
                    self.position = save;
                    self.current_char = self.chars.get(save).copied();
                    Token::Operator("%")
                }
            }
            _ => Token::Operator("%"),
        }
    }

    fn read_variable(&mut self) -> Token {
        let mut text = String::from("@");
        self.advance();
        if self.current_char == Some('@') {
            text.push('@');
            self.advance();
        }
        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '$' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Token::Variable(text)
    }
}

/// Tokenize `input` in one call.
pub fn tokenize(input: &str) -> LexResult<Vec<Token>> {
    Lexer::new(input).tokenize()
}
