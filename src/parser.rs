// src/parser.rs
//! Character cursor and tokenizer for the guest language.

use crate::errors::{EvalError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    /// Raw source of a `${...}` substitution, parsed later as an expression.
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Ident(String),
    Punct(&'static str),
    Regex { pattern: String, flags: String },
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
    /// A line terminator separates this token from the previous one.
    pub newline_before: bool,
}

// Longest first so that `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "=>", "==", "!=", "<=", ">=", "&&",
    "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "**", "<<", ">>", "{", "}", "(",
    ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%", "&", "|", "^", "!", "~", "?",
    ":", "=", ".",
];

// Keywords after which a `/` starts a regular expression rather than a division.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "instanceof",
];

pub struct Parser<'a> {
    s: &'a str,
    i: usize,
}

impl<'a> Parser<'a> {
    pub fn new(s: &'a str) -> Self {
        Self { s, i: 0 }
    }

    /// Split the whole source into tokens, ending with `Token::Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Spanned>> {
        let mut out: Vec<Spanned> = Vec::new();
        loop {
            let newline_before = self.skip_ws()?;
            let offset = self.i;
            if self.eof() {
                out.push(Spanned { token: Token::Eof, offset, newline_before });
                return Ok(out);
            }
            let regex_allowed = regex_allowed_after(out.last().map(|t| &t.token));
            let token = self.next_token(regex_allowed)?;
            out.push(Spanned { token, offset, newline_before });
        }
    }

    fn next_token(&mut self, regex_allowed: bool) -> Result<Token> {
        let c = match self.peek_char() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };
        if c == '"' || c == '\'' {
            return Ok(Token::Str(self.parse_quoted_string()?));
        }
        if c == '`' {
            return self.parse_template();
        }
        if c.is_ascii_digit() || (c == '.' && self.peek_nth(1).is_some_and(|n| n.is_ascii_digit())) {
            return Ok(Token::Num(self.parse_number_literal()?));
        }
        if is_ident_start(c) {
            return Ok(Token::Ident(self.parse_identifier()?));
        }
        if c == '/' && regex_allowed {
            return self.parse_regex();
        }
        for p in PUNCTUATORS {
            if self.peek_str(p) {
                // `?.5` is a conditional followed by a number, not optional chaining.
                if *p == "?." && self.peek_nth(2).is_some_and(|n| n.is_ascii_digit()) {
                    continue;
                }
                self.i += p.len();
                return Ok(Token::Punct(p));
            }
        }
        Err(self.error(format!("unexpected character '{c}'")))
    }

    pub fn parse_identifier(&mut self) -> Result<String> {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            if is_ident_part(c) {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(self.error("identifier expected"));
        }
        Ok(self.s[start..self.i].to_string())
    }

    pub fn parse_number_literal(&mut self) -> Result<f64> {
        let start = self.i;
        if self.peek_str("0x") || self.peek_str("0X") {
            self.i += 2;
            let digits_start = self.i;
            while self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.i += 1;
            }
            return u64::from_str_radix(&self.s[digits_start..self.i], 16)
                .map(|v| v as f64)
                .map_err(|_| self.error("bad hex literal"));
        }
        self.eat_digits();
        if self.peek_char() == Some('.') {
            self.i += 1;
            self.eat_digits();
        }
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let save = self.i;
            self.i += 1;
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.i += 1;
            }
            if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.eat_digits();
            } else {
                self.i = save;
            }
        }
        let s = &self.s[start..self.i];
        if s.is_empty() {
            return Err(self.error("number expected"));
        }
        if self.peek_char().is_some_and(is_ident_start) {
            return Err(self.error("identifier starts immediately after numeric literal"));
        }
        s.parse::<f64>().map_err(|_| self.error("bad number"))
    }

    fn eat_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.i += 1;
        }
    }

    pub fn parse_quoted_string(&mut self) -> Result<String> {
        let quote = self.peek_char().ok_or_else(|| self.error("string expected"))?;
        if quote != '\'' && quote != '"' {
            return Err(self.error("expected quoted string"));
        }
        self.i += 1;
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.i += c.len_utf8();
            if c == quote {
                return Ok(out);
            }
            match c {
                '\\' => self.parse_escape(&mut out)?,
                '\n' => return Err(self.error("unterminated string")),
                _ => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    // Cursor sits just past the backslash.
    fn parse_escape(&mut self, out: &mut String) -> Result<()> {
        let nc = self.peek_char().ok_or_else(|| self.error("unterminated escape"))?;
        self.i += nc.len_utf8();
        match nc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            '\n' => {}
            'x' => {
                let code = self.take_hex(2)?;
                out.push(char::from_u32(code).ok_or_else(|| self.error("bad escape"))?);
            }
            'u' => {
                let code = if self.consume_char('{') {
                    let digits = self.capture_until('}')?;
                    self.i += 1;
                    u32::from_str_radix(digits, 16).map_err(|_| self.error("bad unicode escape"))?
                } else {
                    self.take_hex(4)?
                };
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn take_hex(&mut self, n: usize) -> Result<u32> {
        let end = self.i + n;
        let digits = self.s.get(self.i..end).ok_or_else(|| self.error("bad escape"))?;
        let code = u32::from_str_radix(digits, 16).map_err(|_| self.error("bad escape"))?;
        self.i = end;
        Ok(code)
    }

    fn parse_template(&mut self) -> Result<Token> {
        self.expect('`')?;
        let mut parts = Vec::new();
        let mut text = String::new();
        while let Some(c) = self.peek_char() {
            self.i += c.len_utf8();
            match c {
                '`' => {
                    parts.push(TemplatePart::Text(text));
                    return Ok(Token::Template(parts));
                }
                '\\' => self.parse_escape(&mut text)?,
                '$' if self.consume_char('{') => {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    parts.push(TemplatePart::Expr(self.capture_substitution()?));
                }
                _ => text.push(c),
            }
        }
        Err(self.error("unterminated template literal"))
    }

    // Cursor sits just past `${`; consumes through the matching `}`.
    fn capture_substitution(&mut self) -> Result<String> {
        let start = self.i;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek_char() {
            self.i += c.len_utf8();
            if let Some(q) = quote {
                if c == '\\' {
                    if let Some(n) = self.peek_char() {
                        self.i += n.len_utf8();
                    }
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' | '`' => quote = Some(c),
                '{' => depth += 1,
                '}' if depth == 0 => return Ok(self.s[start..self.i - 1].to_string()),
                '}' => depth -= 1,
                _ => {}
            }
        }
        Err(self.error("unterminated template substitution"))
    }

    fn parse_regex(&mut self) -> Result<Token> {
        self.expect('/')?;
        let start = self.i;
        let mut in_class = false;
        loop {
            let c = match self.peek_char() {
                Some(c) if c != '\n' => c,
                _ => return Err(self.error("unterminated regular expression")),
            };
            self.i += c.len_utf8();
            match c {
                '\\' => {
                    if let Some(n) = self.peek_char() {
                        self.i += n.len_utf8();
                    }
                }
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => break,
                _ => {}
            }
        }
        let pattern = self.s[start..self.i - 1].to_string();
        let flags_start = self.i;
        while self.peek_char().is_some_and(is_ident_part) {
            self.i += 1;
        }
        let flags = self.s[flags_start..self.i].to_string();
        Ok(Token::Regex { pattern, flags })
    }

    pub fn capture_until(&mut self, end: char) -> Result<&'a str> {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            if c == end {
                break;
            }
            self.i += c.len_utf8();
        }
        if self.peek_char() != Some(end) {
            return Err(self.error(format!("expected '{end}'")));
        }
        Ok(&self.s[start..self.i])
    }

    pub fn expect(&mut self, c: char) -> Result<()> {
        if self.consume_char(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    pub fn consume_char(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.i += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.s[self.i..].chars().nth(n)
    }

    pub fn peek_str(&self, lit: &str) -> bool {
        self.s[self.i..].starts_with(lit)
    }

    /// Skip whitespace and comments; reports whether a line break was crossed.
    pub fn skip_ws(&mut self) -> Result<bool> {
        let mut newline = false;
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    newline |= c == '\n';
                    self.i += c.len_utf8();
                }
                Some('/') if self.peek_str("//") => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.i += c.len_utf8();
                    }
                }
                Some('/') if self.peek_str("/*") => {
                    let end = self.s[self.i + 2..]
                        .find("*/")
                        .ok_or_else(|| self.error("unterminated comment"))?;
                    newline |= self.s[self.i..self.i + 2 + end].contains('\n');
                    self.i += end + 4;
                }
                _ => return Ok(newline),
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.i >= self.s.len()
    }

    fn error(&self, msg: impl Into<String>) -> EvalError {
        EvalError::Parse(format!("{} at offset {}", msg.into(), self.i))
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}

fn regex_allowed_after(prev: Option<&Token>) -> bool {
    match prev {
        None => true,
        Some(Token::Punct(p)) => !matches!(*p, ")" | "]" | "}" | "++" | "--"),
        Some(Token::Ident(name)) => REGEX_PREFIX_KEYWORDS.contains(&name.as_str()),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(src: &str) -> Vec<Token> {
        Parser::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn slash_after_value_is_division() {
        assert_eq!(
            tokens("a / 2"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("/"),
                Token::Num(2.0),
                Token::Eof
            ]
        );
    }

    #[test]
    fn slash_at_start_is_regex() {
        assert_eq!(
            tokens(r"/a[/]b\//gi"),
            vec![
                Token::Regex { pattern: r"a[/]b\/".into(), flags: "gi".into() },
                Token::Eof
            ]
        );
    }

    #[test]
    fn template_keeps_substitution_source() {
        assert_eq!(
            tokens("`n=${ {a:1}.a }!`"),
            vec![
                Token::Template(vec![
                    TemplatePart::Text("n=".into()),
                    TemplatePart::Expr(" {a:1}.a ".into()),
                    TemplatePart::Text("!".into()),
                ]),
                Token::Eof
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(tokens(r#"'a\nA\x42\''"#)[0], Token::Str("a\nAB'".into()));
        assert_eq!(tokens(r#""a\tb\u{1F600}""#)[0], Token::Str("a\tb\u{1F600}".into()));
    }

    #[test]
    fn newline_flag_and_comments() {
        let spanned = Parser::new("a // c\n/* x\n */ b").tokenize().unwrap();
        assert!(!spanned[0].newline_before);
        assert!(spanned[1].newline_before);
        assert_eq!(spanned[1].token, Token::Ident("b".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tokens("0x1F .5 1e3"),
            vec![Token::Num(31.0), Token::Num(0.5), Token::Num(1000.0), Token::Eof]
        );
        assert!(Parser::new("3in").tokenize().is_err());
    }
}
