//! Statement fingerprinting.
//!
//! A fingerprint is the canonical text of a statement with every literal and
//! placeholder replaced by `?`, keywords upper-cased, identifiers kept
//! verbatim, comments and incidental whitespace removed. Value lists collapse
//! to `(?+)` so `IN (1, 2)` and `IN (1, 2, 3)` share a fingerprint.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::lexer::{Token, is_keyword, tokenize};

/// Canonical identity of a statement shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short stable digest, used in logs and generated names.
    pub fn digest(&self) -> String {
        format!("{:08x}", crc32fast::hash(self.0.as_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryFingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

const VALUE: &str = "?";
const VALUE_LIST: &str = "(?+)";

/// Fingerprint a raw statement. Never fails: statements the tokenizer
/// rejects are normalised lexically instead.
pub fn fingerprint(sql: &str) -> QueryFingerprint {
    match tokenize(sql) {
        Ok(tokens) => QueryFingerprint(render(&collapse_lists(normalize(&tokens)))),
        Err(err) => {
            tracing::debug!(error = %err, "falling back to lexical fingerprint");
            QueryFingerprint(lexical_fingerprint(sql))
        }
    }
}

fn normalize(tokens: &[Token]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        match token {
            // unary minus on a literal is part of the literal
            Token::Operator("-" | "+")
                if tokens.get(i + 1).is_some_and(Token::is_value) && starts_operand(out.last()) =>
            {
                continue;
            }
            t if t.is_value() => out.push(VALUE.to_string()),
            // `= NULL` is a value, `IS [NOT] NULL` is structure
            Token::Keyword(k) if k == "NULL" && !follows_is(&out) => out.push(VALUE.to_string()),
            Token::Keyword(k) => out.push(k.clone()),
            Token::Identifier(name) => out.push(render_identifier(name)),
            Token::Variable(v) => out.push(v.clone()),
            Token::Operator(op) => out.push((*op).to_string()),
            Token::LeftParen => out.push("(".into()),
            Token::RightParen => out.push(")".into()),
            Token::Comma => out.push(",".into()),
            Token::Dot => out.push(".".into()),
            Token::Semicolon => out.push(";".into()),
            Token::Star => out.push("*".into()),
            _ => out.push(VALUE.to_string()),
        }
    }

    while out.last().is_some_and(|p| p == ";") {
        out.pop();
    }
    out
}

fn follows_is(out: &[String]) -> bool {
    match out {
        [.., last] if last == "IS" => true,
        [.., is, not] => is == "IS" && not == "NOT",
        _ => false,
    }
}

/// True when the previous piece cannot end an operand, so a following
/// `-`/`+` is a sign rather than an arithmetic operator.
fn starts_operand(previous: Option<&String>) -> bool {
    match previous {
        None => true,
        Some(p) => {
            matches!(p.as_str(), "(" | "," | "=" | "<" | ">" | "<=" | ">=" | "<>" | "!=" | "<=>")
                || p.chars().all(|c| c.is_ascii_uppercase() || c == '_') && is_keyword(p)
        }
    }
}

fn render_identifier(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// `( ? , ? , ? )` becomes `(?+)`, and runs of `(?+) , (?+)` become one.
fn collapse_lists(pieces: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(pieces.len());
    let mut i = 0;

    while i < pieces.len() {
        if pieces[i] == "(" {
            if let Some(end) = value_list_end(&pieces, i) {
                let repeated = out.len() >= 2
                    && out[out.len() - 1] == ","
                    && out[out.len() - 2] == VALUE_LIST;
                if repeated {
                    out.pop();
                } else {
                    out.push(VALUE_LIST.to_string());
                }
                i = end + 1;
                continue;
            }
        }
        out.push(pieces[i].clone());
        i += 1;
    }
    out
}

fn value_list_end(pieces: &[String], open: usize) -> Option<usize> {
    let mut expect_value = true;
    for (offset, piece) in pieces[open + 1..].iter().enumerate() {
        match (expect_value, piece.as_str()) {
            (true, VALUE) => expect_value = false,
            (false, ",") => expect_value = true,
            (false, ")") => return Some(open + 1 + offset),
            _ => return None,
        }
    }
    None
}

fn render(pieces: &[String]) -> String {
    let mut out = String::new();
    let mut previous: Option<&str> = None;

    for piece in pieces {
        let glue = match (previous, piece.as_str()) {
            (None, _) => false,
            (_, "," | ")" | ".") => false,
            (Some("(" | "."), _) => false,
            _ => true,
        };
        if glue {
            out.push(' ');
        }
        out.push_str(piece);
        previous = Some(piece.as_str());
    }
    out
}

lazy_static! {
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?(\*/|$)").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)(--\s|#).*$").unwrap();
    static ref QUOTED: Regex =
        Regex::new(r#"'(?:[^'\\]|\\.|'')*(?:'|$)|"(?:[^"\\]|\\.|"")*(?:"|$)"#).unwrap();
    static ref PLACEHOLDER: Regex = Regex::new(r"%\(\w+\)s|%s|\$\d+").unwrap();
    static ref NUMBER: Regex =
        Regex::new(r"(?i)\b0x[0-9a-f]+\b|-?\b\d+(?:\.\d+)?(?:e[+-]?\d+)?\b").unwrap();
    static ref NULL: Regex = Regex::new(r"(?i)(\bIS\s+(?:NOT\s+)?)?\bNULL\b").unwrap();
    static ref WORD: Regex = Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").unwrap();
    static ref OPERATOR: Regex = Regex::new(r"<=>|<=|>=|<>|!=|:=|[=<>!+*/%,()-]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref LIST: Regex = Regex::new(r"\(\s*\?(?:\s*,\s*\?)*\s*\)").unwrap();
    static ref SPACE_BEFORE_CLOSE: Regex = Regex::new(r"\s+([,)])").unwrap();
    static ref SPACE_AFTER_OPEN: Regex = Regex::new(r"\(\s+").unwrap();
}

/// Literal stripping without a tokenizer, for statements it rejects.
pub fn lexical_fingerprint(sql: &str) -> String {
    let text = BLOCK_COMMENT.replace_all(sql, " ");
    let text = LINE_COMMENT.replace_all(&text, " ");
    let text = QUOTED.replace_all(&text, VALUE);
    let text = PLACEHOLDER.replace_all(&text, VALUE);
    let text = NUMBER.replace_all(&text, VALUE);
    let text = NULL.replace_all(&text, |caps: &Captures| match caps.get(1) {
        Some(_) => caps[0].to_string(),
        None => VALUE.to_string(),
    });
    let text = WORD.replace_all(&text, |caps: &Captures| {
        let word = &caps[0];
        let upper = word.to_ascii_uppercase();
        if is_keyword(&upper) { upper } else { word.to_string() }
    });
    let text = OPERATOR.replace_all(&text, " $0 ");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = LIST.replace_all(&text, VALUE_LIST);
    let text = SPACE_BEFORE_CLOSE.replace_all(&text, "$1");
    let text = SPACE_AFTER_OPEN.replace_all(&text, "(");

    text.trim().trim_end_matches(';').trim_end().to_string()
}
