//! Statement-level facts: what kind of statement it is, which tables it
//! touches, and how to turn a parameterized capture into something EXPLAIN
//! accepts.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::lexer::{Token, tokenize};

/// Read/write classification used for table activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Write,
    /// Session and transaction control
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Replace,
    Ddl,
    Show,
    Other,
}

impl StatementKind {
    pub fn of(sql: &str) -> Self {
        match tokenize(sql) {
            Ok(tokens) => Self::of_tokens(&tokens),
            Err(_) => {
                let first = sql
                    .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
                    .split(|c: char| !c.is_alphanumeric() && c != '_')
                    .next()
                    .unwrap_or_default()
                    .to_ascii_uppercase();
                Self::from_word(&first)
            }
        }
    }

    pub fn of_tokens(tokens: &[Token]) -> Self {
        let first = tokens.iter().find_map(|t| match t {
            Token::LeftParen => None,
            Token::Keyword(k) => Some(k.clone()),
            Token::Identifier(i) => Some(i.to_ascii_uppercase()),
            _ => Some(String::new()),
        });
        Self::from_word(first.as_deref().unwrap_or_default())
    }

    fn from_word(word: &str) -> Self {
        match word {
            "SELECT" | "WITH" => StatementKind::Select,
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "REPLACE" => StatementKind::Replace,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" => StatementKind::Ddl,
            "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" => StatementKind::Show,
            _ => StatementKind::Other,
        }
    }

    pub fn operation(self) -> OperationKind {
        match self {
            StatementKind::Select | StatementKind::Show => OperationKind::Read,
            StatementKind::Insert
            | StatementKind::Update
            | StatementKind::Delete
            | StatementKind::Replace
            | StatementKind::Ddl => OperationKind::Write,
            StatementKind::Other => OperationKind::Other,
        }
    }

    /// Statements whose access path the engine can explain and an index can
    /// serve.
    pub fn is_explainable(self) -> bool {
        matches!(
            self,
            StatementKind::Select | StatementKind::Update | StatementKind::Delete
        )
    }
}

/// A table named in FROM/JOIN/UPDATE/INTO position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
    /// Parenthesis depth; zero for the outermost statement
    pub depth: usize,
}

impl TableRef {
    pub fn matches_qualifier(&self, qualifier: &str) -> bool {
        self.alias.as_deref() == Some(qualifier) || self.name == qualifier
    }
}

/// Every table reference in the statement, subqueries included.
pub fn table_refs(tokens: &[Token]) -> Vec<TableRef> {
    let mut refs = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            Token::LeftParen => depth += 1,
            Token::RightParen => depth = depth.saturating_sub(1),
            Token::Keyword(k)
                if matches!(k.as_str(), "FROM" | "JOIN" | "UPDATE" | "INTO" | "STRAIGHT_JOIN") =>
            {
                let allow_list = k != "INTO";
                i = read_table_list(tokens, i + 1, depth, allow_list, &mut refs);
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    refs
}

fn read_table_list(
    tokens: &[Token],
    mut i: usize,
    depth: usize,
    allow_list: bool,
    refs: &mut Vec<TableRef>,
) -> usize {
    loop {
        match tokens.get(i) {
            // derived table: its own FROM is picked up by the outer scan
            Some(Token::LeftParen) => return i,
            Some(Token::Identifier(first)) => {
                let mut name = first.clone();
                i += 1;
                while let (Some(Token::Dot), Some(Token::Identifier(part))) =
                    (tokens.get(i), tokens.get(i + 1))
                {
                    name = part.clone();
                    i += 2;
                }

                let mut alias = None;
                if tokens.get(i).is_some_and(|t| t.is_keyword("AS")) {
                    i += 1;
                }
                if allow_list {
                    if let Some(Token::Identifier(a)) = tokens.get(i) {
                        alias = Some(a.clone());
                        i += 1;
                    }
                }

                if !name.eq_ignore_ascii_case("dual") {
                    refs.push(TableRef { name, alias, depth });
                }

                i = skip_index_hints(tokens, i);
                if allow_list && matches!(tokens.get(i), Some(Token::Comma)) {
                    i += 1;
                    continue;
                }
                return i;
            }
            _ => return i,
        }
    }
}

fn skip_index_hints(tokens: &[Token], mut i: usize) -> usize {
    while tokens
        .get(i)
        .is_some_and(|t| t.is_keyword("USE") || t.is_keyword("FORCE") || t.is_keyword("IGNORE"))
    {
        i += 1;
        while tokens
            .get(i)
            .is_some_and(|t| t.is_keyword("INDEX") || t.is_keyword("KEY") || t.is_keyword("FOR"))
            || matches!(tokens.get(i), Some(Token::Keyword(k)) if k == "JOIN" || k == "ORDER" || k == "GROUP" || k == "BY")
        {
            i += 1;
        }
        if matches!(tokens.get(i), Some(Token::LeftParen)) {
            while i < tokens.len() && tokens[i] != Token::RightParen {
                i += 1;
            }
            i += 1;
        }
    }
    i
}

/// Distinct table names a statement touches, sorted.
pub fn tables_touched(sql: &str) -> Vec<String> {
    let Ok(tokens) = tokenize(sql) else {
        return Vec::new();
    };
    table_refs(&tokens)
        .into_iter()
        .map(|t| t.name)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

lazy_static! {
    static ref SAMPLE_PARTS: Regex =
        Regex::new(r#"'(?:[^'\\]|\\.|'')*'|"(?:[^"\\]|\\.|"")*"|%\(\w+\)s|%s|\?"#).unwrap();
}

/// Replace driver placeholders with `1` so the statement can be explained.
/// Placeholders inside quoted strings are left alone.
pub fn materialize_sample(sql: &str) -> String {
    SAMPLE_PARTS
        .replace_all(sql.trim(), |caps: &Captures| {
            let part = &caps[0];
            if part.starts_with('\'') || part.starts_with('"') {
                part.to_string()
            } else {
                "1".to_string()
            }
        })
        .into_owned()
}
