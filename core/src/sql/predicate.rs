//! Predicate and ordering extraction.
//!
//! Walks the outermost `WHERE`, `JOIN ... ON` and `ORDER BY` clauses of a
//! statement and reports which columns are filtered by equality, filtered by
//! range, or used as sort keys. The predicate tree is flattened into
//! disjunctive normal form: every `OR` branch becomes its own group, and each
//! group is a set of columns one composite index could serve together.
//!
//! Anything the parser does not understand contributes no usage. Negations,
//! inequality, function-wrapped columns and subqueries are opaque.

use serde::{Deserialize, Serialize};

use super::fingerprint::QueryFingerprint;
use super::lexer::{Token, tokenize};
use super::statement::{TableRef, table_refs};
use crate::error::{AdvisorError, AdvisorResult};

/// Upper bound on conjunctive groups produced by one statement.
const MAX_GROUPS: usize = 8;

/// How a column participates in a statement. The declaration order is the
/// order columns take inside a composite index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageRole {
    Equality,
    Range,
    Sort,
}

/// A resolved column reference inside one conjunctive group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedColumn {
    pub table: String,
    pub column: String,
    pub role: UsageRole,
}

/// One column usage attributed to a recorded statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnUsage {
    pub table: String,
    pub column: String,
    pub role: UsageRole,
    pub fingerprint: QueryFingerprint,
    /// Occurrence count of the source statement
    pub weight: u64,
    /// Conjunctive group within the source statement
    pub group: u16,
}

/// Extract usages for a statement and tag them with their source.
pub fn column_usages(
    sql: &str,
    fingerprint: &QueryFingerprint,
    weight: u64,
) -> AdvisorResult<Vec<ColumnUsage>> {
    let groups = extract_usage(sql)?;
    let mut usages = Vec::new();
    for (group, columns) in groups.into_iter().enumerate() {
        for used in columns {
            usages.push(ColumnUsage {
                table: used.table,
                column: used.column,
                role: used.role,
                fingerprint: fingerprint.clone(),
                weight,
                group: group as u16,
            });
        }
    }
    Ok(usages)
}

/// Conjunctive groups of resolved columns, in clause order.
pub fn extract_usage(sql: &str) -> AdvisorResult<Vec<Vec<UsedColumn>>> {
    let tokens = tokenize(sql).map_err(|e| AdvisorError::Parse(e.to_string()))?;
    let refs: Vec<TableRef> = table_refs(&tokens)
        .into_iter()
        .filter(|r| r.depth == 0)
        .collect();
    let clauses = Clauses::locate(&tokens);

    let mut dnf = opaque();
    for segment in clauses.join_conditions.iter().chain(clauses.filter.iter()) {
        let mut parser = ClauseParser::new(segment);
        let parsed = parser.parse_expr()?;
        if !parser.at_end() {
            return Err(AdvisorError::Parse(format!(
                "unsupported predicate near {:?}",
                parser.peek()
            )));
        }
        dnf = and(dnf, parsed);
    }

    let sorts: Vec<UsedColumn> = clauses
        .ordering
        .map(sort_keys)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| resolve(&refs, &c, UsageRole::Sort))
        .collect();

    let mut groups: Vec<Vec<UsedColumn>> = dnf
        .into_iter()
        .map(|atoms| {
            atoms
                .into_iter()
                .filter_map(|a| resolve(&refs, &a.column, a.role))
                .collect()
        })
        .collect();

    if groups.len() <= 1 {
        if groups.is_empty() {
            groups.push(Vec::new());
        }
        groups[0].extend(sorts);
    } else if !sorts.is_empty() {
        groups.push(sorts);
    }

    Ok(groups
        .into_iter()
        .map(dedupe)
        .filter(|g| !g.is_empty())
        .collect())
}

/// Keep one entry per column, with its strongest role.
fn dedupe(group: Vec<UsedColumn>) -> Vec<UsedColumn> {
    let mut out: Vec<UsedColumn> = Vec::with_capacity(group.len());
    for used in group {
        match out
            .iter_mut()
            .find(|u| u.table == used.table && u.column == used.column)
        {
            Some(existing) => existing.role = existing.role.min(used.role),
            None => out.push(used),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnName {
    qualifier: Option<String>,
    column: String,
}

fn resolve(refs: &[TableRef], name: &ColumnName, role: UsageRole) -> Option<UsedColumn> {
    let table = match &name.qualifier {
        Some(q) => refs.iter().find(|r| r.matches_qualifier(q))?,
        None if refs.len() == 1 => &refs[0],
        None => return None,
    };
    Some(UsedColumn {
        table: table.name.clone(),
        column: name.column.clone(),
        role,
    })
}

/// Token slices of the outermost clauses.
#[derive(Default)]
struct Clauses<'a> {
    filter: Option<&'a [Token]>,
    join_conditions: Vec<&'a [Token]>,
    ordering: Option<&'a [Token]>,
}

const FILTER_END: &[&str] = &["GROUP", "ORDER", "LIMIT", "HAVING", "UNION", "FOR", "LOCK", "INTO"];
const JOIN_END: &[&str] = &[
    "JOIN", "INNER", "LEFT", "RIGHT", "CROSS", "NATURAL", "STRAIGHT_JOIN", "FULL", "WHERE", "SET",
    "GROUP", "ORDER", "LIMIT", "HAVING", "UNION", "FOR", "LOCK",
];
const ORDER_END: &[&str] = &["LIMIT", "UNION", "FOR", "LOCK", "INTO"];

impl<'a> Clauses<'a> {
    fn locate(tokens: &'a [Token]) -> Self {
        let mut clauses = Clauses::default();
        let mut depth = 0usize;
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::LeftParen => depth += 1,
                Token::RightParen => depth = depth.saturating_sub(1),
                Token::Keyword(k) if depth == 0 => match k.as_str() {
                    "WHERE" if clauses.filter.is_none() => {
                        let end = segment_end(tokens, i + 1, FILTER_END, false);
                        clauses.filter = Some(&tokens[i + 1..end]);
                        i = end;
                        continue;
                    }
                    "ON" if !tokens.get(i + 1).is_some_and(|t| t.is_keyword("DUPLICATE")) => {
                        let end = segment_end(tokens, i + 1, JOIN_END, true);
                        clauses.join_conditions.push(&tokens[i + 1..end]);
                        i = end;
                        continue;
                    }
                    "ORDER"
                        if clauses.ordering.is_none()
                            && tokens.get(i + 1).is_some_and(|t| t.is_keyword("BY")) =>
                    {
                        let end = segment_end(tokens, i + 2, ORDER_END, false);
                        clauses.ordering = Some(&tokens[i + 2..end]);
                        i = end;
                        continue;
                    }
                    // a second SELECT at the top level starts another statement part
                    "UNION" => break,
                    _ => {}
                },
                _ => {}
            }
            i += 1;
        }
        clauses
    }
}

fn segment_end(tokens: &[Token], start: usize, stops: &[&str], stop_at_comma: bool) -> usize {
    let mut depth = 0usize;
    for (offset, token) in tokens[start..].iter().enumerate() {
        match token {
            Token::LeftParen => depth += 1,
            Token::RightParen if depth == 0 => return start + offset,
            Token::RightParen => depth -= 1,
            Token::Semicolon if depth == 0 => return start + offset,
            Token::Comma if depth == 0 && stop_at_comma => return start + offset,
            Token::Keyword(k) if depth == 0 && stops.contains(&k.as_str()) => {
                return start + offset;
            }
            _ => {}
        }
    }
    tokens.len()
}

/// Plain leading columns of an ORDER BY list. Stops at the first item that
/// is not a bare column reference.
fn sort_keys(tokens: &[Token]) -> Vec<ColumnName> {
    let mut keys = Vec::new();
    let mut i = 0;

    while let Some(Token::Identifier(first)) = tokens.get(i) {
        let mut parts = vec![first.clone()];
        i += 1;
        while let (Some(Token::Dot), Some(Token::Identifier(part))) = (tokens.get(i), tokens.get(i + 1)) {
            parts.push(part.clone());
            i += 2;
        }
        if matches!(tokens.get(i), Some(Token::LeftParen | Token::Operator(_) | Token::Star)) {
            break;
        }
        keys.push(column_name(parts));

        if tokens.get(i).is_some_and(|t| t.is_keyword("ASC") || t.is_keyword("DESC")) {
            i += 1;
        }
        match tokens.get(i) {
            Some(Token::Comma) => i += 1,
            _ => break,
        }
    }
    keys
}

fn column_name(mut parts: Vec<String>) -> ColumnName {
    let column = parts.pop().unwrap_or_default();
    ColumnName {
        qualifier: parts.pop(),
        column,
    }
}

#[derive(Debug, Clone)]
struct Atom {
    column: ColumnName,
    role: UsageRole,
}

/// Disjunction of conjunctions.
type Dnf = Vec<Vec<Atom>>;

/// A predicate that contributes nothing but does not falsify its siblings.
fn opaque() -> Dnf {
    vec![Vec::new()]
}

fn atoms(atoms: Vec<Atom>) -> Dnf {
    vec![atoms]
}

fn and(left: Dnf, right: Dnf) -> Dnf {
    let mut out = Vec::new();
    for l in &left {
        for r in &right {
            if out.len() == MAX_GROUPS {
                return out;
            }
            let mut group = l.clone();
            group.extend(r.iter().cloned());
            out.push(group);
        }
    }
    out
}

fn or(mut left: Dnf, right: Dnf) -> Dnf {
    left.extend(right);
    left.truncate(MAX_GROUPS);
    left
}

#[derive(Debug, Clone)]
enum Operand {
    Column(ColumnName),
    /// Literals, placeholders, variables and calls
    Constant,
    /// Anything derived from a column
    Expr,
}

struct ClauseParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> ClauseParser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> AdvisorResult<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(word))
        }
    }

    fn unexpected(&self, wanted: &str) -> AdvisorError {
        AdvisorError::Parse(format!("expected {wanted}, found {:?}", self.peek()))
    }

    fn parse_expr(&mut self) -> AdvisorResult<Dnf> {
        let mut result = self.parse_and()?;
        loop {
            match self.peek() {
                Some(t) if t.is_keyword("OR") || *t == Token::Operator("||") => {
                    self.advance();
                    let rhs = self.parse_and()?;
                    result = or(result, rhs);
                }
                Some(t) if t.is_keyword("XOR") => {
                    self.advance();
                    self.parse_and()?;
                    result = opaque();
                }
                _ => return Ok(result),
            }
        }
    }

    fn parse_and(&mut self) -> AdvisorResult<Dnf> {
        let mut result = self.parse_not()?;
        while self
            .peek()
            .is_some_and(|t| t.is_keyword("AND") || *t == Token::Operator("&&"))
        {
            self.advance();
            let rhs = self.parse_not()?;
            result = and(result, rhs);
        }
        Ok(result)
    }

    fn parse_not(&mut self) -> AdvisorResult<Dnf> {
        if self
            .peek()
            .is_some_and(|t| t.is_keyword("NOT") || *t == Token::Operator("!"))
        {
            self.advance();
            self.parse_not()?;
            return Ok(opaque());
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> AdvisorResult<Dnf> {
        match self.peek() {
            Some(Token::LeftParen) if !self.is_subquery() => {
                self.advance();
                let inner = self.parse_expr()?;
                if !matches!(self.advance(), Some(Token::RightParen)) {
                    return Err(AdvisorError::Parse("unbalanced parenthesis".into()));
                }
                // `(a + 1) > 2` and friends
                if self.at_comparison() {
                    self.parse_tail(Operand::Expr)?;
                    return Ok(opaque());
                }
                Ok(inner)
            }
            Some(t) if t.is_keyword("EXISTS") => {
                self.advance();
                self.skip_group()?;
                Ok(opaque())
            }
            _ => {
                let lhs = self.parse_operand()?;
                self.parse_tail(lhs)
            }
        }
    }

    fn at_comparison(&self) -> bool {
        match self.peek() {
            Some(Token::Operator(op)) => COMPARISONS.contains(op),
            Some(Token::Keyword(k)) => {
                matches!(k.as_str(), "IS" | "IN" | "BETWEEN" | "LIKE" | "REGEXP" | "RLIKE" | "NOT")
            }
            _ => false,
        }
    }

    fn parse_tail(&mut self, lhs: Operand) -> AdvisorResult<Dnf> {
        let Some(token) = self.peek() else {
            return Ok(opaque());
        };

        match token {
            Token::Operator(op) if COMPARISONS.contains(op) => {
                self.advance();
                // `= ALL (SELECT ...)`
                self.eat_keyword("ALL");
                let rhs = self.parse_operand()?;
                Ok(compare(lhs, op, rhs))
            }
            Token::Keyword(k) => match k.as_str() {
                "IS" => {
                    self.advance();
                    let negated = self.eat_keyword("NOT");
                    match self.advance() {
                        Some(Token::Keyword(n)) if n == "NULL" => {
                            let role = if negated { UsageRole::Range } else { UsageRole::Equality };
                            Ok(single(lhs, role))
                        }
                        Some(Token::BooleanLiteral(_)) | Some(Token::Identifier(_)) => Ok(opaque()),
                        _ => Err(AdvisorError::Parse("malformed IS predicate".into())),
                    }
                }
                "NOT" => {
                    self.advance();
                    self.parse_tail(Operand::Expr)?;
                    Ok(opaque())
                }
                "IN" => {
                    self.advance();
                    if matches!(self.peek(), Some(Token::LeftParen)) {
                        self.skip_group()?;
                    } else {
                        self.parse_operand()?;
                    }
                    Ok(single(lhs, UsageRole::Equality))
                }
                "BETWEEN" => {
                    self.advance();
                    let low = self.parse_operand()?;
                    self.expect_keyword("AND")?;
                    let high = self.parse_operand()?;
                    if matches!(low, Operand::Constant) && matches!(high, Operand::Constant) {
                        Ok(single(lhs, UsageRole::Range))
                    } else {
                        Ok(opaque())
                    }
                }
                "LIKE" => {
                    self.advance();
                    let sargable = match self.peek() {
                        Some(Token::StringLiteral(p)) => {
                            !p.is_empty() && !p.starts_with('%') && !p.starts_with('_')
                        }
                        Some(Token::Placeholder(_)) => true,
                        _ => false,
                    };
                    self.parse_operand()?;
                    if self.eat_keyword("ESCAPE") {
                        self.parse_operand()?;
                    }
                    if sargable {
                        Ok(single(lhs, UsageRole::Range))
                    } else {
                        Ok(opaque())
                    }
                }
                "REGEXP" | "RLIKE" => {
                    self.advance();
                    self.parse_operand()?;
                    Ok(opaque())
                }
                _ => Ok(opaque()),
            },
            _ => Ok(opaque()),
        }
    }

    fn parse_operand(&mut self) -> AdvisorResult<Operand> {
        let mut operand = self.parse_primary()?;
        while self.at_arithmetic() {
            self.advance();
            let rhs = self.parse_primary()?;
            operand = match (operand, rhs) {
                (Operand::Constant, Operand::Constant) => Operand::Constant,
                _ => Operand::Expr,
            };
        }
        Ok(operand)
    }

    fn at_arithmetic(&self) -> bool {
        match self.peek() {
            Some(Token::Operator(op)) => ARITHMETIC.contains(op),
            Some(Token::Star) => true,
            Some(Token::Keyword(k)) => k == "DIV" || k == "MOD",
            _ => false,
        }
    }

    fn parse_primary(&mut self) -> AdvisorResult<Operand> {
        let Some(token) = self.advance() else {
            return Err(AdvisorError::Parse("unexpected end of predicate".into()));
        };

        match token {
            Token::Operator("-" | "+" | "~") => match self.parse_primary()? {
                Operand::Constant => Ok(Operand::Constant),
                _ => Ok(Operand::Expr),
            },
            t if t.is_value() => Ok(Operand::Constant),
            Token::Variable(_) => Ok(Operand::Constant),
            Token::Keyword(k) if k == "NULL" => Ok(Operand::Constant),
            Token::Keyword(k) if k == "INTERVAL" => {
                let inner = self.parse_primary()?;
                if matches!(self.peek(), Some(Token::Identifier(_))) {
                    self.advance();
                }
                Ok(inner)
            }
            Token::Keyword(k) if k == "CASE" => {
                self.skip_case()?;
                Ok(Operand::Expr)
            }
            Token::Identifier(first) => {
                if matches!(self.peek(), Some(Token::LeftParen)) {
                    self.skip_group()?;
                    return Ok(Operand::Constant);
                }
                let mut parts = vec![first.clone()];
                while let (Some(Token::Dot), Some(Token::Identifier(part))) =
                    (self.peek(), self.peek_at(1))
                {
                    parts.push(part.clone());
                    self.pos += 2;
                }
                Ok(Operand::Column(column_name(parts)))
            }
            Token::LeftParen => {
                self.pos -= 1;
                self.skip_group()?;
                Ok(Operand::Expr)
            }
            other => Err(AdvisorError::Parse(format!("unsupported operand {other:?}"))),
        }
    }

    fn is_subquery(&self) -> bool {
        self.peek_at(1)
            .is_some_and(|t| t.is_keyword("SELECT") || t.is_keyword("WITH"))
    }

    /// Skip a parenthesized group starting at the current token.
    fn skip_group(&mut self) -> AdvisorResult<()> {
        if !matches!(self.peek(), Some(Token::LeftParen)) {
            return Err(self.unexpected("("));
        }
        let mut depth = 0usize;
        while let Some(token) = self.advance() {
            match token {
                Token::LeftParen => depth += 1,
                Token::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(AdvisorError::Parse("unbalanced parenthesis".into()))
    }

    fn skip_case(&mut self) -> AdvisorResult<()> {
        let mut depth = 1usize;
        while let Some(token) = self.advance() {
            if token.is_keyword("CASE") {
                depth += 1;
            } else if token.is_keyword("END") {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        Err(AdvisorError::Parse("unterminated CASE".into()))
    }
}

const COMPARISONS: &[&str] = &["=", "<=>", "<", ">", "<=", ">=", "!=", "<>"];
const ARITHMETIC: &[&str] = &["+", "-", "/", "%", "&", "|", "^", "<<", ">>", "->", "->>"];

fn single(operand: Operand, role: UsageRole) -> Dnf {
    match operand {
        Operand::Column(column) => atoms(vec![Atom { column, role }]),
        _ => opaque(),
    }
}

fn compare(lhs: Operand, op: &str, rhs: Operand) -> Dnf {
    let role = match op {
        "=" | "<=>" => UsageRole::Equality,
        "<" | ">" | "<=" | ">=" => UsageRole::Range,
        _ => return opaque(),
    };

    match (lhs, rhs) {
        (Operand::Column(column), Operand::Constant) | (Operand::Constant, Operand::Column(column)) => {
            atoms(vec![Atom { column, role }])
        }
        // join edge: either side can drive a lookup into the other
        (Operand::Column(left), Operand::Column(right)) if role == UsageRole::Equality => atoms(vec![
            Atom { column: left, role },
            Atom { column: right, role },
        ]),
        _ => opaque(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn col(table: &str, column: &str, role: UsageRole) -> UsedColumn {
        UsedColumn {
            table: table.into(),
            column: column.into(),
            role,
        }
    }

    #[test]
    fn test_equality_conjunction() {
        let groups =
            extract_usage("SELECT * FROM orders WHERE customer_id = ? AND status = 'open'").unwrap();
        assert_eq!(
            groups,
            vec![vec![
                col("orders", "customer_id", UsageRole::Equality),
                col("orders", "status", UsageRole::Equality),
            ]]
        );
    }

    #[test]
    fn test_range_and_sort() {
        let groups = extract_usage(
            "SELECT id FROM orders WHERE created > NOW() - INTERVAL 1 DAY AND customer_id = 5 ORDER BY id DESC LIMIT 10",
        )
        .unwrap();
        assert_eq!(
            groups,
            vec![vec![
                col("orders", "created", UsageRole::Range),
                col("orders", "customer_id", UsageRole::Equality),
                col("orders", "id", UsageRole::Sort),
            ]]
        );
    }

    #[test]
    fn test_or_splits_groups() {
        let groups =
            extract_usage("SELECT * FROM t WHERE (a = 1 AND b = 2) OR c = 3 ORDER BY d").unwrap();
        assert_eq!(
            groups,
            vec![
                vec![col("t", "a", UsageRole::Equality), col("t", "b", UsageRole::Equality)],
                vec![col("t", "c", UsageRole::Equality)],
                vec![col("t", "d", UsageRole::Sort)],
            ]
        );
    }

    #[test]
    fn test_join_condition_and_aliases() {
        let groups = extract_usage(
            "SELECT o.id FROM orders o JOIN customers AS c ON c.id = o.customer_id WHERE c.country = ?",
        )
        .unwrap();
        assert_eq!(
            groups,
            vec![vec![
                col("customers", "id", UsageRole::Equality),
                col("orders", "customer_id", UsageRole::Equality),
                col("customers", "country", UsageRole::Equality),
            ]]
        );
    }

    #[test]
    fn test_opaque_predicates_contribute_nothing() {
        let groups = extract_usage(
            "SELECT * FROM t WHERE a != 1 AND NOT b = 2 AND c NOT IN (1, 2) AND DATE(d) = ? AND e = 5",
        )
        .unwrap();
        assert_eq!(groups, vec![vec![col("t", "e", UsageRole::Equality)]]);

        assert!(extract_usage("SELECT * FROM t WHERE LOWER(name) = 'x'").unwrap().is_empty());
    }

    #[test]
    fn test_between_like_in_is_null() {
        let groups = extract_usage(
            "SELECT * FROM t WHERE a BETWEEN 1 AND 5 AND b LIKE 'abc%' AND c LIKE '%abc' AND d IN (1, 2) AND e IS NULL AND f IS NOT NULL",
        )
        .unwrap();
        assert_eq!(
            groups,
            vec![vec![
                col("t", "a", UsageRole::Range),
                col("t", "b", UsageRole::Range),
                col("t", "d", UsageRole::Equality),
                col("t", "e", UsageRole::Equality),
                col("t", "f", UsageRole::Range),
            ]]
        );
    }

    #[test]
    fn test_ambiguous_columns_are_dropped() {
        let groups =
            extract_usage("SELECT * FROM a, b WHERE a.x = b.y AND z = 1").unwrap();
        assert_eq!(
            groups,
            vec![vec![col("a", "x", UsageRole::Equality), col("b", "y", UsageRole::Equality)]]
        );
    }

    #[test]
    fn test_subquery_is_opaque() {
        let groups = extract_usage(
            "SELECT * FROM t WHERE id IN (SELECT tid FROM u WHERE u.k = 1) AND EXISTS (SELECT 1 FROM v) AND x = 2",
        )
        .unwrap();
        assert_eq!(
            groups,
            vec![vec![col("t", "id", UsageRole::Equality), col("t", "x", UsageRole::Equality)]]
        );
    }

    #[test]
    fn test_update_and_delete() {
        let groups = extract_usage("UPDATE t SET a = 1, b = 2 WHERE c = 3").unwrap();
        assert_eq!(groups, vec![vec![col("t", "c", UsageRole::Equality)]]);

        let groups = extract_usage("DELETE FROM t WHERE c < 3 ORDER BY c LIMIT 100").unwrap();
        assert_eq!(groups, vec![vec![col("t", "c", UsageRole::Range)]]);
    }

    #[test]
    fn test_unsupported_shape_is_an_error() {
        assert!(extract_usage("SELECT * FROM t WHERE (a, b) = (1, 2)").is_err());
        assert!(extract_usage("SELECT * FROM t WHERE name = 'unterminated").is_err());
    }

    #[test]
    fn test_column_usages_carry_source() {
        let fp = QueryFingerprint::from("SELECT * FROM t WHERE a = ? OR b = ?");
        let usages = column_usages("SELECT * FROM t WHERE a = 1 OR b = 2", &fp, 70).unwrap();
        assert_eq!(usages.len(), 2);
        assert_eq!(usages[0].group, 0);
        assert_eq!(usages[1].group, 1);
        assert!(usages.iter().all(|u| u.weight == 70 && u.fingerprint == fp));
    }
}
