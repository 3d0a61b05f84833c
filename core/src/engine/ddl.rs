//! Validated DDL.
//!
//! Every identifier that reaches an interpolated statement has passed the
//! allow-list in [`Identifier::new`], and `DROP INDEX` can only be built from
//! a [`ManagedName`], so foreign indexes cannot be named in a drop.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdvisorError, AdvisorResult};

/// Name prefix marking indexes this system created and may drop.
pub const MANAGED_PREFIX: &str = "autoidx_";

/// Engine limit on identifier length.
pub const MAX_IDENTIFIER_LEN: usize = 64;

lazy_static! {
    // word characters, with single inner spaces allowed for legacy table names
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z0-9_$]+(?: [A-Za-z0-9_$]+)*$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: &str) -> AdvisorResult<Self> {
        if name.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER.is_match(name) {
            return Err(AdvisorError::Validation(format!(
                "identifier {name:?} is not allowed"
            )));
        }
        if name.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AdvisorError::Validation(format!(
                "identifier {name:?} is numeric"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        format!("`{}`", self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = AdvisorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::new(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an index this system owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ManagedName(Identifier);

impl ManagedName {
    /// `autoidx_<col>_<col>...`, shortened with a checksum suffix when the
    /// full name exceeds the identifier limit.
    pub fn for_columns(columns: &[Identifier]) -> Self {
        let joined = columns
            .iter()
            .map(|c| c.as_str().replace(' ', "_"))
            .collect::<Vec<_>>()
            .join("_");
        let mut name = format!("{MANAGED_PREFIX}{joined}");

        if name.len() > MAX_IDENTIFIER_LEN {
            let digest = format!("{:08x}", crc32fast::hash(joined.as_bytes()));
            name.truncate(MAX_IDENTIFIER_LEN - digest.len() - 1);
            name.push('_');
            name.push_str(&digest);
        }
        // prefix and validated columns only
        Self(Identifier(name))
    }

    /// Accept a catalog index name only if it carries the managed prefix.
    pub fn parse(name: &str) -> Option<Self> {
        if !Self::is_managed(name) {
            return None;
        }
        Identifier::new(name).ok().map(Self)
    }

    pub fn is_managed(name: &str) -> bool {
        name.starts_with(MANAGED_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn identifier(&self) -> &Identifier {
        &self.0
    }
}

impl TryFrom<String> for ManagedName {
    type Error = AdvisorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ManagedName::parse(&value)
            .ok_or_else(|| AdvisorError::Validation(format!("{value:?} is not a managed index name")))
    }
}

impl From<ManagedName> for String {
    fn from(value: ManagedName) -> Self {
        value.0.0
    }
}

impl fmt::Display for ManagedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlStatement {
    CreateIndex {
        name: ManagedName,
        table: Identifier,
        columns: Vec<Identifier>,
    },
    DropIndex {
        name: ManagedName,
        table: Identifier,
    },
    AnalyzeTable(Identifier),
    OptimizeTable(Identifier),
}

impl DdlStatement {
    /// Validate raw names and build a managed `CREATE INDEX`.
    pub fn create_index(table: &str, columns: &[String]) -> AdvisorResult<Self> {
        if columns.is_empty() {
            return Err(AdvisorError::Validation("index without columns".into()));
        }
        let table = Identifier::new(table)?;
        let columns = columns
            .iter()
            .map(|c| Identifier::new(c))
            .collect::<AdvisorResult<Vec<_>>>()?;
        Ok(DdlStatement::CreateIndex {
            name: ManagedName::for_columns(&columns),
            table,
            columns,
        })
    }

    pub fn drop_index(table: &str, name: &ManagedName) -> AdvisorResult<Self> {
        Ok(DdlStatement::DropIndex {
            name: name.clone(),
            table: Identifier::new(table)?,
        })
    }

    /// Index the statement creates or drops.
    pub fn index_name(&self) -> Option<&ManagedName> {
        match self {
            DdlStatement::CreateIndex { name, .. } | DdlStatement::DropIndex { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn table(&self) -> &Identifier {
        match self {
            DdlStatement::CreateIndex { table, .. }
            | DdlStatement::DropIndex { table, .. }
            | DdlStatement::AnalyzeTable(table)
            | DdlStatement::OptimizeTable(table) => table,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            DdlStatement::CreateIndex {
                name,
                table,
                columns,
            } => format!(
                "CREATE INDEX {} ON {} ({})",
                name.identifier().quoted(),
                table.quoted(),
                columns
                    .iter()
                    .map(Identifier::quoted)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            DdlStatement::DropIndex { name, table } => format!(
                "DROP INDEX {} ON {}",
                name.identifier().quoted(),
                table.quoted()
            ),
            DdlStatement::AnalyzeTable(table) => format!("ANALYZE TABLE {}", table.quoted()),
            DdlStatement::OptimizeTable(table) => format!("OPTIMIZE TABLE {}", table.quoted()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_allow_list() {
        assert!(Identifier::new("customer_id").is_ok());
        assert!(Identifier::new("tabSales Invoice").is_ok());
        assert!(Identifier::new("a$b").is_ok());

        for bad in ["", "a`b", "a;DROP TABLE x", "a  b", " a", "a ", "x'y", "42", "a.b"] {
            assert!(Identifier::new(bad).is_err(), "accepted {bad:?}");
        }
        assert!(Identifier::new(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_create_index_sql() {
        let ddl = DdlStatement::create_index(
            "orders",
            &["customer_id".to_string(), "status".to_string()],
        )
        .unwrap();
        assert_eq!(
            ddl.to_sql(),
            "CREATE INDEX `autoidx_customer_id_status` ON `orders` (`customer_id`, `status`)"
        );
        assert_eq!(ddl.table().as_str(), "orders");
    }

    #[test]
    fn test_create_index_rejects_bad_names() {
        assert!(DdlStatement::create_index("orders", &["a`; DROP".to_string()]).is_err());
        assert!(DdlStatement::create_index("orders", &[]).is_err());
    }

    #[test]
    fn test_long_names_are_shortened() {
        let columns: Vec<Identifier> = (0..6)
            .map(|i| Identifier::new(&format!("a_rather_long_column_name_{i}")).unwrap())
            .collect();
        let name = ManagedName::for_columns(&columns);
        assert_eq!(name.as_str().len(), MAX_IDENTIFIER_LEN);
        assert!(name.as_str().starts_with(MANAGED_PREFIX));
        assert_eq!(name, ManagedName::for_columns(&columns));
        assert_ne!(name, ManagedName::for_columns(&columns[..5]));
    }

    #[test]
    fn test_managed_name_parse() {
        assert!(ManagedName::parse("autoidx_a_b").is_some());
        assert!(ManagedName::parse("idx_a_b").is_none());
        assert!(ManagedName::parse("PRIMARY").is_none());
        assert!(!ManagedName::is_managed("customer_id"));
    }

    #[test]
    fn test_drop_only_takes_managed_names() {
        let name = ManagedName::parse("autoidx_status").unwrap();
        let ddl = DdlStatement::drop_index("orders", &name).unwrap();
        assert_eq!(ddl.to_sql(), "DROP INDEX `autoidx_status` ON `orders`");
    }
}
