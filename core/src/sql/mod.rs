pub mod fingerprint;
pub mod lexer;
pub mod predicate;
pub mod statement;

pub use fingerprint::{QueryFingerprint, fingerprint};
pub use lexer::{LexError, Token, tokenize};
pub use predicate::{ColumnUsage, UsageRole, UsedColumn, column_usages, extract_usage};
pub use statement::{OperationKind, StatementKind, materialize_sample, tables_touched};
