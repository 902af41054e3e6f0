//! SQL risk annotation.
//!
//! Classifies SQL proposed by the model so the confirmation dialog can say
//! what a statement will do. Classification is informational only: the SQL
//! is never rewritten and `execute_sql` is always confirmed.

mod classifier;

pub use classifier::{classify_sql, SqlClassifier};

use std::fmt;

/// How much a statement can change the database. Ordered from least to most
/// dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SafetyLevel {
    /// SELECT, plain EXPLAIN, SHOW.
    ReadOnly,
    /// INSERT, UPDATE, MERGE.
    Mutating,
    /// DELETE, DROP, TRUNCATE, ALTER, CREATE, GRANT, REVOKE, and anything
    /// that could not be parsed.
    Destructive,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::Mutating => "mutating",
            Self::Destructive => "destructive",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of statement detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Drop,
    Truncate,
    Alter,
    Create,
    Grant,
    Revoke,
    Explain,
    Show,
    /// Several statements; holds the most dangerous one.
    Multiple(Box<StatementKind>),
    Unknown,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Merge => "MERGE",
            Self::Drop => "DROP",
            Self::Truncate => "TRUNCATE",
            Self::Alter => "ALTER",
            Self::Create => "CREATE",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
            Self::Explain => "EXPLAIN",
            Self::Show => "SHOW",
            Self::Multiple(inner) => return write!(f, "multiple statements, worst: {inner}"),
            Self::Unknown => "unrecognized",
        };
        f.write_str(keyword)
    }
}

/// Result of classifying a SQL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub level: SafetyLevel,
    pub kind: StatementKind,
    pub warning: Option<String>,
}

impl Classification {
    pub fn new(level: SafetyLevel, kind: StatementKind) -> Self {
        let warning = (level == SafetyLevel::Destructive)
            .then(|| "This action cannot be undone.".to_string());
        Self {
            level,
            kind,
            warning,
        }
    }

    /// Destructive classification with a specific warning.
    pub fn unparseable(warning: impl Into<String>) -> Self {
        Self {
            level: SafetyLevel::Destructive,
            kind: StatementKind::Unknown,
            warning: Some(warning.into()),
        }
    }

    /// One-line label, e.g. `destructive (DELETE)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.level, self.kind)
    }
}
