//! Statement classification on top of sqlparser.

use sqlparser::ast::{Query, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

use super::{Classification, SafetyLevel, StatementKind};
use crate::db::DatabaseBackend;

type Verdict = (SafetyLevel, StatementKind);

/// Parses SQL in the dialect of the current connection.
#[derive(Debug)]
pub struct SqlClassifier {
    dialect: Box<dyn Dialect>,
}

impl Default for SqlClassifier {
    fn default() -> Self {
        Self::for_backend(None)
    }
}

impl SqlClassifier {
    /// Uses the generic dialect when the backend is unknown.
    pub fn for_backend(backend: Option<DatabaseBackend>) -> Self {
        let dialect: Box<dyn Dialect> = match backend {
            Some(DatabaseBackend::Postgres) => Box::new(PostgreSqlDialect {}),
            Some(DatabaseBackend::Mysql) => Box::new(MySqlDialect {}),
            None => Box::new(GenericDialect {}),
        };
        Self { dialect }
    }

    /// Classifies `sql`. Anything that does not parse is destructive.
    pub fn classify(&self, sql: &str) -> Classification {
        let statements = match Parser::parse_sql(self.dialect.as_ref(), sql) {
            Ok(statements) => statements,
            Err(_) => return Classification::unparseable("Could not parse SQL. Review it carefully."),
        };

        match statements.as_slice() {
            [] => Classification::unparseable("Empty SQL statement"),
            [single] => {
                let (level, kind) = classify_statement(single);
                Classification::new(level, kind)
            }
            many => {
                let (level, kind) = many
                    .iter()
                    .map(classify_statement)
                    .fold((SafetyLevel::ReadOnly, StatementKind::Select), worse);
                Classification::new(level, StatementKind::Multiple(Box::new(kind)))
            }
        }
    }
}

/// Classifies with the generic dialect.
pub fn classify_sql(sql: &str) -> Classification {
    SqlClassifier::default().classify(sql)
}

/// Keeps the more dangerous verdict; ties keep the first.
fn worse(a: Verdict, b: Verdict) -> Verdict {
    if b.0 > a.0 {
        b
    } else {
        a
    }
}

fn classify_statement(statement: &Statement) -> Verdict {
    use SafetyLevel::*;

    match statement {
        Statement::Query(query) => classify_query(query),
        // EXPLAIN ANALYZE runs the statement.
        Statement::Explain {
            analyze: true,
            statement,
            ..
        } => (classify_statement(statement).0, StatementKind::Explain),
        Statement::Explain { .. } => (ReadOnly, StatementKind::Explain),

        Statement::ShowVariable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. } => (ReadOnly, StatementKind::Show),

        Statement::Insert(_) => (Mutating, StatementKind::Insert),
        Statement::Update { .. } => (Mutating, StatementKind::Update),
        Statement::Merge { .. } => (Mutating, StatementKind::Merge),

        Statement::Delete(_) => (Destructive, StatementKind::Delete),
        Statement::Drop { .. } => (Destructive, StatementKind::Drop),
        Statement::Truncate { .. } => (Destructive, StatementKind::Truncate),
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterRole { .. } => (Destructive, StatementKind::Alter),
        Statement::CreateTable { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateView { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. } => (Destructive, StatementKind::Create),
        Statement::Grant { .. } => (Destructive, StatementKind::Grant),
        Statement::Revoke { .. } => (Destructive, StatementKind::Revoke),

        _ => (Destructive, StatementKind::Unknown),
    }
}

/// Looks through CTEs, set operations and derived tables for writes.
fn classify_query(query: &Query) -> Verdict {
    let ctes = query
        .with
        .iter()
        .flat_map(|with| with.cte_tables.iter())
        .map(|cte| classify_query(&cte.query));

    ctes.chain(std::iter::once(classify_set_expr(&query.body)))
        .fold((SafetyLevel::ReadOnly, StatementKind::Select), worse)
}

fn classify_set_expr(expr: &SetExpr) -> Verdict {
    match expr {
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) => classify_statement(stmt),
        SetExpr::Query(query) => classify_query(query),
        SetExpr::Select(select) => select
            .from
            .iter()
            .map(classify_joined)
            .fold((SafetyLevel::ReadOnly, StatementKind::Select), worse),
        SetExpr::SetOperation { left, right, .. } => {
            worse(classify_set_expr(left), classify_set_expr(right))
        }
        SetExpr::Values(_) | SetExpr::Table(_) => (SafetyLevel::ReadOnly, StatementKind::Select),
    }
}

fn classify_joined(twj: &TableWithJoins) -> Verdict {
    std::iter::once(&twj.relation)
        .chain(twj.joins.iter().map(|join| &join.relation))
        .map(classify_table_factor)
        .fold((SafetyLevel::ReadOnly, StatementKind::Select), worse)
}

fn classify_table_factor(factor: &TableFactor) -> Verdict {
    match factor {
        TableFactor::Derived { subquery, .. } => classify_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => classify_joined(table_with_joins),
        _ => (SafetyLevel::ReadOnly, StatementKind::Select),
    }
}
