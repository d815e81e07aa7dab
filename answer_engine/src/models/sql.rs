//! SQL path models
//!
//! The SQL path never fails a request by itself: every way it can go wrong
//! is a typed [`SqlFailure`] inside an [`SqlOutcome`], and the orchestrator
//! inspects the tag to decide whether to fall back to the vector path.

use thiserror::Error;

/// One row of a result set, as ordered field → value pairs.
pub type SqlRow = Vec<(String, serde_json::Value)>;

/// Ways the SQL path can fail. Internal taxonomy; these kinds never reach
/// the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlFailure {
    #[error("statement failed the syntactic sniff: {0}")]
    SyntaxInvalid(String),

    #[error("forbidden statement: {0}")]
    ForbiddenStatement(String),

    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("execution failed: {0}")]
    ExecutionError(String),

    /// Zero rows on a high-confidence statistical question. Distinguished
    /// from an errored execution so the fallback edge can treat it
    /// differently from a broken statement.
    #[error("statement executed but returned no rows")]
    EmptyResult,
}

impl SqlFailure {
    /// Taxonomy slug used in domain events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyntaxInvalid(_) => "sql_syntax_invalid",
            Self::ForbiddenStatement(_) => "sql_forbidden_statement",
            Self::UnknownIdentifier(_) => "sql_unknown_identifier",
            Self::ExecutionError(_) => "sql_execution_error",
            Self::EmptyResult => "sql_empty_result",
        }
    }
}

/// A completed execution of a generated statement.
#[derive(Debug, Clone, Default)]
pub struct SqlExecution {
    /// The statement that ran
    pub sql: String,

    /// Result rows, capped at the configured row limit
    pub rows: Vec<SqlRow>,

    /// Whether the row cap cut the result set short
    pub truncated: bool,

    pub duration_ms: u64,
}

/// Result of one pass through the SQL path.
#[derive(Debug, Clone)]
pub enum SqlOutcome {
    Completed(SqlExecution),
    Failed {
        /// The generated statement, when generation got that far
        sql: Option<String>,
        failure: SqlFailure,
    },
}

impl SqlOutcome {
    pub fn failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The execution, when it completed with at least one row.
    pub fn grounded(&self) -> Option<&SqlExecution> {
        match self {
            Self::Completed(execution) if !execution.rows.is_empty() => Some(execution),
            _ => None,
        }
    }
}
