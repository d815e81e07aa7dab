//! SQL Generator
//!
//! Natural-language → SQL translation using a few-shot prompt against the
//! generation capability, guarded against hallucination and schema drift by
//! a staged validation pipeline: syntactic sniff, identifier resolution
//! against the schema catalog, guarded execution, and empty-result
//! classification. Every stage failure is a typed [`SqlFailure`] the
//! orchestrator treats as "SQL path failed", never a thrown error.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::models::{SqlExecution, SqlFailure, SqlRow};
use crate::services::generation::{GenerationClient, GenerationError, GenerationParams};
use crate::services::stats_store::SchemaCatalog;

/// Rows rendered into the prompt; anything past this is summarized.
const PROMPT_ROW_LIMIT: usize = 20;

/// Generation budget for a statement; statements are short.
const SQL_MAX_TOKENS: u32 = 512;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "attach", "pragma", "create", "truncate",
    "grant", "revoke", "copy", "vacuum",
];

static FORBIDDEN_RE: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(r"\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
    Regex::new(&pattern).unwrap_or_else(|e| panic!("{e}"))
});

/// SQL vocabulary that is not a schema identifier.
static SQL_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "select", "from", "where", "group", "by", "order", "limit", "offset", "as", "and", "or",
        "not", "in", "is", "null", "distinct", "all", "count", "sum", "avg", "min", "max",
        "round", "abs", "coalesce", "nullif", "cast", "like", "ilike", "between", "having",
        "join", "inner", "left", "right", "full", "outer", "cross", "on", "using", "asc",
        "desc", "case", "when", "then", "else", "end", "union", "intersect", "except", "exists",
        "integer", "bigint", "real", "numeric", "text", "float", "true", "false", "nulls",
        "first", "last",
    ]
    .into_iter()
    .collect()
});

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap_or_else(|e| panic!("{e}")));

/// Few-shot examples covering top-N, aggregation, comparison, filtering, and
/// named-entity lookup.
const FEW_SHOT_EXAMPLES: &[(&str, &str)] = &[
    (
        "Who scored the most points per game this season?",
        "SELECT p.name, s.pts FROM players p JOIN player_stats s ON s.player_id = p.id ORDER BY s.pts DESC LIMIT 1",
    ),
    (
        "Show the top 5 rebounders.",
        "SELECT p.name, s.reb FROM players p JOIN player_stats s ON s.player_id = p.id ORDER BY s.reb DESC LIMIT 5",
    ),
    (
        "How many players scored over 1000 total points?",
        "SELECT COUNT(*) FROM player_stats WHERE pts_total > 1000",
    ),
    (
        "What is the average true shooting percentage of centers?",
        "SELECT AVG(s.ts_pct) FROM players p JOIN player_stats s ON s.player_id = p.id WHERE p.position = 'C'",
    ),
    (
        "Compare Nikola Jokic and Joel Embiid on points, rebounds and assists.",
        "SELECT p.name, s.pts, s.reb, s.ast FROM players p JOIN player_stats s ON s.player_id = p.id WHERE p.name IN ('Nikola Jokic', 'Joel Embiid')",
    ),
    (
        "Which guards average at least 25 points on better than 60 percent true shooting?",
        "SELECT p.name, s.pts, s.ts_pct FROM players p JOIN player_stats s ON s.player_id = p.id WHERE p.position IN ('PG', 'SG') AND s.pts >= 25 AND s.ts_pct > 0.6",
    ),
    (
        "What are LeBron James's assists and turnovers per game?",
        "SELECT p.name, s.ast, s.tov FROM players p JOIN player_stats s ON s.player_id = p.id WHERE p.name = 'LeBron James'",
    ),
    (
        "Which team has the best winning percentage in the West?",
        "SELECT name, win_pct FROM teams WHERE conference = 'West' ORDER BY win_pct DESC LIMIT 1",
    ),
];

/// Builds the prompt, calls the model at temperature 0, and validates the
/// candidate statement before anything executes.
pub struct SqlGenerator {
    client: Arc<dyn GenerationClient>,
}

impl SqlGenerator {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    /// Produce a validated candidate statement for the question.
    pub async fn generate(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
    ) -> Result<String, SqlFailure> {
        let prompt = build_prompt(question, catalog);

        let raw = self
            .client
            .generate(
                &prompt,
                GenerationParams {
                    // Deterministic output: the same question must produce
                    // the same statement.
                    temperature: 0.0,
                    max_tokens: SQL_MAX_TOKENS,
                },
            )
            .await
            .map_err(|e| match e {
                GenerationError::Unavailable(m) => {
                    SqlFailure::ExecutionError(format!("generator unavailable: {m}"))
                }
                GenerationError::InvalidResponse(m) => {
                    SqlFailure::SyntaxInvalid(format!("generator returned no statement: {m}"))
                }
            })?;

        let sql = strip_code_fences(&raw);
        validate(&sql, catalog)?;
        debug!(sql = %sql, "generated statement validated");
        Ok(sql)
    }
}

fn build_prompt(question: &str, catalog: &SchemaCatalog) -> String {
    let mut prompt = String::with_capacity(4096);
    prompt.push_str(
        "You translate NBA statistics questions into a single PostgreSQL SELECT statement.\n\
         Rules: output only the SQL, no commentary or code fences. Never write DDL or DML.\n\
         Use only the tables and columns below.\n\n",
    );
    prompt.push_str("Schema:\n");
    prompt.push_str(&catalog.describe());
    prompt.push_str("Examples:\n");
    for (example_question, example_sql) in FEW_SHOT_EXAMPLES {
        prompt.push_str(&format!("Q: {example_question}\nSQL: {example_sql}\n\n"));
    }
    prompt.push_str(&format!("Q: {question}\nSQL:"));
    prompt
}

/// Models like to wrap SQL in markdown fences despite instructions.
fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```sql")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let without_close = without_open.strip_suffix("```").unwrap_or(without_open);
    without_close.trim().to_string()
}

/// Stages 1 and 2 of the validation pipeline: syntactic sniff and schema
/// identifier resolution.
pub fn validate(sql: &str, catalog: &SchemaCatalog) -> Result<(), SqlFailure> {
    let lowered = sql.to_lowercase();
    let mut tokens = lowered.split_whitespace();
    match tokens.next() {
        Some("select") => {}
        Some(other) => {
            return Err(SqlFailure::SyntaxInvalid(format!(
                "statement begins with {other}, not SELECT"
            )))
        }
        None => return Err(SqlFailure::SyntaxInvalid("statement is empty".to_string())),
    }

    let mut depth: i32 = 0;
    for ch in sql.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(SqlFailure::SyntaxInvalid(
                        "unbalanced parentheses".to_string(),
                    ));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SqlFailure::SyntaxInvalid("unbalanced parentheses".to_string()));
    }

    if let Some(position) = sql.find(';') {
        if !sql[position + 1..].trim().is_empty() {
            return Err(SqlFailure::ForbiddenStatement(
                "multi-statement batches are not allowed".to_string(),
            ));
        }
    }

    // Keyword and identifier checks run with string literals removed so a
    // player named 'Drop' cannot trip them.
    let scrubbed = strip_string_literals(&lowered);

    if let Some(hit) = FORBIDDEN_RE.find(&scrubbed) {
        return Err(SqlFailure::ForbiddenStatement(format!(
            "statement contains forbidden keyword {}",
            hit.as_str().to_uppercase()
        )));
    }

    check_identifiers(&scrubbed, catalog)
}

/// Stage 2: every bare identifier must resolve case-insensitively against
/// the catalog, an alias the statement itself introduced, or SQL vocabulary.
fn check_identifiers(scrubbed_sql: &str, catalog: &SchemaCatalog) -> Result<(), SqlFailure> {
    let identifiers: Vec<&str> = IDENTIFIER
        .find_iter(scrubbed_sql)
        .map(|m| m.as_str())
        .collect();

    // First pass: collect aliases introduced by AS or by a bare token that
    // directly follows a known table name (FROM player_stats s).
    let mut aliases: HashSet<&str> = HashSet::new();
    for window in identifiers.windows(2) {
        let (previous, current) = (window[0], window[1]);
        if previous == "as" {
            aliases.insert(current);
        }
        if catalog.contains_identifier(previous) && !SQL_KEYWORDS.contains(current)
            && !catalog.contains_identifier(current)
        {
            aliases.insert(current);
        }
    }

    for identifier in &identifiers {
        if SQL_KEYWORDS.contains(identifier)
            || aliases.contains(identifier)
            || catalog.contains_identifier(identifier)
        {
            continue;
        }
        return Err(SqlFailure::UnknownIdentifier(identifier.to_string()));
    }

    Ok(())
}

fn strip_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                out.push(' ');
            }
            _ if in_literal => {}
            _ => out.push(ch),
        }
    }
    out
}

// ============================================================================
// Result formatting
// ============================================================================

/// Format an execution for prompt injection.
///
/// A single-row single-column result renders as `<AGG> Result: <value>`;
/// anything else renders as a numbered list bounded to 20 rows with a
/// trailing summary of omitted rows. The prompt assembler consumes this
/// verbatim.
pub fn format_result(execution: &SqlExecution) -> String {
    if execution.rows.is_empty() {
        return "No results found.".to_string();
    }

    if execution.rows.len() == 1 && execution.rows[0].len() == 1 {
        let (column, value) = &execution.rows[0][0];
        return format!("{} Result: {}", aggregate_label(column), render_value(value));
    }

    let mut out = String::new();
    for (index, row) in execution.rows.iter().take(PROMPT_ROW_LIMIT).enumerate() {
        out.push_str(&format!("{}. {}\n", index + 1, render_row(row)));
    }
    let omitted = execution.rows.len().saturating_sub(PROMPT_ROW_LIMIT);
    if omitted > 0 || execution.truncated {
        out.push_str(&format!("... and {} more rows omitted.\n", omitted.max(1)));
    }
    out
}

fn aggregate_label(column: &str) -> &'static str {
    let lowered = column.to_lowercase();
    if lowered.contains("count") {
        "COUNT"
    } else if lowered.contains("avg") || lowered.contains("average") || lowered.contains("mean") {
        "AVERAGE"
    } else if lowered.contains("sum") || lowered.contains("total") {
        "SUM"
    } else if lowered.contains("max") {
        "MAX"
    } else if lowered.contains("min") {
        "MIN"
    } else {
        "Result"
    }
}

fn render_row(row: &SqlRow) -> String {
    row.iter()
        .map(|(name, value)| format!("{}: {}", name, render_value(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
