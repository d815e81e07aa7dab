//! Statistics Store
//!
//! Read-only SQL execution over the player/team statistics schema, plus the
//! schema introspection the SQL generator grounds itself on. Execution is
//! guarded twice: the generator validates statements before they get here,
//! and the store enforces the same read-only contract again so nothing that
//! reaches a connection can mutate state.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo};
use std::time::Duration;
use tracing::debug;

use crate::models::{SqlExecution, SqlFailure, SqlRow};

// ============================================================================
// Schema catalog
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ColumnSchema {
    pub name: &'static str,
    pub sql_type: &'static str,
    /// Human-readable description, seeded from the NBA glossary so the
    /// generator can map "TS%" to `ts_pct`.
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub columns: &'static [ColumnSchema],
}

const PLAYERS_COLUMNS: &[ColumnSchema] = &[
    ColumnSchema { name: "id", sql_type: "INTEGER", description: "player identifier" },
    ColumnSchema { name: "name", sql_type: "TEXT", description: "player full name" },
    ColumnSchema { name: "team_id", sql_type: "INTEGER", description: "current team (references teams.id)" },
    ColumnSchema { name: "position", sql_type: "TEXT", description: "listed position (PG, SG, SF, PF, C)" },
    ColumnSchema { name: "age", sql_type: "INTEGER", description: "age at season start" },
    ColumnSchema { name: "height_cm", sql_type: "INTEGER", description: "height in centimeters" },
    ColumnSchema { name: "weight_kg", sql_type: "INTEGER", description: "weight in kilograms" },
    ColumnSchema { name: "country", sql_type: "TEXT", description: "country of origin" },
    ColumnSchema { name: "draft_year", sql_type: "INTEGER", description: "year drafted, NULL if undrafted" },
    ColumnSchema { name: "experience", sql_type: "INTEGER", description: "seasons of NBA experience" },
];

const PLAYER_STATS_COLUMNS: &[ColumnSchema] = &[
    ColumnSchema { name: "player_id", sql_type: "INTEGER", description: "references players.id" },
    ColumnSchema { name: "season", sql_type: "TEXT", description: "season label, e.g. 2023-24" },
    ColumnSchema { name: "gp", sql_type: "INTEGER", description: "games played" },
    ColumnSchema { name: "gs", sql_type: "INTEGER", description: "games started" },
    ColumnSchema { name: "min_pg", sql_type: "REAL", description: "minutes per game" },
    ColumnSchema { name: "pts", sql_type: "REAL", description: "points per game" },
    ColumnSchema { name: "reb", sql_type: "REAL", description: "total rebounds per game" },
    ColumnSchema { name: "ast", sql_type: "REAL", description: "assists per game" },
    ColumnSchema { name: "stl", sql_type: "REAL", description: "steals per game" },
    ColumnSchema { name: "blk", sql_type: "REAL", description: "blocks per game" },
    ColumnSchema { name: "tov", sql_type: "REAL", description: "turnovers per game" },
    ColumnSchema { name: "pf", sql_type: "REAL", description: "personal fouls per game" },
    ColumnSchema { name: "fgm", sql_type: "REAL", description: "field goals made per game" },
    ColumnSchema { name: "fga", sql_type: "REAL", description: "field goals attempted per game" },
    ColumnSchema { name: "fg_pct", sql_type: "REAL", description: "FG% — field goal percentage, 0..1" },
    ColumnSchema { name: "fg3m", sql_type: "REAL", description: "three-pointers made per game" },
    ColumnSchema { name: "fg3a", sql_type: "REAL", description: "three-pointers attempted per game" },
    ColumnSchema { name: "fg3_pct", sql_type: "REAL", description: "3P% — three-point percentage, 0..1" },
    ColumnSchema { name: "ftm", sql_type: "REAL", description: "free throws made per game" },
    ColumnSchema { name: "fta", sql_type: "REAL", description: "free throws attempted per game" },
    ColumnSchema { name: "ft_pct", sql_type: "REAL", description: "FT% — free throw percentage, 0..1" },
    ColumnSchema { name: "oreb", sql_type: "REAL", description: "offensive rebounds per game" },
    ColumnSchema { name: "dreb", sql_type: "REAL", description: "defensive rebounds per game" },
    ColumnSchema { name: "ts_pct", sql_type: "REAL", description: "TS% — true shooting percentage, 0..1" },
    ColumnSchema { name: "efg_pct", sql_type: "REAL", description: "eFG% — effective field goal percentage, 0..1" },
    ColumnSchema { name: "usg_pct", sql_type: "REAL", description: "USG% — usage rate, 0..1" },
    ColumnSchema { name: "per", sql_type: "REAL", description: "PER — player efficiency rating" },
    ColumnSchema { name: "off_rtg", sql_type: "REAL", description: "offensive rating, points per 100 possessions" },
    ColumnSchema { name: "def_rtg", sql_type: "REAL", description: "defensive rating, points allowed per 100 possessions" },
    ColumnSchema { name: "net_rtg", sql_type: "REAL", description: "net rating (off_rtg - def_rtg)" },
    ColumnSchema { name: "ws", sql_type: "REAL", description: "win shares" },
    ColumnSchema { name: "ows", sql_type: "REAL", description: "offensive win shares" },
    ColumnSchema { name: "dws", sql_type: "REAL", description: "defensive win shares" },
    ColumnSchema { name: "ws_48", sql_type: "REAL", description: "win shares per 48 minutes" },
    ColumnSchema { name: "bpm", sql_type: "REAL", description: "BPM — box plus/minus" },
    ColumnSchema { name: "obpm", sql_type: "REAL", description: "offensive box plus/minus" },
    ColumnSchema { name: "dbpm", sql_type: "REAL", description: "defensive box plus/minus" },
    ColumnSchema { name: "vorp", sql_type: "REAL", description: "VORP — value over replacement player" },
    ColumnSchema { name: "plus_minus", sql_type: "REAL", description: "average plus/minus per game" },
    ColumnSchema { name: "dd2", sql_type: "INTEGER", description: "double-doubles" },
    ColumnSchema { name: "td3", sql_type: "INTEGER", description: "triple-doubles" },
    ColumnSchema { name: "pts_total", sql_type: "INTEGER", description: "total points scored over the season" },
    ColumnSchema { name: "reb_total", sql_type: "INTEGER", description: "total rebounds over the season" },
    ColumnSchema { name: "ast_total", sql_type: "INTEGER", description: "total assists over the season" },
    ColumnSchema { name: "min_total", sql_type: "INTEGER", description: "total minutes played over the season" },
];

const TEAMS_COLUMNS: &[ColumnSchema] = &[
    ColumnSchema { name: "id", sql_type: "INTEGER", description: "team identifier" },
    ColumnSchema { name: "name", sql_type: "TEXT", description: "franchise name" },
    ColumnSchema { name: "abbreviation", sql_type: "TEXT", description: "three-letter code, e.g. DEN" },
    ColumnSchema { name: "city", sql_type: "TEXT", description: "home city" },
    ColumnSchema { name: "conference", sql_type: "TEXT", description: "East or West" },
    ColumnSchema { name: "division", sql_type: "TEXT", description: "division name" },
    ColumnSchema { name: "wins", sql_type: "INTEGER", description: "season wins" },
    ColumnSchema { name: "losses", sql_type: "INTEGER", description: "season losses" },
    ColumnSchema { name: "win_pct", sql_type: "REAL", description: "winning percentage, 0..1" },
];

const NBA_TABLES: &[TableSchema] = &[
    TableSchema {
        name: "players",
        description: "one row per player",
        columns: PLAYERS_COLUMNS,
    },
    TableSchema {
        name: "player_stats",
        description: "one row per player per season; per-game averages unless the column says total",
        columns: PLAYER_STATS_COLUMNS,
    },
    TableSchema {
        name: "teams",
        description: "one row per franchise with current season record",
        columns: TEAMS_COLUMNS,
    },
];

/// The statistics schema as the SQL generator sees it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaCatalog;

impl SchemaCatalog {
    pub fn nba() -> Self {
        Self
    }

    pub fn tables(&self) -> &'static [TableSchema] {
        NBA_TABLES
    }

    /// Render the schema for prompt injection: table per block, one line per
    /// column with type and glossary description.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for table in self.tables() {
            out.push_str(&format!("Table {} -- {}\n", table.name, table.description));
            for column in table.columns {
                out.push_str(&format!(
                    "  {} {} -- {}\n",
                    column.name, column.sql_type, column.description
                ));
            }
            out.push('\n');
        }
        out
    }

    /// Case-insensitive membership test over table and column names.
    pub fn contains_identifier(&self, identifier: &str) -> bool {
        let lowered = identifier.to_lowercase();
        self.tables().iter().any(|t| {
            t.name == lowered || t.columns.iter().any(|c| c.name == lowered)
        })
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Capability for running validated statements against the statistics store.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<SqlExecution, SqlFailure>;

    fn schema(&self) -> &SchemaCatalog;
}

pub struct PgStatsStore {
    pool: PgPool,
    catalog: SchemaCatalog,
    timeout: Duration,
    row_cap: usize,
}

impl PgStatsStore {
    pub async fn connect(
        url: &str,
        pool_size: u32,
        timeout: Duration,
        row_cap: usize,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await?;
        Ok(Self::with_pool(pool, timeout, row_cap))
    }

    pub fn with_pool(pool: PgPool, timeout: Duration, row_cap: usize) -> Self {
        Self {
            pool,
            catalog: SchemaCatalog::nba(),
            timeout,
            row_cap,
        }
    }
}

#[async_trait]
impl SqlExecutor for PgStatsStore {
    async fn execute(&self, sql: &str) -> Result<SqlExecution, SqlFailure> {
        ensure_read_only(sql)?;

        let started = std::time::Instant::now();
        let fetched = tokio::time::timeout(self.timeout, sqlx::query(sql).fetch_all(&self.pool))
            .await
            .map_err(|_| {
                SqlFailure::ExecutionError(format!(
                    "statement exceeded the {}ms timeout",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| SqlFailure::ExecutionError(e.to_string()))?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let truncated = fetched.len() > self.row_cap;
        let rows: Vec<SqlRow> = fetched
            .iter()
            .take(self.row_cap)
            .map(row_to_pairs)
            .collect();

        debug!(
            rows = rows.len(),
            truncated, duration_ms, "statistics query executed"
        );

        Ok(SqlExecution {
            sql: sql.to_string(),
            rows,
            truncated,
            duration_ms,
        })
    }

    fn schema(&self) -> &SchemaCatalog {
        &self.catalog
    }
}

/// Enforce read-only semantics at the store boundary: the first significant
/// token must be SELECT and nothing may follow a semicolon.
pub fn ensure_read_only(sql: &str) -> Result<(), SqlFailure> {
    let stripped = strip_leading_comments(sql);
    let mut tokens = stripped.split_whitespace();
    match tokens.next() {
        Some(first) if first.eq_ignore_ascii_case("select") => {}
        Some(first) => {
            return Err(SqlFailure::ForbiddenStatement(format!(
                "statement begins with {first}, not SELECT"
            )))
        }
        None => {
            return Err(SqlFailure::SyntaxInvalid("statement is empty".to_string()));
        }
    }

    if let Some(position) = stripped.find(';') {
        let remainder = &stripped[position + 1..];
        if !remainder.trim().is_empty() {
            return Err(SqlFailure::ForbiddenStatement(
                "multi-statement batches are not allowed".to_string(),
            ));
        }
    }

    Ok(())
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    while let Some(after) = rest.strip_prefix("--") {
        rest = match after.find('\n') {
            Some(newline) => after[newline + 1..].trim_start(),
            None => "",
        };
    }
    rest
}

/// Decode one row into ordered field → value pairs. Column types outside
/// the catalog's INTEGER/REAL/TEXT vocabulary decode on a best-effort basis
/// and fall back to null.
fn row_to_pairs(row: &PgRow) -> SqlRow {
    row.columns()
        .iter()
        .map(|column| {
            let name = column.name().to_string();
            let ordinal = column.ordinal();
            let value = match column.type_info().name() {
                "INT2" => row
                    .try_get::<Option<i16>, _>(ordinal)
                    .ok()
                    .flatten()
                    .map(|v| serde_json::json!(v)),
                "INT4" => row
                    .try_get::<Option<i32>, _>(ordinal)
                    .ok()
                    .flatten()
                    .map(|v| serde_json::json!(v)),
                "INT8" => row
                    .try_get::<Option<i64>, _>(ordinal)
                    .ok()
                    .flatten()
                    .map(|v| serde_json::json!(v)),
                "FLOAT4" => row
                    .try_get::<Option<f32>, _>(ordinal)
                    .ok()
                    .flatten()
                    .map(|v| serde_json::json!(v)),
                "FLOAT8" => row
                    .try_get::<Option<f64>, _>(ordinal)
                    .ok()
                    .flatten()
                    .map(|v| serde_json::json!(v)),
                "BOOL" => row
                    .try_get::<Option<bool>, _>(ordinal)
                    .ok()
                    .flatten()
                    .map(|v| serde_json::json!(v)),
                _ => row
                    .try_get::<Option<String>, _>(ordinal)
                    .ok()
                    .flatten()
                    .map(serde_json::Value::String),
            };
            (name, value.unwrap_or(serde_json::Value::Null))
        })
        .collect()
}
