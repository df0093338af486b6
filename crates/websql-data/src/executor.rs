//! Transactional script batch execution
//!
//! A script is split into statements once. Every parameter row then runs all
//! statements in order, consuming its values left to right. The whole batch
//! shares one transaction; the first failure aborts it.

use sea_orm::prelude::Decimal;
use sea_orm::{ConnectionTrait, DatabaseTransaction, QueryResult, Statement};
use serde::Serialize;
use tracing::{debug, warn};
use websql_common::{CaseMode, Row, Value, WebsqlError};

use crate::script::{count_placeholders, is_query, normalize_statement, split_statements, substitute};

/// Result of one statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatementResult {
    /// Query result in map mode
    Rows(Vec<Row>),
    /// Query result in array mode, header row first
    Table(Vec<Vec<Value>>),
    /// Affected row count of an exec statement
    Affected(u64),
    /// Replacement value written by a hook
    Scalar(Value),
}

/// Results of one parameter row, one entry per statement
pub type RowResults = Vec<StatementResult>;

/// Everything needed to run a script
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub script: &'a str,
    /// Caller supplied tokens, substituted first
    pub query_params: &'a [(String, String)],
    /// Context tokens such as `__ip__`, substituted second
    pub context_tokens: &'a [(String, String)],
    pub params: &'a [Vec<Value>],
    pub array: bool,
    pub case: CaseMode,
}

impl<'a> Batch<'a> {
    /// A batch with no substitutions and a single empty parameter row
    pub fn plain(script: &'a str) -> Self {
        const EMPTY_ROW: &[Vec<Value>] = &[Vec::new()];
        Batch {
            script,
            query_params: &[],
            context_tokens: &[],
            params: EMPTY_ROW,
            array: false,
            case: CaseMode::Preserve,
        }
    }
}

#[derive(Debug)]
struct PreparedStatement {
    sql: String,
    placeholders: usize,
    query: bool,
}

/// Parses a script into executable statements after token substitution
fn prepare(batch: &Batch<'_>) -> Vec<PreparedStatement> {
    let script = substitute(batch.script, batch.query_params);
    let script = substitute(&script, batch.context_tokens);

    split_statements(&script)
        .iter()
        .map(|s| normalize_statement(s))
        .filter(|s| !s.is_empty())
        .map(|sql| PreparedStatement {
            placeholders: count_placeholders(&sql),
            query: is_query(&sql),
            sql,
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptBatchExecutor;

impl ScriptBatchExecutor {
    pub fn new() -> Self {
        ScriptBatchExecutor
    }

    /// Runs a batch on `conn`, which is normally an open transaction
    pub async fn run<C: ConnectionTrait>(
        &self,
        conn: &C,
        batch: &Batch<'_>,
    ) -> anyhow::Result<Vec<RowResults>> {
        let statements = prepare(batch);
        let needed: usize = statements.iter().map(|s| s.placeholders).sum();

        if let Some(row) = batch.params.iter().find(|row| row.len() < needed) {
            return Err(WebsqlError::script(format!(
                "Incorrect param count. Expected: {} actual: {}",
                needed,
                row.len()
            ))
            .into());
        }

        let backend = conn.get_database_backend();
        let mut results = Vec::with_capacity(batch.params.len());

        for row in batch.params {
            let mut offset = 0;
            let mut row_results = Vec::with_capacity(statements.len());

            for statement in &statements {
                let values = row[offset..offset + statement.placeholders]
                    .iter()
                    .map(to_db_value);
                offset += statement.placeholders;

                let stmt = Statement::from_sql_and_values(backend, statement.sql.as_str(), values);
                debug!(sql = %statement.sql, "Executing statement");

                if statement.query {
                    let rows = conn.query_all(stmt).await?;
                    row_results.push(if batch.array {
                        StatementResult::Table(decode_table(&rows, batch.case))
                    } else {
                        StatementResult::Rows(rows.iter().map(|r| decode_row(r, batch.case)).collect())
                    });
                } else {
                    let outcome = conn.execute(stmt).await?;
                    row_results.push(StatementResult::Affected(outcome.rows_affected()));
                }
            }
            results.push(row_results);
        }

        Ok(results)
    }
}

/// Commits on success, rolls back on failure, and passes the result through
pub async fn finish<T>(tx: DatabaseTransaction, result: anyhow::Result<T>) -> anyhow::Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

pub fn to_db_value(value: &Value) -> sea_orm::Value {
    match value {
        Value::Null => sea_orm::Value::String(None),
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Float(f) => (*f).into(),
        Value::Text(s) => s.clone().into(),
        Value::Timestamp(t) => (*t).into(),
    }
}

/// Decodes a column by trying driver types from most to least specific.
/// A SQL NULL fails every attempt and decodes as `Value::Null`.
fn decode_value(result: &QueryResult, column: &str) -> Value {
    if let Ok(v) = result.try_get_by::<i64, _>(column) {
        return Value::Int(v);
    }
    if let Ok(v) = result.try_get_by::<u64, _>(column) {
        return i64::try_from(v)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(v.to_string()));
    }
    if let Ok(v) = result.try_get_by::<f64, _>(column) {
        return Value::Float(v);
    }
    if let Ok(v) = result.try_get_by::<Decimal, _>(column) {
        return Value::Text(v.to_string());
    }
    if let Ok(v) = result.try_get_by::<chrono::NaiveDateTime, _>(column) {
        return Value::Timestamp(v);
    }
    if let Ok(v) = result.try_get_by::<chrono::NaiveDate, _>(column) {
        return Value::Text(v.to_string());
    }
    if let Ok(v) = result.try_get_by::<chrono::NaiveTime, _>(column) {
        return Value::Text(v.to_string());
    }
    if let Ok(v) = result.try_get_by::<bool, _>(column) {
        return Value::Bool(v);
    }
    if let Ok(v) = result.try_get_by::<String, _>(column) {
        return Value::Text(v);
    }
    if let Ok(v) = result.try_get_by::<Vec<u8>, _>(column) {
        return Value::Text(String::from_utf8_lossy(&v).into_owned());
    }
    Value::Null
}

/// Decodes a result row into a map keyed by cased column names
pub fn decode_row(result: &QueryResult, case: CaseMode) -> Row {
    result
        .column_names()
        .into_iter()
        .map(|column| {
            let value = decode_value(result, &column);
            (case.apply(&column), value)
        })
        .collect()
}

/// Decodes rows into a header row followed by value rows
pub fn decode_table(results: &[QueryResult], case: CaseMode) -> Vec<Vec<Value>> {
    let Some(first) = results.first() else {
        return Vec::new();
    };
    let columns = first.column_names();
    let mut table = Vec::with_capacity(results.len() + 1);
    table.push(columns.iter().map(|c| Value::Text(case.apply(c))).collect());
    for result in results {
        table.push(columns.iter().map(|c| decode_value(result, c)).collect());
    }
    table
}
