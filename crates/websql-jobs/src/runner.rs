//! One triggered run of a job

use sea_orm::ConnectionTrait;
use tracing::debug;
use websql_api::Job;
use websql_common::{CaseMode, Value};
use websql_data::{Batch, ScriptBatchExecutor, StatementResult};
use websql_data::script::substitute;

/// Driving rows of the loop script: its first statement, header row dropped
fn driving_rows(results: Vec<Vec<StatementResult>>) -> Vec<Vec<Value>> {
    match results.into_iter().next().and_then(|row| row.into_iter().next()) {
        Some(StatementResult::Table(table)) => table.into_iter().skip(1).collect(),
        _ => Vec::new(),
    }
}

/// `$0, $1, ...` mapped to the stringified values of one driving row
fn positional_tokens(row: &[Value]) -> Vec<(String, String)> {
    row.iter()
        .enumerate()
        .map(|(i, value)| (format!("${}", i), value.to_string()))
        .collect()
}

/// Runs a job's scripts on `conn` and returns how many main-script batches ran.
///
/// Without a loop script the main script runs once. Otherwise the loop script
/// runs first and the main script runs once per row it returns, with that
/// row's values substituted into the text.
pub async fn execute_job<C: ConnectionTrait>(
    executor: &ScriptBatchExecutor,
    conn: &C,
    job: &Job,
) -> anyhow::Result<usize> {
    if job.loop_script_text.trim().is_empty() {
        executor.run(conn, &Batch::plain(&job.script_text)).await?;
        return Ok(1);
    }

    let loop_batch = Batch {
        array: true,
        case: CaseMode::Preserve,
        ..Batch::plain(&job.loop_script_text)
    };
    let rows = driving_rows(executor.run(conn, &loop_batch).await?);
    debug!(job = %job.name, rows = rows.len(), "Loop script produced driving rows");

    for row in &rows {
        let script = substitute(&job.script_text, &positional_tokens(row));
        executor.run(conn, &Batch::plain(&script)).await?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::collections::BTreeMap;

    fn job(script: &str, loop_script: &str) -> Job {
        Job {
            name: "sweep".to_string(),
            script_text: script.to_string(),
            loop_script_text: loop_script.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_positional_tokens() {
        let tokens = positional_tokens(&[Value::Int(7), Value::from("x"), Value::Null]);
        assert_eq!(
            tokens,
            vec![
                ("$0".to_string(), "7".to_string()),
                ("$1".to_string(), "x".to_string()),
                ("$2".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_driving_rows_skip_header() {
        let results = vec![vec![StatementResult::Table(vec![
            vec![Value::from("ID")],
            vec![Value::from("a")],
            vec![Value::from("b")],
        ])]];
        assert_eq!(driving_rows(results), vec![vec![Value::from("a")], vec![Value::from("b")]]);
        assert!(driving_rows(vec![vec![StatementResult::Affected(3)]]).is_empty());
    }

    #[tokio::test]
    async fn test_plain_job_runs_once() {
        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 4,
            }])
            .into_connection();

        let ran = execute_job(&ScriptBatchExecutor::new(), &db, &job("DELETE FROM t WHERE OLD = 1", ""))
            .await
            .unwrap();
        assert_eq!(ran, 1);
    }

    #[tokio::test]
    async fn test_loop_job_substitutes_each_row() {
        let loop_rows = vec![
            BTreeMap::from([("ID", sea_orm::Value::from("a1"))]),
            BTreeMap::from([("ID", sea_orm::Value::from("b2"))]),
        ];
        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_query_results([loop_rows])
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();

        let ran = execute_job(
            &ScriptBatchExecutor::new(),
            &db,
            &job("UPDATE t SET DONE = 1 WHERE ID = '$0'", "SELECT ID FROM t WHERE DONE = 0"),
        )
        .await
        .unwrap();
        assert_eq!(ran, 2);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("WHERE ID = 'a1'"));
        assert!(log.contains("WHERE ID = 'b2'"));
    }
}
