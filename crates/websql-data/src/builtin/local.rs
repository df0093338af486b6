//! In-database hooks: run a tenant query inside the triggering transaction

use async_trait::async_trait;
use websql_common::{CaseMode, ID_COLUMN, Row, Value, WebsqlError, table_name};

use crate::executor::{Batch, RowResults, ScriptBatchExecutor};
use crate::interceptor::{DataInterceptor, ExecCall, HookScope, ListQuery};

const BEFORE: &str = "before";
const AFTER: &str = "after";

/// Global hook at sequence 10
#[derive(Debug, Default)]
pub struct LocalInterceptorHook {
    executor: ScriptBatchExecutor,
}

fn id_rows<'a>(ids: impl IntoIterator<Item = &'a String>) -> Vec<Vec<Value>> {
    ids.into_iter().map(|id| vec![Value::Text(id.clone())]).collect()
}

fn row_ids(rows: &[Row]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|row| vec![row.get(ID_COLUMN).cloned().unwrap_or(Value::Null)])
        .collect()
}

impl LocalInterceptorHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every matching callback query with `rows` as its parameter rows
    async fn run(
        &self,
        scope: &HookScope<'_>,
        phase: &str,
        query_params: &[(String, String)],
        rows: &[Vec<Value>],
    ) -> anyhow::Result<()> {
        let app = scope.ctx.app()?;
        let target = table_name(scope.resource_id);
        let tokens = scope.ctx.context_tokens();

        let matching = app
            .local_interceptors
            .iter()
            .filter(|li| li.kind == phase && li.target == target && li.app_id == app.id);

        for li in matching {
            let query = app
                .query_by_name(&li.callback)
                .ok_or_else(|| WebsqlError::not_found(format!("Query not found: {}", li.callback)))?;
            let batch = Batch {
                script: &query.script_text,
                query_params,
                context_tokens: &tokens,
                params: rows,
                array: false,
                case: CaseMode::Preserve,
            };
            self.executor.run(scope.tx, &batch).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DataInterceptor for LocalInterceptorHook {
    async fn before_load(&self, scope: &mut HookScope<'_>, id: &str, _fields: &mut String) -> anyhow::Result<()> {
        self.run(scope, BEFORE, &[], &[vec![Value::from(id)]]).await
    }

    async fn after_load(&self, scope: &mut HookScope<'_>, id: &str, _row: &mut Row) -> anyhow::Result<()> {
        self.run(scope, AFTER, &[], &[vec![Value::from(id)]]).await
    }

    async fn before_create(&self, scope: &mut HookScope<'_>, rows: &mut Vec<Row>) -> anyhow::Result<()> {
        self.run(scope, BEFORE, &[], &row_ids(rows)).await
    }

    async fn after_create(
        &self,
        scope: &mut HookScope<'_>,
        _rows: &[Row],
        ids: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, &[], &id_rows(ids.iter())).await
    }

    async fn before_update(&self, scope: &mut HookScope<'_>, rows: &mut Vec<Row>) -> anyhow::Result<()> {
        self.run(scope, BEFORE, &[], &row_ids(rows)).await
    }

    async fn after_update(
        &self,
        scope: &mut HookScope<'_>,
        rows: &[Row],
        _affected: &mut Vec<u64>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, &[], &row_ids(rows)).await
    }

    async fn before_duplicate(&self, scope: &mut HookScope<'_>, ids: &mut Vec<String>) -> anyhow::Result<()> {
        self.run(scope, BEFORE, &[], &id_rows(ids.iter())).await
    }

    async fn after_duplicate(
        &self,
        scope: &mut HookScope<'_>,
        _ids: &[String],
        new_ids: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, &[], &id_rows(new_ids.iter())).await
    }

    async fn before_delete(&self, scope: &mut HookScope<'_>, ids: &mut Vec<String>) -> anyhow::Result<()> {
        self.run(scope, BEFORE, &[], &id_rows(ids.iter())).await
    }

    async fn after_delete(
        &self,
        scope: &mut HookScope<'_>,
        ids: &[String],
        _affected: &mut Vec<u64>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, &[], &id_rows(ids)).await
    }

    async fn before_list_map(&self, scope: &mut HookScope<'_>, _query: &mut ListQuery) -> anyhow::Result<()> {
        self.run(scope, BEFORE, &[], &[Vec::new()]).await
    }

    async fn after_list_map(
        &self,
        scope: &mut HookScope<'_>,
        _query: &ListQuery,
        _rows: &mut Vec<Row>,
        _total: &mut i64,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, &[], &[Vec::new()]).await
    }

    async fn before_list_array(&self, scope: &mut HookScope<'_>, _query: &mut ListQuery) -> anyhow::Result<()> {
        self.run(scope, BEFORE, &[], &[Vec::new()]).await
    }

    async fn after_list_array(
        &self,
        scope: &mut HookScope<'_>,
        _query: &ListQuery,
        _headers: &mut Vec<String>,
        _data: &mut Vec<Vec<Value>>,
        _total: &mut i64,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, &[], &[Vec::new()]).await
    }

    async fn before_exec(&self, scope: &mut HookScope<'_>, call: &mut ExecCall) -> anyhow::Result<()> {
        self.run(scope, BEFORE, &call.query_params, &call.params).await
    }

    async fn after_exec(
        &self,
        scope: &mut HookScope<'_>,
        call: &ExecCall,
        _results: &mut Vec<RowResults>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, &call.query_params, &call.params).await
    }
}
