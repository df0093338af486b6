//! Generic SQL data operator
//!
//! Every verb resolves the caller's tenant, opens one transaction, and runs
//! the hook chain around the SQL action inside it. Any error from a hook or
//! the database rolls the whole call back.

use std::sync::Arc;

use sea_orm::{ConnectionTrait, DatabaseTransaction, Statement, TransactionTrait};
use tracing::debug;
use websql_common::{
    CaseMode, ID_COLUMN, Row, Value, WebsqlError, is_identifier, new_id, quote_table_id, table_name,
};
use websql_persistence::{ConnectionRouter, TenantHandle};

use crate::executor::{Batch, RowResults, ScriptBatchExecutor, decode_row, decode_table, finish, to_db_value};
use crate::filter::{compile_filters, parse_group, parse_sort, validate_fields};
use crate::interceptor::{CallContext, ExecCall, HookScope, InterceptorRegistry, ListQuery, Verb};

/// Rows of a map-mode list plus the total matching count
pub type ListMapResult = (Vec<Row>, i64);

/// Headers, rows and total of an array-mode list
pub type ListArrayResult = (Vec<String>, Vec<Vec<Value>>, i64);

pub struct SqlDataOperator {
    registry: Arc<InterceptorRegistry>,
    router: Arc<ConnectionRouter>,
    executor: ScriptBatchExecutor,
}

impl SqlDataOperator {
    pub fn new(registry: Arc<InterceptorRegistry>, router: Arc<ConnectionRouter>) -> Self {
        Self {
            registry,
            router,
            executor: ScriptBatchExecutor::new(),
        }
    }

    async fn tenant(&self, ctx: &CallContext) -> anyhow::Result<TenantHandle> {
        let app = ctx.app()?;
        let node = ctx
            .snapshot
            .data_node(&app.data_node_id)
            .ok_or_else(|| WebsqlError::not_found("Invalid data node."))?;
        self.router.resolve(app, node).await
    }

    /// Fetches one row by id. An unknown id yields an empty row.
    pub async fn load(&self, table: &str, id: &str, fields: &str, ctx: &mut CallContext) -> anyhow::Result<Row> {
        let tenant = self.tenant(ctx).await?;
        let table_id = quote_table_id(&tenant.database, table);
        let chain = self.registry.chain(&table_name(table));
        let tx = tenant.conn.begin().await?;

        let result = async {
            let mut scope = HookScope {
                resource_id: table,
                verb: Verb::Load,
                tx: &tx,
                ctx,
            };
            let mut fields = fields.to_string();
            for hook in chain.before() {
                hook.before_load(&mut scope, id, &mut fields).await?;
            }

            let extra = scope
                .ctx
                .extra_filter
                .as_deref()
                .map(|f| format!(" {}", f))
                .unwrap_or_default();
            let sql = format!(
                "SELECT {} FROM {} WHERE ID=?{}",
                validate_fields(&fields)?,
                table_id,
                extra
            );
            let stmt = Statement::from_sql_and_values(tx.get_database_backend(), sql, [id.into()]);
            let mut row = tx
                .query_one(stmt)
                .await?
                .map(|r| decode_row(&r, scope.ctx.case))
                .unwrap_or_default();

            for hook in chain.after() {
                hook.after_load(&mut scope, id, &mut row).await?;
            }
            Ok::<_, anyhow::Error>(row)
        }
        .await;

        finish(tx, result).await
    }

    pub async fn list_map(&self, table: &str, query: ListQuery, ctx: &mut CallContext) -> anyhow::Result<ListMapResult> {
        let tenant = self.tenant(ctx).await?;
        let table_id = quote_table_id(&tenant.database, table);
        let chain = self.registry.chain(&table_name(table));
        let tx = tenant.conn.begin().await?;

        let result = async {
            let mut scope = HookScope {
                resource_id: table,
                verb: Verb::ListMap,
                tx: &tx,
                ctx,
            };
            let mut query = query;
            for hook in chain.before() {
                hook.before_list_map(&mut scope, &mut query).await?;
            }

            let (results, mut total) = select_page(&tx, &table_id, &query).await?;
            let mut rows: Vec<Row> = results.iter().map(|r| decode_row(r, scope.ctx.case)).collect();

            for hook in chain.after() {
                hook.after_list_map(&mut scope, &query, &mut rows, &mut total).await?;
            }
            Ok::<_, anyhow::Error>((rows, total))
        }
        .await;

        finish(tx, result).await
    }

    pub async fn list_array(
        &self,
        table: &str,
        query: ListQuery,
        ctx: &mut CallContext,
    ) -> anyhow::Result<ListArrayResult> {
        let tenant = self.tenant(ctx).await?;
        let table_id = quote_table_id(&tenant.database, table);
        let chain = self.registry.chain(&table_name(table));
        let tx = tenant.conn.begin().await?;

        let result = async {
            let mut scope = HookScope {
                resource_id: table,
                verb: Verb::ListArray,
                tx: &tx,
                ctx,
            };
            let mut query = query;
            for hook in chain.before() {
                hook.before_list_array(&mut scope, &mut query).await?;
            }

            let (results, mut total) = select_page(&tx, &table_id, &query).await?;
            let mut table_rows = decode_table(&results, scope.ctx.case);
            let mut headers: Vec<String> = if table_rows.is_empty() {
                Vec::new()
            } else {
                table_rows.remove(0).iter().map(Value::to_string).collect()
            };
            let mut data = table_rows;

            for hook in chain.after() {
                hook.after_list_array(&mut scope, &query, &mut headers, &mut data, &mut total)
                    .await?;
            }
            Ok::<_, anyhow::Error>((headers, data, total))
        }
        .await;

        finish(tx, result).await
    }

    /// Inserts rows, assigning an id to any row without one. Returns the ids
    /// in input order.
    pub async fn create(&self, table: &str, rows: Vec<Row>, ctx: &mut CallContext) -> anyhow::Result<Vec<String>> {
        let tenant = self.tenant(ctx).await?;
        let table_id = quote_table_id(&tenant.database, table);
        let chain = self.registry.chain(&table_name(table));
        let tx = tenant.conn.begin().await?;

        let result = async {
            let mut scope = HookScope {
                resource_id: table,
                verb: Verb::Create,
                tx: &tx,
                ctx,
            };
            let mut rows = rows;
            for hook in chain.before() {
                hook.before_create(&mut scope, &mut rows).await?;
            }

            let mut ids = Vec::with_capacity(rows.len());
            for row in rows.iter_mut() {
                let id = match row.get(ID_COLUMN) {
                    Some(v) if !v.is_blank() => v.to_string(),
                    _ => {
                        let id = new_id();
                        row.insert(ID_COLUMN.to_string(), Value::Text(id.clone()));
                        id
                    }
                };
                insert_row(&tx, &table_id, row).await?;
                ids.push(id);
            }

            for hook in chain.after() {
                hook.after_create(&mut scope, &rows, &mut ids).await?;
            }
            Ok::<_, anyhow::Error>(ids)
        }
        .await;

        finish(tx, result).await
    }

    /// Updates rows by their `ID`. Only supplied columns change.
    pub async fn update(&self, table: &str, rows: Vec<Row>, ctx: &mut CallContext) -> anyhow::Result<Vec<u64>> {
        let tenant = self.tenant(ctx).await?;
        let table_id = quote_table_id(&tenant.database, table);
        let chain = self.registry.chain(&table_name(table));
        let tx = tenant.conn.begin().await?;

        let result = async {
            let mut scope = HookScope {
                resource_id: table,
                verb: Verb::Update,
                tx: &tx,
                ctx,
            };
            let mut rows = rows;
            for hook in chain.before() {
                hook.before_update(&mut scope, &mut rows).await?;
            }

            let mut affected = Vec::with_capacity(rows.len());
            for row in &rows {
                let id = row
                    .get(ID_COLUMN)
                    .filter(|v| !v.is_blank())
                    .map(Value::to_string)
                    .ok_or_else(|| WebsqlError::validation("ID is not found."))?;

                if scope.ctx.load {
                    let old = select_by_id(&tx, &table_id, &id)
                        .await?
                        .ok_or_else(|| WebsqlError::not_found(format!("{} not found.", id)))?;
                    scope.ctx.old_data.push(old);
                }

                affected.push(update_row(&tx, &table_id, &id, row).await?);
            }

            for hook in chain.after() {
                hook.after_update(&mut scope, &rows, &mut affected).await?;
            }
            Ok::<_, anyhow::Error>(affected)
        }
        .await;

        finish(tx, result).await
    }

    /// Copies rows under fresh ids
    pub async fn duplicate(&self, table: &str, ids: Vec<String>, ctx: &mut CallContext) -> anyhow::Result<Vec<String>> {
        let tenant = self.tenant(ctx).await?;
        let table_id = quote_table_id(&tenant.database, table);
        let chain = self.registry.chain(&table_name(table));
        let tx = tenant.conn.begin().await?;

        let result = async {
            let mut scope = HookScope {
                resource_id: table,
                verb: Verb::Duplicate,
                tx: &tx,
                ctx,
            };
            let mut ids = ids;
            for hook in chain.before() {
                hook.before_duplicate(&mut scope, &mut ids).await?;
            }

            let mut new_ids = Vec::with_capacity(ids.len());
            for id in &ids {
                let mut row = select_by_id(&tx, &table_id, id)
                    .await?
                    .ok_or_else(|| WebsqlError::not_found(format!("{} not found.", id)))?;
                let new = new_id();
                row.insert(ID_COLUMN.to_string(), Value::Text(new.clone()));
                insert_row(&tx, &table_id, &row).await?;
                new_ids.push(new);
            }

            for hook in chain.after() {
                hook.after_duplicate(&mut scope, &ids, &mut new_ids).await?;
            }
            Ok::<_, anyhow::Error>(new_ids)
        }
        .await;

        finish(tx, result).await
    }

    pub async fn delete(&self, table: &str, ids: Vec<String>, ctx: &mut CallContext) -> anyhow::Result<Vec<u64>> {
        let tenant = self.tenant(ctx).await?;
        let table_id = quote_table_id(&tenant.database, table);
        let chain = self.registry.chain(&table_name(table));
        let tx = tenant.conn.begin().await?;

        let result = async {
            let mut scope = HookScope {
                resource_id: table,
                verb: Verb::Delete,
                tx: &tx,
                ctx,
            };
            let mut ids = ids;
            for hook in chain.before() {
                hook.before_delete(&mut scope, &mut ids).await?;
            }

            let backend = tx.get_database_backend();
            let mut affected = Vec::with_capacity(ids.len());
            for id in &ids {
                if scope.ctx.load {
                    if let Some(old) = select_by_id(&tx, &table_id, id).await? {
                        scope.ctx.old_data.push(old);
                    }
                }
                let stmt = Statement::from_sql_and_values(
                    backend,
                    format!("DELETE FROM {} WHERE ID=?", table_id),
                    [id.as_str().into()],
                );
                affected.push(tx.execute(stmt).await?.rows_affected());
            }

            for hook in chain.after() {
                hook.after_delete(&mut scope, &ids, &mut affected).await?;
            }
            Ok::<_, anyhow::Error>(affected)
        }
        .await;

        finish(tx, result).await
    }

    /// Runs the tenant's named query with the given parameter rows
    pub async fn exec(
        &self,
        query_name: &str,
        params: Vec<Vec<Value>>,
        query_params: Vec<(String, String)>,
        array: bool,
        ctx: &mut CallContext,
    ) -> anyhow::Result<Vec<RowResults>> {
        let query = ctx
            .app()?
            .query_by_name(query_name)
            .ok_or_else(|| WebsqlError::not_found(format!("Query not found: {}", query_name)))?;
        let call = ExecCall {
            query_name: query_name.to_string(),
            script: query.script_text.clone(),
            params,
            query_params,
            array,
            public: query.is_public(),
        };

        let tenant = self.tenant(ctx).await?;
        let chain = self.registry.chain(query_name);
        let tx = tenant.conn.begin().await?;

        let result = async {
            let mut scope = HookScope {
                resource_id: query_name,
                verb: Verb::Exec,
                tx: &tx,
                ctx,
            };
            let mut call = call;
            for hook in chain.before() {
                hook.before_exec(&mut scope, &mut call).await?;
            }

            let tokens = scope.ctx.context_tokens();
            let batch = Batch {
                script: &call.script,
                query_params: &call.query_params,
                context_tokens: &tokens,
                params: &call.params,
                array: call.array,
                case: scope.ctx.case,
            };
            let mut results = self.executor.run(&tx, &batch).await?;

            for hook in chain.after() {
                hook.after_exec(&mut scope, &call, &mut results).await?;
            }
            Ok::<_, anyhow::Error>(results)
        }
        .await;

        finish(tx, result).await
    }
}

fn quote_columns<'a>(row: &'a Row, skip_id: bool) -> anyhow::Result<Vec<(&'a String, &'a Value)>> {
    let mut columns = Vec::with_capacity(row.len());
    for (column, value) in row {
        if skip_id && column == ID_COLUMN {
            continue;
        }
        if !is_identifier(column) || column.contains('.') {
            return Err(WebsqlError::validation(format!("Invalid column: {}", column)).into());
        }
        columns.push((column, value));
    }
    Ok(columns)
}

async fn insert_row(tx: &DatabaseTransaction, table_id: &str, row: &Row) -> anyhow::Result<()> {
    let columns = quote_columns(row, false)?;
    let names: Vec<String> = columns.iter().map(|(c, _)| format!("`{}`", c)).collect();
    let marks = vec!["?"; columns.len()].join(",");
    let sql = format!("INSERT INTO {} ({}) VALUES ({})", table_id, names.join(","), marks);
    debug!(sql = %sql, "Inserting row");

    let values = columns.iter().map(|(_, v)| to_db_value(v));
    let stmt = Statement::from_sql_and_values(tx.get_database_backend(), sql, values);
    tx.execute(stmt).await?;
    Ok(())
}

async fn update_row(tx: &DatabaseTransaction, table_id: &str, id: &str, row: &Row) -> anyhow::Result<u64> {
    let columns = quote_columns(row, true)?;
    if columns.is_empty() {
        return Ok(0);
    }
    let sets: Vec<String> = columns.iter().map(|(c, _)| format!("`{}`=?", c)).collect();
    let sql = format!("UPDATE {} SET {} WHERE ID=?", table_id, sets.join(","));

    let mut values: Vec<sea_orm::Value> = columns.iter().map(|(_, v)| to_db_value(v)).collect();
    values.push(id.into());
    let stmt = Statement::from_sql_and_values(tx.get_database_backend(), sql, values);
    Ok(tx.execute(stmt).await?.rows_affected())
}

/// Full row by id with upper-cased keys
async fn select_by_id(tx: &DatabaseTransaction, table_id: &str, id: &str) -> anyhow::Result<Option<Row>> {
    let stmt = Statement::from_sql_and_values(
        tx.get_database_backend(),
        format!("SELECT * FROM {} WHERE ID=?", table_id),
        [id.into()],
    );
    Ok(tx.query_one(stmt).await?.map(|r| decode_row(&r, CaseMode::Upper)))
}

/// One page of rows plus the total the page was cut from
async fn select_page(
    tx: &DatabaseTransaction,
    table_id: &str,
    query: &ListQuery,
) -> anyhow::Result<(Vec<sea_orm::QueryResult>, i64)> {
    let sql = format!(
        "SELECT SQL_CALC_FOUND_ROWS {} FROM {}{}{}{} LIMIT ?,?",
        validate_fields(&query.fields)?,
        table_id,
        compile_filters(&query.filters)?,
        parse_group(&query.group)?,
        parse_sort(&query.sort)?
    );
    debug!(sql = %sql, "Listing rows");

    let backend = tx.get_database_backend();
    let stmt = Statement::from_sql_and_values(backend, sql, [query.start.into(), query.limit.into()]);
    let rows = tx.query_all(stmt).await?;

    let total = tx
        .query_one(Statement::from_string(backend, "SELECT FOUND_ROWS() AS total"))
        .await?
        .map(|r| decode_row(&r, CaseMode::Lower))
        .and_then(|row| row.get("total").cloned())
        .map(|v| match v {
            Value::Int(n) => n,
            other => other.to_string().parse().unwrap_or(0),
        })
        .unwrap_or(0);

    Ok((rows, total))
}
