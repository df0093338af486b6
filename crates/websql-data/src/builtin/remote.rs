//! Webhook hooks
//!
//! A matching remote interceptor receives `{target, action, data}`. A 200
//! response body is parsed as an exec request and drives the interceptor's
//! callback query inside the triggering transaction. Any other status
//! rejects the call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value as Json, json};
use tracing::debug;
use websql_api::rest::ExecRequest;
use websql_common::{CaseMode, Row, Value, WebsqlError, table_name};

use crate::executor::{Batch, RowResults, ScriptBatchExecutor};
use crate::interceptor::{DataInterceptor, ExecCall, HookScope, ListQuery};

const BEFORE: &str = "before";
const AFTER: &str = "after";

/// Responses larger than this are rejected
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Global hook at sequence 20
pub struct RemoteInterceptorHook {
    client: Client,
    executor: ScriptBatchExecutor,
    max_response_bytes: usize,
}

fn rows_json(rows: &[Row]) -> Json {
    Json::Array(
        rows.iter()
            .map(|row| Json::Object(row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()))
            .collect(),
    )
}

fn remote_error(e: impl std::fmt::Display) -> anyhow::Error {
    WebsqlError::Remote(e.to_string()).into()
}

impl RemoteInterceptorHook {
    /// A zero `timeout` leaves webhook calls unbounded
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        // Webhook endpoints commonly use self-signed certificates.
        let mut builder = Client::builder().danger_accept_invalid_certs(true);
        if !timeout.is_zero() {
            builder = builder.connect_timeout(timeout).timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            executor: ScriptBatchExecutor::new(),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        })
    }

    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    /// Sends the payload and returns the accepted response body
    async fn call(&self, method: &str, url: &str, payload: &Json) -> anyhow::Result<Json> {
        let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|_| WebsqlError::validation(format!("Invalid method: {}", method)))?;

        let response = self
            .client
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await
            .map_err(remote_error)?;

        if response.status() != StatusCode::OK {
            debug!(url = %url, status = %response.status(), "Webhook rejected call");
            return Err(WebsqlError::auth("Client rejected.").into());
        }

        let body = self.read_limited(url, response).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Json::Null);
        }
        serde_json::from_slice(&body).map_err(remote_error)
    }

    /// Reads the body chunk by chunk and gives up once it passes the limit
    async fn read_limited(&self, url: &str, mut response: reqwest::Response) -> anyhow::Result<Vec<u8>> {
        let too_large = || remote_error(format!("Response from {} exceeds {} bytes", url, self.max_response_bytes));
        if response
            .content_length()
            .is_some_and(|len| len > self.max_response_bytes as u64)
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(remote_error)? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn run(&self, scope: &HookScope<'_>, phase: &str, data: Json) -> anyhow::Result<()> {
        let app = scope.ctx.app()?;
        let target = table_name(scope.resource_id);
        let action = scope.verb.action();
        let tokens = scope.ctx.context_tokens();

        let matching = app.remote_interceptors.iter().filter(|ri| {
            ri.kind == phase && ri.action_type == action && ri.target == target && ri.app_id == app.id
        });

        for ri in matching {
            let payload = json!({
                "target": target,
                "action": format!("{}_{}", phase, action),
                "data": data,
            });
            let body = self.call(&ri.method, &ri.url, &payload).await?;
            let request = ExecRequest::parse(&body)?;

            let query = app
                .query_by_name(&ri.callback)
                .ok_or_else(|| WebsqlError::not_found(format!("Query not found: {}", ri.callback)))?;
            let batch = Batch {
                script: &query.script_text,
                query_params: &request.query_params,
                context_tokens: &tokens,
                params: &request.params,
                array: false,
                case: CaseMode::Preserve,
            };
            self.executor.run(scope.tx, &batch).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DataInterceptor for RemoteInterceptorHook {
    async fn before_load(&self, scope: &mut HookScope<'_>, id: &str, _fields: &mut String) -> anyhow::Result<()> {
        self.run(scope, BEFORE, json!({ "id": id })).await
    }

    async fn after_load(&self, scope: &mut HookScope<'_>, _id: &str, row: &mut Row) -> anyhow::Result<()> {
        self.run(scope, AFTER, rows_json(std::slice::from_ref(row))).await
    }

    async fn before_create(&self, scope: &mut HookScope<'_>, rows: &mut Vec<Row>) -> anyhow::Result<()> {
        self.run(scope, BEFORE, rows_json(rows)).await
    }

    async fn after_create(
        &self,
        scope: &mut HookScope<'_>,
        _rows: &[Row],
        ids: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, json!(ids)).await
    }

    async fn before_update(&self, scope: &mut HookScope<'_>, rows: &mut Vec<Row>) -> anyhow::Result<()> {
        self.run(scope, BEFORE, rows_json(rows)).await
    }

    async fn after_update(
        &self,
        scope: &mut HookScope<'_>,
        _rows: &[Row],
        affected: &mut Vec<u64>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, json!(affected)).await
    }

    async fn before_duplicate(&self, scope: &mut HookScope<'_>, ids: &mut Vec<String>) -> anyhow::Result<()> {
        self.run(scope, BEFORE, json!(ids)).await
    }

    async fn after_duplicate(
        &self,
        scope: &mut HookScope<'_>,
        _ids: &[String],
        new_ids: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, json!(new_ids)).await
    }

    async fn before_delete(&self, scope: &mut HookScope<'_>, ids: &mut Vec<String>) -> anyhow::Result<()> {
        self.run(scope, BEFORE, json!(ids)).await
    }

    async fn after_delete(
        &self,
        scope: &mut HookScope<'_>,
        _ids: &[String],
        affected: &mut Vec<u64>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, json!(affected)).await
    }

    async fn before_list_map(&self, scope: &mut HookScope<'_>, query: &mut ListQuery) -> anyhow::Result<()> {
        self.run(scope, BEFORE, list_json(query)).await
    }

    async fn after_list_map(
        &self,
        scope: &mut HookScope<'_>,
        _query: &ListQuery,
        rows: &mut Vec<Row>,
        total: &mut i64,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, json!({ "data": rows_json(rows), "total": *total }))
            .await
    }

    async fn before_list_array(&self, scope: &mut HookScope<'_>, query: &mut ListQuery) -> anyhow::Result<()> {
        self.run(scope, BEFORE, list_json(query)).await
    }

    async fn after_list_array(
        &self,
        scope: &mut HookScope<'_>,
        _query: &ListQuery,
        headers: &mut Vec<String>,
        data: &mut Vec<Vec<Value>>,
        total: &mut i64,
    ) -> anyhow::Result<()> {
        let payload = json!({ "headers": headers, "data": data, "total": *total });
        self.run(scope, AFTER, payload).await
    }

    async fn before_exec(&self, scope: &mut HookScope<'_>, call: &mut ExecCall) -> anyhow::Result<()> {
        self.run(scope, BEFORE, json!({ "params": call.params })).await
    }

    async fn after_exec(
        &self,
        scope: &mut HookScope<'_>,
        _call: &ExecCall,
        results: &mut Vec<RowResults>,
    ) -> anyhow::Result<()> {
        self.run(scope, AFTER, serde_json::to_value(&*results)?).await
    }
}

fn list_json(query: &ListQuery) -> Json {
    json!({
        "fields": query.fields,
        "filters": query.filters,
        "sort": query.sort,
        "group": query.group,
        "start": query.start,
        "limit": query.limit,
    })
}
