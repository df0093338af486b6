//! `/api/{table}[/{id}]` resource surface

use actix_web::{HttpRequest, HttpResponse, web};
use metrics::counter;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;
use websql_api::rest::{
    DataResponse, ExecRequest, ListArrayResponse, ListResponse, parse_bool_param, parse_ids, parse_rows,
};
use websql_common::{CaseMode, ID_COLUMN, ID_LEN, Value, WebsqlError};
use websql_data::{CallContext, ListQuery};

use crate::error::AppError;
use crate::model::AppState;

pub const API_TOKEN_HEADER: &str = "api-token";
pub const USER_TOKEN_HEADER: &str = "user-token";

const DEFAULT_LIMIT: u64 = 25;

/// Query string pairs in request order; `filter` may repeat
struct Params(Vec<(String, String)>);

impl Params {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn all(&self, key: &str) -> Vec<String> {
        self.0.iter().filter(|(k, _)| k == key).map(|(_, v)| v.clone()).collect()
    }

    fn fields(&self) -> String {
        match self.get("fields").map(str::trim) {
            Some(f) if !f.is_empty() => f.to_uppercase(),
            _ => "*".to_string(),
        }
    }

    fn case(&self) -> CaseMode {
        CaseMode::parse(self.get("case").unwrap_or_default())
    }

    fn list_query(&self) -> ListQuery {
        ListQuery {
            fields: self.fields(),
            filters: self.all("filter"),
            sort: self.all("sort"),
            group: self.all("group"),
            start: self.get("start").and_then(|s| s.trim().parse().ok()).unwrap_or(0),
            limit: self
                .get("limit")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_LIMIT),
        }
    }
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// The tenant id carried by the leading characters of the api token
pub fn app_id_from_token(api_token: &str) -> Option<&str> {
    api_token.get(..ID_LEN).filter(|id| !id.trim().is_empty())
}

fn call_context(req: &HttpRequest, state: &AppState) -> Result<CallContext, AppError> {
    let api_token = header(req, API_TOKEN_HEADER).unwrap_or_default();
    let app_id = app_id_from_token(&api_token)
        .ok_or_else(|| WebsqlError::auth("Invalid app."))?
        .to_string();

    let mut ctx = CallContext::new(app_id, api_token, state.store.snapshot());
    ctx.user_token = header(req, USER_TOKEN_HEADER).filter(|t| !t.is_empty());
    ctx.client_ip = req.peer_addr().map(|addr| addr.ip().to_string());
    Ok(ctx)
}

/// One value when a single item was addressed, otherwise the list
fn one_or_many<T: Serialize>(mut items: Vec<T>, single: bool) -> Result<Json, AppError> {
    let data = if single && items.len() == 1 {
        serde_json::to_value(items.remove(0))
    } else {
        serde_json::to_value(items)
    };
    data.map_err(|e| AppError::from(anyhow::Error::from(e)))
}

fn parse_body(body: &web::Bytes) -> Result<Json, AppError> {
    serde_json::from_slice(body).map_err(|e| WebsqlError::validation(e.to_string()).into())
}

/// Ids from the path, or else from a JSON array body
fn target_ids(id: Option<&str>, body: &web::Bytes) -> Result<(Vec<String>, bool), AppError> {
    match id {
        Some(id) => Ok((vec![id.to_string()], true)),
        None => Ok((parse_ids(&parse_body(body)?)?, true)),
    }
}

fn data(payload: Json) -> HttpResponse {
    HttpResponse::Ok().json(DataResponse { data: payload })
}

/// Dispatches every verb of the resource surface, including `COPY`
pub async fn dispatch(
    req: HttpRequest,
    query: web::Query<Vec<(String, String)>>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let table = req.match_info().get("table").unwrap_or_default().to_string();
    let id = req.match_info().get("id").filter(|id| !id.is_empty()).map(str::to_string);
    let params = Params(query.into_inner());
    let method = req.method().as_str().to_string();
    if method == "OPTIONS" {
        return Ok(HttpResponse::Ok().finish());
    }

    let mut ctx = call_context(&req, &state)?;
    let kind = if method == "GET" { "read" } else { "write" };
    counter!("websql_requests_total", "app_id" => ctx.app_id.clone(), "kind" => kind).increment(1);
    debug!(method = %method, table = %table, app_id = %ctx.app_id, "REST request");

    let operator = &state.operator;
    match method.as_str() {
        "GET" => {
            ctx.case = params.case();
            match id {
                Some(id) => {
                    let row = operator.load(&table, &id, &params.fields(), &mut ctx).await?;
                    Ok(HttpResponse::Ok().json(DataResponse { data: row }))
                }
                None if parse_bool_param(params.get("array"), false) => {
                    let (headers, data, total) = operator.list_array(&table, params.list_query(), &mut ctx).await?;
                    Ok(HttpResponse::Ok().json(ListArrayResponse { headers, data, total }))
                }
                None => {
                    let (data, total) = operator.list_map(&table, params.list_query(), &mut ctx).await?;
                    Ok(HttpResponse::Ok().json(ListResponse { data, total }))
                }
            }
        }
        "POST" => {
            let (rows, single) = parse_rows(parse_body(&body)?)?;
            let ids = operator.create(&table, rows, &mut ctx).await?;
            Ok(data(one_or_many(ids, single)?))
        }
        "PUT" => {
            let (mut rows, single) = parse_rows(parse_body(&body)?)?;
            if single && let (Some(id), Some(row)) = (&id, rows.first_mut()) {
                row.insert(ID_COLUMN.to_string(), Value::from(id.as_str()));
            }
            let affected = operator.update(&table, rows, &mut ctx).await?;
            Ok(data(one_or_many(affected, single)?))
        }
        "COPY" => {
            let (ids, single) = target_ids(id.as_deref(), &body)?;
            let new_ids = operator.duplicate(&table, ids, &mut ctx).await?;
            Ok(data(one_or_many(new_ids, single)?))
        }
        "DELETE" => {
            let (ids, single) = target_ids(id.as_deref(), &body)?;
            let affected = operator.delete(&table, ids, &mut ctx).await?;
            Ok(data(one_or_many(affected, single)?))
        }
        "PATCH" => {
            let payload: Json = if body.is_empty() { Json::Null } else { parse_body(&body)? };
            let request = ExecRequest::parse(&payload)?;
            ctx.case = request.case;
            let results = operator
                .exec(&table, request.params, request.query_params, request.array, &mut ctx)
                .await?;
            Ok(data(serde_json::to_value(results).map_err(anyhow::Error::from)?))
        }
        other => Err(WebsqlError::validation(format!("Unsupported method: {}", other)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_id_from_token() {
        let token = format!("{}{}", "a".repeat(32), "rest-of-token");
        assert_eq!(app_id_from_token(&token), Some("a".repeat(32).as_str()));
        assert_eq!(app_id_from_token("short"), None);
        assert_eq!(app_id_from_token(""), None);
    }

    #[test]
    fn test_list_query_defaults() {
        let params = Params(vec![
            ("filter".to_string(), "NAME=a".to_string()),
            ("filter".to_string(), "AGE>3".to_string()),
            ("fields".to_string(), "id,name".to_string()),
            ("limit".to_string(), "x".to_string()),
        ]);
        let query = params.list_query();
        assert_eq!(query.fields, "ID,NAME");
        assert_eq!(query.filters, vec!["NAME=a".to_string(), "AGE>3".to_string()]);
        assert_eq!(query.start, 0);
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(Params(Vec::new()).fields(), "*");
    }

    #[test]
    fn test_one_or_many() {
        assert_eq!(one_or_many(vec!["x".to_string()], true).unwrap(), Json::from("x"));
        assert_eq!(
            one_or_many(vec!["x".to_string()], false).unwrap(),
            serde_json::json!(["x"])
        );
        assert_eq!(one_or_many(vec![1u64, 2], true).unwrap(), serde_json::json!([1, 2]));
    }
}
