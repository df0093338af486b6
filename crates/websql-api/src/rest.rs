//! REST request parsing and response bodies for `/api/{table}[/{id}]`

use serde::Serialize;
use serde_json::Value as Json;
use websql_common::{CaseMode, Row, Value, WebsqlError};

/// Body of a successful single-payload response
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// List response in map mode
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<Row>,
    pub total: i64,
}

/// List response in array mode
#[derive(Debug, Serialize)]
pub struct ListArrayResponse {
    pub headers: Vec<String>,
    pub data: Vec<Vec<Value>>,
    pub total: i64,
}

/// Body returned for tenant and token failures
#[derive(Debug, Serialize)]
pub struct ErrResponse {
    pub err: String,
}

/// Parsed PATCH body
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub query_params: Vec<(String, String)>,
    pub params: Vec<Vec<Value>>,
    pub array: bool,
    pub case: CaseMode,
}

impl Default for ExecRequest {
    fn default() -> Self {
        ExecRequest {
            query_params: Vec::new(),
            params: vec![Vec::new()],
            array: true,
            case: CaseMode::Preserve,
        }
    }
}

fn unrecognized() -> anyhow::Error {
    WebsqlError::validation("Cannot recognize data type").into()
}

fn token_text(value: &Json) -> anyhow::Result<String> {
    match value {
        Json::Null => Err(WebsqlError::validation("Data contains nil.").into()),
        Json::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

impl ExecRequest {
    /// `query_params` is a map or an array (entries become `$0`, `$1`, ...).
    /// `params` is an array of rows, or a flat array taken as one row.
    pub fn parse(body: &Json) -> anyhow::Result<ExecRequest> {
        let mut request = ExecRequest {
            params: Vec::new(),
            ..Default::default()
        };
        let Some(object) = body.as_object() else {
            if body.is_null() {
                return Ok(ExecRequest::default());
            }
            return Err(unrecognized());
        };

        match object.get("query_params") {
            None => {}
            Some(Json::Object(map)) => {
                for (k, v) in map {
                    request.query_params.push((k.clone(), token_text(v)?));
                }
            }
            Some(Json::Array(items)) => {
                for (i, v) in items.iter().enumerate() {
                    request.query_params.push((format!("${}", i), token_text(v)?));
                }
            }
            Some(_) => return Err(unrecognized()),
        }

        match object.get("params") {
            None => {}
            Some(Json::Array(items)) => {
                let mut flat = Vec::new();
                for item in items {
                    match item {
                        Json::Null => return Err(WebsqlError::validation("Data contains nil.").into()),
                        Json::Array(row) => request
                            .params
                            .push(row.iter().cloned().map(Value::from_json).collect()),
                        other => flat.push(Value::from_json(other.clone())),
                    }
                }
                if !flat.is_empty() {
                    request.params.insert(0, flat);
                }
            }
            Some(_) => return Err(unrecognized()),
        }
        if request.params.is_empty() {
            request.params.push(Vec::new());
        }

        match object.get("array") {
            None => {}
            Some(Json::Bool(b)) => request.array = *b,
            Some(_) => return Err(unrecognized()),
        }

        match object.get("case") {
            None => {}
            Some(Json::String(s)) => request.case = CaseMode::parse(s),
            Some(_) => return Err(unrecognized()),
        }

        Ok(request)
    }
}

/// Converts a POST/PUT body into rows: keys uppercased, `_`-prefixed keys
/// dropped. The flag reports whether a single object was posted.
pub fn parse_rows(body: Json) -> anyhow::Result<(Vec<Row>, bool)> {
    let (items, single) = match body {
        Json::Array(items) => (items, false),
        object @ Json::Object(_) => (vec![object], true),
        _ => return Err(WebsqlError::validation("Error parsing post data.").into()),
    };

    let rows = items
        .into_iter()
        .filter_map(|item| match item {
            Json::Object(map) => Some(
                map.into_iter()
                    .filter(|(k, _)| !k.starts_with('_'))
                    .map(|(k, v)| (k.to_uppercase(), Value::from_json(v)))
                    .collect::<Row>(),
            ),
            _ => None,
        })
        .collect();
    Ok((rows, single))
}

/// Ids from a COPY/DELETE body: a JSON array of strings
pub fn parse_ids(body: &Json) -> anyhow::Result<Vec<String>> {
    match body {
        Json::Array(items) => Ok(items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()),
        _ => Err(WebsqlError::validation("Error parsing post data.").into()),
    }
}

/// Parses the `array` query parameter
pub fn parse_bool_param(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "1" || v == "true" => true,
        Some(v) if v == "0" || v == "false" => false,
        _ => default,
    }
}
