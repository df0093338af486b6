//! Update payloads
//!
//! A field holding the sentinel (`"__not_set__"` for strings, `-1` for
//! integers) or missing altogether decodes to `None` and is left untouched.
//! An empty string is a real value and clears the field.

use serde::{Deserialize, Deserializer};

use super::entity::{App, DataNode, Job, LocalInterceptor, Query, RemoteInterceptor, Token};

pub const NOT_SET: &str = "__not_set__";
pub const NOT_SET_INT: i64 = -1;

fn not_set_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| v != NOT_SET))
}

fn not_set_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.filter(|v| *v != NOT_SET_INT))
}

fn set(target: &mut String, value: &Option<String>) {
    if let Some(v) = value {
        target.clone_from(v);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DataNodeUpdate {
    pub id: String,
    #[serde(deserialize_with = "not_set_str")]
    pub name: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub host: Option<String>,
    #[serde(deserialize_with = "not_set_int")]
    pub port: Option<i64>,
    #[serde(deserialize_with = "not_set_str")]
    pub username: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub password: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub note: Option<String>,
}

impl DataNodeUpdate {
    pub fn apply_to(&self, node: &mut DataNode) -> anyhow::Result<()> {
        set(&mut node.name, &self.name);
        set(&mut node.host, &self.host);
        if let Some(port) = self.port {
            node.port = u16::try_from(port)
                .map_err(|_| websql_common::WebsqlError::validation(format!("Invalid port: {}", port)))?;
        }
        set(&mut node.username, &self.username);
        set(&mut node.password, &self.password);
        set(&mut node.note, &self.note);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppUpdate {
    pub id: String,
    #[serde(deserialize_with = "not_set_str")]
    pub name: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub data_node_id: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub note: Option<String>,
}

impl AppUpdate {
    pub fn apply_to(&self, app: &mut App) {
        set(&mut app.name, &self.name);
        set(&mut app.data_node_id, &self.data_node_id);
        set(&mut app.note, &self.note);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct QueryUpdate {
    pub id: String,
    pub app_id: String,
    #[serde(deserialize_with = "not_set_str")]
    pub name: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub script_path: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub script_text: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub mode: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub note: Option<String>,
}

impl QueryUpdate {
    pub fn apply_to(&self, query: &mut Query) {
        set(&mut query.name, &self.name);
        set(&mut query.script_path, &self.script_path);
        set(&mut query.script_text, &self.script_text);
        set(&mut query.mode, &self.mode);
        set(&mut query.note, &self.note);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct JobUpdate {
    pub id: String,
    pub app_id: String,
    #[serde(deserialize_with = "not_set_str")]
    pub name: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub cron: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub script_path: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub script_text: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub loop_script_path: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub loop_script_text: Option<String>,
    #[serde(deserialize_with = "not_set_int")]
    pub auto_start: Option<i64>,
    #[serde(deserialize_with = "not_set_str")]
    pub note: Option<String>,
}

impl JobUpdate {
    pub fn apply_to(&self, job: &mut Job) {
        set(&mut job.name, &self.name);
        set(&mut job.cron, &self.cron);
        set(&mut job.script_path, &self.script_path);
        set(&mut job.script_text, &self.script_text);
        set(&mut job.loop_script_path, &self.loop_script_path);
        set(&mut job.loop_script_text, &self.loop_script_text);
        if let Some(auto_start) = self.auto_start {
            job.auto_start = i32::from(auto_start == 1);
        }
        set(&mut job.note, &self.note);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TokenUpdate {
    pub id: String,
    pub app_id: String,
    #[serde(deserialize_with = "not_set_str")]
    pub name: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub mode: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub target: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub note: Option<String>,
}

impl TokenUpdate {
    pub fn apply_to(&self, token: &mut Token) {
        set(&mut token.name, &self.name);
        set(&mut token.mode, &self.mode);
        set(&mut token.target, &self.target);
        set(&mut token.note, &self.note);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LocalInterceptorUpdate {
    pub id: String,
    pub app_id: String,
    #[serde(deserialize_with = "not_set_str")]
    pub name: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub target: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub callback: Option<String>,
    #[serde(rename = "Type", deserialize_with = "not_set_str")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub note: Option<String>,
}

impl LocalInterceptorUpdate {
    pub fn apply_to(&self, li: &mut LocalInterceptor) {
        set(&mut li.name, &self.name);
        set(&mut li.target, &self.target);
        set(&mut li.callback, &self.callback);
        set(&mut li.kind, &self.kind);
        set(&mut li.note, &self.note);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RemoteInterceptorUpdate {
    pub id: String,
    pub app_id: String,
    #[serde(deserialize_with = "not_set_str")]
    pub name: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub target: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub method: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub url: Option<String>,
    #[serde(rename = "Type", deserialize_with = "not_set_str")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub action_type: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub callback: Option<String>,
    #[serde(deserialize_with = "not_set_str")]
    pub note: Option<String>,
}

impl RemoteInterceptorUpdate {
    pub fn apply_to(&self, ri: &mut RemoteInterceptor) {
        set(&mut ri.name, &self.name);
        set(&mut ri.target, &self.target);
        set(&mut ri.method, &self.method);
        set(&mut ri.url, &self.url);
        set(&mut ri.kind, &self.kind);
        set(&mut ri.action_type, &self.action_type);
        set(&mut ri.callback, &self.callback);
        set(&mut ri.note, &self.note);
    }
}
