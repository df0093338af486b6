//! Configuration entities
//!
//! Field names serialize in PascalCase so snapshot files and command payloads
//! stay readable by every node in a deployment.

use serde::{Deserialize, Serialize};

/// The full replicated configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub data_nodes: Vec<DataNode>,
    pub apps: Vec<App>,
}

impl ConfigSnapshot {
    pub fn data_node(&self, id: &str) -> Option<&DataNode> {
        self.data_nodes.iter().find(|n| n.id == id)
    }

    pub fn app(&self, id: &str) -> Option<&App> {
        self.apps.iter().find(|a| a.id == id)
    }

    pub fn app_mut(&mut self, id: &str) -> Option<&mut App> {
        self.apps.iter_mut().find(|a| a.id == id)
    }
}

/// A physical database server registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DataNode {
    pub id: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "Type")]
    pub db_type: String,
    pub note: String,
    pub status: String,
}

/// A tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct App {
    pub id: String,
    pub name: String,
    /// Reference database name; the tenant schema is `nd_{db_name}`
    pub db_name: String,
    pub data_node_id: String,
    pub note: String,
    pub status: String,
    pub queries: Vec<Query>,
    pub jobs: Vec<Job>,
    pub tokens: Vec<Token>,
    pub local_interceptors: Vec<LocalInterceptor>,
    pub remote_interceptors: Vec<RemoteInterceptor>,
}

impl App {
    /// Schema holding this tenant's tables
    pub fn database(&self) -> String {
        format!("{}{}", websql_common::TENANT_DB_PREFIX, self.db_name)
    }

    pub fn query_by_name(&self, name: &str) -> Option<&Query> {
        self.queries.iter().find(|q| q.name == name)
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn token(&self, id: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == id)
    }
}

/// A named SQL script exposed as an exec target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Query {
    pub id: String,
    pub name: String,
    pub script_path: String,
    pub script_text: String,
    /// `public` or anything else for tenant-private
    pub mode: String,
    pub app_id: String,
    pub note: String,
    pub status: String,
}

impl Query {
    pub fn is_public(&self) -> bool {
        self.mode == "public"
    }
}

/// A cron-triggered script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Job {
    pub id: String,
    pub name: String,
    /// Six-field cron expression, seconds first
    pub cron: String,
    pub script_path: String,
    pub script_text: String,
    /// 1 starts the job at boot
    pub auto_start: i32,
    pub loop_script_path: String,
    pub loop_script_text: String,
    pub app_id: String,
    pub note: String,
    pub status: String,
}

impl Job {
    pub fn autostarts(&self) -> bool {
        self.auto_start == 1
    }
}

/// An api access grant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Token {
    pub id: String,
    pub name: String,
    /// Operation letters, or `*`
    pub mode: String,
    /// Comma separated table names, or `*`
    pub target: String,
    pub app_id: String,
    pub note: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LocalInterceptor {
    pub id: String,
    pub name: String,
    pub app_id: String,
    pub target: String,
    /// Name of the query run as the hook body
    pub callback: String,
    /// `before` or `after`
    #[serde(rename = "Type")]
    pub kind: String,
    pub note: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RemoteInterceptor {
    pub id: String,
    pub name: String,
    pub app_id: String,
    pub target: String,
    pub method: String,
    pub url: String,
    /// `before` or `after`
    #[serde(rename = "Type")]
    pub kind: String,
    /// Verb this hook fires on, e.g. `exec` or `create`
    pub action_type: String,
    pub callback: String,
    pub note: String,
    pub status: String,
}

/// A slave node registered with the master
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApiNode {
    pub id: String,
    pub name: String,
    pub server_name: String,
}

/// Anything owned by an app with a locally unique name
pub trait AppEntity {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn app_id(&self) -> &str;
    fn set_id(&mut self, id: String);
}

macro_rules! impl_app_entity {
    ($($ty:ty),*) => {
        $(impl AppEntity for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn app_id(&self) -> &str {
                &self.app_id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        })*
    };
}

impl_app_entity!(Query, Job, Token, LocalInterceptor, RemoteInterceptor);
