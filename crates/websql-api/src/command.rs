//! Command envelope shared by the control channel and replication
//!
//! The envelope is what travels on the wire. It is decoded once into the
//! closed [`Command`] union so dispatch is an exhaustive `match`.

use serde::{Deserialize, Serialize};
use websql_common::WebsqlError;

use crate::model::{
    App, AppUpdate, ConfigSnapshot, DataNode, DataNodeUpdate, Job, JobUpdate, LocalInterceptor,
    LocalInterceptorUpdate, Query, QueryUpdate, RemoteInterceptor, RemoteInterceptorUpdate, Token,
    TokenUpdate,
};

pub const CLI_DN_LIST: &str = "CLI_DN_LIST";
pub const CLI_DN_ADD: &str = "CLI_DN_ADD";
pub const CLI_DN_UPDATE: &str = "CLI_DN_UPDATE";
pub const CLI_DN_REMOVE: &str = "CLI_DN_REMOVE";
pub const CLI_APP_LIST: &str = "CLI_APP_LIST";
pub const CLI_APP_ADD: &str = "CLI_APP_ADD";
pub const CLI_APP_UPDATE: &str = "CLI_APP_UPDATE";
pub const CLI_APP_REMOVE: &str = "CLI_APP_REMOVE";
pub const CLI_QUERY_ADD: &str = "CLI_QUERY_ADD";
pub const CLI_QUERY_UPDATE: &str = "CLI_QUERY_UPDATE";
pub const CLI_QUERY_REMOVE: &str = "CLI_QUERY_REMOVE";
pub const CLI_QUERY_RELOAD_ALL: &str = "CLI_QUERY_RELOAD_ALL";
pub const CLI_JOB_ADD: &str = "CLI_JOB_ADD";
pub const CLI_JOB_UPDATE: &str = "CLI_JOB_UPDATE";
pub const CLI_JOB_REMOVE: &str = "CLI_JOB_REMOVE";
pub const CLI_JOB_START: &str = "CLI_JOB_START";
pub const CLI_JOB_RESTART: &str = "CLI_JOB_RESTART";
pub const CLI_JOB_STOP: &str = "CLI_JOB_STOP";
pub const CLI_TOKEN_ADD: &str = "CLI_TOKEN_ADD";
pub const CLI_TOKEN_UPDATE: &str = "CLI_TOKEN_UPDATE";
pub const CLI_TOKEN_REMOVE: &str = "CLI_TOKEN_REMOVE";
pub const CLI_LI_ADD: &str = "CLI_LI_ADD";
pub const CLI_LI_UPDATE: &str = "CLI_LI_UPDATE";
pub const CLI_LI_REMOVE: &str = "CLI_LI_REMOVE";
pub const CLI_RI_ADD: &str = "CLI_RI_ADD";
pub const CLI_RI_UPDATE: &str = "CLI_RI_UPDATE";
pub const CLI_RI_REMOVE: &str = "CLI_RI_REMOVE";
pub const CLI_SHOW_MASTER: &str = "CLI_SHOW_MASTER";
pub const CLI_SHOW_API_NODES: &str = "CLI_SHOW_API_NODES";
pub const CLI_PROPAGATE: &str = "CLI_PROPAGATE";
pub const WS_REGISTER: &str = "WS_REGISTER";
pub const WS_MASTER_DATA: &str = "WS_MASTER_DATA";

/// Successful registration reply carried in `Data`
pub const REGISTER_OK: &str = "OK";

/// Wire form of every control and replication message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommandEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    pub data: String,
    pub secret: String,
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl CommandEnvelope {
    pub fn new(kind: &str, data: impl Into<String>) -> Self {
        CommandEnvelope {
            kind: kind.to_string(),
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Replication frames carry their own handshake and skip the secret check
    pub fn requires_secret(&self) -> bool {
        self.kind != WS_REGISTER && self.kind != WS_MASTER_DATA
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Reference to an app-owned entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EntityRef {
    pub id: String,
    pub app_id: String,
}

/// Typed control and replication commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ListDataNodes(String),
    AddDataNode(DataNode),
    UpdateDataNode(DataNodeUpdate),
    RemoveDataNode(String),
    ListApps(String),
    AddApp(App),
    UpdateApp(AppUpdate),
    RemoveApp(String),
    AddQuery(Query),
    UpdateQuery(QueryUpdate),
    RemoveQuery(EntityRef),
    ReloadAllQueries(String),
    AddJob(Job),
    UpdateJob(JobUpdate),
    RemoveJob(EntityRef),
    StartJob(EntityRef),
    RestartJob(EntityRef),
    StopJob(EntityRef),
    AddToken(Token),
    UpdateToken(TokenUpdate),
    RemoveToken(EntityRef),
    AddLocalInterceptor(LocalInterceptor),
    UpdateLocalInterceptor(LocalInterceptorUpdate),
    RemoveLocalInterceptor(EntityRef),
    AddRemoteInterceptor(RemoteInterceptor),
    UpdateRemoteInterceptor(RemoteInterceptorUpdate),
    RemoveRemoteInterceptor(EntityRef),
    ShowMaster,
    ShowApiNodes,
    Propagate,
    /// Node id on the request, `OK` or a failure text on the reply
    Register(String),
    MasterData(ConfigSnapshot),
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, data: &str) -> anyhow::Result<T> {
    serde_json::from_str(data)
        .map_err(|e| WebsqlError::validation(format!("Invalid {} payload: {}", kind, e)).into())
}

/// `{AppId}` or a bare app id
fn reload_target(data: &str) -> String {
    serde_json::from_str::<EntityRef>(data)
        .map(|r| r.app_id)
        .unwrap_or_else(|_| data.trim().to_string())
}

impl Command {
    /// Decodes an envelope by exact type match. The secret is checked by the
    /// receiver, not here.
    pub fn decode(envelope: &CommandEnvelope) -> anyhow::Result<Command> {
        let kind = envelope.kind.as_str();
        let data = envelope.data.as_str();
        let command = match kind {
            CLI_DN_LIST => Command::ListDataNodes(data.to_string()),
            CLI_DN_ADD => Command::AddDataNode(payload(kind, data)?),
            CLI_DN_UPDATE => Command::UpdateDataNode(payload(kind, data)?),
            CLI_DN_REMOVE => Command::RemoveDataNode(data.to_string()),
            CLI_APP_LIST => Command::ListApps(data.to_string()),
            CLI_APP_ADD => Command::AddApp(payload(kind, data)?),
            CLI_APP_UPDATE => Command::UpdateApp(payload(kind, data)?),
            CLI_APP_REMOVE => Command::RemoveApp(data.to_string()),
            CLI_QUERY_ADD => Command::AddQuery(payload(kind, data)?),
            CLI_QUERY_UPDATE => Command::UpdateQuery(payload(kind, data)?),
            CLI_QUERY_REMOVE => Command::RemoveQuery(payload(kind, data)?),
            CLI_QUERY_RELOAD_ALL => Command::ReloadAllQueries(reload_target(data)),
            CLI_JOB_ADD => Command::AddJob(payload(kind, data)?),
            CLI_JOB_UPDATE => Command::UpdateJob(payload(kind, data)?),
            CLI_JOB_REMOVE => Command::RemoveJob(payload(kind, data)?),
            CLI_JOB_START => Command::StartJob(payload(kind, data)?),
            CLI_JOB_RESTART => Command::RestartJob(payload(kind, data)?),
            CLI_JOB_STOP => Command::StopJob(payload(kind, data)?),
            CLI_TOKEN_ADD => Command::AddToken(payload(kind, data)?),
            CLI_TOKEN_UPDATE => Command::UpdateToken(payload(kind, data)?),
            CLI_TOKEN_REMOVE => Command::RemoveToken(payload(kind, data)?),
            CLI_LI_ADD => Command::AddLocalInterceptor(payload(kind, data)?),
            CLI_LI_UPDATE => Command::UpdateLocalInterceptor(payload(kind, data)?),
            CLI_LI_REMOVE => Command::RemoveLocalInterceptor(payload(kind, data)?),
            CLI_RI_ADD => Command::AddRemoteInterceptor(payload(kind, data)?),
            CLI_RI_UPDATE => Command::UpdateRemoteInterceptor(payload(kind, data)?),
            CLI_RI_REMOVE => Command::RemoveRemoteInterceptor(payload(kind, data)?),
            CLI_SHOW_MASTER => Command::ShowMaster,
            CLI_SHOW_API_NODES => Command::ShowApiNodes,
            CLI_PROPAGATE => Command::Propagate,
            WS_REGISTER => Command::Register(data.to_string()),
            WS_MASTER_DATA => Command::MasterData(payload(kind, data)?),
            other => {
                return Err(WebsqlError::validation(format!("Unknown command type: {}", other)).into());
            }
        };
        Ok(command)
    }

    /// True for commands that change the configuration
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Command::ListDataNodes(_)
                | Command::ListApps(_)
                | Command::ShowMaster
                | Command::ShowApiNodes
                | Command::Register(_)
                | Command::MasterData(_)
        )
    }
}
