//! Api token and user token checks, plus audit stamping of writes

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::{Map, Value as Json};
use websql_common::{Row, Value, WebsqlError, table_name};

use crate::interceptor::{CallContext, DataInterceptor, ExecCall, HookScope, ListQuery, Verb};

/// Signs `claims` as an HS256 JWT
pub fn sign_claims(secret: &str, claims: &Map<String, Json>) -> anyhow::Result<String> {
    Ok(encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Verifies an HS256 user token and returns its claims
pub fn verify_user_token(secret: &str, token: &str) -> anyhow::Result<Map<String, Json>> {
    let data = decode::<Map<String, Json>>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| WebsqlError::auth("Invalid user token."))?;
    Ok(data.claims)
}

/// Whether a token with `targets` and `mode` grants `letter` on `resource_id`
pub fn check_access_permission(targets: &str, resource_id: &str, mode: &str, letter: char) -> bool {
    let table = table_name(resource_id);
    let table_match = targets == "*" || targets.split(',').map(str::trim).any(|t| t == table);
    table_match && (mode == "*" || mode.contains(letter))
}

/// Global hook at sequence 0
pub struct TokenInterceptor {
    secret: String,
    require_user_token: bool,
}

impl TokenInterceptor {
    pub fn new(secret: impl Into<String>, require_user_token: bool) -> Self {
        Self {
            secret: secret.into(),
            require_user_token,
        }
    }

    fn check_api_token(&self, ctx: &CallContext, resource_id: &str, verb: Verb) -> anyhow::Result<()> {
        let app = ctx.app()?;
        let granted = app
            .tokens
            .iter()
            .find(|t| t.app_id == app.id && t.id == ctx.api_token)
            .is_some_and(|t| check_access_permission(&t.target, resource_id, &t.mode, verb.letter()));

        if granted {
            Ok(())
        } else {
            Err(WebsqlError::auth("Authentication failed.").into())
        }
    }

    fn check_user_token(&self, ctx: &mut CallContext, required: bool) -> anyhow::Result<()> {
        let Some(token) = ctx.user_token.as_deref() else {
            if required {
                return Err(WebsqlError::auth("No user token.").into());
            }
            return Ok(());
        };

        let claims = verify_user_token(&self.secret, token)?;
        ctx.user_email = claims
            .get("email")
            .or_else(|| claims.get("EMAIL"))
            .map(|v| match v {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            });
        Ok(())
    }

    fn check(&self, scope: &mut HookScope<'_>) -> anyhow::Result<()> {
        self.check_api_token(scope.ctx, scope.resource_id, scope.verb)?;
        self.check_user_token(scope.ctx, self.require_user_token)
    }
}

fn stamp(row: &mut Row, ctx: &CallContext, prefixes: &[&str]) {
    let now = Value::Timestamp(Utc::now().naive_utc());
    for prefix in prefixes {
        row.insert(format!("{}_AT", prefix), now.clone());
        if let Some(email) = &ctx.user_email {
            row.insert(format!("{}_BY", prefix), Value::Text(email.clone()));
        }
        if let Some(ip) = &ctx.client_ip {
            row.insert(format!("{}_FROM", prefix), Value::Text(ip.clone()));
        }
    }
}

#[async_trait]
impl DataInterceptor for TokenInterceptor {
    async fn before_load(&self, scope: &mut HookScope<'_>, _id: &str, _fields: &mut String) -> anyhow::Result<()> {
        self.check(scope)
    }

    async fn before_create(&self, scope: &mut HookScope<'_>, rows: &mut Vec<Row>) -> anyhow::Result<()> {
        self.check(scope)?;
        for row in rows.iter_mut() {
            stamp(row, scope.ctx, &["CREATED", "UPDATED"]);
        }
        Ok(())
    }

    async fn before_update(&self, scope: &mut HookScope<'_>, rows: &mut Vec<Row>) -> anyhow::Result<()> {
        self.check(scope)?;
        for row in rows.iter_mut() {
            stamp(row, scope.ctx, &["UPDATED"]);
        }
        Ok(())
    }

    async fn before_duplicate(&self, scope: &mut HookScope<'_>, _ids: &mut Vec<String>) -> anyhow::Result<()> {
        self.check(scope)
    }

    async fn before_delete(&self, scope: &mut HookScope<'_>, _ids: &mut Vec<String>) -> anyhow::Result<()> {
        self.check(scope)
    }

    async fn before_list_map(&self, scope: &mut HookScope<'_>, _query: &mut ListQuery) -> anyhow::Result<()> {
        self.check(scope)
    }

    async fn before_list_array(&self, scope: &mut HookScope<'_>, _query: &mut ListQuery) -> anyhow::Result<()> {
        self.check(scope)
    }

    async fn before_exec(&self, scope: &mut HookScope<'_>, call: &mut ExecCall) -> anyhow::Result<()> {
        self.check_api_token(scope.ctx, scope.resource_id, scope.verb)?;
        // Public queries accept anonymous callers but still verify a supplied token.
        let required = self.require_user_token && !call.public;
        self.check_user_token(scope.ctx, required)
    }
}
