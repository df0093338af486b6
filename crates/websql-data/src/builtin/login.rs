use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value as Json};
use websql_common::Value;

use super::token::sign_claims;
use crate::executor::{RowResults, StatementResult};
use crate::interceptor::{DataInterceptor, ExecCall, HookScope};

/// Turns the first row returned by the `login` query into a signed user token
pub struct LoginInterceptor {
    secret: String,
    expire_hours: i64,
}

impl LoginInterceptor {
    pub fn new(secret: impl Into<String>, expire_hours: i64) -> Self {
        Self {
            secret: secret.into(),
            expire_hours,
        }
    }
}

fn first_row_claims(result: &StatementResult) -> Option<Map<String, Json>> {
    match result {
        StatementResult::Rows(rows) => rows
            .first()
            .map(|row| row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        StatementResult::Table(table) if table.len() > 1 => Some(
            table[0]
                .iter()
                .zip(table[1].iter())
                .map(|(header, v)| (header.to_string(), v.to_json()))
                .collect(),
        ),
        _ => None,
    }
}

#[async_trait]
impl DataInterceptor for LoginInterceptor {
    async fn after_exec(
        &self,
        _scope: &mut HookScope<'_>,
        _call: &ExecCall,
        results: &mut Vec<RowResults>,
    ) -> anyhow::Result<()> {
        let Some(first) = results.first_mut().and_then(|row| row.first_mut()) else {
            return Ok(());
        };

        let token = match first_row_claims(first) {
            Some(mut claims) => {
                let exp = Utc::now().timestamp() + self.expire_hours * 3600;
                claims.insert("exp".to_string(), Json::from(exp));
                sign_claims(&self.secret, &claims)?
            }
            // Unknown credentials
            None => String::new(),
        };
        *first = StatementResult::Scalar(Value::Text(token));
        Ok(())
    }
}
