use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use websql_common::Value;

use crate::executor::{RowResults, StatementResult};
use crate::interceptor::{DataInterceptor, ExecCall, HookScope};
use crate::mailer::Mailer;

const CODE_COLUMN: &str = "VERIFICATION_CODE";
const EMAIL_COLUMN: &str = "EMAIL";

/// Mails a verification code produced by one statement of a query, then
/// blanks that statement's result so the code never reaches the caller.
///
/// Registered for `signup` (statement 5) and `forget_password` (statement 3).
pub struct VerificationMailInterceptor {
    statement: usize,
    subject: String,
    mailer: Arc<dyn Mailer>,
}

impl VerificationMailInterceptor {
    pub fn new(statement: usize, subject: impl Into<String>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            statement,
            subject: subject.into(),
            mailer,
        }
    }
}

fn lookup(columns: &[(String, &Value)], name: &str) -> Option<String> {
    columns
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

/// Code and email from the first row of a statement result
fn code_and_email(result: &StatementResult) -> Option<(String, String)> {
    let columns: Vec<(String, &Value)> = match result {
        StatementResult::Rows(rows) => rows.first()?.iter().map(|(k, v)| (k.clone(), v)).collect(),
        StatementResult::Table(table) if table.len() > 1 => table[0]
            .iter()
            .map(Value::to_string)
            .zip(table[1].iter())
            .collect(),
        _ => return None,
    };
    Some((lookup(&columns, CODE_COLUMN)?, lookup(&columns, EMAIL_COLUMN)?))
}

#[async_trait]
impl DataInterceptor for VerificationMailInterceptor {
    async fn after_exec(
        &self,
        _scope: &mut HookScope<'_>,
        _call: &ExecCall,
        results: &mut Vec<RowResults>,
    ) -> anyhow::Result<()> {
        let Some(result) = results.first_mut().and_then(|row| row.get_mut(self.statement)) else {
            return Ok(());
        };

        if let Some((code, email)) = code_and_email(result) {
            let mailer = self.mailer.clone();
            let subject = self.subject.clone();
            tokio::spawn(async move {
                if let Err(e) = mailer.send_mail(&subject, &code, &[email]).await {
                    warn!(error = %e, "Failed to send verification mail");
                }
            });
        }

        *result = StatementResult::Scalar(Value::Text(String::new()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use websql_common::Row;

    #[test]
    fn test_code_and_email_is_case_insensitive() {
        let mut row = Row::new();
        row.insert("verification_code".to_string(), Value::from("123456"));
        row.insert("Email".to_string(), Value::from("a@b.c"));
        assert_eq!(
            code_and_email(&StatementResult::Rows(vec![row])),
            Some(("123456".to_string(), "a@b.c".to_string()))
        );
    }

    #[test]
    fn test_code_and_email_from_table() {
        let table = StatementResult::Table(vec![
            vec![Value::from("EMAIL"), Value::from("VERIFICATION_CODE")],
            vec![Value::from("x@y.z"), Value::Int(42)],
        ]);
        assert_eq!(
            code_and_email(&table),
            Some(("42".to_string(), "x@y.z".to_string()))
        );
    }

    #[test]
    fn test_missing_columns() {
        assert_eq!(code_and_email(&StatementResult::Affected(1)), None);
        assert_eq!(code_and_email(&StatementResult::Rows(Vec::new())), None);
    }
}
