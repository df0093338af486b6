//! Outbound mail

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(&self, subject: &str, body: &str, recipients: &[String]) -> anyhow::Result<()>;
}

/// Writes mail to the log instead of delivering it
#[derive(Debug, Clone, Default)]
pub struct LogMailer {
    pub from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_mail(&self, subject: &str, body: &str, recipients: &[String]) -> anyhow::Result<()> {
        info!(
            from = %self.from,
            to = %recipients.join(","),
            subject = %subject,
            body_len = body.len(),
            "Mail sent"
        );
        Ok(())
    }
}
