//! Error types for WebSQL
//!
//! Services return `anyhow::Result` and raise one of these variants when the
//! caller needs to tell failures apart. Driver errors travel through `anyhow`
//! untouched and are classified at the HTTP edge.

/// Application-specific error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WebsqlError {
    /// Duplicate or missing entity, bad reference, bad input shape
    #[error("{0}")]
    Validation(String),

    /// Secret mismatch, token or signature rejection, permission denial
    #[error("{0}")]
    Auth(String),

    /// Unknown id, table, query, or app
    #[error("{0}")]
    NotFound(String),

    #[error("sql error: {0}")]
    Sql(String),

    /// Placeholder count mismatch, malformed batch or filter
    #[error("{0}")]
    Script(String),

    /// Webhook transport failure
    #[error("remote error: {0}")]
    Remote(String),
}

impl WebsqlError {
    pub fn validation(message: impl Into<String>) -> Self {
        WebsqlError::Validation(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        WebsqlError::Auth(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        WebsqlError::NotFound(message.into())
    }

    pub fn script(message: impl Into<String>) -> Self {
        WebsqlError::Script(message.into())
    }
}

/// Returns the typed variant carried by an `anyhow` error, if any
pub fn classify(err: &anyhow::Error) -> Option<&WebsqlError> {
    err.downcast_ref::<WebsqlError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websql_error_display() {
        let err = WebsqlError::validation("App existed: shop");
        assert_eq!(format!("{}", err), "App existed: shop");

        let err = WebsqlError::Sql("deadlock".to_string());
        assert_eq!(format!("{}", err), "sql error: deadlock");
    }

    #[test]
    fn test_classify_through_anyhow() {
        let err: anyhow::Error = WebsqlError::auth("Access denied.").into();
        assert_eq!(
            classify(&err),
            Some(&WebsqlError::Auth("Access denied.".to_string()))
        );

        let plain = anyhow::anyhow!("boom");
        assert!(classify(&plain).is_none());
    }
}
