// Id generation and SQL identifier helpers

/// Generates a new 32-char lowercase hex id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn strip_backticks(s: &str) -> String {
    s.replace('`', "")
}

/// Escapes single quotes and removes line comment markers
pub fn mysql_safe(s: &str) -> String {
    s.replace('\'', "''").replace("--", "")
}

/// Registry key for a resource: uppercased with backticks stripped
pub fn normalize_resource_id(resource_id: &str) -> String {
    strip_backticks(resource_id).trim().to_uppercase()
}

/// Bare table name of a possibly qualified resource id
pub fn table_name(resource_id: &str) -> String {
    let stripped = strip_backticks(resource_id);
    stripped
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// True for a plain SQL identifier, optionally `schema.column` qualified
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Quotes a table identifier.
///
/// `schema.table` keeps its own schema; a bare table is qualified with
/// `database`.
pub fn quote_table_id(database: &str, table_id: &str) -> String {
    let stripped = strip_backticks(table_id);
    let (schema, table) = match stripped.split_once('.') {
        Some((schema, table)) => (schema.trim(), table.trim()),
        None => (database, stripped.trim()),
    };
    format!("`{}`.`{}`", mysql_safe(schema), mysql_safe(table))
}
