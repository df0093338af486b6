//! List request compilation: filters, sort, group and field lists
//!
//! Filters are infix expressions such as `age >= 18 && name like 'a%'`.
//! They are parsed into SQL fragments, so only known operators, identifiers,
//! numbers, and re-quoted literals ever reach the database.

use websql_common::{WebsqlError, is_identifier};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn invalid(filter: &str) -> anyhow::Error {
    WebsqlError::validation(format!("Invalid filter: {}", filter)).into()
}

fn tokenize(filter: &str) -> anyhow::Result<Vec<Token>> {
    let chars: Vec<char> = filter.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let number: String = chars[start..i].iter().collect();
            if number.matches('.').count() > 1 {
                return Err(invalid(filter));
            }
            tokens.push(Token::Number(number));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        match c {
            '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .ok_or_else(|| invalid(filter))?;
                tokens.push(Token::Ident(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
                continue;
            }
            '\'' | '"' => {
                let mut literal = String::new();
                let mut j = i + 1;
                loop {
                    let ch = *chars.get(j).ok_or_else(|| invalid(filter))?;
                    if ch == '\\' {
                        literal.push(*chars.get(j + 1).ok_or_else(|| invalid(filter))?);
                        j += 2;
                    } else if ch == c && chars.get(j + 1) == Some(&c) {
                        literal.push(c);
                        j += 2;
                    } else if ch == c {
                        break;
                    } else {
                        literal.push(ch);
                        j += 1;
                    }
                }
                tokens.push(Token::Str(literal));
                i = j + 1;
                continue;
            }
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            _ => {
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => ("=", 2),
                    ('!', Some('=')) => ("<>", 2),
                    ('<', Some('>')) => ("<>", 2),
                    ('<', Some('=')) => ("<=", 2),
                    ('>', Some('=')) => (">=", 2),
                    ('&', Some('&')) => ("AND", 2),
                    ('|', Some('|')) => ("OR", 2),
                    ('=', _) => ("=", 1),
                    ('<', _) => ("<", 1),
                    ('>', _) => (">", 1),
                    ('!', _) => ("NOT", 1),
                    ('+', _) => ("+", 1),
                    ('-', _) => ("-", 1),
                    ('*', _) => ("*", 1),
                    ('/', _) => ("/", 1),
                    ('%', _) => ("%", 1),
                    _ => return Err(invalid(filter)),
                };
                tokens.push(Token::Op(op));
                i += width;
                continue;
            }
        }
        i += 1;
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self) -> Option<String> {
        match self.peek() {
            Some(Token::Ident(s)) => Some(s.to_ascii_lowercase()),
            _ => None,
        }
    }

    /// Consumes an operator or its keyword spelling
    fn eat(&mut self, op: &str, keyword: &str) -> bool {
        let hit = match self.peek() {
            Some(Token::Op(o)) => *o == op,
            Some(Token::Ident(s)) => !keyword.is_empty() && s.eq_ignore_ascii_case(keyword),
            _ => false,
        };
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect_keyword(&mut self, keyword: &str) -> anyhow::Result<()> {
        if self.eat("", keyword) {
            Ok(())
        } else {
            Err(invalid(self.source))
        }
    }

    fn or(&mut self) -> anyhow::Result<String> {
        let mut left = self.and()?;
        while self.eat("OR", "or") {
            let right = self.and()?;
            left = format!("({} OR {})", left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> anyhow::Result<String> {
        let mut left = self.not()?;
        while self.eat("AND", "and") {
            let right = self.not()?;
            left = format!("({} AND {})", left, right);
        }
        Ok(left)
    }

    fn not(&mut self) -> anyhow::Result<String> {
        if self.eat("NOT", "not") {
            return Ok(format!("NOT {}", self.not()?));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> anyhow::Result<String> {
        let left = self.additive()?;

        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if matches!(op, "=" | "<>" | "<" | "<=" | ">" | ">=") {
                self.pos += 1;
                let right = self.additive()?;
                return Ok(format!("{} {} {}", left, op, right));
            }
        }

        match self.peek_keyword().as_deref() {
            Some("like") => {
                self.pos += 1;
                let right = self.additive()?;
                Ok(format!("{} LIKE {}", left, right))
            }
            Some("not") => {
                self.pos += 1;
                self.expect_keyword("like")?;
                let right = self.additive()?;
                Ok(format!("{} NOT LIKE {}", left, right))
            }
            Some("is") => {
                self.pos += 1;
                let negated = self.eat("", "not");
                self.expect_keyword("null")?;
                Ok(format!("{} IS {}NULL", left, if negated { "NOT " } else { "" }))
            }
            _ => Ok(left),
        }
    }

    fn additive(&mut self) -> anyhow::Result<String> {
        let mut left = self.multiplicative()?;
        while let Some(Token::Op(op @ ("+" | "-"))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.multiplicative()?;
            left = format!("{} {} {}", left, op, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> anyhow::Result<String> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ ("*" | "/" | "%"))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.unary()?;
            left = format!("{} {} {}", left, op, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> anyhow::Result<String> {
        if self.eat("-", "") {
            return Ok(format!("-{}", self.unary()?));
        }
        self.primary()
    }

    fn primary(&mut self) -> anyhow::Result<String> {
        let token = self.peek().cloned().ok_or_else(|| invalid(self.source))?;
        self.pos += 1;

        match token {
            Token::Number(n) => Ok(n),
            Token::Str(s) => Ok(quote_literal(&s)),
            Token::LParen => {
                let inner = self.or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(invalid(self.source));
                }
                self.pos += 1;
                Ok(format!("({})", inner))
            }
            Token::Ident(name) => match name.to_ascii_lowercase().as_str() {
                "true" => Ok("TRUE".to_string()),
                "false" => Ok("FALSE".to_string()),
                "null" => Ok("NULL".to_string()),
                "and" | "or" | "not" | "like" | "is" => Err(invalid(self.source)),
                _ if is_identifier(&name) => Ok(quote_identifier(&name)),
                _ => Err(invalid(self.source)),
            },
            Token::RParen | Token::Op(_) => Err(invalid(self.source)),
        }
    }
}

fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("`{}`", part))
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Compiles one filter expression into a SQL fragment
pub fn compile_filter(filter: &str) -> anyhow::Result<String> {
    let mut parser = Parser {
        tokens: tokenize(filter)?,
        pos: 0,
        source: filter,
    };
    let sql = parser.or()?;
    if parser.pos != parser.tokens.len() {
        return Err(invalid(filter));
    }
    Ok(sql)
}

/// ANDs all non-blank filters after `1=1`
pub fn compile_filters(filters: &[String]) -> anyhow::Result<String> {
    let mut clause = String::from(" WHERE 1=1");
    for filter in filters.iter().filter(|f| !f.trim().is_empty()) {
        clause.push_str(&format!(" AND ({})", compile_filter(filter)?));
    }
    Ok(clause)
}

fn column_list(entries: &[String]) -> impl Iterator<Item = &str> {
    entries
        .iter()
        .flat_map(|e| e.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Compiles `column[:asc|desc]` entries into an ORDER BY clause
pub fn parse_sort(sort: &[String]) -> anyhow::Result<String> {
    let mut items = Vec::new();
    for entry in column_list(sort) {
        let (column, direction) = entry.split_once(':').unwrap_or((entry, "asc"));
        let (column, direction) = (column.trim(), direction.trim().to_ascii_uppercase());
        if !is_identifier(column) || !matches!(direction.as_str(), "ASC" | "DESC") {
            return Err(WebsqlError::validation(format!("Invalid sort: {}", entry)).into());
        }
        items.push(format!("{} {}", column.to_uppercase(), direction));
    }
    if items.is_empty() {
        return Ok(String::new());
    }
    Ok(format!(" ORDER BY {}", items.join(", ")))
}

pub fn parse_group(group: &[String]) -> anyhow::Result<String> {
    let mut columns = Vec::new();
    for column in column_list(group) {
        if !is_identifier(column) {
            return Err(WebsqlError::validation(format!("Invalid group: {}", column)).into());
        }
        columns.push(column.to_uppercase());
    }
    if columns.is_empty() {
        return Ok(String::new());
    }
    Ok(format!(" GROUP BY {}", columns.join(", ")))
}

/// `*` or a comma separated list of column identifiers
pub fn validate_fields(fields: &str) -> anyhow::Result<String> {
    let fields = fields.trim();
    if fields.is_empty() || fields == "*" {
        return Ok("*".to_string());
    }
    let columns: Vec<&str> = fields.split(',').map(str::trim).collect();
    if let Some(bad) = columns.iter().find(|c| !is_identifier(c)) {
        return Err(WebsqlError::validation(format!("Invalid field: {}", bad)).into());
    }
    Ok(columns.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_comparisons() {
        assert_eq!(compile_filter("age >= 18").unwrap(), "`age` >= 18");
        assert_eq!(compile_filter("a == 1").unwrap(), "`a` = 1");
        assert_eq!(compile_filter("a != 'x'").unwrap(), "`a` <> 'x'");
        assert_eq!(compile_filter("t.a <> b").unwrap(), "`t`.`a` <> `b`");
    }

    #[test]
    fn test_compile_logic_and_precedence() {
        assert_eq!(
            compile_filter("a = 1 || b = 2 && c = 3").unwrap(),
            "(`a` = 1 OR (`b` = 2 AND `c` = 3))"
        );
        assert_eq!(
            compile_filter("(a = 1 or b = 2) and not c = 3").unwrap(),
            "(((`a` = 1 OR `b` = 2)) AND NOT `c` = 3)"
        );
        assert_eq!(compile_filter("qty * 2 + 1 > 10").unwrap(), "`qty` * 2 + 1 > 10");
    }

    #[test]
    fn test_compile_like_and_null() {
        assert_eq!(compile_filter("name like 'a%'").unwrap(), "`name` LIKE 'a%'");
        assert_eq!(compile_filter("name not like \"b%\"").unwrap(), "`name` NOT LIKE 'b%'");
        assert_eq!(compile_filter("deleted_at is null").unwrap(), "`deleted_at` IS NULL");
        assert_eq!(compile_filter("x IS NOT NULL").unwrap(), "`x` IS NOT NULL");
    }

    #[test]
    fn test_literals_are_requoted() {
        assert_eq!(compile_filter(r"name = 'it\'s'").unwrap(), "`name` = 'it''s'");
        assert_eq!(compile_filter("name = \"a'b\"").unwrap(), "`name` = 'a''b'");
    }

    #[test]
    fn test_rejects_injection_and_garbage() {
        assert!(compile_filter("a = 1; DROP TABLE t").is_err());
        assert!(compile_filter("a = (1").is_err());
        assert!(compile_filter("a = 'open").is_err());
        assert!(compile_filter("a 1").is_err());
        assert!(compile_filter("").is_err());
    }

    #[test]
    fn test_compile_filters_skips_blank() {
        assert_eq!(compile_filters(&[]).unwrap(), " WHERE 1=1");
        let filters = vec!["a = 1".to_string(), " ".to_string(), "b < 2".to_string()];
        assert_eq!(
            compile_filters(&filters).unwrap(),
            " WHERE 1=1 AND (`a` = 1) AND (`b` < 2)"
        );
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(parse_sort(&[]).unwrap(), "");
        assert_eq!(
            parse_sort(&["name:desc,age".to_string()]).unwrap(),
            " ORDER BY NAME DESC, AGE ASC"
        );
        assert!(parse_sort(&["name:sideways".to_string()]).is_err());
        assert!(parse_sort(&["1;drop".to_string()]).is_err());
    }

    #[test]
    fn test_parse_group_and_fields() {
        assert_eq!(parse_group(&["a, b".to_string()]).unwrap(), " GROUP BY A, B");
        assert_eq!(validate_fields("").unwrap(), "*");
        assert_eq!(validate_fields("id, name").unwrap(), "id,name");
        assert!(validate_fields("id, (select 1)").is_err());
    }
}
