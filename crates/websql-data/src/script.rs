//! SQL script scanning
//!
//! Statement splitting and placeholder counting both ignore characters inside
//! string literals, quoted identifiers, and comments.

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    Quoted(char),
    Escaped(char),
    LineComment,
    BlockComment,
}

/// Yields every char of `sql` with a flag telling whether it is live SQL
fn scan(sql: &str) -> Vec<(char, bool)> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Code => match c {
                '\'' | '"' | '`' => {
                    state = State::Quoted(c);
                    out.push((c, false));
                }
                '-' if next == Some('-')
                    && chars.get(i + 2).is_none_or(|c| c.is_whitespace()) =>
                {
                    state = State::LineComment;
                    out.push((c, false));
                }
                '#' => {
                    state = State::LineComment;
                    out.push((c, false));
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment;
                    out.push((c, false));
                    out.push(('*', false));
                    i += 1;
                }
                _ => out.push((c, true)),
            },
            State::Quoted(q) => {
                out.push((c, false));
                if c == '\\' {
                    state = State::Escaped(q);
                } else if c == q {
                    state = State::Code;
                }
            }
            State::Escaped(q) => {
                out.push((c, false));
                state = State::Quoted(q);
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push((c, true));
                } else {
                    out.push((c, false));
                }
            }
            State::BlockComment => {
                out.push((c, false));
                if c == '*' && next == Some('/') {
                    out.push(('/', false));
                    i += 1;
                    state = State::Code;
                }
            }
        }
        i += 1;
    }
    out
}

/// Splits a script on `;` outside literals and comments
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for (c, live) in scan(script) {
        if live && c == ';' {
            statements.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

/// Trims a statement and drops blank and full-line `-- ` comment lines
pub fn normalize_statement(statement: &str) -> String {
    statement
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-- ") && *line != "--")
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number of positional `?` placeholders outside literals and comments
pub fn count_placeholders(statement: &str) -> usize {
    scan(statement)
        .into_iter()
        .filter(|(c, live)| *live && *c == '?')
        .count()
}

/// Statements whose keyword prefix marks them as returning rows
pub fn is_query(statement: &str) -> bool {
    let head: String = statement
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(head.as_str(), "SELECT" | "SHOW" | "DESCRIBE" | "EXPLAIN")
}

/// Plain text replacement of `tokens` in a single left to right pass.
/// At each position the longest matching key wins, so `$1` cannot clobber
/// `$10`, and replacement values are never scanned again.
pub fn substitute(text: &str, tokens: &[(String, String)]) -> String {
    let mut ordered: Vec<&(String, String)> = tokens.iter().filter(|(k, _)| !k.is_empty()).collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        match ordered.iter().find(|(k, _)| rest.starts_with(k.as_str())) {
            Some((k, v)) => {
                out.push_str(v);
                rest = &rest[k.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}
