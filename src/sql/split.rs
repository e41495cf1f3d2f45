//! Splits a SQL blob into individual statements.
//!
//! Both the parser and the execution engine need this: migrations run one
//! statement at a time so a failure can be pinned to the statement that
//! caused it. The scan respects single-quoted strings, quoted identifiers,
//! dollar-quoted bodies and both comment forms.

/// Splits on top-level semicolons. Empty statements are dropped; the
/// returned strings are trimmed and keep no trailing semicolon.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut stmts = Vec::new();
    let mut current = String::new();
    let mut chars = sql.char_indices().peekable();

    #[derive(PartialEq)]
    enum State {
        Normal,
        SingleQuote,
        DoubleQuote,
        LineComment,
        BlockComment(u32),
        Dollar(String),
    }
    let mut state = State::Normal;

    while let Some((i, c)) = chars.next() {
        match &state {
            State::Normal => match c {
                ';' => {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        stmts.push(trimmed.to_string());
                    }
                    current.clear();
                    continue;
                }
                '\'' => {
                    state = State::SingleQuote;
                }
                '"' => {
                    state = State::DoubleQuote;
                }
                '-' if matches!(chars.peek(), Some((_, '-'))) => {
                    state = State::LineComment;
                }
                '/' if matches!(chars.peek(), Some((_, '*'))) => {
                    state = State::BlockComment(1);
                }
                '$' => {
                    // dollar-quote tag: $tag$ or $$
                    if let Some(tag) = dollar_tag(&sql[i..]) {
                        // copy the opening tag and skip past it
                        current.push_str(&tag);
                        for _ in 0..tag.len() - 1 {
                            chars.next();
                        }
                        state = State::Dollar(tag);
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuote => {
                if c == '\'' {
                    // doubled quote stays inside the string
                    if matches!(chars.peek(), Some((_, '\''))) {
                        current.push(c);
                        let (_, q) = chars.next().unwrap();
                        current.push(q);
                        continue;
                    }
                    state = State::Normal;
                }
            }
            State::DoubleQuote => {
                if c == '"' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                let depth = *depth;
                if c == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    chars.next();
                    current.push_str("*/");
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    continue;
                }
                if c == '/' && matches!(chars.peek(), Some((_, '*'))) {
                    chars.next();
                    current.push_str("/*");
                    state = State::BlockComment(depth + 1);
                    continue;
                }
            }
            State::Dollar(tag) => {
                if c == '$' && sql[i..].starts_with(tag.as_str()) {
                    let tag = tag.clone();
                    current.push_str(&tag);
                    for _ in 0..tag.len() - 1 {
                        chars.next();
                    }
                    state = State::Normal;
                    continue;
                }
            }
        }
        current.push(c);
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        stmts.push(trimmed.to_string());
    }
    stmts
}

/// Returns the full opening tag (`$$`, `$fn$`, …) when the text starts a
/// dollar quote. Tags must not start with a digit, which keeps `$1`
/// placeholders out.
fn dollar_tag(rest: &str) -> Option<String> {
    let mut iter = rest.char_indices().skip(1);
    let mut first = true;
    for (j, c) in &mut iter {
        if c == '$' {
            return Some(rest[..=j].to_string());
        }
        let ok = if first {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if !ok {
            return None;
        }
        first = false;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons() {
        let stmts = split_statements("CREATE TABLE a (x INT);\nCREATE TABLE b (y INT);");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "CREATE TABLE a (x INT)");
    }

    #[test]
    fn semicolon_in_string_is_data() {
        let stmts = split_statements("ALTER TABLE t ALTER COLUMN c SET DEFAULT 'a;b'; SELECT 1");
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("'a;b'"));
    }

    #[test]
    fn dollar_quoted_body_survives() {
        let sql = "CREATE FUNCTION f() RETURNS INT LANGUAGE SQL AS $$ SELECT 1; SELECT 2; $$; COMMIT";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("SELECT 1; SELECT 2;"));
        assert_eq!(stmts[1], "COMMIT");
    }

    #[test]
    fn tagged_dollar_quote() {
        let sql = "CREATE FUNCTION f() RETURNS INT LANGUAGE SQL AS $fn$ SELECT ';' $fn$";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn comments_hide_semicolons() {
        let stmts = split_statements("CREATE TABLE a (x INT) -- trailing; note\n; /* a;b */ COMMIT");
        assert_eq!(stmts.len(), 2);
    }
}
