//! Split migration scripts into individual statements.
//!
//! Semicolons only end a statement outside of string literals, quoted
//! identifiers, comments and dollar-quoted bodies, so PL/pgSQL functions
//! survive intact.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    SingleQuoted,
    /// `E'...'` literal, where a backslash escapes the next character.
    EscapeQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
    DollarQuoted,
}

/// Split SQL text into statements, in order, without trailing semicolons.
///
/// Fragments with nothing outside of comments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    // Whether `current` holds anything besides whitespace and comments.
    let mut has_code = false;
    let mut mode = Mode::Code;
    let mut block_depth = 0usize;
    let mut dollar_tag = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match mode {
            Mode::Code => match c {
                ';' => {
                    if has_code {
                        statements.push(current.trim().to_string());
                    }
                    current.clear();
                    has_code = false;
                    i += 1;
                    continue;
                }
                '-' if next == Some('-') => {
                    mode = Mode::LineComment;
                    current.push_str("--");
                    i += 2;
                    continue;
                }
                '/' if next == Some('*') => {
                    mode = Mode::BlockComment;
                    block_depth = 1;
                    current.push_str("/*");
                    i += 2;
                    continue;
                }
                _ => {
                    if !c.is_whitespace() {
                        has_code = true;
                    }
                    match c {
                        '\'' if is_escape_prefix(&chars, i) => mode = Mode::EscapeQuoted,
                        '\'' => mode = Mode::SingleQuoted,
                        '"' => mode = Mode::DoubleQuoted,
                        '$' => {
                            if let Some(tag) = dollar_tag_at(&chars, i) {
                                i += tag.chars().count();
                                current.push_str(&tag);
                                dollar_tag = tag;
                                mode = Mode::DollarQuoted;
                                continue;
                            }
                        }
                        _ => {}
                    }
                }
            },
            // A doubled quote closes and reopens, which lands in the same place.
            Mode::SingleQuoted if c == '\'' => mode = Mode::Code,
            Mode::EscapeQuoted => {
                if c == '\\' || (c == '\'' && next == Some('\'')) {
                    current.push(c);
                    current.extend(next);
                    i += 2;
                    continue;
                }
                if c == '\'' {
                    mode = Mode::Code;
                }
            }
            Mode::DoubleQuoted if c == '"' => mode = Mode::Code,
            Mode::LineComment if c == '\n' => mode = Mode::Code,
            Mode::BlockComment => {
                if c == '*' && next == Some('/') {
                    block_depth -= 1;
                    if block_depth == 0 {
                        mode = Mode::Code;
                    }
                    current.push_str("*/");
                    i += 2;
                    continue;
                }
                if c == '/' && next == Some('*') {
                    block_depth += 1;
                    current.push_str("/*");
                    i += 2;
                    continue;
                }
            }
            Mode::DollarQuoted if c == '$' && starts_with_at(&chars, i, &dollar_tag) => {
                i += dollar_tag.chars().count();
                current.push_str(&dollar_tag);
                dollar_tag.clear();
                mode = Mode::Code;
                continue;
            }
            _ => {}
        }

        current.push(c);
        i += 1;
    }

    if has_code {
        statements.push(current.trim().to_string());
    }
    statements
}

/// Whether the quote at `quote` opens an `E'...'` literal: it follows a
/// lone `E` or `e` that is not the tail of an identifier.
fn is_escape_prefix(chars: &[char], quote: usize) -> bool {
    if quote == 0 || !matches!(chars[quote - 1], 'E' | 'e') {
        return false;
    }
    match quote.checked_sub(2).map(|j| chars[j]) {
        Some(prev) => !(prev.is_alphanumeric() || prev == '_' || prev == '$'),
        None => true,
    }
}

/// The `$tag$` opening at `start`, if any. Positional parameters (`$1`) are
/// not tags.
fn dollar_tag_at(chars: &[char], start: usize) -> Option<String> {
    let mut end = start + 1;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
        end += 1;
    }

    if end >= chars.len() || chars[end] != '$' {
        return None;
    }
    if chars.get(start + 1).is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }

    Some(chars[start..=end].iter().collect())
}

fn starts_with_at(chars: &[char], start: usize, tag: &str) -> bool {
    let mut idx = start;
    for expected in tag.chars() {
        if chars.get(idx) != Some(&expected) {
            return false;
        }
        idx += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_statements() {
        let stmts = split_statements("CREATE TABLE t(x int); INSERT INTO t VALUES (1);");
        assert_eq!(stmts, vec!["CREATE TABLE t(x int)", "INSERT INTO t VALUES (1)"]);
    }

    #[test]
    fn test_last_statement_without_semicolon() {
        let stmts = split_statements("DROP TABLE a;\nDROP TABLE b");
        assert_eq!(stmts, vec!["DROP TABLE a", "DROP TABLE b"]);
    }

    #[test]
    fn test_semicolon_inside_literals() {
        let sql = "INSERT INTO notes VALUES ('a;b', 'it''s; fine'); SELECT \"odd;name\" FROM x;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO notes VALUES ('a;b', 'it''s; fine')");
        assert_eq!(stmts[1], "SELECT \"odd;name\" FROM x");
    }

    #[test]
    fn test_semicolon_inside_comments() {
        let sql = "-- drop it; later\nCREATE TABLE t(x int); /* a; /* nested; */ b */ SELECT 1;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].ends_with("CREATE TABLE t(x int)"));
        assert!(stmts[1].ends_with("SELECT 1"));
    }

    #[test]
    fn test_comment_only_fragments_are_dropped() {
        let sql = "-- header\n-- more\n;\n/* nothing */;\nSELECT 1;\n-- trailer\n";
        assert_eq!(split_statements(sql), vec!["SELECT 1"]);
    }

    #[test]
    fn test_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION touch() RETURNS trigger AS $body$
BEGIN
    NEW.updated_at := now();
    RETURN NEW;
END;
$body$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("NEW.updated_at := now();"));
        assert!(stmts[0].ends_with("$body$ LANGUAGE plpgsql"));
        assert_eq!(stmts[1], "SELECT 3");
    }

    #[test]
    fn test_anonymous_dollar_quotes() {
        let sql = "DO $$ BEGIN PERFORM 1; END $$; SELECT 2;";
        let stmts = split_statements(sql);
        assert_eq!(stmts, vec!["DO $$ BEGIN PERFORM 1; END $$", "SELECT 2"]);
    }

    #[test]
    fn test_positional_parameter_is_not_a_tag() {
        let sql = "PREPARE p AS SELECT $1; EXECUTE p(1);";
        assert_eq!(split_statements(sql).len(), 2);
    }

    #[test]
    fn test_empty_script() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("  \n ; ;").is_empty());
    }

    #[test]
    fn test_statement_wrapped_in_block_comments() {
        let sql = "/* create */ CREATE TABLE t(x int) /* done */;\n/* only a note */;";
        assert_eq!(
            split_statements(sql),
            vec!["/* create */ CREATE TABLE t(x int) /* done */"]
        );
    }

    #[test]
    fn test_trailing_comment_after_last_statement() {
        let sql = "SELECT 1 -- the answer\n/* end */";
        assert_eq!(split_statements(sql), vec!["SELECT 1 -- the answer\n/* end */"]);
    }

    #[test]
    fn test_escape_string_literals() {
        let sql = r"INSERT INTO n VALUES (E'it\'s; fine'); SELECT 1;";
        assert_eq!(
            split_statements(sql),
            vec![r"INSERT INTO n VALUES (E'it\'s; fine')", "SELECT 1"]
        );

        let sql = r"SELECT e'a\\'; SELECT E'x''; y'; SELECT 2";
        assert_eq!(
            split_statements(sql),
            vec![r"SELECT e'a\\'", "SELECT E'x''; y'", "SELECT 2"]
        );
    }

    #[test]
    fn test_typed_literal_is_not_an_escape_string() {
        // `date` ends in an e, but the literal after it is a standard string.
        let sql = r"SELECT date'\'; SELECT 2;";
        assert_eq!(split_statements(sql), vec![r"SELECT date'\'", "SELECT 2"]);
    }
}
