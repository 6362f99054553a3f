//! Best-effort rewrite of `REPLACE INTO ... VALUES (...)` statements whose
//! string literals were broken by the dump writer.
//!
//! The value list is split on commas, string literals that a comma cut apart
//! are glued back together, and every non-empty literal is re-encoded from
//! its raw bytes so mis-escaped characters cannot break the statement again.
//! How the bytes are written back is dialect specific, see
//! [`crate::backup::dump::database::Database::render_text_literal`].

const REPLACE_INTO: &str = "REPLACE INTO";
const VALUES: &str = "VALUES";

/// One comma-separated item of a value list, with tuple punctuation pulled
/// out into flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueToken {
    pub opens_tuple: bool,
    pub text: String,
    pub closes_tuple: bool,
}

impl ValueToken {
    fn parse(raw: &str) -> Self {
        let mut text = raw.trim();
        let opens_tuple = text.starts_with('(');
        if opens_tuple {
            text = text[1..].trim_start();
        }
        let closes_tuple = text.ends_with(')') && !is_quoted_literal(text);
        if closes_tuple {
            text = text[..text.len() - 1].trim_end();
        }
        Self {
            opens_tuple,
            text: text.to_string(),
            closes_tuple,
        }
    }

    fn render(&self) -> String {
        format!(
            "{}{}{}",
            if self.opens_tuple { "(" } else { "" },
            self.text,
            if self.closes_tuple { ")" } else { "" },
        )
    }
}

pub fn is_replace_into(statement: &str) -> bool {
    let statement = statement.trim_start().as_bytes();
    statement.len() >= REPLACE_INTO.len()
        && statement[..REPLACE_INTO.len()].eq_ignore_ascii_case(REPLACE_INTO.as_bytes())
}

/// Produces the repaired form of a failing `REPLACE INTO` statement, or `None`
/// when the statement is not of that shape. `render` writes the bytes of one
/// re-encoded literal.
pub fn repair_replace_statement<F: Fn(&[u8]) -> String>(
    statement: &str,
    delimiter: &str,
    render: F,
) -> Option<String> {
    if !is_replace_into(statement) {
        return None;
    }
    let statement = statement.trim();
    let values_end = find_values_keyword(statement)?;
    let (head, body) = statement.split_at(values_end);

    let body = body.trim();
    let body = body.strip_suffix(delimiter).unwrap_or(body).trim_end();
    if !body.starts_with('(') || !body.ends_with(')') {
        return None;
    }

    let tokens = split_value_tokens(body)
        .into_iter()
        .map(|mut token| {
            token.text = encode_literal(&token.text, &render);
            token
        })
        .map(|token| token.render())
        .collect::<Vec<_>>();

    Some(format!("{} {}{}", head.trim_end(), tokens.join(","), delimiter))
}

/// Splits a value list such as `('a,b', 1),(2, 'c')` into tokens, merging
/// pieces of a string literal that a comma split apart.
pub fn split_value_tokens(body: &str) -> Vec<ValueToken> {
    let mut merged: Vec<String> = Vec::new();
    for piece in body.split(',') {
        match merged.last_mut() {
            Some(last) if is_unterminated_literal(last) => {
                last.push(',');
                last.push_str(piece);
            }
            _ => merged.push(piece.to_string()),
        }
    }
    merged.iter().map(|raw| ValueToken::parse(raw)).collect()
}

/// `'...'` with a non-empty body is handed to `render`; anything else is
/// returned unchanged.
pub fn encode_literal<F: Fn(&[u8]) -> String>(text: &str, render: F) -> String {
    if !is_quoted_literal(text) || text == "''" {
        return text.to_string();
    }
    render(text[1..text.len() - 1].as_bytes())
}

/// `CONVERT(0x<hex> USING utf8)`
pub fn convert_using_utf8(bytes: &[u8]) -> String {
    format!("CONVERT(0x{} USING utf8)", hex::encode(bytes))
}

/// `CAST(X'<hex>' AS TEXT)`
pub fn cast_blob_as_text(bytes: &[u8]) -> String {
    format!("CAST(X'{}' AS TEXT)", hex::encode(bytes))
}

fn is_quoted_literal(text: &str) -> bool {
    text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') && !is_unterminated_literal(text)
}

/// A piece that starts a string literal without closing it. Backslash-escaped
/// quotes do not count towards the balance.
fn is_unterminated_literal(piece: &str) -> bool {
    let piece = piece.trim_start().trim_start_matches('(').trim_start();
    if !piece.starts_with('\'') {
        return false;
    }
    let mut quotes = 0usize;
    let mut escaped = false;
    for c in piece.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '\'' => quotes += 1,
            _ => {}
        }
    }
    quotes % 2 == 1
}

fn find_values_keyword(statement: &str) -> Option<usize> {
    let upper = statement.to_ascii_uppercase();
    let mut from = 0;
    while let Some(pos) = upper[from..].find(VALUES) {
        let start = from + pos;
        let end = start + VALUES.len();
        let before_ok = start == 0 || !is_ident_byte(upper.as_bytes()[start - 1]);
        let after_ok = end == upper.len() || !is_ident_byte(upper.as_bytes()[end]);
        if before_ok && after_ok {
            return Some(end);
        }
        from = end;
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'`'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair_mysql(statement: &str, delimiter: &str) -> Option<String> {
        repair_replace_statement(statement, delimiter, convert_using_utf8)
    }

    #[test]
    fn test_is_replace_into() {
        assert!(is_replace_into("REPLACE INTO t VALUES (1);"));
        assert!(is_replace_into("  replace into t values (1);"));
        assert!(!is_replace_into("INSERT INTO t VALUES (1);"));
        assert!(!is_replace_into("REPLACE"));
    }

    #[test]
    fn test_comma_inside_literal_is_recombined() {
        let repaired = repair_mysql("REPLACE INTO t VALUES ('a,b', 1);", ";").unwrap();
        assert_eq!(
            repaired,
            "REPLACE INTO t VALUES (CONVERT(0x612c62 USING utf8),1);"
        );
    }

    #[test]
    fn test_empty_literal_is_kept() {
        let repaired = repair_mysql("REPLACE INTO t VALUES ('', NULL);", ";").unwrap();
        assert_eq!(repaired, "REPLACE INTO t VALUES ('',NULL);");
    }

    #[test]
    fn test_multiple_tuples_and_column_list() {
        let repaired = repair_replace_statement(
            "REPLACE INTO `t` (`a`,`b`) VALUES (1,'x'),(2,'y,z');",
            ";",
            convert_using_utf8,
        )
        .unwrap();
        assert_eq!(
            repaired,
            "REPLACE INTO `t` (`a`,`b`) VALUES (1,CONVERT(0x78 USING utf8)),(2,CONVERT(0x792c7a USING utf8));"
        );
    }

    #[test]
    fn test_literal_with_parentheses_and_commas() {
        let tokens = split_value_tokens("('smile :), ok', 3)");
        assert_eq!(
            tokens,
            vec![
                ValueToken {
                    opens_tuple: true,
                    text: "'smile :), ok'".to_string(),
                    closes_tuple: false,
                },
                ValueToken {
                    opens_tuple: false,
                    text: "3".to_string(),
                    closes_tuple: true,
                },
            ]
        );
    }

    #[test]
    fn test_escaped_quote_does_not_close_literal() {
        let tokens = split_value_tokens("('it\\'s, fine',2)");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "'it\\'s, fine'");
    }

    #[test]
    fn test_multibyte_literal_is_hex_encoded_bytewise() {
        assert_eq!(encode_literal("'é'", convert_using_utf8), "CONVERT(0xc3a9 USING utf8)");
        assert_eq!(encode_literal("42", convert_using_utf8), "42");
        assert_eq!(encode_literal("''", convert_using_utf8), "''");
        assert_eq!(encode_literal("'", convert_using_utf8), "'");
    }

    #[test]
    fn test_sqlite_rendering() {
        let repaired =
            repair_replace_statement("REPLACE INTO t VALUES ('a,b', 1);", ";", cast_blob_as_text)
                .unwrap();
        assert_eq!(repaired, "REPLACE INTO t VALUES (CAST(X'612c62' AS TEXT),1);");
    }

    #[test]
    fn test_custom_delimiter_terminator() {
        let repaired = repair_mysql("REPLACE INTO t VALUES ('a')$$", "$$").unwrap();
        assert_eq!(repaired, "REPLACE INTO t VALUES (CONVERT(0x61 USING utf8))$$");
    }

    #[test]
    fn test_unrepairable_shapes() {
        assert_eq!(repair_mysql("INSERT INTO t VALUES ('a');", ";"), None);
        assert_eq!(repair_mysql("REPLACE INTO t SELECT * FROM u;", ";"), None);
        assert_eq!(repair_mysql("REPLACE INTO t VALUES 1;", ";"), None);
    }

    #[test]
    fn test_values_inside_identifier_is_not_keyword() {
        let repaired =
            repair_mysql("REPLACE INTO my_values VALUES ('q');", ";").unwrap();
        assert_eq!(repaired, "REPLACE INTO my_values VALUES (CONVERT(0x71 USING utf8));");
    }
}
