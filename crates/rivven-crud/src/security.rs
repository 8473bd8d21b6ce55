//! Identifier rendering and literal escaping for rivven-crud.
//!
//! Relation and column names only ever come from schema introspection, never
//! from the caller, so they are concatenated into statement text. They still
//! go through these helpers so that names containing spaces, dots or
//! brackets cannot break the statement structure.
//!
//! Values never pass through here on the execution path; they are bound as
//! driver parameters. `escape_string_literal` only serves the audit rendering.

/// Check whether `name` is a plain SQL identifier.
///
/// A plain identifier is non-empty, at most 128 characters (the SQL Server
/// `sysname` limit), starts with an ASCII letter or underscore and continues
/// with ASCII alphanumerics or underscores. Plain identifiers can be written
/// without quoting.
///
/// # Examples
///
/// ```
/// use rivven_crud::security::is_plain_identifier;
///
/// assert!(is_plain_identifier("orders"));
/// assert!(is_plain_identifier("_staging_2024"));
/// assert!(!is_plain_identifier("order lines"));
/// assert!(!is_plain_identifier("1st"));
/// assert!(!is_plain_identifier("x]; DROP TABLE users--"));
/// ```
pub fn is_plain_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > 128 {
        return false;
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Bracket-quote an identifier, doubling any embedded `]`.
///
/// # Examples
///
/// ```
/// use rivven_crud::security::quote_identifier;
///
/// assert_eq!(quote_identifier("total"), "[total]");
/// assert_eq!(quote_identifier("odd]name"), "[odd]]name]");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Render an identifier bare when it is plain, bracket-quoted otherwise.
///
/// # Examples
///
/// ```
/// use rivven_crud::security::render_identifier;
///
/// assert_eq!(render_identifier("orders"), "orders");
/// assert_eq!(render_identifier("order lines"), "[order lines]");
/// ```
pub fn render_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        quote_identifier(name)
    }
}

/// Escape a string value for a single-quoted SQL literal.
///
/// # Examples
///
/// ```
/// use rivven_crud::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("users"), "users");
/// assert_eq!(escape_string_literal("O'Brien"), "O''Brien");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_identifiers() {
        assert!(is_plain_identifier("users"));
        assert!(is_plain_identifier("my_table"));
        assert!(is_plain_identifier("_private"));
        assert!(is_plain_identifier("TABLE_123"));
    }

    #[test]
    fn test_identifier_length_limit() {
        assert!(is_plain_identifier(&"a".repeat(128)));
        assert!(!is_plain_identifier(&"a".repeat(129)));
    }

    #[test]
    fn test_non_plain_identifiers() {
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("123abc"));
        assert!(!is_plain_identifier("schema.table"));
        assert!(!is_plain_identifier("user name"));
        assert!(!is_plain_identifier("tabl\u{0435}"));
        assert!(!is_plain_identifier("x\nDROP TABLE"));
    }

    #[test]
    fn test_quote_identifier_escapes_closing_bracket() {
        assert_eq!(quote_identifier("a]b"), "[a]]b]");
        assert_eq!(quote_identifier("x]; DROP TABLE t--"), "[x]]; DROP TABLE t--]");
    }

    #[test]
    fn test_render_identifier() {
        assert_eq!(render_identifier("sales"), "sales");
        assert_eq!(render_identifier("Order Details"), "[Order Details]");
    }

    #[test]
    fn test_escape_string_literal() {
        assert_eq!(escape_string_literal(""), "");
        assert_eq!(escape_string_literal("don't"), "don''t");
        assert_eq!(escape_string_literal("' OR '1'='1"), "'' OR ''1''=''1");
    }
}
