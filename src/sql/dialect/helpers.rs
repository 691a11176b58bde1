//! Shared helper functions for SQL dialect implementations.

use super::super::token::{Token, TokenStream};

/// Largest row count MySQL accepts in a LIMIT clause.
pub const MYSQL_MAX_ROWS: u64 = u64::MAX;

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with backticks.
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with single quotes, also escaping backslashes.
pub fn quote_string_backslash(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

// =============================================================================
// Boolean Formatting
// =============================================================================

/// Format boolean as numeric 1/0.
pub fn format_bool_numeric(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Emit LIMIT ... OFFSET ... (standard SQL).
pub fn emit_limit_offset_standard(limit: Option<u64>, offset: Option<u64>) -> TokenStream {
    let mut ts = TokenStream::new();

    if let Some(lim) = limit {
        ts.push(Token::Limit).space().push(Token::Raw(lim.to_string()));
    }

    if let Some(off) = offset {
        if limit.is_some() {
            ts.space();
        }
        ts.push(Token::Offset).space().push(Token::Raw(off.to_string()));
    }

    ts
}

/// Emit LIMIT ... OFFSET ... where an OFFSET always carries a LIMIT.
pub fn emit_limit_offset_mysql(limit: Option<u64>, offset: Option<u64>) -> TokenStream {
    match (limit, offset) {
        (None, Some(_)) => emit_limit_offset_standard(Some(MYSQL_MAX_ROWS), offset),
        _ => emit_limit_offset_standard(limit, offset),
    }
}
