//! Test utilities for SQL emission validation.
//!
//! Provides helpers for validating that emitted SQL is syntactically correct
//! using sqlparser-rs for roundtrip validation.

use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

/// Validates that a SQL string is syntactically valid MySQL.
///
/// # Example
///
/// ```ignore
/// use crate::sql::test_utils::validate_sql;
///
/// validate_sql("SELECT * FROM users WHERE id = ?").unwrap();
/// ```
pub fn validate_sql(sql: &str) -> Result<(), String> {
    Parser::parse_sql(&MySqlDialect {}, sql)
        .map(|_| ())
        .map_err(|e| format!("Invalid SQL for MySQL: {}\nSQL: {}", e, sql))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_sql() {
        validate_sql("SELECT * FROM users").unwrap();
        validate_sql("SELECT `t0`.`id` AS `t0$id` FROM `users` AS `t0` WHERE `t0`.`age` > ?")
            .unwrap();
    }

    #[test]
    fn test_validate_invalid_sql() {
        let result = validate_sql("SELEC * FORM users");
        assert!(result.is_err());
    }
}
