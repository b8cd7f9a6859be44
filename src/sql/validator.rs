//! Read-only SQL validation
//!
//! A candidate statement is accepted when it parses under the PostgreSQL
//! dialect, is a single statement, and is a `SELECT` (plain or CTE-wrapped).
//! Writes, DDL and multi-statement input are rejected before they can reach
//! the executor.

use crate::core::{FinsightError, Result};
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Dialect-level validator for generated SQL
#[derive(Debug, Clone, Default)]
pub struct SqlValidator;

impl SqlValidator {
    /// Create a validator
    pub fn new() -> Self {
        Self
    }

    /// Validate a candidate statement.
    ///
    /// A trailing semicolon is tolerated; a second statement is not.
    pub fn validate(&self, sql: &str) -> Result<()> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(FinsightError::Validation {
                message: "empty statement".to_string(),
            });
        }

        let statements =
            Parser::parse_sql(&PostgreSqlDialect {}, trimmed).map_err(|e| {
                FinsightError::Validation {
                    message: format!("syntax error: {e}"),
                }
            })?;

        match statements.len() {
            0 => Err(FinsightError::Validation {
                message: "no statement found".to_string(),
            }),
            1 => self.check_read_only(&statements[0]),
            n => Err(FinsightError::Validation {
                message: format!("multi-statement input not allowed ({n} statements)"),
            }),
        }
    }

    fn check_read_only(&self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Query(query) => {
                // SELECT INTO writes a table despite parsing as a query
                if let SetExpr::Select(select) = query.body.as_ref() {
                    if select.into.is_some() {
                        return Err(FinsightError::Validation {
                            message: "SELECT INTO is not read-only".to_string(),
                        });
                    }
                }
                Ok(())
            },
            other => Err(FinsightError::Validation {
                message: format!("only SELECT statements are allowed, got {}", kind_of(other)),
            }),
        }
    }
}

/// First keyword of the rendered statement, stable across parser versions
fn kind_of(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_select() {
        let validator = SqlValidator::new();
        assert!(validator
            .validate("SELECT account, SUM(amt) FROM fact_revenue GROUP BY account")
            .is_ok());
    }

    #[test]
    fn test_accepts_trailing_semicolon() {
        let validator = SqlValidator::new();
        assert!(validator.validate("SELECT id FROM fact_profit;").is_ok());
    }

    #[test]
    fn test_accepts_cte_wrapped_select() {
        let validator = SqlValidator::new();
        assert!(validator
            .validate(
                "WITH monthly AS (SELECT acct_period, SUM(amt) AS total FROM fact_expense \
                 GROUP BY acct_period) SELECT * FROM monthly ORDER BY acct_period"
            )
            .is_ok());
    }

    #[test]
    fn test_rejects_syntax_error() {
        let validator = SqlValidator::new();
        let err = validator.validate("SELEKT * FROM fact_profit").unwrap_err();
        assert!(matches!(err, FinsightError::Validation { .. }));
    }

    #[test]
    fn test_rejects_writes_and_ddl() {
        let validator = SqlValidator::new();
        for sql in [
            "DROP TABLE fact_profit;",
            "DELETE FROM fact_profit",
            "INSERT INTO fact_profit VALUES (1)",
            "UPDATE fact_profit SET amt = 0",
            "CREATE TABLE t (id int)",
            "TRUNCATE fact_profit",
        ] {
            let err = validator.validate(sql).unwrap_err();
            assert!(matches!(err, FinsightError::Validation { .. }), "accepted: {sql}");
        }
    }

    #[test]
    fn test_rejects_multi_statement() {
        let validator = SqlValidator::new();
        let err = validator
            .validate("SELECT 1; SELECT 2")
            .unwrap_err();
        assert!(err.to_string().contains("multi-statement"));
    }

    #[test]
    fn test_rejects_select_into() {
        let validator = SqlValidator::new();
        assert!(validator
            .validate("SELECT * INTO copy_table FROM fact_profit")
            .is_err());
    }

    #[test]
    fn test_rejects_empty() {
        let validator = SqlValidator::new();
        assert!(validator.validate("   ").is_err());
    }
}
