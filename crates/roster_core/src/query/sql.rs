//! Specification and sort rendering to parameterized SQLite fragments.
//!
//! Every leaf renders as `IFNULL(<comparison>, 0)` so that NULL collapses to
//! false before `NOT` is applied. Requires `PRAGMA case_sensitive_like = ON`
//! on the connection for `LIKE` to match in-memory evaluation.

use super::field::{EntityField, Value};
use super::page::{Direction, Sort};
use super::spec::{Condition, Operand, Operator, Specification};
use rusqlite::types::Value as SqlValue;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SqlClause {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Renders `spec` as a boolean expression suitable after `WHERE`.
pub(crate) fn where_clause<F: EntityField>(spec: &Specification<F>) -> SqlClause {
    let mut clause = SqlClause::default();
    write_spec(spec, &mut clause);
    clause
}

fn write_spec<F: EntityField>(spec: &Specification<F>, out: &mut SqlClause) {
    match spec {
        Specification::All => out.sql.push('1'),
        Specification::Leaf(condition) => write_condition(condition, out),
        Specification::And(left, right) => write_binary(left, "AND", right, out),
        Specification::Or(left, right) => write_binary(left, "OR", right, out),
        Specification::Not(inner) => {
            out.sql.push_str("(NOT ");
            write_spec(inner, out);
            out.sql.push(')');
        }
    }
}

fn write_binary<F: EntityField>(
    left: &Specification<F>,
    keyword: &str,
    right: &Specification<F>,
    out: &mut SqlClause,
) {
    out.sql.push('(');
    write_spec(left, out);
    out.sql.push(' ');
    out.sql.push_str(keyword);
    out.sql.push(' ');
    write_spec(right, out);
    out.sql.push(')');
}

fn write_condition<F: EntityField>(condition: &Condition<F>, out: &mut SqlClause) {
    let column = condition.field().column();
    match (condition.op(), condition.operand()) {
        (Operator::IsNull, _) => out.sql.push_str(&format!("({column} IS NULL)")),
        (Operator::IsNotNull, _) => out.sql.push_str(&format!("({column} IS NOT NULL)")),
        (Operator::In, Operand::List(values)) if values.is_empty() => out.sql.push('0'),
        (Operator::In, Operand::List(values)) => {
            let placeholders = vec!["?"; values.len()].join(", ");
            out.sql
                .push_str(&format!("IFNULL({column} IN ({placeholders}), 0)"));
            out.params.extend(values.iter().map(Value::to_sql));
        }
        (Operator::StartingWith, Operand::Single(Value::Text(prefix))) => {
            out.sql
                .push_str(&format!("IFNULL({column} LIKE ? ESCAPE '\\', 0)"));
            out.params
                .push(SqlValue::Text(format!("{}%", escape_like(prefix))));
        }
        (Operator::Containing, Operand::Single(Value::Text(needle))) => {
            out.sql
                .push_str(&format!("IFNULL({column} LIKE ? ESCAPE '\\', 0)"));
            out.params
                .push(SqlValue::Text(format!("%{}%", escape_like(needle))));
        }
        (op, Operand::Single(value)) => match comparison_symbol(op) {
            Some(symbol) => {
                out.sql
                    .push_str(&format!("IFNULL({column} {symbol} ?, 0)"));
                out.params.push(value.to_sql());
            }
            None => out.sql.push('0'),
        },
        // Only reachable for conditions that skipped validation.
        _ => out.sql.push('0'),
    }
}

fn comparison_symbol(op: Operator) -> Option<&'static str> {
    match op {
        Operator::Equals => Some("="),
        Operator::NotEquals => Some("<>"),
        Operator::GreaterThan => Some(">"),
        Operator::GreaterThanEqual => Some(">="),
        Operator::LessThan => Some("<"),
        Operator::LessThanEqual => Some("<="),
        Operator::Like => Some("LIKE"),
        _ => None,
    }
}

/// Renders `ORDER BY ...`, always ending with the id ascending.
pub(crate) fn order_clause<F: EntityField>(sort: &Sort<F>) -> String {
    let mut terms: Vec<String> = sort
        .orders()
        .iter()
        .map(|order| {
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            format!("{} {direction}", order.field.column())
        })
        .collect();
    if !sort.orders().iter().any(|order| order.field == F::ID) {
        terms.push(format!("{} ASC", F::ID.column()));
    }
    format!("ORDER BY {}", terms.join(", "))
}

/// Escapes `LIKE` metacharacters for use with `ESCAPE '\'`.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
