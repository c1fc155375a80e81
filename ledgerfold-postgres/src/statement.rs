//! SQL statement construction.
//!
//! Statements are assembled with [`QueryBuilder`] and keep a copy of their
//! bound values so the exact query shape can be checked before anything
//! reaches the database.

use std::fmt;

use chrono::{DateTime, Utc};
use ledgerfold_core::metadata::Matcher;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::PgArguments,
    query::Query,
    query_builder::Separated,
    types::Json,
};

/// A value bound to a statement parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    BigInt(i64),
    Text(String),
    Uuid(uuid::Uuid),
    /// Bound as `jsonb`.
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    fn push_to(self, row: &mut Separated<'_, 'static, Postgres, &'static str>) {
        match self {
            Self::BigInt(value) => row.push_bind(value),
            Self::Text(value) => row.push_bind(value),
            Self::Uuid(value) => row.push_bind(value),
            Self::Json(value) => row.push_bind(Json(value)),
            Self::Timestamp(value) => row.push_bind(value),
        };
    }
}

/// A built statement and the values bound to it, in placeholder order.
pub struct Statement {
    builder: QueryBuilder<'static, Postgres>,
    params: Vec<SqlValue>,
}

impl Statement {
    fn new(sql: impl Into<String>) -> Self {
        Self {
            builder: QueryBuilder::new(sql),
            params: Vec::new(),
        }
    }

    /// The SQL text, with `$n` placeholders.
    #[must_use]
    pub fn sql(&self) -> &str {
        self.builder.sql()
    }

    #[must_use]
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    fn push(&mut self, sql: &str) -> &mut Self {
        self.builder.push(sql);
        self
    }

    fn push_bind_i64(&mut self, value: i64) -> &mut Self {
        self.builder.push_bind(value);
        self.params.push(SqlValue::BigInt(value));
        self
    }

    fn push_bind_json(&mut self, value: &serde_json::Value) -> &mut Self {
        self.builder.push_bind(Json(value.clone()));
        self.params.push(SqlValue::Json(value.clone()));
        self
    }

    /// Prepare the statement for execution with every value bound.
    pub(crate) fn query(&mut self) -> Query<'_, Postgres, PgArguments> {
        self.builder.build()
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql())
            .field("params", &self.params)
            .finish()
    }
}

/// Quote an identifier such as a table name.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn table_exists(table: &str) -> Statement {
    let mut statement = Statement::new(
        "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = \
         current_schema() AND table_name = ",
    );
    statement.builder.push_bind(table.to_owned());
    statement.params.push(SqlValue::Text(table.to_owned()));
    statement.push(")");
    statement
}

/// One multi-row insert; `values` holds `rows × columns.len()` entries in row
/// order.
pub(crate) fn insert(table: &str, columns: &[&str], values: Vec<SqlValue>) -> Statement {
    let mut statement = Statement::new(format!(
        "INSERT INTO {} ({}) ",
        quote_ident(table),
        columns.join(", ")
    ));

    let width = columns.len().max(1);
    statement
        .builder
        .push_values(values.chunks(width), |mut row, chunk| {
            for value in chunk {
                value.clone().push_to(&mut row);
            }
        });
    statement.params = values;
    statement
}

/// Columns of the log table a load reads and filters on.
pub(crate) struct LoadColumns<'a> {
    pub position: &'a str,
    pub metadata: &'a str,
    pub select: &'a [&'a str],
}

/// Position-ordered load, optionally filtered by metadata and bounded.
///
/// Values are bound in order: matcher values, then `from_position`, then
/// `limit`.
pub(crate) fn load(
    table: &str,
    columns: &LoadColumns<'_>,
    from_position: i64,
    limit: Option<u32>,
    matcher: Option<&Matcher>,
) -> Statement {
    let mut select = Vec::with_capacity(columns.select.len() + 1);
    select.push(columns.position);
    select.extend(columns.select.iter().copied().filter(|c| *c != columns.position));

    let mut statement = Statement::new(format!(
        "SELECT {} FROM {} WHERE ",
        select.join(", "),
        quote_ident(table)
    ));

    for constraint in matcher.into_iter().flatten() {
        let predicate = format!(
            "{} -> {} {} ",
            columns.metadata,
            quote_literal(&constraint.field),
            constraint.operator
        );
        statement
            .push(&predicate)
            .push_bind_json(&constraint.value)
            .push(" AND ");
    }

    statement
        .push(&format!("{} >= ", columns.position))
        .push_bind_i64(from_position)
        .push(&format!(" ORDER BY {}", columns.position));

    if let Some(limit) = limit {
        statement.push(" LIMIT ").push_bind_i64(i64::from(limit));
    }

    statement
}

#[cfg(test)]
mod tests {
    use ledgerfold_core::metadata::Operator;
    use serde_json::json;

    use super::*;

    const COLUMNS: LoadColumns<'static> = LoadColumns {
        position: "no",
        metadata: "metadata",
        select: &["payload", "metadata"],
    };

    #[test]
    fn load_orders_matcher_predicates_before_position() {
        let matcher = Matcher::new()
            .with_constraint("version", Operator::GreaterThan, 1)
            .with_constraint("version", Operator::LowerThan, 100);

        let statement = load("event_stream", &COLUMNS, 1, None, Some(&matcher));

        assert_eq!(
            statement.sql(),
            "SELECT no, payload, metadata FROM \"event_stream\" WHERE metadata -> 'version' > $1 \
             AND metadata -> 'version' < $2 AND no >= $3 ORDER BY no"
        );
        assert_eq!(
            statement.params(),
            vec![
                SqlValue::Json(json!(1)),
                SqlValue::Json(json!(100)),
                SqlValue::BigInt(1)
            ]
        );
    }

    #[test]
    fn load_without_matcher_filters_on_position_only() {
        let statement = load("event_stream", &COLUMNS, 1, None, None);

        assert_eq!(
            statement.sql(),
            "SELECT no, payload, metadata FROM \"event_stream\" WHERE no >= $1 ORDER BY no"
        );
        assert_eq!(statement.params(), [SqlValue::BigInt(1)]);
    }

    #[test]
    fn load_with_empty_matcher_matches_no_matcher() {
        let with_empty = load("event_stream", &COLUMNS, 7, None, Some(&Matcher::new()));
        let without = load("event_stream", &COLUMNS, 7, None, None);

        assert_eq!(with_empty.sql(), without.sql());
        assert_eq!(with_empty.params(), without.params());
    }

    #[test]
    fn load_binds_limit_last() {
        let matcher = Matcher::new().with_constraint("type", Operator::Equals, "m1");

        let statement = load("event_stream", &COLUMNS, 3, Some(50), Some(&matcher));

        assert!(statement.sql().ends_with("no >= $2 ORDER BY no LIMIT $3"));
        assert_eq!(
            statement.params(),
            vec![
                SqlValue::Json(json!("m1")),
                SqlValue::BigInt(3),
                SqlValue::BigInt(50)
            ]
        );
    }

    #[test]
    fn load_escapes_field_names() {
        let matcher = Matcher::new().with_constraint("it's", Operator::NotEquals, 0);

        let statement = load("event_stream", &COLUMNS, 1, None, Some(&matcher));

        assert!(statement.sql().contains("metadata -> 'it''s' <> $1"));
    }

    #[test]
    fn insert_numbers_parameters_row_by_row() {
        let values = (0..15).map(SqlValue::BigInt).collect::<Vec<_>>();

        let statement = insert(
            "events_orders",
            &["event_id", "event_name", "payload", "metadata", "created_at"],
            values.clone(),
        );

        assert_eq!(
            statement.sql(),
            "INSERT INTO \"events_orders\" (event_id, event_name, payload, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5), ($6, $7, $8, $9, $10), ($11, $12, $13, $14, $15)"
        );
        assert_eq!(statement.params(), values.as_slice());
    }

    #[test]
    fn exists_check_binds_table_name() {
        let statement = table_exists("events_orders");

        assert!(statement.sql().starts_with("SELECT EXISTS("));
        assert_eq!(statement.params(), [SqlValue::Text("events_orders".into())]);
    }

    #[test]
    fn identifiers_and_literals_are_escaped() {
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(quote_literal("o'clock"), "'o''clock'");
    }
}
