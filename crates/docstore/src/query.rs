//! Structured declarative queries.
//!
//! The persistence layer only ever needs conjunctive equality lookups over a
//! single collection, optionally paginated or reduced to a count. [`Query`]
//! captures exactly that shape so that backends can execute it natively and
//! wire backends can render it as parameterized SQL++ via
//! [`Query::statement`]. Values are always bound as positional parameters,
//! never spliced into the statement text.
//!
//! Results are ordered by document id so that "first match" and page
//! boundaries are stable across repeated calls.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    error::{StoreError, StoreResult},
    types::{Keyspace, ScanConsistency},
};

/// What each result row contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// The full document body.
    Documents,
    /// A single row `{"count": n}`.
    Count,
}

/// A conjunctive equality query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    keyspace: Keyspace,
    projection: Projection,
    predicates: Vec<(String, Value)>,
    limit: Option<u64>,
    offset: Option<u64>,
    consistency: ScanConsistency,
}

impl Query {
    /// Selects whole documents from `keyspace`.
    #[must_use]
    pub fn select(keyspace: Keyspace) -> Self {
        Self::with_projection(keyspace, Projection::Documents)
    }

    /// Counts documents in `keyspace`.
    #[must_use]
    pub fn count(keyspace: Keyspace) -> Self {
        Self::with_projection(keyspace, Projection::Count)
    }

    fn with_projection(keyspace: Keyspace, projection: Projection) -> Self {
        Self {
            keyspace,
            projection,
            predicates: Vec::new(),
            limit: None,
            offset: None,
            consistency: ScanConsistency::default(),
        }
    }

    /// Adds a `field = value` predicate.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push((field.into(), value.into()));
        self
    }

    /// Caps the number of rows returned.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` rows.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the scan consistency.
    #[must_use]
    pub fn consistency(mut self, consistency: ScanConsistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Returns the queried keyspace.
    #[must_use]
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Returns the projection.
    #[must_use]
    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Returns the equality predicates in declaration order.
    #[must_use]
    pub fn predicates(&self) -> &[(String, Value)] {
        &self.predicates
    }

    /// Returns the row limit, if any.
    #[must_use]
    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// Returns the row offset, if any.
    #[must_use]
    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Returns the scan consistency.
    #[must_use]
    pub fn scan_consistency(&self) -> ScanConsistency {
        self.consistency
    }

    /// Renders the query as a parameterized SQL++ statement.
    ///
    /// Placeholders `$1..$n` bind to [`parameters`](Self::parameters) in order.
    #[must_use]
    pub fn statement(&self) -> String {
        let mut statement = match self.projection {
            Projection::Documents => format!("SELECT d.* FROM {} AS d", self.keyspace),
            Projection::Count => format!("SELECT COUNT(1) AS count FROM {} AS d", self.keyspace),
        };

        for (position, (field, _)) in self.predicates.iter().enumerate() {
            let keyword = if position == 0 { "WHERE" } else { "AND" };
            statement.push_str(&format!(
                " {keyword} d.`{}` = ${}",
                field.replace('`', "``"),
                position + 1
            ));
        }

        if self.projection == Projection::Documents {
            statement.push_str(" ORDER BY META(d).id");
            if let Some(limit) = self.limit {
                statement.push_str(&format!(" LIMIT {limit}"));
            }
            if let Some(offset) = self.offset {
                statement.push_str(&format!(" OFFSET {offset}"));
            }
        }

        statement
    }

    /// Returns the positional parameters for [`statement`](Self::statement).
    #[must_use]
    pub fn parameters(&self) -> Vec<Value> {
        self.predicates.iter().map(|(_, value)| value.clone()).collect()
    }

    /// Returns `true` when `content` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, content: &Value) -> bool {
        self.predicates.iter().all(|(field, expected)| content.get(field) == Some(expected))
    }
}

/// Rows returned by [`Cluster::query`](crate::Cluster::query).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    rows: Vec<Value>,
}

impl QueryResult {
    /// Wraps raw result rows.
    #[must_use]
    pub fn new(rows: Vec<Value>) -> Self {
        Self { rows }
    }

    /// Returns the raw rows.
    #[must_use]
    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    /// Decodes every row into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if any row does not match `T`.
    pub fn rows_as<T: DeserializeOwned>(self) -> StoreResult<Vec<T>> {
        self.rows.into_iter().map(|row| serde_json::from_value(row).map_err(Into::into)).collect()
    }

    /// Reads the scalar produced by a [`Projection::Count`] query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the result is not a count row.
    pub fn count(&self) -> StoreResult<u64> {
        self.rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Serialization {
                message: "query result has no count row".into(),
                source: None,
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn delegations() -> Keyspace {
        Keyspace::new("curity", "_default", "curity-delegations")
    }

    #[test]
    fn test_select_statement_with_pagination() {
        let query = Query::select(delegations()).filter("owner", "alice").limit(10).offset(20);
        assert_eq!(
            query.statement(),
            "SELECT d.* FROM `curity`.`_default`.`curity-delegations` AS d \
             WHERE d.`owner` = $1 ORDER BY META(d).id LIMIT 10 OFFSET 20"
        );
        assert_eq!(query.parameters(), vec![json!("alice")]);
    }

    #[test]
    fn test_count_statement_ignores_pagination() {
        let query = Query::count(delegations()).filter("status", "issued").limit(5);
        assert_eq!(
            query.statement(),
            "SELECT COUNT(1) AS count FROM `curity`.`_default`.`curity-delegations` AS d \
             WHERE d.`status` = $1"
        );
    }

    #[test]
    fn test_multiple_predicates_are_conjunctive() {
        let query =
            Query::select(delegations()).filter("owner", "alice").filter("status", "issued");
        assert!(query.statement().contains("WHERE d.`owner` = $1 AND d.`status` = $2"));
        assert!(query.matches(&json!({"owner": "alice", "status": "issued"})));
        assert!(!query.matches(&json!({"owner": "alice", "status": "revoked"})));
        assert!(!query.matches(&json!({"status": "issued"})));
    }

    #[test]
    fn test_field_names_are_escaped() {
        let query = Query::select(delegations()).filter("we`ird", 1);
        assert!(query.statement().contains("d.`we``ird` = $1"));
    }

    #[test]
    fn test_count_row_decoding() {
        let result = QueryResult::new(vec![json!({"count": 7})]);
        assert_eq!(result.count().unwrap(), 7);

        let empty = QueryResult::default();
        assert!(matches!(empty.count(), Err(StoreError::Serialization { .. })));
    }

    #[test]
    fn test_rows_as_decodes_each_row() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Row {
            id: String,
        }

        let result = QueryResult::new(vec![json!({"id": "a"}), json!({"id": "b"})]);
        let rows: Vec<Row> = result.rows_as().unwrap();
        assert_eq!(rows, vec![Row { id: "a".into() }, Row { id: "b".into() }]);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        /// Distinct field names paired with string values.
        fn arb_predicates() -> impl Strategy<Value = Vec<(String, String)>> {
            proptest::collection::btree_map("[a-zA-Z]{1,12}", "[a-z0-9]{0,8}", 0..6)
                .prop_map(|fields| fields.into_iter().collect())
        }

        fn query_for(predicates: &[(String, String)]) -> Query {
            predicates
                .iter()
                .fold(Query::select(delegations()), |query, (field, value)| {
                    query.filter(field.clone(), value.clone())
                })
        }

        proptest! {
            /// A document built from the predicates themselves always matches.
            #[test]
            fn document_with_every_field_matches(predicates in arb_predicates()) {
                let query = query_for(&predicates);
                let document: serde_json::Map<String, Value> = predicates
                    .iter()
                    .map(|(field, value)| (field.clone(), json!(value)))
                    .collect();

                prop_assert!(query.matches(&Value::Object(document)));
            }

            /// Dropping any one field makes the document fail to match.
            #[test]
            fn document_missing_a_field_does_not_match(
                predicates in arb_predicates().prop_filter("non-empty", |p| !p.is_empty()),
                removed in any::<prop::sample::Index>(),
            ) {
                let query = query_for(&predicates);
                let dropped = removed.index(predicates.len());
                let document: serde_json::Map<String, Value> = predicates
                    .iter()
                    .enumerate()
                    .filter(|(position, _)| *position != dropped)
                    .map(|(_, (field, value))| (field.clone(), json!(value)))
                    .collect();

                prop_assert!(!query.matches(&Value::Object(document)));
            }

            /// Every predicate gets exactly one positional placeholder.
            #[test]
            fn statement_binds_values_positionally(predicates in arb_predicates()) {
                let query = query_for(&predicates);
                let statement = query.statement();

                prop_assert_eq!(query.parameters().len(), predicates.len());
                for position in 1..=predicates.len() {
                    let placeholder = format!("${position}");
                    prop_assert!(statement.contains(&placeholder));
                }
                let extra = format!("${}", predicates.len() + 1);
                prop_assert!(!statement.contains(&extra));
            }
        }
    }
}
