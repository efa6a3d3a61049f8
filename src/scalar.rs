//! Single-value query execution.
//!
//! Catalog queries are written to produce one row with one column. An empty
//! result (or a NULL value) is a normal outcome for a window without matching
//! events and reads as 0. Anything wider or longer is a defect in the query.

use crate::engine::{Cell, EngineError, QueryRows, TraceQueryEngine};
use crate::queries::Query;

/// Shape of a scalar query result.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Empty,
    Value(Cell),
}

/// Errors from scalar query execution.
#[derive(Debug)]
pub enum QueryError {
    /// More than one row or more than one column came back.
    AmbiguousResult {
        query: &'static str,
        rows: usize,
        columns: usize,
    },
    /// The single value was text that does not parse as a number.
    NonNumeric { query: &'static str, value: String },
    Engine {
        query: &'static str,
        source: EngineError,
    },
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::AmbiguousResult {
                query,
                rows,
                columns,
            } => write!(
                f,
                "query {query} is not scalar: {rows} row(s), {columns} column(s)"
            ),
            QueryError::NonNumeric { query, value } => {
                write!(f, "query {query} returned non-numeric value {value:?}")
            }
            QueryError::Engine { query, source } => write!(f, "query {query}: {source}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Engine { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Classify a result set as empty or a single value.
pub fn classify(query: &'static str, result: QueryRows) -> Result<Scalar, QueryError> {
    let QueryRows { columns, mut rows } = result;
    match rows.len() {
        0 => Ok(Scalar::Empty),
        1 => {
            let mut row = rows.swap_remove(0);
            if row.len() != 1 {
                return Err(QueryError::AmbiguousResult {
                    query,
                    rows: 1,
                    columns: row.len().max(columns.len()),
                });
            }
            Ok(Scalar::Value(row.swap_remove(0)))
        }
        n => Err(QueryError::AmbiguousResult {
            query,
            rows: n,
            columns: columns.len(),
        }),
    }
}

/// Run a scalar query and return its value as a float. Empty and NULL read as 0.
pub fn query_f64(engine: &dyn TraceQueryEngine, query: &Query) -> Result<f64, QueryError> {
    let rows = engine
        .query(query.sql, &query.params)
        .map_err(|e| QueryError::Engine {
            query: query.name,
            source: e,
        })?;
    match classify(query.name, rows)? {
        Scalar::Empty | Scalar::Value(Cell::Null) => Ok(0.0),
        Scalar::Value(Cell::Integer(i)) => Ok(i as f64),
        Scalar::Value(Cell::Real(r)) => Ok(r),
        Scalar::Value(Cell::Text(t)) => t.trim().parse().map_err(|_| QueryError::NonNumeric {
            query: query.name,
            value: t,
        }),
    }
}

/// Run a scalar query and return its value as an integer. Reals are truncated.
pub fn query_i64(engine: &dyn TraceQueryEngine, query: &Query) -> Result<i64, QueryError> {
    let rows = engine
        .query(query.sql, &query.params)
        .map_err(|e| QueryError::Engine {
            query: query.name,
            source: e,
        })?;
    match classify(query.name, rows)? {
        Scalar::Empty | Scalar::Value(Cell::Null) => Ok(0),
        Scalar::Value(Cell::Integer(i)) => Ok(i),
        Scalar::Value(Cell::Real(r)) => Ok(r as i64),
        Scalar::Value(Cell::Text(t)) => t.trim().parse().map_err(|_| QueryError::NonNumeric {
            query: query.name,
            value: t,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Param;

    /// Engine that returns a canned result for every query.
    struct Canned(QueryRows);

    impl TraceQueryEngine for Canned {
        fn query(&self, _sql: &str, _params: &[Param]) -> Result<QueryRows, EngineError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl TraceQueryEngine for Broken {
        fn query(&self, _sql: &str, _params: &[Param]) -> Result<QueryRows, EngineError> {
            Err(EngineError::Query {
                message: "no such table: slice".to_string(),
            })
        }
    }

    fn q() -> Query {
        Query {
            name: "test_query",
            sql: "SELECT 1",
            params: Vec::new(),
        }
    }

    fn rows(columns: &[&str], rows: Vec<Vec<Cell>>) -> QueryRows {
        QueryRows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn test_zero_rows_is_zero() {
        let engine = Canned(rows(&["dur_ms"], vec![]));
        assert_eq!(query_f64(&engine, &q()).unwrap(), 0.0);
        assert_eq!(query_i64(&engine, &q()).unwrap(), 0);
    }

    #[test]
    fn test_null_value_is_zero() {
        let engine = Canned(rows(&["dur_ms"], vec![vec![Cell::Null]]));
        assert_eq!(query_f64(&engine, &q()).unwrap(), 0.0);
        assert_eq!(query_i64(&engine, &q()).unwrap(), 0);
    }

    #[test]
    fn test_single_values() {
        let engine = Canned(rows(&["n"], vec![vec![Cell::Integer(42)]]));
        assert_eq!(query_i64(&engine, &q()).unwrap(), 42);
        assert_eq!(query_f64(&engine, &q()).unwrap(), 42.0);

        let engine = Canned(rows(&["freq"], vec![vec![Cell::Real(2.5)]]));
        assert_eq!(query_f64(&engine, &q()).unwrap(), 2.5);
        assert_eq!(query_i64(&engine, &q()).unwrap(), 2);

        let engine = Canned(rows(&["n"], vec![vec![Cell::Text(" 17 ".to_string())]]));
        assert_eq!(query_i64(&engine, &q()).unwrap(), 17);
    }

    #[test]
    fn test_multiple_rows_is_ambiguous() {
        let engine = Canned(rows(
            &["n"],
            vec![vec![Cell::Integer(1)], vec![Cell::Integer(2)]],
        ));
        let err = query_f64(&engine, &q()).unwrap_err();
        assert!(matches!(
            err,
            QueryError::AmbiguousResult {
                rows: 2,
                columns: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_multiple_columns_is_ambiguous() {
        let engine = Canned(rows(
            &["a", "b"],
            vec![vec![Cell::Integer(1), Cell::Integer(2)]],
        ));
        let err = query_i64(&engine, &q()).unwrap_err();
        assert!(matches!(
            err,
            QueryError::AmbiguousResult {
                rows: 1,
                columns: 2,
                ..
            }
        ));
        assert!(err.to_string().contains("test_query"));
    }

    #[test]
    fn test_zero_rows_with_many_columns_is_empty() {
        let result = classify("q", rows(&["a", "b"], vec![])).unwrap();
        assert_eq!(result, Scalar::Empty);
    }

    #[test]
    fn test_text_value_is_non_numeric() {
        let engine = Canned(rows(&["name"], vec![vec![Cell::Text("logd".to_string())]]));
        let err = query_f64(&engine, &q()).unwrap_err();
        assert!(matches!(err, QueryError::NonNumeric { .. }));
    }

    #[test]
    fn test_engine_error_is_wrapped() {
        let err = query_f64(&Broken, &q()).unwrap_err();
        assert!(matches!(err, QueryError::Engine { .. }));
        assert!(err.to_string().contains("no such table"));
    }
}
