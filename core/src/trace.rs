//! Tracing utilities for query, transaction and relation observability.
//!
//! Enable the `tracing` feature of the calling crate to emit events via the
//! `tracing` crate. These macros no-op when the feature is disabled, avoiding
//! `#[cfg]` boilerplate at every call site.

/// Emit a debug-level tracing event with the SQL text and parameter count.
///
/// ```ignore
/// relq_trace_query!(&statement.text, statement.values.len());
/// ```
#[macro_export]
macro_rules! relq_trace_query {
    ($sql:expr, $param_count:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %$sql, params = $param_count, "relq.query");
    };
}

/// Emit an info-level tracing event for transaction lifecycle
/// (begin, commit, rollback, savepoint, release).
///
/// ```ignore
/// relq_trace_tx!("savepoint", &name);
/// ```
#[macro_export]
macro_rules! relq_trace_tx {
    ($event:literal, $detail:expr) => {
        #[cfg(feature = "tracing")]
        tracing::info!(event = $event, detail = %$detail, "relq.transaction");
    };
}

/// Emit a warn-level tracing event before a connection retry.
#[macro_export]
macro_rules! relq_trace_retry {
    ($attempt:expr, $delay:expr) => {
        #[cfg(feature = "tracing")]
        tracing::warn!(attempt = $attempt, delay_ms = $delay.as_millis() as u64, "relq.retry");
    };
}

/// Emit a debug-level tracing event while the relation graph is resolved.
#[macro_export]
macro_rules! relq_trace_relation {
    ($state:literal, $table:expr, $name:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(state = $state, table = %$table, relation = %$name, "relq.relation");
    };
}

/// Emit a debug-level tracing event for a planned or executed write.
///
/// ```ignore
/// relq_trace_write!("upsert", &table, kind);
/// ```
#[macro_export]
macro_rules! relq_trace_write {
    ($action:literal, $table:expr, $detail:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(action = $action, table = %$table, detail = ?$detail, "relq.write");
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn write_events_only_borrow_their_fields() {
        let table = String::from("posts");
        let detail = vec![("user_id", 1)];
        relq_trace_write!("nested_update", table, detail);
        assert_eq!((table.as_str(), detail.len()), ("posts", 1));
    }
}
