//! SQLite storage layer.
//!
//! Memory-type stores, maintenance queries and pattern discovery backed by
//! SQLite with WAL mode and split read/write connection pools.

use chrono::{DateTime, SecondsFormat, Utc};
use engram_types::error::RepositoryError;

pub mod maintenance;
pub mod memory_store;
pub mod patterns;
pub mod pool;
mod terms;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC form so string comparison in SQL orders by time.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

#[cfg(test)]
pub(crate) async fn temp_pool(dir: &tempfile::TempDir) -> pool::DatabasePool {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    pool::DatabasePool::new(&url).await.unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_datetimes_sort_chronologically() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T09:59:59.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_datetime(&early), "2026-01-01T09:59:59.500Z");
        assert!(format_datetime(&early) < format_datetime(&late));
        assert_eq!(parse_datetime(&format_datetime(&late)).unwrap(), late);
    }
}
