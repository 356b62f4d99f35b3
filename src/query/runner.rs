// Catalogue Runner
// Executes every catalogue entry over one session, skipping failed queries

use super::catalogue::{Catalogue, QuerySpec};
use super::normalize::normalize;
use super::{QueryError, ResultSet, SchemaMismatchError, TabularResult};
use crate::db::session::ManagedSession;
use crate::observer::RunObserver;
use crate::report::{QueryOutcome, QueryRecord};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why one catalogue entry produced no table
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Schema(#[from] SchemaMismatchError),

    #[error("cancelled before '{0}' completed")]
    Cancelled(String),
}

/// Outcome of running a whole catalogue
#[derive(Debug, Default)]
pub struct FetchReport {
    pub results: ResultSet,
    pub records: Vec<QueryRecord>,
    pub cancelled: bool,
}

impl FetchReport {
    pub fn failed(&self) -> impl Iterator<Item = &QueryRecord> {
        self.records.iter().filter(|r| !r.outcome.is_fetched())
    }
}

/// Execute one query and normalize its result
pub async fn run_query(session: &mut ManagedSession, spec: &QuerySpec) -> Result<TabularResult, FetchError> {
    let raw = session.execute(spec.sql()).await.map_err(|e| QueryError {
        query: spec.name().to_string(),
        message: e.to_string(),
    })?;
    Ok(normalize(spec, raw)?)
}

/// Run every entry in catalogue order over `session`.
///
/// A failing query is recorded and skipped; the remaining entries still run.
/// Schema drift is never retried. Once `cancel` fires, the in-flight query is
/// abandoned and no further entries are started.
pub async fn fetch_catalogue(
    session: &mut ManagedSession,
    catalogue: &Catalogue,
    observer: &dyn RunObserver,
    cancel: &CancellationToken,
) -> FetchReport {
    let mut report = FetchReport::default();

    for spec in catalogue.iter() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        observer.query_started(spec.name());
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled(spec.name().to_string())),
            result = run_query(session, spec) => result,
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(table) => {
                observer.query_finished(spec.name(), table.row_count(), elapsed);
                report.records.push(QueryRecord {
                    query: spec.name().to_string(),
                    outcome: QueryOutcome::Fetched {
                        rows: table.row_count(),
                        elapsed_ms: elapsed.as_millis() as u64,
                    },
                });
                report.results.insert(table);
            }
            Err(FetchError::Cancelled(_)) => {
                report.cancelled = true;
                break;
            }
            Err(e) => {
                let reason = match &e {
                    FetchError::Schema(mismatch) => format!("{} [sql: {}]", mismatch, spec.sql()),
                    other => other.to_string(),
                };
                observer.query_failed(spec.name(), &reason);
                report.records.push(QueryRecord {
                    query: spec.name().to_string(),
                    outcome: QueryOutcome::Failed { reason: e.to_string() },
                });
            }
        }
    }

    report
}
