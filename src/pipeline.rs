// Report Pipeline
// One session, the whole catalogue, fan-out to render targets, then the run manifest

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ReportConfig};
use crate::db::registry::DriverRegistry;
use crate::db::session::{ConnectionError, SessionManager};
use crate::dispatch::Dispatcher;
use crate::export::{default_targets, OutputPolicy, RenderTarget};
use crate::observer::RunObserver;
use crate::query::{fetch_catalogue, Catalogue, Dialect};
use crate::report::{ReportRun, ReportRunBuilder};

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("run cancelled before any report was produced")]
    Cancelled,

    #[error("cannot write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A configured report run
pub struct Pipeline {
    config: ReportConfig,
    registry: Arc<DriverRegistry>,
    observer: Arc<dyn RunObserver>,
    targets: Vec<Arc<dyn RenderTarget>>,
    catalogue: Option<Catalogue>,
}

impl Pipeline {
    pub fn new(config: ReportConfig, registry: Arc<DriverRegistry>, observer: Arc<dyn RunObserver>) -> Self {
        Self {
            config,
            registry,
            observer,
            targets: default_targets(),
            catalogue: None,
        }
    }

    /// Replace the default render targets
    pub fn with_targets(mut self, targets: Vec<Arc<dyn RenderTarget>>) -> Self {
        self.targets = targets;
        self
    }

    /// Replace the built-in catalogue
    pub fn with_catalogue(mut self, catalogue: Catalogue) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// The catalogue this run executes
    pub fn catalogue(&self) -> Catalogue {
        self.catalogue.clone().unwrap_or_else(|| {
            Catalogue::builtin(
                Dialect::for_engine(self.config.connection.engine),
                &self.config.dataset.table,
            )
        })
    }

    /// Execute the run.
    ///
    /// Connection failure is fatal and no target runs. Cancellation before
    /// the results are in yields [`PipelineError::Cancelled`]; once dispatch
    /// has started every target runs to completion and the run is only
    /// flagged as cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ReportRun, PipelineError> {
        self.config.validate()?;

        let started_at = Local::now();
        let policy = OutputPolicy::new(&self.config.output.root);
        let mut builder = ReportRunBuilder::new(started_at, policy.run_dir(&started_at))
            .source(self.config.connection.describe());

        let driver = self
            .registry
            .get_driver(self.config.connection.engine)
            .await
            .map_err(ConnectionError::from)?;
        let manager = SessionManager::new(driver, self.config.connection.clone(), Arc::clone(&self.observer))?;

        // The deadline only covers connecting and querying
        let query_cancel = cancel.child_token();
        let deadline = self.config.run.timeout().map(|timeout| {
            let token = query_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!(timeout_secs = timeout.as_secs(), "run deadline reached, cancelling");
                token.cancel();
            })
        });

        let catalogue = self.catalogue();
        let observer = Arc::clone(&self.observer);
        let token = query_cancel.clone();
        let fetched = manager
            .with_session_until(&query_cancel, move |session| {
                async move { fetch_catalogue(session, &catalogue, observer.as_ref(), &token).await }.boxed()
            })
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        let report = match fetched? {
            Some(report) if !report.cancelled => report,
            _ => return Err(PipelineError::Cancelled),
        };
        builder.record_queries(report.records);

        let dispatcher = Dispatcher::new(policy.clone(), Arc::clone(&self.observer))
            .parallel(self.config.output.parallel);
        let records = dispatcher.dispatch(&report.results, &self.targets, &started_at).await;
        builder.record_targets(records);

        if cancel.is_cancelled() {
            builder.mark_cancelled();
        }

        self.write_manifest(builder, &policy, &started_at)
    }

    fn write_manifest(
        &self,
        mut builder: ReportRunBuilder,
        policy: &OutputPolicy,
        started_at: &DateTime<Local>,
    ) -> Result<ReportRun, PipelineError> {
        let path = policy
            .name_for("run-manifest", "json", started_at)
            .map_err(|source| PipelineError::Output {
                path: policy.run_dir(started_at),
                source,
            })?;
        builder.manifest_path(path.clone());
        let run = builder.finish();

        let json = serde_json::to_string_pretty(&run).map_err(|e| PipelineError::Output {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        std::fs::write(&path, json).map_err(|source| PipelineError::Output {
            path: path.clone(),
            source,
        })?;

        tracing::info!(manifest = %path.display(), summary = %run.summary(), "report run finished");
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::{
        ConnectionConfig, DatabaseDriver, DatabaseError, DatabaseType, DriverSession, RawResult,
    };
    use crate::demo::DemoDataset;
    use crate::observer::testing::{Event, RecordingObserver};
    use crate::query::catalogue::{DATASET_OVERVIEW, TEMPORAL_RISK};
    use crate::query::{ColumnKind, QuerySpec};
    use crate::report::TargetOutcome;
    use std::time::Duration;

    fn sqlite_config(db: &std::path::Path, out: &std::path::Path) -> ReportConfig {
        let mut config = ReportConfig::default();
        config.connection = ConnectionConfig::new(DatabaseType::Sqlite, db.to_string_lossy());
        config.connection.max_retries = 2;
        config.connection.retry_delay = Duration::ZERO;
        config.output.root = out.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_full_run_over_demo_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("flows.db");
        DemoDataset::new(&db).rows(2_000).write().unwrap();

        let observer = Arc::new(RecordingObserver::default());
        let pipeline = Pipeline::new(
            sqlite_config(&db, &dir.path().join("out")),
            Arc::new(DriverRegistry::with_defaults()),
            observer.clone(),
        );

        let run = pipeline.run(CancellationToken::new()).await.unwrap();

        assert!(run.failed_queries().next().is_none(), "{:?}", run.queries());
        assert_eq!(run.queries().len(), 7);
        assert_eq!(run.succeeded().count(), 8, "{:?}", run.targets());
        assert!(run.is_complete_success());
        assert!(!run.cancelled());

        let manifest = run.manifest().unwrap();
        assert!(manifest.starts_with(run.output_dir()));
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(manifest).unwrap()).unwrap();
        assert_eq!(parsed["targets"].as_array().unwrap().len(), 8);
        assert_eq!(parsed["queries"][0]["status"], "fetched");

        for record in run.targets() {
            let artifact = record.artifact().unwrap();
            assert!(artifact.path.starts_with(run.output_dir()));
            assert!(artifact.bytes > 0);
        }

        let events = observer.events();
        assert!(events.contains(&Event::QueryFinished(DATASET_OVERVIEW.to_string(), 1)));
        assert!(events.iter().any(|e| matches!(e, Event::Closed(_))));
    }

    #[tokio::test]
    async fn test_failed_query_only_skips_dependent_targets() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("flows.db");
        DemoDataset::new(&db).rows(300).write().unwrap();

        let config = sqlite_config(&db, &dir.path().join("out"));
        let catalogue = Catalogue::builtin(Dialect::Sqlite, &config.dataset.table).with_entry(
            QuerySpec::new(TEMPORAL_RISK, "broken", "SELECT no_such_column FROM unsw_nb15_combined")
                .column("hour_of_day", ColumnKind::HourOfDay),
        );
        let pipeline = Pipeline::new(
            config,
            Arc::new(DriverRegistry::with_defaults()),
            Arc::new(RecordingObserver::default()),
        )
        .with_catalogue(catalogue);

        let run = pipeline.run(CancellationToken::new()).await.unwrap();

        assert_eq!(run.failed_queries().count(), 1);
        let temporal = run
            .targets()
            .iter()
            .find(|t| t.target == "temporal-risk-chart")
            .unwrap();
        assert!(matches!(temporal.outcome, TargetOutcome::Skipped { .. }));
        assert!(run.targets().iter().any(|t| t.target == "attack-distribution-chart" && t.artifact().is_some()));
        assert!(!run.is_complete_success());
    }

    struct RefusingDriver;

    #[async_trait::async_trait]
    impl DatabaseDriver for RefusingDriver {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Postgresql
        }

        async fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn DriverSession>, DatabaseError> {
            Err(DatabaseError::ConnectionFailed("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::new();
        registry.register(Arc::new(RefusingDriver)).await;

        let mut config = ReportConfig::default();
        config.connection.max_retries = 3;
        config.connection.retry_delay = Duration::ZERO;
        config.output.root = dir.path().join("out");

        let observer = Arc::new(RecordingObserver::default());
        let err = Pipeline::new(config, Arc::new(registry), observer.clone())
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Connection(ConnectionError::AttemptsExhausted { attempts: 3, .. })
        ));
        assert_eq!(observer.waits(), 2);
        assert!(!observer.events().iter().any(|e| matches!(e, Event::TargetSucceeded(_))));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_missing_driver() {
        let err = Pipeline::new(
            ReportConfig::default(),
            Arc::new(DriverRegistry::new()),
            Arc::new(RecordingObserver::default()),
        )
        .run(CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Connection(ConnectionError::DriverNotFound(DatabaseType::Postgresql))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("flows.db");
        DemoDataset::new(&db).rows(10).write().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Pipeline::new(
            sqlite_config(&db, &dir.path().join("out")),
            Arc::new(DriverRegistry::with_defaults()),
            Arc::new(RecordingObserver::default()),
        )
        .run(cancel)
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!dir.path().join("out").exists());
    }

    /// Answers the validation query, then never finishes the next one
    struct StallingSession;

    #[async_trait::async_trait]
    impl DriverSession for StallingSession {
        fn session_id(&self) -> &str {
            "stalling"
        }

        async fn query(&mut self, sql: &str) -> Result<RawResult, DatabaseError> {
            if sql == crate::db::session::VALIDATION_QUERY {
                return Ok(RawResult::new(vec!["1".to_string()], vec![vec![crate::db::traits::CellValue::Int(1)]]));
            }
            std::future::pending().await
        }

        async fn release(&mut self) -> Result<(), DatabaseError> {
            Ok(())
        }
    }

    struct StallingDriver;

    #[async_trait::async_trait]
    impl DatabaseDriver for StallingDriver {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Postgresql
        }

        async fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn DriverSession>, DatabaseError> {
            Ok(Box::new(StallingSession))
        }
    }

    #[tokio::test]
    async fn test_deadline_cancels_stalled_query_and_releases_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::new();
        registry.register(Arc::new(StallingDriver)).await;

        let mut config = ReportConfig::default();
        config.output.root = dir.path().join("out");
        config.run.timeout_secs = Some(1);

        let observer = Arc::new(RecordingObserver::default());
        let err = Pipeline::new(config, Arc::new(registry), observer.clone())
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        let events = observer.events();
        assert!(events.contains(&Event::Closed("stalling".to_string())));
        assert!(!events.iter().any(|e| matches!(e, Event::QueryFinished(..))));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_long_sqlite_query() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("flows.db");
        DemoDataset::new(&db).rows(10).write().unwrap();

        let mut config = sqlite_config(&db, &dir.path().join("out"));
        config.run.timeout_secs = Some(1);
        let catalogue = Catalogue::empty().with_entry(
            QuerySpec::new(
                "endless",
                "counts to a very large number",
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000000) \
                 SELECT count(*) AS n FROM c",
            )
            .column("n", ColumnKind::Integer),
        );

        let started = std::time::Instant::now();
        let err = Pipeline::new(
            config,
            Arc::new(DriverRegistry::with_defaults()),
            Arc::new(RecordingObserver::default()),
        )
        .with_catalogue(catalogue)
        .run(CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_invalid_table_is_rejected_before_connecting() {
        let mut config = ReportConfig::default();
        config.dataset.table = "flows where 1=1".to_string();
        let pipeline = Pipeline::new(
            config,
            Arc::new(DriverRegistry::new()),
            Arc::new(RecordingObserver::default()),
        );
        let err = pipeline.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(ConfigError::Invalid(_))));
    }
}
