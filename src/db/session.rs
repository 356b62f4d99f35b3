// Session Lifecycle Management
// Bounded-retry acquisition of a single validated session and guaranteed release

use crate::db::traits::{
    ConnectionConfig, DatabaseDriver, DatabaseError, DatabaseType, DriverSession, RawResult,
};
use crate::observer::RunObserver;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Trivial round-trip used to prove a freshly opened session is usable
pub const VALIDATION_QUERY: &str = "SELECT 1";

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("all {attempts} connection attempts failed; last error: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Driver not found for database type: {0:?}")]
    DriverNotFound(DatabaseType),
}

impl From<DatabaseError> for ConnectionError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::DriverNotFound(db_type) => ConnectionError::DriverNotFound(db_type),
            other => ConnectionError::InvalidConfig(other.to_string()),
        }
    }
}

/// Linear retry with an optional multiplicative backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff_factor: f64,
    /// Ceiling for backed-off delays; never below `delay`
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            delay: config.retry_delay,
            backoff_factor: config.backoff_factor,
            max_delay: config.max_retry_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.max(self.delay);
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(cap, |delay| delay.min(cap))
    }
}

/// Single-owner handle to a live, validated session
pub struct ManagedSession {
    id: String,
    inner: Option<Box<dyn DriverSession>>,
    observer: Arc<dyn RunObserver>,
}

impl ManagedSession {
    pub(crate) fn new(inner: Box<dyn DriverSession>, observer: Arc<dyn RunObserver>) -> Self {
        Self {
            id: inner.session_id().to_string(),
            inner: Some(inner),
            observer,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Execute a query over this session
    pub async fn execute(&mut self, sql: &str) -> Result<RawResult, DatabaseError> {
        match self.inner.as_mut() {
            Some(session) => session.query(sql).await,
            None => Err(DatabaseError::ConnectionFailed(format!(
                "session {} is already closed",
                self.id
            ))),
        }
    }

    /// Release the session. Idempotent and infallible: release errors are
    /// reported to the observer and swallowed.
    pub async fn close(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        match session.release().await {
            Ok(()) => self.observer.session_closed(&self.id),
            Err(e) => self.observer.close_failed(&self.id, &e.to_string()),
        }
    }
}

impl Drop for ManagedSession {
    fn drop(&mut self) {
        // Reached when the owning future was cancelled before `close` ran.
        // Dropping the driver session tears the connection down.
        if let Some(session) = self.inner.take() {
            drop(session);
            self.observer.session_closed(&self.id);
        }
    }
}

/// Acquires sessions for one engine under a retry policy
pub struct SessionManager {
    driver: Arc<dyn DatabaseDriver>,
    config: ConnectionConfig,
    policy: RetryPolicy,
    observer: Arc<dyn RunObserver>,
}

impl SessionManager {
    pub fn new(
        driver: Arc<dyn DatabaseDriver>,
        config: ConnectionConfig,
        observer: Arc<dyn RunObserver>,
    ) -> Result<Self, ConnectionError> {
        config.validate()?;
        if driver.database_type() != config.engine {
            return Err(ConnectionError::InvalidConfig(format!(
                "driver '{}' cannot serve engine '{}'",
                driver.driver_name(),
                config.engine
            )));
        }
        let policy = RetryPolicy::from_config(&config);
        Ok(Self {
            driver,
            config,
            policy,
            observer,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establish a validated session, retrying up to `max_attempts` times.
    /// No wait follows the final attempt.
    pub async fn connect(&self) -> Result<ManagedSession, ConnectionError> {
        let max_attempts = self.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.observer.connect_attempt(attempt, max_attempts);

            match self.try_open().await {
                Ok(session) => {
                    self.observer.connected(session.id(), attempt);
                    return Ok(session);
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.observer.connect_failed(attempt, &last_error);
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_after(attempt);
                self.observer.retry_scheduled(attempt, delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(ConnectionError::AttemptsExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// One attempt: open, then validate with a round-trip. A session that
    /// fails validation is released before the error is returned.
    async fn try_open(&self) -> Result<ManagedSession, DatabaseError> {
        let timeout = self.config.connect_timeout;
        let inner = tokio::time::timeout(timeout, self.driver.open(&self.config))
            .await
            .map_err(|_| DatabaseError::Timeout(timeout))??;

        let mut session = ManagedSession::new(inner, Arc::clone(&self.observer));
        let validation = tokio::time::timeout(timeout, session.execute(VALIDATION_QUERY)).await;

        let failure = match validation {
            Ok(Ok(result)) if !result.is_empty() => return Ok(session),
            Ok(Ok(_)) => DatabaseError::ConnectionFailed(
                "validation query returned no rows".to_string(),
            ),
            Ok(Err(e)) => e,
            Err(_) => DatabaseError::Timeout(timeout),
        };

        session.close().await;
        Err(failure)
    }

    /// Scoped acquisition: connect, run `f`, and close on every exit path.
    pub async fn with_session<T, F>(&self, f: F) -> Result<T, ConnectionError>
    where
        F: for<'s> FnOnce(&'s mut ManagedSession) -> BoxFuture<'s, T>,
    {
        let mut session = self.connect().await?;
        let output = f(&mut session).await;
        session.close().await;
        Ok(output)
    }

    /// Like [`with_session`](Self::with_session), but gives up while still
    /// connecting once `cancel` fires, returning `Ok(None)`. After the session
    /// is up, `f` owns cancellation and the session is closed normally.
    pub async fn with_session_until<T, F>(
        &self,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<Option<T>, ConnectionError>
    where
        F: for<'s> FnOnce(&'s mut ManagedSession) -> BoxFuture<'s, T>,
    {
        let mut session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            session = self.connect() => session?,
        };
        let output = f(&mut session).await;
        session.close().await;
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::CellValue;
    use crate::observer::testing::{Event, RecordingObserver};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct MockSession {
        id: String,
        validation_rows: usize,
        released: Arc<AtomicUsize>,
        open: bool,
    }

    #[async_trait::async_trait]
    impl DriverSession for MockSession {
        fn session_id(&self) -> &str {
            &self.id
        }

        async fn query(&mut self, sql: &str) -> Result<RawResult, DatabaseError> {
            if sql == "BROKEN" {
                return Err(DatabaseError::Query("syntax error".to_string()));
            }
            let rows = vec![vec![CellValue::Int(1)]; self.validation_rows];
            Ok(RawResult::new(vec!["1".to_string()], rows))
        }

        async fn release(&mut self) -> Result<(), DatabaseError> {
            if self.open {
                self.open = false;
                self.released.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct MockDriver {
        fail_first: u32,
        validation_rows: usize,
        opens: AtomicU32,
        released: Arc<AtomicUsize>,
    }

    impl MockDriver {
        fn failing_first(fail_first: u32) -> Self {
            Self {
                fail_first,
                validation_rows: 1,
                opens: AtomicU32::new(0),
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl DatabaseDriver for MockDriver {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Sqlite
        }

        async fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn DriverSession>, DatabaseError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(DatabaseError::ConnectionFailed(format!("refused #{}", n)));
            }
            Ok(Box::new(MockSession {
                id: format!("mock-{}", n),
                validation_rows: self.validation_rows,
                released: Arc::clone(&self.released),
                open: true,
            }))
        }
    }

    fn test_config(max_retries: u32) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(DatabaseType::Sqlite, "mock.db");
        config.max_retries = max_retries;
        config.retry_delay = Duration::ZERO;
        config
    }

    fn manager(driver: Arc<MockDriver>, max_retries: u32, observer: Arc<RecordingObserver>) -> SessionManager {
        SessionManager::new(driver, test_config(max_retries), observer).unwrap()
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt_after_n_minus_one_waits() {
        for n in 1..=5u32 {
            let driver = Arc::new(MockDriver::failing_first(n - 1));
            let observer = Arc::new(RecordingObserver::default());
            let manager = manager(Arc::clone(&driver), n, Arc::clone(&observer));

            let session = manager.connect().await.expect("should connect on attempt n");
            assert!(session.is_open());
            assert_eq!(observer.attempts(), n as usize);
            assert_eq!(observer.waits(), (n - 1) as usize);
            assert!(observer.events().contains(&Event::Connected(n)));
        }
    }

    #[tokio::test]
    async fn test_exhausts_after_exactly_n_attempts_without_trailing_wait() {
        for n in 1..=4u32 {
            let driver = Arc::new(MockDriver::failing_first(u32::MAX));
            let observer = Arc::new(RecordingObserver::default());
            let manager = manager(Arc::clone(&driver), n, Arc::clone(&observer));

            let err = manager.connect().await.err().expect("must fail");
            match err {
                ConnectionError::AttemptsExhausted { attempts, last_error } => {
                    assert_eq!(attempts, n);
                    assert!(last_error.contains(&format!("refused #{}", n)));
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(driver.opens.load(Ordering::SeqCst), n);
            assert_eq!(observer.waits(), (n - 1) as usize);
            assert_eq!(observer.events().last(), Some(&Event::AttemptFailed(n)));
        }
    }

    #[tokio::test]
    async fn test_failed_validation_counts_as_failed_attempt() {
        let driver = Arc::new(MockDriver {
            validation_rows: 0,
            ..MockDriver::failing_first(0)
        });
        let observer = Arc::new(RecordingObserver::default());
        let manager = manager(Arc::clone(&driver), 3, Arc::clone(&observer));

        let result = manager.connect().await;
        assert!(matches!(result, Err(ConnectionError::AttemptsExhausted { attempts: 3, .. })));
        // every half-open session was released
        assert_eq!(driver.released.load(Ordering::SeqCst), 3);
        assert_eq!(observer.waits(), 2);
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let released = Arc::new(AtomicUsize::new(0));
        let inner = MockSession {
            id: "mock-x".to_string(),
            validation_rows: 1,
            released: Arc::clone(&released),
            open: true,
        };
        let observer = Arc::new(RecordingObserver::default());
        let mut session = ManagedSession::new(Box::new(inner), observer.clone());

        session.close().await;
        session.close().await;

        assert!(!session.is_open());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        let closes = observer
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Closed(_)))
            .count();
        assert_eq!(closes, 1);
        assert!(session.execute("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn test_with_session_closes_on_error_path() {
        let driver = Arc::new(MockDriver::failing_first(0));
        let observer = Arc::new(RecordingObserver::default());
        let manager = manager(Arc::clone(&driver), 1, observer);

        let output = manager
            .with_session(|session| async move { session.execute("BROKEN").await }.boxed())
            .await
            .expect("connect succeeds");

        assert!(matches!(output, Err(DatabaseError::Query(_))));
        assert_eq!(driver.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_retry_wait() {
        let driver = Arc::new(MockDriver::failing_first(u32::MAX));
        let observer = Arc::new(RecordingObserver::default());
        let mut config = test_config(5);
        config.retry_delay = Duration::from_secs(3600);
        let manager = SessionManager::new(driver.clone(), config, observer.clone()).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let output = tokio::time::timeout(
            Duration::from_secs(5),
            manager.with_session_until(&cancel, |session| async move { session.id().to_string() }.boxed()),
        )
        .await
        .expect("cancellation interrupts the wait")
        .expect("cancellation is not a connection error");

        assert!(output.is_none());
        assert_eq!(driver.opens.load(Ordering::SeqCst), 1);
        assert_eq!(observer.waits(), 1);
    }

    #[tokio::test]
    async fn test_with_session_until_runs_body_when_not_cancelled() {
        let driver = Arc::new(MockDriver::failing_first(0));
        let manager = manager(Arc::clone(&driver), 1, Arc::new(RecordingObserver::default()));

        let output = manager
            .with_session_until(&CancellationToken::new(), |session| {
                async move { session.id().to_string() }.boxed()
            })
            .await
            .unwrap();

        assert_eq!(output.as_deref(), Some("mock-1"));
        assert_eq!(driver.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejects_mismatched_driver() {
        let driver = Arc::new(MockDriver::failing_first(0));
        let mut config = test_config(1);
        config.engine = DatabaseType::Postgresql;
        let result = SessionManager::new(driver, config, Arc::new(RecordingObserver::default()));
        assert!(matches!(result, Err(ConnectionError::InvalidConfig(_))));
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy {
            max_attempts: 4,
            delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(300),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(2), Duration::from_secs(20));
        assert_eq!(policy.delay_after(3), Duration::from_secs(40));

        let fixed = RetryPolicy { backoff_factor: 1.0, ..policy };
        assert_eq!(fixed.delay_after(3), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_is_capped_instead_of_overflowing() {
        let mut config = test_config(40);
        config.retry_delay = Duration::from_secs(10);
        config.backoff_factor = 10.0;
        config.validate().unwrap();

        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.delay_after(2), Duration::from_secs(100));
        assert_eq!(policy.delay_after(3), config.max_retry_delay);
        assert_eq!(policy.delay_after(39), config.max_retry_delay);
        assert_eq!(policy.delay_after(u32::MAX), config.max_retry_delay);

        // A ceiling below the base delay never shortens the first wait
        let short_cap = RetryPolicy { max_delay: Duration::from_secs(1), ..policy };
        assert_eq!(short_cap.delay_after(1), Duration::from_secs(10));
    }

    /// Refuses to release cleanly
    struct StuckSession {
        release_calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl DriverSession for StuckSession {
        fn session_id(&self) -> &str {
            "stuck"
        }

        async fn query(&mut self, _sql: &str) -> Result<RawResult, DatabaseError> {
            Ok(RawResult::new(vec!["1".to_string()], vec![vec![CellValue::Int(1)]]))
        }

        async fn release(&mut self) -> Result<(), DatabaseError> {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
            Err(DatabaseError::ConnectionFailed("socket already closed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_release_error_is_logged_and_swallowed() {
        let release_calls = Arc::new(AtomicUsize::new(0));
        let observer = Arc::new(RecordingObserver::default());
        let mut session = ManagedSession::new(
            Box::new(StuckSession { release_calls: Arc::clone(&release_calls) }),
            observer.clone(),
        );

        session.close().await;
        session.close().await;

        assert!(!session.is_open());
        assert_eq!(release_calls.load(Ordering::SeqCst), 1);
        let events = observer.events();
        let failures = events.iter().filter(|e| matches!(e, Event::CloseFailed(_))).count();
        assert_eq!(failures, 1);
        assert!(events.contains(&Event::CloseFailed("stuck".to_string())));
        assert!(!events.iter().any(|e| matches!(e, Event::Closed(_))));
    }
}
