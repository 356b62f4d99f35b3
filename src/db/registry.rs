// Driver Registry
// Maps each engine type to the driver that opens sessions on it

use crate::db::drivers::{MssqlDriver, PostgresDriver, SqliteDriver};
use crate::db::traits::{DatabaseDriver, DatabaseError, DatabaseType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry for managing database drivers
pub struct DriverRegistry {
    drivers: RwLock<HashMap<DatabaseType, Arc<dyn DatabaseDriver>>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in PostgreSQL, SQL Server and SQLite drivers
    pub fn with_defaults() -> Self {
        let builtin: [Arc<dyn DatabaseDriver>; 3] = [
            Arc::new(PostgresDriver::new()),
            Arc::new(MssqlDriver::new()),
            Arc::new(SqliteDriver::new()),
        ];
        let drivers = builtin
            .into_iter()
            .map(|driver| (driver.database_type(), driver))
            .collect();
        Self {
            drivers: RwLock::new(drivers),
        }
    }

    /// Register a database driver, replacing any previous one for the same type
    pub async fn register(&self, driver: Arc<dyn DatabaseDriver>) {
        let db_type = driver.database_type();
        let mut drivers = self.drivers.write().await;
        drivers.insert(db_type, driver);
        tracing::debug!(driver = %db_type, "registered driver");
    }

    /// Get a driver by database type
    pub async fn get_driver(
        &self,
        db_type: DatabaseType,
    ) -> Result<Arc<dyn DatabaseDriver>, DatabaseError> {
        let drivers = self.drivers.read().await;
        drivers
            .get(&db_type)
            .cloned()
            .ok_or(DatabaseError::DriverNotFound(db_type))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
