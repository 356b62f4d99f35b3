// Database Module
// Engine drivers, the driver registry and the connection lifecycle

pub mod drivers;
pub mod registry;
pub mod session;
pub mod traits;

pub use drivers::{MssqlDriver, PostgresDriver, SqliteDriver};
pub use registry::DriverRegistry;
pub use session::{ConnectionError, ManagedSession, RetryPolicy, SessionManager, VALIDATION_QUERY};
pub use traits::{
    CellValue, ConnectionConfig, DatabaseDriver, DatabaseError, DatabaseType, DriverSession,
    RawResult,
};
