// Database Drivers
// One implementation per supported engine

pub mod mssql;
pub mod postgres;
pub mod sqlite;

// Re-export drivers
pub use mssql::MssqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
