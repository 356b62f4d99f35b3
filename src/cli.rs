// Command Line Interface
// Subcommands and connection overrides; every flag also reads a TRAFFIC_REPORT_* variable

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::config::ReportConfig;
use crate::db::traits::DatabaseType;

/// Network traffic security reports from a remote SQL engine
#[derive(Parser, Debug)]
#[command(
    name = "traffic-report",
    version,
    about = "Query labeled network-flow statistics and render security reports",
    long_about = "Connects to a SQL engine holding a UNSW-NB15 style flow table, runs the \
                  analytical catalogue and writes charts, an interactive dashboard and \
                  JSON/text summaries into a timestamped run directory."
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE", env = "TRAFFIC_REPORT_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the full report
    Run,
    /// Connect with retry, validate the session and close it
    Check,
    /// List tables of the target database
    Tables,
    /// Show the columns of a table
    Describe { table: String },
    /// Count the rows of a table
    Count { table: String },
    /// Print the query catalogue for the configured engine
    Catalogue,
    /// Write a synthetic UNSW-NB15 shaped SQLite dataset
    DemoDataset {
        path: PathBuf,
        #[arg(long, default_value_t = 10_000)]
        rows: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineArg {
    Postgresql,
    Mssql,
    Sqlite,
}

impl From<EngineArg> for DatabaseType {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Postgresql => DatabaseType::Postgresql,
            EngineArg::Mssql => DatabaseType::Mssql,
            EngineArg::Sqlite => DatabaseType::Sqlite,
        }
    }
}

/// Settings that override the config file when given
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Query engine
    #[arg(long, global = true, value_enum, env = "TRAFFIC_REPORT_ENGINE")]
    pub engine: Option<EngineArg>,

    /// Server hostname
    #[arg(short = 'H', long, global = true, env = "TRAFFIC_REPORT_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short = 'p', long, global = true, env = "TRAFFIC_REPORT_PORT")]
    pub port: Option<u16>,

    /// Username
    #[arg(short = 'U', long, global = true, env = "TRAFFIC_REPORT_USER")]
    pub user: Option<String>,

    /// Password (prefer the environment variable)
    #[arg(long, global = true, env = "TRAFFIC_REPORT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Database name, or the file path for SQLite
    #[arg(short = 'd', long, global = true, env = "TRAFFIC_REPORT_DATABASE")]
    pub database: Option<String>,

    /// Flow table the catalogue reads
    #[arg(long, global = true, env = "TRAFFIC_REPORT_TABLE")]
    pub table: Option<String>,

    /// Directory that receives the run directories
    #[arg(short = 'o', long, global = true, value_name = "DIR", env = "TRAFFIC_REPORT_OUTPUT")]
    pub output_root: Option<PathBuf>,

    /// Connection attempts before giving up
    #[arg(long, global = true, env = "TRAFFIC_REPORT_RETRIES")]
    pub retries: Option<u32>,

    /// Seconds between connection attempts
    #[arg(long, global = true, value_name = "SECS", env = "TRAFFIC_REPORT_RETRY_DELAY")]
    pub retry_delay: Option<f64>,

    /// Deadline in seconds for connecting and querying
    #[arg(long, global = true, value_name = "SECS", env = "TRAFFIC_REPORT_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Render report targets concurrently
    #[arg(long, global = true)]
    pub parallel: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut ReportConfig) {
        if let Some(engine) = self.engine {
            config.set_engine(engine.into());
        }
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = Some(port);
        }
        if let Some(user) = &self.user {
            config.connection.username = user.clone();
        }
        if let Some(password) = &self.password {
            config.connection.password = Some(password.clone());
        }
        if let Some(database) = &self.database {
            config.connection.database = database.clone();
        }
        if let Some(table) = &self.table {
            config.dataset.table = table.clone();
        }
        if let Some(root) = &self.output_root {
            config.output.root = root.clone();
        }
        if let Some(retries) = self.retries {
            config.connection.max_retries = retries;
        }
        if let Some(delay) = self.retry_delay.filter(|d| d.is_finite() && *d >= 0.0) {
            config.connection.retry_delay = Duration::from_secs_f64(delay);
        }
        if let Some(timeout) = self.timeout {
            config.run.timeout_secs = Some(timeout);
        }
        if self.parallel {
            config.output.parallel = true;
        }
    }
}
