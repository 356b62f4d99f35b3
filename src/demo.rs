// Demo Dataset
// Writes a synthetic, UNSW-NB15 shaped flow table into a SQLite file

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// First capture timestamp of the real dataset (2015-01-22 UTC)
const CAPTURE_START: i64 = 1_421_884_800;

const ATTACK_CATEGORIES: [(&str, f64); 10] = [
    ("Normal", 0.60),
    ("DoS", 0.08),
    ("Exploits", 0.08),
    ("Reconnaissance", 0.06),
    ("Analysis", 0.04),
    ("Backdoor", 0.03),
    ("Fuzzers", 0.03),
    ("Generic", 0.03),
    ("Shellcode", 0.03),
    ("Worms", 0.02),
];

const PROTOCOLS: [(&str, f64); 4] = [("tcp", 0.70), ("udp", 0.20), ("icmp", 0.08), ("arp", 0.02)];

const SERVICES: [(&str, f64); 7] = [
    ("http", 0.30),
    ("https", 0.20),
    ("ssh", 0.15),
    ("ftp", 0.10),
    ("dns", 0.10),
    ("smtp", 0.05),
    ("-", 0.10),
];

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Invalid weights: {0}")]
    Weights(#[from] rand::distributions::WeightedError),
}

/// Parameters of a generated dataset
#[derive(Debug, Clone)]
pub struct DemoDataset {
    pub path: PathBuf,
    pub table: String,
    pub rows: usize,
    pub seed: u64,
}

impl DemoDataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: "unsw_nb15_combined".to_string(),
            rows: 10_000,
            seed: 42,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Create (or replace) the table and fill it; returns the rows written
    pub fn write(&self) -> Result<usize, DemoError> {
        if !crate::query::dialect::is_valid_identifier(&self.table) || self.table.contains('.') {
            return Err(DemoError::InvalidTable(self.table.clone()));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(&self.path)?;
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
            CREATE TABLE {table} (
                id INTEGER PRIMARY KEY,
                stime INTEGER NOT NULL,
                proto TEXT NOT NULL,
                service TEXT NOT NULL,
                dur REAL NOT NULL,
                sbytes INTEGER NOT NULL,
                dbytes INTEGER NOT NULL,
                spkts INTEGER NOT NULL,
                dpkts INTEGER NOT NULL,
                attack_cat TEXT NOT NULL,
                label INTEGER NOT NULL
            );",
            table = self.table
        ))?;

        let mut generator = FlowGenerator::new(self.seed)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (stime, proto, service, dur, sbytes, dbytes, spkts, dpkts, attack_cat, label)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                self.table
            ))?;
            for _ in 0..self.rows {
                let flow = generator.next_flow();
                stmt.execute(params![
                    flow.stime,
                    flow.proto,
                    flow.service,
                    flow.dur,
                    flow.sbytes,
                    flow.dbytes,
                    flow.spkts,
                    flow.dpkts,
                    flow.attack_cat,
                    flow.label,
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(path = %self.path.display(), table = %self.table, rows = self.rows, "demo dataset written");
        Ok(self.rows)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One synthetic flow record
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub stime: i64,
    pub proto: &'static str,
    pub service: &'static str,
    pub dur: f64,
    pub sbytes: i64,
    pub dbytes: i64,
    pub spkts: i64,
    pub dpkts: i64,
    pub attack_cat: &'static str,
    pub label: i64,
}

/// Deterministic flow source for a given seed
pub struct FlowGenerator {
    rng: StdRng,
    categories: WeightedIndex<f64>,
    protocols: WeightedIndex<f64>,
    services: WeightedIndex<f64>,
}

impl FlowGenerator {
    pub fn new(seed: u64) -> Result<Self, DemoError> {
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            categories: WeightedIndex::new(ATTACK_CATEGORIES.iter().map(|(_, w)| *w))?,
            protocols: WeightedIndex::new(PROTOCOLS.iter().map(|(_, w)| *w))?,
            services: WeightedIndex::new(SERVICES.iter().map(|(_, w)| *w))?,
        })
    }

    pub fn next_flow(&mut self) -> Flow {
        let attack_cat = ATTACK_CATEGORIES[self.categories.sample(&mut self.rng)].0;
        let proto = PROTOCOLS[self.protocols.sample(&mut self.rng)].0;
        let service = SERVICES[self.services.sample(&mut self.rng)].0;
        let hour: i64 = self.rng.gen_range(0..24);
        let second: i64 = self.rng.gen_range(0..3600);

        Flow {
            stime: CAPTURE_START + hour * 3600 + second,
            proto,
            service,
            dur: self.exponential(2.0),
            sbytes: self.lognormal(8.0, 2.0).round() as i64,
            dbytes: self.lognormal(7.0, 2.0).round() as i64,
            spkts: self.poisson(10.0),
            dpkts: self.poisson(8.0),
            attack_cat,
            label: i64::from(attack_cat != "Normal"),
        }
    }

    /// Standard normal via Box-Muller
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    fn lognormal(&mut self, mu: f64, sigma: f64) -> f64 {
        (mu + sigma * self.standard_normal()).exp()
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        -mean * (1.0 - self.rng.gen::<f64>()).ln()
    }

    /// Knuth's method; fine for small means
    fn poisson(&mut self, lambda: f64) -> i64 {
        let limit = (-lambda).exp();
        let mut k = 0;
        let mut p = 1.0;
        loop {
            p *= self.rng.gen::<f64>();
            if p <= limit {
                return k;
            }
            k += 1;
        }
    }
}
