// Query Catalogue
// Named, parameterless analytical queries over the labeled traffic table

use super::dialect::Dialect;
use super::{ColumnDef, ColumnKind};
use serde::Serialize;

pub const DATASET_OVERVIEW: &str = "dataset-overview";
pub const ATTACK_DISTRIBUTION: &str = "attack-distribution";
pub const SERVICE_RISK: &str = "service-risk";
pub const PROTOCOL_RISK: &str = "protocol-risk";
pub const TEMPORAL_RISK: &str = "temporal-risk";
pub const TRAFFIC_STATISTICS: &str = "traffic-statistics";
pub const ANOMALY_PROFILE: &str = "anomaly-profile";

/// Numeric flow features profiled per traffic class
pub const ANOMALY_FEATURES: [&str; 5] = ["sbytes", "dbytes", "dur", "spkts", "dpkts"];

/// Minimum group size for a service/protocol pair to be ranked
pub const SERVICE_MIN_SAMPLES: usize = 10;
/// Number of service/protocol pairs kept
pub const SERVICE_TOP_N: usize = 20;

const ATTACK_COUNT: &str = "SUM(CASE WHEN label = 1 THEN 1 ELSE 0 END)";

/// A named query and the schema its result must have
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpec {
    name: String,
    description: String,
    sql: String,
    schema: Vec<ColumnDef>,
}

impl QuerySpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            sql: sql.into(),
            schema: Vec::new(),
        }
    }

    /// Append a column to the expected schema
    pub fn column(mut self, name: &str, kind: ColumnKind) -> Self {
        self.schema.push(ColumnDef::new(name, kind));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn schema(&self) -> &[ColumnDef] {
        &self.schema
    }
}

/// Read-only set of queries, kept in declaration order
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    entries: Vec<QuerySpec>,
}

impl Catalogue {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in report queries for `dialect`, reading from `table`
    pub fn builtin(dialect: Dialect, table: &str) -> Self {
        Self::empty()
            .with_entry(dataset_overview(dialect, table))
            .with_entry(attack_distribution(dialect, table))
            .with_entry(service_risk(dialect, table))
            .with_entry(protocol_risk(dialect, table))
            .with_entry(temporal_risk(dialect, table))
            .with_entry(traffic_statistics(dialect, table))
            .with_entry(anomaly_profile(dialect, table))
    }

    /// Add an entry; an existing entry with the same name is replaced in place
    pub fn with_entry(mut self, spec: QuerySpec) -> Self {
        match self.entries.iter_mut().find(|e| e.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.entries.push(spec),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&QuerySpec> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuerySpec> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn dataset_overview(dialect: Dialect, table: &str) -> QuerySpec {
    let sql = format!(
        "SELECT
    COUNT(*) AS total_records,
    {attacks} AS attack_records,
    {pct} AS attack_percentage,
    COUNT(DISTINCT proto) AS unique_protocols,
    COUNT(DISTINCT service) AS unique_services,
    COUNT(DISTINCT attack_cat) AS unique_attack_categories
FROM {table}",
        attacks = ATTACK_COUNT,
        pct = dialect.round(&format!("{} * 100.0 / NULLIF(COUNT(*), 0)", ATTACK_COUNT), 2),
        table = table,
    );
    QuerySpec::new(DATASET_OVERVIEW, "Headline figures for the whole dataset", sql)
        .column("total_records", ColumnKind::Integer)
        .column("attack_records", ColumnKind::Integer)
        .column("attack_percentage", ColumnKind::rate("attack_records", "total_records"))
        .column("unique_protocols", ColumnKind::Integer)
        .column("unique_services", ColumnKind::Integer)
        .column("unique_attack_categories", ColumnKind::Integer)
}

fn attack_distribution(dialect: Dialect, table: &str) -> QuerySpec {
    let sql = format!(
        "SELECT
    attack_cat,
    COUNT(*) AS count,
    {pct} AS percentage
FROM {table}
WHERE attack_cat IS NOT NULL
GROUP BY attack_cat
ORDER BY COUNT(*) DESC, attack_cat",
        pct = dialect.round("COUNT(*) * 100.0 / SUM(COUNT(*)) OVER ()", 2),
        table = table,
    );
    QuerySpec::new(ATTACK_DISTRIBUTION, "Record count and share per attack category", sql)
        .column("attack_cat", ColumnKind::Text)
        .column("count", ColumnKind::Integer)
        .column("percentage", ColumnKind::Percentage)
}

fn service_risk(dialect: Dialect, table: &str) -> QuerySpec {
    let sql = format!(
        "SELECT {top}
    service,
    proto,
    COUNT(*) AS total_connections,
    {attacks} AS attack_connections,
    {rate} AS attack_rate
FROM {table}
WHERE service <> '-' AND service IS NOT NULL
GROUP BY service, proto
HAVING COUNT(*) >= {min}
ORDER BY attack_rate DESC, service, proto{limit}",
        top = dialect.top_clause(SERVICE_TOP_N),
        attacks = ATTACK_COUNT,
        rate = dialect.round(&format!("{} * 100.0 / COUNT(*)", ATTACK_COUNT), 2),
        table = table,
        min = SERVICE_MIN_SAMPLES,
        limit = dialect.limit_clause(SERVICE_TOP_N),
    );
    QuerySpec::new(SERVICE_RISK, "Attack rate of the riskiest service/protocol pairs", sql)
        .column("service", ColumnKind::Text)
        .column("proto", ColumnKind::Text)
        .column("total_connections", ColumnKind::Integer)
        .column("attack_connections", ColumnKind::Integer)
        .column("attack_rate", ColumnKind::rate("attack_connections", "total_connections"))
}

fn protocol_risk(dialect: Dialect, table: &str) -> QuerySpec {
    let sql = format!(
        "SELECT
    proto,
    COUNT(*) AS total_flows,
    {attacks} AS malicious_flows,
    {rate} AS maliciousness_rate,
    {dur} AS avg_duration,
    {bytes} AS avg_total_bytes
FROM {table}
GROUP BY proto
ORDER BY maliciousness_rate DESC, proto",
        attacks = ATTACK_COUNT,
        rate = dialect.round(&format!("{} * 100.0 / COUNT(*)", ATTACK_COUNT), 2),
        dur = dialect.round("AVG(CAST(dur AS FLOAT))", 4),
        bytes = dialect.round("AVG(CAST(sbytes + dbytes AS FLOAT))", 2),
        table = table,
    );
    QuerySpec::new(PROTOCOL_RISK, "Maliciousness, duration and volume per protocol", sql)
        .column("proto", ColumnKind::Text)
        .column("total_flows", ColumnKind::Integer)
        .column("malicious_flows", ColumnKind::Integer)
        .column("maliciousness_rate", ColumnKind::rate("malicious_flows", "total_flows"))
        .column("avg_duration", ColumnKind::Float)
        .column("avg_total_bytes", ColumnKind::Float)
}

fn temporal_risk(dialect: Dialect, table: &str) -> QuerySpec {
    let hour = dialect.hour_of_day("stime");
    let sql = format!(
        "SELECT
    {hour} AS hour_of_day,
    COUNT(*) AS total_connections,
    {attacks} AS attack_connections,
    {rate} AS attack_rate
FROM {table}
WHERE stime > 0
GROUP BY {hour}
ORDER BY hour_of_day",
        hour = hour,
        attacks = ATTACK_COUNT,
        rate = dialect.round(&format!("{} * 100.0 / COUNT(*)", ATTACK_COUNT), 2),
        table = table,
    );
    QuerySpec::new(TEMPORAL_RISK, "Traffic and attack rate per hour of day (UTC)", sql)
        .column("hour_of_day", ColumnKind::HourOfDay)
        .column("total_connections", ColumnKind::Integer)
        .column("attack_connections", ColumnKind::Integer)
        .column("attack_rate", ColumnKind::rate("attack_connections", "total_connections"))
}

fn traffic_statistics(dialect: Dialect, table: &str) -> QuerySpec {
    let avg = |expr: &str| dialect.round(&format!("AVG(CAST({} AS FLOAT))", expr), 4);
    let sql = format!(
        "SELECT
    {mean_sbytes} AS mean_src_bytes,
    {mean_dbytes} AS mean_dst_bytes,
    MIN(sbytes + dbytes) AS min_total_bytes,
    MAX(sbytes + dbytes) AS max_total_bytes,
    {mean_dur} AS mean_duration,
    MAX(dur) AS max_duration,
    {mean_spkts} AS mean_src_packets,
    {mean_dpkts} AS mean_dst_packets,
    MAX(spkts + dpkts) AS max_total_packets,
    COUNT(dur) AS duration_samples,
    SUM(CAST(dur AS FLOAT)) AS duration_sum,
    SUM(CAST(dur AS FLOAT) * CAST(dur AS FLOAT)) AS duration_sum_sq,
    CAST(NULL AS FLOAT) AS duration_std
FROM {table}",
        mean_sbytes = avg("sbytes"),
        mean_dbytes = avg("dbytes"),
        mean_dur = avg("dur"),
        mean_spkts = avg("spkts"),
        mean_dpkts = avg("dpkts"),
        table = table,
    );
    QuerySpec::new(TRAFFIC_STATISTICS, "Byte, duration and packet statistics", sql)
        .column("mean_src_bytes", ColumnKind::Float)
        .column("mean_dst_bytes", ColumnKind::Float)
        .column("min_total_bytes", ColumnKind::Float)
        .column("max_total_bytes", ColumnKind::Float)
        .column("mean_duration", ColumnKind::Float)
        .column("max_duration", ColumnKind::Float)
        .column("mean_src_packets", ColumnKind::Float)
        .column("mean_dst_packets", ColumnKind::Float)
        .column("max_total_packets", ColumnKind::Float)
        .column("duration_samples", ColumnKind::Integer)
        .column("duration_sum", ColumnKind::Float)
        .column("duration_sum_sq", ColumnKind::Float)
        .column(
            "duration_std",
            ColumnKind::std_dev("duration_samples", "duration_sum", "duration_sum_sq"),
        )
}

/// Per-class sums and sums of squares of each flow feature. Means and
/// standard deviations (and from them z-scores) are derived in the report,
/// which keeps the SQL free of engine-specific statistics functions.
fn anomaly_profile(_dialect: Dialect, table: &str) -> QuerySpec {
    let class = "CASE WHEN label = 1 THEN 'Attack' ELSE 'Normal' END";
    let mut sums = String::new();
    for feature in ANOMALY_FEATURES {
        let value = format!("CAST(COALESCE({}, 0) AS FLOAT)", feature);
        sums.push_str(&format!(
            ",\n    SUM({v}) AS {f}_sum,\n    SUM({v} * {v}) AS {f}_sum_sq",
            v = value,
            f = feature
        ));
    }
    let sql = format!(
        "SELECT
    {class} AS traffic_class,
    COUNT(*) AS flows{sums}
FROM {table}
GROUP BY {class}
ORDER BY traffic_class DESC",
        class = class,
        sums = sums,
        table = table,
    );

    let mut spec = QuerySpec::new(ANOMALY_PROFILE, "Flow feature sums per traffic class for z-score profiling", sql)
        .column("traffic_class", ColumnKind::Text)
        .column("flows", ColumnKind::Integer);
    for feature in ANOMALY_FEATURES {
        spec = spec
            .column(&format!("{}_sum", feature), ColumnKind::Float)
            .column(&format!("{}_sum_sq", feature), ColumnKind::Float);
    }
    spec
}
