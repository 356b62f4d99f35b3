// JSON Summary
// Machine-readable report document plus every input table as row objects

use super::{write_artifact, Artifact, RenderError, RenderTarget};
use crate::db::traits::CellValue;
use crate::query::catalogue::{
    ANOMALY_PROFILE, ATTACK_DISTRIBUTION, DATASET_OVERVIEW, PROTOCOL_RISK, SERVICE_RISK,
    TEMPORAL_RISK, TRAFFIC_STATISTICS,
};
use crate::query::{AnomalyProfile, ResultSet, TabularResult};
use chrono::Local;
use serde_json::{json, Map, Value};
use std::path::Path;

/// Converts tables to JSON values
pub struct JsonExporter {
    pretty_print: bool,
}

impl JsonExporter {
    pub fn new(pretty_print: bool) -> Self {
        Self { pretty_print }
    }

    pub fn with_default_options() -> Self {
        Self::new(true)
    }

    /// Serialize any JSON value according to the exporter options
    pub fn serialize(&self, value: &Value) -> Result<String, RenderError> {
        let text = if self.pretty_print {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(text)
    }

    /// Table rows as an array of `{column: value}` objects
    pub fn table_to_json(&self, table: &TabularResult) -> Value {
        Value::Array(
            table
                .rows()
                .iter()
                .map(|row| self.row_to_json_object(table, row))
                .collect(),
        )
    }

    fn row_to_json_object(&self, table: &TabularResult, row: &[CellValue]) -> Value {
        let mut obj = Map::new();

        for (col, value) in table.columns().iter().zip(row.iter()) {
            obj.insert(col.name.clone(), self.cell_to_json_value(value));
        }

        Value::Object(obj)
    }

    pub fn cell_to_json_value(&self, value: &CellValue) -> Value {
        match value {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int(i) => json!(*i),
            CellValue::Float(f) => {
                // Handle special float values
                if f.is_nan() {
                    Value::String("NaN".to_string())
                } else if f.is_infinite() {
                    if *f > 0.0 {
                        Value::String("Infinity".to_string())
                    } else {
                        Value::String("-Infinity".to_string())
                    }
                } else {
                    json!(*f)
                }
            }
            CellValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// `{key_column: value_column}` over every row
    fn column_map(&self, table: &TabularResult, key: &str, value: &str) -> Value {
        let (Some(k), Some(v)) = (table.column_index(key), table.column_index(value)) else {
            return Value::Object(Map::new());
        };
        let map = table
            .rows()
            .iter()
            .map(|row| (row[k].to_string(), self.cell_to_json_value(&row[v])))
            .collect();
        Value::Object(map)
    }

    /// Selected columns of a single-row table, renamed
    fn pick(&self, table: &TabularResult, fields: &[(&str, &str)]) -> Value {
        let mut obj = Map::new();
        for (out, column) in fields {
            let value = table
                .value(0, column)
                .map(|c| self.cell_to_json_value(c))
                .unwrap_or(Value::Null);
            obj.insert(out.to_string(), value);
        }
        Value::Object(obj)
    }
}

/// `json-summary`: headline figures, distributions and raw tables in one document
pub struct JsonSummaryTarget {
    exporter: JsonExporter,
}

const INPUTS: [&str; 7] = [
    DATASET_OVERVIEW,
    ATTACK_DISTRIBUTION,
    PROTOCOL_RISK,
    SERVICE_RISK,
    TEMPORAL_RISK,
    TRAFFIC_STATISTICS,
    ANOMALY_PROFILE,
];

impl JsonSummaryTarget {
    pub fn new() -> Self {
        Self {
            exporter: JsonExporter::with_default_options(),
        }
    }

    /// Build the document; sections whose table is absent are omitted
    pub fn build(&self, results: &ResultSet) -> Value {
        let ex = &self.exporter;
        let mut doc = Map::new();
        doc.insert("generation_time".to_string(), json!(Local::now().to_rfc3339()));

        if let Some(overview) = results.get(DATASET_OVERVIEW) {
            doc.insert(
                "dataset_info".to_string(),
                ex.pick(
                    overview,
                    &[
                        ("total_records", "total_records"),
                        ("total_attacks", "attack_records"),
                        ("attack_percentage", "attack_percentage"),
                        ("unique_protocols", "unique_protocols"),
                        ("unique_services", "unique_services"),
                        ("unique_attack_categories", "unique_attack_categories"),
                    ],
                ),
            );
        }
        if let Some(attacks) = results.get(ATTACK_DISTRIBUTION) {
            doc.insert("attack_distribution".to_string(), ex.column_map(attacks, "attack_cat", "count"));
        }
        if let Some(protocols) = results.get(PROTOCOL_RISK) {
            doc.insert("protocol_distribution".to_string(), ex.column_map(protocols, "proto", "total_flows"));
            doc.insert(
                "protocol_maliciousness".to_string(),
                ex.column_map(protocols, "proto", "maliciousness_rate"),
            );
        }
        if let Some(services) = results.get(SERVICE_RISK) {
            doc.insert("service_risk".to_string(), ex.table_to_json(services));
        }
        if let Some(hours) = results.get(TEMPORAL_RISK) {
            doc.insert("hourly_attack_rate".to_string(), ex.column_map(hours, "hour_of_day", "attack_rate"));
        }
        if let Some(stats) = results.get(TRAFFIC_STATISTICS) {
            doc.insert(
                "statistical_summary".to_string(),
                json!({
                    "bytes_stats": ex.pick(stats, &[
                        ("mean_sbytes", "mean_src_bytes"),
                        ("mean_dbytes", "mean_dst_bytes"),
                        ("max_total_bytes", "max_total_bytes"),
                        ("min_total_bytes", "min_total_bytes"),
                    ]),
                    "duration_stats": ex.pick(stats, &[
                        ("mean_duration", "mean_duration"),
                        ("max_duration", "max_duration"),
                        ("duration_std", "duration_std"),
                    ]),
                    "packet_stats": ex.pick(stats, &[
                        ("mean_spkts", "mean_src_packets"),
                        ("mean_dpkts", "mean_dst_packets"),
                        ("max_total_pkts", "max_total_packets"),
                    ]),
                }),
            );
        }

        match AnomalyProfile::from_results(results) {
            Some(Ok(profile)) => {
                doc.insert("anomaly_profile".to_string(), serde_json::to_value(&profile).unwrap_or(Value::Null));
            }
            Some(Err(e)) => {
                doc.insert("anomaly_profile".to_string(), json!({ "error": e.to_string() }));
            }
            None => {}
        }

        let tables: Map<String, Value> = results
            .iter()
            .map(|(name, table)| (name.to_string(), ex.table_to_json(table)))
            .collect();
        doc.insert("tables".to_string(), Value::Object(tables));

        Value::Object(doc)
    }
}

impl Default for JsonSummaryTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTarget for JsonSummaryTarget {
    fn name(&self) -> &str {
        "json-summary"
    }

    fn extension(&self) -> &str {
        "json"
    }

    fn inputs(&self) -> &[&'static str] {
        &INPUTS
    }

    fn render(&self, results: &ResultSet, path: &Path) -> Result<Artifact, RenderError> {
        let text = self.exporter.serialize(&self.build(results))?;
        write_artifact(path, text.as_bytes())
    }
}
