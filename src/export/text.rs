// Text Summary
// Human-readable digest of the report

use super::{write_artifact, Artifact, RenderError, RenderTarget};
use crate::db::traits::CellValue;
use crate::query::catalogue::{
    ANOMALY_PROFILE, ATTACK_DISTRIBUTION, DATASET_OVERVIEW, PROTOCOL_RISK, SERVICE_RISK,
    TEMPORAL_RISK, TRAFFIC_STATISTICS,
};
use crate::query::{AnomalyProfile, ResultSet, TabularResult};
use chrono::Local;
use std::fmt::Write;
use std::path::Path;

const INPUTS: [&str; 7] = [
    DATASET_OVERVIEW,
    ATTACK_DISTRIBUTION,
    PROTOCOL_RISK,
    SERVICE_RISK,
    TEMPORAL_RISK,
    TRAFFIC_STATISTICS,
    ANOMALY_PROFILE,
];

/// Rows listed per ranked section
const TOP: usize = 5;

/// `text-summary`
#[derive(Debug, Default)]
pub struct TextSummaryTarget;

impl TextSummaryTarget {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, results: &ResultSet) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "NETWORK TRAFFIC SECURITY REPORT");
        let _ = writeln!(out, "Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));

        if let Some(overview) = results.get(DATASET_OVERVIEW) {
            section(&mut out, "Dataset overview");
            for (label, column) in [
                ("Total records", "total_records"),
                ("Attack records", "attack_records"),
                ("Attack share (%)", "attack_percentage"),
                ("Protocols", "unique_protocols"),
                ("Services", "unique_services"),
                ("Attack categories", "unique_attack_categories"),
            ] {
                let _ = writeln!(out, "  {:<20} {}", label, cell(overview, 0, column));
            }
        }

        if let Some(attacks) = results.get(ATTACK_DISTRIBUTION) {
            section(&mut out, "Attack categories");
            ranked(&mut out, attacks, &["attack_cat"], &[("count", ""), ("percentage", "%")]);
        }

        if let Some(protocols) = results.get(PROTOCOL_RISK) {
            section(&mut out, "Riskiest protocols");
            ranked(
                &mut out,
                protocols,
                &["proto"],
                &[("maliciousness_rate", "% malicious"), ("total_flows", " flows")],
            );
        }

        if let Some(services) = results.get(SERVICE_RISK) {
            section(&mut out, "Riskiest services");
            ranked(
                &mut out,
                services,
                &["service", "proto"],
                &[("attack_rate", "% attacks"), ("total_connections", " connections")],
            );
        }

        if let Some(hours) = results.get(TEMPORAL_RISK) {
            section(&mut out, "Peak attack hours (UTC)");
            let mut by_rate: Vec<&Vec<CellValue>> = hours.rows().iter().collect();
            if let Some(idx) = hours.column_index("attack_rate") {
                by_rate.sort_by(|a, b| {
                    let a = a[idx].as_f64().unwrap_or(0.0);
                    let b = b[idx].as_f64().unwrap_or(0.0);
                    b.total_cmp(&a)
                });
            }
            let hour_idx = hours.column_index("hour_of_day");
            let rate_idx = hours.column_index("attack_rate");
            for row in by_rate.into_iter().take(TOP) {
                let hour = hour_idx.map(|i| row[i].to_string()).unwrap_or_default();
                let rate = rate_idx.map(|i| row[i].to_string()).unwrap_or_default();
                let _ = writeln!(out, "  {:>2}:00  {}% attacks", hour, rate);
            }
            if hours.is_empty() {
                let _ = writeln!(out, "  (no data)");
            }
        }

        if let Some(stats) = results.get(TRAFFIC_STATISTICS) {
            section(&mut out, "Traffic statistics");
            for (label, column) in [
                ("Mean source bytes", "mean_src_bytes"),
                ("Mean dest bytes", "mean_dst_bytes"),
                ("Min total bytes", "min_total_bytes"),
                ("Max total bytes", "max_total_bytes"),
                ("Mean duration (s)", "mean_duration"),
                ("Max duration (s)", "max_duration"),
                ("Duration std (s)", "duration_std"),
                ("Mean source packets", "mean_src_packets"),
                ("Mean dest packets", "mean_dst_packets"),
                ("Max total packets", "max_total_packets"),
            ] {
                let _ = writeln!(out, "  {:<20} {}", label, cell(stats, 0, column));
            }
        }

        match AnomalyProfile::from_results(results) {
            Some(Ok(profile)) => {
                section(&mut out, "Anomaly profile (mean z-score)");
                for class in &profile.classes {
                    let _ = writeln!(
                        out,
                        "  {:<20} {} flows, anomaly score {}",
                        class.class, class.flows, class.anomaly_score
                    );
                }
                for feature in &profile.features {
                    let scores = feature
                        .class_z
                        .iter()
                        .map(|z| format!("{:+.2}", z))
                        .collect::<Vec<_>>()
                        .join(" / ");
                    let _ = writeln!(out, "  {:<20} {}", feature.feature, scores);
                }
            }
            Some(Err(e)) => {
                section(&mut out, "Anomaly profile (mean z-score)");
                let _ = writeln!(out, "  {}", e);
            }
            None => {}
        }

        let missing: Vec<&str> = INPUTS.iter().copied().filter(|n| !results.contains(n)).collect();
        if !missing.is_empty() {
            section(&mut out, "Unavailable sections");
            for name in missing {
                let _ = writeln!(out, "  {}", name);
            }
        }

        out
    }
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "{}", "-".repeat(title.len()));
}

fn cell(table: &TabularResult, row: usize, column: &str) -> String {
    table
        .value(row, column)
        .map(|c| c.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

/// First `TOP` rows (tables arrive already ordered by the catalogue)
fn ranked(out: &mut String, table: &TabularResult, labels: &[&str], values: &[(&str, &str)]) {
    if table.is_empty() {
        let _ = writeln!(out, "  (no data)");
        return;
    }
    for (i, _) in table.rows().iter().enumerate().take(TOP) {
        let label = labels
            .iter()
            .map(|l| cell(table, i, l))
            .collect::<Vec<_>>()
            .join("/");
        let figures = values
            .iter()
            .map(|(column, unit)| format!("{}{}", cell(table, i, column), unit))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "  {}. {:<24} {}", i + 1, label, figures);
    }
}

impl RenderTarget for TextSummaryTarget {
    fn name(&self) -> &str {
        "text-summary"
    }

    fn extension(&self) -> &str {
        "txt"
    }

    fn inputs(&self) -> &[&'static str] {
        &INPUTS
    }

    fn render(&self, results: &ResultSet, path: &Path) -> Result<Artifact, RenderError> {
        write_artifact(path, self.build(results).as_bytes())
    }
}
