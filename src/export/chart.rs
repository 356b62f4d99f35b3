// Static Chart Targets
// Bar and line charts rendered to standalone SVG files

use super::svg::{format_tick, nice_ceiling, Anchor, SvgDocument, PALETTE};
use super::{require, write_artifact, Artifact, RenderError, RenderTarget};
use crate::db::traits::CellValue;
use crate::query::catalogue::{ATTACK_DISTRIBUTION, PROTOCOL_RISK, SERVICE_RISK, TEMPORAL_RISK};
use crate::query::{ResultSet, TabularResult};
use std::path::Path;

const WIDTH: u32 = 960;
const HEIGHT: u32 = 540;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 90.0;
const MARGIN_LEFT: f64 = 80.0;
const TICKS: usize = 5;

/// How a chart lays out its points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartStyle {
    /// One vertical bar per row, in row order
    Bars,
    /// One horizontal bar per row, first row on top
    HorizontalBars,
    /// A line over hours 0-23; hours absent from the table are drawn as 0
    HourlyLine,
}

/// A static chart over one catalogue table
#[derive(Debug, Clone)]
pub struct ChartTarget {
    name: &'static str,
    inputs: [&'static str; 1],
    title: &'static str,
    /// Columns joined with " / " to label each point
    labels: &'static [&'static str],
    value: &'static str,
    value_label: &'static str,
    style: ChartStyle,
}

impl ChartTarget {
    pub fn attack_distribution() -> Self {
        Self {
            name: "attack-distribution-chart",
            inputs: [ATTACK_DISTRIBUTION],
            title: "Attack Category Distribution",
            labels: &["attack_cat"],
            value: "count",
            value_label: "Records",
            style: ChartStyle::Bars,
        }
    }

    pub fn protocol_risk() -> Self {
        Self {
            name: "protocol-risk-chart",
            inputs: [PROTOCOL_RISK],
            title: "Maliciousness Rate by Protocol",
            labels: &["proto"],
            value: "maliciousness_rate",
            value_label: "Malicious flows (%)",
            style: ChartStyle::Bars,
        }
    }

    pub fn service_risk() -> Self {
        Self {
            name: "service-risk-chart",
            inputs: [SERVICE_RISK],
            title: "Riskiest Services (attack rate)",
            labels: &["service", "proto"],
            value: "attack_rate",
            value_label: "Attack connections (%)",
            style: ChartStyle::HorizontalBars,
        }
    }

    pub fn temporal_risk() -> Self {
        Self {
            name: "temporal-risk-chart",
            inputs: [TEMPORAL_RISK],
            title: "Attack Rate by Hour of Day (UTC)",
            labels: &["hour_of_day"],
            value: "attack_rate",
            value_label: "Attack connections (%)",
            style: ChartStyle::HourlyLine,
        }
    }

    pub fn style(&self) -> ChartStyle {
        self.style
    }

    /// Label/value pairs in row order; a missing or non-numeric value fails the chart
    fn points(&self, table: &TabularResult) -> Result<Vec<(String, f64)>, RenderError> {
        let label_idx = self
            .labels
            .iter()
            .map(|l| {
                table
                    .column_index(l)
                    .ok_or_else(|| RenderError::InvalidData(format!("column '{}' not in '{}'", l, table.query())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let value_idx = table
            .column_index(self.value)
            .ok_or_else(|| RenderError::InvalidData(format!("column '{}' not in '{}'", self.value, table.query())))?;

        table
            .rows()
            .iter()
            .enumerate()
            .map(|(row_no, row)| {
                let label = label_idx
                    .iter()
                    .map(|&i| row[i].to_string())
                    .collect::<Vec<_>>()
                    .join(" / ");
                let value = row[value_idx]
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        RenderError::InvalidData(format!(
                            "row {} of '{}' has no numeric '{}' ({})",
                            row_no,
                            table.query(),
                            self.value,
                            row[value_idx]
                        ))
                    })?;
                Ok((label, value))
            })
            .collect()
    }

    fn draw(&self, points: &[(String, f64)]) -> String {
        let mut doc = SvgDocument::new(WIDTH, HEIGHT);
        doc.text(doc.width() / 2.0, 32.0, self.title, Anchor::Middle, 20);

        if points.is_empty() {
            doc.text(doc.width() / 2.0, doc.height() / 2.0, "No data", Anchor::Middle, 16);
            return doc.finish();
        }

        match self.style {
            ChartStyle::Bars => draw_bars(&mut doc, points, self.value_label),
            ChartStyle::HorizontalBars => draw_horizontal_bars(&mut doc, points, self.value_label),
            ChartStyle::HourlyLine => draw_hourly_line(&mut doc, points, self.value_label),
        }
        doc.finish()
    }
}

impl RenderTarget for ChartTarget {
    fn name(&self) -> &str {
        self.name
    }

    fn extension(&self) -> &str {
        "svg"
    }

    fn inputs(&self) -> &[&'static str] {
        &self.inputs
    }

    fn render(&self, results: &ResultSet, path: &Path) -> Result<Artifact, RenderError> {
        let table = require(results, self.inputs[0])?;
        let mut points = self.points(table)?;
        if self.style == ChartStyle::HourlyLine {
            points = fill_hours(&points)?;
        }
        write_artifact(path, self.draw(&points).as_bytes())
    }
}

/// 24 points, one per hour; absent hours are 0
fn fill_hours(points: &[(String, f64)]) -> Result<Vec<(String, f64)>, RenderError> {
    let mut hours = [0.0f64; 24];
    for (label, value) in points {
        let hour = CellValue::Text(label.clone())
            .as_i64()
            .filter(|h| (0..24).contains(h))
            .ok_or_else(|| RenderError::InvalidData(format!("'{}' is not an hour of day", label)))?;
        hours[hour as usize] = *value;
    }
    Ok(hours
        .iter()
        .enumerate()
        .map(|(h, v)| (format!("{:02}", h), *v))
        .collect())
}

struct Plot {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl Plot {
    fn of(doc: &SvgDocument) -> Self {
        Self {
            left: MARGIN_LEFT,
            top: MARGIN_TOP,
            width: doc.width() - MARGIN_LEFT - MARGIN_RIGHT,
            height: doc.height() - MARGIN_TOP - MARGIN_BOTTOM,
        }
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

fn axis_max(points: &[(String, f64)]) -> f64 {
    nice_ceiling(points.iter().map(|(_, v)| *v).fold(0.0, f64::max))
}

/// Horizontal gridlines with tick labels on the left
fn value_axis(doc: &mut SvgDocument, plot: &Plot, max: f64, label: &str) {
    for i in 0..=TICKS {
        let value = max * i as f64 / TICKS as f64;
        let y = plot.bottom() - plot.height * i as f64 / TICKS as f64;
        doc.line(plot.left, y, plot.left + plot.width, y, "#e0e0e0", 1.0);
        doc.text(plot.left - 8.0, y + 4.0, &format_tick(value), Anchor::End, 11);
    }
    doc.rotated_text(18.0, plot.top + plot.height / 2.0, label, -90.0, 12);
    doc.line(plot.left, plot.top, plot.left, plot.bottom(), "#333333", 1.0);
}

fn draw_bars(doc: &mut SvgDocument, points: &[(String, f64)], value_label: &str) {
    let plot = Plot::of(doc);
    let max = axis_max(points);
    value_axis(doc, &plot, max, value_label);

    let slot = plot.width / points.len() as f64;
    let bar = slot * 0.7;
    for (i, (label, value)) in points.iter().enumerate() {
        let h = plot.height * value.max(0.0) / max;
        let x = plot.left + slot * i as f64 + (slot - bar) / 2.0;
        doc.rect(x, plot.bottom() - h, bar, h, PALETTE[i % PALETTE.len()]);
        doc.text(x + bar / 2.0, plot.bottom() - h - 4.0, &format_tick(*value), Anchor::Middle, 10);
        doc.rotated_text(x + bar / 2.0, plot.bottom() + 14.0, label, -35.0, 11);
    }
}

fn draw_horizontal_bars(doc: &mut SvgDocument, points: &[(String, f64)], value_label: &str) {
    // Wider left margin for "service / proto" labels
    let plot = Plot {
        left: 170.0,
        ..Plot::of(doc)
    };
    let plot = Plot {
        width: doc.width() - plot.left - MARGIN_RIGHT,
        ..plot
    };
    let max = axis_max(points);

    for i in 0..=TICKS {
        let value = max * i as f64 / TICKS as f64;
        let x = plot.left + plot.width * i as f64 / TICKS as f64;
        doc.line(x, plot.top, x, plot.bottom(), "#e0e0e0", 1.0);
        doc.text(x, plot.bottom() + 16.0, &format_tick(value), Anchor::Middle, 11);
    }
    doc.text(plot.left + plot.width / 2.0, plot.bottom() + 40.0, value_label, Anchor::Middle, 12);

    let slot = plot.height / points.len() as f64;
    let bar = slot * 0.7;
    for (i, (label, value)) in points.iter().enumerate() {
        let w = plot.width * value.max(0.0) / max;
        let y = plot.top + slot * i as f64 + (slot - bar) / 2.0;
        doc.rect(plot.left, y, w, bar, PALETTE[i % PALETTE.len()]);
        doc.text(plot.left - 6.0, y + bar / 2.0 + 4.0, label, Anchor::End, 11);
        doc.text(plot.left + w + 4.0, y + bar / 2.0 + 4.0, &format_tick(*value), Anchor::Start, 10);
    }
}

fn draw_hourly_line(doc: &mut SvgDocument, points: &[(String, f64)], value_label: &str) {
    let plot = Plot::of(doc);
    let max = axis_max(points);
    value_axis(doc, &plot, max, value_label);

    let step = plot.width / (points.len().max(2) - 1) as f64;
    let coords: Vec<(f64, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, (_, v))| (plot.left + step * i as f64, plot.bottom() - plot.height * v.max(0.0) / max))
        .collect();

    doc.polyline(&coords, PALETTE[3], 2.5);
    for ((x, y), (label, _)) in coords.iter().zip(points) {
        doc.circle(*x, *y, 3.5, PALETTE[3]);
        doc.text(*x, plot.bottom() + 18.0, label, Anchor::Middle, 11);
    }
    doc.text(plot.left + plot.width / 2.0, plot.bottom() + 44.0, "Hour of day", Anchor::Middle, 12);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures::sample_results;
    use crate::query::{ColumnDef, ColumnKind};

    fn render_to_string(target: &ChartTarget, results: &ResultSet) -> Result<String, RenderError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        let artifact = target.render(results, &path)?;
        assert!(artifact.bytes > 0);
        Ok(std::fs::read_to_string(path).unwrap())
    }

    #[test]
    fn test_every_chart_renders_sample_data() {
        let results = sample_results();
        for target in [
            ChartTarget::attack_distribution(),
            ChartTarget::protocol_risk(),
            ChartTarget::service_risk(),
            ChartTarget::temporal_risk(),
        ] {
            let svg = render_to_string(&target, &results).unwrap();
            assert!(svg.contains("<svg"), "{}", target.name());
            assert!(svg.contains(target.title), "{}", target.name());
        }
    }

    #[test]
    fn test_labels_are_escaped() {
        let svg = render_to_string(&ChartTarget::attack_distribution(), &sample_results()).unwrap();
        assert!(svg.contains("&lt;script&gt;"));
        assert!(!svg.contains("<script>"));
    }

    #[test]
    fn test_service_labels_join_columns() {
        let svg = render_to_string(&ChartTarget::service_risk(), &sample_results()).unwrap();
        assert!(svg.contains("dns / udp"));
    }

    #[test]
    fn test_missing_hours_are_zero() {
        let points = vec![("02".to_string(), 60.0), ("14".to_string(), 20.0)];
        let filled = fill_hours(&points).unwrap();
        assert_eq!(filled.len(), 24);
        assert_eq!(filled[2], ("02".to_string(), 60.0));
        assert_eq!(filled[3], ("03".to_string(), 0.0));
        assert_eq!(filled[14].1, 20.0);

        assert!(fill_hours(&[("unknown".to_string(), 1.0)]).is_err());
    }

    #[test]
    fn test_empty_table_draws_placeholder() {
        let mut results = ResultSet::new();
        results.insert(TabularResult::empty(
            PROTOCOL_RISK,
            vec![
                ColumnDef::new("proto", ColumnKind::Text),
                ColumnDef::new("maliciousness_rate", ColumnKind::Float),
            ],
        ));
        let svg = render_to_string(&ChartTarget::protocol_risk(), &results).unwrap();
        assert!(svg.contains("No data"));
    }

    #[test]
    fn test_null_value_fails_the_chart() {
        let mut results = ResultSet::new();
        results.insert(
            TabularResult::new(
                ATTACK_DISTRIBUTION,
                vec![
                    ColumnDef::new("attack_cat", ColumnKind::Text),
                    ColumnDef::new("count", ColumnKind::Integer),
                ],
                vec![vec![CellValue::Text("DoS".to_string()), CellValue::Null]],
            )
            .unwrap(),
        );
        let err = render_to_string(&ChartTarget::attack_distribution(), &results).unwrap_err();
        assert!(matches!(err, RenderError::InvalidData(_)));
    }

    #[test]
    fn test_missing_input_is_reported() {
        let err = render_to_string(&ChartTarget::temporal_risk(), &ResultSet::new()).unwrap_err();
        assert!(matches!(err, RenderError::MissingInput(name) if name == TEMPORAL_RISK));
    }
}
