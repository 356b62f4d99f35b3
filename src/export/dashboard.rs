// Interactive Dashboard
// Self-contained HTML page with Vega-Lite panels and table fallbacks

use super::json::JsonExporter;
use super::svg::escape;
use super::{write_artifact, Artifact, RenderError, RenderTarget};
use crate::query::catalogue::{
    ATTACK_DISTRIBUTION, DATASET_OVERVIEW, PROTOCOL_RISK, SERVICE_RISK, TEMPORAL_RISK,
};
use crate::query::{ResultSet, TabularResult};
use chrono::Local;
use serde_json::{json, Value};
use std::fmt::Write;
use std::path::Path;

const INPUTS: [&str; 5] = [
    DATASET_OVERVIEW,
    ATTACK_DISTRIBUTION,
    PROTOCOL_RISK,
    SERVICE_RISK,
    TEMPORAL_RISK,
];

const VEGA: &str = "https://cdn.jsdelivr.net/npm/vega@5";
const VEGA_LITE: &str = "https://cdn.jsdelivr.net/npm/vega-lite@5";
const VEGA_EMBED: &str = "https://cdn.jsdelivr.net/npm/vega-embed@6";

struct Panel {
    query: &'static str,
    title: &'static str,
    spec: fn(Value) -> Value,
}

const PANELS: [Panel; 4] = [
    Panel {
        query: ATTACK_DISTRIBUTION,
        title: "Attack Category Distribution",
        spec: attack_spec,
    },
    Panel {
        query: PROTOCOL_RISK,
        title: "Maliciousness Rate by Protocol",
        spec: protocol_spec,
    },
    Panel {
        query: SERVICE_RISK,
        title: "Riskiest Services",
        spec: service_spec,
    },
    Panel {
        query: TEMPORAL_RISK,
        title: "Attack Rate by Hour of Day (UTC)",
        spec: temporal_spec,
    },
];

fn attack_spec(values: Value) -> Value {
    json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
        "width": "container",
        "height": 300,
        "data": { "values": values },
        "mark": { "type": "arc", "innerRadius": 60, "tooltip": true },
        "encoding": {
            "theta": { "field": "count", "type": "quantitative" },
            "color": { "field": "attack_cat", "type": "nominal", "title": "Category" }
        }
    })
}

fn protocol_spec(values: Value) -> Value {
    json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
        "width": "container",
        "height": 300,
        "data": { "values": values },
        "mark": { "type": "bar", "tooltip": true },
        "encoding": {
            "x": { "field": "proto", "type": "nominal", "sort": "-y", "title": "Protocol" },
            "y": { "field": "maliciousness_rate", "type": "quantitative", "title": "Malicious flows (%)" },
            "color": { "field": "total_flows", "type": "quantitative", "title": "Flows" }
        }
    })
}

fn service_spec(values: Value) -> Value {
    json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
        "width": "container",
        "height": 300,
        "data": { "values": values },
        "transform": [
            { "calculate": "datum.service + ' / ' + datum.proto", "as": "label" }
        ],
        "mark": { "type": "bar", "tooltip": true },
        "encoding": {
            "y": { "field": "label", "type": "nominal", "sort": "-x", "title": "Service / protocol" },
            "x": { "field": "attack_rate", "type": "quantitative", "title": "Attack connections (%)" }
        }
    })
}

fn temporal_spec(values: Value) -> Value {
    json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
        "width": "container",
        "height": 300,
        "data": { "values": values },
        "mark": { "type": "line", "point": true, "tooltip": true },
        "encoding": {
            "x": { "field": "hour_of_day", "type": "quantitative", "title": "Hour", "scale": { "domain": [0, 23] } },
            "y": { "field": "attack_rate", "type": "quantitative", "title": "Attack connections (%)" }
        }
    })
}

/// `interactive-dashboard`
pub struct DashboardTarget {
    exporter: JsonExporter,
}

impl DashboardTarget {
    pub fn new() -> Self {
        Self {
            exporter: JsonExporter::new(false),
        }
    }

    /// Build the page; panels whose table is absent are listed as unavailable
    pub fn build(&self, results: &ResultSet) -> Result<String, RenderError> {
        let mut body = String::new();

        if let Some(overview) = results.get(DATASET_OVERVIEW) {
            body.push_str(&headline(overview));
        }

        let mut scripts = String::new();
        let mut missing = Vec::new();
        for (idx, panel) in PANELS.iter().enumerate() {
            let Some(table) = results.get(panel.query) else {
                missing.push(panel.query);
                continue;
            };
            let spec = (panel.spec)(self.exporter.table_to_json(table));
            let spec = embed_json(&self.exporter.serialize(&spec)?);

            let _ = writeln!(
                body,
                r#"<section class="panel"><h2>{title}</h2><div class="chart" id="panel-{idx}"></div>"#,
                title = escape(panel.title),
                idx = idx
            );
            let _ = writeln!(body, "<details><summary>Data</summary>{}</details></section>", html_table(table));
            let _ = writeln!(scripts, "vegaEmbed('#panel-{}', {}, {{actions: false}});", idx, spec);
        }

        if !missing.is_empty() {
            let items: Vec<String> = missing.iter().map(|m| format!("<li>{}</li>", escape(m))).collect();
            let _ = writeln!(
                body,
                r#"<section class="missing"><h2>Unavailable panels</h2><ul>{}</ul></section>"#,
                items.concat()
            );
        }

        Ok(format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Network Traffic Security Dashboard</title>
<script src="{vega}"></script>
<script src="{vega_lite}"></script>
<script src="{vega_embed}"></script>
<style>
body {{ font-family: Helvetica, Arial, sans-serif; margin: 2em; color: #222; }}
.headline {{ display: flex; gap: 1.5em; flex-wrap: wrap; }}
.figure {{ background: #f3f5f8; padding: 0.8em 1.2em; border-radius: 6px; }}
.figure b {{ display: block; font-size: 1.6em; }}
.panel {{ margin-top: 2em; }}
.chart {{ width: 100%; }}
table {{ border-collapse: collapse; margin-top: 0.5em; }}
td, th {{ border: 1px solid #ccc; padding: 0.2em 0.6em; }}
</style>
</head>
<body>
<h1>Network Traffic Security Dashboard</h1>
<p>Generated {generated}</p>
{body}<script>
{scripts}</script>
</body>
</html>
"#,
            vega = VEGA,
            vega_lite = VEGA_LITE,
            vega_embed = VEGA_EMBED,
            generated = escape(&Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            body = body,
            scripts = scripts
        ))
    }
}

impl Default for DashboardTarget {
    fn default() -> Self {
        Self::new()
    }
}

fn headline(overview: &TabularResult) -> String {
    let figures = [
        ("Total records", "total_records"),
        ("Attack records", "attack_records"),
        ("Attack share (%)", "attack_percentage"),
        ("Protocols", "unique_protocols"),
        ("Services", "unique_services"),
        ("Attack categories", "unique_attack_categories"),
    ];
    let mut out = String::from(r#"<section class="headline">"#);
    for (label, column) in figures {
        let value = overview
            .value(0, column)
            .map(|c| c.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        let _ = write!(
            out,
            r#"<div class="figure"><b>{}</b>{}</div>"#,
            escape(&value),
            escape(label)
        );
    }
    out.push_str("</section>\n");
    out
}

fn html_table(table: &TabularResult) -> String {
    let mut out = String::from("<table><thead><tr>");
    for name in table.column_names() {
        let _ = write!(out, "<th>{}</th>", escape(name));
    }
    out.push_str("</tr></thead><tbody>");
    for row in table.rows() {
        out.push_str("<tr>");
        for cell in row {
            let _ = write!(out, "<td>{}</td>", escape(&cell.to_string()));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
    out
}

/// JSON placed inside a `<script>` element must not close it early
fn embed_json(json: &str) -> String {
    json.replace("</", "<\\/")
}

impl RenderTarget for DashboardTarget {
    fn name(&self) -> &str {
        "interactive-dashboard"
    }

    fn extension(&self) -> &str {
        "html"
    }

    fn inputs(&self) -> &[&'static str] {
        &INPUTS
    }

    fn render(&self, results: &ResultSet, path: &Path) -> Result<Artifact, RenderError> {
        let page = self.build(results)?;
        write_artifact(path, page.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::CellValue;
    use crate::export::fixtures::sample_results;
    use crate::query::{ColumnDef, ColumnKind};

    #[test]
    fn test_full_dashboard() {
        let page = DashboardTarget::new().build(&sample_results()).unwrap();

        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("vega-embed@6"));
        assert_eq!(page.matches("vegaEmbed('#panel-").count(), 4);
        assert!(page.contains("<b>200</b>Total records"));
        assert!(!page.contains("Unavailable panels"));
    }

    #[test]
    fn test_markup_in_data_is_escaped() {
        let page = DashboardTarget::new().build(&sample_results()).unwrap();

        // table fallback
        assert!(page.contains("<td>&lt;script&gt;</td>"));
        assert!(!page.contains("<td><script></td>"));
    }

    #[test]
    fn test_embedded_json_cannot_close_script() {
        let mut results = ResultSet::new();
        results.insert(
            TabularResult::new(
                ATTACK_DISTRIBUTION,
                vec![
                    ColumnDef::new("attack_cat", ColumnKind::Text),
                    ColumnDef::new("count", ColumnKind::Integer),
                    ColumnDef::new("percentage", ColumnKind::Percentage),
                ],
                vec![vec![
                    CellValue::Text("</script><b>".to_string()),
                    CellValue::Int(1),
                    CellValue::Float(100.0),
                ]],
            )
            .unwrap(),
        );
        let page = DashboardTarget::new().build(&results).unwrap();

        assert!(page.contains(r#"<\/script><b>"#));
        assert_eq!(page.matches("</script>").count(), 4);
    }

    #[test]
    fn test_missing_panels_are_listed() {
        let results = sample_results().subset([DATASET_OVERVIEW, TEMPORAL_RISK]);
        let page = DashboardTarget::new().build(&results).unwrap();

        assert_eq!(page.matches("vegaEmbed('#panel-").count(), 1);
        assert!(page.contains("Unavailable panels"));
        assert!(page.contains("<li>service-risk</li>"));
    }

    #[test]
    fn test_render_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.html");
        let artifact = DashboardTarget::new().render(&sample_results(), &path).unwrap();
        assert!(artifact.bytes > 0);
        assert!(path.exists());
    }
}
