// Anomaly Profile Chart
// Diverging bars of each traffic class's mean z-score per flow feature

use super::svg::{format_tick, nice_ceiling, Anchor, SvgDocument, PALETTE};
use super::{require, write_artifact, Artifact, RenderError, RenderTarget};
use crate::query::anomaly::AnomalyProfile;
use crate::query::catalogue::ANOMALY_PROFILE;
use crate::query::ResultSet;
use std::path::Path;

const WIDTH: u32 = 960;
const HEIGHT: u32 = 540;
const TITLE: &str = "Mean Feature Z-Score by Traffic Class";

/// `anomaly-profile-chart`
#[derive(Debug, Default)]
pub struct AnomalyChartTarget;

const INPUTS: [&str; 1] = [ANOMALY_PROFILE];

impl AnomalyChartTarget {
    pub fn new() -> Self {
        Self
    }

    pub fn draw(&self, profile: &AnomalyProfile) -> String {
        let mut doc = SvgDocument::new(WIDTH, HEIGHT);
        doc.text(doc.width() / 2.0, 32.0, TITLE, Anchor::Middle, 20);

        if profile.classes.is_empty() {
            doc.text(doc.width() / 2.0, doc.height() / 2.0, "No data", Anchor::Middle, 16);
            return doc.finish();
        }

        let scores = profile
            .classes
            .iter()
            .map(|c| format!("{} {}", c.class, c.anomaly_score))
            .collect::<Vec<_>>()
            .join("   ");
        doc.text(doc.width() / 2.0, 54.0, &format!("Anomaly score: {}", scores), Anchor::Middle, 12);

        let (left, top, right, bottom) = (80.0, 80.0, doc.width() - 150.0, doc.height() - 70.0);
        let (width, height) = (right - left, bottom - top);
        let extent = nice_ceiling(
            profile
                .features
                .iter()
                .flat_map(|f| f.class_z.iter())
                .fold(0.0, |acc: f64, z| acc.max(z.abs())),
        );
        let y_of = |z: f64| top + height / 2.0 - (height / 2.0) * z / extent;

        for tick in [-extent, -extent / 2.0, 0.0, extent / 2.0, extent] {
            let y = y_of(tick);
            let stroke = if tick == 0.0 { "#333333" } else { "#e0e0e0" };
            doc.line(left, y, right, y, stroke, 1.0);
            doc.text(left - 8.0, y + 4.0, &format_tick(tick), Anchor::End, 11);
        }
        doc.rotated_text(18.0, top + height / 2.0, "Mean z-score", -90.0, 12);

        let slot = width / profile.features.len().max(1) as f64;
        let bar = slot * 0.8 / profile.classes.len() as f64;
        for (i, feature) in profile.features.iter().enumerate() {
            let x0 = left + slot * i as f64 + slot * 0.1;
            for (c, z) in feature.class_z.iter().enumerate() {
                let (y_zero, y_value) = (y_of(0.0), y_of(*z));
                let x = x0 + bar * c as f64;
                doc.rect(x, y_zero.min(y_value), bar, (y_zero - y_value).abs(), PALETTE[c % PALETTE.len()]);
            }
            doc.text(x0 + slot * 0.4, bottom + 18.0, &feature.feature, Anchor::Middle, 11);
            doc.text(
                x0 + slot * 0.4,
                bottom + 34.0,
                &format!("sd {}", format_tick(feature.std_dev)),
                Anchor::Middle,
                10,
            );
        }

        for (c, class) in profile.classes.iter().enumerate() {
            let y = top + 20.0 * c as f64;
            doc.rect(right + 20.0, y, 12.0, 12.0, PALETTE[c % PALETTE.len()]);
            doc.text(right + 38.0, y + 10.0, &class.class, Anchor::Start, 12);
        }
        doc.finish()
    }
}

impl RenderTarget for AnomalyChartTarget {
    fn name(&self) -> &str {
        "anomaly-profile-chart"
    }

    fn extension(&self) -> &str {
        "svg"
    }

    fn inputs(&self) -> &[&'static str] {
        &INPUTS
    }

    fn render(&self, results: &ResultSet, path: &Path) -> Result<Artifact, RenderError> {
        let table = require(results, ANOMALY_PROFILE)?;
        let profile = AnomalyProfile::from_table(table).map_err(|e| RenderError::InvalidData(e.to_string()))?;
        write_artifact(path, self.draw(&profile).as_bytes())
    }
}
