// Anomaly Profile
// Feature z-score profile per traffic class, derived from the per-class
// sums returned by the anomaly-profile query

use super::catalogue::{ANOMALY_FEATURES, ANOMALY_PROFILE};
use super::normalize::{round2, sample_std_dev};
use super::{ResultSet, TabularResult};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot profile '{query}': {detail}")]
pub struct ProfileError {
    pub query: String,
    pub detail: String,
}

/// One flow feature across all classes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureProfile {
    pub feature: String,
    pub mean: f64,
    pub std_dev: f64,
    /// Mean z-score of each class, in class order
    pub class_z: Vec<f64>,
}

impl FeatureProfile {
    /// Gap between the highest and lowest class mean z-score
    pub fn separation(&self) -> f64 {
        let max = self.class_z.iter().copied().fold(f64::MIN, f64::max);
        let min = self.class_z.iter().copied().fold(f64::MAX, f64::min);
        if self.class_z.is_empty() {
            0.0
        } else {
            round2(max - min)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassProfile {
    pub class: String,
    pub flows: u64,
    /// Mean absolute z-score over all features
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyProfile {
    pub classes: Vec<ClassProfile>,
    pub features: Vec<FeatureProfile>,
}

struct Moments {
    n: f64,
    sum: f64,
    sum_sq: f64,
}

impl AnomalyProfile {
    /// Combine the class rows into population-wide means and standard
    /// deviations, then express each class mean as a z-score.
    ///
    /// A feature with zero spread scores 0 for every class.
    pub fn from_table(table: &TabularResult) -> Result<Self, ProfileError> {
        let fail = |detail: String| ProfileError {
            query: table.query().to_string(),
            detail,
        };
        let column = |name: &str| {
            table
                .column_index(name)
                .ok_or_else(|| fail(format!("column '{}' is missing", name)))
        };

        let class_idx = column("traffic_class")?;
        let flows_idx = column("flows")?;
        let feature_idx = ANOMALY_FEATURES
            .iter()
            .map(|f| Ok((column(&format!("{}_sum", f))?, column(&format!("{}_sum_sq", f))?)))
            .collect::<Result<Vec<_>, ProfileError>>()?;

        let mut classes = Vec::with_capacity(table.row_count());
        let mut moments: Vec<Vec<Moments>> = Vec::with_capacity(table.row_count());
        for (row_no, row) in table.rows().iter().enumerate() {
            let flows = row[flows_idx]
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| fail(format!("row {} has no flow count", row_no)))?;
            let per_feature = feature_idx
                .iter()
                .map(|&(sum, sum_sq)| Moments {
                    n: flows as f64,
                    sum: row[sum].as_f64().unwrap_or(0.0),
                    sum_sq: row[sum_sq].as_f64().unwrap_or(0.0),
                })
                .collect();
            classes.push(ClassProfile {
                class: row[class_idx].to_string(),
                flows: flows as u64,
                anomaly_score: 0.0,
            });
            moments.push(per_feature);
        }

        let mut features = Vec::with_capacity(ANOMALY_FEATURES.len());
        for (f, name) in ANOMALY_FEATURES.iter().enumerate() {
            let (n, sum, sum_sq) = moments.iter().fold((0.0, 0.0, 0.0), |(n, s, ss), m| {
                (n + m[f].n, s + m[f].sum, ss + m[f].sum_sq)
            });
            let mean = if n > 0.0 { sum / n } else { 0.0 };
            let std_dev = sample_std_dev(Some(n), Some(sum), Some(sum_sq)).unwrap_or(0.0);

            let class_z = moments
                .iter()
                .map(|m| {
                    let m = &m[f];
                    if m.n == 0.0 || std_dev == 0.0 {
                        0.0
                    } else {
                        round2((m.sum / m.n - mean) / std_dev)
                    }
                })
                .collect();

            features.push(FeatureProfile {
                feature: name.to_string(),
                mean: round2(mean),
                std_dev: round2(std_dev),
                class_z,
            });
        }

        for (c, class) in classes.iter_mut().enumerate() {
            let total: f64 = features.iter().map(|f| f.class_z[c].abs()).sum();
            class.anomaly_score = round2(total / features.len() as f64);
        }

        Ok(Self { classes, features })
    }

    /// The profile of the `anomaly-profile` table, if present
    pub fn from_results(results: &ResultSet) -> Option<Result<Self, ProfileError>> {
        results.get(ANOMALY_PROFILE).map(Self::from_table)
    }
}
