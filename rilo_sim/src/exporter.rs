//! JSON exporter for run results.
//!
//! One flat record per run, with everything needed to rebuild the plots
//! offline: true and estimated paths, error CDF, link statistics and the
//! noise parameters the run drew.

use crate::runner::{PipelineConfig, RunReport};
use nalgebra::Vector3;
use rilo_core::geometry::Pose;
use rilo_core::metrics::CdfPoint;
use rilo_env::{Result, RunId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Access point as written to the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedAccessPoint {
    pub id: u32,
    pub position: [f64; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Estimation uncertainty (SLAM estimates only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f64>,
}

fn xyz(v: &Vector3<f64>) -> [f64; 3] {
    [v.x, v.y, v.z]
}

fn path(poses: &[Pose]) -> Vec<[f64; 3]> {
    poses.iter().map(|p| xyz(&p.position)).collect()
}

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub run_id: RunId,
    pub seed: u64,
    pub map: u8,
    pub blueprint: String,
    /// 2 or 3
    pub dimension: u8,
    pub start: [f64; 3],
    pub goal: [f64; 3],

    pub slam: bool,
    pub use_classifier: bool,
    pub hard: bool,

    pub mse: f64,
    pub cdf: Vec<CdfPoint>,
    /// `[TP, FP, TN, FN]`, NLOS positive
    pub confusion: [usize; 4],
    pub los: usize,
    pub nlos: usize,
    pub collapses: usize,
    pub resample_count: usize,

    pub waypoints: Vec<[f64; 3]>,
    pub estimated_path: Vec<[f64; 3]>,

    /// Motion noise std `[σx, σy, σz]`
    pub motion_noise: [f64; 3],
    /// Measurement noise std per AP (dB)
    pub measurement_noise: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensing_range: Option<f64>,

    pub access_points: Vec<ExportedAccessPoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub estimated_access_points: Vec<ExportedAccessPoint>,
}

impl ResultRecord {
    /// Flattens a report; the config supplies the mode flags.
    pub fn new(report: &RunReport, config: &PipelineConfig) -> Self {
        let localization = &report.localization;
        let access_points = report
            .access_points
            .iter()
            .map(|ap| ExportedAccessPoint {
                id: ap.id.0,
                position: xyz(&ap.position),
                label: ap.label.clone(),
                uncertainty: None,
            })
            .collect();
        let estimated_access_points = report
            .landmarks
            .iter()
            .flatten()
            .filter_map(|l| {
                l.position.map(|p| ExportedAccessPoint {
                    id: l.id.0,
                    position: xyz(&p),
                    label: None,
                    uncertainty: l.uncertainty,
                })
            })
            .collect();

        Self {
            run_id: report.run_id,
            seed: report.seed,
            map: report.map,
            blueprint: report.blueprint.clone(),
            dimension: report.dimension.axes() as u8,
            start: xyz(&report.start),
            goal: xyz(&report.goal),
            slam: config.slam,
            use_classifier: config.use_classifier,
            hard: config.use_classifier && config.classifier_mode == rilo_env::ClassifierMode::Hard,
            mse: localization.errors.mse,
            cdf: localization.errors.cdf.points(),
            confusion: localization.confusion.as_array(),
            los: report.observations.counts.los,
            nlos: report.observations.counts.nlos,
            collapses: localization.collapses,
            resample_count: localization.resample_count,
            waypoints: path(&report.waypoints),
            estimated_path: path(&localization.path),
            motion_noise: report.noise.motion.0,
            measurement_noise: report.noise.measurement_db.clone(),
            sensing_range: report.sensing_range,
            access_points,
            estimated_access_points,
        }
    }

    /// Writes to a pretty JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
