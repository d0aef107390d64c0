//! End-to-end runs of the pipeline on a small open map.

use approx::assert_relative_eq;
use nalgebra::Vector3;
use proptest::prelude::*;
use rilo_core::classifier::ResidualClassifier;
use rilo_core::environment::{Bounds, EnvironmentMap, MapProvider};
use rilo_core::geometry::Dimension;
use rilo_core::propagation::PathLossModel;
use rilo_env::{ClassifierMode, LocalizationError, Result};
use rilo_sim::{MapId, PipelineConfig, PipelineRunner, ResultRecord};

/// Open hall covering the start and goal of map 4, four access points.
struct OpenHall;

impl MapProvider for OpenHall {
    fn build(&self, _descriptor: &str, dimension: Dimension, max_height: f64) -> Result<EnvironmentMap> {
        let bounds = Bounds::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(40.0, 70.0, max_height));
        Ok(EnvironmentMap::new(dimension, bounds)?
            .with_access_point(Vector3::new(12.0, 20.0, 1.0), None)
            .with_access_point(Vector3::new(28.0, 30.0, 1.0), None)
            .with_access_point(Vector3::new(12.0, 42.0, 1.0), None)
            .with_access_point(Vector3::new(28.0, 52.0, 1.0), None))
    }
}

fn small_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_map(4)
        .with_num_particles(200)
        .with_seed(7)
}

fn hall_runner() -> PipelineRunner {
    PipelineRunner::new().with_map_provider(Box::new(OpenHall))
}

#[test]
fn test_filter_run_tracks_every_waypoint() {
    let report = hall_runner().run(&small_config()).unwrap();

    assert!(report.waypoints.len() >= 2);
    assert_eq!(report.localization.path.len(), report.waypoints.len());
    assert_eq!(report.localization.errors.per_step.len(), report.waypoints.len());
    assert_eq!(report.observations.len(), report.waypoints.len());
    assert!(report.mse().is_finite());
    assert!(report.landmarks.is_none());

    // Open hall: every link is line of sight
    assert_eq!(report.observations.counts.nlos, 0);
    assert_eq!(report.noise.measurement_db.len(), 4);
}

#[test]
fn test_slam_run_reports_every_access_point() {
    let config = small_config().with_slam(true);
    let report = hall_runner().run(&config).unwrap();

    let landmarks = report.landmarks.as_ref().unwrap();
    assert_eq!(landmarks.len(), 4);
    assert_eq!(report.localization.path.len(), report.waypoints.len());

    let errors = report.landmark_errors().unwrap();
    assert_eq!(errors.len(), 4);
    for (landmark, error) in landmarks.iter().zip(&errors) {
        assert_eq!(landmark.position.is_some(), error.is_some());
        if let Some(e) = error {
            assert!(e.is_finite());
        }
    }
}

#[test]
fn test_filter_run_in_3d() {
    let config = small_config().with_dimension(Dimension::Three);
    let report = hall_runner().run(&config).unwrap();

    assert_eq!(report.dimension, Dimension::Three);
    assert_relative_eq!(report.start.z, 1.0);
    assert_relative_eq!(report.goal.z, 0.5);
    assert_eq!(report.localization.path.len(), report.waypoints.len());
    assert!(report.waypoints.iter().all(|p| (0.0..=2.0).contains(&p.position.z)));
    assert!(report.localization.path.iter().any(|p| p.position.z != 0.0));
    assert!(report.mse().is_finite());
}

#[test]
fn test_slam_run_in_3d() {
    let config = small_config().with_dimension(Dimension::Three).with_slam(true);
    let report = hall_runner().run(&config).unwrap();

    let landmarks = report.landmarks.as_ref().unwrap();
    assert_eq!(landmarks.len(), 4);
    assert_eq!(report.localization.path.len(), report.waypoints.len());
    for error in report.landmark_errors().unwrap().into_iter().flatten() {
        assert!(error.is_finite());
    }
}

#[test]
fn test_classifier_run_records_confusion() {
    let config = small_config().with_classifier(ClassifierMode::Soft);
    let classifier = ResidualClassifier::new(PathLossModel::default(), 4.0);
    let report = hall_runner()
        .with_classifier(Box::new(classifier))
        .run(&config)
        .unwrap();

    let predicted = report
        .observations
        .frames
        .iter()
        .flat_map(|f| f.readings.iter())
        .filter(|r| r.prediction.is_some())
        .count();
    let confusion = report.localization.confusion;
    assert!(predicted > 0);
    assert_eq!(confusion.total(), predicted);
    // No NLOS links exist, so no positives can be true
    assert_eq!(confusion.true_positive, 0);
    assert_eq!(confusion.false_negative, 0);
}

#[test]
fn test_exhausted_budget_is_planning_failure() {
    let mut config = small_config();
    config.planner.max_iterations = 0;
    let result = hall_runner().run(&config);
    assert!(matches!(result, Err(LocalizationError::PlanningFailure { iterations: 0 })));
}

#[test]
fn test_invalid_map_id() {
    let config = small_config().with_map(0);
    let result = hall_runner().run(&config);
    assert!(matches!(result, Err(LocalizationError::InvalidMapId(_))));
}

#[test]
fn test_same_seed_same_run() {
    let a = hall_runner().run(&small_config()).unwrap();
    let b = hall_runner().run(&small_config()).unwrap();

    assert_eq!(a.waypoints, b.waypoints);
    assert_eq!(a.noise.measurement_db, b.noise.measurement_db);
    assert_eq!(a.localization.path, b.localization.path);
    assert_eq!(a.run_id, b.run_id);
}

#[test]
fn test_result_record_written_as_json() {
    let config = small_config().with_slam(true);
    let report = hall_runner().run(&config).unwrap();
    let record = ResultRecord::new(&report, &config);

    let path = std::env::temp_dir().join(format!("rilo_record_{}.json", report.run_id));
    record.write_to_file(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let parsed: ResultRecord = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.waypoints.len(), report.waypoints.len());
    assert_eq!(parsed.estimated_path.len(), report.waypoints.len());
    assert_eq!(parsed.access_points.len(), 4);
    assert!(parsed.slam);
    assert_eq!(parsed.dimension, 2);
    assert_eq!(parsed.seed, 7);
    assert_relative_eq!(parsed.mse, report.mse(), epsilon = 1e-12);
    assert_eq!(parsed.confusion, report.localization.confusion.as_array());
}

proptest! {
    #[test]
    fn prop_map_id_parses_number_or_name(id in 1u8..=15, upper in any::<bool>()) {
        let map = MapId::new(id).unwrap();
        prop_assert_eq!(id.to_string().parse::<MapId>().unwrap(), map);

        let name = if upper { map.name().to_uppercase() } else { map.name().to_string() };
        prop_assert_eq!(name.parse::<MapId>().unwrap(), map);
        prop_assert_eq!(format!("{}.ini", map.name()).parse::<MapId>().unwrap(), map);
    }

    #[test]
    fn prop_map_id_rejects_out_of_table(id in 16u8..) {
        prop_assert!(MapId::new(id).is_err());
        prop_assert!(id.to_string().parse::<MapId>().is_err());
    }
}
