//! RILO Pipeline Harness
//!
//! Wires the core algorithms into the end-to-end experiment:
//!
//! ```text
//! MapId ──► MapProvider ──► RrtPlanner ──► PropagationModel ──► ParticleFilter / FastSlam
//!  (table)   (floor plan)    (true path)    (RSSI readings)       (estimated path, APs)
//! ```
//!
//! All randomness comes from one seed: the runner hands each stage its own
//! `RngStream`, so a run is reproducible from `(config, seed)`.
//!
//! # Usage
//!
//! ```ignore
//! use rilo_sim::{PipelineConfig, PipelineRunner};
//!
//! let config = PipelineConfig::default().with_map(4).with_slam(true);
//! let report = PipelineRunner::new().run(&config)?;
//! println!("MSE {:.3}", report.mse());
//! ```

mod exporter;
pub mod maps;
mod runner;
mod world;

pub use exporter::{ExportedAccessPoint, ResultRecord};
pub use maps::{MapEntry, MapId, MAP_TABLE};
pub use runner::{NoiseParameters, NoiseSpec, PipelineConfig, PipelineRunner, RunReport};
pub use world::{LayoutConfig, ProceduralMapProvider};
