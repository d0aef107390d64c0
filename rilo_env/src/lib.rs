//! RILO Environment Abstraction Layer
//!
//! This crate holds everything the localization core shares with its
//! collaborators without depending on any algorithm:
//! - the error taxonomy of the pipeline,
//! - identifiers (`ApId`, `RunId`) and LOS/NLOS link classes,
//! - the predict-only `LinkClassifier` seam,
//! - the seeded `RunContext` every stage draws its randomness from.
//!
//! # Example
//!
//! ```ignore
//! use rilo_env::{RngStream, RunContext, SeededContext};
//!
//! let ctx = SeededContext::new(42);
//! let mut planner_rng = ctx.stream(RngStream::Planner);
//! let path = planner.plan(start, goal, &map, &mut planner_rng)?;
//! ```

mod classifier;
mod context;
mod error;
mod seeded;
mod types;

pub use classifier::{ClassifierMode, LinkClassifier, LinkFeatures};
pub use context::{RngStream, RunContext};
pub use error::{LocalizationError, Result};
pub use seeded::SeededContext;
pub use types::{ApId, LinkClass, LinkPrediction, RunId};
