//! RILO Localization CLI
//!
//! Plans a path through one of the table maps, simulates RSSI readings
//! along it and reports how well the particle filter (or FastSLAM) recovers
//! the trajectory.

use clap::Parser;
use rilo_core::classifier::ResidualClassifier;
use rilo_core::geometry::Dimension;
use rilo_core::planner::RrtConfig;
use rilo_env::ClassifierMode;
use rilo_sim::{MapId, PipelineConfig, PipelineRunner, ResultRecord, RunReport};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// RSSI localization with RRT ground truth and particle filtering
#[derive(Parser, Debug)]
#[command(name = "rilo-sim")]
#[command(about = "Run the RILO localization pipeline on a table map", long_about = None)]
struct Args {
    /// Map id from the table (1-15) or blueprint name
    #[arg(short, long, default_value = "1")]
    map: String,

    /// Dimension (2 or 3)
    #[arg(short, long, default_value = "2")]
    dim: u8,

    /// Maximum map height (meters)
    #[arg(short, long, default_value = "2")]
    z: f64,

    /// Number of particles
    #[arg(long, default_value = "3000")]
    np: usize,

    /// Planner budget as a power of ten
    #[arg(long, default_value = "4")]
    iter: u32,

    /// RRT step size (meters)
    #[arg(long, default_value = "3.0")]
    step: f64,

    /// Motion noise scale
    #[arg(long, default_value = "0.8")]
    su: f64,

    /// Sensing range in meters (0 = unlimited)
    #[arg(long, default_value = "10")]
    range: f64,

    /// Run FastSLAM instead of the plain filter (0/1)
    #[arg(long, default_value = "0")]
    slam: u8,

    /// Use the LOS/NLOS classifier (0/1)
    #[arg(long = "use-clas", default_value = "0")]
    use_clas: u8,

    /// Classifier mode (0 = soft, 1 = hard)
    #[arg(long, default_value = "0")]
    hard: u8,

    /// Save the result record (0/1)
    #[arg(long, default_value = "0")]
    save: u8,

    /// Output path for the result record
    #[arg(short, long, default_value = "rilo_result.json")]
    out: String,

    /// Blueprint JSON overriding the table geometry ("" = random map)
    #[arg(long)]
    blueprint: Option<String>,

    /// Master seed (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary on stdout
    #[arg(long)]
    json: bool,
}

fn build_config(args: &Args) -> rilo_env::Result<PipelineConfig> {
    let map: MapId = args.map.parse()?;
    let dimension = Dimension::try_from(args.dim)?;

    let mut config = PipelineConfig::default()
        .with_map(map.get())
        .with_dimension(dimension)
        .with_num_particles(args.np)
        .with_slam(args.slam != 0)
        .with_seed(args.seed);
    config.max_height = args.z;
    config.planner = RrtConfig::default()
        .with_iteration_exponent(args.iter)
        .with_step_size(args.step);
    config.noise.motion_scale = args.su;
    config.sensing_range = (args.range > 0.0).then_some(args.range);
    config.blueprint = args.blueprint.clone();
    if args.use_clas != 0 {
        config = config.with_classifier(ClassifierMode::from_flag(args.hard));
    }
    Ok(config)
}

fn print_summary(report: &RunReport) {
    let loc = &report.localization;
    let cdf = &loc.errors.cdf;
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("MSE:        {:.4} m²  (RMSE {:.3} m)", loc.errors.mse, loc.errors.rmse());
    info!(
        "Error CDF:  p50 {:.3} m | p90 {:.3} m | max {:.3} m",
        cdf.quantile(0.5).unwrap_or(0.0),
        cdf.quantile(0.9).unwrap_or(0.0),
        cdf.max().unwrap_or(0.0)
    );
    info!(
        "Links:      {} LOS / {} NLOS",
        report.observations.counts.los, report.observations.counts.nlos
    );
    if loc.confusion.total() > 0 {
        info!(
            "Confidence: [TP, FP, TN, FN] = {:?} (accuracy {:.1}%)",
            loc.confusion.as_array(),
            loc.confusion.accuracy().unwrap_or(0.0) * 100.0
        );
    }
    if let Some(errors) = report.landmark_errors() {
        for (i, e) in errors.iter().enumerate() {
            match e {
                Some(e) => info!("AP{}: estimated {:.2} m from truth", i, e),
                None => info!("AP{}: never in range", i),
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("RILO Localization v0.1.0");
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let classifier = ResidualClassifier::new(config.path_loss, config.noise.measurement_db.1);
    let runner = PipelineRunner::new().with_classifier(Box::new(classifier));

    let report = match runner.run(&config) {
        Ok(report) => report,
        Err(e) => {
            error!("✗ Run failed: {}", e);
            std::process::exit(1);
        }
    };

    if args.save != 0 {
        let record = ResultRecord::new(&report, &config);
        if let Err(e) = record.write_to_file(&args.out) {
            error!("Failed to write result record: {}", e);
            std::process::exit(1);
        }
        info!("Saved result record to {}", args.out);
    }

    if args.json {
        let summary = serde_json::json!({
            "run_id": report.run_id.to_string(),
            "seed": report.seed,
            "map": report.map,
            "dimension": report.dimension.axes(),
            "waypoints": report.waypoints.len(),
            "mse": report.localization.errors.mse,
            "p90_error": report.localization.errors.cdf.quantile(0.9),
            "los": report.observations.counts.los,
            "nlos": report.observations.counts.nlos,
            "confusion": report.localization.confusion.as_array(),
            "collapses": report.localization.collapses,
            "landmark_errors": report.landmark_errors(),
        });
        println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
    } else {
        print_summary(&report);
    }
}
