//! Incident Hotspot CLI
//!
//! Fits the hotspot model from incident records and queries it.
//!
//! Usage:
//!   hotspot fit --records data/detentions.json --dataset detentions --out model
//!   hotspot lookup --model-dir model --lat -2.19 --lon -79.89
//!   hotspot top --model-dir model -n 10

use anyhow::Result;
use clap::{Parser, Subcommand};
use hotspot_risk::{export, loader, ClusterParams, DatasetPreset, HotspotPipeline, RiskLookup};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "hotspot",
    about = "Cluster geo-tagged incidents into hotspots and look up risk profiles"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the hotspot model and write its artifacts
    Fit {
        /// Path to incident records JSON file
        #[arg(short, long)]
        records: PathBuf,

        /// Dataset preset (detentions, emergency-calls)
        #[arg(short, long, default_value = "detentions")]
        dataset: DatasetPreset,

        /// Output directory for the model artifacts
        #[arg(short, long, default_value = "model")]
        out: PathBuf,

        /// Clustering radius in km (overrides the preset)
        #[arg(long)]
        eps_km: Option<f64>,

        /// Minimum neighborhood size (overrides the preset)
        #[arg(long)]
        min_samples: Option<usize>,

        /// Also write hotspot centroids as GeoJSON
        #[arg(long)]
        geojson: bool,
    },

    /// Look up the hotspot profile for a coordinate
    Lookup {
        #[arg(short, long, default_value = "model")]
        model_dir: PathBuf,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },

    /// Show the largest hotspots
    Top {
        #[arg(short, long, default_value = "model")]
        model_dir: PathBuf,

        #[arg(short, default_value_t = 10)]
        n: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Fit {
            records,
            dataset,
            out,
            eps_km,
            min_samples,
            geojson,
        } => fit(records, dataset, out, eps_km, min_samples, geojson),
        Command::Lookup { model_dir, lat, lon } => lookup(model_dir, lat, lon),
        Command::Top { model_dir, n } => top(model_dir, n),
    }
}

fn fit(
    records: PathBuf,
    dataset: DatasetPreset,
    out: PathBuf,
    eps_km: Option<f64>,
    min_samples: Option<usize>,
    geojson: bool,
) -> Result<()> {
    info!("{}", "=".repeat(60));
    info!("Incident Hotspot Fit ({})", dataset);
    info!("{}", "=".repeat(60));

    let mut pipeline = HotspotPipeline::from_preset(dataset);
    pipeline.params = ClusterParams::from_km(
        eps_km.unwrap_or_else(|| dataset.radius_km()),
        min_samples.unwrap_or_else(|| dataset.min_samples()),
    )?;

    let (records, _report) = loader::load_records(&records)?;
    let output = pipeline.run(records)?;
    output.save(&out)?;

    if geojson {
        let geojson_path = out.join("hotspots.geojson");
        info!("Writing GeoJSON to {:?}", geojson_path);
        let file = File::create(&geojson_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &export::to_geojson(&output.profiles, None))?;
    }

    let summary = output.summary();
    info!("\n{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Records clustered: {}", summary.records);
    info!(
        "Radius: {:.3} km, min_samples: {}",
        summary.radius_km, summary.min_samples
    );
    info!("Hotspots: {}", summary.clusters);
    info!("Core points: {}", summary.core_points);
    info!("Noise: {}", summary.noise);

    Ok(())
}

fn lookup(model_dir: PathBuf, lat: f64, lon: f64) -> Result<()> {
    let service = RiskLookup::from_dir(&model_dir)?;

    match service.lookup(lat, lon)? {
        Some(profile) => println!("{}", serde_json::to_string_pretty(profile)?),
        None => {
            if let Some(nearest) = service.nearest_core(lat, lon)? {
                info!(
                    "No hotspot within {:.3} km (nearest core point {:.3} km away)",
                    service.model().params().radius_km(),
                    nearest.distance_km
                );
            }
            println!("null");
        }
    }

    Ok(())
}

fn top(model_dir: PathBuf, n: usize) -> Result<()> {
    let service = RiskLookup::from_dir(&model_dir)?;
    let profiles = service.profiles();

    info!(
        "Top {} of {} hotspots ({} members total):",
        n.min(profiles.len()),
        profiles.len(),
        profiles.total_members()
    );
    for p in profiles.largest(n) {
        let dominant: Vec<String> = p.dominant.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        info!(
            "  #{:<4} | {:6} members | ({:.5}, {:.5}) | {}",
            p.label,
            p.member_count,
            p.centroid_latitude,
            p.centroid_longitude,
            dominant.join(", ")
        );
    }

    Ok(())
}
