//! Geofence Replay CLI
//!
//! Manages the locally persisted geofences and replays recorded position
//! tracks through the monitor, printing every enter/exit transition.
//!
//! Usage:
//!   geofence-replay add --lat 48.8584 --lon 2.2945 --radius 150 --name "Tower"
//!   geofence-replay replay data/sample_track.json
//!   geofence-replay events
//!   geofence-replay export --output geofences.geojson

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use geofence_monitor::{
    export, FileStore, GeofenceDefinition, GeofenceMonitor, GeofencePatch, MonitorConfig,
    Position,
};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "geofence-replay",
    about = "Manage geofences and replay position tracks through the monitor"
)]
struct Args {
    /// Directory holding the persisted geofences and events
    #[arg(short, long)]
    state_dir: Option<PathBuf>,

    /// JSON config file (defaults plus GEOFENCE_* environment otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a geofence
    Add {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Radius in meters
        #[arg(long, default_value_t = geofence_monitor::DEFAULT_RADIUS_M)]
        radius: f64,
        #[arg(long)]
        name: Option<String>,
        /// Store the geofence disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a geofence by id
    Remove { id: String },
    /// Enable a geofence
    Enable { id: String },
    /// Disable a geofence
    Disable { id: String },
    /// Rename a geofence
    Rename { id: String, name: String },
    /// List geofences
    List,
    /// List recorded events, newest first
    Events,
    /// Clear the event log
    ClearEvents,
    /// Feed a JSON array of {lat, lon} samples (null = no fix) through the monitor
    Replay { track: PathBuf },
    /// Write geofences (or events) as GeoJSON
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        events: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::from_env()?,
    };

    let state_dir = args.state_dir.clone().unwrap_or_else(|| {
        PathBuf::from(
            std::env::var("GEOFENCE_STATE_DIR").unwrap_or_else(|_| ".geofence-state".to_string()),
        )
    });
    let storage = FileStore::open(&state_dir)
        .with_context(|| format!("opening state directory {:?}", state_dir))?;
    let mut monitor = GeofenceMonitor::new(Arc::new(storage), config);

    match args.command {
        Command::Add {
            lat,
            lon,
            radius,
            name,
            disabled,
        } => {
            let mut definition = GeofenceDefinition::new(Position::new(lat, lon), radius);
            definition.name = name;
            if disabled {
                definition = definition.disabled();
            }
            let geofence = monitor.add_geofence(definition);
            info!("Added {} ({})", geofence.id, geofence.name);
        }
        Command::Remove { id } => {
            monitor.remove_geofence(&id);
            info!("Removed {}", id);
        }
        Command::Enable { id } => patch(&mut monitor, &id, enabled_patch(true)),
        Command::Disable { id } => patch(&mut monitor, &id, enabled_patch(false)),
        Command::Rename { id, name } => patch(
            &mut monitor,
            &id,
            GeofencePatch {
                name: Some(name),
                ..Default::default()
            },
        ),
        Command::List => list_geofences(&monitor),
        Command::Events => list_events(&monitor),
        Command::ClearEvents => {
            monitor.clear_events();
            info!("Event log cleared");
        }
        Command::Replay { track } => replay(&mut monitor, &track)?,
        Command::Export { output, events } => {
            let collection = if events {
                export::events_to_geojson(monitor.events())
            } else {
                export::geofences_to_geojson(monitor.geofences(), monitor.config().default_radius_m)
            };
            match output {
                Some(path) => {
                    info!("Writing GeoJSON to {:?}", path);
                    let writer = BufWriter::new(File::create(&path)?);
                    serde_json::to_writer_pretty(writer, &collection)?;
                }
                None => println!("{}", serde_json::to_string_pretty(&collection)?),
            }
        }
    }

    if !monitor.persistence_ok() {
        warn!("Some changes could not be saved to {:?}", state_dir);
    }

    Ok(())
}

fn enabled_patch(enabled: bool) -> GeofencePatch {
    GeofencePatch {
        enabled: Some(enabled),
        ..Default::default()
    }
}

fn patch(monitor: &mut GeofenceMonitor, id: &str, changes: GeofencePatch) {
    match monitor.update_geofence(id, changes) {
        Some(g) => info!("Updated {} ({}, enabled={})", g.id, g.name, g.is_enabled()),
        None => warn!("No geofence with id {}", id),
    }
}

fn list_geofences(monitor: &GeofenceMonitor) {
    let default_radius = monitor.config().default_radius_m;
    info!("{} geofences", monitor.geofences().len());
    for g in monitor.geofences() {
        info!(
            "  {:28} | {:24} | {:>10.5},{:>11.5} | {:>8.1} m | {}",
            g.id,
            g.name.chars().take(24).collect::<String>(),
            g.center.lat,
            g.center.lon,
            g.radius_or(default_radius),
            if g.is_enabled() { "enabled" } else { "disabled" }
        );
    }
}

fn list_events(monitor: &GeofenceMonitor) {
    info!("{} events", monitor.events().len());
    for e in monitor.events() {
        let when = DateTime::from_timestamp_millis(e.timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| e.timestamp.to_string());
        info!("  {} | {:5} | {} ({})", when, e.kind, e.geofence_name, e.geofence_id);
    }
}

fn replay(monitor: &mut GeofenceMonitor, track: &Path) -> Result<()> {
    info!("Replaying track {:?}", track);
    let file = File::open(track).with_context(|| format!("opening track {:?}", track))?;
    let samples: Vec<Option<Position>> = serde_json::from_reader(BufReader::new(file))?;

    let transitions = replay_samples(monitor, samples, Utc::now());

    let inside: Vec<String> = monitor
        .inside_geofences()
        .iter()
        .map(|g| g.name.clone())
        .collect();
    info!("{} transitions, inside at end: {:?}", transitions, inside);
    monitor.stop();
    Ok(())
}

/// Replayed samples are one second apart starting at `start`
fn sample_time(start: DateTime<Utc>, index: usize) -> DateTime<Utc> {
    start + Duration::seconds(index as i64)
}

/// Feed `samples` in order; returns the number of transitions
fn replay_samples(
    monitor: &mut GeofenceMonitor,
    samples: Vec<Option<Position>>,
    start: DateTime<Utc>,
) -> usize {
    let mut transitions = 0;
    for (i, sample) in samples.into_iter().enumerate() {
        for event in monitor.on_position_update_at(sample, sample_time(start, i)) {
            transitions += 1;
            info!(
                "  sample {:4} | {:5} | {} at {:.6},{:.6}",
                i, event.kind, event.geofence_name, event.position.lat, event.position.lon
            );
        }
    }
    transitions
}
