use clap::{Parser, Subcommand};
use fitpulse_core::*;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fitpulse")]
#[command(about = "FitPulse workout sync and reconciliation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a finished workout
    Record {
        /// Workout type (run, ride, swim, walk, strength, hiit, yoga)
        #[arg(long, default_value = "other")]
        workout: String,

        /// Duration in minutes
        #[arg(long)]
        minutes: u32,

        /// Energy burned in kcal
        #[arg(long)]
        kcal: f64,

        /// Distance in kilometers
        #[arg(long)]
        km: Option<f64>,

        /// Average heart rate in bpm
        #[arg(long)]
        avg_hr: Option<u16>,

        /// XP earned (derived from kcal when omitted)
        #[arg(long)]
        xp: Option<u32>,
    },

    /// Show the aggregate counters (default)
    Stats,

    /// Recompute the counters from every stored record and correct drift
    Reconcile {
        /// Run even if the reconciliation cadence has not elapsed
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    fitpulse_core::logging::init();

    let cli = Cli::parse();

    // Determine data directory
    let mut config = Config::load()?;
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }
    std::fs::create_dir_all(&config.data.data_dir)?;

    let store: Arc<dyn RecordStore> = Arc::new(JsonlStore::new(&config.data.data_dir));
    let engine = Arc::new(SyncEngine::new(store, &config));

    match engine.initialize().await? {
        InitState::Completed => {}
        InitState::WaitingForAccount => {
            eprintln!("Remote account unavailable; stored data may be stale.");
        }
        other => {
            return Err(Error::State(format!(
                "unexpected initialization outcome: {:?}",
                other
            )));
        }
    }

    match cli.command {
        Some(Commands::Record {
            workout,
            minutes,
            kcal,
            km,
            avg_hr,
            xp,
        }) => cmd_record(&engine, workout, minutes, kcal, km, avg_hr, xp).await,
        Some(Commands::Reconcile { force }) => cmd_reconcile(&engine, force).await,
        Some(Commands::Stats) | None => cmd_stats(&engine),
    }
}

async fn cmd_record(
    engine: &SyncEngine,
    workout: String,
    minutes: u32,
    kcal: f64,
    km: Option<f64>,
    avg_hr: Option<u16>,
    xp: Option<u32>,
) -> Result<()> {
    let workout_type = match workout.to_lowercase().as_str() {
        "run" => WorkoutType::Run,
        "ride" => WorkoutType::Ride,
        "swim" => WorkoutType::Swim,
        "walk" => WorkoutType::Walk,
        "strength" => WorkoutType::Strength,
        "hiit" => WorkoutType::Hiit,
        "yoga" => WorkoutType::Yoga,
        "other" => WorkoutType::Other,
        unknown => {
            eprintln!("Unknown workout type: {}. Using 'other'.", unknown);
            WorkoutType::Other
        }
    };

    let ended_at = chrono::Utc::now();
    let duration_seconds = minutes.saturating_mul(60);
    let record = WorkoutRecord {
        id: uuid::Uuid::new_v4(),
        workout_type,
        started_at: ended_at - chrono::Duration::seconds(i64::from(duration_seconds)),
        ended_at,
        duration_seconds,
        energy_burned_kcal: kcal,
        distance_meters: km.map(|k| k * 1000.0),
        avg_heart_rate: avg_hr,
        xp_earned: xp,
        source: RecordSource::Manual,
    };
    let earned = record.xp_contribution();

    engine.record_workout(record).await?;

    println!("✓ Workout recorded (+{} XP)", earned);
    display_stats(&engine.cache().current());
    Ok(())
}

fn cmd_stats(engine: &SyncEngine) -> Result<()> {
    display_stats(&engine.cache().current());
    Ok(())
}

async fn cmd_reconcile(engine: &SyncEngine, force: bool) -> Result<()> {
    let outcome = if force {
        engine.force_reconcile().await?
    } else {
        engine.reconcile_if_due().await?
    };

    match outcome {
        ReconcileOutcome::NotDue => {
            println!("Reconciliation not due yet - use --force to run anyway.");
        }
        ReconcileOutcome::Clean(snapshot) => {
            println!(
                "✓ Counters verified: {} workouts, {} XP (no drift)",
                snapshot.total_workouts, snapshot.total_xp
            );
        }
        ReconcileOutcome::Corrected { before, after } => {
            println!("✓ Drift corrected:");
            println!("  Workouts: {} → {}", before.total_workouts, after.total_workouts);
            println!("  XP:       {} → {}", before.total_xp, after.total_xp);
        }
    }

    Ok(())
}

fn display_stats(view: &AggregateView) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  FITPULSE TOTALS");
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  Workouts: {}", view.snapshot.total_workouts);
    println!("  XP:       {}", view.snapshot.total_xp);
    println!("  Streak:   {} day(s)", view.snapshot.current_streak);
    if let Some(last) = view.snapshot.last_workout_at {
        println!("  Last:     {}", last.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(ref error) = view.last_error {
        println!();
        println!("  ⚠ Last sync error: {}", error);
    }
    println!();
}
