use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dinner_hop::{
    config::{self, AppConfig, database},
    core::{
        assignment::set_host,
        cascade::{CascadeEvent, CascadeReport, resolve_cascade, transfer_host},
        couple::{NewCouple, block_pair, register_couple},
        event::{EventTimeline, create_event},
        plan::{
            format_plan_summary, get_active_plan, get_plan_pairings, list_plans, plan_stats,
        },
        rematch::{
            RematchOutcome, delay_course, fire_due, force_open_course, handle_dropout,
            run_rematch_with_retry, split_couple,
        },
        travel::StraightLineEstimate,
    },
    entities::Course,
    errors::{Error, Result},
};
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Matching and rematch engine for progressive dinner events
#[derive(Debug, Parser)]
#[command(name = "dinner-hop", version)]
struct Cli {
    /// Path to config.toml (defaults to ./config.toml, or built-in defaults)
    #[arg(long, env = "DINNER_HOP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create all tables
    InitDb,
    /// Create an event
    CreateEvent {
        name: String,
        #[arg(long)]
        starter: DateTime<Utc>,
        #[arg(long)]
        main: DateTime<Utc>,
        #[arg(long)]
        dessert: DateTime<Utc>,
        #[arg(long, requires = "afterparty_location")]
        afterparty: Option<DateTime<Utc>>,
        #[arg(long)]
        afterparty_location: Option<String>,
    },
    /// Register a couple (or a solo entry with --solo)
    Register {
        event: i64,
        name: String,
        address: String,
        #[arg(long)]
        solo: bool,
        #[arg(long)]
        reserve: bool,
        #[arg(long, requires = "longitude", allow_negative_numbers = true)]
        latitude: Option<f64>,
        #[arg(long, requires = "latitude", allow_negative_numbers = true)]
        longitude: Option<f64>,
        /// Fun fact used for clues (repeatable)
        #[arg(long = "fact")]
        facts: Vec<String>,
        /// Age of a partner (repeatable)
        #[arg(long = "age")]
        ages: Vec<i32>,
    },
    /// Let a couple host a meal
    Host {
        couple: i64,
        course: Course,
        #[arg(long, default_value_t = 2)]
        max_guests: u32,
    },
    /// Never match two couples with each other
    Block {
        event: i64,
        first: i64,
        second: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Compute a new plan for the event
    Rematch { event: i64 },
    /// A couple cancels; hosts trigger a rematch
    Dropout { event: i64, couple: i64 },
    /// A couple stops hosting (all meals unless --course is given)
    Resign {
        event: i64,
        couple: i64,
        #[arg(long = "course")]
        courses: Vec<Course>,
    },
    /// A couple splits; the partner gets a solo entry following the same route
    Split {
        event: i64,
        couple: i64,
        name: String,
        address: String,
        /// Hand one of the original's hosted meals over to the new entry
        #[arg(long)]
        transfer: Option<Course>,
    },
    /// Shift still-scheduled envelopes by a number of minutes
    Delay {
        event: i64,
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
        #[arg(long)]
        course: Option<Course>,
    },
    /// Force-open a course right now
    ActivateCourse { event: i64, course: Course },
    /// Activate every envelope whose teaser time has come
    FireDue { event: i64 },
    /// Print the active plan (or every plan with --all)
    ShowPlan {
        event: i64,
        #[arg(long)]
        all: bool,
    },
}

fn print_rematch(outcome: &RematchOutcome) {
    let summary = format_plan_summary(&outcome.plan, &outcome.pairings, Some(&outcome.stats));
    println!("{summary}");
    for guest in &outcome.unplaced {
        println!(
            "  unplaced: couple {} for {} ({:?})",
            guest.couple_id, guest.course, guest.reason
        );
    }
}

fn print_cascade(report: &CascadeReport) {
    println!(
        "Cascade on plan {}: {} pairings removed, {} added, {} envelopes cancelled",
        report.plan_id,
        report.pairings_removed.len(),
        report.pairings_added,
        report.envelopes_cancelled
    );
    for pairing in &report.pairings_removed {
        println!(
            "  removed: {} at host {} for guest {}",
            pairing.course, pairing.host_couple_id, pairing.guest_couple_id
        );
    }
    for (couple, course) in &report.unplaced {
        println!("  needs placement: couple {couple} for {course}");
    }
    for warning in &report.capacity_warnings {
        println!("  warning: {warning}");
    }
    for failure in &report.errors {
        println!("  FAILED during {}: {}", failure.step, failure.message);
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let db = database::create_connection(config.database_url.as_deref()).await?;
    let travel = StraightLineEstimate::default();
    let now = Utc::now();

    match cli.command {
        Command::InitDb => {
            database::create_tables(&db).await?;
            info!("Database initialized successfully.");
        }
        Command::CreateEvent {
            name,
            starter,
            main,
            dessert,
            afterparty,
            afterparty_location,
        } => {
            let timeline = EventTimeline {
                starter_at: starter,
                main_at: main,
                dessert_at: dessert,
                afterparty: afterparty.zip(afterparty_location),
            };
            let event = create_event(&db, &name, timeline, None).await?;
            println!("Created event {} ({})", event.id, event.name);
        }
        Command::Register {
            event,
            name,
            address,
            solo,
            reserve,
            latitude,
            longitude,
            facts,
            ages,
        } => {
            let new = NewCouple {
                name,
                person_count: if solo { 1 } else { 2 },
                address,
                coordinates: latitude.zip(longitude),
                fun_facts: facts,
                ages,
                reserve,
            };
            let couple = register_couple(&db, event, &new).await?;
            println!("Registered couple {} ({})", couple.id, couple.name);
        }
        Command::Host {
            couple,
            course,
            max_guests,
        } => {
            set_host(&db, couple, course, max_guests).await?;
        }
        Command::Block {
            event,
            first,
            second,
            reason,
        } => {
            block_pair(&db, event, first, second, reason).await?;
        }
        Command::Rematch { event } => {
            let outcome = run_rematch_with_retry(&db, &config, event, &travel, now).await?;
            print_rematch(&outcome);
        }
        Command::Dropout { event, couple } => {
            let outcome = handle_dropout(&db, &config, event, couple, &travel, now).await?;
            for report in outcome.guest_cascade.iter().chain(&outcome.host_cascade) {
                print_cascade(report);
            }
            if let Some(rematch) = &outcome.rematch {
                print_rematch(rematch);
            }
            if !outcome.success() {
                warn!("Dropout of couple {couple} was not fully resolved");
            }
        }
        Command::Resign {
            event,
            couple,
            courses,
        } => {
            let plan = get_active_plan(&db, event).await?.ok_or(Error::InvalidState {
                message: format!("Event {event} has no active plan yet"),
                course: None,
                couple_id: Some(couple),
            })?;
            let courses = (!courses.is_empty()).then_some(courses);
            let cascade = CascadeEvent::HostResign { courses };
            let report = resolve_cascade(&db, event, plan.id, couple, &cascade, now).await?;
            print_cascade(&report);
            if report.success() {
                let outcome = run_rematch_with_retry(&db, &config, event, &travel, now).await?;
                print_rematch(&outcome);
            }
        }
        Command::Split {
            event,
            couple,
            name,
            address,
            transfer,
        } => {
            let solo = NewCouple {
                name,
                person_count: 1,
                address,
                ..NewCouple::default()
            };
            let (created, report) = split_couple(&db, event, couple, &solo, now).await?;
            println!("Created solo entry {} ({})", created.id, created.name);
            if let Some(report) = &report {
                print_cascade(report);
            }
            if let Some(course) = transfer {
                let plan = get_active_plan(&db, event).await?.ok_or(Error::InvalidState {
                    message: format!("Event {event} has no active plan yet"),
                    course: Some(course),
                    couple_id: Some(couple),
                })?;
                let moved =
                    transfer_host(&db, event, plan.id, couple, created.id, course, now).await?;
                println!(
                    "Moved {course}: {} pairings, {} envelopes redirected",
                    moved.pairings_moved, moved.envelopes_redirected
                );
                for (couple, course) in &moved.unplaced {
                    println!("  needs placement: couple {couple} for {course}");
                }
            }
        }
        Command::Delay {
            event,
            minutes,
            course,
        } => {
            let report = delay_course(&db, &config, event, minutes, course, now).await?;
            println!(
                "Shifted {} envelopes by {minutes} minutes, {} already activated",
                report.shifted, report.skipped_frozen
            );
        }
        Command::ActivateCourse { event, course } => {
            let count = force_open_course(&db, &config, event, course, now).await?;
            println!("Opened {count} {course} envelopes");
        }
        Command::FireDue { event } => {
            let fired = fire_due(&db, &config, event, now).await?;
            println!("Activated {fired} envelopes");
        }
        Command::ShowPlan { event, all } => {
            let plans = if all {
                list_plans(&db, event).await?
            } else {
                get_active_plan(&db, event).await?.into_iter().collect()
            };
            if plans.is_empty() {
                println!("Event {event} has no plan yet");
            }
            for plan in plans {
                let pairings = get_plan_pairings(&db, plan.id).await?;
                let stats = plan_stats(&plan)?;
                println!("{}", format_plan_summary(&plan, &pairings, stats.as_ref()));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Parse arguments and load the configuration
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_config(path),
        None => config::load_default_config(),
    }
    .inspect_err(|e| error!("Failed to load configuration: {e}"))?;

    // 4. Run the command
    run(cli, config)
        .await
        .inspect_err(|e| error!("Command failed: {e}"))
}
