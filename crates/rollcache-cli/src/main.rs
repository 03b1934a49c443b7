//! rollcache - live attendance dashboard in the terminal.
//!
//! Polls an attendance service, keeps the aggregation cache current, and
//! prints each dashboard panel whenever its contents change.

mod config;
mod render;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rollcache_core::cache::{RefreshOutcome, Subscription};
use rollcache_core::views::SliceObserver;
use rollcache_core::{
    AttendanceGateway, AttendanceStatus, AttendanceStore, HttpGateway, MemoryGateway,
    NewAttendance, Poller, RawRow, SystemClock,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;

// ============================================================================
// Constants
// ============================================================================

/// How often demo mode checks in a new student
const DEMO_CHECK_IN_INTERVAL_SECS: u64 = 20;

const USAGE: &str = "\
Usage: rollcache [--once] [--demo] [--init-config]

  --once         refresh once, print every panel and exit
  --demo         use built-in sample data instead of the configured gateway
  --init-config  write the current configuration to the config file and exit

Logging is controlled by RUST_LOG (default: warn).";

#[derive(Debug, Default, PartialEq)]
struct Args {
    once: bool,
    demo: bool,
    init_config: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<Args>> {
    let mut parsed = Args::default();
    for arg in args {
        match arg.as_str() {
            "--once" => parsed.once = true,
            "--demo" => parsed.demo = true,
            "--init-config" => parsed.init_config = true,
            "-h" | "--help" => return Ok(None),
            other => bail!("Unknown argument: {}\n\n{}", other, USAGE),
        }
    }
    Ok(Some(parsed))
}

/// Initialize the tracing subscriber for logging.
///
/// Returns the file writer guard when a log directory is configured; it must
/// stay alive until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "rollcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let Some(args) = parse_args(std::env::args().skip(1))? else {
        println!("{}", USAGE);
        return Ok(());
    };

    let (config, ignored_overrides) = Config::load()?;
    if args.init_config {
        for message in &ignored_overrides {
            eprintln!("{}", message);
        }
        let path = config.save()?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let _log_guard = init_tracing(config.log_dir.as_deref());
    for message in &ignored_overrides {
        warn!("{}", message);
    }
    info!(gateway = %config.gateway_url, demo = args.demo, "rollcache starting");

    let gateway: Arc<dyn AttendanceGateway> = if args.demo {
        Arc::new(demo_gateway())
    } else {
        Arc::new(
            HttpGateway::with_timeout(&config.gateway_url, config.request_timeout())
                .with_context(|| format!("Invalid gateway URL: {}", config.gateway_url))?,
        )
    };
    let store = Arc::new(AttendanceStore::new(gateway, Arc::new(SystemClock)));

    let first = store.refresh().await;
    if args.once && !matches!(first, RefreshOutcome::Changed | RefreshOutcome::Unchanged) {
        bail!("Could not load attendance from {} ({:?})", config.gateway_url, first);
    }
    if let RefreshOutcome::Skipped(reason) = first {
        warn!(?reason, "Initial load failed, will keep polling");
    }

    let _subscriptions = attach_views(&store, &config);
    if args.once {
        return Ok(());
    }

    let poller = Poller::new(store.clone(), config.poll_interval()).start();
    let demo_task = args.demo.then(|| spawn_demo_check_ins(store.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("rollcache shutting down");
    if let Some(task) = demo_task {
        task.abort();
    }
    poller.stop().await;
    Ok(())
}

/// Attach one printing view per dashboard panel. Each prints its current
/// state right away and again whenever its own slice changes.
fn attach_views(store: &AttendanceStore, config: &Config) -> Vec<Subscription> {
    let offset = *store.calendar().offset();

    let (_, today) = SliceObserver::today(move |slice| print!("{}", render::today(slice, &offset))).attach(store);
    let (_, recent) = SliceObserver::recent(config.recent_limit, move |rows| {
        print!("{}", render::recent(rows, &offset))
    })
    .attach(store);
    let (_, ranking) =
        SliceObserver::most_present(config.most_present_limit, |entries| print!("{}", render::most_present(entries)))
            .attach(store);
    let (_, sections) = SliceObserver::sections(|summaries| print!("{}", render::sections(summaries))).attach(store);

    vec![today, recent, ranking, sections]
}

// ============================================================================
// Demo mode
// ============================================================================

/// Sample data exercising the field aliases the normalizer accepts.
fn demo_gateway() -> MemoryGateway {
    let now = Utc::now();
    let minutes_ago = |m: i64| (now - chrono::Duration::minutes(m)).to_rfc3339();

    let rows = vec![
        RawRow::new()
            .with("id", 1)
            .with("student_username", "@areyes")
            .with("student_fullname", "Ana Reyes")
            .with("student_section", "Rizal")
            .with("status", "Present")
            .with("time_in", minutes_ago(50)),
        RawRow::new()
            .with("id", 2)
            .with("username", "bcruz")
            .with("fullname", "Ben Cruz")
            .with("section", "Mabini")
            .with("status", "late")
            .with("timestamp", minutes_ago(30)),
        RawRow::new()
            .with("id", 3)
            .with("full_name", "Cy Santos")
            .with("section_name", "Rizal")
            .with("time", minutes_ago(12)),
        RawRow::new()
            .with("id", 4)
            .with("student_username", "areyes")
            .with("student_fullname", "Ana Reyes")
            .with("student_section", "Rizal")
            .with("status", "Present")
            .with("time_in", minutes_ago(60 * 24)),
        RawRow::new()
            .with("id", 5)
            .with("student_username", "dlim")
            .with("student_fullname", "Dee Lim")
            .with("status", "Absent")
            .with("time_in", minutes_ago(5)),
    ];
    MemoryGateway::with_rows(rows)
}

/// Periodically check in a sample student through the mutation path.
fn spawn_demo_check_ins(store: Arc<AttendanceStore>) -> JoinHandle<()> {
    const STUDENTS: [(&str, &str, &str); 3] = [
        ("Eli Tan", "etan", "Mabini"),
        ("Fe Ramos", "framos", "Rizal"),
        ("Gio Uy", "guy", "Bonifacio"),
    ];

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(DEMO_CHECK_IN_INTERVAL_SECS));
        ticker.tick().await;

        for (name, username, section) in STUDENTS.iter().cycle() {
            ticker.tick().await;
            let entry = NewAttendance::check_in(*name, Some(username.to_string()))
                .with_section(*section)
                .with_status(AttendanceStatus::Present);
            if let Err(e) = store.add(&entry).await {
                warn!(error = %e, "Demo check-in failed");
            }
        }
    })
}
