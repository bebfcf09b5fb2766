//! CLI for the force-rotation engine.
//!
//! `replay`: settings -> service start -> foreground trace -> carrier calls -> report.
//! `settings`: read or write the settings file the service is configured from.

use clap::{Parser, Subcommand};
use rotation_core::{PackageId, PlatformPackages, ServiceConfig};
use rotation_engine::replay::{parse_trace, replay};
use rotation_engine::sink::JsonStreamSink;
use rotation_provider::{SettingsRequest, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "force-rotation", version, about = "Per-app orientation override engine")]
struct Cli {
    /// Packages force-rotated when the user never made a selection.
    #[arg(long, global = true, env = "FORCE_ROTATION_DEFAULTS", value_delimiter = ',')]
    defaults: Vec<String>,

    /// Packages always force-rotated, regardless of selection.
    #[arg(long, global = true, env = "FORCE_ROTATION_EXTRAS", value_delimiter = ',')]
    extras: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a foreground trace and report the overlay calls it produces.
    Replay {
        /// One package id per line; `-` marks an unresolved notification.
        #[arg(short, long)]
        trace: PathBuf,

        /// Settings file; platform defaults apply when omitted.
        #[arg(short, long, env = "FORCE_ROTATION_SETTINGS")]
        settings: Option<PathBuf>,

        /// How long to wait for the first allow-list load.
        #[arg(long, default_value_t = 2000)]
        initial_refresh_ms: u64,

        /// Sink output: "ndjson" writes NDJSON to stdout,
        /// "ndjson:/path/to/file" writes to file.
        #[arg(long)]
        sink: Option<String>,
    },

    /// Inspect or change the settings file.
    Settings {
        #[arg(short, long, env = "FORCE_ROTATION_SETTINGS")]
        file: PathBuf,

        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the enabled flag, selection, and effective package set.
    Show,
    Enable,
    Disable,
    /// Replace the package selection.
    SetPackages {
        #[arg(value_delimiter = ',')]
        packages: Vec<String>,
    },
    /// Forget the selection so the defaults apply again.
    ClearPackages,
    /// Invoke the request/response surface by method name.
    Call {
        method: String,
        #[arg(long)]
        checked: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let platform = PlatformPackages::new(cli.defaults, cli.extras);

    match cli.command {
        Commands::Replay {
            trace,
            settings,
            initial_refresh_ms,
            sink,
        } => {
            let t0 = Instant::now();

            let settings = match settings {
                Some(path) => SettingsStore::open(path, platform)?,
                None => SettingsStore::in_memory(platform),
            };
            let text = std::fs::read_to_string(&trace)?;
            let notifications = parse_trace(&text);
            tracing::info!(
                trace = %trace.display(),
                notifications = notifications.len(),
                "starting replay"
            );

            let config = ServiceConfig::default().with_initial_refresh_timeout(
                std::time::Duration::from_millis(initial_refresh_ms),
            );
            let report = replay(Arc::new(settings), &notifications, config).await?;
            tracing::info!(elapsed = ?t0.elapsed(), "replay done");

            if let Some(ref sink_spec) = sink {
                let (summary, events) = report.to_rows();

                if sink_spec == "ndjson" {
                    let mut s = JsonStreamSink::stdout();
                    s.write_summary(&summary)?;
                    s.write_carrier_events(&events)?;
                    let n = s.finish()?;
                    tracing::info!(rows = n, "ndjson sink: wrote to stdout");
                } else if let Some(path) = sink_spec.strip_prefix("ndjson:") {
                    let file = std::fs::File::create(path)?;
                    let mut s = JsonStreamSink::new(file);
                    s.write_summary(&summary)?;
                    s.write_carrier_events(&events)?;
                    let n = s.finish()?;
                    tracing::info!(rows = n, path, "ndjson sink: wrote to file");
                } else {
                    eprintln!(
                        "Unknown sink: {}. Use 'ndjson' or 'ndjson:/path'",
                        sink_spec
                    );
                }

                eprint!("{}", report.render());
            } else {
                print!("{}", report.render());
            }
        }

        Commands::Settings { file, action } => {
            let store = SettingsStore::open(&file, platform)?;

            match action {
                SettingsAction::Show => {}
                SettingsAction::Enable => store.set_enabled(true)?,
                SettingsAction::Disable => store.set_enabled(false)?,
                SettingsAction::SetPackages { packages } => {
                    store.set_packages(packages.into_iter().map(PackageId::from))?
                }
                SettingsAction::ClearPackages => store.clear_packages()?,
                SettingsAction::Call { method, checked } => {
                    let request = SettingsRequest::parse(&method, checked)?;
                    let response = store.call(request)?;
                    println!("{}", serde_json::to_string_pretty(&response)?);
                    return Ok(());
                }
            }

            let selected = store.selected_packages().map(|set| {
                let mut v: Vec<String> = set.into_iter().map(|p| p.to_string()).collect();
                v.sort();
                v
            });
            let effective: Vec<String> = store
                .effective_packages()
                .sorted()
                .into_iter()
                .map(|p| p.to_string())
                .collect();

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "enabled": store.is_enabled(),
                    "selected": selected,
                    "effective": effective,
                }))?
            );
        }
    }

    Ok(())
}
