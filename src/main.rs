mod cache;
mod geo;
mod github;
mod points;
mod poller;
mod settings;
mod store;
mod sync;
mod terminal;
mod viz;

use clap::{Parser, Subcommand};
use settings::Settings;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use sync::VisitorSync;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "globetrack")]
#[command(version)]
#[command(about = "Terminal globe tracking website visitors from a Supabase table", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the rotating globe with live visitor markers
    Globe {
        /// Seconds between visitor polls (default from config, else 30)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Animation step delay in seconds
        #[arg(short, long)]
        time: Option<f32>,

        /// Do not record this session as a visit
        #[arg(long)]
        no_track: bool,
    },

    /// Fetch visitor locations once and print them
    Sync {
        /// Print aggregated points as JSON instead of a table
        #[arg(short, long)]
        json: bool,
    },

    /// Record the current location as a visit
    Track,

    /// Print a GitHub contribution heatmap
    Activity {
        /// GitHub username (default from config)
        #[arg(short, long)]
        username: Option<String>,

        /// API token for higher rate limits
        #[arg(short, long)]
        token: Option<String>,
    },
}

/// Route logs away from stdout. The globe runs on the alternate screen, so
/// its logs go to a file under the cache directory instead of stderr.
fn init_tracing(to_file: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if to_file {
        let dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("globetrack");
        let file = std::fs::create_dir_all(&dir)
            .and_then(|_| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join("globetrack.log"))
            })
            .ok();
        match file {
            Some(file) => builder.with_ansi(false).with_writer(Arc::new(file)).init(),
            None => builder.with_writer(io::sink as fn() -> io::Sink).init(),
        }
    } else {
        builder.with_writer(io::stderr as fn() -> io::Stderr).init();
    }
}

fn run_sync(settings: &Settings, json: bool) -> ExitCode {
    let mut sync = VisitorSync::from_settings(settings).tracking(false);
    let points = sync.initial_load();

    if json {
        match serde_json::to_string_pretty(&points) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("failed to encode points: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{:<20} {:<20} {:>9} {:>9} {:>7}", "CITY", "COUNTRY", "LAT", "LNG", "VISITS");
        for p in &points {
            println!(
                "{:<20} {:<20} {:>9.4} {:>9.4} {:>7}",
                p.city, p.country, p.lat, p.lng, p.visits
            );
        }
        let source = match sync.connectivity() {
            sync::Connectivity::Connected => "live",
            sync::Connectivity::Disconnected => "fallback",
        };
        println!("\n{} locations ({source})", points.len());
    }
    ExitCode::SUCCESS
}

fn run_track(settings: &Settings) -> ExitCode {
    let sync = VisitorSync::from_settings(settings);
    match sync.record_visit() {
        Ok(location) => {
            println!(
                "recorded visit from {}, {} ({:.4}, {:.4})",
                location.city, location.country, location.lat, location.lng
            );
            ExitCode::SUCCESS
        }
        Err(store::StoreError::NotConfigured) => {
            eprintln!(
                "no visitor store configured; add [store] url and anon_key to {}",
                Settings::config_path().display()
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("failed to record visit: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_activity(settings: &Settings, username: Option<String>, token: Option<String>) -> ExitCode {
    let Some(username) = username.or_else(|| settings.github.username.clone()) else {
        eprintln!(
            "no github username given; pass --username or set [github] username in {}",
            Settings::config_path().display()
        );
        return ExitCode::FAILURE;
    };
    let token = token.or_else(|| settings.github.token.clone());

    let client = github::GithubClient::new(token);
    let contrib = client.fetch_contributions(&username);
    let stats = client.fetch_repo_stats(&username);

    let weeks = match crossterm::terminal::size() {
        Ok((w, _)) => ((w.saturating_sub(6)) as usize).min(52).max(4),
        Err(_) => 52,
    };
    github::print_heatmap(&contrib, stats.as_ref(), weeks);
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::load();

    match cli.command {
        Commands::Globe {
            interval,
            time,
            no_track,
        } => {
            init_tracing(true);
            let interval = interval.or(settings.globe.interval_secs).unwrap_or(30);
            let time = time.or(settings.globe.time_step).unwrap_or(0.03);
            match viz::globe::run(&settings, interval, time, !no_track) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("globe failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Sync { json } => {
            init_tracing(false);
            run_sync(&settings, json)
        }
        Commands::Track => {
            init_tracing(false);
            run_track(&settings)
        }
        Commands::Activity { username, token } => {
            init_tracing(false);
            run_activity(&settings, username, token)
        }
    }
}
