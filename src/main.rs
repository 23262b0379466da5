use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use depot_sync::config::{self, ConfigManager, SyncConfig};
use depot_sync::history::HistoryStore;
use depot_sync::logger;
use depot_sync::report;
use depot_sync::sync;

#[derive(Parser)]
#[command(name = "depot-sync")]
#[command(about = "One-way sync of files between versioned-file depots", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all configured sync profiles (or a single one)
    Sync {
        /// Config file path (default: platform config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run only the named profile
        #[arg(short, long)]
        profile: Option<String>,

        /// Directory for history files (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a commented sample configuration file
    Init {
        /// Config file path (default: platform config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// List the configured sync profiles
    ListProfiles {
        /// Config file path (default: platform config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Load and validate the configuration, reporting any problems
    ValidateConfig {
        /// Config file path (default: platform config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show persisted sync history
    QueryHistory {
        /// Config file path (default: platform config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory of history files (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show only runs for this profile name
        #[arg(short, long)]
        profile: Option<String>,

        /// Show only runs from this date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    logger::init_logger()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Sync {
            config,
            profile,
            output,
        } => {
            let mut cfg = SyncConfig::load(config.as_deref())?;
            if let Some(dir) = output {
                cfg.history_dir = Some(dir);
            }
            sync::run(&cfg, profile.as_deref())?;
        }
        Commands::Init { config, force } => {
            let path = config::write_sample_config(config.as_deref(), force)?;
            println!(
                "{} {}",
                "Wrote sample configuration to".green(),
                path.display()
            );
        }
        Commands::ListProfiles { config } => {
            let cfg = SyncConfig::load(config.as_deref())?;
            list_profiles(&cfg);
        }
        Commands::ValidateConfig { config } => {
            // Load performs full validation.
            let cfg = SyncConfig::load(config.as_deref())?;
            println!(
                "{}",
                format!("Configuration valid: {} profile(s)", cfg.profiles.len())
                    .green()
                    .bold()
            );
        }
        Commands::QueryHistory {
            config,
            output,
            profile,
            date,
            limit,
        } => {
            query_history(config, output, profile, date, limit)?;
        }
    }

    Ok(())
}

fn list_profiles(config: &SyncConfig) {
    if config.profiles.is_empty() {
        println!("{}", "No profiles configured.".yellow());
        return;
    }
    for p in &config.profiles {
        println!("{}", p.name.bold().cyan());
        println!(
            "  {} {} ({}) -> {} ({})",
            "endpoints:".dimmed(),
            p.source.address,
            p.source.workspace,
            p.target.address,
            p.target.workspace
        );
        println!("  {} {}", "patterns:".dimmed(), p.filter_patterns.join(", "));
        println!(
            "  {} auto_submit={}, schedule={}",
            "options:".dimmed(),
            p.auto_submit,
            p.schedule.as_deref().unwrap_or("none")
        );
    }
}

fn query_history(
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    profile: Option<String>,
    date: Option<String>,
    limit: usize,
) -> Result<()> {
    let history_dir = match output {
        Some(dir) => dir,
        None => match SyncConfig::load(config.as_deref()) {
            Ok(cfg) => cfg.history_dir()?,
            Err(_) => ConfigManager::history_dir()?,
        },
    };
    let store = HistoryStore::new(&history_dir)?;

    let date_filter = date
        .map(|d| {
            NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .with_context(|| format!("invalid date '{d}', expected YYYY-MM-DD"))
        })
        .transpose()?;

    let histories = store.query_histories(|h| match &profile {
        Some(name) => h.profile.name == *name,
        None => true,
    })?;

    let mut runs: Vec<_> = histories
        .into_iter()
        .flat_map(|h| {
            let id = h.profile_id.clone();
            h.syncs.into_iter().map(move |run| (id.clone(), run))
        })
        .filter(|(_, run)| match date_filter {
            Some(date) => run.sync_time.date_naive() == date,
            None => true,
        })
        .collect();
    runs.sort_by(|a, b| b.1.sync_time.cmp(&a.1.sync_time));

    report::print_sync_runs(&runs, limit);
    Ok(())
}
