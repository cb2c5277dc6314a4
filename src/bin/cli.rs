//! restock CLI
//!
//! Operator entry point: run catalog syncs, manage monitors, run the sweep
//! loop and classify saved pages.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use restock::{
    cache::{RateLimiter, TtlCache},
    error::{AppError, Result},
    models::{Config, Monitor, Source},
    pipeline::{MonitorScheduler, SweepReport, SyncEngine, Ticker},
    services::{HttpPageFetcher, StockClassifier, build_sources},
    storage::{LocalStorage, MonitorStore, SyncStore},
    utils::{clock, parse_http_url},
};
use sha2::{Digest, Sha256};

/// One week.
const MAX_FREQUENCY_MINUTES: i64 = 7 * 24 * 60;

/// restock - catalog sync and stock monitoring
#[derive(Parser, Debug)]
#[command(name = "restock", version, about = "Catalog sync and stock monitor engine")]
struct Cli {
    /// Storage directory holding config.toml and the JSON store
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync one catalog (or all of them) in the foreground
    Sync {
        /// pokemon, mtg, yugioh or lorcana; omit for all
        source: Option<String>,

        /// Access key (default: config / SYNC_ACCESS_KEY)
        #[arg(long)]
        access_key: Option<String>,
    },

    /// Show one sync job
    Status { job_id: String },

    /// List sync jobs
    Jobs {
        /// Only non-terminal jobs
        #[arg(long)]
        active: bool,
    },

    /// Show stored catalog sets for a source
    Sets { source: String },

    /// Manage monitors
    Monitor {
        #[command(subcommand)]
        action: MonitorCommand,
    },

    /// Check one monitor now
    Check { id: String },

    /// Check every active monitor now
    CheckAll {
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Run a single sweep
    Sweep,

    /// Sweep on an interval until Ctrl-C
    Watch,

    /// Classify a saved HTML page
    Classify {
        file: PathBuf,

        /// Page URL, for site-specific rules
        #[arg(long, default_value = "https://unknown.invalid/")]
        url: String,

        #[arg(long)]
        target: Option<String>,
    },

    /// Write the effective configuration as TOML
    InitConfig {
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration files
    Validate,
}

#[derive(Subcommand, Debug)]
enum MonitorCommand {
    /// Register a URL
    Add {
        url: String,

        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        name: Option<String>,

        /// Text whose presence means "in stock"
        #[arg(long)]
        target: Option<String>,

        /// Baseline minutes between checks
        #[arg(long, default_value_t = 30)]
        frequency: i64,
    },

    /// List monitors
    List,

    /// Remove a monitor
    Remove { id: String },

    /// Pause or resume a monitor
    Toggle { id: String },

    /// Clear a monitor's error streak
    Reset { id: String },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn monitor_id_for(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("mon_{}", &digest[..12])
}

fn log_report(report: &SweepReport) {
    for outcome in &report.outcomes {
        log::info!(
            "{}: {} -> {}{}",
            outcome.monitor_id,
            outcome.previous_status,
            outcome.status,
            outcome
                .error_message
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
    }
    for (id, error) in &report.failures {
        log::warn!("{}: {}", id, error);
    }
    let restocks = report.restocks().count();
    if restocks > 0 {
        log::info!("{} monitor(s) back in stock", restocks);
    }
}

struct App {
    config: Config,
    store: Arc<LocalStorage>,
}

impl App {
    fn sync_engine(&self) -> Result<Arc<SyncEngine>> {
        let clock = clock::system();
        let limiter = RateLimiter::new(Arc::new(TtlCache::new(clock.clone())), clock.clone());
        Ok(Arc::new(SyncEngine::new(
            self.store.clone(),
            build_sources(&self.config)?,
            self.config.sync.clone(),
            clock,
            limiter,
        )))
    }

    fn scheduler(&self) -> Result<Arc<MonitorScheduler>> {
        let classifier = StockClassifier::new(self.config.classifier.clone())?;
        let fetcher = HttpPageFetcher::new(&self.config.http)?;
        Ok(Arc::new(MonitorScheduler::new(
            self.store.clone(),
            Arc::new(fetcher),
            Arc::new(classifier),
            self.config.scheduler.clone(),
            clock::system(),
        )))
    }
}

async fn run_monitor_command(app: &App, action: MonitorCommand) -> Result<()> {
    match action {
        MonitorCommand::Add {
            url,
            id,
            name,
            target,
            frequency,
        } => {
            let parsed = parse_http_url(&url)
                .ok_or_else(|| AppError::validation(format!("Not an http(s) URL: {url}")))?;
            if !(1..=MAX_FREQUENCY_MINUTES).contains(&frequency) {
                return Err(AppError::validation(format!(
                    "--frequency must be between 1 and {MAX_FREQUENCY_MINUTES}"
                )));
            }
            let url = parsed.to_string();
            let id = id.unwrap_or_else(|| monitor_id_for(&url));
            let mut monitor = Monitor::new(&id, url, frequency, chrono::Utc::now());
            if let Some(name) = name {
                monitor = monitor.with_name(name);
            }
            if let Some(target) = target {
                monitor = monitor.with_target(target);
            }
            app.store.save_monitor(&monitor).await?;
            log::info!("Added monitor {} ({})", id, monitor.label());
        }
        MonitorCommand::List => {
            print_json(&app.store.list_monitors().await?)?;
        }
        MonitorCommand::Remove { id } => {
            if !app.store.delete_monitor(&id).await? {
                return Err(AppError::not_found(format!("monitor {id}")));
            }
            log::info!("Removed monitor {}", id);
        }
        MonitorCommand::Toggle { id } => {
            let mut monitor = app
                .store
                .get_monitor(&id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("monitor {id}")))?;
            monitor.is_active = !monitor.is_active;
            app.store.save_monitor(&monitor).await?;
            log::info!(
                "Monitor {} is now {}",
                id,
                if monitor.is_active { "active" } else { "paused" }
            );
        }
        MonitorCommand::Reset { id } => {
            let monitor = app.scheduler()?.reset_errors(&id).await?;
            print_json(&monitor)?;
        }
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.storage_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);

    if let Command::InitConfig { force } = &cli.command {
        if config_path.exists() && !force {
            log::warn!(
                "{} already exists. Use --force to overwrite.",
                config_path.display()
            );
            return Ok(());
        }
        std::fs::create_dir_all(&cli.storage_dir)?;
        std::fs::write(&config_path, config.to_toml()?)?;
        log::info!("Wrote {}", config_path.display());
        return Ok(());
    }

    let store = Arc::new(LocalStorage::open(&cli.storage_dir).await?);
    let app = App { config, store };

    match cli.command {
        Command::Sync { source, access_key } => {
            let engine = app.sync_engine()?;
            let recovered = engine.recover_abandoned().await?;
            if recovered > 0 {
                log::warn!("Failed {} job(s) left over from a previous run", recovered);
            }

            let sources = match source {
                Some(name) => vec![name.parse::<Source>()?],
                None => Source::ALL.to_vec(),
            };
            let key = access_key.unwrap_or_else(|| app.config.sync.access_key.clone());

            let mut failed = 0;
            for source in sources {
                let job = match engine.admit(source, &key).await {
                    Ok(job) => job,
                    Err(e) => {
                        log::warn!("{}: {}", source, e);
                        failed += 1;
                        continue;
                    }
                };
                let done = engine.run_to_completion(job).await;
                match &done.error {
                    Some(error) => {
                        log::error!("{}: {} failed: {}", source, done.job_id, error);
                        failed += 1;
                    }
                    None => log::info!(
                        "{}: {} synced {} sets",
                        source,
                        done.job_id,
                        done.completed_items
                    ),
                }
            }
            if failed > 0 {
                return Err(AppError::upstream("sync", format!("{failed} source(s) failed")));
            }
        }

        Command::Status { job_id } => {
            print_json(&app.sync_engine()?.get_status(&job_id).await?)?;
        }

        Command::Jobs { active } => {
            let jobs = if active {
                app.store.active_jobs().await?
            } else {
                app.sync_engine()?.list_jobs().await?
            };
            print_json(&jobs)?;
        }

        Command::Sets { source } => {
            let source: Source = source.parse()?;
            let sets = app.store.list_sets(source).await?;
            log::info!("{} sets stored for {}", sets.len(), source);
            print_json(&sets)?;
        }

        Command::Monitor { action } => run_monitor_command(&app, action).await?,

        Command::Check { id } => {
            let outcome = app.scheduler()?.check_monitor(&id).await?;
            print_json(&outcome)?;
        }

        Command::CheckAll { concurrency } => {
            let scheduler = app.scheduler()?;
            let concurrency =
                concurrency.unwrap_or(scheduler.config().check_all_concurrency);
            let report = scheduler.check_all(concurrency).await?;
            log_report(&report);
        }

        Command::Sweep => {
            let report = app.scheduler()?.sweep().await?;
            log_report(&report);
        }

        Command::Watch => {
            let ticker = Ticker::start(app.scheduler()?);
            tokio::signal::ctrl_c().await?;
            log::info!("Stopping...");
            ticker.stop().await;
        }

        Command::Classify { file, url, target } => {
            let html = std::fs::read_to_string(&file)?;
            let classifier = StockClassifier::new(app.config.classifier.clone())?;
            let result = classifier.classify(&html, &url, target.as_deref());
            print_json(&result)?;
        }

        Command::InitConfig { .. } => {}

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = app.config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            if app.config.sync.access_key.is_empty() {
                log::warn!("No sync access key configured; sync requests will be refused");
            }
            log::info!(
                "✓ Config OK ({} site rules, {} user agents)",
                app.config.classifier.sites.len(),
                app.config.http.user_agents.len()
            );
        }
    }

    Ok(())
}
