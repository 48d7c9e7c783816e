use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use garmin_export::activity_sync::{ActivityLister, ActivitySync};
use garmin_export::auth::{Authenticator, Credentials};
use garmin_export::common::cache::TtlCache;
use garmin_export::common::connect_client::ConnectClient;
use garmin_export::common::http_session::HttpSession;
use garmin_export::config::{DEFAULT_PAGE_SIZE, ExportConfig, default_cache_dir};

#[derive(Parser)]
#[command(version, about = "Export Garmin Connect activities as GPX and TCX files")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Account email or username
    #[arg(long, env = "GARMIN_USERNAME")]
    username: String,

    #[arg(long, env = "GARMIN_PASSWORD", hide_env_values = true)]
    password: String,

    /// Directory for cached API responses
    #[arg(long, env = "GARMIN_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Activities requested per listing page (1-100)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,

    /// Ignore cached totals and activity listing
    #[arg(long)]
    refresh: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every activity not yet saved and update the index
    Sync {
        /// Root of the export: gpx/, tcx/ and activities.json
        #[arg(short, long)]
        output_dir: PathBuf,
    },
    /// Print the account's activities
    List,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub async fn run(args: Cli) -> Result<()> {
    let config = ExportConfig {
        cache_dir: args.cache_dir.clone().unwrap_or_else(default_cache_dir),
        page_size: args.page_size,
        ..ExportConfig::default()
    };
    config.validate()?;

    let session =
        HttpSession::with_cookie_file(config.request_timeout, config.cookie_file(&args.username))?;
    let client = ConnectClient::new(session, config.endpoints.clone());
    let cache = TtlCache::new(&config.cache_dir);

    let mut authenticator = Authenticator::new(&client, &cache, config.cache_ttl);
    let account = authenticator
        .connect(Credentials::new(args.username, args.password))
        .await
        .context("Failed to authenticate")?;

    match args.command {
        Commands::Sync { output_dir } => {
            fs::create_dir_all(&output_dir).with_context(|| {
                format!("Failed to create output directory {}", output_dir.display())
            })?;

            let sync = ActivitySync::new(&client, &cache, &config, &output_dir);
            if args.refresh {
                sync.lister().invalidate(&account);
            }
            let report = sync.sync(&account).await.context("Sync failed")?;
            info!(
                "{} downloaded, {} failed, {} activities in {}",
                report.downloaded,
                report.failed,
                report.indexed,
                output_dir.display()
            );
        }
        Commands::List => {
            let lister = ActivityLister::new(&client, &cache, config.page_size, config.cache_ttl);
            if args.refresh {
                lister.invalidate(&account);
            }
            let activities = lister
                .list_activities(&account)
                .await
                .context("Failed to list activities")?;
            for activity in activities {
                let distance = activity
                    .distance
                    .map(|d| format!("{:.2} km", d / 1000.0))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{}",
                    activity.id, activity.start_time.local, activity.activity_type, distance
                );
            }
        }
    }

    client.session().save_cookies();
    Ok(())
}
