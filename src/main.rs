use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod chrome;
mod collector;
mod config;
mod domain;
mod driver;
mod enrichment;
mod error;
mod extract;
mod models;
mod pacing;
mod processor;
mod selectors;
mod sleuth;
mod store;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every configured location and store the extracted leads
    Run(config::RunArgs),
    /// Print stored leads as JSON
    Leads {
        /// SQLite database file to read
        #[arg(long, default_value = "leads.sqlite", env = "LEAD_SLEUTH_DATABASE")]
        database: String,

        /// Only leads with this email (case-insensitive)
        #[arg(long, conflicts_with = "website")]
        email: Option<String>,

        /// Only leads with this website
        #[arg(long)]
        website: Option<String>,

        /// Only businesses without a usable website
        #[arg(long, default_value = "false")]
        high_value: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await?,
        Commands::Leads {
            database,
            email,
            website,
            high_value,
        } => print_leads(&database, email, website, high_value).await?,
    }

    Ok(())
}

async fn run(args: config::RunArgs) -> Result<()> {
    let config = Arc::new(config::build_config(&args)?);

    let store = store::LeadStore::open(&config.database_path).await?;
    let existing = store.count().await?;
    info!("Lead database holds {} leads before this run", existing);

    let (trigger, shutdown) = pacing::shutdown_channel();
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        info!("Stop requested; finishing in-flight work, no new queries will start");
        trigger.trigger();
    });

    let sessions = tokio::task::spawn_blocking({
        let config = Arc::clone(&config);
        move || chrome::ChromeSessionFactory::launch(&config)
    })
    .await??;
    let sleuth = sleuth::LeadSleuth::new(Arc::clone(&config), Arc::new(sessions));

    let progress_bar = indicatif::ProgressBar::new(config.locations.len() as u64);
    progress_bar.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    let summary = sleuth.run(&store, shutdown, progress_bar.clone()).await;
    progress_bar.finish_with_message("Run complete");
    let summary = summary?;

    info!(
        "Queries: {} planned, {} completed, {} abandoned",
        summary.queries_planned, summary.queries_completed, summary.queries_abandoned
    );
    info!(
        "Candidates: {} seen, {} failed",
        summary.candidates_seen, summary.candidates_failed
    );
    info!(
        "Leads: {} saved ({} high value), {} duplicates ignored, {} total in {}",
        summary.leads_saved,
        summary.high_value_saved,
        summary.duplicates_ignored,
        store.count().await?,
        config.database_path
    );
    store.close().await;

    Ok(())
}

async fn wait_for_stop_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn print_leads(
    database: &str,
    email: Option<String>,
    website: Option<String>,
    high_value: bool,
) -> Result<()> {
    let store = store::LeadStore::open(database).await?;
    let mut leads = match (email, website) {
        (Some(email), _) => store.find_by_email(&email).await?,
        (None, Some(website)) => store.find_by_website(&website).await?,
        (None, None) => store.list(high_value).await?,
    };
    if high_value {
        leads.retain(models::Lead::is_high_value);
    }

    println!("{}", serde_json::to_string_pretty(&leads)?);
    info!("{} leads", leads.len());
    store.close().await;
    Ok(())
}
