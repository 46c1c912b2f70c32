pub mod types;
pub mod config;
pub mod geometry;
pub mod store;
pub mod snapshot;
pub mod report;
pub mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use store::{LoadOutcome, PlotStore};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the plot mapping app
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Write the plot report PDF without starting the server
    Export {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE", default_value = report::EXPORT_FILENAME)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            println!("Serving with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let store = open_store(&app_config);
            server::start_server(app_config, store).await?;
        }
        Commands::Export { config, output } => {
            println!("Exporting report with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let store = open_store(&app_config);
            let fetcher = snapshot::HttpTileFetcher::new(&app_config.tiles.url_template);

            let outcome = match report::export_pdf(store.plots(), &app_config, &fetcher).await {
                Ok(outcome) => outcome,
                Err(report::ExportError::NoPlots) => {
                    println!("No plots recorded yet, nothing to export.");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            for warning in &outcome.warnings {
                println!("warning: {warning}");
            }
            std::fs::write(output, &outcome.pdf)
                .with_context(|| format!("Failed to write {:?}", output))?;
            println!("Wrote {} page(s) to {:?}", outcome.pages, output);
        }
    }

    Ok(())
}

fn open_store(config: &config::AppConfig) -> PlotStore {
    let (store, outcome) = PlotStore::open(&config.storage.path);
    match outcome {
        LoadOutcome::Loaded(n) => {
            println!("Loaded {} plot(s) from {:?}", n, config.storage.path)
        }
        LoadOutcome::Absent => {
            println!("No plot file at {:?} yet, starting empty", config.storage.path)
        }
        LoadOutcome::Failed(err) => tracing::warn!(
            "could not load {:?}: {err}; starting empty",
            config.storage.path
        ),
    }
    store
}
