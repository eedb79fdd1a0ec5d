use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use photo_indexer::config::AppConfig;
use photo_indexer::db;
use photo_indexer::importer;
use photo_indexer::library::{Collaborators, PhotoLibrary};
use photo_indexer::web_server;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "photo-indexer", version, about = "Photo library ingestion and search service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Ingest every image under a directory for one user
    Import {
        dir: PathBuf,
        #[arg(long)]
        user: i64,
    },
    /// Queue every image that has no embedding yet and wait for the queue to drain
    Revectorize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::new()?;

    // Initialize env_logger based on config.log_level
    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting photo-indexer");

    let pool = db::init_database(&config.database_url, (config.num_workers as u32).max(1) + 4).await?;
    let collaborators = Collaborators::from_config(&config)?;
    let library = Arc::new(PhotoLibrary::new(&config, pool, collaborators));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let pending = library.revectorize_pending().await?;
            if pending > 0 {
                info!("Resuming vectorization of {} image(s) in the background", pending);
            }
            // Run the web server in the foreground
            if let Err(e) = web_server::start_web_server(Arc::new(config), library).await {
                log::error!("Web server error: {}", e);
            }
        }
        Command::Import { dir, user } => {
            let summary = importer::import_directory(
                library.clone(),
                dir,
                user,
                config.allowed_extensions.clone(),
                config.num_workers,
            )
            .await?;
            info!("Waiting for vectorization of {} imported image(s)", summary.imported);
            library.wait_for_vectorization().await;
        }
        Command::Revectorize => {
            library.revectorize_pending().await?;
            library.wait_for_vectorization().await;
        }
    }

    info!("photo-indexer finished");
    Ok(())
}
