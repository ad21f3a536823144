use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use review_board::{
    render_board, BoardError, Config, HttpDocumentStore, Notice, NotificationService, ReviewBoard,
};

#[derive(Parser)]
#[command(name = "review-board")]
#[command(about = "Read and write the shared review board")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (defaults to .review-board/config.yml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the review document URL
    #[arg(long, env = "REVIEW_BOARD_URL")]
    url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show all reviews, newest first
    List,

    /// Show review count and average rating
    Stats,

    /// Submit a new review
    Submit {
        /// Review text
        #[arg(long)]
        text: String,

        /// Rating from 0 to 100
        #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(i64).range(0..=100))]
        rating: i64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("review_board=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(url) = cli.url {
        config.store.url = url;
        config.validate()?;
    }

    let board = ReviewBoard::new(HttpDocumentStore::new(config.store.url.clone()))
        .with_policy(config.store.write_policy());

    info!(url = %board.store().url(), policy = ?board.policy(), "Using review store");
    let notifier = NotificationService::new(&config.notifications.slack);

    let outcome = match cli.command {
        Commands::List => list(&board).await,
        Commands::Stats => stats(&board).await,
        Commands::Submit { text, rating } => submit(&board, &notifier, &text, rating).await,
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            error!(error = %err, "Review board operation failed");
            notifier.notify(&Notice::from_error(&err)).await;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn list(board: &ReviewBoard<HttpDocumentStore>) -> Result<(), BoardError> {
    let aggregate = board.load().await?;
    print!("{}", render_board(&aggregate));
    Ok(())
}

async fn stats(board: &ReviewBoard<HttpDocumentStore>) -> Result<(), BoardError> {
    let stats = board.load().await?.stats();
    println!("Reviews: {}", stats.count);
    println!("Average rating: {:.1}", stats.average);
    Ok(())
}

async fn submit(
    board: &ReviewBoard<HttpDocumentStore>,
    notifier: &NotificationService,
    text: &str,
    rating: i64,
) -> Result<(), BoardError> {
    let aggregate = board.submit(text, rating).await?;

    notifier.notify(&Notice::thanks()).await;

    if let Some(review) = aggregate.reviews.last() {
        if let Err(e) = notifier.notify_new_review(review).await {
            warn!(error = %e, "Could not announce new review");
        }
    }

    println!();
    print!("{}", render_board(&aggregate));

    Ok(())
}
