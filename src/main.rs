mod categorizer;
mod cli;
mod db;
mod error;
mod extract;
mod fallback;
mod fmt;
mod mail;
mod models;
mod normalizer;
mod oracle;
mod orchestrator;
mod parsers;
mod settings;
mod store;
mod sync;
mod sync_log;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, TransactionsCommands};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bankmail=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init {
            data_dir,
            mail_dir,
            email,
        } => cli::init::run(data_dir, mail_dir, email),
        Commands::Sync {
            source,
            full,
            json,
            verbose,
        } => cli::sync::run(source, full, json, verbose).await,
        Commands::Parse { file, llm } => cli::parse::run(&file, llm).await,
        Commands::Categories => cli::categories::list(),
        Commands::Transactions { command } => match command {
            TransactionsCommands::List { limit } => cli::transactions::list(limit),
            TransactionsCommands::Edit {
                id,
                merchant,
                category,
                subcategory,
                description,
                verified,
            } => cli::transactions::edit(
                &id,
                merchant,
                category,
                subcategory,
                description,
                verified,
            ),
        },
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
