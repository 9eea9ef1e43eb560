pub mod categories;
pub mod init;
pub mod parse;
pub mod status;
pub mod sync;
pub mod transactions;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::{ensure_user, get_connection, init_db};
use crate::error::{BankmailError, Result};
use crate::oracle::OpenAiOracle;
use crate::settings::{settings_file_exists, Settings};

/// Open the configured database, creating the schema and user on first use.
pub(crate) fn open_db(settings: &Settings) -> Result<Connection> {
    if !settings_file_exists() && !settings.db_path().exists() {
        return Err(BankmailError::Settings(
            "No database found. Run `bankmail init` to set up.".to_string(),
        ));
    }
    if let Some(parent) = settings.db_path().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;
    ensure_user(&conn, &settings.user_id, settings.user_email.as_deref())?;
    Ok(conn)
}

/// The HTTP oracle when a key is configured, otherwise `None`.
pub(crate) fn build_oracle(settings: &Settings) -> Result<Option<OpenAiOracle>> {
    let config = settings.resolved_oracle();
    if !config.is_configured() {
        return Ok(None);
    }
    Ok(Some(OpenAiOracle::new(config)?))
}

#[derive(Parser)]
#[command(
    name = "bankmail",
    about = "Turn bank notification emails into categorized transactions."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up bankmail: choose a data directory and mailbox, initialize the database.
    Init {
        /// Path for bankmail data (default: ~/.local/share/bankmail)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Directory of .eml files to sync from
        #[arg(long = "mail-dir")]
        mail_dir: Option<String>,
        /// Email address of the mailbox owner
        #[arg(long)]
        email: Option<String>,
    },
    /// Fetch new alert emails, parse, categorize and store them.
    Sync {
        /// Mailbox directory (overrides the configured one)
        #[arg(long)]
        source: Option<String>,
        /// Backfill the last six months instead of syncing since the last run
        #[arg(long)]
        full: bool,
        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
        /// Echo the run log
        #[arg(long, short)]
        verbose: bool,
    },
    /// Parse a single .eml file and print the extracted transaction.
    Parse {
        /// Path to the .eml file
        file: String,
        /// Use the LLM fallback when the regex result is not trustworthy
        #[arg(long)]
        llm: bool,
    },
    /// List the category catalog.
    Categories,
    /// Browse and edit stored transactions.
    Transactions {
        #[command(subcommand)]
        command: TransactionsCommands,
    },
    /// Show configuration and database statistics.
    Status,
}

#[derive(Subcommand)]
pub enum TransactionsCommands {
    /// List recent transactions, newest first.
    List {
        /// Maximum number of rows
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Edit a stored transaction.
    Edit {
        /// Transaction ID (shown in `bankmail transactions list`)
        id: String,
        /// New merchant name
        #[arg(long)]
        merchant: Option<String>,
        /// Category name or ID
        #[arg(long)]
        category: Option<String>,
        /// New subcategory
        #[arg(long)]
        subcategory: Option<String>,
        /// Free-form note
        #[arg(long)]
        description: Option<String>,
        /// Mark as verified (true/false)
        #[arg(long)]
        verified: Option<bool>,
    },
}
