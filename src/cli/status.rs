use crate::cli::open_db;
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::settings::load_settings;
use crate::store::{count_transactions, last_sync_at, list_categories};

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();
    let oracle = settings.resolved_oracle();

    println!("User:       {}", settings.user_id);
    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());
    println!("Mailbox:    {}", settings.mail_dir.as_deref().unwrap_or("(not set)"));
    if oracle.is_configured() {
        println!("Oracle:     {} via {}", oracle.model, oracle.base_url);
    } else {
        println!("Oracle:     (not configured)");
    }

    if db_path.exists() {
        let size = std::fs::metadata(&db_path)?.len();
        println!("DB size:    {}", format_bytes(size));

        let conn = open_db(&settings)?;
        let transactions = count_transactions(&conn, &settings.user_id)?;
        let categories = list_categories(&conn, &settings.user_id)?.len();
        let last_sync = last_sync_at(&conn, &settings.user_id)?
            .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!();
        println!("Transactions:  {transactions}");
        println!("Categories:    {categories}");
        println!("Last sync:     {last_sync}");
    } else {
        println!();
        println!("Database not found. Run `bankmail init` to set up.");
    }

    Ok(())
}
